//! Drawable elements and their payloads.
//!
//! An artist is a tagged union over the supported element types. Every
//! artist declares its shape on creation (number of samples, bars, points,
//! image dimensions) and every later payload is checked against it.

use crate::error::{DevtkError, Result};
use crate::plot::id::{ArtistId, AxisId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Type tag of an artist
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArtistKind {
    Line,
    Scatter,
    Bar,
    Image,
    Text,
}

impl fmt::Display for ArtistKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ArtistKind::Line => "line",
            ArtistKind::Scatter => "scatter",
            ArtistKind::Bar => "bar",
            ArtistKind::Image => "image",
            ArtistKind::Text => "text",
        };
        f.write_str(name)
    }
}

/// Row-major image of scalar values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageBuffer {
    pub rows: usize,
    pub cols: usize,
    pub pixels: Vec<f64>,
}

impl ImageBuffer {
    /// An image of the given shape filled with `value`
    pub fn filled(rows: usize, cols: usize, value: f64) -> Result<Self> {
        let count = pixel_count(rows, cols)?;
        Ok(Self {
            rows,
            cols,
            pixels: vec![value; count],
        })
    }

    /// Build an image from rows of equal length
    pub fn from_rows(rows: Vec<Vec<f64>>) -> Result<Self> {
        let cols = rows.first().map(Vec::len).unwrap_or(0);
        if let Some(bad) = rows.iter().find(|r| r.len() != cols) {
            return Err(DevtkError::Configuration(format!(
                "Ragged image rows: expected {} columns, found a row with {}",
                cols,
                bad.len()
            )));
        }
        Ok(Self {
            rows: rows.len(),
            cols,
            pixels: rows.into_iter().flatten().collect(),
        })
    }

    pub fn get(&self, row: usize, col: usize) -> Option<f64> {
        if row < self.rows && col < self.cols {
            self.pixels.get(row * self.cols + col).copied()
        } else {
            None
        }
    }

    /// Minimum and maximum of the finite pixels
    pub fn finite_range(&self) -> Option<(f64, f64)> {
        self.pixels
            .iter()
            .copied()
            .filter(|v| v.is_finite())
            .fold(None, |acc, v| match acc {
                None => Some((v, v)),
                Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
            })
    }

    fn is_consistent(&self) -> bool {
        self.rows.checked_mul(self.cols) == Some(self.pixels.len())
    }
}

/// Largest number of elements an artist may hold; keeps every buffer
/// within the allocator's `isize::MAX` byte limit
const MAX_ELEMENTS: usize = isize::MAX as usize / std::mem::size_of::<[f64; 2]>();

fn pixel_count(rows: usize, cols: usize) -> Result<usize> {
    rows.checked_mul(cols)
        .filter(|&count| count <= MAX_ELEMENTS)
        .ok_or_else(|| {
            DevtkError::Configuration(format!("Image of {}x{} pixels is too large", rows, cols))
        })
}

/// Declared shape of an artist
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArtistShape {
    /// Line through `size` equally spaced samples
    Line { size: usize },
    /// Cloud of `num_points` points
    Scatter { num_points: usize },
    /// Group of `num_bars` bars
    Bar { num_bars: usize },
    /// Image of `rows` x `cols` pixels
    Image { rows: usize, cols: usize },
    /// Single text label
    Text,
}

impl ArtistShape {
    pub fn kind(&self) -> ArtistKind {
        match self {
            ArtistShape::Line { .. } => ArtistKind::Line,
            ArtistShape::Scatter { .. } => ArtistKind::Scatter,
            ArtistShape::Bar { .. } => ArtistKind::Bar,
            ArtistShape::Image { .. } => ArtistKind::Image,
            ArtistShape::Text => ArtistKind::Text,
        }
    }

    fn validate(&self) -> Result<()> {
        let empty = match *self {
            ArtistShape::Line { size } => size == 0,
            ArtistShape::Scatter { num_points } => num_points == 0,
            ArtistShape::Bar { num_bars } => num_bars == 0,
            ArtistShape::Image { rows, cols } => rows == 0 || cols == 0,
            ArtistShape::Text => false,
        };
        if empty {
            return Err(DevtkError::Configuration(format!(
                "{} artist needs a non-empty shape, got {:?}",
                self.kind(),
                self
            )));
        }
        let elements = match *self {
            ArtistShape::Line { size } => size,
            ArtistShape::Scatter { num_points } => num_points,
            ArtistShape::Bar { num_bars } => num_bars,
            ArtistShape::Image { rows, cols } => pixel_count(rows, cols)?,
            ArtistShape::Text => 0,
        };
        if elements > MAX_ELEMENTS {
            return Err(DevtkError::Configuration(format!(
                "{} artist shape {:?} is too large",
                self.kind(),
                self
            )));
        }
        Ok(())
    }

    /// Payload an artist of this shape starts with
    fn initial_data(&self) -> Result<ArtistData> {
        Ok(match *self {
            ArtistShape::Line { size } => ArtistData::Line(vec![f64::NAN; size]),
            ArtistShape::Scatter { num_points } => {
                ArtistData::Scatter(vec![[f64::NAN, f64::NAN]; num_points])
            }
            ArtistShape::Bar { num_bars } => ArtistData::Bar(vec![0.0; num_bars]),
            ArtistShape::Image { rows, cols } => {
                ArtistData::Image(ImageBuffer::filled(rows, cols, f64::NAN)?)
            }
            ArtistShape::Text => ArtistData::Text {
                position: [0.0, 0.0],
                text: String::new(),
            },
        })
    }
}

/// Display attributes of an artist
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArtistStyle {
    /// Legend label
    pub label: Option<String>,
    /// RGBA colour
    pub color: Option<[u8; 4]>,
    /// Line width or marker radius
    pub width: Option<f32>,
    /// Draw a colour bar next to an image
    pub colorbar: bool,
}

impl ArtistStyle {
    pub fn labeled(label: impl Into<String>) -> Self {
        Self {
            label: Some(label.into()),
            ..Default::default()
        }
    }
}

/// Everything needed to create an artist
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtistSpec {
    pub shape: ArtistShape,
    /// Payload applied right after creation
    pub initial: Option<DataPayload>,
    pub style: ArtistStyle,
}

impl ArtistSpec {
    pub fn new(shape: ArtistShape) -> Self {
        Self {
            shape,
            initial: None,
            style: ArtistStyle::default(),
        }
    }

    pub fn line(size: usize) -> Self {
        Self::new(ArtistShape::Line { size })
    }

    pub fn scatter(num_points: usize) -> Self {
        Self::new(ArtistShape::Scatter { num_points })
    }

    pub fn bar(num_bars: usize) -> Self {
        Self::new(ArtistShape::Bar { num_bars })
    }

    pub fn image(rows: usize, cols: usize) -> Self {
        Self::new(ArtistShape::Image { rows, cols })
    }

    pub fn text(position: [f64; 2], text: impl Into<String>) -> Self {
        Self::new(ArtistShape::Text).with_initial(DataPayload::Text {
            position: Some(position),
            text: text.into(),
        })
    }

    pub fn with_initial(mut self, payload: DataPayload) -> Self {
        self.initial = Some(payload);
        self
    }

    pub fn with_style(mut self, style: ArtistStyle) -> Self {
        self.style = style;
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.style.label = Some(label.into());
        self
    }

    pub fn with_colorbar(mut self, colorbar: bool) -> Self {
        self.style.colorbar = colorbar;
        self
    }
}

/// New values for an existing artist
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DataPayload {
    /// Replace every sample of a line (one value per sample)
    Line(Vec<f64>),
    /// Shift samples into a line, dropping the oldest ones
    LineAppend(Vec<f64>),
    /// Replace every point of a scatter cloud
    Scatter(Vec<[f64; 2]>),
    /// Shift points into a scatter cloud, dropping the oldest ones
    ScatterAppend(Vec<[f64; 2]>),
    /// Replace the height of every bar (one value per bar)
    Bar(Vec<f64>),
    /// Replace the image
    Image(ImageBuffer),
    /// Replace the text, optionally moving it
    Text {
        position: Option<[f64; 2]>,
        text: String,
    },
}

impl DataPayload {
    /// Artist type this payload is meant for
    pub fn kind(&self) -> ArtistKind {
        match self {
            DataPayload::Line(_) | DataPayload::LineAppend(_) => ArtistKind::Line,
            DataPayload::Scatter(_) | DataPayload::ScatterAppend(_) => ArtistKind::Scatter,
            DataPayload::Bar(_) => ArtistKind::Bar,
            DataPayload::Image(_) => ArtistKind::Image,
            DataPayload::Text { .. } => ArtistKind::Text,
        }
    }

    /// Whether applying this payload overwrites the whole artist state.
    ///
    /// A text update without a position keeps the previous position, so it
    /// only replaces the whole state when it carries one.
    pub fn replaces_all(&self) -> bool {
        match self {
            DataPayload::LineAppend(_) | DataPayload::ScatterAppend(_) => false,
            DataPayload::Text { position, .. } => position.is_some(),
            _ => true,
        }
    }

    fn describe(&self) -> String {
        match self {
            DataPayload::Line(v) => format!("{} line values", v.len()),
            DataPayload::LineAppend(v) => format!("{} appended line values", v.len()),
            DataPayload::Scatter(p) => format!("{} scatter points", p.len()),
            DataPayload::ScatterAppend(p) => format!("{} appended scatter points", p.len()),
            DataPayload::Bar(v) => format!("{} bar heights", v.len()),
            DataPayload::Image(img) => format!("{}x{} image", img.rows, img.cols),
            DataPayload::Text { .. } => "text".to_string(),
        }
    }
}

/// Current payload of an artist
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ArtistData {
    Line(Vec<f64>),
    Scatter(Vec<[f64; 2]>),
    Bar(Vec<f64>),
    Image(ImageBuffer),
    Text { position: [f64; 2], text: String },
}

/// Push `incoming` into a fixed-length window, keeping the newest values
fn shift_in<T: Copy>(window: &mut [T], incoming: &[T]) {
    let len = window.len();
    if incoming.len() >= len {
        window.copy_from_slice(&incoming[incoming.len() - len..]);
    } else {
        window.rotate_left(incoming.len());
        window[len - incoming.len()..].copy_from_slice(incoming);
    }
}

/// A drawable element attached to one axis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artist {
    pub id: ArtistId,
    pub axis: AxisId,
    pub shape: ArtistShape,
    pub data: ArtistData,
    pub style: ArtistStyle,
}

impl Artist {
    /// Create an artist from its spec, applying the initial payload if any
    pub(crate) fn from_spec(id: ArtistId, axis: AxisId, spec: ArtistSpec) -> Result<Self> {
        spec.shape.validate()?;
        let mut artist = Self {
            id,
            axis,
            shape: spec.shape,
            data: spec.shape.initial_data()?,
            style: spec.style,
        };
        if let Some(initial) = spec.initial {
            artist.apply(initial)?;
        }
        Ok(artist)
    }

    pub fn kind(&self) -> ArtistKind {
        self.shape.kind()
    }

    fn mismatch(&self, expected: impl Into<String>, actual: impl Into<String>) -> DevtkError {
        DevtkError::ShapeMismatch {
            artist: self.id.to_string(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Check a payload against this artist without applying it
    pub fn check(&self, payload: &DataPayload) -> Result<()> {
        if payload.kind() != self.kind() {
            return Err(self.mismatch(
                format!("a {} payload", self.kind()),
                format!("a {} payload", payload.kind()),
            ));
        }

        match (self.shape, payload) {
            (ArtistShape::Line { size }, DataPayload::Line(values)) if values.len() != size => {
                Err(self.mismatch(format!("{} line values", size), payload.describe()))
            }
            (ArtistShape::Scatter { num_points }, DataPayload::Scatter(points))
                if points.len() != num_points =>
            {
                Err(self.mismatch(format!("{} scatter points", num_points), payload.describe()))
            }
            (ArtistShape::Bar { num_bars }, DataPayload::Bar(heights))
                if heights.len() != num_bars =>
            {
                Err(self.mismatch(format!("{} bar heights", num_bars), payload.describe()))
            }
            (ArtistShape::Image { rows, cols }, DataPayload::Image(img))
                if img.rows != rows || img.cols != cols || !img.is_consistent() =>
            {
                Err(self.mismatch(
                    format!(
                        "{}x{} image with {} pixels",
                        rows,
                        cols,
                        rows.saturating_mul(cols)
                    ),
                    format!("{} with {} pixels", payload.describe(), img.pixels.len()),
                ))
            }
            _ => Ok(()),
        }
    }

    /// Apply a payload, leaving the artist unchanged on error
    pub fn apply(&mut self, payload: DataPayload) -> Result<()> {
        self.check(&payload)?;

        match (&mut self.data, payload) {
            (ArtistData::Line(current), DataPayload::Line(values)) => *current = values,
            (ArtistData::Line(current), DataPayload::LineAppend(values)) => {
                shift_in(current, &values)
            }
            (ArtistData::Scatter(current), DataPayload::Scatter(points)) => *current = points,
            (ArtistData::Scatter(current), DataPayload::ScatterAppend(points)) => {
                shift_in(current, &points)
            }
            (ArtistData::Bar(current), DataPayload::Bar(heights)) => *current = heights,
            (ArtistData::Image(current), DataPayload::Image(img)) => *current = img,
            (
                ArtistData::Text { position, text },
                DataPayload::Text {
                    position: new_position,
                    text: new_text,
                },
            ) => {
                if let Some(p) = new_position {
                    *position = p;
                }
                *text = new_text;
            }
            // check() guarantees the payload kind matches the data kind
            (_, payload) => {
                return Err(self.mismatch(format!("a {} payload", self.kind()), payload.describe()))
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artist(spec: ArtistSpec) -> Artist {
        Artist::from_spec(ArtistId(1), AxisId(2), spec).unwrap()
    }

    #[test]
    fn test_line_starts_with_nan_and_replaces() {
        let mut line = artist(ArtistSpec::line(3));
        match &line.data {
            ArtistData::Line(v) => assert!(v.iter().all(|x| x.is_nan())),
            other => panic!("unexpected data {:?}", other),
        }

        line.apply(DataPayload::Line(vec![1.0, 2.0, 3.0])).unwrap();
        assert_eq!(line.data, ArtistData::Line(vec![1.0, 2.0, 3.0]));
    }

    #[test]
    fn test_line_append_rolls_window() {
        let mut line = artist(ArtistSpec::line(4).with_initial(DataPayload::Line(vec![
            1.0, 2.0, 3.0, 4.0,
        ])));

        line.apply(DataPayload::LineAppend(vec![5.0])).unwrap();
        assert_eq!(line.data, ArtistData::Line(vec![2.0, 3.0, 4.0, 5.0]));

        line.apply(DataPayload::LineAppend(vec![6.0, 7.0, 8.0, 9.0, 10.0]))
            .unwrap();
        assert_eq!(line.data, ArtistData::Line(vec![7.0, 8.0, 9.0, 10.0]));
    }

    #[test]
    fn test_bar_update_requires_one_value_per_bar() {
        let mut bars = artist(ArtistSpec::bar(3));
        let err = bars.apply(DataPayload::Bar(vec![1.0, 2.0])).unwrap_err();
        assert!(matches!(err, DevtkError::ShapeMismatch { .. }));
        assert_eq!(bars.data, ArtistData::Bar(vec![0.0; 3]));
    }

    #[test]
    fn test_wrong_payload_kind_is_shape_mismatch() {
        let mut bars = artist(ArtistSpec::bar(2));
        let err = bars.apply(DataPayload::Line(vec![1.0, 2.0])).unwrap_err();
        assert!(err.to_string().contains("bar payload"));
    }

    #[test]
    fn test_oversized_shapes_are_configuration_errors() {
        for spec in [
            ArtistSpec::image(usize::MAX, 2),
            ArtistSpec::image(1 << 40, 1 << 40),
            ArtistSpec::line(usize::MAX),
            ArtistSpec::scatter(usize::MAX / 2),
        ] {
            let err = Artist::from_spec(ArtistId(1), AxisId(2), spec).unwrap_err();
            assert!(matches!(err, DevtkError::Configuration(_)), "{}", err);
        }
        assert!(ImageBuffer::filled(usize::MAX, 2, 0.0).is_err());
    }

    #[test]
    fn test_image_shape_checked() {
        let mut img = artist(ArtistSpec::image(2, 3));
        let err = img
            .apply(DataPayload::Image(ImageBuffer::filled(3, 2, 0.0).unwrap()))
            .unwrap_err();
        assert!(matches!(err, DevtkError::ShapeMismatch { .. }));

        let inconsistent = ImageBuffer {
            rows: 2,
            cols: 3,
            pixels: vec![0.0; 5],
        };
        assert!(img.apply(DataPayload::Image(inconsistent)).is_err());

        let good = ImageBuffer::from_rows(vec![vec![1.0, 2.0, 3.0], vec![4.0, 5.0, f64::NAN]])
            .unwrap();
        assert_eq!(good.finite_range(), Some((1.0, 5.0)));
        assert_eq!(good.get(1, 1), Some(5.0));
        img.apply(DataPayload::Image(good)).unwrap();
    }

    #[test]
    fn test_ragged_rows_rejected() {
        assert!(ImageBuffer::from_rows(vec![vec![1.0], vec![1.0, 2.0]]).is_err());
    }

    #[test]
    fn test_initial_payload_mismatch_fails_creation() {
        let spec = ArtistSpec::line(10).with_initial(DataPayload::Line(vec![0.0; 9]));
        let err = Artist::from_spec(ArtistId(1), AxisId(1), spec).unwrap_err();
        assert!(matches!(err, DevtkError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_empty_shape_is_configuration_error() {
        let err = Artist::from_spec(ArtistId(1), AxisId(1), ArtistSpec::scatter(0)).unwrap_err();
        assert!(matches!(err, DevtkError::Configuration(_)));
    }

    #[test]
    fn test_text_keeps_position_when_not_given() {
        let mut text = artist(ArtistSpec::text([1.0, 2.0], "hello"));
        text.apply(DataPayload::Text {
            position: None,
            text: "world".into(),
        })
        .unwrap();
        assert_eq!(
            text.data,
            ArtistData::Text {
                position: [1.0, 2.0],
                text: "world".into()
            }
        );
    }

    #[test]
    fn test_replaces_all() {
        assert!(DataPayload::Bar(vec![]).replaces_all());
        assert!(!DataPayload::LineAppend(vec![1.0]).replaces_all());
        assert!(!DataPayload::Text {
            position: None,
            text: String::new()
        }
        .replaces_all());
    }
}
