//! Figures, axes and their options.
//!
//! A figure is a grid of `rows x cols` cells. Each axis occupies a
//! rectangular block of cells and no two axes of a figure may share a cell.

use crate::error::{DevtkError, Result};
use crate::plot::id::{ArtistId, AxisId, FigureId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Grid of a figure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Layout {
    pub rows: usize,
    pub cols: usize,
}

impl Layout {
    pub fn new(rows: usize, cols: usize) -> Self {
        Self { rows, cols }
    }

    /// A figure holding one axis
    pub fn single() -> Self {
        Self::new(1, 1)
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.rows == 0 || self.cols == 0 {
            return Err(DevtkError::Configuration(format!(
                "Figure layout must have at least one row and one column, got {}x{}",
                self.rows, self.cols
            )));
        }
        Ok(())
    }
}

impl Default for Layout {
    fn default() -> Self {
        Self::single()
    }
}

/// Position of an axis on its figure's grid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Placement {
    pub row: usize,
    pub col: usize,
    pub row_span: usize,
    pub col_span: usize,
}

impl Placement {
    /// Single cell at (row, col)
    pub fn cell(row: usize, col: usize) -> Self {
        Self {
            row,
            col,
            row_span: 1,
            col_span: 1,
        }
    }

    pub fn spanning(row: usize, col: usize, row_span: usize, col_span: usize) -> Self {
        Self {
            row,
            col,
            row_span,
            col_span,
        }
    }

    /// One past the last (row, col) covered, `None` when the block
    /// is empty or its end is not representable
    fn end(&self) -> Option<(usize, usize)> {
        if self.row_span == 0 || self.col_span == 0 {
            return None;
        }
        Some((
            self.row.checked_add(self.row_span)?,
            self.col.checked_add(self.col_span)?,
        ))
    }

    /// Whether some grid could hold this placement
    pub(crate) fn validate(&self) -> Result<()> {
        if self.end().is_none() {
            return Err(DevtkError::Configuration(format!(
                "Invalid placement {:?}: spans must be non-zero and the block must end within usize",
                self
            )));
        }
        Ok(())
    }

    pub fn fits(&self, layout: &Layout) -> bool {
        match self.end() {
            Some((row_end, col_end)) => row_end <= layout.rows && col_end <= layout.cols,
            None => false,
        }
    }

    pub fn overlaps(&self, other: &Placement) -> bool {
        match (self.end(), other.end()) {
            (Some((row_end, col_end)), Some((other_row_end, other_col_end))) => {
                self.row < other_row_end
                    && other.row < row_end
                    && self.col < other_col_end
                    && other.col < col_end
            }
            _ => false,
        }
    }
}

/// Everything needed to create a figure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FigureSpec {
    pub layout: Layout,
    /// Size in points; the configured default when absent
    pub size: Option<[f32; 2]>,
    pub title: Option<String>,
}

impl FigureSpec {
    pub fn new(layout: Layout) -> Self {
        Self {
            layout,
            size: None,
            title: None,
        }
    }

    pub fn grid(rows: usize, cols: usize) -> Self {
        Self::new(Layout::new(rows, cols))
    }

    pub fn with_size(mut self, size: [f32; 2]) -> Self {
        self.size = Some(size);
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }
}

impl Default for FigureSpec {
    fn default() -> Self {
        Self::new(Layout::single())
    }
}

/// Tick positions with optional labels
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticks {
    pub positions: Vec<f64>,
    pub labels: Option<Vec<String>>,
}

impl Ticks {
    pub fn at(positions: Vec<f64>) -> Self {
        Self {
            positions,
            labels: None,
        }
    }

    pub fn labeled(positions: Vec<f64>, labels: Vec<String>) -> Self {
        Self {
            positions,
            labels: Some(labels),
        }
    }

    /// Label shown for a tick at `value`, if one was set
    pub fn label_for(&self, value: f64) -> Option<&str> {
        let labels = self.labels.as_ref()?;
        self.positions
            .iter()
            .position(|p| (p - value).abs() <= f64::EPSILON * p.abs().max(1.0))
            .and_then(|i| labels.get(i))
            .map(String::as_str)
    }

    fn validate(&self, axis: &str) -> Result<()> {
        if let Some(labels) = &self.labels {
            if labels.len() != self.positions.len() {
                return Err(DevtkError::Configuration(format!(
                    "{} tick labels: {} labels for {} ticks",
                    axis,
                    labels.len(),
                    self.positions.len()
                )));
            }
        }
        Ok(())
    }
}

/// Display options of an axis.
///
/// Only fields that are `Some` are applied by a modification, so a value
/// can be built incrementally and merged into the current options.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AxisOptions {
    pub title: Option<String>,
    pub x_label: Option<String>,
    pub y_label: Option<String>,
    pub x_limits: Option<(f64, f64)>,
    pub y_limits: Option<(f64, f64)>,
    pub x_ticks: Option<Ticks>,
    pub y_ticks: Option<Ticks>,
    pub legend: Option<bool>,
}

/// Keys accepted by [`AxisOptions::from_pairs`]
pub const AXIS_OPTION_KEYS: &[&str] = &[
    "title",
    "xlabel",
    "ylabel",
    "xlim",
    "ylim",
    "xticks",
    "yticks",
    "xticklabels",
    "yticklabels",
    "legend",
];

fn expect_string(key: &str, value: &Value) -> Result<String> {
    value.as_str().map(str::to_string).ok_or_else(|| {
        DevtkError::Configuration(format!("Axis option '{}' expects a string, got {}", key, value))
    })
}

fn expect_numbers(key: &str, value: &Value) -> Result<Vec<f64>> {
    value
        .as_array()
        .and_then(|items| items.iter().map(Value::as_f64).collect::<Option<Vec<_>>>())
        .ok_or_else(|| {
            DevtkError::Configuration(format!(
                "Axis option '{}' expects a list of numbers, got {}",
                key, value
            ))
        })
}

fn expect_strings(key: &str, value: &Value) -> Result<Vec<String>> {
    value
        .as_array()
        .and_then(|items| {
            items
                .iter()
                .map(|v| v.as_str().map(str::to_string))
                .collect::<Option<Vec<_>>>()
        })
        .ok_or_else(|| {
            DevtkError::Configuration(format!(
                "Axis option '{}' expects a list of strings, got {}",
                key, value
            ))
        })
}

fn expect_limits(key: &str, value: &Value) -> Result<(f64, f64)> {
    match expect_numbers(key, value)?.as_slice() {
        [lo, hi] => Ok((*lo, *hi)),
        other => Err(DevtkError::Configuration(format!(
            "Axis option '{}' expects [min, max], got {} values",
            key,
            other.len()
        ))),
    }
}

fn check_limits(axis: &str, limits: Option<(f64, f64)>) -> Result<()> {
    match limits {
        Some((lo, hi)) if !(lo.is_finite() && hi.is_finite() && lo < hi) => {
            Err(DevtkError::Configuration(format!(
                "{} limits must be finite with min < max, got ({}, {})",
                axis, lo, hi
            )))
        }
        _ => Ok(()),
    }
}

impl AxisOptions {
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_labels(mut self, x: impl Into<String>, y: impl Into<String>) -> Self {
        self.x_label = Some(x.into());
        self.y_label = Some(y.into());
        self
    }

    pub fn with_x_limits(mut self, min: f64, max: f64) -> Self {
        self.x_limits = Some((min, max));
        self
    }

    pub fn with_y_limits(mut self, min: f64, max: f64) -> Self {
        self.y_limits = Some((min, max));
        self
    }

    pub fn with_x_ticks(mut self, ticks: Ticks) -> Self {
        self.x_ticks = Some(ticks);
        self
    }

    pub fn with_y_ticks(mut self, ticks: Ticks) -> Self {
        self.y_ticks = Some(ticks);
        self
    }

    pub fn with_legend(mut self, legend: bool) -> Self {
        self.legend = Some(legend);
        self
    }

    /// Parse string-keyed options.
    ///
    /// Every key must be one of [`AXIS_OPTION_KEYS`]; the whole set is
    /// rejected on the first unknown key or badly typed value. Tick labels
    /// need tick positions in the same call.
    pub fn from_pairs<K, I>(pairs: I) -> Result<Self>
    where
        K: AsRef<str>,
        I: IntoIterator<Item = (K, Value)>,
    {
        let mut options = AxisOptions::default();
        let mut x_tick_labels = None;
        let mut y_tick_labels = None;

        for (key, value) in pairs {
            let key = key.as_ref();
            match key {
                "title" => options.title = Some(expect_string(key, &value)?),
                "xlabel" => options.x_label = Some(expect_string(key, &value)?),
                "ylabel" => options.y_label = Some(expect_string(key, &value)?),
                "xlim" => options.x_limits = Some(expect_limits(key, &value)?),
                "ylim" => options.y_limits = Some(expect_limits(key, &value)?),
                "xticks" => options.x_ticks = Some(Ticks::at(expect_numbers(key, &value)?)),
                "yticks" => options.y_ticks = Some(Ticks::at(expect_numbers(key, &value)?)),
                "xticklabels" => x_tick_labels = Some(expect_strings(key, &value)?),
                "yticklabels" => y_tick_labels = Some(expect_strings(key, &value)?),
                "legend" => {
                    options.legend = Some(value.as_bool().ok_or_else(|| {
                        DevtkError::Configuration(format!(
                            "Axis option 'legend' expects a boolean, got {}",
                            value
                        ))
                    })?)
                }
                unknown => {
                    return Err(DevtkError::Configuration(format!(
                        "Unknown axis option '{}' (expected one of: {})",
                        unknown,
                        AXIS_OPTION_KEYS.join(", ")
                    )))
                }
            }
        }

        for (name, labels, ticks) in [
            ("x", x_tick_labels, &mut options.x_ticks),
            ("y", y_tick_labels, &mut options.y_ticks),
        ] {
            if let Some(labels) = labels {
                match ticks {
                    Some(t) => t.labels = Some(labels),
                    None => {
                        return Err(DevtkError::Configuration(format!(
                            "'{}ticklabels' given without '{}ticks'",
                            name, name
                        )))
                    }
                }
            }
        }

        options.validate()?;
        Ok(options)
    }

    /// Check the values without applying them
    pub fn validate(&self) -> Result<()> {
        check_limits("x", self.x_limits)?;
        check_limits("y", self.y_limits)?;
        if let Some(t) = &self.x_ticks {
            t.validate("x")?;
        }
        if let Some(t) = &self.y_ticks {
            t.validate("y")?;
        }
        Ok(())
    }

    /// Overwrite every field that is set in `other`
    pub fn merge(&mut self, other: AxisOptions) {
        fn set<T>(dst: &mut Option<T>, src: Option<T>) {
            if src.is_some() {
                *dst = src;
            }
        }
        set(&mut self.title, other.title);
        set(&mut self.x_label, other.x_label);
        set(&mut self.y_label, other.y_label);
        set(&mut self.x_limits, other.x_limits);
        set(&mut self.y_limits, other.y_limits);
        set(&mut self.x_ticks, other.x_ticks);
        set(&mut self.y_ticks, other.y_ticks);
        set(&mut self.legend, other.legend);
    }

    pub fn legend_enabled(&self) -> bool {
        self.legend.unwrap_or(false)
    }
}

/// A canvas with a grid of axes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Figure {
    pub id: FigureId,
    pub layout: Layout,
    pub size: Option<[f32; 2]>,
    pub title: Option<String>,
    /// Axes in creation order
    pub axes: Vec<AxisId>,
    /// Whether the figure's window should be on screen
    pub visible: bool,
}

/// A coordinate region of a figure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Axis {
    pub id: AxisId,
    pub figure: FigureId,
    pub placement: Placement,
    pub options: AxisOptions,
    /// Artists in creation order
    pub artists: Vec<ArtistId>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_placement_bounds_and_overlap() {
        let layout = Layout::new(2, 2);
        assert!(Placement::cell(1, 1).fits(&layout));
        assert!(!Placement::cell(2, 0).fits(&layout));
        assert!(!Placement::spanning(0, 1, 1, 2).fits(&layout));
        assert!(Placement::spanning(0, 0, 2, 1).overlaps(&Placement::cell(1, 0)));
        assert!(!Placement::spanning(0, 0, 2, 1).overlaps(&Placement::cell(0, 1)));
    }

    #[test]
    fn test_overflowing_placement_never_fits() {
        let layout = Layout::new(usize::MAX, usize::MAX);
        let huge = Placement::spanning(usize::MAX, 0, 1, 1);
        assert!(!huge.fits(&layout));
        assert!(!huge.overlaps(&Placement::cell(0, 0)));
        assert!(!Placement::cell(0, 0).overlaps(&huge));
        assert!(!Placement::spanning(0, usize::MAX, 1, usize::MAX).fits(&layout));
        assert!(!Placement::spanning(0, 0, 0, 1).fits(&layout));

        assert!(huge.validate().is_err());
        assert!(Placement::spanning(0, 0, 1, 0).validate().is_err());
        assert!(Placement::spanning(3, 3, 2, 2).validate().is_ok());
    }

    #[test]
    fn test_from_pairs() {
        let options = AxisOptions::from_pairs([
            ("title", json!("Signal")),
            ("ylim", json!([-1.0, 1.0])),
            ("xticks", json!([0, 5, 10])),
            ("xticklabels", json!(["a", "b", "c"])),
            ("legend", json!(true)),
        ])
        .unwrap();

        assert_eq!(options.title.as_deref(), Some("Signal"));
        assert_eq!(options.y_limits, Some((-1.0, 1.0)));
        assert_eq!(options.x_ticks.as_ref().unwrap().label_for(5.0), Some("b"));
        assert!(options.legend_enabled());
    }

    #[test]
    fn test_from_pairs_rejects_unknown_key() {
        let err = AxisOptions::from_pairs([("title", json!("ok")), ("colour", json!("red"))])
            .unwrap_err();
        assert!(err.to_string().contains("colour"));
    }

    #[test]
    fn test_from_pairs_rejects_bad_values() {
        assert!(AxisOptions::from_pairs([("xlim", json!([1.0]))]).is_err());
        assert!(AxisOptions::from_pairs([("xlim", json!([2.0, 1.0]))]).is_err());
        assert!(AxisOptions::from_pairs([("legend", json!("yes"))]).is_err());
        assert!(AxisOptions::from_pairs([("yticklabels", json!(["a"]))]).is_err());
        assert!(AxisOptions::from_pairs([
            ("yticks", json!([1.0, 2.0])),
            ("yticklabels", json!(["a"]))
        ])
        .is_err());
    }

    #[test]
    fn test_merge_keeps_unset_fields() {
        let mut current = AxisOptions::default()
            .with_title("before")
            .with_legend(true);
        current.merge(AxisOptions::default().with_labels("t", "v"));
        assert_eq!(current.title.as_deref(), Some("before"));
        assert_eq!(current.x_label.as_deref(), Some("t"));
        assert!(current.legend_enabled());
    }
}
