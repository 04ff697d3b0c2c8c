//! The canonical drawing state.
//!
//! [`PlotSurface`] owns every figure, axis and artist. It is a plain data
//! structure with no threading of its own: the plot manager keeps one on the
//! rendering thread and mutates it only from there, renderers read it, and
//! tests drive it directly.
//!
//! Every mutating operation either succeeds completely or returns an error
//! and leaves the surface unchanged.

use crate::error::{DevtkError, ObjectKind, Result};
use crate::plot::artist::{Artist, ArtistShape, ArtistSpec, DataPayload, ImageBuffer};
use crate::plot::command::{DataUpdate, PlotCommand};
use crate::plot::id::{ArtistId, AxisId, FigureId};
use crate::plot::layout::{Axis, AxisOptions, Figure, FigureSpec, Layout, Placement};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Identifiers created by [`PlotSurface::add_figure_and_artists`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FigureHandles {
    pub figure: FigureId,
    /// One entry per requested axis, with its artists in request order
    pub axes: Vec<(AxisId, Vec<ArtistId>)>,
}

/// Figures, axes and artists keyed by identifier
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlotSurface {
    figures: BTreeMap<FigureId, Figure>,
    axes: BTreeMap<AxisId, Axis>,
    artists: BTreeMap<ArtistId, Artist>,
    /// Wider than the identifiers so `u32::MAX + 1` marks exhaustion
    next_id: u64,
}

impl PlotSurface {
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate(&mut self) -> Result<u32> {
        self.next_id = self.next_id.max(1);
        let id = u32::try_from(self.next_id).map_err(|_| {
            DevtkError::Configuration("Surface identifiers are exhausted".to_string())
        })?;
        self.next_id += 1;
        Ok(id)
    }

    /// Keep locally allocated identifiers clear of externally supplied ones
    fn observe(&mut self, raw: u32) {
        self.next_id = self.next_id.max(u64::from(raw) + 1);
    }

    // ------------------------------------------------------------------
    // Figures and axes
    // ------------------------------------------------------------------

    /// Create a figure with the given grid and size
    pub fn create_figure(&mut self, layout: Layout, size: Option<[f32; 2]>) -> Result<FigureId> {
        let spec = FigureSpec {
            layout,
            size,
            title: None,
        };
        self.create_figure_from(spec)
    }

    pub fn create_figure_from(&mut self, spec: FigureSpec) -> Result<FigureId> {
        spec.layout.validate()?;
        let id = FigureId(self.allocate()?);
        self.insert_figure(id, spec)?;
        Ok(id)
    }

    /// Create a figure under a caller-chosen identifier
    pub fn insert_figure(&mut self, id: FigureId, spec: FigureSpec) -> Result<()> {
        if self.figures.contains_key(&id) {
            return Err(DevtkError::Configuration(format!("{} already exists", id)));
        }
        spec.layout.validate()?;
        self.observe(id.raw());
        self.figures.insert(
            id,
            Figure {
                id,
                layout: spec.layout,
                size: spec.size,
                title: spec.title,
                axes: Vec::new(),
                visible: true,
            },
        );
        tracing::debug!("Created {} with {}x{} grid", id, spec.layout.rows, spec.layout.cols);
        Ok(())
    }

    /// Create an axis occupying `placement` on `figure`
    pub fn create_axis(&mut self, figure: FigureId, placement: Placement) -> Result<AxisId> {
        self.check_placement(figure, placement)?;
        let id = AxisId(self.allocate()?);
        self.insert_axis(id, figure, placement)?;
        Ok(id)
    }

    fn check_placement(&self, figure: FigureId, placement: Placement) -> Result<()> {
        let fig = self
            .figures
            .get(&figure)
            .ok_or_else(|| DevtkError::not_found(ObjectKind::Figure, figure))?;

        if !placement.fits(&fig.layout) {
            return Err(DevtkError::Configuration(format!(
                "Axis at {:?} does not fit the {}x{} grid of {}",
                placement, fig.layout.rows, fig.layout.cols, figure
            )));
        }

        if let Some(occupied) = fig
            .axes
            .iter()
            .filter_map(|a| self.axes.get(a))
            .find(|a| a.placement.overlaps(&placement))
        {
            return Err(DevtkError::Configuration(format!(
                "Axis at {:?} overlaps {} on {}",
                placement, occupied.id, figure
            )));
        }
        Ok(())
    }

    /// Create an axis under a caller-chosen identifier
    pub fn insert_axis(&mut self, id: AxisId, figure: FigureId, placement: Placement) -> Result<()> {
        if self.axes.contains_key(&id) {
            return Err(DevtkError::Configuration(format!("{} already exists", id)));
        }
        self.check_placement(figure, placement)?;
        self.observe(id.raw());

        if let Some(fig) = self.figures.get_mut(&figure) {
            fig.axes.push(id);
        }
        self.axes.insert(
            id,
            Axis {
                id,
                figure,
                placement,
                options: AxisOptions::default(),
                artists: Vec::new(),
            },
        );
        tracing::debug!("Created {} on {} at {:?}", id, figure, placement);
        Ok(())
    }

    /// Apply typed axis options
    pub fn modify_axis(&mut self, axis: AxisId, options: AxisOptions) -> Result<()> {
        options.validate()?;
        let ax = self
            .axes
            .get_mut(&axis)
            .ok_or_else(|| DevtkError::not_found(ObjectKind::Axis, axis))?;
        ax.options.merge(options);
        Ok(())
    }

    /// Apply string-keyed axis options; nothing is applied if any key is unknown
    pub fn modify_axis_with<K, I>(&mut self, axis: AxisId, pairs: I) -> Result<()>
    where
        K: AsRef<str>,
        I: IntoIterator<Item = (K, Value)>,
    {
        let options = AxisOptions::from_pairs(pairs)?;
        self.modify_axis(axis, options)
    }

    // ------------------------------------------------------------------
    // Artists
    // ------------------------------------------------------------------

    /// Create an artist on `axis` from a full spec
    pub fn create_artist(&mut self, axis: AxisId, spec: ArtistSpec) -> Result<ArtistId> {
        if !self.axes.contains_key(&axis) {
            return Err(DevtkError::not_found(ObjectKind::Axis, axis));
        }
        // Validate before spending an identifier
        Artist::from_spec(ArtistId(0), axis, spec.clone())?;
        let id = ArtistId(self.allocate()?);
        self.insert_artist(id, axis, spec)?;
        Ok(id)
    }

    /// Create an artist under a caller-chosen identifier
    pub fn insert_artist(&mut self, id: ArtistId, axis: AxisId, spec: ArtistSpec) -> Result<()> {
        if self.artists.contains_key(&id) {
            return Err(DevtkError::Configuration(format!("{} already exists", id)));
        }
        let ax = self
            .axes
            .get_mut(&axis)
            .ok_or_else(|| DevtkError::not_found(ObjectKind::Axis, axis))?;
        let artist = Artist::from_spec(id, axis, spec)?;
        tracing::debug!("Created {} {} on {}", artist.kind(), id, axis);

        ax.artists.push(id);
        self.observe(id.raw());
        self.artists.insert(id, artist);
        Ok(())
    }

    /// Line through `size` samples, initially all NaN
    pub fn create_line_plot(&mut self, axis: AxisId, size: usize) -> Result<ArtistId> {
        self.create_artist(axis, ArtistSpec::line(size))
    }

    /// Cloud of `num_points` points, initially all NaN
    pub fn create_scatter_plot(&mut self, axis: AxisId, num_points: usize) -> Result<ArtistId> {
        self.create_artist(axis, ArtistSpec::scatter(num_points))
    }

    /// `num_bars` bars, initially zero height
    pub fn create_bar_plot(&mut self, axis: AxisId, num_bars: usize) -> Result<ArtistId> {
        self.create_artist(axis, ArtistSpec::bar(num_bars))
    }

    /// Image of `shape = (rows, cols)` pixels
    pub fn create_image_plot(
        &mut self,
        axis: AxisId,
        shape: (usize, usize),
        colorbar: bool,
    ) -> Result<ArtistId> {
        self.create_artist(
            axis,
            ArtistSpec::image(shape.0, shape.1).with_colorbar(colorbar),
        )
    }

    pub fn create_text(
        &mut self,
        axis: AxisId,
        position: [f64; 2],
        text: impl Into<String>,
    ) -> Result<ArtistId> {
        self.create_artist(axis, ArtistSpec::text(position, text))
    }

    /// Composite: create an artist with its initial payload
    pub fn add_artist(&mut self, axis: AxisId, spec: ArtistSpec) -> Result<ArtistId> {
        self.create_artist(axis, spec)
    }

    /// Composite: create a figure, its axes and their artists.
    ///
    /// Stops at the first failure. Objects created before it are kept.
    pub fn add_figure_and_artists(
        &mut self,
        figure: FigureSpec,
        axes: Vec<(Placement, Vec<ArtistSpec>)>,
    ) -> Result<FigureHandles> {
        let figure_id = self.create_figure_from(figure)?;
        let mut handles = FigureHandles {
            figure: figure_id,
            axes: Vec::with_capacity(axes.len()),
        };
        for (placement, artists) in axes {
            let axis_id = self.create_axis(figure_id, placement)?;
            let mut ids = Vec::with_capacity(artists.len());
            for spec in artists {
                ids.push(self.create_artist(axis_id, spec)?);
            }
            handles.axes.push((axis_id, ids));
        }
        Ok(handles)
    }

    // ------------------------------------------------------------------
    // Data updates
    // ------------------------------------------------------------------

    /// Check an update without applying it
    pub fn check(&self, artist: ArtistId, payload: &DataPayload) -> Result<()> {
        self.artists
            .get(&artist)
            .ok_or_else(|| DevtkError::not_found(ObjectKind::Artist, artist))?
            .check(payload)
    }

    /// Apply a payload to one artist
    pub fn update(&mut self, artist: ArtistId, payload: DataPayload) -> Result<()> {
        self.artists
            .get_mut(&artist)
            .ok_or_else(|| DevtkError::not_found(ObjectKind::Artist, artist))?
            .apply(payload)
    }

    pub fn apply_update(&mut self, update: DataUpdate) -> Result<()> {
        self.update(update.artist, update.payload)
    }

    /// Replace every sample of a line
    pub fn update_line_plot(&mut self, artist: ArtistId, values: Vec<f64>) -> Result<()> {
        self.update(artist, DataPayload::Line(values))
    }

    /// Shift new samples into a line
    pub fn append_line_plot(&mut self, artist: ArtistId, values: Vec<f64>) -> Result<()> {
        self.update(artist, DataPayload::LineAppend(values))
    }

    pub fn update_scatter_plot(&mut self, artist: ArtistId, points: Vec<[f64; 2]>) -> Result<()> {
        self.update(artist, DataPayload::Scatter(points))
    }

    pub fn append_scatter_plot(&mut self, artist: ArtistId, points: Vec<[f64; 2]>) -> Result<()> {
        self.update(artist, DataPayload::ScatterAppend(points))
    }

    pub fn update_bar_plot(&mut self, artist: ArtistId, heights: Vec<f64>) -> Result<()> {
        self.update(artist, DataPayload::Bar(heights))
    }

    pub fn update_image_plot(&mut self, artist: ArtistId, image: ImageBuffer) -> Result<()> {
        self.update(artist, DataPayload::Image(image))
    }

    pub fn update_text(
        &mut self,
        artist: ArtistId,
        text: impl Into<String>,
        position: Option<[f64; 2]>,
    ) -> Result<()> {
        self.update(
            artist,
            DataPayload::Text {
                position,
                text: text.into(),
            },
        )
    }

    // ------------------------------------------------------------------
    // Commands and visibility
    // ------------------------------------------------------------------

    /// Apply one queued structural command
    pub fn apply(&mut self, command: PlotCommand) -> Result<()> {
        match command {
            PlotCommand::CreateFigure { id, spec } => self.insert_figure(id, spec),
            PlotCommand::CreateAxis {
                id,
                figure,
                placement,
            } => self.insert_axis(id, figure, placement),
            PlotCommand::ModifyAxis { axis, options } => self.modify_axis(axis, options),
            PlotCommand::CreateArtist { id, axis, spec } => self.insert_artist(id, axis, spec),
            PlotCommand::Show => {
                self.set_visible(true);
                Ok(())
            }
            PlotCommand::Close => {
                self.set_visible(false);
                Ok(())
            }
        }
    }

    pub fn set_visible(&mut self, visible: bool) {
        for figure in self.figures.values_mut() {
            figure.visible = visible;
        }
    }

    pub fn set_figure_visible(&mut self, figure: FigureId, visible: bool) -> Result<()> {
        self.figures
            .get_mut(&figure)
            .ok_or_else(|| DevtkError::not_found(ObjectKind::Figure, figure))?
            .visible = visible;
        Ok(())
    }

    pub fn any_visible(&self) -> bool {
        self.figures.values().any(|f| f.visible)
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn figure(&self, id: FigureId) -> Option<&Figure> {
        self.figures.get(&id)
    }

    pub fn axis(&self, id: AxisId) -> Option<&Axis> {
        self.axes.get(&id)
    }

    pub fn artist(&self, id: ArtistId) -> Option<&Artist> {
        self.artists.get(&id)
    }

    /// Figures in identifier order
    pub fn figures(&self) -> impl Iterator<Item = &Figure> {
        self.figures.values()
    }

    /// Axes of one figure in creation order
    pub fn axes_of(&self, figure: FigureId) -> impl Iterator<Item = &Axis> {
        self.figures
            .get(&figure)
            .into_iter()
            .flat_map(|f| f.axes.iter())
            .filter_map(|id| self.axes.get(id))
    }

    /// Artists of one axis in creation order
    pub fn artists_of(&self, axis: AxisId) -> impl Iterator<Item = &Artist> {
        self.axes
            .get(&axis)
            .into_iter()
            .flat_map(|a| a.artists.iter())
            .filter_map(|id| self.artists.get(id))
    }

    pub fn figure_count(&self) -> usize {
        self.figures.len()
    }

    pub fn axis_count(&self) -> usize {
        self.axes.len()
    }

    pub fn artist_count(&self) -> usize {
        self.artists.len()
    }

    pub fn is_empty(&self) -> bool {
        self.figures.is_empty()
    }

    /// Shape an artist was created with
    pub fn artist_shape(&self, id: ArtistId) -> Option<ArtistShape> {
        self.artists.get(&id).map(|a| a.shape)
    }
}
