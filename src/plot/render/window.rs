//! Native window renderer.
//!
//! Runs an eframe event loop on the rendering thread. The first figure is
//! drawn in the root viewport; every other figure gets an immediate
//! viewport of its own. Axes are laid out on their figure's grid and each
//! axis is one `egui_plot::Plot`.
//!
//! Closing the root window ends the loop. Closing a secondary window only
//! hides that figure.

use crate::config::PlotConfig;
use crate::error::DevtkError;
use crate::plot::artist::{Artist, ArtistData, ImageBuffer};
use crate::plot::id::{ArtistId, FigureId};
use crate::plot::layout::{Axis, Figure, Ticks};
use crate::plot::render::{colormap, finite_points, headless, line_points, loop_interval};
use crate::plot::surface::PlotSurface;
use crate::plot::worker::{ManagerState, PlotShared, PlotWorker};
use egui::{Color32, ColorImage, RichText, TextureHandle, TextureOptions, UiBuilder, Vec2};
use egui_plot::{
    Bar, BarChart, GridInput, GridMark, Legend, Line, Plot, PlotBounds, PlotImage, PlotPoint,
    PlotPoints, PlotUi, Points, Text,
};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

/// Height reserved for an axis title
const TITLE_HEIGHT: f32 = 18.0;

/// Number of steps in a colour bar
const COLORBAR_STEPS: usize = 64;

type WorkerSlot = Rc<RefCell<Option<PlotWorker>>>;

/// Textures owned by one artist
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum TextureKey {
    Image(ArtistId),
    Colorbar(ArtistId),
}

impl TextureKey {
    fn artist(&self) -> ArtistId {
        match *self {
            TextureKey::Image(id) | TextureKey::Colorbar(id) => id,
        }
    }
}

type Textures = HashMap<TextureKey, TextureHandle>;

pub fn run(config: &PlotConfig, worker: PlotWorker) -> PlotSurface {
    let shared = worker.shared_arc();
    let slot: WorkerSlot = Rc::new(RefCell::new(Some(worker)));
    let app_slot = slot.clone();
    let app_config = config.clone();

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size(config.default_figure_size)
            .with_title(config.window_title.clone()),
        event_loop_builder: Some(Box::new(|builder| {
            allow_any_thread(builder);
        })),
        ..Default::default()
    };

    tracing::info!("Window plot loop started");
    let result = eframe::run_native(
        &config.window_title,
        options,
        Box::new(move |cc| {
            let ctx = cc.egui_ctx.clone();
            shared.set_waker(Box::new(move || ctx.request_repaint()));
            shared.set_shown(true);
            Ok(Box::new(PlotApp::new(app_slot, shared, app_config)))
        }),
    );

    let Some(mut worker) = slot.borrow_mut().take() else {
        tracing::error!("Plot worker was lost by the window renderer");
        return PlotSurface::new();
    };

    match result {
        Ok(()) => {
            worker.final_drain();
            tracing::info!("Window plot loop stopped");
            worker.into_surface()
        }
        Err(e) => {
            worker.report(DevtkError::Configuration(format!(
                "Window renderer unavailable, continuing headless: {}",
                e
            )));
            worker.shared().set_shown(false);
            worker.shared().clear_waker();
            headless::run(config, worker)
        }
    }
}

/// Let winit create its event loop off the main thread
#[allow(unused_variables)]
fn allow_any_thread<T>(builder: &mut winit::event_loop::EventLoopBuilder<T>) {
    #[cfg(all(unix, not(target_os = "macos")))]
    {
        use winit::platform::wayland::EventLoopBuilderExtWayland;
        use winit::platform::x11::EventLoopBuilderExtX11;
        EventLoopBuilderExtX11::with_any_thread(builder, true);
        EventLoopBuilderExtWayland::with_any_thread(builder, true);
    }
    #[cfg(windows)]
    {
        use winit::platform::windows::EventLoopBuilderExtWindows;
        builder.with_any_thread(true);
    }
}

struct PlotApp {
    worker: WorkerSlot,
    shared: Arc<PlotShared>,
    config: PlotConfig,
    repaint_after: Duration,
    /// Figure currently drawn in the root viewport
    root_figure: Option<FigureId>,
    root_visible: bool,
    closing: bool,
    textures: Textures,
}

impl PlotApp {
    fn new(worker: WorkerSlot, shared: Arc<PlotShared>, config: PlotConfig) -> Self {
        Self {
            worker,
            shared,
            repaint_after: loop_interval(&config),
            config,
            root_figure: None,
            root_visible: true,
            closing: false,
            textures: HashMap::new(),
        }
    }

    fn figure_title(&self, figure: &Figure) -> String {
        match &figure.title {
            Some(title) => format!("{} - {}", self.config.window_title, title),
            None => format!("{} - Figure {}", self.config.window_title, figure.id.raw()),
        }
    }

    fn figure_size(&self, figure: &Figure) -> [f32; 2] {
        figure.size.unwrap_or(self.config.default_figure_size)
    }

    /// Keep the root viewport in sync with the first figure
    fn sync_root(&mut self, ctx: &egui::Context, surface: &PlotSurface) {
        let first = surface.figures().next();

        if first.map(|f| f.id) != self.root_figure {
            self.root_figure = first.map(|f| f.id);
            if let Some(fig) = first {
                ctx.send_viewport_cmd(egui::ViewportCommand::Title(self.figure_title(fig)));
                ctx.send_viewport_cmd(egui::ViewportCommand::InnerSize(Vec2::from(
                    self.figure_size(fig),
                )));
            }
        }

        let visible = first.map_or(true, |f| f.visible);
        if visible != self.root_visible {
            self.root_visible = visible;
            ctx.send_viewport_cmd(egui::ViewportCommand::Visible(visible));
        }
    }

    fn draw_secondary(
        &mut self,
        ctx: &egui::Context,
        surface: &PlotSurface,
        closed: &mut Vec<FigureId>,
    ) {
        for figure in surface.figures().skip(1).filter(|f| f.visible) {
            let viewport_id = egui::ViewportId::from_hash_of(("devtk_figure", figure.id.raw()));
            let builder = egui::ViewportBuilder::default()
                .with_title(self.figure_title(figure))
                .with_inner_size(self.figure_size(figure));

            ctx.show_viewport_immediate(viewport_id, builder, |ctx, _class| {
                egui::CentralPanel::default().show(ctx, |ui| {
                    draw_figure(ui, surface, figure, &mut self.textures);
                });
                if ctx.input(|i| i.viewport().close_requested()) {
                    closed.push(figure.id);
                }
            });
        }
    }
}

impl eframe::App for PlotApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        let slot = self.worker.clone();
        let Ok(mut guard) = slot.try_borrow_mut() else {
            return;
        };
        let Some(worker) = guard.as_mut() else {
            return;
        };

        if !self.closing && self.shared.stop_requested() {
            self.closing = true;
            ctx.send_viewport_cmd(egui::ViewportCommand::Close);
        }

        let outcome = worker.tick();
        if outcome.disconnected && !self.closing {
            tracing::info!("All plot handles dropped, closing windows");
            self.closing = true;
            ctx.send_viewport_cmd(egui::ViewportCommand::Close);
        }

        if !self.closing && ctx.input(|i| i.viewport().close_requested()) {
            tracing::info!("Plot window closed by user");
            self.closing = true;
            self.shared.set_shown(false);
            self.shared
                .transition(ManagerState::Running, ManagerState::Stopping);
        }

        let mut closed = Vec::new();
        {
            let surface = worker.surface();
            self.sync_root(ctx, surface);

            egui::CentralPanel::default().show(ctx, |ui| match surface.figures().next() {
                Some(figure) => draw_figure(ui, surface, figure, &mut self.textures),
                None => {
                    ui.centered_and_justified(|ui| {
                        ui.label(RichText::new("No figures").color(Color32::GRAY));
                    });
                }
            });

            self.draw_secondary(ctx, surface, &mut closed);

            self.textures.retain(|key, _| surface.artist(key.artist()).is_some());
        }

        for figure in closed {
            tracing::debug!("{} window closed, hiding it", figure);
            let hidden = worker.surface_mut().set_figure_visible(figure, false);
            worker.report_result(hidden);
        }

        ctx.request_repaint_after(self.repaint_after);
    }

    fn on_exit(&mut self, _gl: Option<&eframe::glow::Context>) {
        self.shared.clear_waker();
        self.shared.set_shown(false);
    }
}

fn draw_figure(
    ui: &mut egui::Ui,
    surface: &PlotSurface,
    figure: &Figure,
    textures: &mut Textures,
) {
    let area = ui.available_rect_before_wrap();
    let cell = Vec2::new(
        area.width() / figure.layout.cols as f32,
        area.height() / figure.layout.rows as f32,
    );

    for axis in surface.axes_of(figure.id) {
        let p = axis.placement;
        let min = area.min + Vec2::new(p.col as f32 * cell.x, p.row as f32 * cell.y);
        let size = Vec2::new(p.col_span as f32 * cell.x, p.row_span as f32 * cell.y);
        let rect = egui::Rect::from_min_size(min, size).shrink(4.0);

        ui.scope_builder(UiBuilder::new().max_rect(rect), |ui| {
            draw_axis(ui, surface, axis, rect.size(), textures);
        });
    }
}

fn tick_step(positions: &[f64]) -> f64 {
    positions
        .windows(2)
        .map(|w| (w[1] - w[0]).abs())
        .filter(|d| *d > 0.0)
        .fold(f64::INFINITY, f64::min)
        .min(1.0e12)
        .max(f64::MIN_POSITIVE)
}

fn tick_spacer(ticks: &Ticks) -> impl Fn(GridInput) -> Vec<GridMark> + 'static {
    let positions = ticks.positions.clone();
    let step = if positions.len() > 1 {
        tick_step(&positions)
    } else {
        1.0
    };
    move |_input| {
        positions
            .iter()
            .map(|&value| GridMark {
                value,
                step_size: step,
            })
            .collect()
    }
}

fn tick_formatter(
    ticks: &Ticks,
) -> impl Fn(GridMark, &std::ops::RangeInclusive<f64>) -> String + 'static {
    let ticks = ticks.clone();
    move |mark, _range| {
        ticks
            .label_for(mark.value)
            .map(str::to_string)
            .unwrap_or_else(|| format!("{}", mark.value))
    }
}

fn draw_axis(
    ui: &mut egui::Ui,
    surface: &PlotSurface,
    axis: &Axis,
    size: Vec2,
    textures: &mut Textures,
) {
    let options = &axis.options;
    let mut height = size.y;
    if let Some(title) = &options.title {
        ui.label(RichText::new(title).strong());
        height -= TITLE_HEIGHT;
    }

    let mut plot = Plot::new(("devtk_axis", axis.id.raw()))
        .width(size.x)
        .height(height.max(1.0));

    if let Some(label) = &options.x_label {
        plot = plot.x_axis_label(label.clone());
    }
    if let Some(label) = &options.y_label {
        plot = plot.y_axis_label(label.clone());
    }
    if options.legend_enabled() {
        plot = plot.legend(Legend::default());
    }
    if let Some(ticks) = &options.x_ticks {
        plot = plot
            .x_grid_spacer(tick_spacer(ticks))
            .x_axis_formatter(tick_formatter(ticks));
    }
    if let Some(ticks) = &options.y_ticks {
        plot = plot
            .y_grid_spacer(tick_spacer(ticks))
            .y_axis_formatter(tick_formatter(ticks));
    }

    let x_limits = options.x_limits;
    let y_limits = options.y_limits;
    let ctx = ui.ctx().clone();

    plot.show(ui, |plot_ui| {
        if x_limits.is_some() || y_limits.is_some() {
            let (x_min, x_max) = x_limits.unwrap_or((f64::NEG_INFINITY, f64::INFINITY));
            let (y_min, y_max) = y_limits.unwrap_or((f64::NEG_INFINITY, f64::INFINITY));
            plot_ui.set_plot_bounds(PlotBounds::from_min_max([x_min, y_min], [x_max, y_max]));
            plot_ui.set_auto_bounds(egui::Vec2b::new(x_limits.is_none(), y_limits.is_none()));
        }

        for artist in surface.artists_of(axis.id) {
            draw_artist(plot_ui, &ctx, artist, textures);
        }
    });
}

fn artist_color(artist: &Artist) -> Option<Color32> {
    artist
        .style
        .color
        .map(|[r, g, b, a]| Color32::from_rgba_unmultiplied(r, g, b, a))
}

fn artist_name(artist: &Artist) -> String {
    artist
        .style
        .label
        .clone()
        .unwrap_or_else(|| format!("{} {}", artist.kind(), artist.id.raw()))
}

fn draw_artist(
    plot_ui: &mut PlotUi,
    ctx: &egui::Context,
    artist: &Artist,
    textures: &mut Textures,
) {
    let name = artist_name(artist);
    let color = artist_color(artist);

    match &artist.data {
        ArtistData::Line(values) => {
            let mut line = Line::new(name, PlotPoints::from(line_points(values)));
            if let Some(color) = color {
                line = line.color(color);
            }
            if let Some(width) = artist.style.width {
                line = line.width(width);
            }
            plot_ui.line(line);
        }
        ArtistData::Scatter(points) => {
            let mut scatter = Points::new(name, PlotPoints::from(finite_points(points)))
                .radius(artist.style.width.unwrap_or(2.0));
            if let Some(color) = color {
                scatter = scatter.color(color);
            }
            plot_ui.points(scatter);
        }
        ArtistData::Bar(heights) => {
            let bars = heights
                .iter()
                .enumerate()
                .map(|(i, &h)| Bar::new(i as f64, h))
                .collect();
            let mut chart = BarChart::new(name, bars);
            if let Some(color) = color {
                chart = chart.color(color);
            }
            plot_ui.bar_chart(chart);
        }
        ArtistData::Image(image) => {
            draw_image(plot_ui, ctx, artist, image, name, textures);
        }
        ArtistData::Text { position, text } => {
            let mut label = Text::new(name, PlotPoint::new(position[0], position[1]), text.as_str());
            if let Some(color) = color {
                label = label.color(color);
            }
            plot_ui.text(label);
        }
    }
}

fn color_image(image: &ImageBuffer, lo: f64, hi: f64) -> ColorImage {
    let rgba: Vec<u8> = image
        .pixels
        .iter()
        .flat_map(|&v| colormap(v, lo, hi))
        .collect();
    ColorImage::from_rgba_unmultiplied([image.cols, image.rows], &rgba)
}

fn draw_image(
    plot_ui: &mut PlotUi,
    ctx: &egui::Context,
    artist: &Artist,
    image: &ImageBuffer,
    name: String,
    textures: &mut Textures,
) {
    let (lo, hi) = image.finite_range().unwrap_or((0.0, 1.0));
    let pixels = color_image(image, lo, hi);

    let texture = match textures.get_mut(&TextureKey::Image(artist.id)) {
        Some(handle) => {
            handle.set(pixels, TextureOptions::NEAREST);
            handle.clone()
        }
        None => {
            let handle = ctx.load_texture(
                format!("devtk_image_{}", artist.id.raw()),
                pixels,
                TextureOptions::NEAREST,
            );
            textures.insert(TextureKey::Image(artist.id), handle.clone());
            handle
        }
    };

    let (w, h) = (image.cols as f64, image.rows as f64);
    plot_ui.image(PlotImage::new(
        name.clone(),
        texture.id(),
        PlotPoint::new(w / 2.0, h / 2.0),
        Vec2::new(w as f32, h as f32),
    ));

    if artist.style.colorbar {
        let strip = textures
            .entry(TextureKey::Colorbar(artist.id))
            .or_insert_with(|| colorbar_texture(ctx, artist.id))
            .clone();
        draw_colorbar(plot_ui, &strip, w, h, lo, hi, &name);
    }
}

/// Vertical gradient from the top of the colour map to the bottom
fn colorbar_texture(ctx: &egui::Context, id: ArtistId) -> TextureHandle {
    let steps: Vec<f64> = (0..COLORBAR_STEPS)
        .rev()
        .map(|i| i as f64 / (COLORBAR_STEPS - 1) as f64)
        .collect();
    let strip = ImageBuffer {
        rows: COLORBAR_STEPS,
        cols: 1,
        pixels: steps,
    };
    ctx.load_texture(
        format!("devtk_colorbar_{}", id.raw()),
        color_image(&strip, 0.0, 1.0),
        TextureOptions::LINEAR,
    )
}

fn draw_colorbar(
    plot_ui: &mut PlotUi,
    texture: &TextureHandle,
    w: f64,
    h: f64,
    lo: f64,
    hi: f64,
    name: &str,
) {
    let bar_width = (w * 0.05).max(0.5);
    let x = w + bar_width * 1.5;
    plot_ui.image(PlotImage::new(
        format!("{} colorbar", name),
        texture.id(),
        PlotPoint::new(x, h / 2.0),
        Vec2::new(bar_width as f32, h as f32),
    ));
    plot_ui.text(Text::new(
        format!("{} max", name),
        PlotPoint::new(x + bar_width, h),
        format!("{:.3}", hi),
    ));
    plot_ui.text(Text::new(
        format!("{} min", name),
        PlotPoint::new(x + bar_width, 0.0),
        format!("{:.3}", lo),
    ));
}
