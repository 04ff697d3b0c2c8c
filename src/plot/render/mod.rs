//! Renderers that drive a [`PlotWorker`] on the rendering thread.
//!
//! - [`headless`] ticks the worker on a timer with no window at all.
//! - [`window`] opens one native viewport per figure through eframe and
//!   draws the surface with egui_plot.
//!
//! Both return the final [`PlotSurface`] when the loop exits.

pub mod headless;
pub mod window;

use crate::config::{PlotConfig, RenderBackend};
use crate::plot::surface::PlotSurface;
use crate::plot::worker::PlotWorker;
use std::time::{Duration, Instant};

/// Run the configured renderer until it exits
pub fn run(config: &PlotConfig, worker: PlotWorker) -> PlotSurface {
    match config.backend {
        RenderBackend::Headless => headless::run(config, worker),
        RenderBackend::Window => window::run(config, worker),
    }
}

/// Keeps a loop at a fixed rate by sleeping away the rest of each period
#[derive(Debug)]
pub struct FramePacer {
    interval: Duration,
    last_frame: Instant,
}

impl FramePacer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_frame: Instant::now(),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Sleep until one interval has passed since the previous call
    pub fn wait(&mut self) {
        if self.interval.is_zero() {
            std::thread::yield_now();
            return;
        }

        let elapsed = self.last_frame.elapsed();
        if elapsed < self.interval {
            std::thread::sleep(self.interval - elapsed);
        }
        self.last_frame = Instant::now();
    }
}

/// Interval between renderer iterations: the frame cap if set, else the tick interval
pub fn loop_interval(config: &PlotConfig) -> Duration {
    config
        .frame_interval()
        .unwrap_or_else(|| config.tick_interval())
}

/// Sample index/value pairs of a line, skipping non-finite samples
pub fn line_points(values: &[f64]) -> Vec<[f64; 2]> {
    values
        .iter()
        .enumerate()
        .filter(|(_, v)| v.is_finite())
        .map(|(i, &v)| [i as f64, v])
        .collect()
}

/// Scatter points with both coordinates finite
pub fn finite_points(points: &[[f64; 2]]) -> Vec<[f64; 2]> {
    points
        .iter()
        .copied()
        .filter(|[x, y]| x.is_finite() && y.is_finite())
        .collect()
}

const COLORMAP_STOPS: [[u8; 3]; 5] = [
    [68, 1, 84],
    [59, 82, 139],
    [33, 145, 140],
    [94, 201, 98],
    [253, 231, 37],
];

/// Map `value` within `[lo, hi]` to an RGBA colour; non-finite values are transparent
pub fn colormap(value: f64, lo: f64, hi: f64) -> [u8; 4] {
    if !value.is_finite() {
        return [0, 0, 0, 0];
    }
    let t = if hi > lo {
        ((value - lo) / (hi - lo)).clamp(0.0, 1.0)
    } else {
        0.5
    };

    let scaled = t * (COLORMAP_STOPS.len() - 1) as f64;
    let index = (scaled.floor() as usize).min(COLORMAP_STOPS.len() - 2);
    let frac = scaled - index as f64;
    let (a, b) = (COLORMAP_STOPS[index], COLORMAP_STOPS[index + 1]);
    let mix = |i: usize| (a[i] as f64 + (b[i] as f64 - a[i] as f64) * frac).round() as u8;
    [mix(0), mix(1), mix(2), 255]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_points_skip_nan() {
        let points = line_points(&[f64::NAN, 1.0, f64::NAN, 3.0]);
        assert_eq!(points, vec![[1.0, 1.0], [3.0, 3.0]]);
    }

    #[test]
    fn test_colormap_ends() {
        assert_eq!(colormap(0.0, 0.0, 1.0), [68, 1, 84, 255]);
        assert_eq!(colormap(1.0, 0.0, 1.0), [253, 231, 37, 255]);
        assert_eq!(colormap(5.0, 0.0, 1.0), [253, 231, 37, 255]);
        assert_eq!(colormap(f64::NAN, 0.0, 1.0)[3], 0);
    }

    #[test]
    fn test_loop_interval_prefers_fps() {
        let mut config = PlotConfig::headless();
        assert_eq!(loop_interval(&config), Duration::from_millis(1));
        config.fps = Some(100);
        assert_eq!(loop_interval(&config), Duration::from_millis(10));
    }
}
