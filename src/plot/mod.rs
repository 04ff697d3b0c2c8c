//! Live plotting on a dedicated rendering thread.
//!
//! # Module Organization
//!
//! - [`id`] - Figure, axis and artist identifiers and their allocator
//! - [`artist`] - Artist types, shapes and data payloads
//! - [`layout`] - Figure grids, axis placement and axis options
//! - [`surface`] - The drawing state every renderer reads
//! - [`command`] - Queued commands and data updates, coalescing
//! - [`channel`] - The two FIFO queues between producer and renderer
//! - [`worker`] - Toolkit-independent drain cycle and shared flags
//! - [`render`] - Window and headless renderers
//! - [`manager`] - Thread lifecycle and the producer-facing API

pub mod artist;
pub mod channel;
pub mod command;
pub mod id;
pub mod layout;
pub mod manager;
pub mod render;
pub mod surface;
pub mod worker;

pub use artist::{Artist, ArtistData, ArtistKind, ArtistShape, ArtistSpec, ArtistStyle, DataPayload, ImageBuffer};
pub use command::{DataUpdate, PlotCommand};
pub use id::{ArtistId, AxisId, FigureId, IdAllocator};
pub use layout::{Axis, AxisOptions, Figure, FigureSpec, Layout, Placement, Ticks};
pub use manager::{PlotHandle, PlotManager};
pub use surface::{FigureHandles, PlotSurface};
pub use worker::{ManagerState, WorkerStats};
