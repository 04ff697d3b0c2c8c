//! Identity types for the plot system.
//!
//! Figures, axes and artists are addressed by `u32` newtypes. Identifiers
//! are handed out by an [`IdAllocator`], which the plot manager owns so a
//! caller can reference an object right after asking for it, before the
//! rendering thread has created it.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

macro_rules! plot_id {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub u32);

        impl $name {
            #[inline]
            pub fn raw(self) -> u32 {
                self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($label, "({})"), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Debug::fmt(self, f)
            }
        }
    };
}

plot_id!(
    /// Identifies one canvas/window.
    FigureId,
    "FigureId"
);
plot_id!(
    /// Identifies one coordinate region of a figure.
    AxisId,
    "AxisId"
);
plot_id!(
    /// Identifies one drawable element of an axis.
    ArtistId,
    "ArtistId"
);

/// Thread-safe allocator for plot identifiers.
///
/// All three kinds share one counter, so an identifier value is never
/// reused across kinds either.
#[derive(Debug)]
pub struct IdAllocator {
    next: AtomicU32,
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl IdAllocator {
    pub fn new() -> Self {
        Self {
            next: AtomicU32::new(1),
        }
    }

    #[inline]
    fn next_raw(&self) -> u32 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }

    pub fn figure(&self) -> FigureId {
        FigureId(self.next_raw())
    }

    pub fn axis(&self) -> AxisId {
        AxisId(self.next_raw())
    }

    pub fn artist(&self) -> ArtistId {
        ArtistId(self.next_raw())
    }
}
