//! Contract between the rotation core and whatever actually draws the grid.
//!
//! The core never computes layout. It asks a [`GridTopology`] how many cells
//! exist and for the [`RenderSurface`] of each one, then drives that surface
//! through mount / show / hide / release calls.

use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;
use crate::media::{FitMode, MediaDescriptor};

/// Future returned by the async half of [`RenderSurface`].
pub type SurfaceFuture<'a> = Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

/// One of the two presentation buffers of a cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Slot {
    A,
    B,
}

impl Slot {
    pub const BOTH: [Slot; 2] = [Slot::A, Slot::B];

    pub fn other(self) -> Slot {
        match self {
            Slot::A => Slot::B,
            Slot::B => Slot::A,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Slot::A => "A",
            Slot::B => "B",
        }
    }

    pub(crate) fn idx(self) -> usize {
        match self {
            Slot::A => 0,
            Slot::B => 1,
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Volume state applied to video elements once playback is confirmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AudioSettings {
    /// 0..=100
    pub volume: u8,
    pub muted: bool,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            volume: 50,
            muted: false,
        }
    }
}

impl AudioSettings {
    pub fn new(volume: u8, muted: bool) -> Self {
        Self {
            volume: volume.min(100),
            muted,
        }
    }

    /// Gain in `0.0..=1.0`; zero whenever muted.
    pub fn gain(&self) -> f32 {
        if self.muted {
            0.0
        } else {
            f32::from(self.volume) / 100.0
        }
    }

    pub fn is_silent(&self) -> bool {
        self.muted || self.volume == 0
    }
}

/// Text drawn over a cell (title line, meta line, markers).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Overlay {
    pub title: String,
    pub meta: String,
    pub score: Option<i64>,
    pub restricted: bool,
}

impl Overlay {
    pub fn for_descriptor(descriptor: &MediaDescriptor) -> Self {
        Self {
            title: descriptor.title.clone().unwrap_or_default(),
            meta: descriptor.meta_line(),
            score: descriptor.score,
            restricted: descriptor.restricted,
        }
    }
}

/// Everything a surface needs to attach one element to a slot.
#[derive(Debug, Clone)]
pub struct MountRequest {
    pub descriptor: Arc<MediaDescriptor>,
    pub fit: FitMode,
    pub blur: bool,
    pub overlay: Overlay,
}

/// Per-cell draw target.
///
/// Synchronous calls must not block; anything that waits on I/O goes through
/// [`SurfaceFuture`].
pub trait RenderSurface: Send + Sync {
    /// Loads an image off-screen so mounting it is instant.
    fn preload<'a>(&'a self, descriptor: &'a MediaDescriptor) -> SurfaceFuture<'a>;

    /// Attaches an element to `slot`, replacing whatever the slot held.
    fn mount(&self, slot: Slot, request: &MountRequest);

    /// Starts video playback muted so autoplay is allowed.
    fn play_muted(&self, _slot: Slot) {}

    /// Resolves once the video in `slot` can play through.
    fn wait_ready(&self, slot: Slot) -> SurfaceFuture<'_>;

    /// Duration of the video in `slot`, once known.
    fn media_duration(&self, _slot: Slot) -> Option<Duration> {
        None
    }

    fn seek(&self, _slot: Slot, _position: Duration) {}

    fn apply_audio(&self, _slot: Slot, _audio: AudioSettings) {}

    fn set_visible(&self, slot: Slot, visible: bool);

    /// Stops decoding and drops the element held by `slot`.
    fn release(&self, slot: Slot);

    fn apply_fit_mode(&self, fit: FitMode);
}

/// Grid layout owned outside the core.
pub trait GridTopology: Send + Sync {
    fn cell_count(&self) -> usize;

    fn render_surface(&self, index: usize) -> Option<Arc<dyn RenderSurface>>;

    /// Rebuilds the grid. Surfaces handed out before the reset stay valid for
    /// whoever still holds them but are no longer part of the grid.
    fn reset(&self, rows: usize, cols: usize);

    fn dimensions(&self) -> (usize, usize);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slots_alternate() {
        assert_eq!(Slot::A.other(), Slot::B);
        assert_eq!(Slot::B.other().other(), Slot::B);
    }

    #[test]
    fn muted_audio_has_no_gain() {
        assert_eq!(AudioSettings::new(80, true).gain(), 0.0);
        assert!((AudioSettings::new(80, false).gain() - 0.8).abs() < f32::EPSILON);
        assert_eq!(AudioSettings::new(250, false).volume, 100);
        assert!(AudioSettings::new(0, false).is_silent());
    }

    #[test]
    fn overlay_copies_markers() {
        let d = MediaDescriptor::image("u")
            .with_title("Nebula")
            .with_source_label("r/space")
            .with_score(7)
            .with_restricted(true);
        let overlay = Overlay::for_descriptor(&d);
        assert_eq!(overlay.title, "Nebula");
        assert_eq!(overlay.meta, "r/space | 7 points");
        assert!(overlay.restricted);
    }
}
