//! Rotating media grid.
//!
//! A [`Gallery`] owns one double-buffered cell per grid position and swaps
//! their content on independent, staggered timers. Drawing is delegated to a
//! [`GridTopology`]; [`headless::HeadlessGrid`] is the implementation the
//! bundled binary uses.

pub mod cell;
pub mod config;
pub mod error;
pub mod gallery;
pub mod headless;
pub mod http_server;
pub mod library;
pub mod media;
pub mod media_queue;
pub mod scheduler;
pub mod surface;
pub mod transition;

#[cfg(test)]
mod testing;

pub use error::{GalleryError, Result};
pub use gallery::{Gallery, GalleryCommand, GalleryOptions, GalleryStatus};
pub use media::{FitMode, MediaDescriptor, MediaKind, RestrictedMode};
pub use surface::{GridTopology, RenderSurface, Slot};
