use std::time::Duration;

use thiserror::Error;

/// Errors raised by the rotation core and its collaborators.
///
/// Inside the core none of these are fatal: a failed rotation degrades to
/// keeping the previous content on screen.
#[derive(Debug, Error)]
pub enum GalleryError {
    #[error("failed to preload {url}: {reason}")]
    Preload { url: String, reason: String },

    #[error("preload of {url} timed out after {timeout:?}")]
    PreloadTimeout { url: String, timeout: Duration },

    #[error("media element in slot {slot} is not ready: {reason}")]
    NotReady { slot: &'static str, reason: String },

    #[error("no media loaded")]
    NoMedia,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("decode error: {0}")]
    Decode(#[from] image::ImageError),
}

impl GalleryError {
    pub fn preload(url: impl Into<String>, reason: impl ToString) -> Self {
        Self::Preload {
            url: url.into(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, GalleryError>;
