use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    #[default]
    Image,
    Video,
}

/// One piece of media plus the metadata shown in its overlay.
///
/// Identity is the URL: two descriptors with the same URL compare equal even
/// if their metadata differs. Descriptors are shared as `Arc<MediaDescriptor>`
/// and never mutated once built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaDescriptor {
    pub url: String,
    #[serde(default)]
    pub kind: MediaKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<i64>,
    #[serde(default)]
    pub restricted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_path: Option<String>,
}

impl MediaDescriptor {
    pub fn new(url: impl Into<String>, kind: MediaKind) -> Self {
        Self {
            url: url.into(),
            kind,
            title: None,
            source_label: None,
            score: None,
            restricted: false,
            origin_path: None,
        }
    }

    pub fn image(url: impl Into<String>) -> Self {
        Self::new(url, MediaKind::Image)
    }

    pub fn video(url: impl Into<String>) -> Self {
        Self::new(url, MediaKind::Video)
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_source_label(mut self, label: impl Into<String>) -> Self {
        self.source_label = Some(label.into());
        self
    }

    pub fn with_score(mut self, score: i64) -> Self {
        self.score = Some(score);
        self
    }

    pub fn with_restricted(mut self, restricted: bool) -> Self {
        self.restricted = restricted;
        self
    }

    pub fn with_origin_path(mut self, path: impl Into<String>) -> Self {
        self.origin_path = Some(path.into());
        self
    }

    pub fn is_video(&self) -> bool {
        self.kind == MediaKind::Video
    }

    /// Secondary overlay line: "label | N points" for scored feed items,
    /// otherwise the origin path for local files.
    pub fn meta_line(&self) -> String {
        match (&self.source_label, self.score) {
            (Some(label), Some(score)) => format!("{} | {} points", label, score),
            (Some(label), None) => label.clone(),
            (None, _) => self.origin_path.clone().unwrap_or_default(),
        }
    }
}

impl PartialEq for MediaDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.url == other.url
    }
}

impl Eq for MediaDescriptor {}

impl Hash for MediaDescriptor {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.url.hash(state);
    }
}

/// How a media element is scaled into its cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FitMode {
    /// Cover the cell, cropping overflow.
    Fill,
    /// Letterbox inside the cell.
    #[default]
    Fit,
    /// Distort to the cell's aspect ratio.
    Stretch,
}

impl FitMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fill => "fill",
            Self::Fit => "fit",
            Self::Stretch => "stretch",
        }
    }
}

impl fmt::Display for FitMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FitMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fill" => Ok(Self::Fill),
            "fit" => Ok(Self::Fit),
            "stretch" => Ok(Self::Stretch),
            other => Err(format!("unknown fit mode '{}' (expected fill, fit or stretch)", other)),
        }
    }
}

/// Handling of descriptors flagged `restricted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RestrictedMode {
    /// Dropped before they reach the queue.
    #[default]
    Block,
    /// Mounted with a blur marker.
    Blur,
    Show,
}

impl FromStr for RestrictedMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "block" => Ok(Self::Block),
            "blur" => Ok(Self::Blur),
            "show" => Ok(Self::Show),
            other => Err(format!("unknown restricted mode '{}'", other)),
        }
    }
}
