use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

use crate::error::{GalleryError, Result};
use crate::gallery::{GalleryCommand, GalleryOptions};
use crate::media::{FitMode, RestrictedMode};
use crate::surface::AudioSettings;

pub const MAX_GRID_SIDE: usize = 10;

/// Contents of `config.json`. Missing fields take their defaults and unknown
/// fields are ignored, so older files keep loading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub grid_rows: usize,
    pub grid_columns: usize,
    /// Seconds.
    pub rotation_interval: u64,
    pub background_color: String,
    pub image_fit_mode: FitMode,
    pub nsfw_filter_mode: RestrictedMode,
    pub enable_videos: bool,
    pub volume: u8,
    pub muted: bool,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            grid_rows: 3,
            grid_columns: 3,
            rotation_interval: 10,
            background_color: "#1a1a1a".to_string(),
            image_fit_mode: FitMode::Fit,
            nsfw_filter_mode: RestrictedMode::Block,
            enable_videos: false,
            volume: 50,
            muted: false,
        }
    }
}

/// Partial update accepted by `PUT /api/config`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigUpdate {
    pub grid_rows: Option<usize>,
    pub grid_columns: Option<usize>,
    pub rotation_interval: Option<u64>,
    pub background_color: Option<String>,
    pub image_fit_mode: Option<FitMode>,
    pub nsfw_filter_mode: Option<RestrictedMode>,
    pub enable_videos: Option<bool>,
    pub volume: Option<u8>,
    pub muted: Option<bool>,
}

impl DisplayConfig {
    /// Reads `path`, writing the defaults there first if it does not exist.
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if !path.exists() {
            let config = Self::default();
            config.save(path)?;
            info!(path = %path.display(), "wrote default configuration");
            return Ok(config);
        }
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        for (name, value) in [("grid_rows", self.grid_rows), ("grid_columns", self.grid_columns)] {
            if !(1..=MAX_GRID_SIDE).contains(&value) {
                return Err(GalleryError::InvalidConfig(format!(
                    "{} must be between 1 and {}, got {}",
                    name, MAX_GRID_SIDE, value
                )));
            }
        }
        if self.rotation_interval == 0 {
            return Err(GalleryError::InvalidConfig("rotation_interval must be at least 1 second".into()));
        }
        if self.volume > 100 {
            return Err(GalleryError::InvalidConfig(format!("volume must be 0-100, got {}", self.volume)));
        }
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.rotation_interval)
    }

    pub fn audio(&self) -> AudioSettings {
        AudioSettings::new(self.volume, self.muted)
    }

    pub fn gallery_options(&self) -> GalleryOptions {
        GalleryOptions {
            interval: self.interval(),
            fit: self.image_fit_mode,
            restricted: self.nsfw_filter_mode,
            audio: self.audio(),
            ..GalleryOptions::default()
        }
    }

    /// Merges `update` and returns the commands that bring a live gallery in
    /// line with it. Nothing changes if the merged result is invalid.
    pub fn apply(&mut self, update: ConfigUpdate) -> Result<Vec<GalleryCommand>> {
        let mut next = self.clone();
        if let Some(v) = update.grid_rows {
            next.grid_rows = v;
        }
        if let Some(v) = update.grid_columns {
            next.grid_columns = v;
        }
        if let Some(v) = update.rotation_interval {
            next.rotation_interval = v;
        }
        if let Some(v) = update.background_color {
            next.background_color = v;
        }
        if let Some(v) = update.image_fit_mode {
            next.image_fit_mode = v;
        }
        if let Some(v) = update.nsfw_filter_mode {
            next.nsfw_filter_mode = v;
        }
        if let Some(v) = update.enable_videos {
            next.enable_videos = v;
        }
        if let Some(v) = update.volume {
            next.volume = v;
        }
        if let Some(v) = update.muted {
            next.muted = v;
        }
        next.validate()?;

        let mut commands = Vec::new();
        if (next.grid_rows, next.grid_columns) != (self.grid_rows, self.grid_columns) {
            commands.push(GalleryCommand::SetGrid {
                rows: next.grid_rows,
                cols: next.grid_columns,
            });
        }
        if next.rotation_interval != self.rotation_interval {
            commands.push(GalleryCommand::SetInterval {
                interval: next.interval(),
            });
        }
        if next.image_fit_mode != self.image_fit_mode {
            commands.push(GalleryCommand::SetFitMode {
                fit: next.image_fit_mode,
            });
        }
        if next.nsfw_filter_mode != self.nsfw_filter_mode {
            commands.push(GalleryCommand::SetRestrictedMode {
                mode: next.nsfw_filter_mode,
            });
        }
        if next.volume != self.volume {
            commands.push(GalleryCommand::SetVolume { volume: next.volume });
        }
        if next.muted != self.muted {
            commands.push(GalleryCommand::SetMuted { muted: next.muted });
        }
        if next.enable_videos != self.enable_videos {
            warn!("enable_videos changed, takes effect on the next rescan");
        }

        *self = next;
        Ok(commands)
    }
}
