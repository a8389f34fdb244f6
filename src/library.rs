//! Local folder scanning into media descriptors.

use std::path::{Path, PathBuf};
use tracing::{debug, info};
use url::Url;

use crate::error::{GalleryError, Result};
use crate::media::{MediaDescriptor, MediaKind};

pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp", "bmp", "svg"];
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "webm", "mov"];

#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub recursive: bool,
    pub include_videos: bool,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            recursive: true,
            include_videos: false,
        }
    }
}

pub fn media_kind(path: &Path, include_videos: bool) -> Option<MediaKind> {
    let ext = path.extension()?.to_string_lossy().to_lowercase();
    if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
        Some(MediaKind::Image)
    } else if include_videos && VIDEO_EXTENSIONS.contains(&ext.as_str()) {
        Some(MediaKind::Video)
    } else {
        None
    }
}

/// Walks `dir` and returns one descriptor per media file, sorted by path.
pub fn scan_folder(dir: &Path, options: &ScanOptions) -> Result<Vec<MediaDescriptor>> {
    let root = dir.canonicalize()?;
    if !root.is_dir() {
        return Err(GalleryError::InvalidConfig(format!("{} is not a directory", dir.display())));
    }

    let mut files: Vec<(PathBuf, MediaKind)> = Vec::new();
    let mut pending = vec![root];
    while let Some(current) = pending.pop() {
        let entries = match std::fs::read_dir(&current) {
            Ok(entries) => entries,
            Err(e) => {
                debug!(dir = %current.display(), "skipping unreadable directory: {}", e);
                continue;
            }
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let Ok(file_type) = entry.file_type() else {
                continue;
            };
            if file_type.is_dir() {
                if options.recursive {
                    pending.push(path);
                }
            } else if let Some(kind) = media_kind(&path, options.include_videos) {
                files.push((path, kind));
            }
        }
    }

    files.sort_by(|a, b| a.0.cmp(&b.0));
    let descriptors: Vec<MediaDescriptor> = files
        .into_iter()
        .filter_map(|(path, kind)| descriptor_for(&path, kind))
        .collect();
    info!(dir = %dir.display(), count = descriptors.len(), "scanned media folder");
    Ok(descriptors)
}

fn descriptor_for(path: &Path, kind: MediaKind) -> Option<MediaDescriptor> {
    let url = Url::from_file_path(path).ok()?;
    let mut descriptor = MediaDescriptor::new(url.to_string(), kind).with_origin_path(path.to_string_lossy());
    if let Some(name) = path.file_name() {
        descriptor = descriptor.with_title(name.to_string_lossy());
    }
    if let Some(parent) = path.parent().and_then(Path::file_name) {
        descriptor = descriptor.with_source_label(parent.to_string_lossy());
    }
    Some(descriptor)
}
