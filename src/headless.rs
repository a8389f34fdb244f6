//! A grid with no screen attached.
//!
//! Each surface verifies resources for real (decoding images from disk or
//! over http) and logs what a screen would show. Used by the binary on
//! kiosks where the actual compositor lives in another process.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

use crate::error::{GalleryError, Result};
use crate::media::{FitMode, MediaDescriptor};
use crate::surface::{AudioSettings, GridTopology, MountRequest, RenderSurface, Slot, SurfaceFuture};

#[derive(Debug, Clone)]
struct Mounted {
    url: String,
    video: bool,
    blur: bool,
    fit: FitMode,
    title: String,
    audio: Option<AudioSettings>,
}

#[derive(Debug, Default)]
struct SurfaceState {
    slots: [Option<Mounted>; 2],
    visible: [bool; 2],
}

pub struct HeadlessSurface {
    index: usize,
    client: reqwest::Client,
    state: Mutex<SurfaceState>,
}

fn file_path(url: &str) -> Option<PathBuf> {
    Url::parse(url).ok().filter(|u| u.scheme() == "file")?.to_file_path().ok()
}

fn is_http(url: &str) -> bool {
    Url::parse(url)
        .map(|u| matches!(u.scheme(), "http" | "https"))
        .unwrap_or(false)
}

impl HeadlessSurface {
    pub fn new(index: usize, client: reqwest::Client) -> Self {
        Self {
            index,
            client,
            state: Mutex::new(SurfaceState::default()),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, SurfaceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// URL shown in `slot`, if that slot is the visible one.
    pub fn showing(&self) -> Option<String> {
        let state = self.state();
        Slot::BOTH
            .into_iter()
            .find(|s| state.visible[s.idx()])
            .and_then(|s| state.slots[s.idx()].as_ref().map(|m| m.url.clone()))
    }

    async fn decode(&self, url: &str) -> Result<(u32, u32)> {
        if let Some(path) = file_path(url) {
            if path.extension().map(|e| e.eq_ignore_ascii_case("svg")).unwrap_or(false) {
                // No raster decoder for svg; existence is all we can check.
                tokio::fs::metadata(&path).await?;
                return Ok((0, 0));
            }
            let image = tokio::task::spawn_blocking(move || image::open(path))
                .await
                .map_err(|e| GalleryError::preload(url, e))??;
            return Ok((image.width(), image.height()));
        }
        if is_http(url) {
            let bytes = self.client.get(url).send().await?.error_for_status()?.bytes().await?;
            let image = tokio::task::spawn_blocking(move || image::load_from_memory(&bytes))
                .await
                .map_err(|e| GalleryError::preload(url, e))??;
            return Ok((image.width(), image.height()));
        }
        Err(GalleryError::preload(url, "unsupported url scheme"))
    }

    async fn probe_video(&self, url: String) -> Result<()> {
        if let Some(path) = file_path(&url) {
            tokio::fs::metadata(&path).await?;
            return Ok(());
        }
        if is_http(&url) {
            self.client.head(&url).send().await?.error_for_status()?;
            return Ok(());
        }
        Err(GalleryError::preload(url, "unsupported url scheme"))
    }
}

impl RenderSurface for HeadlessSurface {
    fn preload<'a>(&'a self, descriptor: &'a MediaDescriptor) -> SurfaceFuture<'a> {
        Box::pin(async move {
            let (width, height) = self.decode(&descriptor.url).await?;
            debug!(cell = self.index, url = %descriptor.url, width, height, "preloaded");
            Ok(())
        })
    }

    fn mount(&self, slot: Slot, request: &MountRequest) {
        let mounted = Mounted {
            url: request.descriptor.url.clone(),
            video: request.descriptor.is_video(),
            blur: request.blur,
            fit: request.fit,
            title: request.overlay.title.clone(),
            audio: None,
        };
        debug!(cell = self.index, %slot, url = %mounted.url, blur = mounted.blur, "mounted");
        self.state().slots[slot.idx()] = Some(mounted);
    }

    fn play_muted(&self, slot: Slot) {
        if let Some(m) = self.state().slots[slot.idx()].as_mut() {
            m.audio = Some(AudioSettings::new(0, true));
        }
    }

    fn wait_ready(&self, slot: Slot) -> SurfaceFuture<'_> {
        let url = self.state().slots[slot.idx()].as_ref().map(|m| m.url.clone());
        Box::pin(async move {
            match url {
                Some(url) => self.probe_video(url).await.map_err(|e| GalleryError::NotReady {
                    slot: slot.name(),
                    reason: e.to_string(),
                }),
                None => Err(GalleryError::NotReady {
                    slot: slot.name(),
                    reason: "nothing mounted".into(),
                }),
            }
        })
    }

    fn media_duration(&self, _slot: Slot) -> Option<Duration> {
        // No demuxer here, so start offsets are never seeded.
        None
    }

    fn apply_audio(&self, slot: Slot, audio: AudioSettings) {
        if let Some(m) = self.state().slots[slot.idx()].as_mut().filter(|m| m.video) {
            m.audio = Some(audio);
        }
    }

    fn set_visible(&self, slot: Slot, visible: bool) {
        let mut state = self.state();
        state.visible[slot.idx()] = visible;
        if visible {
            if let Some(m) = &state.slots[slot.idx()] {
                info!(cell = self.index, %slot, title = %m.title, fit = %m.fit, "showing {}", m.url);
            }
        }
    }

    fn release(&self, slot: Slot) {
        let mut state = self.state();
        state.slots[slot.idx()] = None;
        state.visible[slot.idx()] = false;
    }

    fn apply_fit_mode(&self, fit: FitMode) {
        let mut state = self.state();
        for m in state.slots.iter_mut().flatten() {
            m.fit = fit;
        }
    }
}

pub struct HeadlessGrid {
    dims: Mutex<(usize, usize)>,
    surfaces: RwLock<Vec<Arc<HeadlessSurface>>>,
    client: reqwest::Client,
}

impl HeadlessGrid {
    pub fn new(rows: usize, cols: usize) -> Self {
        let grid = Self {
            dims: Mutex::new((0, 0)),
            surfaces: RwLock::new(Vec::new()),
            client: reqwest::Client::new(),
        };
        grid.reset(rows, cols);
        grid
    }

    /// What every cell currently shows, by index.
    pub fn showing(&self) -> Vec<Option<String>> {
        self.surfaces
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|s| s.showing())
            .collect()
    }
}

impl GridTopology for HeadlessGrid {
    fn cell_count(&self) -> usize {
        self.surfaces.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn render_surface(&self, index: usize) -> Option<Arc<dyn RenderSurface>> {
        self.surfaces
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(index)
            .map(|s| s.clone() as Arc<dyn RenderSurface>)
    }

    fn reset(&self, rows: usize, cols: usize) {
        let fresh = (0..rows * cols)
            .map(|i| Arc::new(HeadlessSurface::new(i, self.client.clone())))
            .collect();
        *self.surfaces.write().unwrap_or_else(PoisonError::into_inner) = fresh;
        *self.dims.lock().unwrap_or_else(PoisonError::into_inner) = (rows, cols);
        info!(rows, cols, "headless grid reset");
    }

    fn dimensions(&self) -> (usize, usize) {
        *self.dims.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::Overlay;
    use image::{Rgba, RgbaImage};

    fn request(url: String) -> MountRequest {
        let descriptor = Arc::new(MediaDescriptor::image(url));
        MountRequest {
            overlay: Overlay::for_descriptor(&descriptor),
            descriptor,
            fit: FitMode::Fill,
            blur: false,
        }
    }

    #[tokio::test]
    async fn preload_decodes_real_files() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.png");
        RgbaImage::from_pixel(4, 3, Rgba([255, 0, 0, 255])).save(&good).unwrap();
        let bad = dir.path().join("bad.png");
        std::fs::write(&bad, b"not a png").unwrap();

        let surface = HeadlessSurface::new(0, reqwest::Client::new());
        let good_url = Url::from_file_path(&good).unwrap().to_string();
        let bad_url = Url::from_file_path(&bad).unwrap().to_string();
        let missing_url = Url::from_file_path(dir.path().join("missing.png")).unwrap().to_string();

        assert!(surface.preload(&MediaDescriptor::image(good_url)).await.is_ok());
        assert!(surface.preload(&MediaDescriptor::image(bad_url)).await.is_err());
        assert!(surface.preload(&MediaDescriptor::image(missing_url)).await.is_err());
        assert!(surface.preload(&MediaDescriptor::image("ftp://x/y.png")).await.is_err());
    }

    #[tokio::test]
    async fn visible_slot_is_reported() {
        let grid = HeadlessGrid::new(1, 2);
        let surface = grid.render_surface(1).unwrap();
        surface.mount(Slot::A, &request("file:///a.png".into()));
        surface.set_visible(Slot::A, true);
        assert_eq!(grid.showing(), vec![None, Some("file:///a.png".to_string())]);

        surface.mount(Slot::B, &request("file:///b.png".into()));
        surface.set_visible(Slot::B, true);
        surface.set_visible(Slot::A, false);
        surface.release(Slot::A);
        assert_eq!(grid.showing()[1].as_deref(), Some("file:///b.png"));
    }

    #[tokio::test]
    async fn missing_video_is_not_ready() {
        let surface = HeadlessSurface::new(0, reqwest::Client::new());
        let clip = Arc::new(MediaDescriptor::video("file:///definitely/not/here.mp4"));
        surface.mount(
            Slot::A,
            &MountRequest {
                overlay: Overlay::for_descriptor(&clip),
                descriptor: clip,
                fit: FitMode::Fit,
                blur: false,
            },
        );
        assert!(surface.wait_ready(Slot::A).await.is_err());
        assert!(surface.wait_ready(Slot::B).await.is_err());
    }

    #[test]
    fn reset_replaces_surfaces() {
        let grid = HeadlessGrid::new(3, 3);
        assert_eq!(grid.cell_count(), 9);
        grid.reset(2, 1);
        assert_eq!(grid.cell_count(), 2);
        assert_eq!(grid.dimensions(), (2, 1));
        assert!(grid.render_surface(2).is_none());
    }
}
