//! Scriptable in-memory grid used by the unit tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::{GalleryError, Result};
use crate::media::{FitMode, MediaDescriptor};
use crate::surface::{AudioSettings, GridTopology, MountRequest, RenderSurface, Slot, SurfaceFuture};

#[derive(Debug, Clone, Copy)]
pub enum Behavior {
    Ok,
    Fail,
    Hang,
    Delay(Duration),
}

impl Behavior {
    async fn run(self, url: &str) -> Result<()> {
        match self {
            Behavior::Ok => Ok(()),
            Behavior::Fail => Err(GalleryError::preload(url, "scripted failure")),
            Behavior::Hang => std::future::pending().await,
            Behavior::Delay(d) => {
                tokio::time::sleep(d).await;
                Ok(())
            }
        }
    }
}

/// Per-URL outcomes for preload and video readiness. Unscripted URLs succeed.
#[derive(Default)]
pub struct Script {
    preload: Mutex<HashMap<String, Behavior>>,
    ready: Mutex<HashMap<String, Behavior>>,
}

impl Script {
    pub fn preload(&self, url: &str, behavior: Behavior) {
        self.preload.lock().unwrap().insert(url.to_string(), behavior);
    }

    pub fn ready(&self, url: &str, behavior: Behavior) {
        self.ready.lock().unwrap().insert(url.to_string(), behavior);
    }

    fn preload_for(&self, url: &str) -> Behavior {
        self.preload.lock().unwrap().get(url).copied().unwrap_or(Behavior::Ok)
    }

    fn ready_for(&self, url: &str) -> Behavior {
        self.ready.lock().unwrap().get(url).copied().unwrap_or(Behavior::Ok)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Preload(String),
    Mount(Slot, String, bool),
    PlayMuted(Slot),
    Seek(Slot, Duration),
    Audio(Slot, AudioSettings),
    Visible(Slot, bool),
    Release(Slot),
    Fit(FitMode),
}

pub struct FakeSurface {
    pub index: usize,
    pub generation: usize,
    script: Arc<Script>,
    duration: Option<Duration>,
    calls: Mutex<Vec<Call>>,
    mounted: Mutex<[Option<String>; 2]>,
}

impl FakeSurface {
    pub fn new(index: usize, generation: usize, script: Arc<Script>) -> Self {
        Self {
            index,
            generation,
            script,
            duration: Some(Duration::from_secs(100)),
            calls: Mutex::new(Vec::new()),
            mounted: Mutex::new([None, None]),
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn mounted(&self, slot: Slot) -> Option<String> {
        self.mounted.lock().unwrap()[slot.idx()].clone()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

impl RenderSurface for FakeSurface {
    fn preload<'a>(&'a self, descriptor: &'a MediaDescriptor) -> SurfaceFuture<'a> {
        self.record(Call::Preload(descriptor.url.clone()));
        let behavior = self.script.preload_for(&descriptor.url);
        Box::pin(async move { behavior.run(&descriptor.url).await })
    }

    fn mount(&self, slot: Slot, request: &MountRequest) {
        self.record(Call::Mount(slot, request.descriptor.url.clone(), request.blur));
        self.mounted.lock().unwrap()[slot.idx()] = Some(request.descriptor.url.clone());
    }

    fn play_muted(&self, slot: Slot) {
        self.record(Call::PlayMuted(slot));
    }

    fn wait_ready(&self, slot: Slot) -> SurfaceFuture<'_> {
        let url = self.mounted(slot).unwrap_or_default();
        let behavior = self.script.ready_for(&url);
        Box::pin(async move { behavior.run(&url).await })
    }

    fn media_duration(&self, _slot: Slot) -> Option<Duration> {
        self.duration
    }

    fn seek(&self, slot: Slot, position: Duration) {
        self.record(Call::Seek(slot, position));
    }

    fn apply_audio(&self, slot: Slot, audio: AudioSettings) {
        self.record(Call::Audio(slot, audio));
    }

    fn set_visible(&self, slot: Slot, visible: bool) {
        self.record(Call::Visible(slot, visible));
    }

    fn release(&self, slot: Slot) {
        self.record(Call::Release(slot));
        self.mounted.lock().unwrap()[slot.idx()] = None;
    }

    fn apply_fit_mode(&self, fit: FitMode) {
        self.record(Call::Fit(fit));
    }
}

pub struct FakeGrid {
    pub script: Arc<Script>,
    dims: Mutex<(usize, usize)>,
    surfaces: Mutex<Vec<Arc<FakeSurface>>>,
    retired: Mutex<Vec<Arc<FakeSurface>>>,
    generation: Mutex<usize>,
}

impl FakeGrid {
    pub fn new(rows: usize, cols: usize) -> Arc<Self> {
        let grid = Arc::new(Self {
            script: Arc::new(Script::default()),
            dims: Mutex::new((0, 0)),
            surfaces: Mutex::new(Vec::new()),
            retired: Mutex::new(Vec::new()),
            generation: Mutex::new(0),
        });
        grid.reset(rows, cols);
        grid
    }

    pub fn surface(&self, index: usize) -> Arc<FakeSurface> {
        self.surfaces.lock().unwrap()[index].clone()
    }

    pub fn retired(&self) -> Vec<Arc<FakeSurface>> {
        self.retired.lock().unwrap().clone()
    }
}

impl GridTopology for FakeGrid {
    fn cell_count(&self) -> usize {
        self.surfaces.lock().unwrap().len()
    }

    fn render_surface(&self, index: usize) -> Option<Arc<dyn RenderSurface>> {
        self.surfaces
            .lock()
            .unwrap()
            .get(index)
            .cloned()
            .map(|s| s as Arc<dyn RenderSurface>)
    }

    fn reset(&self, rows: usize, cols: usize) {
        let mut generation = self.generation.lock().unwrap();
        *generation += 1;
        let fresh: Vec<Arc<FakeSurface>> = (0..rows * cols)
            .map(|i| Arc::new(FakeSurface::new(i, *generation, self.script.clone())))
            .collect();
        let old = std::mem::replace(&mut *self.surfaces.lock().unwrap(), fresh);
        self.retired.lock().unwrap().extend(old);
        *self.dims.lock().unwrap() = (rows, cols);
    }

    fn dimensions(&self) -> (usize, usize) {
        *self.dims.lock().unwrap()
    }
}
