use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant as StdInstant};
use tokio::sync::{broadcast, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info};

use crate::cell::{Cell, CellSnapshot};
use crate::error::{GalleryError, Result};
use crate::media::{FitMode, MediaDescriptor, RestrictedMode};
use crate::media_queue::MediaQueue;
use crate::scheduler::{FireFn, RotationScheduler, StaggerMode};
use crate::surface::{AudioSettings, GridTopology, RenderSurface, Slot};
use crate::transition::{Presentation, RotationOutcome, TransitionEngine, TransitionTimings};

/// Delay between consecutive cells when shuffling the whole grid.
pub const SHUFFLE_STAGGER: Duration = Duration::from_millis(50);

#[derive(Debug, Clone)]
pub struct GalleryOptions {
    pub interval: Duration,
    pub fit: FitMode,
    pub restricted: RestrictedMode,
    pub audio: AudioSettings,
    pub stagger: StaggerMode,
    pub timings: TransitionTimings,
}

impl Default for GalleryOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            fit: FitMode::default(),
            restricted: RestrictedMode::default(),
            audio: AudioSettings::default(),
            stagger: StaggerMode::default(),
            timings: TransitionTimings::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum GalleryCommand {
    Start,
    Stop,
    Pause,
    Resume,
    TogglePause,
    Shuffle,
    LoadMedia { items: Vec<MediaDescriptor> },
    SetInterval { interval: Duration },
    SetFitMode { fit: FitMode },
    SetRestrictedMode { mode: RestrictedMode },
    SetGrid { rows: usize, cols: usize },
    SetVolume { volume: u8 },
    SetMuted { muted: bool },
}

#[derive(Debug, Clone, Serialize)]
pub struct GalleryStatus {
    pub running: bool,
    pub paused: bool,
    pub rows: usize,
    pub columns: usize,
    pub cell_count: usize,
    pub media_count: usize,
    pub interval_ms: u64,
    pub fit_mode: FitMode,
    pub restricted_mode: RestrictedMode,
    pub audio: AudioSettings,
    pub active_timers: usize,
    pub next_rotation_secs: Option<u64>,
    pub uptime_secs: u64,
    pub cells: Vec<CellSnapshot>,
}

#[derive(Debug, Clone, Copy)]
struct Settings {
    fit: FitMode,
    audio: AudioSettings,
    restricted: RestrictedMode,
}

/// State shared between the facade, timer callbacks and rotation tasks.
struct Shared {
    topology: Arc<dyn GridTopology>,
    engine: TransitionEngine,
    queue: Mutex<MediaQueue>,
    cells: RwLock<Vec<Arc<Cell>>>,
    settings: RwLock<Settings>,
}

impl Shared {
    /// Draws the next item and rotates cell `index` to it.
    ///
    /// `None` when the cell no longer exists or nothing is loaded. The surface
    /// is looked up under the cells lock so a rotation never pairs a cell from
    /// one topology with a surface from another.
    async fn rotate_cell(self: Arc<Self>, index: usize) -> Option<RotationOutcome> {
        let (cell, surface) = {
            let cells = self.cells.read().await;
            let cell = cells.get(index).cloned()?;
            let surface = self.topology.render_surface(index)?;
            (cell, surface)
        };
        let descriptor = self.queue.lock().await.next()?;
        let presentation = self.presentation().await;
        let outcome = self.engine.rotate(&cell, surface.as_ref(), descriptor, presentation).await;
        if let RotationOutcome::Failed(reason) = &outcome {
            debug!(cell = index, %reason, "rotation failed, previous content kept");
        }
        Some(outcome)
    }

    async fn presentation(&self) -> Presentation {
        let settings = self.settings.read().await;
        Presentation {
            fit: settings.fit,
            audio: settings.audio,
            restricted: settings.restricted,
        }
    }

    fn spawn_rotation(self: &Arc<Self>, index: usize) -> JoinHandle<Option<RotationOutcome>> {
        tokio::spawn(self.clone().rotate_cell(index))
    }

    fn fire_fn(self: &Arc<Self>) -> FireFn {
        let shared = Arc::downgrade(self);
        Arc::new(move |index| {
            if let Some(shared) = shared.upgrade() {
                shared.spawn_rotation(index);
            }
        })
    }

    /// Resets the topology and replaces every cell under the cells write
    /// lock. Rotations still running against the old cells finish on retired
    /// surfaces, so a fresh cell never shares a surface with one.
    async fn rebuild(&self, rows: usize, cols: usize) -> usize {
        let mut cells = self.cells.write().await;
        self.topology.reset(rows, cols);
        let count = self.topology.cell_count();
        *cells = (0..count).map(|i| Arc::new(Cell::new(i))).collect();
        count
    }

    async fn populate_all(self: &Arc<Self>) -> Vec<JoinHandle<Option<RotationOutcome>>> {
        let count = self.cells.read().await.len();
        (0..count).map(|i| self.spawn_rotation(i)).collect()
    }
}

/// The rotating media grid.
///
/// Cheap to clone; clones drive the same grid.
#[derive(Clone)]
pub struct Gallery {
    shared: Arc<Shared>,
    scheduler: Arc<Mutex<RotationScheduler>>,
    started_at: StdInstant,
}

impl Gallery {
    pub fn new(topology: Arc<dyn GridTopology>, options: GalleryOptions) -> Self {
        let count = topology.cell_count();
        let shared = Arc::new(Shared {
            topology,
            engine: TransitionEngine::new(options.timings),
            queue: Mutex::new(MediaQueue::new()),
            cells: RwLock::new((0..count).map(|i| Arc::new(Cell::new(i))).collect()),
            settings: RwLock::new(Settings {
                fit: options.fit,
                audio: options.audio,
                restricted: options.restricted,
            }),
        });
        Self {
            shared,
            scheduler: Arc::new(Mutex::new(RotationScheduler::new(options.interval, options.stagger))),
            started_at: StdInstant::now(),
        }
    }

    /// Replaces the media set.
    ///
    /// The grid is rebuilt at its current shape and the queue reshuffled. A
    /// running grid restarts in full; an empty set stops it. Returns how many
    /// items were accepted.
    pub async fn set_images(&self, items: Vec<MediaDescriptor>) -> usize {
        let restricted = self.shared.settings.read().await.restricted;
        let mut seen = HashSet::new();
        let accepted: Vec<Arc<MediaDescriptor>> = items
            .into_iter()
            .filter(|d| !(d.restricted && restricted == RestrictedMode::Block))
            .filter(|d| seen.insert(d.url.clone()))
            .map(Arc::new)
            .collect();
        let count = accepted.len();

        let mut scheduler = self.scheduler.lock().await;
        let was_running = scheduler.is_running();
        if was_running {
            scheduler.reset(0);
        }

        self.shared.queue.lock().await.load(accepted);
        let (rows, cols) = self.shared.topology.dimensions();
        let cells = self.shared.rebuild(rows, cols).await;
        info!(media = count, cells, "media set loaded");

        if was_running {
            if count == 0 {
                scheduler.stop();
                info!("media set is empty, rotation stopped");
            } else {
                self.shared.populate_all().await;
                scheduler.reset(cells);
            }
        }
        count
    }

    /// Populates every cell once and starts the per-cell timers.
    pub async fn start(&self) -> Result<()> {
        if self.shared.queue.lock().await.is_empty() {
            return Err(GalleryError::NoMedia);
        }
        let mut scheduler = self.scheduler.lock().await;
        self.shared.populate_all().await;
        let cells = self.shared.cells.read().await.len();
        scheduler.start(cells, self.shared.fire_fn());
        info!(cells, interval = ?scheduler.base_period(), "rotation started");
        Ok(())
    }

    pub async fn stop(&self) {
        self.scheduler.lock().await.stop();
        info!("rotation stopped");
    }

    pub async fn pause(&self) {
        self.scheduler.lock().await.pause();
        info!("rotation paused");
    }

    pub async fn resume(&self) {
        self.scheduler.lock().await.resume();
        info!("rotation resumed");
    }

    /// Returns true when the grid is paused afterwards.
    pub async fn toggle_pause(&self) -> bool {
        let mut scheduler = self.scheduler.lock().await;
        if scheduler.is_paused() {
            scheduler.resume();
        } else {
            scheduler.pause();
        }
        scheduler.is_paused()
    }

    pub async fn set_interval(&self, interval: Duration) -> Result<()> {
        if interval.is_zero() {
            return Err(GalleryError::InvalidConfig("rotation interval must be positive".into()));
        }
        self.scheduler.lock().await.set_period(interval);
        info!(?interval, "rotation interval updated");
        Ok(())
    }

    /// Applies `fit` to what is on screen now and to every later mount.
    pub async fn set_fit_mode(&self, fit: FitMode) {
        self.shared.settings.write().await.fit = fit;
        for surface in self.surfaces().await {
            surface.apply_fit_mode(fit);
        }
        info!(%fit, "fit mode updated");
    }

    /// Takes effect on the next `set_images`.
    pub async fn set_restricted_mode(&self, mode: RestrictedMode) {
        self.shared.settings.write().await.restricted = mode;
    }

    pub async fn set_volume(&self, volume: u8) {
        let audio = {
            let mut settings = self.shared.settings.write().await;
            settings.audio = AudioSettings::new(volume, settings.audio.muted);
            settings.audio
        };
        self.apply_audio(audio).await;
    }

    pub async fn set_muted(&self, muted: bool) {
        let audio = {
            let mut settings = self.shared.settings.write().await;
            settings.audio.muted = muted;
            settings.audio
        };
        self.apply_audio(audio).await;
    }

    async fn apply_audio(&self, audio: AudioSettings) {
        for surface in self.surfaces().await {
            for slot in Slot::BOTH {
                surface.apply_audio(slot, audio);
            }
        }
        debug!(volume = audio.volume, muted = audio.muted, "audio applied");
    }

    /// Reshuffles the queue and rotates every cell once, `SHUFFLE_STAGGER`
    /// apart, outside the regular timers.
    pub async fn shuffle_all(&self) -> Vec<JoinHandle<Option<RotationOutcome>>> {
        {
            let mut queue = self.shared.queue.lock().await;
            if queue.is_empty() {
                return Vec::new();
            }
            queue.reshuffle();
        }
        let count = self.shared.cells.read().await.len();
        (0..count)
            .map(|index| {
                let shared = self.shared.clone();
                tokio::spawn(async move {
                    sleep(SHUFFLE_STAGGER * index as u32).await;
                    shared.rotate_cell(index).await
                })
            })
            .collect()
    }

    /// Hard reset for a new grid shape: timers dropped, topology and cells
    /// rebuilt, every cell repopulated, timers restarted.
    pub async fn on_topology_change(&self, rows: usize, cols: usize) {
        let mut scheduler = self.scheduler.lock().await;
        scheduler.reset(0);

        let count = self.shared.rebuild(rows, cols).await;
        info!(rows, cols, cells = count, "grid rebuilt");

        if scheduler.is_running() {
            self.shared.populate_all().await;
        }
        scheduler.reset(count);
    }

    /// Rotates one cell immediately, outside the timers.
    pub async fn rotate_now(&self, index: usize) -> Option<RotationOutcome> {
        self.shared.clone().rotate_cell(index).await
    }

    pub async fn handle_command(&self, command: GalleryCommand) -> Result<()> {
        debug!(?command, "handling command");
        match command {
            GalleryCommand::Start => self.start().await?,
            GalleryCommand::Stop => self.stop().await,
            GalleryCommand::Pause => self.pause().await,
            GalleryCommand::Resume => self.resume().await,
            GalleryCommand::TogglePause => {
                let paused = self.toggle_pause().await;
                info!(paused, "pause toggled");
            }
            GalleryCommand::Shuffle => {
                self.shuffle_all().await;
            }
            GalleryCommand::LoadMedia { items } => {
                let running = self.is_running().await;
                let accepted = self.set_images(items).await;
                if !running && accepted > 0 {
                    self.start().await?;
                }
            }
            GalleryCommand::SetInterval { interval } => self.set_interval(interval).await?,
            GalleryCommand::SetFitMode { fit } => self.set_fit_mode(fit).await,
            GalleryCommand::SetRestrictedMode { mode } => self.set_restricted_mode(mode).await,
            GalleryCommand::SetGrid { rows, cols } => self.on_topology_change(rows, cols).await,
            GalleryCommand::SetVolume { volume } => self.set_volume(volume).await,
            GalleryCommand::SetMuted { muted } => self.set_muted(muted).await,
        }
        Ok(())
    }

    /// Applies commands until every sender is gone.
    pub async fn run_command_handler(&self, mut receiver: broadcast::Receiver<GalleryCommand>) {
        loop {
            match receiver.recv().await {
                Ok(command) => {
                    if let Err(e) = self.handle_command(command).await {
                        error!("error handling command: {}", e);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    error!(missed, "command handler lagged, commands dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    pub async fn is_running(&self) -> bool {
        self.scheduler.lock().await.is_running()
    }

    pub async fn is_paused(&self) -> bool {
        self.scheduler.lock().await.is_paused()
    }

    pub async fn cell_count(&self) -> usize {
        self.shared.cells.read().await.len()
    }

    pub async fn cell_snapshot(&self, index: usize) -> Option<CellSnapshot> {
        self.shared.cells.read().await.get(index).map(|c| c.snapshot())
    }

    pub async fn current_descriptor(&self, index: usize) -> Option<Arc<MediaDescriptor>> {
        self.shared.cells.read().await.get(index)?.current_descriptor()
    }

    pub async fn media(&self) -> Vec<Arc<MediaDescriptor>> {
        self.shared.queue.lock().await.items().to_vec()
    }

    /// Whole-second "next rotation" indicator.
    pub async fn countdown(&self) -> watch::Receiver<Option<u64>> {
        self.scheduler.lock().await.countdown()
    }

    pub async fn status(&self) -> GalleryStatus {
        let (running, paused, interval, active_timers, next) = {
            let scheduler = self.scheduler.lock().await;
            (
                scheduler.is_running(),
                scheduler.is_paused(),
                scheduler.base_period(),
                scheduler.active_timers(),
                scheduler.next_rotation_in(),
            )
        };
        let settings = *self.shared.settings.read().await;
        let media_count = self.shared.queue.lock().await.len();
        let cells: Vec<CellSnapshot> = self.shared.cells.read().await.iter().map(|c| c.snapshot()).collect();
        let (rows, columns) = self.shared.topology.dimensions();

        GalleryStatus {
            running,
            paused,
            rows,
            columns,
            cell_count: cells.len(),
            media_count,
            interval_ms: interval.as_millis() as u64,
            fit_mode: settings.fit,
            restricted_mode: settings.restricted,
            audio: settings.audio,
            active_timers,
            next_rotation_secs: next.map(|d| d.as_secs_f64().round() as u64),
            uptime_secs: self.started_at.elapsed().as_secs(),
            cells,
        }
    }

    async fn surfaces(&self) -> Vec<Arc<dyn RenderSurface>> {
        let count = self.shared.cells.read().await.len();
        (0..count).filter_map(|i| self.shared.topology.render_surface(i)).collect()
    }
}
