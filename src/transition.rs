use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, warn};

use crate::cell::{Cell, CellPhase, LockAttempt, TransitionGuard, STALE_LOCK_THRESHOLD};
use crate::error::GalleryError;
use crate::media::{FitMode, MediaDescriptor, RestrictedMode};
use crate::surface::{AudioSettings, MountRequest, Overlay, RenderSurface, Slot};

/// Videos start somewhere in the first 90% of their running time.
const VIDEO_START_WINDOW: f64 = 0.9;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionTimings {
    pub preload_timeout: Duration,
    pub video_ready_timeout: Duration,
    pub crossfade: Duration,
    pub stale_lock: Duration,
}

impl Default for TransitionTimings {
    fn default() -> Self {
        Self {
            preload_timeout: Duration::from_millis(10_000),
            video_ready_timeout: Duration::from_millis(5_000),
            crossfade: Duration::from_millis(400),
            stale_lock: STALE_LOCK_THRESHOLD,
        }
    }
}

/// Display settings captured when a rotation starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Presentation {
    pub fit: FitMode,
    pub audio: AudioSettings,
    pub restricted: RestrictedMode,
}

impl Presentation {
    fn blur(&self, descriptor: &MediaDescriptor) -> bool {
        descriptor.restricted && self.restricted == RestrictedMode::Blur
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RotationOutcome {
    Completed { slot: Slot },
    /// Another rotation holds the cell's lock.
    Busy,
    /// Prior content was kept.
    Failed(String),
    /// A newer rotation reclaimed the lock while this one was suspended.
    Superseded,
}

impl RotationOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, RotationOutcome::Completed { .. })
    }
}

/// Runs single crossfade rotations against a cell and its surface.
#[derive(Debug, Clone, Default)]
pub struct TransitionEngine {
    timings: TransitionTimings,
}

impl TransitionEngine {
    pub fn new(timings: TransitionTimings) -> Self {
        Self { timings }
    }

    pub fn timings(&self) -> &TransitionTimings {
        &self.timings
    }

    /// Replaces the cell's content with `descriptor`.
    ///
    /// Never returns an error: every failure leaves the previous content on
    /// screen and is reported through the outcome.
    pub async fn rotate(
        &self,
        cell: &Cell,
        surface: &dyn RenderSurface,
        descriptor: Arc<MediaDescriptor>,
        presentation: Presentation,
    ) -> RotationOutcome {
        let ticket = match cell.try_lock(Instant::now(), self.timings.stale_lock) {
            LockAttempt::Acquired(ticket) => ticket,
            LockAttempt::Reclaimed { ticket, held_for } => {
                warn!(cell = cell.index(), ?held_for, "cleared stale transition lock");
                ticket
            }
            LockAttempt::Busy => {
                debug!(cell = cell.index(), "rotation skipped, transition in flight");
                return RotationOutcome::Busy;
            }
        };
        let guard = TransitionGuard::new(cell, ticket);
        let started = Instant::now();

        if !descriptor.is_video() {
            cell.set_phase(CellPhase::Preloading);
            let loaded = match timeout(self.timings.preload_timeout, surface.preload(&descriptor)).await {
                Ok(result) => result,
                Err(_) => Err(GalleryError::PreloadTimeout {
                    url: descriptor.url.clone(),
                    timeout: self.timings.preload_timeout,
                }),
            };
            if let Err(e) = loaded {
                warn!(cell = cell.index(), url = %descriptor.url, "preload failed: {}", e);
                cell.record_failure();
                return RotationOutcome::Failed(e.to_string());
            }
            if !guard.still_held() {
                debug!(cell = cell.index(), "preload finished after lock was reclaimed");
                return RotationOutcome::Superseded;
            }
        }

        let slot = cell.staging_slot();
        let request = MountRequest {
            descriptor: descriptor.clone(),
            fit: presentation.fit,
            blur: presentation.blur(&descriptor),
            overlay: Overlay::for_descriptor(&descriptor),
        };
        surface.mount(slot, &request);
        cell.stage(slot, descriptor.clone());

        if descriptor.is_video() {
            cell.set_phase(CellPhase::Preloading);
            if let Err(e) = self.start_video(cell, surface, slot, presentation.audio).await {
                warn!(cell = cell.index(), url = %descriptor.url, "video failed to load: {}", e);
                if guard.still_held() {
                    surface.release(slot);
                    cell.clear_slot(slot);
                }
                cell.record_failure();
                return RotationOutcome::Failed(e.to_string());
            }
            if !guard.still_held() {
                return RotationOutcome::Superseded;
            }
        }

        cell.set_phase(CellPhase::Transitioning);
        let replaced = cell.flip_to(slot);
        surface.set_visible(slot, true);
        if let Some(old) = replaced {
            surface.set_visible(old, false);
        }

        sleep(self.timings.crossfade).await;

        if !guard.still_held() {
            return RotationOutcome::Superseded;
        }
        if let Some(old) = replaced {
            surface.release(old);
            cell.clear_slot(old);
        }
        cell.commit(descriptor.clone());
        debug!(
            cell = cell.index(),
            slot = %slot,
            url = %descriptor.url,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "rotation complete"
        );
        RotationOutcome::Completed { slot }
    }

    /// Muted start, bounded readiness wait, random start position, then the
    /// real audio settings.
    ///
    /// Only a load error fails; a readiness timeout lets the element keep
    /// buffering in the background.
    async fn start_video(
        &self,
        cell: &Cell,
        surface: &dyn RenderSurface,
        slot: Slot,
        audio: AudioSettings,
    ) -> Result<(), GalleryError> {
        surface.play_muted(slot);
        match timeout(self.timings.video_ready_timeout, surface.wait_ready(slot)).await {
            Ok(result) => result?,
            Err(_) => debug!(
                cell = cell.index(),
                slot = %slot,
                "video not ready after {:?}, continuing",
                self.timings.video_ready_timeout
            ),
        }

        if let Some(duration) = surface.media_duration(slot) {
            surface.seek(slot, random_start(duration));
        }
        surface.apply_audio(slot, audio);
        Ok(())
    }
}

fn random_start(duration: Duration) -> Duration {
    duration.mul_f64(fastrand::f64() * VIDEO_START_WINDOW)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::GridTopology;
    use crate::testing::{Behavior, Call, FakeGrid};

    fn image(url: &str) -> Arc<MediaDescriptor> {
        Arc::new(MediaDescriptor::image(url))
    }

    #[tokio::test(start_paused = true)]
    async fn first_rotation_populates_slot_a() {
        let grid = FakeGrid::new(1, 1);
        let surface = grid.surface(0);
        let cell = Cell::new(0);
        let engine = TransitionEngine::default();

        let outcome = engine.rotate(&cell, surface.as_ref(), image("a"), Presentation::default()).await;
        assert_eq!(outcome, RotationOutcome::Completed { slot: Slot::A });
        assert_eq!(cell.visible_slot(), Some(Slot::A));
        assert_eq!(cell.phase(), CellPhase::Steady);
        assert!(!cell.is_locked());
        assert_eq!(
            surface.calls(),
            vec![
                Call::Preload("a".into()),
                Call::Mount(Slot::A, "a".into(), false),
                Call::Visible(Slot::A, true),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn second_rotation_crossfades_and_releases_old_slot() {
        let grid = FakeGrid::new(1, 1);
        let surface = grid.surface(0);
        let cell = Cell::new(0);
        let engine = TransitionEngine::default();

        engine.rotate(&cell, surface.as_ref(), image("a"), Presentation::default()).await;
        let outcome = engine.rotate(&cell, surface.as_ref(), image("b"), Presentation::default()).await;

        assert_eq!(outcome, RotationOutcome::Completed { slot: Slot::B });
        assert_eq!(cell.current_descriptor().unwrap().url, "b");
        assert!(cell.slot_content(Slot::A).is_none());
        let calls = surface.calls();
        assert!(calls.ends_with(&[
            Call::Visible(Slot::B, true),
            Call::Visible(Slot::A, false),
            Call::Release(Slot::A),
        ]));
    }

    #[tokio::test(start_paused = true)]
    async fn crossfade_takes_its_full_duration() {
        let grid = FakeGrid::new(1, 1);
        let cell = Cell::new(0);
        let engine = TransitionEngine::default();
        let before = Instant::now();
        engine.rotate(&cell, grid.surface(0).as_ref(), image("a"), Presentation::default()).await;
        assert!(before.elapsed() >= Duration::from_millis(400));
    }

    #[tokio::test(start_paused = true)]
    async fn preload_failure_keeps_previous_content() {
        let grid = FakeGrid::new(1, 1);
        grid.script.preload("broken", Behavior::Fail);
        let surface = grid.surface(0);
        let cell = Cell::new(0);
        let engine = TransitionEngine::default();

        engine.rotate(&cell, surface.as_ref(), image("a"), Presentation::default()).await;
        let outcome = engine.rotate(&cell, surface.as_ref(), image("broken"), Presentation::default()).await;

        assert!(matches!(outcome, RotationOutcome::Failed(_)));
        assert_eq!(cell.current_descriptor().unwrap().url, "a");
        assert_eq!(cell.visible_slot(), Some(Slot::A));
        assert_eq!(cell.phase(), CellPhase::Steady);
        assert!(!cell.is_locked());
        assert_eq!(cell.snapshot().failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn preload_times_out_after_ten_seconds() {
        let grid = FakeGrid::new(1, 1);
        grid.script.preload("slow", Behavior::Hang);
        let cell = Cell::new(0);
        let engine = TransitionEngine::default();

        let before = Instant::now();
        let outcome = engine.rotate(&cell, grid.surface(0).as_ref(), image("slow"), Presentation::default()).await;
        assert!(matches!(outcome, RotationOutcome::Failed(ref msg) if msg.contains("timed out")));
        assert!(before.elapsed() >= Duration::from_secs(10));
        assert!(cell.current_descriptor().is_none());
        assert_eq!(cell.phase(), CellPhase::Empty);
        assert!(!cell.is_locked());
    }

    #[tokio::test(start_paused = true)]
    async fn in_flight_rotation_is_never_preempted() {
        let grid = FakeGrid::new(1, 1);
        grid.script.preload("slow", Behavior::Delay(Duration::from_secs(2)));
        let surface = grid.surface(0);
        let cell = Arc::new(Cell::new(0));
        let engine = TransitionEngine::default();

        let first = {
            let (cell, surface, engine) = (cell.clone(), surface.clone(), engine.clone());
            tokio::spawn(async move {
                engine.rotate(&cell, surface.as_ref(), image("slow"), Presentation::default()).await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(cell.is_locked());

        let second = engine.rotate(&cell, surface.as_ref(), image("other"), Presentation::default()).await;
        assert_eq!(second, RotationOutcome::Busy);

        assert!(first.await.unwrap().is_completed());
        assert_eq!(cell.current_descriptor().unwrap().url, "slow");
    }

    #[tokio::test(start_paused = true)]
    async fn stale_lock_is_reclaimed_and_late_finisher_is_superseded() {
        let grid = FakeGrid::new(1, 1);
        grid.script.preload("stuck", Behavior::Delay(Duration::from_secs(8)));
        let surface = grid.surface(0);
        let cell = Arc::new(Cell::new(0));
        let engine = TransitionEngine::default();

        let stuck = {
            let (cell, surface, engine) = (cell.clone(), surface.clone(), engine.clone());
            tokio::spawn(async move {
                engine.rotate(&cell, surface.as_ref(), image("stuck"), Presentation::default()).await
            })
        };
        tokio::time::sleep(Duration::from_millis(5_100)).await;

        let fresh = engine.rotate(&cell, surface.as_ref(), image("fresh"), Presentation::default()).await;
        assert!(fresh.is_completed());

        assert_eq!(stuck.await.unwrap(), RotationOutcome::Superseded);
        assert_eq!(cell.current_descriptor().unwrap().url, "fresh");
        assert!(!cell.is_locked());
    }

    #[tokio::test(start_paused = true)]
    async fn video_starts_muted_then_gets_real_audio() {
        let grid = FakeGrid::new(1, 1);
        let surface = grid.surface(0);
        let cell = Cell::new(0);
        let engine = TransitionEngine::default();
        let presentation = Presentation {
            audio: AudioSettings::new(70, false),
            ..Presentation::default()
        };

        let clip = Arc::new(MediaDescriptor::video("clip.mp4"));
        assert!(engine.rotate(&cell, surface.as_ref(), clip, presentation).await.is_completed());

        let calls = surface.calls();
        assert!(!calls.iter().any(|c| matches!(c, Call::Preload(_))));
        let muted = calls.iter().position(|c| *c == Call::PlayMuted(Slot::A)).unwrap();
        let audio = calls
            .iter()
            .position(|c| *c == Call::Audio(Slot::A, AudioSettings::new(70, false)))
            .unwrap();
        assert!(muted < audio);
        let seek = calls.iter().find_map(|c| match c {
            Call::Seek(_, pos) => Some(*pos),
            _ => None,
        });
        assert!(seek.unwrap() <= Duration::from_secs(90));
    }

    #[tokio::test(start_paused = true)]
    async fn late_video_proceeds_after_ready_timeout() {
        let grid = FakeGrid::new(1, 1);
        grid.script.ready("late.mp4", Behavior::Hang);
        let cell = Cell::new(0);
        let engine = TransitionEngine::default();

        let before = Instant::now();
        let clip = Arc::new(MediaDescriptor::video("late.mp4"));
        let outcome = engine.rotate(&cell, grid.surface(0).as_ref(), clip, Presentation::default()).await;
        assert!(outcome.is_completed());
        assert!(before.elapsed() >= Duration::from_secs(5));
        assert_eq!(cell.current_descriptor().unwrap().url, "late.mp4");
    }

    #[tokio::test(start_paused = true)]
    async fn unavailable_video_keeps_previous_content() {
        let grid = FakeGrid::new(1, 1);
        grid.script.ready("gone.mp4", Behavior::Fail);
        let surface = grid.surface(0);
        let cell = Cell::new(0);
        let engine = TransitionEngine::default();

        engine.rotate(&cell, surface.as_ref(), image("a"), Presentation::default()).await;
        let clip = Arc::new(MediaDescriptor::video("gone.mp4"));
        let outcome = engine.rotate(&cell, surface.as_ref(), clip, Presentation::default()).await;

        assert!(matches!(outcome, RotationOutcome::Failed(_)));
        assert_eq!(cell.current_descriptor().unwrap().url, "a");
        assert_eq!(cell.visible_slot(), Some(Slot::A));
        assert!(surface.mounted(Slot::B).is_none());
        assert!(!cell.is_locked());
    }

    #[tokio::test(start_paused = true)]
    async fn restricted_items_blur_only_in_blur_mode() {
        let grid = FakeGrid::new(1, 1);
        let surface = grid.surface(0);
        let cell = Cell::new(0);
        let engine = TransitionEngine::default();
        let spicy = Arc::new(MediaDescriptor::image("spicy").with_restricted(true));

        let blur = Presentation {
            restricted: RestrictedMode::Blur,
            ..Presentation::default()
        };
        engine.rotate(&cell, surface.as_ref(), spicy.clone(), blur).await;
        let show = Presentation {
            restricted: RestrictedMode::Show,
            ..Presentation::default()
        };
        engine.rotate(&cell, surface.as_ref(), spicy, show).await;

        let mounts: Vec<bool> = surface
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Mount(_, _, blur) => Some(blur),
                _ => None,
            })
            .collect();
        assert_eq!(mounts, vec![true, false]);
        assert_eq!(grid.cell_count(), 1);
    }
}
