use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::debug;

/// Each cycle's period is the base period scaled by a factor drawn from
/// `[PERIOD_JITTER_MIN, PERIOD_JITTER_MAX)`.
pub const PERIOD_JITTER_MIN: f64 = 0.85;
pub const PERIOD_JITTER_MAX: f64 = 1.15;

/// Called with the cell index whenever that cell's timer fires.
pub type FireFn = Arc<dyn Fn(usize) + Send + Sync>;

/// How first-fire offsets are spread over the first half of the base period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StaggerMode {
    /// `base/2 * i / n`: no two cells share a phase.
    #[default]
    Even,
    /// Uniform in `[0, base/2)` per cell.
    Random,
}

impl StaggerMode {
    pub fn offset(self, base: Duration, index: usize, count: usize) -> Duration {
        let window = base / 2;
        match self {
            StaggerMode::Even if count > 0 => window.mul_f64(index as f64 / count as f64),
            StaggerMode::Even => Duration::ZERO,
            StaggerMode::Random => window.mul_f64(fastrand::f64()),
        }
    }
}

pub fn jittered_period(base: Duration) -> Duration {
    base.mul_f64(PERIOD_JITTER_MIN + fastrand::f64() * (PERIOD_JITTER_MAX - PERIOD_JITTER_MIN))
}

#[derive(Debug, Default)]
struct Cycle {
    active_period: Option<Duration>,
    deadline: Option<Instant>,
}

/// One cell's recurring timer. Dropping it cancels the timer task.
pub struct RotationTimer {
    cell: usize,
    base_period: Duration,
    phase_offset: Duration,
    cycle: Arc<Mutex<Cycle>>,
    handle: JoinHandle<()>,
}

impl RotationTimer {
    fn spawn(
        cell: usize,
        base_period: Duration,
        phase_offset: Duration,
        on_fire: FireFn,
        countdown: Arc<watch::Sender<Option<u64>>>,
    ) -> Self {
        let cycle = Arc::new(Mutex::new(Cycle::default()));
        let task_cycle = cycle.clone();
        let handle = tokio::spawn(async move {
            sleep(phase_offset).await;
            loop {
                let period = jittered_period(base_period);
                {
                    let mut c = task_cycle.lock().unwrap_or_else(PoisonError::into_inner);
                    c.active_period = Some(period);
                    c.deadline = Some(Instant::now() + period);
                }
                countdown.send_replace(Some(period.as_secs_f64().round() as u64));
                sleep(period).await;
                on_fire(cell);
            }
        });

        Self {
            cell,
            base_period,
            phase_offset,
            cycle,
            handle,
        }
    }

    pub fn cell(&self) -> usize {
        self.cell
    }

    pub fn base_period(&self) -> Duration {
        self.base_period
    }

    pub fn phase_offset(&self) -> Duration {
        self.phase_offset
    }

    /// Period of the cycle in progress; `None` while still in the phase offset.
    pub fn active_period(&self) -> Option<Duration> {
        self.cycle.lock().unwrap_or_else(PoisonError::into_inner).active_period
    }

    pub fn next_fire(&self) -> Option<Instant> {
        self.cycle.lock().unwrap_or_else(PoisonError::into_inner).deadline
    }

    pub fn is_live(&self) -> bool {
        !self.handle.is_finished()
    }
}

impl Drop for RotationTimer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Owns one [`RotationTimer`] per cell.
///
/// Pausing discards phase: `resume` derives a fresh stagger from the current
/// moment instead of continuing mid-period.
pub struct RotationScheduler {
    base_period: Duration,
    stagger: StaggerMode,
    cell_count: usize,
    on_fire: Option<FireFn>,
    timers: Vec<RotationTimer>,
    running: bool,
    paused: bool,
    countdown: Arc<watch::Sender<Option<u64>>>,
}

impl RotationScheduler {
    pub fn new(base_period: Duration, stagger: StaggerMode) -> Self {
        let (countdown, _) = watch::channel(None);
        Self {
            base_period,
            stagger,
            cell_count: 0,
            on_fire: None,
            timers: Vec::new(),
            running: false,
            paused: false,
            countdown: Arc::new(countdown),
        }
    }

    pub fn start(&mut self, cell_count: usize, on_fire: FireFn) {
        self.cancel_timers();
        self.cell_count = cell_count;
        self.on_fire = Some(on_fire);
        self.running = true;
        self.paused = false;
        self.spawn_timers();
    }

    pub fn pause(&mut self) {
        if !self.running {
            return;
        }
        self.paused = true;
        self.cancel_timers();
    }

    pub fn resume(&mut self) {
        if !self.running || !self.paused {
            return;
        }
        self.paused = false;
        self.spawn_timers();
    }

    pub fn stop(&mut self) {
        self.running = false;
        self.paused = false;
        self.cancel_timers();
        self.countdown.send_replace(None);
    }

    pub fn set_period(&mut self, base_period: Duration) {
        self.base_period = base_period;
        if self.running && !self.paused {
            self.cancel_timers();
            self.spawn_timers();
        }
    }

    pub fn set_stagger(&mut self, stagger: StaggerMode) {
        self.stagger = stagger;
    }

    /// Drops every timer and, unless stopped or paused, starts a fresh set
    /// for `cell_count` cells.
    pub fn reset(&mut self, cell_count: usize) {
        self.cancel_timers();
        self.cell_count = cell_count;
        if self.running && !self.paused {
            self.spawn_timers();
        }
    }

    pub fn base_period(&self) -> Duration {
        self.base_period
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn active_timers(&self) -> usize {
        self.timers.iter().filter(|t| t.is_live()).count()
    }

    pub fn timers(&self) -> &[RotationTimer] {
        &self.timers
    }

    /// Shortest wait until any cell's next scheduled fire.
    pub fn next_rotation_in(&self) -> Option<Duration> {
        let now = Instant::now();
        self.timers
            .iter()
            .filter_map(RotationTimer::next_fire)
            .map(|deadline| deadline.saturating_duration_since(now))
            .min()
    }

    /// Whole-second period of the most recently started cycle; `None` once
    /// stopped.
    pub fn countdown(&self) -> watch::Receiver<Option<u64>> {
        self.countdown.subscribe()
    }

    fn spawn_timers(&mut self) {
        let Some(on_fire) = self.on_fire.clone() else {
            return;
        };
        let count = self.cell_count;
        self.timers = (0..count)
            .map(|cell| {
                let offset = self.stagger.offset(self.base_period, cell, count);
                RotationTimer::spawn(cell, self.base_period, offset, on_fire.clone(), self.countdown.clone())
            })
            .collect();
        debug!(timers = count, base_period = ?self.base_period, "rotation timers started");
    }

    fn cancel_timers(&mut self) {
        if !self.timers.is_empty() {
            debug!(timers = self.timers.len(), "rotation timers cancelled");
        }
        self.timers.clear();
    }
}

impl Drop for RotationScheduler {
    fn drop(&mut self) {
        self.cancel_timers();
    }
}
