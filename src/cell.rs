use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

use crate::media::MediaDescriptor;
use crate::surface::Slot;

/// A transition lock older than this is presumed hung and force-cleared.
pub const STALE_LOCK_THRESHOLD: Duration = Duration::from_millis(5000);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CellPhase {
    Empty,
    Preloading,
    Transitioning,
    Steady,
}

/// Proof of holding a cell's transition lock. Release is keyed by ticket so a
/// late release from a superseded rotation cannot free a newer holder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockTicket(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockAttempt {
    Acquired(LockTicket),
    /// The previous holder exceeded the staleness threshold and was evicted.
    Reclaimed { ticket: LockTicket, held_for: Duration },
    Busy,
}

#[derive(Debug, Default)]
pub struct TransitionLock {
    holder: Option<(LockTicket, Instant)>,
    issued: u64,
}

impl TransitionLock {
    pub fn try_acquire(&mut self, now: Instant, stale_after: Duration) -> LockAttempt {
        let reclaimed = match self.holder {
            Some((_, since)) => {
                let held_for = now.saturating_duration_since(since);
                if held_for <= stale_after {
                    return LockAttempt::Busy;
                }
                Some(held_for)
            }
            None => None,
        };

        self.issued += 1;
        let ticket = LockTicket(self.issued);
        self.holder = Some((ticket, now));
        match reclaimed {
            Some(held_for) => LockAttempt::Reclaimed { ticket, held_for },
            None => LockAttempt::Acquired(ticket),
        }
    }

    /// Returns false if `ticket` no longer owns the lock (already released or
    /// evicted as stale).
    pub fn release(&mut self, ticket: LockTicket) -> bool {
        match self.holder {
            Some((held, _)) if held == ticket => {
                self.holder = None;
                true
            }
            _ => false,
        }
    }

    pub fn holds(&self, ticket: LockTicket) -> bool {
        matches!(self.holder, Some((held, _)) if held == ticket)
    }

    pub fn is_held(&self) -> bool {
        self.holder.is_some()
    }

    pub fn held_since(&self) -> Option<Instant> {
        self.holder.map(|(_, since)| since)
    }
}

#[derive(Debug)]
struct CellState {
    slots: [Option<Arc<MediaDescriptor>>; 2],
    visible: Option<Slot>,
    current: Option<Arc<MediaDescriptor>>,
    phase: CellPhase,
    lock: TransitionLock,
    rotations: u64,
    failures: u64,
}

impl CellState {
    fn settled_phase(&self) -> CellPhase {
        if self.current.is_some() {
            CellPhase::Steady
        } else {
            CellPhase::Empty
        }
    }
}

/// Point-in-time copy of a cell, for status reporting.
#[derive(Debug, Clone, Serialize)]
pub struct CellSnapshot {
    pub index: usize,
    pub phase: CellPhase,
    pub visible_slot: Option<Slot>,
    pub busy: bool,
    pub url: Option<String>,
    pub title: Option<String>,
    pub rotations: u64,
    pub failures: u64,
}

/// One grid position with its double buffer.
///
/// State sits behind a plain mutex that is never held across an `.await`.
#[derive(Debug)]
pub struct Cell {
    index: usize,
    state: Mutex<CellState>,
}

impl Cell {
    pub fn new(index: usize) -> Self {
        Self {
            index,
            state: Mutex::new(CellState {
                slots: [None, None],
                visible: None,
                current: None,
                phase: CellPhase::Empty,
                lock: TransitionLock::default(),
                rotations: 0,
                failures: 0,
            }),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    fn state(&self) -> MutexGuard<'_, CellState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn try_lock(&self, now: Instant, stale_after: Duration) -> LockAttempt {
        self.state().lock.try_acquire(now, stale_after)
    }

    pub fn release(&self, ticket: LockTicket) -> bool {
        self.state().lock.release(ticket)
    }

    pub fn holds(&self, ticket: LockTicket) -> bool {
        self.state().lock.holds(ticket)
    }

    pub fn is_locked(&self) -> bool {
        self.state().lock.is_held()
    }

    pub fn lock_held_since(&self) -> Option<Instant> {
        self.state().lock.held_since()
    }

    pub fn phase(&self) -> CellPhase {
        self.state().phase
    }

    pub fn set_phase(&self, phase: CellPhase) {
        self.state().phase = phase;
    }

    pub fn visible_slot(&self) -> Option<Slot> {
        self.state().visible
    }

    /// The slot the next element goes into: the hidden one, or `A` before
    /// the first population.
    pub fn staging_slot(&self) -> Slot {
        self.state().visible.map(Slot::other).unwrap_or(Slot::A)
    }

    pub fn slot_content(&self, slot: Slot) -> Option<Arc<MediaDescriptor>> {
        self.state().slots[slot.idx()].clone()
    }

    pub fn stage(&self, slot: Slot, descriptor: Arc<MediaDescriptor>) {
        self.state().slots[slot.idx()] = Some(descriptor);
    }

    /// Makes `slot` the visible one and returns the slot it replaced.
    pub fn flip_to(&self, slot: Slot) -> Option<Slot> {
        let mut state = self.state();
        let previous = state.visible.filter(|&v| v != slot);
        state.visible = Some(slot);
        previous
    }

    pub fn clear_slot(&self, slot: Slot) {
        self.state().slots[slot.idx()] = None;
    }

    pub fn commit(&self, descriptor: Arc<MediaDescriptor>) {
        let mut state = self.state();
        state.current = Some(descriptor);
        state.phase = CellPhase::Steady;
        state.rotations += 1;
    }

    pub fn record_failure(&self) {
        self.state().failures += 1;
    }

    pub fn current_descriptor(&self) -> Option<Arc<MediaDescriptor>> {
        self.state().current.clone()
    }

    /// Releases `ticket` and, if the rotation it belonged to never committed,
    /// puts the phase back to whatever the retained content implies.
    fn finish(&self, ticket: LockTicket) -> bool {
        let mut state = self.state();
        if !state.lock.release(ticket) {
            return false;
        }
        if matches!(state.phase, CellPhase::Preloading | CellPhase::Transitioning) {
            state.phase = state.settled_phase();
        }
        true
    }

    pub fn snapshot(&self) -> CellSnapshot {
        let state = self.state();
        CellSnapshot {
            index: self.index,
            phase: state.phase,
            visible_slot: state.visible,
            busy: state.lock.is_held(),
            url: state.current.as_ref().map(|d| d.url.clone()),
            title: state.current.as_ref().and_then(|d| d.title.clone()),
            rotations: state.rotations,
            failures: state.failures,
        }
    }
}

/// Holds a cell's transition lock for the lifetime of one rotation.
///
/// Dropping the guard always releases, including on early return, error,
/// panic or cancellation of the owning future.
pub struct TransitionGuard<'a> {
    cell: &'a Cell,
    ticket: LockTicket,
}

impl<'a> TransitionGuard<'a> {
    pub fn new(cell: &'a Cell, ticket: LockTicket) -> Self {
        Self { cell, ticket }
    }

    pub fn ticket(&self) -> LockTicket {
        self.ticket
    }

    /// False once a newer rotation has evicted this one as stale.
    pub fn still_held(&self) -> bool {
        self.cell.holds(self.ticket)
    }
}

impl Drop for TransitionGuard<'_> {
    fn drop(&mut self) {
        self.cell.finish(self.ticket);
    }
}
