//! Concurrency gate and segment state machine.
//!
//! The gate is the sole coordination primitive for segment lifecycle
//! transitions. It combines an atomic state cell with in-flight read/write
//! counters, giving maintenance operations exclusive access without taking a
//! lock on the hot read/write path.
//!
//! ## Transition table
//!
//! ```text
//! READY ──try_enter_freeze──► FREEZE ──enter_maintenance_running──► MAINTENANCE_RUNNING
//!   ▲                           │  ▲                                        │
//!   └──finish_freeze_to_ready───┘  └────────finish_maintenance_to_freeze───┘
//!
//! READY ──close──► CLOSED                 (terminal)
//! any state except CLOSED ──fail──► ERROR (terminal)
//! ```
//!
//! Only the transition methods mutate the state cell; there is no raw state
//! setter, so the table above is the single source of truth.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

/// Lifecycle state of a whole segment, not of a single request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentState {
    /// Serving reads and writes.
    Ready,
    /// Draining in-flight operations ahead of a maintenance window.
    Freeze,
    /// A maintenance operation holds the segment; reads and writes against
    /// the new active tier are still admitted.
    MaintenanceRunning,
    /// Permanently retired by an orderly close.
    Closed,
    /// Permanently retired by a failed maintenance operation.
    Error,
}

const READY: u8 = 0;
const FREEZE: u8 = 1;
const MAINTENANCE_RUNNING: u8 = 2;
const CLOSED: u8 = 3;
const ERROR: u8 = 4;

/// Spins before falling back to cooperative yielding while draining.
const DRAIN_SPIN_LIMIT: u32 = 128;

fn decode(raw: u8) -> SegmentState {
    match raw {
        READY => SegmentState::Ready,
        FREEZE => SegmentState::Freeze,
        MAINTENANCE_RUNNING => SegmentState::MaintenanceRunning,
        CLOSED => SegmentState::Closed,
        _ => SegmentState::Error,
    }
}

/// Atomic state machine plus in-flight operation counters.
#[derive(Debug)]
pub struct Gate {
    state: AtomicU8,
    readers: AtomicU64,
    writers: AtomicU64,
}

impl Default for Gate {
    fn default() -> Self {
        Self::new()
    }
}

impl Gate {
    /// Creates a gate in the READY state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(READY),
            readers: AtomicU64::new(0),
            writers: AtomicU64::new(0),
        }
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> SegmentState {
        decode(self.state.load(Ordering::SeqCst))
    }

    fn admits(raw: u8) -> bool {
        raw == READY || raw == MAINTENANCE_RUNNING
    }

    /// Tries to admit a read.
    ///
    /// On success the in-flight reader count is incremented and the caller
    /// must pair this with [`Gate::exit_read`]. On failure the state that
    /// refused admission is returned.
    pub fn try_enter_read(&self) -> Result<(), SegmentState> {
        self.try_enter(&self.readers)
    }

    /// Exits a read admitted by [`Gate::try_enter_read`].
    pub fn exit_read(&self) {
        self.readers.fetch_sub(1, Ordering::SeqCst);
    }

    /// Tries to admit a write. See [`Gate::try_enter_read`].
    pub fn try_enter_write(&self) -> Result<(), SegmentState> {
        self.try_enter(&self.writers)
    }

    /// Exits a write admitted by [`Gate::try_enter_write`].
    pub fn exit_write(&self) {
        self.writers.fetch_sub(1, Ordering::SeqCst);
    }

    /// Increment-then-recheck admission. If the state changes to disallow
    /// admission between the check and the increment, the counter is rolled
    /// back and admission fails, closing the race window without a lock.
    fn try_enter(&self, counter: &AtomicU64) -> Result<(), SegmentState> {
        let before = self.state.load(Ordering::SeqCst);
        if !Self::admits(before) {
            return Err(decode(before));
        }
        counter.fetch_add(1, Ordering::SeqCst);
        let after = self.state.load(Ordering::SeqCst);
        if Self::admits(after) {
            Ok(())
        } else {
            counter.fetch_sub(1, Ordering::SeqCst);
            Err(decode(after))
        }
    }

    /// Attempts the READY → FREEZE transition.
    ///
    /// Succeeds only from READY.
    pub fn try_enter_freeze(&self) -> bool {
        self.state
            .compare_exchange(READY, FREEZE, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Attempts READY → FREEZE, then waits until all in-flight reads and
    /// writes have drained.
    ///
    /// Admission is refused once FREEZE is entered, so the in-flight count is
    /// monotonically non-increasing during the wait and the drain always
    /// terminates. If the state is externally forced off FREEZE mid-wait
    /// (close or fail racing in), drainage aborts and `false` is returned.
    pub fn try_enter_freeze_and_drain(&self) -> bool {
        if !self.try_enter_freeze() {
            return false;
        }

        let mut spins = 0u32;
        loop {
            if self.state.load(Ordering::SeqCst) != FREEZE {
                return false;
            }
            if self.readers.load(Ordering::SeqCst) == 0
                && self.writers.load(Ordering::SeqCst) == 0
            {
                return true;
            }
            if spins < DRAIN_SPIN_LIMIT {
                spins += 1;
                std::hint::spin_loop();
            } else {
                std::thread::yield_now();
            }
        }
    }

    /// Attempts the FREEZE → MAINTENANCE_RUNNING transition.
    pub fn enter_maintenance_running(&self) -> bool {
        self.state
            .compare_exchange(
                FREEZE,
                MAINTENANCE_RUNNING,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    /// Attempts the MAINTENANCE_RUNNING → FREEZE transition.
    pub fn finish_maintenance_to_freeze(&self) -> bool {
        self.state
            .compare_exchange(
                MAINTENANCE_RUNNING,
                FREEZE,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    /// Attempts the FREEZE → READY transition.
    pub fn finish_freeze_to_ready(&self) -> bool {
        self.state
            .compare_exchange(FREEZE, READY, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Attempts the READY → CLOSED transition.
    pub fn close(&self) -> bool {
        self.state
            .compare_exchange(READY, CLOSED, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Forces the terminal ERROR state from any state except CLOSED.
    ///
    /// CLOSED takes precedence over ERROR: a segment that was concurrently
    /// closed stays closed.
    pub fn fail(&self) {
        let mut current = self.state.load(Ordering::SeqCst);
        while current != CLOSED && current != ERROR {
            match self.state.compare_exchange(
                current,
                ERROR,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => {
                    tracing::warn!("segment gate entered error state");
                    return;
                }
                Err(observed) => current = observed,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn starts_ready() {
        assert_eq!(Gate::new().state(), SegmentState::Ready);
    }

    #[test]
    fn read_write_admission_in_ready() {
        let gate = Gate::new();
        gate.try_enter_read().unwrap();
        gate.try_enter_write().unwrap();
        gate.exit_read();
        gate.exit_write();
    }

    #[test]
    fn freeze_refuses_admission() {
        let gate = Gate::new();
        assert!(gate.try_enter_freeze());

        assert_eq!(gate.try_enter_read(), Err(SegmentState::Freeze));
        assert_eq!(gate.try_enter_write(), Err(SegmentState::Freeze));
    }

    #[test]
    fn maintenance_running_admits() {
        let gate = Gate::new();
        assert!(gate.try_enter_freeze());
        assert!(gate.enter_maintenance_running());

        gate.try_enter_read().unwrap();
        gate.exit_read();
        gate.try_enter_write().unwrap();
        gate.exit_write();
    }

    #[test]
    fn full_maintenance_cycle() {
        let gate = Gate::new();
        assert!(gate.try_enter_freeze_and_drain());
        assert!(gate.enter_maintenance_running());
        assert!(gate.finish_maintenance_to_freeze());
        assert!(gate.finish_freeze_to_ready());
        assert_eq!(gate.state(), SegmentState::Ready);
    }

    #[test]
    fn freeze_only_from_ready() {
        let gate = Gate::new();
        assert!(gate.try_enter_freeze());
        assert!(!gate.try_enter_freeze());
    }

    #[test]
    fn close_is_terminal() {
        let gate = Gate::new();
        assert!(gate.close());
        assert_eq!(gate.state(), SegmentState::Closed);

        assert!(!gate.try_enter_freeze());
        assert_eq!(gate.try_enter_read(), Err(SegmentState::Closed));
    }

    #[test]
    fn closed_wins_over_fail() {
        let gate = Gate::new();
        assert!(gate.close());
        gate.fail();
        assert_eq!(gate.state(), SegmentState::Closed);
    }

    #[test]
    fn fail_from_any_other_state() {
        let gate = Gate::new();
        assert!(gate.try_enter_freeze());
        gate.fail();
        assert_eq!(gate.state(), SegmentState::Error);
    }

    #[test]
    fn drain_waits_for_readers() {
        let gate = Arc::new(Gate::new());
        gate.try_enter_read().unwrap();

        let g = Arc::clone(&gate);
        let drainer = thread::spawn(move || g.try_enter_freeze_and_drain());

        // Let the drainer start spinning, then release the reader.
        thread::sleep(std::time::Duration::from_millis(20));
        gate.exit_read();

        assert!(drainer.join().unwrap());
        assert_eq!(gate.state(), SegmentState::Freeze);
    }

    #[test]
    fn drain_aborts_when_forced_off_freeze() {
        let gate = Arc::new(Gate::new());
        gate.try_enter_read().unwrap();

        let g = Arc::clone(&gate);
        let drainer = thread::spawn(move || g.try_enter_freeze_and_drain());

        thread::sleep(std::time::Duration::from_millis(20));
        gate.fail();
        gate.exit_read();

        assert!(!drainer.join().unwrap());
        assert_eq!(gate.state(), SegmentState::Error);
    }

    #[test]
    fn concurrent_admission_counts_balance() {
        let gate = Arc::new(Gate::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let g = Arc::clone(&gate);
            handles.push(thread::spawn(move || {
                for _ in 0..1000 {
                    if g.try_enter_read().is_ok() {
                        g.exit_read();
                    }
                    if g.try_enter_write().is_ok() {
                        g.exit_write();
                    }
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert!(gate.try_enter_freeze_and_drain());
    }
}
