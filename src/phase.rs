// SPDX-License-Identifier: Apache-2.0

//! Phase delay capture between two zero-crossing signals.
//!
//! A rising edge on the reference input (voltage zero-crossing) restarts the capture timer, and
//! the next rising edge on the delayed input (current zero-crossing) latches its count into a
//! [`PhaseDelayHistory`]. Both handlers run at interrupt priority and only capture, store and
//! advance.
//!
//! The history is read by the foreground without a lock. Each entry is a separate atomic, so a
//! reader racing the delayed-edge handler sees every entry either before or after the write and
//! the average stays between the old and new values. It corrects itself on the next read. A lock
//! here would let the main loop stall an edge handler and skew the following measurements.

use core::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

/// Free-running counter used to time the delay between the two edges
pub trait CaptureTimer {
    /// Set the count back to zero
    fn reset(&mut self);
    /// Start counting
    fn enable(&mut self);
    /// Stop counting, freezing the current count
    fn disable(&mut self);
    /// Current count, in capture ticks
    fn count(&self) -> u32;
}

/// Initial value of one history entry
#[allow(clippy::declare_interior_mutable_const)]
const EMPTY_DELAY: AtomicU32 = AtomicU32::new(0);

/// Ring of the last `N` phase delays, in capture ticks.
///
/// Written only by the delayed-edge handler. Entries are never cleared: once the cursor wraps,
/// older delays stay in place until overwritten.
pub struct PhaseDelayHistory<const N: usize> {
    /// Delay samples
    samples: [AtomicU32; N],
    /// Next entry to write, always in `0..N`
    cursor: AtomicUsize,
}

impl<const N: usize> PhaseDelayHistory<N> {
    /// Rejects an empty history, which could not be averaged
    const NOT_EMPTY: () = assert!(N > 0, "phase delay history needs at least one entry");

    /// Creates a zeroed history, usable in a `static`
    #[allow(clippy::let_unit_value)]
    pub const fn new() -> Self {
        let () = Self::NOT_EMPTY;
        Self {
            samples: [EMPTY_DELAY; N],
            cursor: AtomicUsize::new(0),
        }
    }

    /// Store a delay at the cursor and advance it, wrapping to 0 once the history is full.
    ///
    /// Single-writer: call only from the delayed-edge handler.
    pub fn record(&self, delay: u32) {
        let cursor = self.cursor.load(Ordering::Relaxed);
        self.samples[cursor].store(delay, Ordering::Relaxed);
        self.cursor.store((cursor + 1) % N, Ordering::Relaxed);
    }

    /// Position the next delay will be written to
    pub fn cursor(&self) -> usize {
        self.cursor.load(Ordering::Relaxed)
    }

    /// Delay stored at `index`
    pub fn get(&self, index: usize) -> u32 {
        self.samples[index % N].load(Ordering::Relaxed)
    }

    /// Mean of all `N` entries in ticks, whether or not they were refreshed since the last wrap
    pub fn average(&self) -> f32 {
        let sum: u64 = self
            .samples
            .iter()
            .map(|sample| u64::from(sample.load(Ordering::Relaxed)))
            .sum();
        sum as f32 / N as f32
    }
}

impl<const N: usize> Default for PhaseDelayHistory<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Where the capture engine is within an electrical cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CaptureState {
    /// Waiting for a reference edge
    Idle,
    /// Timer running since the last reference edge
    Timing,
}

/// Interrupt-side state machine timing reference-to-delayed edge delays.
pub struct PhaseCapture<'h, T, const N: usize> {
    /// Runs from the reference edge to the delayed edge
    timer: T,
    /// Position within the current cycle
    state: CaptureState,
    /// Destination of every completed measurement
    history: &'h PhaseDelayHistory<N>,
    /// Measurements abandoned because the reference edge fired again first
    discarded: u32,
    /// Delayed edges seen without a preceding reference edge
    stray: u32,
}

impl<'h, T: CaptureTimer, const N: usize> PhaseCapture<'h, T, N> {
    /// Wrap `timer`, recording into `history`. The timer is stopped until the first reference edge.
    pub fn new(mut timer: T, history: &'h PhaseDelayHistory<N>) -> Self {
        timer.disable();
        timer.reset();
        Self {
            timer,
            state: CaptureState::Idle,
            history,
            discarded: 0,
            stray: 0,
        }
    }

    /// Reference edge handler: restart the timer.
    ///
    /// A measurement still in flight is dropped; each cycle stands on its own. Returns `true` when
    /// that happened.
    pub fn on_reference_edge(&mut self) -> bool {
        let dropped = self.state == CaptureState::Timing;
        if dropped {
            self.discarded = self.discarded.wrapping_add(1);
        }
        self.timer.reset();
        self.timer.enable();
        self.state = CaptureState::Timing;
        dropped
    }

    /// Delayed edge handler: latch the delay into the history and stop the timer.
    ///
    /// Returns the recorded delay, or `None` if no reference edge armed the timer.
    pub fn on_delayed_edge(&mut self) -> Option<u32> {
        if self.state == CaptureState::Idle {
            self.stray = self.stray.wrapping_add(1);
            return None;
        }

        let delay = self.timer.count();
        self.history.record(delay);
        self.timer.disable();
        self.state = CaptureState::Idle;

        #[cfg(feature = "trace_phase_samples")]
        trace!("Phase delay {} ticks, next slot {}", delay, self.history.cursor());

        Some(delay)
    }

    /// Current state
    pub fn state(&self) -> CaptureState {
        self.state
    }

    /// Measurements dropped because a reference edge re-armed the timer
    pub fn discarded(&self) -> u32 {
        self.discarded
    }

    /// Delayed edges ignored while idle
    pub fn stray_edges(&self) -> u32 {
        self.stray
    }
}
