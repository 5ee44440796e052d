// SPDX-License-Identifier: Apache-2.0

//! State shared between interrupt handlers and the foreground loop, plus [`IsrCell`].
//!
//! The sample buffer and phase history are lock-free and handed to both contexts as `&'static`
//! references. Hardware that belongs to one interrupt handler is parked in an [`IsrCell`] by the
//! foreground before the interrupt is unmasked.

use core::cell::RefCell;

use critical_section::Mutex;

use crate::{
    buffer::SampleBuffer,
    config::{PHASE_HISTORY_LEN, SAMPLES_PER_CHANNEL},
    phase::PhaseDelayHistory,
};

/// Conversions published by the ADC transfer engine
pub static SAMPLES: SampleBuffer<SAMPLES_PER_CHANNEL> = SampleBuffer::new();

/// Phase delays recorded by the delayed-edge handler
pub static PHASE_HISTORY: PhaseDelayHistory<PHASE_HISTORY_LEN> = PhaseDelayHistory::new();

/// Critical-section guarded slot holding a resource owned by an interrupt handler
pub struct IsrCell<T>(
    /// Empty until [`install`](Self::install)
    Mutex<RefCell<Option<T>>>,
);

impl<T> IsrCell<T> {
    /// Empty cell, usable in a `static`
    pub const fn new() -> Self {
        Self(Mutex::new(RefCell::new(None)))
    }

    /// Store `value`, returning whatever was installed before
    pub fn install(&self, value: T) -> Option<T> {
        critical_section::with(|cs| self.0.replace(cs, Some(value)))
    }

    /// Remove and return the contents
    pub fn take(&self) -> Option<T> {
        critical_section::with(|cs| self.0.take(cs))
    }

    /// Run `f` on the contents inside a critical section. `None` if nothing is installed.
    pub fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        critical_section::with(|cs| self.0.borrow_ref_mut(cs).as_mut().map(f))
    }

    /// `true` once something has been installed
    pub fn is_installed(&self) -> bool {
        critical_section::with(|cs| self.0.borrow_ref(cs).is_some())
    }
}

impl<T> Default for IsrCell<T> {
    fn default() -> Self {
        Self::new()
    }
}
