// SPDX-License-Identifier: Apache-2.0

//! Conversion of raw acquisition data into physical quantities.

use core::f32::consts::PI;

use crate::{
    buffer::{Channel, SampleBuffer},
    config::{
        ADC_FULL_SCALE_COUNT, FULL_SCALE_CURRENT, FULL_SCALE_VOLTAGE, HALF_PERIOD_MS,
        MS_CONVERSION_FACTOR,
    },
    phase::PhaseDelayHistory,
};

/// One set of readings, recomputed every cycle
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MeasuredQuantities {
    /// Volts
    pub voltage: f32,
    /// Amperes
    pub current: f32,
    /// `voltage * current`, in watts
    pub power: f32,
    /// Mean delay between the voltage and current zero-crossings, in ms
    pub phase_delay_ms: f32,
    /// `cos φ` derived from the phase delay
    pub power_factor: f32,
}

/// Linear map from an averaged raw code to a physical value.
///
/// There is no offset term; the analog front-end is expected to be referenced to zero.
pub fn scale_raw(average: f32, full_scale: f32) -> f32 {
    average * (full_scale / ADC_FULL_SCALE_COUNT)
}

/// Stateless view computing quantities from the shared sample buffer and phase history.
pub struct MeasurementEngine<'a, const SPC: usize, const N: usize> {
    /// Voltage and current conversions
    samples: &'a SampleBuffer<SPC>,
    /// Recent phase delays
    phase: &'a PhaseDelayHistory<N>,
}

impl<'a, const SPC: usize, const N: usize> MeasurementEngine<'a, SPC, N> {
    /// Engine reading from `samples` and `phase`
    pub fn new(samples: &'a SampleBuffer<SPC>, phase: &'a PhaseDelayHistory<N>) -> Self {
        Self { samples, phase }
    }

    /// Averaged line voltage in volts
    pub fn voltage(&self) -> f32 {
        scale_raw(
            self.samples.read_channel_average(Channel::Voltage),
            FULL_SCALE_VOLTAGE,
        )
    }

    /// Averaged load current in amperes
    pub fn current(&self) -> f32 {
        scale_raw(
            self.samples.read_channel_average(Channel::Current),
            FULL_SCALE_CURRENT,
        )
    }

    /// Product of the averaged voltage and current.
    ///
    /// This is not real power: the averages are not RMS values and the phase delay is not applied.
    pub fn power(&self) -> f32 {
        self.voltage() * self.current()
    }

    /// Mean phase delay in capture ticks
    pub fn average_phase_delay(&self) -> f32 {
        self.phase.average()
    }

    /// Mean phase delay in milliseconds
    pub fn phase_delay_ms(&self) -> f32 {
        self.average_phase_delay() / MS_CONVERSION_FACTOR
    }

    /// `cos(π · delay / half period)`, reported next to [`power`](Self::power) but never folded
    /// into it
    pub fn power_factor(&self) -> f32 {
        libm::cosf(PI * self.phase_delay_ms() / HALF_PERIOD_MS)
    }

    /// Compute every quantity at once
    pub fn snapshot(&self) -> MeasuredQuantities {
        let voltage = self.voltage();
        let current = self.current();
        let phase_delay_ms = self.phase_delay_ms();
        MeasuredQuantities {
            voltage,
            current,
            power: voltage * current,
            phase_delay_ms,
            power_factor: libm::cosf(PI * phase_delay_ms / HALF_PERIOD_MS),
        }
    }
}
