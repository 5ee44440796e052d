// SPDX-License-Identifier: Apache-2.0

//! Build-time configuration of the meter.
//!
//! Channel assignment, physical full-scale values, buffer sizes and timer ticks are fixed when
//! the firmware is built; nothing here is parsed at runtime.

/// Number of channels scanned by the ADC (voltage, then current)
pub const CHANNEL_COUNT: usize = 2;

/// Conversions kept per channel in the [`SampleBuffer`](crate::buffer::SampleBuffer)
pub const SAMPLES_PER_CHANNEL: usize = 10;

/// Largest code a 12-bit unipolar converter can produce
pub const ADC_MAX_CODE: u16 = 4095;

/// Full-scale code used as the divisor when scaling averages to physical units.
///
/// The scaling is `average * FULL_SCALE / 4096`, so a raw average of 4095 lands one LSB below
/// the physical maximum.
pub const ADC_FULL_SCALE_COUNT: f32 = 4096.0;

/// Voltage, in volts, represented by [`ADC_FULL_SCALE_COUNT`] on the voltage channel
pub const FULL_SCALE_VOLTAGE: f32 = 230.0;

/// Current, in amperes, represented by [`ADC_FULL_SCALE_COUNT`] on the current channel
pub const FULL_SCALE_CURRENT: f32 = 10.0;

/// Phase delay samples averaged together
pub const PHASE_HISTORY_LEN: usize = 10;

/// Length of one capture timer tick in microseconds (0.1 ms)
pub const CAPTURE_TICK_US: u32 = 100;

/// Capture timer ticks per millisecond
pub const MS_CONVERSION_FACTOR: f32 = 1000.0 / CAPTURE_TICK_US as f32;

/// Half period of 50 Hz mains in milliseconds. A phase delay of this length is a 180° shift.
pub const HALF_PERIOD_MS: f32 = 10.0;

/// Below this current (A) the LED is off
pub const CURRENT_MIN: f32 = 7.0;

/// At or above this current (A) the LED is at full brightness
pub const CURRENT_MAX: f32 = 10.0;

/// Number of ready-flag polls allowed for ADC self-calibration before giving up
pub const CALIBRATION_POLL_LIMIT: u32 = 1_000_000;

/// Delay between two orchestrator cycles
pub const REFRESH_PERIOD_MS: u32 = 500;

/// Character display geometry: rows
pub const DISPLAY_ROWS: u8 = 4;

/// Character display geometry: columns
pub const DISPLAY_COLUMNS: u8 = 16;

/// 7-bit I2C address of the PCF8574 expander driving the display
pub const DISPLAY_I2C_ADDRESS: u8 = 0x27;
