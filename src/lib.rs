//! This [RP2040](https://docs.rs/rp2040-hal) project measures a single-phase AC load: it averages
//! voltage and current conversions streamed in by DMA, times the delay between the voltage and
//! current zero-crossings, shows the results on a 16x4 character LCD and drives an LED whose
//! brightness follows the load current.
//!
//! The library is hardware-agnostic. The converter, capture timer, PWM channel and display are
//! reached through [`buffer::AnalogFrontEnd`], [`phase::CaptureTimer`],
//! [`embedded_hal::pwm::SetDutyCycle`] and [`display::LineDisplay`]; the RP2040 bindings live in
//! the binary crate.
//!
//! ## Crate features
//!
//! - `defmt`: Sends library log messages to [defmt](https://docs.rs/defmt) instead of the
//!   [`log`] facade.
//! - `rp-pico`: Builds the Raspberry Pi Pico firmware. Implies `defmt`.
//! - `trace_samples`: Logs the raw average of each channel every time it is read. See
//!   [`buffer::SampleBuffer::read_channel_average`].
//! - `trace_phase_samples`: Logs every captured phase delay. Very noisy! See
//!   [`phase::PhaseCapture::on_delayed_edge`].
//!
//! ## Demo
//!
//! The following is a condensed version of the binary crate. The converter, capture timer, PWM
//! channel and I2C bus are assumed to be set up already.
//!
//! ```no_run
//! use ac_power_meter::{
//!     buffer::{Acquisition, AnalogFrontEnd},
//!     components::IntensityLed,
//!     config::DISPLAY_I2C_ADDRESS,
//!     cycle::MeterCycle,
//!     display::Hd44780,
//!     interrupt::{IsrCell, PHASE_HISTORY, SAMPLES},
//!     measurement::MeasurementEngine,
//!     phase::{CaptureTimer, PhaseCapture},
//! };
//! use embedded_hal::{delay::DelayNs, i2c::I2c, pwm::SetDutyCycle};
//!
//! type Capture<T> = PhaseCapture<'static, T, { ac_power_meter::config::PHASE_HISTORY_LEN }>;
//!
//! fn run<F, T, P, B, D>(
//!     mut front_end: F,
//!     capture_slot: &'static IsrCell<Capture<T>>,
//!     timer: T,
//!     pwm: P,
//!     i2c: B,
//!     lcd_delay: D,
//!     mut delay: impl DelayNs,
//! ) -> !
//! where
//!     F: AnalogFrontEnd<{ ac_power_meter::config::SAMPLES_PER_CHANNEL }>,
//!     T: CaptureTimer,
//!     P: SetDutyCycle,
//!     B: I2c,
//!     D: DelayNs,
//! {
//!     let acquisition = Acquisition::initialize(&mut front_end, &SAMPLES)
//!         .ok()
//!         .unwrap();
//!     // Edge interrupts call `on_reference_edge` / `on_delayed_edge` through this cell
//!     capture_slot.install(PhaseCapture::new(timer, &PHASE_HISTORY));
//!
//!     let mut lcd = Hd44780::new(i2c, lcd_delay, DISPLAY_I2C_ADDRESS);
//!     lcd.init().ok();
//!
//!     let engine = MeasurementEngine::new(acquisition.buffer(), &PHASE_HISTORY);
//!     MeterCycle::new(engine, lcd, IntensityLed::new(pwm)).run(&mut delay)
//! }
//! ```

// Copyright 2024 Cameron Rodriguez
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![no_std]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg), feature(doc_auto_cfg), feature(doc_cfg_hide))]

// Must come first so the logging macros are visible to every module below
mod fmt;

pub mod buffer;
pub mod components;
pub mod config;
pub mod cycle;
pub mod display;
pub mod interrupt;
pub mod measurement;
pub mod phase;
