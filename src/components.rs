// SPDX-License-Identifier: Apache-2.0

//! Actuation: LED brightness driven by the measured current
use embedded_hal::pwm::SetDutyCycle;

use crate::{
    config::{CURRENT_MAX, CURRENT_MIN},
    measurement::MeasurementEngine,
};

/// PWM duty in tenths of a percent, always within `0..=1000`
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DutyCycle(
    /// Tenths of a percent
    u16,
);

impl DutyCycle {
    /// Full scale, 100.0 %
    pub const MAX: u16 = 1000;
    /// LED off
    pub const OFF: Self = Self(0);
    /// Full brightness
    pub const FULL: Self = Self(Self::MAX);

    /// Clamp `raw` into `0..=1000`
    pub const fn new(raw: u16) -> Self {
        if raw > Self::MAX {
            Self::FULL
        } else {
            Self(raw)
        }
    }

    /// Duty in tenths of a percent
    pub const fn get(self) -> u16 {
        self.0
    }

    /// Three-region map from current to brightness.
    ///
    /// - below [`CURRENT_MIN`]: off
    /// - [`CURRENT_MIN`] to [`CURRENT_MAX`] inclusive: linear ramp, truncated
    /// - above [`CURRENT_MAX`]: full
    ///
    /// No memory of the previous duty and no hysteresis.
    pub fn from_current(current: f32) -> Self {
        if current.is_nan() || current < CURRENT_MIN {
            Self::OFF
        } else if current <= CURRENT_MAX {
            let ramp = (current - CURRENT_MIN) * Self::MAX as f32 / (CURRENT_MAX - CURRENT_MIN);
            Self::new(ramp as u16)
        } else {
            Self::FULL
        }
    }
}

/// LED whose brightness follows the load current
pub struct IntensityLed<P> {
    /// Channel driving the LED
    pwm: P,
    /// Last duty the channel accepted
    duty: DutyCycle,
}

impl<P: SetDutyCycle> IntensityLed<P> {
    /// Take ownership of the PWM channel and switch the LED off
    pub fn new(pwm: P) -> Self {
        let mut led = Self {
            pwm,
            duty: DutyCycle::OFF,
        };
        led.set_duty_cycle(0);
        led
    }

    /// Clamp `duty` to `0..=1000` and program the compare value. Never fails; a rejected update
    /// is logged and the previous duty stays in effect on the hardware.
    pub fn set_duty_cycle(&mut self, duty: u16) -> DutyCycle {
        let duty = DutyCycle::new(duty);
        match self.pwm.set_duty_cycle_fraction(duty.get(), DutyCycle::MAX) {
            Ok(()) => self.duty = duty,
            Err(_) => warn!("PWM rejected duty cycle {}", duty.get()),
        }
        duty
    }

    /// Set brightness from the current measured by `engine`
    pub fn adjust_intensity<const SPC: usize, const N: usize>(
        &mut self,
        engine: &MeasurementEngine<'_, SPC, N>,
    ) -> DutyCycle {
        self.adjust_to_current(engine.current())
    }

    /// Set brightness for a current in amperes
    pub fn adjust_to_current(&mut self, current: f32) -> DutyCycle {
        let duty = DutyCycle::from_current(current);
        self.set_duty_cycle(duty.get())
    }

    /// Last duty accepted by the hardware
    pub fn duty(&self) -> DutyCycle {
        self.duty
    }
}
