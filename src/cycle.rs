// SPDX-License-Identifier: Apache-2.0

//! Foreground loop: measure, show, actuate, sleep.

use embedded_hal::{delay::DelayNs, pwm::SetDutyCycle};

use crate::{
    components::{DutyCycle, IntensityLed},
    config::REFRESH_PERIOD_MS,
    display::{render_lines, LineDisplay},
    measurement::{MeasuredQuantities, MeasurementEngine},
};

/// Outcome of one pass through the loop
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CycleRecord {
    /// Readings shown on the display
    pub readings: MeasuredQuantities,
    /// Duty requested from the LED
    pub duty: DutyCycle,
    /// Display rows that could not be written
    pub failed_rows: u8,
}

/// Everything the foreground owns once initialisation is over
pub struct MeterCycle<'a, D, P, const SPC: usize, const N: usize> {
    /// Source of every reading
    engine: MeasurementEngine<'a, SPC, N>,
    /// Where the readings are shown
    display: D,
    /// Brightness follows the current
    led: IntensityLed<P>,
}

impl<'a, D, P, const SPC: usize, const N: usize> MeterCycle<'a, D, P, SPC, N>
where
    D: LineDisplay,
    P: SetDutyCycle,
{
    /// Assemble the loop from its parts
    pub fn new(engine: MeasurementEngine<'a, SPC, N>, display: D, led: IntensityLed<P>) -> Self {
        Self {
            engine,
            display,
            led,
        }
    }

    /// Take one set of readings, refresh every display row, then update the LED.
    ///
    /// A failed row is logged and skipped so the LED keeps tracking the current.
    pub fn run_once(&mut self) -> CycleRecord {
        let readings = self.engine.snapshot();

        let mut failed_rows = 0;
        for (row, text) in (0u8..).zip(render_lines(&readings).iter()) {
            if self.display.write_line(row, 0, text).is_err() {
                warn!("Display row {} not updated", row);
                failed_rows += 1;
            }
        }

        let duty = self.led.adjust_to_current(readings.current);
        info!(
            "V={} I={} P={} delay={}ms pf={} duty={}",
            readings.voltage,
            readings.current,
            readings.power,
            readings.phase_delay_ms,
            readings.power_factor,
            duty.get()
        );

        CycleRecord {
            readings,
            duty,
            failed_rows,
        }
    }

    /// Run forever, pausing [`REFRESH_PERIOD_MS`] between passes
    pub fn run<T: DelayNs>(&mut self, delay: &mut T) -> ! {
        loop {
            self.run_once();
            delay.delay_ms(REFRESH_PERIOD_MS);
        }
    }

    /// Measurement engine in use
    pub fn engine(&self) -> &MeasurementEngine<'a, SPC, N> {
        &self.engine
    }

    /// Display in use
    pub fn display(&self) -> &D {
        &self.display
    }

    /// LED in use
    pub fn led(&self) -> &IntensityLed<P> {
        &self.led
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use core::convert::Infallible;
    use std::boxed::Box;
    use std::string::{String, ToString};
    use std::vec::Vec;

    use embedded_hal::pwm::ErrorType;

    use super::*;
    use crate::{
        buffer::SampleBuffer,
        config::{PHASE_HISTORY_LEN, SAMPLES_PER_CHANNEL},
        phase::PhaseDelayHistory,
    };

    #[derive(Default)]
    struct FakeDisplay {
        rows: Vec<(u8, u8, String)>,
        broken_row: Option<u8>,
    }

    impl LineDisplay for FakeDisplay {
        type Error = ();

        fn write_line(&mut self, row: u8, col: u8, text: &str) -> Result<(), Self::Error> {
            if self.broken_row == Some(row) {
                return Err(());
            }
            self.rows.push((row, col, text.to_string()));
            Ok(())
        }
    }

    struct FakePwm(Vec<u16>);

    impl ErrorType for FakePwm {
        type Error = Infallible;
    }

    impl SetDutyCycle for FakePwm {
        fn max_duty_cycle(&self) -> u16 {
            1000
        }

        fn set_duty_cycle(&mut self, duty: u16) -> Result<(), Self::Error> {
            self.0.push(duty);
            Ok(())
        }
    }

    type Cycle = MeterCycle<'static, FakeDisplay, FakePwm, SAMPLES_PER_CHANNEL, PHASE_HISTORY_LEN>;

    fn cycle(voltage_raw: u16, current_raw: u16, delay_ticks: u32, display: FakeDisplay) -> Cycle {
        let samples: &'static SampleBuffer<SAMPLES_PER_CHANNEL> =
            Box::leak(Box::new(SampleBuffer::new()));
        let phase: &'static PhaseDelayHistory<PHASE_HISTORY_LEN> =
            Box::leak(Box::new(PhaseDelayHistory::new()));
        for _ in 0..SAMPLES_PER_CHANNEL {
            samples.push(voltage_raw);
            samples.push(current_raw);
        }
        for _ in 0..PHASE_HISTORY_LEN {
            phase.record(delay_ticks);
        }
        MeterCycle::new(
            MeasurementEngine::new(samples, phase),
            display,
            IntensityLed::new(FakePwm(Vec::new())),
        )
    }

    #[test]
    fn one_pass_updates_display_and_led() {
        let mut cycle = cycle(2048, 3482, 25, FakeDisplay::default());
        let record = cycle.run_once();

        assert_eq!(record.failed_rows, 0);
        let rows: Vec<_> = cycle
            .display()
            .rows
            .iter()
            .map(|(row, col, _)| (*row, *col))
            .collect();
        assert_eq!(rows, [(0, 0), (1, 0), (2, 0), (3, 0)]);
        assert_eq!(cycle.display().rows[0].2, "Volt: 115.0 V");
        assert_eq!(cycle.display().rows[3].2, "Phase: 2.5 ms");

        // 3482 codes is about 8.5 A, the middle of the ramp
        assert_eq!(record.duty, cycle.led().duty());
        assert!((495..=505).contains(&record.duty.get()));
    }

    #[test]
    fn duty_follows_displayed_current() {
        let mut cycle = cycle(2048, 3100, 0, FakeDisplay::default());
        let record = cycle.run_once();

        assert_eq!(record.duty, DutyCycle::from_current(record.readings.current));
        assert_eq!(cycle.led().duty(), record.duty);
    }

    #[test]
    fn display_failure_does_not_block_actuation() {
        let mut cycle = cycle(
            0,
            4095,
            0,
            FakeDisplay {
                broken_row: Some(1),
                ..Default::default()
            },
        );
        let record = cycle.run_once();

        assert_eq!(record.failed_rows, 1);
        assert_eq!(cycle.display().rows.len(), 3);
        assert_eq!(record.duty.get(), 999);
        assert_eq!(cycle.led().duty().get(), 999);
    }

    #[test]
    fn low_current_switches_led_off() {
        let mut cycle = cycle(2048, 100, 0, FakeDisplay::default());
        assert_eq!(cycle.run_once().duty, DutyCycle::OFF);
        assert_eq!(cycle.engine().phase_delay_ms(), 0.0);
    }
}
