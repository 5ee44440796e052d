// SPDX-License-Identifier: Apache-2.0

//! Continuous two-channel acquisition into a circular [`SampleBuffer`].

use core::sync::atomic::{AtomicU16, AtomicUsize, Ordering};

use cortex_m::singleton;

use crate::config::{ADC_MAX_CODE, CALIBRATION_POLL_LIMIT, CHANNEL_COUNT, SAMPLES_PER_CHANNEL};

/// Length of one DMA block covering every slot of the default buffer
pub const TRANSFER_BLOCK_LEN: usize = SAMPLES_PER_CHANNEL * CHANNEL_COUNT;

/// Analog inputs scanned by the converter.
///
/// The set of channels is fixed at build time, so an out-of-range channel cannot be named.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Channel {
    /// Line voltage sense, ADC input 0
    Voltage = 0,
    /// Load current sense, ADC input 1
    Current = 1,
}

impl Channel {
    /// Scan order of the converter. Position in this array is the interleaving offset.
    pub const SCAN: [Channel; CHANNEL_COUNT] = [Channel::Voltage, Channel::Current];

    /// Offset of this channel inside one interleaved scan
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Converter input number the channel is wired to
    pub const fn adc_input(self) -> u8 {
        match self {
            Channel::Voltage => 0,
            Channel::Current => 1,
        }
    }
}

/// Initial value of one slot
#[allow(clippy::declare_interior_mutable_const)]
const EMPTY_SLOT: AtomicU16 = AtomicU16::new(0);
/// Initial value of one scan
#[allow(clippy::declare_interior_mutable_const)]
const EMPTY_SCAN: [AtomicU16; CHANNEL_COUNT] = [EMPTY_SLOT; CHANNEL_COUNT];

/// Interleaved ring of raw conversions, `SPC` per channel.
///
/// Slot `channel + i * CHANNEL_COUNT` holds the `i`-th conversion of `channel`. Slots are written
/// only by the transfer engine ([`push`](Self::push) / [`publish`](Self::publish)) and read by the
/// foreground. Every slot is an individual atomic, so a reader never sees half a conversion.
pub struct SampleBuffer<const SPC: usize> {
    /// Scans laid out in memory order, one row per scan
    slots: [[AtomicU16; CHANNEL_COUNT]; SPC],
    /// Next slot written by [`push`](Self::push)
    head: AtomicUsize,
}

impl<const SPC: usize> SampleBuffer<SPC> {
    /// Total number of slots
    pub const LEN: usize = SPC * CHANNEL_COUNT;

    /// Rejects buffer sizes whose channel sum could overflow the `u32` accumulator
    const ACCUMULATOR_FITS: () = assert!(
        SPC > 0 && SPC as u64 * ADC_MAX_CODE as u64 <= u32::MAX as u64,
        "samples per channel must be non-zero and small enough to sum in a u32"
    );

    /// Creates a zeroed buffer, usable in a `static`
    #[allow(clippy::let_unit_value)]
    pub const fn new() -> Self {
        let () = Self::ACCUMULATOR_FITS;
        Self {
            slots: [EMPTY_SCAN; SPC],
            head: AtomicUsize::new(0),
        }
    }

    /// Number of slots, `SPC * CHANNEL_COUNT`
    pub const fn len(&self) -> usize {
        Self::LEN
    }

    /// Always `false`; a buffer has at least one scan
    pub const fn is_empty(&self) -> bool {
        false
    }

    /// Store one conversion at the head and advance it, wrapping to slot 0 after the last slot.
    ///
    /// Must only be called from the single transfer context. Codes above [`ADC_MAX_CODE`] are
    /// saturated.
    pub fn push(&self, raw: u16) {
        let head = self.head.load(Ordering::Relaxed);
        self.write_slot(head, raw);
        self.head.store((head + 1) % Self::LEN, Ordering::Relaxed);
    }

    /// Store a block of conversions starting at slot 0, as delivered by a completed DMA transfer.
    ///
    /// Extra conversions past the end of the buffer are ignored. The head is left after the last
    /// stored slot.
    pub fn publish(&self, block: &[u16]) {
        let count = block.len().min(Self::LEN);
        for (index, raw) in block.iter().take(count).enumerate() {
            self.write_slot(index, *raw);
        }
        self.head.store(count % Self::LEN, Ordering::Relaxed);
    }

    /// Raw code of the `sample`-th conversion of `channel`
    pub fn raw(&self, channel: Channel, sample: usize) -> u16 {
        self.slots[sample % SPC][channel.index()].load(Ordering::Relaxed)
    }

    /// Mean raw code of every slot belonging to `channel`.
    ///
    /// Never waits for a fresh scan: the result may combine conversions from two passes of the
    /// transfer engine.
    pub fn read_channel_average(&self, channel: Channel) -> f32 {
        let sum: u32 = self
            .slots
            .iter()
            .map(|scan| u32::from(scan[channel.index()].load(Ordering::Relaxed)))
            .sum();

        #[cfg(feature = "trace_samples")]
        trace!("{:?} channel sum {} over {} samples", channel, sum, SPC);

        sum as f32 / SPC as f32
    }

    /// Store one conversion at flat slot `index % len`, saturating codes above [`ADC_MAX_CODE`].
    ///
    /// Transfer context only. The head is not moved.
    pub fn write_slot(&self, index: usize, raw: u16) {
        let index = index % Self::LEN;
        self.slots[index / CHANNEL_COUNT][index % CHANNEL_COUNT]
            .store(raw.min(ADC_MAX_CODE), Ordering::Relaxed);
    }
}

impl<const SPC: usize> Default for SampleBuffer<SPC> {
    fn default() -> Self {
        Self::new()
    }
}

/// Converter plus transfer engine that fill a [`SampleBuffer`] without the CPU.
pub trait AnalogFrontEnd<const SPC: usize> {
    /// Error raised while configuring the hardware
    type Error;

    /// Set up free-running, scanning conversion over `sequence`, in order
    fn configure_scan(&mut self, sequence: &[Channel]) -> Result<(), Self::Error>;

    /// Kick off the converter's one-time self-calibration
    fn start_calibration(&mut self);

    /// `true` while self-calibration is still running
    fn is_calibrating(&mut self) -> bool;

    /// Route every conversion into `buffer`, wrapping forever, and start converting
    fn start_conversions(&mut self, buffer: &'static SampleBuffer<SPC>) -> Result<(), Self::Error>;
}

/// Failures while bringing up acquisition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AcquisitionError<E> {
    /// Calibration flag still set after this many polls
    CalibrationTimeout {
        /// Polls performed before giving up
        polls: u32,
    },
    /// The front-end rejected its configuration
    FrontEnd(E),
}

/// Handle to running acquisition. Holding one means conversions are flowing into the buffer.
pub struct Acquisition<const SPC: usize> {
    /// Buffer the front-end fills
    buffer: &'static SampleBuffer<SPC>,
}

impl<const SPC: usize> Acquisition<SPC> {
    /// Configure the front-end, wait for calibration, then start continuous conversion into
    /// `buffer`.
    ///
    /// The calibration wait polls at most [`CALIBRATION_POLL_LIMIT`] times. There is no stop
    /// operation: once this returns `Ok`, sampling runs until power-off.
    pub fn initialize<F: AnalogFrontEnd<SPC>>(
        front_end: &mut F,
        buffer: &'static SampleBuffer<SPC>,
    ) -> Result<Self, AcquisitionError<F::Error>> {
        Self::initialize_with_limit(front_end, buffer, CALIBRATION_POLL_LIMIT)
    }

    /// [`initialize`](Self::initialize) with an explicit poll budget
    pub fn initialize_with_limit<F: AnalogFrontEnd<SPC>>(
        front_end: &mut F,
        buffer: &'static SampleBuffer<SPC>,
        poll_limit: u32,
    ) -> Result<Self, AcquisitionError<F::Error>> {
        debug!("Configuring {} channel scan, {} samples each", CHANNEL_COUNT, SPC);
        front_end
            .configure_scan(&Channel::SCAN)
            .map_err(AcquisitionError::FrontEnd)?;

        front_end.start_calibration();
        let mut polls = 0;
        while front_end.is_calibrating() {
            polls += 1;
            if polls >= poll_limit {
                error!("ADC calibration did not finish after {} polls", polls);
                return Err(AcquisitionError::CalibrationTimeout { polls });
            }
        }
        debug!("ADC calibrated after {} polls", polls);

        front_end
            .start_conversions(buffer)
            .map_err(AcquisitionError::FrontEnd)?;
        Ok(Self { buffer })
    }

    /// Buffer being filled
    pub fn buffer(&self) -> &'static SampleBuffer<SPC> {
        self.buffer
    }

    /// See [`SampleBuffer::read_channel_average`]
    pub fn read_channel_average(&self, channel: Channel) -> f32 {
        self.buffer.read_channel_average(channel)
    }
}

/// Creates the scratch block a DMA transfer writes into before it is published
pub fn create_transfer_block() -> Option<&'static mut [u16; TRANSFER_BLOCK_LEN]> {
    singleton!(: [u16; TRANSFER_BLOCK_LEN] = [0u16; TRANSFER_BLOCK_LEN])
}

#[cfg(test)]
mod tests {
    extern crate std;

    use std::boxed::Box;
    use std::vec::Vec;

    use super::*;

    fn leak<const SPC: usize>() -> &'static SampleBuffer<SPC> {
        Box::leak(Box::new(SampleBuffer::new()))
    }

    #[derive(Default)]
    struct FakeFrontEnd {
        sequence: Vec<Channel>,
        calibration_polls_left: u32,
        calibrating: bool,
        started: bool,
        reject_scan: bool,
    }

    impl AnalogFrontEnd<4> for FakeFrontEnd {
        type Error = &'static str;

        fn configure_scan(&mut self, sequence: &[Channel]) -> Result<(), Self::Error> {
            if self.reject_scan {
                return Err("scan rejected");
            }
            self.sequence = sequence.to_vec();
            Ok(())
        }

        fn start_calibration(&mut self) {
            self.calibrating = true;
        }

        fn is_calibrating(&mut self) -> bool {
            if self.calibration_polls_left == 0 {
                self.calibrating = false;
            } else {
                self.calibration_polls_left -= 1;
            }
            self.calibrating
        }

        fn start_conversions(
            &mut self,
            buffer: &'static SampleBuffer<4>,
        ) -> Result<(), Self::Error> {
            assert!(!self.calibrating, "conversions started before calibration finished");
            self.started = true;
            // Hardware would now fill the buffer on its own.
            for raw in [100, 200, 300, 400, 500, 600, 700, 800] {
                buffer.push(raw);
            }
            Ok(())
        }
    }

    #[test]
    fn uniform_channel_averages_to_its_value() {
        let buffer = leak::<SAMPLES_PER_CHANNEL>();
        for _ in 0..SAMPLES_PER_CHANNEL {
            buffer.push(1234);
            buffer.push(17);
        }
        assert_eq!(buffer.read_channel_average(Channel::Voltage), 1234.0);
        assert_eq!(buffer.read_channel_average(Channel::Current), 17.0);
    }

    #[test]
    fn channels_are_interleaved() {
        let buffer = leak::<3>();
        buffer.publish(&[10, 1, 20, 2, 30, 3]);
        assert_eq!(buffer.raw(Channel::Voltage, 0), 10);
        assert_eq!(buffer.raw(Channel::Current, 0), 1);
        assert_eq!(buffer.raw(Channel::Voltage, 2), 30);
        assert_eq!(buffer.raw(Channel::Current, 2), 3);
        assert_eq!(buffer.read_channel_average(Channel::Voltage), 20.0);
        assert_eq!(buffer.read_channel_average(Channel::Current), 2.0);
    }

    #[test]
    fn push_wraps_to_first_slot() {
        let buffer = leak::<2>();
        for raw in [1, 2, 3, 4] {
            buffer.push(raw);
        }
        // Fifth conversion overwrites slot 0 (voltage, first sample)
        buffer.push(9);
        assert_eq!(buffer.raw(Channel::Voltage, 0), 9);
        assert_eq!(buffer.raw(Channel::Current, 0), 2);
        assert_eq!(buffer.read_channel_average(Channel::Voltage), 6.0);
    }

    #[test]
    fn publish_resets_head_after_block() {
        let buffer = leak::<2>();
        buffer.publish(&[1, 2, 3]);
        buffer.push(4);
        assert_eq!(buffer.raw(Channel::Current, 1), 4);
        buffer.push(5);
        assert_eq!(buffer.raw(Channel::Voltage, 0), 5);
    }

    #[test]
    fn write_slot_wraps_index_and_keeps_head() {
        let buffer = leak::<2>();
        buffer.write_slot(5, 42);
        assert_eq!(buffer.raw(Channel::Current, 0), 42);
        buffer.push(7);
        assert_eq!(buffer.raw(Channel::Voltage, 0), 7);
    }

    #[test]
    fn out_of_range_codes_saturate() {
        let buffer = leak::<1>();
        buffer.publish(&[u16::MAX, 4096]);
        assert_eq!(buffer.raw(Channel::Voltage, 0), ADC_MAX_CODE);
        assert_eq!(buffer.raw(Channel::Current, 0), ADC_MAX_CODE);
    }

    #[test]
    fn full_scale_sum_does_not_overflow() {
        let buffer = leak::<1000>();
        for _ in 0..buffer.len() {
            buffer.push(ADC_MAX_CODE);
        }
        assert_eq!(
            buffer.read_channel_average(Channel::Current),
            ADC_MAX_CODE as f32
        );
    }

    #[test]
    fn initialize_waits_for_calibration_then_starts() {
        let buffer = leak::<4>();
        let mut front_end = FakeFrontEnd {
            calibration_polls_left: 5,
            ..Default::default()
        };
        let acquisition = Acquisition::initialize(&mut front_end, buffer).unwrap();

        assert_eq!(front_end.sequence, [Channel::Voltage, Channel::Current]);
        assert!(front_end.started);
        assert_eq!(acquisition.read_channel_average(Channel::Voltage), 400.0);
        assert_eq!(acquisition.read_channel_average(Channel::Current), 500.0);
    }

    #[test]
    fn initialize_gives_up_on_stuck_calibration() {
        let buffer = leak::<4>();
        let mut front_end = FakeFrontEnd {
            calibration_polls_left: u32::MAX,
            ..Default::default()
        };
        let result = Acquisition::initialize_with_limit(&mut front_end, buffer, 50);
        assert!(matches!(
            result,
            Err(AcquisitionError::CalibrationTimeout { polls: 50 })
        ));
        assert!(!front_end.started);
    }

    #[test]
    fn initialize_reports_front_end_errors() {
        let buffer = leak::<4>();
        let mut front_end = FakeFrontEnd {
            reject_scan: true,
            ..Default::default()
        };
        let result = Acquisition::initialize(&mut front_end, buffer);
        assert!(matches!(result, Err(AcquisitionError::FrontEnd("scan rejected"))));
    }

    #[test]
    fn channel_mapping_is_fixed() {
        assert_eq!(Channel::SCAN[0].index(), 0);
        assert_eq!(Channel::SCAN[1].index(), 1);
        assert_eq!(Channel::Current.adc_input(), 1);
    }

    #[test]
    fn scan_follows_ascending_input_order() {
        // The converter's round robin visits inputs lowest first, starting from the voltage input
        assert_eq!(Channel::SCAN[0], Channel::Voltage);
        assert!(Channel::SCAN
            .windows(2)
            .all(|pair| pair[0].adc_input() < pair[1].adc_input()));
        for channel in Channel::SCAN {
            assert_eq!(usize::from(channel.adc_input()), channel.index());
        }
    }
}
