//! Raspberry Pi Pico firmware for the single-phase AC power meter.
//!
//! | Signal                     | Pin    |
//! |----------------------------|--------|
//! | Voltage sense (AIN0)       | GPIO26 |
//! | Current sense (AIN1)       | GPIO27 |
//! | Voltage zero-crossing      | GPIO14 |
//! | Current zero-crossing      | GPIO15 |
//! | LCD backpack SDA / SCL     | GPIO4 / GPIO5 |
//! | Intensity LED (PWM4 B)     | GPIO25 |
#![no_std]
#![no_main]
#![warn(missing_docs)]

use ac_power_meter::{
    buffer::{
        create_transfer_block, Acquisition, AnalogFrontEnd, Channel, SampleBuffer,
        TRANSFER_BLOCK_LEN,
    },
    components::IntensityLed,
    config::{CAPTURE_TICK_US, DISPLAY_I2C_ADDRESS, PHASE_HISTORY_LEN, SAMPLES_PER_CHANNEL},
    cycle::MeterCycle,
    display::Hd44780,
    interrupt::{IsrCell, PHASE_HISTORY, SAMPLES},
    measurement::MeasurementEngine,
    phase::{CaptureTimer, PhaseCapture},
};
use cortex_m::singleton;
use defmt::{debug, info, warn};
#[allow(unused_imports)]
use defmt_rtt as _;
#[allow(unused_imports)]
use panic_probe as _;
use rp2040_hal::{
    adc::{AdcFifo, AdcPin, DmaReadTarget},
    clocks::init_clocks_and_plls,
    dma::{single_buffer, Channel as DmaChannel, DMAExt, SingleChannel, CH0},
    entry,
    fugit::RateExtU32,
    gpio::{
        self,
        bank0::{Gpio14, Gpio15, Gpio26, Gpio27},
        FunctionI2C, FunctionSioInput, Pin, Pins, PullDown, PullNone, PullUp,
    },
    pac::{self, interrupt},
    pwm::Slices,
    Adc, Clock, Sio, Timer, Watchdog, I2C,
};

/// Second-stage bootloader, from [rp2040-boot2](https://docs.rs/rp2040-boot2)
#[link_section = ".boot2"]
#[used]
pub static BOOT2: [u8; 256] = rp2040_boot2::BOOT_LOADER_W25Q080;
/// External high-speed crystal on the pico board is 12Mhz
pub const XOSC_FREQ_HZ: u32 = 12_000_000;
/// ADC clock cycles between conversions, minus one. 48 MHz / 4800 gives 10 ksamples/s shared by
/// both channels.
const ADC_CLOCK_DIVIDER: u16 = 4799;
/// PWM slice prescaler. 125 MHz system clock / 125 gives a 1 MHz counter
const PWM_DIVIDER: u8 = 125;
/// PWM wrap value. 1000 counts at 1 MHz give a 1 kHz LED drive
const PWM_TOP: u16 = 999;

/// Converter input wired to the voltage sensor
type VoltagePin = AdcPin<Pin<Gpio26, FunctionSioInput, PullNone>>;
/// Converter input wired to the current sensor
type CurrentPin = AdcPin<Pin<Gpio27, FunctionSioInput, PullNone>>;
/// Voltage zero-crossing comparator output
type ReferenceEdgePin = Pin<Gpio14, FunctionSioInput, PullDown>;
/// Current zero-crossing comparator output
type DelayedEdgePin = Pin<Gpio15, FunctionSioInput, PullDown>;
/// DMA transfer moving one block of conversions out of the ADC FIFO
type AdcTransfer = single_buffer::Transfer<
    DmaChannel<CH0>,
    DmaReadTarget<u16>,
    &'static mut [u16; TRANSFER_BLOCK_LEN],
>;

/// Raised when `DMA_IRQ_0` fires before [`ADC_STREAM`] is installed
const NO_ADC_STREAM_PANIC_MSG: &str =
    "ADC stream was not installed before DMA_IRQ_0 was unmasked";
/// Raised when `IO_IRQ_BANK0` fires before [`EDGE_CAPTURE`] is installed
const NO_EDGE_CAPTURE_PANIC_MSG: &str =
    "Edge capture was not installed before IO_IRQ_BANK0 was unmasked";

/// In-flight ADC transfer, restarted from `DMA_IRQ_0`
static ADC_STREAM: IsrCell<AdcStream> = IsrCell::new();
/// Zero-crossing inputs and the capture engine, driven from `IO_IRQ_BANK0`
static EDGE_CAPTURE: IsrCell<EdgeCapture> = IsrCell::new();

/// DMA side of acquisition: copies every finished block into the sample buffer
struct AdcStream {
    /// Transfer in flight, `None` only while it is being restarted
    transfer: Option<AdcTransfer>,
    /// Destination of every finished block
    samples: &'static SampleBuffer<SAMPLES_PER_CHANNEL>,
}

impl AdcStream {
    /// Publish the finished block and queue the next one into the same memory
    fn on_block_complete(&mut self) {
        let Some(transfer) = self.transfer.take() else {
            return;
        };
        if !transfer.is_done() {
            self.transfer = Some(transfer);
            return;
        }
        let (mut channel, source, block) = transfer.wait();
        channel.check_irq0();
        self.samples.publish(&block[..]);
        self.transfer = Some(single_buffer::Config::new(channel, source, block).start());
    }
}

/// Front-end errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
enum FrontEndError {
    /// Only the voltage-then-current scan is wired
    UnsupportedScan,
    /// Conversions were already started
    AlreadyRunning,
}

/// RP2040 ADC in round-robin FIFO mode, drained by DMA channel 0
struct Rp2040FrontEnd {
    /// Converter, handed to the FIFO once conversions start
    adc: Option<&'static mut Adc>,
    /// AIN0
    voltage: VoltagePin,
    /// AIN1
    current: CurrentPin,
    /// DMA channel, handed to the transfer once conversions start
    dma: Option<DmaChannel<CH0>>,
    /// Running FIFO, kept alive for the lifetime of the firmware
    fifo: Option<AdcFifo<'static, u16>>,
}

impl AnalogFrontEnd<SAMPLES_PER_CHANNEL> for Rp2040FrontEnd {
    type Error = FrontEndError;

    fn configure_scan(&mut self, sequence: &[Channel]) -> Result<(), Self::Error> {
        // Round robin always runs in ascending input order, starting from the selected input
        if sequence != Channel::SCAN.as_slice() {
            return Err(FrontEndError::UnsupportedScan);
        }
        debug!("ADC scan: {:?}", sequence);
        Ok(())
    }

    fn start_calibration(&mut self) {
        // No self-calibration on this converter; `Adc::new` already waited for READY
    }

    fn is_calibrating(&mut self) -> bool {
        false
    }

    fn start_conversions(
        &mut self,
        buffer: &'static SampleBuffer<SAMPLES_PER_CHANNEL>,
    ) -> Result<(), Self::Error> {
        let (Some(adc), Some(mut dma)) = (self.adc.take(), self.dma.take()) else {
            return Err(FrontEndError::AlreadyRunning);
        };
        let Some(block) = create_transfer_block() else {
            return Err(FrontEndError::AlreadyRunning);
        };

        let mut fifo = adc
            .build_fifo()
            .set_channel(&mut self.voltage)
            .round_robin((&self.voltage, &self.current))
            .clock_divider(ADC_CLOCK_DIVIDER, 0)
            .enable_dma()
            .start_paused();
        dma.enable_irq0();
        let transfer = single_buffer::Config::new(dma, fifo.dma_read_target(), block).start();

        debug!("critical_section: transfer ADC stream to mutex");
        ADC_STREAM.install(AdcStream {
            transfer: Some(transfer),
            samples: buffer,
        });
        fifo.resume();
        self.fifo = Some(fifo);
        Ok(())
    }
}

/// [`CaptureTimer`] over the free-running 1 MHz system timer
struct TimerCapture {
    /// 1 MHz system timer
    timer: Timer,
    /// Timer reading that corresponds to a count of zero
    origin: u64,
    /// Count held while stopped
    latched: u32,
    /// Whether the count is advancing
    running: bool,
}

impl TimerCapture {
    /// Stopped capture timer with a count of zero
    fn new(timer: Timer) -> Self {
        Self {
            timer,
            origin: 0,
            latched: 0,
            running: false,
        }
    }

    /// Raw timer reading in microseconds
    fn now(&self) -> u64 {
        self.timer.get_counter().ticks()
    }

    /// Capture ticks since `origin`, saturating
    fn elapsed(&self) -> u32 {
        let ticks = self.now().wrapping_sub(self.origin) / u64::from(CAPTURE_TICK_US);
        u32::try_from(ticks).unwrap_or(u32::MAX)
    }
}

impl CaptureTimer for TimerCapture {
    fn reset(&mut self) {
        self.origin = self.now();
        self.latched = 0;
    }

    fn enable(&mut self) {
        if !self.running {
            let held = u64::from(self.latched) * u64::from(CAPTURE_TICK_US);
            self.origin = self.now().wrapping_sub(held);
            self.running = true;
        }
    }

    fn disable(&mut self) {
        if self.running {
            self.latched = self.elapsed();
            self.running = false;
        }
    }

    fn count(&self) -> u32 {
        if self.running {
            self.elapsed()
        } else {
            self.latched
        }
    }
}

/// Everything `IO_IRQ_BANK0` needs
struct EdgeCapture {
    /// Voltage zero-crossing input
    reference: ReferenceEdgePin,
    /// Current zero-crossing input
    delayed: DelayedEdgePin,
    /// State machine recording into [`PHASE_HISTORY`]
    capture: PhaseCapture<'static, TimerCapture, PHASE_HISTORY_LEN>,
}

impl EdgeCapture {
    /// Dispatch whichever zero-crossing edges are pending. A reference edge is handled first, so
    /// simultaneous edges record a delay of zero.
    ///
    /// Dropped and stray edges are logged at counts 1, 2, 4, 8 and so on, so a missing comparator
    /// signal does not flood the log at mains frequency.
    fn on_edge_interrupt(&mut self) {
        if self.reference.interrupt_status(gpio::Interrupt::EdgeHigh) {
            self.reference.clear_interrupt(gpio::Interrupt::EdgeHigh);
            if self.capture.on_reference_edge() && self.capture.discarded().is_power_of_two() {
                warn!(
                    "{} phase measurements dropped: no current edge before the next voltage edge",
                    self.capture.discarded()
                );
            }
        }
        if self.delayed.interrupt_status(gpio::Interrupt::EdgeHigh) {
            self.delayed.clear_interrupt(gpio::Interrupt::EdgeHigh);
            if self.capture.on_delayed_edge().is_none()
                && self.capture.stray_edges().is_power_of_two()
            {
                warn!(
                    "{} current edges ignored: no voltage edge armed the timer",
                    self.capture.stray_edges()
                );
            }
        }
    }
}

/// Main operation loop
#[entry]
fn main() -> ! {
    info!("Power meter startup");
    let mut pac = pac::Peripherals::take().unwrap();
    let mut watchdog = Watchdog::new(pac.WATCHDOG);
    let sio = Sio::new(pac.SIO);

    let clocks = init_clocks_and_plls(
        XOSC_FREQ_HZ,
        pac.XOSC,
        pac.CLOCKS,
        pac.PLL_SYS,
        pac.PLL_USB,
        &mut pac.RESETS,
        &mut watchdog,
    )
    .ok()
    .unwrap();
    if clocks.system_clock.freq().to_MHz() != 125 {
        warn!(
            "System clock is {} Hz, PWM frequency will be off",
            clocks.system_clock.freq().to_Hz()
        );
    }
    let pins = Pins::new(
        pac.IO_BANK0,
        pac.PADS_BANK0,
        sio.gpio_bank0,
        &mut pac.RESETS,
    );
    let timer = Timer::new(pac.TIMER, &mut pac.RESETS, &clocks);

    // Acquisition: ADC round robin over AIN0/AIN1, drained by DMA channel 0
    let adc = singleton!(: Adc = Adc::new(pac.ADC, &mut pac.RESETS)).unwrap();
    let dma = pac.DMA.split(&mut pac.RESETS);
    let mut front_end = Rp2040FrontEnd {
        adc: Some(adc),
        voltage: AdcPin::new(pins.gpio26.into_floating_input()).unwrap(),
        current: AdcPin::new(pins.gpio27.into_floating_input()).unwrap(),
        dma: Some(dma.ch0),
        fifo: None,
    };
    let acquisition = Acquisition::initialize(&mut front_end, &SAMPLES).unwrap();

    // Phase capture: rising edges of both comparators
    let reference = pins.gpio14.into_pull_down_input();
    let delayed = pins.gpio15.into_pull_down_input();
    reference.set_interrupt_enabled(gpio::Interrupt::EdgeHigh, true);
    delayed.set_interrupt_enabled(gpio::Interrupt::EdgeHigh, true);
    debug!("critical_section: transfer edge capture to mutex");
    EDGE_CAPTURE.install(EdgeCapture {
        reference,
        delayed,
        capture: PhaseCapture::new(TimerCapture::new(timer), &PHASE_HISTORY),
    });

    // Actuation: PWM4 channel B drives the on-board LED
    let mut pwm_slices = Slices::new(pac.PWM, &mut pac.RESETS);
    pwm_slices.pwm4.set_div_int(PWM_DIVIDER);
    pwm_slices.pwm4.set_top(PWM_TOP);
    pwm_slices.pwm4.enable();
    let mut led_channel = pwm_slices.pwm4.channel_b;
    led_channel.output_to(pins.gpio25);
    let led = IntensityLed::new(led_channel);

    // Display: HD44780 behind a PCF8574 on I2C0
    let sda: Pin<_, FunctionI2C, PullUp> = pins.gpio4.reconfigure();
    let scl: Pin<_, FunctionI2C, PullUp> = pins.gpio5.reconfigure();
    let i2c = I2C::i2c0(
        pac.I2C0,
        sda,
        scl,
        100.kHz(),
        &mut pac.RESETS,
        &clocks.system_clock,
    );
    let mut lcd = Hd44780::new(i2c, timer, DISPLAY_I2C_ADDRESS);
    if let Err(err) = lcd.init() {
        warn!("LCD initialisation failed: {}", err);
    }

    unsafe {
        pac::NVIC::unmask(pac::Interrupt::DMA_IRQ_0);
        pac::NVIC::unmask(pac::Interrupt::IO_IRQ_BANK0);
    }
    info!("System initialization complete");

    let engine = MeasurementEngine::new(acquisition.buffer(), &PHASE_HISTORY);
    let mut delay = timer;
    MeterCycle::new(engine, lcd, led).run(&mut delay)
}

/// ADC block finished
#[interrupt]
fn DMA_IRQ_0() {
    ADC_STREAM
        .with(AdcStream::on_block_complete)
        .expect(NO_ADC_STREAM_PANIC_MSG);
}

/// Zero-crossing edge on GPIO14 or GPIO15
#[interrupt]
fn IO_IRQ_BANK0() {
    EDGE_CAPTURE
        .with(EdgeCapture::on_edge_interrupt)
        .expect(NO_EDGE_CAPTURE_PANIC_MSG);
}
