// SPDX-License-Identifier: Apache-2.0

//! Character display: the [`LineDisplay`] interface, the readings layout, and a HD44780 driver
//! behind a PCF8574 I2C backpack.

use core::fmt::{self, Write};

use embedded_hal::{delay::DelayNs, i2c::I2c};
use heapless::String;

use crate::{
    config::{DISPLAY_COLUMNS, DISPLAY_ROWS},
    measurement::MeasuredQuantities,
};

/// One display line
pub type Line = String<{ DISPLAY_COLUMNS as usize }>;

/// Text output addressed by row and column
pub trait LineDisplay {
    /// Error raised by the display or its bus
    type Error;

    /// Show `text` starting at (`row`, `col`). Text past the last column is dropped.
    fn write_line(&mut self, row: u8, col: u8, text: &str) -> Result<(), Self::Error>;
}

/// Format the four reading lines: voltage, current, power, phase delay
pub fn render_lines(readings: &MeasuredQuantities) -> [Line; DISPLAY_ROWS as usize] {
    [
        line(format_args!("Volt: {:.1} V", readings.voltage)),
        line(format_args!("Curr: {:.2} A", readings.current)),
        line(format_args!("Power: {:.1} W", readings.power)),
        line(format_args!("Phase: {:.1} ms", readings.phase_delay_ms)),
    ]
}

/// Writer that silently drops whatever does not fit in a [`Line`]
struct Truncating(
    /// Text so far
    Line,
);

impl Write for Truncating {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for c in s.chars() {
            if self.0.push(c).is_err() {
                break;
            }
        }
        Ok(())
    }
}

/// Render `args` into a line, cutting it at the display width
fn line(args: fmt::Arguments<'_>) -> Line {
    let mut out = Truncating(Line::new());
    // Truncating never reports an error
    let _ = out.write_fmt(args);
    out.0
}

/// Display failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DisplayError<E> {
    /// I2C transfer failed
    Bus(E),
    /// Row outside `0..DISPLAY_ROWS`
    RowOutOfRange(u8),
}

/// HD44780 commands and PCF8574 pin bits
mod cmd {
    /// Blank DDRAM and home the cursor
    pub const CLEAR_DISPLAY: u8 = 0x01;
    /// Cursor direction and shift
    pub const ENTRY_MODE_SET: u8 = 0x04;
    /// Display, cursor and blink on/off
    pub const DISPLAY_CONTROL: u8 = 0x08;
    /// Bus width, line count and font
    pub const FUNCTION_SET: u8 = 0x20;
    /// Move the cursor to a DDRAM address
    pub const SET_DDRAM_ADDR: u8 = 0x80;

    /// Entry mode: cursor moves right
    pub const ENTRY_LEFT: u8 = 0x02;
    /// Display control: display on
    pub const DISPLAY_ON: u8 = 0x04;
    /// Function set: two lines
    pub const TWO_LINE: u8 = 0x08;

    /// Expander P3, backlight transistor
    pub const BACKLIGHT: u8 = 0x08;
    /// Expander P2, EN strobe
    pub const ENABLE: u8 = 0x04;
    /// Expander P0, RS high selects data
    pub const REGISTER_SELECT: u8 = 0x01;
}

/// DDRAM address of the first column of each row on a 16x4 module
const ROW_OFFSETS: [u8; DISPLAY_ROWS as usize] = [0x00, 0x40, 0x14, 0x54];

/// HD44780 character LCD in 4-bit mode behind a PCF8574 expander.
///
/// Expander bits: P0 = RS, P2 = EN, P3 = backlight, P4..P7 = D4..D7.
pub struct Hd44780<I2C, D> {
    /// Bus to the expander
    i2c: I2C,
    /// Timing between strobes and after slow commands
    delay: D,
    /// 7-bit expander address
    address: u8,
}

impl<I2C: I2c, D: DelayNs> Hd44780<I2C, D> {
    /// Driver for the expander at 7-bit `address`. Call [`init`](Self::init) before writing.
    pub fn new(i2c: I2C, delay: D, address: u8) -> Self {
        Self {
            i2c,
            delay,
            address,
        }
    }

    /// Power-on sequence: force 4-bit mode, then 2 lines, display on, left entry, clear
    pub fn init(&mut self) -> Result<(), DisplayError<I2C::Error>> {
        self.delay.delay_ms(50);
        for nibble in [0x30, 0x30, 0x30, 0x20] {
            self.send_nibble(nibble, 0)?;
            self.delay.delay_ms(5);
        }
        self.command(cmd::FUNCTION_SET | cmd::TWO_LINE)?;
        self.command(cmd::DISPLAY_CONTROL | cmd::DISPLAY_ON)?;
        self.command(cmd::ENTRY_MODE_SET | cmd::ENTRY_LEFT)?;
        self.clear()?;
        debug!("HD44780 at {} initialised", self.address);
        Ok(())
    }

    /// Blank the display and home the cursor
    pub fn clear(&mut self) -> Result<(), DisplayError<I2C::Error>> {
        self.command(cmd::CLEAR_DISPLAY)?;
        self.delay.delay_ms(2);
        Ok(())
    }

    /// Move the cursor to (`row`, `col`)
    pub fn set_cursor(&mut self, row: u8, col: u8) -> Result<(), DisplayError<I2C::Error>> {
        let offset = *ROW_OFFSETS
            .get(row as usize)
            .ok_or(DisplayError::RowOutOfRange(row))?;
        self.command(cmd::SET_DDRAM_ADDR | offset.wrapping_add(col))
    }

    /// Print at the cursor. Anything outside printable ASCII is shown as `?`.
    pub fn print(&mut self, text: &str) -> Result<(), DisplayError<I2C::Error>> {
        for c in text.chars() {
            let byte = if c.is_ascii() && !c.is_ascii_control() {
                c as u8
            } else {
                b'?'
            };
            self.send_byte(byte, cmd::REGISTER_SELECT)?;
        }
        Ok(())
    }

    /// Send an instruction byte
    fn command(&mut self, byte: u8) -> Result<(), DisplayError<I2C::Error>> {
        self.send_byte(byte, 0)
    }

    /// Send `byte` as two nibbles, high first. `mode` carries RS.
    fn send_byte(&mut self, byte: u8, mode: u8) -> Result<(), DisplayError<I2C::Error>> {
        self.send_nibble(byte & 0xF0, mode)?;
        self.send_nibble(byte << 4, mode)
    }

    /// Latch the high nibble of `nibble` with an EN pulse
    fn send_nibble(&mut self, nibble: u8, mode: u8) -> Result<(), DisplayError<I2C::Error>> {
        let data = (nibble & 0xF0) | mode | cmd::BACKLIGHT;
        self.write_expander(data | cmd::ENABLE)?;
        self.delay.delay_us(1);
        self.write_expander(data & !cmd::ENABLE)?;
        // Longest regular instruction takes 37 us
        self.delay.delay_us(50);
        Ok(())
    }

    /// Set all eight expander outputs
    fn write_expander(&mut self, data: u8) -> Result<(), DisplayError<I2C::Error>> {
        self.i2c
            .write(self.address, &[data])
            .map_err(DisplayError::Bus)
    }
}

impl<I2C: I2c, D: DelayNs> LineDisplay for Hd44780<I2C, D> {
    type Error = DisplayError<I2C::Error>;

    fn write_line(&mut self, row: u8, col: u8, text: &str) -> Result<(), Self::Error> {
        if row >= DISPLAY_ROWS {
            return Err(DisplayError::RowOutOfRange(row));
        }
        let room = DISPLAY_COLUMNS.saturating_sub(col) as usize;
        let end = text
            .char_indices()
            .nth(room)
            .map_or(text.len(), |(index, _)| index);
        self.set_cursor(row, col)?;
        self.print(&text[..end])
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use std::vec::Vec;

    use embedded_hal::i2c::{ErrorKind, ErrorType, Operation};

    use super::*;

    #[derive(Default)]
    struct FakeBus {
        writes: Vec<(u8, u8)>,
        fail: bool,
    }

    impl ErrorType for FakeBus {
        type Error = ErrorKind;
    }

    impl I2c for FakeBus {
        fn transaction(
            &mut self,
            address: u8,
            operations: &mut [Operation<'_>],
        ) -> Result<(), Self::Error> {
            if self.fail {
                return Err(ErrorKind::Other);
            }
            for operation in operations {
                if let Operation::Write(bytes) = operation {
                    self.writes.extend(bytes.iter().map(|b| (address, *b)));
                }
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeDelay {
        total_ns: u64,
    }

    impl DelayNs for FakeDelay {
        fn delay_ns(&mut self, ns: u32) {
            self.total_ns += u64::from(ns);
        }
    }

    fn lcd() -> Hd44780<FakeBus, FakeDelay> {
        Hd44780::new(FakeBus::default(), FakeDelay::default(), 0x27)
    }

    fn bytes(lcd: &Hd44780<FakeBus, FakeDelay>) -> Vec<u8> {
        lcd.i2c.writes.iter().map(|(_, b)| *b).collect()
    }

    #[test]
    fn cursor_uses_row_offsets() {
        let mut lcd = lcd();
        lcd.set_cursor(2, 3).unwrap();
        // 0x80 | 0x17: high nibble 0x9, low nibble 0x7, each latched with EN high then low
        assert_eq!(bytes(&lcd), [0x9C, 0x98, 0x7C, 0x78]);
        assert!(lcd.i2c.writes.iter().all(|(address, _)| *address == 0x27));
    }

    #[test]
    fn characters_are_sent_as_data() {
        let mut lcd = lcd();
        lcd.print("A").unwrap();
        assert_eq!(bytes(&lcd), [0x4D, 0x49, 0x1D, 0x19]);
    }

    #[test]
    fn non_ascii_is_replaced() {
        let mut lcd = lcd();
        lcd.print("µ").unwrap();
        let question = b'?';
        let high = (question & 0xF0) | 0x09;
        let low = (question << 4) | 0x09;
        assert_eq!(bytes(&lcd), [high | 0x04, high, low | 0x04, low]);
    }

    #[test]
    fn init_sequence_starts_in_8_bit_mode() {
        let mut lcd = lcd();
        lcd.init().unwrap();
        let sent = bytes(&lcd);
        assert_eq!(&sent[..8], [0x3C, 0x38, 0x3C, 0x38, 0x3C, 0x38, 0x2C, 0x28]);
        // Four init nibbles, then four commands of two nibbles each
        assert_eq!(sent.len(), 4 * 2 + 4 * 4);
        assert!(lcd.delay.total_ns >= 70_000_000);
    }

    #[test]
    fn write_line_truncates_at_last_column() {
        let mut lcd = lcd();
        lcd.write_line(0, 10, "1234567890").unwrap();
        // Cursor command plus six characters
        assert_eq!(bytes(&lcd).len(), 4 + 6 * 4);
    }

    #[test]
    fn write_line_rejects_missing_row() {
        let mut lcd = lcd();
        assert_eq!(
            lcd.write_line(4, 0, "x"),
            Err(DisplayError::RowOutOfRange(4))
        );
        assert!(lcd.i2c.writes.is_empty());
    }

    #[test]
    fn bus_errors_are_reported() {
        let mut lcd = Hd44780::new(
            FakeBus {
                fail: true,
                ..Default::default()
            },
            FakeDelay::default(),
            0x27,
        );
        assert_eq!(
            lcd.write_line(0, 0, "x"),
            Err(DisplayError::Bus(ErrorKind::Other))
        );
    }

    #[test]
    fn readings_layout() {
        let lines = render_lines(&MeasuredQuantities {
            voltage: 115.0,
            current: 9.9976,
            power: 1149.72,
            phase_delay_ms: 10.0,
            power_factor: -1.0,
        });
        assert_eq!(lines[0].as_str(), "Volt: 115.0 V");
        assert_eq!(lines[1].as_str(), "Curr: 10.00 A");
        assert_eq!(lines[2].as_str(), "Power: 1149.7 W");
        assert_eq!(lines[3].as_str(), "Phase: 10.0 ms");
    }

    #[test]
    fn long_lines_are_cut() {
        let lines = render_lines(&MeasuredQuantities {
            power: 12_345_678.0,
            ..Default::default()
        });
        assert_eq!(lines[2].as_str(), "Power: 12345678.");
        assert_eq!(lines[2].len(), DISPLAY_COLUMNS as usize);
    }
}
