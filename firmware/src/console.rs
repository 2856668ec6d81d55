//! Line assembly for the UART operator console.
//!
//! Bytes arrive one at a time from the serial port. CR or LF completes a
//! line, backspace/DEL erases the last byte, and an overlong line is dropped
//! in full rather than executed truncated.

#![cfg_attr(not(target_os = "none"), allow(dead_code))]

use core::str;

use delay_core::engine::ArmState;
use heapless::Vec;

/// Maximum number of bytes accepted on a single console line (excluding terminator).
pub const MAX_LINE_LEN: usize = 96;

/// Prompt written after every response.
pub const PROMPT: &str = "> ";

/// Line terminator used for console output.
pub const NEWLINE: &str = "\r\n";

/// Console bytes are read, echoed and executed only while no sequence is in
/// flight. A running cycle leaves them queued in the UART driver.
pub fn accepts_input(state: ArmState) -> bool {
    state != ArmState::Running
}

/// Errors surfaced while assembling a line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConsoleError {
    /// Input exceeded [`MAX_LINE_LEN`]; the rest of the line is discarded.
    LineOverflow,
    /// The completed line is not valid UTF-8.
    InvalidUtf8,
}

impl ConsoleError {
    pub const fn message(self) -> &'static str {
        match self {
            ConsoleError::LineOverflow => "error: line too long",
            ConsoleError::InvalidUtf8 => "error: line is not valid UTF-8",
        }
    }
}

/// Result of feeding one byte into the console.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Ingest {
    /// Byte buffered (or ignored); nothing to do yet.
    Pending,
    /// The last buffered byte was erased.
    Erased,
    /// A non-empty line is ready in [`ConsoleLine::line`].
    Complete,
}

/// Bytes sent back to the terminal for one ingested byte.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Echo {
    Nothing,
    Byte(u8),
    Erase,
}

impl Echo {
    /// Printable bytes are echoed, erasures rub out the previous column.
    pub const fn for_byte(byte: u8, ingest: Ingest) -> Self {
        match ingest {
            Ingest::Erased => Echo::Erase,
            Ingest::Pending if byte.is_ascii_graphic() || byte == b' ' => Echo::Byte(byte),
            Ingest::Pending | Ingest::Complete => Echo::Nothing,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Echo::Nothing => &[],
            Echo::Byte(byte) => core::slice::from_ref(byte),
            Echo::Erase => b"\x08 \x08",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum LineState {
    Collecting,
    Ready,
    Discarding,
}

/// Accumulates console bytes until a line terminator arrives.
pub struct ConsoleLine {
    buffer: Vec<u8, MAX_LINE_LEN>,
    state: LineState,
}

impl ConsoleLine {
    pub const fn new() -> Self {
        Self {
            buffer: Vec::new(),
            state: LineState::Collecting,
        }
    }

    /// Feeds a single byte. After [`Ingest::Complete`] the caller reads the
    /// line and calls [`ConsoleLine::clear`] before feeding more bytes.
    pub fn ingest(&mut self, byte: u8) -> Result<Ingest, ConsoleError> {
        match self.state {
            LineState::Ready => return Ok(Ingest::Pending),
            LineState::Discarding => {
                if matches!(byte, b'\r' | b'\n') {
                    self.clear();
                }
                return Ok(Ingest::Pending);
            }
            LineState::Collecting => {}
        }

        match byte {
            b'\r' | b'\n' => {
                if self.buffer.is_empty() {
                    return Ok(Ingest::Pending);
                }
                self.state = LineState::Ready;
                Ok(Ingest::Complete)
            }
            0x08 | 0x7f => Ok(match self.buffer.pop() {
                Some(_) => Ingest::Erased,
                None => Ingest::Pending,
            }),
            value => {
                if self.buffer.push(value).is_err() {
                    self.buffer.clear();
                    self.state = LineState::Discarding;
                    return Err(ConsoleError::LineOverflow);
                }
                Ok(Ingest::Pending)
            }
        }
    }

    /// Completed line with surrounding whitespace removed.
    pub fn line(&self) -> Result<&str, ConsoleError> {
        str::from_utf8(self.buffer.as_slice())
            .map(str::trim)
            .map_err(|_| ConsoleError::InvalidUtf8)
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
        self.state = LineState::Collecting;
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

impl Default for ConsoleLine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(console: &mut ConsoleLine, bytes: &[u8]) -> Vec<Ingest, 128> {
        let mut events = Vec::new();
        for &byte in bytes {
            events.push(console.ingest(byte).unwrap()).unwrap();
        }
        events
    }

    #[test]
    fn carriage_return_completes_line() {
        let mut console = ConsoleLine::new();
        let events = feed(&mut console, b"list\r");
        assert_eq!(events.last(), Some(&Ingest::Complete));
        assert_eq!(console.line(), Ok("list"));
    }

    #[test]
    fn blank_lines_are_skipped() {
        let mut console = ConsoleLine::new();
        let events = feed(&mut console, b"\r\n  ");
        assert!(events.iter().all(|event| *event == Ingest::Pending));
        assert_eq!(console.len(), 2);
    }

    #[test]
    fn crlf_does_not_run_the_line_twice() {
        let mut console = ConsoleLine::new();
        assert_eq!(feed(&mut console, b"save\r").last(), Some(&Ingest::Complete));
        console.clear();
        assert_eq!(console.ingest(b'\n'), Ok(Ingest::Pending));
    }

    #[test]
    fn backspace_erases_previous_byte() {
        let mut console = ConsoleLine::new();
        let events = feed(&mut console, b"lisx\x08t\x7f\x7f\x7f\x7f\x7f");
        assert_eq!(events[4], Ingest::Erased);
        assert_eq!(events.last(), Some(&Ingest::Pending));
        assert_eq!(console.len(), 0);

        feed(&mut console, b"help\n");
        assert_eq!(console.line(), Ok("help"));
    }

    #[test]
    fn overlong_line_is_discarded_until_terminator() {
        let mut console = ConsoleLine::new();
        for _ in 0..MAX_LINE_LEN {
            assert_eq!(console.ingest(b'x'), Ok(Ingest::Pending));
        }
        assert_eq!(console.ingest(b'x'), Err(ConsoleError::LineOverflow));
        assert_eq!(console.ingest(b'y'), Ok(Ingest::Pending));
        assert_eq!(console.ingest(b'\r'), Ok(Ingest::Pending));

        feed(&mut console, b"status\r");
        assert_eq!(console.line(), Ok("status"));
    }

    #[test]
    fn echo_matches_terminal_editing() {
        assert_eq!(Echo::for_byte(b'l', Ingest::Pending).as_bytes(), b"l");
        assert_eq!(Echo::for_byte(0x7f, Ingest::Erased).as_bytes(), b"\x08 \x08");
        assert_eq!(Echo::for_byte(0x08, Ingest::Pending), Echo::Nothing);
        assert_eq!(Echo::for_byte(0x1b, Ingest::Pending), Echo::Nothing);
    }

    #[test]
    fn input_waits_for_running_cycle() {
        assert!(accepts_input(ArmState::Idle));
        assert!(accepts_input(ArmState::Armed));
        assert!(!accepts_input(ArmState::Running));
    }

    #[test]
    fn invalid_utf8_is_reported() {
        let mut console = ConsoleLine::new();
        feed(&mut console, &[0xC3, 0x28, b'\r']);
        assert_eq!(console.line(), Err(ConsoleError::InvalidUtf8));
    }
}
