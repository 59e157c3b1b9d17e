//! Character-at-a-time line acquisition.
//!
//! The terminal is switched to non-canonical, non-echoing mode for the
//! duration of one [`LineReader::read_line`] call and the reader echoes what
//! it accepts itself. That is what lets it react to Tab, Ctrl-D and the
//! arrow keys before Enter is pressed.

use nix::sys::termios::{self, LocalFlags, SetArg, SpecialCharacterIndices, Termios};
use std::fs::File;
use std::io::{self, IsTerminal, Read, Stdout, Write};
use std::os::fd::{AsFd, OwnedFd};

const CTRL_D: u8 = 0x04;
const BACKSPACE: u8 = 0x08;
const TAB: u8 = b'\t';
const ESC: u8 = 0x1b;
const DEL: u8 = 0x7f;

/// Result of reading one line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineResult {
    /// Enter was pressed; the text excludes the line terminator.
    Line(String),
    /// Ctrl-D was pressed or the input was closed.
    EndOfInput,
    /// Tab was pressed; carries what had been typed so far.
    AutocompleteRequested(String),
}

/// Keeps the terminal behind `fd` in raw mode until dropped.
pub struct RawMode<Fd: AsFd> {
    fd: Fd,
    saved: Termios,
}

impl<Fd: AsFd> RawMode<Fd> {
    pub fn enable(fd: Fd) -> nix::Result<Self> {
        let saved = termios::tcgetattr(&fd)?;

        let mut raw = saved.clone();
        raw.local_flags.remove(LocalFlags::ICANON | LocalFlags::ECHO);
        raw.control_chars[SpecialCharacterIndices::VMIN as usize] = 1;
        raw.control_chars[SpecialCharacterIndices::VTIME as usize] = 0;
        termios::tcsetattr(&fd, SetArg::TCSANOW, &raw)?;

        Ok(Self { fd, saved })
    }
}

impl<Fd: AsFd> Drop for RawMode<Fd> {
    fn drop(&mut self) {
        if let Err(e) = termios::tcsetattr(&self.fd, SetArg::TCSANOW, &self.saved) {
            tracing::error!("failed to restore terminal settings: {}", e);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Escape {
    None,
    Esc,
    Csi,
}

/// Reads lines byte by byte from `R`, echoing accepted input to `W`.
///
/// `R` must not buffer ahead: whatever follows the current line belongs to
/// the programs started with the same stdin.
pub struct LineReader<R, W> {
    input: R,
    output: W,
    /// Terminal switched to raw mode while a line is being read.
    terminal: Option<OwnedFd>,
    echo: bool,
    /// Last submitted line, recalled with the up arrow.
    previous: Option<String>,
}

impl LineReader<File, Stdout> {
    /// Reader over the process's stdin and stdout.
    ///
    /// Stdin is read through a duplicate of descriptor 0 rather than
    /// [`io::Stdin`], which fills an internal buffer. Raw mode and echo are
    /// only used when stdin is a terminal.
    pub fn from_terminal() -> io::Result<Self> {
        let stdin = io::stdin();
        let input = File::from(stdin.as_fd().try_clone_to_owned()?);
        let terminal = if stdin.is_terminal() {
            Some(stdin.as_fd().try_clone_to_owned()?)
        } else {
            None
        };
        Ok(Self {
            input,
            output: io::stdout(),
            echo: terminal.is_some(),
            terminal,
            previous: None,
        })
    }
}

impl<R: Read, W: Write> LineReader<R, W> {
    /// Reader over arbitrary streams. Never touches terminal settings.
    pub fn new(input: R, output: W) -> Self {
        Self {
            input,
            output,
            terminal: None,
            echo: true,
            previous: None,
        }
    }

    /// Put `terminal` in raw mode for the duration of every `read_line`.
    pub fn with_terminal(mut self, terminal: OwnedFd) -> Self {
        self.terminal = Some(terminal);
        self
    }

    /// Read one line, handling editing keys as they arrive.
    ///
    /// The terminal settings are restored before returning, errors included.
    pub fn read_line(&mut self) -> io::Result<LineResult> {
        let terminal = self.terminal.take();
        let result = self.read_raw(terminal.as_ref());
        self.terminal = terminal;

        let result = result?;
        if let LineResult::Line(line) | LineResult::AutocompleteRequested(line) = &result {
            if !line.is_empty() {
                self.previous = Some(line.clone());
            }
        }
        Ok(result)
    }

    fn read_raw(&mut self, terminal: Option<&OwnedFd>) -> io::Result<LineResult> {
        let _raw = terminal.map(RawMode::enable).transpose()?;
        self.read_keys()
    }

    fn read_byte(&mut self) -> io::Result<Option<u8>> {
        let mut byte = [0u8; 1];
        loop {
            match self.input.read(&mut byte) {
                Ok(0) => return Ok(None),
                Ok(_) => return Ok(Some(byte[0])),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    fn emit(&mut self, bytes: &[u8]) -> io::Result<()> {
        if self.echo {
            self.output.write_all(bytes)?;
            self.output.flush()?;
        }
        Ok(())
    }

    /// Remove the last character from `buf` and from the screen.
    fn erase_last(&mut self, buf: &mut Vec<u8>) -> io::Result<()> {
        // drop UTF-8 continuation bytes together with their lead byte
        while let Some(byte) = buf.pop() {
            if byte & 0xC0 != 0x80 {
                break;
            }
        }
        self.emit(b"\x08 \x08")
    }

    fn recall_previous(&mut self, buf: &mut Vec<u8>) -> io::Result<()> {
        let Some(previous) = self.previous.clone() else {
            return Ok(());
        };
        while !buf.is_empty() {
            self.erase_last(buf)?;
        }
        buf.extend_from_slice(previous.as_bytes());
        self.emit(previous.as_bytes())
    }

    fn read_keys(&mut self) -> io::Result<LineResult> {
        let mut buf: Vec<u8> = Vec::new();
        let mut escape = Escape::None;

        loop {
            let Some(byte) = self.read_byte()? else {
                return Ok(LineResult::EndOfInput);
            };

            match (escape, byte) {
                (Escape::None, ESC) => {
                    escape = Escape::Esc;
                    continue;
                }
                (Escape::Esc, b'[') => {
                    escape = Escape::Csi;
                    continue;
                }
                (Escape::Csi, b'A') => {
                    escape = Escape::None;
                    self.recall_previous(&mut buf)?;
                    continue;
                }
                (Escape::Esc, _) | (Escape::Csi, _) => {
                    // other cursor keys and unknown sequences are swallowed
                    escape = Escape::None;
                    continue;
                }
                (Escape::None, _) => {}
            }

            match byte {
                CTRL_D => return Ok(LineResult::EndOfInput),
                TAB => {
                    let text = String::from_utf8_lossy(&buf).into_owned();
                    return Ok(LineResult::AutocompleteRequested(text));
                }
                b'\n' | b'\r' => {
                    self.emit(b"\n")?;
                    return Ok(LineResult::Line(String::from_utf8_lossy(&buf).into_owned()));
                }
                DEL | BACKSPACE => {
                    if !buf.is_empty() {
                        self.erase_last(&mut buf)?;
                    }
                }
                b if b < 0x20 => {}
                b => {
                    buf.push(b);
                    self.emit(&[b])?;
                }
            }
        }
    }
}
