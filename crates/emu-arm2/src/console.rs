//! Console stream abstraction for the I/O syscalls.
//!
//! The VM reads from any `BufRead` and writes to any `Write`, so the runner
//! wires up stdio while tests script input and capture output.

use std::io::{self, BufRead, BufReader, Cursor, Read, Write};
use std::sync::{Arc, Mutex};

/// Shared capture buffer handed back by [`Console::scripted`].
#[derive(Debug, Clone, Default)]
pub struct OutputHandle {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl OutputHandle {
    /// Everything written so far, as lossy UTF-8.
    #[must_use]
    pub fn text(&self) -> String {
        let buf = self.buf.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        String::from_utf8_lossy(&buf).into_owned()
    }

    /// Raw bytes written so far.
    #[must_use]
    pub fn bytes(&self) -> Vec<u8> {
        self.buf
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

impl Write for OutputHandle {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// The VM's console: byte input stream plus output sink.
pub struct Console {
    input: Box<dyn BufRead + Send>,
    output: Box<dyn Write + Send>,
}

impl std::fmt::Debug for Console {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Console").finish_non_exhaustive()
    }
}

impl Default for Console {
    fn default() -> Self {
        Self::stdio()
    }
}

impl Console {
    /// Console over the process's stdin/stdout.
    #[must_use]
    pub fn stdio() -> Self {
        Self {
            input: Box::new(BufReader::new(io::stdin())),
            output: Box::new(io::stdout()),
        }
    }

    /// Console with arbitrary streams.
    #[must_use]
    pub fn new(input: Box<dyn BufRead + Send>, output: Box<dyn Write + Send>) -> Self {
        Self { input, output }
    }

    /// Scripted console: `input` is served to the guest, and the returned
    /// handle observes everything the guest writes.
    #[must_use]
    pub fn scripted(input: &str) -> (Self, OutputHandle) {
        let handle = OutputHandle::default();
        let console = Self {
            input: Box::new(Cursor::new(input.as_bytes().to_vec())),
            output: Box::new(handle.clone()),
        };
        (console, handle)
    }

    /// Read one byte; `None` at end of input.
    pub fn read_char(&mut self) -> io::Result<Option<u8>> {
        let mut byte = [0u8; 1];
        match self.input.read(&mut byte) {
            Ok(0) => Ok(None),
            Ok(_) => Ok(Some(byte[0])),
            Err(e) => Err(e),
        }
    }

    /// Read up to a newline (consumed, not returned); `None` at end of
    /// input with nothing read.
    pub fn read_line(&mut self) -> io::Result<Option<String>> {
        let mut line = String::new();
        let n = self.input.read_line(&mut line)?;
        if n == 0 {
            return Ok(None);
        }
        while line.ends_with('\n') || line.ends_with('\r') {
            line.pop();
        }
        Ok(Some(line))
    }

    /// Write raw bytes.
    pub fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.output.write_all(bytes)
    }

    /// Write a formatted integer in the given base (2, 8, 10, or 16).
    /// Base 10 is signed; the others render the raw bit pattern.
    pub fn write_int(&mut self, value: u32, base: u32) -> io::Result<()> {
        let text = match base {
            2 => format!("{value:b}"),
            8 => format!("{value:o}"),
            16 => format!("{value:x}"),
            _ => format!("{}", value as i32),
        };
        self.output.write_all(text.as_bytes())
    }

    /// Flush pending output.
    pub fn flush(&mut self) -> io::Result<()> {
        self.output.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scripted_console_round_trips() {
        let (mut console, out) = Console::scripted("a\n42\n");
        assert_eq!(console.read_char().unwrap(), Some(b'a'));
        assert_eq!(console.read_line().unwrap(), Some(String::new()));
        assert_eq!(console.read_line().unwrap(), Some("42".to_string()));
        assert_eq!(console.read_line().unwrap(), None);

        console.write(b"hi ").unwrap();
        console.write_int(0xFF, 16).unwrap();
        console.write_int(-5i32 as u32, 10).unwrap();
        assert_eq!(out.text(), "hi ff-5");
    }
}
