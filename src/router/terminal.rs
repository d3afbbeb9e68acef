//! Terminal output decoding for interactive programs
//!
//! One decoder lives as long as its pseudo-terminal channel. Escape sequences
//! and multi-byte characters split across SSH packets are held in the parser
//! until the rest arrives.

use std::io::{self, Write};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

/// Sink the ANSI stripper writes printable output into
#[derive(Clone, Default)]
struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Stateful ANSI stripper for one terminal stream
pub struct TerminalDecoder {
    stripper: strip_ansi_escapes::Writer<SharedBuffer>,
    output: SharedBuffer,
}

impl Default for TerminalDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl TerminalDecoder {
    pub fn new() -> Self {
        let output = SharedBuffer::default();
        Self {
            stripper: strip_ansi_escapes::Writer::new(output.clone()),
            output,
        }
    }

    /// Printable text completed by `bytes`
    ///
    /// An unfinished escape sequence or character at the end of `bytes`
    /// produces nothing yet and is completed by a later call.
    pub fn feed(&mut self, bytes: &[u8]) -> String {
        // The stripper line-buffers internally, flush so partial lines come out
        if let Err(e) = self
            .stripper
            .write_all(bytes)
            .and_then(|_| self.stripper.flush())
        {
            debug!("Terminal decoder write failed: {}", e);
        }

        let decoded = std::mem::take(&mut *self.output.0.lock());
        String::from_utf8_lossy(&decoded).into_owned()
    }
}
