//! Device capability boundary
//!
//! The processing loop never talks to hardware. It drives a
//! [`CaptureSource`] and a [`PlaybackSink`] supplied by the device layer,
//! which has already negotiated the format. Both run on the loop's thread
//! and may block for up to one frame duration per call.

use parking_lot::Mutex;
use std::io::{ErrorKind, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::AudioError;

/// Result of asking a capture source for one frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillOutcome {
    /// `n` bytes written to the front of the buffer
    Filled(usize),
    /// The source has no more data. Not an error.
    EndOfStream,
}

/// Input side: microphone line, file, generator...
pub trait CaptureSource: Send {
    /// Fill all of `buf` or report end of stream
    fn fill(&mut self, buf: &mut [u8]) -> Result<FillOutcome, AudioError>;

    /// Release the device
    fn close(&mut self) -> Result<(), AudioError> {
        Ok(())
    }
}

/// Output side: speaker line, file, null device...
pub trait PlaybackSink: Send {
    fn write(&mut self, buf: &[u8]) -> Result<(), AudioError>;

    /// Block until everything written has been output
    fn drain(&mut self) -> Result<(), AudioError> {
        Ok(())
    }

    /// Release the device
    fn close(&mut self) -> Result<(), AudioError> {
        Ok(())
    }
}

impl<T: CaptureSource + ?Sized> CaptureSource for Box<T> {
    fn fill(&mut self, buf: &mut [u8]) -> Result<FillOutcome, AudioError> {
        (**self).fill(buf)
    }

    fn close(&mut self) -> Result<(), AudioError> {
        (**self).close()
    }
}

impl<T: PlaybackSink + ?Sized> PlaybackSink for Box<T> {
    fn write(&mut self, buf: &[u8]) -> Result<(), AudioError> {
        (**self).write(buf)
    }

    fn drain(&mut self) -> Result<(), AudioError> {
        (**self).drain()
    }

    fn close(&mut self) -> Result<(), AudioError> {
        (**self).close()
    }
}

/// Capture from any byte stream (raw PCM file, stdin, pipe).
///
/// A trailing partial frame counts as end of stream and is discarded.
pub struct ReaderSource<R> {
    reader: R,
}

impl<R: Read + Send> ReaderSource<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }

    pub fn into_inner(self) -> R {
        self.reader
    }
}

impl<R: Read + Send> CaptureSource for ReaderSource<R> {
    fn fill(&mut self, buf: &mut [u8]) -> Result<FillOutcome, AudioError> {
        match self.reader.read_exact(buf) {
            Ok(()) => Ok(FillOutcome::Filled(buf.len())),
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => Ok(FillOutcome::EndOfStream),
            Err(e) => Err(AudioError::Io(e)),
        }
    }
}

/// Playback into any byte sink (file, stdout, pipe)
pub struct WriterSink<W> {
    writer: W,
}

impl<W: Write + Send> WriterSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Send> PlaybackSink for WriterSink<W> {
    fn write(&mut self, buf: &[u8]) -> Result<(), AudioError> {
        self.writer.write_all(buf)?;
        Ok(())
    }

    fn drain(&mut self) -> Result<(), AudioError> {
        self.writer.flush()?;
        Ok(())
    }

    fn close(&mut self) -> Result<(), AudioError> {
        self.drain()
    }
}

/// Discards everything; counts bytes
#[derive(Debug, Default)]
pub struct NullSink {
    bytes_written: u64,
}

impl NullSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }
}

impl PlaybackSink for NullSink {
    fn write(&mut self, buf: &[u8]) -> Result<(), AudioError> {
        self.bytes_written += buf.len() as u64;
        Ok(())
    }
}

/// Records played bytes into a shared buffer readable from other threads
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    buffer: Arc<Mutex<Vec<u8>>>,
    closed: Arc<AtomicBool>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything written so far
    pub fn contents(&self) -> Vec<u8> {
        self.buffer.lock().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl PlaybackSink for MemorySink {
    fn write(&mut self, buf: &[u8]) -> Result<(), AudioError> {
        if self.is_closed() {
            return Err(AudioError::DeviceFailure("write to closed sink".into()));
        }
        self.buffer.lock().extend_from_slice(buf);
        Ok(())
    }

    fn close(&mut self) -> Result<(), AudioError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}
