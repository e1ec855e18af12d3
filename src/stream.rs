// src/stream.rs
//
// The bridge itself: a callback table supplied by the host, wrapped in a
// CimplStream that speaks Rust's Read/Write/Seek.
//
// Sentinel conventions for the callbacks (host side):
//   read   -> bytes placed in the buffer, 0 = end of stream, < 0 = failure
//   write  -> bytes consumed,                                 < 0 = failure
//   seek   -> new absolute position,                          < 0 = failure
//   flush  -> 0 = success, anything else = failure

use std::io::{self, Read, Seek, SeekFrom, Write};

use parking_lot::{Mutex, MutexGuard};

use crate::error::{Result, StreamError, take_callback_failure};

// ============================================================================
// Context and Callbacks
// ============================================================================

/// Opaque context for stream callbacks.
///
/// Supplied by the host at construction and passed back untouched to every
/// callback. The bridge never reads through it and never frees it.
#[repr(C)]
#[derive(Debug)]
pub struct CimplStreamContext {
    _private: [u8; 0],
}

/// Reference point for a seek offset.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekMode {
    /// Absolute position from the beginning of the stream.
    Start = 0,
    /// Relative to the current position.
    Current = 1,
    /// Relative to the end of the stream.
    End = 2,
}

impl TryFrom<i32> for SeekMode {
    type Error = StreamError;

    fn try_from(mode: i32) -> Result<Self> {
        match mode {
            0 => Ok(SeekMode::Start),
            1 => Ok(SeekMode::Current),
            2 => Ok(SeekMode::End),
            other => Err(StreamError::other(format!("invalid seek mode {other}"))),
        }
    }
}

impl SeekMode {
    /// Splits a `SeekFrom` into the (offset, mode) pair the callbacks use.
    pub fn split(from: SeekFrom) -> Result<(i64, SeekMode)> {
        match from {
            SeekFrom::Start(pos) => i64::try_from(pos)
                .map(|pos| (pos, SeekMode::Start))
                .map_err(|_| StreamError::io(format!("seek position {pos} is out of range"))),
            SeekFrom::Current(delta) => Ok((delta, SeekMode::Current)),
            SeekFrom::End(delta) => Ok((delta, SeekMode::End)),
        }
    }

    /// Joins an (offset, mode) pair back into a `SeekFrom`.
    pub fn join(offset: i64, mode: SeekMode) -> Result<SeekFrom> {
        match mode {
            SeekMode::Start => u64::try_from(offset)
                .map(SeekFrom::Start)
                .map_err(|_| StreamError::io(format!("cannot seek to negative position {offset}"))),
            SeekMode::Current => Ok(SeekFrom::Current(offset)),
            SeekMode::End => Ok(SeekFrom::End(offset)),
        }
    }
}

/// Read callback: fills `data` with at most `len` bytes.
pub type CimplReadCallback =
    unsafe extern "C" fn(context: *mut CimplStreamContext, data: *mut u8, len: usize) -> isize;

/// Seek callback: moves to `offset` relative to `mode`, returns the new position.
pub type CimplSeekCallback =
    unsafe extern "C" fn(context: *mut CimplStreamContext, offset: i64, mode: SeekMode) -> i64;

/// Write callback: consumes at most `len` bytes from `data`.
pub type CimplWriteCallback =
    unsafe extern "C" fn(context: *mut CimplStreamContext, data: *const u8, len: usize) -> isize;

/// Flush callback: pushes out anything buffered on the host side.
pub type CimplFlushCallback = unsafe extern "C" fn(context: *mut CimplStreamContext) -> i32;

// ============================================================================
// Callback Table
// ============================================================================

/// The four entry points plus the context they are invoked with.
///
/// Only ever built through `new`, so every pointer in it is non-null.
#[derive(Debug, Clone, Copy)]
pub struct CallbackTable {
    context: *mut CimplStreamContext,
    reader: CimplReadCallback,
    seeker: CimplSeekCallback,
    writer: CimplWriteCallback,
    flusher: CimplFlushCallback,
}

impl CallbackTable {
    pub fn new(
        context: *mut CimplStreamContext,
        reader: Option<CimplReadCallback>,
        seeker: Option<CimplSeekCallback>,
        writer: Option<CimplWriteCallback>,
        flusher: Option<CimplFlushCallback>,
    ) -> Result<Self> {
        if context.is_null() {
            return Err(StreamError::null_parameter("context"));
        }
        Ok(Self {
            context,
            reader: reader.ok_or_else(|| StreamError::null_parameter("reader"))?,
            seeker: seeker.ok_or_else(|| StreamError::null_parameter("seeker"))?,
            writer: writer.ok_or_else(|| StreamError::null_parameter("writer"))?,
            flusher: flusher.ok_or_else(|| StreamError::null_parameter("flusher"))?,
        })
    }

    fn read(&self, buf: &mut [u8]) -> Result<usize> {
        if buf.len() > isize::MAX as usize {
            return Err(StreamError::invalid_buffer(buf.len(), "buffer"));
        }
        discard_stale_message();

        // SAFETY: the host promised the callback and context outlive the
        // stream; buf is a live, writable slice of exactly buf.len() bytes.
        let n = unsafe { (self.reader)(self.context, buf.as_mut_ptr(), buf.len()) };

        if n < 0 {
            return Err(callback_failure("read", n as i64));
        }
        let n = n as usize;
        if n > buf.len() {
            return Err(StreamError::io(format!(
                "read callback reported {n} bytes for a {}-byte buffer",
                buf.len()
            )));
        }
        Ok(n)
    }

    fn write(&self, buf: &[u8]) -> Result<usize> {
        if buf.len() > isize::MAX as usize {
            return Err(StreamError::invalid_buffer(buf.len(), "data"));
        }
        discard_stale_message();

        // SAFETY: see read(); buf is readable for buf.len() bytes.
        let n = unsafe { (self.writer)(self.context, buf.as_ptr(), buf.len()) };

        if n < 0 {
            return Err(callback_failure("write", n as i64));
        }
        let n = n as usize;
        if n > buf.len() {
            return Err(StreamError::io(format!(
                "write callback reported {n} bytes for {} bytes of data",
                buf.len()
            )));
        }
        Ok(n)
    }

    fn seek(&self, offset: i64, mode: SeekMode) -> Result<u64> {
        discard_stale_message();

        // SAFETY: see read()
        let pos = unsafe { (self.seeker)(self.context, offset, mode) };

        if pos < 0 {
            return Err(callback_failure("seek", pos));
        }
        Ok(pos as u64)
    }

    fn flush(&self) -> Result<()> {
        discard_stale_message();

        // SAFETY: see read()
        let rc = unsafe { (self.flusher)(self.context) };

        if rc != 0 {
            return Err(callback_failure("flush", rc as i64));
        }
        Ok(())
    }
}

fn discard_stale_message() {
    let _ = take_callback_failure();
}

fn callback_failure(op: &str, returned: i64) -> StreamError {
    let err = match take_callback_failure() {
        Some(msg) => StreamError::io(format!("{op} callback failed: {msg}")),
        None => StreamError::io(format!("{op} callback returned {returned}")),
    };
    tracing::warn!("{err}");
    err
}

// ============================================================================
// Stream
// ============================================================================

/// A stream that bridges host callbacks to Rust's Read/Write/Seek traits.
///
/// Admits one call at a time. A second concurrent or re-entrant call fails
/// instead of aliasing the host's resource.
pub struct CimplStream {
    callbacks: CallbackTable,
    gate: Mutex<()>,
}

// SAFETY: the context pointer is only ever handed back to the host's own
// callbacks, and `gate` serialises every call that does so.
unsafe impl Send for CimplStream {}
unsafe impl Sync for CimplStream {}

impl CimplStream {
    pub fn new(callbacks: CallbackTable) -> Self {
        Self {
            callbacks,
            gate: Mutex::new(()),
        }
    }

    fn enter(&self) -> Result<MutexGuard<'_, ()>> {
        self.gate
            .try_lock()
            .ok_or_else(|| StreamError::other("stream handle is busy with another call"))
    }

    pub fn try_read(&self, buf: &mut [u8]) -> Result<usize> {
        let _guard = self.enter()?;
        let n = self.callbacks.read(buf)?;
        tracing::trace!(requested = buf.len(), read = n, "stream read");
        Ok(n)
    }

    pub fn try_write(&self, buf: &[u8]) -> Result<usize> {
        let _guard = self.enter()?;
        let n = self.callbacks.write(buf)?;
        tracing::trace!(requested = buf.len(), written = n, "stream write");
        Ok(n)
    }

    pub fn try_seek(&self, offset: i64, mode: SeekMode) -> Result<u64> {
        let _guard = self.enter()?;
        let pos = self.callbacks.seek(offset, mode)?;
        tracing::trace!(offset, ?mode, pos, "stream seek");
        Ok(pos)
    }

    pub fn try_flush(&self) -> Result<()> {
        let _guard = self.enter()?;
        self.callbacks.flush()
    }
}

impl Drop for CimplStream {
    fn drop(&mut self) {
        // No callback runs here. The host closes its own resource.
        tracing::trace!(context = ?self.callbacks.context, "stream dropped");
    }
}

// ============================================================================
// Trait Implementations
// ============================================================================

impl Read for CimplStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(self.try_read(buf)?)
    }
}

impl Write for CimplStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(self.try_write(buf)?)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(self.try_flush()?)
    }
}

impl Seek for CimplStream {
    fn seek(&mut self, from: SeekFrom) -> io::Result<u64> {
        let (offset, mode) = SeekMode::split(from)?;
        Ok(self.try_seek(offset, mode)?)
    }
}
