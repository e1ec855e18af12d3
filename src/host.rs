// src/host.rs
//
// Rust-side binding over the exported surface: any Read + Write + Seek value
// becomes a bridged stream whose callbacks are generic trampolines into it.
//
// Ownership:
//   - HostStream owns both the handle and the boxed resource
//   - the handle is freed before the resource is dropped, so no callback can
//     run against a dead context
//
// Errors are decoded from the exported error channel (code + message), then
// the message is freed and the slot cleared.

use std::any::Any;
use std::ffi::CStr;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::panic::{self, AssertUnwindSafe};
use std::ptr::NonNull;

use crate::error::{Result, StreamError, report_callback_failure};
use crate::ffi;
use crate::stream::{CimplStream, CimplStreamContext, SeekMode};

// ============================================================================
// Trampolines
// ============================================================================

unsafe extern "C" fn read_trampoline<T: Read>(
    context: *mut CimplStreamContext,
    data: *mut u8,
    len: usize,
) -> isize {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        // SAFETY: context is the Box<T> installed by HostStream::new, and the
        // bridge only calls back while HostStream holds &mut self.
        let inner = unsafe { &mut *context.cast::<T>() };
        // SAFETY: the bridge passes a live buffer of exactly len bytes
        let buf = unsafe { std::slice::from_raw_parts_mut(data, len) };
        inner.read(buf)
    }));
    settle(outcome).map_or(-1, |n| n as isize)
}

unsafe extern "C" fn seek_trampoline<T: Seek>(
    context: *mut CimplStreamContext,
    offset: i64,
    mode: SeekMode,
) -> i64 {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| -> io::Result<i64> {
        // SAFETY: see read_trampoline
        let inner = unsafe { &mut *context.cast::<T>() };
        let from = SeekMode::join(offset, mode)?;
        let pos = inner.seek(from)?;
        i64::try_from(pos)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, format!("position {pos} out of range")))
    }));
    settle(outcome).unwrap_or(-1)
}

unsafe extern "C" fn write_trampoline<T: Write>(
    context: *mut CimplStreamContext,
    data: *const u8,
    len: usize,
) -> isize {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        // SAFETY: see read_trampoline
        let inner = unsafe { &mut *context.cast::<T>() };
        // SAFETY: the bridge passes a live buffer of exactly len bytes
        let buf = unsafe { std::slice::from_raw_parts(data, len) };
        inner.write(buf)
    }));
    settle(outcome).map_or(-1, |n| n as isize)
}

unsafe extern "C" fn flush_trampoline<T: Write>(context: *mut CimplStreamContext) -> i32 {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        // SAFETY: see read_trampoline
        let inner = unsafe { &mut *context.cast::<T>() };
        inner.flush()
    }));
    settle(outcome).map_or(-1, |()| 0)
}

/// Unwinding must not cross the C ABI. Failures become the pending callback
/// message and the caller returns its sentinel.
fn settle<V>(outcome: std::thread::Result<io::Result<V>>) -> Option<V> {
    match outcome {
        Ok(Ok(value)) => Some(value),
        Ok(Err(e)) => {
            let text = match e.get_ref().and_then(|inner| inner.downcast_ref::<StreamError>()) {
                Some(err) => err.detail().to_string(),
                None => e.to_string(),
            };
            report_callback_failure(text);
            None
        }
        Err(payload) => {
            report_callback_failure(format!("callback panicked: {}", panic_text(&*payload)));
            None
        }
    }
}

fn panic_text(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

// ============================================================================
// HostStream
// ============================================================================

/// Owns a Rust I/O resource and the bridge handle that drives it.
pub struct HostStream<T: Read + Write + Seek> {
    handle: *mut CimplStream,
    inner: NonNull<T>,
}

// SAFETY: the handle is a registry token, and the resource is only reached
// through &mut self or from callbacks running inside a &mut self call.
unsafe impl<T: Read + Write + Seek + Send> Send for HostStream<T> {}

impl<T: Read + Write + Seek> HostStream<T> {
    pub fn new(inner: T) -> Result<Self> {
        let inner = NonNull::from(Box::leak(Box::new(inner)));

        let handle = ffi::cimpl_stream_new(
            inner.as_ptr().cast(),
            Some(read_trampoline::<T>),
            Some(seek_trampoline::<T>),
            Some(write_trampoline::<T>),
            Some(flush_trampoline::<T>),
        );
        if handle.is_null() {
            // SAFETY: leaked above and never shared, since creation failed
            drop(unsafe { Box::from_raw(inner.as_ptr()) });
            return Err(last_error());
        }

        Ok(Self { handle, inner })
    }

    /// The bridge handle, for passing to native code. Null once closed.
    pub fn as_ptr(&self) -> *mut CimplStream {
        self.handle
    }

    pub fn is_closed(&self) -> bool {
        self.handle.is_null()
    }

    pub fn get_ref(&self) -> &T {
        // SAFETY: valid until into_inner or drop; no callback runs while &self
        // is borrowed here because every bridge call takes &mut self.
        unsafe { self.inner.as_ref() }
    }

    pub fn get_mut(&mut self) -> &mut T {
        // SAFETY: see get_ref
        unsafe { self.inner.as_mut() }
    }

    /// Reads up to `size` bytes. An empty vector means end of stream.
    pub fn read(&mut self, size: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; size];
        let n = self.read_into(&mut buf)?;
        buf.truncate(n);
        Ok(buf)
    }

    pub fn read_into(&mut self, buf: &mut [u8]) -> Result<usize> {
        let handle = self.live_handle()?;
        let n = ffi::cimpl_stream_read(handle, buf.as_mut_ptr(), buf.len());
        if n < 0 {
            return Err(last_error());
        }
        Ok(n as usize)
    }

    pub fn write(&mut self, data: &[u8]) -> Result<usize> {
        let handle = self.live_handle()?;
        let n = ffi::cimpl_stream_write(handle, data.as_ptr(), data.len());
        if n < 0 {
            return Err(last_error());
        }
        Ok(n as usize)
    }

    pub fn seek(&mut self, offset: i64, mode: SeekMode) -> Result<u64> {
        let handle = self.live_handle()?;
        let pos = ffi::cimpl_stream_seek(handle, offset, mode as i32);
        if pos < 0 {
            return Err(last_error());
        }
        Ok(pos as u64)
    }

    pub fn tell(&mut self) -> Result<u64> {
        self.seek(0, SeekMode::Current)
    }

    pub fn flush(&mut self) -> Result<()> {
        let handle = self.live_handle()?;
        if ffi::cimpl_stream_flush(handle) != 0 {
            return Err(last_error());
        }
        Ok(())
    }

    /// Frees the handle. The resource stays available through `get_ref`,
    /// `get_mut` and `into_inner`. Closing twice is a no-op.
    pub fn close(&mut self) -> Result<()> {
        let handle = std::mem::replace(&mut self.handle, std::ptr::null_mut());
        if handle.is_null() {
            return Ok(());
        }
        if ffi::cimpl_stream_free(handle) != 0 {
            return Err(last_error());
        }
        tracing::debug!(handle = handle.addr(), "host stream closed");
        Ok(())
    }

    /// Closes the stream and hands the resource back.
    pub fn into_inner(mut self) -> Result<T> {
        let closed = self.close();
        let inner = self.inner;
        std::mem::forget(self);
        // SAFETY: the handle is gone, so nothing else refers to the box
        let inner = unsafe { Box::from_raw(inner.as_ptr()) };
        closed.map(|()| *inner)
    }

    fn live_handle(&self) -> Result<*mut CimplStream> {
        if self.handle.is_null() {
            return Err(StreamError::InvalidHandle("stream is closed".into()));
        }
        Ok(self.handle)
    }
}

impl<T: Read + Write + Seek> Drop for HostStream<T> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!("failed to free stream handle: {e}");
        }
        // SAFETY: handle freed above; this is the box's only owner
        drop(unsafe { Box::from_raw(self.inner.as_ptr()) });
    }
}

/// Reads the error channel the way any other binding would: the code picks
/// the variant, the message only supplies details. Leaves the slot empty.
fn last_error() -> StreamError {
    let code = ffi::cimpl_stream_error_code();
    let raw = ffi::cimpl_stream_last_error();
    let message = if raw.is_null() {
        String::new()
    } else {
        // SAFETY: a live tracked string from cimpl_stream_last_error
        let text = unsafe { CStr::from_ptr(raw) }.to_string_lossy().into_owned();
        ffi::cimpl_free(raw.cast());
        text
    };
    ffi::cimpl_stream_clear_error();

    if code == 0 {
        return StreamError::other("bridge call failed without an error");
    }
    StreamError::from_parts(code, &message)
}

// ============================================================================
// std::io
// ============================================================================

impl<T: Read + Write + Seek> Read for HostStream<T> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(self.read_into(buf)?)
    }
}

impl<T: Read + Write + Seek> Write for HostStream<T> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(HostStream::write(self, buf)?)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(HostStream::flush(self)?)
    }
}

impl<T: Read + Write + Seek> Seek for HostStream<T> {
    fn seek(&mut self, from: SeekFrom) -> io::Result<u64> {
        let (offset, mode) = SeekMode::split(from)?;
        Ok(HostStream::seek(self, offset, mode)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use std::io::Cursor;

    #[test]
    fn reads_what_was_written() {
        let mut stream = HostStream::new(Cursor::new(Vec::new())).unwrap();
        assert_eq!(stream.write(b"hello bridge").unwrap(), 12);
        assert_eq!(stream.seek(0, SeekMode::Start).unwrap(), 0);
        assert_eq!(stream.read(5).unwrap(), b"hello");
        assert_eq!(stream.tell().unwrap(), 5);
    }

    #[test]
    fn closed_stream_is_invalid_handle() {
        let mut stream = HostStream::new(Cursor::new(b"abc".to_vec())).unwrap();
        stream.close().unwrap();
        assert!(stream.is_closed());
        stream.close().unwrap();

        let err = stream.read(1).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidHandle);
        assert_eq!(stream.get_ref().get_ref(), b"abc");
    }

    #[test]
    fn negative_start_offset_is_io_error() {
        let mut stream = HostStream::new(Cursor::new(Vec::<u8>::new())).unwrap();
        let err = stream.seek(-1, SeekMode::Start).unwrap_err();
        assert_eq!(err.code(), ErrorCode::IoOperation);
        assert_eq!(err.detail(), "seek callback failed: cannot seek to negative position -1");
        // read-and-clear
        assert_eq!(StreamError::last_code(), 0);
    }

    #[test]
    fn code_decides_the_variant() {
        StreamError::Other("IoOperation: looks like io".into()).set_last();

        let err = last_error();
        assert_eq!(err.code(), ErrorCode::Other);
        assert_eq!(err.detail(), "IoOperation: looks like io");
        assert_eq!(StreamError::last_code(), 0);
        assert!(StreamError::last_message().is_none());
    }

    #[test]
    fn empty_slot_decodes_to_other() {
        StreamError::clear_last();
        let err = last_error();
        assert_eq!(err, StreamError::other("bridge call failed without an error"));
    }

    struct Exploding;

    impl Read for Exploding {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            panic!("boom");
        }
    }

    impl Write for Exploding {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::PermissionDenied, "read-only medium"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Seek for Exploding {
        fn seek(&mut self, _pos: SeekFrom) -> io::Result<u64> {
            Ok(0)
        }
    }

    #[test]
    fn panics_and_host_errors_surface_as_io_errors() {
        let mut stream = HostStream::new(Exploding).unwrap();

        let err = stream.read(4).unwrap_err();
        assert_eq!(err.code(), ErrorCode::IoOperation);
        assert!(err.detail().contains("boom"), "{err}");

        let err = stream.write(b"x").unwrap_err();
        assert_eq!(err.code(), ErrorCode::IoOperation);
        assert!(err.detail().contains("read-only medium"), "{err}");

        stream.flush().unwrap();
    }

    #[test]
    fn into_inner_returns_resource() {
        let mut stream = HostStream::new(Cursor::new(Vec::new())).unwrap();
        stream.write(b"kept").unwrap();
        let cursor = stream.into_inner().unwrap();
        assert_eq!(cursor.into_inner(), b"kept");
    }
}
