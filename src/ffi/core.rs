use std::ffi::{c_char, c_void};
use std::path::PathBuf;

use super::scaffold::{bytes_arg, bytes_arg_mut, cstr_arg, to_c_string};
use crate::config;
use crate::error::{StreamError, report_callback_failure};
use crate::registry::registry;
use crate::stream::{
    CallbackTable, CimplFlushCallback, CimplReadCallback, CimplSeekCallback, CimplStream,
    CimplStreamContext, CimplWriteCallback, SeekMode,
};

// ---------- FFI: stream lifecycle ----------

/// Creates a new stream from host callbacks.
///
/// # Parameters
/// - `context`: opaque pointer handed back to every callback (must not be NULL)
/// - `reader`, `seeker`, `writer`, `flusher`: callback entry points (none may be NULL)
///
/// # Returns
/// - an opaque stream handle on success
/// - NULL on error (`cimpl_stream_error_code()` is `NullParameter`)
///
/// # Safety
/// - The context and all callbacks must stay valid until the handle is freed
/// - The handle must be released exactly once with `cimpl_stream_free()` or `cimpl_free()`
///
/// # Example
/// ```c
/// CimplStream* stream = cimpl_stream_new(ctx, my_read, my_seek, my_write, my_flush);
/// if (!stream) {
///     char* msg = cimpl_stream_last_error();
///     fprintf(stderr, "%s\n", msg);
///     cimpl_free(msg);
///     return -1;
/// }
/// /* ... */
/// cimpl_stream_free(stream);
/// ```
#[unsafe(no_mangle)]
pub extern "C" fn cimpl_stream_new(
    context: *mut CimplStreamContext,
    reader: Option<CimplReadCallback>,
    seeker: Option<CimplSeekCallback>,
    writer: Option<CimplWriteCallback>,
    flusher: Option<CimplFlushCallback>,
) -> *mut CimplStream {
    let callbacks = ok_or_return!(
        CallbackTable::new(context, reader, seeker, writer, flusher),
        std::ptr::null_mut()
    );

    let handle = registry().track(CimplStream::new(callbacks));
    tracing::debug!(handle = handle.addr(), ?context, "stream created");
    handle
}

/// Releases a stream handle. Never invokes any callback.
///
/// # Returns
/// - 0 on success, or when `stream` is NULL
/// - -1 if the handle is unknown or already freed (`InvalidHandle`), or is
///   not a stream (`WrongHandleType`)
#[unsafe(no_mangle)]
pub extern "C" fn cimpl_stream_free(stream: *mut CimplStream) -> i32 {
    ok_or_return!(registry().release_as(stream), -1);
    0
}

/// Releases anything this library handed out: stream handles and strings.
///
/// # Returns
/// - 0 on success, or when `ptr` is NULL
/// - -1 if the pointer is untracked, e.g. a double free (`InvalidHandle`)
#[unsafe(no_mangle)]
pub extern "C" fn cimpl_free(ptr: *mut c_void) -> i32 {
    ok_or_return!(registry().release(ptr), -1);
    0
}

// ---------- FFI: stream operations ----------

/// Reads up to `len` bytes into `buffer`.
///
/// # Returns
/// - number of bytes read (0 at end of stream)
/// - -1 on error
///
/// # Example
/// ```c
/// uint8_t buffer[1024];
/// intptr_t n = cimpl_stream_read(stream, buffer, sizeof(buffer));
/// if (n < 0) { /* cimpl_stream_error_code() tells why */ }
/// ```
#[unsafe(no_mangle)]
pub extern "C" fn cimpl_stream_read(stream: *mut CimplStream, buffer: *mut u8, len: usize) -> isize {
    let s = ok_or_return!(registry().acquire(stream), -1);
    ptr_or_return!(buffer, -1);
    // SAFETY: the caller guarantees `buffer` is writable for `len` bytes
    let buf = ok_or_return!(unsafe { bytes_arg_mut(buffer, len, "buffer") }, -1);

    let n = ok_or_return!(s.try_read(buf), -1);
    n as isize
}

/// Writes up to `len` bytes from `data`. A short count is not an error.
///
/// # Returns
/// - number of bytes written
/// - -1 on error
#[unsafe(no_mangle)]
pub extern "C" fn cimpl_stream_write(stream: *mut CimplStream, data: *const u8, len: usize) -> isize {
    let s = ok_or_return!(registry().acquire(stream), -1);
    ptr_or_return!(data, -1);
    // SAFETY: the caller guarantees `data` is readable for `len` bytes
    let buf = ok_or_return!(unsafe { bytes_arg(data, len, "data") }, -1);

    let n = ok_or_return!(s.try_write(buf), -1);
    n as isize
}

/// Moves the stream position.
///
/// `mode` is 0 (start), 1 (current) or 2 (end). Any other value fails with
/// `Other` without reaching the seek callback.
///
/// # Returns
/// - the new absolute position
/// - -1 on error
///
/// # Example
/// ```c
/// int64_t size = cimpl_stream_seek(stream, 0, CIMPL_SEEK_END);
/// int64_t here = cimpl_stream_seek(stream, 0, CIMPL_SEEK_CURRENT);
/// ```
#[unsafe(no_mangle)]
pub extern "C" fn cimpl_stream_seek(stream: *mut CimplStream, offset: i64, mode: i32) -> i64 {
    let s = ok_or_return!(registry().acquire(stream), -1);
    let mode = ok_or_return!(SeekMode::try_from(mode), -1);

    let pos = ok_or_return!(s.try_seek(offset, mode), -1);
    match i64::try_from(pos) {
        Ok(pos) => pos,
        Err(_) => {
            StreamError::io(format!("position {pos} does not fit the return type")).set_last();
            -1
        }
    }
}

/// Flushes the stream.
///
/// # Returns
/// - 0 on success
/// - -1 on error
#[unsafe(no_mangle)]
pub extern "C" fn cimpl_stream_flush(stream: *mut CimplStream) -> i32 {
    let s = ok_or_return!(registry().acquire(stream), -1);
    ok_or_return!(s.try_flush(), -1);
    0
}

// ---------- FFI: error state ----------

/// Gets the last error message on this thread, or NULL if none.
///
/// The returned string must be released with `cimpl_free()`.
#[unsafe(no_mangle)]
pub extern "C" fn cimpl_stream_last_error() -> *mut c_char {
    match StreamError::last_message() {
        Some(msg) => to_c_string(msg),
        None => std::ptr::null_mut(),
    }
}

/// Gets the last error code on this thread (0 if none).
#[unsafe(no_mangle)]
pub extern "C" fn cimpl_stream_error_code() -> i32 {
    StreamError::last_code()
}

/// Clears the last error on this thread.
#[unsafe(no_mangle)]
pub extern "C" fn cimpl_stream_clear_error() {
    StreamError::clear_last();
}

/// Called from inside a callback, just before it returns a failure sentinel,
/// to explain what went wrong. The text ends up in the `IoOperation` error of
/// the bridge call that invoked the callback. NULL is ignored.
#[unsafe(no_mangle)]
pub extern "C" fn cimpl_stream_report_error(message: *const c_char) {
    if message.is_null() {
        return;
    }
    // SAFETY: non-null and NUL-terminated per the contract
    match unsafe { cstr_arg(message, "message") } {
        Ok(msg) => report_callback_failure(msg),
        Err(e) => report_callback_failure(e.to_string()),
    }
}

// ---------- FFI: diagnostics ----------

/// Installs the tracing subscriber (stderr, plus a file if configured).
///
/// Returns false if a subscriber was already installed.
#[unsafe(no_mangle)]
pub extern "C" fn cimpl_stream_init_tracing() -> bool {
    config::init_tracing()
}

/// Sets the file that receives a copy of the logs. Only effective before
/// `cimpl_stream_init_tracing()`.
#[unsafe(no_mangle)]
pub extern "C" fn cimpl_stream_set_log_file(path: *const c_char) -> bool {
    // SAFETY: NUL-terminated per the contract; NULL is reported, not read
    let path = ok_or_return!(unsafe { cstr_arg(path, "path") }, false);
    if config::tracing_started() {
        StreamError::other("tracing is already initialized").set_last();
        return false;
    }
    config::update_config(|cfg| cfg.log_file = Some(PathBuf::from(path)));
    true
}

/// Number of handles and strings not yet released. Logs them when leak
/// warnings are enabled.
#[unsafe(no_mangle)]
pub extern "C" fn cimpl_stream_outstanding() -> usize {
    registry().report_leaks()
}
