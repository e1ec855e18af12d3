use std::ffi::c_char;

use crate::error::{Result, StreamError};
use crate::registry::registry;

/// Longest C string accepted from the host, terminator excluded (64KB)
pub const MAX_CSTRING_LEN: usize = 65536;

/// Reads a NUL-terminated string, never looking past `MAX_CSTRING_LEN` bytes.
///
/// # Safety
/// `ptr` must be NULL or readable up to its terminator or the limit,
/// whichever comes first.
pub unsafe fn cstr_arg(ptr: *const c_char, param: &str) -> Result<String> {
    if ptr.is_null() {
        return Err(StreamError::null_parameter(param));
    }
    let bytes = ptr.cast::<u8>();
    for len in 0..=MAX_CSTRING_LEN {
        // SAFETY: every byte before this one was non-NUL, so per the contract
        // this byte is still inside the host's string.
        if unsafe { *bytes.add(len) } == 0 {
            // SAFETY: the len bytes before the terminator were just read.
            let slice = unsafe { std::slice::from_raw_parts(bytes, len) };
            return Ok(String::from_utf8_lossy(slice).into_owned());
        }
    }
    Err(StreamError::string_too_long(param))
}

/// Turns a host buffer into a slice after NULL and length checks.
///
/// # Safety
/// `ptr` must be valid for reads of `len` bytes for the returned lifetime.
pub unsafe fn bytes_arg<'a>(ptr: *const u8, len: usize, param: &str) -> Result<&'a [u8]> {
    if ptr.is_null() {
        return Err(StreamError::null_parameter(param));
    }
    if len > isize::MAX as usize {
        return Err(StreamError::invalid_buffer(len, param));
    }
    // SAFETY: non-null, bounded by isize::MAX, validity per the contract
    Ok(unsafe { std::slice::from_raw_parts(ptr, len) })
}

/// Mutable counterpart of [`bytes_arg`].
///
/// # Safety
/// `ptr` must be valid for writes of `len` bytes for the returned lifetime and
/// not aliased elsewhere.
pub unsafe fn bytes_arg_mut<'a>(ptr: *mut u8, len: usize, param: &str) -> Result<&'a mut [u8]> {
    if ptr.is_null() {
        return Err(StreamError::null_parameter(param));
    }
    if len > isize::MAX as usize {
        return Err(StreamError::invalid_buffer(len, param));
    }
    // SAFETY: see bytes_arg
    Ok(unsafe { std::slice::from_raw_parts_mut(ptr, len) })
}

/// Hands `s` to the host as a tracked C string; release it with `cimpl_free`.
pub fn to_c_string(s: String) -> *mut c_char {
    registry().track_string(s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use std::ffi::CString;

    #[test]
    fn cstr_arg_reads_until_nul() {
        let owned = CString::new("log/bridge.txt").unwrap();
        let s = unsafe { cstr_arg(owned.as_ptr(), "path") }.unwrap();
        assert_eq!(s, "log/bridge.txt");
    }

    #[test]
    fn cstr_arg_rejects_null_and_overlong() {
        let err = unsafe { cstr_arg(std::ptr::null(), "path") }.unwrap_err();
        assert_eq!(err, StreamError::null_parameter("path"));

        let long = vec![b'x'; MAX_CSTRING_LEN + 1];
        let owned = CString::new(long).unwrap();
        let err = unsafe { cstr_arg(owned.as_ptr(), "path") }.unwrap_err();
        assert_eq!(err.code(), ErrorCode::StringTooLong);
    }

    #[test]
    fn cstr_arg_accepts_exact_limit() {
        let owned = CString::new(vec![b'y'; MAX_CSTRING_LEN]).unwrap();
        let s = unsafe { cstr_arg(owned.as_ptr(), "path") }.unwrap();
        assert_eq!(s.len(), MAX_CSTRING_LEN);
    }

    #[test]
    fn buffer_checks() {
        let data = [1u8, 2, 3];
        let slice = unsafe { bytes_arg(data.as_ptr(), data.len(), "data") }.unwrap();
        assert_eq!(slice, &[1, 2, 3]);

        let err = unsafe { bytes_arg(std::ptr::null(), 3, "data") }.unwrap_err();
        assert_eq!(err.code(), ErrorCode::NullParameter);

        let mut buf = [0u8; 2];
        let err = unsafe { bytes_arg_mut(buf.as_mut_ptr(), usize::MAX, "buffer") }.unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidBuffer);
    }
}
