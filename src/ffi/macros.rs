// src/ffi/macros.rs
//
// Early-return helpers for the export shims. Each one parks the error in the
// last-error slot and returns the caller-chosen sentinel, so control flow is
// visible at the call site: every macro here returns.

/// Unwrap a `Result`, or record the error and return `$err_val`.
macro_rules! ok_or_return {
    ($result:expr, $err_val:expr) => {
        match $result {
            Ok(value) => value,
            Err(err) => {
                let err: $crate::error::StreamError = err.into();
                tracing::debug!(code = err.code().as_i32(), "{err}");
                err.set_last();
                return $err_val;
            }
        }
    };
}

/// Return `$err_val` with a NullParameter error if `$ptr` is NULL.
macro_rules! ptr_or_return {
    ($ptr:expr, $err_val:expr) => {
        if $ptr.is_null() {
            $crate::error::StreamError::null_parameter(stringify!($ptr)).set_last();
            return $err_val;
        }
    };
}
