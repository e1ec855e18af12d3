// src/error.rs
//
// Error taxonomy and the per-thread last-error slot.
//
// Every fallible export reports failure on two channels:
//   1. a sentinel in its return value (-1, NULL, non-zero status)
//   2. a StreamError parked in LAST_ERROR, queried with
//      cimpl_stream_error_code() / cimpl_stream_last_error()
//
// The slot is thread-local. A failing call on one thread never clobbers the
// error another thread is about to read.

use std::cell::RefCell;
use std::io;

pub type Result<T> = std::result::Result<T, StreamError>;

thread_local! {
    static LAST_ERROR: RefCell<Option<StreamError>> = const { RefCell::new(None) };
    static CALLBACK_MESSAGE: RefCell<Option<String>> = const { RefCell::new(None) };
}

// ============================================================================
// Error Codes
// ============================================================================

/// Stable numeric error codes seen by callers on the other side of the ABI.
///
/// 1-99 are boundary-contract errors, 100+ are stream errors.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// No error occurred
    Ok = 0,
    /// A required parameter was NULL
    NullParameter = 1,
    /// String exceeds maximum allowed length
    StringTooLong = 2,
    /// Handle value is invalid or already freed
    InvalidHandle = 3,
    /// Handle refers to something other than the expected type
    WrongHandleType = 4,
    /// Other unspecified error
    Other = 5,
    /// A read, write, seek or flush callback failed
    IoOperation = 100,
    /// Buffer length cannot be addressed safely
    InvalidBuffer = 101,
}

impl ErrorCode {
    pub const fn as_i32(self) -> i32 {
        self as i32
    }

    pub const fn from_i32(code: i32) -> Option<Self> {
        match code {
            0 => Some(Self::Ok),
            1 => Some(Self::NullParameter),
            2 => Some(Self::StringTooLong),
            3 => Some(Self::InvalidHandle),
            4 => Some(Self::WrongHandleType),
            5 => Some(Self::Other),
            100 => Some(Self::IoOperation),
            101 => Some(Self::InvalidBuffer),
            _ => None,
        }
    }
}

// ============================================================================
// StreamError
// ============================================================================

/// Typed failure for every bridge operation.
///
/// `Display` renders the `"VariantName: details"` form that is handed across
/// the boundary as the last-error message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    #[error("NullParameter: {0}")]
    NullParameter(String),
    #[error("StringTooLong: {0}")]
    StringTooLong(String),
    #[error("InvalidHandle: {0}")]
    InvalidHandle(String),
    #[error("WrongHandleType: {0}")]
    WrongHandleType(String),
    #[error("Other: {0}")]
    Other(String),
    #[error("IoOperation: {0}")]
    Io(String),
    #[error("InvalidBuffer: {0}")]
    InvalidBuffer(String),
}

impl StreamError {
    pub fn null_parameter<S: Into<String>>(param: S) -> Self {
        Self::NullParameter(param.into())
    }

    pub fn string_too_long<S: Into<String>>(param: S) -> Self {
        Self::StringTooLong(param.into())
    }

    pub fn invalid_handle(handle: usize) -> Self {
        Self::InvalidHandle(format!("0x{handle:x}"))
    }

    pub fn wrong_handle_type(handle: usize) -> Self {
        Self::WrongHandleType(format!("0x{handle:x}"))
    }

    pub fn other<S: Into<String>>(msg: S) -> Self {
        Self::Other(msg.into())
    }

    pub fn io<S: Into<String>>(msg: S) -> Self {
        Self::Io(msg.into())
    }

    pub fn invalid_buffer(len: usize, param: &str) -> Self {
        Self::InvalidBuffer(format!("{len} for '{param}'"))
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            Self::NullParameter(_) => ErrorCode::NullParameter,
            Self::StringTooLong(_) => ErrorCode::StringTooLong,
            Self::InvalidHandle(_) => ErrorCode::InvalidHandle,
            Self::WrongHandleType(_) => ErrorCode::WrongHandleType,
            Self::Other(_) => ErrorCode::Other,
            Self::Io(_) => ErrorCode::IoOperation,
            Self::InvalidBuffer(_) => ErrorCode::InvalidBuffer,
        }
    }

    /// The details part of the message, without the variant prefix.
    pub fn detail(&self) -> &str {
        match self {
            Self::NullParameter(d)
            | Self::StringTooLong(d)
            | Self::InvalidHandle(d)
            | Self::WrongHandleType(d)
            | Self::Other(d)
            | Self::Io(d)
            | Self::InvalidBuffer(d) => d,
        }
    }

    /// Rebuilds a typed error from what crossed the boundary.
    ///
    /// The code decides the variant. The message only supplies the details.
    /// Unknown codes (and 0) fold into `Other`.
    pub fn from_parts(code: i32, message: &str) -> Self {
        let detail = message
            .split_once(": ")
            .map(|(_, rest)| rest)
            .unwrap_or(message)
            .to_string();
        match ErrorCode::from_i32(code) {
            Some(ErrorCode::NullParameter) => Self::NullParameter(detail),
            Some(ErrorCode::StringTooLong) => Self::StringTooLong(detail),
            Some(ErrorCode::InvalidHandle) => Self::InvalidHandle(detail),
            Some(ErrorCode::WrongHandleType) => Self::WrongHandleType(detail),
            Some(ErrorCode::IoOperation) => Self::Io(detail),
            Some(ErrorCode::InvalidBuffer) => Self::InvalidBuffer(detail),
            Some(ErrorCode::Other) | Some(ErrorCode::Ok) | None => Self::Other(detail),
        }
    }

    // ------------------------------------------------------------------------
    // Last-error slot
    // ------------------------------------------------------------------------

    /// Sets this error as the last error on the current thread
    pub fn set_last(self) {
        LAST_ERROR.with(|prev| *prev.borrow_mut() = Some(self));
    }

    /// Peeks at the last error code. Returns 0 if no error is set.
    pub fn last_code() -> i32 {
        LAST_ERROR.with(|prev| {
            prev.borrow()
                .as_ref()
                .map(|e| e.code().as_i32())
                .unwrap_or(0)
        })
    }

    /// Peeks at the last error message without clearing it
    pub fn last_message() -> Option<String> {
        LAST_ERROR.with(|prev| prev.borrow().as_ref().map(|e| e.to_string()))
    }

    /// Takes the last error and clears the slot
    pub fn take_last() -> Option<StreamError> {
        LAST_ERROR.with(|prev| prev.borrow_mut().take())
    }

    pub fn clear_last() {
        LAST_ERROR.with(|prev| *prev.borrow_mut() = None);
    }
}

// ============================================================================
// Pending callback message
// ============================================================================

/// Records why a host callback is about to return a failure sentinel.
///
/// The bridge folds this text into the `IoOperation` error it raises for the
/// failed call. Later calls never see it.
pub fn report_callback_failure<S: Into<String>>(message: S) {
    CALLBACK_MESSAGE.with(|slot| *slot.borrow_mut() = Some(message.into()));
}

pub fn take_callback_failure() -> Option<String> {
    CALLBACK_MESSAGE.with(|slot| slot.borrow_mut().take())
}

// ============================================================================
// std::io interop
// ============================================================================

impl From<io::Error> for StreamError {
    fn from(e: io::Error) -> Self {
        // A StreamError that travelled through io::Error keeps its category.
        if let Some(inner) = e.get_ref().and_then(|i| i.downcast_ref::<StreamError>()) {
            return inner.clone();
        }
        Self::Io(e.to_string())
    }
}

impl From<StreamError> for io::Error {
    fn from(e: StreamError) -> Self {
        let kind = match e {
            StreamError::NullParameter(_)
            | StreamError::StringTooLong(_)
            | StreamError::InvalidBuffer(_) => io::ErrorKind::InvalidInput,
            StreamError::InvalidHandle(_) | StreamError::WrongHandleType(_) => {
                io::ErrorKind::NotConnected
            }
            StreamError::Io(_) | StreamError::Other(_) => io::ErrorKind::Other,
        };
        io::Error::new(kind, e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(ErrorCode::Ok.as_i32(), 0);
        assert_eq!(ErrorCode::NullParameter.as_i32(), 1);
        assert_eq!(ErrorCode::StringTooLong.as_i32(), 2);
        assert_eq!(ErrorCode::InvalidHandle.as_i32(), 3);
        assert_eq!(ErrorCode::WrongHandleType.as_i32(), 4);
        assert_eq!(ErrorCode::Other.as_i32(), 5);
        assert_eq!(ErrorCode::IoOperation.as_i32(), 100);
        assert_eq!(ErrorCode::InvalidBuffer.as_i32(), 101);
        assert_eq!(ErrorCode::from_i32(6), None);
    }

    #[test]
    fn message_carries_variant_prefix() {
        let err = StreamError::null_parameter("reader");
        assert_eq!(err.code(), ErrorCode::NullParameter);
        assert_eq!(err.to_string(), "NullParameter: reader");

        let err = StreamError::invalid_handle(0xdead_beef);
        assert_eq!(err.to_string(), "InvalidHandle: 0xdeadbeef");

        let err = StreamError::invalid_buffer(1000, "data");
        assert_eq!(err.code(), ErrorCode::InvalidBuffer);
        assert!(err.detail().contains("1000"));
        assert!(err.detail().contains("data"));
    }

    #[test]
    fn from_parts_trusts_the_code() {
        let err = StreamError::from_parts(100, "IoOperation: read callback returned -1");
        assert_eq!(err, StreamError::io("read callback returned -1"));

        // A mismatched prefix does not change the category.
        let err = StreamError::from_parts(3, "Other: gone");
        assert_eq!(err, StreamError::InvalidHandle("gone".into()));

        let err = StreamError::from_parts(42, "no prefix here");
        assert_eq!(err, StreamError::other("no prefix here"));
    }

    #[test]
    fn last_error_lifecycle() {
        StreamError::clear_last();
        assert_eq!(StreamError::last_code(), 0);
        assert_eq!(StreamError::last_message(), None);

        StreamError::io("first").set_last();
        StreamError::other("second").set_last();
        assert_eq!(StreamError::last_code(), 5);
        assert_eq!(StreamError::last_message().as_deref(), Some("Other: second"));

        // peeking does not clear
        assert_eq!(StreamError::last_code(), 5);

        let taken = StreamError::take_last();
        assert_eq!(taken, Some(StreamError::other("second")));
        assert_eq!(StreamError::last_code(), 0);
    }

    #[test]
    fn last_error_is_thread_local() {
        StreamError::other("main thread").set_last();

        std::thread::spawn(|| {
            assert_eq!(StreamError::last_code(), 0);
            StreamError::io("spawned thread").set_last();
            assert_eq!(StreamError::last_code(), 100);
        })
        .join()
        .unwrap();

        assert_eq!(StreamError::last_code(), 5);
        StreamError::clear_last();
    }

    #[test]
    fn callback_message_is_taken_once() {
        report_callback_failure("disk on fire");
        assert_eq!(take_callback_failure().as_deref(), Some("disk on fire"));
        assert_eq!(take_callback_failure(), None);
    }

    #[test]
    fn io_round_trip_keeps_category() {
        let original = StreamError::invalid_handle(0x11);
        let as_io: io::Error = original.clone().into();
        assert_eq!(as_io.kind(), io::ErrorKind::NotConnected);
        assert_eq!(StreamError::from(as_io), original);

        let plain = io::Error::new(io::ErrorKind::BrokenPipe, "pipe closed");
        assert_eq!(StreamError::from(plain), StreamError::io("pipe closed"));
    }
}
