//! Callback-driven stream bridge.
//!
//! A host hands over four callbacks (read, seek, write, flush) plus an opaque
//! context and gets back a handle. Native code then drives the host's I/O
//! through that handle over the C ABI. Failures come back as a sentinel return
//! value plus a per-thread last-error slot.
//!
//! ```no_run
//! use std::io::{Cursor, Read, Seek, Write};
//! use cimpl_stream::HostStream;
//!
//! let mut stream = HostStream::new(Cursor::new(Vec::new()))?;
//! stream.write_all(b"across the boundary")?;
//! stream.rewind()?;
//! let mut text = String::new();
//! stream.read_to_string(&mut text)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod config;
pub mod error;
pub mod ffi;
pub mod host;
pub mod registry;
pub mod stream;

pub use config::{BridgeConfig, init_tracing};
pub use error::{ErrorCode, Result, StreamError};
pub use ffi::*;
pub use host::HostStream;
pub use registry::{HandleRegistry, registry};
pub use stream::{
    CallbackTable, CimplFlushCallback, CimplReadCallback, CimplSeekCallback, CimplStream,
    CimplStreamContext, CimplWriteCallback, SeekMode,
};
