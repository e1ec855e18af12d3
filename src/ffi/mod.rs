// src/ffi/mod.rs
//
// Everything exported over the C ABI lives here.
//
//   macros.rs   - early-return helpers that park errors in the last-error slot
//   scaffold.rs - argument conversion (C strings, raw buffers) and owned strings
//   core.rs     - the #[unsafe(no_mangle)] extern "C" functions

#[macro_use]
mod macros;
mod core;
mod scaffold;

// Re-export scaffold utilities (used by the host wrapper and tests)
pub use self::scaffold::{MAX_CSTRING_LEN, cstr_arg, to_c_string};

// Re-export all FFI functions from core
pub use self::core::*;
