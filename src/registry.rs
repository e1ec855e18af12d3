// src/registry.rs
//
// Tracks everything handed across the boundary:
//   - handles: opaque odd-valued tokens mapped to Arc'd native objects
//   - strings: owned C strings the host must give back through cimpl_free()
//
// Handle tokens are never dereferenced and never reused, so a freed handle
// stays invalid for the rest of the process even when its memory is recycled.

use std::any::Any;
use std::collections::HashMap;
use std::ffi::{CString, c_char};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use once_cell::sync::Lazy;
use parking_lot::Mutex;

use crate::config;
use crate::error::{Result, StreamError};

type SharedObject = Arc<dyn Any + Send + Sync>;

struct TrackedHandle {
    type_name: &'static str,
    object: SharedObject,
}

pub struct HandleRegistry {
    next_token: AtomicUsize,
    handles: Mutex<HashMap<usize, TrackedHandle>>,
    strings: Mutex<HashMap<usize, usize>>,
}

static REGISTRY: Lazy<HandleRegistry> = Lazy::new(HandleRegistry::new);

/// Process-wide registry used by the exported functions
pub fn registry() -> &'static HandleRegistry {
    &REGISTRY
}

impl HandleRegistry {
    pub fn new() -> Self {
        Self {
            next_token: AtomicUsize::new(1),
            handles: Mutex::new(HashMap::new()),
            strings: Mutex::new(HashMap::new()),
        }
    }

    /// Registers `value` and returns the opaque token standing in for it.
    pub fn track<T: Any + Send + Sync>(&self, value: T) -> *mut T {
        let id = self.next_token.fetch_add(1, Ordering::Relaxed);
        let token = (id << 1) | 1;
        self.handles.lock().insert(
            token,
            TrackedHandle {
                type_name: std::any::type_name::<T>(),
                object: Arc::new(value),
            },
        );
        tracing::trace!(token, "tracked {}", std::any::type_name::<T>());
        std::ptr::without_provenance_mut(token)
    }

    /// Resolves a token to a shared reference to its object.
    ///
    /// The returned Arc keeps the object alive for the duration of a call even
    /// if another thread frees the token meanwhile.
    pub fn acquire<T: Any + Send + Sync>(&self, handle: *const T) -> Result<Arc<T>> {
        if handle.is_null() {
            return Err(StreamError::null_parameter("handle"));
        }
        let token = handle.addr();

        let object = self
            .handles
            .lock()
            .get(&token)
            .map(|tracked| Arc::clone(&tracked.object));
        let Some(object) = object else {
            return Err(self.unknown(token));
        };

        object
            .downcast::<T>()
            .map_err(|_| StreamError::wrong_handle_type(token))
    }

    /// Removes a handle, checking that it refers to a `T`.
    pub fn release_as<T: Any + Send + Sync>(&self, handle: *mut T) -> Result<()> {
        if handle.is_null() {
            return Ok(());
        }
        let token = handle.addr();

        let removed = {
            let mut handles = self.handles.lock();
            match handles.get(&token).map(|tracked| tracked.object.is::<T>()) {
                Some(true) => handles.remove(&token),
                Some(false) => return Err(StreamError::wrong_handle_type(token)),
                None => None,
            }
        };

        match removed {
            Some(tracked) => {
                tracing::debug!(token, "released {}", tracked.type_name);
                Ok(())
            }
            None => Err(self.unknown(token)),
        }
    }

    /// Releases any tracked handle or string.
    ///
    /// NULL is always fine. Anything untracked (including a second free of the
    /// same pointer) is `InvalidHandle`.
    pub fn release(&self, ptr: *mut std::ffi::c_void) -> Result<()> {
        if ptr.is_null() {
            return Ok(());
        }
        let addr = ptr.addr();

        // Lock released before the object drops.
        let removed = self.handles.lock().remove(&addr);
        if let Some(tracked) = removed {
            tracing::debug!(token = addr, "released {}", tracked.type_name);
            return Ok(());
        }

        if self.strings.lock().remove(&addr).is_some() {
            // SAFETY: the address was produced by CString::into_raw in
            // track_string and was still tracked, so this is its only release.
            drop(unsafe { CString::from_raw(ptr.cast::<c_char>()) });
            return Ok(());
        }

        Err(StreamError::invalid_handle(addr))
    }

    /// Hands an owned string to the host. Interior NULs are dropped.
    pub fn track_string(&self, s: String) -> *mut c_char {
        let s = if s.contains('\0') { s.replace('\0', "") } else { s };
        let len = s.len() + 1;
        match CString::new(s) {
            Ok(c_str) => {
                let ptr = c_str.into_raw();
                self.strings.lock().insert(ptr.addr(), len);
                ptr
            }
            Err(_) => std::ptr::null_mut(),
        }
    }

    pub fn is_tracked(&self, ptr: *const std::ffi::c_void) -> bool {
        let addr = ptr.addr();
        self.handles.lock().contains_key(&addr) || self.strings.lock().contains_key(&addr)
    }

    /// Number of (handles, strings) not yet freed.
    pub fn outstanding(&self) -> (usize, usize) {
        (self.handles.lock().len(), self.strings.lock().len())
    }

    /// Logs unfreed allocations and returns how many there are.
    pub fn report_leaks(&self) -> usize {
        let (handles, strings) = self.outstanding();
        let total = handles + strings;
        if total > 0 && config::config().leak_warnings {
            let string_bytes: usize = self.strings.lock().values().sum();
            tracing::warn!(
                handles,
                strings,
                string_bytes,
                "allocations were not freed; each must be released exactly once with cimpl_free()"
            );
        }
        total
    }

    fn unknown(&self, addr: usize) -> StreamError {
        if self.strings.lock().contains_key(&addr) {
            StreamError::wrong_handle_type(addr)
        } else {
            StreamError::invalid_handle(addr)
        }
    }
}

impl Default for HandleRegistry {
    fn default() -> Self {
        Self::new()
    }
}
