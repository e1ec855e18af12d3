// src/config.rs
//
// Runtime configuration and tracing setup.
//
// Values come from the environment on first use and can be overridden over
// FFI (cimpl_stream_set_log_file) as long as tracing has not started yet.

use std::fs::File;
use std::path::PathBuf;
use std::sync::{Arc, Once};

use once_cell::sync::Lazy;
use parking_lot::RwLock;

pub const LOG_FILTER_ENV: &str = "CIMPL_STREAM_LOG";
pub const LOG_FILE_ENV: &str = "CIMPL_STREAM_LOG_FILE";
pub const LEAK_WARNINGS_ENV: &str = "CIMPL_STREAM_LEAK_WARNINGS";

const DEFAULT_LOG_FILTER: &str = "warn";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    /// `EnvFilter` directive string, e.g. `"cimpl_stream=debug"`
    pub log_filter: String,
    /// Optional file that receives a copy of every log line
    pub log_file: Option<PathBuf>,
    /// Whether `report_leaks()` logs unfreed allocations
    pub leak_warnings: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            log_filter: DEFAULT_LOG_FILTER.to_string(),
            log_file: None,
            leak_warnings: true,
        }
    }
}

impl BridgeConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let log_filter = lookup(LOG_FILTER_ENV)
            .filter(|v| !v.trim().is_empty())
            .unwrap_or(defaults.log_filter);
        let log_file = lookup(LOG_FILE_ENV)
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from);
        let leak_warnings = lookup(LEAK_WARNINGS_ENV)
            .map(|v| !matches!(v.trim().to_ascii_lowercase().as_str(), "0" | "false" | "off" | "no"))
            .unwrap_or(defaults.leak_warnings);

        Self {
            log_filter,
            log_file,
            leak_warnings,
        }
    }
}

static CONFIG: Lazy<RwLock<BridgeConfig>> = Lazy::new(|| RwLock::new(BridgeConfig::from_env()));

static TRACING_INIT: Once = Once::new();

/// Snapshot of the current configuration
pub fn config() -> BridgeConfig {
    CONFIG.read().clone()
}

pub fn update_config(f: impl FnOnce(&mut BridgeConfig)) {
    f(&mut CONFIG.write());
}

pub fn tracing_started() -> bool {
    TRACING_INIT.is_completed()
}

/// Installs the global subscriber once. Returns false if another subscriber
/// already owns the process.
pub fn init_tracing() -> bool {
    let mut installed = false;
    TRACING_INIT.call_once(|| {
        use tracing_subscriber::{EnvFilter, fmt, prelude::*};

        let cfg = config();

        let filter = EnvFilter::try_new(&cfg.log_filter)
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

        let stderr_layer = fmt::layer()
            .with_writer(std::io::stderr)
            .with_thread_ids(true)
            .with_target(true);

        let file_layer = cfg.log_file.as_ref().and_then(|path| match File::create(path) {
            Ok(file) => Some(
                fmt::layer()
                    .with_writer(Arc::new(file))
                    .with_thread_ids(true)
                    .with_file(true)
                    .with_line_number(true)
                    .with_ansi(false),
            ),
            Err(e) => {
                eprintln!("cimpl_stream: cannot create log file {}: {e}", path.display());
                None
            }
        });

        installed = tracing_subscriber::registry()
            .with(filter)
            .with(stderr_layer)
            .with(file_layer)
            .try_init()
            .is_ok();

        if installed {
            tracing::info!(filter = %cfg.log_filter, log_file = ?cfg.log_file, "tracing initialized");
        }
    });
    installed
}
