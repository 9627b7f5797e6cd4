//! Process-wide synchronization settings.
//!
//! Settings can be constructed programmatically, parsed from command line
//! arguments, read from environment variables, or deserialized from any
//! serde format.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `DOCSYNC_AUTOSYNC` | true | Propagate store events to the index |
//! | `DOCSYNC_AUTO_REFRESH` | true | Default refresh policy (`true`, `false`, `wait_for`) |
//! | `DOCSYNC_SIGNAL_PROCESSOR` | realtime | `realtime` or `deferred` |
//! | `DOCSYNC_INDEX_SETTINGS` | {} | Default index settings (JSON object) |
//! | `DOCSYNC_PARALLEL_WORKERS` | 4 | Concurrent workers for parallel bulk |
//! | `DOCSYNC_PARALLEL_CHUNK_SIZE` | 500 | Operations per parallel bulk chunk |
//! | `DOCSYNC_LOG_LEVEL` | info | Log level |
//!
//! # Example
//!
//! ```rust
//! use helios_docsync::{Refresh, SyncSettings};
//!
//! // Create from environment
//! let settings = SyncSettings::from_env();
//!
//! // Or create programmatically
//! let settings = SyncSettings {
//!     auto_refresh: Refresh::WaitFor,
//!     ..Default::default()
//! };
//! assert!(settings.validate().is_ok());
//! ```

use std::fmt;
use std::str::FromStr;

use clap::{ArgAction, Parser};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};

use crate::sink::{ParallelBulkOptions, Refresh};

/// Which signal processor variant propagates store events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SignalProcessorKind {
    /// Index changes synchronously, inside the store event.
    #[default]
    #[serde(rename = "realtime")]
    RealTime,
    /// Enqueue jobs on a [`TaskQueue`](crate::signals::TaskQueue).
    #[serde(rename = "deferred")]
    Deferred,
}

impl fmt::Display for SignalProcessorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalProcessorKind::RealTime => write!(f, "realtime"),
            SignalProcessorKind::Deferred => write!(f, "deferred"),
        }
    }
}

impl FromStr for SignalProcessorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "realtime" | "real_time" | "immediate" => Ok(SignalProcessorKind::RealTime),
            "deferred" | "queued" => Ok(SignalProcessorKind::Deferred),
            other => Err(format!("unknown signal processor '{}'", other)),
        }
    }
}

/// Synchronization settings.
///
/// This struct can be constructed from environment variables using
/// [`SyncSettings::from_env`], from command line arguments using
/// [`SyncSettings::parse`], or programmatically.
#[derive(Debug, Clone, Parser, Serialize, Deserialize)]
#[command(name = "docsync")]
#[command(about = "Search index synchronization settings")]
#[serde(default)]
pub struct SyncSettings {
    /// Propagate store events to the search engine.
    #[arg(long, env = "DOCSYNC_AUTOSYNC", default_value_t = true, action = ArgAction::Set)]
    pub autosync: bool,

    /// Default refresh policy for documents that do not set one.
    #[arg(long, env = "DOCSYNC_AUTO_REFRESH", default_value = "true")]
    pub auto_refresh: Refresh,

    /// Signal processor variant.
    #[arg(long, env = "DOCSYNC_SIGNAL_PROCESSOR", default_value = "realtime")]
    pub signal_processor: SignalProcessorKind,

    /// Default settings applied to every index before its own overrides.
    #[arg(
        long,
        env = "DOCSYNC_INDEX_SETTINGS",
        default_value = "{}",
        value_parser = parse_index_settings
    )]
    pub index_settings: Map<String, Json>,

    /// Concurrent workers used by parallel bulk submissions.
    #[arg(long, env = "DOCSYNC_PARALLEL_WORKERS", default_value = "4")]
    pub parallel_workers: usize,

    /// Operations per chunk in parallel bulk submissions.
    #[arg(long, env = "DOCSYNC_PARALLEL_CHUNK_SIZE", default_value = "500")]
    pub parallel_chunk_size: usize,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long, env = "DOCSYNC_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

fn parse_index_settings(raw: &str) -> Result<Map<String, Json>, String> {
    match serde_json::from_str::<Json>(raw) {
        Ok(Json::Object(map)) => Ok(map),
        Ok(_) => Err("index settings must be a JSON object".to_string()),
        Err(e) => Err(format!("invalid index settings: {}", e)),
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            autosync: true,
            auto_refresh: Refresh::True,
            signal_processor: SignalProcessorKind::RealTime,
            index_settings: Map::new(),
            parallel_workers: 4,
            parallel_chunk_size: 500,
            log_level: "info".to_string(),
        }
    }
}

impl SyncSettings {
    /// Creates settings from environment variables.
    ///
    /// Command line arguments of the host process are ignored.
    pub fn from_env() -> Self {
        // Try to parse from environment, falling back to defaults
        Self::try_parse_from(["docsync"]).unwrap_or_default()
    }

    /// Returns the parallel bulk options derived from these settings.
    pub fn parallel_options(&self) -> ParallelBulkOptions {
        ParallelBulkOptions {
            workers: self.parallel_workers,
            chunk_size: self.parallel_chunk_size,
        }
    }

    /// Validates the settings and returns every problem found.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.parallel_workers == 0 {
            errors.push("Parallel workers cannot be 0".to_string());
        }

        if self.parallel_chunk_size == 0 {
            errors.push("Parallel chunk size cannot be 0".to_string());
        }

        if !matches!(
            self.log_level.to_ascii_lowercase().as_str(),
            "error" | "warn" | "info" | "debug" | "trace"
        ) {
            errors.push(format!("Unknown log level '{}'", self.log_level));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
