//! Runtime-wide configuration.
//!
//! Provides [`CrtConfig`], loaded from environment variables with defaults
//! for everything.

use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

/// Default number of cached host resolver entries.
pub const DEFAULT_HOST_RESOLVER_MAX_ENTRIES: usize = 64;

/// Default part size for meta-requests (8 MiB).
pub const DEFAULT_PART_SIZE: u64 = 8 * 1024 * 1024;

/// Runtime configuration shared by the engine resources a process creates.
///
/// # Examples
///
/// ```
/// use crtbridge_core::CrtConfig;
///
/// let config = CrtConfig::builder().event_loop_threads(2).build();
/// assert_eq!(config.resolved_event_loop_threads(), 2);
/// assert_eq!(config.default_region, "us-east-1");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, TypedBuilder)]
#[serde(rename_all = "camelCase")]
pub struct CrtConfig {
    /// Log filter string (e.g. `"info"`, `"crtbridge_s3=debug"`).
    #[builder(default = String::from("info"))]
    pub log_level: String,

    /// Event loop worker threads; `0` means one per available core.
    #[builder(default = 0)]
    pub event_loop_threads: usize,

    /// Region used when a client is built without an explicit one.
    #[builder(default = String::from("us-east-1"))]
    pub default_region: String,

    /// Host resolver cache capacity.
    #[builder(default = DEFAULT_HOST_RESOLVER_MAX_ENTRIES)]
    pub host_resolver_max_entries: usize,

    /// Default meta-request part size in bytes.
    #[builder(default = DEFAULT_PART_SIZE)]
    pub default_part_size: u64,

    /// Default throughput target in gigabits per second.
    #[builder(default = 10.0)]
    pub default_throughput_target_gbps: f64,
}

impl Default for CrtConfig {
    fn default() -> Self {
        Self {
            log_level: String::from("info"),
            event_loop_threads: 0,
            default_region: String::from("us-east-1"),
            host_resolver_max_entries: DEFAULT_HOST_RESOLVER_MAX_ENTRIES,
            default_part_size: DEFAULT_PART_SIZE,
            default_throughput_target_gbps: 10.0,
        }
    }
}

impl CrtConfig {
    /// Load configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `CRT_LOG_LEVEL` | `info` |
    /// | `CRT_EVENT_LOOP_THREADS` | `0` |
    /// | `CRT_DEFAULT_REGION` | `us-east-1` |
    /// | `CRT_HOST_RESOLVER_MAX_ENTRIES` | `64` |
    /// | `CRT_PART_SIZE` | `8388608` |
    /// | `CRT_THROUGHPUT_TARGET_GBPS` | `10.0` |
    ///
    /// Unparseable numeric values are ignored.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(v) = std::env::var("CRT_LOG_LEVEL") {
            config.log_level = v;
        }
        if let Ok(v) = std::env::var("CRT_EVENT_LOOP_THREADS") {
            if let Ok(n) = v.parse::<usize>() {
                config.event_loop_threads = n;
            }
        }
        if let Ok(v) = std::env::var("CRT_DEFAULT_REGION") {
            config.default_region = v;
        }
        if let Ok(v) = std::env::var("CRT_HOST_RESOLVER_MAX_ENTRIES") {
            if let Ok(n) = v.parse::<usize>() {
                config.host_resolver_max_entries = n;
            }
        }
        if let Ok(v) = std::env::var("CRT_PART_SIZE") {
            if let Ok(n) = v.parse::<u64>() {
                config.default_part_size = n;
            }
        }
        if let Ok(v) = std::env::var("CRT_THROUGHPUT_TARGET_GBPS") {
            if let Ok(n) = v.parse::<f64>() {
                config.default_throughput_target_gbps = n;
            }
        }

        config
    }

    /// Event loop thread count with `0` resolved to the available parallelism.
    #[must_use]
    pub fn resolved_event_loop_threads(&self) -> usize {
        if self.event_loop_threads > 0 {
            return self.event_loop_threads;
        }
        std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
    }
}
