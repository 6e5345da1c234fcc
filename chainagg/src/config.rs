//! Runtime-configurable parameters for chain aggregation.
//!
//! All values have sensible defaults. Override via environment variables
//! (prefixed `CHAINAGG_`) or by constructing a custom `AggregatorConfig`.

use std::time::Duration;

/// Tuning parameters for aggregator formation and the TCP transport.
#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    /// Number of chains the parent group is split into. Each chain has one
    /// sink that performs the output.
    pub sub_streams: usize,

    /// Bytes pre-reserved in each rank's scratch receive buffer.
    pub scratch_capacity_bytes: usize,

    /// Largest frame the TCP transport accepts from a peer.
    pub max_frame_bytes: usize,

    /// Connection attempts per peer during TCP mesh formation.
    pub connect_retries: u32,

    /// Pause between TCP connection attempts.
    pub connect_backoff: Duration,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            sub_streams: 1,
            scratch_capacity_bytes: 0,
            max_frame_bytes: 256 * 1024 * 1024, // 256 MiB
            connect_retries: 50,
            connect_backoff: Duration::from_millis(100),
        }
    }
}

impl AggregatorConfig {
    /// Config with `sub_streams` chains and defaults elsewhere.
    pub fn with_sub_streams(sub_streams: usize) -> Self {
        Self {
            sub_streams,
            ..Self::default()
        }
    }

    /// Load config from environment variables, falling back to defaults.
    ///
    /// Recognized variables:
    /// - `CHAINAGG_SUB_STREAMS`
    /// - `CHAINAGG_SCRATCH_CAPACITY_BYTES`
    /// - `CHAINAGG_MAX_FRAME_BYTES`
    /// - `CHAINAGG_CONNECT_RETRIES`
    /// - `CHAINAGG_CONNECT_BACKOFF_MS`
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(v) = std::env::var("CHAINAGG_SUB_STREAMS")
            && let Ok(n) = v.parse::<usize>()
        {
            cfg.sub_streams = n;
        }
        if let Ok(v) = std::env::var("CHAINAGG_SCRATCH_CAPACITY_BYTES")
            && let Ok(n) = v.parse::<usize>()
        {
            cfg.scratch_capacity_bytes = n;
        }
        if let Ok(v) = std::env::var("CHAINAGG_MAX_FRAME_BYTES")
            && let Ok(n) = v.parse::<usize>()
        {
            cfg.max_frame_bytes = n;
        }
        if let Ok(v) = std::env::var("CHAINAGG_CONNECT_RETRIES")
            && let Ok(n) = v.parse::<u32>()
        {
            cfg.connect_retries = n;
        }
        if let Ok(v) = std::env::var("CHAINAGG_CONNECT_BACKOFF_MS")
            && let Ok(ms) = v.parse::<u64>()
        {
            cfg.connect_backoff = Duration::from_millis(ms);
        }

        cfg
    }
}
