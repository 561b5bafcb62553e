use std::time::Duration;

/// Constants exposed through config.
///
/// A plain, `Copy`-able struct of tuned presets rather than a builder or
/// CLI parser (the admin/CLI surface is out of scope).
#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
#[serde(default)]
pub struct Config {
    /// Maximum number of simultaneously connected sources.
    pub max_sources: usize,
    /// Maximum number of simultaneously connected clients, across all
    /// sources.
    pub max_clients: usize,
    /// Number of slots in each source's chunk ring (`CHUNKLEN`).
    pub chunklen: usize,
    /// Bytes per transport read attempt (`SOURCE_READSIZE`).
    pub source_readsize: usize,
    /// Delay between read retries, in microseconds (`READ_RETRY_DELAY`).
    pub read_retry_delay: Duration,
    /// Overall read timeout before a source is declared dead
    /// (`READ_TIMEOUT`).
    pub read_timeout: Duration,
    /// UDP client liveness timeout.
    pub udp_timeout: Duration,
    /// UDP source keep-alive interval.
    pub udp_keepalive_interval: Duration,
}

impl Config {
    /// Number of read retries the ingest loop attempts before declaring
    /// the source dead: `READ_TIMEOUT / READ_RETRY_DELAY`.
    pub fn read_retries(&self) -> u32 {
        let timeout = self.read_timeout.as_micros();
        let delay = self.read_retry_delay.as_micros().max(1);
        (timeout / delay) as u32
    }

    /// `maxread = 0.5 * SOURCE_READSIZE`. Flagged as an open
    /// question — preserved as-is rather than re-derived.
    pub fn max_read_per_attempt(&self) -> usize {
        self.source_readsize / 2
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_sources: 64,
            max_clients: 2000,
            chunklen: 32,
            source_readsize: 1024,
            read_retry_delay: Duration::from_micros(400),
            read_timeout: Duration::from_millis(16),
            udp_timeout: Duration::from_secs(60),
            udp_keepalive_interval: Duration::from_secs(20),
        }
    }
}
