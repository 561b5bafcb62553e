use std::time::Duration;

/// Byte/connection counters for one source connection.
///
/// Reset each time a new source logs in on a mountpoint; the persistent
/// counterpart is `MountStats`, which survives across reconnections.
#[derive(Debug, Clone, Copy, Default)]
pub struct SourceStats {
    pub read_bytes: u64,
    pub write_bytes: u64,
    pub client_connections: u64,
    pub client_connect_time: Duration,
}

impl SourceStats {
    pub fn add_read(&mut self, n: usize) {
        self.read_bytes += n as u64;
    }

    pub fn add_write(&mut self, n: usize) {
        self.write_bytes += n as u64;
    }

    pub fn read_kilobytes(&self) -> u64 {
        self.read_bytes / 1024
    }

    pub fn write_kilobytes(&self) -> u64 {
        self.write_bytes / 1024
    }
}

/// Statistics entry keyed by mountpoint string: persists across
/// successive source connections on the same mount, unlike `SourceStats`
/// which belongs to one connection. Mirrors `add_global_stats` /
/// per-mount counters that survive a source's individual connections.
#[derive(Debug, Clone, Copy, Default)]
pub struct MountStats {
    pub source_connections: u64,
    pub client_connections: u64,
    pub read_bytes: u64,
    pub write_bytes: u64,
}

impl MountStats {
    pub fn record_source_connect(&mut self) {
        self.source_connections += 1;
    }

    pub fn add_read(&mut self, n: usize) {
        self.read_bytes += n as u64;
    }

    pub fn add_write(&mut self, n: usize) {
        self.write_bytes += n as u64;
    }
}
