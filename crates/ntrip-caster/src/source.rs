//! The source engine: one `Source` per connected mountpoint, owning a
//! [`ntrip_ring::ChunkRing`] and a client set that only its own thread ever
//! mutates.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use ntrip_ring::{ChunkRing, Cursor};

use crate::client::{Client, ClientId, Lifecycle};
use crate::config::Config;
use crate::error::KickReason;
use crate::mount::ParsedMount;
use crate::ordmap::OrderedMap;
use crate::pool::Pool;
use crate::stats::SourceStats;
use crate::transport::{Framing, OutputFraming, ReadAttempt, Socket, WriteAttempt};

/// A source's connectedness. `Created` is the brief window
/// between allocation and the registry insert succeeding; everything after
/// that is `Connected` until an admin pause or a fatal ingest error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceState {
    Created,
    Connected,
    Paused,
    Killed,
}

/// What kind of upstream protocol feeds this source. Only `Http`
/// and `Relay` get a fully wired ingest loop; `Rtsp` and `Nontrip` are
/// recognized and classified but their protocol handshakes are out of
/// scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Http,
    Rtsp,
    Relay,
    Nontrip,
}

struct SourceInner {
    ring: ChunkRing,
    clients: OrderedMap<ClientId, Client>,
    framing: Framing,
    /// Bytes already written into the current (unpublished) slot — tracks
    /// partial progress across several nonblocking read attempts, the way
    /// `add_chunk` accumulates into `chunk->chunk` before publishing.
    fill: usize,
    /// Consecutive `ingest_step` calls that made no read progress at all
    /// (`ReadAttempt::Pending`). Once this exceeds the configured retry
    /// budget, whatever is sitting in `fill` is force-published rather
    /// than held forever, mirroring `add_chunk`'s end-of-retry-loop
    /// publish of a short, nonzero read.
    stall_count: u32,
    /// Count of clients considered live for the `clients_left` seed at the
    /// next publish: incremented when a pool-drained client is
    /// placed on the ring, decremented when the reaper removes a client,
    /// so it always reflects the true live count rather than every client
    /// ever admitted.
    num_clients: usize,
    scratch: Vec<u8>,
}

/// One connected source and everything needed to ingest its stream and
/// fan it out to clients.
pub struct Source {
    pub mount: String,
    pub parsed_mount: ParsedMount,
    pub kind: SourceKind,
    state: Mutex<SourceState>,
    stats: Mutex<SourceStats>,
    inner: Mutex<SourceInner>,
    last_read_at: Mutex<Instant>,
}

impl Source {
    pub fn new(mount: &str, kind: SourceKind, framing: Framing, cfg: &Config) -> Self {
        let readsize = cfg.source_readsize;
        Self {
            mount: mount.to_string(),
            parsed_mount: ParsedMount::parse(mount),
            kind,
            state: Mutex::new(SourceState::Created),
            stats: Mutex::new(SourceStats::default()),
            inner: Mutex::new(SourceInner {
                ring: ChunkRing::new(cfg.chunklen, readsize),
                clients: OrderedMap::new(),
                framing,
                fill: 0,
                stall_count: 0,
                num_clients: 0,
                scratch: vec![0u8; readsize],
            }),
            last_read_at: Mutex::new(Instant::now()),
        }
    }

    pub fn state(&self) -> SourceState {
        *self.state.lock().expect("source state lock poisoned")
    }

    pub fn set_state(&self, state: SourceState) {
        *self.state.lock().expect("source state lock poisoned") = state;
    }

    pub fn stats(&self) -> SourceStats {
        *self.stats.lock().expect("source stats lock poisoned")
    }

    /// Time since the last successful read, used by the reaper to detect a
    /// dead source (`READ_TIMEOUT`).
    pub fn idle_for(&self) -> Duration {
        self.last_read_at
            .lock()
            .expect("source timestamp lock poisoned")
            .elapsed()
    }

    fn touch_read(&self) {
        *self.last_read_at.lock().expect("source timestamp lock poisoned") = Instant::now();
    }

    /// Drains newly accepted clients out of `pool` and places each one a
    /// slot behind the producer.
    pub fn admit_new_clients(&self, pool: &Pool) -> usize {
        let drained = pool.drain(&self.mount);
        if drained.is_empty() {
            return 0;
        }
        let mut inner = self.inner.lock().expect("source inner lock poisoned");
        let start = inner.ring.start_chunk();
        let mut admitted = 0;
        for mut client in drained {
            client.cursor = Cursor::new(start, 0);
            client.lifecycle = Lifecycle::Alive;
            inner.clients.insert_new(client.id, client);
            inner.num_clients += 1;
            admitted += 1;
        }
        admitted
    }

    pub fn client_count(&self) -> usize {
        self.inner.lock().expect("source inner lock poisoned").clients.len()
    }

    /// One nonblocking ingest attempt for byte-stream sources (`Http`,
    /// `Relay` over plain TCP or HTTP chunked transfer-encoding). Returns
    /// `Ok(true)` once a slot was published.
    ///
    /// Reads at most `max_read_per_attempt` bytes per attempt, accumulating
    /// into the current slot, and publishes (clearing any backlog first)
    /// once the slot is full. A run of `Pending` reads longer than
    /// `read_retries()` force-publishes whatever has accumulated in `fill`
    /// instead of holding it forever, mirroring `add_chunk`'s end-of-retry
    /// publish of a short, nonzero read.
    pub fn ingest_step(&self, sock: &mut dyn Socket, cfg: &Config) -> Result<bool, KickReason> {
        let mount = self.mount.as_str();
        let mut inner = self.inner.lock().expect("source inner lock poisoned");
        let readsize = inner.ring.readsize();
        let want = (readsize - inner.fill).min(cfg.max_read_per_attempt());
        if want == 0 {
            return Ok(false);
        }

        let SourceInner {
            ring,
            clients,
            framing,
            fill,
            stall_count,
            num_clients,
            scratch,
        } = &mut *inner;

        let attempt = match framing {
            Framing::PlainTcp => match sock.try_read(&mut scratch[..want]) {
                Ok(0) => ReadAttempt::Eof,
                Ok(n) => ReadAttempt::Progress(n),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => ReadAttempt::Pending,
                Err(_) => return Err(KickReason::BrokenConnection),
            },
            Framing::Chunked(state) => state
                .read_attempt(sock, &mut scratch[..want])
                .map_err(|_| KickReason::BrokenConnection)?,
            Framing::Rtp | Framing::UdpFramed => {
                unreachable!("datagram sources ingest through ingest_datagram")
            }
        };

        match attempt {
            ReadAttempt::Eof => {
                if *fill > 0 {
                    kick_current_backlog(ring, clients, mount);
                    ring.publish(*fill, *num_clients);
                    *fill = 0;
                }
                Err(KickReason::SourceDied)
            }
            ReadAttempt::Pending => {
                *stall_count += 1;
                if *fill > 0 && *stall_count > cfg.read_retries().max(1) {
                    kick_current_backlog(ring, clients, mount);
                    let n = *fill;
                    ring.publish(n, *num_clients);
                    *fill = 0;
                    *stall_count = 0;
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            ReadAttempt::Progress(n) => {
                *stall_count = 0;
                let dest_start = *fill;
                {
                    let dest = &mut ring.current_slot_mut().data_mut()[dest_start..dest_start + n];
                    dest.copy_from_slice(&scratch[..n]);
                }
                *fill += n;
                let published = *fill >= readsize;
                if published {
                    kick_current_backlog(ring, clients, mount);
                    ring.publish(readsize, *num_clients);
                    *fill = 0;
                }
                drop(inner);
                self.stats.lock().expect("source stats lock poisoned").add_read(n);
                self.touch_read();
                Ok(published)
            }
        }
    }

    /// Ingest a complete datagram (RTP/UDP) in one shot, splitting it
    /// across as many slots as it spans.
    pub fn ingest_datagram(&self, payload: &[u8]) {
        let mount = self.mount.as_str();
        let mut inner = self.inner.lock().expect("source inner lock poisoned");
        let SourceInner {
            ring,
            clients,
            num_clients,
            ..
        } = &mut *inner;
        ring.fill_chunks(payload, *num_clients, |r| kick_current_backlog(r, clients, mount));
        drop(inner);
        self.stats
            .lock()
            .expect("source stats lock poisoned")
            .add_read(payload.len());
        self.touch_read();
    }

    /// One fan-out pass: for every live client, push as much of its
    /// readable backlog as the socket will currently accept.
    /// `send` gets mutable access to the client's framing state so it can
    /// prefix a chunk/RTP header and advance its own sequence counters;
    /// it returns how many *payload* bytes (not wire bytes, for framings
    /// that add a header) were delivered. Returns the total payload bytes
    /// written across every client, for the caller to roll up into
    /// per-mount statistics.
    pub fn write_to_clients(
        &self,
        chunklen_errors_threshold: usize,
        mut send: impl FnMut(ClientId, &mut OutputFraming, &[u8]) -> WriteAttempt,
    ) -> usize {
        let mount = self.mount.as_str();
        let mut inner = self.inner.lock().expect("source inner lock poisoned");
        let SourceInner { ring, clients, .. } = &mut *inner;
        let chunklen = ring.chunklen();
        let producer_cid = ring.cid();
        let mut total_written = 0usize;

        let ids: Vec<ClientId> = clients.keys().copied().collect();
        for id in ids {
            let Some(client) = clients.get_mut(&id) else {
                continue;
            };
            if client.is_dead() || client.lifecycle == Lifecycle::Paused {
                continue;
            }
            if client.lifecycle == Lifecycle::Unpaused {
                client.cursor = Cursor::new(ring.start_chunk(), 0);
                if let OutputFraming::Chunked(state) = &mut client.framing {
                    state.finish_slot();
                }
                client.lifecycle = Lifecycle::Alive;
            }

            // Skip past slots with nothing left to deliver — either a
            // zero-length publication or a slot this client already fully
            // consumed — releasing and advancing past each one rather than
            // getting stuck on it until the trailing-kick sweep evicts the
            // client out from under a slot it was only ever going to skip.
            while !client.cursor.caught_up(producer_cid)
                && ring.slot(client.cursor.cid).len() <= client.cursor.offset
            {
                ring.release_slot(client.cursor.cid);
                client.cursor.advance_slot(chunklen);
            }
            if client.cursor.caught_up(producer_cid) {
                continue;
            }

            let slot_cid = client.cursor.cid;
            let offset = client.cursor.offset;
            let bytes = ring.readable(slot_cid, offset);

            let attempt = send(id, &mut client.framing, bytes);
            match attempt {
                WriteAttempt::Wrote(n) if n > 0 => {
                    client.write_bytes += n as u64;
                    total_written += n;
                    if offset + n >= ring.slot(slot_cid).len() {
                        ring.release_slot(slot_cid);
                        client.cursor.advance_slot(chunklen);
                        client.errors = 0;
                    } else {
                        client.cursor.offset += n;
                    }
                }
                WriteAttempt::Broken => {
                    tracing::warn!(
                        mount,
                        client_id = id,
                        reason = %KickReason::BrokenConnection,
                        "kicking client"
                    );
                    client.mark_dead();
                }
                _ => {
                    client.errors += 1;
                    if client.exceeds_error_threshold(chunklen_errors_threshold) {
                        tracing::warn!(
                            mount,
                            client_id = id,
                            reason = %KickReason::TooManyErrors,
                            "kicking client"
                        );
                        client.mark_dead();
                    }
                }
            }
        }

        if total_written > 0 {
            self.stats.lock().expect("source stats lock poisoned").add_write(total_written);
        }
        total_written
    }

    /// Reaps clients already marked dead (by the trailing-kick sweep, a
    /// write failure, or an admin action) and UDP clients that have gone
    /// quiet past `udp_timeout`. Returns the reaped ids so the
    /// caller can close their sockets.
    pub fn kick_dead_clients(&self, cfg: &Config) -> Vec<ClientId> {
        let mount = self.mount.as_str();
        let mut inner = self.inner.lock().expect("source inner lock poisoned");
        let udp_timeout = cfg.udp_timeout;
        let stale: Vec<ClientId> = inner
            .clients
            .iter()
            .filter(|(_, c)| c.is_dead() || (c.is_udp && c.last_udp_active.elapsed() > udp_timeout))
            .map(|(id, _)| *id)
            .collect();

        for id in &stale {
            if let Some(c) = inner.clients.get_mut(id) {
                if !c.is_dead() {
                    tracing::warn!(
                        mount,
                        client_id = *id,
                        reason = %KickReason::UdpTimeout,
                        "kicking client"
                    );
                    c.mark_dead();
                }
            }
        }
        for id in &stale {
            if inner.clients.remove(id).is_some() {
                inner.num_clients = inner.num_clients.saturating_sub(1);
            }
        }
        stale
    }
}

/// Collect-then-kick backlog sweep: one pass collects the clients still
/// stuck on the slot the producer is about to overwrite, a second pass
/// marks them dead, then the ring clears its own backlog counter.
fn kick_current_backlog(ring: &mut ChunkRing, clients: &mut OrderedMap<ClientId, Client>, mount: &str) {
    if ring.current_backlog() == 0 {
        return;
    }
    let cid = ring.cid();
    let stuck: Vec<ClientId> = clients
        .iter()
        .filter(|(_, c)| !c.is_dead() && c.cursor.cid == cid)
        .map(|(id, _)| *id)
        .collect();
    for id in &stuck {
        if let Some(c) = clients.get_mut(id) {
            c.mark_dead();
        }
        tracing::warn!(
            mount,
            client_id = *id,
            reason = %KickReason::TooManyErrors,
            "trailing-kick evicting slow client"
        );
    }
    ring.clear_current_backlog();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockSocket;

    fn test_config() -> Config {
        Config {
            chunklen: 4,
            source_readsize: 8,
            ..Config::default()
        }
    }

    #[test]
    fn ingest_step_publishes_once_slot_fills() {
        let cfg = test_config();
        let source = Source::new("/RTCM3", SourceKind::Http, Framing::PlainTcp, &cfg);
        let mut sock = MockSocket::new(b"ABCDEFGH");
        // max_read_per_attempt caps each attempt at source_readsize / 2,
        // so an 8-byte readsize slot fills over two attempts.
        assert!(!source.ingest_step(&mut sock, &cfg).unwrap());
        assert!(source.ingest_step(&mut sock, &cfg).unwrap());
    }

    #[test]
    fn admit_new_clients_places_one_slot_behind_producer() {
        let cfg = test_config();
        let source = Source::new("/RTCM3", SourceKind::Http, Framing::PlainTcp, &cfg);
        let pool = Pool::new();
        pool.add("/RTCM3", Client::new(1, OutputFraming::PlainTcp, false));
        let admitted = source.admit_new_clients(&pool);
        assert_eq!(admitted, 1);
        assert_eq!(source.client_count(), 1);
    }

    #[test]
    fn write_to_clients_skips_caught_up_clients() {
        let cfg = test_config();
        let source = Source::new("/RTCM3", SourceKind::Http, Framing::PlainTcp, &cfg);
        let pool = Pool::new();
        pool.add("/RTCM3", Client::new(1, OutputFraming::PlainTcp, false));
        source.admit_new_clients(&pool);

        let mut calls = 0;
        source.write_to_clients(cfg.chunklen, |_, _, _| {
            calls += 1;
            WriteAttempt::Wrote(0)
        });
        assert_eq!(calls, 0, "freshly placed client has nothing readable yet");
    }

    #[test]
    fn write_to_clients_kicks_immediately_on_broken_connection() {
        let cfg = test_config();
        let source = Source::new("/RTCM3", SourceKind::Http, Framing::PlainTcp, &cfg);
        let mut sock = MockSocket::new(b"ABCDEFGH");
        source.ingest_step(&mut sock, &cfg).unwrap();
        source.ingest_step(&mut sock, &cfg).unwrap();

        let pool = Pool::new();
        pool.add("/RTCM3", Client::new(1, OutputFraming::PlainTcp, false));
        source.admit_new_clients(&pool);

        source.write_to_clients(cfg.chunklen, |_, _, _| WriteAttempt::Broken);

        let inner = source.inner.lock().unwrap();
        assert!(
            inner.clients.get(&1).unwrap().is_dead(),
            "a broken write should kick the client on the very first pass, \
             not after accumulating errors"
        );
    }

    #[test]
    fn write_to_clients_does_not_count_partial_progress_as_an_error() {
        let cfg = test_config();
        let source = Source::new("/RTCM3", SourceKind::Http, Framing::PlainTcp, &cfg);
        let mut sock = MockSocket::new(b"ABCDEFGH");
        source.ingest_step(&mut sock, &cfg).unwrap();
        source.ingest_step(&mut sock, &cfg).unwrap();

        let pool = Pool::new();
        pool.add("/RTCM3", Client::new(1, OutputFraming::PlainTcp, false));
        source.admit_new_clients(&pool);

        // Writes one byte at a time, a partial write against the 8-byte slot.
        source.write_to_clients(cfg.chunklen, |_, _, _| WriteAttempt::Wrote(1));

        let inner = source.inner.lock().unwrap();
        let client = inner.clients.get(&1).unwrap();
        assert_eq!(client.cursor.offset, 1);
        assert_eq!(client.errors, 0, "forward progress must not count as an error");
    }

    #[test]
    fn write_to_clients_reseats_an_unpausing_client() {
        let cfg = test_config();
        let source = Source::new("/RTCM3", SourceKind::Http, Framing::PlainTcp, &cfg);
        let pool = Pool::new();
        pool.add("/RTCM3", Client::new(1, OutputFraming::PlainTcp, false));
        source.admit_new_clients(&pool);

        let mut sock = MockSocket::new(b"ABCDEFGHIJKLMNOP");
        source.ingest_step(&mut sock, &cfg).unwrap();
        source.ingest_step(&mut sock, &cfg).unwrap();
        source.ingest_step(&mut sock, &cfg).unwrap();
        source.ingest_step(&mut sock, &cfg).unwrap();

        {
            let mut inner = source.inner.lock().unwrap();
            let client = inner.clients.get_mut(&1).unwrap();
            client.lifecycle = Lifecycle::Unpaused;
            client.cursor = Cursor::new(0, 5);
        }

        let mut delivered = Vec::new();
        source.write_to_clients(cfg.chunklen, |_, _, bytes| {
            delivered.extend_from_slice(bytes);
            WriteAttempt::Wrote(bytes.len())
        });

        let inner = source.inner.lock().unwrap();
        let client = inner.clients.get(&1).unwrap();
        assert_eq!(
            client.lifecycle,
            Lifecycle::Alive,
            "resuming from pause must land back in Alive"
        );
        assert!(
            !delivered.is_empty(),
            "an unpausing client should be re-placed one slot behind the \
             producer and resume delivery on the same pass, not skip it"
        );
    }

    #[test]
    fn dead_clients_are_reaped() {
        let cfg = test_config();
        let source = Source::new("/RTCM3", SourceKind::Http, Framing::PlainTcp, &cfg);
        let pool = Pool::new();
        pool.add("/RTCM3", Client::new(1, OutputFraming::PlainTcp, false));
        source.admit_new_clients(&pool);

        {
            let mut inner = source.inner.lock().unwrap();
            inner.clients.get_mut(&1).unwrap().mark_dead();
        }
        let reaped = source.kick_dead_clients(&cfg);
        assert_eq!(reaped, vec![1]);
        assert_eq!(source.client_count(), 0);
    }
}
