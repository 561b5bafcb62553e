//! Shared server state, bundled as an explicit value rather
//! than process-wide statics so a test — or an embedder running more than
//! one caster in one process — can own more than one.
//!
//! Lock ordering must be respected by any caller that needs more
//! than one of these locks at once: `double_mutex` first, then
//! `registry` (source_mutex), then a per-source lock (client_mutex, owned
//! by `Source` itself), then `authentication_mutex`, then `misc_mutex`.
//! `double_mutex` exists purely to enforce that ordering for operations —
//! like source login — that touch both the registry and per-mount stats
//! atomically.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::auth::Authenticator;
use crate::client::ClientId;
use crate::config::Config;
use crate::error::LoginError;
use crate::mount::{MountRegistry, MountRequest};
use crate::ordmap::OrderedMap;
use crate::pool::Pool;
use crate::source::{Source, SourceKind, SourceState};
use crate::sourcetable::SourcetableSink;
use crate::stats::MountStats;
use crate::transport::Framing;

pub struct CasterContext {
    pub config: Config,
    /// `source_mutex` + the AVL mount tree, combined.
    registry: Mutex<MountRegistry>,
    /// `client_mutex`'s hand-off half; per-source client sets are owned by
    /// each `Source` and never touched here.
    pool: Pool,
    /// `sourcesstats_mutex`: per-mount counters that outlive any one
    /// connection.
    mount_stats: Mutex<OrderedMap<String, MountStats>>,
    /// Enforces the lock-acquisition order documented above for
    /// operations spanning `registry` and `mount_stats`.
    double_mutex: Mutex<()>,
    /// Stands in for `misc_mutex`-guarded globals: a lock-free counter
    /// instead of a mutex-guarded integer, since an atomic increment is
    /// the idiomatic Rust shape for "just hand out the next id".
    next_client_id: AtomicU64,
    /// Rough admission-control counter:
    /// incremented on admission, decremented when the accept loop closes
    /// the socket. Not reconciled against the per-source reaper, so it can
    /// run slightly high between a client dying and its source noticing —
    /// acceptable for a capacity *limit*, which only needs to err toward
    /// rejecting new connections, never toward admitting too many.
    client_count: AtomicU64,
    authenticator: Arc<dyn Authenticator>,
    sourcetable: Arc<dyn SourcetableSink>,
}

impl CasterContext {
    pub fn new(
        config: Config,
        local_hostnames: Vec<String>,
        authenticator: Arc<dyn Authenticator>,
        sourcetable: Arc<dyn SourcetableSink>,
    ) -> Self {
        Self {
            config,
            registry: Mutex::new(MountRegistry::new(local_hostnames)),
            pool: Pool::new(),
            mount_stats: Mutex::new(OrderedMap::new()),
            double_mutex: Mutex::new(()),
            next_client_id: AtomicU64::new(1),
            client_count: AtomicU64::new(0),
            authenticator,
            sourcetable,
        }
    }

    pub fn authenticator(&self) -> &dyn Authenticator {
        self.authenticator.as_ref()
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    pub fn next_client_id(&self) -> ClientId {
        self.next_client_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Registers a newly logged-in source. Takes `double_mutex`
    /// before `registry` so this never races a concurrent lookup that also
    /// needs to read `mount_stats` for the same mount.
    pub fn register_source(
        &self,
        mount: &str,
        kind: SourceKind,
        framing: Framing,
    ) -> Result<Arc<Source>, LoginError> {
        let _order = self.double_mutex.lock().expect("double mutex poisoned");
        let mut registry = self.registry.lock().expect("registry mutex poisoned");

        if registry.mount_exists(mount) {
            return Err(LoginError::MountConflict);
        }
        if registry.num_sources() >= self.config.max_sources {
            return Err(LoginError::CapacityExceeded);
        }

        let source = Arc::new(Source::new(mount, kind, framing, &self.config));
        source.set_state(SourceState::Connected);
        let inserted = registry.insert(Arc::clone(&source));
        debug_assert!(inserted, "mount_exists check above should have caught this");

        {
            let mut stats = self.mount_stats.lock().expect("mount stats mutex poisoned");
            match stats.get_mut(&mount.to_string()) {
                Some(entry) => entry.record_source_connect(),
                None => {
                    let mut entry = MountStats::default();
                    entry.record_source_connect();
                    stats.replace(mount.to_string(), entry);
                }
            }
        }

        self.sourcetable.source_added(mount);
        Ok(source)
    }

    pub fn unregister_source(&self, mount: &str) {
        let _order = self.double_mutex.lock().expect("double mutex poisoned");
        let removed = self
            .registry
            .lock()
            .expect("registry mutex poisoned")
            .remove(mount);
        if removed.is_some() {
            self.sourcetable.source_removed(mount);
        }
    }

    pub fn find_mount_with_req(&self, req: &MountRequest) -> Option<Arc<Source>> {
        self.registry
            .lock()
            .expect("registry mutex poisoned")
            .find_mount_with_req(req)
    }

    pub fn find_mount(&self, path: &str) -> Option<Arc<Source>> {
        self.registry.lock().expect("registry mutex poisoned").find_mount(path)
    }

    /// Rolls a fan-out pass's total write bytes into the mount's
    /// persistent counters, the write-side counterpart of the read-side
    /// roll-up `register_source` performs at connect time.
    pub fn record_mount_write(&self, mount: &str, n: usize) {
        if n == 0 {
            return;
        }
        let mut stats = self.mount_stats.lock().expect("mount stats mutex poisoned");
        match stats.get_mut(&mount.to_string()) {
            Some(entry) => entry.add_write(n),
            None => {
                let mut entry = MountStats::default();
                entry.add_write(n);
                stats.replace(mount.to_string(), entry);
            }
        }
    }

    pub fn mount_stats_snapshot(&self, mount: &str) -> Option<MountStats> {
        self.mount_stats
            .lock()
            .expect("mount stats mutex poisoned")
            .get(&mount.to_string())
            .copied()
    }

    pub fn num_sources(&self) -> usize {
        self.registry.lock().expect("registry mutex poisoned").num_sources()
    }

    /// Reserves one client admission slot, refusing with
    /// [`LoginError::CapacityExceeded`] once `max_clients` is reached.
    pub fn try_admit_client(&self) -> Result<(), LoginError> {
        loop {
            let current = self.client_count.load(Ordering::Relaxed);
            if current as usize >= self.config.max_clients {
                return Err(LoginError::CapacityExceeded);
            }
            if self
                .client_count
                .compare_exchange(current, current + 1, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                return Ok(());
            }
        }
    }

    pub fn client_disconnected(&self) {
        self.client_count.fetch_sub(1, Ordering::Relaxed);
    }
}
