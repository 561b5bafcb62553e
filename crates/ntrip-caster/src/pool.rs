use std::collections::HashMap;
use std::sync::Mutex;

use crate::client::Client;

/// Hand-off queue from acceptor threads to the owning source thread.
///
/// Guarded by `client_mutex` in the caster's lock model; here
/// that's simply the `Mutex` wrapping each mount's queue.
#[derive(Default)]
pub struct Pool {
    by_mount: Mutex<HashMap<String, Vec<Client>>>,
}

impl Pool {
    pub fn new() -> Self {
        Self {
            by_mount: Mutex::new(HashMap::new()),
        }
    }

    /// Acceptor side: enqueue a newly accepted client for `mount`.
    pub fn add(&self, mount: &str, client: Client) {
        self.by_mount
            .lock()
            .expect("pool mutex poisoned")
            .entry(mount.to_string())
            .or_default()
            .push(client);
    }

    /// Source-thread side: atomically drain every client enqueued for
    /// `mount` since the last call.
    pub fn drain(&self, mount: &str) -> Vec<Client> {
        self.by_mount
            .lock()
            .expect("pool mutex poisoned")
            .remove(mount)
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::OutputFraming;

    #[test]
    fn drain_returns_only_enqueued_clients_for_that_mount() {
        let pool = Pool::new();
        pool.add("/RTCM3", Client::new(1, OutputFraming::PlainTcp, false));
        pool.add("/OTHER", Client::new(2, OutputFraming::PlainTcp, false));
        pool.add("/RTCM3", Client::new(3, OutputFraming::PlainTcp, false));

        let drained = pool.drain("/RTCM3");
        assert_eq!(drained.len(), 2);
        assert_eq!(pool.drain("/RTCM3").len(), 0);
        assert_eq!(pool.drain("/OTHER").len(), 1);
    }
}
