//! Client-side connection pool
//!
//! A bounded cache of open connections keyed by peer address. Pooling is
//! opportunistic: a missing or stale entry just means dialing a fresh
//! connection, and a full pool simply closes the returned connection instead
//! of caching it. Any logical message can be retried on a fresh connection,
//! so nothing here is required for correctness.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::config::Config;
use crate::error::Result;
use crate::socket::FramedSocket;

struct Entry {
    addr: String,
    socket: FramedSocket,
}

/// Bounded cache of outbound connections with capacity- and age-based
/// eviction.
pub struct ClientPool {
    config: Arc<Config>,
    entries: Mutex<Vec<Entry>>,
}

impl ClientPool {
    #[must_use]
    pub fn new(config: Arc<Config>) -> Self {
        Self {
            config,
            entries: Mutex::new(Vec::new()),
        }
    }

    /// Pop a pooled connection to `addr`, or dial a fresh one.
    pub fn connect(&self, addr: &str) -> Result<FramedSocket> {
        {
            let mut entries = self.entries.lock();
            if let Some(index) = entries.iter().position(|e| e.addr == addr) {
                trace!(%addr, "reusing pooled connection");
                return Ok(entries.swap_remove(index).socket);
            }
        }
        FramedSocket::connect(addr, &self.config)
    }

    /// Return a used connection for later reuse.
    ///
    /// At capacity, entries idle past the configured timeout are purged
    /// first; if the pool is still full, the connection is closed instead of
    /// cached.
    pub fn store(&self, addr: &str, mut socket: FramedSocket) {
        socket.touch();
        let mut entries = self.entries.lock();
        if entries.len() >= self.config.client_connection_limit {
            let timeout = self.config.client_connection_timeout;
            let before = entries.len();
            entries.retain(|e| e.socket.idle_for() <= timeout);
            if before != entries.len() {
                debug!(purged = before - entries.len(), "purged idle connections");
            }
        }
        if entries.len() < self.config.client_connection_limit {
            entries.push(Entry {
                addr: addr.to_owned(),
                socket,
            });
        } else {
            debug!(%addr, "pool full, closing connection instead of caching");
        }
    }

    /// Number of currently pooled connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::socket::Listener;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn store_then_connect_reuses() {
        let port = portpicker::pick_unused_port().expect("no free port");
        let addr = format!("127.0.0.1:{port}");
        let config = Config::new(vec![addr.clone()]);
        let listener = Listener::bind(&addr, &config).unwrap();
        let accept_config = config.clone();
        let keeper = thread::spawn(move || {
            let _held = listener.accept(&accept_config);
            thread::sleep(Duration::from_millis(200));
        });

        let pool = ClientPool::new(Arc::new(config));
        let socket = pool.connect(&addr).unwrap();
        pool.store(&addr, socket);
        assert_eq!(pool.len(), 1);

        let _reused = pool.connect(&addr).unwrap();
        assert_eq!(pool.len(), 0);
        keeper.join().unwrap();
    }

    #[test]
    fn full_pool_drops_instead_of_caching() {
        let port = portpicker::pick_unused_port().expect("no free port");
        let addr = format!("127.0.0.1:{port}");
        let mut config = Config::new(vec![addr.clone()]);
        config.client_connection_limit = 1;
        // Entries never look idle during the test window.
        config.client_connection_timeout = Duration::from_secs(60);
        let listener = Listener::bind(&addr, &config).unwrap();
        let accept_config = config.clone();
        let keeper = thread::spawn(move || {
            let _a = listener.accept(&accept_config);
            let _b = listener.accept(&accept_config);
            thread::sleep(Duration::from_millis(200));
        });

        let pool = ClientPool::new(Arc::new(config));
        let first = pool.connect(&addr).unwrap();
        let second = pool.connect(&addr).unwrap();
        pool.store(&addr, first);
        pool.store(&addr, second);
        assert_eq!(pool.len(), 1);
        keeper.join().unwrap();
    }

    #[test]
    fn idle_entries_are_purged_at_capacity() {
        let port = portpicker::pick_unused_port().expect("no free port");
        let addr = format!("127.0.0.1:{port}");
        let mut config = Config::new(vec![addr.clone()]);
        config.client_connection_limit = 1;
        config.client_connection_timeout = Duration::from_millis(20);
        let listener = Listener::bind(&addr, &config).unwrap();
        let accept_config = config.clone();
        let keeper = thread::spawn(move || {
            let _a = listener.accept(&accept_config);
            let _b = listener.accept(&accept_config);
            thread::sleep(Duration::from_millis(300));
        });

        let pool = ClientPool::new(Arc::new(config));
        let first = pool.connect(&addr).unwrap();
        let second = pool.connect(&addr).unwrap();
        pool.store(&addr, first);
        thread::sleep(Duration::from_millis(60));
        // The stale entry is purged, making room for the fresh one.
        pool.store(&addr, second);
        assert_eq!(pool.len(), 1);
        keeper.join().unwrap();
    }
}
