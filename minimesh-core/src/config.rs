//! Startup configuration
//!
//! All knobs are read once at process startup and shared read-only behind an
//! `Arc`. The address table doubles as the rank assignment: the first address
//! a process manages to bind is its world rank.

use std::time::Duration;

/// Default cap on pooled client connections.
pub const DEFAULT_CONNECTION_LIMIT: usize = 10;

/// Default idle timeout before a pooled connection is evicted.
pub const DEFAULT_CONNECTION_TIMEOUT: Duration = Duration::from_secs(1);

/// Default mailbox byte-size limit (16 MiB).
///
/// Applies separately to the inbox and the outbox. `usize::MAX` means the
/// mailbox is unbounded and skips all size accounting.
pub const DEFAULT_MAILBOX_LIMIT: usize = 1 << 24;

/// Default delay between reliable-send retry rounds.
pub const DEFAULT_SEND_DELAY: Duration = Duration::from_millis(100);

/// Default inbox wait on the first receive attempt.
///
/// Longer than the retry wait: the common case is that the peer's optimistic
/// push lands before we ever ask for it.
pub const DEFAULT_RECEIVE_TIMEOUT: Duration = Duration::from_millis(1000);

/// Default inbox wait between receive retry rounds.
pub const DEFAULT_RECEIVE_DELAY: Duration = Duration::from_millis(100);

fn default_threads() -> usize {
    num_cpus::get().clamp(1, 4)
}

/// Process-wide configuration, read-only after startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Peer address table, indexed by world rank.
    pub addresses: Vec<String>,

    /// Listen backlog for the server socket.
    pub socket_backlog: u32,
    /// Read/write deadline on framed sockets. `None` waits forever.
    pub socket_timeout: Option<Duration>,
    /// Keepalive probes before a dead connection is dropped.
    pub keepalive_count: u32,
    /// Idle time before keepalive probing starts.
    pub keepalive_idle: Duration,
    /// Interval between keepalive probes.
    pub keepalive_interval: Duration,

    /// Cap on pooled outbound connections.
    pub client_connection_limit: usize,
    /// Idle timeout for pooled outbound connections.
    pub client_connection_timeout: Duration,
    /// Background delivery worker threads. Defaults to the CPU count,
    /// capped at 4.
    pub client_threads: usize,

    /// Cap on concurrently served inbound connections.
    pub server_connection_limit: usize,
    /// Idle timeout before an inbound connection is closed.
    pub server_connection_timeout: Duration,
    /// Inbound request worker threads. Defaults to the CPU count, capped
    /// at 4.
    pub server_threads: usize,

    /// Inbox byte-size limit; `usize::MAX` = unbounded.
    pub inbox_limit: usize,
    /// Outbox byte-size limit; `usize::MAX` = unbounded.
    pub outbox_limit: usize,

    /// Reliable-send attempt budget.
    pub send_attempts: usize,
    /// Sleep between reliable-send attempts.
    pub send_delay: Duration,
    /// Blocking-receive attempt budget.
    pub receive_attempts: usize,
    /// Inbox wait on the first receive attempt.
    pub receive_timeout: Duration,
    /// Inbox wait on subsequent receive attempts.
    pub receive_delay: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            addresses: Vec::new(),
            socket_backlog: 10,
            socket_timeout: Some(Duration::from_secs(10)),
            keepalive_count: 3,
            keepalive_idle: Duration::from_secs(1),
            keepalive_interval: Duration::from_secs(1),
            client_connection_limit: DEFAULT_CONNECTION_LIMIT,
            client_connection_timeout: DEFAULT_CONNECTION_TIMEOUT,
            client_threads: default_threads(),
            server_connection_limit: DEFAULT_CONNECTION_LIMIT,
            server_connection_timeout: DEFAULT_CONNECTION_TIMEOUT,
            server_threads: default_threads(),
            inbox_limit: DEFAULT_MAILBOX_LIMIT,
            outbox_limit: DEFAULT_MAILBOX_LIMIT,
            send_attempts: 100,
            send_delay: DEFAULT_SEND_DELAY,
            receive_attempts: 100,
            receive_timeout: DEFAULT_RECEIVE_TIMEOUT,
            receive_delay: DEFAULT_RECEIVE_DELAY,
        }
    }
}

impl Config {
    /// Configuration for the given peer address table.
    #[must_use]
    pub fn new(addresses: Vec<String>) -> Self {
        Self {
            addresses,
            ..Self::default()
        }
    }

    /// Number of configured peers.
    #[must_use]
    pub fn world_size(&self) -> usize {
        self.addresses.len()
    }

    #[must_use]
    pub fn mailbox_limits(mut self, inbox: usize, outbox: usize) -> Self {
        self.inbox_limit = inbox;
        self.outbox_limit = outbox;
        self
    }

    #[must_use]
    pub fn retries(mut self, send_attempts: usize, receive_attempts: usize) -> Self {
        self.send_attempts = send_attempts;
        self.receive_attempts = receive_attempts;
        self
    }
}
