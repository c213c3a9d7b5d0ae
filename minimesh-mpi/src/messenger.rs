//! The delivery engine
//!
//! The messenger multiplexes many logical operations over a small pool of
//! reused connections and gives its callers exactly-once delivery on top of
//! an unreliable transport, using only local state:
//!
//! - `send` is synchronous and reliable: direct ADD rounds with a bounded
//!   attempt budget, falling back on the outbox tombstone to detect that the
//!   peer already pulled the message.
//! - `push` is asynchronous and rate-limited: the body parks in the outbox,
//!   a background TRY delivery is queued, and the caller only blocks while
//!   the outbox is over its byte limit.
//! - `get` is a blocking receive: inbox waits interleaved with background
//!   GET pulls from the sender's outbox, again with a bounded budget.
//!
//! The server side listens once at startup; accepted connections are
//! time-sliced across the server workers, going back into the queue while
//! quiet and closing on idle timeout or EOF.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use minimesh_core::config::Config;
use minimesh_core::error::{CoreError, Result as CoreResult};
use minimesh_core::mailbox::{Mailbox, Slot};
use minimesh_core::pool::ClientPool;
use minimesh_core::socket::{FramedSocket, Listener};
use minimesh_core::workers::WorkerPool;

use crate::error::{MpiError, Result};
use crate::header::{Header, WIRE_LEN};
use crate::wire::MessageKind;

/// Depth of the background delivery queue. Pushing past it blocks, which is
/// fine: the real rate limit is the outbox byte budget.
const DELIVERY_QUEUE_DEPTH: usize = 256;

/// How long a server worker waits for the next request on a connection
/// before handing it back to the queue. Connections are time-sliced this
/// way so a quiet connection never pins a worker while others have
/// requests pending.
const SERVE_SLICE: Duration = Duration::from_millis(25);

#[derive(Debug, Default)]
struct Stats {
    add_success: AtomicU64,
    add_total: AtomicU64,
    get_success: AtomicU64,
    get_total: AtomicU64,
    try_success: AtomicU64,
    try_total: AtomicU64,
}

impl Stats {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn summary(&self) -> String {
        format!(
            "ADD={}/{}, GET={}/{}, TRY={}/{}",
            self.add_success.load(Ordering::Relaxed),
            self.add_total.load(Ordering::Relaxed),
            self.get_success.load(Ordering::Relaxed),
            self.get_total.load(Ordering::Relaxed),
            self.try_success.load(Ordering::Relaxed),
            self.try_total.load(Ordering::Relaxed),
        )
    }
}

/// A queued background delivery attempt.
#[derive(Debug, Clone, Copy)]
enum Delivery {
    /// Optimistic push of an outbox entry to `peer`.
    Try { peer: usize, header: Header },
    /// Pull of `header` from `peer`'s outbox into our inbox.
    Get { peer: usize, header: Header },
}

/// State shared between the caller-facing operations, the delivery workers
/// and the server workers.
struct Shared {
    config: Arc<Config>,
    inbox: Mailbox<Header>,
    outbox: Mailbox<Header>,
    client: ClientPool,
    stats: Stats,
    shutdown: AtomicBool,
    /// Feed of the server worker queue, used to hand quiet connections
    /// back for a later turn. Cleared at shutdown so workers can drain.
    server_queue: Mutex<Option<flume::Sender<FramedSocket>>>,
}

impl Shared {
    fn peer_addr(&self, peer: usize) -> CoreResult<&str> {
        self.config
            .addresses
            .get(peer)
            .map(String::as_str)
            .ok_or_else(|| CoreError::invalid_address(format!("no address for rank {peer}")))
    }

    /// Serve framed requests on one inbound connection for one turn.
    ///
    /// The connection is held only while requests keep arriving: after a
    /// quiet [`SERVE_SLICE`] it goes back into the server queue so other
    /// connections get a worker, and is closed once it has been quiet past
    /// the configured idle timeout.
    fn handle_connection(&self, mut sock: FramedSocket) {
        while !self.shutdown.load(Ordering::Relaxed) {
            match self.handle_request(&mut sock) {
                Ok(()) => sock.touch(),
                Err(MpiError::Transport(CoreError::Closed)) => {
                    trace!("peer closed connection");
                    return;
                }
                Err(MpiError::Transport(CoreError::Io(e)))
                    if matches!(
                        e.kind(),
                        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                    ) =>
                {
                    if sock.idle_for() >= self.config.server_connection_timeout {
                        trace!("connection idle, closing");
                    } else if !self.requeue(sock) {
                        trace!("server queue unavailable, dropping quiet connection");
                    }
                    return;
                }
                Err(e) => {
                    warn!(error = %e, "dropping connection after failed request");
                    return;
                }
            }
        }
    }

    /// Hand a quiet connection back to the server queue for a later turn.
    /// Fails when the queue is full or shutting down; the connection is
    /// then simply dropped and the peer redials.
    fn requeue(&self, sock: FramedSocket) -> bool {
        self.server_queue
            .lock()
            .as_ref()
            .is_some_and(|queue| queue.try_send(sock).is_ok())
    }

    /// Read and answer one request. The kind read waits out the serve
    /// slice; once a request has started, the regular socket deadline
    /// applies.
    fn handle_request(&self, sock: &mut FramedSocket) -> Result<()> {
        sock.set_read_deadline(Some(SERVE_SLICE))?;
        let kind = sock.recv_u64()?;
        sock.set_read_deadline(self.config.socket_timeout)?;

        let kind = MessageKind::try_from(kind)?;
        let header = Header::decode(&sock.recv_raw(WIRE_LEN)?)?;
        trace!(?kind, ?header, "serving request");

        match kind {
            MessageKind::Add => {
                let body = sock.recv_frame()?;
                self.inbox.add(header, body);
                sock.send_u64(1)?;
            }
            MessageKind::Get => match self.outbox.get(&header, Some(Duration::ZERO)) {
                Some(Slot::Body(body)) => {
                    sock.send_u64(1)?;
                    sock.send_frame(&body)?;
                    self.outbox.discard(&header);
                }
                _ => {
                    sock.send_u64(0)?;
                }
            },
            MessageKind::Try => {
                let body = sock.recv_frame()?;
                let accepted = self.inbox.try_add(header, body);
                sock.send_u64(u64::from(accepted))?;
            }
        }
        Ok(())
    }

    fn run_delivery(&self, task: Delivery) {
        if let Err(e) = self.try_delivery(task) {
            debug!(?task, error = %e, "background delivery attempt failed");
        }
    }

    fn try_delivery(&self, task: Delivery) -> CoreResult<()> {
        match task {
            Delivery::Try { peer, header } => {
                // Skip entirely if the entry was already delivered (or pulled
                // by the peer) in the meantime.
                let Some(Slot::Body(body)) = self.outbox.get(&header, Some(Duration::ZERO)) else {
                    return Ok(());
                };
                Stats::bump(&self.stats.try_total);

                let addr = self.peer_addr(peer)?;
                let mut sock = self.client.connect(addr)?;
                sock.send_u64(MessageKind::Try.into())?;
                sock.send_raw(&header.encode())?;
                sock.send_frame(&body)?;
                let accepted = sock.recv_u64()? != 0;
                self.client.store(addr, sock);

                if accepted {
                    self.outbox.discard(&header);
                    Stats::bump(&self.stats.try_success);
                } else {
                    trace!(?header, "optimistic push refused, redelivery stays with us");
                }
            }
            Delivery::Get { peer, header } => {
                Stats::bump(&self.stats.get_total);

                let addr = self.peer_addr(peer)?;
                let mut sock = self.client.connect(addr)?;
                sock.send_u64(MessageKind::Get.into())?;
                sock.send_raw(&header.encode())?;
                let present = sock.recv_u64()? != 0;
                if present {
                    let body = sock.recv_frame()?;
                    self.inbox.add(header, body);
                    Stats::bump(&self.stats.get_success);
                }
                self.client.store(addr, sock);
            }
        }
        Ok(())
    }
}

/// The protocol engine: mailboxes, connection pools, delivery workers and
/// the server loop, behind reliable `send`/`push`/`get` operations.
pub struct Messenger {
    shared: Arc<Shared>,
    delivery: WorkerPool<Delivery>,
    server: Option<Arc<WorkerPool<FramedSocket>>>,
    acceptor: Option<JoinHandle<()>>,
    local_addr: String,
}

impl Messenger {
    /// Start the engine on an already-bound listener. `rank` is this
    /// process's index into the configured address table.
    #[must_use]
    pub fn new(config: Arc<Config>, listener: Listener, rank: usize) -> Self {
        let shared = Arc::new(Shared {
            config: Arc::clone(&config),
            inbox: Mailbox::new(config.inbox_limit),
            outbox: Mailbox::new(config.outbox_limit),
            client: ClientPool::new(Arc::clone(&config)),
            stats: Stats::default(),
            shutdown: AtomicBool::new(false),
            server_queue: Mutex::new(None),
        });

        let server = {
            let shared = Arc::clone(&shared);
            Arc::new(WorkerPool::new(
                "mesh-server",
                config.server_threads,
                config.server_connection_limit,
                move |sock| shared.handle_connection(sock),
            ))
        };
        *shared.server_queue.lock() = server.sender();

        let delivery = {
            let shared = Arc::clone(&shared);
            WorkerPool::new(
                "mesh-delivery",
                config.client_threads,
                DELIVERY_QUEUE_DEPTH,
                move |task| shared.run_delivery(task),
            )
        };

        let acceptor = {
            let shared = Arc::clone(&shared);
            let server = Arc::clone(&server);
            thread::Builder::new()
                .name("mesh-accept".into())
                .spawn(move || {
                    loop {
                        match listener.accept(&shared.config) {
                            Ok(sock) => {
                                if shared.shutdown.load(Ordering::Relaxed) {
                                    break;
                                }
                                server.push(sock);
                            }
                            Err(e) => {
                                if shared.shutdown.load(Ordering::Relaxed) {
                                    break;
                                }
                                warn!(error = %e, "accept failed");
                            }
                        }
                    }
                })
                .expect("failed to spawn acceptor thread")
        };

        let local_addr = config.addresses.get(rank).cloned().unwrap_or_default();
        Self {
            shared,
            delivery,
            server: Some(server),
            acceptor: Some(acceptor),
            local_addr,
        }
    }

    /// Synchronous, reliable delivery into the receiver's inbox.
    ///
    /// The body also parks in the local outbox so the receiver can pull it
    /// via GET if our direct ADDs cannot get through; the resulting outbox
    /// tombstone counts as success.
    pub fn send(&self, receiver: usize, header: Header, body: Bytes) -> Result<()> {
        trace!(receiver, ?header, bytes = body.len(), "send");
        self.shared.outbox.add(header, body.clone());

        let budget = self.shared.config.send_attempts;
        let mut attempts = 0;
        let mut last_error = None;
        for attempt in 0..budget {
            if attempt > 0 {
                thread::sleep(self.shared.config.send_delay);
            }
            attempts = attempt + 1;
            Stats::bump(&self.shared.stats.add_total);
            match self.direct_add(receiver, &header, &body) {
                Ok(()) => {
                    Stats::bump(&self.shared.stats.add_success);
                    self.shared.outbox.discard(&header);
                    return Ok(());
                }
                Err(e) => {
                    trace!(attempt, error = %e, "direct ADD failed");
                    let recoverable = e.is_recoverable();
                    last_error = Some(e);
                    if !recoverable {
                        break;
                    }
                }
            }
            // The peer may have pulled the message via GET in the meantime;
            // a tombstoned outbox entry means delivery already happened.
            if self.shared.outbox.is_tombstone(&header) {
                return Ok(());
            }
        }
        Err(MpiError::SendExhausted {
            receiver,
            attempts,
            cause: last_error,
        })
    }

    fn direct_add(&self, receiver: usize, header: &Header, body: &Bytes) -> CoreResult<()> {
        let addr = self.shared.peer_addr(receiver)?;
        let mut sock = self.shared.client.connect(addr)?;
        sock.send_u64(MessageKind::Add.into())?;
        sock.send_raw(&header.encode())?;
        sock.send_frame(body)?;
        let accepted = sock.recv_u64()? != 0;
        self.shared.client.store(addr, sock);
        if accepted {
            Ok(())
        } else {
            Err(CoreError::Refused)
        }
    }

    /// Asynchronous, rate-limited delivery. Blocks only while the outbox is
    /// over its byte limit, never until the delivery completes.
    pub fn push(&self, receiver: usize, header: Header, body: Bytes) {
        trace!(receiver, ?header, bytes = body.len(), "push");
        self.shared.outbox.add(header, body);
        self.delivery.push(Delivery::Try {
            peer: receiver,
            header,
        });
        self.shared.outbox.block();
    }

    /// Blocking, reliable receive of the message identified by `header`.
    pub fn get(&self, sender: usize, header: Header) -> Result<Bytes> {
        trace!(sender, ?header, "get");
        let attempts = self.shared.config.receive_attempts;
        let mut timeout = self.shared.config.receive_timeout;
        for _ in 0..attempts {
            if let Some(slot) = self.shared.inbox.get(&header, Some(timeout)) {
                self.shared.inbox.discard(&header);
                return Ok(slot.into_body().unwrap_or_default());
            }
            self.delivery.push(Delivery::Get {
                peer: sender,
                header,
            });
            timeout = self.shared.config.receive_delay;
        }
        Err(MpiError::ReceiveExhausted { sender, attempts })
    }
}

impl Drop for Messenger {
    fn drop(&mut self) {
        debug!(stats = %self.shared.stats.summary(), "messenger shutting down");
        self.shared.shutdown.store(true, Ordering::Relaxed);
        // Drop our feed of the server queue, or the pool join below would
        // wait on a sender that never goes away.
        self.shared.server_queue.lock().take();

        // Wake the acceptor with a throwaway connection so it can observe
        // the shutdown flag.
        let _ = FramedSocket::connect(&self.local_addr, &self.shared.config);
        if let Some(handle) = self.acceptor.take() {
            let _ = handle.join();
        }
        // Last reference: joins the server workers.
        self.server.take();
    }
}
