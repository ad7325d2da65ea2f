//! Role-typed sockets over loopback TCP.
//!
//! Each socket owns its helper tasks (accept loops, subscription readers)
//! and a single async lock serializing its send/receive paths.  The lock is
//! a `tokio::sync::Mutex`, so cancellation of a pending send/receive drops
//! the guard and releases the lock — the invariant the cooperative
//! scheduling model depends on.
//!
//! Capability misuse panics (programming error); operational failures —
//! unreachable peers, closed channels, bind conflicts — return [`NetError`].

use std::time::Duration;

use rustc_hash::FxHashMap;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use mas_core::{Message, SocketRole};

use crate::frame::{Frames, read_frames, write_frames};
use crate::{NetError, NetResult};

/// How long a connecting socket keeps retrying an endpoint whose binder has
/// not come up yet.  Elements start concurrently, so the first connects of a
/// run routinely race the peer's bind; the sync protocol bounds the total
/// startup window above this.
const CONNECT_RETRY_DELAY: Duration = Duration::from_millis(250);
const CONNECT_RETRY_ATTEMPTS: u32 = 40;

// ── Socket ────────────────────────────────────────────────────────────────────

/// One communication channel of a network element.
///
/// Created through the role constructors ([`Socket::publish`],
/// [`Socket::subscribe`], …) or, normally, through
/// [`SocketMap::build`](crate::SocketMap::build).
pub struct Socket {
    role: SocketRole,
    owner: String,
    inner: Mutex<Inner>,
    /// Cancels every helper task this socket spawned.
    cancel: CancellationToken,
}

enum Inner {
    Publish {
        /// Live subscriber connections.
        peers: Vec<OwnedWriteHalf>,
        /// Connections accepted since the last send.
        joiners: mpsc::UnboundedReceiver<OwnedWriteHalf>,
    },
    Subscribe {
        rx: mpsc::UnboundedReceiver<Frames>,
        /// Cloned into each reader task; kept for dynamic connects.
        tx: mpsc::UnboundedSender<Frames>,
        /// Destinations this subscriber accepts (owner name and `"ALL"`).
        filters: Vec<String>,
        /// endpoint → reader-task cancellation, for unsubscribing.
        conns: FxHashMap<String, CancellationToken>,
    },
    Request {
        /// Connected on demand; `None` until [`Socket::connect`].
        stream: Option<(String, TcpStream)>,
        /// Strict alternation state: `true` between a send and its reply.
        awaiting_reply: bool,
    },
    Reply {
        requests: mpsc::UnboundedReceiver<(Frames, oneshot::Sender<Frames>)>,
        /// The requester pinned by the last receive, owed the next send.
        pending: Option<oneshot::Sender<Frames>>,
    },
    Push {
        sinks: Vec<TcpStream>,
        /// Round-robin cursor when multiple sinks are connected.
        next: usize,
    },
    Pull {
        rx: mpsc::UnboundedReceiver<Frames>,
    },
}

impl Socket {
    // ── Constructors ──────────────────────────────────────────────────────

    /// Bind a fan-out publisher on every endpoint.
    pub async fn publish(owner: &str, endpoints: &[String]) -> NetResult<Self> {
        let cancel = CancellationToken::new();
        let (tx, joiners) = mpsc::unbounded_channel();
        for endpoint in endpoints {
            let listener = bind(endpoint).await?;
            tokio::spawn(accept_subscribers(listener, tx.clone(), cancel.child_token()));
        }
        Ok(Self {
            role: SocketRole::Publish,
            owner: owner.to_string(),
            inner: Mutex::new(Inner::Publish { peers: Vec::new(), joiners }),
            cancel,
        })
    }

    /// Connect a filtered subscriber to every endpoint.
    ///
    /// Only messages whose destination frame matches one of `filters` are
    /// delivered; everything else is dropped at the reader.
    pub async fn subscribe(
        owner: &str,
        endpoints: &[String],
        filters: Vec<String>,
    ) -> NetResult<Self> {
        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::unbounded_channel();
        let mut conns = FxHashMap::default();
        for endpoint in endpoints {
            let stream = connect(endpoint).await?;
            let conn_cancel = cancel.child_token();
            conns.insert(endpoint.clone(), conn_cancel.clone());
            tokio::spawn(read_subscription(stream, filters.clone(), tx.clone(), conn_cancel));
        }
        Ok(Self {
            role: SocketRole::Subscribe,
            owner: owner.to_string(),
            inner: Mutex::new(Inner::Subscribe { rx, tx, filters, conns }),
            cancel,
        })
    }

    /// Create an unconnected requester.  Connect on demand with
    /// [`Socket::connect`].
    pub fn request(owner: &str) -> Self {
        Self {
            role: SocketRole::Request,
            owner: owner.to_string(),
            inner: Mutex::new(Inner::Request { stream: None, awaiting_reply: false }),
            cancel: CancellationToken::new(),
        }
    }

    /// Bind a replier on every endpoint.  Requests from all connected peers
    /// are fair-queued; each received request pins its sender for the next
    /// reply.
    pub async fn reply(owner: &str, endpoints: &[String]) -> NetResult<Self> {
        let cancel = CancellationToken::new();
        let (tx, requests) = mpsc::unbounded_channel();
        for endpoint in endpoints {
            let listener = bind(endpoint).await?;
            tokio::spawn(accept_requesters(listener, tx.clone(), cancel.child_token()));
        }
        Ok(Self {
            role: SocketRole::Reply,
            owner: owner.to_string(),
            inner: Mutex::new(Inner::Reply { requests, pending: None }),
            cancel,
        })
    }

    /// Connect a pusher to every sink endpoint.  With several sinks, sends
    /// rotate between them.
    pub async fn push(owner: &str, endpoints: &[String]) -> NetResult<Self> {
        let mut sinks = Vec::with_capacity(endpoints.len());
        for endpoint in endpoints {
            sinks.push(connect(endpoint).await?);
        }
        Ok(Self {
            role: SocketRole::Push,
            owner: owner.to_string(),
            inner: Mutex::new(Inner::Push { sinks, next: 0 }),
            cancel: CancellationToken::new(),
        })
    }

    /// Bind a fan-in sink on every endpoint.
    pub async fn pull(owner: &str, endpoints: &[String]) -> NetResult<Self> {
        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::unbounded_channel();
        for endpoint in endpoints {
            let listener = bind(endpoint).await?;
            tokio::spawn(accept_pushers(listener, tx.clone(), cancel.child_token()));
        }
        Ok(Self {
            role: SocketRole::Pull,
            owner: owner.to_string(),
            inner: Mutex::new(Inner::Pull { rx }),
            cancel,
        })
    }

    // ── Accessors ─────────────────────────────────────────────────────────

    pub fn role(&self) -> SocketRole {
        self.role
    }

    // ── Send / receive ────────────────────────────────────────────────────

    /// Transmit `msg` according to the socket's role.
    ///
    /// # Panics
    /// Panics if the role cannot send, or if a request/reply socket is out
    /// of alternation.
    pub async fn send(&self, msg: &Message) -> NetResult<()> {
        assert!(
            self.role.can_send(),
            "{}: cannot send on a {} socket",
            self.owner,
            self.role
        );
        let frames = Frames::from_message(msg)?;
        let mut inner = self.inner.lock().await;
        trace!(owner = %self.owner, role = %self.role, kind = msg.kind(), dst = %msg.dst, "send");
        match &mut *inner {
            Inner::Publish { peers, joiners } => {
                while let Ok(peer) = joiners.try_recv() {
                    peers.push(peer);
                }
                // Dead subscribers are dropped silently; pub/sub is fire-and-forget.
                let mut alive = Vec::with_capacity(peers.len());
                for mut peer in peers.drain(..) {
                    if write_frames(&mut peer, &frames).await.is_ok() {
                        alive.push(peer);
                    }
                }
                *peers = alive;
                Ok(())
            }
            Inner::Request { stream, awaiting_reply } => {
                assert!(
                    !*awaiting_reply,
                    "{}: request socket must receive the pending reply before sending again",
                    self.owner
                );
                let (endpoint, stream) = stream
                    .as_mut()
                    .ok_or_else(|| NetError::PeerGone("request socket unconnected".into()))?;
                write_frames(stream, &frames)
                    .await
                    .map_err(|_| NetError::PeerGone(endpoint.clone()))?;
                *awaiting_reply = true;
                Ok(())
            }
            Inner::Reply { pending, .. } => {
                let reply_to = pending.take().unwrap_or_else(|| {
                    panic!("{}: reply socket has no pending request to answer", self.owner)
                });
                // A requester that vanished between its request and our reply
                // is not an error worth failing the round for.
                if reply_to.send(frames).is_err() {
                    debug!(owner = %self.owner, "requester gone before reply");
                }
                Ok(())
            }
            Inner::Push { sinks, next } => {
                if sinks.is_empty() {
                    return Err(NetError::PeerGone("push socket has no sinks".into()));
                }
                let i = *next % sinks.len();
                *next = next.wrapping_add(1);
                write_frames(&mut sinks[i], &frames)
                    .await
                    .map_err(|_| NetError::PeerGone("push sink closed".into()))
            }
            Inner::Subscribe { .. } | Inner::Pull { .. } => unreachable!("checked by can_send"),
        }
    }

    /// Receive the next message according to the socket's role.
    ///
    /// Blocks until a message arrives.  Returns [`NetError::PeerGone`] once
    /// every feeding connection has closed.
    ///
    /// # Panics
    /// Panics if the role cannot receive, or if a request/reply socket is
    /// out of alternation.
    pub async fn recv(&self) -> NetResult<Message> {
        assert!(
            self.role.can_receive(),
            "{}: cannot receive on a {} socket",
            self.owner,
            self.role
        );
        let mut inner = self.inner.lock().await;
        let frames = match &mut *inner {
            Inner::Subscribe { rx, .. } => rx
                .recv()
                .await
                .ok_or_else(|| NetError::PeerGone("all publishers closed".into()))?,
            Inner::Pull { rx } => rx
                .recv()
                .await
                .ok_or_else(|| NetError::PeerGone("all pushers closed".into()))?,
            Inner::Request { stream, awaiting_reply } => {
                assert!(
                    *awaiting_reply,
                    "{}: request socket has no outstanding request to await",
                    self.owner
                );
                let (endpoint, stream) = stream
                    .as_mut()
                    .ok_or_else(|| NetError::PeerGone("request socket unconnected".into()))?;
                let frames = read_frames(stream)
                    .await
                    .map_err(|_| NetError::PeerGone(endpoint.clone()))?;
                *awaiting_reply = false;
                frames
            }
            Inner::Reply { requests, pending } => {
                assert!(
                    pending.is_none(),
                    "{}: reply socket must answer the pending request before receiving again",
                    self.owner
                );
                let (frames, reply_to) = requests
                    .recv()
                    .await
                    .ok_or_else(|| NetError::PeerGone("reply socket closed".into()))?;
                *pending = Some(reply_to);
                frames
            }
            Inner::Publish { .. } | Inner::Push { .. } => unreachable!("checked by can_receive"),
        };
        drop(inner);
        trace!(owner = %self.owner, role = %self.role, src = %frames.src, "recv");
        frames.into_message()
    }

    // ── Dynamic connections ───────────────────────────────────────────────

    /// Connect this socket to an additional endpoint at runtime.
    ///
    /// Valid for `Subscribe` (start hearing a new publisher; no-op if the
    /// endpoint is already subscribed) and `Request` (aim at a peer's reply
    /// endpoint, replacing any previous connection).
    pub async fn connect(&self, endpoint: &str) -> NetResult<()> {
        let mut inner = self.inner.lock().await;
        match &mut *inner {
            Inner::Subscribe { tx, filters, conns, .. } => {
                if conns.contains_key(endpoint) {
                    return Ok(());
                }
                let stream = connect(endpoint).await?;
                let conn_cancel = self.cancel.child_token();
                conns.insert(endpoint.to_string(), conn_cancel.clone());
                tokio::spawn(read_subscription(
                    stream,
                    filters.clone(),
                    tx.clone(),
                    conn_cancel,
                ));
                Ok(())
            }
            Inner::Request { stream, awaiting_reply } => {
                assert!(
                    !*awaiting_reply,
                    "{}: cannot reconnect a request socket mid-exchange",
                    self.owner
                );
                let new = connect(endpoint).await?;
                *stream = Some((endpoint.to_string(), new));
                Ok(())
            }
            _ => panic!(
                "{}: connect() is not defined for a {} socket",
                self.owner, self.role
            ),
        }
    }

    /// Sever a connection established with [`Socket::connect`].
    ///
    /// For `Subscribe`, messages already queued from that publisher remain
    /// readable; nothing further is delivered.
    pub async fn disconnect(&self, endpoint: &str) -> NetResult<()> {
        let mut inner = self.inner.lock().await;
        match &mut *inner {
            Inner::Subscribe { conns, .. } => {
                if let Some(conn_cancel) = conns.remove(endpoint) {
                    conn_cancel.cancel();
                }
                Ok(())
            }
            Inner::Request { stream, awaiting_reply } => {
                if let Some((current, _)) = stream
                    && current.as_str() == endpoint
                {
                    *stream = None;
                    *awaiting_reply = false;
                }
                Ok(())
            }
            _ => panic!(
                "{}: disconnect() is not defined for a {} socket",
                self.owner, self.role
            ),
        }
    }

    /// Stop all helper tasks.  Queued messages remain readable; new ones are
    /// no longer accepted.
    pub fn close(&self) {
        self.cancel.cancel();
    }
}

impl Drop for Socket {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// ── Helper tasks ──────────────────────────────────────────────────────────────

async fn accept_subscribers(
    listener: TcpListener,
    tx: mpsc::UnboundedSender<OwnedWriteHalf>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => {
                    // Subscribers never talk back; only the write half is kept.
                    let (_read, write) = stream.into_split();
                    if tx.send(write).is_err() {
                        return;
                    }
                }
                Err(e) => {
                    debug!(error = %e, "transient accept failure on publish endpoint");
                }
            },
        }
    }
}

async fn read_subscription(
    mut stream: TcpStream,
    filters: Vec<String>,
    tx: mpsc::UnboundedSender<Frames>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            read = read_frames(&mut stream) => match read {
                Ok(frames) => {
                    if filters.iter().any(|f| *f == frames.dst)
                        && tx.send(frames).is_err()
                    {
                        return;
                    }
                }
                // Publisher closed or stream corrupted; this subscription is over.
                Err(_) => return,
            },
        }
    }
}

async fn accept_requesters(
    listener: TcpListener,
    tx: mpsc::UnboundedSender<(Frames, oneshot::Sender<Frames>)>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => {
                    tokio::spawn(serve_requester(stream, tx.clone(), cancel.child_token()));
                }
                Err(e) => {
                    debug!(error = %e, "transient accept failure on reply endpoint");
                }
            },
        }
    }
}

/// One requester's strict request→reply loop.
async fn serve_requester(
    mut stream: TcpStream,
    tx: mpsc::UnboundedSender<(Frames, oneshot::Sender<Frames>)>,
    cancel: CancellationToken,
) {
    loop {
        let request = tokio::select! {
            _ = cancel.cancelled() => return,
            read = read_frames(&mut stream) => match read {
                Ok(frames) => frames,
                Err(_) => return,
            },
        };
        let (reply_tx, reply_rx) = oneshot::channel();
        if tx.send((request, reply_tx)).is_err() {
            return;
        }
        let reply = tokio::select! {
            _ = cancel.cancelled() => return,
            reply = reply_rx => match reply {
                Ok(frames) => frames,
                // Socket closed while the request was pending.
                Err(_) => return,
            },
        };
        if write_frames(&mut stream, &reply).await.is_err() {
            return;
        }
    }
}

async fn accept_pushers(
    listener: TcpListener,
    tx: mpsc::UnboundedSender<Frames>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => {
                    tokio::spawn(read_pushed(stream, tx.clone(), cancel.child_token()));
                }
                Err(e) => {
                    debug!(error = %e, "transient accept failure on pull endpoint");
                }
            },
        }
    }
}

async fn read_pushed(
    mut stream: TcpStream,
    tx: mpsc::UnboundedSender<Frames>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            read = read_frames(&mut stream) => match read {
                Ok(frames) => {
                    if tx.send(frames).is_err() {
                        return;
                    }
                }
                Err(_) => return,
            },
        }
    }
}

// ── Endpoint handling ─────────────────────────────────────────────────────────

/// Parse `tcp://host:port` into a socket address string.
///
/// `*` binds all interfaces; `localhost` and `*` both connect to loopback.
fn parse_endpoint(endpoint: &str, for_bind: bool) -> NetResult<String> {
    let rest = endpoint
        .strip_prefix("tcp://")
        .ok_or_else(|| NetError::BadEndpoint(endpoint.to_string()))?;
    let (host, port) = rest
        .rsplit_once(':')
        .ok_or_else(|| NetError::BadEndpoint(endpoint.to_string()))?;
    port.parse::<u16>()
        .map_err(|_| NetError::BadEndpoint(endpoint.to_string()))?;
    let host = match host {
        "*" if for_bind => "0.0.0.0",
        "*" | "localhost" => "127.0.0.1",
        other => other,
    };
    Ok(format!("{host}:{port}"))
}

async fn bind(endpoint: &str) -> NetResult<TcpListener> {
    let addr = parse_endpoint(endpoint, true)?;
    TcpListener::bind(&addr).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::AddrInUse {
            NetError::BindConflict(endpoint.to_string())
        } else {
            NetError::Io(e)
        }
    })
}

/// Connect with retries: peers bind concurrently, so early connects may find
/// nobody listening yet.
async fn connect(endpoint: &str) -> NetResult<TcpStream> {
    let addr = parse_endpoint(endpoint, false)?;
    for _ in 0..CONNECT_RETRY_ATTEMPTS {
        match TcpStream::connect(&addr).await {
            Ok(stream) => return Ok(stream),
            Err(_) => tokio::time::sleep(CONNECT_RETRY_DELAY).await,
        }
    }
    Err(NetError::PeerGone(endpoint.to_string()))
}
