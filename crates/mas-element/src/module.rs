//! Internal modules: workers collocated with a node.
//!
//! A module touches only its node's internal sockets.  [`run_module`] drives
//! the handshake of the internal protocol:
//!
//! ```text
//! module                      node
//!   ── ModuleSyncRequest ──▶   (ack)
//!   ◀──── NodeInfo ────────
//!   ── ModuleReady ────────▶   (ack)
//!   ◀──── ModuleActivate ──
//!   routine ∥ listen            …
//!   ── ModuleDeactivated ──▶   (ack)
//! ```
//!
//! `routine` and `listen` run concurrently; the first to return cancels the
//! other.  `listen` owns the internal subscribe socket and is expected to
//! return when it observes `ModuleDeactivate` (the node publishes it at
//! end-of-life).  A module-local failure is contained: the module still
//! publishes `ModuleDeactivated` and the node proceeds.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use mas_core::{ClockConfig, ElementRole, Message, MessageBody, NetworkConfig, SocketRole};
use mas_net::SocketMap;

use crate::element::retry_backoff;
use crate::{ElementError, ElementResult};

// ── ModuleNet ─────────────────────────────────────────────────────────────────

/// The live internal sockets of one module.
pub struct ModuleNet {
    pub sockets: SocketMap,
    /// Cancelled when the sibling activity returns; long-lived waits inside
    /// `routine`/`listen` should select on it.
    pub cancel: CancellationToken,
}

// ── InternalModule ────────────────────────────────────────────────────────────

/// A worker collocated with a node.
///
/// `routine` carries the module's work; `listen` consumes the internal
/// subscribe socket.  Both take `&self`: state flowing between them belongs
/// in async-aware channels owned by the module, keeping each side
/// cancel-safe.
#[async_trait]
pub trait InternalModule: Send + Sync + 'static {
    /// Full module name, `<node>/<module>` — also its message address.
    fn name(&self) -> &str;

    /// Name of the hosting node.
    fn parent(&self) -> &str;

    /// Internal-plane addresses: `request` and `subscribe` targeting the
    /// node, plus any `publish` endpoints the module binds.
    fn network_config(&self) -> &NetworkConfig;

    /// The module's main loop.  Runs between activation and deactivation.
    async fn routine(&self, net: &ModuleNet, clock: &ClockConfig) -> ElementResult<()>;

    /// Consume messages from the node.  Return on `ModuleDeactivate`.
    async fn listen(&self, net: &ModuleNet, clock: &ClockConfig) -> ElementResult<()>;

    /// Flush module-local results.  Runs after `routine`/`listen` settle,
    /// before `ModuleDeactivated` is reported.
    async fn teardown(&self, _net: &ModuleNet) -> ElementResult<()> {
        Ok(())
    }
}

// ── Lifecycle runner ──────────────────────────────────────────────────────────

/// Drive one module through the internal protocol.
///
/// Spawned by the hosting node on its own scheduler; never blocks the node.
pub async fn run_module(module: Arc<dyn InternalModule>) -> ElementResult<()> {
    let name = module.name().to_string();
    let span = info_span!("module", name = %name);
    run_module_inner(module, name).instrument(span).await
}

async fn run_module_inner(module: Arc<dyn InternalModule>, name: String) -> ElementResult<()> {
    // Configure: modules only carry internal sockets.
    let sockets = SocketMap::build(&name, &module.network_config().internal).await?;
    let net = ModuleNet { sockets, cancel: CancellationToken::new() };

    let node_ep = module
        .network_config()
        .internal_endpoints(SocketRole::Request)
        .first()
        .ok_or_else(|| ElementError::aborted(&name, "no parent-node endpoint in network config"))?
        .clone();
    net.sockets.get(SocketRole::Request).connect(&node_ep).await?;

    // ①② sync with the node and obtain the clock.
    request_node_until_ack(&module, &net, MessageBody::ModuleSyncRequest).await?;
    let clock = await_from_node(&module, &net, |body| match body {
        MessageBody::NodeInfo { clock_config } => Some(clock_config.clone()),
        _ => None,
    })
    .await?;
    info!("synced with parent node");

    // ③ report ready, block for activation.
    request_node_until_ack(&module, &net, MessageBody::ModuleReady).await?;
    await_from_node(&module, &net, |body| match body {
        MessageBody::ModuleActivate => Some(()),
        _ => None,
    })
    .await?;
    info!("activated");

    // ④ routine ∥ listen — termination of either cancels the other.  Failures
    // are contained here so deactivation still runs.
    let outcome = {
        let routine = module.routine(&net, &clock);
        let listen = module.listen(&net, &clock);
        tokio::select! {
            result = routine => {
                debug!("routine returned first");
                result
            }
            result = listen => {
                debug!("listener returned first");
                result
            }
        }
    };
    net.cancel.cancel();
    if let Err(e) = &outcome {
        warn!(error = %e, "module activity failed");
    }

    if let Err(e) = module.teardown(&net).await {
        warn!(error = %e, "module teardown failed");
    }

    // ⑤ report deactivation, then release the sockets.
    let reported = request_node_until_ack(&module, &net, MessageBody::ModuleDeactivated).await;
    net.sockets.close_all();
    info!("deactivated");

    outcome.and(reported)
}

/// Repeat `body` on the request socket until the node acknowledges.
async fn request_node_until_ack(
    module: &Arc<dyn InternalModule>,
    net: &ModuleNet,
    body: MessageBody,
) -> ElementResult<()> {
    loop {
        let msg = Message::new(module.parent(), module.name(), body.clone());
        net.sockets.send(SocketRole::Request, &msg).await?;
        let reply = net.sockets.recv(SocketRole::Request).await?;
        match reply.body {
            MessageBody::ReceptionAck => return Ok(()),
            other => {
                debug!(kind = other.kind(), "node did not accept; retrying");
                retry_backoff().await;
            }
        }
    }
}

/// Block on the internal subscribe socket until the node sends a body that
/// `extract` accepts.
async fn await_from_node<T>(
    module: &Arc<dyn InternalModule>,
    net: &ModuleNet,
    extract: impl Fn(&MessageBody) -> Option<T>,
) -> ElementResult<T> {
    loop {
        let msg = net.sockets.recv(SocketRole::Subscribe).await?;
        let from_node = msg.src == module.parent();
        let addressed_here =
            msg.dst == module.name() || msg.dst == ElementRole::All.as_str();
        if from_node && addressed_here {
            if let Some(value) = extract(&msg.body) {
                return Ok(value);
            }
        }
        debug!(kind = msg.kind(), src = %msg.src, "ignoring message during module handshake");
    }
}
