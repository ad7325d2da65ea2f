//! The node side of the manager protocol and the internal-module handshake.
//!
//! `Node` is not itself a `NetworkElement`; agents and environments embed one
//! and delegate the protocol legwork here while keeping their own `execute`
//! behavior.

use std::sync::Arc;
use std::time::Duration;

use rustc_hash::FxHashMap;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use mas_core::{
    AddressLedger, ClockConfig, ElementRole, Message, MessageBody, NetworkConfig, SocketRole,
};

use crate::element::{ElementNet, retry_backoff};
use crate::module::{InternalModule, run_module};
use crate::{ElementError, ElementResult};

/// Wall-clock budget for each internal (node↔module) round.
const MODULE_ROUND_TIMEOUT: Duration = Duration::from_secs(10);

/// Wall-clock budget for one manager request→reply exchange before the node
/// reconnects and retries.
const MANAGER_REPLY_TIMEOUT: Duration = Duration::from_secs(10);

// ── Node ──────────────────────────────────────────────────────────────────────

/// Manager-protocol state of one node element plus its collocated modules.
pub struct Node {
    name: String,
    /// Modules hosted by this node.  Their tasks run on the node's own
    /// cooperative scheduler; no extra OS threads are involved.
    modules: Vec<Arc<dyn InternalModule>>,
    module_tasks: Vec<JoinHandle<ElementResult<()>>>,
    /// Clock configuration received in `SimInfo`.
    pub clock: Option<ClockConfig>,
    /// Address ledger received in `SimInfo`.
    pub ledger: AddressLedger,
    /// The manager's reply endpoint, kept for reconnects after a reply
    /// timeout.
    manager_ep: Option<String>,
}

impl Node {
    pub fn new(name: impl Into<String>, modules: Vec<Arc<dyn InternalModule>>) -> Self {
        Self {
            name: name.into(),
            modules,
            module_tasks: Vec::new(),
            clock: None,
            ledger: AddressLedger::default(),
            manager_ep: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn module_names(&self) -> Vec<String> {
        self.modules.iter().map(|m| m.name().to_string()).collect()
    }

    /// The clock received during sync.
    ///
    /// # Panics
    /// Panics if called before [`Node::external_sync`] completed.
    pub fn clock(&self) -> &ClockConfig {
        self.clock.as_ref().expect("clock is only available after external sync")
    }

    // ── Manager request helpers ───────────────────────────────────────────

    /// One request→reply exchange with the manager.
    pub async fn request_manager(
        &self,
        net: &ElementNet,
        body: MessageBody,
    ) -> ElementResult<Message> {
        let msg = Message::new(ElementRole::Manager.as_str(), &self.name, body);
        net.external.send(SocketRole::Request, &msg).await?;
        Ok(net.external.recv(SocketRole::Request).await?)
    }

    /// Repeat `body` with jittered backoff until the manager acknowledges.
    ///
    /// A reply timeout resets the request socket (the strict alternation
    /// would otherwise wedge) and retries.
    pub async fn request_manager_until_ack(
        &self,
        net: &ElementNet,
        body: MessageBody,
    ) -> ElementResult<()> {
        loop {
            let exchange = self.request_manager(net, body.clone());
            match tokio::time::timeout(MANAGER_REPLY_TIMEOUT, exchange).await {
                Ok(reply) => match reply?.body {
                    MessageBody::ReceptionAck => return Ok(()),
                    MessageBody::ReceptionIgnored => {
                        debug!(element = %self.name, kind = body.kind(), "request ignored; retrying");
                        retry_backoff().await;
                    }
                    other => {
                        debug!(element = %self.name, kind = other.kind(), "unexpected reply; retrying");
                        retry_backoff().await;
                    }
                },
                Err(_) => {
                    let Some(ep) = self.manager_ep.clone() else {
                        return Err(ElementError::aborted(&self.name, "manager reply timed out"));
                    };
                    warn!(element = %self.name, "manager reply timed out; reconnecting");
                    net.external.get(SocketRole::Request).disconnect(&ep).await?;
                    net.external.get(SocketRole::Request).connect(&ep).await?;
                    retry_backoff().await;
                }
            }
        }
    }

    // ── Lifecycle: sync ───────────────────────────────────────────────────

    /// Launch every module's lifecycle task.  Call at the start of sync so
    /// modules can register while the node talks to the manager.
    pub fn spawn_modules(&mut self) {
        for module in &self.modules {
            self.module_tasks.push(tokio::spawn(run_module(Arc::clone(module))));
        }
    }

    /// Register with the manager and install the simulation info it
    /// broadcasts back.
    ///
    /// Retries the registration on `ReceptionIgnored`, then blocks for
    /// `SimInfo`, stores the clock and ledger, and subscribes to every peer
    /// publish endpoint the ledger names.
    pub async fn external_sync(
        &mut self,
        net: &ElementNet,
        config: &NetworkConfig,
    ) -> ElementResult<()> {
        // The request socket targets the manager's reply endpoint.
        let manager_ep = config
            .external_endpoints(SocketRole::Request)
            .first()
            .ok_or_else(|| {
                ElementError::aborted(&self.name, "no manager endpoint in network config")
            })?
            .clone();
        net.external.get(SocketRole::Request).connect(&manager_ep).await?;
        self.manager_ep = Some(manager_ep);

        info!(element = %self.name, "registering with manager");
        self.request_manager_until_ack(
            net,
            MessageBody::SyncRequest { network_config: config.clone() },
        )
        .await?;

        info!(element = %self.name, "registered; waiting for simulation info");
        let (ledger, clock) = loop {
            let msg = net.external.recv(SocketRole::Subscribe).await?;
            match msg.body {
                MessageBody::SimInfo { address_ledger, clock_config }
                    if msg.src == ElementRole::Manager.as_str() =>
                {
                    break (address_ledger, clock_config);
                }
                other => {
                    debug!(element = %self.name, kind = other.kind(), "ignoring pre-info message");
                }
            }
        };

        // Hear every peer that publishes; connectivity updates may prune
        // these again at runtime.
        for (peer, peer_config) in &ledger {
            if peer == &self.name {
                continue;
            }
            for endpoint in peer_config.external_endpoints(SocketRole::Publish) {
                net.external.get(SocketRole::Subscribe).connect(endpoint).await?;
            }
        }

        self.clock = Some(clock);
        self.ledger = ledger;
        info!(element = %self.name, peers = self.ledger.len(), "simulation info installed");
        Ok(())
    }

    /// Internal half of sync: wait for every module's `ModuleSyncRequest`,
    /// then publish `NodeInfo`.
    ///
    /// Must run after [`Node::external_sync`] — `NodeInfo` carries the clock
    /// received in `SimInfo`.
    pub async fn internal_sync(&self, net: &ElementNet) -> ElementResult<()> {
        if self.modules.is_empty() {
            return Ok(());
        }
        self.collect_module_round(net, "ModuleSyncRequest").await?;
        self.publish_to_modules(net, MessageBody::NodeInfo { clock_config: self.clock().clone() })
            .await
    }

    // ── Lifecycle: wait-for-start ─────────────────────────────────────────

    /// Collect `ModuleReady` from every module, report `NodeReady` to the
    /// manager, block for `SimStart`, then activate the modules.
    pub async fn wait_for_start(&self, net: &ElementNet) -> ElementResult<()> {
        if !self.modules.is_empty() {
            self.collect_module_round(net, "ModuleReady").await?;
        }

        self.request_manager_until_ack(net, MessageBody::NodeReady).await?;
        info!(element = %self.name, "ready; waiting for simulation start");

        loop {
            let msg = net.external.recv(SocketRole::Subscribe).await?;
            match msg.body {
                MessageBody::SimStart if msg.src == ElementRole::Manager.as_str() => break,
                other => {
                    debug!(element = %self.name, kind = other.kind(), "ignoring pre-start message");
                }
            }
        }

        if !self.modules.is_empty() {
            self.publish_to_modules(net, MessageBody::ModuleActivate).await?;
        }
        Ok(())
    }

    // ── Lifecycle: deactivate ─────────────────────────────────────────────

    /// Shut the modules down, then report `NodeDeactivated` to the manager.
    pub async fn deactivate(&mut self, net: &ElementNet) -> ElementResult<()> {
        if !self.modules.is_empty() {
            self.publish_to_modules(net, MessageBody::ModuleDeactivate).await?;
            if let Err(e) = self.collect_module_round(net, "ModuleDeactivated").await {
                // A module that crashed cannot deactivate cleanly; the node
                // still owes the manager its own deactivation.
                warn!(element = %self.name, error = %e, "module deactivation incomplete");
            }
            for task in self.module_tasks.drain(..) {
                match task.await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => warn!(element = %self.name, error = %e, "module task failed"),
                    Err(e) => warn!(element = %self.name, error = %e, "module task panicked"),
                }
            }
        }
        self.request_manager_until_ack(net, MessageBody::NodeDeactivated).await
    }

    // ── Module rounds ─────────────────────────────────────────────────────

    async fn publish_to_modules(&self, net: &ElementNet, body: MessageBody) -> ElementResult<()> {
        let msg = Message::new(ElementRole::All.as_str(), &self.name, body);
        net.internal.send(SocketRole::Publish, &msg).await?;
        Ok(())
    }

    /// Collect one `expected_kind` message from every module on the internal
    /// reply socket, acknowledging each.
    async fn collect_module_round(
        &self,
        net: &ElementNet,
        expected_kind: &str,
    ) -> ElementResult<FxHashMap<String, Message>> {
        let expected = self.module_names();
        let mut received: FxHashMap<String, Message> = FxHashMap::default();
        let deadline = Instant::now() + MODULE_ROUND_TIMEOUT;

        while received.len() < expected.len() {
            let msg = match tokio::time::timeout_at(deadline, net.internal.recv(SocketRole::Reply))
                .await
            {
                Ok(msg) => msg?,
                Err(_) => {
                    let missing = expected
                        .iter()
                        .filter(|name| !received.contains_key(*name))
                        .cloned()
                        .collect();
                    return Err(ElementError::SyncTimeout { missing });
                }
            };

            let src = msg.src.clone();
            let accepted = expected.contains(&src)
                && !received.contains_key(&src)
                && msg.kind() == expected_kind;
            let reply = if accepted {
                received.insert(src.clone(), msg);
                MessageBody::ReceptionAck
            } else {
                debug!(element = %self.name, src = %src, kind = msg.kind(),
                       "rejecting out-of-protocol module message");
                MessageBody::ReceptionIgnored
            };
            net.internal
                .send(SocketRole::Reply, &Message::new(src, &self.name, reply))
                .await?;
        }
        Ok(received)
    }
}
