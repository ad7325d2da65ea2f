//! The environment element: the world model of a scenario.
//!
//! A node with no modules.  During execution it
//!
//! - releases measurement requests to everyone when their time arrives,
//! - tracks the latest broadcast state of every agent,
//! - publishes connectivity updates from a pairwise comms-range model
//!   (scenarios without a range keep everyone connected), and
//! - acknowledges direct peer requests on its reply endpoint.
//!
//! The environment is excluded from tic rounds: under stepped clocks it
//! follows the manager's `Toc`s, under real-time clocks it tracks scaled
//! wall-clock time itself.

use std::time::Duration;

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use mas_agent::AgentState;
use mas_core::{
    ClockConfig, DomainBody, ElementRole, Message, MessageBody, NetworkConfig, SocketRole,
};
use mas_element::{ElementNet, ElementResult, NetworkElement, Node};

use crate::scenario::RequestSpec;

/// Wall-clock cadence of the environment's own time tracking under
/// real-time clocks.
const REAL_TIME_POLL: Duration = Duration::from_millis(100);

pub struct Environment {
    node: Node,
    config: NetworkConfig,
    comms_range: Option<f64>,
    /// Pending request releases, ascending by release time.
    schedule: Vec<RequestSpec>,
    /// Latest state heard from each agent.
    states: FxHashMap<String, AgentState>,
    /// Last announced connectivity per (listener, target) pair.
    links: FxHashMap<(String, String), bool>,
    t: f64,
}

impl Environment {
    pub fn new(
        config: NetworkConfig,
        mut schedule: Vec<RequestSpec>,
        comms_range: Option<f64>,
    ) -> Self {
        schedule.sort_by(|a, b| a.release_t.total_cmp(&b.release_t));
        Self {
            node: Node::new(ElementRole::Environment.as_str(), Vec::new()),
            config,
            comms_range,
            schedule,
            states: FxHashMap::default(),
            links: FxHashMap::default(),
            t: 0.0,
        }
    }

    /// Publish every request due at or before `t`.
    async fn release_due_requests(&mut self, net: &ElementNet) -> ElementResult<()> {
        while let Some(spec) = self.schedule.first() {
            if spec.release_t > self.t {
                break;
            }
            let spec = self.schedule.remove(0);
            info!(request = %spec.request.id, t = self.t, "releasing measurement request");
            let msg = Message::new(
                ElementRole::All.as_str(),
                self.node.name(),
                spec.request.to_body()?,
            );
            net.external.send(SocketRole::Publish, &msg).await?;
        }
        Ok(())
    }

    /// Re-derive pairwise connectivity and announce every flipped link.
    async fn refresh_connectivity(&mut self, net: &ElementNet) -> ElementResult<()> {
        let Some(range) = self.comms_range else {
            return Ok(());
        };
        let names: Vec<&String> = self.states.keys().collect();
        let mut flips = Vec::new();
        for &listener in &names {
            for &target in &names {
                if listener == target {
                    continue;
                }
                let connected =
                    self.states[listener].pos().distance(self.states[target].pos()) <= range;
                let key = (listener.clone(), target.clone());
                // Unannounced links start connected (the sync default).
                let known = self.links.get(&key).copied().unwrap_or(true);
                if known != connected {
                    flips.push((key, connected));
                }
            }
        }
        for ((listener, target), connected) in flips {
            debug!(listener = %listener, target = %target, connected, "connectivity flip");
            let msg = Message::new(
                listener.clone(),
                self.node.name(),
                MessageBody::ConnectivityUpdate { target: target.clone(), connected },
            );
            net.external.send(SocketRole::Publish, &msg).await?;
            self.links.insert((listener, target), connected);
        }
        Ok(())
    }

    fn handle_broadcast(&mut self, msg: &Message) {
        if let Some(Ok(state)) = AgentState::from_body(&msg.body) {
            self.states.insert(msg.src.clone(), state);
        }
    }
}

#[async_trait]
impl NetworkElement for Environment {
    fn name(&self) -> &str {
        self.node.name()
    }

    fn network_config(&self) -> &NetworkConfig {
        &self.config
    }

    async fn sync(&mut self, net: &ElementNet) -> ElementResult<()> {
        let config = self.config.clone();
        self.node.external_sync(net, &config).await
    }

    async fn wait_for_start(&mut self, net: &ElementNet) -> ElementResult<()> {
        self.node.wait_for_start(net).await
    }

    async fn execute(&mut self, net: &ElementNet) -> ElementResult<()> {
        let clock = self.node.clock().clone();
        self.t = clock.start();

        // Real-time variants give the environment no Tocs; it clocks itself.
        let wall_factor = match &clock {
            ClockConfig::RealTime { .. } => Some(1.0),
            ClockConfig::AcceleratedRealTime { factor, .. } => Some(*factor),
            _ => None,
        };
        let started = Instant::now();
        let mut poll = tokio::time::interval(REAL_TIME_POLL);

        self.release_due_requests(net).await?;

        loop {
            tokio::select! {
                incoming = net.external.recv(SocketRole::Subscribe) => {
                    let msg = incoming?;
                    match &msg.body {
                        MessageBody::Toc { t } => {
                            if *t > self.t {
                                self.t = *t;
                                self.release_due_requests(net).await?;
                                self.refresh_connectivity(net).await?;
                            }
                        }
                        MessageBody::SimEnd => {
                            info!(t = self.t, "simulation end observed");
                            return Ok(());
                        }
                        MessageBody::AgentState(_) => {
                            self.handle_broadcast(&msg);
                            self.refresh_connectivity(net).await?;
                        }
                        other => {
                            debug!(kind = other.kind(), "ignoring broadcast");
                        }
                    }
                }
                request = net.external.recv(SocketRole::Reply) => {
                    let msg = request?;
                    self.handle_broadcast(&msg);
                    let ack = Message::new(msg.src, self.node.name(), MessageBody::ReceptionAck);
                    net.external.send(SocketRole::Reply, &ack).await?;
                }
                _ = poll.tick(), if wall_factor.is_some() => {
                    let factor = wall_factor.unwrap_or(1.0);
                    let now = clock.start() + started.elapsed().as_secs_f64() * factor;
                    if now > self.t {
                        self.t = now;
                        self.release_due_requests(net).await?;
                    }
                }
                _ = net.cancel.cancelled() => return Ok(()),
            }
        }
    }

    async fn teardown(&mut self, net: &ElementNet) -> ElementResult<()> {
        // Final observed states as end-of-run evidence for the monitor.
        if net.external.has(SocketRole::Push) {
            for state in self.states.values() {
                let Ok(body) = state.to_body() else { continue };
                let msg = Message::new(ElementRole::Monitor.as_str(), self.node.name(), body);
                if let Err(e) = net.external.send(SocketRole::Push, &msg).await {
                    warn!(error = %e, "final state push failed");
                    break;
                }
            }
        }
        self.node.deactivate(net).await
    }
}
