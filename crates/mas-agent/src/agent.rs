//! The agent node: the sense → think → do observation cycle.
//!
//! Each simulated step the agent
//!
//! 1. **senses** — collects the outcomes of the previous step's actions,
//!    advances and broadcasts its own state, and drains everything heard
//!    from peers and the environment since the last step;
//! 2. **thinks** — ships the senses to its planner module and waits for the
//!    plan;
//! 3. **does** — performs the plan's actions in order, advancing simulated
//!    time through the manager's clock protocol.
//!
//! A listener runs concurrently with the cycle, routing subscriptions into
//! inboxes, serving the agent's peer reply endpoint, and applying
//! connectivity updates.  Execution ends when either activity finishes
//! (`SimEnd`, end-of-clock, or a failure).

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use mas_core::{
    AddressLedger, ClockConfig, DomainBody, ElementRole, Message, MessageBody, NetworkConfig,
    SocketRole, Vec2,
};
use mas_element::{ElementError, ElementNet, ElementResult, InternalModule, NetworkElement, Node};
use mas_output::{RowWriter, StateCsvWriter, StateRow, element_dir};

use crate::state::{AgentState, AgentStatus, EngineeringPolicy, NoFailures};
use crate::{Action, ActionKind, ActionStatus, PlanPayload, SensesPayload};

// ── Agent ─────────────────────────────────────────────────────────────────────

/// An agent node: a [`Node`] plus the observation cycle and a planner
/// module.
pub struct Agent {
    node: Node,
    config: NetworkConfig,
    core: AgentCore,
}

impl Agent {
    /// Create an agent hosting `planner` as its single internal module.
    pub fn new(
        name: impl Into<String>,
        config: NetworkConfig,
        initial_state: AgentState,
        planner: Arc<dyn InternalModule>,
        results_root: impl Into<PathBuf>,
    ) -> Self {
        let name = name.into();
        let planner_addr = planner.name().to_string();
        Self {
            node: Node::new(name.clone(), vec![planner]),
            config,
            core: AgentCore {
                name,
                state: initial_state,
                engineering: Arc::new(NoFailures),
                history: Vec::new(),
                ledger: AddressLedger::default(),
                planner_addr,
                manager_ep: None,
                results_root: results_root.into(),
                clock: None,
                t: 0.0,
                done: false,
            },
        }
    }

    /// Install a power/engineering model (default: the platform never fails).
    pub fn with_engineering(mut self, policy: Arc<dyn EngineeringPolicy>) -> Self {
        self.core.engineering = policy;
        self
    }

    /// The agent's current state (final state after a run).
    pub fn state(&self) -> &AgentState {
        &self.core.state
    }
}

#[async_trait]
impl NetworkElement for Agent {
    fn name(&self) -> &str {
        self.node.name()
    }

    fn network_config(&self) -> &NetworkConfig {
        &self.config
    }

    async fn prepare(&mut self) -> ElementResult<()> {
        // Modules bind their internal endpoints concurrently with ours.
        self.node.spawn_modules();
        Ok(())
    }

    async fn sync(&mut self, net: &ElementNet) -> ElementResult<()> {
        let config = self.config.clone();
        self.node.external_sync(net, &config).await?;
        self.node.internal_sync(net).await
    }

    async fn wait_for_start(&mut self, net: &ElementNet) -> ElementResult<()> {
        self.node.wait_for_start(net).await
    }

    async fn execute(&mut self, net: &ElementNet) -> ElementResult<()> {
        let clock = self.node.clock().clone();
        self.core.t = clock.start();
        self.core.clock = Some(clock);
        self.core.ledger = self.node.ledger.clone();
        self.core.manager_ep = self
            .config
            .external_endpoints(SocketRole::Request)
            .first()
            .cloned();

        let (mgr_tx, mut mgr_rx) = mpsc::unbounded_channel();
        let (peer_tx, mut peer_rx) = mpsc::unbounded_channel();
        let name = self.core.name.clone();
        let ledger = self.node.ledger.clone();

        let listener = listen(net, name, ledger, mgr_tx, peer_tx);
        let live = self.core.live(net, &mut mgr_rx, &mut peer_rx);
        tokio::select! {
            result = live => result,
            result = listener => result,
        }
    }

    async fn teardown(&mut self, net: &ElementNet) -> ElementResult<()> {
        self.core.flush_history().map_err(|e| {
            ElementError::aborted(&self.core.name, format!("state history write failed: {e}"))
        })?;

        // Final state as end-of-run evidence.  The monitor may already be
        // gone; losing the push is not worth failing the shutdown.
        if net.external.has(SocketRole::Push)
            && let Ok(body) = self.core.state.to_body()
        {
            let msg = Message::new(ElementRole::Monitor.as_str(), &self.core.name, body);
            if let Err(e) = net.external.send(SocketRole::Push, &msg).await {
                warn!(element = %self.core.name, error = %e, "final state push failed");
            }
        }

        self.node.deactivate(net).await
    }
}

// ── Listener ──────────────────────────────────────────────────────────────────

/// Route external traffic into the cycle's inboxes.
///
/// Clock messages go to the manager inbox, domain broadcasts to the peer
/// inbox; connectivity updates re-wire the subscribe socket; requests on the
/// agent's reply endpoint are acknowledged and routed like broadcasts.
/// Returns when `SimEnd` arrives.
async fn listen(
    net: &ElementNet,
    name: String,
    ledger: AddressLedger,
    mgr_tx: mpsc::UnboundedSender<Message>,
    peer_tx: mpsc::UnboundedSender<Message>,
) -> ElementResult<()> {
    let serves_peers = net.external.has(SocketRole::Reply);
    loop {
        tokio::select! {
            incoming = net.external.recv(SocketRole::Subscribe) => {
                let msg = incoming?;
                match &msg.body {
                    MessageBody::Toc { .. } => {
                        let _ = mgr_tx.send(msg);
                    }
                    MessageBody::SimEnd => {
                        info!(element = %name, "simulation end observed");
                        let _ = mgr_tx.send(msg);
                        return Ok(());
                    }
                    MessageBody::ConnectivityUpdate { target, connected } => {
                        apply_connectivity(net, &ledger, target, *connected).await?;
                    }
                    MessageBody::AgentState(_)
                    | MessageBody::MeasurementRequest(_)
                    | MessageBody::MeasurementBid(_)
                    | MessageBody::PlannerResults(_) => {
                        let _ = peer_tx.send(msg);
                    }
                    other => {
                        debug!(element = %name, kind = other.kind(), "ignoring broadcast");
                    }
                }
            }
            request = net.external.recv(SocketRole::Reply), if serves_peers => {
                let msg = request?;
                let ack = Message::new(msg.src.clone(), &name, MessageBody::ReceptionAck);
                net.external.send(SocketRole::Reply, &ack).await?;
                let _ = peer_tx.send(msg);
            }
        }
    }
}

/// Start or stop hearing `target`'s broadcasts.
async fn apply_connectivity(
    net: &ElementNet,
    ledger: &AddressLedger,
    target: &str,
    connected: bool,
) -> ElementResult<()> {
    let Some(peer_config) = ledger.get(target) else {
        warn!(target, "connectivity update for unknown element");
        return Ok(());
    };
    for endpoint in peer_config.external_endpoints(SocketRole::Publish) {
        let socket = net.external.get(SocketRole::Subscribe);
        if connected {
            socket.connect(endpoint).await?;
        } else {
            socket.disconnect(endpoint).await?;
        }
    }
    Ok(())
}

// ── AgentCore: the cycle itself ───────────────────────────────────────────────

struct AgentCore {
    name: String,
    state: AgentState,
    engineering: Arc<dyn EngineeringPolicy>,
    history: Vec<StateRow>,
    ledger: AddressLedger,
    /// Message address of the planner module.
    planner_addr: String,
    /// Manager reply endpoint; restored after peer request exchanges.
    manager_ep: Option<String>,
    results_root: PathBuf,
    clock: Option<ClockConfig>,
    /// Current simulated time (monotone).
    t: f64,
    /// Set once the clock has run out or `SimEnd` was observed.
    done: bool,
}

impl AgentCore {
    fn clock(&self) -> &ClockConfig {
        self.clock.as_ref().expect("clock installed at execute start")
    }

    async fn live(
        &mut self,
        net: &ElementNet,
        mgr_rx: &mut mpsc::UnboundedReceiver<Message>,
        peer_rx: &mut mpsc::UnboundedReceiver<Message>,
    ) -> ElementResult<()> {
        let mut outcomes: Vec<Action> = Vec::new();
        while !self.done {
            let senses = self.sense(net, peer_rx, &outcomes).await?;
            let actions = self.think(net, senses).await?;
            outcomes = self.perform(net, mgr_rx, actions).await?;
        }
        info!(element = %self.name, t = self.t, "cycle complete");
        Ok(())
    }

    // ── Sense ─────────────────────────────────────────────────────────────

    async fn sense(
        &mut self,
        net: &ElementNet,
        peer_rx: &mut mpsc::UnboundedReceiver<Message>,
        outcomes: &[Action],
    ) -> ElementResult<Vec<Message>> {
        let mut senses = Vec::with_capacity(outcomes.len() + 4);
        for action in outcomes {
            senses.push(Message::new(&self.name, &self.name, action.to_body()?));
        }

        self.update_state(AgentStatus::Sensing);

        // Peers and the environment both learn our state from the broadcast.
        let state_msg = Message::new(ElementRole::All.as_str(), &self.name, self.state.to_body()?);
        net.external.send(SocketRole::Publish, &state_msg).await?;

        while let Ok(msg) = peer_rx.try_recv() {
            senses.push(msg);
        }
        Ok(senses)
    }

    // ── Think ─────────────────────────────────────────────────────────────

    async fn think(&mut self, net: &ElementNet, senses: Vec<Message>) -> ElementResult<Vec<Action>> {
        self.update_state(AgentStatus::Thinking);
        let payload = SensesPayload { state: self.state.clone(), senses };
        let msg = Message::new(&self.planner_addr, &self.name, payload.to_body()?);
        net.internal.send(SocketRole::Publish, &msg).await?;

        loop {
            let reply = net.internal.recv(SocketRole::Subscribe).await?;
            match PlanPayload::from_body(&reply.body) {
                Some(plan) => return Ok(plan?.actions),
                None => {
                    debug!(element = %self.name, kind = reply.kind(), "ignoring internal message");
                }
            }
        }
    }

    // ── Do ────────────────────────────────────────────────────────────────

    async fn perform(
        &mut self,
        net: &ElementNet,
        mgr_rx: &mut mpsc::UnboundedReceiver<Message>,
        actions: Vec<Action>,
    ) -> ElementResult<Vec<Action>> {
        let mut outcomes = Vec::with_capacity(actions.len());
        for mut action in actions {
            if self.done {
                break;
            }
            if self.t < action.t_start {
                action.status = ActionStatus::Pending;
            } else if action.t_end < self.t {
                action.status = ActionStatus::Aborted;
            } else {
                self.execute_action(net, mgr_rx, &mut action).await?;
            }
            debug!(element = %self.name, action = action.kind.label(),
                   status = ?action.status, t = self.t, "action performed");
            outcomes.push(action);
        }
        Ok(outcomes)
    }

    async fn execute_action(
        &mut self,
        net: &ElementNet,
        mgr_rx: &mut mpsc::UnboundedReceiver<Message>,
        action: &mut Action,
    ) -> ElementResult<()> {
        match action.kind.clone() {
            ActionKind::Idle => {
                self.update_state(AgentStatus::Idling);
                self.window_wait(mgr_rx, net, action).await?;
            }
            ActionKind::WaitForMessages => {
                self.update_state(AgentStatus::Listening);
                self.window_wait(mgr_rx, net, action).await?;
            }
            ActionKind::Maneuver { .. } => {
                self.update_state(AgentStatus::Maneuvering);
                self.window_wait(mgr_rx, net, action).await?;
            }
            ActionKind::Travel { target } => {
                self.state.advance(self.t);
                let pos = self.state.pos();
                if pos.distance(target) < self.arrival_eps() {
                    self.state.set_vel(Vec2::ZERO);
                    self.update_state(AgentStatus::Traveling);
                    action.status = ActionStatus::Completed;
                } else if let Some(v_max) = self.state.v_max() {
                    self.state.set_vel(pos.direction_to(target).scaled(v_max));
                    self.update_state(AgentStatus::Traveling);
                    self.sim_wait(net, mgr_rx, pos.distance(target) / v_max).await?;
                    action.status = ActionStatus::Pending;
                } else {
                    // Orbiters cannot steer; the planner schedules them onto
                    // access windows instead.
                    action.status = ActionStatus::Aborted;
                }
            }
            ActionKind::Measure { target, .. } => {
                self.state.advance(self.t);
                if self.state.pos().distance(target) < self.arrival_eps() {
                    self.update_state(AgentStatus::Measuring);
                    self.window_wait(mgr_rx, net, action).await?;
                } else {
                    action.status = ActionStatus::Pending;
                }
            }
            ActionKind::BroadcastMessage { msg } => {
                self.update_state(AgentStatus::Messaging);
                net.external.send(SocketRole::Publish, &msg).await?;
                action.status = ActionStatus::Completed;
            }
            ActionKind::PeerMessage { msg } => {
                self.update_state(AgentStatus::Messaging);
                self.send_peer(net, &msg).await?;
                action.status = ActionStatus::Completed;
            }
        }
        Ok(())
    }

    /// Wait out the remainder of `action`'s window; completed once the
    /// window has passed, pending if the clock has not caught up yet.
    async fn window_wait(
        &mut self,
        mgr_rx: &mut mpsc::UnboundedReceiver<Message>,
        net: &ElementNet,
        action: &mut Action,
    ) -> ElementResult<()> {
        self.sim_wait(net, mgr_rx, action.t_end - self.t).await?;
        action.status = if self.t >= action.t_end || self.done {
            ActionStatus::Completed
        } else {
            ActionStatus::Pending
        };
        Ok(())
    }

    /// Half-step position tolerance: under a fixed-step clock an agent can
    /// overshoot its target by up to `v·dt/2` within one step.
    fn arrival_eps(&self) -> f64 {
        match (self.state.v_max(), self.clock().fixed_dt()) {
            (Some(v_max), Some(dt)) => v_max * dt / 2.0,
            (None, Some(dt)) => self.state.vel().norm() * dt / 2.0 + 1e-6,
            _ => 1e-6,
        }
    }

    /// Deliver `msg` to its destination's reply endpoint, then re-aim the
    /// request socket at the manager.
    async fn send_peer(&self, net: &ElementNet, msg: &Message) -> ElementResult<()> {
        let Some(endpoint) = self
            .ledger
            .get(&msg.dst)
            .and_then(|config| config.external_endpoints(SocketRole::Reply).first())
        else {
            warn!(element = %self.name, dst = %msg.dst, "no reply endpoint for peer message");
            return Ok(());
        };
        let socket = net.external.get(SocketRole::Request);
        socket.connect(endpoint).await?;
        socket.send(msg).await?;
        let _ack = socket.recv().await?;
        if let Some(manager_ep) = &self.manager_ep {
            socket.connect(manager_ep).await?;
        }
        Ok(())
    }

    // ── Clock protocol ────────────────────────────────────────────────────

    /// Let `delay` simulated seconds pass.
    ///
    /// Real-time clocks sleep (scaled) wall-clock time.  Stepped clocks send
    /// one `TicRequest{t0, tf}` and block on the manager inbox until time
    /// advances past `t0`; `tf` is capped by the clock's end and by the
    /// engineering policy's predicted failure time.
    async fn sim_wait(
        &mut self,
        net: &ElementNet,
        mgr_rx: &mut mpsc::UnboundedReceiver<Message>,
        delay: f64,
    ) -> ElementResult<()> {
        match self.clock().clone() {
            ClockConfig::RealTime { .. } => {
                tokio::time::sleep(std::time::Duration::from_secs_f64(delay.max(0.0))).await;
                self.t += delay.max(0.0);
            }
            ClockConfig::AcceleratedRealTime { factor, .. } => {
                tokio::time::sleep(std::time::Duration::from_secs_f64(delay.max(0.0) / factor))
                    .await;
                self.t += delay.max(0.0);
            }
            ClockConfig::FixedTimeStep { end, .. } | ClockConfig::EventDriven { end, .. } => {
                if self.done || delay < 1e-6 {
                    return Ok(());
                }
                let t0 = self.t;
                if t0 >= end {
                    self.done = true;
                    return Ok(());
                }
                let mut tf = (t0 + delay).min(end);
                let t_failure = self.engineering.predict_failure(&self.state);
                if t_failure < tf {
                    tf = t_failure;
                }

                let request = Message::new(
                    ElementRole::Manager.as_str(),
                    &self.name,
                    MessageBody::TicRequest { t0, tf },
                );
                net.external.send(SocketRole::Request, &request).await?;
                let reply = net.external.recv(SocketRole::Request).await?;
                match reply.body {
                    MessageBody::ReceptionAck => {}
                    // Duplicate within one step: the manager already holds a
                    // request of ours, so waiting for the Toc is enough.
                    MessageBody::ReceptionIgnored => {
                        debug!(element = %self.name, "tic request ignored; awaiting toc")
                    }
                    other => debug!(element = %self.name, kind = other.kind(), "unexpected tic reply"),
                }

                while self.t <= t0 && !self.done {
                    match mgr_rx.recv().await {
                        Some(msg) => match msg.body {
                            MessageBody::Toc { t } if t > self.t => self.t = t,
                            MessageBody::SimEnd => self.done = true,
                            _ => {}
                        },
                        // Listener ended; nothing further will arrive.
                        None => self.done = true,
                    }
                }
                if self.t >= end {
                    self.done = true;
                }
            }
        }
        Ok(())
    }

    // ── History ───────────────────────────────────────────────────────────

    /// Advance the state to the current time, switch status, and record the
    /// sample.  Every row of `states.csv` comes through here.
    fn update_state(&mut self, status: AgentStatus) {
        self.state.advance(self.t);
        self.state.set_status(status);
        let pos = self.state.pos();
        let vel = self.state.vel();
        self.history.push(StateRow {
            t: self.state.t(),
            x_pos: pos.x,
            y_pos: pos.y,
            x_vel: vel.x,
            y_vel: vel.y,
            status: self.state.status().as_str(),
        });
    }

    fn flush_history(&mut self) -> mas_output::OutputResult<()> {
        let dir = element_dir(&self.results_root, &self.name)?;
        let mut writer = StateCsvWriter::create(&dir)?;
        for row in &self.history {
            writer.write(row)?;
        }
        writer.finish()
    }
}
