//! The consensus planner as an internal module.
//!
//! Two concurrent activities (the internal-module contract):
//!
//! - **listener** — consumes senses messages from the hosting agent and
//!   sorts their contents into three inboxes: states, action outcomes, and
//!   bid events (requests, peer bids, peer results).
//! - **routine** — the bundle builder: one outer iteration per received
//!   state, running the consensus phase, the update loop when the bundle or
//!   the rebroadcast set moved, plan synthesis, and next-action dispatch.
//!
//! The planner never touches a socket directly for its bids: outgoing bids
//! are embedded in the emitted plan as `BroadcastMessage` actions and the
//! agent performs the actual publish.  The planner then waits for those
//! actions' completion outcomes before proceeding, which paces the
//! consensus loop to the agent's observation cycle.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, warn};

use mas_agent::{Action, ActionKind, AgentState, PlanPayload, SensesPayload};
use mas_agent::orbit::{GroundTrackTable, OrbitDataProvider};
use mas_core::{ClockConfig, DomainBody, ElementRole, Message, MessageBody, NetworkConfig};
use mas_core::SocketRole;
use mas_element::{ElementError, ElementResult, InternalModule, ModuleNet};
use mas_output::{PlanHistoryCsvWriter, PlanHistoryRow, RowWriter, element_dir};

use crate::bid::{BidParams, BidPayload};
use crate::ledger::{BidEvent, PlannerLedger};
use crate::planning::{PlanningContext, next_actions, plan_from_path, planning_phase};
use crate::policy::{
    CapabilityPolicy, CostPolicy, InstrumentSet, LinearDecayUtility, UtilityPolicy, ZeroCost,
};

// ── Config ────────────────────────────────────────────────────────────────────

/// Planner tuning: bundle size cap plus the per-bid parameters.
#[derive(Clone, Debug)]
pub struct PlannerConfig {
    pub l_bundle: usize,
    pub bid_params: BidParams,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self { l_bundle: 3, bid_params: BidParams::default() }
    }
}

/// A converged ledger shared with peers at the end of a replanning round.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlannerResultsPayload {
    pub bidder: String,
    pub bids: Vec<BidPayload>,
}

impl DomainBody for PlannerResultsPayload {
    fn wrap(value: Value) -> MessageBody {
        MessageBody::PlannerResults(value)
    }

    fn peel(body: &MessageBody) -> Option<&Value> {
        match body {
            MessageBody::PlannerResults(value) => Some(value),
            _ => None,
        }
    }
}

// ── ConsensusPlanner ──────────────────────────────────────────────────────────

/// The asynchronous constraint-based bundle-auction planner module.
pub struct ConsensusPlanner {
    name: String,
    parent: String,
    net_config: NetworkConfig,
    config: PlannerConfig,
    utility: Arc<dyn UtilityPolicy>,
    cost: Arc<dyn CostPolicy>,
    capability: Arc<dyn CapabilityPolicy>,
    orbits: Arc<dyn OrbitDataProvider>,
    results_root: PathBuf,

    states_tx: UnboundedSender<AgentState>,
    states_rx: Mutex<UnboundedReceiver<AgentState>>,
    outcomes_tx: UnboundedSender<Action>,
    outcomes_rx: Mutex<UnboundedReceiver<Action>>,
    events_tx: UnboundedSender<BidEvent>,
    events_rx: Mutex<UnboundedReceiver<BidEvent>>,

    plan_history: StdMutex<Vec<PlanHistoryRow>>,
}

impl ConsensusPlanner {
    /// Create a planner for the agent `parent`.
    ///
    /// `instruments` seeds the default capability policy (plain set
    /// membership); override with [`ConsensusPlanner::with_capability`].
    pub fn new(
        parent: &str,
        net_config: NetworkConfig,
        config: PlannerConfig,
        instruments: Vec<String>,
        results_root: impl Into<PathBuf>,
    ) -> Self {
        let (states_tx, states_rx) = mpsc::unbounded_channel();
        let (outcomes_tx, outcomes_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            name: format!("{parent}/planner"),
            parent: parent.to_string(),
            net_config,
            config,
            utility: Arc::new(LinearDecayUtility),
            cost: Arc::new(ZeroCost),
            capability: Arc::new(InstrumentSet(instruments)),
            orbits: Arc::new(GroundTrackTable::new(0.0)),
            results_root: results_root.into(),
            states_tx,
            states_rx: Mutex::new(states_rx),
            outcomes_tx,
            outcomes_rx: Mutex::new(outcomes_rx),
            events_tx,
            events_rx: Mutex::new(events_rx),
            plan_history: StdMutex::new(Vec::new()),
        }
    }

    pub fn with_utility(mut self, utility: Arc<dyn UtilityPolicy>) -> Self {
        self.utility = utility;
        self
    }

    pub fn with_cost(mut self, cost: Arc<dyn CostPolicy>) -> Self {
        self.cost = cost;
        self
    }

    pub fn with_capability(mut self, capability: Arc<dyn CapabilityPolicy>) -> Self {
        self.capability = capability;
        self
    }

    pub fn with_orbit_data(mut self, orbits: Arc<dyn OrbitDataProvider>) -> Self {
        self.orbits = orbits;
        self
    }

    fn ctx<'a>(&'a self, state: &'a AgentState) -> PlanningContext<'a> {
        PlanningContext {
            state,
            utility: self.utility.as_ref(),
            cost: self.cost.as_ref(),
            capability: self.capability.as_ref(),
            orbits: self.orbits.as_ref(),
            l_bundle: self.config.l_bundle,
        }
    }

    // ── Plan emission ─────────────────────────────────────────────────────

    async fn send_plan(&self, net: &ModuleNet, actions: Vec<Action>) -> ElementResult<()> {
        let payload = PlanPayload { actions };
        let msg = Message::new(&self.parent, &self.name, payload.to_body()?);
        net.sockets.send(SocketRole::Publish, &msg).await?;
        Ok(())
    }

    /// Broadcast `bids` through the agent: dedup to the freshest bid per
    /// pair, emit a plan of `BroadcastMessage` actions (plus a listen window
    /// when `wait_for_response`), and block until every emitted action has
    /// reported an outcome.  Outcomes that belong to other actions are
    /// buffered into `pending`.
    #[allow(clippy::too_many_arguments)]
    async fn flush_bids(
        &self,
        net: &ModuleNet,
        ledger: &PlannerLedger,
        bids: Vec<crate::bid::SubtaskBid>,
        extra: Option<Message>,
        t: f64,
        wait_for_response: bool,
        outcomes: &mut UnboundedReceiver<Action>,
        pending: &mut Vec<Action>,
    ) -> ElementResult<()> {
        // Freshest bid per (request, subtask).
        let mut freshest: Vec<crate::bid::SubtaskBid> = Vec::new();
        for bid in bids {
            match freshest
                .iter_mut()
                .find(|b| b.request_id == bid.request_id && b.subtask_index == bid.subtask_index)
            {
                Some(kept) => {
                    if bid.t_update >= kept.t_update {
                        *kept = bid;
                    }
                }
                None => freshest.push(bid),
            }
        }

        let mut plan = Vec::with_capacity(freshest.len() + 2);
        for bid in freshest {
            let payload = BidPayload {
                request: ledger.request(bid.request_id).clone(),
                bid,
            };
            let msg = Message::new(ElementRole::All.as_str(), &self.parent, payload.to_body()?);
            plan.push(Action::new(
                ActionKind::BroadcastMessage { msg: Box::new(msg) },
                t,
                t,
            ));
        }
        if let Some(msg) = extra {
            plan.push(Action::new(ActionKind::BroadcastMessage { msg: Box::new(msg) }, t, t));
        }
        if wait_for_response || plan.is_empty() {
            plan.push(Action::wait_for_messages(t, t + 1.0));
        }

        let mut awaiting: Vec<mas_core::ActionId> = plan.iter().map(|a| a.id).collect();
        self.send_plan(net, plan).await?;

        while !awaiting.is_empty() {
            let Some(outcome) = outcomes.recv().await else {
                // Listener gone: the run is ending.
                return Ok(());
            };
            if let Some(i) = awaiting.iter().position(|id| *id == outcome.id) {
                awaiting.swap_remove(i);
            } else {
                pending.push(outcome);
            }
        }
        Ok(())
    }

    // ── The update loop ───────────────────────────────────────────────────

    /// Alternate consensus and planning until the path converges.
    ///
    /// Convergence is evaluated after planning, and one further iteration
    /// runs once it first holds.  Every non-final iteration broadcasts the
    /// accumulated bid changes and consumes a fresh state, pacing the loop
    /// to the agent cycle.  On exit, every bid's optimistic counters are
    /// restored.
    #[allow(clippy::too_many_arguments)]
    async fn update_bundle(
        &self,
        net: &ModuleNet,
        ledger: &mut PlannerLedger,
        mut state: AgentState,
        states: &mut UnboundedReceiver<AgentState>,
        events: &mut UnboundedReceiver<BidEvent>,
        outcomes: &mut UnboundedReceiver<Action>,
        pending: &mut Vec<Action>,
    ) -> ElementResult<AgentState> {
        let mut converged = false;
        loop {
            let t = state.t();
            let consensus = ledger.consensus_phase(drain(events), t);
            let plan_changes = {
                let ctx = self.ctx(&state);
                planning_phase(&ctx, ledger)
            };

            if converged {
                break;
            }
            converged = ledger.path_converged(t);

            let mut broadcast = consensus.rebroadcasts;
            broadcast.extend(plan_changes);
            let wait = ledger.has_bundle_dependencies() && !converged;
            self.flush_bids(net, ledger, broadcast, None, t, wait, outcomes, pending)
                .await?;

            match states.recv().await {
                Some(next) => state = next,
                // Deactivating; let the routine notice on its next receive.
                None => break,
            }
        }
        ledger.reset_all_counters();
        Ok(state)
    }

    fn record_plan(&self, ledger: &PlannerLedger, plan: &[Action], t: f64) {
        let mut history = self.plan_history.lock().expect("plan history lock");
        let plan_index = history.iter().map(|row| row.plan_index + 1).max().unwrap_or(0);
        for action in plan {
            if let ActionKind::Measure { request_id, subtask_index, .. } = &action.kind {
                let bid = ledger.bid((*request_id, *subtask_index));
                history.push(PlanHistoryRow {
                    plan_index,
                    t,
                    request_id: *request_id,
                    subtask_index: *subtask_index,
                    t_img: bid.t_img,
                    u_exp: bid.winning_bid,
                });
            }
        }
    }
}

/// Non-blocking inbox drain: an empty inbox returns immediately.
fn drain<T>(rx: &mut UnboundedReceiver<T>) -> Vec<T> {
    let mut drained = Vec::new();
    while let Ok(item) = rx.try_recv() {
        drained.push(item);
    }
    drained
}

fn same_pairs(a: &[crate::ledger::Pair], b: &[crate::ledger::Pair]) -> bool {
    a.len() == b.len() && a.iter().all(|pair| b.contains(pair))
}

#[async_trait]
impl InternalModule for ConsensusPlanner {
    fn name(&self) -> &str {
        &self.name
    }

    fn parent(&self) -> &str {
        &self.parent
    }

    fn network_config(&self) -> &NetworkConfig {
        &self.net_config
    }

    async fn routine(&self, net: &ModuleNet, clock: &ClockConfig) -> ElementResult<()> {
        let mut states = self.states_rx.lock().await;
        let mut events = self.events_rx.lock().await;
        let mut outcomes = self.outcomes_rx.lock().await;

        let mut ledger = PlannerLedger::new(&self.parent, self.config.bid_params);
        let mut plan: Vec<Action> = Vec::new();
        let mut pending: Vec<Action> = Vec::new();

        loop {
            let Some(state) = states.recv().await else {
                info!(module = %self.name, "state stream closed; routine done");
                return Ok(());
            };
            let t = state.t();

            // ── Consensus over everything heard since the last state ──
            let pre_bundle = ledger.bundle.clone();
            let outcome = ledger.consensus_phase(drain(&mut events), t);
            let mut rebroadcasts = outcome.rebroadcasts;
            let bundle_changed = !same_pairs(&pre_bundle, &ledger.bundle);

            let mut state = state;
            if bundle_changed || !rebroadcasts.is_empty() {
                // ── Replan until stable ──
                let pre_update = ledger.bundle.clone();
                state = self
                    .update_bundle(net, &mut ledger, state, &mut states, &mut events, &mut outcomes, &mut pending)
                    .await?;
                let t = state.t();

                if !same_pairs(&pre_update, &ledger.bundle) {
                    for &pair in &ledger.bundle {
                        rebroadcasts.push(ledger.bid(pair).clone());
                    }
                }
                // Share the settled ledger alongside the final bids.
                let results_msg = self.converged_results(&ledger)?;
                self.flush_bids(
                    net, &ledger, rebroadcasts, results_msg, t, false, &mut outcomes, &mut pending,
                )
                .await?;

                let ctx = self.ctx(&state);
                plan = plan_from_path(&ctx, &ledger, clock);
                self.record_plan(&ledger, &plan, t);
                debug!(module = %self.name, actions = plan.len(), bundle = ledger.bundle.len(),
                       "plan rebuilt");
            }

            // ── Dispatch the next actions against reported outcomes ──
            let mut reported = std::mem::take(&mut pending);
            reported.extend(drain(&mut outcomes));
            let next = next_actions(&mut ledger, &mut plan, &reported, state.t());
            self.send_plan(net, next).await?;
        }
    }

    async fn listen(&self, net: &ModuleNet, _clock: &ClockConfig) -> ElementResult<()> {
        loop {
            let msg = net.sockets.recv(SocketRole::Subscribe).await?;
            match &msg.body {
                MessageBody::ModuleDeactivate if msg.src == self.parent => {
                    info!(module = %self.name, "deactivation observed");
                    return Ok(());
                }
                MessageBody::Senses(_) => {
                    let Some(Ok(payload)) = SensesPayload::from_body(&msg.body) else {
                        warn!(module = %self.name, "malformed senses payload");
                        continue;
                    };
                    self.route_senses(payload);
                }
                other => {
                    debug!(module = %self.name, kind = other.kind(), "ignoring internal message");
                }
            }
        }
    }

    async fn teardown(&self, _net: &ModuleNet) -> ElementResult<()> {
        let history = {
            let mut guard = self.plan_history.lock().expect("plan history lock");
            std::mem::take(&mut *guard)
        };
        let write = || -> mas_output::OutputResult<()> {
            let dir = element_dir(&self.results_root, &self.parent)?;
            let mut writer = PlanHistoryCsvWriter::create(&dir)?;
            for row in &history {
                writer.write(row)?;
            }
            writer.finish()
        };
        write().map_err(|e| {
            ElementError::aborted(&self.name, format!("plan history write failed: {e}"))
        })
    }
}

impl ConsensusPlanner {
    /// Split one senses message into the three inboxes.  Events are queued
    /// before the state so the consensus pass that the state triggers sees
    /// them.
    fn route_senses(&self, payload: SensesPayload) {
        for sense in payload.senses {
            match &sense.body {
                MessageBody::AgentAction(_) => {
                    if let Some(Ok(action)) = Action::from_body(&sense.body) {
                        let _ = self.outcomes_tx.send(action);
                    }
                }
                MessageBody::MeasurementRequest(_) => {
                    if let Some(Ok(request)) =
                        crate::request::MeasurementRequest::from_body(&sense.body)
                    {
                        let _ = self.events_tx.send(BidEvent::Request(request));
                    }
                }
                MessageBody::MeasurementBid(_) => {
                    if let Some(Ok(bid)) = BidPayload::from_body(&sense.body)
                        && bid.bid.bidder != self.parent
                    {
                        let _ = self.events_tx.send(BidEvent::Bid(bid));
                    }
                }
                MessageBody::PlannerResults(_) => {
                    if let Some(Ok(results)) = PlannerResultsPayload::from_body(&sense.body)
                        && results.bidder != self.parent
                    {
                        for bid in results.bids {
                            let _ = self.events_tx.send(BidEvent::Bid(bid));
                        }
                    }
                }
                // Peer states are carried for richer planners; this one
                // schedules from its own state only.
                MessageBody::AgentState(_) => {}
                other => {
                    debug!(module = %self.name, kind = other.kind(), "ignoring sense");
                }
            }
        }
        let _ = self.states_tx.send(payload.state);
    }

    /// The settled ledger as a `PlannerResults` broadcast (bundle bids
    /// only; empty bundles share nothing).
    fn converged_results(&self, ledger: &PlannerLedger) -> ElementResult<Option<Message>> {
        if ledger.bundle.is_empty() {
            return Ok(None);
        }
        let payload = PlannerResultsPayload {
            bidder: self.parent.clone(),
            bids: ledger
                .bundle
                .iter()
                .map(|&(rid, k)| BidPayload {
                    request: ledger.request(rid).clone(),
                    bid: ledger.bid((rid, k)).clone(),
                })
                .collect(),
        };
        let msg = Message::new(ElementRole::All.as_str(), &self.parent, payload.to_body()?);
        Ok(Some(msg))
    }
}
