//! The simulation manager: roster registration, start gating, clock
//! advancement, and shutdown collection.

use std::time::Duration;

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use mas_core::{
    AddressLedger, ClockConfig, ElementRole, Message, MessageBody, NetworkConfig, SocketRole,
};

use crate::element::{ElementNet, NetworkElement};
use crate::{ElementError, ElementResult};

/// Default wall-clock budget for each coordination round.
pub const DEFAULT_SYNC_TIMEOUT: Duration = Duration::from_secs(10);

// ── Manager ───────────────────────────────────────────────────────────────────

/// The distinguished element owning the authoritative clock.
///
/// Lifecycle mapping:
///
/// | Step           | Behavior                                                  |
/// |----------------|-----------------------------------------------------------|
/// | sync           | collect `SyncRequest` from every rostered element, build the address ledger, broadcast `SimInfo` |
/// | wait-for-start | collect `NodeReady` from every rostered element           |
/// | execute        | broadcast `SimStart`, advance the clock per its variant, broadcast `SimEnd` |
/// | teardown       | collect `NodeDeactivated` from every rostered element     |
pub struct Manager {
    name: String,
    config: NetworkConfig,
    /// Elements expected to register (everything but the manager and the
    /// passive monitor).
    roster: Vec<String>,
    clock: ClockConfig,
    sync_timeout: Duration,
    /// Filled during sync from the registrations.
    ledger: AddressLedger,
}

impl Manager {
    pub fn new(config: NetworkConfig, roster: Vec<String>, clock: ClockConfig) -> Self {
        Self {
            name: ElementRole::Manager.as_str().to_string(),
            config,
            roster,
            clock,
            sync_timeout: DEFAULT_SYNC_TIMEOUT,
            ledger: AddressLedger::default(),
        }
    }

    /// Override the per-round sync deadline (tests use short ones).
    pub fn with_sync_timeout(mut self, timeout: Duration) -> Self {
        self.sync_timeout = timeout;
        self
    }

    /// The address ledger assembled during sync.
    pub fn ledger(&self) -> &AddressLedger {
        &self.ledger
    }

    /// Roster members that participate in tic rounds.
    fn tic_participants(&self) -> Vec<String> {
        self.roster
            .iter()
            .filter(|name| !ElementRole::is_environment(name))
            .cloned()
            .collect()
    }

    // ── Reply rounds ──────────────────────────────────────────────────────

    /// Collect one message of kind `expected_kind` from every name in
    /// `expected`, acknowledging each and rejecting everything else with
    /// `ReceptionIgnored`.
    ///
    /// Rejected senders: not in `expected`, already heard this round, or the
    /// wrong message kind for this protocol step.
    async fn collect_round(
        &self,
        net: &ElementNet,
        expected: &[String],
        expected_kind: &str,
    ) -> ElementResult<FxHashMap<String, Message>> {
        let mut received: FxHashMap<String, Message> = FxHashMap::default();
        let deadline = Instant::now() + self.sync_timeout;

        while received.len() < expected.len() {
            let msg = match tokio::time::timeout_at(deadline, net.external.recv(SocketRole::Reply))
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
                debug!(src = %src, kind = expected_kind, progress = received.len() + 1,
                       total = expected.len(), "round progress");
                received.insert(src.clone(), msg);
                MessageBody::ReceptionAck
            } else {
                debug!(src = %src, kind = msg.kind(), "rejecting out-of-protocol message");
                MessageBody::ReceptionIgnored
            };
            net.external
                .send(SocketRole::Reply, &Message::new(src, &self.name, reply))
                .await?;
        }
        Ok(received)
    }

    /// One tic round: a `TicRequest` from every participant, duplicates and
    /// strangers rejected.  Returns the requested `tf` values.
    async fn tic_round(
        &self,
        net: &ElementNet,
        participants: &[String],
    ) -> ElementResult<Vec<f64>> {
        let round = self.collect_round(net, participants, "TicRequest").await?;
        Ok(round
            .values()
            .filter_map(|msg| match msg.body {
                MessageBody::TicRequest { tf, .. } => Some(tf),
                _ => None,
            })
            .collect())
    }

    // ── Broadcasts ────────────────────────────────────────────────────────

    async fn broadcast(&self, net: &ElementNet, body: MessageBody) -> ElementResult<()> {
        let msg = Message::new(ElementRole::All.as_str(), &self.name, body);
        net.external.send(SocketRole::Publish, &msg).await?;
        Ok(())
    }

    /// Publish a `Toc` to every subscriber and push a copy to the monitor.
    async fn broadcast_toc(&self, net: &ElementNet, t: f64) -> ElementResult<()> {
        self.broadcast(net, MessageBody::Toc { t }).await?;
        if net.external.has(SocketRole::Push) {
            let copy = Message::new(
                ElementRole::Monitor.as_str(),
                &self.name,
                MessageBody::Toc { t },
            );
            net.external.send(SocketRole::Push, &copy).await?;
        }
        Ok(())
    }

    // ── Clock advancement ─────────────────────────────────────────────────

    async fn advance_clock(&self, net: &ElementNet) -> ElementResult<()> {
        // With nobody to coordinate the clock collapses to a point.
        if self.roster.is_empty() {
            return Ok(());
        }
        match self.clock.clone() {
            ClockConfig::RealTime { start, end } => {
                tokio::time::sleep(Duration::from_secs_f64(end - start)).await;
            }
            ClockConfig::AcceleratedRealTime { start, end, factor } => {
                tokio::time::sleep(Duration::from_secs_f64((end - start) / factor)).await;
            }
            ClockConfig::FixedTimeStep { start, end, dt } => {
                let participants = self.tic_participants();
                let mut t = start;
                while t < end {
                    self.broadcast_toc(net, t).await?;
                    if !participants.is_empty() {
                        self.tic_round(net, &participants).await?;
                    }
                    t += dt;
                }
                self.broadcast_toc(net, end).await?;
            }
            ClockConfig::EventDriven { start, end } => {
                let participants = self.tic_participants();
                let mut t = start;
                while t < end {
                    self.broadcast_toc(net, t).await?;
                    if participants.is_empty() {
                        break;
                    }
                    let requested = self.tic_round(net, &participants).await?;
                    let tf_min = requested.iter().copied().fold(f64::INFINITY, f64::min);
                    if tf_min <= t {
                        // A stalled or corrupt requester would freeze the run.
                        warn!(t, tf_min, "tic requests do not advance time; ending clock");
                        break;
                    }
                    t = tf_min.min(end);
                }
                self.broadcast_toc(net, end).await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl NetworkElement for Manager {
    fn name(&self) -> &str {
        &self.name
    }

    fn network_config(&self) -> &NetworkConfig {
        &self.config
    }

    async fn sync(&mut self, net: &ElementNet) -> ElementResult<()> {
        info!(roster = ?self.roster, "collecting registrations");
        let registrations = self.collect_round(net, &self.roster.clone(), "SyncRequest").await?;

        for (src, msg) in registrations {
            if let MessageBody::SyncRequest { network_config } = msg.body {
                self.ledger.insert(src, network_config);
            }
        }
        info!(elements = self.ledger.len(), "roster complete; broadcasting simulation info");
        self.broadcast(
            net,
            MessageBody::SimInfo {
                address_ledger: self.ledger.clone(),
                clock_config: self.clock.clone(),
            },
        )
        .await
    }

    async fn wait_for_start(&mut self, net: &ElementNet) -> ElementResult<()> {
        self.collect_round(net, &self.roster.clone(), "NodeReady").await?;
        info!("all elements ready");
        Ok(())
    }

    async fn execute(&mut self, net: &ElementNet) -> ElementResult<()> {
        self.broadcast(net, MessageBody::SimStart).await?;
        info!(clock = self.clock.kind(), "simulation started");

        self.advance_clock(net).await?;

        self.broadcast(net, MessageBody::SimEnd).await?;
        if net.external.has(SocketRole::Push) {
            let msg = Message::new(ElementRole::Monitor.as_str(), &self.name, MessageBody::SimEnd);
            net.external.send(SocketRole::Push, &msg).await?;
        }
        info!("simulation ended");
        Ok(())
    }

    async fn teardown(&mut self, net: &ElementNet) -> ElementResult<()> {
        // Detects nodes that died mid-run: they never report deactivation and
        // the round times out.
        self.collect_round(net, &self.roster.clone(), "NodeDeactivated").await?;
        info!("all elements deactivated");
        Ok(())
    }
}
