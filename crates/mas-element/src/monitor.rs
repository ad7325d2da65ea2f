//! The results monitor: a passive end-of-run evidence collector.

use async_trait::async_trait;
use tracing::{debug, info};

use mas_core::{ElementRole, Message, MessageBody, NetworkConfig, SocketRole};

use crate::element::{ElementNet, NetworkElement};
use crate::ElementResult;

/// Passive subscriber plus pull sink.
///
/// The monitor is *not* part of the manager's roster: it never registers,
/// never reports readiness, and never sends tic requests.  It subscribes to
/// the manager's broadcasts to learn the run's phase, binds the pull
/// endpoint every element pushes evidence to, and stores what arrives until
/// `SimEnd`.
pub struct Monitor {
    name: String,
    config: NetworkConfig,
    records: Vec<Message>,
}

impl Monitor {
    pub fn new(config: NetworkConfig) -> Self {
        Self {
            name: ElementRole::Monitor.as_str().to_string(),
            config,
            records: Vec::new(),
        }
    }

    /// Everything pushed to the monitor, in arrival order.
    pub fn records(&self) -> &[Message] {
        &self.records
    }

    pub fn take_records(&mut self) -> Vec<Message> {
        std::mem::take(&mut self.records)
    }
}

#[async_trait]
impl NetworkElement for Monitor {
    fn name(&self) -> &str {
        &self.name
    }

    fn network_config(&self) -> &NetworkConfig {
        &self.config
    }

    async fn sync(&mut self, _net: &ElementNet) -> ElementResult<()> {
        // Passive: nothing to register.
        Ok(())
    }

    async fn wait_for_start(&mut self, net: &ElementNet) -> ElementResult<()> {
        loop {
            let msg = net.external.recv(SocketRole::Subscribe).await?;
            match msg.body {
                MessageBody::SimStart if msg.src == ElementRole::Manager.as_str() => {
                    return Ok(());
                }
                other => debug!(kind = other.kind(), "ignoring pre-start broadcast"),
            }
        }
    }

    async fn execute(&mut self, net: &ElementNet) -> ElementResult<()> {
        loop {
            tokio::select! {
                pushed = net.external.recv(SocketRole::Pull) => {
                    let msg = pushed?;
                    let ended = matches!(msg.body, MessageBody::SimEnd);
                    self.records.push(msg);
                    if ended {
                        break;
                    }
                }
                broadcast = net.external.recv(SocketRole::Subscribe) => {
                    let msg = broadcast?;
                    if matches!(msg.body, MessageBody::SimEnd) {
                        break;
                    }
                    debug!(kind = msg.kind(), "broadcast observed");
                }
                _ = net.cancel.cancelled() => break,
            }
        }

        // Elements push their end-of-run evidence after observing SimEnd
        // themselves; linger until the pull endpoint goes quiet.
        loop {
            let pushed = tokio::time::timeout(
                std::time::Duration::from_secs(1),
                net.external.recv(SocketRole::Pull),
            )
            .await;
            match pushed {
                Ok(Ok(msg)) => self.records.push(msg),
                Ok(Err(_)) | Err(_) => break,
            }
        }
        info!(records = self.records.len(), "collection complete");
        Ok(())
    }

    async fn teardown(&mut self, _net: &ElementNet) -> ElementResult<()> {
        // The launcher persists the records; nothing to publish.
        Ok(())
    }
}
