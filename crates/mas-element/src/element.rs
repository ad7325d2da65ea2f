//! The `NetworkElement` trait and the lifecycle runner.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, error, info, info_span};

use mas_core::NetworkConfig;
use mas_net::SocketMap;

use crate::ElementResult;

// ── ElementNet ────────────────────────────────────────────────────────────────

/// The live network of one element: its two socket maps and the cancellation
/// token governing its execution.
///
/// Built by [`run_element`] during the configure step and handed to every
/// lifecycle hook.  Each socket serializes its own accesses; the maps
/// themselves are immutable once built.
pub struct ElementNet {
    /// External (inter-element) sockets.
    pub external: SocketMap,
    /// Internal (node↔module) sockets.  Empty for module-less elements.
    pub internal: SocketMap,
    /// Cancelled when the element must stop executing.  Cancellation of the
    /// execute step still runs deactivation.
    pub cancel: CancellationToken,
}

impl ElementNet {
    /// Bind and connect every endpoint `config` declares.
    ///
    /// A bind conflict or unreachable mandatory peer is a fatal startup
    /// error.
    pub async fn configure(name: &str, config: &NetworkConfig) -> ElementResult<Self> {
        let external = SocketMap::build(name, &config.external).await?;
        let internal = SocketMap::build(name, &config.internal).await?;
        Ok(Self { external, internal, cancel: CancellationToken::new() })
    }

    /// Close every socket on both planes.
    pub fn close(&self) {
        self.cancel.cancel();
        self.external.close_all();
        self.internal.close_all();
    }
}

// ── NetworkElement ────────────────────────────────────────────────────────────

/// A process participating in the simulation.
///
/// Implementations provide the four behavior hooks; [`run_element`] sequences
/// them.  Hooks receive the element's [`ElementNet`] and must treat
/// `net.cancel` as their stop signal: `execute` in particular should select
/// on it so that a sibling's termination or a launcher abort reaches
/// `teardown` promptly.
#[async_trait]
pub trait NetworkElement: Send {
    /// The element's unique name within the simulation network.
    fn name(&self) -> &str;

    /// The addresses this element binds and connects.
    fn network_config(&self) -> &NetworkConfig;

    /// Hook before step ① — launch work that must configure concurrently
    /// with this element (a node spawns its modules here, so module binds
    /// and node binds can wait on each other).  Default: nothing.
    async fn prepare(&mut self) -> ElementResult<()> {
        Ok(())
    }

    /// Step ② — element-type-specific synchronization.
    async fn sync(&mut self, net: &ElementNet) -> ElementResult<()>;

    /// Step ③ — block until the simulation may begin.
    async fn wait_for_start(&mut self, net: &ElementNet) -> ElementResult<()>;

    /// Step ④ — the element's main behavior.
    async fn execute(&mut self, net: &ElementNet) -> ElementResult<()>;

    /// Step ⑤ — publish deactivation and flush results.
    ///
    /// Runs whenever configure succeeded, regardless of how execute ended.
    async fn teardown(&mut self, net: &ElementNet) -> ElementResult<()>;
}

/// Drive `element` through its full lifecycle.
///
/// Returns `Ok(())` only for a clean run: configure, sync, and wait-start
/// succeeded, and both execute and teardown completed without error.
/// Failures in steps ①–③ abort immediately (after closing any sockets
/// already opened) — they indicate a misconfigured simulation, not a
/// runtime condition to recover from.
pub async fn run_element<E: NetworkElement + ?Sized>(element: &mut E) -> ElementResult<()> {
    let name = element.name().to_string();
    let span = info_span!("element", name = %name);
    run_element_inner(element, name).instrument(span).await
}

async fn run_element_inner<E: NetworkElement + ?Sized>(
    element: &mut E,
    name: String,
) -> ElementResult<()> {
    element.prepare().await?;

    // ① configure
    let net = ElementNet::configure(&name, element.network_config()).await?;
    info!("network configured");

    // ② sync, ③ wait-for-start — fatal on failure, but close sockets first.
    for (step, label) in [(2, "sync"), (3, "wait-for-start")] {
        let result = match step {
            2 => element.sync(&net).await,
            _ => element.wait_for_start(&net).await,
        };
        if let Err(e) = result {
            error!(step = label, error = %e, "startup failed");
            net.close();
            return Err(e);
        }
        info!(step = label, "complete");
    }

    // ④ execute — ⑤ always follows.
    let executed = element.execute(&net).await;
    if let Err(e) = &executed {
        error!(error = %e, "execution failed; deactivating");
    }
    net.cancel.cancel();

    // ⑤ deactivate
    let torn_down = element.teardown(&net).await;
    if let Err(e) = &torn_down {
        error!(error = %e, "teardown failed");
    }
    net.close();
    info!("deactivated");

    executed.and(torn_down)
}

/// Jittered backoff before retrying a rejected protocol message.
pub(crate) async fn retry_backoff() {
    use rand::Rng;
    let millis = rand::thread_rng().gen_range(20..120);
    tokio::time::sleep(std::time::Duration::from_millis(millis)).await;
}
