//! Scenario configuration and the port plan.
//!
//! A scenario is a plain serde document (JSON in practice) naming the run,
//! the clock, the agents with their initial states and planner tuning, and
//! the measurement requests the environment releases over time.
//!
//! # Port plan
//!
//! Every element's endpoints derive from one `base_port`:
//!
//! ```text
//! base      manager reply          base+3    environment reply
//! base+1    manager publish        base+4    environment publish
//! base+2    monitor pull
//! base+5+5i agent i publish        +1 agent i reply
//!           +2 agent i internal reply
//!           +3 agent i internal publish
//!           +4 agent i planner-module publish
//! ```

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use mas_agent::AgentState;
use mas_core::{ClockConfig, ElementRole, MasError, NetworkConfig, SocketRole};
use mas_planner::{BidParams, MeasurementRequest};

use crate::{SimError, SimResult};

/// Ports reserved per agent (see the module docs).
const PORTS_PER_AGENT: u16 = 5;
/// Ports reserved for manager, monitor, and environment.
const SHARED_PORTS: u16 = 5;

// ── Specs ─────────────────────────────────────────────────────────────────────

/// One agent of the scenario.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AgentSpec {
    pub name: String,
    /// Initial state; its variant decides the agent's motion model and its
    /// instrument list seeds the planner's capability policy.
    pub initial_state: AgentState,
    /// Maximum bundle size for the consensus planner.
    pub l_bundle: usize,
    #[serde(default)]
    pub bid_params: BidParams,
}

/// One measurement request and when the environment announces it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RequestSpec {
    /// Simulated time at which the request becomes known.
    pub release_t: f64,
    pub request: MeasurementRequest,
}

/// The full description of one run.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScenarioConfig {
    /// Scenario name; the results directory is `<results_root>`, created
    /// (and cleared) at start.
    pub name: String,
    pub results_root: PathBuf,
    pub base_port: u16,
    /// Tracing filter directive, e.g. `"info"` or `"mas_planner=debug"`.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    pub clock: ClockConfig,
    /// Pairwise communication range; `None` keeps every agent connected.
    #[serde(default)]
    pub comms_range: Option<f64>,
    pub agents: Vec<AgentSpec>,
    #[serde(default)]
    pub requests: Vec<RequestSpec>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl ScenarioConfig {
    /// The roster the manager waits for: every agent plus the environment.
    pub fn roster(&self) -> Vec<String> {
        let mut roster: Vec<String> =
            self.agents.iter().map(|spec| spec.name.clone()).collect();
        roster.push(ElementRole::Environment.as_str().to_string());
        roster
    }

    /// Validate the clock, the requests, and element-name uniqueness.
    pub fn validate(&self) -> SimResult<()> {
        self.clock.validate()?;
        for spec in &self.requests {
            spec.request.validate()?;
        }
        let mut names: Vec<&str> = self.agents.iter().map(|a| a.name.as_str()).collect();
        names.sort_unstable();
        if names.windows(2).any(|w| w[0] == w[1]) {
            return Err(SimError::Scenario("duplicate agent names".into()));
        }
        if self.agents.iter().any(|a| {
            ElementRole::is_environment(&a.name)
                || a.name == ElementRole::Manager.as_str()
                || a.name == ElementRole::Monitor.as_str()
        }) {
            return Err(SimError::Scenario("agent names must not shadow reserved roles".into()));
        }
        let span = SHARED_PORTS + PORTS_PER_AGENT * self.agents.len() as u16;
        if self.base_port.checked_add(span).is_none() {
            return Err(SimError::Scenario(format!(
                "base port {} leaves no room for {} elements",
                self.base_port,
                self.agents.len()
            )));
        }
        Ok(())
    }

    // ── Port plan ─────────────────────────────────────────────────────────

    fn ep(&self, offset: u16) -> String {
        format!("tcp://127.0.0.1:{}", self.base_port + offset)
    }

    pub fn manager_reply_ep(&self) -> String {
        self.ep(0)
    }

    pub fn manager_publish_ep(&self) -> String {
        self.ep(1)
    }

    pub fn monitor_pull_ep(&self) -> String {
        self.ep(2)
    }

    pub fn environment_reply_ep(&self) -> String {
        self.ep(3)
    }

    pub fn environment_publish_ep(&self) -> String {
        self.ep(4)
    }

    fn agent_base(&self, index: usize) -> u16 {
        SHARED_PORTS + PORTS_PER_AGENT * index as u16
    }

    pub fn agent_publish_ep(&self, index: usize) -> String {
        self.ep(self.agent_base(index))
    }

    pub fn agent_reply_ep(&self, index: usize) -> String {
        self.ep(self.agent_base(index) + 1)
    }

    fn agent_internal_reply_ep(&self, index: usize) -> String {
        self.ep(self.agent_base(index) + 2)
    }

    fn agent_internal_publish_ep(&self, index: usize) -> String {
        self.ep(self.agent_base(index) + 3)
    }

    fn planner_publish_ep(&self, index: usize) -> String {
        self.ep(self.agent_base(index) + 4)
    }

    // ── Element network configs ───────────────────────────────────────────

    pub fn manager_network(&self) -> NetworkConfig {
        NetworkConfig::new(&self.name)
            .with_external(SocketRole::Reply, vec![self.manager_reply_ep()])
            .with_external(SocketRole::Publish, vec![self.manager_publish_ep()])
            .with_external(SocketRole::Push, vec![self.monitor_pull_ep()])
    }

    pub fn monitor_network(&self) -> NetworkConfig {
        NetworkConfig::new(&self.name)
            .with_external(SocketRole::Subscribe, vec![self.manager_publish_ep()])
            .with_external(SocketRole::Pull, vec![self.monitor_pull_ep()])
    }

    pub fn environment_network(&self) -> NetworkConfig {
        NetworkConfig::new(&self.name)
            .with_external(SocketRole::Request, vec![self.manager_reply_ep()])
            .with_external(SocketRole::Subscribe, vec![self.manager_publish_ep()])
            .with_external(SocketRole::Push, vec![self.monitor_pull_ep()])
            .with_external(SocketRole::Reply, vec![self.environment_reply_ep()])
            .with_external(SocketRole::Publish, vec![self.environment_publish_ep()])
    }

    /// The agent's two-plane configuration: manager/monitor/environment
    /// connections, its own peer endpoints, and the internal channels shared
    /// with its planner module.
    pub fn agent_network(&self, index: usize) -> NetworkConfig {
        NetworkConfig::new(&self.name)
            .with_external(SocketRole::Request, vec![self.manager_reply_ep()])
            .with_external(
                SocketRole::Subscribe,
                vec![self.manager_publish_ep(), self.environment_publish_ep()],
            )
            .with_external(SocketRole::Push, vec![self.monitor_pull_ep()])
            .with_external(SocketRole::Publish, vec![self.agent_publish_ep(index)])
            .with_external(SocketRole::Reply, vec![self.agent_reply_ep(index)])
            .with_internal(SocketRole::Reply, vec![self.agent_internal_reply_ep(index)])
            .with_internal(SocketRole::Publish, vec![self.agent_internal_publish_ep(index)])
            .with_internal(SocketRole::Subscribe, vec![self.planner_publish_ep(index)])
    }

    /// The planner module's internal-plane configuration for agent `index`.
    pub fn planner_network(&self, index: usize) -> NetworkConfig {
        NetworkConfig::new(&self.name)
            .with_internal(SocketRole::Request, vec![self.agent_internal_reply_ep(index)])
            .with_internal(SocketRole::Subscribe, vec![self.agent_internal_publish_ep(index)])
            .with_internal(SocketRole::Publish, vec![self.planner_publish_ep(index)])
    }

    /// Every endpoint bound on this host, for the duplicate check.
    pub fn check_bound_endpoints(&self) -> SimResult<()> {
        let mut bound: Vec<String> = Vec::new();
        let mut configs = vec![
            self.manager_network(),
            self.monitor_network(),
            self.environment_network(),
        ];
        for index in 0..self.agents.len() {
            configs.push(self.agent_network(index));
            configs.push(self.planner_network(index));
        }
        for config in &configs {
            for endpoint in config.bound_endpoints() {
                if bound.iter().any(|b| b == endpoint) {
                    return Err(SimError::Core(MasError::Config(format!(
                        "endpoint {endpoint} bound by two elements"
                    ))));
                }
                bound.push(endpoint.to_string());
            }
        }
        Ok(())
    }
}
