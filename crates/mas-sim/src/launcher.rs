//! The launcher: one OS thread per element, results persistence, and
//! exit-code mapping.

use std::io::Write;
use std::sync::Arc;
use std::thread;

use tracing::{error, info};

use mas_agent::Agent;
use mas_element::{InternalModule, Manager, Monitor, run_element};
use mas_output::{element_dir, reset_results_root};
use mas_planner::{ConsensusPlanner, PlannerConfig};

use crate::environment::Environment;
use crate::scenario::ScenarioConfig;
use crate::{SimError, SimResult};

/// Install the global tracing subscriber from the scenario's filter
/// directive.  Safe to call repeatedly; later calls are no-ops.
pub fn init_tracing(filter: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .with_target(false)
        .try_init();
}

/// Run one scenario to completion.
///
/// Hosts the manager, the monitor, the environment, and every agent on its
/// own named OS thread, each with a single-threaded cooperative runtime.
/// Returns `Ok(())` only when every element completed a clean `SimEnd`
/// lifecycle; any element failure (or panic) surfaces as the first error.
pub fn run_scenario(config: &ScenarioConfig) -> SimResult<()> {
    config.validate()?;
    config.check_bound_endpoints()?;
    reset_results_root(&config.results_root)?;
    init_tracing(&config.log_level);
    info!(scenario = %config.name, agents = config.agents.len(), clock = config.clock.kind(),
          "launching simulation");

    let mut handles: Vec<(String, thread::JoinHandle<SimResult<()>>)> = Vec::new();

    // ── Manager ───────────────────────────────────────────────────────────
    let mut manager = Manager::new(
        config.manager_network(),
        config.roster(),
        config.clock.clone(),
    );
    handles.push((
        "MANAGER".into(),
        spawn_element("MANAGER", move || async move {
            run_element(&mut manager).await?;
            Ok(())
        })?,
    ));

    // ── Monitor ───────────────────────────────────────────────────────────
    let monitor_dir = element_dir(&config.results_root, "monitor")?;
    let mut monitor = Monitor::new(config.monitor_network());
    handles.push((
        "MONITOR".into(),
        spawn_element("MONITOR", move || async move {
            run_element(&mut monitor).await?;
            persist_monitor_records(&monitor_dir, monitor.take_records())?;
            Ok(())
        })?,
    ));

    // ── Environment ───────────────────────────────────────────────────────
    let mut environment = Environment::new(
        config.environment_network(),
        config.requests.clone(),
        config.comms_range,
    );
    handles.push((
        "ENVIRONMENT".into(),
        spawn_element("ENVIRONMENT", move || async move {
            run_element(&mut environment).await?;
            Ok(())
        })?,
    ));

    // ── Agents ────────────────────────────────────────────────────────────
    for (index, spec) in config.agents.iter().enumerate() {
        let planner = ConsensusPlanner::new(
            &spec.name,
            config.planner_network(index),
            PlannerConfig { l_bundle: spec.l_bundle, bid_params: spec.bid_params },
            spec.initial_state.instruments().to_vec(),
            config.results_root.clone(),
        );
        let mut agent = Agent::new(
            &spec.name,
            config.agent_network(index),
            spec.initial_state.clone(),
            Arc::new(planner) as Arc<dyn InternalModule>,
            config.results_root.clone(),
        );
        handles.push((
            spec.name.clone(),
            spawn_element(&spec.name, move || async move {
                run_element(&mut agent).await?;
                Ok(())
            })?,
        ));
    }

    // ── Join ──────────────────────────────────────────────────────────────
    let mut first_error: Option<SimError> = None;
    for (name, handle) in handles {
        match handle.join() {
            Ok(Ok(())) => info!(element = %name, "thread finished cleanly"),
            Ok(Err(e)) => {
                error!(element = %name, error = %e, "element failed");
                first_error.get_or_insert(e);
            }
            Err(_) => {
                error!(element = %name, "element thread panicked");
                first_error.get_or_insert(SimError::Panicked(name));
            }
        }
    }
    match first_error {
        None => Ok(()),
        Some(e) => Err(e),
    }
}

/// [`run_scenario`] mapped to a process exit code: 0 on a clean `SimEnd`,
/// 1 on any unrecoverable error.
pub fn run_to_exit_code(config: &ScenarioConfig) -> i32 {
    match run_scenario(config) {
        Ok(()) => 0,
        Err(e) => {
            error!(error = %e, "simulation failed");
            1
        }
    }
}

/// Host one element on a dedicated thread with a current-thread runtime:
/// the cooperative scheduling model — every concurrent activity of an
/// element interleaves on one thread, suspending only at await points.
fn spawn_element<F, Fut>(name: &str, body: F) -> SimResult<thread::JoinHandle<SimResult<()>>>
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = SimResult<()>>,
{
    thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .map_err(mas_core::MasError::Io)?;
            runtime.block_on(body())
        })
        .map_err(|e| SimError::Core(mas_core::MasError::Io(e)))
}

/// Monitor evidence as JSON lines under `<results>/monitor/records.jsonl`.
fn persist_monitor_records(
    dir: &std::path::Path,
    records: Vec<mas_core::Message>,
) -> SimResult<()> {
    let path = dir.join("records.jsonl");
    let mut file = std::fs::File::create(path).map_err(mas_core::MasError::Io)?;
    for record in records {
        let line = record.to_json()?;
        writeln!(file, "{line}").map_err(mas_core::MasError::Io)?;
    }
    Ok(())
}
