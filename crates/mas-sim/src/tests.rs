//! End-to-end scenarios: full element fleets over live sockets.

use std::path::Path;
use std::sync::atomic::{AtomicU16, Ordering};

use mas_agent::{AgentState, AgentStatus, KinematicState};
use mas_core::{ClockConfig, Vec2};
use mas_planner::{BidParams, MeasurementRequest};

use crate::launcher::run_scenario;
use crate::scenario::{AgentSpec, RequestSpec, ScenarioConfig};

// ── Helpers ───────────────────────────────────────────────────────────────────

/// Each scenario claims a disjoint port block so tests can run in parallel.
fn next_base_port() -> u16 {
    static NEXT_BLOCK: AtomicU16 = AtomicU16::new(45_000);
    NEXT_BLOCK.fetch_add(100, Ordering::Relaxed)
}

fn kinematic(pos: Vec2, instruments: &[&str]) -> AgentState {
    AgentState::Kinematic(KinematicState {
        pos,
        vel: Vec2::ZERO,
        v_max: 1.0,
        x_bounds: [0.0, 10.0],
        y_bounds: [0.0, 10.0],
        status: AgentStatus::Idling,
        t: 0.0,
        instruments: instruments.iter().map(|s| s.to_string()).collect(),
    })
}

fn agent(name: &str, pos: Vec2, instruments: &[&str]) -> AgentSpec {
    AgentSpec {
        name: name.into(),
        initial_state: kinematic(pos, instruments),
        l_bundle: 3,
        bid_params: BidParams::default(),
    }
}

fn simple_request() -> RequestSpec {
    RequestSpec {
        release_t: 0.0,
        request: MeasurementRequest::independent(
            Vec2::new(5.0, 5.0),
            vec!["VNIR".into()],
            0.0,
            10.0,
            1.0,
            100.0,
        ),
    }
}

fn scenario(name: &str, root: &Path, clock: ClockConfig) -> ScenarioConfig {
    ScenarioConfig {
        name: name.into(),
        results_root: root.join(name),
        base_port: next_base_port(),
        log_level: "warn".into(),
        clock,
        comms_range: None,
        agents: Vec::new(),
        requests: Vec::new(),
    }
}

fn csv_data_rows(path: &Path) -> Vec<String> {
    let contents = std::fs::read_to_string(path)
        .unwrap_or_else(|e| panic!("missing {}: {e}", path.display()));
    contents.lines().skip(1).map(str::to_string).collect()
}

// ── Scenarios ─────────────────────────────────────────────────────────────────

#[test]
fn single_agent_measures_the_single_request() {
    let root = tempfile::tempdir().unwrap();
    let mut config = scenario(
        "single",
        root.path(),
        ClockConfig::EventDriven { start: 0.0, end: 10.0 },
    );
    config.agents.push(agent("AGENT_0", Vec2::new(4.0, 5.0), &["VNIR"]));
    config.requests.push(simple_request());
    let request_id = config.requests[0].request.id;

    run_scenario(&config).unwrap();

    let agent_dir = config.results_root.join("AGENT_0");
    let states = csv_data_rows(&agent_dir.join("states.csv"));
    assert!(!states.is_empty(), "state history must be recorded");

    let history = csv_data_rows(&agent_dir.join("planner_history.csv"));
    assert!(
        history.iter().any(|row| row.contains(&request_id.short())),
        "planner history must schedule the request: {history:?}"
    );

    // The agent actually reached the target and measured there.
    assert!(
        states.iter().any(|row| row.contains("MEASURING")),
        "agent never measured: {states:?}"
    );
}

#[test]
fn capability_miss_leaves_the_request_unscheduled() {
    let root = tempfile::tempdir().unwrap();
    let mut config = scenario(
        "capability-miss",
        root.path(),
        ClockConfig::EventDriven { start: 0.0, end: 6.0 },
    );
    config.agents.push(agent("AGENT_0", Vec2::new(4.0, 5.0), &["MWR"]));
    config.requests.push(simple_request()); // wants VNIR

    run_scenario(&config).unwrap();

    let agent_dir = config.results_root.join("AGENT_0");
    let history = csv_data_rows(&agent_dir.join("planner_history.csv"));
    assert!(history.is_empty(), "nothing biddable may be scheduled: {history:?}");

    let states = csv_data_rows(&agent_dir.join("states.csv"));
    assert!(!states.iter().any(|row| row.contains("MEASURING")));
}

#[test]
fn closer_agent_wins_competitive_bid() {
    let root = tempfile::tempdir().unwrap();
    let mut config = scenario(
        "competition",
        root.path(),
        ClockConfig::EventDriven { start: 0.0, end: 12.0 },
    );
    config.agents.push(agent("AGENT_NEAR", Vec2::new(4.0, 5.0), &["VNIR"]));
    config.agents.push(agent("AGENT_FAR", Vec2::new(0.0, 5.0), &["VNIR"]));
    config.requests.push(simple_request());

    run_scenario(&config).unwrap();

    let near_states =
        csv_data_rows(&config.results_root.join("AGENT_NEAR").join("states.csv"));
    assert!(
        near_states.iter().any(|row| row.contains("MEASURING")),
        "the closer agent must perform the measurement"
    );

    let near_history =
        csv_data_rows(&config.results_root.join("AGENT_NEAR").join("planner_history.csv"));
    assert!(!near_history.is_empty());
}

#[test]
fn fixed_step_clock_keeps_schedule_on_the_grid() {
    let root = tempfile::tempdir().unwrap();
    let mut config = scenario(
        "fixed-step",
        root.path(),
        ClockConfig::FixedTimeStep { start: 0.0, end: 5.0, dt: 0.5 },
    );
    config.agents.push(agent("AGENT_0", Vec2::new(4.0, 5.0), &["VNIR"]));
    config.requests.push(simple_request());

    run_scenario(&config).unwrap();

    let agent_dir = config.results_root.join("AGENT_0");
    for row in csv_data_rows(&agent_dir.join("planner_history.csv")) {
        let t_img: f64 = row.split(',').nth(4).unwrap().parse().unwrap();
        let steps = t_img / 0.5;
        assert!((steps - steps.round()).abs() < 1e-9, "t_img {t_img} is off the 0.5 s grid");
    }
    for row in csv_data_rows(&agent_dir.join("states.csv")) {
        let t: f64 = row.split(',').next().unwrap().parse().unwrap();
        let steps = t / 0.5;
        assert!((steps - steps.round()).abs() < 1e-9, "state sample {t} off the grid");
    }
}

#[test]
fn monitor_collects_clock_evidence() {
    let root = tempfile::tempdir().unwrap();
    let mut config = scenario(
        "monitored",
        root.path(),
        ClockConfig::FixedTimeStep { start: 0.0, end: 2.0, dt: 0.5 },
    );
    config.agents.push(agent("AGENT_0", Vec2::new(4.0, 5.0), &["VNIR"]));

    run_scenario(&config).unwrap();

    let records = std::fs::read_to_string(
        config.results_root.join("monitor").join("records.jsonl"),
    )
    .unwrap();
    let tocs = records.lines().filter(|l| l.contains("\"kind\":\"Toc\"")).count();
    assert!(tocs >= 4, "one pushed Toc per step expected, got {tocs}");
    assert!(records.lines().any(|l| l.contains("\"kind\":\"SimEnd\"")));
}

#[test]
fn scenario_validation_rejects_bad_configs() {
    let root = tempfile::tempdir().unwrap();
    let mut config = scenario(
        "invalid",
        root.path(),
        ClockConfig::FixedTimeStep { start: 0.0, end: 1.0, dt: -0.5 },
    );
    assert!(run_scenario(&config).is_err(), "negative dt must be rejected");

    config.clock = ClockConfig::RealTime { start: 0.0, end: 1.0 };
    config.agents.push(agent("AGENT_0", Vec2::ZERO, &["VNIR"]));
    config.agents.push(agent("AGENT_0", Vec2::ZERO, &["VNIR"]));
    assert!(run_scenario(&config).is_err(), "duplicate names must be rejected");
}

#[test]
fn scenario_config_serde_roundtrip() {
    let root = tempfile::tempdir().unwrap();
    let mut config = scenario(
        "serde",
        root.path(),
        ClockConfig::AcceleratedRealTime { start: 0.0, end: 60.0, factor: 10.0 },
    );
    config.agents.push(agent("AGENT_0", Vec2::new(1.0, 2.0), &["VNIR"]));
    config.requests.push(simple_request());

    let json = serde_json::to_string_pretty(&config).unwrap();
    let back: ScenarioConfig = serde_json::from_str(&json).unwrap();
    assert_eq!(back.name, config.name);
    assert_eq!(back.agents.len(), 1);
    assert_eq!(back.requests[0].request.id, config.requests[0].request.id);
}
