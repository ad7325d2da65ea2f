//! Pluggable planner policies.
//!
//! Utility, cost, and capability are injected as trait objects rather than
//! specialised by subclassing, so scenario code can swap a policy without
//! touching the allocation engine.

use mas_agent::AgentState;

use crate::request::MeasurementRequest;

// ── Utility ───────────────────────────────────────────────────────────────────

/// Scores how valuable performing subtask `k` of `request` at `t_img` is,
/// before coalition scaling and cost.
pub trait UtilityPolicy: Send + Sync {
    fn utility(&self, request: &MeasurementRequest, subtask_index: usize, t_img: f64) -> f64;
}

/// Default: the request's maximum utility decayed linearly to zero across
/// its time window.  Earlier imaging is always worth at least as much.
pub struct LinearDecayUtility;

impl UtilityPolicy for LinearDecayUtility {
    fn utility(&self, request: &MeasurementRequest, _subtask_index: usize, t_img: f64) -> f64 {
        if t_img < request.t_start || t_img > request.t_end {
            return 0.0;
        }
        let window = request.t_end - request.t_start;
        if window <= 0.0 {
            return request.utility_max;
        }
        request.utility_max * (1.0 - (t_img - request.t_start) / window)
    }
}

// ── Cost ──────────────────────────────────────────────────────────────────────

/// Resource cost of performing subtask `k` at `t_img` from `state`,
/// subtracted from the scaled utility.
pub trait CostPolicy: Send + Sync {
    fn cost(
        &self,
        state: &AgentState,
        request: &MeasurementRequest,
        subtask_index: usize,
        t_img: f64,
    ) -> f64;
}

/// Default: measurements are free.
pub struct ZeroCost;

impl CostPolicy for ZeroCost {
    fn cost(&self, _: &AgentState, _: &MeasurementRequest, _: usize, _: f64) -> f64 {
        0.0
    }
}

// ── Capability ────────────────────────────────────────────────────────────────

/// Whether this agent can produce a given measurement at all.
///
/// Implementations range from plain instrument-set membership to a remote
/// knowledge-graph lookup; the planner only needs the synchronous predicate.
pub trait CapabilityPolicy: Send + Sync {
    fn supports(&self, measurement: &str) -> bool;
}

/// Membership in a fixed instrument set.
pub struct InstrumentSet(pub Vec<String>);

impl CapabilityPolicy for InstrumentSet {
    fn supports(&self, measurement: &str) -> bool {
        self.0.iter().any(|i| i == measurement)
    }
}
