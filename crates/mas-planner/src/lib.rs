//! `mas-planner` — the consensus-based measurement-allocation planner of
//! the `mas` simulation framework.
//!
//! # The auction in one paragraph
//!
//! Every agent keeps a bid table (`results`) with one [`SubtaskBid`] per
//! subtask of every known [`MeasurementRequest`].  Incoming peer bids are
//! folded in by a greater-bid-wins rule with a lexicographic tie-break;
//! winning pairs the agent commits to form its `bundle`, reordered into an
//! execution `path` by greedy path-insertion valuation.  A four-stage
//! consensus phase (compare, expire, drop-performed, constraint check)
//! releases pairs that can no longer stand, and the update loop alternates
//! consensus and planning — pacing itself to the host agent's observation
//! cycle — until the path satisfies every constraint and has been stable
//! for the convergence horizon.
//!
//! # Module map
//!
//! | Module       | Contents                                               |
//! |--------------|--------------------------------------------------------|
//! | [`request`]  | `MeasurementRequest`, subtask groups, matrix invariants |
//! | [`bid`]      | `SubtaskBid`, the update rule, constraint predicates   |
//! | [`ledger`]   | `PlannerLedger`: request arena, bid table, bundle/path, the consensus phase |
//! | [`planning`] | Path-insertion bundle builder, plan synthesis, dispatch |
//! | [`policy`]   | Injected utility/cost/capability policies              |
//! | [`module`]   | [`ConsensusPlanner`]: the planner as an internal module |

pub mod bid;
pub mod ledger;
pub mod module;
pub mod planning;
pub mod policy;
pub mod request;

#[cfg(test)]
mod tests;

pub use bid::{BidParams, BidPayload, ConstraintCheck, NO_WINNER, SubtaskBid};
pub use ledger::{BidEvent, ConsensusOutcome, Pair, PlannerLedger};
pub use module::{ConsensusPlanner, PlannerConfig, PlannerResultsPayload};
pub use planning::{PlanningContext, next_actions, plan_from_path, planning_phase};
pub use policy::{
    CapabilityPolicy, CostPolicy, InstrumentSet, LinearDecayUtility, UtilityPolicy, ZeroCost,
};
pub use request::{MeasurementGroup, MeasurementRequest};
