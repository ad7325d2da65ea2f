//! Subtask bids and the per-bid consensus rules.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use mas_core::{DomainBody, MessageBody, RequestId};

use crate::request::MeasurementRequest;

/// Winner sentinel: nobody holds this subtask.
pub const NO_WINNER: &str = "NONE";

/// Per-bid tuning knobs, shared by every bid an agent creates.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BidParams {
    /// Stability horizon: a bid counts as converged once unchanged for this
    /// long.
    pub dt_converge: f64,
    /// How long an optimistic bid may sit in constraint violation.
    pub dt_violation_max: f64,
    /// Solo-bid attempts before the optimistic strategy degrades.
    pub bid_solo_max: u32,
    /// Partially-satisfied attempts before the optimistic strategy degrades.
    pub bid_any_max: u32,
}

impl Default for BidParams {
    fn default() -> Self {
        Self {
            dt_converge: 0.0,
            dt_violation_max: 3.0,
            bid_solo_max: 3,
            bid_any_max: 3,
        }
    }
}

/// One agent's ledger entry for one `(request, subtask)` pair.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SubtaskBid {
    pub request_id: RequestId,
    pub subtask_index: usize,
    /// Main measurement this subtask assigns to its winner.
    pub main_measurement: String,
    /// This subtask's row of the request's dependency matrix.
    pub dependencies: Vec<i8>,
    /// This subtask's row of the time-dependency matrix.
    pub time_constraints: Vec<f64>,
    /// The agent keeping this record.
    pub bidder: String,
    pub own_bid: f64,
    pub winning_bid: f64,
    pub winner: String,
    /// Scheduled imaging time of the current winner (−1 when unset).
    pub t_img: f64,
    /// Last time any field changed (−1 until first touched).
    pub t_update: f64,
    /// Start of the current constraint violation (−1 when satisfied).
    pub t_violation: f64,
    pub dt_converge: f64,
    pub dt_violation_max: f64,
    pub bid_solo_remaining: u32,
    pub bid_solo_max: u32,
    pub bid_any_remaining: u32,
    pub bid_any_max: u32,
    /// Set once the winning measurement was actually performed.
    pub performed: bool,
}

/// Outcome of one constraint evaluation (see [`SubtaskBid::check_constraints`]).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ConstraintCheck {
    /// All three predicates (mutex, dependency, temporal) hold.
    pub satisfied: bool,
    /// Imaging time of the first subtask whose temporal coupling with this
    /// bid is violated, when the temporal predicate failed.
    pub temporal_offender_t_img: Option<f64>,
}

impl SubtaskBid {
    /// The blank bid array for a freshly learned request: one bid per
    /// subtask, all at [`NO_WINNER`].
    pub fn array_for_request(
        request: &MeasurementRequest,
        bidder: &str,
        params: &BidParams,
    ) -> Vec<SubtaskBid> {
        request
            .measurement_groups
            .iter()
            .enumerate()
            .map(|(k, group)| SubtaskBid {
                request_id: request.id,
                subtask_index: k,
                main_measurement: group.main.clone(),
                dependencies: request.dependency_matrix[k].clone(),
                time_constraints: request.time_dependency_matrix[k].clone(),
                bidder: bidder.to_string(),
                own_bid: 0.0,
                winning_bid: 0.0,
                winner: NO_WINNER.to_string(),
                t_img: -1.0,
                t_update: -1.0,
                t_violation: -1.0,
                dt_converge: params.dt_converge,
                dt_violation_max: params.dt_violation_max,
                bid_solo_remaining: params.bid_solo_max,
                bid_solo_max: params.bid_solo_max,
                bid_any_remaining: params.bid_any_max,
                bid_any_max: params.bid_any_max,
                performed: false,
            })
            .collect()
    }

    // ── Derived properties ────────────────────────────────────────────────

    /// Number of positive dependencies this subtask must see satisfied.
    pub fn n_required(&self) -> usize {
        self.dependencies.iter().filter(|&&d| d > 0).count()
    }

    /// Bids with positive dependencies tolerate transient violation.
    pub fn is_optimistic(&self) -> bool {
        self.dependencies.iter().any(|&d| d > 0)
    }

    pub fn has_winner(&self) -> bool {
        self.winner != NO_WINNER
    }

    /// Count dependencies satisfied by the other subtasks' current winners.
    pub fn count_satisfied(&self, others: &[SubtaskBid]) -> usize {
        debug_assert_eq!(others.len(), self.dependencies.len());
        others
            .iter()
            .enumerate()
            .filter(|(j, other)| self.dependencies[*j] == 1 && other.has_winner())
            .count()
    }

    // ── Mutation rules ────────────────────────────────────────────────────

    /// Place this agent's own bid.
    pub fn set_bid(&mut self, new_bid: f64, t_img: f64, t_update: f64) {
        self.own_bid = new_bid;
        self.winning_bid = new_bid;
        self.winner = self.bidder.clone();
        self.t_img = t_img;
        self.t_violation = -1.0;
        self.t_update = t_update;
    }

    /// Clear the winner (constraint failure, displacement cleanup).
    pub fn reset(&mut self, t_update: f64) {
        self.winner = NO_WINNER.to_string();
        self.winning_bid = 0.0;
        self.t_img = -1.0;
        self.t_violation = -1.0;
        self.t_update = t_update;
    }

    /// Restore the optimistic-bidding counters when a replanning round
    /// settles.
    pub fn reset_counters(&mut self) {
        self.bid_solo_remaining = self.bid_solo_max;
        self.bid_any_remaining = self.bid_any_max;
    }

    /// Fold a peer's bid into this record (the consensus rule).
    ///
    /// Three rules, in priority order:
    ///
    /// 1. The sender is the winner this record names — its self-report is
    ///    authoritative and is adopted even when it lowers or clears the bid
    ///    (how resets and schedule shifts propagate).
    /// 2. The sender's record names *this agent* as winner — this agent
    ///    knows its own bid best; leave everything.
    /// 3. Otherwise a strictly greater `winning_bid` — or an equal one whose
    ///    winner name sorts first — displaces the stored winner.
    ///
    /// `t_update` always moves to `t`; `own_bid` is never touched by
    /// incoming information.
    ///
    /// Returns `(broadcast, changed)`: `broadcast` is the bid worth
    /// re-sharing (the peer's when it displaced us as winner, ours when its
    /// values were adopted), `changed` is whether any stored field moved.
    pub fn update(&mut self, other: &SubtaskBid, t: f64) -> (Option<SubtaskBid>, bool) {
        debug_assert_eq!(other.request_id, self.request_id);
        debug_assert_eq!(other.subtask_index, self.subtask_index);

        let was_winning_myself = self.winner == self.bidder;
        let sender_is_my_winner = self.winner == other.bidder;
        let names_me_winner = other.winner == self.bidder;
        let adopt = if sender_is_my_winner {
            true
        } else if names_me_winner {
            false
        } else {
            other.winning_bid > self.winning_bid
                || (other.has_winner()
                    && other.winning_bid == self.winning_bid
                    && other.winner < self.winner)
        };

        let mut changed = false;
        if adopt {
            changed = self.winner != other.winner
                || self.winning_bid != other.winning_bid
                || self.t_img != other.t_img;
            self.winner = other.winner.clone();
            self.winning_bid = other.winning_bid;
            self.t_img = other.t_img;
        }
        self.t_update = t;

        let broadcast = if !(adopt && changed) {
            None
        } else if was_winning_myself && self.winner != self.bidder {
            Some(other.clone())
        } else {
            Some(self.clone())
        };
        (broadcast, changed)
    }

    // ── Violation timer ───────────────────────────────────────────────────

    fn start_violation(&mut self, t: f64) {
        if self.t_violation < 0.0 {
            self.t_violation = t;
        }
    }

    fn clear_violation(&mut self) {
        if self.winner == self.bidder {
            self.t_violation = -1.0;
        }
    }

    fn violation_timed_out(&self, t: f64) -> bool {
        self.t_violation >= 0.0 && t >= self.t_violation + self.dt_violation_max
    }

    // ── Constraint predicates ─────────────────────────────────────────────

    /// Evaluate mutex, dependency, and temporal constraints against the
    /// other bids of the same request.
    ///
    /// On failure, optimistic bids burn one `bid_any` and one `bid_solo`
    /// attempt.  The violation timer management lives inside the dependency
    /// check, so call this once per consensus pass.
    pub fn check_constraints(
        &mut self,
        request: &MeasurementRequest,
        others: &[SubtaskBid],
        t: f64,
    ) -> ConstraintCheck {
        let mutex_sat = self.mutex_satisfied(request, others);
        let dep_sat = self.dependencies_satisfied(others, t);
        let temporal_offender = self.temporal_offender(others);

        if mutex_sat && dep_sat && temporal_offender.is_none() {
            return ConstraintCheck { satisfied: true, temporal_offender_t_img: None };
        }
        if self.is_optimistic() {
            self.bid_any_remaining = self.bid_any_remaining.saturating_sub(1);
            self.bid_solo_remaining = self.bid_solo_remaining.saturating_sub(1);
        }
        ConstraintCheck {
            satisfied: false,
            temporal_offender_t_img: temporal_offender.map(|j| others[j].t_img),
        }
    }

    /// Own-coalition bid sum must strictly beat the best fully mutually
    /// exclusive alternative coalition.
    pub(crate) fn mutex_satisfied(
        &self,
        request: &MeasurementRequest,
        others: &[SubtaskBid],
    ) -> bool {
        let mut agent_bid = self.winning_bid;
        let mut agent_coalition = vec![self.subtask_index];
        for (j, other) in others.iter().enumerate() {
            if j == self.subtask_index {
                continue;
            }
            if self.dependencies[j] == 1 {
                agent_bid += other.winning_bid;
                agent_coalition.push(j);
            }
        }

        let matrix = &request.dependency_matrix;
        let mut max_mutex_bid: f64 = 0.0;
        for i in 0..matrix.len() {
            // Coalition seeded by subtask i plus everything it depends on.
            let mut coalition = vec![i];
            coalition.extend(
                (0..matrix[i].len()).filter(|&j| matrix[i][j] == 1),
            );

            let mut mutex_bid = 0.0;
            for member in coalition {
                if member == self.subtask_index {
                    continue;
                }
                let is_mutex = agent_coalition
                    .iter()
                    .all(|&ours| matrix[member][ours] < 0);
                if !is_mutex {
                    break;
                }
                mutex_bid += others[member].winning_bid;
            }
            max_mutex_bid = max_mutex_bid.max(mutex_bid);
        }
        agent_bid > max_mutex_bid
    }

    /// Coalition dependencies: pessimistic bids need exact satisfaction,
    /// optimistic ones run the violation timer.
    fn dependencies_satisfied(&mut self, others: &[SubtaskBid], t: f64) -> bool {
        let n_sat = self.count_satisfied(others);
        if self.is_optimistic() {
            if self.n_required() > n_sat {
                self.start_violation(t);
            } else {
                self.clear_violation();
            }
            !self.violation_timed_out(t)
        } else {
            self.n_required() == n_sat
        }
    }

    /// First subtask whose temporal coupling with this bid is violated.
    fn temporal_offender(&self, others: &[SubtaskBid]) -> Option<usize> {
        for (j, other) in others.iter().enumerate() {
            if !other.has_winner() {
                continue;
            }
            let independent = other.dependencies[self.subtask_index] <= 0;
            let coupled_in_time = self.t_img <= other.t_img + self.time_constraints[j]
                && other.t_img <= self.t_img + other.time_constraints[self.subtask_index];
            if !independent && !coupled_in_time {
                return Some(j);
            }
        }
        None
    }
}

/// Wire payload of a bid broadcast: the bid plus its request by value, so a
/// receiver that has never heard of the request can materialize a blank bid
/// array.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BidPayload {
    pub request: MeasurementRequest,
    pub bid: SubtaskBid,
}

impl DomainBody for BidPayload {
    fn wrap(value: Value) -> MessageBody {
        MessageBody::MeasurementBid(value)
    }

    fn peel(body: &MessageBody) -> Option<&Value> {
        match body {
            MessageBody::MeasurementBid(value) => Some(value),
            _ => None,
        }
    }
}
