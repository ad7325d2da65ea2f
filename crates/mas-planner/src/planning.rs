//! The planning phase: a greedy path-insertion bundle builder, plus plan
//! synthesis and next-action dispatch.

use rustc_hash::FxHashMap;
use tracing::trace;

use mas_agent::orbit::OrbitDataProvider;
use mas_agent::{Action, ActionKind, ActionStatus, AgentState};
use mas_core::ClockConfig;
use mas_core::time::{ceil_to_step, floor_to_step};

use crate::bid::SubtaskBid;
use crate::ledger::{Pair, PlannerLedger};
use crate::policy::{CapabilityPolicy, CostPolicy, UtilityPolicy};
use crate::request::MeasurementRequest;

/// Listen-window length appended when a plan has nothing else to do.
const IDLE_WAIT_HORIZON: f64 = 1.0;

/// Everything the planning phase needs besides the ledger.
pub struct PlanningContext<'a> {
    pub state: &'a AgentState,
    pub utility: &'a dyn UtilityPolicy,
    pub cost: &'a dyn CostPolicy,
    pub capability: &'a dyn CapabilityPolicy,
    pub orbits: &'a dyn OrbitDataProvider,
    /// Maximum bundle size; growth halts here even with profitable
    /// candidates left.
    pub l_bundle: usize,
}

// ── Planning phase ────────────────────────────────────────────────────────────

/// Grow the bundle greedily: each round, every available pair is evaluated
/// at its best insertion point in the path, and the most valuable candidate
/// that passes the coalition and mutex tests is committed.
///
/// Returns the bids whose stored values changed.
pub fn planning_phase(ctx: &PlanningContext<'_>, ledger: &mut PlannerLedger) -> Vec<SubtaskBid> {
    let mut available = available_pairs(ctx, ledger);
    let mut changed_pairs: Vec<Pair> = Vec::new();

    while ledger.bundle.len() < ctx.l_bundle && !available.is_empty() {
        let mut best: Option<(Pair, Vec<Pair>, FxHashMap<Pair, SubtaskBid>)> = None;
        let mut best_utility = 0.0_f64;

        for &(rid, k) in &available {
            let Some((candidate_path, candidate_bids)) = best_insertion(ctx, ledger, rid, k)
            else {
                continue;
            };
            let bid_utility = candidate_bids[&(rid, k)].winning_bid;
            if best.is_none() || bid_utility > best_utility {
                let proposed = &candidate_bids[&(rid, k)];
                if !coalition_test(ledger, proposed) || !mutex_test(ledger, proposed) {
                    // The proposed bid cannot out-bid the standing winners.
                    continue;
                }
                best_utility = bid_utility;
                best = Some(((rid, k), candidate_path, candidate_bids));
            }
        }

        let Some((pair, new_path, new_bids)) = best else { break };
        trace!(request = %pair.0, subtask = pair.1, utility = best_utility, "bundle grows");
        ledger.bundle.push(pair);
        ledger.path = new_path;
        available.retain(|p| *p != pair);

        for p in ledger.path.clone() {
            let new_bid = &new_bids[&p];
            if ledger.bid(p) != new_bid {
                changed_pairs.push(p);
            }
            ledger.results.get_mut(&p.0).expect("path pair has a bid row")[p.1] = new_bid.clone();
        }
    }

    changed_pairs.sort();
    changed_pairs.dedup();
    changed_pairs.into_iter().map(|p| ledger.bid(p).clone()).collect()
}

/// Pairs this agent could add to its bundle right now.
fn available_pairs(ctx: &PlanningContext<'_>, ledger: &PlannerLedger) -> Vec<Pair> {
    let t = ctx.state.t();
    let mut available = Vec::new();
    for (&rid, bids) in &ledger.results {
        let request = &ledger.requests[&rid];
        for k in 0..bids.len() {
            let pair = (rid, k);
            if ledger.bundle.contains(&pair)
                || bundle_blocks_mutex(ledger, request, k)
                || already_performed(bids, t)
                || !can_bid(ctx, request, bids, k, t)
            {
                continue;
            }
            available.push(pair);
        }
    }
    available
}

/// Biddability: capability, live time window, and coalition preconditions.
fn can_bid(
    ctx: &PlanningContext<'_>,
    request: &MeasurementRequest,
    bids: &[SubtaskBid],
    k: usize,
    t: f64,
) -> bool {
    let bid = &bids[k];
    if !ctx.capability.supports(&bid.main_measurement) {
        return false;
    }
    if request.t_end < t {
        return false;
    }
    let n_sat = bid.count_satisfied(bids);
    if bid.is_optimistic() {
        bid.n_required() == n_sat
            || bid.bid_solo_remaining > 0
            || (bid.bid_any_remaining > 0 && n_sat > 0)
    } else {
        bid.n_required() == n_sat
    }
}

/// `true` if the bundle already holds a subtask mutually exclusive with
/// subtask `k` of `request`.
fn bundle_blocks_mutex(ledger: &PlannerLedger, request: &MeasurementRequest, k: usize) -> bool {
    ledger.bundle.iter().any(|&(rid, held)| {
        rid == request.id
            && (request.dependency_matrix[held][k] < 0 || request.dependency_matrix[k][held] < 0)
    })
}

/// `true` once any subtask of the request has been imaged by its winner.
fn already_performed(bids: &[SubtaskBid], t: f64) -> bool {
    bids.iter()
        .any(|bid| bid.performed || (bid.has_winner() && t > bid.t_img))
}

// ── Path-insertion valuation ──────────────────────────────────────────────────

/// Try every insertion position for `(rid, k)` and keep the sequence with
/// the highest summed own-bid.  `None` when the pair is mutex-blocked by
/// the current path or no position yields positive utility.
fn best_insertion(
    ctx: &PlanningContext<'_>,
    ledger: &PlannerLedger,
    rid: mas_core::RequestId,
    k: usize,
) -> Option<(Vec<Pair>, FxHashMap<Pair, SubtaskBid>)> {
    let request = &ledger.requests[&rid];
    for &(path_rid, path_k) in &ledger.path {
        if path_rid == rid && request.dependency_matrix[path_k][k] < 0 {
            return None;
        }
    }

    let mut winner: Option<(Vec<Pair>, FxHashMap<Pair, SubtaskBid>)> = None;
    let mut winner_utility = 0.0_f64;

    for i in 0..=ledger.path.len() {
        let mut candidate = ledger.path.clone();
        candidate.insert(i, (rid, k));

        let mut bids: FxHashMap<Pair, SubtaskBid> = FxHashMap::default();
        for idx in 0..candidate.len() {
            let (crid, ck) = candidate[idx];
            let c_request = &ledger.requests[&crid];
            let t_img = imaging_time(ctx, ledger, &candidate, &bids, idx, c_request, ck);
            let utility = scaled_utility(ctx, c_request, ck, t_img);

            let mut bid = ledger.bid((crid, ck)).clone();
            bid.set_bid(utility, t_img, ctx.state.t());
            bids.insert((crid, ck), bid);
        }

        let path_utility: f64 = candidate.iter().map(|p| bids[p].own_bid).sum();
        if path_utility > winner_utility {
            winner_utility = path_utility;
            winner = Some((candidate, bids));
        }
    }
    winner
}

/// Earliest feasible imaging time for the pair at `idx` of `candidate`.
///
/// Starts from the arrival after the previous pair (or the live state),
/// clamps to the request's window, then pushes later if a satisfied
/// dependency's schedule demands temporal coupling.
fn imaging_time(
    ctx: &PlanningContext<'_>,
    ledger: &PlannerLedger,
    candidate: &[Pair],
    bids: &FxHashMap<Pair, SubtaskBid>,
    idx: usize,
    request: &MeasurementRequest,
    k: usize,
) -> f64 {
    let (t_prev, pos_prev) = if idx == 0 {
        (ctx.state.t(), ctx.state.pos())
    } else {
        let (prev_rid, prev_k) = candidate[idx - 1];
        let prev_request = &ledger.requests[&prev_rid];
        let prev_bid = &bids[&(prev_rid, prev_k)];
        (prev_bid.t_img + prev_request.duration, prev_request.pos)
    };

    let t_arrival = ctx.state.calc_arrival_time(pos_prev, request.pos, t_prev, ctx.orbits);
    let mut t_img = t_arrival.max(request.t_start);

    // Latest coupled partner dictates; meet its schedule if ours is early.
    let latest = ledger.results[&request.id]
        .iter()
        .enumerate()
        .filter(|(j, dep)| dep.has_winner() && request.dependency_matrix[k][*j] > 0)
        .map(|(j, dep)| (dep.t_img, request.time_dependency_matrix[k][j]))
        .max_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    if let Some((t_target, t_corr)) = latest
        && t_img + t_corr < t_target
    {
        t_img = t_target - t_corr;
    }
    t_img
}

/// Coalition-scaled utility minus cost.
fn scaled_utility(
    ctx: &PlanningContext<'_>,
    request: &MeasurementRequest,
    k: usize,
    t_img: f64,
) -> f64 {
    let base = ctx.utility.utility(request, k, t_img);
    let coalition_size = 1 + request.measurement_groups[k].dependents.len();
    let alpha = if coalition_size == request.required_measurements.len() {
        1.0
    } else {
        1.0 / 3.0
    };
    base * alpha / coalition_size as f64 - ctx.cost.cost(ctx.state, request, k, t_img)
}

// ── Acceptance tests ──────────────────────────────────────────────────────────

/// The proposed coalition's summed bid must strictly beat the coalition of
/// the standing winner.
fn coalition_test(ledger: &PlannerLedger, proposed: &SubtaskBid) -> bool {
    let bids = &ledger.results[&proposed.request_id];
    let current = &bids[proposed.subtask_index];

    let mut agent_bid = proposed.winning_bid;
    let mut coalition_bid = 0.0;
    for (i, bid_i) in bids.iter().enumerate() {
        if bid_i.winner == current.winner && current.dependencies[i] >= 0 {
            coalition_bid += bid_i.winning_bid;
        }
        if bid_i.winner == proposed.winner && proposed.dependencies[i] == 1 {
            agent_bid += bid_i.winning_bid;
        }
    }
    agent_bid > coalition_bid
}

/// The proposed coalition must also beat the best fully mutually exclusive
/// alternative coalition.
fn mutex_test(ledger: &PlannerLedger, proposed: &SubtaskBid) -> bool {
    let request = &ledger.requests[&proposed.request_id];
    proposed.mutex_satisfied(request, &ledger.results[&proposed.request_id])
}

// ── Plan synthesis ────────────────────────────────────────────────────────────

/// Rebuild the action plan from the path: travel then measure, per pair.
///
/// Under a fixed-step clock, scheduled times are quantized: move starts
/// floor to the step, everything else ceils.
pub fn plan_from_path(
    ctx: &PlanningContext<'_>,
    ledger: &PlannerLedger,
    clock: &ClockConfig,
) -> Vec<Action> {
    let t = ctx.state.t();
    let mut plan = Vec::with_capacity(ledger.path.len() * 2);
    let mut prev_end = t;
    let mut prev_pos = ctx.state.pos();

    for &(rid, k) in &ledger.path {
        let request = &ledger.requests[&rid];
        let bid = ledger.bid((rid, k));

        let mut t_move_start = prev_end;
        let mut t_move_end =
            ctx.state
                .calc_arrival_time(prev_pos, request.pos, t_move_start, ctx.orbits);
        let mut t_img_start = bid.t_img.max(t_move_end);
        let mut t_img_end = t_img_start + request.duration;

        if let Some(dt) = clock.fixed_dt() {
            t_move_start = floor_to_step(t_move_start, dt);
            t_move_end = ceil_to_step(t_move_end, dt);
            t_img_start = ceil_to_step(t_img_start, dt);
            t_img_end = ceil_to_step(t_img_start + request.duration, dt);
        }

        plan.push(Action::new(
            ActionKind::Travel { target: request.pos },
            t_move_start,
            t_move_end,
        ));
        plan.push(Action::new(
            ActionKind::Measure {
                request_id: rid,
                subtask_index: k,
                instrument: bid.main_measurement.clone(),
                expected_utility: bid.winning_bid,
                target: request.pos,
            },
            t_img_start,
            t_img_end,
        ));

        prev_end = t_img_end;
        prev_pos = request.pos;
    }

    if plan.is_empty() {
        plan.push(Action::wait_for_messages(t, t + IDLE_WAIT_HORIZON));
    }
    plan
}

// ── Next-action dispatch ──────────────────────────────────────────────────────

/// Step the plan forward against the previous step's action outcomes.
///
/// Completed and aborted head actions are popped (a popped measurement also
/// releases its pair from bundle and path; a *completed* one is marked
/// performed).  A pending head is retried, or waited for if its window has
/// not opened.  Always returns at least one action.
pub fn next_actions(
    ledger: &mut PlannerLedger,
    plan: &mut Vec<Action>,
    outcomes: &[Action],
    t: f64,
) -> Vec<Action> {
    let mut actions = Vec::new();

    for outcome in outcomes {
        let Some(head) = plan.first() else { break };
        if outcome.id != head.id {
            // Some other action (e.g. a bid broadcast) finished; not ours to track.
            continue;
        }
        match outcome.status {
            ActionStatus::Pending => {
                if t < outcome.t_start {
                    actions.push(Action::wait_for_messages(t, outcome.t_start));
                } else {
                    actions.push(head.clone());
                }
            }
            ActionStatus::Completed | ActionStatus::Aborted => {
                let done = plan.remove(0);
                if let ActionKind::Measure { request_id, subtask_index, .. } = done.kind {
                    let pair = (request_id, subtask_index);
                    if outcome.status == ActionStatus::Completed {
                        ledger.mark_performed(pair);
                    }
                    ledger.bundle.retain(|p| *p != pair);
                    ledger.path.retain(|p| *p != pair);
                }
            }
        }
    }

    if actions.is_empty() {
        match plan.first() {
            Some(head) if t >= head.t_start => actions.push(head.clone()),
            Some(head) => actions.push(Action::wait_for_messages(t, head.t_start)),
            None => actions.push(Action::wait_for_messages(t, t + IDLE_WAIT_HORIZON)),
        }
    }
    actions
}
