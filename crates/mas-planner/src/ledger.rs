//! The planner's working state and the consensus phase.
//!
//! `PlannerLedger` holds the request arena, the bid table (`results`), and
//! the agent's `bundle`/`path`.  Bids reference requests by id; requests
//! travel by value only inside bid messages so an unknown request can be
//! materialized on first contact.
//!
//! Invariant maintained by every operation here: `bundle` and `path` hold
//! the same `(request, subtask)` pairs, with `path` in execution order.

use rustc_hash::FxHashMap;
use tracing::debug;

use mas_core::RequestId;

use crate::bid::{BidParams, BidPayload, SubtaskBid};
use crate::request::MeasurementRequest;

/// One `(request, subtask)` selection.
pub type Pair = (RequestId, usize);

/// Incoming information drained from the planner's inbox.
#[derive(Clone, Debug)]
pub enum BidEvent {
    /// A measurement request entered the system.
    Request(MeasurementRequest),
    /// A peer shared a bid (with its request attached).
    Bid(BidPayload),
}

/// Bids that left the consensus phase needing attention.
#[derive(Default, Debug)]
pub struct ConsensusOutcome {
    /// Everything whose stored value changed.
    pub changes: Vec<SubtaskBid>,
    /// Everything peers need to hear about again.
    pub rebroadcasts: Vec<SubtaskBid>,
}

/// How bids of pairs removed from the bundle are treated.
#[derive(Copy, Clone, PartialEq)]
enum ResetRule {
    /// Reset only bids currently won by this agent.
    WonByMe,
    /// Remove silently (expiry: the request is gone anyway).
    Keep,
    /// Reset every removed bid.
    Always,
}

// ── PlannerLedger ─────────────────────────────────────────────────────────────

pub struct PlannerLedger {
    /// Name this agent bids under.
    pub me: String,
    pub params: BidParams,
    pub requests: FxHashMap<RequestId, MeasurementRequest>,
    /// One bid per subtask per known request.
    pub results: FxHashMap<RequestId, Vec<SubtaskBid>>,
    /// Pairs committed to, in commitment order.
    pub bundle: Vec<Pair>,
    /// The same pairs in execution order.
    pub path: Vec<Pair>,
}

impl PlannerLedger {
    pub fn new(me: impl Into<String>, params: BidParams) -> Self {
        Self {
            me: me.into(),
            params,
            requests: FxHashMap::default(),
            results: FxHashMap::default(),
            bundle: Vec::new(),
            path: Vec::new(),
        }
    }

    /// Learn a request; `true` if it was new.  Blank bids are materialized
    /// for every subtask.
    pub fn register_request(&mut self, request: MeasurementRequest) -> bool {
        if self.results.contains_key(&request.id) {
            return false;
        }
        let bids = SubtaskBid::array_for_request(&request, &self.me, &self.params);
        self.results.insert(request.id, bids);
        self.requests.insert(request.id, request);
        true
    }

    pub fn request(&self, id: RequestId) -> &MeasurementRequest {
        &self.requests[&id]
    }

    pub fn bid(&self, pair: Pair) -> &SubtaskBid {
        &self.results[&pair.0][pair.1]
    }

    /// Mark this agent's bid on `pair` as performed.
    pub fn mark_performed(&mut self, pair: Pair) {
        if let Some(bids) = self.results.get_mut(&pair.0) {
            bids[pair.1].performed = true;
        }
    }

    /// `true` if any pair in the bundle carries positive dependencies.
    pub fn has_bundle_dependencies(&self) -> bool {
        self.bundle.iter().any(|&(rid, k)| {
            self.requests[&rid].dependency_matrix[k].iter().any(|&d| d > 0)
        })
    }

    /// Restore every bid's optimistic counters (end of a replanning round).
    pub fn reset_all_counters(&mut self) {
        for bids in self.results.values_mut() {
            for bid in bids {
                bid.reset_counters();
            }
        }
    }

    // ── Consensus phase ───────────────────────────────────────────────────

    /// The four consensus sub-stages, in order: compare incoming bids,
    /// expire past-due pairs, drop pairs whose mutex partner already
    /// performed, and enforce the constraint predicates.
    pub fn consensus_phase(&mut self, events: Vec<BidEvent>, t: f64) -> ConsensusOutcome {
        let mut out = ConsensusOutcome::default();
        self.compare_incoming(events, t, &mut out);
        self.expire_past_due(t);
        self.drop_performed(t, &mut out);
        self.enforce_constraints(t, &mut out);
        debug_assert!(self.pairs_consistent());
        out
    }

    /// Sub-stage 1: fold incoming bids into the table; a displacement of
    /// this agent on a bundled pair releases that pair and its tail.
    fn compare_incoming(&mut self, events: Vec<BidEvent>, t: f64, out: &mut ConsensusOutcome) {
        for event in events {
            match event {
                BidEvent::Request(request) => {
                    if request.validate().is_err() {
                        debug!(request = %request.id, "dropping malformed request");
                        continue;
                    }
                    if self.register_request(request.clone()) {
                        // Announce our (blank) view so peers know we heard it.
                        for bid in &self.results[&request.id] {
                            out.changes.push(bid.clone());
                            out.rebroadcasts.push(bid.clone());
                        }
                    }
                }
                BidEvent::Bid(payload) => {
                    if payload.bid.bidder == self.me {
                        continue;
                    }
                    let rid = payload.bid.request_id;
                    let k = payload.bid.subtask_index;
                    let new_request = !self.results.contains_key(&rid);
                    if new_request {
                        if payload.request.validate().is_err() {
                            debug!(request = %rid, "dropping bid with malformed request");
                            continue;
                        }
                        self.register_request(payload.request.clone());
                    }
                    let Some(bids) = self.results.get_mut(&rid) else { continue };
                    if k >= bids.len() {
                        debug!(request = %rid, subtask = k, "dropping bid with bad subtask index");
                        continue;
                    }

                    let (broadcast, changed) = bids[k].update(&payload.bid, t);
                    if new_request {
                        let mine = bids[k].clone();
                        out.rebroadcasts.push(mine.clone());
                        out.changes.push(mine);
                    } else if let Some(bid) = broadcast {
                        out.rebroadcasts.push(bid.clone());
                        if changed {
                            out.changes.push(bid);
                        }
                    }

                    // Outbid on a committed pair: release it and everything
                    // scheduled after it.
                    let displaced = self.results[&rid][k].winner != self.me;
                    if displaced
                        && let Some(i) = self.bundle.iter().position(|&p| p == (rid, k))
                    {
                        self.release_tail(i, t, ResetRule::WonByMe, out);
                    }
                }
            }
        }
    }

    /// Sub-stage 2: the first bundled pair whose request can no longer fit
    /// its duration releases itself and its tail.
    fn expire_past_due(&mut self, t: f64) {
        let expired = self.bundle.iter().position(|&(rid, _)| {
            self.requests[&rid].latest_start() < t
        });
        if let Some(i) = expired {
            let mut ignored = ConsensusOutcome::default();
            self.release_tail(i, t, ResetRule::Keep, &mut ignored);
        }
    }

    /// Sub-stage 3: a bundled pair loses its slot when a mutually exclusive
    /// subtask of the same request has already been performed.
    fn drop_performed(&mut self, t: f64, out: &mut ConsensusOutcome) {
        let doomed = self.bundle.iter().position(|&(rid, k)| {
            let request = &self.requests[&rid];
            self.results[&rid].iter().enumerate().any(|(j, other)| {
                other.t_img >= 0.0
                    && other.t_img < t
                    && other.has_winner()
                    && request.dependency_matrix[k][j] < 0
            })
        });
        if let Some(i) = doomed {
            self.release_tail(i, t, ResetRule::Always, out);
        }
    }

    /// Sub-stage 4: re-evaluate the constraint predicates for every bundled
    /// pair until none of them warrants a release.
    fn enforce_constraints(&mut self, t: f64, out: &mut ConsensusOutcome) {
        loop {
            let mut to_remove = None;
            for (i, &(rid, k)) in self.bundle.iter().enumerate() {
                let request = self.requests[&rid].clone();
                let others = self.results[&rid].clone();
                let mut bid = others[k].clone();
                let check = bid.check_constraints(&request, &others, t);
                // Timer and counter movements persist even when the pair
                // survives.
                self.results.get_mut(&rid).expect("bundled pair has a bid row")[k] = bid.clone();

                if check.satisfied {
                    continue;
                }
                let release = if !bid.is_optimistic() {
                    true
                } else {
                    match check.temporal_offender_t_img {
                        // Mutex or dependency failure: out, unconditionally.
                        None => true,
                        // Temporal conflict: the earlier-imaging side yields.
                        Some(offender_t_img) => bid.t_img <= offender_t_img,
                    }
                };
                if release {
                    to_remove = Some(i);
                    break;
                }
            }
            match to_remove {
                Some(i) => self.release_tail(i, t, ResetRule::Always, out),
                None => break,
            }
        }
    }

    /// Drop `bundle[i..]` (and the same pairs from `path`), applying
    /// `rule` to the released bids and recording resets in `out`.
    fn release_tail(&mut self, i: usize, t: f64, rule: ResetRule, out: &mut ConsensusOutcome) {
        let released: Vec<Pair> = self.bundle.drain(i..).collect();
        self.path.retain(|pair| !released.contains(pair));
        for (rid, k) in released {
            let bid = &mut self.results.get_mut(&rid).expect("released pair has a bid row")[k];
            let reset = match rule {
                ResetRule::Always => true,
                ResetRule::WonByMe => bid.winner == self.me,
                ResetRule::Keep => false,
            };
            if reset {
                bid.reset(t);
                out.changes.push(bid.clone());
                out.rebroadcasts.push(bid.clone());
            }
        }
    }

    // ── Convergence ───────────────────────────────────────────────────────

    /// Path convergence: every pair satisfies its constraints and has been
    /// stable for at least its convergence horizon.
    pub fn path_converged(&self, t: f64) -> bool {
        self.path.iter().all(|&(rid, k)| {
            let request = &self.requests[&rid];
            let others = &self.results[&rid];
            // Probe on a clone: convergence checks must not burn counters.
            let mut probe = others[k].clone();
            let check = probe.check_constraints(request, others, t);
            check.satisfied && t >= others[k].t_update + others[k].dt_converge
        })
    }

    fn pairs_consistent(&self) -> bool {
        self.bundle.len() == self.path.len()
            && self.bundle.iter().all(|pair| self.path.contains(pair))
    }
}
