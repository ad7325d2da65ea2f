//! Unit tests for the consensus planner: bid rules, consensus sub-stages,
//! and the path-insertion bundle builder.

use mas_agent::orbit::GroundTrackTable;
use mas_agent::{AgentState, AgentStatus, KinematicState};
use mas_core::Vec2;

use crate::bid::{BidParams, BidPayload, SubtaskBid, NO_WINNER};
use crate::ledger::{BidEvent, PlannerLedger};
use crate::planning::{plan_from_path, planning_phase, PlanningContext};
use crate::policy::{InstrumentSet, LinearDecayUtility, ZeroCost};
use crate::request::MeasurementRequest;

// ── Helpers ───────────────────────────────────────────────────────────────────

fn state_at(pos: Vec2, t: f64) -> AgentState {
    AgentState::Kinematic(KinematicState {
        pos,
        vel: Vec2::ZERO,
        v_max: 1.0,
        x_bounds: [0.0, 10.0],
        y_bounds: [0.0, 10.0],
        status: AgentStatus::Idling,
        t,
        instruments: vec!["VNIR".into()],
    })
}

fn single_request() -> MeasurementRequest {
    MeasurementRequest::independent(
        Vec2::new(5.0, 5.0),
        vec!["VNIR".into()],
        0.0,
        10.0,
        1.0,
        100.0,
    )
}

/// Two coupled subtasks: each requires the other within 2 s.
fn coupled_request() -> MeasurementRequest {
    MeasurementRequest::independent(
        Vec2::new(5.0, 5.0),
        vec!["M1".into(), "M2".into()],
        0.0,
        60.0,
        1.0,
        100.0,
    )
    .with_matrices(
        vec![vec![0, 1], vec![1, 0]],
        vec![vec![0.0, 2.0], vec![2.0, 0.0]],
    )
}

struct Policies {
    utility: LinearDecayUtility,
    cost: ZeroCost,
    capability: InstrumentSet,
    orbits: GroundTrackTable,
}

impl Policies {
    fn carrying(instruments: &[&str]) -> Self {
        Self {
            utility: LinearDecayUtility,
            cost: ZeroCost,
            capability: InstrumentSet(instruments.iter().map(|s| s.to_string()).collect()),
            orbits: GroundTrackTable::new(0.0),
        }
    }

    fn ctx<'a>(&'a self, state: &'a AgentState, l_bundle: usize) -> PlanningContext<'a> {
        PlanningContext {
            state,
            utility: &self.utility,
            cost: &self.cost,
            capability: &self.capability,
            orbits: &self.orbits,
            l_bundle,
        }
    }
}

/// All of a ledger's bid rows, packaged as wire payloads.
fn share_all(ledger: &PlannerLedger) -> Vec<BidEvent> {
    ledger
        .results
        .values()
        .flatten()
        .map(|bid| {
            BidEvent::Bid(BidPayload {
                request: ledger.request(bid.request_id).clone(),
                bid: bid.clone(),
            })
        })
        .collect()
}

fn pairs_match(ledger: &PlannerLedger) -> bool {
    ledger.bundle.len() == ledger.path.len()
        && ledger.bundle.iter().all(|p| ledger.path.contains(p))
}

// ── Bid update rule ───────────────────────────────────────────────────────────

mod bid_rules {
    use super::*;

    fn blank_pair(request: &MeasurementRequest, bidder: &str) -> SubtaskBid {
        let bids = SubtaskBid::array_for_request(request, bidder, &BidParams::default());
        bids.into_iter().next().unwrap()
    }

    #[test]
    fn higher_bid_is_adopted_but_own_bid_survives() {
        let request = single_request();
        let mut mine = blank_pair(&request, "AGENT_B");
        mine.set_bid(5.0, 2.0, 0.0);

        let mut theirs = blank_pair(&request, "AGENT_A");
        theirs.set_bid(9.0, 3.0, 0.0);

        let (broadcast, changed) = mine.update(&theirs, 1.0);
        assert!(changed);
        assert_eq!(mine.winner, "AGENT_A");
        assert_eq!(mine.winning_bid, 9.0);
        assert_eq!(mine.t_img, 3.0);
        assert_eq!(mine.own_bid, 5.0, "adoption must not touch own_bid");
        assert_eq!(mine.t_update, 1.0);
        // We were displaced as winner → the peer's bid is what gets re-shared.
        assert_eq!(broadcast.unwrap().bidder, "AGENT_A");
    }

    #[test]
    fn self_update_changes_only_t_update() {
        let request = single_request();
        let mut mine = blank_pair(&request, "AGENT_B");
        mine.set_bid(5.0, 2.0, 0.0);

        let snapshot = mine.clone();
        let (broadcast, changed) = mine.update(&snapshot, 7.0);
        assert!(!changed);
        assert!(broadcast.is_none());
        assert_eq!(mine.t_update, 7.0);
        assert_eq!(mine.winner, snapshot.winner);
        assert_eq!(mine.winning_bid, snapshot.winning_bid);
    }

    #[test]
    fn equal_bids_tie_break_lexicographically() {
        let request = single_request();
        let mut mine = blank_pair(&request, "AGENT_B");
        mine.set_bid(5.0, 2.0, 0.0);
        let mut theirs = blank_pair(&request, "AGENT_A");
        theirs.set_bid(5.0, 3.0, 0.0);

        let (_, changed) = mine.update(&theirs, 1.0);
        assert!(changed, "AGENT_A sorts before AGENT_B and must win the tie");
        assert_eq!(mine.winner, "AGENT_A");
    }

    #[test]
    fn lower_bid_is_rejected() {
        let request = single_request();
        let mut mine = blank_pair(&request, "AGENT_B");
        mine.set_bid(5.0, 2.0, 0.0);
        let mut theirs = blank_pair(&request, "AGENT_A");
        theirs.set_bid(1.0, 3.0, 0.0);

        let (broadcast, changed) = mine.update(&theirs, 1.0);
        assert!(!changed);
        assert!(broadcast.is_none());
        assert_eq!(mine.winner, "AGENT_B");
    }

    #[test]
    fn reset_postconditions() {
        let request = single_request();
        let mut mine = blank_pair(&request, "AGENT_B");
        mine.set_bid(5.0, 2.0, 0.0);
        mine.reset(4.0);
        assert_eq!(mine.winner, NO_WINNER);
        assert_eq!(mine.winning_bid, 0.0);
        assert!(mine.t_img < 0.0);
        assert!(mine.t_violation < 0.0);
        assert_eq!(mine.t_update, 4.0);
    }

    #[test]
    fn optimism_follows_positive_dependencies() {
        let request = coupled_request();
        let bids = SubtaskBid::array_for_request(&request, "AGENT_A", &BidParams::default());
        assert!(bids[0].is_optimistic());
        assert_eq!(bids[0].n_required(), 1);

        let flat = single_request();
        let bids = SubtaskBid::array_for_request(&flat, "AGENT_A", &BidParams::default());
        assert!(!bids[0].is_optimistic());
    }
}

// ── Consensus phase ───────────────────────────────────────────────────────────

mod consensus {
    use super::*;

    /// A ledger that has already committed to one single-subtask request.
    fn committed_ledger(me: &str, request: &MeasurementRequest, own_bid: f64) -> PlannerLedger {
        let mut ledger = PlannerLedger::new(me, BidParams::default());
        ledger.register_request(request.clone());
        ledger.results.get_mut(&request.id).unwrap()[0].set_bid(own_bid, 6.0, 0.0);
        ledger.bundle.push((request.id, 0));
        ledger.path.push((request.id, 0));
        ledger
    }

    #[test]
    fn empty_inbox_is_a_no_op() {
        let request = single_request();
        let mut ledger = committed_ledger("AGENT_A", &request, 50.0);

        let before_bundle = ledger.bundle.clone();
        let outcome = ledger.consensus_phase(Vec::new(), 1.0);

        assert_eq!(ledger.bundle, before_bundle);
        assert!(outcome.rebroadcasts.is_empty());
        assert!(pairs_match(&ledger));
    }

    #[test]
    fn new_request_materializes_blank_bids_and_rebroadcasts() {
        let request = coupled_request();
        let mut ledger = PlannerLedger::new("AGENT_A", BidParams::default());

        let outcome = ledger.consensus_phase(vec![BidEvent::Request(request.clone())], 0.0);
        let bids = &ledger.results[&request.id];
        assert_eq!(bids.len(), 2);
        assert!(bids.iter().all(|b| b.winner == NO_WINNER));
        assert_eq!(outcome.rebroadcasts.len(), 2);
    }

    #[test]
    fn displacement_releases_pair_and_tail() {
        let first = single_request();
        let second = single_request();
        let mut ledger = PlannerLedger::new("AGENT_B", BidParams::default());
        for request in [&first, &second] {
            ledger.register_request(request.clone());
            ledger.results.get_mut(&request.id).unwrap()[0].set_bid(10.0, 6.0, 0.0);
            ledger.bundle.push((request.id, 0));
            ledger.path.push((request.id, 0));
        }

        // A stronger peer bid on the *first* bundled pair.
        let mut peer = SubtaskBid::array_for_request(&first, "AGENT_A", &BidParams::default())
            .remove(0);
        peer.set_bid(99.0, 5.0, 0.5);
        let outcome = ledger.consensus_phase(
            vec![BidEvent::Bid(BidPayload { request: first.clone(), bid: peer })],
            1.0,
        );

        assert!(ledger.bundle.is_empty(), "tail must go with the displaced pair");
        assert!(ledger.path.is_empty());
        // First pair now records the peer as winner; the second was ours and
        // got reset for rebroadcast.
        assert_eq!(ledger.bid((first.id, 0)).winner, "AGENT_A");
        assert_eq!(ledger.bid((second.id, 0)).winner, NO_WINNER);
        assert!(outcome.rebroadcasts.iter().any(|b| b.request_id == second.id));
        assert!(pairs_match(&ledger));
    }

    #[test]
    fn expired_request_is_released() {
        // latest_start = 3 − 2 = 1.
        let request = MeasurementRequest::independent(
            Vec2::new(5.0, 5.0),
            vec!["VNIR".into()],
            0.0,
            3.0,
            2.0,
            100.0,
        );
        let mut ledger = committed_ledger("AGENT_A", &request, 50.0);

        // Still biddable exactly at the boundary…
        ledger.consensus_phase(Vec::new(), 1.0);
        assert_eq!(ledger.bundle.len(), 1);

        // …and expired just past it.
        ledger.consensus_phase(Vec::new(), 1.1);
        assert!(ledger.bundle.is_empty());
        assert!(pairs_match(&ledger));
    }

    #[test]
    fn performed_mutex_partner_releases_pair() {
        let request = MeasurementRequest::independent(
            Vec2::new(5.0, 5.0),
            vec!["M1".into(), "M2".into()],
            0.0,
            60.0,
            1.0,
            100.0,
        )
        .with_matrices(
            vec![vec![0, -1], vec![-1, 0]],
            vec![vec![0.0, 0.0], vec![0.0, 0.0]],
        );

        let mut ledger = PlannerLedger::new("AGENT_B", BidParams::default());
        ledger.register_request(request.clone());
        ledger.results.get_mut(&request.id).unwrap()[0].set_bid(10.0, 30.0, 0.0);
        ledger.bundle.push((request.id, 0));
        ledger.path.push((request.id, 0));

        // The mutually exclusive subtask was imaged at t=1 by a peer.
        let mut peer = SubtaskBid::array_for_request(&request, "AGENT_A", &BidParams::default())
            .remove(1);
        peer.set_bid(50.0, 1.0, 0.5);
        let outcome = ledger.consensus_phase(
            vec![BidEvent::Bid(BidPayload { request: request.clone(), bid: peer })],
            2.0,
        );

        assert!(ledger.bundle.is_empty());
        assert_eq!(ledger.bid((request.id, 0)).winner, NO_WINNER);
        assert!(!outcome.rebroadcasts.is_empty());
    }
}

// ── Planning phase ────────────────────────────────────────────────────────────

mod planning {
    use mas_agent::ActionKind;
    use mas_core::ClockConfig;

    use super::*;

    #[test]
    fn single_agent_builds_bundle_and_plan() {
        let request = single_request();
        let state = state_at(Vec2::new(4.0, 5.0), 0.0);
        let policies = Policies::carrying(&["VNIR"]);
        let ctx = policies.ctx(&state, 3);

        let mut ledger = PlannerLedger::new("AGENT_0", BidParams::default());
        ledger.register_request(request.clone());

        let changes = planning_phase(&ctx, &mut ledger);
        assert_eq!(ledger.bundle, vec![(request.id, 0)]);
        assert!(pairs_match(&ledger));
        assert!(!changes.is_empty());

        let bid = ledger.bid((request.id, 0));
        assert_eq!(bid.winner, "AGENT_0");
        assert_eq!(bid.t_img, 1.0, "arrival from (4,5) to (5,5) at v=1");
        assert!(bid.own_bid > 0.0);

        let clock = ClockConfig::EventDriven { start: 0.0, end: 10.0 };
        let plan = plan_from_path(&ctx, &ledger, &clock);
        assert_eq!(plan.len(), 2);
        assert!(matches!(plan[0].kind, ActionKind::Travel { .. }));
        assert!(matches!(plan[1].kind, ActionKind::Measure { .. }));
        assert_eq!(plan[1].t_start, 1.0);
        assert_eq!(plan[1].t_end, 2.0);
    }

    #[test]
    fn capability_miss_leaves_bundle_empty() {
        let request = single_request(); // wants VNIR
        let state = state_at(Vec2::new(4.0, 5.0), 0.0);
        let policies = Policies::carrying(&["MWR"]);
        let ctx = policies.ctx(&state, 3);

        let mut ledger = PlannerLedger::new("AGENT_0", BidParams::default());
        ledger.register_request(request);

        let changes = planning_phase(&ctx, &mut ledger);
        assert!(ledger.bundle.is_empty());
        assert!(changes.is_empty());

        let clock = ClockConfig::EventDriven { start: 0.0, end: 10.0 };
        let plan = plan_from_path(&ctx, &ledger, &clock);
        assert_eq!(plan.len(), 1);
        assert!(matches!(plan[0].kind, ActionKind::WaitForMessages));
    }

    #[test]
    fn bundle_growth_halts_at_cap() {
        let state = state_at(Vec2::new(0.0, 0.0), 0.0);
        let policies = Policies::carrying(&["VNIR"]);
        let ctx = policies.ctx(&state, 1);

        let mut ledger = PlannerLedger::new("AGENT_0", BidParams::default());
        ledger.register_request(single_request());
        ledger.register_request(single_request());

        planning_phase(&ctx, &mut ledger);
        assert_eq!(ledger.bundle.len(), 1, "profitable candidates remain but cap holds");
    }

    #[test]
    fn fixed_step_clock_quantizes_schedule() {
        let request = MeasurementRequest::independent(
            Vec2::new(5.3, 5.0), // odd distance → fractional raw times
            vec!["VNIR".into()],
            0.0,
            20.0,
            1.0,
            100.0,
        );
        let state = state_at(Vec2::new(4.0, 5.0), 0.0);
        let policies = Policies::carrying(&["VNIR"]);
        let ctx = policies.ctx(&state, 3);

        let mut ledger = PlannerLedger::new("AGENT_0", BidParams::default());
        ledger.register_request(request);
        planning_phase(&ctx, &mut ledger);

        let clock = ClockConfig::FixedTimeStep { start: 0.0, end: 20.0, dt: 0.5 };
        let plan = plan_from_path(&ctx, &ledger, &clock);
        for action in &plan {
            for bound in [action.t_start, action.t_end] {
                let steps = bound / 0.5;
                assert!(
                    (steps - steps.round()).abs() < 1e-9,
                    "{bound} is not on the 0.5 s grid"
                );
            }
        }
    }

    #[test]
    fn closer_agent_wins_the_auction() {
        let request = single_request();
        let near_state = state_at(Vec2::new(4.0, 5.0), 0.0);
        let far_state = state_at(Vec2::new(0.0, 5.0), 0.0);
        let policies = Policies::carrying(&["VNIR"]);

        let mut near = PlannerLedger::new("AGENT_NEAR", BidParams::default());
        let mut far = PlannerLedger::new("AGENT_FAR", BidParams::default());
        near.register_request(request.clone());
        far.register_request(request.clone());

        planning_phase(&policies.ctx(&near_state, 3), &mut near);
        planning_phase(&policies.ctx(&far_state, 3), &mut far);
        assert_eq!(near.bundle.len(), 1);
        assert_eq!(far.bundle.len(), 1);

        // One consensus round each way.
        let from_near = share_all(&near);
        let from_far = share_all(&far);
        near.consensus_phase(from_far, 0.5);
        far.consensus_phase(from_near, 0.5);

        assert_eq!(near.bundle.len(), 1, "higher bid stands");
        assert!(far.bundle.is_empty(), "outbid agent releases the pair");
        assert_eq!(far.bid((request.id, 0)).winner, "AGENT_NEAR");

        // The loser replans into an empty bundle: nothing is left to bid on.
        planning_phase(&policies.ctx(&far_state, 3), &mut far);
        assert!(far.bundle.is_empty());
        assert!(pairs_match(&far));
    }

    #[test]
    fn coupled_subtasks_converge_within_time_constraint() {
        let request = coupled_request();
        let state_a = state_at(Vec2::new(4.0, 5.0), 0.0); // 1 s from target
        let state_b = state_at(Vec2::new(0.0, 5.0), 0.0); // 5 s from target
        let pol_a = Policies::carrying(&["M1"]);
        let pol_b = Policies::carrying(&["M2"]);

        let mut a = PlannerLedger::new("AGENT_A", BidParams::default());
        let mut b = PlannerLedger::new("AGENT_B", BidParams::default());
        a.register_request(request.clone());
        b.register_request(request.clone());

        // Alternate consensus and planning, exchanging bids each round.
        for round in 0..8 {
            let t = 0.1 * round as f64;
            let from_a = share_all(&a);
            let from_b = share_all(&b);
            a.consensus_phase(from_b, t);
            planning_phase(&pol_a.ctx(&state_a.propagate(t), 3), &mut a);
            b.consensus_phase(from_a, t);
            planning_phase(&pol_b.ctx(&state_b.propagate(t), 3), &mut b);
        }

        let t_img_a = a.bid((request.id, 0)).t_img;
        let t_img_b = b.bid((request.id, 1)).t_img;
        assert!(t_img_a >= 0.0 && t_img_b >= 0.0, "both subtasks must be won");
        assert!(
            (t_img_a - t_img_b).abs() <= 2.0 + 1e-9,
            "temporal coupling violated: |{t_img_a} − {t_img_b}| > 2"
        );
        assert!(a.path_converged(1.0));
        assert!(b.path_converged(1.0));
    }
}

// ── Next-action dispatch ──────────────────────────────────────────────────────

mod dispatch {
    use mas_agent::{Action, ActionKind, ActionStatus};

    use super::*;
    use crate::planning::next_actions;

    fn measured_plan(ledger: &mut PlannerLedger, request: &MeasurementRequest) -> Vec<Action> {
        ledger.register_request(request.clone());
        ledger.results.get_mut(&request.id).unwrap()[0].set_bid(10.0, 1.0, 0.0);
        ledger.bundle.push((request.id, 0));
        ledger.path.push((request.id, 0));
        vec![Action::new(
            ActionKind::Measure {
                request_id: request.id,
                subtask_index: 0,
                instrument: "VNIR".into(),
                expected_utility: 10.0,
                target: request.pos,
            },
            1.0,
            2.0,
        )]
    }

    #[test]
    fn completed_measurement_releases_pair_and_marks_performed() {
        let request = single_request();
        let mut ledger = PlannerLedger::new("AGENT_0", BidParams::default());
        let mut plan = measured_plan(&mut ledger, &request);

        let outcome = plan[0].clone().with_status(ActionStatus::Completed);
        let next = next_actions(&mut ledger, &mut plan, &[outcome], 2.0);

        assert!(plan.is_empty());
        assert!(ledger.bundle.is_empty());
        assert!(ledger.path.is_empty());
        assert!(ledger.bid((request.id, 0)).performed);
        // Nothing left: the filler listen window is emitted.
        assert!(matches!(next[0].kind, ActionKind::WaitForMessages));
    }

    #[test]
    fn pending_head_is_retried_or_waited_for() {
        let request = single_request();
        let mut ledger = PlannerLedger::new("AGENT_0", BidParams::default());
        let mut plan = measured_plan(&mut ledger, &request);

        // Not yet started → wait until its window opens.
        let outcome = plan[0].clone().with_status(ActionStatus::Pending);
        let next = next_actions(&mut ledger, &mut plan, &[outcome.clone()], 0.5);
        assert!(matches!(next[0].kind, ActionKind::WaitForMessages));
        assert_eq!(next[0].t_end, 1.0);

        // Window open → retried verbatim.
        let next = next_actions(&mut ledger, &mut plan, &[outcome], 1.5);
        assert_eq!(next[0].id, plan[0].id);
    }

    #[test]
    fn aborted_measurement_pops_without_performing() {
        let request = single_request();
        let mut ledger = PlannerLedger::new("AGENT_0", BidParams::default());
        let mut plan = measured_plan(&mut ledger, &request);

        let outcome = plan[0].clone().with_status(ActionStatus::Aborted);
        next_actions(&mut ledger, &mut plan, &[outcome], 2.0);
        assert!(plan.is_empty());
        assert!(!ledger.bid((request.id, 0)).performed);
        assert!(ledger.bundle.is_empty());
    }

    #[test]
    fn foreign_outcomes_are_ignored() {
        let request = single_request();
        let mut ledger = PlannerLedger::new("AGENT_0", BidParams::default());
        let mut plan = measured_plan(&mut ledger, &request);

        let foreign = Action::wait_for_messages(0.0, 1.0).with_status(ActionStatus::Completed);
        next_actions(&mut ledger, &mut plan, &[foreign], 1.5);
        assert_eq!(plan.len(), 1, "unrelated outcome must not pop the head");
    }
}
