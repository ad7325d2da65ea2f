//! Unit tests for agent states, actions, and payloads.

use mas_core::Vec2;

use crate::orbit::{AccessWindow, GroundTrackTable, OrbitDataProvider};
use crate::state::{AgentState, AgentStatus, KinematicState, OrbitalState};

fn kinematic(pos: Vec2, vel: Vec2) -> AgentState {
    AgentState::Kinematic(KinematicState {
        pos,
        vel,
        v_max: 1.0,
        x_bounds: [0.0, 10.0],
        y_bounds: [0.0, 10.0],
        status: AgentStatus::Idling,
        t: 0.0,
        instruments: vec!["VNIR".into()],
    })
}

fn no_orbits() -> GroundTrackTable {
    GroundTrackTable::new(0.0)
}

#[cfg(test)]
mod state {
    use super::*;

    #[test]
    fn propagate_is_pure_and_linear() {
        let state = kinematic(Vec2::new(1.0, 1.0), Vec2::new(1.0, 0.0));
        let later = state.propagate(3.0);
        assert_eq!(later.pos(), Vec2::new(4.0, 1.0));
        assert_eq!(later.t(), 3.0);
        // original untouched
        assert_eq!(state.pos(), Vec2::new(1.0, 1.0));
        assert_eq!(state.t(), 0.0);
    }

    #[test]
    fn propagate_clamps_to_bounds() {
        let state = kinematic(Vec2::new(9.0, 5.0), Vec2::new(2.0, 0.0));
        let later = state.propagate(5.0);
        assert_eq!(later.pos().x, 10.0);
    }

    #[test]
    fn propagate_backwards_is_identity() {
        let state = kinematic(Vec2::new(2.0, 2.0), Vec2::new(1.0, 1.0));
        let earlier = state.propagate(-5.0);
        assert_eq!(earlier.pos(), state.pos());
    }

    #[test]
    fn kinematic_arrival_is_ballistic() {
        let state = kinematic(Vec2::ZERO, Vec2::ZERO);
        let t = state.calc_arrival_time(Vec2::ZERO, Vec2::new(3.0, 4.0), 2.0, &no_orbits());
        assert_eq!(t, 7.0); // 2.0 + distance 5 / v_max 1
    }

    #[test]
    fn orbital_arrival_uses_access_windows() {
        let state = AgentState::Orbital(OrbitalState {
            pos: Vec2::ZERO,
            vel: Vec2::ZERO,
            status: AgentStatus::Idling,
            t: 0.0,
            instruments: vec![],
        });
        let orbits = GroundTrackTable::new(0.1)
            .with_point(5.0, 5.0, vec![
                AccessWindow { t_enter: 10.0, t_exit: 20.0 },
                AccessWindow { t_enter: 100.0, t_exit: 110.0 },
            ]);

        let t = state.calc_arrival_time(Vec2::ZERO, Vec2::new(5.0, 5.0), 0.0, &orbits);
        assert_eq!(t, 10.0);

        // From inside the first window, arrival is "now".
        let t = state.calc_arrival_time(Vec2::ZERO, Vec2::new(5.0, 5.0), 15.0, &orbits);
        assert_eq!(t, 15.0);

        // No coverage at all → unreachable.
        let t = state.calc_arrival_time(Vec2::ZERO, Vec2::new(8.0, 8.0), 0.0, &orbits);
        assert!(t.is_infinite());
    }

    #[test]
    fn access_windows_sorted_and_filtered() {
        let orbits = GroundTrackTable::new(0.1).with_point(1.0, 1.0, vec![
            AccessWindow { t_enter: 50.0, t_exit: 60.0 },
            AccessWindow { t_enter: 10.0, t_exit: 20.0 },
        ]);
        let windows = orbits.access_windows(1.0, 1.0, 25.0);
        assert_eq!(windows, vec![AccessWindow { t_enter: 50.0, t_exit: 60.0 }]);
    }

    #[test]
    fn state_serde_roundtrip() {
        let state = kinematic(Vec2::new(1.0, 2.0), Vec2::ZERO);
        let json = serde_json::to_string(&state).unwrap();
        assert!(json.contains("\"state_type\":\"Kinematic\""), "got {json}");
        let back: AgentState = serde_json::from_str(&json).unwrap();
        assert_eq!(state, back);
    }
}

#[cfg(test)]
mod action {
    use mas_core::{DomainBody, RequestId};

    use crate::{Action, ActionKind, ActionStatus};

    #[test]
    fn serde_roundtrip_with_kind_tag() {
        let action = Action::new(
            ActionKind::Measure {
                request_id: RequestId::generate(),
                subtask_index: 1,
                instrument: "VNIR".into(),
                expected_utility: 3.5,
                target: mas_core::Vec2::new(5.0, 5.0),
            },
            1.0,
            2.0,
        );
        let json = serde_json::to_string(&action).unwrap();
        assert!(json.contains("\"action_type\":\"Measure\""), "got {json}");
        let back: Action = serde_json::from_str(&json).unwrap();
        assert_eq!(action, back);
    }

    #[test]
    fn body_roundtrip() {
        let action = Action::wait_for_messages(0.0, 1.0).with_status(ActionStatus::Completed);
        let body = action.to_body().unwrap();
        assert_eq!(body.kind(), "AgentAction");
        let back = Action::from_body(&body).unwrap().unwrap();
        assert_eq!(action, back);
    }
}

#[cfg(test)]
mod payload {
    use mas_core::{DomainBody, Message};

    use super::*;
    use crate::{Action, PlanPayload, SensesPayload};

    #[test]
    fn senses_carry_state_and_messages() {
        let state = kinematic(Vec2::ZERO, Vec2::ZERO);
        let inner = Message::new("AGENT_0", "AGENT_1", state.to_body().unwrap());
        let payload = SensesPayload { state: state.clone(), senses: vec![inner] };

        let body = payload.to_body().unwrap();
        assert_eq!(body.kind(), "Senses");
        let back = SensesPayload::from_body(&body).unwrap().unwrap();
        assert_eq!(payload, back);
    }

    #[test]
    fn plan_payload_roundtrip() {
        let payload = PlanPayload {
            actions: vec![Action::wait_for_messages(0.0, 0.5)],
        };
        let body = payload.to_body().unwrap();
        let back = PlanPayload::from_body(&body).unwrap().unwrap();
        assert_eq!(payload, back);
    }

    #[test]
    fn wrong_variant_peels_to_none() {
        let state = kinematic(Vec2::ZERO, Vec2::ZERO);
        let body = state.to_body().unwrap();
        assert!(PlanPayload::from_body(&body).is_none());
    }
}
