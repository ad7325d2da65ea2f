//! Agent state variants.
//!
//! `AgentState` is a closed tagged hierarchy: each variant supplies pure
//! projections (`propagate`, `calc_arrival_time`) so planners can evaluate
//! candidate schedules without mutating live state, plus in-place mutators
//! used by the agent's own action execution.

use serde::{Deserialize, Serialize};

use mas_core::Vec2;

use crate::orbit::OrbitDataProvider;

// ── AgentStatus ───────────────────────────────────────────────────────────────

/// What the agent is doing right now.  Written verbatim into `states.csv`.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
pub enum AgentStatus {
    #[default]
    Idling,
    Traveling,
    Maneuvering,
    Measuring,
    Sensing,
    Thinking,
    Listening,
    Messaging,
}

impl AgentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AgentStatus::Idling => "IDLING",
            AgentStatus::Traveling => "TRAVELING",
            AgentStatus::Maneuvering => "MANEUVERING",
            AgentStatus::Measuring => "MEASURING",
            AgentStatus::Sensing => "SENSING",
            AgentStatus::Thinking => "THINKING",
            AgentStatus::Listening => "LISTENING",
            AgentStatus::Messaging => "MESSAGING",
        }
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── State variants ────────────────────────────────────────────────────────────

/// A planar vehicle that steers freely within rectangular bounds.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KinematicState {
    pub pos: Vec2,
    pub vel: Vec2,
    /// Top speed; travel times are `distance / v_max`.
    pub v_max: f64,
    pub x_bounds: [f64; 2],
    pub y_bounds: [f64; 2],
    pub status: AgentStatus,
    pub t: f64,
    /// Instrument names this agent carries.
    pub instruments: Vec<String>,
}

/// An orbiter: position is its ground track, and target arrival is governed
/// by precomputed access windows rather than steering.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrbitalState {
    /// Sub-satellite point as (lat, lon).
    pub pos: Vec2,
    /// Ground-track drift rate in degrees per second.
    pub vel: Vec2,
    pub status: AgentStatus,
    pub t: f64,
    pub instruments: Vec<String>,
}

/// The closed set of agent-state kinds.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state_type")]
pub enum AgentState {
    Kinematic(KinematicState),
    Orbital(OrbitalState),
}

impl AgentState {
    // ── Accessors ─────────────────────────────────────────────────────────

    pub fn pos(&self) -> Vec2 {
        match self {
            AgentState::Kinematic(s) => s.pos,
            AgentState::Orbital(s) => s.pos,
        }
    }

    pub fn vel(&self) -> Vec2 {
        match self {
            AgentState::Kinematic(s) => s.vel,
            AgentState::Orbital(s) => s.vel,
        }
    }

    pub fn t(&self) -> f64 {
        match self {
            AgentState::Kinematic(s) => s.t,
            AgentState::Orbital(s) => s.t,
        }
    }

    pub fn status(&self) -> AgentStatus {
        match self {
            AgentState::Kinematic(s) => s.status,
            AgentState::Orbital(s) => s.status,
        }
    }

    pub fn instruments(&self) -> &[String] {
        match self {
            AgentState::Kinematic(s) => &s.instruments,
            AgentState::Orbital(s) => &s.instruments,
        }
    }

    /// `true` if this agent carries `instrument`.
    pub fn carries(&self, instrument: &str) -> bool {
        self.instruments().iter().any(|i| i == instrument)
    }

    /// Top speed for travel-time estimates; orbiters do not steer.
    pub fn v_max(&self) -> Option<f64> {
        match self {
            AgentState::Kinematic(s) => Some(s.v_max),
            AgentState::Orbital(_) => None,
        }
    }

    // ── Pure projections ──────────────────────────────────────────────────

    /// Project this state to time `t` without mutating it.
    ///
    /// Positions advance along the current velocity; kinematic agents are
    /// clamped to their bounds.  `t` earlier than the state's own time
    /// returns an unchanged clone (time never runs backwards).
    pub fn propagate(&self, t: f64) -> AgentState {
        let mut next = self.clone();
        next.advance(t);
        next
    }

    /// Earliest time the agent can be at `to`, having been at `from` at
    /// `t_from`.
    ///
    /// Kinematic agents travel ballistically at `v_max`; orbital agents wait
    /// for the next access window over the target.
    pub fn calc_arrival_time(
        &self,
        from: Vec2,
        to: Vec2,
        t_from: f64,
        orbits: &dyn OrbitDataProvider,
    ) -> f64 {
        match self {
            AgentState::Kinematic(s) => t_from + from.distance(to) / s.v_max,
            AgentState::Orbital(_) => orbits
                .access_windows(to.x, to.y, t_from)
                .first()
                .map(|w| w.t_enter.max(t_from))
                .unwrap_or(f64::INFINITY),
        }
    }

    // ── In-place mutators (agent's own execution loop) ────────────────────

    /// Advance this state to time `t` along its current velocity.
    pub fn advance(&mut self, t: f64) {
        match self {
            AgentState::Kinematic(s) => {
                let dt = t - s.t;
                if dt > 0.0 {
                    s.pos.x = (s.pos.x + s.vel.x * dt).clamp(s.x_bounds[0], s.x_bounds[1]);
                    s.pos.y = (s.pos.y + s.vel.y * dt).clamp(s.y_bounds[0], s.y_bounds[1]);
                    s.t = t;
                }
            }
            AgentState::Orbital(s) => {
                let dt = t - s.t;
                if dt > 0.0 {
                    s.pos.x += s.vel.x * dt;
                    s.pos.y += s.vel.y * dt;
                    s.t = t;
                }
            }
        }
    }

    pub fn set_status(&mut self, status: AgentStatus) {
        match self {
            AgentState::Kinematic(s) => s.status = status,
            AgentState::Orbital(s) => s.status = status,
        }
    }

    pub fn set_vel(&mut self, vel: Vec2) {
        match self {
            AgentState::Kinematic(s) => s.vel = vel,
            AgentState::Orbital(s) => s.vel = vel,
        }
    }
}

// ── Engineering policy ────────────────────────────────────────────────────────

/// Pluggable power/engineering model.
///
/// The agent caps its tic-request horizon at the predicted failure time so
/// an element never sleeps through its own breakdown.
pub trait EngineeringPolicy: Send + Sync {
    /// Earliest simulated time at which the platform fails.
    fn predict_failure(&self, state: &AgentState) -> f64;

    /// `true` once the platform has failed at `state`'s time.
    fn is_failure(&self, state: &AgentState) -> bool {
        state.t() >= self.predict_failure(state)
    }
}

/// Default policy: the platform never fails.
pub struct NoFailures;

impl EngineeringPolicy for NoFailures {
    fn predict_failure(&self, _state: &AgentState) -> f64 {
        f64::INFINITY
    }
}
