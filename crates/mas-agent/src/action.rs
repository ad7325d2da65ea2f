//! Agent actions: the timed instructions a planner hands its agent.

use serde::{Deserialize, Serialize};

use mas_core::{ActionId, Message, RequestId, Vec2};

// ── ActionStatus ──────────────────────────────────────────────────────────────

/// Completion state of one action, reported back to the planner each cycle.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
pub enum ActionStatus {
    /// Not finished; the agent will attempt it again.
    #[default]
    Pending,
    Completed,
    /// Given up (start window missed, unsupported by this platform).
    Aborted,
}

// ── Action ────────────────────────────────────────────────────────────────────

/// What to do, tagged by kind.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action_type")]
pub enum ActionKind {
    /// Hold position and do nothing.
    Idle,
    /// Move to `target` at top speed.
    Travel { target: Vec2 },
    /// Slew to a new attitude (degrees from reference).
    Maneuver { attitude: f64 },
    /// Perform the measurement of one request subtask.
    Measure {
        request_id: RequestId,
        subtask_index: usize,
        instrument: String,
        expected_utility: f64,
        /// Target position, carried so execution needs no request lookup.
        target: Vec2,
    },
    /// Listen for incoming traffic until the end of the window.
    WaitForMessages,
    /// Publish `msg` to every subscribed peer.
    BroadcastMessage { msg: Box<Message> },
    /// Deliver `msg` to a single peer's reply endpoint.
    PeerMessage { msg: Box<Message> },
}

impl ActionKind {
    pub fn label(&self) -> &'static str {
        match self {
            ActionKind::Idle => "idle",
            ActionKind::Travel { .. } => "travel",
            ActionKind::Maneuver { .. } => "maneuver",
            ActionKind::Measure { .. } => "measure",
            ActionKind::WaitForMessages => "wait-for-messages",
            ActionKind::BroadcastMessage { .. } => "broadcast-message",
            ActionKind::PeerMessage { .. } => "peer-message",
        }
    }
}

/// One scheduled action: a kind plus its execution window and status.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub id: ActionId,
    pub t_start: f64,
    pub t_end: f64,
    pub status: ActionStatus,
    #[serde(flatten)]
    pub kind: ActionKind,
}

impl Action {
    pub fn new(kind: ActionKind, t_start: f64, t_end: f64) -> Self {
        Self {
            id: ActionId::generate(),
            t_start,
            t_end,
            status: ActionStatus::Pending,
            kind,
        }
    }

    /// Convenience constructor for the planner's listen-window filler.
    pub fn wait_for_messages(t_start: f64, t_end: f64) -> Self {
        Self::new(ActionKind::WaitForMessages, t_start, t_end)
    }

    pub fn with_status(mut self, status: ActionStatus) -> Self {
        self.status = status;
        self
    }
}
