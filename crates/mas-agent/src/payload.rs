//! Typed payloads for the domain message kinds this crate owns.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use mas_core::{DomainBody, Message, MessageBody};

use crate::{Action, AgentState};

impl DomainBody for AgentState {
    fn wrap(value: Value) -> MessageBody {
        MessageBody::AgentState(value)
    }

    fn peel(body: &MessageBody) -> Option<&Value> {
        match body {
            MessageBody::AgentState(value) => Some(value),
            _ => None,
        }
    }
}

impl DomainBody for Action {
    fn wrap(value: Value) -> MessageBody {
        MessageBody::AgentAction(value)
    }

    fn peel(body: &MessageBody) -> Option<&Value> {
        match body {
            MessageBody::AgentAction(value) => Some(value),
            _ => None,
        }
    }
}

/// Everything an agent perceived in one step: its own state plus the
/// messages heard since the previous step.  Shipped to the planner module.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SensesPayload {
    pub state: AgentState,
    pub senses: Vec<Message>,
}

impl DomainBody for SensesPayload {
    fn wrap(value: Value) -> MessageBody {
        MessageBody::Senses(value)
    }

    fn peel(body: &MessageBody) -> Option<&Value> {
        match body {
            MessageBody::Senses(value) => Some(value),
            _ => None,
        }
    }
}

/// The planner's answer: actions to perform, in order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlanPayload {
    pub actions: Vec<Action>,
}

impl DomainBody for PlanPayload {
    fn wrap(value: Value) -> MessageBody {
        MessageBody::Plan(value)
    }

    fn peel(body: &MessageBody) -> Option<&Value> {
        match body {
            MessageBody::Plan(value) => Some(value),
            _ => None,
        }
    }
}
