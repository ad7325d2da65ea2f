//! The message envelope and the closed set of message kinds.
//!
//! # Design
//!
//! Every inter- and intra-element exchange is a [`Message`]: destination and
//! source element names, a globally unique id, and a tagged [`MessageBody`].
//! Bodies serialize to self-describing JSON with a `kind` discriminator;
//! decoding ignores unknown fields so protocol extensions do not break older
//! readers.
//!
//! Protocol bodies (registration, clock, module control) are fully typed
//! here.  Domain bodies (states, actions, requests, bids, plans) are carried
//! as raw JSON values: their concrete types live in the crates that own them
//! (`mas-agent`, `mas-planner`), which keeps this crate at the bottom of the
//! dependency graph while the substrate still routes every kind uniformly.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{AddressLedger, ClockConfig, MasResult, MessageId, NetworkConfig};

// ── Message ───────────────────────────────────────────────────────────────────

/// One simulation message.  Immutable once constructed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Destination element name, or `"ALL"` on a broadcast.
    pub dst: String,
    /// Name of the sending element.
    pub src: String,
    /// Globally unique message identifier.
    pub id: MessageId,
    #[serde(flatten)]
    pub body: MessageBody,
}

impl Message {
    pub fn new(dst: impl Into<String>, src: impl Into<String>, body: MessageBody) -> Self {
        Self {
            dst: dst.into(),
            src: src.into(),
            id: MessageId::generate(),
            body,
        }
    }

    /// Serialize the envelope to its JSON wire form.
    pub fn to_json(&self) -> MasResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse the JSON wire form back into an envelope.
    ///
    /// Unknown fields are dropped; an unknown `kind` is a parse error (the
    /// kind set is closed).
    pub fn from_json(raw: &str) -> MasResult<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    /// The body's kind tag, e.g. `"Toc"`.
    pub fn kind(&self) -> &'static str {
        self.body.kind()
    }
}

// ── MessageBody ───────────────────────────────────────────────────────────────

/// The closed set of message kinds used by the simulation protocols.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum MessageBody {
    // ── Manager protocol ──────────────────────────────────────────────────
    /// Element → manager: register and share the element's addresses.
    SyncRequest { network_config: NetworkConfig },
    /// Positive acknowledgement of the previous request.
    ReceptionAck,
    /// The previous request was rejected (unknown sender, duplicate, wrong
    /// protocol step).
    ReceptionIgnored,
    /// Manager → all: address ledger and clock configuration of the run.
    SimInfo {
        address_ledger: AddressLedger,
        clock_config: ClockConfig,
    },
    /// Element → manager: configured and ready to start.
    NodeReady,
    /// Manager → all: the simulation begins now.
    SimStart,
    /// Manager → all: simulated time has advanced to `t`.
    Toc { t: f64 },
    /// Element → manager: done until `tf`; requests the clock advance.
    TicRequest { t0: f64, tf: f64 },
    /// Manager → all: the simulation is over.
    SimEnd,
    /// Element → manager: clean shutdown completed.
    NodeDeactivated,

    // ── Node ↔ module protocol ────────────────────────────────────────────
    /// Module → node: the module's sockets are up.
    ModuleSyncRequest,
    /// Node → modules: run parameters every module needs.
    NodeInfo { clock_config: ClockConfig },
    /// Module → node: ready to execute.
    ModuleReady,
    /// Node → modules: begin executing.
    ModuleActivate,
    /// Node → modules: shut down.
    ModuleDeactivate,
    /// Module → node: shutdown complete.
    ModuleDeactivated,

    // ── Domain payloads (typed in their owning crates) ────────────────────
    /// An agent's state sample.
    AgentState(Value),
    /// An action together with its completion status.
    AgentAction(Value),
    /// A measurement request entering the system.
    MeasurementRequest(Value),
    /// A subtask bid exchanged between planners.
    MeasurementBid(Value),
    /// Node → planner module: own state plus everything heard this step.
    Senses(Value),
    /// Planner module → node: the actions to perform.
    Plan(Value),
    /// Environment → agent: (dis)connect from a peer's broadcasts.
    ConnectivityUpdate { target: String, connected: bool },
    /// Final planner ledger pushed to the monitor at teardown.
    PlannerResults(Value),
}

/// Bridge between a typed domain payload and the JSON-carrying
/// [`MessageBody`] variant that transports it.
///
/// Implemented by the owning crates (`mas-agent` for states and actions,
/// `mas-planner` for requests and bids); the substrate itself never needs
/// the concrete types.
pub trait DomainBody: serde::Serialize + serde::de::DeserializeOwned {
    /// Wrap an already-serialized payload in the right body variant.
    fn wrap(value: Value) -> MessageBody;

    /// The payload carried by `body`, if `body` is this payload's variant.
    fn peel(body: &MessageBody) -> Option<&Value>;

    /// Serialize `self` into its message body.
    fn to_body(&self) -> MasResult<MessageBody> {
        Ok(Self::wrap(serde_json::to_value(self)?))
    }

    /// Decode `body` back into the typed payload.  `None` if `body` is a
    /// different variant; `Err` if it is the right variant but malformed.
    fn from_body(body: &MessageBody) -> Option<MasResult<Self>> {
        Self::peel(body).map(|value| Ok(serde_json::from_value(value.clone())?))
    }
}

impl MessageBody {
    /// The kind tag as written on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            MessageBody::SyncRequest { .. } => "SyncRequest",
            MessageBody::ReceptionAck => "ReceptionAck",
            MessageBody::ReceptionIgnored => "ReceptionIgnored",
            MessageBody::SimInfo { .. } => "SimInfo",
            MessageBody::NodeReady => "NodeReady",
            MessageBody::SimStart => "SimStart",
            MessageBody::Toc { .. } => "Toc",
            MessageBody::TicRequest { .. } => "TicRequest",
            MessageBody::SimEnd => "SimEnd",
            MessageBody::NodeDeactivated => "NodeDeactivated",
            MessageBody::ModuleSyncRequest => "ModuleSyncRequest",
            MessageBody::NodeInfo { .. } => "NodeInfo",
            MessageBody::ModuleReady => "ModuleReady",
            MessageBody::ModuleActivate => "ModuleActivate",
            MessageBody::ModuleDeactivate => "ModuleDeactivate",
            MessageBody::ModuleDeactivated => "ModuleDeactivated",
            MessageBody::AgentState(_) => "AgentState",
            MessageBody::AgentAction(_) => "AgentAction",
            MessageBody::MeasurementRequest(_) => "MeasurementRequest",
            MessageBody::MeasurementBid(_) => "MeasurementBid",
            MessageBody::Senses(_) => "Senses",
            MessageBody::Plan(_) => "Plan",
            MessageBody::ConnectivityUpdate { .. } => "ConnectivityUpdate",
            MessageBody::PlannerResults(_) => "PlannerResults",
        }
    }
}
