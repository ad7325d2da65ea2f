//! Network configuration data: socket roles and role→endpoint maps.
//!
//! Only the *description* of an element's network lives here; the live socket
//! machinery is in `mas-net`.  Keeping the description in `mas-core` lets the
//! manager embed whole configurations in `SimInfo` broadcasts without a
//! dependency on the transport layer.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

// ── SocketRole ────────────────────────────────────────────────────────────────

/// The transmission role of one socket.
///
/// Each role has a fixed capability, enforced by the substrate at send and
/// receive time:
///
/// | Role        | Send | Receive | Binds its endpoints |
/// |-------------|------|---------|---------------------|
/// | `Publish`   | ✓    |         | ✓                   |
/// | `Subscribe` |      | ✓       |                     |
/// | `Request`   | ✓    | ✓ (alternating) |             |
/// | `Reply`     | ✓ (alternating) | ✓ | ✓              |
/// | `Push`      | ✓    |         |                     |
/// | `Pull`      |      | ✓       | ✓                   |
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub enum SocketRole {
    Publish,
    Subscribe,
    Request,
    Reply,
    Push,
    Pull,
}

impl SocketRole {
    /// `true` if messages may be transmitted from a socket of this role.
    pub fn can_send(self) -> bool {
        matches!(
            self,
            SocketRole::Publish | SocketRole::Request | SocketRole::Reply | SocketRole::Push
        )
    }

    /// `true` if messages may be read from a socket of this role.
    pub fn can_receive(self) -> bool {
        matches!(
            self,
            SocketRole::Subscribe | SocketRole::Request | SocketRole::Reply | SocketRole::Pull
        )
    }

    /// `true` if the owning element binds this role's endpoints; `false` if
    /// it connects to endpoints bound by a peer.
    pub fn binds(self) -> bool {
        matches!(self, SocketRole::Publish | SocketRole::Reply | SocketRole::Pull)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SocketRole::Publish => "publish",
            SocketRole::Subscribe => "subscribe",
            SocketRole::Request => "request",
            SocketRole::Reply => "reply",
            SocketRole::Push => "push",
            SocketRole::Pull => "pull",
        }
    }
}

impl std::fmt::Display for SocketRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── NetworkConfig ─────────────────────────────────────────────────────────────

/// The addresses one element uses, split into the external (inter-element)
/// and internal (node↔module) planes.
///
/// Endpoints are `tcp://host:port` strings.  An endpoint appears under the
/// role that *uses* it, whether the element binds it or connects to it; the
/// role decides which (see [`SocketRole::binds`]).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Network the element belongs to; prefixes element names in logs.
    pub network_name: String,
    /// Inter-element channels.
    #[serde(default)]
    pub external: FxHashMap<SocketRole, Vec<String>>,
    /// Intra-element channels (empty for elements hosting no modules).
    #[serde(default)]
    pub internal: FxHashMap<SocketRole, Vec<String>>,
}

impl NetworkConfig {
    pub fn new(network_name: impl Into<String>) -> Self {
        Self {
            network_name: network_name.into(),
            external: FxHashMap::default(),
            internal: FxHashMap::default(),
        }
    }

    /// Add (or extend) an external role's endpoint list.
    pub fn with_external(mut self, role: SocketRole, endpoints: Vec<String>) -> Self {
        self.external.entry(role).or_default().extend(endpoints);
        self
    }

    /// Add (or extend) an internal role's endpoint list.
    pub fn with_internal(mut self, role: SocketRole, endpoints: Vec<String>) -> Self {
        self.internal.entry(role).or_default().extend(endpoints);
        self
    }

    pub fn external_endpoints(&self, role: SocketRole) -> &[String] {
        self.external.get(&role).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn internal_endpoints(&self, role: SocketRole) -> &[String] {
        self.internal.get(&role).map(Vec::as_slice).unwrap_or(&[])
    }

    /// All endpoints this element binds, across both planes.
    ///
    /// The launcher checks these for duplicates across the elements of one
    /// host before anything starts.
    pub fn bound_endpoints(&self) -> impl Iterator<Item = &str> {
        self.external
            .iter()
            .chain(self.internal.iter())
            .filter(|(role, _)| role.binds())
            .flat_map(|(_, eps)| eps.iter().map(String::as_str))
    }
}

/// Maps element names to their external network configuration.
///
/// Assembled by the manager from `SyncRequest` registrations and distributed
/// to every element in the `SimInfo` broadcast.
pub type AddressLedger = FxHashMap<String, NetworkConfig>;
