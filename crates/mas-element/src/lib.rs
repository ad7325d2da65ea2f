//! `mas-element` — lifecycle and coordination protocols of the `mas`
//! simulation framework.
//!
//! # Element lifecycle
//!
//! Every participant in a simulation is a *network element* driven through
//! the same five steps by [`element::run_element`]:
//!
//! ```text
//! ① configure  — bind/connect every endpoint in the element's NetworkConfig
//! ② sync       — element-type-specific coordination (registration, module sync)
//! ③ wait-start — block until the simulation may begin
//! ④ execute    — the element's main behavior
//! ⑤ deactivate — always runs once ① succeeded, even if ④ failed or was
//!                cancelled: publish deactivation, close sockets
//! ```
//!
//! # Who is who
//!
//! - [`Manager`](manager::Manager) owns the authoritative clock, gates the
//!   start, advances time, and signals the end.
//! - [`Node`](node::Node) is the manager-protocol side of agents and
//!   environments: registration, readiness, tic requests, deactivation, and
//!   the internal-module handshake.
//! - [`InternalModule`](module::InternalModule) is a worker collocated with a
//!   node, speaking only the internal protocol; [`module::run_module`]
//!   drives its lifecycle.
//! - [`Monitor`](monitor::Monitor) passively collects pushed records and
//!   broadcasts until `SimEnd`.

pub mod element;
pub mod error;
pub mod manager;
pub mod module;
pub mod monitor;
pub mod node;


pub use element::{ElementNet, NetworkElement, run_element};
pub use error::{ElementError, ElementResult};
pub use manager::Manager;
pub use module::{InternalModule, ModuleNet, run_module};
pub use monitor::Monitor;
pub use node::Node;
