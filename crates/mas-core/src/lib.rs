//! `mas-core` — foundational types for the `mas` multi-agent simulation
//! framework.
//!
//! This crate is a dependency of every other `mas-*` crate.  It intentionally
//! has no `mas-*` dependencies and a minimal external footprint (`serde`,
//! `serde_json`, `uuid`, `thiserror`, `rustc-hash`).
//!
//! # What lives here
//!
//! | Module      | Contents                                                 |
//! |-------------|----------------------------------------------------------|
//! | [`ids`]     | `MessageId`, `RequestId`, `ActionId`                     |
//! | [`vec2`]    | `Vec2` planar position/velocity vector                   |
//! | [`time`]    | `ClockConfig` variants and time quantisation helpers     |
//! | [`net`]     | `SocketRole`, `NetworkConfig`, `AddressLedger`           |
//! | [`message`] | `Message` envelope and the closed `MessageBody` kind set |
//! | [`role`]    | Distinguished element names (`MANAGER`, `ALL`, …)        |
//! | [`error`]   | `MasError`, `MasResult`                                  |

pub mod error;
pub mod ids;
pub mod message;
pub mod net;
pub mod role;
pub mod time;
pub mod vec2;


// ── Re-exports ────────────────────────────────────────────────────────────────

pub use error::{MasError, MasResult};
pub use ids::{ActionId, MessageId, RequestId};
pub use message::{DomainBody, Message, MessageBody};
pub use net::{AddressLedger, NetworkConfig, SocketRole};
pub use role::ElementRole;
pub use time::ClockConfig;
pub use vec2::Vec2;
