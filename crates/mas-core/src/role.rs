//! Distinguished element names.
//!
//! Most elements are addressed by their scenario-assigned name; these are the
//! names with framework-level meaning.

use serde::{Deserialize, Serialize};

/// Reserved element roles within a simulation network.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub enum ElementRole {
    /// The element owning the authoritative clock.
    Manager,
    /// The passive end-of-run evidence collector.
    Monitor,
    /// The world model; excluded from tic-request rounds.
    Environment,
    /// Broadcast destination matched by every subscriber.
    All,
}

impl ElementRole {
    pub fn as_str(self) -> &'static str {
        match self {
            ElementRole::Manager => "MANAGER",
            ElementRole::Monitor => "MONITOR",
            ElementRole::Environment => "ENVIRONMENT",
            ElementRole::All => "ALL",
        }
    }

    /// `true` if `name` denotes an environment element.
    ///
    /// Matches by prefix so scenarios may number environments
    /// (`ENVIRONMENT_0`) the way they number agents.
    pub fn is_environment(name: &str) -> bool {
        name.starts_with(ElementRole::Environment.as_str())
    }
}

impl std::fmt::Display for ElementRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
