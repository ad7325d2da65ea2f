//! `mas-sim` — scenario assembly and the launcher for the `mas` simulation
//! framework.
//!
//! A scenario names its elements, picks a clock, and lists the measurement
//! requests the environment will release.  The launcher derives every
//! element's network configuration from one base port, hosts each element
//! on a dedicated OS thread with its own single-threaded runtime, and maps
//! the run's outcome to a process exit code.
//!
//! | Module          | Contents                                            |
//! |-----------------|-----------------------------------------------------|
//! | [`scenario`]    | `ScenarioConfig`, agent/request specs, the port plan |
//! | [`environment`] | The environment element: request release, state tracking, comms-range connectivity |
//! | [`launcher`]    | `run_scenario`, tracing setup, exit-code mapping    |

pub mod environment;
pub mod error;
pub mod launcher;
pub mod scenario;

#[cfg(test)]
mod tests;

pub use environment::Environment;
pub use error::{SimError, SimResult};
pub use launcher::{init_tracing, run_scenario, run_to_exit_code};
pub use scenario::{AgentSpec, RequestSpec, ScenarioConfig};
