//! Simulation time model.
//!
//! # Design
//!
//! Simulated time is a non-decreasing `f64` count of seconds since the start
//! of the run.  The authoritative value is owned by the manager and reaches
//! the other elements through the clock protocol (`Toc` broadcasts) or, for
//! the real-time variants, by scaled wall-clock sleeps.
//!
//! How the manager advances that value is described by [`ClockConfig`], a
//! closed set of variants shared verbatim between all elements: the manager
//! embeds its config in the `SimInfo` broadcast and nodes forward it to their
//! modules in `NodeInfo`, so every participant interprets waits identically.

use serde::{Deserialize, Serialize};

use crate::{MasError, MasResult};

// ── ClockConfig ───────────────────────────────────────────────────────────────

/// How simulated time is advanced by the manager.
///
/// `start` and `end` are simulated timestamps in seconds (`start` is usually
/// zero).  All variants require `end >= start`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "clock_type")]
pub enum ClockConfig {
    /// Wall-clock time and simulated time advance together.  No tic requests
    /// are accepted.
    RealTime { start: f64, end: f64 },

    /// Wall-clock sleeps are compressed by `factor` (factor 60 ⇒ one wall
    /// second per simulated minute).
    AcceleratedRealTime { start: f64, end: f64, factor: f64 },

    /// Time advances in fixed increments of `dt`; the manager broadcasts a
    /// `Toc` per step and waits for a `TicRequest` from every non-environment
    /// element before the next.
    FixedTimeStep { start: f64, end: f64, dt: f64 },

    /// Time jumps to the smallest `tf` across the tic requests of the current
    /// round — idle stretches cost nothing.
    EventDriven { start: f64, end: f64 },
}

impl ClockConfig {
    pub fn start(&self) -> f64 {
        match self {
            ClockConfig::RealTime { start, .. }
            | ClockConfig::AcceleratedRealTime { start, .. }
            | ClockConfig::FixedTimeStep { start, .. }
            | ClockConfig::EventDriven { start, .. } => *start,
        }
    }

    pub fn end(&self) -> f64 {
        match self {
            ClockConfig::RealTime { end, .. }
            | ClockConfig::AcceleratedRealTime { end, .. }
            | ClockConfig::FixedTimeStep { end, .. }
            | ClockConfig::EventDriven { end, .. } => *end,
        }
    }

    /// Total simulated seconds covered by the run.
    #[inline]
    pub fn total_secs(&self) -> f64 {
        self.end() - self.start()
    }

    /// Check the variant's numeric invariants (`end ≥ start`, `factor > 0`,
    /// `dt > 0`).
    pub fn validate(&self) -> MasResult<()> {
        if self.end() < self.start() {
            return Err(MasError::Config(format!(
                "clock end {} precedes start {}",
                self.end(),
                self.start()
            )));
        }
        match self {
            ClockConfig::AcceleratedRealTime { factor, .. } if *factor <= 0.0 => Err(
                MasError::Config(format!("acceleration factor must be positive, got {factor}")),
            ),
            ClockConfig::FixedTimeStep { dt, .. } if *dt <= 0.0 => Err(MasError::Config(
                format!("time step must be positive, got {dt}"),
            )),
            _ => Ok(()),
        }
    }

    /// Human-readable variant label for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            ClockConfig::RealTime { .. } => "real-time",
            ClockConfig::AcceleratedRealTime { .. } => "accelerated-real-time",
            ClockConfig::FixedTimeStep { .. } => "fixed-time-step",
            ClockConfig::EventDriven { .. } => "event-driven",
        }
    }

    /// Step size if this is a fixed-step clock.
    pub fn fixed_dt(&self) -> Option<f64> {
        match self {
            ClockConfig::FixedTimeStep { dt, .. } => Some(*dt),
            _ => None,
        }
    }
}

// ── Quantisation helpers ──────────────────────────────────────────────────────

/// Largest multiple of `dt` that is `<= t`.  Infinite inputs pass through.
#[inline]
pub fn floor_to_step(t: f64, dt: f64) -> f64 {
    if t.is_finite() { dt * (t / dt).floor() } else { t }
}

/// Smallest multiple of `dt` that is `>= t`.  Infinite inputs pass through.
#[inline]
pub fn ceil_to_step(t: f64, dt: f64) -> f64 {
    if t.is_finite() { dt * (t / dt).ceil() } else { t }
}
