//! Planar vector type shared by agent states, requests, and actions.

use serde::{Deserialize, Serialize};

/// A 2-D vector in scenario coordinates (arbitrary length units).
///
/// Used for both positions and velocities.  Double precision because imaging
/// times are derived from distances and accumulate across a whole path.
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: f64,
    pub y: f64,
}

impl Vec2 {
    pub const ZERO: Vec2 = Vec2 { x: 0.0, y: 0.0 };

    #[inline]
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to `other`.
    #[inline]
    pub fn distance(self, other: Vec2) -> f64 {
        ((other.x - self.x).powi(2) + (other.y - self.y).powi(2)).sqrt()
    }

    #[inline]
    pub fn norm(self) -> f64 {
        (self.x * self.x + self.y * self.y).sqrt()
    }

    /// Unit vector pointing from `self` towards `to`, or zero if coincident.
    pub fn direction_to(self, to: Vec2) -> Vec2 {
        let dx = to.x - self.x;
        let dy = to.y - self.y;
        let norm = (dx * dx + dy * dy).sqrt();
        if norm < f64::EPSILON {
            Vec2::ZERO
        } else {
            Vec2::new(dx / norm, dy / norm)
        }
    }

    #[inline]
    pub fn scaled(self, k: f64) -> Vec2 {
        Vec2::new(self.x * k, self.y * k)
    }
}

impl std::ops::Add for Vec2 {
    type Output = Vec2;
    #[inline]
    fn add(self, rhs: Vec2) -> Vec2 {
        Vec2::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl std::ops::Sub for Vec2 {
    type Output = Vec2;
    #[inline]
    fn sub(self, rhs: Vec2) -> Vec2 {
        Vec2::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl std::fmt::Display for Vec2 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({:.3}, {:.3})", self.x, self.y)
    }
}
