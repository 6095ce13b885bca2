// Copyright 2024 Johan Barthelemy
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// https://creativecommons.org/licenses/by-nc-nd/4.0/legalcode

//! Rerouting strategies of the agents.
use serde_derive::{Deserialize, Serialize};

/// A linear-threshold rerouting strategy.
///
/// An active strategy triggers a reroute whenever
/// `x1 * cos_alpha + x2 * sin_alpha - theta > 0`, where `x1` is the
/// normalized elapsed trip time and `x2` is the saturation of the imminent
/// next link. An inert strategy never triggers.
///
/// Callers must check that at least one agent is on the next link
/// (`x2 > 0`) before evaluating the strategy.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct Strategy {
    cos_alpha: f64,
    sin_alpha: f64,
    theta: f64,
    active: bool,
}

impl Strategy {
    /// Creates an active strategy from its angle and threshold.
    pub fn new(alpha: f64, theta: f64) -> Self {
        Strategy {
            cos_alpha: alpha.cos(),
            sin_alpha: alpha.sin(),
            theta,
            active: true,
        }
    }

    /// Creates an inert strategy, that never reroutes.
    pub fn inert() -> Self {
        Default::default()
    }

    /// Returns `true` if the strategy can trigger reroutes.
    pub const fn is_active(&self) -> bool {
        self.active
    }

    /// Evaluates the strategy predicate on the normalized elapsed trip time
    /// `x1` and the next-link saturation `x2`.
    pub fn evaluate(&self, x1: f64, x2: f64) -> bool {
        if !self.active {
            return false;
        }
        x1 * self.cos_alpha + x2 * self.sin_alpha - self.theta > 0.0
    }
}
