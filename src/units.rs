// Copyright 2024 Johan Barthelemy
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// https://creativecommons.org/licenses/by-nc-nd/4.0/legalcode

//! Definition of types representing values expressed in a given unit.
//!
//! The types assume the following units:
//!
//! - [Length]: in meters
//! - [Time]: in seconds (since midnight, for absolute simulation times)
//! - [Speed]: in meter per second
//!
//! Other units can be assumed but the coherence between units must be kept
//! (lengths in miles imply speeds in miles per second).
use std::fmt;
use std::ops::{Add, AddAssign, Div, Mul, Neg, Sub, SubAssign};

use num_traits::Zero;
use serde_derive::{Deserialize, Serialize};

macro_rules! impl_unit_ops(
    ( $( $t:ident ),* ) => {
        $(
            impl Add for $t {
                type Output = Self;
                fn add(self, rhs: Self) -> Self::Output {
                    Self(self.0 + rhs.0)
                }
            }

            impl AddAssign for $t {
                fn add_assign(&mut self, rhs: Self) {
                    self.0 += rhs.0;
                }
            }

            impl Sub for $t {
                type Output = Self;
                fn sub(self, rhs: Self) -> Self::Output {
                    Self(self.0 - rhs.0)
                }
            }

            impl SubAssign for $t {
                fn sub_assign(&mut self, rhs: Self) {
                    self.0 -= rhs.0;
                }
            }

            impl Mul<f64> for $t {
                type Output = Self;
                fn mul(self, rhs: f64) -> Self::Output {
                    Self(self.0 * rhs)
                }
            }

            impl Div<f64> for $t {
                type Output = Self;
                fn div(self, rhs: f64) -> Self::Output {
                    Self(self.0 / rhs)
                }
            }

            // The ratio of two values of the same unit is dimensionless.
            impl Div for $t {
                type Output = f64;
                fn div(self, rhs: Self) -> Self::Output {
                    self.0 / rhs.0
                }
            }

            impl Neg for $t {
                type Output = Self;
                fn neg(self) -> Self::Output {
                    Self(-self.0)
                }
            }

            impl Zero for $t {
                fn zero() -> Self {
                    Self(0.0)
                }
                fn is_zero(&self) -> bool {
                    self.0 == 0.0
                }
            }

            impl fmt::Display for $t {
                fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                    self.0.fmt(f)
                }
            }

            impl $t {
                /// Returns the largest of two values.
                pub fn max(self, other: Self) -> Self {
                    Self(self.0.max(other.0))
                }
            }
        )*
    }
);

/// An amount of time, in seconds.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, PartialOrd, Serialize)]
pub struct Time(pub f64);

/// A distance, in meters.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, PartialOrd, Serialize)]
pub struct Length(pub f64);

/// A speed, in meters per second.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, PartialOrd, Serialize)]
pub struct Speed(pub f64);

impl_unit_ops!(Time, Length, Speed);

impl Div<Speed> for Length {
    type Output = Time;
    fn div(self, rhs: Speed) -> Self::Output {
        Time(self.0 / rhs.0)
    }
}

impl Time {
    /// Returns `true` if the two values differ by less than `1e-6`.
    pub fn approx_eq(&self, other: &Self) -> bool {
        (self.0 - other.0).abs() < 1e-6
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_arithmetic_test() {
        assert_eq!(Time(1.5) + Time(2.5), Time(4.0));
        assert_eq!(Time(4.0) - Time(1.0), Time(3.0));
        assert_eq!(Time(2.0) * 3.0, Time(6.0));
        assert_eq!(Time(6.0) / 3.0, Time(2.0));
        assert_eq!(Time(6.0) / Time(3.0), 2.0);
        assert_eq!(Length(100.0) / Speed(10.0), Time(10.0));
        assert_eq!(Time::zero(), Time(0.0));
        assert_eq!(Time(-1.0).max(Time::zero()), Time::zero());
    }
}
