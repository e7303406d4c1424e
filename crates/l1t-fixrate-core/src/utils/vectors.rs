use std::{
    f64::consts::{PI, TAU},
    iter::Sum,
    ops::{Add, AddAssign},
};

use nalgebra::Vector2;

/// The azimuthal separation of two directions, folded into `[0, π]`.
pub fn delta_phi(phi1: f64, phi2: f64) -> f64 {
    let dphi = (phi1 - phi2).abs();
    if dphi > PI {
        TAU - dphi
    } else {
        dphi
    }
}

/// The distance of two directions in the $`\eta`$-$`\phi`$ plane.
pub fn delta_r(eta1: f64, phi1: f64, eta2: f64, phi2: f64) -> f64 {
    let deta = eta1 - eta2;
    let dphi = delta_phi(phi1, phi2);
    (deta * deta + dphi * dphi).sqrt()
}

/// A momentum in the plane transverse to the beam.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransverseVector(Vector2<f64>);

impl TransverseVector {
    /// Create a vector from its Cartesian components.
    pub fn new(px: f64, py: f64) -> Self {
        Self(Vector2::new(px, py))
    }

    /// Create a vector from a magnitude and an azimuthal angle.
    pub fn from_pt_phi(pt: f64, phi: f64) -> Self {
        Self::new(pt * phi.cos(), pt * phi.sin())
    }

    /// The $`x`$ component.
    pub fn px(&self) -> f64 {
        self.0.x
    }

    /// The $`y`$ component.
    pub fn py(&self) -> f64 {
        self.0.y
    }

    /// The magnitude.
    pub fn pt(&self) -> f64 {
        self.0.norm()
    }
}

impl Default for TransverseVector {
    fn default() -> Self {
        Self::new(0.0, 0.0)
    }
}

impl Add for TransverseVector {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl AddAssign for TransverseVector {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl Sum for TransverseVector {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), |acc, v| acc + v)
    }
}
