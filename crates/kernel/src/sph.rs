//! SPH smoothing kernels.
//!
//! Density uses the spiky kernel squared, near-density the spiky kernel cubed
//! and viscosity the poly6 kernel. All kernels vanish for `d >= r` and are
//! normalised so that their integral over the support sphere is 1.

use std::f32::consts::PI;

/// Scaling factors for the smoothing kernels at one smoothing radius.
///
/// Recomputed whenever the smoothing radius changes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SmoothingConstants {
    /// Smoothing radius `r` (kernel support).
    pub radius: f32,
    /// `315 / (64 pi r^9)`.
    pub poly6: f32,
    /// `15 / (2 pi r^5)`.
    pub spiky_pow2: f32,
    /// `15 / (pi r^6)`.
    pub spiky_pow3: f32,
    /// `15 / (pi r^5)`.
    pub spiky_pow2_derivative: f32,
    /// `45 / (pi r^6)`.
    pub spiky_pow3_derivative: f32,
}

impl SmoothingConstants {
    /// Compute the scaling factors for smoothing radius `radius`.
    ///
    /// A non-positive radius yields non-finite factors; this is not guarded.
    pub fn new(radius: f32) -> Self {
        let r5 = radius.powi(5);
        let r6 = radius.powi(6);
        Self {
            radius,
            poly6: 315.0 / (64.0 * PI * radius.powi(9)),
            spiky_pow2: 15.0 / (2.0 * PI * r5),
            spiky_pow3: 15.0 / (PI * r6),
            spiky_pow2_derivative: 15.0 / (PI * r5),
            spiky_pow3_derivative: 45.0 / (PI * r6),
        }
    }

    /// Density kernel: `(r - d)^2 * 15 / (2 pi r^5)`.
    #[inline]
    pub fn density_kernel(&self, dst: f32) -> f32 {
        if dst < self.radius {
            let v = self.radius - dst;
            v * v * self.spiky_pow2
        } else {
            0.0
        }
    }

    /// Near-density kernel: `(r - d)^3 * 15 / (pi r^6)`.
    #[inline]
    pub fn near_density_kernel(&self, dst: f32) -> f32 {
        if dst < self.radius {
            let v = self.radius - dst;
            v * v * v * self.spiky_pow3
        } else {
            0.0
        }
    }

    /// d/dd of [`SmoothingConstants::density_kernel`]; non-positive.
    #[inline]
    pub fn density_derivative(&self, dst: f32) -> f32 {
        if dst <= self.radius {
            -(self.radius - dst) * self.spiky_pow2_derivative
        } else {
            0.0
        }
    }

    /// d/dd of [`SmoothingConstants::near_density_kernel`]; non-positive.
    #[inline]
    pub fn near_density_derivative(&self, dst: f32) -> f32 {
        if dst <= self.radius {
            let v = self.radius - dst;
            -v * v * self.spiky_pow3_derivative
        } else {
            0.0
        }
    }

    /// Viscosity kernel: `(r^2 - d^2)^3 * 315 / (64 pi r^9)`.
    #[inline]
    pub fn viscosity_kernel(&self, dst: f32) -> f32 {
        if dst < self.radius {
            let v = self.radius * self.radius - dst * dst;
            v * v * v * self.poly6
        } else {
            0.0
        }
    }
}

/// Pressure from density deviation: `(rho - rho0) * k`.
#[inline]
pub fn pressure_from_density(density: f32, target_density: f32, pressure_multiplier: f32) -> f32 {
    (density - target_density) * pressure_multiplier
}

/// Near pressure: `k_near * rho_near`.
#[inline]
pub fn near_pressure_from_density(near_density: f32, near_pressure_multiplier: f32) -> f32 {
    near_pressure_multiplier * near_density
}

/// Map `value` from `[min, max]` to `[0, 1]`, clamped.
#[inline]
pub fn remap01(value: f32, min: f32, max: f32) -> f32 {
    ((value - min) / (max - min)).clamp(0.0, 1.0)
}
