//! Minimal 3D vector math used by the simulation and the wire format

use serde::{Deserialize, Serialize};
use std::ops::{Add, AddAssign, Mul, Neg, Sub};

/// Vectors shorter than this are treated as zero when normalizing
pub const EPSILON: f32 = 1e-6;

/// A 3D vector with basic geometric operations
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Vec3 = Vec3::new(0.0, 0.0, 0.0);
    pub const UP: Vec3 = Vec3::new(0.0, 1.0, 0.0);
    pub const FORWARD: Vec3 = Vec3::new(0.0, 0.0, 1.0);

    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn dot(self, other: Vec3) -> f32 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    pub fn magnitude(self) -> f32 {
        self.dot(self).sqrt()
    }

    /// Returns a unit vector in the same direction, or zero for degenerate input
    pub fn normalize(self) -> Vec3 {
        let mag = self.magnitude();
        if mag > EPSILON {
            self.scale(1.0 / mag)
        } else {
            Vec3::ZERO
        }
    }

    pub fn scale(self, factor: f32) -> Vec3 {
        Vec3::new(self.x * factor, self.y * factor, self.z * factor)
    }

    pub fn distance(self, other: Vec3) -> f32 {
        (self - other).magnitude()
    }

    /// Drops the vertical component
    pub fn flatten(self) -> Vec3 {
        Vec3::new(self.x, 0.0, self.z)
    }

    pub fn is_zero(self) -> bool {
        self.magnitude() <= EPSILON
    }

    /// Clamps the length to at most `max`
    pub fn clamp_length(self, max: f32) -> Vec3 {
        let mag = self.magnitude();
        if mag > max && mag > EPSILON {
            self.scale(max / mag)
        } else {
            self
        }
    }

    pub fn approx_eq(self, other: Vec3, tolerance: f32) -> bool {
        (self.x - other.x).abs() <= tolerance
            && (self.y - other.y).abs() <= tolerance
            && (self.z - other.z).abs() <= tolerance
    }
}

impl Add for Vec3 {
    type Output = Vec3;

    fn add(self, other: Vec3) -> Vec3 {
        Vec3::new(self.x + other.x, self.y + other.y, self.z + other.z)
    }
}

impl AddAssign for Vec3 {
    fn add_assign(&mut self, other: Vec3) {
        *self = *self + other;
    }
}

impl Sub for Vec3 {
    type Output = Vec3;

    fn sub(self, other: Vec3) -> Vec3 {
        Vec3::new(self.x - other.x, self.y - other.y, self.z - other.z)
    }
}

impl Mul<f32> for Vec3 {
    type Output = Vec3;

    fn mul(self, factor: f32) -> Vec3 {
        self.scale(factor)
    }
}

impl Neg for Vec3 {
    type Output = Vec3;

    fn neg(self) -> Vec3 {
        Vec3::new(-self.x, -self.y, -self.z)
    }
}

/// Reflects `direction` about the plane with the given surface normal: d' = d - 2(d·n)n
pub fn reflect(direction: Vec3, normal: Vec3) -> Vec3 {
    let n = normal.normalize();
    direction - n * (2.0 * direction.dot(n))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_normalize() {
        let v = Vec3::new(3.0, 0.0, 4.0).normalize();
        assert_approx_eq!(v.magnitude(), 1.0, 1e-6);
        assert_approx_eq!(v.x, 0.6, 1e-6);
        assert_approx_eq!(v.z, 0.8, 1e-6);
    }

    #[test]
    fn test_normalize_zero_vector() {
        assert_eq!(Vec3::ZERO.normalize(), Vec3::ZERO);
    }

    #[test]
    fn test_reflect_off_wall() {
        let reflected = reflect(Vec3::new(1.0, 0.0, 0.0), Vec3::new(-1.0, 0.0, 0.0));
        assert!(reflected.approx_eq(Vec3::new(-1.0, 0.0, 0.0), 1e-6));
    }

    #[test]
    fn test_reflect_parallel_to_surface_is_unchanged() {
        let d = Vec3::new(1.0, 0.0, 0.0);
        let reflected = reflect(d, Vec3::new(0.0, 0.0, 1.0));
        assert!(reflected.approx_eq(d, 1e-6));
    }

    #[test]
    fn test_reflect_preserves_length_and_flips_normal_component() {
        let directions = [
            Vec3::new(1.0, -1.0, 0.5),
            Vec3::new(-0.3, 0.2, 0.9),
            Vec3::new(0.0, -1.0, 0.0),
            Vec3::new(0.7, 0.1, -0.7),
        ];
        let normals = [
            Vec3::UP,
            Vec3::new(1.0, 1.0, 0.0),
            Vec3::new(0.0, 0.0, -1.0),
            Vec3::new(-0.2, 0.5, 0.8),
        ];

        for d in directions.iter().map(|d| d.normalize()) {
            for n in normals.iter().map(|n| n.normalize()) {
                let r = reflect(d, n);
                assert_approx_eq!(r.magnitude(), d.magnitude(), 1e-5);
                assert_approx_eq!(r.dot(n), -d.dot(n), 1e-5);
            }
        }
    }

    #[test]
    fn test_clamp_length() {
        let v = Vec3::new(0.0, 0.0, 10.0).clamp_length(2.0);
        assert_approx_eq!(v.magnitude(), 2.0, 1e-6);

        let short = Vec3::new(0.5, 0.0, 0.0);
        assert_eq!(short.clamp_length(2.0), short);
    }
}
