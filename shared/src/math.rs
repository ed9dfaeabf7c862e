use serde::{Deserialize, Serialize};

/// Vector in 3D space. Y is up.
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

    ///Returns the magnitude of the vector.
    pub fn magnitude(&self) -> f32 {
        self.dot(self).sqrt()
    }

    ///Returns the normalized vector, or zero for a zero vector.
    pub fn normalize(&self) -> Vec3 {
        let mag = self.magnitude();
        if mag <= f32::EPSILON {
            Vec3::ZERO
        } else {
            self.scale(1.0 / mag)
        }
    }

    pub fn scale(&self, scalar: f32) -> Vec3 {
        Vec3::new(self.x * scalar, self.y * scalar, self.z * scalar)
    }

    pub fn add(&self, other: &Vec3) -> Vec3 {
        Vec3::new(self.x + other.x, self.y + other.y, self.z + other.z)
    }

    pub fn sub(&self, other: &Vec3) -> Vec3 {
        Vec3::new(self.x - other.x, self.y - other.y, self.z - other.z)
    }

    pub fn dot(&self, other: &Vec3) -> f32 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    /// Horizontal (XZ plane) part of the vector
    pub fn flat(&self) -> Vec3 {
        Vec3::new(self.x, 0.0, self.z)
    }

    /// Removes the component along `normal`, keeping the vector on the plane.
    pub fn project_on_plane(&self, normal: &Vec3) -> Vec3 {
        let n = normal.normalize();
        self.sub(&n.scale(self.dot(&n)))
    }

    pub fn distance(&self, other: &Vec3) -> f32 {
        self.sub(other).magnitude()
    }
}

/// Unit quaternion, used for yaw-only player facing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quat {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub w: f32,
}

impl Default for Quat {
    fn default() -> Self {
        Quat::IDENTITY
    }
}

impl Quat {
    pub const IDENTITY: Quat = Quat {
        x: 0.0,
        y: 0.0,
        z: 0.0,
        w: 1.0,
    };

    /// Rotation about the up axis, radians.
    pub fn from_yaw(yaw: f32) -> Quat {
        let half = yaw * 0.5;
        Quat {
            x: 0.0,
            y: half.sin(),
            z: 0.0,
            w: half.cos(),
        }
    }

    /// Rotation that faces the horizontal direction `dir`.
    pub fn look_rotation(dir: &Vec3) -> Quat {
        let flat = dir.flat().normalize();
        if flat == Vec3::ZERO {
            return Quat::IDENTITY;
        }
        Quat::from_yaw(flat.x.atan2(flat.z))
    }

    pub fn dot(&self, other: &Quat) -> f32 {
        self.x * other.x + self.y * other.y + self.z * other.z + self.w * other.w
    }

    pub fn normalize(&self) -> Quat {
        let mag = self.dot(self).sqrt();
        if mag <= f32::EPSILON {
            return Quat::IDENTITY;
        }
        Quat {
            x: self.x / mag,
            y: self.y / mag,
            z: self.z / mag,
            w: self.w / mag,
        }
    }

    /// Spherical interpolation along the shortest arc, `t` clamped to [0, 1].
    pub fn slerp(&self, target: &Quat, t: f32) -> Quat {
        let t = t.clamp(0.0, 1.0);
        let mut to = *target;
        let mut cos_theta = self.dot(target);
        if cos_theta < 0.0 {
            to = Quat {
                x: -to.x,
                y: -to.y,
                z: -to.z,
                w: -to.w,
            };
            cos_theta = -cos_theta;
        }

        // Nearly parallel: fall back to normalized lerp
        if cos_theta > 0.9995 {
            return Quat {
                x: self.x + (to.x - self.x) * t,
                y: self.y + (to.y - self.y) * t,
                z: self.z + (to.z - self.z) * t,
                w: self.w + (to.w - self.w) * t,
            }
            .normalize();
        }

        let theta = cos_theta.acos();
        let sin_theta = theta.sin();
        let a = ((1.0 - t) * theta).sin() / sin_theta;
        let b = (t * theta).sin() / sin_theta;
        Quat {
            x: self.x * a + to.x * b,
            y: self.y * a + to.y * b,
            z: self.z * a + to.z * b,
            w: self.w * a + to.w * b,
        }
    }

    /// Forward (+Z) direction rotated by this quaternion, yaw only.
    pub fn forward(&self) -> Vec3 {
        let yaw = 2.0 * self.y.atan2(self.w);
        Vec3::new(yaw.sin(), 0.0, yaw.cos())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_normalize_zero_vector() {
        assert_eq!(Vec3::ZERO.normalize(), Vec3::ZERO);
    }

    #[test]
    fn test_project_on_plane_removes_normal_component() {
        let slope = Vec3::new(0.0, 1.0, -1.0).normalize();
        let projected = Vec3::FORWARD.project_on_plane(&slope);
        assert_approx_eq!(projected.dot(&slope), 0.0, 1e-5);
        assert!(projected.y > 0.0);
    }

    #[test]
    fn test_look_rotation_forward_roundtrip() {
        let dir = Vec3::new(1.0, 0.0, 0.0);
        let q = Quat::look_rotation(&dir);
        let forward = q.forward();
        assert_approx_eq!(forward.x, 1.0, 1e-5);
        assert_approx_eq!(forward.z, 0.0, 1e-5);
    }

    #[test]
    fn test_slerp_endpoints_and_midpoint() {
        let a = Quat::from_yaw(0.0);
        let b = Quat::from_yaw(std::f32::consts::FRAC_PI_2);

        assert_eq!(a.slerp(&b, 0.0), a);
        let end = a.slerp(&b, 1.0);
        assert_approx_eq!(end.dot(&b), 1.0, 1e-5);

        let mid = a.slerp(&b, 0.5).forward();
        let expected = Quat::from_yaw(std::f32::consts::FRAC_PI_4).forward();
        assert_approx_eq!(mid.x, expected.x, 1e-4);
        assert_approx_eq!(mid.z, expected.z, 1e-4);
    }
}
