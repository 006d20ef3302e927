//! Frustum math used by shadow cascade assembly and scene tracing.

use glam::{Mat4, Vec3, Vec4};

/// Axis-aligned bounding box in world space.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    #[must_use]
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// The tightest box around a world-space sphere `(center, radius)`.
    #[must_use]
    pub fn from_sphere(sphere: Vec4) -> Self {
        let center = sphere.truncate();
        let radius = Vec3::splat(sphere.w);
        Self {
            min: center - radius,
            max: center + radius,
        }
    }

    #[must_use]
    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }
}

/// Six view-frustum planes with inward-facing normals.
///
/// Extracted from a clip matrix row-wise (Gribb–Hartmann); a point is
/// inside when every plane evaluates non-negative.
#[derive(Clone, Copy, Debug)]
pub struct Frustum {
    planes: [Vec4; 6],
}

impl Frustum {
    /// Extracts planes from a view-projection matrix with 0..1 clip
    /// depth.
    #[must_use]
    pub fn from_matrix(view_projection: Mat4) -> Self {
        let m = view_projection.transpose();
        let rows = [m.x_axis, m.y_axis, m.z_axis, m.w_axis];
        let mut planes = [
            rows[3] + rows[0], // left
            rows[3] - rows[0], // right
            rows[3] + rows[1], // bottom
            rows[3] - rows[1], // top
            rows[2],           // near
            rows[3] - rows[2], // far
        ];
        for plane in &mut planes {
            let length = plane.truncate().length();
            if length > f32::EPSILON {
                *plane /= length;
            }
        }
        Self { planes }
    }

    #[must_use]
    pub fn contains_sphere(&self, center: Vec3, radius: f32) -> bool {
        self.planes
            .iter()
            .all(|plane| plane.truncate().dot(center) + plane.w >= -radius)
    }

    #[must_use]
    pub fn intersects_aabb(&self, aabb: &Aabb) -> bool {
        for plane in &self.planes {
            let normal = plane.truncate();
            // Farthest corner along the plane normal.
            let positive = Vec3::new(
                if normal.x >= 0.0 { aabb.max.x } else { aabb.min.x },
                if normal.y >= 0.0 { aabb.max.y } else { aabb.min.y },
                if normal.z >= 0.0 { aabb.max.z } else { aabb.min.z },
            );
            if normal.dot(positive) + plane.w < 0.0 {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_frustum() -> Frustum {
        // Orthographic box [-1, 1]^3.
        Frustum::from_matrix(Mat4::orthographic_rh(-1.0, 1.0, -1.0, 1.0, -1.0, 1.0))
    }

    #[test]
    fn sphere_containment() {
        let frustum = unit_frustum();
        assert!(frustum.contains_sphere(Vec3::ZERO, 0.5));
        assert!(frustum.contains_sphere(Vec3::new(1.2, 0.0, 0.0), 0.5));
        assert!(!frustum.contains_sphere(Vec3::new(5.0, 0.0, 0.0), 0.5));
    }

    #[test]
    fn aabb_intersection() {
        let frustum = unit_frustum();
        assert!(frustum.intersects_aabb(&Aabb::new(Vec3::splat(-0.5), Vec3::splat(0.5))));
        assert!(frustum.intersects_aabb(&Aabb::new(Vec3::new(0.9, -0.1, -0.1), Vec3::new(2.0, 0.1, 0.1))));
        assert!(!frustum.intersects_aabb(&Aabb::new(Vec3::splat(3.0), Vec3::splat(4.0))));
    }

    #[test]
    fn aabb_from_sphere_is_tight() {
        let aabb = Aabb::from_sphere(Vec4::new(1.0, 2.0, 3.0, 0.5));
        assert_eq!(aabb.min, Vec3::new(0.5, 1.5, 2.5));
        assert_eq!(aabb.max, Vec3::new(1.5, 2.5, 3.5));
        assert_eq!(aabb.center(), Vec3::new(1.0, 2.0, 3.0));
    }
}
