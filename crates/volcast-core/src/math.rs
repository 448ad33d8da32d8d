//! Math utilities and helpers.

use glam::{Mat3, Mat4, Vec3, Vec4};

/// Axis-Aligned Bounding Box.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Aabb {
    /// Minimum corner
    pub min: Vec3,
    /// Maximum corner
    pub max: Vec3,
}

impl Aabb {
    /// Create a new AABB from min and max corners
    #[inline]
    pub const fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// Sample-point bounds of a grid with the given dimensions, `[0, dim - 1]`
    #[inline]
    pub fn from_dims(dims: [usize; 3]) -> Self {
        Self {
            min: Vec3::ZERO,
            max: Vec3::new(
                dims[0].saturating_sub(1) as f32,
                dims[1].saturating_sub(1) as f32,
                dims[2].saturating_sub(1) as f32,
            ),
        }
    }

    /// Box spanned by two arbitrary corners
    #[inline]
    pub fn from_corners(a: Vec3, b: Vec3) -> Self {
        Self {
            min: a.min(b),
            max: a.max(b),
        }
    }

    /// Get the center of the AABB
    #[inline]
    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    /// Get the size of the AABB
    #[inline]
    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }

    /// Check if a point is inside the AABB
    #[inline]
    pub fn contains_point(&self, point: Vec3) -> bool {
        point.cmpge(self.min).all() && point.cmple(self.max).all()
    }

    /// Overlap of two boxes, `None` when they are disjoint
    pub fn intersection(&self, other: &Self) -> Option<Self> {
        let min = self.min.max(other.min);
        let max = self.max.min(other.max);
        min.cmple(max).all().then_some(Self { min, max })
    }

    /// The eight corners, x varying fastest
    pub fn corners(&self) -> [Vec3; 8] {
        std::array::from_fn(|i| {
            Vec3::new(
                if i & 1 == 0 { self.min.x } else { self.max.x },
                if i & 2 == 0 { self.min.y } else { self.max.y },
                if i & 4 == 0 { self.min.z } else { self.max.z },
            )
        })
    }

    /// Corner index pairs forming the twelve edges of [`Aabb::corners`]
    pub const EDGES: [(usize, usize); 12] = [
        (0, 1),
        (1, 3),
        (2, 3),
        (0, 2),
        (4, 5),
        (5, 7),
        (6, 7),
        (4, 6),
        (0, 4),
        (1, 5),
        (3, 7),
        (2, 6),
    ];
}

/// Half-space `normal · p + d >= 0`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Plane {
    pub normal: Vec3,
    pub d: f32,
}

impl Plane {
    /// Plane through `origin` keeping the side `normal` points to.
    pub fn from_point_normal(origin: Vec3, normal: Vec3) -> Self {
        let normal = normal.normalize_or_zero();
        Self {
            normal,
            d: -normal.dot(origin),
        }
    }

    /// Point of the plane closest to the origin, `None` for a zero normal.
    #[inline]
    pub fn point(&self) -> Option<Vec3> {
        let len_sq = self.normal.length_squared();
        (len_sq > 0.0 && len_sq.is_finite()).then(|| self.normal * (-self.d / len_sq))
    }

    /// Signed distance (scaled by the normal length)
    #[inline]
    pub fn signed_distance(&self, point: Vec3) -> f32 {
        self.normal.dot(point) + self.d
    }

    /// Carry the plane through the affine map `forward`.
    ///
    /// `inverse` must be the inverse of `forward`. Normals transform with
    /// the transpose of the inverse map; the normal is renormalised.
    pub fn transform(&self, forward: Mat4, inverse: Mat4, origin: Vec3) -> Self {
        let normal = Mat3::from_mat4(inverse).transpose() * self.normal;
        Self::from_point_normal(forward.transform_point3(origin), normal)
    }
}

/// Transform a point through a projective matrix with homogeneous divide.
///
/// Returns `None` when `w` is zero.
#[inline]
pub fn transform_homogeneous(m: Mat4, p: Vec3) -> Option<Vec3> {
    let h = m * Vec4::new(p.x, p.y, p.z, 1.0);
    (h.w != 0.0).then(|| h.truncate() / h.w)
}
