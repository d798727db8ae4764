//! # Similarity transforms

use nalgebra as na;
use std::ops::Mul;

/// 2D similarity transform.
///
/// Maps a point `p` to `scale * R(angle) * p + (dx, dy)`. Transforms form a closed group: they
/// compose with `*` (matrix order, the right-hand side is applied first) and invert exactly.
///
/// Points are expected in frame coordinates centered at the middle of the frame, so that
/// rotation and scale happen around the frame center.
///
/// # Examples
///
/// ```
/// # use assert_approx_eq::assert_approx_eq;
/// use nalgebra as na;
/// use vstab::transform::Transform;
///
/// let shift = Transform::translation(3.0, -1.0);
/// let turn = Transform::rotation(90f32.to_radians());
///
/// let p = (turn * shift).transform_point(na::Point2::new(1.0, 0.0));
///
/// assert_approx_eq!(p.x, 1.0f32, 1e-5);
/// assert_approx_eq!(p.y, 4.0f32, 1e-5);
/// ```
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Transform {
    pub dx: f32,
    pub dy: f32,
    /// Counter-clockwise rotation in radians. Never wrapped, so cumulative angles stay
    /// continuous.
    pub angle: f32,
    pub scale: f32,
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Transform {
    pub const IDENTITY: Self = Self {
        dx: 0.0,
        dy: 0.0,
        angle: 0.0,
        scale: 1.0,
    };

    pub fn new(dx: f32, dy: f32, angle: f32, scale: f32) -> Self {
        Self {
            dx,
            dy,
            angle,
            scale,
        }
    }

    pub fn translation(dx: f32, dy: f32) -> Self {
        Self {
            dx,
            dy,
            ..Self::IDENTITY
        }
    }

    pub fn rotation(angle: f32) -> Self {
        Self {
            angle,
            ..Self::IDENTITY
        }
    }

    pub fn scaling(scale: f32) -> Self {
        Self {
            scale,
            ..Self::IDENTITY
        }
    }

    /// Build a transform from `[dx, dy, angle, scale]` parameters.
    pub fn from_params([dx, dy, angle, scale]: [f32; 4]) -> Self {
        Self::new(dx, dy, angle, scale)
    }

    /// Get the `[dx, dy, angle, scale]` parameters.
    pub fn params(&self) -> [f32; 4] {
        [self.dx, self.dy, self.angle, self.scale]
    }

    pub fn translation_vector(&self) -> na::Vector2<f32> {
        na::Vector2::new(self.dx, self.dy)
    }

    fn linear(&self) -> na::Matrix2<f32> {
        na::Rotation2::new(self.angle).into_inner() * self.scale
    }

    /// Apply the transform to a point.
    pub fn transform_point(&self, p: na::Point2<f32>) -> na::Point2<f32> {
        na::Point2::from(self.linear() * p.coords + self.translation_vector())
    }

    /// Get the homogeneous 3x3 matrix of the transform.
    pub fn to_matrix(&self) -> na::Matrix3<f32> {
        let l = self.linear();
        na::matrix![
            l[(0, 0)], l[(0, 1)], self.dx;
            l[(1, 0)], l[(1, 1)], self.dy;
            0.0, 0.0, 1.0
        ]
    }

    /// Extract a similarity from the upper 2x3 part of a homogeneous matrix.
    ///
    /// Any shear or anisotropic scale is discarded.
    pub fn from_matrix(m: &na::Matrix3<f32>) -> Self {
        let a = (m[(0, 0)] + m[(1, 1)]) * 0.5;
        let b = (m[(1, 0)] - m[(0, 1)]) * 0.5;
        Self::new(m[(0, 2)], m[(1, 2)], b.atan2(a), a.hypot(b))
    }

    /// Apply `self` first, then `next`.
    pub fn then(&self, next: &Self) -> Self {
        *next * *self
    }

    /// Get the inverse transform.
    ///
    /// The scale must be non-zero.
    pub fn inverse(&self) -> Self {
        let inv_scale = 1.0 / self.scale;
        let t = na::Rotation2::new(-self.angle) * self.translation_vector() * -inv_scale;
        Self::new(t.x, t.y, -self.angle, inv_scale)
    }

    /// Check whether all parameters are within `eps` of the identity.
    pub fn is_identity(&self, eps: f32) -> bool {
        self.max_abs_diff(&Self::IDENTITY) <= eps
    }

    /// Largest absolute difference between parameters of two transforms.
    pub fn max_abs_diff(&self, other: &Self) -> f32 {
        self.params()
            .iter()
            .zip(other.params())
            .map(|(a, b)| (a - b).abs())
            .fold(0.0, f32::max)
    }

    /// Magnitude of the rotational and scaling part of the motion.
    ///
    /// Used as the prior when picking between equally good fits, smaller is preferred.
    pub fn motion_magnitude(&self) -> f32 {
        self.angle.abs() + self.scale.ln().abs()
    }

    /// Check that every parameter is finite and the scale is positive.
    pub fn is_valid(&self) -> bool {
        self.params().iter().all(|v| v.is_finite()) && self.scale > 0.0
    }
}

impl Mul for Transform {
    type Output = Transform;

    /// Compose two transforms, `rhs` is applied first.
    fn mul(self, rhs: Self) -> Self {
        let t = self.linear() * rhs.translation_vector() + self.translation_vector();
        Self::new(
            t.x,
            t.y,
            self.angle + rhs.angle,
            self.scale * rhs.scale,
        )
    }
}
