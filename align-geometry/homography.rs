//! Projective transforms between image planes.
//!
//! A [`Homography`] maps source pixel coordinates onto reference pixel
//! coordinates. Matrices are kept normalized so the bottom-right entry is 1,
//! or the largest entry is 1 in magnitude when the bottom-right entry is 0.

use align_core::{Correspondence, Point2};
use nalgebra::{DMatrix, Matrix3, SMatrix, SVector, SVD};

use crate::error::{GeometryError, GeometryResult};

const EPS: f64 = 1e-12;

/// 3x3 projective transform, source -> reference
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Homography {
    m: Matrix3<f64>,
}

impl Default for Homography {
    fn default() -> Self {
        Self::identity()
    }
}

impl Homography {
    pub fn identity() -> Self {
        Self {
            m: Matrix3::identity(),
        }
    }

    pub fn translation(dx: f64, dy: f64) -> Self {
        Self {
            m: Matrix3::new(1.0, 0.0, dx, 0.0, 1.0, dy, 0.0, 0.0, 1.0),
        }
    }

    /// Normalize `m` so `m[(2, 2)] == 1` and validate it. When `m[(2, 2)]`
    /// is zero the largest-magnitude entry is scaled to 1 instead.
    pub fn from_matrix(m: Matrix3<f64>) -> GeometryResult<Self> {
        let scale = if m[(2, 2)].abs() >= EPS {
            m[(2, 2)]
        } else {
            m.iter().copied().fold(0.0, |a: f64, v| if v.abs() > a.abs() { v } else { a })
        };
        if !scale.is_finite() || scale.abs() < EPS {
            return Err(GeometryError::SingularHomography);
        }
        let m = m / scale;
        if m.iter().any(|v| !v.is_finite()) || m.determinant().abs() < EPS {
            return Err(GeometryError::SingularHomography);
        }
        Ok(Self { m })
    }

    /// Build from nine row-major coefficients.
    pub fn from_array(values: [f64; 9]) -> GeometryResult<Self> {
        Self::from_matrix(Matrix3::from_row_slice(&values))
    }

    pub fn matrix(&self) -> &Matrix3<f64> {
        &self.m
    }

    /// Row-major coefficients
    pub fn to_array(&self) -> [f64; 9] {
        let mut out = [0.0; 9];
        for r in 0..3 {
            for c in 0..3 {
                out[r * 3 + c] = self.m[(r, c)];
            }
        }
        out
    }

    #[inline]
    pub fn apply_xy(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        let m = &self.m;
        let w = m[(2, 0)] * x + m[(2, 1)] * y + m[(2, 2)];
        if !w.is_finite() || w.abs() < EPS {
            return None;
        }
        let u = (m[(0, 0)] * x + m[(0, 1)] * y + m[(0, 2)]) / w;
        let v = (m[(1, 0)] * x + m[(1, 1)] * y + m[(1, 2)]) / w;
        if u.is_finite() && v.is_finite() {
            Some((u, v))
        } else {
            None
        }
    }

    /// Map a point, or `None` when it lands on the line at infinity.
    pub fn apply(&self, p: Point2) -> Option<Point2> {
        self.apply_xy(p.x, p.y).map(|(x, y)| Point2::new(x, y))
    }

    pub fn inverse(&self) -> GeometryResult<Homography> {
        let inv = self
            .m
            .try_inverse()
            .ok_or(GeometryError::SingularHomography)?;
        Self::from_matrix(inv)
    }

    pub fn compose(&self, other: &Homography) -> GeometryResult<Homography> {
        Self::from_matrix(self.m * other.m)
    }

    /// Distance between the mapped source point and its reference point.
    pub fn reprojection_error(&self, c: &Correspondence) -> f64 {
        match self.apply(c.source) {
            Some(p) => p.distance(&c.reference),
            None => f64::INFINITY,
        }
    }

    /// Exact transform through four point pairs (8x8 linear solve).
    pub fn from_four_points(src: &[Point2; 4], dst: &[Point2; 4]) -> Option<Self> {
        let src_norm = Normalization::of(src);
        let dst_norm = Normalization::of(dst);

        let mut a = SMatrix::<f64, 8, 8>::zeros();
        let mut b = SVector::<f64, 8>::zeros();
        for i in 0..4 {
            let (x, y) = src_norm.apply(src[i]);
            let (u, v) = dst_norm.apply(dst[i]);
            let r = 2 * i;
            a[(r, 0)] = x;
            a[(r, 1)] = y;
            a[(r, 2)] = 1.0;
            a[(r, 6)] = -u * x;
            a[(r, 7)] = -u * y;
            b[r] = u;
            a[(r + 1, 3)] = x;
            a[(r + 1, 4)] = y;
            a[(r + 1, 5)] = 1.0;
            a[(r + 1, 6)] = -v * x;
            a[(r + 1, 7)] = -v * y;
            b[r + 1] = v;
        }

        let h = a.lu().solve(&b)?;
        let h_norm = Matrix3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], 1.0);
        Self::denormalize(h_norm, &src_norm, &dst_norm)
    }

    /// Least-squares fit over any number (>= 4) of point pairs.
    ///
    /// Normalized DLT: the homogeneous system `A h = 0` is solved through the
    /// SVD of the full 2n x 9 design matrix.
    pub fn fit_least_squares(src: &[Point2], dst: &[Point2]) -> Option<Self> {
        let n = src.len();
        if n < 4 || dst.len() != n {
            return None;
        }
        let src_norm = Normalization::of(src);
        let dst_norm = Normalization::of(dst);

        // Pad to at least 9 rows: the thin SVD would otherwise drop the null vector.
        let rows = (2 * n).max(9);
        let mut a = DMatrix::<f64>::zeros(rows, 9);
        for i in 0..n {
            let (x, y) = src_norm.apply(src[i]);
            let (u, v) = dst_norm.apply(dst[i]);
            let r = 2 * i;
            a[(r, 0)] = -x;
            a[(r, 1)] = -y;
            a[(r, 2)] = -1.0;
            a[(r, 6)] = u * x;
            a[(r, 7)] = u * y;
            a[(r, 8)] = u;
            a[(r + 1, 3)] = -x;
            a[(r + 1, 4)] = -y;
            a[(r + 1, 5)] = -1.0;
            a[(r + 1, 6)] = v * x;
            a[(r + 1, 7)] = v * y;
            a[(r + 1, 8)] = v;
        }

        let svd = SVD::new(a, false, true);
        let v_t = svd.v_t?;
        let smallest = svd.singular_values.imin();
        let h = v_t.row(smallest);
        let h_norm = Matrix3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], h[8]);
        Self::denormalize(h_norm, &src_norm, &dst_norm)
    }

    /// Least-squares fit over correspondences.
    pub fn from_correspondences(correspondences: &[Correspondence]) -> GeometryResult<Self> {
        if correspondences.len() < 4 {
            return Err(GeometryError::InsufficientCorrespondences {
                found: correspondences.len(),
                required: 4,
            });
        }
        let (src, dst): (Vec<Point2>, Vec<Point2>) = correspondences
            .iter()
            .map(|c| (c.source, c.reference))
            .unzip();
        Self::fit_least_squares(&src, &dst).ok_or(GeometryError::SingularHomography)
    }

    // H = T_dst^-1 * H_norm * T_src
    fn denormalize(
        h_norm: Matrix3<f64>,
        src_norm: &Normalization,
        dst_norm: &Normalization,
    ) -> Option<Self> {
        let m = dst_norm.inverse_matrix() * h_norm * src_norm.matrix();
        Self::from_matrix(m).ok()
    }
}

/// Similarity moving the centroid to the origin with mean distance sqrt(2).
#[derive(Debug, Clone, Copy)]
struct Normalization {
    cx: f64,
    cy: f64,
    scale: f64,
}

impl Normalization {
    fn of(points: &[Point2]) -> Self {
        let n = points.len().max(1) as f64;
        let (sx, sy) = points
            .iter()
            .fold((0.0, 0.0), |(sx, sy), p| (sx + p.x, sy + p.y));
        let (cx, cy) = (sx / n, sy / n);
        let centroid = Point2::new(cx, cy);
        let mean_dist = points.iter().map(|p| p.distance(&centroid)).sum::<f64>() / n;
        let scale = if mean_dist > EPS {
            std::f64::consts::SQRT_2 / mean_dist
        } else {
            1.0
        };
        Self { cx, cy, scale }
    }

    #[inline]
    fn apply(&self, p: Point2) -> (f64, f64) {
        ((p.x - self.cx) * self.scale, (p.y - self.cy) * self.scale)
    }

    fn matrix(&self) -> Matrix3<f64> {
        let s = self.scale;
        Matrix3::new(s, 0.0, -s * self.cx, 0.0, s, -s * self.cy, 0.0, 0.0, 1.0)
    }

    fn inverse_matrix(&self) -> Matrix3<f64> {
        let inv = 1.0 / self.scale;
        Matrix3::new(inv, 0.0, self.cx, 0.0, inv, self.cy, 0.0, 0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn known() -> Homography {
        Homography::from_array([1.02, 0.03, 5.0, -0.02, 0.98, -3.0, 1e-5, -2e-5, 1.0]).unwrap()
    }

    fn square() -> [Point2; 4] {
        [
            Point2::new(10.0, 10.0),
            Point2::new(300.0, 20.0),
            Point2::new(290.0, 250.0),
            Point2::new(15.0, 240.0),
        ]
    }

    #[test]
    fn test_identity_apply() {
        let h = Homography::identity();
        let p = h.apply(Point2::new(12.5, -3.0)).unwrap();
        assert_eq!(p, Point2::new(12.5, -3.0));
    }

    #[test]
    fn test_from_matrix_normalizes_scale() {
        let m = Matrix3::new(2.0, 0.0, 4.0, 0.0, 2.0, 6.0, 0.0, 0.0, 2.0);
        let h = Homography::from_matrix(m).unwrap();
        assert_eq!(h.to_array(), [1.0, 0.0, 2.0, 0.0, 1.0, 3.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_singular_matrix_rejected() {
        let m = Matrix3::new(1.0, 2.0, 3.0, 2.0, 4.0, 6.0, 0.0, 0.0, 1.0);
        assert_eq!(
            Homography::from_matrix(m),
            Err(GeometryError::SingularHomography)
        );
        assert!(Homography::from_array([0.0; 9]).is_err());
    }

    #[test]
    fn test_inverse_round_trip() {
        let h = known();
        let inv = h.inverse().unwrap();
        let p = Point2::new(123.0, 45.0);
        let back = inv.apply(h.apply(p).unwrap()).unwrap();
        assert!(back.distance(&p) < 1e-9);
    }

    #[test]
    fn test_inverse_with_vanishing_corner() {
        // Invertible, but the inverse has a zero bottom-right entry
        let h = Homography::from_array([0.0, 0.0, 1.0, 0.0, 1.0, 0.0, 1.0, 0.0, 1.0]).unwrap();
        let inv = h.inverse().unwrap();
        assert!(inv.matrix()[(2, 2)].abs() < 1e-12);

        let p = Point2::new(2.0, 3.0);
        let back = inv.apply(h.apply(p).unwrap()).unwrap();
        assert!(back.distance(&p) < 1e-9);

        let product = h.compose(&inv).unwrap();
        for (a, b) in product.to_array().iter().zip(Homography::identity().to_array()) {
            assert!((a - b).abs() < 1e-12);
        }
    }

    #[test]
    fn test_four_point_solve_is_exact() {
        let h = known();
        let src = square();
        let dst = src.map(|p| h.apply(p).unwrap());

        let est = Homography::from_four_points(&src, &dst).unwrap();
        for (s, d) in src.iter().zip(dst.iter()) {
            let p = est.apply(*s).unwrap();
            assert!(p.distance(d) < 1e-8, "{:?} vs {:?}", p, d);
        }
        for (a, b) in est.to_array().iter().zip(h.to_array().iter()) {
            assert!((a - b).abs() < 1e-8);
        }
    }

    #[test]
    fn test_four_point_solve_rejects_coincident_points() {
        let src = [Point2::new(5.0, 5.0); 4];
        let dst = square();
        assert!(Homography::from_four_points(&src, &dst).is_none());
    }

    #[test]
    fn test_least_squares_matches_known_transform() {
        let h = known();
        let mut src = Vec::new();
        for gy in 0..6 {
            for gx in 0..8 {
                src.push(Point2::new(20.0 + gx as f64 * 40.0, 15.0 + gy as f64 * 35.0));
            }
        }
        let dst: Vec<Point2> = src.iter().map(|p| h.apply(*p).unwrap()).collect();

        let est = Homography::fit_least_squares(&src, &dst).unwrap();
        for (s, d) in src.iter().zip(dst.iter()) {
            assert!(est.apply(*s).unwrap().distance(d) < 1e-6);
        }
    }

    #[test]
    fn test_least_squares_with_four_points() {
        let h = Homography::translation(3.0, -2.0);
        let src = square();
        let dst = src.map(|p| h.apply(p).unwrap());
        let est = Homography::fit_least_squares(&src, &dst).unwrap();
        for (s, d) in src.iter().zip(dst.iter()) {
            assert!(est.apply(*s).unwrap().distance(d) < 1e-8);
        }
    }

    #[test]
    fn test_from_correspondences_requires_four() {
        let c = Correspondence::new(Point2::new(0.0, 0.0), Point2::new(1.0, 1.0), 0.0);
        assert_eq!(
            Homography::from_correspondences(&[c, c, c]),
            Err(GeometryError::InsufficientCorrespondences {
                found: 3,
                required: 4
            })
        );
    }

    #[test]
    fn test_reprojection_error() {
        let h = Homography::translation(1.0, 0.0);
        let c = Correspondence::new(Point2::new(0.0, 0.0), Point2::new(4.0, 3.0), 0.0);
        assert!((h.reprojection_error(&c) - (9.0f64 + 9.0).sqrt()).abs() < 1e-12);
    }
}
