//! Projective transforms and a RANSAC DLT solver.

use nalgebra::{DMatrix, Matrix3, SymmetricEigen, Vector3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::{GeometryDegenerate, HomographySolver};

/// 3×3 projective transform, normalised so `h[(2,2)] == 1` when possible.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Homography(pub Matrix3<f64>);

impl Homography {
    pub fn identity() -> Self {
        Self(Matrix3::identity())
    }

    pub fn translation(dx: f64, dy: f64) -> Self {
        Self(Matrix3::new(1.0, 0.0, dx, 0.0, 1.0, dy, 0.0, 0.0, 1.0))
    }

    /// Map a point. `None` when it lands on the line at infinity.
    pub fn project(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        let p = self.0 * Vector3::new(x, y, 1.0);
        if p[2].abs() < 1e-12 {
            return None;
        }
        Some((p[0] / p[2], p[1] / p[2]))
    }

    pub fn inverse(&self) -> Option<Self> {
        self.0.try_inverse().map(Self)
    }

    /// Largest displacement of the four image corners under this transform.
    ///
    /// Zero for the identity; used to judge how close a fit is to a no-op.
    pub fn corner_displacement(&self, width: u32, height: u32) -> f64 {
        let (w, h) = (width as f64, height as f64);
        [(0.0, 0.0), (w, 0.0), (w, h), (0.0, h)]
            .iter()
            .map(|&(x, y)| match self.project(x, y) {
                Some((px, py)) => ((px - x).powi(2) + (py - y).powi(2)).sqrt(),
                None => f64::INFINITY,
            })
            .fold(0.0, f64::max)
    }

    fn is_finite(&self) -> bool {
        self.0.iter().all(|v| v.is_finite())
    }
}

fn reprojection_error(h: &Homography, src: (f64, f64), dst: (f64, f64)) -> f64 {
    match h.project(src.0, src.1) {
        Some((x, y)) => ((x - dst.0).powi(2) + (y - dst.1).powi(2)).sqrt(),
        None => f64::INFINITY,
    }
}

/// Translate the centroid to the origin and scale mean distance to sqrt(2).
fn normalize_points(pts: &[(f64, f64)]) -> (Matrix3<f64>, Vec<(f64, f64)>) {
    let n = pts.len() as f64;
    let cx = pts.iter().map(|p| p.0).sum::<f64>() / n;
    let cy = pts.iter().map(|p| p.1).sum::<f64>() / n;
    let mean_dist = pts
        .iter()
        .map(|p| ((p.0 - cx).powi(2) + (p.1 - cy).powi(2)).sqrt())
        .sum::<f64>()
        / n;
    let s = if mean_dist > 1e-12 {
        std::f64::consts::SQRT_2 / mean_dist
    } else {
        1.0
    };
    let t = Matrix3::new(s, 0.0, -s * cx, 0.0, s, -s * cy, 0.0, 0.0, 1.0);
    let normalized = pts.iter().map(|p| (s * (p.0 - cx), s * (p.1 - cy))).collect();
    (t, normalized)
}

/// Direct linear transform from at least four correspondences.
pub fn estimate_dlt(src: &[(f64, f64)], dst: &[(f64, f64)]) -> Result<Homography, GeometryDegenerate> {
    let n = src.len();
    if n < 4 || dst.len() != n {
        return Err(GeometryDegenerate::InsufficientMatches {
            found: n.min(dst.len()),
            required: 4,
        });
    }

    let (t_src, src_n) = normalize_points(src);
    let (t_dst, dst_n) = normalize_points(dst);

    let mut a = DMatrix::zeros(2 * n, 9);
    for i in 0..n {
        let (sx, sy) = src_n[i];
        let (dx, dy) = dst_n[i];

        a[(2 * i, 3)] = -sx;
        a[(2 * i, 4)] = -sy;
        a[(2 * i, 5)] = -1.0;
        a[(2 * i, 6)] = dy * sx;
        a[(2 * i, 7)] = dy * sy;
        a[(2 * i, 8)] = dy;

        a[(2 * i + 1, 0)] = sx;
        a[(2 * i + 1, 1)] = sy;
        a[(2 * i + 1, 2)] = 1.0;
        a[(2 * i + 1, 6)] = -dx * sx;
        a[(2 * i + 1, 7)] = -dx * sy;
        a[(2 * i + 1, 8)] = -dx;
    }

    // Null vector of A = eigenvector of AᵀA with the smallest eigenvalue
    let eig = SymmetricEigen::new(a.transpose() * &a);
    let min_idx = eig
        .eigenvalues
        .iter()
        .enumerate()
        .min_by(|x, y| x.1.abs().total_cmp(&y.1.abs()))
        .map(|(i, _)| i)
        .unwrap_or(0);
    let v = eig.eigenvectors.column(min_idx);
    let h_norm = Matrix3::new(v[0], v[1], v[2], v[3], v[4], v[5], v[6], v[7], v[8]);

    let t_dst_inv = t_dst
        .try_inverse()
        .ok_or_else(|| GeometryDegenerate::SolveFailed("normalisation not invertible".into()))?;
    let h = t_dst_inv * h_norm * t_src;

    let scale = h[(2, 2)];
    let h = if scale.abs() > 1e-12 { h / scale } else { h };
    let h = Homography(h);
    if !h.is_finite() || h.0.determinant().abs() < 1e-12 {
        return Err(GeometryDegenerate::SolveFailed("degenerate point configuration".into()));
    }
    Ok(h)
}

#[derive(Debug, Clone, PartialEq)]
pub struct RansacConfig {
    pub max_iters: usize,
    /// Reprojection error in pixels below which a pair is an inlier
    pub inlier_threshold: f64,
    pub min_inliers: usize,
    pub seed: u64,
}

impl Default for RansacConfig {
    fn default() -> Self {
        Self {
            max_iters: 2000,
            inlier_threshold: 5.0,
            min_inliers: 4,
            seed: 0,
        }
    }
}

/// RANSAC over four-point DLT fits, refit on the best inlier set.
#[derive(Debug, Clone, Default)]
pub struct RansacHomographySolver {
    config: RansacConfig,
}

impl RansacHomographySolver {
    pub fn new(config: RansacConfig) -> Self {
        Self { config }
    }

    fn inliers(&self, h: &Homography, src: &[(f64, f64)], dst: &[(f64, f64)]) -> Vec<bool> {
        src.iter()
            .zip(dst)
            .map(|(&s, &d)| reprojection_error(h, s, d) < self.config.inlier_threshold)
            .collect()
    }
}

impl HomographySolver for RansacHomographySolver {
    fn name(&self) -> &'static str {
        "ransac-dlt"
    }

    fn solve(&self, src: &[(f64, f64)], dst: &[(f64, f64)]) -> Result<Homography, GeometryDegenerate> {
        let n = src.len();
        if n < 4 || dst.len() != n {
            return Err(GeometryDegenerate::InsufficientMatches {
                found: n.min(dst.len()),
                required: 4,
            });
        }

        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let mut best: Option<(usize, Vec<bool>)> = None;

        for _ in 0..self.config.max_iters {
            let sample = sample_distinct(&mut rng, n);
            let s4: Vec<_> = sample.iter().map(|&i| src[i]).collect();
            let d4: Vec<_> = sample.iter().map(|&i| dst[i]).collect();
            let Ok(h) = estimate_dlt(&s4, &d4) else {
                continue;
            };

            let mask = self.inliers(&h, src, dst);
            let count = mask.iter().filter(|&&m| m).count();
            if best.as_ref().map_or(true, |(c, _)| count > *c) {
                let done = count * 10 > n * 9;
                best = Some((count, mask));
                if done {
                    break;
                }
            }
        }

        let (count, mask) = best.ok_or_else(|| GeometryDegenerate::SolveFailed("no valid minimal sample".into()))?;
        if count < self.config.min_inliers.max(4) {
            return Err(GeometryDegenerate::SolveFailed(format!(
                "only {count} inliers of {n}"
            )));
        }

        let (in_src, in_dst): (Vec<_>, Vec<_>) = src
            .iter()
            .zip(dst)
            .zip(&mask)
            .filter(|(_, &m)| m)
            .map(|((&s, &d), _)| (s, d))
            .unzip();
        estimate_dlt(&in_src, &in_dst)
    }
}

fn sample_distinct(rng: &mut StdRng, n: usize) -> [usize; 4] {
    let mut out = [0usize; 4];
    let mut filled = 0;
    while filled < 4 {
        let candidate = rng.random_range(0..n);
        if !out[..filled].contains(&candidate) {
            out[filled] = candidate;
            filled += 1;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn perspective() -> Homography {
        Homography(Matrix3::new(1.05, 0.02, 14.0, -0.01, 0.98, -6.0, 0.0001, -0.00005, 1.0))
    }

    fn grid() -> Vec<(f64, f64)> {
        (0..6)
            .flat_map(|i| (0..5).map(move |j| (i as f64 * 40.0, j as f64 * 30.0)))
            .collect()
    }

    #[test]
    fn test_dlt_recovers_exact_transform() {
        let truth = perspective();
        let src = grid();
        let dst: Vec<_> = src.iter().map(|&(x, y)| truth.project(x, y).unwrap()).collect();
        let h = estimate_dlt(&src, &dst).unwrap();
        for (&s, &d) in src.iter().zip(&dst) {
            assert!(reprojection_error(&h, s, d) < 1e-6);
        }
    }

    #[test]
    fn test_ransac_rejects_outliers() {
        let truth = Homography::translation(-7.0, 3.0);
        let src = grid();
        let mut dst: Vec<_> = src.iter().map(|&(x, y)| truth.project(x, y).unwrap()).collect();
        for (i, d) in dst.iter_mut().enumerate().take(6) {
            *d = (d.0 + 80.0 + i as f64 * 13.0, d.1 - 45.0);
        }
        let h = RansacHomographySolver::default().solve(&src, &dst).unwrap();
        let (x, y) = h.project(100.0, 50.0).unwrap();
        assert!((x - 93.0).abs() < 1e-6 && (y - 53.0).abs() < 1e-6);
    }

    #[test]
    fn test_too_few_points() {
        let pts = vec![(0.0, 0.0), (1.0, 0.0), (0.0, 1.0)];
        assert!(matches!(
            RansacHomographySolver::default().solve(&pts, &pts),
            Err(GeometryDegenerate::InsufficientMatches { found: 3, .. })
        ));
    }

    #[test]
    fn test_corner_displacement() {
        assert_eq!(Homography::identity().corner_displacement(100, 50), 0.0);
        let d = Homography::translation(3.0, 4.0).corner_displacement(100, 50);
        assert!((d - 5.0).abs() < 1e-12);
    }
}
