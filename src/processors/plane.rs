//! RANSAC plane fitting.
//!
//! Sample sets are drawn sequentially from one RNG (seedable for reproducible
//! runs) and the candidate planes are then scored in parallel with rayon. The
//! reduction prefers more inliers and, on a tie, the earlier trial, so the
//! result never depends on how rayon schedules the work.

use nalgebra::{Matrix3, SymmetricEigen, Vector3};
use rand::rngs::StdRng;
use rand::seq::index;
use rand::SeedableRng;
use rayon::prelude::*;

use crate::core::loaders::PointCloud;
use crate::error::{Result, SceneError};

/// Smallest sample that determines a plane.
pub const MIN_PLANE_SAMPLES: usize = 3;

/// Relative tolerance below which a sample is treated as collinear.
const DEGENERACY_EPS: f64 = 1e-10;

/// Plane `a*x + b*y + c*z + d = 0`.
///
/// Planes produced by `PlaneFitter` have a unit normal `(a, b, c)` whose
/// largest-magnitude component is positive, so a plane's orientation depends
/// only on its attitude and not on which side the sensor sees it from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Plane {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
}

impl Plane {
    /// Plane through three points, or `None` if they are (nearly) collinear.
    pub fn from_three_points(p0: [f64; 3], p1: [f64; 3], p2: [f64; 3]) -> Option<Self> {
        let p0 = Vector3::from(p0);
        let e1 = Vector3::from(p1) - p0;
        let e2 = Vector3::from(p2) - p0;
        let n = e1.cross(&e2);
        let scale = e1.norm() * e2.norm();
        if scale == 0.0 || n.norm() <= DEGENERACY_EPS * scale {
            return None;
        }
        Some(Self::from_normal_and_point(n.normalize(), p0))
    }

    /// Least-squares plane through `points` (normal = eigenvector of the
    /// smallest covariance eigenvalue), or `None` if the points are
    /// coincident or collinear.
    pub fn fit_least_squares(points: &[[f64; 3]]) -> Option<Self> {
        if points.len() < MIN_PLANE_SAMPLES {
            return None;
        }
        let n = points.len() as f64;
        let centroid = points
            .iter()
            .fold(Vector3::zeros(), |acc: Vector3<f64>, p| acc + Vector3::from(*p))
            / n;

        let mut cov = Matrix3::zeros();
        for p in points {
            let r = Vector3::from(*p) - centroid;
            cov += r * r.transpose();
        }
        cov /= n;

        let eig = SymmetricEigen::new(cov);
        let mut order = [0usize, 1, 2];
        order.sort_by(|&i, &j| eig.eigenvalues[i].total_cmp(&eig.eigenvalues[j]));
        let (smallest, middle, largest) = (order[0], order[1], order[2]);

        let spread = eig.eigenvalues[largest];
        if spread <= 0.0 || eig.eigenvalues[middle] <= DEGENERACY_EPS * spread {
            return None;
        }

        let normal = eig.eigenvectors.column(smallest).into_owned().normalize();
        Some(Self::from_normal_and_point(normal, centroid))
    }

    fn from_normal_and_point(normal: Vector3<f64>, point: Vector3<f64>) -> Self {
        Self {
            a: normal.x,
            b: normal.y,
            c: normal.z,
            d: -normal.dot(&point),
        }
    }

    /// Coefficients as `[a, b, c, d]`.
    pub fn coefficients(&self) -> [f64; 4] {
        [self.a, self.b, self.c, self.d]
    }

    pub fn normal(&self) -> [f64; 3] {
        [self.a, self.b, self.c]
    }

    /// Signed residual `a*x + b*y + c*z + d` (a distance for unit normals).
    #[inline]
    pub fn signed_distance(&self, p: [f64; 3]) -> f64 {
        self.a * p[0] + self.b * p[1] + self.c * p[2] + self.d
    }

    #[inline]
    pub fn distance(&self, p: [f64; 3]) -> f64 {
        self.signed_distance(p).abs()
    }

    /// Flip the plane, if needed, so the dominant normal component is
    /// positive. On a tie the earlier axis decides.
    pub fn canonical(self) -> Self {
        let dominant = [self.a, self.b, self.c]
            .into_iter()
            .fold(0.0_f64, |best, v| if v.abs() > best.abs() { v } else { best });
        if dominant < 0.0 {
            Self {
                a: -self.a,
                b: -self.b,
                c: -self.c,
                d: -self.d,
            }
        } else {
            self
        }
    }
}

/// Result of one plane fit, with indices into the fitted cloud.
#[derive(Debug, Clone)]
pub struct PlaneFit {
    pub plane: Plane,
    /// Indices of points within the distance threshold, ascending
    pub inliers: Vec<usize>,
    /// All other indices, ascending
    pub outliers: Vec<usize>,
}

/// RANSAC plane estimator owning its random source.
///
/// Repeated calls on one fitter continue the same random stream, so a seeded
/// fitter makes a whole multi-plane search reproducible.
pub struct PlaneFitter {
    rng: StdRng,
}

impl PlaneFitter {
    /// Seeded fitter when `seed` is given, otherwise seeded from the OS.
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self { rng }
    }

    /// Fit a plane to `cloud`.
    ///
    /// Each of the `max_iterations` trials samples `min_samples` distinct
    /// points (at least 3), fits a candidate through them and counts the
    /// points within `distance_threshold`. The best candidate is refined by
    /// least squares over its inliers; the refinement is kept only if it does
    /// not lose inliers. Degenerate samples produce no candidate.
    ///
    /// # Errors
    ///
    /// - `InsufficientPoints` if `cloud` has fewer than `min_samples` points
    /// - `NoPlaneFound` if every sample was degenerate
    pub fn fit(
        &mut self,
        cloud: &PointCloud,
        distance_threshold: f64,
        min_samples: usize,
        max_iterations: usize,
    ) -> Result<PlaneFit> {
        let k = min_samples.max(MIN_PLANE_SAMPLES);
        let n = cloud.len();
        if n < k {
            return Err(SceneError::InsufficientPoints {
                required: k,
                actual: n,
            });
        }

        let coords = cloud.to_coords();

        let samples: Vec<Vec<usize>> = (0..max_iterations)
            .map(|_| index::sample(&mut self.rng, n, k).into_vec())
            .collect();

        let best = samples
            .par_iter()
            .enumerate()
            .filter_map(|(trial, sample)| {
                let plane = candidate_plane(&coords, sample)?;
                let count = count_inliers(&coords, &plane, distance_threshold);
                Some((trial, plane, count))
            })
            .reduce_with(|a, b| {
                if b.2 > a.2 || (b.2 == a.2 && b.0 < a.0) {
                    b
                } else {
                    a
                }
            });

        let Some((_, plane, count)) = best else {
            return Err(SceneError::NoPlaneFound {
                iterations: max_iterations,
            });
        };

        let plane = refine(&coords, plane, count, distance_threshold).canonical();

        let (inliers, outliers): (Vec<usize>, Vec<usize>) =
            (0..n).partition(|&i| plane.distance(coords[i]) <= distance_threshold);

        log::debug!(
            "plane fit: [{:.4}, {:.4}, {:.4}, {:.4}] with {}/{} inliers",
            plane.a,
            plane.b,
            plane.c,
            plane.d,
            inliers.len(),
            n
        );

        Ok(PlaneFit {
            plane,
            inliers,
            outliers,
        })
    }
}

fn candidate_plane(coords: &[[f64; 3]], sample: &[usize]) -> Option<Plane> {
    if sample.len() == MIN_PLANE_SAMPLES {
        Plane::from_three_points(coords[sample[0]], coords[sample[1]], coords[sample[2]])
    } else {
        let points: Vec<[f64; 3]> = sample.iter().map(|&i| coords[i]).collect();
        Plane::fit_least_squares(&points)
    }
}

fn count_inliers(coords: &[[f64; 3]], plane: &Plane, threshold: f64) -> usize {
    coords
        .iter()
        .filter(|p| plane.distance(**p) <= threshold)
        .count()
}

fn refine(coords: &[[f64; 3]], plane: Plane, count: usize, threshold: f64) -> Plane {
    let inlier_points: Vec<[f64; 3]> = coords
        .iter()
        .copied()
        .filter(|p| plane.distance(*p) <= threshold)
        .collect();

    match Plane::fit_least_squares(&inlier_points) {
        Some(refined) if count_inliers(coords, &refined, threshold) >= count => refined,
        _ => plane,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Grid on the plane z = 0.2x - 0.1y + 0.5
    fn tilted_grid(n: usize) -> PointCloud {
        let mut cloud = PointCloud::new();
        for i in 0..n {
            for j in 0..n {
                let x = i as f64 * 0.05;
                let y = j as f64 * 0.05;
                cloud.push(x, y, 0.2 * x - 0.1 * y + 0.5);
            }
        }
        cloud
    }

    #[test]
    fn test_perfect_plane_all_inliers() {
        let cloud = tilted_grid(20);
        let mut fitter = PlaneFitter::new(Some(7));
        let fit = fitter.fit(&cloud, 0.01, 3, 50).unwrap();

        assert_eq!(fit.inliers.len(), cloud.len());
        assert!(fit.outliers.is_empty());
        for i in 0..cloud.len() {
            assert!(fit.plane.signed_distance(cloud.point(i)).abs() < 1e-9);
        }
        let [a, b, c] = fit.plane.normal();
        assert!(((a * a + b * b + c * c).sqrt() - 1.0).abs() < 1e-12);
        // z = 0.2x - 0.1y + 0.5 has a z-dominant normal
        assert!(c > 0.0);
    }

    #[test]
    fn test_least_squares_samples() {
        let cloud = tilted_grid(10);
        let mut fitter = PlaneFitter::new(Some(1));
        let fit = fitter.fit(&cloud, 0.01, 5, 20).unwrap();
        assert_eq!(fit.inliers.len(), cloud.len());
    }

    #[test]
    fn test_plane_with_outliers() {
        let mut cloud = tilted_grid(15);
        let plane_points = cloud.len();
        for k in 0..20 {
            cloud.push(k as f64 * 0.03, 0.3, 3.0 + k as f64 * 0.1);
        }

        let mut fitter = PlaneFitter::new(Some(3));
        let fit = fitter.fit(&cloud, 0.01, 3, 100).unwrap();

        assert_eq!(fit.inliers.len(), plane_points);
        assert_eq!(fit.outliers, (plane_points..cloud.len()).collect::<Vec<_>>());
    }

    #[test]
    fn test_seeded_fits_are_reproducible() {
        let mut cloud = tilted_grid(12);
        for k in 0..30 {
            cloud.push((k % 7) as f64 * 0.1, (k % 5) as f64 * 0.1, 2.0 + (k % 3) as f64 * 0.2);
        }
        let a = PlaneFitter::new(Some(99)).fit(&cloud, 0.02, 3, 40).unwrap();
        let b = PlaneFitter::new(Some(99)).fit(&cloud, 0.02, 3, 40).unwrap();
        assert_eq!(a.plane, b.plane);
        assert_eq!(a.inliers, b.inliers);
    }

    #[test]
    fn test_dominant_normal_component_is_positive() {
        // Horizontal planes above and below the origin in a y-down frame
        for height in [0.5, -0.5] {
            let mut cloud = PointCloud::new();
            for i in 0..10 {
                for k in 0..10 {
                    cloud.push(i as f64 * 0.1, height, 1.0 + k as f64 * 0.1);
                }
            }
            let fit = PlaneFitter::new(Some(5)).fit(&cloud, 0.01, 3, 10).unwrap();
            assert!((fit.plane.b - 1.0).abs() < 1e-9);
            assert!((fit.plane.d + height).abs() < 1e-9);
        }
    }

    #[test]
    fn test_canonical_flips_negative_dominant_axis() {
        let p = Plane { a: 0.1, b: -0.2, c: -0.9, d: 0.4 }.canonical();
        assert_eq!(p.coefficients(), [-0.1, 0.2, 0.9, -0.4]);

        let q = Plane { a: 0.0, b: 0.8, c: -0.6, d: -1.0 }.canonical();
        assert_eq!(q.coefficients(), [0.0, 0.8, -0.6, -1.0]);
    }

    #[test]
    fn test_insufficient_points() {
        let cloud = PointCloud::from_points(&[[0.0, 0.0, 0.0], [1.0, 0.0, 0.0]]);
        let err = PlaneFitter::new(Some(0)).fit(&cloud, 0.01, 3, 10).unwrap_err();
        assert!(matches!(
            err,
            SceneError::InsufficientPoints { required: 3, actual: 2 }
        ));

        let cloud = tilted_grid(2);
        assert!(PlaneFitter::new(Some(0)).fit(&cloud, 0.01, 5, 10).is_err());
    }

    #[test]
    fn test_collinear_points_do_not_panic() {
        let cloud = PointCloud::from_points(&[
            [0.0, 0.0, 0.0],
            [1.0, 1.0, 1.0],
            [2.0, 2.0, 2.0],
            [3.0, 3.0, 3.0],
        ]);
        let err = PlaneFitter::new(Some(11)).fit(&cloud, 0.01, 3, 25).unwrap_err();
        assert!(matches!(err, SceneError::NoPlaneFound { iterations: 25 }));
    }

    #[test]
    fn test_degenerate_candidates() {
        assert!(Plane::from_three_points([0.0; 3], [0.0; 3], [1.0, 0.0, 0.0]).is_none());
        assert!(Plane::fit_least_squares(&[[1.0, 2.0, 3.0]; 4]).is_none());
        let p = Plane::from_three_points([0.0; 3], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]).unwrap();
        assert!((p.c.abs() - 1.0).abs() < 1e-12);
    }
}
