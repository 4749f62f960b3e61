//! Splitting a calibrated, cropped table region into the table surface and
//! the objects resting on it.

use crate::config::SegmentationConfig;
use crate::core::loaders::PointCloud;
use crate::core::transforms::{bounds, center, gather};
use crate::core::writers::ObjectRecord;
use crate::error::Result;

use super::calibration::box_corners;
use super::clustering::{cluster_point_cloud, group_labels};
use super::plane::{Plane, PlaneFitter};

/// One accepted object with its geometric descriptors.
#[derive(Debug, Clone)]
pub struct DetectedObject {
    /// Position among the accepted objects, starting at 0
    pub id: usize,
    /// DBSCAN label of the cluster this object came from
    pub cluster_label: i32,
    pub points: PointCloud,
    pub center: [f64; 3],
    pub min_bound: [f64; 3],
    pub max_bound: [f64; 3],
    /// Axis-aligned bounding box corners
    pub corners: [[f64; 3]; 8],
    pub x_width: f64,
    pub y_width: f64,
    pub height: f64,
    /// Population standard deviation of the x coordinates
    pub std_x: f64,
    /// Population standard deviation of the y coordinates
    pub std_y: f64,
}

impl DetectedObject {
    /// Compute descriptors for a cluster's points.
    ///
    /// # Errors
    ///
    /// Returns `EmptyCloud` when `points` is empty.
    pub fn from_points(id: usize, cluster_label: i32, points: PointCloud) -> Result<Self> {
        let c = center(&points)?;
        let (min_bound, max_bound) = bounds(&points)?;
        let std_x = population_std(&points.x, c[0]);
        let std_y = population_std(&points.y, c[1]);

        Ok(Self {
            id,
            cluster_label,
            center: c,
            min_bound,
            max_bound,
            corners: box_corners(min_bound, max_bound),
            x_width: max_bound[0] - min_bound[0],
            y_width: max_bound[1] - min_bound[1],
            height: max_bound[2] - min_bound[2],
            std_x,
            std_y,
            points,
        })
    }

    #[inline]
    pub fn point_count(&self) -> usize {
        self.points.len()
    }

    /// Descriptor row for `objects.csv`.
    pub fn record(&self) -> ObjectRecord {
        ObjectRecord {
            id: self.id,
            points: self.point_count(),
            center_x: self.center[0],
            center_y: self.center[1],
            center_z: self.center[2],
            min_x: self.min_bound[0],
            min_y: self.min_bound[1],
            min_z: self.min_bound[2],
            max_x: self.max_bound[0],
            max_y: self.max_bound[1],
            max_z: self.max_bound[2],
            x_width: self.x_width,
            y_width: self.y_width,
            height: self.height,
            std_x: self.std_x,
            std_y: self.std_y,
        }
    }
}

fn population_std(values: &[f64], mean: f64) -> f64 {
    let var = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / values.len() as f64;
    var.sqrt()
}

/// Result of segmenting one table region.
#[derive(Debug, Clone)]
pub struct Segmentation {
    pub plane: Plane,
    /// Points on the table surface
    pub table_inliers: PointCloud,
    pub objects: Vec<DetectedObject>,
    /// Clusters dropped by the spread filter
    pub rejected_clusters: usize,
}

/// Fit the table surface once, cluster everything off it and keep the
/// compact clusters as objects.
///
/// A cluster is kept only if both its x and y standard deviations are below
/// `max_spread`. Finding no objects is not an error.
///
/// # Errors
///
/// Plane fitting errors (`InsufficientPoints`, `NoPlaneFound`).
pub fn segment_objects(
    cloud: &PointCloud,
    config: &SegmentationConfig,
    fitter: &mut PlaneFitter,
) -> Result<Segmentation> {
    let fit = fitter.fit(
        cloud,
        config.distance_threshold,
        config.ransac_n,
        config.num_iterations,
    )?;

    let table_inliers = gather(cloud, &fit.inliers);
    let candidates = gather(cloud, &fit.outliers);
    log::info!(
        "Table surface: {} points, {} off-plane",
        table_inliers.len(),
        candidates.len()
    );

    let labels = cluster_point_cloud(&candidates, config.cluster_eps, config.cluster_min_points);

    let mut objects = Vec::new();
    let mut rejected_clusters = 0;
    for (label, members) in group_labels(&labels) {
        let object = DetectedObject::from_points(objects.len(), label, gather(&candidates, &members))?;
        if object.std_x < config.max_spread && object.std_y < config.max_spread {
            log::debug!(
                "cluster {}: accepted, {} points, std ({:.4}, {:.4})",
                label,
                object.point_count(),
                object.std_x,
                object.std_y
            );
            objects.push(object);
        } else {
            log::debug!(
                "cluster {}: rejected, std ({:.4}, {:.4}) not below {}",
                label,
                object.std_x,
                object.std_y,
                config.max_spread
            );
            rejected_clusters += 1;
        }
    }

    log::info!(
        "Accepted {} objects, rejected {} clusters",
        objects.len(),
        rejected_clusters
    );

    Ok(Segmentation {
        plane: fit.plane,
        table_inliers,
        objects,
        rejected_clusters,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 125 x 120 grid on z = 0 spanning [-0.5, 0.5]^2
    fn table_surface() -> PointCloud {
        let mut cloud = PointCloud::new();
        for i in 0..125 {
            for j in 0..120 {
                cloud.push(-0.5 + i as f64 / 124.0, -0.5 + j as f64 / 119.0, 0.0);
            }
        }
        cloud
    }

    /// Regular grid of `dims` points with `spacing`, centered on `c`
    fn block(cloud: &mut PointCloud, c: [f64; 3], dims: [usize; 3], spacing: f64) {
        let half = |n: usize| (n - 1) as f64 * spacing / 2.0;
        for i in 0..dims[0] {
            for j in 0..dims[1] {
                for k in 0..dims[2] {
                    cloud.push(
                        c[0] - half(dims[0]) + i as f64 * spacing,
                        c[1] - half(dims[1]) + j as f64 * spacing,
                        c[2] - half(dims[2]) + k as f64 * spacing,
                    );
                }
            }
        }
    }

    #[test]
    fn test_two_objects_on_table() {
        let mut cloud = table_surface();
        assert_eq!(cloud.len(), 15_000);
        block(&mut cloud, [0.1, 0.1, 0.05], [5, 5, 8], 0.008);
        block(&mut cloud, [-0.2, 0.3, 0.08], [5, 5, 8], 0.008);

        let mut fitter = PlaneFitter::new(Some(21));
        let seg = segment_objects(&cloud, &SegmentationConfig::default(), &mut fitter).unwrap();

        assert_eq!(seg.table_inliers.len(), 15_000);
        assert_eq!(seg.objects.len(), 2);
        assert_eq!(seg.rejected_clusters, 0);

        let mut centers: Vec<[f64; 3]> = seg.objects.iter().map(|o| o.center).collect();
        centers.sort_by(|a, b| a[0].total_cmp(&b[0]));
        let expected = [[-0.2, 0.3, 0.08], [0.1, 0.1, 0.05]];
        for (c, e) in centers.iter().zip(expected.iter()) {
            for k in 0..3 {
                assert!((c[k] - e[k]).abs() < 1e-9);
            }
        }
        for object in &seg.objects {
            assert_eq!(object.point_count(), 200);
        }
    }

    #[test]
    fn test_compact_cube_extents() {
        let mut cloud = table_surface();
        block(&mut cloud, [0.2, -0.2, 0.05], [6, 6, 6], 0.008);

        let mut fitter = PlaneFitter::new(Some(4));
        let seg = segment_objects(&cloud, &SegmentationConfig::default(), &mut fitter).unwrap();

        assert_eq!(seg.objects.len(), 1);
        let cube = &seg.objects[0];
        assert_eq!(cube.id, 0);
        for width in [cube.x_width, cube.y_width, cube.height] {
            assert!((width - 0.04).abs() < 1e-9);
        }
        assert!((cube.min_bound[0] - 0.18).abs() < 1e-9);
        assert!((cube.max_bound[2] - 0.07).abs() < 1e-9);
        assert_eq!(cube.corners[0], cube.min_bound);
        assert_eq!(cube.corners[7], cube.max_bound);
        assert!(cube.std_x < 0.1 && cube.std_y < 0.1);
    }

    #[test]
    fn test_elongated_cluster_is_rejected() {
        let mut cloud = table_surface();
        // 0.594 m bar along x, std_x about 0.17
        block(&mut cloud, [0.0, -0.3, 0.1], [100, 3, 3], 0.006);
        block(&mut cloud, [0.2, 0.2, 0.05], [6, 6, 6], 0.008);

        let mut fitter = PlaneFitter::new(Some(8));
        let seg = segment_objects(&cloud, &SegmentationConfig::default(), &mut fitter).unwrap();

        assert_eq!(seg.objects.len(), 1);
        assert_eq!(seg.rejected_clusters, 1);
        assert!((seg.objects[0].center[0] - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_empty_table_gives_no_objects() {
        let cloud = table_surface();
        let mut fitter = PlaneFitter::new(Some(2));
        let seg = segment_objects(&cloud, &SegmentationConfig::default(), &mut fitter).unwrap();
        assert!(seg.objects.is_empty());
        assert_eq!(seg.rejected_clusters, 0);
    }

    #[test]
    fn test_population_std() {
        let object = DetectedObject::from_points(
            0,
            0,
            PointCloud::from_points(&[[0.0, 1.0, 0.0], [2.0, 1.0, 1.0]]),
        )
        .unwrap();
        assert!((object.std_x - 1.0).abs() < 1e-12);
        assert_eq!(object.std_y, 0.0);
        assert_eq!(object.center, [1.0, 1.0, 0.5]);
    }
}
