//! Locating the table among the large planes of a raw scene.
//!
//! Planes are peeled off the cloud one at a time. The camera frame is y-down,
//! so with the dominant normal component made positive every roughly
//! horizontal surface has `b > 0` and is kept as a candidate. A plane with
//! `b < 0` leans mostly along x or z (a wall facing the camera, typically) and
//! raises the number of candidates to collect by one. The candidate nearest
//! the sensor is split with DBSCAN and the most central sufficiently large
//! piece is the table.

use crate::config::TableConfig;
use crate::core::loaders::PointCloud;
use crate::core::transforms::{center, gather};
use crate::error::{Result, SceneError};

use super::clustering::{cluster_point_cloud, group_labels};
use super::plane::{Plane, PlaneFitter};

/// Where the table is and how to move it to the origin.
#[derive(Debug, Clone)]
pub struct TableEstimate {
    /// Translation taking the table center to the origin (`-center`)
    pub offset: [f64; 3],
    pub center: [f64; 3],
    /// Points in the selected table cluster
    pub point_count: usize,
    /// Plane the table cluster was taken from
    pub plane: Plane,
}

struct CandidatePlane {
    plane: Plane,
    points: PointCloud,
}

/// Find the table in `cloud` and return the offset that centers it.
///
/// # Errors
///
/// - `EmptyCloud` if `cloud` is empty
/// - `TableNotFound` if no positive-y plane was found, or if the most central
///   cluster of the nearest plane does not exceed `min_table_points`
/// - Plane fitting errors other than exhausting usable samples
pub fn locate_table(
    cloud: &PointCloud,
    config: &TableConfig,
    fitter: &mut PlaneFitter,
) -> Result<TableEstimate> {
    if cloud.is_empty() {
        return Err(SceneError::EmptyCloud { stage: "table location" });
    }

    let candidates = collect_candidate_planes(cloud, config, fitter)?;

    let nearest = candidates
        .iter()
        .min_by(|a, b| a.plane.d.abs().total_cmp(&b.plane.d.abs()))
        .ok_or_else(|| SceneError::TableNotFound {
            reason: "no roughly horizontal plane (b > 0) found".to_string(),
        })?;

    log::debug!(
        "table candidate plane d={:.4} with {} points",
        nearest.plane.d,
        nearest.points.len()
    );

    let labels = cluster_point_cloud(&nearest.points, config.cluster_eps, config.cluster_min_points);
    let groups = group_labels(&labels);
    if groups.is_empty() {
        return Err(SceneError::TableNotFound {
            reason: "candidate plane has no dense region".to_string(),
        });
    }

    // Most central cluster; the first one wins ties
    let mut best: Option<(f64, [f64; 3], usize)> = None;
    for (label, members) in &groups {
        let c = center(&gather(&nearest.points, members))?;
        let score = c[0].abs() + c[1].abs();
        log::debug!(
            "cluster {}: {} points, center [{:.3}, {:.3}, {:.3}]",
            label,
            members.len(),
            c[0],
            c[1],
            c[2]
        );
        if best.map_or(true, |(s, _, _)| score < s) {
            best = Some((score, c, members.len()));
        }
    }

    let Some((_, table_center, point_count)) = best else {
        return Err(SceneError::TableNotFound {
            reason: "candidate plane has no dense region".to_string(),
        });
    };

    if point_count <= config.min_table_points {
        return Err(SceneError::TableNotFound {
            reason: format!(
                "most central cluster has {} points, needs more than {}",
                point_count, config.min_table_points
            ),
        });
    }

    let offset = [-table_center[0], -table_center[1], -table_center[2]];
    log::info!(
        "Table found: {} points centered at [{:.3}, {:.3}, {:.3}]",
        point_count,
        table_center[0],
        table_center[1],
        table_center[2]
    );

    Ok(TableEstimate {
        offset,
        center: table_center,
        point_count,
        plane: nearest.plane,
    })
}

fn collect_candidate_planes(
    cloud: &PointCloud,
    config: &TableConfig,
    fitter: &mut PlaneFitter,
) -> Result<Vec<CandidatePlane>> {
    let mut required = config.base_plane_count;
    let mut accepted: Vec<CandidatePlane> = Vec::new();
    let mut remaining = cloud.clone();

    while accepted.len() < required {
        if remaining.len() < config.ransac_n.max(3) {
            log::debug!("{} points left, stopping plane search", remaining.len());
            break;
        }

        let fit = match fitter.fit(
            &remaining,
            config.distance_threshold,
            config.ransac_n,
            config.num_iterations,
        ) {
            Ok(fit) => fit,
            Err(SceneError::NoPlaneFound { .. }) => {
                log::debug!("remaining points are degenerate, stopping plane search");
                break;
            }
            Err(e) => return Err(e),
        };
        if fit.inliers.is_empty() {
            break;
        }

        let plane = fit.plane;
        if plane.b < 0.0 {
            required = config.tilted_plane_count;
            log::debug!("plane b={:.4} tilted, collecting {} planes", plane.b, required);
        }

        let next = gather(&remaining, &fit.outliers);
        if plane.b > 0.0 {
            log::debug!(
                "accepted plane b={:.4} d={:.4} ({} points)",
                plane.b,
                plane.d,
                fit.inliers.len()
            );
            accepted.push(CandidatePlane {
                plane,
                points: gather(&remaining, &fit.inliers),
            });
        }
        remaining = next;
    }

    log::info!("Collected {} candidate planes", accepted.len());
    Ok(accepted)
}
