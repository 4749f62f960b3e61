//! Geometric operations on point clouds.
//!
//! Voxel down-sampling, index selection, rigid transforms, axis-aligned
//! cropping and centroid/bounds queries. Per-point work is parallelized with
//! Rayon; every operation either returns a new cloud or mutates the one it is
//! given, never a shared one.

use nalgebra::{Matrix3, Rotation3, Vector3};
use rayon::prelude::*;

use super::loaders::PointCloud;
use crate::error::{Result, SceneError};

/// Clouds larger than this are sorted in parallel during down-sampling.
const PARALLEL_SORT_THRESHOLD: usize = 10_000;

/// Down-sample a cloud to one point per occupied voxel.
///
/// The grid is anchored half a voxel below the cloud's minimum corner. Each
/// output point is the centroid of the points in its cell, and its color (if
/// the cloud is colored) is their mean color. Output order follows the voxel
/// index, so the result is deterministic.
///
/// # Errors
///
/// Returns `InvalidVoxelSize` unless `voxel_size` is finite and > 0.
pub fn voxel_downsample(cloud: &PointCloud, voxel_size: f64) -> Result<PointCloud> {
    if !(voxel_size > 0.0 && voxel_size.is_finite()) {
        return Err(SceneError::InvalidVoxelSize(voxel_size));
    }
    if cloud.is_empty() {
        return Ok(PointCloud::new());
    }

    let (min, _) = bounds(cloud)?;
    let origin = [
        min[0] - voxel_size * 0.5,
        min[1] - voxel_size * 0.5,
        min[2] - voxel_size * 0.5,
    ];

    let mut keyed: Vec<([i64; 3], usize)> = (0..cloud.len())
        .into_par_iter()
        .map(|i| {
            let p = cloud.point(i);
            let key = [
                ((p[0] - origin[0]) / voxel_size).floor() as i64,
                ((p[1] - origin[1]) / voxel_size).floor() as i64,
                ((p[2] - origin[2]) / voxel_size).floor() as i64,
            ];
            (key, i)
        })
        .collect();

    if keyed.len() > PARALLEL_SORT_THRESHOLD {
        keyed.par_sort_unstable();
    } else {
        keyed.sort_unstable();
    }

    let mut out = PointCloud::with_capacity(keyed.len() / 2);
    let mut start = 0;
    while start < keyed.len() {
        let key = keyed[start].0;
        let mut end = start;
        let mut sum = [0.0f64; 3];
        let mut color_sum = [0u64; 3];

        while end < keyed.len() && keyed[end].0 == key {
            let idx = keyed[end].1;
            let p = cloud.point(idx);
            sum[0] += p[0];
            sum[1] += p[1];
            sum[2] += p[2];
            if let Some(ref colors) = cloud.colors {
                for (acc, c) in color_sum.iter_mut().zip(colors[idx]) {
                    *acc += c as u64;
                }
            }
            end += 1;
        }

        let count = (end - start) as f64;
        let (x, y, z) = (sum[0] / count, sum[1] / count, sum[2] / count);
        if cloud.colors.is_some() {
            let n = (end - start) as u64;
            let color = [
                ((color_sum[0] + n / 2) / n) as u8,
                ((color_sum[1] + n / 2) / n) as u8,
                ((color_sum[2] + n / 2) / n) as u8,
            ];
            out.push_with_color(x, y, z, color);
        } else {
            out.push(x, y, z);
        }

        start = end;
    }

    Ok(out)
}

/// Select the points at `indices` (or every other point when `invert`).
///
/// Without `invert` the output keeps the order of `indices`; with it, the
/// complement is returned in source order.
///
/// # Errors
///
/// Returns `IndexOutOfBounds` if any index does not reference a point.
pub fn select_by_indices(cloud: &PointCloud, indices: &[usize], invert: bool) -> Result<PointCloud> {
    let n = cloud.len();
    if let Some(&bad) = indices.iter().find(|&&i| i >= n) {
        return Err(SceneError::IndexOutOfBounds { index: bad, len: n });
    }

    let selected: Vec<usize> = if invert {
        let mut keep = vec![true; n];
        for &i in indices {
            keep[i] = false;
        }
        (0..n).filter(|&i| keep[i]).collect()
    } else {
        indices.to_vec()
    };

    Ok(gather(cloud, &selected))
}

/// Copy the points at already-validated `indices` into a new cloud.
pub(crate) fn gather(cloud: &PointCloud, indices: &[usize]) -> PointCloud {
    PointCloud {
        x: indices.iter().map(|&i| cloud.x[i]).collect(),
        y: indices.iter().map(|&i| cloud.y[i]).collect(),
        z: indices.iter().map(|&i| cloud.z[i]).collect(),
        colors: cloud
            .colors
            .as_ref()
            .map(|c| indices.iter().map(|&i| c[i]).collect()),
    }
}

/// Rotation matrix for angles (radians) about x, y and z, composed as
/// `Rx * Ry * Rz`.
pub fn rotation_from_xyz(roll: f64, pitch: f64, yaw: f64) -> Matrix3<f64> {
    let rx = Rotation3::from_axis_angle(&Vector3::x_axis(), roll);
    let ry = Rotation3::from_axis_angle(&Vector3::y_axis(), pitch);
    let rz = Rotation3::from_axis_angle(&Vector3::z_axis(), yaw);
    (rx * ry * rz).into_inner()
}

/// Rotate every point about `center` in place. Colors are untouched.
pub fn rotate(cloud: &mut PointCloud, rotation: &Matrix3<f64>, center: [f64; 3]) {
    let c = Vector3::from(center);
    cloud
        .x
        .par_iter_mut()
        .zip(cloud.y.par_iter_mut())
        .zip(cloud.z.par_iter_mut())
        .for_each(|((x, y), z)| {
            let p = rotation * (Vector3::new(*x, *y, *z) - c) + c;
            *x = p.x;
            *y = p.y;
            *z = p.z;
        });
}

/// Translate every point by `offset` in place.
pub fn translate(cloud: &mut PointCloud, offset: [f64; 3]) {
    cloud.x.par_iter_mut().for_each(|v| *v += offset[0]);
    cloud.y.par_iter_mut().for_each(|v| *v += offset[1]);
    cloud.z.par_iter_mut().for_each(|v| *v += offset[2]);
}

/// Keep the points inside the closed box `[min, max]`.
///
/// # Errors
///
/// Returns `InvalidRange` if `min` exceeds `max` on any axis.
pub fn crop_axis_aligned(cloud: &PointCloud, min: [f64; 3], max: [f64; 3]) -> Result<PointCloud> {
    for (axis, (&lo, &hi)) in ['x', 'y', 'z'].into_iter().zip(min.iter().zip(max.iter())) {
        if lo > hi {
            return Err(SceneError::InvalidRange { axis, min: lo, max: hi });
        }
    }

    let inside: Vec<usize> = (0..cloud.len())
        .into_par_iter()
        .filter(|&i| {
            let p = cloud.point(i);
            (0..3).all(|k| p[k] >= min[k] && p[k] <= max[k])
        })
        .collect();

    Ok(gather(cloud, &inside))
}

/// Arithmetic mean of all point coordinates.
///
/// # Errors
///
/// Returns `EmptyCloud` when there are no points.
pub fn center(cloud: &PointCloud) -> Result<[f64; 3]> {
    if cloud.is_empty() {
        return Err(SceneError::EmptyCloud { stage: "center" });
    }
    let n = cloud.len() as f64;
    Ok([
        cloud.x.iter().sum::<f64>() / n,
        cloud.y.iter().sum::<f64>() / n,
        cloud.z.iter().sum::<f64>() / n,
    ])
}

/// Componentwise minimum and maximum over all points.
///
/// # Errors
///
/// Returns `EmptyCloud` when there are no points.
pub fn bounds(cloud: &PointCloud) -> Result<([f64; 3], [f64; 3])> {
    if cloud.is_empty() {
        return Err(SceneError::EmptyCloud { stage: "bounds" });
    }
    let axis_range = |values: &[f64]| {
        values
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            })
    };
    let (x0, x1) = axis_range(&cloud.x);
    let (y0, y1) = axis_range(&cloud.y);
    let (z0, z1) = axis_range(&cloud.z);
    Ok(([x0, y0, z0], [x1, y1, z1]))
}
