//! Moving a scene into the table frame and cropping around the table.

use crate::config::{CalibrationConfig, CropBox, TransformStep};
use crate::core::loaders::PointCloud;
use crate::core::transforms::{crop_axis_aligned, rotate, rotation_from_xyz, translate};
use crate::error::{Result, SceneError};

/// Rotate `cloud` about the origin by angles in degrees (x, then y, then z
/// axis, composed as `Rx * Ry * Rz`), then translate by `(tx, ty, tz)`.
///
/// Each call transforms the cloud as it currently is, so successive calls
/// compose in call order.
pub fn apply_transform(
    cloud: &mut PointCloud,
    roll: f64,
    pitch: f64,
    yaw: f64,
    tx: f64,
    ty: f64,
    tz: f64,
) {
    if roll != 0.0 || pitch != 0.0 || yaw != 0.0 {
        let r = rotation_from_xyz(roll.to_radians(), pitch.to_radians(), yaw.to_radians());
        rotate(cloud, &r, [0.0; 3]);
    }
    if tx != 0.0 || ty != 0.0 || tz != 0.0 {
        translate(cloud, [tx, ty, tz]);
    }
}

pub fn apply_step(cloud: &mut PointCloud, step: &TransformStep) {
    apply_transform(cloud, step.roll, step.pitch, step.yaw, step.tx, step.ty, step.tz);
}

/// Apply the table offset (when enabled and known) and then every
/// configured step, in order.
pub fn calibrate(cloud: &mut PointCloud, config: &CalibrationConfig, table_offset: Option<[f64; 3]>) {
    if config.apply_table_offset {
        if let Some(offset) = table_offset {
            log::debug!(
                "translating by table offset [{:.3}, {:.3}, {:.3}]",
                offset[0],
                offset[1],
                offset[2]
            );
            translate(cloud, offset);
        }
    }
    for step in &config.steps {
        log::debug!(
            "transform step rot=({}, {}, {}) deg, t=({}, {}, {})",
            step.roll,
            step.pitch,
            step.yaw,
            step.tx,
            step.ty,
            step.tz
        );
        apply_step(cloud, step);
    }
}

/// The eight corners of the box spanned by `min` and `max`.
pub fn box_corners(min: [f64; 3], max: [f64; 3]) -> [[f64; 3]; 8] {
    let mut corners = [[0.0; 3]; 8];
    for (i, corner) in corners.iter_mut().enumerate() {
        for k in 0..3 {
            corner[k] = if i & (1 << k) == 0 { min[k] } else { max[k] };
        }
    }
    corners
}

/// Keep the points inside the box spanned by the crop corners.
///
/// The box is rebuilt from its eight corners, so `min` and `max` only need
/// to be opposite corners.
///
/// # Errors
///
/// Returns `EmptyCloud` if nothing is left after cropping.
pub fn crop_region(cloud: &PointCloud, crop: &CropBox) -> Result<PointCloud> {
    let corners = box_corners(crop.min, crop.max);
    let mut lo = [f64::INFINITY; 3];
    let mut hi = [f64::NEG_INFINITY; 3];
    for corner in &corners {
        for k in 0..3 {
            lo[k] = lo[k].min(corner[k]);
            hi[k] = hi[k].max(corner[k]);
        }
    }

    let cropped = crop_axis_aligned(cloud, lo, hi)?;
    if cropped.is_empty() {
        return Err(SceneError::EmptyCloud { stage: "crop" });
    }
    log::info!("Cropped {} -> {} points", cloud.len(), cropped.len());
    Ok(cropped)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: [f64; 3], b: [f64; 3]) {
        for k in 0..3 {
            assert!((a[k] - b[k]).abs() < 1e-12, "{:?} != {:?}", a, b);
        }
    }

    #[test]
    fn test_apply_transform_rotates_then_translates() {
        let mut cloud = PointCloud::from_points(&[[1.0, 0.0, 0.0]]);
        apply_transform(&mut cloud, 0.0, 0.0, 90.0, 0.0, 0.0, 1.0);
        assert_close(cloud.point(0), [0.0, 1.0, 1.0]);
    }

    #[test]
    fn test_transforms_compose_in_call_order() {
        let mut a = PointCloud::from_points(&[[1.0, 2.0, 3.0]]);
        apply_transform(&mut a, 90.0, 0.0, 0.0, 0.0, 0.0, 0.0);
        apply_transform(&mut a, 0.0, 0.0, 90.0, 0.0, 0.0, 0.0);

        let mut b = PointCloud::from_points(&[[1.0, 2.0, 3.0]]);
        apply_transform(&mut b, 0.0, 0.0, 90.0, 0.0, 0.0, 0.0);
        apply_transform(&mut b, 90.0, 0.0, 0.0, 0.0, 0.0, 0.0);

        // Rx(90): (1,2,3) -> (1,-3,2); then Rz(90): -> (3,1,2)
        assert_close(a.point(0), [3.0, 1.0, 2.0]);
        // Rz(90): (1,2,3) -> (-2,1,3); then Rx(90): -> (-2,-3,1)
        assert_close(b.point(0), [-2.0, -3.0, 1.0]);
    }

    #[test]
    fn test_calibrate_applies_offset_before_steps() {
        let config = CalibrationConfig {
            apply_table_offset: true,
            steps: vec![TransformStep::rotation(0.0, 0.0, 90.0)],
            crop: CropBox::default(),
        };
        let mut cloud = PointCloud::from_points(&[[2.0, 0.0, 0.0]]);
        calibrate(&mut cloud, &config, Some([-1.0, 0.0, 0.0]));
        assert_close(cloud.point(0), [0.0, 1.0, 0.0]);

        let config = CalibrationConfig {
            apply_table_offset: false,
            ..config
        };
        let mut cloud = PointCloud::from_points(&[[2.0, 0.0, 0.0]]);
        calibrate(&mut cloud, &config, Some([-1.0, 0.0, 0.0]));
        assert_close(cloud.point(0), [0.0, 2.0, 0.0]);
    }

    #[test]
    fn test_box_corners_cover_every_combination() {
        let corners = box_corners([0.0, 0.0, 0.0], [1.0, 2.0, 3.0]);
        assert_eq!(corners[0], [0.0, 0.0, 0.0]);
        assert_eq!(corners[7], [1.0, 2.0, 3.0]);
        let mut unique = corners.to_vec();
        unique.sort_by(|a, b| a.partial_cmp(b).unwrap());
        unique.dedup();
        assert_eq!(unique.len(), 8);
    }

    #[test]
    fn test_crop_region() {
        let cloud = PointCloud::from_points(&[
            [0.0, 0.0, 0.0],
            [0.5, 0.5, 0.3],
            [1.0, 0.0, 0.0],
            [0.0, 0.0, -0.5],
        ]);
        let crop = CropBox {
            min: [-0.7, -0.7, -0.1],
            max: [0.9, 0.7, 0.4],
        };
        let cropped = crop_region(&cloud, &crop).unwrap();
        assert_eq!(cropped.len(), 2);

        let far = CropBox {
            min: [5.0, 5.0, 5.0],
            max: [6.0, 6.0, 6.0],
        };
        assert!(matches!(
            crop_region(&cloud, &far),
            Err(SceneError::EmptyCloud { .. })
        ));
    }

    #[test]
    fn test_crop_region_accepts_swapped_corners() {
        let cloud = PointCloud::from_points(&[[0.0, 0.0, 0.0], [2.0, 2.0, 2.0]]);
        let crop = CropBox {
            min: [1.0, 1.0, 1.0],
            max: [-1.0, -1.0, -1.0],
        };
        assert_eq!(crop_region(&cloud, &crop).unwrap().len(), 1);
    }
}
