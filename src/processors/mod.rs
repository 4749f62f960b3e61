//! Scene processing stages.

pub mod calibration;
pub mod clustering;
pub mod pipeline;
pub mod plane;
pub mod segmentation;
pub mod table;

// Re-export key types for convenience
pub use calibration::{apply_transform, calibrate, crop_region};
pub use clustering::{cluster_point_cloud, dbscan, group_labels, NOISE_LABEL};
pub use pipeline::{find_scenes, scene_id_from_path, SceneReport, ScenePipeline};
pub use plane::{Plane, PlaneFit, PlaneFitter};
pub use segmentation::{segment_objects, DetectedObject, Segmentation};
pub use table::{locate_table, TableEstimate};
