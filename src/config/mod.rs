//! Configuration types for the tabletop scene pipeline.
//!
//! Every default below was tuned for one RGB-D sensor and dataset (Kinect-style
//! captures of cluttered tabletops, distances in meters). They are exposed so
//! they can be re-tuned per dataset; do not assume they generalize.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Pre-processing applied to the raw cloud.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreprocessConfig {
    /// Voxel edge length for down-sampling
    #[serde(default = "default_voxel_size")]
    pub voxel_size: f64,
}

fn default_voxel_size() -> f64 {
    0.01
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            voxel_size: default_voxel_size(),
        }
    }
}

/// Parameters for locating the table among the scene's planes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableConfig {
    /// RANSAC inlier distance for the candidate planes
    #[serde(default = "default_table_distance")]
    pub distance_threshold: f64,

    /// Points per RANSAC sample
    #[serde(default = "default_table_ransac_n")]
    pub ransac_n: usize,

    /// RANSAC trials per plane
    #[serde(default = "default_num_iterations")]
    pub num_iterations: usize,

    /// Planes with positive b to collect when no tilted plane is seen
    #[serde(default = "default_base_plane_count")]
    pub base_plane_count: usize,

    /// Planes with positive b to collect once a negative-b plane is seen
    #[serde(default = "default_tilted_plane_count")]
    pub tilted_plane_count: usize,

    /// DBSCAN radius used to split the table-candidate plane
    #[serde(default = "default_table_eps")]
    pub cluster_eps: f64,

    /// DBSCAN minimum neighbourhood size for the table-candidate plane
    #[serde(default = "default_table_min_points")]
    pub cluster_min_points: usize,

    /// A table cluster must have strictly more points than this
    #[serde(default = "default_min_table_points")]
    pub min_table_points: usize,
}

fn default_table_distance() -> f64 {
    0.08
}

fn default_table_ransac_n() -> usize {
    5
}

fn default_num_iterations() -> usize {
    100
}

fn default_base_plane_count() -> usize {
    2
}

fn default_tilted_plane_count() -> usize {
    3
}

fn default_table_eps() -> f64 {
    0.08
}

fn default_table_min_points() -> usize {
    50
}

fn default_min_table_points() -> usize {
    12_000
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            distance_threshold: default_table_distance(),
            ransac_n: default_table_ransac_n(),
            num_iterations: default_num_iterations(),
            base_plane_count: default_base_plane_count(),
            tilted_plane_count: default_tilted_plane_count(),
            cluster_eps: default_table_eps(),
            cluster_min_points: default_table_min_points(),
            min_table_points: default_min_table_points(),
        }
    }
}

/// One rigid transform: rotation in degrees about the origin (x, y, z order),
/// then translation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TransformStep {
    #[serde(default)]
    pub roll: f64,
    #[serde(default)]
    pub pitch: f64,
    #[serde(default)]
    pub yaw: f64,
    #[serde(default)]
    pub tx: f64,
    #[serde(default)]
    pub ty: f64,
    #[serde(default)]
    pub tz: f64,
}

impl TransformStep {
    pub fn rotation(roll: f64, pitch: f64, yaw: f64) -> Self {
        Self {
            roll,
            pitch,
            yaw,
            ..Self::default()
        }
    }

    pub fn translation(tx: f64, ty: f64, tz: f64) -> Self {
        Self {
            tx,
            ty,
            tz,
            ..Self::default()
        }
    }
}

/// Axis-aligned region of interest, in the calibrated frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CropBox {
    pub min: [f64; 3],
    pub max: [f64; 3],
}

impl Default for CropBox {
    fn default() -> Self {
        Self {
            min: [-0.7, -0.7, -0.1],
            max: [0.9, 0.7, 0.4],
        }
    }
}

/// How the down-sampled cloud is moved into the table frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationConfig {
    /// Translate by the located table offset before the steps below
    #[serde(default = "default_true")]
    pub apply_table_offset: bool,

    /// Transforms applied in order to the working cloud
    #[serde(default = "default_steps")]
    pub steps: Vec<TransformStep>,

    /// Region kept after calibration
    #[serde(default)]
    pub crop: CropBox,
}

fn default_true() -> bool {
    true
}

fn default_steps() -> Vec<TransformStep> {
    vec![
        TransformStep::rotation(-108.0, 0.0, 0.0),
        TransformStep::rotation(0.0, 0.0, -37.0),
    ]
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            apply_table_offset: true,
            steps: default_steps(),
            crop: CropBox::default(),
        }
    }
}

/// Parameters for splitting the cropped region into table and objects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentationConfig {
    /// RANSAC inlier distance for the table surface
    #[serde(default = "default_segment_distance")]
    pub distance_threshold: f64,

    /// Points per RANSAC sample
    #[serde(default = "default_segment_ransac_n")]
    pub ransac_n: usize,

    /// RANSAC trials
    #[serde(default = "default_num_iterations")]
    pub num_iterations: usize,

    /// DBSCAN radius for object points
    #[serde(default = "default_object_eps")]
    pub cluster_eps: f64,

    /// DBSCAN minimum neighbourhood size for object points
    #[serde(default = "default_object_min_points")]
    pub cluster_min_points: usize,

    /// Clusters whose x or y standard deviation reaches this are rejected
    #[serde(default = "default_max_spread")]
    pub max_spread: f64,
}

fn default_segment_distance() -> f64 {
    0.01
}

fn default_segment_ransac_n() -> usize {
    3
}

fn default_object_eps() -> f64 {
    0.03
}

fn default_object_min_points() -> usize {
    60
}

fn default_max_spread() -> f64 {
    0.1
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            distance_threshold: default_segment_distance(),
            ransac_n: default_segment_ransac_n(),
            num_iterations: default_num_iterations(),
            cluster_eps: default_object_eps(),
            cluster_min_points: default_object_min_points(),
            max_spread: default_max_spread(),
        }
    }
}

/// Main pipeline configuration combining all sub-configs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub preprocess: PreprocessConfig,

    #[serde(default)]
    pub table: TableConfig,

    #[serde(default)]
    pub calibration: CalibrationConfig,

    #[serde(default)]
    pub segmentation: SegmentationConfig,

    /// Seed for RANSAC sampling; `None` draws from the OS
    #[serde(default)]
    pub seed: Option<u64>,

    /// Per-scene calibration overrides, keyed by scene number
    #[serde(default)]
    pub scenes: BTreeMap<u32, CalibrationConfig>,
}

impl PipelineConfig {
    /// Load configuration from a YAML file.
    pub fn from_yaml<P: AsRef<Path>>(path: P) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)?;
        let config: PipelineConfig = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a YAML file.
    pub fn to_yaml<P: AsRef<Path>>(&self, path: P) -> Result<(), Box<dyn std::error::Error>> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Calibration for a scene: its override if one exists, else the default.
    pub fn calibration_for(&self, scene_id: Option<u32>) -> &CalibrationConfig {
        scene_id
            .and_then(|id| self.scenes.get(&id))
            .unwrap_or(&self.calibration)
    }
}
