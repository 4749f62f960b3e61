//! Error taxonomy for the scene-processing stages.

use thiserror::Error;

use crate::core::loaders::LoaderError;
use crate::core::writers::WriteError;

/// Errors surfaced by the geometry stages and the pipeline.
///
/// None of these are retried inside the crate; the caller decides whether a
/// run is worth repeating with relaxed parameters.
#[derive(Error, Debug)]
pub enum SceneError {
    /// Input file missing, unreadable or in an unknown format.
    #[error("failed to load point cloud: {0}")]
    Load(#[from] LoaderError),

    /// Output file could not be written.
    #[error("failed to write output: {0}")]
    Write(#[from] WriteError),

    /// A stage received a cloud with no points.
    #[error("point cloud is empty ({stage})")]
    EmptyCloud { stage: &'static str },

    /// Fewer points than the plane fitter needs for one sample.
    #[error("plane fitting needs at least {required} points, got {actual}")]
    InsufficientPoints { required: usize, actual: usize },

    /// Every sampled candidate plane was degenerate.
    #[error("no non-degenerate plane found after {iterations} iterations")]
    NoPlaneFound { iterations: usize },

    /// No table-plane cluster is both the most centred one and large enough.
    #[error("table not found: {reason}")]
    TableNotFound { reason: String },

    /// Crop bounds with min > max on some axis.
    #[error("invalid range on axis {axis}: min {min} > max {max}")]
    InvalidRange { axis: char, min: f64, max: f64 },

    /// Index selection referenced a point that does not exist.
    #[error("index {index} out of bounds for cloud of {len} points")]
    IndexOutOfBounds { index: usize, len: usize },

    /// Voxel edge length must be strictly positive.
    #[error("voxel size must be > 0, got {0}")]
    InvalidVoxelSize(f64),
}

/// Result type for scene operations.
pub type Result<T> = std::result::Result<T, SceneError>;
