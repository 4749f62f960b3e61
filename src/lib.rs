//! Tabletop scene understanding for RGB-D point clouds.
//!
//! This crate provides tools for:
//! - Loading PLY, PCD and CSV point clouds and voxel down-sampling them
//! - RANSAC plane fitting and parallel DBSCAN clustering
//! - Locating the supporting table and moving the scene into its frame
//! - Segmenting the objects on the table into bounded point clusters
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use tabletop_scene::{PipelineConfig, ScenePipeline};
//!
//! let pipeline = ScenePipeline::new(PipelineConfig::default());
//! let report = pipeline.run(Path::new("scene_14.ply")).unwrap();
//! for object in &report.objects {
//!     println!("{:?} {:.3}", object.center, object.height);
//! }
//! ```

pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod processors;

pub use config::{
    CalibrationConfig, CropBox, PipelineConfig, PreprocessConfig, SegmentationConfig, TableConfig,
    TransformStep,
};
pub use core::loaders::PointCloud;
pub use error::{Result, SceneError};
pub use processors::pipeline::{SceneReport, ScenePipeline};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
