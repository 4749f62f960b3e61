//! Core data types and I/O operations.

pub mod loaders;
pub mod scene;
pub mod transforms;
pub mod writers;

pub use loaders::{load_point_cloud, LoaderError, PointCloud};
pub use scene::SceneCloud;
pub use writers::{write_labels_csv, write_objects_csv, write_ply, write_point_cloud, WriteError};
