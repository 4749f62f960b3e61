//! Data writers for PLY and CSV formats.
//!
//! - ASCII PLY with RGB colors, for clouds and per-object point sets
//! - CSV with Cartesian coordinates
//! - CSV with labeled coordinates for clustering results
//! - CSV with one descriptor row per detected object

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use serde::Serialize;
use thiserror::Error;

use super::loaders::{PointCloud, DEFAULT_COLOR};

/// Errors that can occur during write operations.
#[derive(Error, Debug)]
pub enum WriteError {
    #[error("failed to create parent directories for '{path}': {source}")]
    CreateDirectory {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to create file '{path}': {source}")]
    CreateFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write to file '{path}': {source}")]
    WriteFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV write error for '{path}': {source}")]
    CsvError {
        path: String,
        #[source]
        source: csv::Error,
    },

    #[error("array length mismatch: coords has {coords_len} elements, labels has {labels_len} elements")]
    LengthMismatch { coords_len: usize, labels_len: usize },

    #[error("unsupported output format: {0}")]
    UnsupportedFormat(String),
}

/// Result type for write operations.
pub type Result<T> = std::result::Result<T, WriteError>;

/// One row of `objects.csv`.
#[derive(Debug, Clone, Serialize)]
pub struct ObjectRecord {
    pub id: usize,
    pub points: usize,
    pub center_x: f64,
    pub center_y: f64,
    pub center_z: f64,
    pub min_x: f64,
    pub min_y: f64,
    pub min_z: f64,
    pub max_x: f64,
    pub max_y: f64,
    pub max_z: f64,
    pub x_width: f64,
    pub y_width: f64,
    pub height: f64,
    pub std_x: f64,
    pub std_y: f64,
}

fn ensure_parent_dirs(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| WriteError::CreateDirectory {
                path: parent.display().to_string(),
                source: e,
            })?;
        }
    }
    Ok(())
}

fn create_buffered_writer(path: &Path) -> Result<BufWriter<File>> {
    ensure_parent_dirs(path)?;
    let file = File::create(path).map_err(|e| WriteError::CreateFile {
        path: path.display().to_string(),
        source: e,
    })?;
    Ok(BufWriter::new(file))
}

fn create_csv_writer(path: &Path) -> Result<csv::Writer<BufWriter<File>>> {
    Ok(csv::Writer::from_writer(create_buffered_writer(path)?))
}

/// Write a cloud as PLY or CSV depending on the extension of `path`.
///
/// # Errors
///
/// Returns `UnsupportedFormat` for extensions other than `ply` and `csv`.
pub fn write_point_cloud(path: &Path, cloud: &PointCloud) -> Result<()> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "ply" => write_ply(path, cloud),
        "csv" => write_cartesian_csv(path, cloud),
        _ => Err(WriteError::UnsupportedFormat(path.display().to_string())),
    }
}

/// Write point cloud to ASCII PLY file with RGB colors.
///
/// Points of an uncolored cloud are written light gray (180, 180, 180) so
/// every output file carries the same vertex layout.
///
/// # Example
///
/// ```no_run
/// use tabletop_scene::core::loaders::PointCloud;
/// use tabletop_scene::core::writers::write_ply;
/// use std::path::Path;
///
/// let cloud = PointCloud::default();
/// write_ply(Path::new("output.ply"), &cloud).unwrap();
/// ```
pub fn write_ply(path: &Path, cloud: &PointCloud) -> Result<()> {
    let mut writer = create_buffered_writer(path)?;
    let io_err = |e| WriteError::WriteFile {
        path: path.display().to_string(),
        source: e,
    };

    let header = [
        "ply".to_string(),
        "format ascii 1.0".to_string(),
        format!("element vertex {}", cloud.len()),
        "property double x".to_string(),
        "property double y".to_string(),
        "property double z".to_string(),
        "property uchar red".to_string(),
        "property uchar green".to_string(),
        "property uchar blue".to_string(),
        "end_header".to_string(),
    ];
    for line in &header {
        writeln!(writer, "{}", line).map_err(io_err)?;
    }

    for i in 0..cloud.len() {
        let [r, g, b] = cloud
            .colors
            .as_ref()
            .map(|c| c[i])
            .unwrap_or(DEFAULT_COLOR);
        writeln!(
            writer,
            "{:.6} {:.6} {:.6} {} {} {}",
            cloud.x[i], cloud.y[i], cloud.z[i], r, g, b
        )
        .map_err(io_err)?;
    }

    writer.flush().map_err(io_err)?;
    Ok(())
}

/// Write point cloud to CSV with x, y, z columns.
pub fn write_cartesian_csv(path: &Path, cloud: &PointCloud) -> Result<()> {
    let mut csv_writer = create_csv_writer(path)?;
    let path_str = path.display().to_string();
    let csv_err = |e| WriteError::CsvError {
        path: path_str.clone(),
        source: e,
    };

    csv_writer.write_record(["x", "y", "z"]).map_err(csv_err)?;
    for i in 0..cloud.len() {
        csv_writer
            .write_record(&[
                format!("{:.6}", cloud.x[i]),
                format!("{:.6}", cloud.y[i]),
                format!("{:.6}", cloud.z[i]),
            ])
            .map_err(csv_err)?;
    }

    csv_writer.flush().map_err(|e| WriteError::WriteFile {
        path: path_str.clone(),
        source: e,
    })?;
    Ok(())
}

/// Write labeled coordinates to CSV (`x,y,z,label`).
///
/// # Errors
///
/// Returns `LengthMismatch` if `coords` and `labels` differ in length.
pub fn write_labels_csv(path: &Path, coords: &[[f64; 3]], labels: &[i32]) -> Result<()> {
    if coords.len() != labels.len() {
        return Err(WriteError::LengthMismatch {
            coords_len: coords.len(),
            labels_len: labels.len(),
        });
    }

    let mut csv_writer = create_csv_writer(path)?;
    let path_str = path.display().to_string();
    let csv_err = |e| WriteError::CsvError {
        path: path_str.clone(),
        source: e,
    };

    csv_writer
        .write_record(["x", "y", "z", "label"])
        .map_err(csv_err)?;
    for (coord, label) in coords.iter().zip(labels.iter()) {
        csv_writer
            .write_record(&[
                format!("{:.6}", coord[0]),
                format!("{:.6}", coord[1]),
                format!("{:.6}", coord[2]),
                label.to_string(),
            ])
            .map_err(csv_err)?;
    }

    csv_writer.flush().map_err(|e| WriteError::WriteFile {
        path: path_str.clone(),
        source: e,
    })?;
    Ok(())
}

/// Write one row per object, header taken from [`ObjectRecord`]'s fields.
pub fn write_objects_csv(path: &Path, records: &[ObjectRecord]) -> Result<()> {
    let mut csv_writer = create_csv_writer(path)?;
    let path_str = path.display().to_string();

    if records.is_empty() {
        // serde only emits the header alongside the first row
        csv_writer
            .write_record([
                "id", "points", "center_x", "center_y", "center_z", "min_x", "min_y", "min_z",
                "max_x", "max_y", "max_z", "x_width", "y_width", "height", "std_x", "std_y",
            ])
            .map_err(|e| WriteError::CsvError {
                path: path_str.clone(),
                source: e,
            })?;
    }
    for record in records {
        csv_writer.serialize(record).map_err(|e| WriteError::CsvError {
            path: path_str.clone(),
            source: e,
        })?;
    }

    csv_writer.flush().map_err(|e| WriteError::WriteFile {
        path: path_str.clone(),
        source: e,
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::loaders::{load_cartesian_csv, load_ply};
    use std::fs;
    use tempfile::tempdir;

    fn create_test_cloud() -> PointCloud {
        PointCloud {
            x: vec![1.0, 2.0, 3.0],
            y: vec![4.0, 5.0, 6.0],
            z: vec![7.0, 8.0, 9.0],
            colors: None,
        }
    }

    fn create_test_cloud_with_colors() -> PointCloud {
        PointCloud {
            x: vec![1.0, 2.0],
            y: vec![3.0, 4.0],
            z: vec![5.0, 6.0],
            colors: Some(vec![[255, 0, 0], [0, 255, 0]]),
        }
    }

    fn record(id: usize) -> ObjectRecord {
        ObjectRecord {
            id,
            points: 200,
            center_x: 0.1,
            center_y: 0.1,
            center_z: 0.05,
            min_x: 0.084,
            min_y: 0.084,
            min_z: 0.022,
            max_x: 0.116,
            max_y: 0.116,
            max_z: 0.078,
            x_width: 0.032,
            y_width: 0.032,
            height: 0.056,
            std_x: 0.011,
            std_y: 0.011,
        }
    }

    #[test]
    fn test_write_ply_without_colors() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.ply");

        write_ply(&path, &create_test_cloud()).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();

        assert_eq!(lines[0], "ply");
        assert_eq!(lines[1], "format ascii 1.0");
        assert_eq!(lines[2], "element vertex 3");
        assert_eq!(lines[9], "end_header");
        assert!(lines[10].ends_with("180 180 180"));
    }

    #[test]
    fn test_write_ply_with_colors_loads_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.ply");
        let cloud = create_test_cloud_with_colors();

        write_ply(&path, &cloud).unwrap();
        let loaded = load_ply(&path).unwrap();

        assert_eq!(loaded, cloud);
    }

    #[test]
    fn test_write_ply_creates_parent_dirs() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("subdir").join("nested").join("test.ply");

        write_ply(&path, &create_test_cloud()).unwrap();

        assert!(path.exists());
    }

    #[test]
    fn test_write_point_cloud_dispatch() {
        let dir = tempdir().unwrap();
        let csv_path = dir.path().join("out.CSV");

        write_point_cloud(&csv_path, &create_test_cloud()).unwrap();
        let content = fs::read_to_string(&csv_path).unwrap();
        assert_eq!(content.lines().next(), Some("x,y,z"));
        assert_eq!(load_cartesian_csv(&csv_path).unwrap().len(), 3);

        let err = write_point_cloud(&dir.path().join("out.xyz"), &create_test_cloud()).unwrap_err();
        assert!(matches!(err, WriteError::UnsupportedFormat(_)));
    }

    #[test]
    fn test_write_labels_csv() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("labels.csv");
        let coords = vec![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]];

        write_labels_csv(&path, &coords, &[0, -1]).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();

        assert_eq!(lines[0], "x,y,z,label");
        assert_eq!(lines.len(), 3);
        assert!(lines[1].ends_with(",0"));
        assert!(lines[2].ends_with(",-1"));
    }

    #[test]
    fn test_write_labels_csv_length_mismatch() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("labels.csv");

        let result = write_labels_csv(&path, &[[1.0, 2.0, 3.0]], &[0, 1]);

        match result.unwrap_err() {
            WriteError::LengthMismatch {
                coords_len,
                labels_len,
            } => {
                assert_eq!(coords_len, 1);
                assert_eq!(labels_len, 2);
            }
            other => panic!("Expected LengthMismatch error, got {other}"),
        }
        assert!(!path.exists());
    }

    #[test]
    fn test_write_objects_csv() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("objects.csv");

        write_objects_csv(&path, &[record(0), record(1)]).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("id,points,center_x"));
        assert!(lines[0].ends_with("std_x,std_y"));
        assert!(lines[2].starts_with("1,200,0.1,"));
    }

    #[test]
    fn test_write_objects_csv_empty_has_header() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("objects.csv");

        write_objects_csv(&path, &[]).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 1);
        assert!(content.starts_with("id,points,"));
    }
}
