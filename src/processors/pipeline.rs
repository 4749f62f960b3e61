//! End-to-end scene processing: load, down-sample, locate the table,
//! calibrate, crop and segment.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;

use crate::config::PipelineConfig;
use crate::core::loaders::PointCloud;
use crate::core::scene::SceneCloud;
use crate::core::writers::{write_objects_csv, write_ply, ObjectRecord};
use crate::error::Result;

use super::calibration::{calibrate, crop_region};
use super::plane::PlaneFitter;
use super::segmentation::{segment_objects, DetectedObject};
use super::table::{locate_table, TableEstimate};

/// File extensions the loaders understand.
const SCENE_EXTENSIONS: [&str; 3] = ["ply", "pcd", "csv"];

/// Everything one run produced.
#[derive(Debug, Clone)]
pub struct SceneReport {
    pub scene_id: Option<u32>,
    pub input_points: usize,
    pub downsampled_points: usize,
    pub table: TableEstimate,
    pub cropped_points: usize,
    /// Table surface in the calibrated frame
    pub table_inliers: PointCloud,
    pub objects: Vec<DetectedObject>,
}

impl SceneReport {
    /// Write `table.ply`, one `object_<id>.ply` per object and `objects.csv`
    /// into `dir`, returning the written paths.
    pub fn save(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let mut written = Vec::with_capacity(self.objects.len() + 2);

        let table_path = dir.join("table.ply");
        write_ply(&table_path, &self.table_inliers)?;
        written.push(table_path);

        for object in &self.objects {
            let path = dir.join(format!("object_{}.ply", object.id));
            write_ply(&path, &object.points)?;
            written.push(path);
        }

        let records: Vec<ObjectRecord> = self.objects.iter().map(DetectedObject::record).collect();
        let csv_path = dir.join("objects.csv");
        write_objects_csv(&csv_path, &records)?;
        written.push(csv_path);

        log::info!("Wrote {} files to {}", written.len(), dir.display());
        Ok(written)
    }
}

/// Runs every stage for one scene with a fixed configuration.
///
/// Each run owns its clouds and its RNG, so separate runs share no state.
#[derive(Debug, Clone, Default)]
pub struct ScenePipeline {
    config: PipelineConfig,
}

impl ScenePipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Process the scene at `path`, taking the scene id from its file name.
    pub fn run(&self, path: &Path) -> Result<SceneReport> {
        self.run_scene(path, scene_id_from_path(path))
    }

    /// Process the scene at `path` with an explicit scene id (selects the
    /// per-scene calibration override, if any).
    pub fn run_scene(&self, path: &Path, scene_id: Option<u32>) -> Result<SceneReport> {
        log::info!("Loading {}", path.display());
        let scene = SceneCloud::load(path)?;
        self.process(scene, scene_id)
    }

    /// Run all stages on an already loaded scene.
    ///
    /// # Errors
    ///
    /// Any stage error: `InvalidVoxelSize`, `EmptyCloud`, `TableNotFound`,
    /// plane fitting errors.
    pub fn process(&self, mut scene: SceneCloud, scene_id: Option<u32>) -> Result<SceneReport> {
        let input_points = scene.original().len();
        let mut fitter = PlaneFitter::new(self.config.seed);

        let downsampled_points = scene.downsample(self.config.preprocess.voxel_size)?.len();
        log::info!(
            "Down-sampled {} -> {} points (voxel {})",
            input_points,
            downsampled_points,
            self.config.preprocess.voxel_size
        );

        let table = locate_table(scene.working(), &self.config.table, &mut fitter)?;

        let calibration = self.config.calibration_for(scene_id);
        if scene_id.is_some_and(|id| self.config.scenes.contains_key(&id)) {
            log::info!("Using calibration override for scene {:?}", scene_id);
        }
        calibrate(scene.working_mut(), calibration, Some(table.offset));

        let cropped = crop_region(scene.working(), &calibration.crop)?;
        let cropped_points = cropped.len();

        let segmentation = segment_objects(&cropped, &self.config.segmentation, &mut fitter)?;

        for object in &segmentation.objects {
            log::info!(
                "Object {}: {} points at [{:.3}, {:.3}, {:.3}], size {:.3} x {:.3} x {:.3}",
                object.id,
                object.point_count(),
                object.center[0],
                object.center[1],
                object.center[2],
                object.x_width,
                object.y_width,
                object.height
            );
        }

        Ok(SceneReport {
            scene_id,
            input_points,
            downsampled_points,
            table,
            cropped_points,
            table_inliers: segmentation.table_inliers,
            objects: segmentation.objects,
        })
    }

    /// Only down-sample and locate the table.
    pub fn locate(&self, path: &Path) -> Result<TableEstimate> {
        let mut scene = SceneCloud::load(path)?;
        scene.downsample(self.config.preprocess.voxel_size)?;
        let mut fitter = PlaneFitter::new(self.config.seed);
        locate_table(scene.working(), &self.config.table, &mut fitter)
    }
}

/// First run of digits in the file stem, e.g. `scene_14.ply` -> 14.
pub fn scene_id_from_path(path: &Path) -> Option<u32> {
    let pattern = Regex::new(r"\d+").ok()?;
    let stem = path.file_stem()?.to_str()?;
    pattern.find(stem)?.as_str().parse().ok()
}

/// Scene files in `directory`, keyed by scene id.
///
/// Files with an unsupported extension or no digits in their name are
/// skipped; when two files share an id the first in name order wins.
pub fn find_scenes(directory: &Path) -> BTreeMap<u32, PathBuf> {
    let mut files: Vec<PathBuf> = fs::read_dir(directory)
        .into_iter()
        .flatten()
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| SCENE_EXTENSIONS.iter().any(|e| ext.eq_ignore_ascii_case(e)))
                .unwrap_or(false)
        })
        .collect();
    files.sort();

    let mut scenes = BTreeMap::new();
    for path in files {
        if let Some(id) = scene_id_from_path(&path) {
            scenes.entry(id).or_insert(path);
        }
    }
    scenes
}
