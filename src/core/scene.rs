//! Original/working cloud pair for one scene-processing run.

use std::path::Path;

use super::loaders::{load_point_cloud, PointCloud};
use super::transforms::voxel_downsample;
use crate::error::Result;

/// A loaded scene: the cloud exactly as read from disk plus a working copy
/// that later stages transform.
///
/// The original is never mutated, so the working copy can always be reset or
/// re-derived from it.
#[derive(Debug, Clone)]
pub struct SceneCloud {
    original: PointCloud,
    working: PointCloud,
}

impl SceneCloud {
    /// Load a scene from disk; the result is both original and working copy.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let cloud = load_point_cloud(path)?;
        Ok(Self::from_cloud(cloud))
    }

    pub fn from_cloud(cloud: PointCloud) -> Self {
        Self {
            working: cloud.clone(),
            original: cloud,
        }
    }

    #[inline]
    pub fn original(&self) -> &PointCloud {
        &self.original
    }

    #[inline]
    pub fn working(&self) -> &PointCloud {
        &self.working
    }

    #[inline]
    pub fn working_mut(&mut self) -> &mut PointCloud {
        &mut self.working
    }

    /// Discard all work and start again from the original.
    pub fn reset(&mut self) {
        self.working = self.original.clone();
    }

    /// Replace the working copy with a voxel down-sample of the original.
    ///
    /// Always derived from the original, so calling this twice with different
    /// sizes never compounds.
    pub fn downsample(&mut self, voxel_size: f64) -> Result<&PointCloud> {
        self.working = voxel_downsample(&self.original, voxel_size)?;
        Ok(&self.working)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::transforms::translate;

    fn line_cloud(n: usize, spacing: f64) -> PointCloud {
        PointCloud::from_xyz(
            (0..n).map(|i| i as f64 * spacing).collect(),
            vec![0.0; n],
            vec![0.0; n],
        )
    }

    #[test]
    fn test_downsample_always_starts_from_original() {
        let mut scene = SceneCloud::from_cloud(line_cloud(100, 0.01));

        let coarse = scene.downsample(0.5).unwrap().len();
        let fine = scene.downsample(0.02).unwrap().len();

        assert!(coarse < fine);
        assert_eq!(scene.original().len(), 100);
    }

    #[test]
    fn test_reset_restores_original() {
        let mut scene = SceneCloud::from_cloud(line_cloud(3, 1.0));
        translate(scene.working_mut(), [1.0, 0.0, 0.0]);
        assert_eq!(scene.working().x, vec![1.0, 2.0, 3.0]);
        assert_eq!(scene.original().x, vec![0.0, 1.0, 2.0]);

        scene.reset();
        assert_eq!(scene.working(), scene.original());
    }
}
