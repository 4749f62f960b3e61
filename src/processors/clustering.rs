//! Parallel DBSCAN clustering for 3D point sets.
//!
//! This module implements DBSCAN using:
//! - `kiddo` immutable KD-tree for O(log n) radius queries (it tolerates
//!   the long runs of equal coordinates a flat surface produces)
//! - `rayon` for parallel neighbor finding and core point identification
//! - Atomic union-find for lock-free cluster merging
//!
//! # Example
//!
//! ```
//! use tabletop_scene::processors::clustering::{dbscan, NOISE_LABEL};
//!
//! let coords = vec![[0.0, 0.0, 0.0], [0.01, 0.0, 0.0], [5.0, 5.0, 5.0]];
//! let labels = dbscan(&coords, 0.05, 2);
//! assert_eq!(labels[0], labels[1]);
//! assert_eq!(labels[2], NOISE_LABEL);
//! ```

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use kiddo::immutable::float::kdtree::ImmutableKdTree;
use kiddo::SquaredEuclidean;
use rayon::prelude::*;

use crate::core::loaders::PointCloud;
use crate::error::Result;

/// Label of points not density-reachable from any core point.
///
/// Real cluster ids start at 0, so this value is never a cluster id.
pub const NOISE_LABEL: i32 = -1;

/// Atomic Union-Find data structure for lock-free parallel cluster merging.
///
/// Uses path compression with atomic compare-and-swap operations to safely
/// merge clusters from multiple threads without locks.
pub struct AtomicUnionFind {
    parent: Vec<AtomicUsize>,
}

impl AtomicUnionFind {
    /// Create a new union-find structure where each element is its own parent.
    #[inline]
    pub fn new(size: usize) -> Self {
        let parent = (0..size).map(AtomicUsize::new).collect();
        Self { parent }
    }

    /// Find the root of the set containing `x` with path compression.
    ///
    /// Relaxed loads are enough here: concurrent unions only ever move a
    /// root under a larger root, so the walk always converges.
    #[inline]
    pub fn find(&self, mut x: usize) -> usize {
        loop {
            let p = self.parent[x].load(Ordering::Relaxed);
            if p == x {
                return x;
            }
            let gp = self.parent[p].load(Ordering::Relaxed);
            if gp != p {
                // ok if this loses a race
                let _ = self.parent[x].compare_exchange_weak(
                    p,
                    gp,
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                );
            }
            x = p;
        }
    }

    /// Union the sets containing `x` and `y`.
    ///
    /// Returns true if a merge actually occurred, false if they were already
    /// in the same set.
    #[inline]
    pub fn union(&self, x: usize, y: usize) -> bool {
        loop {
            let root_x = self.find(x);
            let root_y = self.find(y);

            if root_x == root_y {
                return false;
            }

            // Smaller root always points to the larger one
            let (small, large) = if root_x < root_y {
                (root_x, root_y)
            } else {
                (root_y, root_x)
            };

            match self.parent[small].compare_exchange_weak(
                small,
                large,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(_) => continue,
            }
        }
    }
}

/// DBSCAN clustering.
///
/// Two points are neighbors if their Euclidean distance is at most `eps`.
/// A point is a core point if its neighborhood, the point itself included,
/// holds at least `min_points` points. Clusters are the connected components
/// of core points; a non-core point joins the cluster of its first core
/// neighbor and is [`NOISE_LABEL`] if it has none.
///
/// # Algorithm (Parallelized)
///
/// 1. **Build KD-tree**: O(n log n) construction using kiddo
/// 2. **Parallel neighbor finding**: rayon radius queries, one per point
/// 3. **Parallel core point identification**
/// 4. **Lock-free cluster formation**: atomic union-find over core pairs
/// 5. **Label assignment**: cluster ids numbered 0, 1, ... in order of each
///    cluster's lowest core index, so labels are identical from run to run
///
/// # Returns
///
/// One label per input point, in input order.
pub fn dbscan(coords: &[[f64; 3]], eps: f64, min_points: usize) -> Vec<i32> {
    let n = coords.len();
    if n == 0 {
        return Vec::new();
    }

    let tree: ImmutableKdTree<f64, u64, 3, 32> = ImmutableKdTree::new_from_slice(coords);
    let eps_sq = eps * eps;

    let neighbors: Vec<Vec<usize>> = coords
        .par_iter()
        .map(|coord| {
            let mut found: Vec<usize> = tree
                .within::<SquaredEuclidean>(coord, eps_sq)
                .iter()
                .map(|nn| nn.item as usize)
                .collect();
            found.sort_unstable();
            found
        })
        .collect();

    let is_core: Vec<bool> = neighbors
        .par_iter()
        .map(|neigh| neigh.len() >= min_points)
        .collect();

    let uf = AtomicUnionFind::new(n);

    (0..n).into_par_iter().for_each(|i| {
        if is_core[i] {
            for &j in &neighbors[i] {
                if is_core[j] {
                    uf.union(i, j);
                }
            }
        }
    });

    let mut root_to_cluster: HashMap<usize, i32> = HashMap::new();
    let mut next_cluster_id: i32 = 0;

    for i in 0..n {
        if is_core[i] {
            let root = uf.find(i);
            root_to_cluster.entry(root).or_insert_with(|| {
                let id = next_cluster_id;
                next_cluster_id += 1;
                id
            });
        }
    }

    let mut labels = vec![NOISE_LABEL; n];

    for i in 0..n {
        if is_core[i] {
            labels[i] = root_to_cluster[&uf.find(i)];
        } else if let Some(&j) = neighbors[i].iter().find(|&&j| is_core[j]) {
            labels[i] = root_to_cluster[&uf.find(j)];
        }
    }

    labels
}

/// Run [`dbscan`] over a cloud's coordinates.
pub fn cluster_point_cloud(cloud: &PointCloud, eps: f64, min_points: usize) -> Vec<i32> {
    let coords = cloud.to_coords();
    dbscan(&coords, eps, min_points)
}

/// Point indices per cluster id, noise excluded.
pub fn group_labels(labels: &[i32]) -> BTreeMap<i32, Vec<usize>> {
    let mut groups: BTreeMap<i32, Vec<usize>> = BTreeMap::new();
    for (i, &label) in labels.iter().enumerate() {
        if label != NOISE_LABEL {
            groups.entry(label).or_default().push(i);
        }
    }
    groups
}

/// Load a cloud, cluster it and write `<stem>_dbscan_labels.csv`.
///
/// The CSV lands in `output_dir`, or next to the input when none is given.
pub fn cluster_file(
    path: &Path,
    output_dir: Option<&Path>,
    eps: f64,
    min_points: usize,
) -> Result<(PathBuf, Vec<i32>)> {
    use crate::core::loaders::load_point_cloud;
    use crate::core::writers::write_labels_csv;

    let cloud = load_point_cloud(path)?;
    let file_name = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("unknown");

    let labels = cluster_point_cloud(&cloud, eps, min_points);

    let groups = group_labels(&labels);
    let noise = labels.iter().filter(|&&l| l == NOISE_LABEL).count();
    log::info!(
        "{}: {} clusters, {} noise points out of {}",
        file_name,
        groups.len(),
        noise,
        labels.len()
    );
    for (label, members) in &groups {
        log::debug!("{}: cluster {} has {} points", file_name, label, members.len());
    }

    let out_dir = output_dir
        .map(PathBuf::from)
        .unwrap_or_else(|| path.parent().unwrap_or(Path::new(".")).to_path_buf());
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("output");
    let csv_path = out_dir.join(format!("{}_dbscan_labels.csv", stem));

    write_labels_csv(&csv_path, &cloud.to_coords(), &labels)?;
    log::info!("Labels CSV -> {}", csv_path.display());

    Ok((csv_path, labels))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn blob(center: [f64; 3], side: usize, spacing: f64) -> Vec<[f64; 3]> {
        let mut pts = Vec::new();
        for i in 0..side {
            for j in 0..side {
                for k in 0..side {
                    pts.push([
                        center[0] + i as f64 * spacing,
                        center[1] + j as f64 * spacing,
                        center[2] + k as f64 * spacing,
                    ]);
                }
            }
        }
        pts
    }

    #[test]
    fn test_atomic_union_find_basic() {
        let uf = AtomicUnionFind::new(5);

        assert_eq!(uf.find(0), 0);
        assert_eq!(uf.find(4), 4);

        assert!(uf.union(0, 1));
        assert_eq!(uf.find(0), uf.find(1));

        assert!(uf.union(2, 3));
        assert_eq!(uf.find(2), uf.find(3));

        assert_ne!(uf.find(0), uf.find(2));

        assert!(uf.union(1, 2));
        assert_eq!(uf.find(0), uf.find(3));

        assert!(!uf.union(0, 3));
    }

    #[test]
    fn test_dbscan_separated_blobs() {
        let mut coords = blob([0.0, 0.0, 0.0], 4, 0.01);
        coords.extend(blob([1.0, 1.0, 0.0], 4, 0.01));

        let labels = dbscan(&coords, 0.015, 4);

        assert_eq!(labels.len(), 128);
        assert!(labels[..64].iter().all(|&l| l == 0));
        assert!(labels[64..].iter().all(|&l| l == 1));
    }

    #[test]
    fn test_dbscan_flat_grid() {
        // 120 x 100 grid with every z equal, as a table surface gives
        let mut coords = Vec::with_capacity(12_000);
        for i in 0..120 {
            for j in 0..100 {
                coords.push([i as f64 * 0.01, j as f64 * 0.01, 0.0]);
            }
        }
        coords.push([0.5, 0.5, 1.0]);

        let labels = dbscan(&coords, 0.015, 5);

        assert!(labels[..12_000].iter().all(|&l| l == 0));
        assert_eq!(labels[12_000], NOISE_LABEL);
    }

    #[test]
    fn test_dbscan_isolated_points_are_noise() {
        let mut coords = blob([0.0, 0.0, 0.0], 3, 0.01);
        coords.push([5.0, 0.0, 0.0]);
        coords.push([0.0, 5.0, 0.0]);
        coords.push([5.0, 5.1, 0.0]);

        let labels = dbscan(&coords, 0.02, 3);

        assert!(labels[..27].iter().all(|&l| l == 0));
        assert_eq!(&labels[27..], &[NOISE_LABEL; 3]);
        assert_eq!(group_labels(&labels).len(), 1);
    }

    #[test]
    fn test_dbscan_border_point_joins_cluster() {
        // Ends of the chain have only two neighbors but touch a core point
        let coords = vec![
            [0.0, 0.0, 0.0],
            [0.1, 0.0, 0.0],
            [0.2, 0.0, 0.0],
            [0.3, 0.0, 0.0],
            [1.0, 0.0, 0.0],
        ];
        let labels = dbscan(&coords, 0.11, 3);
        assert_eq!(labels, vec![0, 0, 0, 0, NOISE_LABEL]);
    }

    #[test]
    fn test_dbscan_min_points_counts_self() {
        let coords = vec![[0.0, 0.0, 0.0], [0.05, 0.0, 0.0]];
        assert_eq!(dbscan(&coords, 0.1, 2), vec![0, 0]);
        assert_eq!(dbscan(&coords, 0.1, 3), vec![NOISE_LABEL, NOISE_LABEL]);
    }

    #[test]
    fn test_dbscan_empty() {
        let coords: Vec<[f64; 3]> = vec![];
        assert!(dbscan(&coords, 0.1, 3).is_empty());
    }

    #[test]
    fn test_dbscan_single_point() {
        let labels = dbscan(&[[0.0, 0.0, 0.0]], 0.1, 2);
        assert_eq!(labels, vec![NOISE_LABEL]);
    }

    #[test]
    fn test_group_labels_skips_noise() {
        let groups = group_labels(&[1, NOISE_LABEL, 0, 1, 0, NOISE_LABEL]);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[&0], vec![2, 4]);
        assert_eq!(groups[&1], vec![0, 3]);
    }

    #[test]
    fn test_cluster_file_writes_labels() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("blobs.csv");
        let mut content = String::from("x,y,z\n");
        for p in blob([0.0, 0.0, 0.0], 3, 0.01) {
            content.push_str(&format!("{},{},{}\n", p[0], p[1], p[2]));
        }
        content.push_str("9,9,9\n");
        std::fs::write(&input, content).unwrap();

        let (csv_path, labels) = cluster_file(&input, None, 0.02, 3).unwrap();

        assert_eq!(csv_path, dir.path().join("blobs_dbscan_labels.csv"));
        assert_eq!(labels.len(), 28);
        assert_eq!(labels[27], NOISE_LABEL);
        let written = std::fs::read_to_string(&csv_path).unwrap();
        assert_eq!(written.lines().count(), 29);
    }
}
