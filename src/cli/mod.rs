//! Command-line interface for the tabletop scene pipeline.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use log::{error, info, warn};
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::core::loaders::load_point_cloud;
use crate::core::transforms::voxel_downsample;
use crate::core::writers::write_point_cloud;
use crate::processors::clustering::cluster_file;
use crate::processors::pipeline::{find_scenes, SceneReport, ScenePipeline};
use crate::PipelineConfig;

#[derive(Parser)]
#[command(name = "tabletop-scene")]
#[command(about = "Table detection and object segmentation for RGB-D point clouds", version)]
pub struct Cli {
    /// Path to YAML config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Increase verbosity
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Locate the table, calibrate and segment objects
    Process {
        /// Input cloud (PLY, PCD or CSV) or a directory of scenes
        input: PathBuf,
        /// Output directory for table.ply, object PLYs and objects.csv
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
        /// Scene number for calibration overrides (defaults to the file name)
        #[arg(long)]
        scene: Option<u32>,
        /// RANSAC seed
        #[arg(long)]
        seed: Option<u64>,
        /// Voxel size for down-sampling
        #[arg(long)]
        voxel_size: Option<f64>,
    },

    /// Only locate the table and print its offset
    Locate {
        /// Input cloud
        input: PathBuf,
        /// RANSAC seed
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Voxel down-sample a cloud
    Downsample {
        /// Input cloud
        input: PathBuf,
        /// Output PLY or CSV
        output: PathBuf,
        /// Voxel size (defaults to the configured one)
        #[arg(long)]
        voxel_size: Option<f64>,
    },

    /// Run DBSCAN on a cloud and write per-point labels
    Cluster {
        /// Input cloud
        input: PathBuf,
        /// Output directory for the labels CSV
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
        /// Neighborhood radius (defaults to the object clustering radius)
        #[arg(long)]
        eps: Option<f64>,
        /// Minimum neighborhood size for a core point
        #[arg(long)]
        min_points: Option<usize>,
    },

    /// Write the default configuration to a YAML file
    InitConfig {
        /// Output YAML path
        path: PathBuf,
    },
}

/// Create a spinner for indeterminate operations
fn create_spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
        pb.set_style(style);
    }
    pb.set_message(message.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}

/// Print a summary box
fn print_summary(title: &str, items: &[(&str, String)]) {
    println!();
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║ {:<62} ║", title);
    println!("╠══════════════════════════════════════════════════════════════╣");
    for (key, value) in items {
        let display_value = if value.chars().count() > 39 {
            format!("{}...", value.chars().take(36).collect::<String>())
        } else {
            value.clone()
        };
        println!("║ {:<20}: {:<39} ║", key, display_value);
    }
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();
}

fn format_point(p: [f64; 3]) -> String {
    format!("[{:.4}, {:.4}, {:.4}]", p[0], p[1], p[2])
}

pub fn run() {
    let cli = Cli::parse();

    env_logger::Builder::new()
        .filter_level(match cli.verbose {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Info,
            _ => log::LevelFilter::Debug,
        })
        .format_timestamp_secs()
        .init();

    info!("tabletop-scene {}", crate::VERSION);

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("{:#}", e);
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Process {
            input,
            output_dir,
            scene,
            seed,
            voxel_size,
        } => cmd_process(&input, output_dir, scene, seed, voxel_size, config),
        Commands::Locate { input, seed } => cmd_locate(&input, seed, config),
        Commands::Downsample {
            input,
            output,
            voxel_size,
        } => cmd_downsample(&input, &output, voxel_size, &config),
        Commands::Cluster {
            input,
            output_dir,
            eps,
            min_points,
        } => cmd_cluster(&input, output_dir, eps, min_points, &config),
        Commands::InitConfig { path } => cmd_init_config(&path, &config),
    };

    if let Err(e) = result {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

/// The config at `path`, or the defaults when no path is given. A config
/// that cannot be read or parsed is an error.
fn load_config(path: Option<&Path>) -> anyhow::Result<PipelineConfig> {
    let Some(path) = path else {
        return Ok(PipelineConfig::default());
    };
    match PipelineConfig::from_yaml(path) {
        Ok(config) => {
            info!("Loaded config from: {}", path.display());
            Ok(config)
        }
        Err(e) => bail!("failed to load config from {}: {}", path.display(), e),
    }
}

fn report_items(report: &SceneReport, start: Instant) -> Vec<(&'static str, String)> {
    let mut items = vec![
        (
            "Scene",
            report
                .scene_id
                .map_or_else(|| "-".to_string(), |id| id.to_string()),
        ),
        ("Input points", report.input_points.to_string()),
        ("Down-sampled", report.downsampled_points.to_string()),
        ("Table points", report.table.point_count.to_string()),
        ("Table offset", format_point(report.table.offset)),
        ("Cropped points", report.cropped_points.to_string()),
        ("Table inliers", report.table_inliers.len().to_string()),
        ("Objects", report.objects.len().to_string()),
    ];
    for object in &report.objects {
        items.push(("  center", format_point(object.center)));
    }
    items.push(("Duration", format!("{:.2?}", start.elapsed())));
    items
}

fn cmd_process(
    input: &Path,
    output_dir: Option<PathBuf>,
    scene: Option<u32>,
    seed: Option<u64>,
    voxel_size: Option<f64>,
    mut config: PipelineConfig,
) -> anyhow::Result<()> {
    if seed.is_some() {
        config.seed = seed;
    }
    if let Some(v) = voxel_size {
        config.preprocess.voxel_size = v;
    }
    let pipeline = ScenePipeline::new(config);

    if input.is_dir() {
        return process_directory(&pipeline, input, output_dir);
    }

    let start = Instant::now();
    let spinner = create_spinner("Processing scene...");
    let outcome = match scene {
        Some(id) => pipeline.run_scene(input, Some(id)),
        None => pipeline.run(input),
    };
    spinner.finish_and_clear();
    let report = outcome.with_context(|| format!("processing {}", input.display()))?;

    if let Some(dir) = &output_dir {
        report
            .save(dir)
            .with_context(|| format!("saving results to {}", dir.display()))?;
    }

    let mut items = report_items(&report, start);
    items.insert(0, ("Input file", input.display().to_string()));
    if let Some(dir) = &output_dir {
        items.push(("Output directory", dir.display().to_string()));
    }
    print_summary("Scene Processing Complete", &items);
    Ok(())
}

fn process_directory(
    pipeline: &ScenePipeline,
    directory: &Path,
    output_dir: Option<PathBuf>,
) -> anyhow::Result<()> {
    let start = Instant::now();
    let scenes = find_scenes(directory);
    if scenes.is_empty() {
        bail!("no scene files found in {}", directory.display());
    }

    let pb = ProgressBar::new(scenes.len() as u64);
    if let Ok(style) = ProgressStyle::default_bar().template("{bar:40.green} {pos}/{len} {msg}") {
        pb.set_style(style);
    }

    let mut processed = 0usize;
    let mut failed = 0usize;
    let mut objects = 0usize;
    for (id, path) in &scenes {
        pb.set_message(format!("scene {}", id));
        match pipeline.run_scene(path, Some(*id)) {
            Ok(report) => {
                objects += report.objects.len();
                if let Some(dir) = &output_dir {
                    let scene_dir = dir.join(format!("scene_{}", id));
                    report
                        .save(&scene_dir)
                        .with_context(|| format!("saving results to {}", scene_dir.display()))?;
                }
                processed += 1;
            }
            Err(e) => {
                warn!("Scene {} ({}) failed: {}", id, path.display(), e);
                failed += 1;
            }
        }
        pb.inc(1);
    }
    pb.finish_and_clear();

    print_summary(
        "Batch Processing Complete",
        &[
            ("Directory", directory.display().to_string()),
            ("Scenes processed", processed.to_string()),
            ("Scenes failed", failed.to_string()),
            ("Objects found", objects.to_string()),
            ("Duration", format!("{:.2?}", start.elapsed())),
        ],
    );
    Ok(())
}

fn cmd_locate(input: &Path, seed: Option<u64>, mut config: PipelineConfig) -> anyhow::Result<()> {
    if seed.is_some() {
        config.seed = seed;
    }
    let start = Instant::now();
    let spinner = create_spinner("Locating table...");
    let outcome = ScenePipeline::new(config).locate(input);
    spinner.finish_and_clear();
    let table = outcome.with_context(|| format!("locating table in {}", input.display()))?;

    let [a, b, c, d] = table.plane.coefficients();
    print_summary(
        "Table Located",
        &[
            ("Input file", input.display().to_string()),
            ("Table points", table.point_count.to_string()),
            ("Table center", format_point(table.center)),
            ("Offset", format_point(table.offset)),
            ("Plane", format!("[{:.3}, {:.3}, {:.3}, {:.3}]", a, b, c, d)),
            ("Duration", format!("{:.2?}", start.elapsed())),
        ],
    );
    Ok(())
}

fn cmd_downsample(
    input: &Path,
    output: &Path,
    voxel_size: Option<f64>,
    config: &PipelineConfig,
) -> anyhow::Result<()> {
    let start = Instant::now();
    let voxel = voxel_size.unwrap_or(config.preprocess.voxel_size);

    let spinner = create_spinner("Down-sampling point cloud...");
    let cloud = load_point_cloud(input).with_context(|| format!("loading {}", input.display()))?;
    let down = voxel_downsample(&cloud, voxel)?;
    write_point_cloud(output, &down).with_context(|| format!("writing {}", output.display()))?;
    spinner.finish_and_clear();

    print_summary(
        "Down-sampling Complete",
        &[
            ("Input file", input.display().to_string()),
            ("Output file", output.display().to_string()),
            ("Voxel size", voxel.to_string()),
            ("Points", format!("{} -> {}", cloud.len(), down.len())),
            ("Duration", format!("{:.2?}", start.elapsed())),
        ],
    );
    Ok(())
}

fn cmd_cluster(
    input: &Path,
    output_dir: Option<PathBuf>,
    eps: Option<f64>,
    min_points: Option<usize>,
    config: &PipelineConfig,
) -> anyhow::Result<()> {
    let start = Instant::now();
    let eps = eps.unwrap_or(config.segmentation.cluster_eps);
    let min_points = min_points.unwrap_or(config.segmentation.cluster_min_points);

    let spinner = create_spinner("Clustering point cloud...");
    let outcome = cluster_file(input, output_dir.as_deref(), eps, min_points);
    spinner.finish_and_clear();
    let (csv_path, labels) = outcome.with_context(|| format!("clustering {}", input.display()))?;

    let noise_count = labels.iter().filter(|&&l| l < 0).count();
    let cluster_count = labels.iter().copied().max().map_or(0, |m| (m + 1).max(0));

    print_summary(
        "Clustering Complete",
        &[
            ("Input file", input.display().to_string()),
            ("Output CSV", csv_path.display().to_string()),
            ("Points processed", labels.len().to_string()),
            ("Clusters found", cluster_count.to_string()),
            ("Noise points", noise_count.to_string()),
            ("eps", eps.to_string()),
            ("min_points", min_points.to_string()),
            ("Duration", format!("{:.2?}", start.elapsed())),
        ],
    );
    Ok(())
}

fn cmd_init_config(path: &Path, config: &PipelineConfig) -> anyhow::Result<()> {
    if path.exists() {
        bail!("{} already exists", path.display());
    }
    config
        .to_yaml(path)
        .map_err(|e| anyhow::anyhow!("writing {}: {}", path.display(), e))?;
    println!("Wrote configuration to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_load_config_defaults_without_path() {
        let config = load_config(None).unwrap();
        assert_eq!(config.calibration.steps.len(), 2);
    }

    #[test]
    fn test_load_config_reads_yaml() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("scene.yaml");
        std::fs::write(&path, "seed: 9\n").unwrap();
        assert_eq!(load_config(Some(&path)).unwrap().seed, Some(9));
    }

    #[test]
    fn test_load_config_rejects_bad_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.yaml");
        std::fs::write(&path, "table: [not, a, mapping\n").unwrap();
        assert!(load_config(Some(&path)).is_err());
        assert!(load_config(Some(&dir.path().join("missing.yaml"))).is_err());
    }
}
