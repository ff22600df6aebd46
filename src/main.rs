//! landclass command line
//!
//! Trains decision trees on labeled Landsat scenes and classifies scenes with them.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use geo::Geometry;
use landclass::core::classify::ClassifiedRaster;
use landclass::io::metadata::SceneMetadata;
use landclass::io::scene::{discover_bands, load_scene, Scene};
use landclass::io::training::{read_study_area, read_training_sites};
use landclass::io::{load_tree, save_tree, skip_unsupported, write_classified, write_reflectance};
use landclass::render::{save_png, ClassPalette};
use landclass::{Pipeline, PipelineConfig, ReflectanceRaster, TreeClassifier};
use serde_json::json;
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(name = "landclass")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Land-cover classification of Landsat scenes with decision trees", long_about = None)]
struct Cli {
    /// JSON configuration file (bands, calibration, extraction and tree settings)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the surface-reflectance band files of a scene directory
    Bands { dir: PathBuf },

    /// Grow a decision tree from training sites and save it
    Train {
        #[command(flatten)]
        scene: SceneArgs,

        /// GeoJSON feature collection of labeled training sites
        #[arg(long)]
        sites: PathBuf,

        /// Feature property holding the class label
        #[arg(long)]
        label_property: Option<String>,

        /// Output model JSON
        #[arg(short, long, default_value = "model.json")]
        output: PathBuf,
    },

    /// Classify a scene with a saved tree
    Classify {
        #[command(flatten)]
        scene: SceneArgs,

        /// Model JSON written by `train`
        #[arg(short, long)]
        model: PathBuf,

        /// Output directory for the map, quicklook and legend
        #[arg(short, long, default_value = "out")]
        output: PathBuf,

        /// Also write the corrected reflectance stack as a GeoTIFF
        #[arg(long)]
        write_reflectance: bool,
    },

    /// Train on a scene and classify it in one go
    Run {
        #[command(flatten)]
        scene: SceneArgs,

        #[arg(long)]
        sites: PathBuf,

        #[arg(long)]
        label_property: Option<String>,

        #[arg(short, long, default_value = "out")]
        output: PathBuf,

        #[arg(long)]
        write_reflectance: bool,
    },
}

#[derive(clap::Args, Debug)]
struct SceneArgs {
    /// Directory holding the `*_SR_B<n>.TIF` band files
    scene: PathBuf,

    /// MTL XML metadata; supplies per-band reflectance rescaling
    #[arg(long)]
    mtl: Option<PathBuf>,

    /// GeoJSON polygon(s) to crop the scene to
    #[arg(long)]
    study_area: Option<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let mut config = match &cli.config {
        Some(path) => PipelineConfig::from_json_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => PipelineConfig::default(),
    };

    match cli.command {
        Command::Bands { dir } => list_bands(&dir),
        Command::Train {
            scene,
            sites,
            label_property,
            output,
        } => {
            if let Some(property) = label_property {
                config.extract.label_property = property;
            }
            train(&config, &scene, &sites, &output)
        }
        Command::Classify {
            scene,
            model,
            output,
            write_reflectance,
        } => classify(&config, &scene, &model, &output, write_reflectance),
        Command::Run {
            scene,
            sites,
            label_property,
            output,
            write_reflectance,
        } => {
            if let Some(property) = label_property {
                config.extract.label_property = property;
            }
            run(&config, &scene, &sites, &output, write_reflectance)
        }
    }
}

fn list_bands(dir: &Path) -> Result<()> {
    let files = discover_bands(dir).with_context(|| format!("Failed to scan {}", dir.display()))?;
    if files.is_empty() {
        bail!("no surface-reflectance bands found in {}", dir.display());
    }
    for file in files {
        println!("B{:<3} {}", file.number, file.path.display());
    }
    Ok(())
}

/// Scene, study area and a pipeline calibrated for that scene
struct Inputs {
    scene: Scene,
    study_area: Option<Geometry<f64>>,
    pipeline: Pipeline,
}

fn load_inputs(config: &PipelineConfig, args: &SceneArgs) -> Result<Inputs> {
    let scene = load_scene(&args.scene, &config.bands)
        .with_context(|| format!("Failed to load scene {}", args.scene.display()))?;

    let study_area = args
        .study_area
        .as_ref()
        .map(|path| {
            read_study_area(path)
                .with_context(|| format!("Failed to read study area {}", path.display()))
        })
        .transpose()?;

    let mut pipeline = Pipeline::new(config.clone()).context("Invalid configuration")?;
    match (&args.mtl, config.use_scene_rescaling) {
        (Some(mtl), true) => {
            let metadata = SceneMetadata::from_file(mtl)
                .with_context(|| format!("Failed to read metadata {}", mtl.display()))?;
            log::info!(
                "Scene {} ({}, {})",
                metadata.product_id,
                metadata.spacecraft,
                metadata.acquisition_date
            );
            pipeline = pipeline.with_band_params(metadata.reflectance_params(&config.bands)?);
        }
        (Some(_), false) => log::info!("Scene rescaling disabled, using configured calibration"),
        (None, _) => log::debug!("No MTL given, using configured calibration"),
    }

    Ok(Inputs {
        scene,
        study_area,
        pipeline,
    })
}

fn train(config: &PipelineConfig, args: &SceneArgs, sites: &Path, output: &Path) -> Result<()> {
    let inputs = load_inputs(config, args)?;
    let sites = read_training_sites(sites, &config.extract.label_property)
        .with_context(|| format!("Failed to read training sites {}", sites.display()))?;

    let result = inputs
        .pipeline
        .run(&inputs.scene.raster, inputs.study_area.as_ref(), &sites)
        .context("Training failed")?;

    println!("{}", result.tree);
    println!("{}", result.resubstitution);
    save_tree(&result.tree, output)
        .with_context(|| format!("Failed to save model {}", output.display()))?;
    log::info!("Model saved to {}", output.display());
    Ok(())
}

fn classify(
    config: &PipelineConfig,
    args: &SceneArgs,
    model: &Path,
    output: &Path,
    with_reflectance: bool,
) -> Result<()> {
    let tree = load_tree(model).with_context(|| format!("Failed to load model {}", model.display()))?;
    let inputs = load_inputs(config, args)?;
    let corrected = inputs
        .pipeline
        .prepare(&inputs.scene.raster, inputs.study_area.as_ref())?;
    let map = TreeClassifier::new(config.classify.clone())
        .classify(&corrected, &tree)
        .context("Classification failed")?;
    let projection = inputs.scene.projection.as_deref();
    if with_reflectance {
        write_corrected(&corrected, projection, output)?;
    }
    write_outputs(&map, projection, output)
}

fn run(
    config: &PipelineConfig,
    args: &SceneArgs,
    sites: &Path,
    output: &Path,
    with_reflectance: bool,
) -> Result<()> {
    let inputs = load_inputs(config, args)?;
    let sites = read_training_sites(sites, &config.extract.label_property)
        .with_context(|| format!("Failed to read training sites {}", sites.display()))?;

    let result = inputs
        .pipeline
        .run(&inputs.scene.raster, inputs.study_area.as_ref(), &sites)?;
    println!("{}", result.tree);
    println!("{}", result.resubstitution);

    std::fs::create_dir_all(output).context("Failed to create output directory")?;
    save_tree(&result.tree, output.join("model.json"))?;
    let projection = inputs.scene.projection.as_deref();
    if with_reflectance {
        write_corrected(&result.corrected, projection, output)?;
    }
    write_outputs(&result.classified, projection, output)
}

fn write_corrected(corrected: &ReflectanceRaster, projection: Option<&str>, output: &Path) -> Result<()> {
    std::fs::create_dir_all(output).context("Failed to create output directory")?;
    let path = output.join("reflectance.tif");
    skip_unsupported(write_reflectance(corrected, &path, projection))
        .with_context(|| format!("Failed to write reflectance GeoTIFF {}", path.display()))?;
    Ok(())
}

/// GeoTIFF map (when built with GDAL), PNG quicklook and legend with class areas.
fn write_outputs(map: &ClassifiedRaster, projection: Option<&str>, output: &Path) -> Result<()> {
    std::fs::create_dir_all(output).context("Failed to create output directory")?;

    let tif = output.join("classified.tif");
    skip_unsupported(write_classified(map, &tif, projection))
        .with_context(|| format!("Failed to write classified GeoTIFF {}", tif.display()))?;

    let palette = ClassPalette::for_classes(map.classes());
    save_png(map, &palette, output.join("classified.png"))?;

    let stats = map.class_statistics();
    let legend = json!({
        "legend": palette.legend(),
        "statistics": stats,
    });
    let legend_path = output.join("legend.json");
    std::fs::write(&legend_path, serde_json::to_string_pretty(&legend)?)
        .with_context(|| format!("Failed to write {}", legend_path.display()))?;

    for class in &stats.classes {
        println!(
            "{:<16} {:>10} px {:>6.2}%",
            class.label,
            class.pixels,
            class.fraction * 100.0
        );
    }
    println!("{:<16} {:>10} px", "no-data", stats.nodata_pixels);
    Ok(())
}
