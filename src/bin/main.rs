//! BIM AR CLI
//!
//! Convert design-tool GLB exports into AR-ready GLB and USDZ files.

use bim_ar_pipeline::{
    process_asset, AnnotationSet, Container, PipelineConfig, PipelineReport, ProcessOptions,
    PropertyIndex,
};
use clap::{Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "bim-ar")]
#[command(author, version, about = "Prepare building models for AR viewing", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Optimize a GLB, build a USDZ package and extract annotations
    Convert {
        /// Input GLB file
        #[arg(short, long)]
        input: PathBuf,

        /// Matching IFC file for property enrichment
        #[arg(long)]
        ifc: Option<PathBuf>,

        /// JSON file mapping material names to RGBA colors
        #[arg(long)]
        colors: Option<PathBuf>,

        /// Directory for optimized.glb, model.usdz and annotations.json
        #[arg(short, long)]
        output_dir: PathBuf,

        /// Skip the USDZ package
        #[arg(long)]
        no_archive: bool,

        /// Disable vertex welding
        #[arg(long)]
        no_weld: bool,

        /// Disable hierarchy flattening
        #[arg(long)]
        no_flatten: bool,

        /// Disable pruning of unused objects
        #[arg(long)]
        no_prune: bool,

        /// Position tolerance for welding
        #[arg(long, default_value = "0.0001")]
        weld_tolerance: f32,
    },

    /// Print annotations as JSON
    Annotate {
        /// Input GLB file
        #[arg(short, long)]
        input: PathBuf,

        /// Matching IFC file for property enrichment
        #[arg(long)]
        ifc: Option<PathBuf>,
    },

    /// Show information about a GLB container
    Info {
        /// Input GLB file
        #[arg(short, long)]
        input: PathBuf,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Convert {
            input,
            ifc,
            colors,
            output_dir,
            no_archive,
            no_weld,
            no_flatten,
            no_prune,
            weld_tolerance,
        } => {
            let mut pipeline = PipelineConfig::default().with_weld_tolerance(weld_tolerance);
            pipeline.weld = !no_weld;
            pipeline.flatten = !no_flatten;
            pipeline.prune = !no_prune;
            if let Some(path) = &colors {
                pipeline = pipeline.with_colors(PipelineConfig::load_colors(path)?);
            }
            let mut options = ProcessOptions::default().with_pipeline(pipeline);
            options.emit_archive = !no_archive;

            convert(&input, ifc.as_deref(), &output_dir, &options)?;
        }
        Commands::Annotate { input, ifc } => {
            annotate(&input, ifc.as_deref())?;
        }
        Commands::Info { input } => {
            show_info(&input)?;
        }
    }

    Ok(())
}

fn read_ifc(path: Option<&Path>) -> Result<Option<String>, Box<dyn std::error::Error>> {
    match path {
        Some(path) => {
            println!("Loading IFC data from {:?}...", path);
            Ok(Some(fs::read_to_string(path)?))
        }
        None => Ok(None),
    }
}

fn convert(
    input_path: &Path,
    ifc_path: Option<&Path>,
    output_dir: &Path,
    options: &ProcessOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    println!("Loading GLB from {:?}...", input_path);
    let glb = fs::read(input_path)?;
    let ifc = read_ifc(ifc_path)?;

    let asset = process_asset(&glb, ifc.as_deref(), options)?;

    fs::create_dir_all(output_dir)?;
    let glb_path = output_dir.join("optimized.glb");
    fs::write(&glb_path, &asset.optimized_glb)?;
    println!("  Wrote {:?} ({} bytes)", glb_path, asset.optimized_glb.len());

    if let Some(archive) = &asset.archive {
        let usdz_path = output_dir.join("model.usdz");
        fs::write(&usdz_path, archive)?;
        println!("  Wrote {:?} ({} bytes)", usdz_path, archive.len());
    }
    if let Some(error) = &asset.archive_error {
        println!("  USDZ skipped: {}", error);
    }

    let annotations_path = output_dir.join("annotations.json");
    fs::write(&annotations_path, serde_json::to_string_pretty(&asset.annotations)?)?;
    println!(
        "  Wrote {:?} ({} annotations, {} enriched from IFC)",
        annotations_path,
        asset.annotations.len(),
        asset.annotations.enriched_count
    );

    print_report(&asset.report);
    Ok(())
}

fn print_report(report: &PipelineReport) {
    println!("Pipeline:");
    println!("  - Passes applied: {}", report.passes_applied.join(", "));
    for skipped in &report.passes_skipped {
        println!("  - Skipped {}: {}", skipped.pass, skipped.reason);
    }
    println!("  - Primitives dropped: {}", report.primitives_dropped);
    println!("  - UV channels synthesized: {}", report.uvs_synthesized);
    println!("  - Materials clamped: {}", report.materials_clamped);
    println!("  - Default materials assigned: {}", report.default_materials_assigned);
    println!("  - Vertices welded: {}", report.vertices_welded);
    println!("  - Accessors patched with bounds: {}", report.accessors_patched);
}

fn annotate(input_path: &Path, ifc_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let container = Container::read(&fs::read(input_path)?)?;
    let graph = bim_ar_pipeline::scene::decode::decode(&container)?;

    let index = match read_ifc(ifc_path)? {
        Some(text) => match PropertyIndex::from_text(&text) {
            Ok(index) => Some(index),
            Err(e) => {
                tracing::warn!(error = %e, "Ignoring IFC data");
                None
            }
        },
        None => None,
    };

    let annotations = AnnotationSet::extract(&graph, index.as_ref());
    println!("{}", serde_json::to_string_pretty(&annotations)?);
    Ok(())
}

fn show_info(input_path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let container = Container::read(&fs::read(input_path)?)?;
    let summary = container.summary();

    println!("GLB container info:");
    println!("  Version: {}", container.version);
    println!("  Nodes: {}", summary.nodes);
    println!("  Meshes: {}", summary.meshes);
    println!("  Primitives: {}", summary.primitives);
    println!("  Accessors: {}", summary.accessors);
    println!("  Materials: {}", summary.materials);
    println!("  Animations: {}", summary.animations);
    println!("  Binary payload: {} bytes", summary.payload_bytes);
    if let Some(generator) = container.json["asset"]["generator"].as_str() {
        println!("  Generator: {}", generator);
    }

    Ok(())
}
