use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mien_core::{identify, load_reference_set};
use mien_extract::OnnxExtractor;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "mien", about = "mien face identification CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Identify the person in an image against the reference gallery
    Identify {
        /// Query image path
        #[arg(short, long)]
        image: PathBuf,
        /// Reference image directory
        #[arg(long, default_value = "references")]
        references: PathBuf,
        /// ONNX model directory
        #[arg(long, default_value = "models")]
        model_dir: PathBuf,
        /// Cosine-distance threshold for a confident match
        #[arg(long, default_value_t = 0.4)]
        threshold: f32,
    },
    /// Show what the reference gallery loads to (entries and skips)
    Gallery {
        /// Reference image directory
        #[arg(long, default_value = "references")]
        references: PathBuf,
        /// ONNX model directory
        #[arg(long, default_value = "models")]
        model_dir: PathBuf,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Identify {
            image,
            references,
            model_dir,
            threshold,
        } => {
            let mut extractor =
                OnnxExtractor::load(&model_dir).context("loading extraction models")?;
            let load = load_reference_set(&references, &mut extractor)
                .context("loading reference set")?;
            let query = image::open(&image)
                .with_context(|| format!("opening {}", image.display()))?;

            let identification = identify(&mut extractor, &query, &load.references, threshold)
                .context("running identification")?;
            println!("{}", serde_json::to_string_pretty(&identification)?);
        }
        Commands::Gallery {
            references,
            model_dir,
        } => {
            let mut extractor =
                OnnxExtractor::load(&model_dir).context("loading extraction models")?;
            let load = load_reference_set(&references, &mut extractor)
                .context("loading reference set")?;

            let entries: Vec<serde_json::Value> = load
                .references
                .iter()
                .map(|entry| {
                    serde_json::json!({
                        "label": entry.label,
                        "file": entry.source_file,
                    })
                })
                .collect();
            let report = serde_json::json!({
                "entries": entries,
                "skipped": load.skipped,
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}
