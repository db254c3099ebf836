mod client;
mod config;
mod engine;
mod error;
mod ml;
mod types;
mod web;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use client::{ApiClient, DEFAULT_URL};
use config::{load_config, render_config, ServiceConfig};
use engine::InferenceEngine;
use ml::ensemble::merge_checkpoints;
use ml::{select_device, ModelLoader, Preprocessor};
use web::{start_server, AppState};

#[derive(Parser)]
#[command(name = "xray-insight")]
#[command(version)]
#[command(about = "Pneumonia screening API backed by an ensemble of chest X-ray classifiers", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, default_value = "xray-insight.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Load the ensemble and serve the HTTP API
    Serve {
        /// Listen port (overrides server.port)
        #[arg(short, long)]
        port: Option<u16>,
        /// Directory holding the checkpoints (overrides models.dir)
        #[arg(long)]
        model_dir: Option<PathBuf>,
        /// Directory with NORMAL/ and PNEUMONIA/ sample images (overrides evaluation.samples_dir)
        #[arg(long)]
        samples_dir: Option<PathBuf>,
    },
    /// Combine the per-member checkpoints into one merged checkpoint
    Merge {
        /// Output file (defaults to the configured merged checkpoint)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Directory holding the checkpoints (overrides models.dir)
        #[arg(long)]
        model_dir: Option<PathBuf>,
    },
    /// Check a running service and optionally classify one image
    Smoke {
        /// Base URL of the service
        #[arg(short, long, default_value = DEFAULT_URL)]
        url: String,
        /// Image to upload to /predict
        image: Option<PathBuf>,
    },
    /// Print the effective configuration as TOML
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Serve { port, model_dir, samples_dir } => {
            let mut config = load_config(&cli.config)?;
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(dir) = model_dir {
                config.models.dir = dir;
            }
            if let Some(dir) = samples_dir {
                config.evaluation.samples_dir = dir;
            }
            run_server(config).await?;
        }
        Commands::Merge { output, model_dir } => {
            let mut config = load_config(&cli.config)?;
            if let Some(dir) = model_dir {
                config.models.dir = dir;
            }
            run_merge(&config, output.as_deref())?;
        }
        Commands::Smoke { url, image } => {
            run_smoke(&url, image.as_deref()).await?;
        }
        Commands::Config => {
            let config = load_config(&cli.config)?;
            println!("{}", render_config(&config)?);
        }
    }

    Ok(())
}

async fn run_server(config: ServiceConfig) -> Result<()> {
    info!("X-Ray Insight v{}", env!("CARGO_PKG_VERSION"));

    // Model loading is CPU bound and can take a while for full-size backbones
    let engine = {
        let config = config.clone();
        tokio::task::spawn_blocking(move || InferenceEngine::from_config(&config)).await?
    };
    if engine.is_loaded() {
        info!("Serving ensemble: {}", engine.model_names().join(", "));
    } else {
        warn!("Serving without models; /predict will report an error");
    }

    let state = AppState::from_config(Arc::new(engine), &config);
    start_server(state, &config.server).await
}

fn run_merge(config: &ServiceConfig, output: Option<&Path>) -> Result<()> {
    let output = output
        .map(Path::to_path_buf)
        .unwrap_or_else(|| config.models.merged_path());

    let loader = ModelLoader::new(config.models.clone(), select_device());
    let input_size = Preprocessor::new(&config.preprocess).input_size();
    let summary = merge_checkpoints(&loader, &output, input_size)?;

    info!(
        "Merged {} into {} ({} tensors), verification output shape {:?}",
        summary.members.join(", "),
        summary.output.display(),
        summary.tensors,
        summary.output_dims
    );
    Ok(())
}

async fn run_smoke(url: &str, image: Option<&Path>) -> Result<()> {
    let client = ApiClient::new(url);

    match client.root().await {
        Ok(message) => info!("Server is running and responding: {}", message),
        Err(e) => {
            error!("Could not reach server at {}: {}", url, e);
            return Err(e);
        }
    }

    let Some(image) = image else {
        info!("No image path provided, skipping prediction test");
        return Ok(());
    };

    let result = client.predict(image).await?;
    println!("Prediction Result:");
    println!("  - Filename: {}", result.filename);
    println!("  - Prediction: {}", result.prediction);
    println!("  - Confidence: {}", result.confidence);
    println!("Probabilities:");
    for (class_name, probability) in &result.probabilities {
        println!("  - {}: {}", class_name, probability);
    }

    Ok(())
}
