//! Composition engine CLI.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use vcomp_composer::{init_tracing, ComposeOptions, Composer, ComposerConfig};
use vcomp_models::{AssetId, Composition, JobId, JobState, OutputFormat, OutputOptions, Priority};
use vcomp_queue::JobEvent;
use vcomp_storage::{AssetCatalog, LocalCatalog};

#[derive(Parser)]
#[command(name = "vcomp-composer", about = "Automatic video composition")]
struct Cli {
    /// Catalog directory (defaults to COMPOSER_CATALOG_DIR)
    #[arg(long, global = true)]
    catalog_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build a composition around a content clip and render it
    Compose {
        /// Content asset id
        #[arg(long)]
        content: String,
        /// Crossfade in seconds
        #[arg(long)]
        crossfade: Option<f64>,
        /// Output container (mp4, webm, mov)
        #[arg(long)]
        format: Option<String>,
        /// low, normal or high
        #[arg(long, default_value = "normal")]
        priority: String,
        /// Seed for intro/outro/overlay selection
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Render a prepared composition JSON file
    Render {
        #[arg(long)]
        composition: PathBuf,
        #[arg(long, default_value = "normal")]
        priority: String,
    },
    /// List catalog assets
    Assets {
        /// Only assets with this tag
        #[arg(long)]
        tag: Option<String>,
    },
    /// Probe a clip and add it to the catalog
    Import {
        file: PathBuf,
        /// Tags such as intro, outro or overlay
        #[arg(long = "tag")]
        tags: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    init_tracing();

    match run(Cli::parse()).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<bool> {
    let mut config = ComposerConfig::from_env();
    if let Some(dir) = cli.catalog_dir {
        config.catalog_dir = dir;
    }

    let catalog = Arc::new(
        LocalCatalog::open(&config.catalog_dir)
            .await
            .with_context(|| format!("opening catalog {}", config.catalog_dir.display()))?,
    );

    match cli.command {
        Command::Assets { tag } => {
            let assets = match tag {
                Some(tag) => catalog.list_by_tag(&tag).await?,
                None => catalog.list().await?,
            };
            for asset in assets {
                println!(
                    "{}\t{}\t{:.2}s\t{}x{}\t{}\t{}",
                    asset.id,
                    asset.filename,
                    asset.duration,
                    asset.width,
                    asset.height,
                    asset.aspect_ratio,
                    asset.tags.join(",")
                );
            }
            Ok(true)
        }
        Command::Import { file, tags } => {
            let asset = catalog
                .import_file(&file, &tags)
                .await
                .with_context(|| format!("importing {}", file.display()))?;
            println!("{}", serde_json::to_string_pretty(&asset)?);
            Ok(true)
        }
        Command::Compose {
            content,
            crossfade,
            format,
            priority,
            seed,
        } => {
            let mut composer = Composer::new(config, catalog.clone(), catalog.clone(), catalog);
            if let Some(seed) = seed {
                composer = composer.with_rng(StdRng::seed_from_u64(seed));
            }
            let output = match format {
                Some(f) => Some(OutputOptions::new().with_format(parse_format(&f)?)),
                None => None,
            };
            let options = ComposeOptions {
                crossfade,
                output,
                priority: parse_priority(&priority)?,
                ..Default::default()
            };
            let job_id = composer.compose(&AssetId::from(content), options).await?;
            follow(&composer, job_id).await
        }
        Command::Render {
            composition,
            priority,
        } => {
            let bytes = tokio::fs::read(&composition)
                .await
                .with_context(|| format!("reading {}", composition.display()))?;
            let composition: Composition =
                serde_json::from_slice(&bytes).context("parsing composition")?;
            let composer = Composer::new(config, catalog.clone(), catalog.clone(), catalog);
            let job_id = composer.submit(composition, parse_priority(&priority)?)?;
            follow(&composer, job_id).await
        }
    }
}

/// Print status lines until the job ends; Ctrl-C cancels it.
async fn follow(composer: &Composer, job_id: JobId) -> Result<bool> {
    info!(job_id = %job_id, "Job submitted");
    println!("job {job_id} submitted");

    let mut events = composer.subscribe();
    let printer = {
        let job_id = job_id.clone();
        async move {
            loop {
                match events.recv().await {
                    Ok(event) if event.job_id() == &job_id => print_event(&event),
                    Ok(_) | Err(RecvError::Lagged(_)) => {}
                    Err(RecvError::Closed) => break,
                }
            }
        }
    };

    let status = tokio::select! {
        status = composer.wait(&job_id) => status,
        _ = printer => composer.status(&job_id),
        _ = tokio::signal::ctrl_c() => {
            warn!(job_id = %job_id, "Interrupted, cancelling job");
            composer.cancel(&job_id);
            composer.wait(&job_id).await
        }
    };

    let Some(status) = status else {
        anyhow::bail!("job {job_id} disappeared");
    };
    composer.shutdown().await;

    match status.status {
        JobState::Completed => {
            if let Some(result) = &status.result {
                println!("{}", serde_json::to_string_pretty(result)?);
            }
            Ok(true)
        }
        _ => {
            eprintln!(
                "job {} {}: {}",
                job_id,
                status.status,
                status.error.as_deref().unwrap_or("unknown error")
            );
            Ok(false)
        }
    }
}

fn print_event(event: &JobEvent) {
    match event {
        JobEvent::Status { status, error, .. } => match error {
            Some(error) => println!("status {status}: {error}"),
            None => println!("status {status}"),
        },
        JobEvent::Progress {
            progress, stage, ..
        } => match stage {
            Some(stage) => println!("progress {progress}% ({stage})"),
            None => println!("progress {progress}%"),
        },
    }
}

fn parse_priority(s: &str) -> Result<Priority> {
    s.parse::<Priority>().map_err(anyhow::Error::msg)
}

fn parse_format(s: &str) -> Result<OutputFormat> {
    s.parse::<OutputFormat>().map_err(anyhow::Error::msg)
}
