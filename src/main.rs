// ==============================================================================
// main.rs - Harmonizer Entry Point
// ==============================================================================
// Description: Main entry point for the cohort harmonization pipeline
// Author: Matt Barham
// Created: 2026-02-03
// Modified: 2026-08-26
// Version: 1.0.0
// ==============================================================================

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use malnet_harmonizer::config::PipelineConfig;
use malnet_harmonizer::pipeline::{HarmonizationPipeline, PipelineInputs};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Metabolite measurement table (CSV, one row per subject)
    #[arg(long)]
    metabolite: PathBuf,

    /// Subject metadata/phenotype table (CSV)
    #[arg(long)]
    metadata: PathBuf,

    /// Master cross-reference table (CSV)
    #[arg(long)]
    master: PathBuf,

    /// QC replicate table (CSV); without it no RSD filtering happens
    #[arg(long)]
    qc: Option<PathBuf>,

    /// Pipeline configuration file (JSON); defaults apply when omitted
    #[arg(long, env = "HARMONIZER_CONFIG")]
    config: Option<PathBuf>,

    /// Directory for all exported artifacts
    #[arg(long, default_value = "processed")]
    out_dir: PathBuf,

    /// Override the configured RSD retention threshold (percent)
    #[arg(long)]
    rsd_threshold: Option<f64>,
}

fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "malnet_harmonizer=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Harmonization pipeline starting...");

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => PipelineConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => PipelineConfig::default(),
    };

    if let Some(threshold) = args.rsd_threshold {
        config.rsd_threshold = threshold;
        config
            .validate()
            .context("validating overridden rsd threshold")?;
    }

    if args.qc.is_none() {
        warn!("No QC table supplied; all analytes will pass the RSD filter unexamined");
    }

    let pipeline = HarmonizationPipeline::new(
        config,
        PipelineInputs {
            metabolite: args.metabolite,
            metadata: args.metadata,
            master: args.master,
            qc: args.qc,
            out_dir: args.out_dir.clone(),
        },
    );

    match pipeline.run() {
        Ok(summary) => {
            info!(
                "Harmonization completed: {} subjects x {} analytes exported to {}",
                summary.final_subjects,
                summary.final_analytes,
                args.out_dir.display()
            );
            Ok(())
        }
        Err(e) => {
            warn!("Harmonization failed: {e:#}");
            Err(e)
        }
    }
}
