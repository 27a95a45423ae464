// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Placing-way classifier CLI
//!
//! Usage:
//!   placing-way-classifier
//!   placing-way-classifier --train Data/placing_way.tsv --seed 0 --predict "котировка"

use anyhow::Result;
use clap::Parser;
use placing_way_classifier::pipeline::{ConformityPipeline, PipelineConfig};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "placing-way-classifier")]
#[command(about = "Train, evaluate and apply an SDCA placing-way classifier")]
#[command(version)]
struct Args {
    /// Training data (tab-separated, header row)
    #[arg(long, default_value = "Data/placing_way.tsv")]
    train: PathBuf,

    /// Held-out test data
    #[arg(long, default_value = "Data/placing_way_test.tsv")]
    test: PathBuf,

    /// Where the trained model archive is written and reloaded from
    #[arg(short, long, default_value = "Models/model.zip")]
    model: PathBuf,

    /// Random seed for reproducibility
    #[arg(short, long, default_value_t = 0)]
    seed: u64,

    /// Text to classify with the reloaded model (repeatable)
    #[arg(short, long = "predict", value_name = "TEXT")]
    predict: Vec<String>,

    /// Also report top-k accuracy
    #[arg(long)]
    top_k: Option<usize>,

    /// Write the full run results as JSON
    #[arg(short, long)]
    results: Option<PathBuf>,

    /// Print per-class metrics and the confusion matrix
    #[arg(long)]
    details: bool,
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let mut config = PipelineConfig {
        seed: args.seed,
        train_path: args.train,
        test_path: args.test,
        model_path: args.model,
        top_k: args.top_k,
        ..PipelineConfig::default()
    };
    if !args.predict.is_empty() {
        config.predict_texts = args.predict;
    }

    tracing::info!("Placing-way classifier");
    tracing::info!("Train: {}", config.train_path.display());
    tracing::info!("Test: {}", config.test_path.display());
    tracing::info!("Seed: {}", config.seed);

    let pipeline = ConformityPipeline::new(config);
    let results = pipeline.run()?;

    println!(
        "\nSingle Prediction just-trained-model - \"{}\": {}",
        results.smoke_prediction.text, results.smoke_prediction.predicted_label
    );
    println!("The model is saved to {}", pipeline.config().model_path.display());

    println!("\n{}", results.metrics.format());
    if args.details {
        println!("{}", results.metrics.format_details());
    }

    for prediction in &results.predictions {
        println!(
            "Single Prediction - \"{}\": {} (p={:.3})",
            prediction.text, prediction.predicted_label, prediction.confidence
        );
    }

    if let Some(path) = args.results {
        ConformityPipeline::save_results(&results, &path)?;
        println!("\nResults saved to: {}", path.display());
    }

    Ok(())
}
