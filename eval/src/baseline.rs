// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Standalone base model runner
//!
//! Trains and evaluates individual base models for quick testing

use anyhow::{Context, Result};
use clap::Parser;
use news_ensemble::datasets::Dataset;
use news_ensemble::features::{Preprocessor, PreprocessorConfig};
use news_ensemble::metrics::EvaluationMetrics;
use news_ensemble::models::{build_model, ModelKind, ModelSettings};
use news_ensemble::split::split;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "run-model")]
#[command(about = "Run a specific base model")]
#[command(version)]
struct Args {
    /// Base model to run (logistic, knn, decision_tree, naive_bayes); all when omitted
    #[arg(short, long)]
    model: Option<String>,

    /// Path to a CSV dataset; synthetic data when omitted
    #[arg(short, long)]
    path: Option<PathBuf>,

    /// Random seed
    #[arg(short, long, default_value_t = 123)]
    seed: u64,

    /// Number of samples for synthetic dataset
    #[arg(short, long, default_value_t = 1000)]
    num_samples: usize,

    /// Share of records used for training
    #[arg(long, default_value_t = 0.8)]
    train_fraction: f64,

    /// Decision threshold on P(Real)
    #[arg(long, default_value_t = 0.5)]
    threshold: f64,

    /// List available models
    #[arg(long)]
    list: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let settings = ModelSettings {
        seed: args.seed,
        ..ModelSettings::default()
    };

    // List available models
    if args.list {
        println!("Available base models:");
        println!("----------------------");
        for kind in ModelKind::ALL {
            let model = build_model(kind, &settings);
            println!("  {}: {}", model.name(), model.description());
        }
        return Ok(());
    }

    let kinds = match &args.model {
        Some(name) => vec![name.parse::<ModelKind>()?],
        None => ModelKind::ALL.to_vec(),
    };

    // Load dataset
    let dataset = match &args.path {
        Some(path) => Dataset::load_csv(path).with_context(|| format!("load dataset {}", path.display()))?,
        None => {
            tracing::info!("Generating synthetic dataset ({} samples, seed={})", args.num_samples, args.seed);
            Dataset::load_synthetic(args.num_samples, args.seed)
        }
    };

    let (train, validation) = split(&dataset.records, args.train_fraction, args.seed).context("split")?;

    println!("\nDataset: {}", dataset.name);
    println!("  Train samples: {}", train.len());
    println!("  Validation samples: {}", validation.len());

    for (name, records) in [("Train", &train), ("Validation", &validation)] {
        println!("\n{} distribution:", name);
        for (label, count) in Dataset::label_distribution(records) {
            println!("  {}: {} ({:.1}%)", label, count, count as f64 / records.len() as f64 * 100.0);
        }
    }

    let preprocessor = Preprocessor::fit(&train, &PreprocessorConfig::default()).context("encode/normalize")?;
    let train_table = preprocessor.transform(&train).context("feature preparation: training split")?;
    let val_table = preprocessor
        .transform(&validation)
        .context("feature preparation: validation split")?;

    println!("\n{}", "=".repeat(70));
    println!("BASE MODEL EVALUATION");
    println!("{}", "=".repeat(70));

    for kind in kinds {
        let mut model = build_model(kind, &settings);

        println!("\n## {} ##", model.name());
        println!("{}", model.description());
        println!("{}", "-".repeat(50));

        model
            .fit(&train_table.rows, &train_table.labels)
            .with_context(|| format!("train {}", kind))?;
        let probabilities = model
            .predict_batch(&val_table.rows)
            .with_context(|| format!("predict {}", kind))?;

        let metrics = EvaluationMetrics::from_probabilities(&probabilities, &val_table.labels, args.threshold)?;
        println!("{}", metrics.format());
    }

    println!("\n{}", "=".repeat(70));
    println!("Evaluation complete!");

    Ok(())
}
