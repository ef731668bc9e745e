// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Evaluation pipeline CLI for Real/Fake news ensembles
//!
//! Usage:
//!   eval-pipeline --dataset synthetic --seed 123
//!   eval-pipeline --dataset csv --path ./data/news.csv --stacking in-sample
//!   eval-pipeline --config ./eval/config.json --output ./eval/results

use anyhow::{Context, Result};
use clap::Parser;
use news_ensemble::ensemble::StackingMode;
use news_ensemble::models::ModelKind;
use news_ensemble::normalize::DegenerateFieldPolicy;
use news_ensemble::pipeline::{DatasetKind, EvaluationPipeline, PipelineConfig};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "eval-pipeline")]
#[command(about = "Train base models and ensembles, then score them on a held-out split")]
#[command(version)]
struct Args {
    /// JSON configuration file; flags below override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Dataset to evaluate on (synthetic, csv)
    #[arg(short, long)]
    dataset: Option<String>,

    /// Path to the CSV file
    #[arg(short, long)]
    path: Option<PathBuf>,

    /// Random seed for reproducibility
    #[arg(short, long)]
    seed: Option<u64>,

    /// Number of records for the synthetic dataset
    #[arg(long)]
    size: Option<usize>,

    /// Share of records used for training
    #[arg(long)]
    train_fraction: Option<f64>,

    /// P(Real) at or above which a record is labelled Real
    #[arg(long)]
    threshold: Option<f64>,

    /// Ensemble members (comma-separated model names)
    #[arg(short, long)]
    members: Option<String>,

    /// Meta-learner training set (out-of-fold, in-sample)
    #[arg(long)]
    stacking: Option<String>,

    /// Reject ensemble weights that do not sum to 1 instead of rescaling them
    #[arg(long)]
    strict_weights: bool,

    /// Center zero-variance fields instead of failing
    #[arg(long)]
    center_degenerate: bool,

    /// Output directory for results
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Output format (json, markdown, csv, all)
    #[arg(short, long, default_value = "all")]
    format: String,

    /// Save the fitted preprocessor and models as JSON
    #[arg(long, default_value_t = false)]
    save_models: bool,
}

fn build_config(args: &Args) -> Result<PipelineConfig> {
    let mut config = match &args.config {
        Some(path) => PipelineConfig::from_file(path).with_context(|| format!("read config {}", path.display()))?,
        None => PipelineConfig::default(),
    };

    if let Some(dataset) = &args.dataset {
        config.dataset = dataset.parse::<DatasetKind>()?;
    }
    if let Some(path) = &args.path {
        config.dataset_path = Some(path.clone());
        if args.dataset.is_none() {
            config.dataset = DatasetKind::Csv;
        }
    }
    if let Some(seed) = args.seed {
        config.seed = seed;
    }
    if let Some(size) = args.size {
        config.synthetic_size = size;
    }
    if let Some(fraction) = args.train_fraction {
        config.train_fraction = fraction;
    }
    if let Some(threshold) = args.threshold {
        config.decision_threshold = threshold;
    }
    if let Some(members) = &args.members {
        config.ensemble_members = members
            .split(',')
            .map(|s| s.parse::<ModelKind>())
            .collect::<news_ensemble::Result<Vec<_>>>()?;
    }
    if let Some(stacking) = &args.stacking {
        config.stacking = match stacking.trim().to_lowercase().replace('_', "-").as_str() {
            "out-of-fold" | "oof" => StackingMode::OutOfFold,
            "in-sample" => StackingMode::InSample,
            other => anyhow::bail!("unknown stacking mode '{}'", other),
        };
    }
    if args.strict_weights {
        config.renormalize_weights = false;
    }
    if args.center_degenerate {
        config.degenerate_field = DegenerateFieldPolicy::CenterOnly;
    }
    if let Some(output) = &args.output {
        config.output_dir = output.clone();
    }

    Ok(config)
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = build_config(&args)?;

    tracing::info!("News Ensemble Evaluation Pipeline");
    tracing::info!("=================================");
    tracing::info!("Dataset: {}", config.dataset);
    tracing::info!("Seed: {}", config.seed);
    tracing::info!("Stacking: {:?}", config.stacking);

    let output_dir = config.output_dir.clone();
    let mut pipeline = EvaluationPipeline::new(config);
    let results = pipeline.run()?;

    // Print summary to console
    println!("\n{}", "=".repeat(70));
    println!("EVALUATION SUMMARY");
    println!("{}", "=".repeat(70));
    println!("\nBest Model: {} (F1={:.4})", results.summary.best_model, results.summary.best_f1);
    println!("\nModel Comparison:");
    println!("{:-<70}", "");
    println!("{:<20} {:>10} {:>10} {:>10} {:>10}", "Model", "Accuracy", "F1", "MCC", "AUC-ROC");
    println!("{:-<70}", "");

    for comparison in &results.summary.model_comparison {
        let auc = comparison.auc_roc.map_or("-".to_string(), |v| format!("{:.4}", v));
        println!(
            "{:<20} {:>10.4} {:>10.4} {:>10.4} {:>10}",
            comparison.model, comparison.accuracy, comparison.f1_score, comparison.mcc, auc
        );
    }
    println!("{:-<70}", "");

    if !results.limitations.is_empty() {
        println!("\nKnown limitations:");
        for note in &results.limitations {
            println!("  - {}", note);
        }
    }

    // Save outputs
    std::fs::create_dir_all(&output_dir)?;

    let timestamp = chrono::Utc::now().format("%Y%m%d_%H%M%S");
    let stem = format!("eval_{}_{}", results.config.dataset, timestamp);
    let wants = |kind: &str| args.format == kind || args.format == "all";

    if wants("json") {
        let json_path = output_dir.join(format!("{}.json", stem));
        EvaluationPipeline::save_results(&results, &json_path)?;
        println!("\nJSON results saved to: {}", json_path.display());
    }

    if wants("markdown") {
        let report = EvaluationPipeline::generate_report(&results);
        let md_path = output_dir.join(format!("{}.md", stem));
        std::fs::write(&md_path, report)?;
        println!("Markdown report saved to: {}", md_path.display());
    }

    if wants("csv") {
        let csv_path = output_dir.join(format!("{}_records.csv", stem));
        EvaluationPipeline::save_comparison_csv(&results, &csv_path)?;
        println!("Record comparison saved to: {}", csv_path.display());
    }

    if args.save_models {
        let fitted_dir = output_dir.join(format!("{}_fitted", stem));
        let saved = pipeline.save_fitted(&fitted_dir)?;
        println!("Fitted parameters saved to: {} ({} files)", fitted_dir.display(), saved.len());
    }

    println!("\nEvaluation complete!");

    Ok(())
}
