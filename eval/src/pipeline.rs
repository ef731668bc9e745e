// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Reproducible evaluation pipeline for Real/Fake news classification
//!
//! Orchestrates:
//! - Dataset loading
//! - Seeded train/validation split
//! - Feature preparation fit on the training split only
//! - Base model training and validation predictions
//! - Ensemble combination
//! - Metrics, record-level comparison and results serialization
//!
//! Every stage failure carries the stage name, so a late `DimensionMismatch`
//! can be traced back to where the records diverged.

use crate::datasets::{CategoricalField, ContinuousField, Dataset, Label, Record};
use crate::encoding::UnknownCategoryPolicy;
use crate::ensemble::{
    build_meta_learner, cross_val_predict, to_labels, unweighted_average, AlignedPredictions, BoostingSettings,
    EnsembleStrategy, EnsembleWeights, MetaLearner, ModelPredictions, StackingMode,
};
use crate::error::PipelineError;
use crate::features::{FeatureTable, Preprocessor, PreprocessorConfig};
use crate::metrics::EvaluationMetrics;
use crate::models::{build_model, Classifier, ModelKind, ModelSettings};
use crate::normalize::DegenerateFieldPolicy;
use crate::split::split_indices;
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Where the records come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasetKind {
    #[default]
    Synthetic,
    Csv,
}

impl fmt::Display for DatasetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatasetKind::Synthetic => f.write_str("synthetic"),
            DatasetKind::Csv => f.write_str("csv"),
        }
    }
}

impl FromStr for DatasetKind {
    type Err = PipelineError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "synthetic" => Ok(DatasetKind::Synthetic),
            "csv" => Ok(DatasetKind::Csv),
            _ => Err(PipelineError::config(format!("unknown dataset kind '{}'", s))),
        }
    }
}

/// Configuration for the evaluation pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Random seed for the split, cross-validation folds and synthetic data
    pub seed: u64,
    pub dataset: DatasetKind,
    /// CSV file (required when `dataset` is `csv`)
    pub dataset_path: Option<PathBuf>,
    /// Record count for the synthetic dataset
    pub synthetic_size: usize,
    pub train_fraction: f64,
    /// Above this many distinct values an unordered field is frequency-encoded
    pub cardinality_threshold: usize,
    pub categorical_fields: Vec<CategoricalField>,
    pub continuous_fields: Vec<ContinuousField>,
    pub unknown_category: UnknownCategoryPolicy,
    pub degenerate_field: DegenerateFieldPolicy,
    pub base_models: Vec<ModelKind>,
    pub knn_k_grid: Vec<usize>,
    pub cv_folds: usize,
    pub tree_pruning: bool,
    pub tree_max_depth: usize,
    pub logistic_iterations: usize,
    pub logistic_learning_rate: f64,
    pub logistic_l2: f64,
    /// Base models whose probabilities feed every ensemble strategy
    pub ensemble_members: Vec<ModelKind>,
    pub ensemble_strategies: Vec<EnsembleStrategy>,
    pub ensemble_weights: BTreeMap<ModelKind, f64>,
    /// Rescale weights that do not sum to 1 instead of rejecting them
    pub renormalize_weights: bool,
    pub stacking: StackingMode,
    pub boosting_rounds: usize,
    pub boosting_learning_rate: f64,
    pub boosting_max_depth: usize,
    /// P(Real) at or above this is labelled Real
    pub decision_threshold: f64,
    pub output_dir: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let models = ModelSettings::default();
        let boosting = BoostingSettings::default();
        let preprocessing = PreprocessorConfig::default();
        Self {
            seed: models.seed,
            dataset: DatasetKind::Synthetic,
            dataset_path: None,
            synthetic_size: 1000,
            train_fraction: 0.8,
            cardinality_threshold: preprocessing.cardinality_threshold,
            categorical_fields: preprocessing.categorical_fields,
            continuous_fields: preprocessing.continuous_fields,
            unknown_category: preprocessing.unknown_category,
            degenerate_field: preprocessing.degenerate_field,
            base_models: ModelKind::ALL.to_vec(),
            knn_k_grid: models.knn_k_grid,
            cv_folds: models.cv_folds,
            tree_pruning: models.tree_pruning,
            tree_max_depth: models.tree_max_depth,
            logistic_iterations: models.logistic_iterations,
            logistic_learning_rate: models.logistic_learning_rate,
            logistic_l2: models.logistic_l2,
            ensemble_members: vec![ModelKind::Logistic, ModelKind::DecisionTree, ModelKind::Knn],
            ensemble_strategies: EnsembleStrategy::ALL.to_vec(),
            ensemble_weights: BTreeMap::from([
                (ModelKind::Logistic, 0.5),
                (ModelKind::DecisionTree, 0.3),
                (ModelKind::Knn, 0.1),
            ]),
            renormalize_weights: true,
            stacking: StackingMode::OutOfFold,
            boosting_rounds: boosting.rounds,
            boosting_learning_rate: boosting.learning_rate,
            boosting_max_depth: boosting.max_depth,
            decision_threshold: 0.5,
            output_dir: PathBuf::from("eval/results"),
        }
    }
}

impl PipelineConfig {
    /// Load from a JSON file; absent keys keep their defaults
    pub fn from_file(path: &Path) -> crate::Result<Self> {
        let bytes = std::fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Reject settings no run could succeed with
    pub fn validate(&self) -> crate::Result<()> {
        let fail = |reason: String| -> crate::Result<()> { Err(PipelineError::config(reason)) };

        if !(self.train_fraction > 0.0 && self.train_fraction < 1.0) {
            return fail(format!("train_fraction must be in (0, 1), got {}", self.train_fraction));
        }
        if !(0.0..=1.0).contains(&self.decision_threshold) {
            return fail(format!("decision_threshold must be in [0, 1], got {}", self.decision_threshold));
        }
        if self.knn_k_grid.is_empty() {
            return fail("knn_k_grid is empty".to_string());
        }
        if let Some(k) = self.knn_k_grid.iter().find(|&&k| k == 0 || k % 2 == 0) {
            return fail(format!("knn_k_grid values must be odd and positive, got {}", k));
        }
        if self.cv_folds < 2 {
            return fail(format!("cv_folds must be at least 2, got {}", self.cv_folds));
        }
        if self.base_models.is_empty() {
            return fail("base_models is empty".to_string());
        }
        if self.dataset == DatasetKind::Csv && self.dataset_path.is_none() {
            return fail("dataset 'csv' needs dataset_path".to_string());
        }

        if !self.ensemble_strategies.is_empty() {
            if self.ensemble_members.is_empty() {
                return fail("ensemble_members is empty".to_string());
            }
            if let Some(m) = self.ensemble_members.iter().find(|m| !self.base_models.contains(m)) {
                return fail(format!("ensemble member '{}' is not a configured base model", m));
            }
        }

        if self.ensemble_strategies.contains(&EnsembleStrategy::WeightedAverage) {
            if let Some((m, w)) = self.ensemble_weights.iter().find(|(_, w)| !w.is_finite() || **w < 0.0) {
                return fail(format!("weight for '{}' must be non-negative, got {}", m, w));
            }
            let weighted: BTreeSet<ModelKind> = self.ensemble_weights.keys().copied().collect();
            let members: BTreeSet<ModelKind> = self.ensemble_members.iter().copied().collect();
            if weighted != members {
                return fail(format!(
                    "ensemble_weights cover {:?} but ensemble_members are {:?}",
                    weighted, members
                ));
            }
            if !self.renormalize_weights {
                EnsembleWeights::new(self.ensemble_weights.clone())?;
            }
        }

        if self.ensemble_strategies.contains(&EnsembleStrategy::Boosted) {
            if self.boosting_rounds == 0 {
                return fail("boosting_rounds must be at least 1".to_string());
            }
            if !(self.boosting_learning_rate > 0.0) {
                return fail(format!(
                    "boosting_learning_rate must be positive, got {}",
                    self.boosting_learning_rate
                ));
            }
        }

        Ok(())
    }

    pub fn model_settings(&self) -> ModelSettings {
        ModelSettings {
            seed: self.seed,
            cv_folds: self.cv_folds,
            knn_k_grid: self.knn_k_grid.clone(),
            tree_pruning: self.tree_pruning,
            tree_max_depth: self.tree_max_depth,
            logistic_iterations: self.logistic_iterations,
            logistic_learning_rate: self.logistic_learning_rate,
            logistic_l2: self.logistic_l2,
        }
    }

    pub fn preprocessor_config(&self) -> PreprocessorConfig {
        PreprocessorConfig {
            categorical_fields: self.categorical_fields.clone(),
            continuous_fields: self.continuous_fields.clone(),
            cardinality_threshold: self.cardinality_threshold,
            unknown_category: self.unknown_category,
            degenerate_field: self.degenerate_field,
        }
    }

    pub fn boosting_settings(&self) -> BoostingSettings {
        BoostingSettings {
            rounds: self.boosting_rounds,
            learning_rate: self.boosting_learning_rate,
            max_depth: self.boosting_max_depth,
        }
    }

    /// Weights for the weighted-average strategy, strict or rescaled
    pub fn weights(&self) -> crate::Result<EnsembleWeights> {
        if self.renormalize_weights {
            EnsembleWeights::normalized(self.ensemble_weights.clone())
        } else {
            EnsembleWeights::new(self.ensemble_weights.clone())
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultKind {
    Base,
    Ensemble,
}

/// Results from a single model or ensemble on the validation split
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelResult {
    pub model_name: String,
    pub model_description: String,
    pub kind: ResultKind,
    pub metrics: EvaluationMetrics,
    pub training_samples: usize,
    pub eval_samples: usize,
}

/// One model's call on one record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordOutcome {
    pub model: String,
    pub probability: f64,
    pub predicted: Label,
    pub correct: bool,
}

/// Every model's call on one validation record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordComparison {
    pub id: String,
    pub actual: Label,
    pub outcomes: Vec<RecordOutcome>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetInfo {
    pub id: String,
    pub name: String,
    pub source: String,
    pub total_samples: usize,
    pub train_samples: usize,
    pub validation_samples: usize,
    pub n_features: usize,
    pub feature_names: Vec<String>,
    pub train_label_distribution: BTreeMap<String, usize>,
    pub validation_label_distribution: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelComparison {
    pub model: String,
    pub accuracy: f64,
    pub f1_score: f64,
    pub mcc: f64,
    pub auc_roc: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationSummary {
    pub best_model: String,
    pub best_f1: f64,
    pub best_accuracy: f64,
    pub model_comparison: Vec<ModelComparison>,
}

/// Complete evaluation results
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationResults {
    pub config: PipelineConfig,
    pub dataset_info: DatasetInfo,
    pub model_results: Vec<ModelResult>,
    pub comparison: Vec<RecordComparison>,
    pub summary: EvaluationSummary,
    /// Caveats a reader of the scores must know about
    pub limitations: Vec<String>,
    pub timestamp: DateTime<Utc>,
    pub version: String,
}

impl EvaluationResults {
    /// Model name to validation F1
    pub fn f1_table(&self) -> BTreeMap<String, f64> {
        self.model_results
            .iter()
            .map(|r| (r.model_name.clone(), r.metrics.f1_score()))
            .collect()
    }

    pub fn result(&self, model_name: &str) -> Option<&ModelResult> {
        self.model_results.iter().find(|r| r.model_name == model_name)
    }
}

/// Everything fitted during a run, kept for persistence
pub struct FittedArtifacts {
    pub preprocessor: Preprocessor,
    pub models: Vec<Box<dyn Classifier>>,
    pub meta_learners: Vec<(EnsembleStrategy, Box<dyn MetaLearner>)>,
}

/// Probabilities from one base model or ensemble, ready for scoring
struct Scored {
    name: String,
    description: String,
    kind: ResultKind,
    probabilities: Vec<f64>,
}

fn distribution(records: &[Record]) -> BTreeMap<String, usize> {
    Dataset::label_distribution(records)
        .into_iter()
        .map(|(label, count)| (label.to_string(), count))
        .collect()
}

/// Main evaluation pipeline
pub struct EvaluationPipeline {
    config: PipelineConfig,
    dataset: Option<Dataset>,
    fitted: Option<FittedArtifacts>,
}

impl EvaluationPipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            dataset: None,
            fitted: None,
        }
    }

    /// Run on an already-loaded dataset
    pub fn with_dataset(config: PipelineConfig, dataset: Dataset) -> Self {
        Self {
            config,
            dataset: Some(dataset),
            fitted: None,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn fitted(&self) -> Option<&FittedArtifacts> {
        self.fitted.as_ref()
    }

    /// Load dataset based on configuration
    pub fn load_dataset(&mut self) -> Result<()> {
        let dataset = match (self.config.dataset, &self.config.dataset_path) {
            (DatasetKind::Csv, Some(path)) => {
                tracing::info!("Loading CSV dataset from {}", path.display());
                Dataset::load_csv(path).with_context(|| format!("load dataset {}", path.display()))?
            }
            (DatasetKind::Csv, None) => bail!("dataset 'csv' needs a path"),
            (DatasetKind::Synthetic, _) => {
                tracing::info!(
                    "Generating synthetic dataset ({} records, seed {})",
                    self.config.synthetic_size,
                    self.config.seed
                );
                Dataset::load_synthetic(self.config.synthetic_size, self.config.seed)
            }
        };

        tracing::info!("Dataset loaded: {} records", dataset.len());
        self.dataset = Some(dataset);
        Ok(())
    }

    /// Run the full evaluation pipeline
    pub fn run(&mut self) -> Result<EvaluationResults> {
        self.config.validate().context("invalid pipeline configuration")?;
        if self.dataset.is_none() {
            self.load_dataset()?;
        }
        let dataset = self.dataset.as_ref().context("dataset not loaded")?;
        let config = &self.config;

        // Split
        let indices = split_indices(dataset.len(), config.train_fraction, config.seed).context("split")?;
        let train_records: Vec<Record> = indices.train.iter().map(|&i| dataset.records[i].clone()).collect();
        let val_records: Vec<Record> = indices.validation.iter().map(|&i| dataset.records[i].clone()).collect();
        if train_records.is_empty() || val_records.is_empty() {
            bail!(
                "split: {} records give {} train and {} validation",
                dataset.len(),
                train_records.len(),
                val_records.len()
            );
        }
        tracing::info!("Split: {} train, {} validation", train_records.len(), val_records.len());

        // Feature preparation, frozen on the training split
        let preprocessor = Preprocessor::fit(&train_records, &config.preprocessor_config())
            .context("encode/normalize: fitting on the training split")?;
        let train_table = preprocessor
            .transform(&train_records)
            .context("feature preparation: training split")?;
        let val_table = preprocessor
            .transform(&val_records)
            .context("feature preparation: validation split")?;

        // Base models
        let settings = config.model_settings();
        let mut models: Vec<Box<dyn Classifier>> = Vec::new();
        let mut base_predictions = Vec::new();
        let mut scored = Vec::new();

        for &kind in &config.base_models {
            tracing::info!("Training base model: {}", kind);
            let mut model = build_model(kind, &settings);
            model
                .fit(&train_table.rows, &train_table.labels)
                .with_context(|| format!("train {}", kind))?;
            let probabilities = model
                .predict_batch(&val_table.rows)
                .with_context(|| format!("predict {}", kind))?;

            scored.push(Scored {
                name: kind.name().to_string(),
                description: model.description().to_string(),
                kind: ResultKind::Base,
                probabilities: probabilities.clone(),
            });
            base_predictions.push(ModelPredictions::new(kind, val_table.ids.clone(), probabilities));
            models.push(model);
        }

        // Ensembles
        let mut meta_learners = Vec::new();
        let mut limitations = Vec::new();
        if !config.ensemble_strategies.is_empty() {
            let aligned = AlignedPredictions::align(&base_predictions).context("ensemble: aligning base predictions")?;
            let members = aligned
                .select(&config.ensemble_members)
                .context("ensemble: selecting members")?;

            let learned = config.ensemble_strategies.iter().any(EnsembleStrategy::is_learned);
            let meta_training = if learned {
                Some(self.meta_training_set(&members, &train_table, &val_table, &settings)?)
            } else {
                None
            };
            if learned && config.stacking == StackingMode::InSample {
                limitations.push(
                    "Stacked and boosted meta-learners were fit and scored on the same validation \
                     predictions; their scores are optimistic."
                        .to_string(),
                );
            }

            for &strategy in &config.ensemble_strategies {
                tracing::info!("Combining: {}", strategy);
                let probabilities = match strategy {
                    EnsembleStrategy::Average => unweighted_average(&members),
                    EnsembleStrategy::WeightedAverage => {
                        let sum: f64 = config.ensemble_weights.values().sum();
                        if config.renormalize_weights && (sum - 1.0).abs() > crate::ensemble::WEIGHT_TOLERANCE {
                            limitations.push(format!(
                                "Configured ensemble weights summed to {:.4} and were rescaled to 1.0.",
                                sum
                            ));
                        }
                        config
                            .weights()
                            .and_then(|w| w.combine(&members))
                            .with_context(|| format!("ensemble {}", strategy))?
                    }
                    EnsembleStrategy::Stacked | EnsembleStrategy::Boosted => {
                        let (meta_x, meta_y) = meta_training
                            .as_ref()
                            .context("meta-learner training set missing")?;
                        let mut meta = build_meta_learner(strategy, &settings, config.boosting_settings())
                            .with_context(|| format!("ensemble {}: no meta-learner", strategy))?;
                        meta.fit(meta_x, meta_y)
                            .with_context(|| format!("ensemble {}: fit", strategy))?;
                        let probabilities = meta
                            .predict(&members)
                            .with_context(|| format!("ensemble {}: predict", strategy))?;
                        meta_learners.push((strategy, meta));
                        probabilities
                    }
                };

                scored.push(Scored {
                    name: strategy.name().to_string(),
                    description: strategy.description().to_string(),
                    kind: ResultKind::Ensemble,
                    probabilities,
                });
            }
        }

        // Evaluate
        let threshold = config.decision_threshold;
        let mut model_results = Vec::with_capacity(scored.len());
        for s in &scored {
            let metrics = EvaluationMetrics::from_probabilities(&s.probabilities, &val_table.labels, threshold)
                .with_context(|| format!("evaluate {}", s.name))?;
            tracing::info!(
                "  {} - Accuracy: {:.4}, F1: {:.4}, MCC: {:.4}",
                s.name,
                metrics.classification.accuracy,
                metrics.classification.f1_score,
                metrics.classification.mcc
            );
            model_results.push(ModelResult {
                model_name: s.name.clone(),
                model_description: s.description.clone(),
                kind: s.kind,
                metrics,
                training_samples: train_table.len(),
                eval_samples: val_table.len(),
            });
        }

        let comparison = compare_records(&val_table, &scored, threshold);
        let summary = summarize(&model_results);

        let dataset_info = DatasetInfo {
            id: dataset.id.clone(),
            name: dataset.name.clone(),
            source: dataset.source.clone(),
            total_samples: dataset.len(),
            train_samples: train_records.len(),
            validation_samples: val_records.len(),
            n_features: preprocessor.feature_names().len(),
            feature_names: preprocessor.feature_names().to_vec(),
            train_label_distribution: distribution(&train_records),
            validation_label_distribution: distribution(&val_records),
        };

        let results = EvaluationResults {
            config: config.clone(),
            dataset_info,
            model_results,
            comparison,
            summary,
            limitations,
            timestamp: Utc::now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        };

        self.fitted = Some(FittedArtifacts {
            preprocessor,
            models,
            meta_learners,
        });
        Ok(results)
    }

    /// Base probabilities and labels the meta-learners are trained on
    fn meta_training_set(
        &self,
        members: &AlignedPredictions,
        train_table: &FeatureTable,
        val_table: &FeatureTable,
        settings: &ModelSettings,
    ) -> Result<(AlignedPredictions, Vec<Label>)> {
        match self.config.stacking {
            StackingMode::InSample => Ok((members.clone(), val_table.labels.clone())),
            StackingMode::OutOfFold => {
                let mut oof = Vec::with_capacity(members.models().len());
                for &kind in members.models() {
                    tracing::info!("Cross-fitting {} for the meta-learners", kind);
                    let probabilities = cross_val_predict(
                        kind,
                        settings,
                        &train_table.rows,
                        &train_table.labels,
                        self.config.cv_folds,
                        self.config.seed,
                    )
                    .with_context(|| format!("cross-fit {}", kind))?;
                    oof.push(ModelPredictions::new(kind, train_table.ids.clone(), probabilities));
                }
                let aligned = AlignedPredictions::align(&oof).context("ensemble: aligning out-of-fold predictions")?;
                Ok((aligned, train_table.labels.clone()))
            }
        }
    }

    /// Save results to JSON file
    pub fn save_results(results: &EvaluationResults, output_path: &Path) -> Result<()> {
        std::fs::create_dir_all(output_path.parent().unwrap_or(Path::new(".")))?;
        let json = serde_json::to_string_pretty(results)?;
        std::fs::write(output_path, json)?;
        tracing::info!("Results saved to {}", output_path.display());
        Ok(())
    }

    /// Write the record-level comparison table as CSV
    pub fn save_comparison_csv(results: &EvaluationResults, output_path: &Path) -> Result<()> {
        std::fs::create_dir_all(output_path.parent().unwrap_or(Path::new(".")))?;
        let mut writer = csv::Writer::from_path(output_path)
            .with_context(|| format!("open {}", output_path.display()))?;

        let models: Vec<&str> = results.model_results.iter().map(|r| r.model_name.as_str()).collect();
        let mut header = vec!["id".to_string(), "actual".to_string()];
        for model in &models {
            header.push(format!("{}_predicted", model));
            header.push(format!("{}_correct", model));
        }
        writer.write_record(&header)?;

        for row in &results.comparison {
            let mut fields = vec![row.id.clone(), row.actual.to_string()];
            for outcome in &row.outcomes {
                fields.push(outcome.predicted.to_string());
                fields.push(outcome.correct.to_string());
            }
            writer.write_record(&fields)?;
        }
        writer.flush()?;
        tracing::info!("Record comparison saved to {}", output_path.display());
        Ok(())
    }

    /// Persist the preprocessor, base models and meta-learners as JSON
    pub fn save_fitted(&self, output_dir: &Path) -> Result<Vec<PathBuf>> {
        let fitted = self.fitted.as_ref().context("no fitted artifacts: run the pipeline first")?;
        let models_dir = output_dir.join("models");
        std::fs::create_dir_all(&models_dir)?;

        let mut saved = Vec::new();
        let pre_path = output_dir.join("preprocessor.json");
        fitted.preprocessor.save_json(&pre_path).context("save preprocessor")?;
        saved.push(pre_path);

        for model in &fitted.models {
            let path = models_dir.join(format!("{}.json", model.name()));
            let json = model.to_json().with_context(|| format!("serialize {}", model.name()))?;
            std::fs::write(&path, serde_json::to_string_pretty(&json)?)?;
            saved.push(path);
        }
        for (strategy, meta) in &fitted.meta_learners {
            let path = models_dir.join(format!("{}.json", strategy.name()));
            let json = meta.to_json().with_context(|| format!("serialize {}", strategy))?;
            std::fs::write(&path, serde_json::to_string_pretty(&json)?)?;
            saved.push(path);
        }

        tracing::info!("Saved {} fitted artifacts to {}", saved.len(), output_dir.display());
        Ok(saved)
    }

    /// Generate a markdown report
    pub fn generate_report(results: &EvaluationResults) -> String {
        let mut report = String::new();

        report.push_str("# News Classification Ensemble Evaluation Report\n\n");
        report.push_str(&format!("**Generated:** {}\n\n", results.timestamp.format("%Y-%m-%d %H:%M:%S UTC")));
        report.push_str(&format!("**Version:** {}\n\n", results.version));

        let info = &results.dataset_info;
        report.push_str("## Dataset\n\n");
        report.push_str(&format!("- **ID:** {}\n", info.id));
        report.push_str(&format!("- **Name:** {}\n", info.name));
        report.push_str(&format!("- **Total Records:** {}\n", info.total_samples));
        report.push_str(&format!(
            "- **Split Sizes:** Train={}, Validation={} (seed {})\n",
            info.train_samples, info.validation_samples, results.config.seed
        ));
        report.push_str(&format!("- **Features:** {}\n", info.n_features));
        for (name, dist) in [
            ("Train", &info.train_label_distribution),
            ("Validation", &info.validation_label_distribution),
        ] {
            let parts: Vec<String> = dist.iter().map(|(label, n)| format!("{}={}", label, n)).collect();
            report.push_str(&format!("- **{} Labels:** {}\n", name, parts.join(", ")));
        }
        report.push('\n');

        report.push_str("## Summary\n\n");
        report.push_str(&format!(
            "**Best Model:** {} (F1={:.4}, Accuracy={:.4})\n\n",
            results.summary.best_model, results.summary.best_f1, results.summary.best_accuracy
        ));
        report.push_str(&format!(
            "Positive class: Real. Decision threshold: {:.2}.\n\n",
            results.config.decision_threshold
        ));

        report.push_str("### F1 by Model\n\n");
        report.push_str("| Model | Kind | Accuracy | F1 Score | MCC | AUC-ROC |\n");
        report.push_str("|-------|------|----------|----------|-----|---------|\n");
        for result in &results.model_results {
            let auc = result.metrics.auc_roc.map_or("-".to_string(), |v| format!("{:.4}", v));
            let kind = match result.kind {
                ResultKind::Base => "base",
                ResultKind::Ensemble => "ensemble",
            };
            report.push_str(&format!(
                "| {} | {} | {:.4} | {:.4} | {:.4} | {} |\n",
                result.model_name,
                kind,
                result.metrics.classification.accuracy,
                result.metrics.classification.f1_score,
                result.metrics.classification.mcc,
                auc
            ));
        }

        if !results.limitations.is_empty() {
            report.push_str("\n## Known Limitations\n\n");
            for note in &results.limitations {
                report.push_str(&format!("- {}\n", note));
            }
        }

        report.push_str("\n## Detailed Results\n\n");
        for result in &results.model_results {
            report.push_str(&format!("### {}\n\n", result.model_name));
            report.push_str(&format!("*{}*\n\n", result.model_description));
            report.push_str(&format!("- Training records: {}\n", result.training_samples));
            report.push_str(&format!("- Evaluation records: {}\n\n", result.eval_samples));
            report.push_str(&format!("```\n{}\n```\n\n", result.metrics.format()));
        }

        let misses: Vec<&RecordComparison> = results
            .comparison
            .iter()
            .filter(|row| row.outcomes.iter().any(|o| !o.correct))
            .take(20)
            .collect();
        if !misses.is_empty() {
            report.push_str("## Misclassified Records (first 20)\n\n");
            report.push_str("| ID | Actual | Wrong Models |\n");
            report.push_str("|----|--------|--------------|\n");
            for row in misses {
                let wrong: Vec<&str> = row
                    .outcomes
                    .iter()
                    .filter(|o| !o.correct)
                    .map(|o| o.model.as_str())
                    .collect();
                report.push_str(&format!("| {} | {} | {} |\n", row.id, row.actual, wrong.join(", ")));
            }
            report.push('\n');
        }

        report.push_str("## Configuration\n\n");
        report.push_str(&format!(
            "```json\n{}\n```\n",
            serde_json::to_string_pretty(&results.config).unwrap_or_default()
        ));

        report
    }
}

fn compare_records(val_table: &FeatureTable, scored: &[Scored], threshold: f64) -> Vec<RecordComparison> {
    let labels: Vec<Vec<Label>> = scored.iter().map(|s| to_labels(&s.probabilities, threshold)).collect();

    (0..val_table.len())
        .map(|i| {
            let actual = val_table.labels[i];
            let outcomes = scored
                .iter()
                .zip(&labels)
                .map(|(s, predicted)| RecordOutcome {
                    model: s.name.clone(),
                    probability: s.probabilities[i],
                    predicted: predicted[i],
                    correct: predicted[i] == actual,
                })
                .collect();
            RecordComparison {
                id: val_table.ids[i].clone(),
                actual,
                outcomes,
            }
        })
        .collect()
}

fn summarize(model_results: &[ModelResult]) -> EvaluationSummary {
    let mut best_model = "None".to_string();
    let mut best_f1 = 0.0;
    let mut best_accuracy = 0.0;

    let model_comparison = model_results
        .iter()
        .map(|r| {
            let c = &r.metrics.classification;
            if c.f1_score > best_f1 {
                best_f1 = c.f1_score;
                best_accuracy = c.accuracy;
                best_model = r.model_name.clone();
            }
            ModelComparison {
                model: r.model_name.clone(),
                accuracy: c.accuracy,
                f1_score: c.f1_score,
                mcc: c.mcc,
                auc_roc: r.metrics.auc_roc,
            }
        })
        .collect();

    EvaluationSummary {
        best_model,
        best_f1,
        best_accuracy,
        model_comparison,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> PipelineConfig {
        PipelineConfig {
            seed: 42,
            synthetic_size: 200,
            logistic_iterations: 300,
            boosting_rounds: 30,
            ..PipelineConfig::default()
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = PipelineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.seed, 123);
        assert_eq!(config.knn_k_grid, vec![1, 3, 5, 7, 9, 11, 13, 15, 17, 19]);
        assert_eq!(config.boosting_rounds, 150);
        assert_eq!(config.stacking, StackingMode::OutOfFold);
    }

    #[test]
    fn test_validate_rejects_bad_settings() {
        let bad = [
            PipelineConfig { train_fraction: 1.0, ..PipelineConfig::default() },
            PipelineConfig { knn_k_grid: vec![], ..PipelineConfig::default() },
            PipelineConfig { knn_k_grid: vec![1, 4], ..PipelineConfig::default() },
            PipelineConfig { boosting_rounds: 0, ..PipelineConfig::default() },
            PipelineConfig { cv_folds: 1, ..PipelineConfig::default() },
            PipelineConfig { dataset: DatasetKind::Csv, ..PipelineConfig::default() },
            PipelineConfig { renormalize_weights: false, ..PipelineConfig::default() },
            PipelineConfig { ensemble_members: vec![ModelKind::Logistic], ..PipelineConfig::default() },
        ];
        for config in bad {
            let err = config.validate().unwrap_err();
            assert!(matches!(err, PipelineError::Config(_)), "{:?}", err);
        }
    }

    #[test]
    fn test_config_from_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"seed": 7, "stacking": "in_sample", "ensemble_weights": {"logistic": 0.6, "decision_tree": 0.3, "knn": 0.1}}"#,
        )
        .unwrap();

        let config = PipelineConfig::from_file(&path).unwrap();
        assert_eq!(config.seed, 7);
        assert_eq!(config.stacking, StackingMode::InSample);
        assert_eq!(config.ensemble_weights[&ModelKind::Logistic], 0.6);
        assert_eq!(config.train_fraction, 0.8);
    }

    #[test]
    fn test_pipeline_synthetic() {
        let mut pipeline = EvaluationPipeline::new(small_config());
        let results = pipeline.run().expect("Pipeline should succeed");

        assert_eq!(results.model_results.len(), 4 + 4);
        assert_eq!(results.dataset_info.train_samples, 160);
        assert_eq!(results.dataset_info.validation_samples, 40);
        assert_eq!(results.comparison.len(), 40);
        assert!(results.comparison.iter().all(|row| row.outcomes.len() == 8));
        assert!(results.summary.best_f1 >= 0.0 && results.summary.best_f1 <= 1.0);

        let table = results.f1_table();
        for name in ["logistic", "knn", "decision_tree", "naive_bayes", "ensemble_average", "ensemble_boosted"] {
            assert!(table.contains_key(name), "{}", name);
        }
        // Reference weights sum to 0.9 and are rescaled under the default config
        assert!(results.limitations.iter().any(|l| l.contains("rescaled")));
    }

    #[test]
    fn test_pipeline_is_deterministic() {
        let a = EvaluationPipeline::new(small_config()).run().unwrap();
        let b = EvaluationPipeline::new(small_config()).run().unwrap();
        assert_eq!(a.f1_table(), b.f1_table());
        assert_eq!(a.comparison, b.comparison);
    }

    #[test]
    fn test_in_sample_stacking_is_flagged() {
        let config = PipelineConfig {
            stacking: StackingMode::InSample,
            ..small_config()
        };
        let results = EvaluationPipeline::new(config).run().unwrap();
        assert!(results.limitations.iter().any(|l| l.contains("optimistic")));
    }

    #[test]
    fn test_strict_weights_fail_with_stage() {
        let config = PipelineConfig {
            renormalize_weights: false,
            ..small_config()
        };
        let err = EvaluationPipeline::new(config).run().unwrap_err();
        assert!(format!("{:#}", err).contains("sum to 0.9000"));
    }

    #[test]
    fn test_failure_names_stage() {
        let config = PipelineConfig {
            degenerate_field: DegenerateFieldPolicy::Fail,
            ..small_config()
        };
        let mut records = Dataset::load_synthetic(50, 3).records;
        for r in &mut records {
            r.plagiarism_score = 0.25;
        }
        let dataset = Dataset::from_records("const", "Constant plagiarism", records);

        let err = EvaluationPipeline::with_dataset(config, dataset).run().unwrap_err();
        let message = format!("{:#}", err);
        assert!(message.contains("encode/normalize"), "{}", message);
        assert!(message.contains("plagiarism_score"), "{}", message);
    }

    #[test]
    fn test_report_and_outputs() {
        let mut pipeline = EvaluationPipeline::new(small_config());
        let results = pipeline.run().unwrap();

        let report = EvaluationPipeline::generate_report(&results);
        assert!(report.contains("News Classification Ensemble Evaluation Report"));
        assert!(report.contains("F1 by Model"));
        assert!(report.contains("ensemble_stacked"));

        let dir = tempfile::tempdir().unwrap();
        let json_path = dir.path().join("results.json");
        EvaluationPipeline::save_results(&results, &json_path).unwrap();
        let reloaded: EvaluationResults = serde_json::from_slice(&std::fs::read(&json_path).unwrap()).unwrap();
        assert_eq!(reloaded.f1_table(), results.f1_table());

        let csv_path = dir.path().join("comparison.csv");
        EvaluationPipeline::save_comparison_csv(&results, &csv_path).unwrap();
        let mut reader = csv::Reader::from_path(&csv_path).unwrap();
        let headers = reader.headers().unwrap().clone();
        assert_eq!(&headers[0], "id");
        assert_eq!(&headers[2], "logistic_predicted");
        assert_eq!(reader.records().count(), results.comparison.len());
    }

    #[test]
    fn test_save_fitted_round_trip() {
        let mut pipeline = EvaluationPipeline::new(small_config());
        pipeline.run().unwrap();

        let dir = tempfile::tempdir().unwrap();
        let saved = pipeline.save_fitted(dir.path()).unwrap();
        assert!(saved.iter().all(|p| p.exists()));
        assert!(dir.path().join("models/ensemble_boosted.json").exists());

        let fitted = pipeline.fitted().unwrap();
        let preprocessor = Preprocessor::load_json(&dir.path().join("preprocessor.json")).unwrap();
        assert_eq!(&preprocessor, &fitted.preprocessor);

        let json: serde_json::Value =
            serde_json::from_slice(&std::fs::read(dir.path().join("models/knn.json")).unwrap()).unwrap();
        let knn = crate::models::load_model(ModelKind::Knn, json).unwrap();
        let original = fitted.models.iter().find(|m| m.kind() == ModelKind::Knn).unwrap();
        let row = vec![0.0; preprocessor.feature_names().len()];
        assert_eq!(
            knn.predict_probability(&row).unwrap(),
            original.predict_probability(&row).unwrap()
        );
    }

    /// Synthetic records with `category` limited to three values
    fn three_category_records() -> Vec<Record> {
        let categories = ["Politics", "Health", "Sports"];
        Dataset::load_synthetic(200, 11)
            .records
            .into_iter()
            .enumerate()
            .map(|(i, r)| Record {
                category: categories[i % categories.len()].to_string(),
                ..r
            })
            .collect()
    }

    #[test]
    fn test_unseen_low_cardinality_value_uses_fallback() {
        let config = small_config();
        let mut records = three_category_records();
        let held_out = split_indices(records.len(), config.train_fraction, config.seed).unwrap().validation[0];
        records[held_out].category = "Weather".to_string();
        let dataset = Dataset::from_records("unseen", "Unseen category", records);

        let mut pipeline = EvaluationPipeline::with_dataset(config.clone(), dataset.clone());
        let results = pipeline.run().unwrap();
        assert_eq!(results.comparison.len(), 40);
        let encoder = pipeline
            .fitted()
            .unwrap()
            .preprocessor
            .encoders()
            .iter()
            .find(|e| e.field() == CategoricalField::Category)
            .unwrap();
        assert!(matches!(encoder, crate::encoding::CategoricalEncoder::Ordinal { .. }));

        let strict = PipelineConfig {
            unknown_category: UnknownCategoryPolicy::Fail,
            ..config
        };
        let err = EvaluationPipeline::with_dataset(strict, dataset).run().unwrap_err();
        let message = format!("{:#}", err);
        assert!(message.contains("validation split"), "{}", message);
        assert_eq!(message.matches("unknown category 'Weather'").count(), 1, "{}", message);
    }

    #[test]
    fn test_preprocessor_ignores_validation_records() {
        let config = small_config();
        let records = Dataset::load_synthetic(200, 5).records;
        let validation = split_indices(records.len(), config.train_fraction, config.seed).unwrap().validation;

        let mut altered = records.clone();
        for &i in &validation {
            let r = &mut altered[i];
            r.trust_score += 1_000.0;
            r.word_count *= 10.0;
            r.source = "Mystery Outlet".to_string();
            r.state = "Nowhere".to_string();
        }

        let mut original_run = EvaluationPipeline::with_dataset(config.clone(), Dataset::from_records("a", "a", records));
        original_run.run().unwrap();
        let mut altered_run = EvaluationPipeline::with_dataset(config.clone(), Dataset::from_records("b", "b", altered.clone()));
        altered_run.run().unwrap();

        let fitted = &altered_run.fitted().unwrap().preprocessor;
        assert_eq!(&original_run.fitted().unwrap().preprocessor, fitted);

        // Fitting on every record would have absorbed the altered values
        let everything = Preprocessor::fit(&altered, &config.preprocessor_config()).unwrap();
        assert_ne!(&everything, fitted);
        let trust = fitted.normalization().get(ContinuousField::TrustScore).unwrap();
        assert!(trust.mean <= 100.0);
    }
}
