// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Ensemble evaluation for Real/Fake news classification
//!
//! This crate provides:
//! - Record schema, CSV loading and a seeded synthetic dataset
//! - Categorical encoding, z-score normalization and derived features, all fit
//!   on the training split and applied as frozen parameters
//! - Base classifiers (logistic regression, kNN, CART, naive Bayes)
//! - Ensemble combiners (average, weighted, stacked, boosted)
//! - Evaluation metrics with Real as the positive class
//! - Reproducible evaluation pipeline with seeded randomness

pub mod datasets;
pub mod encoding;
pub mod ensemble;
pub mod error;
pub mod features;
pub mod metrics;
pub mod models;
pub mod normalize;
pub mod pipeline;
pub mod split;

pub use datasets::{CategoricalField, ContinuousField, Dataset, Label, Record};
pub use encoding::{CategoricalEncoder, FrequencyMap, OrdinalMap, UnknownCategoryPolicy};
pub use ensemble::{AlignedPredictions, EnsembleStrategy, EnsembleWeights, MetaLearner, ModelPredictions, StackingMode};
pub use error::{PipelineError, Result};
pub use features::{FeatureTable, Preprocessor, PreprocessorConfig};
pub use metrics::{confusion_matrix, f1, ClassificationReport, ConfusionMatrix, EvaluationMetrics};
pub use models::{Classifier, ModelKind, ModelSettings};
pub use normalize::{DegenerateFieldPolicy, NormalizationParams};
pub use pipeline::{EvaluationPipeline, EvaluationResults, PipelineConfig};
