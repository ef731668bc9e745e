// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Base classifiers for Real/Fake prediction
//!
//! Implements:
//! - Logistic regression (batch gradient descent, L2 penalty)
//! - k-nearest-neighbor (k picked by cross-validated grid search)
//! - CART decision tree (Gini splits, cross-validated cost-complexity pruning)
//! - Gaussian naive Bayes
//!
//! All models share the [`Classifier`] capability: `fit` on a feature matrix and
//! labels, then `predict_probability` returning P(Real) in [0, 1].

mod knn;
mod logistic;
mod naive_bayes;
mod tree;

pub use knn::KNearestNeighbors;
pub use logistic::LogisticRegression;
pub use naive_bayes::GaussianNaiveBayes;
pub use tree::DecisionTree;

use crate::datasets::Label;
use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identifies a base model family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    Logistic,
    Knn,
    DecisionTree,
    NaiveBayes,
}

impl ModelKind {
    pub const ALL: [ModelKind; 4] = [
        ModelKind::Logistic,
        ModelKind::Knn,
        ModelKind::DecisionTree,
        ModelKind::NaiveBayes,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ModelKind::Logistic => "logistic",
            ModelKind::Knn => "knn",
            ModelKind::DecisionTree => "decision_tree",
            ModelKind::NaiveBayes => "naive_bayes",
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ModelKind {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        let needle = s.trim().to_lowercase().replace(['-', ' '], "_");
        match needle.as_str() {
            "logistic" | "logistic_regression" => Ok(ModelKind::Logistic),
            "knn" | "k_nearest_neighbors" => Ok(ModelKind::Knn),
            "decision_tree" | "tree" | "cart" => Ok(ModelKind::DecisionTree),
            "naive_bayes" | "nb" => Ok(ModelKind::NaiveBayes),
            _ => Err(PipelineError::config(format!("unknown model '{}'", s))),
        }
    }
}

/// Hyperparameters shared by the model factory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSettings {
    pub seed: u64,
    pub cv_folds: usize,
    pub knn_k_grid: Vec<usize>,
    pub tree_pruning: bool,
    pub tree_max_depth: usize,
    pub logistic_iterations: usize,
    pub logistic_learning_rate: f64,
    pub logistic_l2: f64,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            seed: 123,
            cv_folds: 5,
            knn_k_grid: (1..=19).step_by(2).collect(),
            tree_pruning: true,
            tree_max_depth: 30,
            logistic_iterations: 2000,
            logistic_learning_rate: 0.1,
            logistic_l2: 1e-4,
        }
    }
}

/// Uniform capability over the base models
pub trait Classifier: Send + Sync {
    /// Fit on a feature matrix and aligned labels
    fn fit(&mut self, features: &[Vec<f64>], labels: &[Label]) -> Result<()>;

    /// P(Real) for one feature vector
    fn predict_probability(&self, features: &[f64]) -> Result<f64>;

    /// P(Real) for many feature vectors
    fn predict_batch(&self, rows: &[Vec<f64>]) -> Result<Vec<f64>> {
        rows.iter().map(|r| self.predict_probability(r)).collect()
    }

    fn kind(&self) -> ModelKind;

    fn name(&self) -> &str {
        self.kind().name()
    }

    fn description(&self) -> &str;

    fn is_fitted(&self) -> bool;

    /// Fitted parameters as JSON, for persistence
    fn to_json(&self) -> Result<serde_json::Value>;
}

/// Build an unfitted model of the given kind
pub fn build_model(kind: ModelKind, settings: &ModelSettings) -> Box<dyn Classifier> {
    match kind {
        ModelKind::Logistic => Box::new(LogisticRegression::new(
            settings.logistic_iterations,
            settings.logistic_learning_rate,
            settings.logistic_l2,
        )),
        ModelKind::Knn => Box::new(KNearestNeighbors::new(
            settings.knn_k_grid.clone(),
            settings.cv_folds,
            settings.seed,
        )),
        ModelKind::DecisionTree => Box::new(DecisionTree::new(
            settings.tree_max_depth,
            settings.tree_pruning,
            settings.cv_folds,
            settings.seed,
        )),
        ModelKind::NaiveBayes => Box::new(GaussianNaiveBayes::new()),
    }
}

/// Restore a fitted model from the JSON written by [`Classifier::to_json`]
pub fn load_model(kind: ModelKind, json: serde_json::Value) -> Result<Box<dyn Classifier>> {
    Ok(match kind {
        ModelKind::Logistic => Box::new(serde_json::from_value::<LogisticRegression>(json)?),
        ModelKind::Knn => Box::new(serde_json::from_value::<KNearestNeighbors>(json)?),
        ModelKind::DecisionTree => Box::new(serde_json::from_value::<DecisionTree>(json)?),
        ModelKind::NaiveBayes => Box::new(serde_json::from_value::<GaussianNaiveBayes>(json)?),
    })
}

/// Factory function to create all base models
pub fn all_models(settings: &ModelSettings) -> Vec<Box<dyn Classifier>> {
    ModelKind::ALL.iter().map(|&k| build_model(k, settings)).collect()
}

/// Reject empty, ragged, misaligned or single-class training data
pub(crate) fn validate_training(model: &str, features: &[Vec<f64>], labels: &[Label]) -> Result<usize> {
    if features.is_empty() {
        return Err(PipelineError::insufficient_data(model, "training set is empty"));
    }
    if features.len() != labels.len() {
        return Err(PipelineError::dimension_mismatch(
            format!("{} labels", features.len()),
            format!("{} labels", labels.len()),
        ));
    }

    let n_features = features[0].len();
    if let Some(bad) = features.iter().position(|r| r.len() != n_features) {
        return Err(PipelineError::dimension_mismatch(
            format!("{} features", n_features),
            format!("{} features in row {}", features[bad].len(), bad),
        ));
    }

    let n_real = labels.iter().filter(|l| **l == Label::Real).count();
    if n_real == 0 || n_real == labels.len() {
        return Err(PipelineError::insufficient_data(
            model,
            "training set contains a single class",
        ));
    }

    Ok(n_features)
}

/// Reject feature vectors whose width differs from the fitted width
pub(crate) fn check_width(expected: usize, features: &[f64]) -> Result<()> {
    if features.len() != expected {
        return Err(PipelineError::dimension_mismatch(
            format!("{} features", expected),
            format!("{} features", features.len()),
        ));
    }
    Ok(())
}

/// Numerically stable logistic function
pub(crate) fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

/// Share of `Real` labels among `labels` (0.0 when empty)
pub(crate) fn positive_rate(labels: &[Label]) -> f64 {
    if labels.is_empty() {
        return 0.0;
    }
    labels.iter().filter(|l| **l == Label::Real).count() as f64 / labels.len() as f64
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::datasets::Label;

    /// Two well-separated clusters on the first feature, noise on the second
    pub fn separable(n_per_class: usize) -> (Vec<Vec<f64>>, Vec<Label>) {
        let mut rows = Vec::new();
        let mut labels = Vec::new();
        for i in 0..n_per_class {
            let jitter = i as f64 * 0.05;
            rows.push(vec![2.0 + jitter, (i % 3) as f64 * 0.1]);
            labels.push(Label::Real);
            rows.push(vec![-2.0 - jitter, (i % 4) as f64 * 0.1]);
            labels.push(Label::Fake);
        }
        (rows, labels)
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::separable;
    use super::*;

    #[test]
    fn test_model_kind_parsing() {
        assert_eq!("knn".parse::<ModelKind>().unwrap(), ModelKind::Knn);
        assert_eq!("Decision-Tree".parse::<ModelKind>().unwrap(), ModelKind::DecisionTree);
        assert_eq!("logistic_regression".parse::<ModelKind>().unwrap(), ModelKind::Logistic);
        assert!("svm".parse::<ModelKind>().is_err());
    }

    #[test]
    fn test_all_models() {
        let models = all_models(&ModelSettings::default());
        assert_eq!(models.len(), 4);

        let names: Vec<_> = models.iter().map(|m| m.name()).collect();
        assert!(names.contains(&"logistic"));
        assert!(names.contains(&"knn"));
        assert!(names.contains(&"decision_tree"));
        assert!(names.contains(&"naive_bayes"));
    }

    #[test]
    fn test_predict_before_fit() {
        for model in all_models(&ModelSettings::default()) {
            assert!(!model.is_fitted());
            let err = model.predict_probability(&[0.0, 0.0]).unwrap_err();
            assert!(matches!(err, PipelineError::NotFitted { .. }), "{}", model.name());
        }
    }

    #[test]
    fn test_fit_rejects_empty_and_single_class() {
        for mut model in all_models(&ModelSettings::default()) {
            let err = model.fit(&[], &[]).unwrap_err();
            assert!(matches!(err, PipelineError::InsufficientData { .. }));

            let rows = vec![vec![1.0, 2.0], vec![3.0, 4.0]];
            let err = model.fit(&rows, &[Label::Real, Label::Real]).unwrap_err();
            assert!(matches!(err, PipelineError::InsufficientData { .. }), "{}", model.name());
        }
    }

    #[test]
    fn test_all_models_learn_separable_data() {
        let (rows, labels) = separable(12);
        for mut model in all_models(&ModelSettings::default()) {
            model.fit(&rows, &labels).unwrap();
            assert!(model.is_fitted());

            let p_real = model.predict_probability(&[2.5, 0.1]).unwrap();
            let p_fake = model.predict_probability(&[-2.5, 0.1]).unwrap();
            assert!(p_real > 0.5, "{} gave {}", model.name(), p_real);
            assert!(p_fake < 0.5, "{} gave {}", model.name(), p_fake);
            assert!((0.0..=1.0).contains(&p_real) && (0.0..=1.0).contains(&p_fake));
        }
    }

    #[test]
    fn test_width_mismatch() {
        let (rows, labels) = separable(6);
        for mut model in all_models(&ModelSettings::default()) {
            model.fit(&rows, &labels).unwrap();
            let err = model.predict_probability(&[1.0]).unwrap_err();
            assert!(matches!(err, PipelineError::DimensionMismatch { .. }), "{}", model.name());
        }
    }

    #[test]
    fn test_load_model_reproduces_probabilities() {
        let (rows, labels) = separable(8);
        for mut model in all_models(&ModelSettings::default()) {
            model.fit(&rows, &labels).unwrap();
            let restored = load_model(model.kind(), model.to_json().unwrap()).unwrap();

            assert!(restored.is_fitted());
            for row in &rows {
                let a = model.predict_probability(row).unwrap();
                let b = restored.predict_probability(row).unwrap();
                assert!((a - b).abs() < 1e-12, "{}", model.name());
            }
        }
    }

    #[test]
    fn test_sigmoid_stable() {
        assert!((sigmoid(0.0) - 0.5).abs() < 1e-12);
        assert!(sigmoid(800.0) <= 1.0);
        assert!(sigmoid(-800.0) >= 0.0);
        assert!(!sigmoid(-800.0).is_nan());
    }

    #[test]
    fn test_to_json_after_fit() {
        let (rows, labels) = separable(6);
        for mut model in all_models(&ModelSettings::default()) {
            model.fit(&rows, &labels).unwrap();
            let json = model.to_json().unwrap();
            assert!(json.is_object(), "{}", model.name());
        }
    }
}
