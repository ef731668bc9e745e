// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Ensemble combiners over base-model probabilities
//!
//! Strategies:
//! - Unweighted average of P(Real)
//! - Weighted average with a static weight per model
//! - Stacked meta-learner: a decision tree over the base probabilities
//! - Boosted meta-learner: log-loss gradient boosting over the base probabilities
//!
//! Every strategy consumes [`AlignedPredictions`], which only exist once the
//! per-model vectors have been checked to cover the same records in the same
//! order.

mod boosting;

pub use boosting::{GradientBoosting, RegressionTree};

use crate::datasets::Label;
use crate::error::{PipelineError, Result};
use crate::models::{build_model, Classifier, DecisionTree, ModelKind, ModelSettings};
use crate::split::{complement, kfold_indices};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;

/// Tolerance on the sum of ensemble weights
pub const WEIGHT_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnsembleStrategy {
    Average,
    WeightedAverage,
    Stacked,
    Boosted,
}

impl EnsembleStrategy {
    pub const ALL: [EnsembleStrategy; 4] = [
        EnsembleStrategy::Average,
        EnsembleStrategy::WeightedAverage,
        EnsembleStrategy::Stacked,
        EnsembleStrategy::Boosted,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            EnsembleStrategy::Average => "ensemble_average",
            EnsembleStrategy::WeightedAverage => "ensemble_weighted",
            EnsembleStrategy::Stacked => "ensemble_stacked",
            EnsembleStrategy::Boosted => "ensemble_boosted",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            EnsembleStrategy::Average => "Unweighted mean of member probabilities",
            EnsembleStrategy::WeightedAverage => "Static weighted mean of member probabilities",
            EnsembleStrategy::Stacked => "Decision tree over member probabilities",
            EnsembleStrategy::Boosted => "Gradient-boosted trees over member probabilities",
        }
    }

    /// Whether the strategy learns from labelled base predictions
    pub fn is_learned(&self) -> bool {
        matches!(self, EnsembleStrategy::Stacked | EnsembleStrategy::Boosted)
    }
}

impl fmt::Display for EnsembleStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for EnsembleStrategy {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        let needle = s.trim().to_lowercase().replace(['-', ' '], "_");
        match needle.trim_start_matches("ensemble_") {
            "average" | "mean" => Ok(EnsembleStrategy::Average),
            "weighted" | "weighted_average" => Ok(EnsembleStrategy::WeightedAverage),
            "stacked" | "stacking" => Ok(EnsembleStrategy::Stacked),
            "boosted" | "boosting" => Ok(EnsembleStrategy::Boosted),
            _ => Err(PipelineError::config(format!("unknown ensemble strategy '{}'", s))),
        }
    }
}

/// Which predictions the stacked and boosted meta-learners are trained on
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StackingMode {
    /// Out-of-fold base predictions on the training split
    #[default]
    OutOfFold,
    /// The validation predictions themselves; scores are optimistic
    InSample,
}

/// P(Real) from one base model, keyed by record id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelPredictions {
    pub model: ModelKind,
    pub ids: Vec<String>,
    pub probabilities: Vec<f64>,
}

impl ModelPredictions {
    pub fn new(model: ModelKind, ids: Vec<String>, probabilities: Vec<f64>) -> Self {
        Self {
            model,
            ids,
            probabilities,
        }
    }
}

/// Per-model probability columns over one shared, ordered set of records
#[derive(Debug, Clone, PartialEq)]
pub struct AlignedPredictions {
    ids: Vec<String>,
    models: Vec<ModelKind>,
    columns: Vec<Vec<f64>>,
}

impl AlignedPredictions {
    /// Check one-to-one alignment by record id
    pub fn align(predictions: &[ModelPredictions]) -> Result<Self> {
        let Some(first) = predictions.first() else {
            return Err(PipelineError::insufficient_data("ensemble", "no base-model predictions"));
        };

        let mut seen = HashSet::with_capacity(first.ids.len());
        for id in &first.ids {
            if !seen.insert(id.as_str()) {
                return Err(PipelineError::dimension_mismatch(
                    format!("unique record ids ({})", first.model),
                    format!("record '{}' more than once", id),
                ));
            }
        }

        for p in predictions {
            if p.probabilities.len() != p.ids.len() {
                return Err(PipelineError::dimension_mismatch(
                    format!("{} probabilities from {}", p.ids.len(), p.model),
                    format!("{}", p.probabilities.len()),
                ));
            }
            if p.ids.len() != first.ids.len() {
                return Err(PipelineError::dimension_mismatch(
                    format!("{} records ({})", first.ids.len(), first.model),
                    format!("{} records ({})", p.ids.len(), p.model),
                ));
            }
            if let Some(pos) = p.ids.iter().zip(&first.ids).position(|(a, b)| a != b) {
                return Err(PipelineError::dimension_mismatch(
                    format!("record '{}' at position {} ({})", first.ids[pos], pos, first.model),
                    format!("record '{}' ({})", p.ids[pos], p.model),
                ));
            }
        }

        Ok(Self {
            ids: first.ids.clone(),
            models: predictions.iter().map(|p| p.model).collect(),
            columns: predictions.iter().map(|p| p.probabilities.clone()).collect(),
        })
    }

    /// Keep only `members`, in that order
    pub fn select(&self, members: &[ModelKind]) -> Result<Self> {
        let mut columns = Vec::with_capacity(members.len());
        for member in members {
            let column = self
                .column(*member)
                .ok_or_else(|| PipelineError::config(format!("no predictions for ensemble member '{}'", member)))?;
            columns.push(column.to_vec());
        }
        Ok(Self {
            ids: self.ids.clone(),
            models: members.to_vec(),
            columns,
        })
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn models(&self) -> &[ModelKind] {
        &self.models
    }

    pub fn column(&self, model: ModelKind) -> Option<&[f64]> {
        self.models
            .iter()
            .position(|m| *m == model)
            .map(|i| self.columns[i].as_slice())
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// One row per record, one column per model
    pub fn rows(&self) -> Vec<Vec<f64>> {
        (0..self.ids.len())
            .map(|i| self.columns.iter().map(|c| c[i]).collect())
            .collect()
    }
}

/// Arithmetic mean of the member probabilities per record
pub fn unweighted_average(base: &AlignedPredictions) -> Vec<f64> {
    let n_models = base.columns.len() as f64;
    (0..base.len())
        .map(|i| base.columns.iter().map(|c| c[i]).sum::<f64>() / n_models)
        .collect()
}

/// Hard labels at the decision threshold
pub fn to_labels(probabilities: &[f64], threshold: f64) -> Vec<Label> {
    probabilities
        .iter()
        .map(|&p| Label::from_probability(p, threshold))
        .collect()
}

/// Static per-model weights summing to one
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsembleWeights {
    weights: BTreeMap<ModelKind, f64>,
}

fn check_non_negative(weights: &BTreeMap<ModelKind, f64>) -> Result<f64> {
    if weights.is_empty() {
        return Err(PipelineError::config("ensemble weights are empty"));
    }
    if let Some((model, w)) = weights.iter().find(|(_, w)| !w.is_finite() || **w < 0.0) {
        return Err(PipelineError::config(format!(
            "weight for '{}' must be finite and non-negative, got {}",
            model, w
        )));
    }
    let sum: f64 = weights.values().sum();
    if sum <= 0.0 {
        return Err(PipelineError::config("ensemble weights sum to zero"));
    }
    Ok(sum)
}

impl EnsembleWeights {
    /// Accept weights only if they already sum to 1
    pub fn new(weights: BTreeMap<ModelKind, f64>) -> Result<Self> {
        let sum = check_non_negative(&weights)?;
        if (sum - 1.0).abs() > WEIGHT_TOLERANCE {
            return Err(PipelineError::config(format!(
                "ensemble weights sum to {:.4}, expected 1.0",
                sum
            )));
        }
        Ok(Self { weights })
    }

    /// Rescale weights to sum to 1
    pub fn normalized(weights: BTreeMap<ModelKind, f64>) -> Result<Self> {
        let sum = check_non_negative(&weights)?;
        if (sum - 1.0).abs() > WEIGHT_TOLERANCE {
            tracing::warn!("Ensemble weights sum to {:.4}, rescaling to 1.0", sum);
        }
        Ok(Self {
            weights: weights.into_iter().map(|(k, w)| (k, w / sum)).collect(),
        })
    }

    pub fn get(&self, model: ModelKind) -> Option<f64> {
        self.weights.get(&model).copied()
    }

    pub fn models(&self) -> Vec<ModelKind> {
        self.weights.keys().copied().collect()
    }

    /// Weighted mean per record; the weighted models and the members must match
    pub fn combine(&self, base: &AlignedPredictions) -> Result<Vec<f64>> {
        let mut members: Vec<ModelKind> = base.models.clone();
        members.sort();
        if members != self.models() {
            return Err(PipelineError::config(format!(
                "weights cover {:?} but the ensemble members are {:?}",
                self.models(),
                base.models
            )));
        }

        let weights: Vec<f64> = base.models.iter().filter_map(|m| self.get(*m)).collect();
        Ok((0..base.len())
            .map(|i| base.columns.iter().zip(&weights).map(|(c, w)| c[i] * w).sum())
            .collect())
    }
}

/// Second-stage learner trained on base-model probabilities
pub trait MetaLearner: Send + Sync {
    fn fit(&mut self, base: &AlignedPredictions, labels: &[Label]) -> Result<()>;

    /// P(Real) per record of `base`
    fn predict(&self, base: &AlignedPredictions) -> Result<Vec<f64>>;

    fn name(&self) -> &str;

    fn to_json(&self) -> Result<serde_json::Value>;
}

/// Meta-learners must see the same members, in the same order, they were fit on
pub(crate) fn check_members(fitted: &[ModelKind], base: &AlignedPredictions) -> Result<()> {
    if fitted != base.models() {
        return Err(PipelineError::dimension_mismatch(
            format!("members {:?}", fitted),
            format!("members {:?}", base.models()),
        ));
    }
    Ok(())
}

fn check_label_count(base: &AlignedPredictions, labels: &[Label]) -> Result<()> {
    if labels.len() != base.len() {
        return Err(PipelineError::dimension_mismatch(
            format!("{} labels", base.len()),
            format!("{} labels", labels.len()),
        ));
    }
    Ok(())
}

/// Decision tree over the member probabilities
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackedEnsemble {
    members: Vec<ModelKind>,
    tree: DecisionTree,
}

impl StackedEnsemble {
    pub fn new(tree: DecisionTree) -> Self {
        Self {
            members: Vec::new(),
            tree,
        }
    }

    pub fn tree(&self) -> &DecisionTree {
        &self.tree
    }
}

impl MetaLearner for StackedEnsemble {
    fn fit(&mut self, base: &AlignedPredictions, labels: &[Label]) -> Result<()> {
        check_label_count(base, labels)?;
        self.tree.fit(&base.rows(), labels)?;
        self.members = base.models().to_vec();
        tracing::debug!(
            "Stacked meta-learner fit: {:?} leaves, alpha={:.4}",
            self.tree.leaf_count(),
            self.tree.alpha()
        );
        Ok(())
    }

    fn predict(&self, base: &AlignedPredictions) -> Result<Vec<f64>> {
        if !self.tree.is_fitted() {
            return Err(PipelineError::not_fitted("stacked"));
        }
        check_members(&self.members, base)?;
        self.tree.predict_batch(&base.rows())
    }

    fn name(&self) -> &str {
        "stacked"
    }

    fn to_json(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }
}

/// Hyperparameters of the boosted meta-learner
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoostingSettings {
    pub rounds: usize,
    pub learning_rate: f64,
    pub max_depth: usize,
}

impl Default for BoostingSettings {
    fn default() -> Self {
        Self {
            rounds: 150,
            learning_rate: 0.1,
            max_depth: 3,
        }
    }
}

/// Build the meta-learner for a learned strategy
pub fn build_meta_learner(
    strategy: EnsembleStrategy,
    settings: &ModelSettings,
    boosting: BoostingSettings,
) -> Option<Box<dyn MetaLearner>> {
    match strategy {
        EnsembleStrategy::Stacked => Some(Box::new(StackedEnsemble::new(DecisionTree::new(
            settings.tree_max_depth,
            settings.tree_pruning,
            settings.cv_folds,
            settings.seed,
        )))),
        EnsembleStrategy::Boosted => Some(Box::new(GradientBoosting::new(
            boosting.rounds,
            boosting.learning_rate,
            boosting.max_depth,
        ))),
        EnsembleStrategy::Average | EnsembleStrategy::WeightedAverage => None,
    }
}

/// Out-of-fold P(Real) for every training row
///
/// Each row is predicted by a fresh model of `kind` fit on the other folds, so
/// no row is scored by a model that saw its label.
pub fn cross_val_predict(
    kind: ModelKind,
    settings: &ModelSettings,
    rows: &[Vec<f64>],
    labels: &[Label],
    folds: usize,
    seed: u64,
) -> Result<Vec<f64>> {
    let n = rows.len();
    let mut out = vec![0.0; n];

    for held_out in kfold_indices(n, folds, seed)? {
        let train_idx = complement(n, &held_out);
        let train_rows: Vec<Vec<f64>> = train_idx.iter().map(|&i| rows[i].clone()).collect();
        let train_labels: Vec<Label> = train_idx.iter().map(|&i| labels[i]).collect();

        let mut model: Box<dyn Classifier> = build_model(kind, settings);
        model.fit(&train_rows, &train_labels)?;
        for &i in &held_out {
            out[i] = model.predict_probability(&rows[i])?;
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::test_support::separable;

    fn ids(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("r{}", i)).collect()
    }

    fn three_models() -> AlignedPredictions {
        AlignedPredictions::align(&[
            ModelPredictions::new(ModelKind::Logistic, ids(3), vec![0.9, 0.2, 0.6]),
            ModelPredictions::new(ModelKind::DecisionTree, ids(3), vec![1.0, 0.0, 1.0]),
            ModelPredictions::new(ModelKind::Knn, ids(3), vec![1.0, 0.0, 1.0]),
        ])
        .unwrap()
    }

    #[test]
    fn test_unweighted_average() {
        let avg = unweighted_average(&three_models());
        let expected = [0.967, 0.067, 0.867];
        for (a, e) in avg.iter().zip(expected) {
            assert!((a - e).abs() < 1e-3, "{} vs {}", a, e);
        }
        assert_eq!(to_labels(&avg, 0.5), vec![Label::Real, Label::Fake, Label::Real]);
    }

    #[test]
    fn test_align_rejects_length_mismatch() {
        let err = AlignedPredictions::align(&[
            ModelPredictions::new(ModelKind::Logistic, ids(3), vec![0.1, 0.2, 0.3]),
            ModelPredictions::new(ModelKind::Knn, ids(2), vec![0.1, 0.2]),
        ])
        .unwrap_err();
        assert!(matches!(err, PipelineError::DimensionMismatch { .. }));
    }

    #[test]
    fn test_align_rejects_reordered_ids() {
        let mut swapped = ids(3);
        swapped.swap(0, 2);
        let err = AlignedPredictions::align(&[
            ModelPredictions::new(ModelKind::Logistic, ids(3), vec![0.1, 0.2, 0.3]),
            ModelPredictions::new(ModelKind::Knn, swapped, vec![0.3, 0.2, 0.1]),
        ])
        .unwrap_err();
        assert!(matches!(err, PipelineError::DimensionMismatch { .. }));
        assert!(err.to_string().contains("r0"));
    }

    #[test]
    fn test_align_rejects_duplicate_ids() {
        let repeated = vec!["r0".to_string(), "r1".to_string(), "r0".to_string()];
        let err = AlignedPredictions::align(&[
            ModelPredictions::new(ModelKind::Logistic, repeated.clone(), vec![0.1, 0.2, 0.3]),
            ModelPredictions::new(ModelKind::Knn, repeated, vec![0.3, 0.2, 0.1]),
        ])
        .unwrap_err();
        assert!(matches!(err, PipelineError::DimensionMismatch { .. }));
        assert!(err.to_string().contains("'r0' more than once"));
    }

    #[test]
    fn test_align_rejects_empty() {
        let err = AlignedPredictions::align(&[]).unwrap_err();
        assert!(matches!(err, PipelineError::InsufficientData { .. }));
    }

    #[test]
    fn test_select_members() {
        let base = three_models();
        let picked = base.select(&[ModelKind::Knn, ModelKind::Logistic]).unwrap();
        assert_eq!(picked.models(), &[ModelKind::Knn, ModelKind::Logistic]);
        assert_eq!(picked.rows()[0], vec![1.0, 0.9]);

        let err = base.select(&[ModelKind::NaiveBayes]).unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }

    fn reference_weights() -> BTreeMap<ModelKind, f64> {
        BTreeMap::from([
            (ModelKind::Logistic, 0.5),
            (ModelKind::DecisionTree, 0.3),
            (ModelKind::Knn, 0.1),
        ])
    }

    #[test]
    fn test_strict_weights_reject_non_unit_sum() {
        let err = EnsembleWeights::new(reference_weights()).unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
        assert!(err.to_string().contains("0.9"));
    }

    #[test]
    fn test_normalized_weights_rescale() {
        let weights = EnsembleWeights::normalized(reference_weights()).unwrap();
        assert!((weights.get(ModelKind::Logistic).unwrap() - 0.5 / 0.9).abs() < 1e-12);

        let combined = weights.combine(&three_models()).unwrap();
        let expected0 = (0.9 * 0.5 + 1.0 * 0.3 + 1.0 * 0.1) / 0.9;
        assert!((combined[0] - expected0).abs() < 1e-12);
        assert!(combined.iter().all(|p| (0.0..=1.0).contains(p)));
    }

    #[test]
    fn test_weights_reject_negative() {
        let mut weights = reference_weights();
        weights.insert(ModelKind::Knn, -0.1);
        assert!(EnsembleWeights::normalized(weights).is_err());
    }

    #[test]
    fn test_weights_must_cover_members() {
        let weights = EnsembleWeights::new(BTreeMap::from([
            (ModelKind::Logistic, 0.5),
            (ModelKind::Knn, 0.5),
        ]))
        .unwrap();
        assert!(matches!(weights.combine(&three_models()), Err(PipelineError::Config(_))));
    }

    #[test]
    fn test_stacked_learns_from_probabilities() {
        let labels = vec![Label::Real, Label::Fake, Label::Real];
        let base = three_models();
        let mut stacked = StackedEnsemble::new(DecisionTree::unpruned(5));
        stacked.fit(&base, &labels).unwrap();

        let probs = stacked.predict(&base).unwrap();
        assert_eq!(to_labels(&probs, 0.5), labels);
    }

    #[test]
    fn test_meta_learner_rejects_other_members() {
        let labels = vec![Label::Real, Label::Fake, Label::Real];
        let base = three_models();
        let mut stacked = StackedEnsemble::new(DecisionTree::unpruned(5));
        stacked.fit(&base, &labels).unwrap();

        let fewer = base.select(&[ModelKind::Logistic]).unwrap();
        assert!(matches!(stacked.predict(&fewer), Err(PipelineError::DimensionMismatch { .. })));
    }

    #[test]
    fn test_meta_learner_label_count() {
        let mut stacked = StackedEnsemble::new(DecisionTree::unpruned(5));
        let err = stacked.fit(&three_models(), &[Label::Real]).unwrap_err();
        assert!(matches!(err, PipelineError::DimensionMismatch { .. }));
    }

    #[test]
    fn test_boosted_meta_learner() {
        let labels = vec![Label::Real, Label::Fake, Label::Real];
        let base = three_models();
        let mut boosted = GradientBoosting::new(150, 0.1, 3);
        boosted.fit(&base, &labels).unwrap();

        let probs = boosted.predict(&base).unwrap();
        assert_eq!(to_labels(&probs, 0.5), labels);
    }

    #[test]
    fn test_cross_val_predict_covers_every_row() {
        let (rows, labels) = separable(10);
        let settings = ModelSettings::default();
        let oof = cross_val_predict(ModelKind::Logistic, &settings, &rows, &labels, 5, 7).unwrap();

        assert_eq!(oof.len(), rows.len());
        for (p, label) in oof.iter().zip(&labels) {
            assert_eq!(Label::from_probability(*p, 0.5), *label);
        }
    }

    #[test]
    fn test_build_meta_learner() {
        let settings = ModelSettings::default();
        let boosting = BoostingSettings::default();
        assert!(build_meta_learner(EnsembleStrategy::Average, &settings, boosting).is_none());
        assert_eq!(
            build_meta_learner(EnsembleStrategy::Boosted, &settings, boosting).unwrap().name(),
            "boosted"
        );
    }

    #[test]
    fn test_strategy_parsing() {
        assert_eq!("stacking".parse::<EnsembleStrategy>().unwrap(), EnsembleStrategy::Stacked);
        assert_eq!("ensemble_boosted".parse::<EnsembleStrategy>().unwrap(), EnsembleStrategy::Boosted);
        assert_eq!("weighted-average".parse::<EnsembleStrategy>().unwrap(), EnsembleStrategy::WeightedAverage);
        assert!("voting".parse::<EnsembleStrategy>().is_err());
    }
}
