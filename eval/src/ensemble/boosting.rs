// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Gradient-boosted meta-learner
//!
//! Binary log-loss boosting over base-model probabilities. The bias is the
//! log-odds of the training share of Real. Each round fits a shallow
//! regression tree to the residuals `y - p` (splits by squared-error
//! reduction, leaves take one Newton step `sum(r) / sum(p(1 - p))`), and the
//! output is the sigmoid of the bias plus the shrunken sum of tree outputs.

use super::{AlignedPredictions, MetaLearner};
use crate::datasets::Label;
use crate::error::{PipelineError, Result};
use crate::models::{check_width, sigmoid, validate_training, ModelKind};
use serde::{Deserialize, Serialize};

const MIN_GAIN: f64 = 1e-12;
const MIN_HESSIAN: f64 = 1e-12;
/// Bias clamp so a near-pure training set keeps a finite log-odds
const PRIOR_CLAMP: f64 = 1e-6;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Branch {
    feature: usize,
    threshold: f64,
    left: usize,
    right: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct RegressionNode {
    value: f64,
    branch: Option<Branch>,
}

/// Least-squares regression tree with Newton leaf values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionTree {
    nodes: Vec<RegressionNode>,
}

impl RegressionTree {
    /// Fit on residuals with per-row hessians
    pub fn fit(rows: &[Vec<f64>], residuals: &[f64], hessians: &[f64], max_depth: usize) -> Self {
        let mut tree = Self { nodes: Vec::new() };
        let indices: Vec<usize> = (0..rows.len()).collect();
        tree.grow(rows, residuals, hessians, &indices, 0, max_depth);
        tree
    }

    fn grow(
        &mut self,
        rows: &[Vec<f64>],
        residuals: &[f64],
        hessians: &[f64],
        indices: &[usize],
        depth: usize,
        max_depth: usize,
    ) -> usize {
        let sum_r: f64 = indices.iter().map(|&i| residuals[i]).sum();
        let sum_h: f64 = indices.iter().map(|&i| hessians[i]).sum();
        let value = if sum_h > MIN_HESSIAN { sum_r / sum_h } else { 0.0 };

        let id = self.nodes.len();
        self.nodes.push(RegressionNode { value, branch: None });

        if depth >= max_depth || indices.len() < 2 {
            return id;
        }
        let Some((feature, threshold)) = best_split(rows, residuals, indices) else {
            return id;
        };

        let (left_idx, right_idx): (Vec<usize>, Vec<usize>) =
            indices.iter().partition(|&&i| rows[i][feature] <= threshold);
        let left = self.grow(rows, residuals, hessians, &left_idx, depth + 1, max_depth);
        let right = self.grow(rows, residuals, hessians, &right_idx, depth + 1, max_depth);
        self.nodes[id].branch = Some(Branch {
            feature,
            threshold,
            left,
            right,
        });
        id
    }

    pub fn predict(&self, row: &[f64]) -> f64 {
        let mut id = 0;
        while let Some(branch) = &self.nodes[id].branch {
            id = if row[branch.feature] <= branch.threshold {
                branch.left
            } else {
                branch.right
            };
        }
        self.nodes[id].value
    }

    pub fn leaf_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.branch.is_none()).count()
    }
}

/// Split maximizing the reduction in residual sum of squares
fn best_split(rows: &[Vec<f64>], residuals: &[f64], indices: &[usize]) -> Option<(usize, f64)> {
    let n = indices.len() as f64;
    let total: f64 = indices.iter().map(|&i| residuals[i]).sum();
    let parent = total * total / n;

    let mut best: Option<(usize, f64, f64)> = None;
    for feature in 0..rows[indices[0]].len() {
        let mut sorted = indices.to_vec();
        sorted.sort_by(|&a, &b| rows[a][feature].total_cmp(&rows[b][feature]));

        let mut left_sum = 0.0;
        for pos in 0..sorted.len() - 1 {
            left_sum += residuals[sorted[pos]];
            let here = rows[sorted[pos]][feature];
            let next = rows[sorted[pos + 1]][feature];
            if here == next {
                continue;
            }

            let left_n = (pos + 1) as f64;
            let right_n = n - left_n;
            let right_sum = total - left_sum;
            let gain = left_sum * left_sum / left_n + right_sum * right_sum / right_n - parent;

            if gain > MIN_GAIN && best.map_or(true, |(_, _, g)| gain > g + MIN_GAIN) {
                best = Some((feature, here + (next - here) / 2.0, gain));
            }
        }
    }

    best.map(|(feature, threshold, _)| (feature, threshold))
}

/// Log-loss gradient boosting over the base-model probability columns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradientBoosting {
    rounds: usize,
    learning_rate: f64,
    max_depth: usize,
    bias: f64,
    members: Vec<ModelKind>,
    trees: Vec<RegressionTree>,
    n_features: usize,
    fitted: bool,
}

impl GradientBoosting {
    pub fn new(rounds: usize, learning_rate: f64, max_depth: usize) -> Self {
        Self {
            rounds,
            learning_rate,
            max_depth,
            bias: 0.0,
            members: Vec::new(),
            trees: Vec::new(),
            n_features: 0,
            fitted: false,
        }
    }

    pub fn bias(&self) -> f64 {
        self.bias
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    /// Fit on a raw feature matrix
    pub fn fit_rows(&mut self, rows: &[Vec<f64>], labels: &[Label]) -> Result<()> {
        let n_features = validate_training("boosted", rows, labels)?;
        if self.rounds == 0 {
            return Err(PipelineError::config("boosting needs at least one round"));
        }

        let targets: Vec<f64> = labels.iter().map(Label::as_f64).collect();
        let prior = (targets.iter().sum::<f64>() / targets.len() as f64).clamp(PRIOR_CLAMP, 1.0 - PRIOR_CLAMP);
        let bias = (prior / (1.0 - prior)).ln();

        let mut scores = vec![bias; rows.len()];
        let mut trees = Vec::with_capacity(self.rounds);

        for _ in 0..self.rounds {
            let probs: Vec<f64> = scores.iter().map(|&s| sigmoid(s)).collect();
            let residuals: Vec<f64> = targets.iter().zip(&probs).map(|(y, p)| y - p).collect();
            let hessians: Vec<f64> = probs.iter().map(|p| p * (1.0 - p)).collect();

            let tree = RegressionTree::fit(rows, &residuals, &hessians, self.max_depth);
            for (score, row) in scores.iter_mut().zip(rows) {
                *score += self.learning_rate * tree.predict(row);
            }
            trees.push(tree);
        }

        tracing::debug!(
            "Boosted meta-learner fit: bias={:.4}, {} trees of depth <= {}",
            bias,
            trees.len(),
            self.max_depth
        );

        self.bias = bias;
        self.trees = trees;
        self.n_features = n_features;
        self.fitted = true;
        Ok(())
    }

    /// P(Real) for one feature vector
    pub fn predict_row(&self, row: &[f64]) -> Result<f64> {
        if !self.fitted {
            return Err(PipelineError::not_fitted("boosted"));
        }
        check_width(self.n_features, row)?;
        let score = self.bias + self.learning_rate * self.trees.iter().map(|t| t.predict(row)).sum::<f64>();
        Ok(sigmoid(score))
    }
}

impl MetaLearner for GradientBoosting {
    fn fit(&mut self, base: &AlignedPredictions, labels: &[Label]) -> Result<()> {
        self.fit_rows(&base.rows(), labels)?;
        self.members = base.models().to_vec();
        Ok(())
    }

    fn predict(&self, base: &AlignedPredictions) -> Result<Vec<f64>> {
        if !self.fitted {
            return Err(PipelineError::not_fitted("boosted"));
        }
        super::check_members(&self.members, base)?;
        base.rows().iter().map(|row| self.predict_row(row)).collect()
    }

    fn name(&self) -> &str {
        "boosted"
    }

    fn to_json(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }
}
