// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! k-nearest-neighbor classifier
//!
//! `fit` retains the training table and picks k from a grid by k-fold
//! cross-validated accuracy on the training rows only. P(Real) is the share of
//! the k nearest rows (Euclidean distance) labelled Real. Distance ties keep
//! training order.

use super::{check_width, positive_rate, validate_training, Classifier, ModelKind};
use crate::datasets::Label;
use crate::error::{PipelineError, Result};
use crate::split::{complement, kfold_indices};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KNearestNeighbors {
    k_grid: Vec<usize>,
    folds: usize,
    seed: u64,
    k: Option<usize>,
    /// Mean cross-validated accuracy per candidate k
    cv_accuracy: Vec<(usize, f64)>,
    rows: Vec<Vec<f64>>,
    labels: Vec<Label>,
}

fn squared_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum()
}

/// Share of Real among the `k` rows of `rows[candidates]` closest to `query`
fn neighbor_vote(rows: &[Vec<f64>], labels: &[Label], candidates: &[usize], query: &[f64], k: usize) -> f64 {
    let mut by_distance: Vec<(f64, usize)> = candidates
        .iter()
        .map(|&i| (squared_distance(&rows[i], query), i))
        .collect();
    by_distance.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));

    let nearest: Vec<Label> = by_distance.iter().take(k).map(|&(_, i)| labels[i]).collect();
    positive_rate(&nearest)
}

impl KNearestNeighbors {
    pub fn new(k_grid: Vec<usize>, folds: usize, seed: u64) -> Self {
        Self {
            k_grid,
            folds,
            seed,
            k: None,
            cv_accuracy: Vec::new(),
            rows: Vec::new(),
            labels: Vec::new(),
        }
    }

    /// The k chosen by cross-validation
    pub fn k(&self) -> Option<usize> {
        self.k
    }

    pub fn cv_accuracy(&self) -> &[(usize, f64)] {
        &self.cv_accuracy
    }

    /// Grid search over k. Ties go to the smaller k.
    fn select_k(&self, rows: &[Vec<f64>], labels: &[Label]) -> Result<(usize, Vec<(usize, f64)>)> {
        let n = rows.len();
        let smallest = self.k_grid.iter().copied().min().unwrap_or(1).clamp(1, n);

        let folds = match kfold_indices(n, self.folds, self.seed) {
            Ok(folds) => folds,
            Err(_) => {
                tracing::warn!("{} rows are too few for {}-fold search, using k={}", n, self.folds, smallest);
                return Ok((smallest, Vec::new()));
            }
        };

        let mut scores = Vec::new();
        for &k in &self.k_grid {
            let mut correct = 0usize;
            let mut total = 0usize;
            for held_out in &folds {
                let train_idx = complement(n, held_out);
                if k > train_idx.len() {
                    continue;
                }
                for &i in held_out {
                    let p = neighbor_vote(rows, labels, &train_idx, &rows[i], k);
                    if Label::from_probability(p, 0.5) == labels[i] {
                        correct += 1;
                    }
                    total += 1;
                }
            }
            if total > 0 {
                scores.push((k, correct as f64 / total as f64));
            }
        }

        let best = scores
            .iter()
            .fold(None::<(usize, f64)>, |best, &(k, acc)| match best {
                Some((bk, bacc)) if bacc > acc || (bacc == acc && bk <= k) => Some((bk, bacc)),
                _ => Some((k, acc)),
            })
            .map(|(k, _)| k)
            .unwrap_or(smallest);

        Ok((best, scores))
    }
}

impl Default for KNearestNeighbors {
    fn default() -> Self {
        Self::new((1..=19).step_by(2).collect(), 5, 123)
    }
}

impl Classifier for KNearestNeighbors {
    fn fit(&mut self, features: &[Vec<f64>], labels: &[Label]) -> Result<()> {
        validate_training(self.name(), features, labels)?;
        if self.k_grid.is_empty() || self.k_grid.contains(&0) {
            return Err(PipelineError::config("k grid must be non-empty with k >= 1"));
        }

        let (k, scores) = self.select_k(features, labels)?;
        tracing::debug!("kNN selected k={} (cv accuracy: {:?})", k, scores);

        self.k = Some(k);
        self.cv_accuracy = scores;
        self.rows = features.to_vec();
        self.labels = labels.to_vec();
        Ok(())
    }

    fn predict_probability(&self, features: &[f64]) -> Result<f64> {
        let k = self.k.ok_or_else(|| PipelineError::not_fitted(self.name()))?;
        check_width(self.rows[0].len(), features)?;

        let all: Vec<usize> = (0..self.rows.len()).collect();
        Ok(neighbor_vote(&self.rows, &self.labels, &all, features, k))
    }

    fn kind(&self) -> ModelKind {
        ModelKind::Knn
    }

    fn description(&self) -> &str {
        "k-nearest-neighbor vote with cross-validated k"
    }

    fn is_fitted(&self) -> bool {
        self.k.is_some()
    }

    fn to_json(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }
}
