// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Binary logistic regression fit by batch gradient descent

use super::{check_width, sigmoid, validate_training, Classifier, ModelKind};
use crate::datasets::Label;
use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticRegression {
    iterations: usize,
    learning_rate: f64,
    /// L2 penalty on the weights (not the intercept)
    l2: f64,
    weights: Option<Vec<f64>>,
    intercept: f64,
}

impl LogisticRegression {
    pub fn new(iterations: usize, learning_rate: f64, l2: f64) -> Self {
        Self {
            iterations,
            learning_rate,
            l2,
            weights: None,
            intercept: 0.0,
        }
    }

    pub fn weights(&self) -> Option<&[f64]> {
        self.weights.as_deref()
    }

    pub fn intercept(&self) -> f64 {
        self.intercept
    }

    fn linear(weights: &[f64], intercept: f64, row: &[f64]) -> f64 {
        intercept + weights.iter().zip(row).map(|(w, x)| w * x).sum::<f64>()
    }
}

impl Default for LogisticRegression {
    fn default() -> Self {
        Self::new(2000, 0.1, 1e-4)
    }
}

impl Classifier for LogisticRegression {
    fn fit(&mut self, features: &[Vec<f64>], labels: &[Label]) -> Result<()> {
        let n_features = validate_training(self.name(), features, labels)?;
        let n = features.len() as f64;
        let targets: Vec<f64> = labels.iter().map(Label::as_f64).collect();

        let mut weights = vec![0.0; n_features];
        let mut intercept = 0.0;

        for _ in 0..self.iterations {
            let mut grad_w = vec![0.0; n_features];
            let mut grad_b = 0.0;

            for (row, y) in features.iter().zip(&targets) {
                let err = sigmoid(Self::linear(&weights, intercept, row)) - y;
                for (g, x) in grad_w.iter_mut().zip(row) {
                    *g += err * x;
                }
                grad_b += err;
            }

            for (w, g) in weights.iter_mut().zip(&grad_w) {
                *w -= self.learning_rate * (g / n + self.l2 * *w);
            }
            intercept -= self.learning_rate * grad_b / n;
        }

        tracing::debug!("Logistic regression fit: intercept={:.4}, weights={:?}", intercept, weights);

        self.weights = Some(weights);
        self.intercept = intercept;
        Ok(())
    }

    fn predict_probability(&self, features: &[f64]) -> Result<f64> {
        let weights = self
            .weights
            .as_ref()
            .ok_or_else(|| PipelineError::not_fitted(self.name()))?;
        check_width(weights.len(), features)?;
        Ok(sigmoid(Self::linear(weights, self.intercept, features)))
    }

    fn kind(&self) -> ModelKind {
        ModelKind::Logistic
    }

    fn description(&self) -> &str {
        "Binary logistic regression over all engineered features"
    }

    fn is_fitted(&self) -> bool {
        self.weights.is_some()
    }

    fn to_json(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }
}
