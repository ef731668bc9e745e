// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Gaussian naive Bayes
//!
//! Per-class feature means and variances, with a variance floor proportional
//! to the largest feature variance so constant features do not divide by zero.

use super::{check_width, validate_training, Classifier, ModelKind};
use crate::datasets::Label;
use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};

const VAR_SMOOTHING: f64 = 1e-9;
const MIN_VARIANCE: f64 = 1e-12;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct ClassStats {
    log_prior: f64,
    means: Vec<f64>,
    variances: Vec<f64>,
}

impl ClassStats {
    fn fit(rows: &[&Vec<f64>], n_total: usize, n_features: usize, smoothing: f64) -> Self {
        let n = rows.len() as f64;
        let mut means = vec![0.0; n_features];
        for row in rows {
            for (m, x) in means.iter_mut().zip(row.iter()) {
                *m += x / n;
            }
        }

        let mut variances = vec![0.0; n_features];
        for row in rows {
            for ((v, x), m) in variances.iter_mut().zip(row.iter()).zip(&means) {
                *v += (x - m).powi(2) / n;
            }
        }
        for v in variances.iter_mut() {
            *v += smoothing;
        }

        Self {
            log_prior: (n / n_total as f64).ln(),
            means,
            variances,
        }
    }

    fn log_joint(&self, features: &[f64]) -> f64 {
        let log_likelihood: f64 = features
            .iter()
            .zip(&self.means)
            .zip(&self.variances)
            .map(|((x, m), v)| -0.5 * ((2.0 * std::f64::consts::PI * v).ln() + (x - m).powi(2) / v))
            .sum();
        self.log_prior + log_likelihood
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GaussianNaiveBayes {
    real: Option<ClassStats>,
    fake: Option<ClassStats>,
}

impl GaussianNaiveBayes {
    pub fn new() -> Self {
        Self { real: None, fake: None }
    }
}

impl Default for GaussianNaiveBayes {
    fn default() -> Self {
        Self::new()
    }
}

fn overall_max_variance(features: &[Vec<f64>], n_features: usize) -> f64 {
    let n = features.len() as f64;
    (0..n_features)
        .map(|j| {
            let mean = features.iter().map(|r| r[j]).sum::<f64>() / n;
            features.iter().map(|r| (r[j] - mean).powi(2)).sum::<f64>() / n
        })
        .fold(0.0, f64::max)
}

impl Classifier for GaussianNaiveBayes {
    fn fit(&mut self, features: &[Vec<f64>], labels: &[Label]) -> Result<()> {
        let n_features = validate_training(self.name(), features, labels)?;
        let smoothing = (VAR_SMOOTHING * overall_max_variance(features, n_features)).max(MIN_VARIANCE);

        let (real_rows, fake_rows): (Vec<(&Vec<f64>, &Label)>, Vec<(&Vec<f64>, &Label)>) =
            features.iter().zip(labels).partition(|(_, l)| **l == Label::Real);
        let real_rows: Vec<&Vec<f64>> = real_rows.into_iter().map(|(r, _)| r).collect();
        let fake_rows: Vec<&Vec<f64>> = fake_rows.into_iter().map(|(r, _)| r).collect();

        tracing::debug!(
            "Naive Bayes fit: {} real, {} fake, variance floor {:e}",
            real_rows.len(),
            fake_rows.len(),
            smoothing
        );

        self.real = Some(ClassStats::fit(&real_rows, features.len(), n_features, smoothing));
        self.fake = Some(ClassStats::fit(&fake_rows, features.len(), n_features, smoothing));
        Ok(())
    }

    fn predict_probability(&self, features: &[f64]) -> Result<f64> {
        let (real, fake) = match (&self.real, &self.fake) {
            (Some(real), Some(fake)) => (real, fake),
            _ => return Err(PipelineError::not_fitted(self.name())),
        };
        check_width(real.means.len(), features)?;

        // Log-sum-exp over the two classes
        let lr = real.log_joint(features);
        let lf = fake.log_joint(features);
        let top = lr.max(lf);
        let er = (lr - top).exp();
        let ef = (lf - top).exp();
        Ok(er / (er + ef))
    }

    fn kind(&self) -> ModelKind {
        ModelKind::NaiveBayes
    }

    fn description(&self) -> &str {
        "Gaussian naive Bayes with variance smoothing"
    }

    fn is_fitted(&self) -> bool {
        self.real.is_some() && self.fake.is_some()
    }

    fn to_json(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }
}
