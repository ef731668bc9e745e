// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Evaluation metrics for Real/Fake classification
//!
//! `Real` (code 1) is the positive class throughout: a true positive is a Real
//! record predicted Real, a false positive is a Fake record predicted Real.
//!
//! Implements:
//! - Confusion Matrix
//! - Accuracy, Precision, Recall, Specificity, F1-Score
//! - AUC-ROC and average precision (for probabilistic predictions)
//! - Matthews Correlation Coefficient (MCC)
//! - Brier score
//!
//! Every ratio with a zero denominator is reported as 0, never NaN.

use crate::datasets::Label;
use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Ratio that is 0 when the denominator is 0
fn ratio(num: usize, denom: usize) -> f64 {
    if denom == 0 {
        return 0.0;
    }
    num as f64 / denom as f64
}

/// F1 from raw counts
///
/// `precision = tp / (tp + fp)`, `recall = tp / (tp + fn)` and
/// `f1 = 2 * precision * recall / (precision + recall)`. When
/// `precision + recall` is 0 (no true positives) the score is defined as 0.
pub fn f1(tp: usize, fp: usize, fn_: usize) -> f64 {
    let precision = ratio(tp, tp + fp);
    let recall = ratio(tp, tp + fn_);
    let denom = precision + recall;
    if denom == 0.0 {
        return 0.0;
    }
    2.0 * precision * recall / denom
}

/// Confusion matrix for binary classification
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    /// Real predicted as Real
    pub tp: usize,
    /// Fake predicted as Fake
    pub tn: usize,
    /// Fake predicted as Real
    pub fp: usize,
    /// Real predicted as Fake
    pub fn_: usize,
}

/// Build a confusion matrix from aligned predicted and actual labels
pub fn confusion_matrix(predicted: &[Label], actual: &[Label]) -> Result<ConfusionMatrix> {
    ConfusionMatrix::from_predictions(predicted, actual)
}

impl ConfusionMatrix {
    /// Create from predictions and ground truth labels
    pub fn from_predictions(predictions: &[Label], ground_truth: &[Label]) -> Result<Self> {
        if predictions.len() != ground_truth.len() {
            return Err(PipelineError::dimension_mismatch(
                format!("{} labels", ground_truth.len()),
                format!("{} predictions", predictions.len()),
            ));
        }

        let mut matrix = Self::default();
        for (pred, truth) in predictions.iter().zip(ground_truth) {
            match (pred, truth) {
                (Label::Real, Label::Real) => matrix.tp += 1,
                (Label::Fake, Label::Fake) => matrix.tn += 1,
                (Label::Real, Label::Fake) => matrix.fp += 1,
                (Label::Fake, Label::Real) => matrix.fn_ += 1,
            }
        }
        Ok(matrix)
    }

    pub fn total(&self) -> usize {
        self.tp + self.tn + self.fp + self.fn_
    }

    /// Accuracy: (TP + TN) / Total
    pub fn accuracy(&self) -> f64 {
        ratio(self.tp + self.tn, self.total())
    }

    /// Precision: TP / (TP + FP)
    pub fn precision(&self) -> f64 {
        ratio(self.tp, self.tp + self.fp)
    }

    /// Recall (Sensitivity): TP / (TP + FN)
    pub fn recall(&self) -> f64 {
        ratio(self.tp, self.tp + self.fn_)
    }

    /// Specificity: TN / (TN + FP)
    pub fn specificity(&self) -> f64 {
        ratio(self.tn, self.tn + self.fp)
    }

    /// Precision of the Fake class: TN / (TN + FN)
    pub fn negative_predictive_value(&self) -> f64 {
        ratio(self.tn, self.tn + self.fn_)
    }

    pub fn f1_score(&self) -> f64 {
        f1(self.tp, self.fp, self.fn_)
    }

    /// Matthews Correlation Coefficient, in [-1, 1]
    pub fn mcc(&self) -> f64 {
        let tp = self.tp as f64;
        let tn = self.tn as f64;
        let fp = self.fp as f64;
        let fn_ = self.fn_ as f64;

        let numerator = tp * tn - fp * fn_;
        let denominator = ((tp + fp) * (tp + fn_) * (tn + fp) * (tn + fn_)).sqrt();

        if denominator == 0.0 {
            return 0.0;
        }
        numerator / denominator
    }

    /// Balanced Accuracy: (Sensitivity + Specificity) / 2
    pub fn balanced_accuracy(&self) -> f64 {
        (self.recall() + self.specificity()) / 2.0
    }
}

/// Full classification report with all metrics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationReport {
    pub confusion_matrix: ConfusionMatrix,
    pub accuracy: f64,
    pub balanced_accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1_score: f64,
    pub mcc: f64,
    pub specificity: f64,
    pub support: usize,
}

impl ClassificationReport {
    pub fn from_confusion_matrix(cm: ConfusionMatrix) -> Self {
        Self {
            accuracy: cm.accuracy(),
            balanced_accuracy: cm.balanced_accuracy(),
            precision: cm.precision(),
            recall: cm.recall(),
            f1_score: cm.f1_score(),
            mcc: cm.mcc(),
            specificity: cm.specificity(),
            support: cm.total(),
            confusion_matrix: cm,
        }
    }

    pub fn from_predictions(predictions: &[Label], ground_truth: &[Label]) -> Result<Self> {
        Ok(Self::from_confusion_matrix(ConfusionMatrix::from_predictions(
            predictions,
            ground_truth,
        )?))
    }

    /// Format as a human-readable string
    pub fn format(&self) -> String {
        format!(
            r#"Classification Report (positive class: Real)
============================================
Accuracy:          {:.4} ({:.2}%)
Balanced Accuracy: {:.4} ({:.2}%)
Precision:         {:.4}
Recall:            {:.4}
F1 Score:          {:.4}
MCC:               {:.4}
Specificity:       {:.4}
Support:           {}

Confusion Matrix:
             Predicted
             Real    Fake
Actual Real  {:>6}  {:>6}
       Fake  {:>6}  {:>6}
"#,
            self.accuracy,
            self.accuracy * 100.0,
            self.balanced_accuracy,
            self.balanced_accuracy * 100.0,
            self.precision,
            self.recall,
            self.f1_score,
            self.mcc,
            self.specificity,
            self.support,
            self.confusion_matrix.tp,
            self.confusion_matrix.fn_,
            self.confusion_matrix.fp,
            self.confusion_matrix.tn,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassMetrics {
    pub precision: f64,
    pub recall: f64,
    pub f1_score: f64,
    pub support: usize,
}

/// Complete evaluation metrics including probabilistic metrics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationMetrics {
    pub classification: ClassificationReport,
    /// Decision threshold the labels were cut at
    pub threshold: f64,
    pub auc_roc: Option<f64>,
    /// Area under the precision-recall curve
    pub average_precision: Option<f64>,
    /// Mean squared error of P(Real) (lower is better)
    pub brier_score: Option<f64>,
    pub per_class: BTreeMap<String, ClassMetrics>,
}

impl EvaluationMetrics {
    /// Create from hard predictions only
    pub fn from_predictions(predictions: &[Label], ground_truth: &[Label]) -> Result<Self> {
        let classification = ClassificationReport::from_predictions(predictions, ground_truth)?;
        let cm = classification.confusion_matrix;

        let mut per_class = BTreeMap::new();
        per_class.insert(
            Label::Real.to_string(),
            ClassMetrics {
                precision: cm.precision(),
                recall: cm.recall(),
                f1_score: cm.f1_score(),
                support: cm.tp + cm.fn_,
            },
        );
        // Fake seen as the positive class: TN and TP trade places
        per_class.insert(
            Label::Fake.to_string(),
            ClassMetrics {
                precision: cm.negative_predictive_value(),
                recall: cm.specificity(),
                f1_score: f1(cm.tn, cm.fn_, cm.fp),
                support: cm.tn + cm.fp,
            },
        );

        Ok(Self {
            classification,
            threshold: 0.5,
            auc_roc: None,
            average_precision: None,
            brier_score: None,
            per_class,
        })
    }

    /// Threshold P(Real) at `threshold` and compute every metric
    pub fn from_probabilities(probabilities: &[f64], ground_truth: &[Label], threshold: f64) -> Result<Self> {
        let predictions: Vec<Label> = probabilities
            .iter()
            .map(|&p| Label::from_probability(p, threshold))
            .collect();

        let mut metrics = Self::from_predictions(&predictions, ground_truth)?;
        metrics.threshold = threshold;
        metrics.auc_roc = Some(auc_roc(ground_truth, probabilities));
        metrics.brier_score = Some(brier_score(ground_truth, probabilities));
        metrics.average_precision = Some(average_precision(ground_truth, probabilities));
        Ok(metrics)
    }

    pub fn f1_score(&self) -> f64 {
        self.classification.f1_score
    }

    /// Format as human-readable string
    pub fn format(&self) -> String {
        let mut output = self.classification.format();
        output.push_str(&format!("\nThreshold:         {:.2}\n", self.threshold));

        if let Some(auc) = self.auc_roc {
            output.push_str(&format!("AUC-ROC:           {:.4}\n", auc));
        }
        if let Some(ap) = self.average_precision {
            output.push_str(&format!("Average Precision: {:.4}\n", ap));
        }
        if let Some(brier) = self.brier_score {
            output.push_str(&format!("Brier Score:       {:.4}\n", brier));
        }

        output.push_str("\nPer-Class Metrics:\n");
        for (class, metrics) in &self.per_class {
            output.push_str(&format!(
                "  {}: P={:.4} R={:.4} F1={:.4} (n={})\n",
                class, metrics.precision, metrics.recall, metrics.f1_score, metrics.support
            ));
        }

        output
    }
}

/// Label/probability pairs sorted by descending probability
fn ranked(ground_truth: &[Label], probabilities: &[f64]) -> Vec<(Label, f64)> {
    let mut pairs: Vec<(Label, f64)> = ground_truth.iter().copied().zip(probabilities.iter().copied()).collect();
    pairs.sort_by(|a, b| b.1.total_cmp(&a.1));
    pairs
}

/// AUC-ROC by the trapezoidal rule, stepping over groups of tied scores
///
/// 0.5 when either class is absent.
pub fn auc_roc(ground_truth: &[Label], probabilities: &[f64]) -> f64 {
    let pairs = ranked(ground_truth, probabilities);
    let n_pos = pairs.iter().filter(|(l, _)| *l == Label::Real).count() as f64;
    let n_neg = pairs.len() as f64 - n_pos;

    if n_pos == 0.0 || n_neg == 0.0 {
        return 0.5;
    }

    let mut tp = 0.0;
    let mut fp = 0.0;
    let mut tpr_prev = 0.0;
    let mut fpr_prev = 0.0;
    let mut auc = 0.0;

    let mut i = 0;
    while i < pairs.len() {
        let score = pairs[i].1;
        while i < pairs.len() && pairs[i].1 == score {
            if pairs[i].0 == Label::Real {
                tp += 1.0;
            } else {
                fp += 1.0;
            }
            i += 1;
        }

        let tpr = tp / n_pos;
        let fpr = fp / n_neg;
        auc += (fpr - fpr_prev) * (tpr + tpr_prev) / 2.0;
        tpr_prev = tpr;
        fpr_prev = fpr;
    }

    auc
}

/// Mean squared difference between P(Real) and the 0/1 label
pub fn brier_score(ground_truth: &[Label], probabilities: &[f64]) -> f64 {
    if ground_truth.is_empty() {
        return 1.0;
    }
    let sum: f64 = ground_truth
        .iter()
        .zip(probabilities)
        .map(|(label, p)| (p - label.as_f64()).powi(2))
        .sum();
    sum / ground_truth.len() as f64
}

/// Area under the precision-recall curve, summed at each Real record
pub fn average_precision(ground_truth: &[Label], probabilities: &[f64]) -> f64 {
    let pairs = ranked(ground_truth, probabilities);
    let n_pos = pairs.iter().filter(|(l, _)| *l == Label::Real).count() as f64;

    if n_pos == 0.0 {
        return 0.0;
    }

    let mut tp = 0.0;
    let mut fp = 0.0;
    let mut ap = 0.0;
    let mut prev_recall = 0.0;

    for (label, _) in &pairs {
        if *label == Label::Real {
            tp += 1.0;
        } else {
            fp += 1.0;
        }

        let precision = tp / (tp + fp);
        let recall = tp / n_pos;
        if *label == Label::Real {
            ap += precision * (recall - prev_recall);
        }
        prev_recall = recall;
    }

    ap
}
