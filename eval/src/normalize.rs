// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! z-score normalization of continuous fields
//!
//! Parameters are fit once on a reference set (the training split) and then
//! applied unchanged to every other set. Standard deviation is the sample
//! standard deviation (n - 1 denominator).

use crate::datasets::{ContinuousField, Record};
use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};

/// Standard deviations below this are treated as a constant field
pub const STD_EPSILON: f64 = 1e-9;

/// Handling of zero-variance fields at fit time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DegenerateFieldPolicy {
    /// Fail with `DegenerateField`
    #[default]
    Fail,
    /// Subtract the mean only (scale 1.0), logging a warning
    CenterOnly,
}

/// Fit-time statistics for one field
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FieldStats {
    pub field: ContinuousField,
    pub mean: f64,
    pub std: f64,
}

impl FieldStats {
    pub fn transform(&self, value: f64) -> f64 {
        (value - self.mean) / self.std
    }
}

/// Frozen per-field (mean, std) pairs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizationParams {
    stats: Vec<FieldStats>,
}

impl NormalizationParams {
    /// Fit with the strict policy: constant fields are an error
    pub fn fit(records: &[Record], fields: &[ContinuousField]) -> Result<Self> {
        Self::fit_with_policy(records, fields, DegenerateFieldPolicy::Fail)
    }

    pub fn fit_with_policy(
        records: &[Record],
        fields: &[ContinuousField],
        policy: DegenerateFieldPolicy,
    ) -> Result<Self> {
        if records.len() < 2 {
            return Err(PipelineError::insufficient_data(
                "normalization",
                format!("need at least 2 records, got {}", records.len()),
            ));
        }

        let n = records.len() as f64;
        let mut stats = Vec::with_capacity(fields.len());

        for &field in fields {
            let mean = records.iter().map(|r| r.continuous(field)).sum::<f64>() / n;
            let variance = records
                .iter()
                .map(|r| (r.continuous(field) - mean).powi(2))
                .sum::<f64>()
                / (n - 1.0);
            let std = variance.sqrt();

            let std = if std < STD_EPSILON {
                match policy {
                    DegenerateFieldPolicy::Fail => {
                        return Err(PipelineError::DegenerateField {
                            field: field.name().to_string(),
                            std,
                        });
                    }
                    DegenerateFieldPolicy::CenterOnly => {
                        tracing::warn!("Field '{}' is constant on the reference set, centering only", field.name());
                        1.0
                    }
                }
            } else {
                std
            };

            stats.push(FieldStats { field, mean, std });
        }

        Ok(Self { stats })
    }

    /// Copy of `record` with every configured field replaced by its z-score
    pub fn apply(&self, record: &Record) -> Record {
        let mut out = record.clone();
        for s in &self.stats {
            out.set_continuous(s.field, s.transform(record.continuous(s.field)));
        }
        out
    }

    pub fn apply_all(&self, records: &[Record]) -> Vec<Record> {
        records.iter().map(|r| self.apply(r)).collect()
    }

    pub fn get(&self, field: ContinuousField) -> Option<&FieldStats> {
        self.stats.iter().find(|s| s.field == field)
    }

    pub fn stats(&self) -> &[FieldStats] {
        &self.stats
    }
}
