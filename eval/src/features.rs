// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Feature preparation: encode, normalize, synthesize
//!
//! [`Preprocessor::fit`] freezes encoding maps and normalization parameters on
//! the training records. [`Preprocessor::transform`] is then a pure application
//! of those parameters, so validation statistics can never reach a fitted value.
//!
//! The four derived features are computed after normalization, on z-scores.

use crate::datasets::{CategoricalField, ContinuousField, Label, Record};
use crate::encoding::{CategoricalEncoder, UnknownCategoryPolicy};
use crate::error::{PipelineError, Result};
use crate::normalize::{DegenerateFieldPolicy, NormalizationParams};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Names of the derived features, in feature-vector order
pub const DERIVED_FEATURES: [&str; 4] = [
    "credibility_clickbait_gap",
    "engagement_total",
    "content_density",
    "readability_vs_sentiment",
];

/// Continuous fields the synthesizer reads
pub const SYNTHESIS_INPUTS: [ContinuousField; 8] = [
    ContinuousField::TrustScore,
    ContinuousField::ClickbaitScore,
    ContinuousField::NumShares,
    ContinuousField::NumComments,
    ContinuousField::CharCount,
    ContinuousField::WordCount,
    ContinuousField::ReadabilityScore,
    ContinuousField::SentimentScore,
];

pub fn credibility_clickbait_gap(trust_score: f64, clickbait_score: f64) -> f64 {
    trust_score - clickbait_score
}

pub fn engagement_total(num_shares: f64, num_comments: f64) -> f64 {
    num_shares + num_comments
}

/// `+ 1` keeps the ratio finite when the word count is zero
pub fn content_density(char_count: f64, word_count: f64) -> f64 {
    char_count / (word_count + 1.0)
}

pub fn readability_vs_sentiment(readability_score: f64, sentiment_score: f64) -> f64 {
    readability_score * sentiment_score
}

/// Interaction features of one (already normalized) record
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DerivedFeatures {
    pub credibility_clickbait_gap: f64,
    pub engagement_total: f64,
    pub content_density: f64,
    pub readability_vs_sentiment: f64,
}

impl DerivedFeatures {
    pub fn from_record(record: &Record) -> Self {
        Self {
            credibility_clickbait_gap: credibility_clickbait_gap(record.trust_score, record.clickbait_score),
            engagement_total: engagement_total(record.num_shares, record.num_comments),
            content_density: content_density(record.char_count, record.word_count),
            readability_vs_sentiment: readability_vs_sentiment(record.readability_score, record.sentiment_score),
        }
    }

    pub fn to_array(&self) -> [f64; 4] {
        [
            self.credibility_clickbait_gap,
            self.engagement_total,
            self.content_density,
            self.readability_vs_sentiment,
        ]
    }
}

/// Numeric feature matrix with record ids and labels kept alongside
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureTable {
    pub feature_names: Vec<String>,
    pub ids: Vec<String>,
    pub rows: Vec<Vec<f64>>,
    pub labels: Vec<Label>,
}

impl FeatureTable {
    pub fn new(feature_names: Vec<String>) -> Self {
        Self {
            feature_names,
            ids: Vec::new(),
            rows: Vec::new(),
            labels: Vec::new(),
        }
    }

    pub fn push(&mut self, id: String, row: Vec<f64>, label: Label) {
        self.ids.push(id);
        self.rows.push(row);
        self.labels.push(label);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn n_features(&self) -> usize {
        self.feature_names.len()
    }

    /// Rows at `indices`, in that order
    pub fn subset(&self, indices: &[usize]) -> Self {
        let mut out = Self::new(self.feature_names.clone());
        for &i in indices {
            out.push(self.ids[i].clone(), self.rows[i].clone(), self.labels[i]);
        }
        out
    }
}

/// Which fields feed the feature vector and how edge cases are handled
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreprocessorConfig {
    pub categorical_fields: Vec<CategoricalField>,
    pub continuous_fields: Vec<ContinuousField>,
    pub cardinality_threshold: usize,
    pub unknown_category: UnknownCategoryPolicy,
    pub degenerate_field: DegenerateFieldPolicy,
}

impl Default for PreprocessorConfig {
    fn default() -> Self {
        Self {
            categorical_fields: CategoricalField::ALL.to_vec(),
            continuous_fields: ContinuousField::ALL.to_vec(),
            cardinality_threshold: 5,
            unknown_category: UnknownCategoryPolicy::default(),
            degenerate_field: DegenerateFieldPolicy::default(),
        }
    }
}

/// Frozen encoders and normalization parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preprocessor {
    encoders: Vec<CategoricalEncoder>,
    normalization: NormalizationParams,
    unknown_category: UnknownCategoryPolicy,
    feature_names: Vec<String>,
}

impl Preprocessor {
    /// Fit every encoder and the normalizer on `records` (the training split)
    pub fn fit(records: &[Record], config: &PreprocessorConfig) -> Result<Self> {
        for input in SYNTHESIS_INPUTS {
            if !config.continuous_fields.contains(&input) {
                return Err(PipelineError::schema(format!(
                    "derived features need '{}' in the continuous fields",
                    input.name()
                )));
            }
        }

        let encoders = config
            .categorical_fields
            .iter()
            .map(|&field| CategoricalEncoder::fit(field, records, config.cardinality_threshold))
            .collect::<Result<Vec<_>>>()?;

        let normalization =
            NormalizationParams::fit_with_policy(records, &config.continuous_fields, config.degenerate_field)?;

        let feature_names = config
            .categorical_fields
            .iter()
            .map(|f| f.name().to_string())
            .chain(config.continuous_fields.iter().map(|f| f.name().to_string()))
            .chain(DERIVED_FEATURES.iter().map(|n| n.to_string()))
            .collect();

        tracing::info!(
            "Preprocessor fit on {} records ({} categorical, {} continuous, {} derived)",
            records.len(),
            encoders.len(),
            config.continuous_fields.len(),
            DERIVED_FEATURES.len()
        );

        Ok(Self {
            encoders,
            normalization,
            unknown_category: config.unknown_category,
            feature_names,
        })
    }

    /// Feature vector of one record
    pub fn transform_record(&self, record: &Record) -> Result<Vec<f64>> {
        let mut row = Vec::with_capacity(self.feature_names.len());

        for encoder in &self.encoders {
            row.push(encoder.encode(record, self.unknown_category)?);
        }

        let normalized = self.normalization.apply(record);
        for stats in self.normalization.stats() {
            row.push(normalized.continuous(stats.field));
        }

        row.extend(DerivedFeatures::from_record(&normalized).to_array());
        Ok(row)
    }

    pub fn transform(&self, records: &[Record]) -> Result<FeatureTable> {
        let mut table = FeatureTable::new(self.feature_names.clone());
        for record in records {
            let row = self
                .transform_record(record)
                .map_err(|e| PipelineError::in_record(&record.id, e))?;
            table.push(record.id.clone(), row, record.label);
        }
        Ok(table)
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    pub fn encoders(&self) -> &[CategoricalEncoder] {
        &self.encoders
    }

    pub fn normalization(&self) -> &NormalizationParams {
        &self.normalization
    }

    pub fn save_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn load_json(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}
