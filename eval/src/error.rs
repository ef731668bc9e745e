// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Error types for feature preparation, model fitting and ensembling.
//!
//! Every variant is fatal to the run that raised it. Orchestration code adds
//! the failing stage on top via `anyhow::Context`.

use thiserror::Error;

/// Result type alias for library operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Errors raised by the news classification pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A configured field is missing from the record schema, or a value is malformed.
    #[error("schema error: {0}")]
    Schema(String),

    /// A categorical value was not present in the fit-time distribution.
    #[error("unknown category '{value}' for field '{field}'")]
    UnknownCategory { field: String, value: String },

    /// A continuous field has (near) zero variance on the reference set.
    #[error("degenerate field '{field}': standard deviation {std:e} is below epsilon")]
    DegenerateField { field: String, std: f64 },

    /// A model was asked to predict before it was fitted.
    #[error("model '{model}' has not been fitted")]
    NotFitted { model: String },

    /// Training data is empty or carries a single class only.
    #[error("insufficient data for {context}: {reason}")]
    InsufficientData { context: String, reason: String },

    /// Prediction vectors are not aligned one-to-one by record identifier.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: String, actual: String },

    /// Failure while processing one record, tagged with its identifier.
    #[error("record '{id}'")]
    InRecord {
        id: String,
        #[source]
        source: Box<PipelineError>,
    },

    /// Invalid pipeline configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PipelineError {
    pub fn schema(reason: impl Into<String>) -> Self {
        Self::Schema(reason.into())
    }

    pub fn unknown_category(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::UnknownCategory {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn not_fitted(model: impl Into<String>) -> Self {
        Self::NotFitted {
            model: model.into(),
        }
    }

    pub fn insufficient_data(context: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InsufficientData {
            context: context.into(),
            reason: reason.into(),
        }
    }

    pub fn dimension_mismatch(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::DimensionMismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config(reason.into())
    }

    pub fn in_record(id: impl Into<String>, source: PipelineError) -> Self {
        Self::InRecord {
            id: id.into(),
            source: Box::new(source),
        }
    }

    /// The innermost error, skipping record tags
    pub fn root(&self) -> &PipelineError {
        match self {
            Self::InRecord { source, .. } => source.root(),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_name_field() {
        let err = PipelineError::unknown_category("state", "Atlantis");
        assert_eq!(err.to_string(), "unknown category 'Atlantis' for field 'state'");

        let err = PipelineError::DegenerateField {
            field: "word_count".to_string(),
            std: 0.0,
        };
        assert!(err.to_string().contains("word_count"));
    }

    #[test]
    fn test_record_tag_keeps_root() {
        let err = PipelineError::in_record("a7", PipelineError::unknown_category("source", "Blog"));
        assert!(err.to_string().starts_with("record 'a7'"));
        assert!(matches!(err.root(), PipelineError::UnknownCategory { .. }));
    }

    #[test]
    fn test_record_tag_prints_cause_once() {
        let err = PipelineError::in_record("a7", PipelineError::unknown_category("category", "Weather"));
        assert_eq!(err.to_string(), "record 'a7'");

        let chain = format!("{:#}", anyhow::Error::new(err).context("feature preparation"));
        assert_eq!(chain.matches("unknown category 'Weather'").count(), 1, "{}", chain);
    }
}
