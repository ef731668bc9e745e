// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Categorical encoders
//!
//! Two fit-once encodings turn categorical strings into numbers:
//! - Frequency encoding for high-cardinality fields (value -> count / total)
//! - Ordinal mapping for small, known level sets (Left=0/Center=1/Right=2,
//!   False=0/Mixed=1/True=2, Fake=0/Real=1)
//!
//! Maps are immutable once fitted and match values case-insensitively. A value
//! not seen at fit time follows [`UnknownCategoryPolicy`], except on fields with
//! a domain ordering (political bias, fact-check rating), which reject levels
//! outside that ordering.

use crate::datasets::{CategoricalField, Record};
use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// What to return for a categorical value absent from the fit-time distribution
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownCategoryPolicy {
    /// Return this code (0.0 by default: "never observed")
    Fallback(f64),
    /// Fail with `UnknownCategory`
    Fail,
}

impl Default for UnknownCategoryPolicy {
    fn default() -> Self {
        UnknownCategoryPolicy::Fallback(0.0)
    }
}

/// Relative frequency of each observed value of one field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrequencyMap {
    field: String,
    counts: BTreeMap<String, usize>,
    total: usize,
}

impl FrequencyMap {
    pub fn fit(field: CategoricalField, records: &[Record]) -> Result<Self> {
        if records.is_empty() {
            return Err(PipelineError::insufficient_data(
                format!("frequency encoding of '{}'", field.name()),
                "no records",
            ));
        }

        let mut counts = BTreeMap::new();
        for record in records {
            *counts.entry(record.categorical(field).to_lowercase()).or_insert(0) += 1;
        }

        Ok(Self {
            field: field.name().to_string(),
            counts,
            total: records.len(),
        })
    }

    /// Frequency of an observed value, `None` if unseen
    pub fn get(&self, value: &str) -> Option<f64> {
        self.counts
            .get(&value.to_lowercase())
            .map(|&count| count as f64 / self.total as f64)
    }

    pub fn apply(&self, value: &str, policy: UnknownCategoryPolicy) -> Result<f64> {
        match (self.get(value), policy) {
            (Some(freq), _) => Ok(freq),
            (None, UnknownCategoryPolicy::Fallback(code)) => {
                tracing::debug!("Unseen value '{}' for '{}', using {}", value, self.field, code);
                Ok(code)
            }
            (None, UnknownCategoryPolicy::Fail) => {
                Err(PipelineError::unknown_category(&self.field, value))
            }
        }
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn cardinality(&self) -> usize {
        self.counts.len()
    }
}

/// Fixed integer code per level, matched case-insensitively
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrdinalMap {
    field: String,
    levels: Vec<String>,
}

impl OrdinalMap {
    /// Codes follow the order of `ordered_categories`, starting at 0
    pub fn fit(field: &str, ordered_categories: &[&str]) -> Result<Self> {
        if ordered_categories.is_empty() {
            return Err(PipelineError::config(format!("ordinal map for '{}' has no levels", field)));
        }

        let mut seen = BTreeSet::new();
        for level in ordered_categories {
            if !seen.insert(level.to_lowercase()) {
                return Err(PipelineError::config(format!(
                    "ordinal map for '{}' lists '{}' twice",
                    field, level
                )));
            }
        }

        Ok(Self {
            field: field.to_string(),
            levels: ordered_categories.iter().map(|l| l.to_lowercase()).collect(),
        })
    }

    /// Left=0, Center=1, Right=2
    pub fn political_bias() -> Self {
        Self::domain("political_bias", &["left", "center", "right"])
    }

    /// False=0, Mixed=1, True=2
    pub fn fact_check_rating() -> Self {
        Self::domain("fact_check_rating", &["false", "mixed", "true"])
    }

    /// Fake=0, Real=1
    pub fn label() -> Self {
        Self::domain("label", &["fake", "real"])
    }

    fn domain(field: &str, levels: &[&str]) -> Self {
        Self {
            field: field.to_string(),
            levels: levels.iter().map(|l| l.to_string()).collect(),
        }
    }

    /// Codes assigned in lexicographic order of the observed values.
    /// Used for low-cardinality fields that have no domain ordering.
    pub fn from_observed(field: CategoricalField, records: &[Record]) -> Result<Self> {
        let levels: BTreeSet<String> = records
            .iter()
            .map(|r| r.categorical(field).to_lowercase())
            .collect();
        let levels: Vec<&str> = levels.iter().map(String::as_str).collect();
        Self::fit(field.name(), &levels)
    }

    pub fn get(&self, value: &str) -> Option<f64> {
        let needle = value.to_lowercase();
        self.levels.iter().position(|l| *l == needle).map(|code| code as f64)
    }

    /// Code of a known level, `UnknownCategory` otherwise
    pub fn apply(&self, value: &str) -> Result<f64> {
        self.get(value)
            .ok_or_else(|| PipelineError::unknown_category(&self.field, value))
    }

    pub fn apply_with_policy(&self, value: &str, policy: UnknownCategoryPolicy) -> Result<f64> {
        match (self.get(value), policy) {
            (Some(code), _) => Ok(code),
            (None, UnknownCategoryPolicy::Fallback(code)) => {
                tracing::debug!("Unseen level '{}' for '{}', using {}", value, self.field, code);
                Ok(code)
            }
            (None, UnknownCategoryPolicy::Fail) => {
                Err(PipelineError::unknown_category(&self.field, value))
            }
        }
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn levels(&self) -> &[String] {
        &self.levels
    }
}

/// Fitted encoder for one categorical field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CategoricalEncoder {
    Frequency { field: CategoricalField, map: FrequencyMap },
    Ordinal { field: CategoricalField, map: OrdinalMap },
}

impl CategoricalEncoder {
    /// Pick and fit the encoding for `field` on the reference records.
    ///
    /// Fields with a domain ordering always use it. Other fields are frequency
    /// encoded above `cardinality_threshold` distinct values and mapped to
    /// lexicographic ordinal codes at or below it.
    pub fn fit(field: CategoricalField, records: &[Record], cardinality_threshold: usize) -> Result<Self> {
        let domain = match field {
            CategoricalField::PoliticalBias => Some(OrdinalMap::political_bias()),
            CategoricalField::FactCheckRating => Some(OrdinalMap::fact_check_rating()),
            _ => None,
        };

        if let Some(map) = domain {
            // Every fit-time value must be a known level
            for record in records {
                map.apply(record.categorical(field))?;
            }
            return Ok(CategoricalEncoder::Ordinal { field, map });
        }

        let distinct: BTreeSet<String> = records.iter().map(|r| r.categorical(field).to_lowercase()).collect();
        if distinct.len() > cardinality_threshold {
            tracing::debug!("'{}' has {} levels, frequency encoding", field.name(), distinct.len());
            Ok(CategoricalEncoder::Frequency {
                field,
                map: FrequencyMap::fit(field, records)?,
            })
        } else {
            tracing::debug!("'{}' has {} levels, ordinal encoding", field.name(), distinct.len());
            Ok(CategoricalEncoder::Ordinal {
                field,
                map: OrdinalMap::from_observed(field, records)?,
            })
        }
    }

    pub fn field(&self) -> CategoricalField {
        match self {
            CategoricalEncoder::Frequency { field, .. } | CategoricalEncoder::Ordinal { field, .. } => *field,
        }
    }

    pub fn encode(&self, record: &Record, policy: UnknownCategoryPolicy) -> Result<f64> {
        match self {
            CategoricalEncoder::Frequency { field, map } => map.apply(record.categorical(*field), policy),
            CategoricalEncoder::Ordinal { field, map } if has_domain_order(*field) => {
                map.apply(record.categorical(*field))
            }
            CategoricalEncoder::Ordinal { field, map } => map.apply_with_policy(record.categorical(*field), policy),
        }
    }
}

fn has_domain_order(field: CategoricalField) -> bool {
    matches!(field, CategoricalField::PoliticalBias | CategoricalField::FactCheckRating)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasets::Dataset;

    fn records_with_states(states: &[&str]) -> Vec<Record> {
        let template = Dataset::load_synthetic(1, 1).records.remove(0);
        states
            .iter()
            .enumerate()
            .map(|(i, s)| Record {
                id: format!("r{}", i),
                state: s.to_string(),
                ..template.clone()
            })
            .collect()
    }

    #[test]
    fn test_frequency_exact_ratio() {
        let records = records_with_states(&["TX", "TX", "TX", "CA", "NY", "NY", "OH"]);
        let map = FrequencyMap::fit(CategoricalField::State, &records).unwrap();

        assert_eq!(map.get("TX"), Some(3.0 / 7.0));
        assert_eq!(map.get("OH"), Some(1.0 / 7.0));
        assert_eq!(map.cardinality(), 4);
    }

    #[test]
    fn test_frequency_unseen_fallback() {
        let records = records_with_states(&["TX", "CA"]);
        let map = FrequencyMap::fit(CategoricalField::State, &records).unwrap();

        let code = map.apply("Atlantis", UnknownCategoryPolicy::default()).unwrap();
        assert_eq!(code, 0.0);
        assert!(!code.is_nan());

        let code = map.apply("Atlantis", UnknownCategoryPolicy::Fallback(-1.0)).unwrap();
        assert_eq!(code, -1.0);
    }

    #[test]
    fn test_frequency_unseen_fail_fast() {
        let records = records_with_states(&["TX", "CA"]);
        let map = FrequencyMap::fit(CategoricalField::State, &records).unwrap();

        let err = map.apply("Atlantis", UnknownCategoryPolicy::Fail).unwrap_err();
        assert!(matches!(err, PipelineError::UnknownCategory { ref field, .. } if field == "state"));
    }

    #[test]
    fn test_frequency_empty_records() {
        assert!(FrequencyMap::fit(CategoricalField::State, &[]).is_err());
    }

    #[test]
    fn test_domain_orderings() {
        let bias = OrdinalMap::political_bias();
        assert_eq!(bias.apply("Left").unwrap(), 0.0);
        assert_eq!(bias.apply("Center").unwrap(), 1.0);
        assert_eq!(bias.apply("Right").unwrap(), 2.0);

        let rating = OrdinalMap::fact_check_rating();
        assert_eq!(rating.apply("FALSE").unwrap(), 0.0);
        assert_eq!(rating.apply("Mixed").unwrap(), 1.0);
        assert_eq!(rating.apply("True").unwrap(), 2.0);

        let label = OrdinalMap::label();
        assert_eq!(label.apply("Fake").unwrap(), 0.0);
        assert_eq!(label.apply("Real").unwrap(), 1.0);
    }

    #[test]
    fn test_ordinal_unknown_level() {
        let err = OrdinalMap::political_bias().apply("Libertarian").unwrap_err();
        assert!(matches!(err, PipelineError::UnknownCategory { .. }));
    }

    #[test]
    fn test_ordinal_rejects_duplicate_levels() {
        assert!(OrdinalMap::fit("x", &["a", "A"]).is_err());
        assert!(OrdinalMap::fit("x", &[]).is_err());
    }

    #[test]
    fn test_encoder_selection_by_cardinality() {
        let many = records_with_states(&["A", "B", "C", "D", "E", "F"]);
        let encoder = CategoricalEncoder::fit(CategoricalField::State, &many, 5).unwrap();
        assert!(matches!(encoder, CategoricalEncoder::Frequency { .. }));

        let few = records_with_states(&["B", "A", "B"]);
        let encoder = CategoricalEncoder::fit(CategoricalField::State, &few, 5).unwrap();
        assert!(matches!(encoder, CategoricalEncoder::Ordinal { .. }));
        assert_eq!(encoder.encode(&few[1], UnknownCategoryPolicy::Fail).unwrap(), 0.0);
        assert_eq!(encoder.encode(&few[0], UnknownCategoryPolicy::Fail).unwrap(), 1.0);
    }

    #[test]
    fn test_domain_field_ignores_threshold() {
        let records = Dataset::load_synthetic(50, 3).records;
        let encoder = CategoricalEncoder::fit(CategoricalField::PoliticalBias, &records, 0).unwrap();
        match encoder {
            CategoricalEncoder::Ordinal { map, .. } => assert_eq!(map.levels().len(), 3),
            other => panic!("expected ordinal encoder, got {:?}", other),
        }
    }

    #[test]
    fn test_encoding_is_deterministic() {
        let records = Dataset::load_synthetic(200, 9).records;
        let a = CategoricalEncoder::fit(CategoricalField::Source, &records, 5).unwrap();
        let b = CategoricalEncoder::fit(CategoricalField::Source, &records, 5).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_observed_ordinal_unseen_follows_policy() {
        let train = records_with_states(&["B", "A", "B"]);
        let encoder = CategoricalEncoder::fit(CategoricalField::State, &train, 5).unwrap();
        let unseen = records_with_states(&["Weather"]).remove(0);

        assert_eq!(encoder.encode(&unseen, UnknownCategoryPolicy::default()).unwrap(), 0.0);
        assert_eq!(encoder.encode(&unseen, UnknownCategoryPolicy::Fallback(-1.0)).unwrap(), -1.0);
        let err = encoder.encode(&unseen, UnknownCategoryPolicy::Fail).unwrap_err();
        assert!(matches!(err, PipelineError::UnknownCategory { ref value, .. } if value == "Weather"));
    }

    #[test]
    fn test_domain_ordinal_rejects_unknown_level_under_fallback() {
        let records = Dataset::load_synthetic(20, 4).records;
        let encoder = CategoricalEncoder::fit(CategoricalField::PoliticalBias, &records, 5).unwrap();
        let odd = Record {
            political_bias: "Libertarian".to_string(),
            ..records[0].clone()
        };
        assert!(encoder.encode(&odd, UnknownCategoryPolicy::default()).is_err());
    }

    #[test]
    fn test_frequency_and_ordinal_ignore_case() {
        let records = records_with_states(&["TX", "tx", "CA", "NY", "OH", "WA", "ME"]);
        let map = FrequencyMap::fit(CategoricalField::State, &records).unwrap();
        assert_eq!(map.get("Tx"), Some(2.0 / 7.0));
        assert_eq!(map.cardinality(), 6);

        let few = records_with_states(&["Ohio", "OHIO", "Utah"]);
        let encoder = CategoricalEncoder::fit(CategoricalField::State, &few, 5).unwrap();
        assert_eq!(encoder.encode(&few[0], UnknownCategoryPolicy::Fail).unwrap(), 0.0);
        assert_eq!(encoder.encode(&few[1], UnknownCategoryPolicy::Fail).unwrap(), 0.0);
        assert_eq!(encoder.encode(&few[2], UnknownCategoryPolicy::Fail).unwrap(), 1.0);
    }
}
