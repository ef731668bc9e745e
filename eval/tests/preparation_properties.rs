// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

mod common;

use common::record;
use news_ensemble::datasets::{CategoricalField, ContinuousField, Label};
use news_ensemble::encoding::{FrequencyMap, UnknownCategoryPolicy};
use news_ensemble::error::PipelineError;
use news_ensemble::normalize::NormalizationParams;
use news_ensemble::split::split;
use news_ensemble::Record;
use proptest::prelude::*;

fn with_trust(values: &[f64]) -> Vec<Record> {
    values
        .iter()
        .enumerate()
        .map(|(i, &t)| record(i, t, if i % 2 == 0 { Label::Real } else { Label::Fake }))
        .collect()
}

fn spread(values: &[f64]) -> f64 {
    let max = values.iter().copied().fold(f64::MIN, f64::max);
    let min = values.iter().copied().fold(f64::MAX, f64::min);
    max - min
}

proptest! {
    #[test]
    fn test_normalized_train_has_zero_mean_unit_std(values in prop::collection::vec(0.0f64..100.0, 3..60)) {
        prop_assume!(spread(&values) > 1e-3);

        let records = with_trust(&values);
        let params = NormalizationParams::fit(&records, &[ContinuousField::TrustScore]).unwrap();
        let z: Vec<f64> = params.apply_all(&records).iter().map(|r| r.trust_score).collect();

        let n = z.len() as f64;
        let mean = z.iter().sum::<f64>() / n;
        let std = (z.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0)).sqrt();
        prop_assert!(mean.abs() < 1e-9, "mean {}", mean);
        prop_assert!((std - 1.0).abs() < 1e-9, "std {}", std);
    }

    #[test]
    fn test_validation_values_never_reach_fitted_params(
        values in prop::collection::vec(0.0f64..100.0, 10..60),
        shift in 1.0f64..1e6,
        seed in any::<u64>(),
    ) {
        let records = with_trust(&values);
        let (train, validation) = split(&records, 0.8, seed).unwrap();
        prop_assume!(spread(&train.iter().map(|r| r.trust_score).collect::<Vec<_>>()) > 1e-3);

        let params = NormalizationParams::fit(&train, &[ContinuousField::TrustScore]).unwrap();

        let shifted: Vec<Record> = validation
            .iter()
            .map(|r| Record { trust_score: r.trust_score + shift, ..r.clone() })
            .collect();
        prop_assert_eq!(&params, &NormalizationParams::fit(&train, &[ContinuousField::TrustScore]).unwrap());

        // A fit that saw the shifted validation rows lands elsewhere
        let mut combined = train.clone();
        combined.extend(shifted.iter().cloned());
        let leaky = NormalizationParams::fit(&combined, &[ContinuousField::TrustScore]).unwrap();
        prop_assert_ne!(&params, &leaky);

        // Applying to validation uses the frozen train statistics
        let stats = params.get(ContinuousField::TrustScore).unwrap();
        for (before, after) in shifted.iter().zip(params.apply_all(&shifted)) {
            prop_assert_eq!(after.trust_score, (before.trust_score - stats.mean) / stats.std);
        }
    }

    #[test]
    fn test_frequency_is_count_over_total(states in prop::collection::vec(prop::sample::select(vec!["Ohio", "Texas", "Utah", "Iowa", "Maine"]), 1..80)) {
        let records: Vec<Record> = states
            .iter()
            .enumerate()
            .map(|(i, s)| Record { state: s.to_string(), ..record(i, 50.0, Label::Real) })
            .collect();
        let map = FrequencyMap::fit(CategoricalField::State, &records).unwrap();

        let total = states.len();
        for s in &states {
            let count = states.iter().filter(|x| *x == s).count();
            prop_assert_eq!(map.get(s), Some(count as f64 / total as f64));
        }
        let distinct: std::collections::BTreeSet<_> = states.iter().collect();
        prop_assert_eq!(map.cardinality(), distinct.len());
    }
}

#[test]
fn test_unseen_value_uses_fallback_or_fails() {
    let records = vec![record(0, 10.0, Label::Fake), record(1, 90.0, Label::Real)];
    let map = FrequencyMap::fit(CategoricalField::State, &records).unwrap();

    assert_eq!(map.get("Vermont"), None);
    assert_eq!(map.apply("Vermont", UnknownCategoryPolicy::default()).unwrap(), 0.0);
    assert_eq!(map.apply("Vermont", UnknownCategoryPolicy::Fallback(-1.0)).unwrap(), -1.0);

    let err = map.apply("Vermont", UnknownCategoryPolicy::Fail).unwrap_err();
    assert!(matches!(err, PipelineError::UnknownCategory { .. }));
}

#[test]
fn test_constant_field_is_degenerate() {
    let records = with_trust(&[42.0, 42.0, 42.0]);
    let err = NormalizationParams::fit(&records, &[ContinuousField::TrustScore]).unwrap_err();
    assert!(matches!(err, PipelineError::DegenerateField { .. }));
}
