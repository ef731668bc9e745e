// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

use news_ensemble::split::{complement, kfold_indices, split_indices};
use proptest::prelude::*;
use std::collections::BTreeSet;

proptest! {
    #[test]
    fn test_split_covers_every_index_once(n in 2usize..400, fraction in 0.05f64..0.95, seed in any::<u64>()) {
        let parts = split_indices(n, fraction, seed).unwrap();

        let train: BTreeSet<usize> = parts.train.iter().copied().collect();
        let validation: BTreeSet<usize> = parts.validation.iter().copied().collect();

        prop_assert_eq!(train.len(), parts.train.len());
        prop_assert_eq!(validation.len(), parts.validation.len());
        prop_assert!(train.is_disjoint(&validation));
        prop_assert_eq!(train.union(&validation).count(), n);
        prop_assert_eq!(parts.train.len(), (n as f64 * fraction).floor() as usize);
    }

    #[test]
    fn test_split_is_deterministic(n in 1usize..200, seed in any::<u64>()) {
        prop_assert_eq!(split_indices(n, 0.8, seed).unwrap(), split_indices(n, 0.8, seed).unwrap());
    }

    #[test]
    fn test_kfold_partitions(n in 10usize..200, k in 2usize..10, seed in any::<u64>()) {
        let folds = kfold_indices(n, k, seed).unwrap();
        prop_assert_eq!(folds.len(), k);

        let mut seen = vec![0usize; n];
        for fold in &folds {
            prop_assert!(fold.len() == n / k || fold.len() == n / k + 1);
            for &i in fold {
                seen[i] += 1;
            }
            prop_assert_eq!(complement(n, fold).len() + fold.len(), n);
        }
        prop_assert!(seen.iter().all(|&c| c == 1));
    }
}

#[test]
fn test_split_rejects_bad_fraction() {
    assert!(split_indices(10, 0.0, 1).is_err());
    assert!(split_indices(10, 1.0, 1).is_err());
}

#[test]
fn test_different_seeds_shuffle_differently() {
    let a = split_indices(100, 0.8, 1).unwrap();
    let b = split_indices(100, 0.8, 2).unwrap();
    assert_ne!(a.train, b.train);
}
