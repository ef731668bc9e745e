// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Seeded dataset partitioning
//!
//! Both the train/validation split and the k-fold assignment used by every
//! cross-validation routine draw from `ChaCha8Rng`, so a given
//! `(seed, input order)` always yields the same partition.

use crate::error::{PipelineError, Result};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

/// Index partition into train and validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitIndices {
    pub train: Vec<usize>,
    pub validation: Vec<usize>,
}

fn permutation(n: usize, seed: u64) -> Vec<usize> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut indices: Vec<usize> = (0..n).collect();
    indices.shuffle(&mut rng);
    indices
}

/// Partition `0..n` into train and validation.
///
/// The first `floor(n * train_fraction)` positions of a seeded permutation
/// become train, the rest validation.
pub fn split_indices(n: usize, train_fraction: f64, seed: u64) -> Result<SplitIndices> {
    if !(train_fraction > 0.0 && train_fraction < 1.0) {
        return Err(PipelineError::config(format!(
            "train fraction must be in (0, 1), got {}",
            train_fraction
        )));
    }

    let mut indices = permutation(n, seed);
    let train_len = (n as f64 * train_fraction).floor() as usize;
    let validation = indices.split_off(train_len);

    Ok(SplitIndices {
        train: indices,
        validation,
    })
}

/// Split a slice of items into (train, validation) clones
pub fn split<T: Clone>(items: &[T], train_fraction: f64, seed: u64) -> Result<(Vec<T>, Vec<T>)> {
    let indices = split_indices(items.len(), train_fraction, seed)?;
    let pick = |idx: &[usize]| idx.iter().map(|&i| items[i].clone()).collect::<Vec<T>>();
    Ok((pick(&indices.train), pick(&indices.validation)))
}

/// Assign `0..n` to `k` folds after a seeded shuffle.
/// Returns, per fold, the held-out indices (sorted ascending).
pub fn kfold_indices(n: usize, k: usize, seed: u64) -> Result<Vec<Vec<usize>>> {
    if k < 2 {
        return Err(PipelineError::config(format!("cross-validation needs at least 2 folds, got {}", k)));
    }
    if n < k {
        return Err(PipelineError::insufficient_data(
            "cross-validation",
            format!("{} records cannot fill {} folds", n, k),
        ));
    }

    let mut folds = vec![Vec::with_capacity(n / k + 1); k];
    for (pos, idx) in permutation(n, seed).into_iter().enumerate() {
        folds[pos % k].push(idx);
    }
    for fold in &mut folds {
        fold.sort_unstable();
    }
    Ok(folds)
}

/// Complement of a held-out fold within `0..n`
pub fn complement(n: usize, held_out: &[usize]) -> Vec<usize> {
    let mut mask = vec![true; n];
    for &i in held_out {
        mask[i] = false;
    }
    (0..n).filter(|&i| mask[i]).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_sizes() {
        let s = split_indices(100, 0.8, 123).unwrap();
        assert_eq!(s.train.len(), 80);
        assert_eq!(s.validation.len(), 20);

        let s = split_indices(7, 0.8, 123).unwrap();
        assert_eq!(s.train.len(), 5);
        assert_eq!(s.validation.len(), 2);
    }

    #[test]
    fn test_split_disjoint_and_exhaustive() {
        let s = split_indices(53, 0.8, 9).unwrap();
        let mut all: Vec<usize> = s.train.iter().chain(s.validation.iter()).copied().collect();
        all.sort_unstable();
        assert_eq!(all, (0..53).collect::<Vec<_>>());
    }

    #[test]
    fn test_split_deterministic() {
        assert_eq!(split_indices(40, 0.8, 123).unwrap(), split_indices(40, 0.8, 123).unwrap());
        assert_ne!(split_indices(40, 0.8, 123).unwrap(), split_indices(40, 0.8, 124).unwrap());
    }

    #[test]
    fn test_split_rejects_bad_fraction() {
        assert!(split_indices(10, 0.0, 1).is_err());
        assert!(split_indices(10, 1.0, 1).is_err());
        assert!(split_indices(10, f64::NAN, 1).is_err());
    }

    #[test]
    fn test_split_items() {
        let items: Vec<u32> = (0..10).collect();
        let (train, validation) = split(&items, 0.8, 5).unwrap();
        assert_eq!(train.len(), 8);
        assert_eq!(validation.len(), 2);
        assert!(validation.iter().all(|v| !train.contains(v)));
    }

    #[test]
    fn test_kfold_covers_everything_once() {
        let folds = kfold_indices(23, 5, 77).unwrap();
        assert_eq!(folds.len(), 5);

        let mut all: Vec<usize> = folds.iter().flatten().copied().collect();
        all.sort_unstable();
        assert_eq!(all, (0..23).collect::<Vec<_>>());

        for fold in &folds {
            assert!(fold.len() == 4 || fold.len() == 5);
        }
    }

    #[test]
    fn test_kfold_errors() {
        assert!(kfold_indices(10, 1, 0).is_err());
        assert!(kfold_indices(3, 5, 0).is_err());
    }

    #[test]
    fn test_complement() {
        assert_eq!(complement(5, &[1, 3]), vec![0, 2, 4]);
    }
}
