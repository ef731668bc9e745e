// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! CART classification tree
//!
//! Axis-aligned splits chosen by Gini impurity reduction, thresholds at the
//! midpoint between consecutive distinct values. P(Real) is the Real share of
//! the training rows in the leaf reached.
//!
//! Optional cost-complexity pruning: geometric midpoints of the full tree's
//! weakest-link sequence are the candidate alphas, each is scored by k-fold
//! cross-validated misclassification, and the full tree is pruned at the best
//! one (ties go to the larger alpha, i.e. the smaller tree).

use super::{check_width, validate_training, Classifier, ModelKind};
use crate::datasets::Label;
use crate::error::{PipelineError, Result};
use crate::split::{complement, kfold_indices};
use serde::{Deserialize, Serialize};

const MIN_GAIN: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
struct Split {
    feature: usize,
    threshold: f64,
    left: usize,
    right: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Node {
    n: usize,
    n_real: usize,
    split: Option<Split>,
}

impl Node {
    fn probability(&self) -> f64 {
        self.n_real as f64 / self.n as f64
    }

    /// Rows misclassified if this node were a leaf
    fn errors(&self) -> usize {
        self.n_real.min(self.n - self.n_real)
    }
}

fn gini(n: usize, n_real: usize) -> f64 {
    if n == 0 {
        return 0.0;
    }
    let p = n_real as f64 / n as f64;
    2.0 * p * (1.0 - p)
}

/// Arena-allocated tree; node 0 is the root
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Tree {
    nodes: Vec<Node>,
}

impl Tree {
    fn grow(rows: &[Vec<f64>], labels: &[Label], indices: &[usize], max_depth: usize) -> Self {
        let mut tree = Tree { nodes: Vec::new() };
        tree.grow_node(rows, labels, indices, 0, max_depth);
        tree
    }

    fn grow_node(&mut self, rows: &[Vec<f64>], labels: &[Label], indices: &[usize], depth: usize, max_depth: usize) -> usize {
        let n = indices.len();
        let n_real = indices.iter().filter(|&&i| labels[i] == Label::Real).count();
        let id = self.nodes.len();
        self.nodes.push(Node { n, n_real, split: None });

        if depth >= max_depth || n < 2 || n_real == 0 || n_real == n {
            return id;
        }

        if let Some((feature, threshold)) = best_split(rows, labels, indices) {
            let (left_idx, right_idx): (Vec<usize>, Vec<usize>) =
                indices.iter().partition(|&&i| rows[i][feature] <= threshold);
            let left = self.grow_node(rows, labels, &left_idx, depth + 1, max_depth);
            let right = self.grow_node(rows, labels, &right_idx, depth + 1, max_depth);
            self.nodes[id].split = Some(Split {
                feature,
                threshold,
                left,
                right,
            });
        }
        id
    }

    fn leaf_for(&self, features: &[f64]) -> &Node {
        let mut node = &self.nodes[0];
        while let Some(split) = node.split {
            node = if features[split.feature] <= split.threshold {
                &self.nodes[split.left]
            } else {
                &self.nodes[split.right]
            };
        }
        node
    }

    fn probability(&self, features: &[f64]) -> f64 {
        self.leaf_for(features).probability()
    }

    /// (misclassified rows over all leaves, leaf count) of the subtree at `id`
    fn subtree_stats(&self, id: usize) -> (usize, usize) {
        match self.nodes[id].split {
            None => (self.nodes[id].errors(), 1),
            Some(s) => {
                let (el, ll) = self.subtree_stats(s.left);
                let (er, lr) = self.subtree_stats(s.right);
                (el + er, ll + lr)
            }
        }
    }

    fn internal_nodes(&self) -> Vec<usize> {
        let mut out = Vec::new();
        let mut stack = vec![0];
        while let Some(id) = stack.pop() {
            if let Some(s) = self.nodes[id].split {
                out.push(id);
                stack.push(s.left);
                stack.push(s.right);
            }
        }
        out
    }

    /// Internal node with the smallest complexity cost g(t), and that cost.
    /// Costs are in misclassification rate relative to the root size.
    fn weakest_link(&self) -> Option<(usize, f64)> {
        let root_n = self.nodes[0].n as f64;
        self.internal_nodes()
            .into_iter()
            .map(|id| {
                let (subtree_errors, leaves) = self.subtree_stats(id);
                let gain = (self.nodes[id].errors() as f64 - subtree_errors as f64) / root_n;
                (id, gain / (leaves as f64 - 1.0))
            })
            .min_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)))
    }

    /// Alphas at which successive weakest links collapse, ascending
    fn pruning_sequence(&self) -> Vec<f64> {
        let mut tree = self.clone();
        let mut alphas = Vec::new();
        let mut last = 0.0_f64;
        while let Some((id, g)) = tree.weakest_link() {
            last = last.max(g);
            alphas.push(last);
            tree.nodes[id].split = None;
        }
        alphas
    }

    /// Collapse every weakest link whose cost is at most `alpha`
    fn pruned(&self, alpha: f64) -> Self {
        let mut tree = self.clone();
        while let Some((id, g)) = tree.weakest_link() {
            if g > alpha + MIN_GAIN {
                break;
            }
            tree.nodes[id].split = None;
        }
        tree.compact()
    }

    /// Drop nodes no longer reachable from the root
    fn compact(&self) -> Self {
        let mut out = Tree { nodes: Vec::new() };
        self.copy_node(0, &mut out);
        out
    }

    fn copy_node(&self, id: usize, out: &mut Tree) -> usize {
        let new_id = out.nodes.len();
        out.nodes.push(Node {
            split: None,
            ..self.nodes[id].clone()
        });
        if let Some(s) = self.nodes[id].split {
            let left = self.copy_node(s.left, out);
            let right = self.copy_node(s.right, out);
            out.nodes[new_id].split = Some(Split { left, right, ..s });
        }
        new_id
    }

    fn leaf_count(&self) -> usize {
        self.subtree_stats(0).1
    }
}

/// Best (feature, threshold) by Gini reduction, `None` when nothing improves
fn best_split(rows: &[Vec<f64>], labels: &[Label], indices: &[usize]) -> Option<(usize, f64)> {
    let n = indices.len();
    let n_real = indices.iter().filter(|&&i| labels[i] == Label::Real).count();
    let parent = gini(n, n_real);
    let n_features = rows[indices[0]].len();

    let mut best: Option<(usize, f64, f64)> = None;

    for feature in 0..n_features {
        let mut sorted: Vec<usize> = indices.to_vec();
        sorted.sort_by(|&a, &b| rows[a][feature].total_cmp(&rows[b][feature]));

        let mut left_n = 0;
        let mut left_real = 0;
        for pos in 0..n - 1 {
            let i = sorted[pos];
            left_n += 1;
            if labels[i] == Label::Real {
                left_real += 1;
            }

            let here = rows[i][feature];
            let next = rows[sorted[pos + 1]][feature];
            if here == next {
                continue;
            }

            let right_n = n - left_n;
            let right_real = n_real - left_real;
            let weighted = (left_n as f64 * gini(left_n, left_real) + right_n as f64 * gini(right_n, right_real))
                / n as f64;
            let gain = parent - weighted;

            if gain > MIN_GAIN && best.map_or(true, |(_, _, g)| gain > g + MIN_GAIN) {
                best = Some((feature, here + (next - here) / 2.0, gain));
            }
        }
    }

    best.map(|(feature, threshold, _)| (feature, threshold))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTree {
    max_depth: usize,
    prune: bool,
    folds: usize,
    seed: u64,
    /// Complexity penalty the fitted tree was pruned at
    alpha: f64,
    n_features: usize,
    tree: Option<Tree>,
}

impl DecisionTree {
    pub fn new(max_depth: usize, prune: bool, folds: usize, seed: u64) -> Self {
        Self {
            max_depth,
            prune,
            folds,
            seed,
            alpha: 0.0,
            n_features: 0,
            tree: None,
        }
    }

    /// Unpruned tree of the given depth
    pub fn unpruned(max_depth: usize) -> Self {
        Self::new(max_depth, false, 5, 0)
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    pub fn leaf_count(&self) -> Option<usize> {
        self.tree.as_ref().map(Tree::leaf_count)
    }

    /// Pick alpha by cross-validated misclassification
    fn select_alpha(&self, rows: &[Vec<f64>], labels: &[Label], full: &Tree) -> f64 {
        let sequence = full.pruning_sequence();
        let Some(&largest) = sequence.last() else {
            return 0.0;
        };

        // Fold trees have fewer rows, so compare them between collapses, not at them
        let mut candidates = vec![0.0];
        let midpoints = sequence.windows(2).map(|w| (w[0] * w[1]).sqrt());
        for a in midpoints.chain(std::iter::once(largest)) {
            if candidates.last().map_or(true, |&last: &f64| a > last + MIN_GAIN) {
                candidates.push(a);
            }
        }

        let n = rows.len();
        let folds = match kfold_indices(n, self.folds, self.seed) {
            Ok(folds) => folds,
            Err(_) => {
                tracing::warn!("{} rows are too few for {}-fold pruning, keeping the full tree", n, self.folds);
                return 0.0;
            }
        };

        let mut errors = vec![0usize; candidates.len()];
        for held_out in &folds {
            let train_idx = complement(n, held_out);
            let fold_tree = Tree::grow(rows, labels, &train_idx, self.max_depth);
            for (c, &alpha) in candidates.iter().enumerate() {
                let pruned = fold_tree.pruned(alpha);
                errors[c] += held_out
                    .iter()
                    .filter(|&&i| Label::from_probability(pruned.probability(&rows[i]), 0.5) != labels[i])
                    .count();
            }
        }

        let mut best = 0;
        for c in 1..candidates.len() {
            if errors[c] <= errors[best] {
                best = c;
            }
        }
        tracing::debug!("Tree pruning candidates {:?} -> cv errors {:?}", candidates, errors);
        candidates[best]
    }
}

impl Default for DecisionTree {
    fn default() -> Self {
        Self::new(30, true, 5, 123)
    }
}

impl Classifier for DecisionTree {
    fn fit(&mut self, features: &[Vec<f64>], labels: &[Label]) -> Result<()> {
        let n_features = validate_training(self.name(), features, labels)?;
        if self.max_depth == 0 {
            return Err(PipelineError::config("tree max depth must be at least 1"));
        }

        let all: Vec<usize> = (0..features.len()).collect();
        let full = Tree::grow(features, labels, &all, self.max_depth);

        let (alpha, tree) = if self.prune {
            let alpha = self.select_alpha(features, labels, &full);
            (alpha, full.pruned(alpha))
        } else {
            (0.0, full)
        };

        tracing::debug!("Decision tree fit: alpha={:.5}, leaves={}", alpha, tree.leaf_count());

        self.alpha = alpha;
        self.n_features = n_features;
        self.tree = Some(tree);
        Ok(())
    }

    fn predict_probability(&self, features: &[f64]) -> Result<f64> {
        let tree = self
            .tree
            .as_ref()
            .ok_or_else(|| PipelineError::not_fitted(self.name()))?;
        check_width(self.n_features, features)?;
        Ok(tree.probability(features))
    }

    fn kind(&self) -> ModelKind {
        ModelKind::DecisionTree
    }

    fn description(&self) -> &str {
        "CART tree with Gini splits and cross-validated cost-complexity pruning"
    }

    fn is_fitted(&self) -> bool {
        self.tree.is_some()
    }

    fn to_json(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }
}
