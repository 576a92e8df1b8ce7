//! Isolation forest: an ensemble of randomized partitioning trees.
//!
//! Anomalies are separated from the rest of the data in fewer random splits, so a
//! short average path length across the ensemble marks a row as anomalous.

use crate::error::{PipelineError, Result};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use rand::rngs::StdRng;
use rand::seq::index;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

/// Average path length of an unsuccessful search in a binary search tree of `n` nodes.
///
/// Used both to normalize path lengths and to credit the unbuilt depth below a leaf
/// that still holds more than one row.
pub fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum Node {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        size: usize,
    },
}

/// One randomized partitioning tree, stored as a node arena rooted at index 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsolationTree {
    nodes: Vec<Node>,
}

impl IsolationTree {
    /// Grow a tree over the rows of `data` listed in `sample`.
    fn grow(
        data: &ArrayView2<f64>,
        sample: &mut [usize],
        max_depth: usize,
        rng: &mut StdRng,
    ) -> Self {
        let mut tree = Self { nodes: Vec::new() };
        tree.build(data, sample, 0, max_depth, rng);
        tree
    }

    fn build(
        &mut self,
        data: &ArrayView2<f64>,
        rows: &mut [usize],
        depth: usize,
        max_depth: usize,
        rng: &mut StdRng,
    ) -> usize {
        let id = self.nodes.len();
        self.nodes.push(Node::Leaf { size: rows.len() });

        if depth >= max_depth || rows.len() <= 1 {
            return id;
        }

        // Only features that still vary inside this node can split it.
        let candidates: Vec<(usize, f64, f64)> = (0..data.ncols())
            .filter_map(|feature| {
                let (min, max) = rows
                    .iter()
                    .map(|&r| data[[r, feature]])
                    .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
                        (lo.min(v), hi.max(v))
                    });
                (max > min && (max - min).is_finite()).then_some((feature, min, max))
            })
            .collect();

        if candidates.is_empty() {
            return id;
        }

        let (feature, min, max) = candidates[rng.gen_range(0..candidates.len())];
        let threshold = rng.gen_range(min..max);

        let mut split = 0;
        for i in 0..rows.len() {
            if data[[rows[i], feature]] <= threshold {
                rows.swap(split, i);
                split += 1;
            }
        }

        let (left_rows, right_rows) = rows.split_at_mut(split);
        let left = self.build(data, left_rows, depth + 1, max_depth, rng);
        let right = self.build(data, right_rows, depth + 1, max_depth, rng);
        self.nodes[id] = Node::Split {
            feature,
            threshold,
            left,
            right,
        };

        id
    }

    /// Depth at which `row` lands, plus the expected remaining depth of its leaf.
    pub fn path_length(&self, row: ArrayView1<f64>) -> f64 {
        let mut node = 0;
        let mut depth = 0.0;
        loop {
            match &self.nodes[node] {
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    node = if row[*feature] <= *threshold { *left } else { *right };
                    depth += 1.0;
                }
                Node::Leaf { size } => return depth + average_path_length(*size),
            }
        }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

/// Fitted ensemble
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsolationForest {
    trees: Vec<IsolationTree>,
    /// Rows drawn per tree
    sample_size: usize,
    n_features: usize,
}

impl IsolationForest {
    /// Build `n_estimators` trees, each on its own subsample of at most `max_samples` rows.
    ///
    /// Per-tree seeds are drawn up front from `seed`, so the ensemble is identical however
    /// the trees are scheduled across threads.
    pub fn fit(
        data: &Array2<f64>,
        n_estimators: usize,
        max_samples: usize,
        seed: u64,
    ) -> Result<Self> {
        let n_rows = data.nrows();
        if n_rows < 2 {
            return Err(PipelineError::fit(format!(
                "need at least 2 rows to grow isolation trees, got {}",
                n_rows
            )));
        }
        if n_estimators == 0 {
            return Err(PipelineError::fit("n_estimators must be positive"));
        }
        if data.ncols() == 0 {
            return Err(PipelineError::fit("feature matrix has no columns"));
        }
        let all_constant = data
            .columns()
            .into_iter()
            .all(|column| column.iter().all(|v| *v == column[0]));
        if all_constant {
            return Err(PipelineError::fit("every feature has zero variance"));
        }

        let sample_size = max_samples.min(n_rows);
        let max_depth = (sample_size as f64).log2().ceil() as usize;

        let mut master = StdRng::seed_from_u64(seed);
        let seeds: Vec<u64> = (0..n_estimators).map(|_| master.gen()).collect();

        let view = data.view();
        let trees = seeds
            .par_iter()
            .map(|&tree_seed| {
                let mut rng = StdRng::seed_from_u64(tree_seed);
                let mut sample = index::sample(&mut rng, n_rows, sample_size).into_vec();
                IsolationTree::grow(&view, &mut sample, max_depth, &mut rng)
            })
            .collect();

        Ok(Self {
            trees,
            sample_size,
            n_features: data.ncols(),
        })
    }

    pub fn n_estimators(&self) -> usize {
        self.trees.len()
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn sample_size(&self) -> usize {
        self.sample_size
    }

    /// Mean path length of `row` across all trees.
    pub fn mean_path_length(&self, row: ArrayView1<f64>) -> f64 {
        self.trees.iter().map(|t| t.path_length(row)).sum::<f64>() / self.trees.len() as f64
    }

    /// Raw anomaly scores in `[-1, 0)`; lower means isolated in fewer splits.
    pub fn score_samples(&self, data: &Array2<f64>) -> Result<Array1<f64>> {
        if data.ncols() != self.n_features {
            return Err(PipelineError::contract(format!(
                "expected {} features, got {}",
                self.n_features,
                data.ncols()
            )));
        }

        let normalizer = average_path_length(self.sample_size);
        let scores: Vec<f64> = (0..data.nrows())
            .into_par_iter()
            .map(|i| -(2f64.powf(-self.mean_path_length(data.row(i)) / normalizer)))
            .collect();

        Ok(Array1::from(scores))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn clustered_with_outlier() -> Array2<f64> {
        let mut rows: Vec<f64> = Vec::new();
        for i in 0..60 {
            let jitter = (i % 7) as f64 * 0.05;
            rows.extend_from_slice(&[1.0 + jitter, 2.0 - jitter]);
        }
        rows.extend_from_slice(&[25.0, -30.0]);
        Array2::from_shape_vec((61, 2), rows).unwrap()
    }

    #[test]
    fn test_average_path_length() {
        assert_eq!(average_path_length(0), 0.0);
        assert_eq!(average_path_length(1), 0.0);
        assert_eq!(average_path_length(2), 1.0);
        assert!((average_path_length(256) - 10.244_770_920_183_317).abs() < 1e-9);
    }

    #[test]
    fn test_outlier_has_lowest_score() {
        let data = clustered_with_outlier();
        let forest = IsolationForest::fit(&data, 100, 256, 7).unwrap();
        let scores = forest.score_samples(&data).unwrap();

        let outlier = scores[60];
        assert!(scores.iter().take(60).all(|s| *s > outlier));
        assert!(scores.iter().all(|s| *s < 0.0 && *s >= -1.0));
    }

    #[test]
    fn test_same_seed_same_forest() {
        let data = clustered_with_outlier();
        let a = IsolationForest::fit(&data, 50, 32, 42).unwrap();
        let b = IsolationForest::fit(&data, 50, 32, 42).unwrap();

        assert_eq!(a, b);
        assert_eq!(a.score_samples(&data).unwrap(), b.score_samples(&data).unwrap());
    }

    #[test]
    fn test_depth_is_bounded_by_sample_size() {
        let data = clustered_with_outlier();
        let forest = IsolationForest::fit(&data, 10, 16, 3).unwrap();

        assert_eq!(forest.sample_size(), 16);
        // Depth limit 4 allows at most 2^5 - 1 nodes.
        assert!(forest.trees.iter().all(|t| t.node_count() <= 31));
    }

    #[test]
    fn test_fit_errors() {
        let single = array![[1.0, 2.0]];
        assert!(matches!(
            IsolationForest::fit(&single, 10, 256, 0),
            Err(PipelineError::Fit { .. })
        ));

        let constant = array![[1.0, 2.0], [1.0, 2.0], [1.0, 2.0]];
        assert!(matches!(
            IsolationForest::fit(&constant, 10, 256, 0),
            Err(PipelineError::Fit { .. })
        ));
    }

    #[test]
    fn test_overflowing_range_is_never_split() {
        let data = array![[-1e308, 1.0], [1e308, 2.0], [1e308, 3.0], [-1e308, 4.0]];
        let forest = IsolationForest::fit(&data, 20, 256, 5).unwrap();
        let scores = forest.score_samples(&data).unwrap();

        assert!(scores.iter().all(|s| s.is_finite()));
        for tree in &forest.trees {
            assert!(tree
                .nodes
                .iter()
                .all(|n| !matches!(n, Node::Split { feature: 0, .. })));
        }
    }

    #[test]
    fn test_wrong_width_is_contract_error() {
        let data = clustered_with_outlier();
        let forest = IsolationForest::fit(&data, 5, 16, 1).unwrap();

        assert!(matches!(
            forest.score_samples(&array![[1.0, 2.0, 3.0]]),
            Err(PipelineError::Contract { .. })
        ));
    }
}
