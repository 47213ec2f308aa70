//! CART regression/classification trees shared by the tree ensembles.
//!
//! Trees are stored as a flat arena with the root at index 0. How a node is
//! scored and what a leaf holds is decided by a [`SplitObjective`].

use ndarray::{ArrayView1, ArrayView2};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

const MIN_GAIN: f64 = 1e-12;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Node<L> {
    Leaf(L),
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

/// A fitted binary tree; rows with `x[feature] <= threshold` go left
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTree<L> {
    nodes: Vec<Node<L>>,
}

impl<L> DecisionTree<L> {
    /// Leaf reached by one feature row
    pub fn leaf(&self, row: ArrayView1<f64>) -> &L {
        let mut idx = 0;
        loop {
            match &self.nodes[idx] {
                Node::Leaf(value) => return value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    idx = if row[*feature] <= *threshold {
                        *left
                    } else {
                        *right
                    };
                }
            }
        }
    }

    pub fn n_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn n_leaves(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| matches!(n, Node::Leaf(_)))
            .count()
    }
}

/// Growth limits for a single tree
#[derive(Debug, Clone, Copy)]
pub struct TreeParams {
    /// Unlimited when `None`
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    /// Features drawn per split; all features when `None`
    pub max_features: Option<usize>,
}

/// Node statistics and split scoring for one kind of tree
pub trait SplitObjective {
    type Stats: Clone;
    type Leaf;

    fn zero(&self) -> Self::Stats;
    fn add(&self, stats: &mut Self::Stats, sample: usize);
    fn remove(&self, stats: &mut Self::Stats, sample: usize);

    /// Node score; the gain of a split is `score(left) + score(right) - score(parent)`
    fn score(&self, stats: &Self::Stats) -> f64;

    /// Whether a child with these statistics may be created
    fn child_allowed(&self, stats: &Self::Stats) -> bool;

    fn is_pure(&self, _stats: &Self::Stats) -> bool {
        false
    }

    fn leaf(&self, stats: &Self::Stats) -> Self::Leaf;
}

/// Grow a tree over the given sample indices
pub fn grow<O, R>(
    x: ArrayView2<f64>,
    samples: Vec<usize>,
    objective: &O,
    params: &TreeParams,
    rng: &mut R,
) -> DecisionTree<O::Leaf>
where
    O: SplitObjective,
    R: Rng,
{
    let mut grower = Grower {
        x: x.view(),
        objective,
        params,
        rng,
        nodes: Vec::new(),
    };
    grower.build(samples, 0);
    DecisionTree {
        nodes: grower.nodes,
    }
}

struct Split {
    feature: usize,
    threshold: f64,
    gain: f64,
}

struct Grower<'a, O: SplitObjective, R> {
    x: ArrayView2<'a, f64>,
    objective: &'a O,
    params: &'a TreeParams,
    rng: &'a mut R,
    nodes: Vec<Node<O::Leaf>>,
}

impl<'a, O: SplitObjective, R: Rng> Grower<'a, O, R> {
    fn build(&mut self, samples: Vec<usize>, depth: usize) -> usize {
        let mut stats = self.objective.zero();
        for &i in &samples {
            self.objective.add(&mut stats, i);
        }

        let depth_reached = self.params.max_depth.is_some_and(|max| depth >= max);
        if depth_reached
            || samples.len() < self.params.min_samples_split
            || self.objective.is_pure(&stats)
        {
            return self.push_leaf(&stats);
        }

        let Some(split) = self.best_split(&samples, &stats) else {
            return self.push_leaf(&stats);
        };

        let x = self.x;
        let (left, right): (Vec<usize>, Vec<usize>) = samples
            .into_iter()
            .partition(|&i| x[[i, split.feature]] <= split.threshold);

        // reserve the slot so the parent precedes its children
        let idx = self.push_leaf(&stats);
        let left = self.build(left, depth + 1);
        let right = self.build(right, depth + 1);
        self.nodes[idx] = Node::Split {
            feature: split.feature,
            threshold: split.threshold,
            left,
            right,
        };
        idx
    }

    fn push_leaf(&mut self, stats: &O::Stats) -> usize {
        self.nodes.push(Node::Leaf(self.objective.leaf(stats)));
        self.nodes.len() - 1
    }

    fn best_split(&mut self, samples: &[usize], parent: &O::Stats) -> Option<Split> {
        let x = self.x;
        let n_features = x.ncols();
        let mut features: Vec<usize> = (0..n_features).collect();
        let budget = match self.params.max_features {
            Some(k) if k < n_features => {
                features.shuffle(&mut *self.rng);
                k.max(1)
            }
            _ => n_features,
        };

        let parent_score = self.objective.score(parent);
        let mut best: Option<Split> = None;
        let mut order = samples.to_vec();

        for (visited, &feature) in features.iter().enumerate() {
            // past the budget, keep looking only until some valid split exists
            if visited >= budget && best.is_some() {
                break;
            }

            order.sort_by(|&a, &b| x[[a, feature]].total_cmp(&x[[b, feature]]));

            let first = x[[order[0], feature]];
            let last = x[[order[order.len() - 1], feature]];
            if first == last {
                continue;
            }

            let mut left = self.objective.zero();
            let mut right = parent.clone();

            for pos in 0..order.len() - 1 {
                let i = order[pos];
                self.objective.add(&mut left, i);
                self.objective.remove(&mut right, i);

                let here = x[[i, feature]];
                let next = x[[order[pos + 1], feature]];
                if here == next {
                    continue;
                }
                if !self.objective.child_allowed(&left) || !self.objective.child_allowed(&right) {
                    continue;
                }

                let gain =
                    self.objective.score(&left) + self.objective.score(&right) - parent_score;
                if gain > best.as_ref().map_or(MIN_GAIN, |b| b.gain) {
                    best = Some(Split {
                        feature,
                        threshold: (here + next) / 2.0,
                        gain,
                    });
                }
            }
        }

        best
    }
}

/// Weighted Gini impurity; leaves hold the class distribution
pub struct GiniObjective<'a> {
    labels: &'a [usize],
    weights: &'a [f64],
    n_classes: usize,
}

impl<'a> GiniObjective<'a> {
    pub fn new(labels: &'a [usize], weights: &'a [f64], n_classes: usize) -> Self {
        Self {
            labels,
            weights,
            n_classes,
        }
    }
}

impl SplitObjective for GiniObjective<'_> {
    type Stats = Vec<f64>;
    type Leaf = Vec<f64>;

    fn zero(&self) -> Vec<f64> {
        vec![0.0; self.n_classes]
    }

    fn add(&self, stats: &mut Vec<f64>, sample: usize) {
        stats[self.labels[sample]] += self.weights[sample];
    }

    fn remove(&self, stats: &mut Vec<f64>, sample: usize) {
        stats[self.labels[sample]] -= self.weights[sample];
    }

    fn score(&self, stats: &Vec<f64>) -> f64 {
        let total: f64 = stats.iter().sum();
        if total <= 0.0 {
            return 0.0;
        }
        stats.iter().map(|w| w * w).sum::<f64>() / total
    }

    fn child_allowed(&self, stats: &Vec<f64>) -> bool {
        stats.iter().sum::<f64>() > MIN_GAIN
    }

    fn is_pure(&self, stats: &Vec<f64>) -> bool {
        stats.iter().filter(|w| **w > 0.0).count() <= 1
    }

    fn leaf(&self, stats: &Vec<f64>) -> Vec<f64> {
        let total: f64 = stats.iter().sum();
        if total <= 0.0 {
            return vec![1.0 / self.n_classes as f64; self.n_classes];
        }
        stats.iter().map(|w| w / total).collect()
    }
}

/// Second-order boosting objective; leaves hold `-G / (H + lambda)`
pub struct GradientObjective<'a> {
    gradients: &'a [f64],
    hessians: &'a [f64],
    reg_lambda: f64,
    min_child_weight: f64,
}

impl<'a> GradientObjective<'a> {
    pub fn new(
        gradients: &'a [f64],
        hessians: &'a [f64],
        reg_lambda: f64,
        min_child_weight: f64,
    ) -> Self {
        Self {
            gradients,
            hessians,
            reg_lambda,
            min_child_weight,
        }
    }
}

/// Summed gradient, hessian and sample count of a node
#[derive(Debug, Clone, Copy, Default)]
pub struct GradientStats {
    grad: f64,
    hess: f64,
    count: usize,
}

impl SplitObjective for GradientObjective<'_> {
    type Stats = GradientStats;
    type Leaf = f64;

    fn zero(&self) -> GradientStats {
        GradientStats::default()
    }

    fn add(&self, stats: &mut GradientStats, sample: usize) {
        stats.grad += self.gradients[sample];
        stats.hess += self.hessians[sample];
        stats.count += 1;
    }

    fn remove(&self, stats: &mut GradientStats, sample: usize) {
        stats.grad -= self.gradients[sample];
        stats.hess -= self.hessians[sample];
        stats.count -= 1;
    }

    fn score(&self, stats: &GradientStats) -> f64 {
        stats.grad * stats.grad / (stats.hess + self.reg_lambda)
    }

    fn child_allowed(&self, stats: &GradientStats) -> bool {
        stats.count > 0 && stats.hess >= self.min_child_weight
    }

    fn leaf(&self, stats: &GradientStats) -> f64 {
        let denom = stats.hess + self.reg_lambda;
        if denom <= 0.0 {
            0.0
        } else {
            -stats.grad / denom
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn params() -> TreeParams {
        TreeParams {
            max_depth: None,
            min_samples_split: 2,
            max_features: None,
        }
    }

    #[test]
    fn test_gini_tree_separates_classes() {
        let x = array![[0.0, 1.0], [0.1, 1.0], [0.9, 1.0], [1.0, 1.0]];
        let y = vec![0, 0, 1, 1];
        let w = vec![1.0; 4];
        let objective = GiniObjective::new(&y, &w, 2);
        let mut rng = StdRng::seed_from_u64(7);

        let tree = grow(x.view(), (0..4).collect(), &objective, &params(), &mut rng);

        assert_eq!(tree.n_leaves(), 2);
        assert_eq!(tree.leaf(x.row(0)), &vec![1.0, 0.0]);
        assert_eq!(tree.leaf(x.row(3)), &vec![0.0, 1.0]);
        assert_eq!(tree.leaf(array![0.45, 0.0].view()), &vec![1.0, 0.0]);
    }

    #[test]
    fn test_constant_features_give_single_leaf() {
        let x = array![[1.0], [1.0], [1.0]];
        let y = vec![0, 1, 1];
        let w = vec![1.0; 3];
        let objective = GiniObjective::new(&y, &w, 2);
        let mut rng = StdRng::seed_from_u64(7);

        let tree = grow(x.view(), (0..3).collect(), &objective, &params(), &mut rng);

        assert_eq!(tree.n_nodes(), 1);
        let leaf = tree.leaf(x.row(0));
        assert!((leaf[1] - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_depth_limit() {
        let x = array![[0.0], [1.0], [2.0], [3.0]];
        let y = vec![0, 1, 0, 1];
        let w = vec![1.0; 4];
        let objective = GiniObjective::new(&y, &w, 2);
        let mut rng = StdRng::seed_from_u64(7);
        let limited = TreeParams {
            max_depth: Some(1),
            ..params()
        };

        let tree = grow(x.view(), (0..4).collect(), &objective, &limited, &mut rng);
        assert!(tree.n_leaves() <= 2);
    }

    #[test]
    fn test_gradient_leaf_values() {
        let x = array![[0.0], [0.0], [1.0], [1.0]];
        let grad = vec![-1.0, -1.0, 1.0, 1.0];
        let hess = vec![1.0; 4];
        let objective = GradientObjective::new(&grad, &hess, 1.0, 1.0);
        let mut rng = StdRng::seed_from_u64(7);

        let tree = grow(x.view(), (0..4).collect(), &objective, &params(), &mut rng);

        assert!((tree.leaf(x.row(0)) - 2.0 / 3.0).abs() < 1e-12);
        assert!((tree.leaf(x.row(2)) + 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_min_child_weight_blocks_split() {
        let x = array![[0.0], [1.0]];
        let grad = vec![-1.0, 1.0];
        let hess = vec![0.25, 0.25];
        let objective = GradientObjective::new(&grad, &hess, 1.0, 1.0);
        let mut rng = StdRng::seed_from_u64(7);

        let tree = grow(x.view(), vec![0, 1], &objective, &params(), &mut rng);
        assert_eq!(tree.n_nodes(), 1);
    }
}
