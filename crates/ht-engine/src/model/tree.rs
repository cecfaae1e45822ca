//! Variance-reduction regression tree.

use ht_types::{HtError, HtResult};
use ndarray::{Array1, Array2, ArrayView1};
use rand::Rng;

/// Tree node
#[derive(Debug, Clone, PartialEq)]
enum Node {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
}

/// Regression tree grown greedily on squared error.
#[derive(Debug, Clone)]
pub struct RegressionTree {
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    /// Features considered per split; `None` considers all of them.
    pub max_features: Option<usize>,
    root: Option<Node>,
    n_features: usize,
}

impl Default for RegressionTree {
    fn default() -> Self {
        Self::new()
    }
}

/// Best split found for one node.
struct Candidate {
    feature: usize,
    threshold: f64,
    score: f64,
}

impl RegressionTree {
    pub fn new() -> Self {
        Self {
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: None,
            root: None,
            n_features: 0,
        }
    }

    pub fn with_max_depth(mut self, depth: Option<usize>) -> Self {
        self.max_depth = depth;
        self
    }

    pub fn with_min_samples_split(mut self, min_samples: usize) -> Self {
        self.min_samples_split = min_samples;
        self
    }

    pub fn with_min_samples_leaf(mut self, min_samples: usize) -> Self {
        self.min_samples_leaf = min_samples;
        self
    }

    pub fn with_max_features(mut self, max_features: Option<usize>) -> Self {
        self.max_features = max_features;
        self
    }

    pub fn is_fitted(&self) -> bool {
        self.root.is_some()
    }

    /// Longest root-to-leaf path; zero for a single leaf.
    pub fn depth(&self) -> usize {
        fn walk(node: &Node) -> usize {
            match node {
                Node::Leaf { .. } => 0,
                Node::Split { left, right, .. } => 1 + walk(left).max(walk(right)),
            }
        }
        self.root.as_ref().map_or(0, walk)
    }

    /// Fit on the rows named by `indices` (repeats allowed, as in a bootstrap).
    pub fn fit_rows<R: Rng>(
        &mut self,
        x: &Array2<f64>,
        y: &Array1<f64>,
        indices: &[usize],
        rng: &mut R,
    ) -> HtResult<()> {
        if x.nrows() != y.len() {
            return Err(HtError::Trial(format!(
                "feature rows ({}) and targets ({}) differ",
                x.nrows(),
                y.len()
            )));
        }
        if indices.is_empty() {
            return Err(HtError::Trial("cannot fit a tree on zero samples".to_string()));
        }
        if self.min_samples_split < 2 {
            return Err(HtError::Trial(format!(
                "min_samples_split must be at least 2, got {}",
                self.min_samples_split
            )));
        }
        if self.min_samples_leaf < 1 {
            return Err(HtError::Trial(format!(
                "min_samples_leaf must be at least 1, got {}",
                self.min_samples_leaf
            )));
        }
        if self.max_depth == Some(0) {
            return Err(HtError::Trial("max_depth must be at least 1".to_string()));
        }

        self.n_features = x.ncols();
        let mut rows = indices.to_vec();
        self.root = Some(self.grow(x, y, &mut rows, 0, rng));
        Ok(())
    }

    pub fn fit<R: Rng>(&mut self, x: &Array2<f64>, y: &Array1<f64>, rng: &mut R) -> HtResult<()> {
        let all: Vec<usize> = (0..x.nrows()).collect();
        self.fit_rows(x, y, &all, rng)
    }

    fn leaf(y: &Array1<f64>, rows: &[usize]) -> Node {
        let sum: f64 = rows.iter().map(|&i| y[i]).sum();
        Node::Leaf {
            value: sum / rows.len() as f64,
        }
    }

    fn grow<R: Rng>(
        &self,
        x: &Array2<f64>,
        y: &Array1<f64>,
        rows: &mut [usize],
        depth: usize,
        rng: &mut R,
    ) -> Node {
        let n = rows.len();
        let should_stop = n < self.min_samples_split
            || n < 2 * self.min_samples_leaf
            || self.max_depth.map_or(false, |d| depth >= d);
        if should_stop {
            return Self::leaf(y, rows);
        }

        let Some(best) = self.find_split(x, y, rows, rng) else {
            return Self::leaf(y, rows);
        };

        let (mut left_rows, mut right_rows): (Vec<usize>, Vec<usize>) = rows
            .iter()
            .copied()
            .partition(|&i| x[[i, best.feature]] <= best.threshold);

        let left = self.grow(x, y, &mut left_rows, depth + 1, rng);
        let right = self.grow(x, y, &mut right_rows, depth + 1, rng);
        Node::Split {
            feature: best.feature,
            threshold: best.threshold,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// Scan every candidate feature for the split with the largest SSE drop.
    fn find_split<R: Rng>(
        &self,
        x: &Array2<f64>,
        y: &Array1<f64>,
        rows: &mut [usize],
        rng: &mut R,
    ) -> Option<Candidate> {
        let n = rows.len();
        let total: f64 = rows.iter().map(|&i| y[i]).sum();
        // Maximizing sum_l^2/n_l + sum_r^2/n_r minimizes the children's SSE.
        let parent_score = total * total / n as f64;

        let features: Vec<usize> = match self.max_features {
            Some(k) if k < self.n_features => {
                let mut picked = rand::seq::index::sample(rng, self.n_features, k).into_vec();
                picked.sort_unstable();
                picked
            }
            _ => (0..self.n_features).collect(),
        };

        let mut best: Option<Candidate> = None;
        for feature in features {
            rows.sort_by(|&a, &b| x[[a, feature]].total_cmp(&x[[b, feature]]));

            let mut left_sum = 0.0;
            for split in 1..n {
                left_sum += y[rows[split - 1]];
                let lo = x[[rows[split - 1], feature]];
                let hi = x[[rows[split], feature]];
                if split < self.min_samples_leaf || n - split < self.min_samples_leaf || lo == hi {
                    continue;
                }

                let right_sum = total - left_sum;
                let score = left_sum * left_sum / split as f64
                    + right_sum * right_sum / (n - split) as f64;
                let improves = best.as_ref().map_or(true, |b| score > b.score);
                if score > parent_score + 1e-12 * parent_score.abs().max(1.0) && improves {
                    best = Some(Candidate {
                        feature,
                        threshold: lo + (hi - lo) / 2.0,
                        score,
                    });
                }
            }
        }
        best
    }

    pub fn predict_row(&self, row: ArrayView1<f64>) -> HtResult<f64> {
        let mut node = self
            .root
            .as_ref()
            .ok_or_else(|| HtError::Trial("tree is not fitted".to_string()))?;
        loop {
            match node {
                Node::Leaf { value } => return Ok(*value),
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    node = if row[*feature] <= *threshold { left } else { right };
                }
            }
        }
    }

    pub fn predict(&self, x: &Array2<f64>) -> HtResult<Array1<f64>> {
        if x.ncols() != self.n_features {
            return Err(HtError::Trial(format!(
                "expected {} features, got {}",
                self.n_features,
                x.ncols()
            )));
        }
        x.rows()
            .into_iter()
            .map(|row| self.predict_row(row))
            .collect::<HtResult<Vec<f64>>>()
            .map(Array1::from_vec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn step_data() -> (Array2<f64>, Array1<f64>) {
        let x = array![[1.0], [2.0], [3.0], [10.0], [11.0], [12.0]];
        let y = array![5.0, 5.0, 5.0, 20.0, 20.0, 20.0];
        (x, y)
    }

    #[test]
    fn learns_a_step_function() {
        let (x, y) = step_data();
        let mut tree = RegressionTree::new();
        tree.fit(&x, &y, &mut ChaCha8Rng::seed_from_u64(0)).unwrap();

        assert_eq!(tree.depth(), 1);
        let preds = tree.predict(&array![[0.0], [6.0], [7.0], [100.0]]).unwrap();
        assert_eq!(preds.to_vec(), vec![5.0, 5.0, 20.0, 20.0]);
    }

    #[test]
    fn depth_limit_is_respected() {
        let x = Array2::from_shape_fn((32, 1), |(i, _)| i as f64);
        let y = Array1::from_shape_fn(32, |i| (i * i) as f64);
        let mut tree = RegressionTree::new().with_max_depth(Some(2));
        tree.fit(&x, &y, &mut ChaCha8Rng::seed_from_u64(0)).unwrap();
        assert!(tree.depth() <= 2);
    }

    #[test]
    fn min_samples_leaf_blocks_small_children() {
        let (x, y) = step_data();
        let mut tree = RegressionTree::new().with_min_samples_leaf(4);
        tree.fit(&x, &y, &mut ChaCha8Rng::seed_from_u64(0)).unwrap();
        assert_eq!(tree.depth(), 0);
        let pred = tree.predict(&array![[1.0]]).unwrap();
        assert!((pred[0] - 12.5).abs() < 1e-12);
    }

    #[test]
    fn invalid_settings_fail_the_fit() {
        let (x, y) = step_data();
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        assert!(RegressionTree::new().with_min_samples_split(1).fit(&x, &y, &mut rng).is_err());
        assert!(RegressionTree::new().with_min_samples_leaf(0).fit(&x, &y, &mut rng).is_err());
        assert!(RegressionTree::new().with_max_depth(Some(0)).fit(&x, &y, &mut rng).is_err());
    }

    #[test]
    fn unfitted_tree_cannot_predict() {
        assert!(RegressionTree::new().predict(&Array2::zeros((1, 0))).is_err());
    }
}
