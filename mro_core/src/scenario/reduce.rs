//! K-means reduction of an empirical sample to K weighted points
use nalgebra::{DMatrix, DVector};
use rand::distributions::{Distribution, WeightedIndex};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use thiserror::Error;
use tracing::debug;

use crate::configuration::ReducerConfig;
use crate::scenario::{ReducedDistribution, ScenarioSet};

/// Clusters scenarios with k-means++ seeding and Lloyd iterations
#[derive(Debug, Clone, Default)]
pub struct ScenarioReducer {
    config: ReducerConfig,
}

/// Result of one seeding plus Lloyd iterations
struct Clustering {
    centroids: DMatrix<f64>,
    assignment: Vec<usize>,
    counts: Vec<usize>,
    inertia: f64,
}

impl ScenarioReducer {
    /// Create a reducer
    pub fn new(config: ReducerConfig) -> Self {
        Self { config }
    }

    /// Reduce `scenarios` to `k` weighted points
    ///
    /// # Parameters
    /// - `scenarios`: Sample of N scenarios
    /// - `k`: Number of points, `1 <= k <= N`
    /// - `seed`: Seed of the k-means++ initialization, the result is a deterministic
    ///   function of the seed
    ///
    /// # Returns
    /// The identity reduction when `k == N`, otherwise cluster centroids weighted by the
    /// fraction of scenarios assigned to them
    pub fn reduce(
        &self,
        scenarios: &ScenarioSet,
        k: usize,
        seed: u64,
    ) -> Result<ReducedDistribution, ReductionError> {
        let n = scenarios.num_scenarios();
        if k == 0 || k > n {
            return Err(ReductionError::InvalidClusterCount { k, n });
        }
        if k == n {
            return Ok(ReducedDistribution::identity(scenarios));
        }

        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut best: Option<Clustering> = None;
        let mut empty_cluster = None;
        for _ in 0..self.config.restarts.max(1) {
            let clustering = self.cluster_once(scenarios.data(), k, &mut rng);
            if let Some(empty) = clustering.counts.iter().position(|&c| c == 0) {
                empty_cluster = Some(empty);
                continue;
            }
            if best.as_ref().map_or(true, |b| clustering.inertia < b.inertia) {
                best = Some(clustering);
            }
        }
        let best = match best {
            Some(best) => best,
            None => {
                return Err(ReductionError::EmptyCluster {
                    cluster: empty_cluster.unwrap_or(0),
                })
            }
        };
        debug!(k, n, inertia = best.inertia, "reduced scenarios");

        let weights = DVector::from_iterator(
            k,
            best.counts.iter().map(|&c| c as f64 / n as f64),
        );
        Ok(ReducedDistribution {
            points: best.centroids,
            weights,
            inertia: best.inertia,
            assignment: best.assignment,
        })
    }

    fn cluster_once(&self, data: &DMatrix<f64>, k: usize, rng: &mut ChaCha8Rng) -> Clustering {
        let mut centroids = seed_centroids(data, k, rng);
        let mut assignment = assign(data, &centroids);
        for _ in 0..self.config.max_iterations {
            centroids = update_centroids(data, &assignment, &centroids);
            let next = assign(data, &centroids);
            if next == assignment {
                break;
            }
            assignment = next;
        }
        let centroids = update_centroids(data, &assignment, &centroids);
        let mut counts = vec![0usize; k];
        let mut inertia = 0.;
        for (i, &c) in assignment.iter().enumerate() {
            counts[c] += 1;
            inertia += (data.row(i) - centroids.row(c)).norm_squared();
        }
        Clustering {
            centroids,
            assignment,
            counts,
            inertia,
        }
    }
}

/// k-means++ seeding, each new centroid drawn with probability proportional to the
/// squared distance to the nearest existing centroid
fn seed_centroids(data: &DMatrix<f64>, k: usize, rng: &mut ChaCha8Rng) -> DMatrix<f64> {
    let n = data.nrows();
    let mut centroids = DMatrix::zeros(k, data.ncols());
    let first = rng.gen_range(0..n);
    centroids.set_row(0, &data.row(first));
    let mut distances: Vec<f64> = (0..n)
        .map(|i| (data.row(i) - data.row(first)).norm_squared())
        .collect();
    for c in 1..k {
        let next = match WeightedIndex::new(&distances) {
            Ok(dist) => dist.sample(rng),
            // every point coincides with a centroid
            Err(_) => rng.gen_range(0..n),
        };
        centroids.set_row(c, &data.row(next));
        for (i, d) in distances.iter_mut().enumerate() {
            *d = d.min((data.row(i) - data.row(next)).norm_squared());
        }
    }
    centroids
}

/// Nearest centroid of every scenario, ties go to the lowest index
fn assign(data: &DMatrix<f64>, centroids: &DMatrix<f64>) -> Vec<usize> {
    (0..data.nrows())
        .map(|i| {
            let mut best = 0;
            let mut best_distance = f64::INFINITY;
            for c in 0..centroids.nrows() {
                let d = (data.row(i) - centroids.row(c)).norm_squared();
                if d < best_distance {
                    best = c;
                    best_distance = d;
                }
            }
            best
        })
        .collect()
}

/// Mean of the scenarios assigned to each centroid, unassigned centroids are kept
fn update_centroids(
    data: &DMatrix<f64>,
    assignment: &[usize],
    previous: &DMatrix<f64>,
) -> DMatrix<f64> {
    let mut sums = DMatrix::zeros(previous.nrows(), previous.ncols());
    let mut counts = vec![0usize; previous.nrows()];
    for (i, &c) in assignment.iter().enumerate() {
        let mut row = sums.row_mut(c);
        row += data.row(i);
        counts[c] += 1;
    }
    for (c, &count) in counts.iter().enumerate() {
        if count == 0 {
            sums.set_row(c, &previous.row(c));
        } else {
            let mut row = sums.row_mut(c);
            row /= count as f64;
        }
    }
    sums
}

/// Errors associated with scenario reduction
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ReductionError {
    /// Error when K is zero or larger than the number of scenarios
    #[error("Tried to reduce {n} scenarios to {k} points")]
    InvalidClusterCount {
        /// Requested number of points
        k: usize,
        /// Number of scenarios
        n: usize,
    },
    /// Error when clustering leaves a point with no scenarios assigned
    #[error("Clustering left point {cluster} with no scenarios")]
    EmptyCluster {
        /// Index of the empty cluster
        cluster: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use proptest::prelude::*;

    fn line(n: usize) -> ScenarioSet {
        ScenarioSet::from_rows(&(0..n).map(|i| vec![i as f64, 1.]).collect::<Vec<_>>()).unwrap()
    }

    #[test]
    fn two_separated_groups() {
        let set = ScenarioSet::from_rows(&[
            vec![0., 0.],
            vec![0., 1.],
            vec![10., 10.],
            vec![10., 11.],
            vec![10., 12.],
        ])
        .unwrap();
        let reduced = ScenarioReducer::default().reduce(&set, 2, 7).unwrap();
        let assignment = reduced.assignment();
        assert_eq!(assignment[0], assignment[1]);
        assert_eq!(assignment[2], assignment[3]);
        assert_ne!(assignment[0], assignment[2]);
        let small = assignment[0];
        assert_abs_diff_eq!(reduced.weights()[small], 0.4, epsilon = 1e-12);
        assert_abs_diff_eq!(reduced.point(small)[1], 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(reduced.point(1 - small)[1], 11., epsilon = 1e-12);
        // 2 * 0.25 + 1 + 0 + 1
        assert_abs_diff_eq!(reduced.inertia(), 2.5, epsilon = 1e-12);
    }

    #[test]
    fn deterministic_for_seed() {
        let set = line(30);
        let reducer = ScenarioReducer::default();
        let a = reducer.reduce(&set, 4, 11).unwrap();
        let b = reducer.reduce(&set, 4, 11).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn k_equal_n_is_identity() {
        let set = line(6);
        let reduced = ScenarioReducer::default().reduce(&set, 6, 0).unwrap();
        assert_eq!(reduced, ReducedDistribution::identity(&set));
        assert_eq!(reduced.points(), set.data());
    }

    #[test]
    fn invalid_cluster_counts() {
        let set = ScenarioSet::from_rows(&[vec![1., 1.], vec![1., 1.], vec![1., 1.]]).unwrap();
        let reducer = ScenarioReducer::default();
        match reducer.reduce(&set, 5, 0) {
            Err(ReductionError::InvalidClusterCount { k: 5, n: 3 }) => {}
            _ => panic!("K > N not caught"),
        }
        match reducer.reduce(&set, 0, 0) {
            Err(ReductionError::InvalidClusterCount { .. }) => {}
            _ => panic!("K = 0 not caught"),
        }
        // identical points can not fill two clusters
        match reducer.reduce(&set, 2, 0) {
            Err(ReductionError::EmptyCluster { .. }) => {}
            _ => panic!("Empty cluster not caught"),
        }
    }

    proptest! {
        #[test]
        fn weights_sum_to_one(
            rows in prop::collection::vec(prop::collection::vec(-10.0f64..10.0, 3), 2..25),
            k_frac in 0.0f64..1.0,
            seed in any::<u64>(),
        ) {
            let n = rows.len();
            let k = 1 + ((n - 1) as f64 * k_frac) as usize;
            let set = ScenarioSet::from_rows(&rows).unwrap();
            match ScenarioReducer::default().reduce(&set, k, seed) {
                Ok(reduced) => {
                    prop_assert_eq!(reduced.num_points(), k);
                    prop_assert!((reduced.weights().sum() - 1.).abs() <= 1e-9);
                    prop_assert!(reduced.weights().iter().all(|&w| w > 0.));
                    prop_assert_eq!(reduced.assignment().len(), n);
                }
                // duplicate rows may leave too few distinct points
                Err(ReductionError::EmptyCluster { .. }) => {}
                Err(e) => prop_assert!(false, "unexpected error {}", e),
            }
        }
    }
}
