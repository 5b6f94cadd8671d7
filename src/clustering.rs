//! # clustering
//!
//! `clustering` runs k-means over the per-frame feature vectors of each
//! replicate and collects the result into a [`ClusterTable`].
//!
//! The procedure mirrors the classic vector-quantization formulation: every
//! restart seeds the codebook with `k` distinct observations, then alternates
//! between assigning each observation to its nearest centroid and moving each
//! centroid to the mean of its members. A restart stops once the mean
//! Euclidean distance between observations and their centroid (the
//! distortion) improves by no more than the tolerance. The restart with the
//! lowest distortion wins.
use ndarray::{Array2, ArrayView1, ArrayView2, Axis};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, info};

use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct ClusteringConfig {
    pub clusters: usize,       // number of clusters (k)
    pub restarts: usize,       // random initializations; the best one is kept
    pub tolerance: f64,        // stop once distortion improves by no more than this
    pub max_iterations: usize, // hard cap on assignment/update rounds per restart
    pub seed: Option<u64>,     // fixed seed for reproducible runs
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            clusters: 2,
            restarts: 20,
            tolerance: 1e-5,
            max_iterations: 300,
            seed: None,
        }
    }
}

/// Outcome of a single k-means fit.
#[derive(Debug, Clone)]
pub struct KMeansResult {
    pub centroids: Array2<f64>,
    pub assignments: Vec<usize>,
    pub distortion: f64,
    /// Distortion after each assignment round of the winning restart.
    pub history: Vec<f64>,
}

/// One row per cluster: the cluster label and its centroid, plus the
/// assignment of every frame in the replicate.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterTable {
    pub centroids: Array2<f64>,
    pub assignments: Vec<usize>,
    pub distortion: f64,
}

impl ClusterTable {
    pub fn len(&self) -> usize {
        self.centroids.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.centroids.nrows() == 0
    }

    /// Iterate over `(label, centroid)` rows.
    pub fn rows(&self) -> impl Iterator<Item = (usize, ArrayView1<'_, f64>)> {
        self.centroids.axis_iter(Axis(0)).enumerate()
    }

    /// Number of frames assigned to each cluster.
    pub fn cluster_sizes(&self) -> Vec<usize> {
        let mut sizes = vec![0; self.len()];
        for &label in &self.assignments {
            sizes[label] += 1;
        }
        sizes
    }

    /// Flatten into a numeric table whose first column holds the cluster
    /// label and the remaining columns the centroid.
    pub fn to_array(&self) -> Array2<f64> {
        let (k, dim) = self.centroids.dim();
        let mut table = Array2::zeros((k, dim + 1));
        for (label, centroid) in self.rows() {
            table[[label, 0]] = label as f64;
            table.row_mut(label).slice_mut(ndarray::s![1..]).assign(&centroid);
        }
        table
    }

    /// Inverse of [`ClusterTable::to_array`].
    pub fn from_array(table: Array2<f64>, assignments: Vec<usize>, distortion: f64) -> Result<Self> {
        if table.ncols() == 0 {
            return Err(Error::Clustering("cluster table has no label column".into()));
        }
        for (row, label) in table.column(0).iter().enumerate() {
            if *label != row as f64 {
                return Err(Error::Clustering(format!(
                    "row {row} is labelled {label}, expected {row}"
                )));
            }
        }
        if let Some(&label) = assignments.iter().find(|&&l| l >= table.nrows()) {
            return Err(Error::Clustering(format!(
                "assignment {label} refers to a missing cluster"
            )));
        }

        let centroids = table.slice(ndarray::s![.., 1..]).to_owned();
        Ok(Self {
            centroids,
            assignments,
            distortion,
        })
    }
}

impl From<KMeansResult> for ClusterTable {
    fn from(result: KMeansResult) -> Self {
        Self {
            centroids: result.centroids,
            assignments: result.assignments,
            distortion: result.distortion,
        }
    }
}

fn new_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

/// Cluster every replicate independently. Each entry of `replicates` is a
/// `frames x features` matrix.
pub fn cluster_replicates(
    replicates: &[Array2<f64>],
    config: &ClusteringConfig,
) -> Result<Vec<ClusterTable>> {
    let mut rng = new_rng(config.seed);

    replicates
        .iter()
        .enumerate()
        .map(|(index, frames)| {
            let result = kmeans_with_rng(frames.view(), config, &mut rng)?;
            info!(
                replicate = index,
                frames = frames.nrows(),
                features = frames.ncols(),
                distortion = result.distortion,
                "clustered replicate"
            );
            Ok(ClusterTable::from(result))
        })
        .collect()
}

/// Fit k-means to `observations` (one observation per row).
pub fn kmeans(observations: ArrayView2<f64>, config: &ClusteringConfig) -> Result<KMeansResult> {
    kmeans_with_rng(observations, config, &mut new_rng(config.seed))
}

fn kmeans_with_rng(
    observations: ArrayView2<f64>,
    config: &ClusteringConfig,
    rng: &mut StdRng,
) -> Result<KMeansResult> {
    let (n, dim) = observations.dim();
    if config.clusters == 0 || config.clusters > n {
        return Err(Error::TooFewObservations {
            k: config.clusters,
            observations: n,
        });
    }
    if dim == 0 {
        return Err(Error::Clustering("observations have no features".into()));
    }

    let mut best: Option<KMeansResult> = None;
    for restart in 0..config.restarts.max(1) {
        let initial = initial_centroids(observations, config.clusters, rng);
        let result = lloyd(observations, initial, config.tolerance, config.max_iterations);
        debug!(
            restart,
            distortion = result.distortion,
            iterations = result.history.len(),
            "k-means restart finished"
        );

        if best
            .as_ref()
            .map_or(true, |current| result.distortion < current.distortion)
        {
            best = Some(result);
        }
    }

    best.ok_or_else(|| Error::Clustering("no restart produced a result".into()))
}

/// Seed the codebook with `k` distinct observations chosen at random.
fn initial_centroids(observations: ArrayView2<f64>, k: usize, rng: &mut StdRng) -> Array2<f64> {
    let picks = rand::seq::index::sample(rng, observations.nrows(), k).into_vec();
    observations.select(Axis(0), &picks)
}

/// Run assignment/update rounds from `centroids` until the distortion stops
/// improving by more than `tolerance`.
fn lloyd(
    observations: ArrayView2<f64>,
    mut centroids: Array2<f64>,
    tolerance: f64,
    max_iterations: usize,
) -> KMeansResult {
    let mut history = Vec::new();
    let mut previous = f64::INFINITY;

    for _ in 0..max_iterations.max(1) {
        let (assignments, distances) = assign(observations, &centroids);
        let distortion = mean(&distances);
        history.push(distortion);

        centroids = update_centroids(observations, &assignments, &centroids);

        // A worsening distortion also ends the run
        if previous - distortion <= tolerance {
            break;
        }
        previous = distortion;
    }

    let (assignments, distances) = assign(observations, &centroids);
    KMeansResult {
        centroids,
        assignments,
        distortion: mean(&distances),
        history,
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn euclidean(a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f64>()
        .sqrt()
}

/// Assign each observation to its nearest centroid. Returns the cluster index
/// and the distance to it for every observation; ties go to the lower index.
fn assign(observations: ArrayView2<f64>, centroids: &Array2<f64>) -> (Vec<usize>, Vec<f64>) {
    observations
        .axis_iter(Axis(0))
        .map(|observation| {
            centroids
                .axis_iter(Axis(0))
                .map(|centroid| euclidean(observation, centroid))
                .enumerate()
                .fold((0, f64::INFINITY), |(best_idx, best_dist), (idx, dist)| {
                    if dist < best_dist {
                        (idx, dist)
                    } else {
                        (best_idx, best_dist)
                    }
                })
        })
        .unzip()
}

/// Move every centroid to the mean of its members. A cluster without members
/// keeps its previous centroid so the codebook always has `k` rows.
fn update_centroids(
    observations: ArrayView2<f64>,
    assignments: &[usize],
    previous: &Array2<f64>,
) -> Array2<f64> {
    let mut sums = Array2::<f64>::zeros(previous.dim());
    let mut counts = vec![0usize; previous.nrows()];

    for (observation, &cluster) in observations.axis_iter(Axis(0)).zip(assignments) {
        let mut row = sums.row_mut(cluster);
        row += &observation;
        counts[cluster] += 1;
    }

    let mut centroids = previous.clone();
    for (cluster, &count) in counts.iter().enumerate() {
        if count > 0 {
            let mean = sums.row(cluster).mapv(|v| v / count as f64);
            centroids.row_mut(cluster).assign(&mean);
        }
    }
    centroids
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn two_blobs() -> Array2<f64> {
        array![
            [0.0, 0.1],
            [0.1, 0.0],
            [0.0, 0.0],
            [10.0, 10.1],
            [10.1, 10.0],
            [10.0, 10.0],
        ]
    }

    #[test]
    fn test_assign() {
        let observations = array![[0.0, 0.0], [3.0, 4.0], [9.0, 9.0]];
        let centroids = array![[0.0, 0.0], [10.0, 10.0]];

        let (assignments, distances) = assign(observations.view(), &centroids);

        assert_eq!(assignments, vec![0, 0, 1]);
        assert_eq!(distances[0], 0.0);
        assert_eq!(distances[1], 5.0);
    }

    #[test]
    fn test_assign_ties_go_to_lowest_cluster() {
        let observations = array![[1.0]];
        let centroids = array![[0.0], [2.0]];

        let (assignments, _) = assign(observations.view(), &centroids);
        assert_eq!(assignments, vec![0]);
    }

    #[test]
    fn test_update_centroids() {
        let observations = array![[0.0, 0.0], [2.0, 2.0], [10.0, 10.0]];
        let previous = array![[1.0, 1.0], [9.0, 9.0]];

        let centroids = update_centroids(observations.view(), &[0, 0, 1], &previous);
        assert_eq!(centroids, array![[1.0, 1.0], [10.0, 10.0]]);
    }

    #[test]
    fn test_update_centroids_keeps_empty_cluster() {
        let observations = array![[0.0], [2.0]];
        let previous = array![[5.0], [-3.0]];

        // nobody is assigned to cluster 1
        let centroids = update_centroids(observations.view(), &[0, 0], &previous);
        assert_eq!(centroids, array![[1.0], [-3.0]]);
    }

    #[test]
    fn test_kmeans_separates_blobs() {
        let observations = two_blobs();
        let config = ClusteringConfig {
            clusters: 2,
            seed: Some(7),
            ..Default::default()
        };

        let result = kmeans(observations.view(), &config).unwrap();

        let a = result.assignments[0];
        let b = result.assignments[3];
        assert_ne!(a, b);
        assert_eq!(result.assignments, vec![a, a, a, b, b, b]);
        assert!(result.distortion < 0.1);
        assert!(!result.history.is_empty());
    }

    #[test]
    fn test_kmeans_is_reproducible_with_seed() {
        let observations = two_blobs();
        let config = ClusteringConfig {
            clusters: 3,
            restarts: 5,
            seed: Some(42),
            ..Default::default()
        };

        let first = kmeans(observations.view(), &config).unwrap();
        let second = kmeans(observations.view(), &config).unwrap();

        assert_eq!(first.centroids, second.centroids);
        assert_eq!(first.assignments, second.assignments);
    }

    #[test]
    fn test_kmeans_rejects_too_many_clusters() {
        let observations = array![[0.0], [1.0]];
        let config = ClusteringConfig {
            clusters: 3,
            ..Default::default()
        };

        let result = kmeans(observations.view(), &config);
        assert!(matches!(
            result,
            Err(Error::TooFewObservations {
                k: 3,
                observations: 2
            })
        ));
    }

    #[test]
    fn test_kmeans_rejects_featureless_observations() {
        let observations = Array2::<f64>::zeros((4, 0));
        let result = kmeans(observations.view(), &ClusteringConfig::default());
        assert!(matches!(result, Err(Error::Clustering(_))));
    }

    #[test]
    fn test_cluster_replicates_one_table_each() {
        let replicates = vec![two_blobs(), two_blobs()];
        let config = ClusteringConfig {
            clusters: 2,
            seed: Some(1),
            ..Default::default()
        };

        let tables = cluster_replicates(&replicates, &config).unwrap();

        assert_eq!(tables.len(), 2);
        for table in &tables {
            assert_eq!(table.len(), 2);
            assert_eq!(table.assignments.len(), 6);
            assert_eq!(table.cluster_sizes(), vec![3, 3]);
        }
    }

    #[test]
    fn test_table_array_layout() {
        let table = ClusterTable {
            centroids: array![[0.5, 1.5], [2.5, 3.5]],
            assignments: vec![1, 0, 1],
            distortion: 0.25,
        };

        let expected = array![[0.0, 0.5, 1.5], [1.0, 2.5, 3.5]];
        assert_eq!(table.to_array(), expected);

        let rebuilt = ClusterTable::from_array(expected, vec![1, 0, 1], 0.25).unwrap();
        assert_eq!(rebuilt, table);
    }

    #[test]
    fn test_table_rejects_bad_labels() {
        let table = array![[1.0, 0.5], [0.0, 2.5]];
        assert!(ClusterTable::from_array(table, vec![], 0.0).is_err());

        let table = array![[0.0, 0.5]];
        assert!(ClusterTable::from_array(table, vec![1], 0.0).is_err());
    }
}
