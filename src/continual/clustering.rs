//! Clustering of embedding vectors.

use ndarray::{Array2, ArrayView1};
use rand::rngs::StdRng;
use rand::Rng;

use crate::{Error, Result};

/// Result of clustering `n` vectors into `k` groups.
#[derive(Debug, Clone)]
pub struct Clustering {
    /// Cluster of each vector.
    pub assignments: Vec<usize>,
    /// Euclidean distance of each vector to each centroid [n, k].
    pub distances: Array2<f64>,
}

/// Collaborator grouping vectors into clusters.
pub trait Clusterer {
    /// Cluster the rows of `vectors` into `k` groups.
    fn cluster(&self, vectors: &Array2<f64>, k: usize, rng: &mut StdRng) -> Result<Clustering>;
}

/// Lloyd's k-means with k-means++ seeding.
#[derive(Debug, Clone)]
pub struct KMeans {
    max_iterations: usize,
}

impl KMeans {
    /// Create a new k-means clusterer.
    pub fn new(max_iterations: usize) -> Self {
        Self {
            max_iterations: max_iterations.max(1),
        }
    }

    /// k-means++: each next centroid is drawn with probability proportional
    /// to its squared distance from the nearest chosen centroid.
    fn init_centroids(&self, data: &Array2<f64>, k: usize, rng: &mut StdRng) -> Array2<f64> {
        let n = data.nrows();
        let mut centroids = Array2::zeros((k, data.ncols()));
        let mut nearest = vec![f64::INFINITY; n];

        let mut chosen = rng.gen_range(0..n);
        for c in 0..k {
            centroids.row_mut(c).assign(&data.row(chosen));
            for (i, best) in nearest.iter_mut().enumerate() {
                *best = best.min(squared_distance(data.row(i), centroids.row(c)));
            }

            let total: f64 = nearest.iter().sum();
            chosen = if total > 0.0 {
                let threshold = rng.gen::<f64>() * total;
                let mut cumsum = 0.0;
                nearest
                    .iter()
                    .position(|&d| {
                        cumsum += d;
                        cumsum >= threshold && d > 0.0
                    })
                    .unwrap_or(n - 1)
            } else {
                rng.gen_range(0..n)
            };
        }

        centroids
    }
}

impl Default for KMeans {
    fn default() -> Self {
        Self::new(50)
    }
}

impl Clusterer for KMeans {
    fn cluster(&self, data: &Array2<f64>, k: usize, rng: &mut StdRng) -> Result<Clustering> {
        let n = data.nrows();
        if k == 0 || k > n {
            return Err(Error::Clustering(format!(
                "cannot build {} clusters from {} vectors",
                k, n
            )));
        }

        let mut centroids = self.init_centroids(data, k, rng);
        let mut assignments = vec![usize::MAX; n];

        for iteration in 0..self.max_iterations {
            // Assign samples to nearest centroid
            let mut changed = false;
            for i in 0..n {
                let nearest = nearest_centroid(data.row(i), &centroids);
                if assignments[i] != nearest {
                    assignments[i] = nearest;
                    changed = true;
                }
            }
            if !changed {
                tracing::trace!("k-means converged after {} iterations", iteration);
                break;
            }

            // Update centroids; empty clusters keep their previous centroid
            let mut sums: Array2<f64> = Array2::zeros(centroids.raw_dim());
            let mut counts = vec![0usize; k];
            for (i, &cluster) in assignments.iter().enumerate() {
                sums.row_mut(cluster).zip_mut_with(&data.row(i), |a, &b| *a += b);
                counts[cluster] += 1;
            }
            for (j, &count) in counts.iter().enumerate() {
                if count > 0 {
                    let mean = sums.row(j).mapv(|v| v / count as f64);
                    centroids.row_mut(j).assign(&mean);
                }
            }
        }

        let distances = Array2::from_shape_fn((n, k), |(i, j)| {
            squared_distance(data.row(i), centroids.row(j)).sqrt()
        });

        Ok(Clustering {
            assignments,
            distances,
        })
    }
}

fn squared_distance(a: ArrayView1<'_, f64>, b: ArrayView1<'_, f64>) -> f64 {
    a.iter().zip(b.iter()).map(|(&x, &y)| (x - y).powi(2)).sum()
}

fn nearest_centroid(sample: ArrayView1<'_, f64>, centroids: &Array2<f64>) -> usize {
    let mut min_dist = f64::INFINITY;
    let mut min_idx = 0;
    for (idx, centroid) in centroids.outer_iter().enumerate() {
        let dist = squared_distance(sample, centroid);
        if dist < min_dist {
            min_dist = dist;
            min_idx = idx;
        }
    }
    min_idx
}
