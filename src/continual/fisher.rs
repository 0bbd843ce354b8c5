//! Fisher importance tracking.
//!
//! The diagonal of the Fisher information is estimated as the mean squared
//! gradient of the log-likelihood ranking loss. Importance from successive
//! tasks is merged into one [`FisherState`] that anchors the parameters at
//! their value from the latest task boundary.

use ndarray::{Array1, Zip};
use serde::{Deserialize, Serialize};

use crate::data::{RelationCatalog, Sample};
use crate::model::SimilarityScorer;
use crate::training::{ranking_gradient, RankingLoss};
use crate::{Error, Result};

/// How freshly computed importance is combined with the accumulated one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FisherMerge {
    /// Element-wise maximum; importance never decreases.
    #[default]
    ElementwiseMax,
    /// Average weighted by the number of tasks merged so far.
    RunningAverage,
}

impl FisherMerge {
    /// Merge `current` into `past`.
    ///
    /// With no past state the current importance is returned unchanged. The
    /// anchor always becomes `anchor`, the parameters at this task boundary.
    pub fn merge(
        &self,
        past: Option<&FisherState>,
        current: Array1<f64>,
        anchor: Array1<f64>,
    ) -> Result<FisherState> {
        if current.len() != anchor.len() {
            return Err(Error::ShapeMismatch {
                expected: anchor.len(),
                actual: current.len(),
            });
        }

        let past = match past {
            None => {
                return Ok(FisherState {
                    importance: current,
                    anchor,
                    tasks: 1,
                })
            }
            Some(past) => past,
        };

        if past.importance.len() != current.len() {
            return Err(Error::ShapeMismatch {
                expected: past.importance.len(),
                actual: current.len(),
            });
        }

        let importance = match self {
            FisherMerge::ElementwiseMax => {
                Zip::from(&past.importance)
                    .and(&current)
                    .map_collect(|&p, &c| p.max(c))
            }
            FisherMerge::RunningAverage => {
                let n = past.tasks as f64;
                (&past.importance * n + &current) / (n + 1.0)
            }
        };

        Ok(FisherState {
            importance,
            anchor,
            tasks: past.tasks + 1,
        })
    }
}

/// Accumulated parameter importance and the parameters it protects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FisherState {
    importance: Array1<f64>,
    anchor: Array1<f64>,
    tasks: usize,
}

impl FisherState {
    /// Per-parameter importance.
    pub fn importance(&self) -> &Array1<f64> {
        &self.importance
    }

    /// Parameters at the latest task boundary.
    pub fn anchor(&self) -> &Array1<f64> {
        &self.anchor
    }

    /// Number of tasks merged into this state.
    pub fn tasks(&self) -> usize {
        self.tasks
    }

    fn check_len(&self, params: &Array1<f64>) -> Result<()> {
        if params.len() == self.anchor.len() {
            Ok(())
        } else {
            Err(Error::ShapeMismatch {
                expected: self.anchor.len(),
                actual: params.len(),
            })
        }
    }

    /// Quadratic penalty `sum_p F_p (theta_p - anchor_p)^2`.
    pub fn penalty(&self, params: &Array1<f64>) -> Result<f64> {
        self.check_len(params)?;
        Ok(Zip::from(&self.importance)
            .and(params)
            .and(&self.anchor)
            .fold(0.0, |acc, &f, &p, &a| acc + f * (p - a).powi(2)))
    }

    /// Gradient of [`FisherState::penalty`]: `2 F_p (theta_p - anchor_p)`.
    pub fn penalty_gradient(&self, params: &Array1<f64>) -> Result<Array1<f64>> {
        self.check_len(params)?;
        Ok(Zip::from(&self.importance)
            .and(params)
            .and(&self.anchor)
            .map_collect(|&f, &p, &a| 2.0 * f * (p - a)))
    }

    /// Summary statistics of the importance values.
    pub fn stats(&self) -> FisherStats {
        let len = self.importance.len();
        FisherStats {
            param_count: len,
            tasks: self.tasks,
            mean: if len == 0 { 0.0 } else { self.importance.sum() / len as f64 },
            max: self.importance.fold(0.0, |m, &v| m.max(v)),
        }
    }
}

/// Statistics about a Fisher state.
#[derive(Debug, Clone, Copy)]
pub struct FisherStats {
    /// Number of parameters.
    pub param_count: usize,
    /// Tasks merged so far.
    pub tasks: usize,
    /// Mean importance.
    pub mean: f64,
    /// Largest importance.
    pub max: f64,
}

/// Estimates the Fisher diagonal of a scorer on a task's data.
#[derive(Debug, Clone, Copy)]
pub struct FisherTracker {
    batch_size: usize,
}

impl FisherTracker {
    /// Create a tracker using micro-batches of `batch_size` samples.
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
        }
    }

    /// Mean over micro-batches of the squared gradient of the summed
    /// log-likelihood loss. Returns `None` for empty data.
    pub fn compute<S: SimilarityScorer + ?Sized>(
        &self,
        scorer: &S,
        catalog: &RelationCatalog,
        data: &[Sample],
    ) -> Result<Option<Array1<f64>>> {
        if data.is_empty() {
            return Ok(None);
        }

        let num_batches = (data.len() + self.batch_size - 1) / self.batch_size;
        let mut fisher = Array1::zeros(scorer.num_parameters());
        for chunk in data.chunks(self.batch_size) {
            let batch = ranking_gradient(scorer, catalog, chunk, RankingLoss::LogLikelihood)?;
            fisher.scaled_add(1.0 / num_batches as f64, &batch.gradient.mapv(|g| g * g));
        }

        tracing::debug!(
            "Computed Fisher diagonal over {} micro-batches ({} parameters)",
            num_batches,
            fisher.len()
        );
        Ok(Some(fisher))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::synthetic::{SyntheticConfig, SyntheticDataSource};
    use crate::data::DataSource;
    use crate::model::encoder::PooledEncoderScorer;
    use ndarray::array;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_merge_with_none_is_identity() {
        let current = array![0.1, 0.0, 2.5];
        for merge in [FisherMerge::ElementwiseMax, FisherMerge::RunningAverage] {
            let state = merge.merge(None, current.clone(), array![1.0, 2.0, 3.0]).unwrap();
            assert_eq!(state.importance(), &current);
            assert_eq!(state.tasks(), 1);
        }
    }

    #[test]
    fn test_max_merge_is_monotone() {
        let past = FisherMerge::ElementwiseMax
            .merge(None, array![0.5, 0.1, 0.3], array![0.0, 0.0, 0.0])
            .unwrap();
        let current = array![0.2, 0.4, 0.3];
        let merged = FisherMerge::ElementwiseMax
            .merge(Some(&past), current.clone(), array![1.0, 1.0, 1.0])
            .unwrap();

        for p in 0..3 {
            assert!(merged.importance()[p] >= past.importance()[p]);
            assert!(merged.importance()[p] >= current[p]);
        }
        assert_eq!(merged.importance(), &array![0.5, 0.4, 0.3]);
        assert_eq!(merged.anchor(), &array![1.0, 1.0, 1.0]);
        assert_eq!(merged.tasks(), 2);
    }

    #[test]
    fn test_running_average_merge() {
        let past = FisherMerge::RunningAverage
            .merge(None, array![1.0, 0.0], array![0.0, 0.0])
            .unwrap();
        let merged = FisherMerge::RunningAverage
            .merge(Some(&past), array![0.0, 1.0], array![0.0, 0.0])
            .unwrap();
        assert_eq!(merged.importance(), &array![0.5, 0.5]);
    }

    #[test]
    fn test_merge_shape_mismatch() {
        let past = FisherMerge::ElementwiseMax
            .merge(None, array![1.0], array![0.0])
            .unwrap();
        assert!(FisherMerge::ElementwiseMax
            .merge(Some(&past), array![1.0, 2.0], array![0.0, 0.0])
            .is_err());
    }

    #[test]
    fn test_penalty_and_gradient() {
        let state = FisherMerge::ElementwiseMax
            .merge(None, array![2.0, 0.0], array![1.0, 1.0])
            .unwrap();

        assert_eq!(state.penalty(&array![1.0, 1.0]).unwrap(), 0.0);
        assert_eq!(state.penalty(&array![2.0, 5.0]).unwrap(), 2.0);
        assert_eq!(state.penalty_gradient(&array![2.0, 5.0]).unwrap(), array![4.0, 0.0]);
        assert!(state.penalty(&array![1.0]).is_err());
    }

    #[test]
    fn test_compute_fisher() {
        let dataset = SyntheticDataSource::new(SyntheticConfig {
            num_relations: 4,
            num_clusters: 2,
            train_per_relation: 5,
            candidates_per_sample: 3,
            ..SyntheticConfig::default()
        })
        .load()
        .unwrap();
        let mut rng = StdRng::seed_from_u64(5);
        let scorer = PooledEncoderScorer::new(dataset.word_embeddings.clone(), 6, &mut rng);
        let tracker = FisherTracker::new(8);

        let fisher = tracker
            .compute(&scorer, &dataset.catalog, &dataset.train)
            .unwrap()
            .unwrap();
        assert_eq!(fisher.len(), scorer.num_parameters());
        assert!(fisher.iter().all(|&f| f >= 0.0));
        assert!(fisher.sum() > 0.0);

        assert!(tracker.compute(&scorer, &dataset.catalog, &[]).unwrap().is_none());
    }
}
