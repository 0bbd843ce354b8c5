//! Training driver for one task.
//!
//! Each epoch walks the current task data followed by the replayed memory,
//! cut into fixed-size batches. Every batch produces one SGD step on the
//! ranking loss, optionally anchored by the Fisher penalty.

use ndarray::Array1;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use super::loss::RankingLoss;
use super::ranking_gradient;
use crate::continual::fisher::FisherState;
use crate::data::{RelationCatalog, Sample};
use crate::evaluation::evaluate_model;
use crate::model::SimilarityScorer;
use crate::{Error, Result};

/// Configuration of the training driver.
#[derive(Debug, Clone)]
pub struct TrainerConfig {
    /// Passes over the combined data.
    pub epochs: usize,
    /// Samples per SGD step.
    pub batch_size: usize,
    /// SGD learning rate.
    pub learning_rate: f64,
    /// Ranking objective.
    pub loss: RankingLoss,
    /// Shuffle the combined stream every epoch.
    pub shuffle: bool,
    /// Maximum L2 norm of a step's gradient.
    pub gradient_clip: Option<f64>,
    /// Strength of the Fisher penalty.
    pub fisher_lambda: f64,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            epochs: 3,
            batch_size: 50,
            learning_rate: 0.05,
            loss: RankingLoss::default(),
            shuffle: true,
            gradient_clip: Some(5.0),
            fisher_lambda: 1.0,
        }
    }
}

/// What happened while training one task.
#[derive(Debug, Clone, Default)]
pub struct TrainOutcome {
    /// Mean loss per sample of every epoch, penalty included.
    pub epoch_losses: Vec<f64>,
    /// Accuracy on the task data before training.
    pub train_accuracy_before: f64,
    /// Accuracy on the task data after training.
    pub train_accuracy_after: f64,
    /// Change of task accuracy caused by training.
    pub accuracy_delta: f64,
    /// Validation accuracy after every epoch (empty without validation data).
    pub valid_accuracy: Vec<f64>,
    /// Number of SGD steps taken.
    pub steps: usize,
}

impl TrainOutcome {
    /// Loss of the final epoch.
    pub fn final_loss(&self) -> f64 {
        self.epoch_losses.last().copied().unwrap_or(0.0)
    }
}

/// Gradient-descent training driver.
#[derive(Debug, Clone)]
pub struct Trainer {
    config: TrainerConfig,
}

impl Trainer {
    /// Create a new trainer.
    pub fn new(config: TrainerConfig) -> Result<Self> {
        if config.batch_size == 0 {
            return Err(Error::InvalidParameter("batch_size must be positive".into()));
        }
        if config.learning_rate <= 0.0 {
            return Err(Error::InvalidParameter("learning_rate must be positive".into()));
        }
        Ok(Self { config })
    }

    /// Get configuration.
    pub fn config(&self) -> &TrainerConfig {
        &self.config
    }

    /// Train the scorer on the current task plus replayed memory.
    ///
    /// The scorer is updated in place. When `fisher` is present the penalty
    /// `lambda * sum_p F_p (theta_p - anchor_p)^2` is added to every step.
    pub fn train<S: SimilarityScorer + ?Sized>(
        &self,
        scorer: &mut S,
        catalog: &RelationCatalog,
        current: &[Sample],
        replay: &[Sample],
        valid: &[Sample],
        fisher: Option<&FisherState>,
        rng: &mut StdRng,
    ) -> Result<TrainOutcome> {
        let batch_size = self.config.batch_size;
        let before = evaluate_model(&*scorer, None, current, catalog, batch_size)?;

        let mut stream: Vec<&Sample> = current.iter().chain(replay.iter()).collect();
        let mut outcome = TrainOutcome {
            train_accuracy_before: before,
            ..TrainOutcome::default()
        };

        for epoch in 0..self.config.epochs {
            if self.config.shuffle {
                stream.shuffle(rng);
            }

            let mut epoch_loss = 0.0;
            for chunk in stream.chunks(batch_size) {
                let batch: Vec<Sample> = chunk.iter().map(|&s| s.clone()).collect();
                epoch_loss += self.step(scorer, catalog, &batch, fisher)?;
                outcome.steps += 1;
            }

            let mean_loss = if stream.is_empty() {
                0.0
            } else {
                epoch_loss / stream.len() as f64
            };
            outcome.epoch_losses.push(mean_loss);

            if valid.is_empty() {
                tracing::debug!("Epoch {}: loss = {:.6}", epoch + 1, mean_loss);
            } else {
                let accuracy = evaluate_model(&*scorer, None, valid, catalog, batch_size)?;
                outcome.valid_accuracy.push(accuracy);
                tracing::debug!(
                    "Epoch {}: loss = {:.6}, valid accuracy = {:.3}",
                    epoch + 1,
                    mean_loss,
                    accuracy
                );
            }
        }

        outcome.train_accuracy_after =
            evaluate_model(&*scorer, None, current, catalog, batch_size)?;
        outcome.accuracy_delta = outcome.train_accuracy_after - outcome.train_accuracy_before;
        Ok(outcome)
    }

    /// One SGD step; returns the summed loss of the batch.
    fn step<S: SimilarityScorer + ?Sized>(
        &self,
        scorer: &mut S,
        catalog: &RelationCatalog,
        batch: &[Sample],
        fisher: Option<&FisherState>,
    ) -> Result<f64> {
        let gradient = ranking_gradient(&*scorer, catalog, batch, self.config.loss)?;
        if gradient.samples == 0 {
            return Ok(0.0);
        }

        let n = gradient.samples as f64;
        let mut grad = gradient.gradient / n;
        let mut loss = gradient.loss;

        if let Some(fisher) = fisher {
            let params = scorer.parameters();
            let lambda = self.config.fisher_lambda;
            grad.scaled_add(lambda, &fisher.penalty_gradient(&params)?);
            loss += lambda * fisher.penalty(&params)? * n;
        }

        if let Some(max_norm) = self.config.gradient_clip {
            clip_norm(&mut grad, max_norm);
        }

        scorer.apply_gradient(&grad, self.config.learning_rate)?;
        Ok(loss)
    }
}

/// Rescale the gradient so its L2 norm does not exceed `max_norm`.
fn clip_norm(grad: &mut Array1<f64>, max_norm: f64) {
    let norm = grad.dot(grad).sqrt();
    if norm > max_norm && norm > 0.0 {
        *grad *= max_norm / norm;
    }
}
