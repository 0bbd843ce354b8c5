//! Training of the similarity model.
//!
//! - `loss` - margin and log-likelihood ranking losses
//! - `trainer` - the per-task training driver

pub mod loss;
pub mod trainer;

pub use loss::RankingLoss;
pub use trainer::{TrainOutcome, Trainer, TrainerConfig};

use ndarray::Array1;

use crate::data::{RankingBatch, RelationCatalog, Sample};
use crate::model::SimilarityScorer;
use crate::Result;

/// Summed ranking loss of a batch and its parameter gradient.
#[derive(Debug, Clone)]
pub struct BatchGradient {
    /// Loss summed over the samples.
    pub loss: f64,
    /// Gradient of the summed loss.
    pub gradient: Array1<f64>,
    /// Number of samples in the batch.
    pub samples: usize,
}

/// Forward and backward pass of the ranking loss over a batch of samples.
///
/// An empty batch yields zero loss and a zero gradient.
pub fn ranking_gradient<S: SimilarityScorer + ?Sized>(
    scorer: &S,
    catalog: &RelationCatalog,
    samples: &[Sample],
    loss: RankingLoss,
) -> Result<BatchGradient> {
    if samples.is_empty() {
        return Ok(BatchGradient {
            loss: 0.0,
            gradient: Array1::zeros(scorer.num_parameters()),
            samples: 0,
        });
    }

    let batch = RankingBatch::build(samples, catalog)?;
    let scores = scorer.score(&batch.questions, &batch.relations)?;
    let (total, d_scores) = loss.batch_loss_and_grad(&scores, &batch)?;
    let gradient = scorer.backward(&batch.questions, &batch.relations, &d_scores)?;

    Ok(BatchGradient {
        loss: total,
        gradient,
        samples: samples.len(),
    })
}
