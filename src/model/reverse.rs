//! Reverse model for embedding realignment.
//!
//! After every task the similarity model drifts, so embeddings cached for
//! memory exemplars no longer live in the same space as fresh embeddings.
//! The reverse model is a linear map trained on the memory to pull current
//! embeddings back toward the cached ones while keeping the ranking intact.

use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

use super::{cosine_rows, cosine_rows_backward, SimilarityScorer};
use crate::continual::memory::MemoryBank;
use crate::data::batch::{question_batch, RankingBatch};
use crate::data::RelationCatalog;
use crate::training::loss::RankingLoss;
use crate::{Error, Result};

/// Which embeddings the reverse model is applied to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AlignmentScope {
    /// Only question embeddings are realigned.
    #[default]
    Query,
    /// Question and relation embeddings are realigned.
    Both,
}

/// When the reverse model is refitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AlignmentCadence {
    /// Refit after every task.
    #[default]
    EveryTask,
    /// Never refit; the map stays at its initial identity.
    Never,
}

/// Hyper-parameters of a reverse-model fit.
#[derive(Debug, Clone, Copy)]
pub struct AlignmentFit {
    /// Passes over the memory.
    pub epochs: usize,
    /// Learning rate.
    pub learning_rate: f64,
    /// Samples per update.
    pub batch_size: usize,
    /// Weight of the distance to cached embeddings.
    pub alignment_weight: f64,
    /// Ranking objective.
    pub loss: RankingLoss,
}

/// Linear realignment map `x -> W x + b`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReverseModel {
    weight: Array2<f64>,
    bias: Array1<f64>,
    scope: AlignmentScope,
    fits: usize,
}

/// Per-batch inputs of a fit, computed once since the scorer is frozen.
struct FitBatch {
    ranking: RankingBatch,
    pair_questions: Array2<f64>,
    pair_relations: Array2<f64>,
    questions: Array2<f64>,
    cached: Array2<f64>,
}

impl ReverseModel {
    /// Create an identity map over `dim`-dimensional embeddings.
    pub fn new(dim: usize, scope: AlignmentScope) -> Self {
        Self {
            weight: Array2::eye(dim),
            bias: Array1::zeros(dim),
            scope,
            fits: 0,
        }
    }

    /// Embedding dimension.
    pub fn dim(&self) -> usize {
        self.bias.len()
    }

    /// Scope of the map.
    pub fn scope(&self) -> AlignmentScope {
        self.scope
    }

    /// Number of completed fits.
    pub fn fits(&self) -> usize {
        self.fits
    }

    /// Weight matrix.
    pub fn weight(&self) -> &Array2<f64> {
        &self.weight
    }

    /// Apply the map to each row [batch, dim].
    pub fn apply(&self, x: &Array2<f64>) -> Array2<f64> {
        x.dot(&self.weight.t()) + &self.bias
    }

    /// Realign question embeddings.
    pub fn align_questions(&self, questions: Array2<f64>) -> Array2<f64> {
        self.apply(&questions)
    }

    /// Realign relation embeddings when the scope covers them.
    pub fn align_relations(&self, relations: Array2<f64>) -> Array2<f64> {
        match self.scope {
            AlignmentScope::Both => self.apply(&relations),
            AlignmentScope::Query => relations,
        }
    }

    /// Score a ranking batch with realigned embeddings.
    pub fn score_batch<S: SimilarityScorer + ?Sized>(
        &self,
        scorer: &S,
        batch: &RankingBatch,
    ) -> Array1<f64> {
        let questions = self.align_questions(scorer.embed_questions(&batch.questions));
        let relations = self.align_relations(scorer.embed_relations(&batch.relations));
        cosine_rows(&questions, &relations)
    }

    /// Fit the map on every exemplar of the memory.
    ///
    /// The objective is the ranking loss on realigned scores plus
    /// `alignment_weight * ||W q + b - q_cached||^2`, averaged per sample.
    /// Returns the mean loss of the last epoch; an empty memory is a no-op.
    pub fn fit<S: SimilarityScorer + ?Sized>(
        &mut self,
        scorer: &S,
        memory: &MemoryBank,
        catalog: &RelationCatalog,
        params: &AlignmentFit,
    ) -> Result<f64> {
        if memory.is_empty() || params.epochs == 0 {
            return Ok(0.0);
        }
        if scorer.output_dim() != self.dim() {
            return Err(Error::ShapeMismatch {
                expected: self.dim(),
                actual: scorer.output_dim(),
            });
        }

        let batch_size = params.batch_size.max(1);
        let mut batches = Vec::new();
        for task in memory.tasks() {
            for (chunk_index, chunk) in task.samples().chunks(batch_size).enumerate() {
                let start = chunk_index * batch_size;
                let ranking = RankingBatch::build(chunk, catalog)?;
                batches.push(FitBatch {
                    pair_questions: scorer.embed_questions(&ranking.questions),
                    pair_relations: scorer.embed_relations(&ranking.relations),
                    questions: scorer.embed_questions(&question_batch(chunk)),
                    cached: task
                        .question_embeddings()
                        .slice(ndarray::s![start..start + chunk.len(), ..])
                        .to_owned(),
                    ranking,
                });
            }
        }

        let mut last_loss = 0.0;
        for epoch in 0..params.epochs {
            let mut epoch_loss = 0.0;
            let mut seen = 0;
            for batch in &batches {
                let n = batch.ranking.num_samples();
                let (loss, dw, db) = self.batch_gradient(batch, params)?;
                epoch_loss += loss;
                seen += n;
                self.weight.scaled_add(-params.learning_rate / n as f64, &dw);
                self.bias.scaled_add(-params.learning_rate / n as f64, &db);
            }
            last_loss = if seen == 0 { 0.0 } else { epoch_loss / seen as f64 };
            tracing::debug!("Reverse model epoch {}: loss = {:.6}", epoch + 1, last_loss);
        }

        self.fits += 1;
        Ok(last_loss)
    }

    fn batch_gradient(
        &self,
        batch: &FitBatch,
        params: &AlignmentFit,
    ) -> Result<(f64, Array2<f64>, Array1<f64>)> {
        let mut dw = Array2::zeros(self.weight.raw_dim());
        let mut db = Array1::zeros(self.bias.len());

        // Ranking term
        let u = self.apply(&batch.pair_questions);
        let v = self.align_relations(batch.pair_relations.clone());
        let scores = cosine_rows(&u, &v);
        let (mut loss, d_scores) = params.loss.batch_loss_and_grad(&scores, &batch.ranking)?;
        let (du, dv) = cosine_rows_backward(&u, &v, &d_scores);
        dw += &du.t().dot(&batch.pair_questions);
        db += &du.sum_axis(Axis(0));
        if self.scope == AlignmentScope::Both {
            dw += &dv.t().dot(&batch.pair_relations);
            db += &dv.sum_axis(Axis(0));
        }

        // Distance to the cached embeddings
        if params.alignment_weight > 0.0 {
            let diff = self.apply(&batch.questions) - &batch.cached;
            loss += params.alignment_weight * diff.mapv(|d| d * d).sum();
            let d_diff = diff * (2.0 * params.alignment_weight);
            dw += &d_diff.t().dot(&batch.questions);
            db += &d_diff.sum_axis(Axis(0));
        }

        Ok((loss, dw, db))
    }
}
