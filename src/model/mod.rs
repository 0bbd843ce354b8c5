//! Similarity scoring models.
//!
//! This module provides:
//! - The [`SimilarityScorer`] interface the continual-learning loop drives
//! - A trainable reference scorer over pooled word embeddings
//! - The reverse model used to realign drifted embeddings

pub mod encoder;
pub mod reverse;

use ndarray::{Array1, Array2, Axis, Zip};

use crate::data::{PaddedBatch, TokenId};
use crate::{Error, Result};

/// Norms below this value are clamped when computing cosine similarity.
pub const NORM_EPS: f64 = 1e-8;

/// A trainable model scoring the affinity of a question and a relation.
///
/// Parameters are exposed as one flat vector; `backward` returns gradients
/// in the same order, which lets the trainer and the Fisher tracker work on
/// any implementation.
pub trait SimilarityScorer {
    /// Dimension of question and relation embeddings.
    fn output_dim(&self) -> usize;

    /// Embed every question in the batch [batch_size, output_dim].
    fn embed_questions(&self, questions: &PaddedBatch) -> Array2<f64>;

    /// Embed every relation in the batch [batch_size, output_dim].
    fn embed_relations(&self, relations: &PaddedBatch) -> Array2<f64>;

    /// Gradient of `sum_i d_scores[i] * score_i` with respect to all parameters.
    fn backward(
        &self,
        questions: &PaddedBatch,
        relations: &PaddedBatch,
        d_scores: &Array1<f64>,
    ) -> Result<Array1<f64>>;

    /// All trainable parameters as a flat vector.
    fn parameters(&self) -> Array1<f64>;

    /// Overwrite all trainable parameters.
    fn set_parameters(&mut self, params: &Array1<f64>) -> Result<()>;

    /// Number of trainable parameters.
    fn num_parameters(&self) -> usize;

    /// Score each (question, relation) row pair.
    fn score(&self, questions: &PaddedBatch, relations: &PaddedBatch) -> Result<Array1<f64>> {
        check_rows(questions.len(), relations.len())?;
        self.scores_from_embeddings(
            &self.embed_questions(questions),
            &self.embed_relations(relations),
        )
    }

    /// Score already embedded rows, e.g. cached or realigned embeddings.
    fn scores_from_embeddings(
        &self,
        questions: &Array2<f64>,
        relations: &Array2<f64>,
    ) -> Result<Array1<f64>> {
        check_rows(questions.nrows(), relations.nrows())?;
        Ok(cosine_rows(questions, relations))
    }

    /// Score a single question against a single relation.
    fn score_pair(&self, question: &[TokenId], relation: &[TokenId]) -> Result<f64> {
        let scores = self.score(
            &PaddedBatch::from_sequences([question]),
            &PaddedBatch::from_sequences([relation]),
        )?;
        Ok(scores[0])
    }

    /// Apply one SGD step with the given flat gradient.
    fn apply_gradient(&mut self, gradient: &Array1<f64>, learning_rate: f64) -> Result<()> {
        let mut params = self.parameters();
        if gradient.len() != params.len() {
            return Err(Error::ShapeMismatch {
                expected: params.len(),
                actual: gradient.len(),
            });
        }
        params.scaled_add(-learning_rate, gradient);
        self.set_parameters(&params)
    }
}

pub(crate) fn check_rows(expected: usize, actual: usize) -> Result<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(Error::ShapeMismatch { expected, actual })
    }
}

/// Cosine similarity of matching rows.
pub fn cosine_rows(a: &Array2<f64>, b: &Array2<f64>) -> Array1<f64> {
    let mut out = Array1::zeros(a.nrows());
    Zip::from(&mut out)
        .and(a.rows())
        .and(b.rows())
        .for_each(|out, a, b| {
            let na = a.dot(&a).sqrt().max(NORM_EPS);
            let nb = b.dot(&b).sqrt().max(NORM_EPS);
            *out = a.dot(&b) / (na * nb);
        });
    out
}

/// Backpropagate `d_scores` through [`cosine_rows`].
///
/// Returns the gradients with respect to `a` and `b`.
pub fn cosine_rows_backward(
    a: &Array2<f64>,
    b: &Array2<f64>,
    d_scores: &Array1<f64>,
) -> (Array2<f64>, Array2<f64>) {
    let mut da = Array2::zeros(a.raw_dim());
    let mut db = Array2::zeros(b.raw_dim());

    for (i, &d) in d_scores.iter().enumerate() {
        if d == 0.0 {
            continue;
        }
        let (ra, rb) = (a.row(i), b.row(i));
        let na = ra.dot(&ra).sqrt().max(NORM_EPS);
        let nb = rb.dot(&rb).sqrt().max(NORM_EPS);
        let cos = ra.dot(&rb) / (na * nb);

        // d cos / d a = b / (|a||b|) - cos * a / |a|^2
        let ga = &rb / (na * nb) - &ra * (cos / (na * na));
        let gb = &ra / (na * nb) - &rb * (cos / (nb * nb));
        da.row_mut(i).scaled_add(d, &ga);
        db.row_mut(i).scaled_add(d, &gb);
    }

    (da, db)
}

/// Scale every row to unit L2 norm; zero rows stay zero.
pub fn l2_normalize_rows(x: &Array2<f64>) -> Array2<f64> {
    let mut out = x.clone();
    for mut row in out.axis_iter_mut(Axis(0)) {
        let norm = row.dot(&row).sqrt();
        if norm > NORM_EPS {
            row /= norm;
        }
    }
    out
}
