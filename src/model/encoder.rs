//! Pooled-embedding similarity model.
//!
//! Architecture:
//! - Frozen word embeddings, mean-pooled over the real tokens of a sequence
//! - Separate question and relation encoders: tanh(W x + b)
//! - Cosine similarity between the two encodings

use ndarray::{Array1, Array2, Axis};
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::{check_rows, cosine_rows_backward, SimilarityScorer};
use crate::data::PaddedBatch;
use crate::{Error, Result};

/// Single dense layer with tanh activation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Encoder {
    /// Weights [hidden_dim, embedding_dim]
    weight: Array2<f64>,
    /// Bias [hidden_dim]
    bias: Array1<f64>,
}

impl Encoder {
    /// Create an encoder with Xavier-uniform weights and zero bias.
    pub fn new<R: Rng + ?Sized>(input_dim: usize, hidden_dim: usize, rng: &mut R) -> Self {
        let limit = (6.0 / (input_dim + hidden_dim) as f64).sqrt();
        Self {
            weight: Array2::random_using((hidden_dim, input_dim), Uniform::new(-limit, limit), rng),
            bias: Array1::zeros(hidden_dim),
        }
    }

    fn num_parameters(&self) -> usize {
        self.weight.len() + self.bias.len()
    }

    /// Forward pass on pooled inputs [batch, input_dim] -> [batch, hidden_dim].
    pub fn forward(&self, pooled: &Array2<f64>) -> Array2<f64> {
        (pooled.dot(&self.weight.t()) + &self.bias).mapv(f64::tanh)
    }

    /// Gradients of weight and bias given the activations and their upstream gradient.
    fn backward(
        &self,
        pooled: &Array2<f64>,
        activations: &Array2<f64>,
        d_activations: &Array2<f64>,
    ) -> (Array2<f64>, Array1<f64>) {
        // tanh'(z) = 1 - tanh(z)^2
        let dz = d_activations * &activations.mapv(|h| 1.0 - h * h);
        (dz.t().dot(pooled), dz.sum_axis(Axis(0)))
    }

    fn write_parameters(&self, out: &mut Vec<f64>) {
        out.extend(self.weight.iter());
        out.extend(self.bias.iter());
    }

    fn read_parameters(&mut self, params: &[f64]) -> Result<usize> {
        let (rows, cols) = self.weight.dim();
        let n_weight = rows * cols;
        let total = n_weight + rows;
        if params.len() < total {
            return Err(Error::ShapeMismatch {
                expected: total,
                actual: params.len(),
            });
        }
        self.weight = Array2::from_shape_vec((rows, cols), params[..n_weight].to_vec())
            .map_err(|e| Error::InvalidParameter(e.to_string()))?;
        self.bias = Array1::from(params[n_weight..total].to_vec());
        Ok(total)
    }
}

/// Similarity model over mean-pooled word embeddings.
///
/// Word embeddings are shared by both encoders and are not trained; the
/// trainable parameters are the question encoder followed by the relation
/// encoder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PooledEncoderScorer {
    word_embeddings: Array2<f64>,
    question_encoder: Encoder,
    relation_encoder: Encoder,
    hidden_dim: usize,
}

impl PooledEncoderScorer {
    /// Create a new scorer around pre-trained word embeddings.
    pub fn new<R: Rng + ?Sized>(
        word_embeddings: Array2<f64>,
        hidden_dim: usize,
        rng: &mut R,
    ) -> Self {
        let embedding_dim = word_embeddings.ncols();
        let question_encoder = Encoder::new(embedding_dim, hidden_dim, rng);
        let relation_encoder = Encoder::new(embedding_dim, hidden_dim, rng);

        Self {
            word_embeddings,
            question_encoder,
            relation_encoder,
            hidden_dim,
        }
    }

    /// Word embedding dimension.
    pub fn embedding_dim(&self) -> usize {
        self.word_embeddings.ncols()
    }

    /// Mean of the word embeddings of each sequence [batch, embedding_dim].
    ///
    /// Padding is ignored; an empty sequence pools to the zero vector.
    pub fn pool(&self, batch: &PaddedBatch) -> Array2<f64> {
        let mut pooled = Array2::zeros((batch.len(), self.embedding_dim()));
        for (i, mut row) in pooled.axis_iter_mut(Axis(0)).enumerate() {
            let tokens = batch.row(i);
            if tokens.is_empty() {
                continue;
            }
            for &token in tokens.iter() {
                row += &self.word_embeddings.row(token);
            }
            row /= tokens.len() as f64;
        }
        pooled
    }
}

impl SimilarityScorer for PooledEncoderScorer {
    fn output_dim(&self) -> usize {
        self.hidden_dim
    }

    fn embed_questions(&self, questions: &PaddedBatch) -> Array2<f64> {
        self.question_encoder.forward(&self.pool(questions))
    }

    fn embed_relations(&self, relations: &PaddedBatch) -> Array2<f64> {
        self.relation_encoder.forward(&self.pool(relations))
    }

    fn backward(
        &self,
        questions: &PaddedBatch,
        relations: &PaddedBatch,
        d_scores: &Array1<f64>,
    ) -> Result<Array1<f64>> {
        check_rows(questions.len(), relations.len())?;
        check_rows(questions.len(), d_scores.len())?;

        let q_pooled = self.pool(questions);
        let r_pooled = self.pool(relations);
        let q_hidden = self.question_encoder.forward(&q_pooled);
        let r_hidden = self.relation_encoder.forward(&r_pooled);

        let (dq, dr) = cosine_rows_backward(&q_hidden, &r_hidden, d_scores);
        let (dwq, dbq) = self.question_encoder.backward(&q_pooled, &q_hidden, &dq);
        let (dwr, dbr) = self.relation_encoder.backward(&r_pooled, &r_hidden, &dr);

        let mut grad = Vec::with_capacity(self.num_parameters());
        grad.extend(dwq.iter());
        grad.extend(dbq.iter());
        grad.extend(dwr.iter());
        grad.extend(dbr.iter());
        Ok(Array1::from(grad))
    }

    fn parameters(&self) -> Array1<f64> {
        let mut params = Vec::with_capacity(self.num_parameters());
        self.question_encoder.write_parameters(&mut params);
        self.relation_encoder.write_parameters(&mut params);
        Array1::from(params)
    }

    fn set_parameters(&mut self, params: &Array1<f64>) -> Result<()> {
        if params.len() != self.num_parameters() {
            return Err(Error::ShapeMismatch {
                expected: self.num_parameters(),
                actual: params.len(),
            });
        }
        let params = params.to_vec();
        let used = self.question_encoder.read_parameters(&params)?;
        self.relation_encoder.read_parameters(&params[used..])?;
        Ok(())
    }

    fn num_parameters(&self) -> usize {
        self.question_encoder.num_parameters() + self.relation_encoder.num_parameters()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn create_test_scorer() -> PooledEncoderScorer {
        let mut rng = StdRng::seed_from_u64(3);
        let embeddings = Array2::random_using((6, 4), Uniform::new(-1.0, 1.0), &mut rng);
        PooledEncoderScorer::new(embeddings, 5, &mut rng)
    }

    #[test]
    fn test_parameter_count() {
        let scorer = create_test_scorer();
        assert_eq!(scorer.num_parameters(), 2 * (5 * 4 + 5));
        assert_eq!(scorer.parameters().len(), scorer.num_parameters());
    }

    #[test]
    fn test_parameters_roundtrip() {
        let mut scorer = create_test_scorer();
        let params = scorer.parameters().mapv(|p| p * 0.5);
        scorer.set_parameters(&params).unwrap();
        assert_eq!(scorer.parameters(), params);

        assert!(scorer.set_parameters(&array![1.0, 2.0]).is_err());
    }

    #[test]
    fn test_pool_ignores_padding() {
        let scorer = create_test_scorer();
        let batch = PaddedBatch::from_sequences(vec![vec![1, 2], vec![1], vec![]]);
        let pooled = scorer.pool(&batch);

        let expected = (&scorer.word_embeddings.row(1) + &scorer.word_embeddings.row(2)) / 2.0;
        for j in 0..4 {
            assert_abs_diff_eq!(pooled[[0, j]], expected[j], epsilon = 1e-12);
            assert_abs_diff_eq!(pooled[[1, j]], scorer.word_embeddings[[1, j]], epsilon = 1e-12);
            assert_eq!(pooled[[2, j]], 0.0);
        }
    }

    #[test]
    fn test_backward_matches_finite_difference() {
        let mut scorer = create_test_scorer();
        let questions = PaddedBatch::from_sequences(vec![vec![1, 2, 3], vec![4]]);
        let relations = PaddedBatch::from_sequences(vec![vec![5], vec![2, 5]]);
        let d_scores = array![1.0, -0.5];

        let objective = |s: &PooledEncoderScorer| -> f64 {
            s.score(&questions, &relations).unwrap().dot(&d_scores)
        };

        let grad = scorer.backward(&questions, &relations, &d_scores).unwrap();
        let base = scorer.parameters();
        let eps = 1e-6;
        for p in [0, 7, 20, 23, 31, 49] {
            let mut shifted = base.clone();
            shifted[p] += eps;
            scorer.set_parameters(&shifted).unwrap();
            let up = objective(&scorer);
            shifted[p] -= 2.0 * eps;
            scorer.set_parameters(&shifted).unwrap();
            let down = objective(&scorer);
            scorer.set_parameters(&base).unwrap();

            assert_abs_diff_eq!(grad[p], (up - down) / (2.0 * eps), epsilon = 1e-5);
        }
    }

    #[test]
    fn test_score_pair_in_range() {
        let scorer = create_test_scorer();
        let score = scorer.score_pair(&[1, 2], &[3]).unwrap();
        assert!((-1.0..=1.0).contains(&score));
    }
}
