//! Ranking losses over a sample's candidate scores.
//!
//! The gold relation is always at index 0 of a sample's score vector.

use ndarray::{s, Array1, ArrayView1};
use serde::{Deserialize, Serialize};

use crate::data::RankingBatch;
use crate::model::check_rows;
use crate::Result;

/// Ranking objective.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum RankingLoss {
    /// Hinge on the gold score against the hardest negative.
    Margin {
        /// Required gap between gold and hardest negative.
        margin: f64,
    },
    /// Cross-entropy of the softmax over all candidates, target index 0.
    LogLikelihood,
}

impl Default for RankingLoss {
    fn default() -> Self {
        RankingLoss::Margin { margin: 0.5 }
    }
}

impl RankingLoss {
    /// Loss of one sample and its gradient with respect to the scores.
    ///
    /// A score vector with no negatives has zero loss and zero gradient.
    pub fn loss_and_grad(&self, scores: ArrayView1<'_, f64>) -> (f64, Array1<f64>) {
        let mut grad = Array1::zeros(scores.len());
        if scores.len() <= 1 {
            return (0.0, grad);
        }

        match *self {
            RankingLoss::Margin { margin } => {
                let (hardest, hardest_score) = scores
                    .iter()
                    .enumerate()
                    .skip(1)
                    .fold((1, f64::NEG_INFINITY), |best, (i, &s)| {
                        if s > best.1 {
                            (i, s)
                        } else {
                            best
                        }
                    });
                let loss = margin - scores[0] + hardest_score;
                if loss > 0.0 {
                    grad[0] = -1.0;
                    grad[hardest] = 1.0;
                    (loss, grad)
                } else {
                    (0.0, grad)
                }
            }
            RankingLoss::LogLikelihood => {
                let max = scores.fold(f64::NEG_INFINITY, |m, &s| m.max(s));
                let exp = scores.mapv(|s| (s - max).exp());
                let sum = exp.sum();
                let loss = -(scores[0] - max - sum.ln());
                grad.assign(&(exp / sum));
                grad[0] -= 1.0;
                (loss, grad)
            }
        }
    }

    /// Summed loss of a ranking batch and the gradient for every score row.
    pub fn batch_loss_and_grad(
        &self,
        scores: &Array1<f64>,
        batch: &RankingBatch,
    ) -> Result<(f64, Array1<f64>)> {
        check_rows(batch.num_pairs(), scores.len())?;

        let mut total = 0.0;
        let mut d_scores = Array1::zeros(scores.len());
        for range in batch.sample_ranges() {
            let (loss, grad) = self.loss_and_grad(scores.slice(s![range.clone()]));
            total += loss;
            d_scores.slice_mut(s![range]).assign(&grad);
        }
        Ok((total, d_scores))
    }
}

/// Whether the gold relation (index 0) wins the argmax; ties go to the gold.
pub fn gold_ranked_first(scores: ArrayView1<'_, f64>) -> bool {
    match scores.iter().next() {
        Some(&gold) => scores.iter().skip(1).all(|&s| s <= gold),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_margin_loss_active() {
        let loss = RankingLoss::Margin { margin: 0.5 };
        let scores = array![0.2, 0.1, 0.4];
        let (value, grad) = loss.loss_and_grad(scores.view());

        assert_abs_diff_eq!(value, 0.7, epsilon = 1e-12);
        assert_eq!(grad, array![-1.0, 0.0, 1.0]);
    }

    #[test]
    fn test_margin_loss_satisfied() {
        let loss = RankingLoss::Margin { margin: 0.1 };
        let (value, grad) = loss.loss_and_grad(array![0.9, 0.2].view());
        assert_eq!(value, 0.0);
        assert_eq!(grad.sum(), 0.0);
    }

    #[test]
    fn test_log_likelihood() {
        let loss = RankingLoss::LogLikelihood;
        let scores = array![1.0, 0.0];
        let (value, grad) = loss.loss_and_grad(scores.view());

        let p0 = 1.0f64.exp() / (1.0f64.exp() + 1.0);
        assert_abs_diff_eq!(value, -p0.ln(), epsilon = 1e-12);
        assert_abs_diff_eq!(grad[0], p0 - 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(grad.sum(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_single_candidate_has_no_loss() {
        for loss in [RankingLoss::LogLikelihood, RankingLoss::default()] {
            let (value, grad) = loss.loss_and_grad(array![0.3].view());
            assert_eq!(value, 0.0);
            assert_eq!(grad, array![0.0]);
        }
    }

    #[test]
    fn test_gold_ranked_first() {
        assert!(gold_ranked_first(array![0.5, 0.5, 0.1].view()));
        assert!(!gold_ranked_first(array![0.4, 0.5].view()));
        assert!(gold_ranked_first(array![0.1].view()));
        assert!(!gold_ranked_first(Array1::<f64>::zeros(0).view()));
    }
}
