//! Ranking accuracy over the seen relations.

use crate::data::{RankingBatch, RelationCatalog, Sample};
use crate::model::reverse::ReverseModel;
use crate::model::SimilarityScorer;
use crate::training::loss::gold_ranked_first;
use crate::{Error, Result};

/// Fraction of samples whose gold relation scores highest among its candidates.
///
/// When `alignment` is given, embeddings are realigned before scoring. An
/// empty sample set has accuracy `0.0`.
pub fn evaluate_model<S: SimilarityScorer + ?Sized>(
    scorer: &S,
    alignment: Option<&ReverseModel>,
    samples: &[Sample],
    catalog: &RelationCatalog,
    batch_size: usize,
) -> Result<f64> {
    if samples.is_empty() {
        return Ok(0.0);
    }
    if batch_size == 0 {
        return Err(Error::InvalidParameter("batch_size must be positive".into()));
    }

    let mut correct = 0usize;
    for chunk in samples.chunks(batch_size) {
        let batch = RankingBatch::build(chunk, catalog)?;
        let scores = match alignment {
            Some(reverse) => reverse.score_batch(scorer, &batch),
            None => scorer.score(&batch.questions, &batch.relations)?,
        };
        correct += batch
            .sample_ranges()
            .into_iter()
            .filter(|range| gold_ranked_first(scores.slice(ndarray::s![range.clone()])))
            .count();
    }

    Ok(correct as f64 / samples.len() as f64)
}

/// Accuracy on each cumulative test partition.
pub fn evaluate_tasks<S: SimilarityScorer + ?Sized>(
    scorer: &S,
    alignment: Option<&ReverseModel>,
    partitions: &[Vec<Sample>],
    catalog: &RelationCatalog,
    batch_size: usize,
) -> Result<Vec<f64>> {
    partitions
        .iter()
        .map(|samples| evaluate_model(scorer, alignment, samples, catalog, batch_size))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::PaddedBatch;
    use crate::model::reverse::AlignmentScope;
    use ndarray::{Array1, Array2};

    /// Scorer whose embeddings are one-hot vectors of the first token.
    struct OneHotScorer {
        dim: usize,
    }

    impl OneHotScorer {
        fn embed(&self, batch: &PaddedBatch) -> Array2<f64> {
            let mut out = Array2::zeros((batch.len(), self.dim));
            for i in 0..batch.len() {
                if let Some(&token) = batch.row(i).iter().next() {
                    out[[i, token % self.dim]] = 1.0;
                }
            }
            out
        }
    }

    impl SimilarityScorer for OneHotScorer {
        fn output_dim(&self) -> usize {
            self.dim
        }
        fn embed_questions(&self, questions: &PaddedBatch) -> Array2<f64> {
            self.embed(questions)
        }
        fn embed_relations(&self, relations: &PaddedBatch) -> Array2<f64> {
            self.embed(relations)
        }
        fn backward(
            &self,
            _: &PaddedBatch,
            _: &PaddedBatch,
            _: &Array1<f64>,
        ) -> Result<Array1<f64>> {
            Ok(Array1::zeros(0))
        }
        fn parameters(&self) -> Array1<f64> {
            Array1::zeros(0)
        }
        fn set_parameters(&mut self, _: &Array1<f64>) -> Result<()> {
            Ok(())
        }
        fn num_parameters(&self) -> usize {
            0
        }
    }

    fn catalog() -> RelationCatalog {
        (0..4).map(|r| (r, vec![r + 1])).collect()
    }

    #[test]
    fn test_empty_samples_give_zero() {
        let scorer = OneHotScorer { dim: 8 };
        let accuracy = evaluate_model(&scorer, None, &[], &catalog(), 10).unwrap();
        assert_eq!(accuracy, 0.0);
    }

    #[test]
    fn test_accuracy_counts_gold_wins() {
        let scorer = OneHotScorer { dim: 8 };
        let samples = vec![
            // Question token matches relation 1 -> correct
            Sample::new(1, vec![1, 2], vec![2]),
            // Question token matches relation 2, gold is 0 -> wrong
            Sample::new(0, vec![0, 2], vec![3]),
            // Only the gold is scored -> correct
            Sample::new(3, vec![3], vec![7]),
        ];
        let accuracy = evaluate_model(&scorer, None, &samples, &catalog(), 2).unwrap();
        assert!((accuracy - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_identity_alignment_changes_nothing() {
        let scorer = OneHotScorer { dim: 8 };
        let reverse = ReverseModel::new(8, AlignmentScope::Both);
        let samples = vec![
            Sample::new(1, vec![1, 2], vec![2]),
            Sample::new(0, vec![0, 2], vec![3]),
        ];

        let plain = evaluate_model(&scorer, None, &samples, &catalog(), 4).unwrap();
        let aligned = evaluate_model(&scorer, Some(&reverse), &samples, &catalog(), 4).unwrap();
        assert_eq!(plain, aligned);
    }

    #[test]
    fn test_evaluate_tasks_per_partition() {
        let scorer = OneHotScorer { dim: 8 };
        let partitions = vec![vec![Sample::new(1, vec![1, 2], vec![2])], Vec::new()];
        let accuracies = evaluate_tasks(&scorer, None, &partitions, &catalog(), 4).unwrap();
        assert_eq!(accuracies, vec![1.0, 0.0]);
    }
}
