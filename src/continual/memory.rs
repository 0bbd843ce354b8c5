//! Episodic memory.
//!
//! After each task a small set of exemplars is chosen from the task's
//! training data and kept, together with the embeddings the model assigned
//! them at that time. Exemplars are replayed in later tasks and their cached
//! embeddings are the target the reverse model realigns toward.

use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::clustering::Clusterer;
use crate::data::batch::{gold_relation_batch, question_batch};
use crate::data::{RelationCatalog, RelationId, Sample};
use crate::model::reverse::ReverseModel;
use crate::model::{l2_normalize_rows, SimilarityScorer};
use crate::{Error, Result};

/// How exemplars are chosen from a task's training data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SelectionStrategy {
    /// Cluster normalised question embeddings and keep the sample nearest
    /// to each centroid.
    #[default]
    KMeansCentroid,
    /// Herding: greedily keep the running mean of the selection close to
    /// the task mean.
    IncrementalCentroid,
    /// The last samples of the task.
    Recency,
    /// Sample without replacement, weighted by gold-relation frequency.
    FrequencyWeighted,
}

impl SelectionStrategy {
    /// Whether the strategy looks at embeddings.
    pub fn needs_embeddings(&self) -> bool {
        matches!(
            self,
            SelectionStrategy::KMeansCentroid | SelectionStrategy::IncrementalCentroid
        )
    }

    /// Pick exactly `min(budget, samples.len())` distinct sample indices,
    /// returned in ascending order.
    ///
    /// `embeddings` holds one row per sample and is only read by strategies
    /// for which [`SelectionStrategy::needs_embeddings`] is true.
    pub fn select(
        &self,
        samples: &[Sample],
        embeddings: &Array2<f64>,
        budget: usize,
        clusterer: &dyn Clusterer,
        rng: &mut StdRng,
    ) -> Result<Vec<usize>> {
        let n = samples.len();
        let k = budget.min(n);
        if k == 0 {
            return Ok(Vec::new());
        }
        if self.needs_embeddings() && embeddings.nrows() != n {
            return Err(Error::ShapeMismatch {
                expected: n,
                actual: embeddings.nrows(),
            });
        }

        let mut chosen = match self {
            SelectionStrategy::KMeansCentroid => {
                nearest_to_centroids(&l2_normalize_rows(embeddings), k, clusterer, rng)?
            }
            SelectionStrategy::IncrementalCentroid => herding(&l2_normalize_rows(embeddings), k),
            SelectionStrategy::Recency => (n - k..n).collect(),
            SelectionStrategy::FrequencyWeighted => frequency_weighted(samples, k, rng)?,
        };
        chosen.sort_unstable();
        Ok(chosen)
    }
}

fn nearest_to_centroids(
    embeddings: &Array2<f64>,
    k: usize,
    clusterer: &dyn Clusterer,
    rng: &mut StdRng,
) -> Result<Vec<usize>> {
    let clustering = clusterer.cluster(embeddings, k, rng)?;
    let n = embeddings.nrows();
    let mut taken = vec![false; n];
    let mut chosen = Vec::with_capacity(k);

    for centroid in 0..k {
        let column = clustering.distances.column(centroid);
        let best = (0..n)
            .filter(|&i| !taken[i])
            .min_by(|&a, &b| column[a].total_cmp(&column[b]));
        if let Some(best) = best {
            taken[best] = true;
            chosen.push(best);
        }
    }
    Ok(chosen)
}

fn herding(embeddings: &Array2<f64>, k: usize) -> Vec<usize> {
    let n = embeddings.nrows();
    let target = embeddings
        .mean_axis(ndarray::Axis(0))
        .unwrap_or_else(|| Array1::zeros(embeddings.ncols()));
    let mut running: Array1<f64> = Array1::zeros(embeddings.ncols());
    let mut taken = vec![false; n];
    let mut chosen = Vec::with_capacity(k);

    for step in 1..=k {
        let mut best = None;
        let mut best_dist = f64::INFINITY;
        for i in (0..n).filter(|&i| !taken[i]) {
            let candidate = (&running + &embeddings.row(i)) / step as f64;
            let diff = &target - &candidate;
            let dist = diff.dot(&diff);
            if dist < best_dist {
                best_dist = dist;
                best = Some(i);
            }
        }
        if let Some(i) = best {
            taken[i] = true;
            running += &embeddings.row(i);
            chosen.push(i);
        }
    }
    chosen
}

fn frequency_weighted(samples: &[Sample], k: usize, rng: &mut StdRng) -> Result<Vec<usize>> {
    let mut frequency: HashMap<RelationId, usize> = HashMap::new();
    for sample in samples {
        *frequency.entry(sample.relation_id).or_insert(0) += 1;
    }

    let indices: Vec<usize> = (0..samples.len()).collect();
    let chosen = indices
        .choose_multiple_weighted(rng, k, |&i| frequency[&samples[i].relation_id] as f64)
        .map_err(|e| Error::InvalidParameter(format!("weighted selection failed: {}", e)))?
        .copied()
        .collect();
    Ok(chosen)
}

/// Embed questions and gold relations of `samples`, realigned when an
/// alignment is given.
pub fn embed_exemplars<S: SimilarityScorer + ?Sized>(
    scorer: &S,
    alignment: Option<&ReverseModel>,
    samples: &[Sample],
    catalog: &RelationCatalog,
) -> Result<(Array2<f64>, Array2<f64>)> {
    if samples.is_empty() {
        let dim = scorer.output_dim();
        return Ok((Array2::zeros((0, dim)), Array2::zeros((0, dim))));
    }

    let questions = scorer.embed_questions(&question_batch(samples));
    let relations = scorer.embed_relations(&gold_relation_batch(samples, catalog)?);
    Ok(match alignment {
        Some(reverse) => (
            reverse.align_questions(questions),
            reverse.align_relations(relations),
        ),
        None => (questions, relations),
    })
}

/// Exemplars of one task and their cached embeddings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskMemory {
    task: usize,
    samples: Vec<Sample>,
    question_embeddings: Array2<f64>,
    relation_embeddings: Array2<f64>,
}

impl TaskMemory {
    /// Task the exemplars came from.
    pub fn task(&self) -> usize {
        self.task
    }

    /// Exemplar samples.
    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    /// Cached question embeddings, one row per exemplar.
    pub fn question_embeddings(&self) -> &Array2<f64> {
        &self.question_embeddings
    }

    /// Cached gold relation embeddings, one row per exemplar.
    pub fn relation_embeddings(&self) -> &Array2<f64> {
        &self.relation_embeddings
    }

    /// Number of exemplars.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Check if the task kept no exemplars.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Episodic memory of every task learned so far.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryBank {
    tasks: Vec<TaskMemory>,
}

impl MemoryBank {
    /// Create an empty memory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the exemplars of a task and cache their embeddings.
    pub fn remember<S: SimilarityScorer + ?Sized>(
        &mut self,
        task: usize,
        exemplars: Vec<Sample>,
        scorer: &S,
        alignment: Option<&ReverseModel>,
        catalog: &RelationCatalog,
    ) -> Result<()> {
        let (question_embeddings, relation_embeddings) =
            embed_exemplars(scorer, alignment, &exemplars, catalog)?;
        tracing::debug!("Stored {} exemplars for task {}", exemplars.len(), task);

        self.tasks.push(TaskMemory {
            task,
            samples: exemplars,
            question_embeddings,
            relation_embeddings,
        });
        Ok(())
    }

    /// Recompute every cached embedding under the current model and alignment.
    pub fn refresh<S: SimilarityScorer + ?Sized>(
        &mut self,
        scorer: &S,
        alignment: Option<&ReverseModel>,
        catalog: &RelationCatalog,
    ) -> Result<()> {
        for memory in &mut self.tasks {
            let (questions, relations) =
                embed_exemplars(scorer, alignment, &memory.samples, catalog)?;
            memory.question_embeddings = questions;
            memory.relation_embeddings = relations;
        }
        Ok(())
    }

    /// Exemplars of every task, in task order.
    pub fn replay_samples(&self) -> Vec<Sample> {
        self.tasks
            .iter()
            .flat_map(|memory| memory.samples.iter().cloned())
            .collect()
    }

    /// Memory of every task.
    pub fn tasks(&self) -> &[TaskMemory] {
        &self.tasks
    }

    /// Memory stored for a given task index.
    pub fn task(&self, task: usize) -> Option<&TaskMemory> {
        self.tasks.iter().find(|memory| memory.task == task)
    }

    /// Cached question and relation embeddings of a task.
    pub fn cached_embeddings(&self, task: usize) -> Option<(&Array2<f64>, &Array2<f64>)> {
        self.task(task)
            .map(|memory| (&memory.question_embeddings, &memory.relation_embeddings))
    }

    /// Total number of exemplars.
    pub fn len(&self) -> usize {
        self.tasks.iter().map(TaskMemory::len).sum()
    }

    /// Number of tasks with a memory entry.
    pub fn num_tasks(&self) -> usize {
        self.tasks.len()
    }

    /// Check if no exemplar is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::continual::clustering::KMeans;
    use crate::data::synthetic::{SyntheticConfig, SyntheticDataSource};
    use crate::data::DataSource;
    use crate::model::encoder::PooledEncoderScorer;
    use crate::model::reverse::{AlignmentFit, AlignmentScope};
    use crate::training::RankingLoss;
    use rand::SeedableRng;

    fn setup() -> (PooledEncoderScorer, crate::data::Dataset, StdRng) {
        let dataset = SyntheticDataSource::new(SyntheticConfig {
            num_relations: 4,
            num_clusters: 2,
            train_per_relation: 6,
            candidates_per_sample: 3,
            ..SyntheticConfig::default()
        })
        .load()
        .unwrap();
        let mut rng = StdRng::seed_from_u64(3);
        let scorer = PooledEncoderScorer::new(dataset.word_embeddings.clone(), 6, &mut rng);
        (scorer, dataset, rng)
    }

    const ALL: [SelectionStrategy; 4] = [
        SelectionStrategy::KMeansCentroid,
        SelectionStrategy::IncrementalCentroid,
        SelectionStrategy::Recency,
        SelectionStrategy::FrequencyWeighted,
    ];

    #[test]
    fn test_selection_respects_budget() {
        let (scorer, dataset, mut rng) = setup();
        let samples = &dataset.train;
        let (embeddings, _) = embed_exemplars(&scorer, None, samples, &dataset.catalog).unwrap();
        let clusterer = KMeans::default();

        for strategy in ALL {
            for budget in [0, 1, 5, samples.len(), samples.len() + 10] {
                let chosen = strategy
                    .select(samples, &embeddings, budget, &clusterer, &mut rng)
                    .unwrap();
                assert_eq!(chosen.len(), budget.min(samples.len()), "{:?}", strategy);

                let mut unique = chosen.clone();
                unique.dedup();
                assert_eq!(unique.len(), chosen.len());
                assert!(chosen.windows(2).all(|w| w[0] < w[1]));
                assert!(chosen.iter().all(|&i| i < samples.len()));
            }
        }
    }

    #[test]
    fn test_recency_keeps_last_samples() {
        let (_, dataset, mut rng) = setup();
        let chosen = SelectionStrategy::Recency
            .select(&dataset.train, &Array2::zeros((0, 0)), 3, &KMeans::default(), &mut rng)
            .unwrap();
        let n = dataset.train.len();
        assert_eq!(chosen, vec![n - 3, n - 2, n - 1]);
    }

    #[test]
    fn test_herding_picks_mean_first() {
        let embeddings = ndarray::array![[1.0, 0.0], [0.0, 1.0], [1.0, 1.0]];
        let chosen = herding(&l2_normalize_rows(&embeddings), 1);
        assert_eq!(chosen, vec![2]);
    }

    #[test]
    fn test_selection_rejects_mismatched_embeddings() {
        let (_, dataset, mut rng) = setup();
        let result = SelectionStrategy::KMeansCentroid.select(
            &dataset.train,
            &Array2::zeros((2, 6)),
            3,
            &KMeans::default(),
            &mut rng,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_memory_bank_remember_and_replay() {
        let (scorer, dataset, _) = setup();
        let mut bank = MemoryBank::new();
        assert!(bank.is_empty());

        bank.remember(0, dataset.train[..3].to_vec(), &scorer, None, &dataset.catalog)
            .unwrap();
        bank.remember(1, dataset.train[5..7].to_vec(), &scorer, None, &dataset.catalog)
            .unwrap();

        assert_eq!(bank.len(), 5);
        assert_eq!(bank.num_tasks(), 2);
        assert_eq!(bank.replay_samples().len(), 5);
        assert_eq!(bank.replay_samples()[3], dataset.train[5]);

        let (questions, relations) = bank.cached_embeddings(1).unwrap();
        assert_eq!(questions.dim(), (2, scorer.output_dim()));
        assert_eq!(relations.dim(), (2, scorer.output_dim()));
        assert!(bank.cached_embeddings(4).is_none());
    }

    #[test]
    fn test_refresh_tracks_model_changes() {
        let (mut scorer, dataset, _) = setup();
        let mut bank = MemoryBank::new();
        bank.remember(0, dataset.train[..4].to_vec(), &scorer, None, &dataset.catalog)
            .unwrap();
        let before = bank.tasks()[0].question_embeddings().clone();

        let params = scorer.parameters().mapv(|p| p * 0.5 + 0.01);
        scorer.set_parameters(&params).unwrap();
        bank.refresh(&scorer, None, &dataset.catalog).unwrap();

        let after = bank.tasks()[0].question_embeddings();
        assert_eq!(after.dim(), before.dim());
        assert_ne!(after, &before);
        assert_eq!(bank.tasks()[0].samples(), &dataset.train[..4]);
    }

    #[test]
    fn test_reverse_fit_on_memory() {
        let (mut scorer, dataset, _) = setup();
        let mut bank = MemoryBank::new();
        bank.remember(0, dataset.train[..6].to_vec(), &scorer, None, &dataset.catalog)
            .unwrap();

        // Drift the model so cached and fresh embeddings disagree
        let params = scorer.parameters().mapv(|p| p * 0.8);
        scorer.set_parameters(&params).unwrap();

        let mut reverse = ReverseModel::new(scorer.output_dim(), AlignmentScope::Query);
        let fit = AlignmentFit {
            epochs: 5,
            learning_rate: 0.1,
            batch_size: 4,
            alignment_weight: 1.0,
            loss: RankingLoss::LogLikelihood,
        };
        let loss = reverse.fit(&scorer, &bank, &dataset.catalog, &fit).unwrap();

        assert!(loss.is_finite());
        assert_eq!(reverse.fits(), 1);
        assert_ne!(reverse.weight(), &Array2::<f64>::eye(scorer.output_dim()));
    }

    #[test]
    fn test_reverse_fit_reduces_drift() {
        let (mut scorer, dataset, _) = setup();
        let exemplars = dataset.train[..8].to_vec();
        let mut bank = MemoryBank::new();
        bank.remember(0, exemplars.clone(), &scorer, None, &dataset.catalog)
            .unwrap();

        let params = scorer.parameters().mapv(|p| p * 0.7 + 0.02);
        scorer.set_parameters(&params).unwrap();

        let drift = |reverse: &ReverseModel| -> f64 {
            let (current, _) =
                embed_exemplars(&scorer, Some(reverse), &exemplars, &dataset.catalog).unwrap();
            let diff = current - bank.tasks()[0].question_embeddings();
            diff.mapv(|d| d * d).sum()
        };

        let mut reverse = ReverseModel::new(scorer.output_dim(), AlignmentScope::Query);
        let before = drift(&reverse);
        let fit = AlignmentFit {
            epochs: 10,
            learning_rate: 0.02,
            batch_size: 4,
            alignment_weight: 5.0,
            loss: RankingLoss::LogLikelihood,
        };
        reverse.fit(&scorer, &bank, &dataset.catalog, &fit).unwrap();

        assert!(before > 0.0);
        assert!(drift(&reverse) < before);
    }

    #[test]
    fn test_reverse_fit_on_empty_memory_is_noop() {
        let (scorer, dataset, _) = setup();
        let mut reverse = ReverseModel::new(scorer.output_dim(), AlignmentScope::Query);
        let fit = AlignmentFit {
            epochs: 3,
            learning_rate: 0.1,
            batch_size: 4,
            alignment_weight: 1.0,
            loss: RankingLoss::default(),
        };
        let loss = reverse.fit(&scorer, &MemoryBank::new(), &dataset.catalog, &fit).unwrap();
        assert_eq!(loss, 0.0);
        assert_eq!(reverse.fits(), 0);
    }
}
