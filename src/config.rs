//! Experiment configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::continual::fisher::FisherMerge;
use crate::continual::graph::{CandidateSampling, DEFAULT_QUESTION_CACHE};
use crate::continual::memory::SelectionStrategy;
use crate::continual::strategy::StrategyKind;
use crate::model::reverse::{AlignmentCadence, AlignmentFit, AlignmentScope};
use crate::training::{RankingLoss, TrainerConfig};
use crate::{Error, Result};

/// Every knob of a continual-learning experiment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentConfig {
    /// Word embedding dimension expected from the data source.
    pub embedding_dim: usize,
    /// Output dimension of the similarity model.
    pub hidden_dim: usize,
    /// Samples per training, evaluation and Fisher batch.
    pub batch_size: usize,
    /// Compute device; only "cpu" is available.
    pub device: String,
    /// Number of relation clusters, i.e. tasks.
    pub num_clusters: usize,
    /// Learning rate of the similarity model.
    pub learning_rate: f64,
    /// Learning rate of the reverse model.
    pub reverse_learning_rate: f64,
    /// Where to checkpoint the model after every task.
    pub model_path: Option<PathBuf>,
    /// Where to write the relation-embedding artifact after every run.
    pub artifact_path: Option<PathBuf>,
    /// Training epochs per task.
    pub epochs: usize,
    /// Reverse-model epochs per fit.
    pub reverse_epochs: usize,
    /// Base random seed; run `i` uses `seed + i`.
    pub seed: u64,
    /// Exemplars kept per task.
    pub task_memory_size: usize,
    /// Ranking objective.
    pub loss: RankingLoss,
    /// Independent runs with different task orders.
    pub num_runs: usize,
    /// Steps of a random walk over the relation graph.
    pub walk_length: usize,
    /// Negatives drawn for a replayed exemplar.
    pub candidates_per_sample: usize,
    /// Forgetting-mitigation strategy.
    pub strategy: StrategyKind,
    /// Exemplar selection.
    pub selection: SelectionStrategy,
    /// Candidate rewriting for replayed exemplars.
    pub candidate_sampling: CandidateSampling,
    /// Questions the relation graph caches per relation.
    pub question_cache_size: usize,
    /// Extra replay samples drawn by walks over the relation graph.
    pub graph_replay_samples: usize,
    /// How Fisher importance is merged across tasks.
    pub fisher_merge: FisherMerge,
    /// Strength of the Fisher penalty.
    pub fisher_lambda: f64,
    /// Embeddings the reverse model applies to.
    pub alignment_scope: AlignmentScope,
    /// When the reverse model is refitted.
    pub alignment_cadence: AlignmentCadence,
    /// Weight of the distance to cached embeddings in the reverse fit.
    pub alignment_weight: f64,
    /// Maximum gradient norm of a training step.
    pub gradient_clip: Option<f64>,
    /// Shuffle the training stream every epoch.
    pub shuffle_batches: bool,
    /// Iteration cap of the reference k-means.
    pub kmeans_iterations: usize,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            embedding_dim: 16,
            hidden_dim: 16,
            batch_size: 50,
            device: "cpu".to_string(),
            num_clusters: 4,
            learning_rate: 0.05,
            reverse_learning_rate: 0.01,
            model_path: None,
            artifact_path: None,
            epochs: 3,
            reverse_epochs: 3,
            seed: 100,
            task_memory_size: 50,
            loss: RankingLoss::default(),
            num_runs: 1,
            walk_length: 3,
            candidates_per_sample: 10,
            strategy: StrategyKind::default(),
            selection: SelectionStrategy::default(),
            candidate_sampling: CandidateSampling::default(),
            question_cache_size: DEFAULT_QUESTION_CACHE,
            graph_replay_samples: 0,
            fisher_merge: FisherMerge::default(),
            fisher_lambda: 1.0,
            alignment_scope: AlignmentScope::default(),
            alignment_cadence: AlignmentCadence::default(),
            alignment_weight: 1.0,
            gradient_clip: Some(5.0),
            shuffle_batches: true,
            kmeans_iterations: 50,
        }
    }
}

impl ExperimentConfig {
    /// Load a configuration from a JSON file; missing fields take defaults.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Check that the configuration can drive an experiment.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(Error::InvalidParameter(msg.to_string()));

        if self.batch_size == 0 {
            return invalid("batch_size must be positive");
        }
        if self.num_clusters == 0 {
            return invalid("num_clusters must be positive");
        }
        if self.num_runs == 0 {
            return invalid("num_runs must be positive");
        }
        if self.hidden_dim == 0 {
            return invalid("hidden_dim must be positive");
        }
        if self.learning_rate <= 0.0 {
            return invalid("learning_rate must be positive");
        }
        if self.reverse_learning_rate <= 0.0 {
            return invalid("reverse_learning_rate must be positive");
        }
        if self.fisher_lambda < 0.0 || self.alignment_weight < 0.0 {
            return invalid("fisher_lambda and alignment_weight must not be negative");
        }
        if let RankingLoss::Margin { margin } = self.loss {
            if margin < 0.0 {
                return invalid("margin must not be negative");
            }
        }
        if self.graph_replay_samples > 0 && self.question_cache_size == 0 {
            return invalid("graph_replay_samples needs a non-empty question cache");
        }
        if self.device != "cpu" {
            tracing::warn!("Device {:?} is not available, running on cpu", self.device);
        }
        Ok(())
    }

    /// Settings of the per-task training driver.
    pub fn trainer_config(&self) -> TrainerConfig {
        TrainerConfig {
            epochs: self.epochs,
            batch_size: self.batch_size,
            learning_rate: self.learning_rate,
            loss: self.loss,
            shuffle: self.shuffle_batches,
            gradient_clip: self.gradient_clip,
            fisher_lambda: self.fisher_lambda,
        }
    }

    /// Settings of a reverse-model fit.
    pub fn alignment_fit(&self) -> AlignmentFit {
        AlignmentFit {
            epochs: self.reverse_epochs,
            learning_rate: self.reverse_learning_rate,
            batch_size: self.batch_size,
            alignment_weight: self.alignment_weight,
            loss: self.loss,
        }
    }

    /// Set the number of clusters (tasks).
    pub fn with_num_clusters(mut self, num_clusters: usize) -> Self {
        self.num_clusters = num_clusters;
        self
    }

    /// Set the forgetting-mitigation strategy.
    pub fn with_strategy(mut self, strategy: StrategyKind) -> Self {
        self.strategy = strategy;
        self
    }

    /// Set the exemplar selection.
    pub fn with_selection(mut self, selection: SelectionStrategy) -> Self {
        self.selection = selection;
        self
    }

    /// Set the candidate sampling of replayed exemplars.
    pub fn with_candidate_sampling(mut self, sampling: CandidateSampling) -> Self {
        self.candidate_sampling = sampling;
        self
    }

    /// Cache `cache_size` questions per relation and replay `samples`
    /// graph-drawn samples per task.
    pub fn with_graph_replay(mut self, cache_size: usize, samples: usize) -> Self {
        self.question_cache_size = cache_size;
        self.graph_replay_samples = samples;
        self
    }

    /// Set the Fisher merge rule.
    pub fn with_fisher_merge(mut self, merge: FisherMerge) -> Self {
        self.fisher_merge = merge;
        self
    }

    /// Set the ranking loss.
    pub fn with_loss(mut self, loss: RankingLoss) -> Self {
        self.loss = loss;
        self
    }

    /// Set the seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Set the number of runs.
    pub fn with_num_runs(mut self, num_runs: usize) -> Self {
        self.num_runs = num_runs;
        self
    }

    /// Set training epochs per task.
    pub fn with_epochs(mut self, epochs: usize) -> Self {
        self.epochs = epochs;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_learning_rate(mut self, lr: f64) -> Self {
        self.learning_rate = lr;
        self
    }

    /// Set the output dimension of the similarity model.
    pub fn with_hidden_dim(mut self, hidden_dim: usize) -> Self {
        self.hidden_dim = hidden_dim;
        self
    }

    /// Set the exemplar budget per task.
    pub fn with_task_memory_size(mut self, size: usize) -> Self {
        self.task_memory_size = size;
        self
    }

    /// Set alignment scope and cadence.
    pub fn with_alignment(mut self, scope: AlignmentScope, cadence: AlignmentCadence) -> Self {
        self.alignment_scope = scope;
        self.alignment_cadence = cadence;
        self
    }

    /// Checkpoint the model to `path` after every task.
    pub fn with_model_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.model_path = Some(path.into());
        self
    }

    /// Write the relation-embedding artifact to `path`.
    pub fn with_artifact_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.artifact_path = Some(path.into());
        self
    }
}
