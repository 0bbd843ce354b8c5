//! The continual-learning control loop.
//!
//! One run partitions the relations into a shuffled task sequence and then,
//! for every task:
//!
//! 1. extends the seen-relation set with the task's gold relations
//! 2. filters the task's data against the seen set
//! 3. trains on the task data plus replayed exemplars
//! 4. lets the strategy update memory, Fisher importance and alignment
//! 5. evaluates on every test partition seen so far
//!
//! Several runs with different task orders are averaged into a summary.

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use std::time::Instant;

use super::artifact::{run_path, save_relation_embeddings, Checkpoint};
use super::report::{ExperimentSummary, RunReport, TaskReport};
use crate::config::ExperimentConfig;
use crate::continual::clustering::{Clusterer, KMeans};
use crate::continual::graph::RelationGraph;
use crate::continual::state::ContinualState;
use crate::continual::strategy::{ContinualStrategy, TaskContext};
use crate::data::{Dataset, RelationCatalog};
use crate::evaluation::evaluate_tasks;
use crate::model::encoder::PooledEncoderScorer;
use crate::model::SimilarityScorer;
use crate::task::{shuffled_cluster_order, TaskSplits};
use crate::training::Trainer;
use crate::{Error, Result};

/// Runs continual-learning experiments.
pub struct ContinualExperiment {
    config: ExperimentConfig,
    clusterer: Box<dyn Clusterer>,
}

impl ContinualExperiment {
    /// Create an experiment with the reference k-means clusterer.
    pub fn new(config: ExperimentConfig) -> Result<Self> {
        config.validate()?;
        let clusterer = Box::new(KMeans::new(config.kmeans_iterations));
        Ok(Self { config, clusterer })
    }

    /// Replace the clusterer used for exemplar selection.
    pub fn with_clusterer(mut self, clusterer: Box<dyn Clusterer>) -> Self {
        self.clusterer = clusterer;
        self
    }

    /// Get configuration.
    pub fn config(&self) -> &ExperimentConfig {
        &self.config
    }

    /// Fresh state for a run: a newly initialised scorer over the dataset's
    /// word embeddings.
    pub fn init_state(
        &self,
        dataset: &Dataset,
        rng: &mut StdRng,
    ) -> Result<ContinualState<PooledEncoderScorer>> {
        if dataset.embedding_dim() != self.config.embedding_dim {
            return Err(Error::ShapeMismatch {
                expected: self.config.embedding_dim,
                actual: dataset.embedding_dim(),
            });
        }
        let scorer = PooledEncoderScorer::new(
            dataset.word_embeddings.clone(),
            self.config.hidden_dim,
            rng,
        );
        let mut state = ContinualState::new(scorer, self.config.alignment_scope);
        state.graph = RelationGraph::with_question_cache(self.config.question_cache_size);
        Ok(state)
    }

    /// Learn one task and evaluate on every test partition seen so far.
    #[allow(clippy::too_many_arguments)]
    pub fn run_task<S: SimilarityScorer>(
        &self,
        state: &mut ContinualState<S>,
        strategy: &dyn ContinualStrategy<S>,
        splits: &TaskSplits,
        task: usize,
        catalog: &RelationCatalog,
        trainer: &Trainer,
        rng: &mut StdRng,
    ) -> Result<TaskReport> {
        let new_relations = state.seen.extend_from(splits.train(task));
        let view = splits.task_view(task, &state.seen)?;
        tracing::info!(
            "Task {}: {} new relations ({} seen), {} training samples",
            task,
            new_relations,
            state.seen.len(),
            view.train.len()
        );
        if view.train.is_empty() {
            tracing::warn!("Task {} has no training data after filtering", task);
        }

        state.graph.observe(&view.train);

        let ctx = TaskContext {
            task,
            train: &view.train,
            catalog,
            config: &self.config,
            clusterer: self.clusterer.as_ref(),
        };

        let replay = strategy.replay(state, &ctx, rng);
        let training = trainer.train(
            &mut state.scorer,
            catalog,
            &view.train,
            &replay,
            &view.valid,
            strategy.regularizer(&state.fisher),
            rng,
        )?;
        tracing::debug!(
            "Task {}: loss = {:.6}, accuracy delta = {:+.3}",
            task,
            training.final_loss(),
            training.accuracy_delta
        );

        let consolidation = strategy.consolidate(state, &ctx, rng)?;
        let accuracies = evaluate_tasks(
            &state.scorer,
            strategy.alignment(&state.reverse),
            &view.test,
            catalog,
            self.config.batch_size,
        )?;
        state.tasks_completed += 1;

        let report = TaskReport {
            task,
            seen_relations: state.seen.len(),
            train_samples: view.train.len(),
            replay_samples: replay.len(),
            accuracies,
            training,
            consolidation,
        };
        tracing::info!("{}", report.accuracy_line());
        Ok(report)
    }

    /// Learn every task of `splits` in order.
    ///
    /// When `model_path` is configured, a checkpoint is written after each
    /// task, to a per-run file when several runs are configured.
    pub fn run_sequence<S>(
        &self,
        state: &mut ContinualState<S>,
        run: usize,
        splits: &TaskSplits,
        catalog: &RelationCatalog,
        rng: &mut StdRng,
    ) -> Result<Vec<TaskReport>>
    where
        S: SimilarityScorer + Clone + Serialize + serde::de::DeserializeOwned,
    {
        let strategy = self.config.strategy.build::<S>();
        let trainer = Trainer::new(self.config.trainer_config())?;

        let mut reports = Vec::with_capacity(splits.num_tasks());
        for task in 0..splits.num_tasks() {
            let report = self.run_task(
                state,
                strategy.as_ref(),
                splits,
                task,
                catalog,
                &trainer,
                rng,
            )?;
            reports.push(report);

            if let Some(base) = &self.config.model_path {
                Checkpoint::capture(state).save(run_path(base, run, self.config.num_runs))?;
            }
        }
        Ok(reports)
    }

    /// One run with the task order and initialisation derived from `seed + run`.
    pub fn run_once(&self, dataset: &Dataset, run: usize) -> Result<RunReport> {
        let start = Instant::now();
        let seed = self.config.seed + run as u64;
        let mut rng = StdRng::seed_from_u64(seed);

        let cluster_order = shuffled_cluster_order(self.config.num_clusters, seed);
        let splits = TaskSplits::build(dataset, &cluster_order)?;
        let mut state = self.init_state(dataset, &mut rng)?;
        tracing::info!("Run {}: cluster order {:?}", run, cluster_order);

        let tasks = self.run_sequence(&mut state, run, &splits, &dataset.catalog, &mut rng)?;

        if let Some(base) = &self.config.artifact_path {
            let strategy = self.config.strategy.build::<PooledEncoderScorer>();
            save_relation_embeddings(
                run_path(base, run, self.config.num_runs),
                &state.scorer,
                strategy.alignment(&state.reverse),
                state.seen.as_slice(),
                &dataset.catalog,
            )?;
        }

        Ok(RunReport {
            run,
            seed,
            cluster_order,
            tasks,
            elapsed: start.elapsed(),
        })
    }

    /// Every configured run, averaged into a summary.
    pub fn run(&self, dataset: &Dataset) -> Result<ExperimentSummary> {
        dataset.validate()?;
        let start = Instant::now();

        let runs = (0..self.config.num_runs)
            .map(|run| self.run_once(dataset, run))
            .collect::<Result<Vec<_>>>()?;

        let summary = ExperimentSummary {
            strategy: self.config.strategy,
            runs,
            elapsed: start.elapsed(),
        };
        tracing::info!(
            "Finished {} runs, final mean accuracy {:.3}",
            summary.runs.len(),
            summary.final_mean_accuracy()
        );
        Ok(summary)
    }
}
