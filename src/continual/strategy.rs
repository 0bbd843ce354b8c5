//! Forgetting-mitigation strategies.
//!
//! A strategy decides what is replayed while a task is trained and how the
//! state is consolidated once the task is learned. Fisher anchoring and
//! embedding realignment are opt-in per strategy.

use ndarray::Array2;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::clustering::Clusterer;
use super::fisher::{FisherState, FisherTracker};
use super::memory::embed_exemplars;
use super::state::ContinualState;
use crate::config::ExperimentConfig;
use crate::data::{RelationCatalog, RelationId, Sample};
use crate::model::reverse::{AlignmentCadence, ReverseModel};
use crate::model::SimilarityScorer;
use crate::Result;

/// Available strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StrategyKind {
    /// Plain sequential fine-tuning.
    NoMemory,
    /// Exemplar replay anchored by Fisher importance.
    FisherReplay,
    /// Replay and Fisher anchoring plus reverse-model realignment.
    #[default]
    AlignedReplay,
}

impl StrategyKind {
    /// Instantiate the strategy.
    pub fn build<S: SimilarityScorer>(&self) -> Box<dyn ContinualStrategy<S>> {
        match self {
            StrategyKind::NoMemory => Box::new(NoMemory),
            StrategyKind::FisherReplay => Box::new(FisherReplay),
            StrategyKind::AlignedReplay => Box::new(AlignedReplay),
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StrategyKind::NoMemory => "no-memory",
            StrategyKind::FisherReplay => "fisher-replay",
            StrategyKind::AlignedReplay => "aligned-replay",
        };
        write!(f, "{}", name)
    }
}

/// Inputs of one task shared by all strategy hooks.
pub struct TaskContext<'a> {
    /// Task index.
    pub task: usize,
    /// Filtered training data of the task.
    pub train: &'a [Sample],
    /// Relation descriptions.
    pub catalog: &'a RelationCatalog,
    /// Experiment settings.
    pub config: &'a ExperimentConfig,
    /// Clusterer used for exemplar selection.
    pub clusterer: &'a dyn Clusterer,
}

/// What a consolidation step did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Consolidation {
    /// Exemplars stored for the task.
    pub exemplars: usize,
    /// Tasks merged into the Fisher state.
    pub fisher_tasks: usize,
    /// Final loss of the reverse-model fit, when one ran.
    pub alignment_loss: Option<f64>,
}

/// Per-task protocol of a forgetting-mitigation strategy.
///
/// Hooks receive only the parts of [`ContinualState`] they read, so the
/// pipeline can hand the regulariser to the trainer while the scorer is
/// borrowed mutably.
pub trait ContinualStrategy<S: SimilarityScorer> {
    /// Which strategy this is.
    fn kind(&self) -> StrategyKind;

    /// Samples replayed next to the current task's data.
    fn replay(
        &self,
        _state: &ContinualState<S>,
        _ctx: &TaskContext<'_>,
        _rng: &mut StdRng,
    ) -> Vec<Sample> {
        Vec::new()
    }

    /// Fisher state anchoring the parameters during training.
    fn regularizer<'s>(&self, _fisher: &'s Option<FisherState>) -> Option<&'s FisherState> {
        None
    }

    /// Realignment applied at evaluation time.
    fn alignment<'s>(&self, _reverse: &'s ReverseModel) -> Option<&'s ReverseModel> {
        None
    }

    /// Update memory, importance and alignment after a task was learned.
    fn consolidate(
        &self,
        state: &mut ContinualState<S>,
        ctx: &TaskContext<'_>,
        rng: &mut StdRng,
    ) -> Result<Consolidation>;
}

/// Sequential fine-tuning without any protection.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoMemory;

impl<S: SimilarityScorer> ContinualStrategy<S> for NoMemory {
    fn kind(&self) -> StrategyKind {
        StrategyKind::NoMemory
    }

    fn consolidate(
        &self,
        _state: &mut ContinualState<S>,
        _ctx: &TaskContext<'_>,
        _rng: &mut StdRng,
    ) -> Result<Consolidation> {
        Ok(Consolidation::default())
    }
}

/// Exemplar replay with Fisher anchoring.
#[derive(Debug, Clone, Copy, Default)]
pub struct FisherReplay;

impl<S: SimilarityScorer> ContinualStrategy<S> for FisherReplay {
    fn kind(&self) -> StrategyKind {
        StrategyKind::FisherReplay
    }

    fn replay(
        &self,
        state: &ContinualState<S>,
        ctx: &TaskContext<'_>,
        rng: &mut StdRng,
    ) -> Vec<Sample> {
        replay_memory(state, ctx.config, rng)
    }

    fn regularizer<'s>(&self, fisher: &'s Option<FisherState>) -> Option<&'s FisherState> {
        fisher.as_ref()
    }

    fn consolidate(
        &self,
        state: &mut ContinualState<S>,
        ctx: &TaskContext<'_>,
        rng: &mut StdRng,
    ) -> Result<Consolidation> {
        let exemplars = store_exemplars(state, ctx, false, rng)?;
        let fisher_tasks = update_fisher(state, ctx)?;
        Ok(Consolidation {
            exemplars,
            fisher_tasks,
            alignment_loss: None,
        })
    }
}

/// Replay, Fisher anchoring and embedding realignment.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlignedReplay;

impl<S: SimilarityScorer> ContinualStrategy<S> for AlignedReplay {
    fn kind(&self) -> StrategyKind {
        StrategyKind::AlignedReplay
    }

    fn replay(
        &self,
        state: &ContinualState<S>,
        ctx: &TaskContext<'_>,
        rng: &mut StdRng,
    ) -> Vec<Sample> {
        replay_memory(state, ctx.config, rng)
    }

    fn regularizer<'s>(&self, fisher: &'s Option<FisherState>) -> Option<&'s FisherState> {
        fisher.as_ref()
    }

    fn alignment<'s>(&self, reverse: &'s ReverseModel) -> Option<&'s ReverseModel> {
        Some(reverse)
    }

    fn consolidate(
        &self,
        state: &mut ContinualState<S>,
        ctx: &TaskContext<'_>,
        rng: &mut StdRng,
    ) -> Result<Consolidation> {
        let exemplars = store_exemplars(state, ctx, true, rng)?;
        let fisher_tasks = update_fisher(state, ctx)?;

        let alignment_loss = match ctx.config.alignment_cadence {
            AlignmentCadence::EveryTask => {
                let loss = state.reverse.fit(
                    &state.scorer,
                    &state.memory,
                    ctx.catalog,
                    &ctx.config.alignment_fit(),
                )?;
                state
                    .memory
                    .refresh(&state.scorer, Some(&state.reverse), ctx.catalog)?;
                tracing::debug!("Reverse model refit {}: loss = {:.6}", state.reverse.fits(), loss);
                Some(loss)
            }
            AlignmentCadence::Never => None,
        };

        Ok(Consolidation {
            exemplars,
            fisher_tasks,
            alignment_loss,
        })
    }
}

fn replay_memory<S: SimilarityScorer>(
    state: &ContinualState<S>,
    config: &ExperimentConfig,
    rng: &mut StdRng,
) -> Vec<Sample> {
    let mut samples = state.memory.replay_samples();
    let starts: Vec<RelationId> = samples.iter().map(|sample| sample.relation_id).collect();
    if !starts.is_empty() {
        for _ in 0..config.graph_replay_samples {
            let drawn = starts.choose(rng).and_then(|&start| {
                state
                    .graph
                    .walk_sample(start, config.walk_length, &state.seen, rng)
            });
            samples.extend(drawn);
        }
    }

    config.candidate_sampling.resample(
        &samples,
        &state.graph,
        &state.seen,
        config.candidates_per_sample,
        config.walk_length,
        rng,
    )
}

/// Select exemplars of the task and cache their embeddings.
fn store_exemplars<S: SimilarityScorer>(
    state: &mut ContinualState<S>,
    ctx: &TaskContext<'_>,
    aligned: bool,
    rng: &mut StdRng,
) -> Result<usize> {
    let alignment = if aligned { Some(&state.reverse) } else { None };
    let selection = ctx.config.selection;

    let embeddings = if selection.needs_embeddings() {
        embed_exemplars(&state.scorer, alignment, ctx.train, ctx.catalog)?.0
    } else {
        Array2::zeros((0, 0))
    };
    let chosen = selection.select(
        ctx.train,
        &embeddings,
        ctx.config.task_memory_size,
        ctx.clusterer,
        rng,
    )?;

    let exemplars: Vec<Sample> = chosen.into_iter().map(|i| ctx.train[i].clone()).collect();
    let count = exemplars.len();
    state
        .memory
        .remember(ctx.task, exemplars, &state.scorer, alignment, ctx.catalog)?;
    Ok(count)
}

/// Merge the Fisher diagonal of the task into the accumulated state.
fn update_fisher<S: SimilarityScorer>(
    state: &mut ContinualState<S>,
    ctx: &TaskContext<'_>,
) -> Result<usize> {
    let tracker = FisherTracker::new(ctx.config.batch_size);
    match tracker.compute(&state.scorer, ctx.catalog, ctx.train)? {
        Some(current) => {
            let merged = ctx.config.fisher_merge.merge(
                state.fisher.as_ref(),
                current,
                state.scorer.parameters(),
            )?;
            let stats = merged.stats();
            tracing::debug!(
                "Fisher after task {}: mean = {:.6}, max = {:.6}",
                ctx.task,
                stats.mean,
                stats.max
            );
            state.fisher = Some(merged);
        }
        None => tracing::warn!("Task {} has no training data, Fisher state unchanged", ctx.task),
    }
    Ok(state.fisher.as_ref().map_or(0, FisherState::tasks))
}
