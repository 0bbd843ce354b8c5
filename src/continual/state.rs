//! State carried from one task to the next.

use crate::continual::fisher::FisherState;
use crate::continual::graph::RelationGraph;
use crate::continual::memory::MemoryBank;
use crate::model::reverse::{AlignmentScope, ReverseModel};
use crate::model::SimilarityScorer;
use crate::task::SeenRelations;

/// Everything the continual loop accumulates across tasks.
///
/// Created once per run and threaded through every task by `&mut`.
#[derive(Debug, Clone)]
pub struct ContinualState<S> {
    /// The similarity model being trained.
    pub scorer: S,
    /// Relations learned so far, in order of first appearance.
    pub seen: SeenRelations,
    /// Episodic memory.
    pub memory: MemoryBank,
    /// Accumulated Fisher importance, absent before the first consolidation.
    pub fisher: Option<FisherState>,
    /// Embedding realignment map.
    pub reverse: ReverseModel,
    /// Relation co-occurrence graph.
    pub graph: RelationGraph,
    /// Tasks completed.
    pub tasks_completed: usize,
}

impl<S: SimilarityScorer> ContinualState<S> {
    /// Fresh state around an initialised scorer.
    pub fn new(scorer: S, scope: AlignmentScope) -> Self {
        let reverse = ReverseModel::new(scorer.output_dim(), scope);
        Self {
            scorer,
            seen: SeenRelations::new(),
            memory: MemoryBank::new(),
            fisher: None,
            reverse,
            graph: RelationGraph::new(),
            tasks_completed: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::encoder::PooledEncoderScorer;
    use ndarray::Array2;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_new_state_is_empty() {
        let mut rng = StdRng::seed_from_u64(0);
        let scorer = PooledEncoderScorer::new(Array2::zeros((10, 4)), 3, &mut rng);
        let state = ContinualState::new(scorer, AlignmentScope::Query);

        assert!(state.seen.is_empty());
        assert!(state.memory.is_empty());
        assert!(state.fisher.is_none());
        assert!(state.graph.is_empty());
        assert_eq!(state.reverse.dim(), 3);
        assert_eq!(state.tasks_completed, 0);
    }
}
