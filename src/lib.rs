//! # Lifelong Relation Extraction
//!
//! This crate implements continual (lifelong) learning for relation detection.
//! A sequence of relation-classification tasks arrives over time and a single
//! similarity model has to learn each new task while keeping its accuracy on
//! the relations it learned before.
//!
//! ## Features
//!
//! - Task partitioning of a relation set into disjoint, shuffled clusters
//! - Episodic memory with k-means, herding, recency and frequency exemplar selection
//! - Fisher-information regularisation with max or running-average merging
//! - Embedding realignment through a trainable reverse model
//! - Evaluation over the growing set of seen relations, averaged across runs
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use lifelong_relation_extraction::prelude::*;
//!
//! fn main() -> lifelong_relation_extraction::Result<()> {
//!     let dataset = SyntheticDataSource::new(SyntheticConfig::default()).load()?;
//!     let config = ExperimentConfig::default()
//!         .with_num_clusters(4)
//!         .with_strategy(StrategyKind::AlignedReplay);
//!
//!     let experiment = ContinualExperiment::new(config)?;
//!     let summary = experiment.run(&dataset)?;
//!     println!("{}", summary);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod continual;
pub mod data;
pub mod evaluation;
pub mod experiment;
pub mod model;
pub mod task;
pub mod training;

// Re-exports
pub use config::ExperimentConfig;
pub use continual::clustering::{Clusterer, Clustering, KMeans};
pub use continual::fisher::{FisherMerge, FisherState, FisherTracker};
pub use continual::graph::{CandidateSampling, RelationGraph};
pub use continual::memory::{MemoryBank, SelectionStrategy, TaskMemory};
pub use continual::state::ContinualState;
pub use continual::strategy::{ContinualStrategy, StrategyKind};
pub use data::{DataSource, Dataset, RelationCatalog, RelationId, Sample, TokenId};
pub use evaluation::{evaluate_model, evaluate_tasks};
pub use experiment::pipeline::ContinualExperiment;
pub use experiment::report::{ExperimentSummary, RunReport, TaskReport};
pub use model::encoder::PooledEncoderScorer;
pub use model::reverse::{AlignmentCadence, AlignmentScope, ReverseModel};
pub use model::SimilarityScorer;
pub use task::partition::{SeenRelations, TaskSplits};
pub use training::loss::RankingLoss;
pub use training::trainer::{TrainOutcome, Trainer};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::ExperimentConfig;
    pub use crate::continual::clustering::{Clusterer, KMeans};
    pub use crate::continual::fisher::{FisherMerge, FisherState};
    pub use crate::continual::graph::CandidateSampling;
    pub use crate::continual::memory::{MemoryBank, SelectionStrategy};
    pub use crate::continual::state::ContinualState;
    pub use crate::continual::strategy::{ContinualStrategy, StrategyKind};
    pub use crate::data::synthetic::{SyntheticConfig, SyntheticDataSource};
    pub use crate::data::{DataSource, Dataset, RelationCatalog, Sample};
    pub use crate::experiment::pipeline::ContinualExperiment;
    pub use crate::experiment::report::{ExperimentSummary, RunReport, TaskReport};
    pub use crate::model::encoder::PooledEncoderScorer;
    pub use crate::model::reverse::{AlignmentScope, ReverseModel};
    pub use crate::model::SimilarityScorer;
    pub use crate::task::partition::{SeenRelations, TaskSplits};
    pub use crate::training::loss::RankingLoss;
    pub use crate::training::trainer::Trainer;
    pub use crate::{Error, Result};
}

/// Error types for the crate
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Unknown relation id: {0}")]
    UnknownRelation(RelationId),

    #[error("Relation {0} has no cluster assignment")]
    MissingCluster(RelationId),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Shape mismatch: expected {expected}, got {actual}")]
    ShapeMismatch { expected: usize, actual: usize },

    #[error("Clustering error: {0}")]
    Clustering(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            Error::UnknownRelation(7).to_string(),
            "Unknown relation id: 7"
        );
        assert_eq!(
            Error::ShapeMismatch {
                expected: 4,
                actual: 3
            }
            .to_string(),
            "Shape mismatch: expected 4, got 3"
        );
    }
}
