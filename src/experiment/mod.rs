//! Experiment orchestration.
//!
//! - `pipeline` - the per-task loop and repeated runs
//! - `report` - task, run and summary reports
//! - `artifact` - relation-embedding files and model checkpoints

pub mod artifact;
pub mod pipeline;
pub mod report;

pub use artifact::{save_relation_embeddings, write_relation_embeddings, Checkpoint};
pub use pipeline::ContinualExperiment;
pub use report::{format_accuracies, format_elapsed, ExperimentSummary, RunReport, TaskReport};
