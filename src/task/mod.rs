//! Task sequence construction.
//!
//! Relations are grouped into clusters, clusters are shuffled into a task
//! order, and every task only sees candidates among the relations learned so
//! far.

pub mod partition;

pub use partition::{
    remove_unseen_relations, shuffled_cluster_order, split_data, SeenRelations, TaskSplits,
    TaskView,
};
