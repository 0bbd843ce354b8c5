//! Splitting the relation set into an ordered sequence of tasks.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::{HashMap, HashSet};

use crate::data::{Dataset, RelationId, Sample};
use crate::{Error, Result};

/// Split samples into `num_clusters` task partitions.
///
/// A sample lands in partition `shuffle_index[cluster_labels[relation]]`.
/// The original order of samples is kept inside each partition.
pub fn split_data(
    samples: &[Sample],
    cluster_labels: &HashMap<RelationId, usize>,
    num_clusters: usize,
    shuffle_index: &[usize],
) -> Result<Vec<Vec<Sample>>> {
    if shuffle_index.len() != num_clusters {
        return Err(Error::ShapeMismatch {
            expected: num_clusters,
            actual: shuffle_index.len(),
        });
    }

    let mut partitions = vec![Vec::new(); num_clusters];
    for sample in samples {
        let cluster = *cluster_labels
            .get(&sample.relation_id)
            .ok_or(Error::MissingCluster(sample.relation_id))?;
        let position = *shuffle_index.get(cluster).ok_or_else(|| {
            Error::InvalidParameter(format!(
                "cluster {} of relation {} exceeds {} clusters",
                cluster, sample.relation_id, num_clusters
            ))
        })?;
        if position >= num_clusters {
            return Err(Error::InvalidParameter(format!(
                "shuffle index {} out of range for {} clusters",
                position, num_clusters
            )));
        }
        partitions[position].push(sample.clone());
    }

    Ok(partitions)
}

/// Permutation of cluster indices drawn from a seeded generator.
pub fn shuffled_cluster_order(num_clusters: usize, seed: u64) -> Vec<usize> {
    let mut order: Vec<usize> = (0..num_clusters).collect();
    order.shuffle(&mut StdRng::seed_from_u64(seed));
    order
}

/// Restrict candidate lists to the seen relations.
///
/// Samples left without any candidate are dropped. The gold relation stays on
/// the record even when it was filtered out of the candidate list.
pub fn remove_unseen_relations(samples: &[Sample], seen: &SeenRelations) -> Vec<Sample> {
    samples
        .iter()
        .filter_map(|sample| {
            let candidates: Vec<RelationId> = sample
                .candidates
                .iter()
                .copied()
                .filter(|&candidate| seen.contains(candidate))
                .collect();
            if candidates.is_empty() {
                None
            } else {
                Some(Sample {
                    candidates,
                    ..sample.clone()
                })
            }
        })
        .collect()
}

/// Append-only ordered set of the relations seen so far.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeenRelations {
    order: Vec<RelationId>,
    members: HashSet<RelationId>,
}

impl SeenRelations {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a relation; returns whether it was new.
    pub fn insert(&mut self, relation: RelationId) -> bool {
        if self.members.insert(relation) {
            self.order.push(relation);
            true
        } else {
            false
        }
    }

    /// Add the gold relation of every sample; returns how many were new.
    pub fn extend_from(&mut self, samples: &[Sample]) -> usize {
        samples
            .iter()
            .filter(|sample| self.insert(sample.relation_id))
            .count()
    }

    /// Whether the relation has been seen.
    pub fn contains(&self, relation: RelationId) -> bool {
        self.members.contains(&relation)
    }

    /// Relations in insertion order.
    pub fn as_slice(&self) -> &[RelationId] {
        &self.order
    }

    /// Whether every relation of `other` is also in `self`.
    pub fn is_superset(&self, other: &SeenRelations) -> bool {
        other.order.iter().all(|relation| self.contains(*relation))
    }

    /// Number of seen relations.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Check if nothing has been seen yet.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Filtered data visible while learning one task.
#[derive(Debug, Clone)]
pub struct TaskView {
    /// Task index.
    pub task: usize,
    /// Training data of this task.
    pub train: Vec<Sample>,
    /// Validation data of this task.
    pub valid: Vec<Sample>,
    /// Test data of every task up to and including this one.
    pub test: Vec<Vec<Sample>>,
}

/// Train, validation and test partitions for the whole task sequence.
#[derive(Debug, Clone)]
pub struct TaskSplits {
    train: Vec<Vec<Sample>>,
    valid: Vec<Vec<Sample>>,
    test: Vec<Vec<Sample>>,
    cluster_order: Vec<usize>,
}

impl TaskSplits {
    /// Partition every split of the dataset with the same cluster order.
    pub fn build(dataset: &Dataset, cluster_order: &[usize]) -> Result<Self> {
        let num_clusters = cluster_order.len();
        let labels = &dataset.cluster_labels;

        Ok(Self {
            train: split_data(&dataset.train, labels, num_clusters, cluster_order)?,
            valid: split_data(&dataset.valid, labels, num_clusters, cluster_order)?,
            test: split_data(&dataset.test, labels, num_clusters, cluster_order)?,
            cluster_order: cluster_order.to_vec(),
        })
    }

    /// Number of tasks.
    pub fn num_tasks(&self) -> usize {
        self.train.len()
    }

    /// Cluster permutation used to build the splits.
    pub fn cluster_order(&self) -> &[usize] {
        &self.cluster_order
    }

    /// Unfiltered training partition of a task.
    pub fn train(&self, task: usize) -> &[Sample] {
        &self.train[task]
    }

    /// Filtered data for `task` under the current seen set.
    ///
    /// Test data is cumulative: every earlier test partition is rescoped to
    /// the relations visible now.
    pub fn task_view(&self, task: usize, seen: &SeenRelations) -> Result<TaskView> {
        if task >= self.num_tasks() {
            return Err(Error::InvalidParameter(format!(
                "task {} out of range for {} tasks",
                task,
                self.num_tasks()
            )));
        }

        Ok(TaskView {
            task,
            train: remove_unseen_relations(&self.train[task], seen),
            valid: remove_unseen_relations(&self.valid[task], seen),
            test: self.test[..=task]
                .iter()
                .map(|partition| remove_unseen_relations(partition, seen))
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn samples() -> Vec<Sample> {
        (0..8)
            .map(|i| Sample::new(i % 4, vec![i % 4, (i + 1) % 4], vec![i]))
            .collect()
    }

    fn labels() -> HashMap<RelationId, usize> {
        vec![(0, 0), (1, 0), (2, 1), (3, 1)].into_iter().collect()
    }

    #[test]
    fn test_split_is_a_partition() {
        let data = samples();
        let parts = split_data(&data, &labels(), 2, &[1, 0]).unwrap();

        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].len() + parts[1].len(), data.len());
        // Cluster 0 moved to position 1
        assert!(parts[1].iter().all(|s| s.relation_id < 2));
        assert!(parts[0].iter().all(|s| s.relation_id >= 2));
        for sample in &data {
            let hits = parts.iter().flatten().filter(|s| *s == sample).count();
            assert_eq!(hits, 1);
        }
    }

    #[test]
    fn test_split_keeps_order() {
        let data = samples();
        let parts = split_data(&data, &labels(), 2, &[0, 1]).unwrap();
        let questions: Vec<usize> = parts[0].iter().map(|s| s.question[0]).collect();
        assert_eq!(questions, vec![0, 1, 4, 5]);
    }

    #[test]
    fn test_split_missing_cluster() {
        let mut data = samples();
        data.push(Sample::new(9, vec![9], vec![0]));
        assert!(matches!(
            split_data(&data, &labels(), 2, &[0, 1]),
            Err(Error::MissingCluster(9))
        ));
    }

    #[test]
    fn test_remove_unseen_relations() {
        let mut seen = SeenRelations::new();
        seen.insert(1);

        let data = vec![
            Sample::new(0, vec![0, 1], vec![1]),
            Sample::new(0, vec![0, 2], vec![2]),
        ];
        let filtered = remove_unseen_relations(&data, &seen);

        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].candidates, vec![1]);
        // Gold is kept on the record
        assert_eq!(filtered[0].relation_id, 0);
    }

    #[test]
    fn test_seen_relations_append_only() {
        let mut seen = SeenRelations::new();
        assert_eq!(seen.extend_from(&samples()[..2]), 2);
        let before = seen.clone();
        assert_eq!(seen.extend_from(&samples()), 2);

        assert!(seen.is_superset(&before));
        assert_eq!(seen.as_slice(), &[0, 1, 2, 3]);
        assert!(!seen.insert(0));
    }

    #[test]
    fn test_shuffled_order_is_permutation() {
        let mut order = shuffled_cluster_order(10, 100);
        assert_eq!(order, shuffled_cluster_order(10, 100));
        order.sort_unstable();
        assert_eq!(order, (0..10).collect::<Vec<_>>());
    }
}
