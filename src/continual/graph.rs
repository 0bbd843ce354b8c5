//! Relation co-occurrence graph.
//!
//! Two relations are neighbours when they appear together in a sample's
//! candidate list. Edge weights count those co-occurrences. Each relation
//! also keeps a bounded cache of its most recent questions. The graph is
//! used to draw fresh negative candidates for replayed exemplars and extra
//! replay samples for relations reached by a walk.

use rand::distributions::WeightedIndex;
use rand::prelude::*;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::data::{RelationId, Sample, TokenId};
use crate::task::SeenRelations;

/// How candidate lists of replayed exemplars are built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CandidateSampling {
    /// Keep the candidates the sample came with.
    #[default]
    Original,
    /// Relations visited by random walks from the gold relation.
    RandomWalk,
    /// Neighbours drawn in proportion to their co-occurrence count.
    Frequency,
}

impl CandidateSampling {
    /// Rewrite the candidate lists of `samples`.
    ///
    /// New lists hold the gold relation followed by at most `count` seen
    /// relations drawn from the graph. A sample for which the graph yields
    /// no seen neighbour keeps its original candidates.
    pub fn resample(
        &self,
        samples: &[Sample],
        graph: &RelationGraph,
        seen: &SeenRelations,
        count: usize,
        walk_length: usize,
        rng: &mut StdRng,
    ) -> Vec<Sample> {
        if *self == CandidateSampling::Original || count == 0 {
            return samples.to_vec();
        }

        samples
            .iter()
            .map(|sample| {
                let gold = sample.relation_id;
                let drawn: Vec<RelationId> = match self {
                    CandidateSampling::RandomWalk => {
                        graph.walk_neighbors(gold, count, walk_length, seen, rng)
                    }
                    _ => graph
                        .frequency_neighbors(gold, graph.degree(gold), rng)
                        .into_iter()
                        .filter(|&r| seen.contains(r))
                        .take(count)
                        .collect(),
                };

                if drawn.is_empty() {
                    sample.clone()
                } else {
                    let mut candidates = Vec::with_capacity(drawn.len() + 1);
                    candidates.push(gold);
                    candidates.extend(drawn);
                    Sample::new(gold, candidates, sample.question.clone())
                }
            })
            .collect()
    }
}

/// Questions cached per relation by [`RelationGraph::new`].
pub const DEFAULT_QUESTION_CACHE: usize = 5;

/// Weighted undirected graph over relations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationGraph {
    edges: BTreeMap<RelationId, BTreeMap<RelationId, usize>>,
    questions: BTreeMap<RelationId, VecDeque<Vec<TokenId>>>,
    question_cache_size: usize,
}

impl Default for RelationGraph {
    fn default() -> Self {
        Self::with_question_cache(DEFAULT_QUESTION_CACHE)
    }
}

impl RelationGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty graph caching at most `size` questions per relation.
    pub fn with_question_cache(size: usize) -> Self {
        Self {
            edges: BTreeMap::new(),
            questions: BTreeMap::new(),
            question_cache_size: size,
        }
    }

    /// Count co-occurrences in the candidate lists of `samples` and cache
    /// each sample's question under its gold relation.
    ///
    /// Once a relation's cache is full the oldest question is evicted.
    pub fn observe(&mut self, samples: &[Sample]) {
        for sample in samples {
            if self.question_cache_size > 0 {
                let cache = self.questions.entry(sample.relation_id).or_default();
                cache.push_back(sample.question.clone());
                while cache.len() > self.question_cache_size {
                    cache.pop_front();
                }
            }

            let related: BTreeSet<RelationId> = sample
                .candidates
                .iter()
                .copied()
                .chain(std::iter::once(sample.relation_id))
                .collect();
            for &a in &related {
                for &b in &related {
                    if a != b {
                        *self.edges.entry(a).or_default().entry(b).or_insert(0) += 1;
                    }
                }
            }
        }
    }

    /// Co-occurrence counts of a relation's neighbours.
    pub fn neighbors(&self, relation: RelationId) -> Option<&BTreeMap<RelationId, usize>> {
        self.edges.get(&relation)
    }

    /// Cached questions of a relation, oldest first.
    pub fn questions(&self, relation: RelationId) -> Option<&VecDeque<Vec<TokenId>>> {
        self.questions.get(&relation)
    }

    /// Capacity of each relation's question cache.
    pub fn question_cache_size(&self) -> usize {
        self.question_cache_size
    }

    /// Number of distinct neighbours.
    pub fn degree(&self, relation: RelationId) -> usize {
        self.edges.get(&relation).map_or(0, BTreeMap::len)
    }

    /// Number of relations with at least one neighbour.
    pub fn num_relations(&self) -> usize {
        self.edges.len()
    }

    /// Check if nothing has been observed.
    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    fn step(&self, from: RelationId, rng: &mut StdRng) -> Option<RelationId> {
        let neighbors = self.edges.get(&from)?;
        let ids: Vec<RelationId> = neighbors.keys().copied().collect();
        let dist = WeightedIndex::new(neighbors.values().copied()).ok()?;
        Some(ids[dist.sample(rng)])
    }

    /// Weighted random walk of up to `length` steps.
    ///
    /// The returned path starts at `start`; it ends early at a relation
    /// without neighbours.
    pub fn random_walk(
        &self,
        start: RelationId,
        length: usize,
        rng: &mut StdRng,
    ) -> Vec<RelationId> {
        let mut path = Vec::with_capacity(length + 1);
        path.push(start);
        let mut current = start;
        for _ in 0..length {
            match self.step(current, rng) {
                Some(next) => {
                    path.push(next);
                    current = next;
                }
                None => break,
            }
        }
        path
    }

    /// Up to `count` distinct neighbours, sampled without replacement with
    /// probability proportional to co-occurrence count.
    pub fn frequency_neighbors(
        &self,
        relation: RelationId,
        count: usize,
        rng: &mut StdRng,
    ) -> Vec<RelationId> {
        let neighbors: Vec<(RelationId, usize)> = match self.edges.get(&relation) {
            Some(map) => map.iter().map(|(&r, &c)| (r, c)).collect(),
            None => return Vec::new(),
        };

        neighbors
            .choose_multiple_weighted(rng, count.min(neighbors.len()), |&(_, c)| c as f64)
            .map(|chosen| chosen.map(|&(r, _)| r).collect())
            .unwrap_or_default()
    }

    /// A replay sample for a relation reached by a walk from `start`.
    ///
    /// The reached relation must be seen and have cached questions. The
    /// sample asks one of its cached questions with `start` as the only
    /// negative candidate.
    pub fn walk_sample(
        &self,
        start: RelationId,
        walk_length: usize,
        seen: &SeenRelations,
        rng: &mut StdRng,
    ) -> Option<Sample> {
        let reached: Vec<RelationId> = self
            .random_walk(start, walk_length.max(1), rng)
            .into_iter()
            .skip(1)
            .filter(|&r| r != start && seen.contains(r))
            .filter(|r| self.questions.get(r).map_or(false, |cache| !cache.is_empty()))
            .collect();
        let relation = *reached.choose(rng)?;
        let cache = self.questions.get(&relation)?;
        let question = cache.get(rng.gen_range(0..cache.len()))?.clone();
        Some(Sample::new(relation, vec![relation, start], question))
    }

    /// Distinct seen relations other than `start` visited by repeated walks.
    fn walk_neighbors(
        &self,
        start: RelationId,
        count: usize,
        walk_length: usize,
        seen: &SeenRelations,
        rng: &mut StdRng,
    ) -> Vec<RelationId> {
        let mut found = Vec::new();
        let attempts = count.max(1) * 4;
        for _ in 0..attempts {
            for relation in self.random_walk(start, walk_length.max(1), rng).into_iter().skip(1) {
                if relation != start && seen.contains(relation) && !found.contains(&relation) {
                    found.push(relation);
                    if found.len() == count {
                        return found;
                    }
                }
            }
        }
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn graph() -> RelationGraph {
        let mut graph = RelationGraph::new();
        graph.observe(&[
            Sample::new(0, vec![0, 1, 2], vec![1]),
            Sample::new(1, vec![1, 2], vec![2]),
            Sample::new(3, vec![3, 4], vec![3]),
        ]);
        graph
    }

    fn seen(relations: &[RelationId]) -> SeenRelations {
        let mut seen = SeenRelations::new();
        for &r in relations {
            seen.insert(r);
        }
        seen
    }

    #[test]
    fn test_observe_counts_cooccurrence() {
        let graph = graph();
        assert_eq!(graph.neighbors(1).unwrap()[&2], 2);
        assert_eq!(graph.neighbors(0).unwrap()[&1], 1);
        assert_eq!(graph.degree(3), 1);
        assert_eq!(graph.degree(9), 0);
        assert_eq!(graph.num_relations(), 5);
    }

    #[test]
    fn test_question_cache_is_bounded() {
        let mut graph = RelationGraph::with_question_cache(2);
        let samples: Vec<Sample> = (1..=5).map(|t| Sample::new(0, vec![0, 1], vec![t])).collect();
        graph.observe(&samples);

        let cached: Vec<Vec<TokenId>> = graph.questions(0).unwrap().iter().cloned().collect();
        assert_eq!(cached, vec![vec![4], vec![5]]);
        assert!(graph.questions(1).is_none());
        assert_eq!(graph.question_cache_size(), 2);

        let mut disabled = RelationGraph::with_question_cache(0);
        disabled.observe(&samples);
        assert!(disabled.questions(0).is_none());
        assert_eq!(disabled.degree(0), 1);
    }

    #[test]
    fn test_walk_sample_uses_cached_question() {
        let graph = graph();
        let mut rng = StdRng::seed_from_u64(6);

        // Relation 2 has no cached question, so only walks reaching 1 yield
        let drawn: Vec<Sample> = (0..20)
            .filter_map(|_| graph.walk_sample(0, 2, &seen(&[0, 1, 2]), &mut rng))
            .collect();
        assert!(!drawn.is_empty());
        for sample in &drawn {
            assert_eq!(sample.relation_id, 1);
            assert_eq!(sample.candidates, vec![1, 0]);
            assert!(graph.questions(1).unwrap().contains(&sample.question));
        }

        // Relation 4 is a neighbour of 3 but never a gold relation
        assert!(graph.walk_sample(3, 2, &seen(&[3, 4]), &mut rng).is_none());
        assert!(graph.walk_sample(0, 2, &seen(&[0]), &mut rng).is_none());
    }

    #[test]
    fn test_random_walk_follows_edges() {
        let graph = graph();
        let mut rng = StdRng::seed_from_u64(4);
        let path = graph.random_walk(0, 6, &mut rng);

        assert_eq!(path[0], 0);
        assert_eq!(path.len(), 7);
        for pair in path.windows(2) {
            assert!(graph.neighbors(pair[0]).unwrap().contains_key(&pair[1]));
        }
        assert_eq!(graph.random_walk(7, 3, &mut rng), vec![7]);
    }

    #[test]
    fn test_frequency_neighbors_are_distinct() {
        let graph = graph();
        let mut rng = StdRng::seed_from_u64(4);
        let mut drawn = graph.frequency_neighbors(1, 5, &mut rng);
        drawn.sort_unstable();
        assert_eq!(drawn, vec![0, 2]);
        assert!(graph.frequency_neighbors(8, 2, &mut rng).is_empty());
    }

    #[test]
    fn test_resample_restricts_to_seen() {
        let graph = graph();
        let samples = vec![Sample::new(1, vec![1], vec![5])];
        let mut rng = StdRng::seed_from_u64(2);

        for sampling in [CandidateSampling::RandomWalk, CandidateSampling::Frequency] {
            let out = sampling.resample(&samples, &graph, &seen(&[1, 2]), 3, 2, &mut rng);
            assert_eq!(out[0].relation_id, 1);
            assert_eq!(out[0].candidates, vec![1, 2]);
            assert_eq!(out[0].question, vec![5]);
        }
    }

    #[test]
    fn test_resample_keeps_sample_without_neighbors() {
        let graph = graph();
        let samples = vec![Sample::new(3, vec![3, 4], vec![5])];
        let mut rng = StdRng::seed_from_u64(2);
        let out =
            CandidateSampling::Frequency.resample(&samples, &graph, &seen(&[3]), 3, 2, &mut rng);
        assert_eq!(out, samples);

        let out =
            CandidateSampling::Original.resample(&samples, &graph, &seen(&[3, 4]), 3, 2, &mut rng);
        assert_eq!(out, samples);
    }
}
