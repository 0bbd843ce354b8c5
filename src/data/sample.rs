//! Samples and the relation catalog.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::{Error, Result};

/// Identifier of a relation in the catalog.
pub type RelationId = usize;

/// Identifier of a token in the vocabulary.
pub type TokenId = usize;

/// A single training or evaluation example.
///
/// The gold relation is stored separately from the candidate list, so a
/// sample keeps its label even after the candidate list has been rewritten
/// by the unseen-relation filter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Sample {
    /// Gold relation.
    pub relation_id: RelationId,
    /// Candidate relations, gold first when produced by the data source.
    pub candidates: Vec<RelationId>,
    /// Encoded question tokens.
    pub question: Vec<TokenId>,
}

impl Sample {
    /// Create a new sample.
    pub fn new(
        relation_id: RelationId,
        candidates: Vec<RelationId>,
        question: Vec<TokenId>,
    ) -> Self {
        Self {
            relation_id,
            candidates,
            question,
        }
    }

    /// Relations scored for this sample, gold at index 0.
    ///
    /// Every candidate other than the gold relation follows in its original
    /// order, so position zero always marks the label.
    pub fn scoring_relations(&self) -> Vec<RelationId> {
        let mut relations = Vec::with_capacity(self.candidates.len() + 1);
        relations.push(self.relation_id);
        relations.extend(
            self.candidates
                .iter()
                .copied()
                .filter(|&candidate| candidate != self.relation_id),
        );
        relations
    }

    /// Number of relations scored for this sample.
    pub fn scoring_len(&self) -> usize {
        1 + self
            .candidates
            .iter()
            .filter(|&&candidate| candidate != self.relation_id)
            .count()
    }
}

/// Token-encoded descriptions of every relation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelationCatalog {
    relations: BTreeMap<RelationId, Vec<TokenId>>,
}

impl RelationCatalog {
    /// Create an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the encoded description of a relation.
    pub fn insert(&mut self, relation: RelationId, tokens: Vec<TokenId>) {
        self.relations.insert(relation, tokens);
    }

    /// Encoded description of a relation.
    pub fn get(&self, relation: RelationId) -> Result<&[TokenId]> {
        self.relations
            .get(&relation)
            .map(Vec::as_slice)
            .ok_or(Error::UnknownRelation(relation))
    }

    /// Whether the catalog knows the relation.
    pub fn contains(&self, relation: RelationId) -> bool {
        self.relations.contains_key(&relation)
    }

    /// Relation ids in ascending order.
    pub fn ids(&self) -> impl Iterator<Item = RelationId> + '_ {
        self.relations.keys().copied()
    }

    /// Number of relations.
    pub fn len(&self) -> usize {
        self.relations.len()
    }

    /// Check if the catalog is empty.
    pub fn is_empty(&self) -> bool {
        self.relations.is_empty()
    }
}

impl FromIterator<(RelationId, Vec<TokenId>)> for RelationCatalog {
    fn from_iter<I: IntoIterator<Item = (RelationId, Vec<TokenId>)>>(iter: I) -> Self {
        Self {
            relations: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scoring_relations_puts_gold_first() {
        let sample = Sample::new(3, vec![5, 3, 1], vec![10, 11]);
        assert_eq!(sample.scoring_relations(), vec![3, 5, 1]);
        assert_eq!(sample.scoring_len(), 3);
    }

    #[test]
    fn test_scoring_relations_without_gold_candidate() {
        let sample = Sample::new(2, vec![4], vec![1]);
        assert_eq!(sample.scoring_relations(), vec![2, 4]);
    }

    #[test]
    fn test_catalog_lookup() {
        let catalog: RelationCatalog = vec![(0, vec![1, 2]), (1, vec![3])].into_iter().collect();

        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.get(0).unwrap(), &[1, 2]);
        assert!(matches!(catalog.get(9), Err(Error::UnknownRelation(9))));
        assert_eq!(catalog.ids().collect::<Vec<_>>(), vec![0, 1]);
    }
}
