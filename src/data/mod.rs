//! Data model and the data-loader interface.
//!
//! - `sample` - samples, relation and token ids, the relation catalog
//! - `batch` - padded batches for variable-length sequences
//! - `synthetic` - a deterministic synthetic data source

pub mod batch;
pub mod sample;
pub mod synthetic;

pub use batch::{PaddedBatch, RankingBatch};
pub use sample::{RelationCatalog, RelationId, Sample, TokenId};

use ndarray::Array2;
use std::collections::HashMap;

use crate::{Error, Result};

/// Everything a data loader supplies to the experiment.
#[derive(Debug, Clone)]
pub struct Dataset {
    /// Training samples.
    pub train: Vec<Sample>,
    /// Test samples.
    pub test: Vec<Sample>,
    /// Validation samples.
    pub valid: Vec<Sample>,
    /// Relation descriptions.
    pub catalog: RelationCatalog,
    /// Vocabulary size.
    pub vocab_size: usize,
    /// Pre-trained word embeddings [vocab_size, embedding_dim].
    pub word_embeddings: Array2<f64>,
    /// Cluster id of every relation.
    pub cluster_labels: HashMap<RelationId, usize>,
    /// Optional per-relation feature vectors used to build the clusters.
    pub relation_features: Option<HashMap<RelationId, Vec<f64>>>,
}

impl Dataset {
    /// Dimension of the word embeddings.
    pub fn embedding_dim(&self) -> usize {
        self.word_embeddings.ncols()
    }

    /// Check the data contract between samples, catalog, vocabulary and clusters.
    ///
    /// Every referenced relation must exist in the catalog, every gold
    /// relation must have a cluster, and every token must be inside the
    /// vocabulary.
    pub fn validate(&self) -> Result<()> {
        if self.word_embeddings.nrows() != self.vocab_size {
            return Err(Error::ShapeMismatch {
                expected: self.vocab_size,
                actual: self.word_embeddings.nrows(),
            });
        }

        for sample in self.train.iter().chain(&self.test).chain(&self.valid) {
            self.catalog.get(sample.relation_id)?;
            for &candidate in &sample.candidates {
                self.catalog.get(candidate)?;
            }
            if !self.cluster_labels.contains_key(&sample.relation_id) {
                return Err(Error::MissingCluster(sample.relation_id));
            }
            self.check_tokens(&sample.question)?;
        }

        for relation in self.catalog.ids() {
            self.check_tokens(self.catalog.get(relation)?)?;
        }

        Ok(())
    }

    fn check_tokens(&self, tokens: &[TokenId]) -> Result<()> {
        match tokens.iter().find(|&&token| token >= self.vocab_size) {
            Some(&token) => Err(Error::InvalidParameter(format!(
                "token {} outside vocabulary of size {}",
                token, self.vocab_size
            ))),
            None => Ok(()),
        }
    }
}

/// Collaborator that loads a dataset.
pub trait DataSource {
    /// Load the full dataset.
    fn load(&self) -> Result<Dataset>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny_dataset() -> Dataset {
        let catalog: RelationCatalog = vec![(0, vec![1]), (1, vec![2])].into_iter().collect();
        let mut cluster_labels = HashMap::new();
        cluster_labels.insert(0, 0);
        cluster_labels.insert(1, 1);

        Dataset {
            train: vec![Sample::new(0, vec![0, 1], vec![1, 2])],
            test: vec![Sample::new(1, vec![1, 0], vec![2])],
            valid: Vec::new(),
            catalog,
            vocab_size: 3,
            word_embeddings: Array2::zeros((3, 4)),
            cluster_labels,
            relation_features: None,
        }
    }

    #[test]
    fn test_validate_accepts_consistent_data() {
        let dataset = tiny_dataset();
        assert!(dataset.validate().is_ok());
        assert_eq!(dataset.embedding_dim(), 4);
    }

    #[test]
    fn test_validate_rejects_missing_cluster() {
        let mut dataset = tiny_dataset();
        dataset.cluster_labels.remove(&1);
        assert!(matches!(dataset.validate(), Err(Error::MissingCluster(1))));
    }

    #[test]
    fn test_validate_rejects_unknown_candidate() {
        let mut dataset = tiny_dataset();
        dataset.train[0].candidates.push(5);
        assert!(matches!(dataset.validate(), Err(Error::UnknownRelation(5))));
    }

    #[test]
    fn test_validate_rejects_out_of_vocabulary_token() {
        let mut dataset = tiny_dataset();
        dataset.test[0].question.push(3);
        assert!(matches!(dataset.validate(), Err(Error::InvalidParameter(_))));
    }
}
