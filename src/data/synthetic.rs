//! Synthetic relation-detection data.
//!
//! Every relation owns a small set of signature tokens that make up its
//! description. Questions mix the signature tokens of their gold relation
//! with noise tokens, so a similarity model can learn to match them.

use ndarray::{Array1, Array2};
use ndarray_rand::rand_distr::StandardNormal;
use ndarray_rand::RandomExt;
use rand::rngs::StdRng;
use rand::seq::index;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::sample::{RelationCatalog, RelationId, Sample, TokenId};
use super::{DataSource, Dataset};
use crate::{Error, Result};

/// Configuration of the synthetic generator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyntheticConfig {
    /// Number of relations.
    pub num_relations: usize,
    /// Number of relation clusters (tasks).
    pub num_clusters: usize,
    /// Vocabulary size, including the padding token.
    pub vocab_size: usize,
    /// Word embedding dimension.
    pub embedding_dim: usize,
    /// Signature tokens per relation.
    pub relation_tokens: usize,
    /// Question length in tokens.
    pub question_len: usize,
    /// Probability that a question token is noise.
    pub noise: f64,
    /// Training samples per relation.
    pub train_per_relation: usize,
    /// Validation samples per relation.
    pub valid_per_relation: usize,
    /// Test samples per relation.
    pub test_per_relation: usize,
    /// Candidate list length, gold included.
    pub candidates_per_sample: usize,
    /// Random seed.
    pub seed: u64,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            num_relations: 16,
            num_clusters: 4,
            vocab_size: 200,
            embedding_dim: 16,
            relation_tokens: 3,
            question_len: 6,
            noise: 0.3,
            train_per_relation: 20,
            valid_per_relation: 4,
            test_per_relation: 8,
            candidates_per_sample: 5,
            seed: 7,
        }
    }
}

/// Data source producing a [`Dataset`] from a [`SyntheticConfig`].
#[derive(Debug, Clone)]
pub struct SyntheticDataSource {
    config: SyntheticConfig,
}

impl SyntheticDataSource {
    /// Create a new synthetic data source.
    pub fn new(config: SyntheticConfig) -> Self {
        Self { config }
    }

    /// Get the configuration.
    pub fn config(&self) -> &SyntheticConfig {
        &self.config
    }

    fn validate(&self) -> Result<()> {
        let c = &self.config;
        if c.num_relations == 0 || c.num_clusters == 0 || c.num_clusters > c.num_relations {
            return Err(Error::InvalidParameter(format!(
                "need 0 < num_clusters ({}) <= num_relations ({})",
                c.num_clusters, c.num_relations
            )));
        }
        if c.relation_tokens == 0 || c.vocab_size <= self.noise_start() {
            return Err(Error::InvalidParameter(format!(
                "vocab_size {} leaves no room for noise tokens",
                c.vocab_size
            )));
        }
        if c.candidates_per_sample == 0 || c.candidates_per_sample > c.num_relations {
            return Err(Error::InvalidParameter(format!(
                "candidates_per_sample must be in 1..={}",
                c.num_relations
            )));
        }
        if !(0.0..=1.0).contains(&c.noise) {
            return Err(Error::InvalidParameter("noise must be in [0, 1]".into()));
        }
        Ok(())
    }

    /// First token id not used by any relation signature.
    fn noise_start(&self) -> TokenId {
        1 + self.config.num_relations * self.config.relation_tokens
    }

    fn signature(&self, relation: RelationId) -> Vec<TokenId> {
        let start = 1 + relation * self.config.relation_tokens;
        (start..start + self.config.relation_tokens).collect()
    }

    fn question(&self, relation: RelationId, rng: &mut StdRng) -> Vec<TokenId> {
        let signature = self.signature(relation);
        (0..self.config.question_len)
            .map(|_| {
                if rng.gen::<f64>() < self.config.noise {
                    rng.gen_range(self.noise_start()..self.config.vocab_size)
                } else {
                    signature[rng.gen_range(0..signature.len())]
                }
            })
            .collect()
    }

    fn sample(&self, relation: RelationId, rng: &mut StdRng) -> Sample {
        let mut candidates = vec![relation];
        let negatives = index::sample(
            rng,
            self.config.num_relations - 1,
            self.config.candidates_per_sample - 1,
        );
        // Indices skip over the gold relation
        candidates.extend(
            negatives
                .into_iter()
                .map(|i| if i >= relation { i + 1 } else { i }),
        );
        let question = self.question(relation, rng);
        Sample::new(relation, candidates, question)
    }

    fn split(&self, per_relation: usize, rng: &mut StdRng) -> Vec<Sample> {
        (0..self.config.num_relations)
            .flat_map(|relation| (0..per_relation).map(move |_| relation))
            .map(|relation| self.sample(relation, rng))
            .collect()
    }
}

impl DataSource for SyntheticDataSource {
    fn load(&self) -> Result<Dataset> {
        self.validate()?;
        let c = &self.config;
        let mut rng = StdRng::seed_from_u64(c.seed);

        let mut word_embeddings = Array2::<f64>::random_using(
            (c.vocab_size, c.embedding_dim),
            StandardNormal,
            &mut rng,
        );
        word_embeddings.row_mut(0).fill(0.0);

        let catalog: RelationCatalog = (0..c.num_relations)
            .map(|relation| (relation, self.signature(relation)))
            .collect();

        let cluster_labels: HashMap<RelationId, usize> = (0..c.num_relations)
            .map(|relation| (relation, relation * c.num_clusters / c.num_relations))
            .collect();

        let relation_features = (0..c.num_relations)
            .map(|relation| {
                let mut feature = Array1::<f64>::zeros(c.embedding_dim);
                for token in self.signature(relation) {
                    feature += &word_embeddings.row(token);
                }
                feature /= c.relation_tokens as f64;
                (relation, feature.to_vec())
            })
            .collect();

        let train = self.split(c.train_per_relation, &mut rng);
        let valid = self.split(c.valid_per_relation, &mut rng);
        let test = self.split(c.test_per_relation, &mut rng);

        tracing::debug!(
            "Generated synthetic data: {} train, {} valid, {} test samples over {} relations",
            train.len(),
            valid.len(),
            test.len(),
            c.num_relations
        );

        Ok(Dataset {
            train,
            test,
            valid,
            catalog,
            vocab_size: c.vocab_size,
            word_embeddings,
            cluster_labels,
            relation_features: Some(relation_features),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_synthetic_dataset_is_valid() {
        let dataset = SyntheticDataSource::new(SyntheticConfig::default())
            .load()
            .unwrap();

        assert!(dataset.validate().is_ok());
        assert_eq!(dataset.train.len(), 16 * 20);
        assert_eq!(dataset.catalog.len(), 16);
        for sample in &dataset.train {
            assert_eq!(sample.candidates[0], sample.relation_id);
            assert_eq!(sample.candidates.len(), 5);
        }
    }

    #[test]
    fn test_synthetic_clusters_cover_all_relations() {
        let dataset = SyntheticDataSource::new(SyntheticConfig::default())
            .load()
            .unwrap();

        let mut clusters: Vec<usize> = dataset.cluster_labels.values().copied().collect();
        clusters.sort_unstable();
        clusters.dedup();
        assert_eq!(clusters, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_synthetic_is_deterministic() {
        let source = SyntheticDataSource::new(SyntheticConfig::default());
        let a = source.load().unwrap();
        let b = source.load().unwrap();
        assert_eq!(a.train, b.train);
        assert_eq!(a.word_embeddings, b.word_embeddings);
    }

    #[test]
    fn test_invalid_config() {
        let config = SyntheticConfig {
            candidates_per_sample: 100,
            ..SyntheticConfig::default()
        };
        assert!(SyntheticDataSource::new(config).load().is_err());
    }
}
