//! Length-aware batching of token sequences.
//!
//! Sequences in a batch are padded to the longest one and the original
//! lengths are kept alongside, so encoders only pool over real tokens.

use ndarray::{s, Array2, ArrayView1};

use super::sample::{RelationCatalog, Sample, TokenId};
use crate::Result;

/// Token id used for padding.
pub const PAD_TOKEN: TokenId = 0;

/// A padded batch of token sequences.
#[derive(Debug, Clone, PartialEq)]
pub struct PaddedBatch {
    /// Token ids [batch_size, max_len], padded with [`PAD_TOKEN`].
    tokens: Array2<TokenId>,
    /// Original length of each row.
    lengths: Vec<usize>,
}

impl PaddedBatch {
    /// Pad a list of sequences to the longest one.
    pub fn from_sequences<I, S>(sequences: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<[TokenId]>,
    {
        let sequences: Vec<S> = sequences.into_iter().collect();
        let lengths: Vec<usize> = sequences.iter().map(|seq| seq.as_ref().len()).collect();
        let max_len = lengths.iter().copied().max().unwrap_or(0);

        let mut tokens = Array2::from_elem((sequences.len(), max_len), PAD_TOKEN);
        for (row, seq) in sequences.iter().enumerate() {
            for (col, &token) in seq.as_ref().iter().enumerate() {
                tokens[[row, col]] = token;
            }
        }

        Self { tokens, lengths }
    }

    /// Number of sequences.
    pub fn len(&self) -> usize {
        self.lengths.len()
    }

    /// Check if the batch is empty.
    pub fn is_empty(&self) -> bool {
        self.lengths.is_empty()
    }

    /// Padded length.
    pub fn max_len(&self) -> usize {
        self.tokens.ncols()
    }

    /// Original sequence lengths.
    pub fn lengths(&self) -> &[usize] {
        &self.lengths
    }

    /// Unpadded tokens of one row.
    pub fn row(&self, index: usize) -> ArrayView1<'_, TokenId> {
        self.tokens.slice(s![index, ..self.lengths[index]])
    }

    /// Padded token matrix.
    pub fn tokens(&self) -> &Array2<TokenId> {
        &self.tokens
    }
}

/// Paired question/relation sequences for ranking a list of samples.
///
/// Each sample contributes one row per scored relation; the question is
/// repeated for every row. `set_lengths` records how many consecutive rows
/// belong to each sample, with the gold relation first.
#[derive(Debug, Clone)]
pub struct RankingBatch {
    /// Question tokens, one row per (sample, relation) pair.
    pub questions: PaddedBatch,
    /// Relation tokens, one row per (sample, relation) pair.
    pub relations: PaddedBatch,
    /// Number of scored relations per sample.
    pub set_lengths: Vec<usize>,
}

impl RankingBatch {
    /// Build the pairwise batch for a list of samples.
    pub fn build(samples: &[Sample], catalog: &RelationCatalog) -> Result<Self> {
        let mut questions: Vec<&[TokenId]> = Vec::new();
        let mut relations: Vec<&[TokenId]> = Vec::new();
        let mut set_lengths = Vec::with_capacity(samples.len());

        for sample in samples {
            let scored = sample.scoring_relations();
            for &relation in &scored {
                relations.push(catalog.get(relation)?);
                questions.push(&sample.question);
            }
            set_lengths.push(scored.len());
        }

        Ok(Self {
            questions: PaddedBatch::from_sequences(questions),
            relations: PaddedBatch::from_sequences(relations),
            set_lengths,
        })
    }

    /// Number of samples in the batch.
    pub fn num_samples(&self) -> usize {
        self.set_lengths.len()
    }

    /// Total number of (question, relation) rows.
    pub fn num_pairs(&self) -> usize {
        self.set_lengths.iter().sum()
    }

    /// Row ranges belonging to each sample.
    pub fn sample_ranges(&self) -> Vec<std::ops::Range<usize>> {
        let mut start = 0;
        self.set_lengths
            .iter()
            .map(|&len| {
                let range = start..start + len;
                start += len;
                range
            })
            .collect()
    }
}

/// Pad the questions of a list of samples.
pub fn question_batch(samples: &[Sample]) -> PaddedBatch {
    PaddedBatch::from_sequences(samples.iter().map(|sample| sample.question.as_slice()))
}

/// Pad the gold relation descriptions of a list of samples.
pub fn gold_relation_batch(samples: &[Sample], catalog: &RelationCatalog) -> Result<PaddedBatch> {
    let relations = samples
        .iter()
        .map(|sample| catalog.get(sample.relation_id))
        .collect::<Result<Vec<_>>>()?;
    Ok(PaddedBatch::from_sequences(relations))
}
