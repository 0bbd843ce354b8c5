//! Files written by an experiment.
//!
//! - relation embeddings as plain text: the retained relation ids on the
//!   first line, then one line per relation with its embedding rounded to
//!   four decimals
//! - JSON checkpoints of the model weights

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::continual::fisher::FisherState;
use crate::continual::state::ContinualState;
use crate::data::{PaddedBatch, RelationCatalog, RelationId};
use crate::model::reverse::ReverseModel;
use crate::model::SimilarityScorer;
use crate::Result;

/// Write the embeddings of `relations` in the text artifact format.
pub fn write_relation_embeddings<W, S>(
    writer: &mut W,
    scorer: &S,
    alignment: Option<&ReverseModel>,
    relations: &[RelationId],
    catalog: &RelationCatalog,
) -> Result<()>
where
    W: Write,
    S: SimilarityScorer + ?Sized,
{
    let ids: Vec<String> = relations.iter().map(|r| r.to_string()).collect();
    writeln!(writer, "{}", ids.join(" "))?;
    if relations.is_empty() {
        return Ok(());
    }

    let descriptions = relations
        .iter()
        .map(|&r| catalog.get(r))
        .collect::<Result<Vec<_>>>()?;
    let mut embeddings = scorer.embed_relations(&PaddedBatch::from_sequences(descriptions));
    if let Some(reverse) = alignment {
        embeddings = reverse.align_relations(embeddings);
    }

    for row in embeddings.rows() {
        let values: Vec<String> = row.iter().map(|v| format!("{:.4}", v)).collect();
        writeln!(writer, "{}", values.join(" "))?;
    }
    Ok(())
}

/// Write the relation-embedding artifact to a file.
pub fn save_relation_embeddings<P, S>(
    path: P,
    scorer: &S,
    alignment: Option<&ReverseModel>,
    relations: &[RelationId],
    catalog: &RelationCatalog,
) -> Result<()>
where
    P: AsRef<Path>,
    S: SimilarityScorer + ?Sized,
{
    let mut writer = BufWriter::new(File::create(path.as_ref())?);
    write_relation_embeddings(&mut writer, scorer, alignment, relations, catalog)?;
    writer.flush()?;
    tracing::info!("Wrote {} relation embeddings to {}", relations.len(), path.as_ref().display());
    Ok(())
}

/// Path of a per-run file; the base path is used as is for a single run.
pub fn run_path(base: &Path, run: usize, num_runs: usize) -> PathBuf {
    if num_runs <= 1 {
        return base.to_path_buf();
    }
    let stem = base
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match base.extension() {
        Some(ext) => format!("{}.run{}.{}", stem, run, ext.to_string_lossy()),
        None => format!("{}.run{}", stem, run),
    };
    base.with_file_name(name)
}

/// Model weights after a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint<S> {
    /// Tasks completed when the checkpoint was taken.
    pub tasks_completed: usize,
    /// Similarity model.
    pub scorer: S,
    /// Realignment map.
    pub reverse: ReverseModel,
    /// Accumulated Fisher importance.
    pub fisher: Option<FisherState>,
}

impl<S: SimilarityScorer + Clone> Checkpoint<S> {
    /// Snapshot the model part of the state.
    pub fn capture(state: &ContinualState<S>) -> Self {
        Self {
            tasks_completed: state.tasks_completed,
            scorer: state.scorer.clone(),
            reverse: state.reverse.clone(),
            fisher: state.fisher.clone(),
        }
    }

    /// Put the weights back into a state.
    pub fn restore(self, state: &mut ContinualState<S>) {
        state.scorer = self.scorer;
        state.reverse = self.reverse;
        state.fisher = self.fisher;
        state.tasks_completed = self.tasks_completed;
    }
}

impl<S: Serialize + DeserializeOwned> Checkpoint<S> {
    /// Save as JSON.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path.as_ref())?);
        serde_json::to_writer(&mut writer, self)?;
        writer.flush()?;
        tracing::debug!("Saved checkpoint to {}", path.as_ref().display());
        Ok(())
    }

    /// Load from JSON.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::encoder::PooledEncoderScorer;
    use crate::model::reverse::AlignmentScope;
    use ndarray::Array2;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn scorer() -> PooledEncoderScorer {
        let mut rng = StdRng::seed_from_u64(8);
        let embeddings = Array2::from_shape_fn((10, 3), |(i, j)| (i * 3 + j) as f64 * 0.1);
        PooledEncoderScorer::new(embeddings, 2, &mut rng)
    }

    fn catalog() -> RelationCatalog {
        vec![(0, vec![1, 2]), (1, vec![3]), (2, vec![4, 5])]
            .into_iter()
            .collect()
    }

    #[test]
    fn test_artifact_format() {
        let mut out = Vec::new();
        write_relation_embeddings(&mut out, &scorer(), None, &[2, 0], &catalog()).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "2 0");
        for line in &lines[1..] {
            let values: Vec<&str> = line.split(' ').collect();
            assert_eq!(values.len(), 2);
            for v in values {
                assert_eq!(v.split('.').nth(1).map(str::len), Some(4));
            }
        }
    }

    #[test]
    fn test_artifact_unknown_relation() {
        let mut out = Vec::new();
        assert!(write_relation_embeddings(&mut out, &scorer(), None, &[9], &catalog()).is_err());
    }

    #[test]
    fn test_run_path() {
        let base = Path::new("/tmp/out/relations.txt");
        assert_eq!(run_path(base, 0, 1), PathBuf::from("/tmp/out/relations.txt"));
        assert_eq!(run_path(base, 2, 3), PathBuf::from("/tmp/out/relations.run2.txt"));
    }

    #[test]
    fn test_checkpoint_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        let mut state = ContinualState::new(scorer(), AlignmentScope::Both);
        state.tasks_completed = 2;

        Checkpoint::capture(&state).save(&path).unwrap();
        let loaded: Checkpoint<PooledEncoderScorer> = Checkpoint::load(&path).unwrap();
        assert_eq!(loaded.tasks_completed, 2);
        assert_eq!(loaded.reverse, state.reverse);

        let mut fresh = ContinualState::new(scorer(), AlignmentScope::Both);
        loaded.restore(&mut fresh);
        assert_eq!(fresh.tasks_completed, 2);
        let restored = fresh.scorer.parameters();
        for (a, b) in restored.iter().zip(state.scorer.parameters().iter()) {
            assert!((a - b).abs() < 1e-12);
        }
    }
}
