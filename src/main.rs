//! Lifelong relation extraction CLI
//!
//! Runs the continual-learning experiment on a synthetic relation dataset.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use lifelong_relation_extraction::experiment::format_elapsed;
use lifelong_relation_extraction::prelude::*;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Strategy {
    /// Sequential fine-tuning
    NoMemory,
    /// Exemplar replay with Fisher anchoring
    FisherReplay,
    /// Replay, Fisher anchoring and reverse-model realignment
    AlignedReplay,
}

impl From<Strategy> for StrategyKind {
    fn from(strategy: Strategy) -> Self {
        match strategy {
            Strategy::NoMemory => StrategyKind::NoMemory,
            Strategy::FisherReplay => StrategyKind::FisherReplay,
            Strategy::AlignedReplay => StrategyKind::AlignedReplay,
        }
    }
}

#[derive(Parser)]
#[command(name = "lifelong_relation")]
#[command(about = "Lifelong relation extraction with episodic memory and embedding realignment")]
struct Cli {
    /// JSON experiment configuration; flags below override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Forgetting-mitigation strategy
    #[arg(short, long, value_enum)]
    strategy: Option<Strategy>,

    /// Number of relation clusters (tasks)
    #[arg(long)]
    clusters: Option<usize>,

    /// Number of randomized runs
    #[arg(short, long)]
    runs: Option<usize>,

    /// Base random seed
    #[arg(long)]
    seed: Option<u64>,

    /// Training epochs per task
    #[arg(short, long)]
    epochs: Option<usize>,

    /// Exemplars kept per task
    #[arg(short, long)]
    memory: Option<usize>,

    /// Write relation embeddings to this file
    #[arg(long)]
    artifact: Option<PathBuf>,

    /// Checkpoint the model to this file after every task
    #[arg(long)]
    model_path: Option<PathBuf>,

    /// Number of synthetic relations
    #[arg(long, default_value = "16")]
    relations: usize,

    /// Training samples per synthetic relation
    #[arg(long, default_value = "20")]
    samples: usize,
}

impl Cli {
    fn experiment_config(&self) -> anyhow::Result<ExperimentConfig> {
        let mut config = match &self.config {
            Some(path) => ExperimentConfig::from_json_file(path)?,
            None => ExperimentConfig::default(),
        };

        if let Some(strategy) = self.strategy {
            config = config.with_strategy(strategy.into());
        }
        if let Some(clusters) = self.clusters {
            config = config.with_num_clusters(clusters);
        }
        if let Some(runs) = self.runs {
            config = config.with_num_runs(runs);
        }
        if let Some(seed) = self.seed {
            config = config.with_seed(seed);
        }
        if let Some(epochs) = self.epochs {
            config = config.with_epochs(epochs);
        }
        if let Some(memory) = self.memory {
            config = config.with_task_memory_size(memory);
        }
        if let Some(path) = &self.artifact {
            config = config.with_artifact_path(path);
        }
        if let Some(path) = &self.model_path {
            config = config.with_model_path(path);
        }
        Ok(config)
    }
}

fn main() -> anyhow::Result<()> {
    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    let config = cli.experiment_config()?;

    let source = SyntheticDataSource::new(SyntheticConfig {
        num_relations: cli.relations,
        num_clusters: config.num_clusters,
        embedding_dim: config.embedding_dim,
        train_per_relation: cli.samples,
        seed: config.seed,
        ..SyntheticConfig::default()
    });
    let dataset = source.load()?;
    info!(
        "Loaded {} train / {} valid / {} test samples over {} relations",
        dataset.train.len(),
        dataset.valid.len(),
        dataset.test.len(),
        dataset.catalog.len()
    );

    let experiment = ContinualExperiment::new(config)?;
    let summary = experiment.run(&dataset)?;

    for run in &summary.runs {
        info!(
            "Run {} (order {:?}) finished in {}",
            run.run,
            run.cluster_order,
            format_elapsed(run.elapsed)
        );
    }
    println!("{}", summary);
    Ok(())
}
