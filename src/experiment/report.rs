//! Results of tasks, runs and whole experiments.

use std::fmt;
use std::time::Duration;

use crate::continual::strategy::{Consolidation, StrategyKind};
use crate::training::TrainOutcome;

/// Format a duration as `HH:MM:SS`.
pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

/// Accuracies as `"0.812, 0.640, "`.
pub fn format_accuracies(accuracies: &[f64]) -> String {
    accuracies.iter().map(|a| format!("{:.3}, ", a)).collect()
}

/// Outcome of learning one task.
#[derive(Debug, Clone)]
pub struct TaskReport {
    /// Task index.
    pub task: usize,
    /// Size of the seen-relation set after this task arrived.
    pub seen_relations: usize,
    /// Training samples left after filtering.
    pub train_samples: usize,
    /// Replayed exemplars.
    pub replay_samples: usize,
    /// Accuracy on each cumulative test partition `0..=task`.
    pub accuracies: Vec<f64>,
    /// Training statistics.
    pub training: TrainOutcome,
    /// Memory, Fisher and alignment bookkeeping.
    pub consolidation: Consolidation,
}

impl TaskReport {
    /// The per-task report line.
    pub fn accuracy_line(&self) -> String {
        format_accuracies(&self.accuracies)
    }

    /// Mean accuracy over the test partitions.
    pub fn mean_accuracy(&self) -> f64 {
        if self.accuracies.is_empty() {
            0.0
        } else {
            self.accuracies.iter().sum::<f64>() / self.accuracies.len() as f64
        }
    }
}

/// One pass over the whole task sequence.
#[derive(Debug, Clone)]
pub struct RunReport {
    /// Run index.
    pub run: usize,
    /// Seed of the run.
    pub seed: u64,
    /// Order in which clusters became tasks.
    pub cluster_order: Vec<usize>,
    /// Report of every task.
    pub tasks: Vec<TaskReport>,
    /// Wall-clock time of the run.
    pub elapsed: Duration,
}

impl RunReport {
    /// Accuracy lines, one per task.
    pub fn accuracy_matrix(&self) -> Vec<Vec<f64>> {
        self.tasks.iter().map(|t| t.accuracies.clone()).collect()
    }

    /// Accuracies after the last task.
    pub fn final_accuracies(&self) -> &[f64] {
        match self.tasks.last() {
            Some(task) => &task.accuracies,
            None => &[],
        }
    }
}

/// Aggregate over several randomized runs.
#[derive(Debug, Clone)]
pub struct ExperimentSummary {
    /// Strategy used.
    pub strategy: StrategyKind,
    /// Every run.
    pub runs: Vec<RunReport>,
    /// Total wall-clock time.
    pub elapsed: Duration,
}

impl ExperimentSummary {
    /// Element-wise mean over runs of every task's accuracy line.
    pub fn average_accuracies(&self) -> Vec<Vec<f64>> {
        let num_tasks = self.runs.iter().map(|r| r.tasks.len()).max().unwrap_or(0);
        (0..num_tasks)
            .map(|task| {
                let lines: Vec<&[f64]> = self
                    .runs
                    .iter()
                    .filter_map(|r| r.tasks.get(task))
                    .map(|t| t.accuracies.as_slice())
                    .collect();
                let width = lines.iter().map(|l| l.len()).max().unwrap_or(0);
                (0..width)
                    .map(|j| {
                        let values: Vec<f64> =
                            lines.iter().filter_map(|l| l.get(j).copied()).collect();
                        values.iter().sum::<f64>() / values.len() as f64
                    })
                    .collect()
            })
            .collect()
    }

    /// Mean accuracy over all partitions after the last task, averaged over runs.
    pub fn final_mean_accuracy(&self) -> f64 {
        self.average_accuracies()
            .last()
            .filter(|line| !line.is_empty())
            .map_or(0.0, |line| line.iter().sum::<f64>() / line.len() as f64)
    }
}

impl fmt::Display for ExperimentSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Strategy: {} ({} runs)", self.strategy, self.runs.len())?;
        for line in self.average_accuracies() {
            writeln!(f, "{}", format_accuracies(&line))?;
        }
        write!(f, "Elapsed: {}", format_elapsed(self.elapsed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn task(task: usize, accuracies: Vec<f64>) -> TaskReport {
        TaskReport {
            task,
            seen_relations: 0,
            train_samples: 0,
            replay_samples: 0,
            accuracies,
            training: TrainOutcome::default(),
            consolidation: Consolidation::default(),
        }
    }

    fn run(lines: Vec<Vec<f64>>) -> RunReport {
        RunReport {
            run: 0,
            seed: 0,
            cluster_order: vec![0, 1],
            tasks: lines.into_iter().enumerate().map(|(i, l)| task(i, l)).collect(),
            elapsed: Duration::from_secs(1),
        }
    }

    #[test]
    fn test_format_elapsed() {
        assert_eq!(format_elapsed(Duration::from_secs(0)), "00:00:00");
        assert_eq!(format_elapsed(Duration::from_secs(3725)), "01:02:05");
        assert_eq!(format_elapsed(Duration::from_secs(90000)), "25:00:00");
    }

    #[test]
    fn test_accuracy_line() {
        assert_eq!(task(1, vec![0.8124, 0.64]).accuracy_line(), "0.812, 0.640, ");
        assert_eq!(task(0, vec![]).accuracy_line(), "");
    }

    #[test]
    fn test_summary_averages_runs() {
        let summary = ExperimentSummary {
            strategy: StrategyKind::AlignedReplay,
            runs: vec![
                run(vec![vec![1.0], vec![0.5, 1.0]]),
                run(vec![vec![0.5], vec![0.5, 0.0]]),
            ],
            elapsed: Duration::from_secs(61),
        };

        let average = summary.average_accuracies();
        assert_eq!(average.len(), 2);
        assert_abs_diff_eq!(average[0][0], 0.75, epsilon = 1e-12);
        assert_abs_diff_eq!(average[1][1], 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(summary.final_mean_accuracy(), 0.5, epsilon = 1e-12);

        let text = summary.to_string();
        assert!(text.contains("0.750, \n"));
        assert!(text.contains("0.500, 0.500, \n"));
        assert!(text.ends_with("Elapsed: 00:01:01"));
    }
}
