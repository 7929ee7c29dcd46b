use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use plotters::prelude::*;
use serde::Serialize;
use statrs::distribution::{ContinuousCDF, Normal};
use thiserror::Error;

const CONFIDENCE_LEVEL: f64 = 0.95;

#[derive(Debug, Error)]
pub enum AnalyticsError {
    #[error("no rounds were recorded")]
    Empty,
    #[error("{context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to render plot: {0}")]
    Plot(String),
}

/// Round-level facts the collector needs.
#[derive(Debug, Clone)]
pub struct RoundRecord<'a> {
    pub max_posterior: f64,
    pub map_estimate: Option<&'a str>,
    pub novelty: bool,
    pub chosen: &'a str,
    pub fallback: Option<&'static str>,
    pub expected_payoff: Option<f64>,
}

pub struct AnalyticsCollector {
    run_id: String,
    opponent: Option<String>,
    candidates: Vec<String>,
    usage: BTreeMap<String, usize>,
    fallbacks: BTreeMap<String, usize>,
    novelty_rounds: usize,
    trajectory: Vec<f64>,
    payoffs: Vec<f64>,
    first_lock_in: Option<usize>,
    rejected_rounds: usize,
}

impl AnalyticsCollector {
    /// `opponent` names the true hypothesis when there is one; lock-in is
    /// only measured against it.
    pub fn new(run_id: &str, opponent: Option<&str>, candidates: &[String]) -> Self {
        Self {
            run_id: run_id.to_string(),
            opponent: opponent.map(str::to_string),
            candidates: candidates.to_vec(),
            usage: candidates.iter().map(|c| (c.clone(), 0)).collect(),
            fallbacks: BTreeMap::new(),
            novelty_rounds: 0,
            trajectory: Vec::new(),
            payoffs: Vec::new(),
            first_lock_in: None,
            rejected_rounds: 0,
        }
    }

    pub fn record_round(&mut self, round: &RoundRecord<'_>) {
        *self.usage.entry(round.chosen.to_string()).or_insert(0) += 1;
        if let Some(reason) = round.fallback {
            *self.fallbacks.entry(reason.to_string()).or_insert(0) += 1;
        }
        if round.novelty {
            self.novelty_rounds += 1;
        }
        self.trajectory.push(round.max_posterior);
        if let Some(payoff) = round.expected_payoff {
            self.payoffs.push(payoff);
        }

        if self.first_lock_in.is_none()
            && let (Some(opponent), Some(map)) = (self.opponent.as_deref(), round.map_estimate)
            && opponent == map
        {
            self.first_lock_in = Some(self.trajectory.len());
        }
    }

    /// A round whose evidence eliminated every hypothesis.
    pub fn record_rejected(&mut self) {
        self.rejected_rounds += 1;
    }

    pub fn finalize(self) -> Result<AnalyticsSummary, AnalyticsError> {
        if self.trajectory.is_empty() {
            return Err(AnalyticsError::Empty);
        }
        let rounds = self.trajectory.len();
        let mean_max_posterior = mean(&self.trajectory);
        let ci95 = confidence_interval(&self.trajectory);

        let usage = self
            .candidates
            .iter()
            .map(|name| {
                let count = self.usage.get(name).copied().unwrap_or(0);
                UsageReport {
                    name: name.clone(),
                    rounds: count,
                    share: count as f64 / rounds as f64,
                }
            })
            .collect();

        Ok(AnalyticsSummary {
            run_id: self.run_id,
            opponent: self.opponent,
            rounds,
            rejected_rounds: self.rejected_rounds,
            usage,
            fallbacks: self.fallbacks,
            novelty_rate: self.novelty_rounds as f64 / rounds as f64,
            mean_max_posterior,
            ci95,
            mean_expected_payoff: (!self.payoffs.is_empty()).then(|| mean(&self.payoffs)),
            rounds_to_lock_in: self.first_lock_in,
            trajectory: self.trajectory,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UsageReport {
    pub name: String,
    pub rounds: usize,
    pub share: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalyticsSummary {
    pub run_id: String,
    pub opponent: Option<String>,
    pub rounds: usize,
    pub rejected_rounds: usize,
    pub usage: Vec<UsageReport>,
    pub fallbacks: BTreeMap<String, usize>,
    pub novelty_rate: f64,
    pub mean_max_posterior: f64,
    pub ci95: (f64, f64),
    pub mean_expected_payoff: Option<f64>,
    pub rounds_to_lock_in: Option<usize>,
    #[serde(skip)]
    pub trajectory: Vec<f64>,
}

impl AnalyticsSummary {
    pub fn write_markdown(&self, path: impl AsRef<Path>) -> Result<(), AnalyticsError> {
        let mut rows = String::new();
        rows.push_str("# Experiment Summary\n\n");
        rows.push_str(&format!("- Run: `{}`\n", self.run_id));
        rows.push_str(&format!(
            "- Opponent: {}\n",
            self.opponent.as_deref().unwrap_or("<novel>")
        ));
        rows.push_str(&format!("- Rounds: {}\n", self.rounds));
        if self.rejected_rounds > 0 {
            rows.push_str(&format!(
                "- Rounds rejected (all hypotheses eliminated): {}\n",
                self.rejected_rounds
            ));
        }
        rows.push_str(&format!(
            "- Mean max posterior: {:.3} (95% CI [{:.3}, {:.3}])\n",
            self.mean_max_posterior, self.ci95.0, self.ci95.1
        ));
        rows.push_str(&format!(
            "- Novelty rate: {:.1}%\n",
            self.novelty_rate * 100.0
        ));
        match self.rounds_to_lock_in {
            Some(round) => rows.push_str(&format!("- MAP lock-in: round {round}\n")),
            None => rows.push_str("- MAP lock-in: never\n"),
        }
        if let Some(payoff) = self.mean_expected_payoff {
            rows.push_str(&format!("- Mean expected payoff: {payoff:.3}\n"));
        }
        rows.push('\n');

        rows.push_str("| Response | Rounds | Share |\n");
        rows.push_str("|----------|--------|-------|\n");
        for usage in &self.usage {
            rows.push_str(&format!(
                "| {name} | {rounds} | {share:.1}% |\n",
                name = usage.name,
                rounds = usage.rounds,
                share = usage.share * 100.0,
            ));
        }

        if !self.fallbacks.is_empty() {
            rows.push_str("\n## Fallbacks\n");
            for (reason, count) in &self.fallbacks {
                rows.push_str(&format!("- {reason}: {count}\n"));
            }
        }

        fs::write(path.as_ref(), rows).map_err(|e| AnalyticsError::Io {
            context: "writing summary markdown",
            source: e,
        })?;
        Ok(())
    }

    pub fn render_plot(&self, dir: impl AsRef<Path>) -> Result<PathBuf, AnalyticsError> {
        let dir = dir.as_ref();
        if !dir.as_os_str().is_empty() {
            fs::create_dir_all(dir).map_err(|e| AnalyticsError::Io {
                context: "creating plots directory",
                source: e,
            })?;
        }

        let output_path = dir.join("max_posterior.png");
        let trajectory = self.trajectory.clone();

        let prev_hook = std::panic::take_hook();
        std::panic::set_hook(Box::new(|_| {}));

        let plot_attempt = std::panic::catch_unwind(move || {
            let root = BitMapBackend::new(&output_path, (800, 480)).into_drawing_area();
            root.fill(&WHITE)
                .map_err(|e| AnalyticsError::Plot(e.to_string()))?;

            let mut chart = ChartBuilder::on(&root)
                .margin(20)
                .caption("Max posterior by round", ("sans-serif", 22))
                .set_label_area_size(LabelAreaPosition::Left, 50)
                .set_label_area_size(LabelAreaPosition::Bottom, 40)
                .build_cartesian_2d(1..trajectory.len().max(2), 0.0f64..1.0f64)
                .map_err(|e| AnalyticsError::Plot(e.to_string()))?;

            chart
                .configure_mesh()
                .disable_mesh()
                .y_desc("max posterior")
                .x_desc("round")
                .draw()
                .map_err(|e| AnalyticsError::Plot(e.to_string()))?;

            chart
                .draw_series(LineSeries::new(
                    trajectory.iter().enumerate().map(|(i, p)| (i + 1, *p)),
                    &BLUE,
                ))
                .map_err(|e| AnalyticsError::Plot(e.to_string()))?;

            drop(chart);

            root.present()
                .map_err(|e| AnalyticsError::Plot(e.to_string()))?;

            drop(root);

            Ok(output_path)
        });

        std::panic::set_hook(prev_hook);

        match plot_attempt {
            Ok(result) => result,
            Err(_) => Err(AnalyticsError::Plot(
                "plotters panicked while rendering (missing font support?)".into(),
            )),
        }
    }
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

fn confidence_interval(points: &[f64]) -> (f64, f64) {
    if points.is_empty() {
        return (0.0, 0.0);
    }
    let mean = mean(points);
    if points.len() == 1 {
        return (mean, mean);
    }
    let variance = points
        .iter()
        .map(|value| (value - mean).powi(2))
        .sum::<f64>()
        / (points.len() as f64 - 1.0);
    let std_error = (variance / points.len() as f64).sqrt();
    let margin = critical_z() * std_error;
    ((mean - margin).max(0.0), (mean + margin).min(1.0))
}

/// Two-sided normal quantile for [`CONFIDENCE_LEVEL`].
fn critical_z() -> f64 {
    match Normal::new(0.0, 1.0) {
        Ok(normal) => normal.inverse_cdf(0.5 + CONFIDENCE_LEVEL / 2.0),
        Err(_) => 1.96,
    }
}
