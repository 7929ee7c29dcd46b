use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::{Map, json};
use stratformer_agent::{AdaptiveAgent, RoundDecision, ValuationSource};
use stratformer_core::{
    Baseline, DecisionPoint, Error as CoreError, NoveltyDetector, Observation, PayoffMatrix,
    Policy, PolicyLikelihood, PosteriorTracker, Selector, SelectorConfig, StrategyId,
    StrategyPool, TablePolicy, UniformPolicy,
};
use thiserror::Error;
use tracing::{Level, event};

use crate::analytics::{AnalyticsCollector, AnalyticsError, AnalyticsSummary, RoundRecord};
use crate::config::{BaselineConfig, ExperimentConfig, PolicyKind, PolicyTable, ResolvedOutputs};
use crate::env::SyntheticEnvironment;
use crate::logging::telemetry_dir;
use crate::telemetry::{
    TelemetryError, TelemetryOutputs, append_highlights_to_markdown, write_summary_outputs,
};

const NOVEL_OPPONENT: &str = "novel_opponent";

/// Drives one seeded session: environment → likelihood → agent → JSONL.
pub struct ExperimentRunner {
    config: ExperimentConfig,
    outputs: ResolvedOutputs,
    pool: StrategyPool,
    logging_enabled: bool,
}

/// Summary details returned after a run.
pub struct RunSummary {
    pub rounds_played: usize,
    pub rounds_rejected: usize,
    pub rows_written: usize,
    pub jsonl_path: PathBuf,
    pub summary_path: PathBuf,
    pub plot_path: Option<PathBuf>,
    pub telemetry_path: Option<PathBuf>,
    pub telemetry_outputs: Option<TelemetryOutputs>,
    pub analytics: AnalyticsSummary,
}

#[derive(Debug, Serialize)]
struct RoundLogRow<'a> {
    run_id: &'a str,
    /// Session round, counting rejected rounds.
    round: u64,
    /// Rounds the agent accepted so far, this one included.
    accepted_round: u64,
    decision_point: &'a str,
    action: u32,
    posterior: BTreeMap<StrategyId, f64>,
    max_posterior: f64,
    map_estimate: Option<&'a str>,
    novelty: bool,
    chosen: &'a str,
    fallback: Option<&'static str>,
    expected_payoff: Option<f64>,
}

impl ExperimentRunner {
    /// Build a runner from a validated configuration. Every policy, the
    /// prior and the selector are constructed once here so bad settings
    /// fail before any output is written.
    pub fn new(config: ExperimentConfig, outputs: ResolvedOutputs) -> Result<Self, RunnerError> {
        let mut pool = StrategyPool::new();
        for hypothesis in &config.hypotheses {
            let policy = build_policy(&hypothesis.name, hypothesis.kind, hypothesis.table.as_ref())?;
            let mut metadata = Map::new();
            metadata.insert("kind".to_string(), json!(format!("{:?}", hypothesis.kind)));
            if let Some(prior) = hypothesis.prior {
                metadata.insert("prior".to_string(), json!(prior));
            }
            pool.add_policy(hypothesis.name.as_str(), policy, metadata)?;
        }

        let runner = Self {
            logging_enabled: config.logging.enable_structured,
            config,
            outputs,
            pool,
        };
        runner.build_agent()?;
        runner.build_opponent()?;
        Ok(runner)
    }

    pub fn config(&self) -> &ExperimentConfig {
        &self.config
    }

    /// Execute the session, streaming one JSONL row per accepted round.
    pub fn run(&self) -> Result<RunSummary, RunnerError> {
        ensure_parent(self.outputs.jsonl.parent())?;
        ensure_parent(self.outputs.summary_md.parent())?;
        if !self.outputs.plots_dir.as_os_str().is_empty() {
            fs::create_dir_all(&self.outputs.plots_dir)?;
        }

        let mut writer = BufWriter::new(File::create(&self.outputs.jsonl)?);
        let mut env = SyntheticEnvironment::new(
            self.config.seed.unwrap_or(0),
            self.decision_points(),
            self.build_opponent()?,
        );
        let mut agent = self.build_agent()?;
        let likelihood = PolicyLikelihood::new(&self.pool);
        let candidates = self.config.candidate_names();
        let mut analytics = AnalyticsCollector::new(
            &self.config.run_id,
            self.config.opponent.hypothesis.as_deref(),
            &candidates,
        );

        let mut rows_written = 0usize;
        let mut rounds_rejected = 0usize;
        for round in 1..=self.config.rounds {
            let Some(observation) = env.step()? else {
                break;
            };
            let evidence = likelihood.observe(&observation)?;

            let decision = match agent.observe_round(&evidence) {
                Ok(decision) => decision,
                Err(CoreError::AllHypothesesEliminated) => {
                    if self.logging_enabled && tracing::enabled!(Level::INFO) {
                        event!(
                            target: "stratformer_bench::round",
                            Level::INFO,
                            run_id = %self.config.run_id,
                            round = round as u64,
                            decision_point = %observation.point.key,
                            action = observation.action,
                            "no hypothesis explains the action; resetting"
                        );
                    }
                    agent.recover_by_reset();
                    analytics.record_rejected();
                    rounds_rejected += 1;
                    continue;
                }
                Err(err) => return Err(err.into()),
            };

            let expected_payoff = self.expected_payoff(&decision);
            let map_estimate = decision.posterior.map_estimate().map(StrategyId::as_str);
            analytics.record_round(&RoundRecord {
                max_posterior: decision.max_posterior(),
                map_estimate,
                novelty: decision.novelty,
                chosen: decision.selection.chosen.as_str(),
                fallback: decision.fallback_label(),
                expected_payoff,
            });
            write_round_row(
                &mut writer,
                &self.config.run_id,
                round as u64,
                &observation,
                &decision,
                expected_payoff,
            )?;
            rows_written += 1;
        }

        writer.flush()?;

        let summary = analytics.finalize()?;
        summary.write_markdown(&self.outputs.summary_md)?;
        let plot_path = match summary.render_plot(&self.outputs.plots_dir) {
            Ok(path) => Some(path),
            Err(err) => {
                eprintln!("WARN: {}", err);
                None
            }
        };

        let telemetry_dir = telemetry_dir(&self.outputs);
        let telemetry_path = if self.logging_enabled {
            Some(telemetry_dir.join("telemetry.jsonl"))
        } else {
            None
        };

        let telemetry_outputs = if let Some(path) = telemetry_path.as_ref() {
            write_summary_outputs(path, &telemetry_dir)?
        } else {
            None
        };

        if let Some(outputs) = telemetry_outputs.as_ref() {
            append_highlights_to_markdown(&self.outputs.summary_md, outputs)?;
        }

        Ok(RunSummary {
            rounds_played: summary.rounds,
            rounds_rejected,
            rows_written,
            jsonl_path: self.outputs.jsonl.clone(),
            summary_path: self.outputs.summary_md.clone(),
            plot_path,
            telemetry_path,
            telemetry_outputs,
            analytics: summary,
        })
    }

    fn decision_points(&self) -> Vec<DecisionPoint> {
        self.config
            .decision_points
            .iter()
            .map(|p| DecisionPoint::new(p.key.clone(), p.legal_actions.clone()))
            .collect()
    }

    fn build_opponent(&self) -> Result<Box<dyn Policy>, RunnerError> {
        let opponent = &self.config.opponent;
        if let Some(name) = opponent.hypothesis.as_deref() {
            let hypothesis = self
                .config
                .hypotheses
                .iter()
                .find(|h| h.name == name)
                .ok_or_else(|| RunnerError::setup(format!("opponent '{name}' is not a hypothesis")))?;
            return build_policy(&hypothesis.name, hypothesis.kind, hypothesis.table.as_ref());
        }
        match opponent.table.as_ref() {
            Some(table) => build_policy(NOVEL_OPPONENT, PolicyKind::Table, Some(table)),
            None => Err(RunnerError::setup("opponent has neither a hypothesis nor a table")),
        }
    }

    fn build_agent(&self) -> Result<AdaptiveAgent, RunnerError> {
        let tracker = PosteriorTracker::new(self.config.prior())?;
        let detector =
            NoveltyDetector::new(self.config.novelty.window_size, self.config.novelty.threshold)?;
        let selector = Selector::new(SelectorConfig {
            kl_reg: self.config.selection.kl_reg,
            exploitability_limit: self.config.selection.exploitability_limit,
        })?;

        let mut agent = AdaptiveAgent::new(tracker, detector, selector, self.config.candidate_names())?
            .with_session(self.config.run_id.clone())
            .with_baseline(self.baseline()?);

        if !self.config.responses.is_empty() {
            agent = agent.with_valuation(ValuationSource::Payoffs(self.payoff_matrix()?));
            let exploitability: BTreeMap<StrategyId, f64> = self
                .config
                .responses
                .iter()
                .filter_map(|r| r.exploitability.map(|e| (StrategyId::from(r.name.as_str()), e)))
                .collect();
            if !exploitability.is_empty() {
                agent = agent.with_exploitability(exploitability);
            }
        }
        Ok(agent)
    }

    fn payoff_matrix(&self) -> Result<PayoffMatrix, RunnerError> {
        let mut matrix = PayoffMatrix::new();
        for response in &self.config.responses {
            for (hypothesis, payoff) in &response.payoffs {
                matrix.set(response.name.as_str(), hypothesis.as_str(), *payoff)?;
            }
        }
        Ok(matrix)
    }

    fn baseline(&self) -> Result<Baseline, RunnerError> {
        let baseline = match &self.config.selection.baseline {
            BaselineConfig::Uniform => Baseline::Uniform,
            BaselineConfig::Mixture { weights } => {
                Baseline::mixture(weights.iter().map(|(k, v)| (k.as_str(), *v)))?
            }
            BaselineConfig::Behavior { reference, induced } => Baseline::behavior(
                reference.clone(),
                induced
                    .iter()
                    .map(|(k, v)| (StrategyId::from(k.as_str()), v.clone()))
                    .collect(),
            )?,
        };
        Ok(baseline)
    }

    /// Belief-weighted value of the chosen response, when payoffs exist.
    fn expected_payoff(&self, decision: &RoundDecision) -> Option<f64> {
        if self.config.responses.is_empty() {
            return None;
        }
        decision.selection.chosen_score().and_then(|c| c.value)
    }
}

fn build_policy(
    name: &str,
    kind: PolicyKind,
    table: Option<&PolicyTable>,
) -> Result<Box<dyn Policy>, RunnerError> {
    match (kind, table) {
        (PolicyKind::Uniform, _) => Ok(Box::new(UniformPolicy)),
        (PolicyKind::Table, Some(table)) => Ok(Box::new(TablePolicy::new(name, table.clone())?)),
        (PolicyKind::Table, None) => Err(RunnerError::setup(format!(
            "table policy '{name}' has no table"
        ))),
    }
}

fn ensure_parent(path: Option<&Path>) -> Result<(), RunnerError> {
    if let Some(dir) = path.filter(|dir| !dir.as_os_str().is_empty()) {
        fs::create_dir_all(dir)?;
    }
    Ok(())
}

fn write_round_row(
    writer: &mut BufWriter<File>,
    run_id: &str,
    round: u64,
    observation: &Observation,
    decision: &RoundDecision,
    expected_payoff: Option<f64>,
) -> Result<(), RunnerError> {
    let row = RoundLogRow {
        run_id,
        round,
        accepted_round: decision.round,
        decision_point: &observation.point.key,
        action: observation.action,
        posterior: decision.posterior.to_map(),
        max_posterior: decision.max_posterior(),
        map_estimate: decision.posterior.map_estimate().map(StrategyId::as_str),
        novelty: decision.novelty,
        chosen: decision.selection.chosen.as_str(),
        fallback: decision.fallback_label(),
        expected_payoff,
    };

    serde_json::to_writer(&mut *writer, &row)?;
    writer.write_all(b"\n")?;
    Ok(())
}

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("{0}")]
    Core(#[from] CoreError),
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
    #[error("failed to serialize log row: {source}")]
    Serialize {
        #[from]
        source: serde_json::Error,
    },
    #[error("experiment setup failed: {message}")]
    Setup { message: String },
    #[error("analytics error: {0}")]
    Analytics(#[from] AnalyticsError),
    #[error("telemetry summarisation failed: {0}")]
    Telemetry(#[from] TelemetryError),
}

impl RunnerError {
    fn setup(message: impl Into<String>) -> Self {
        RunnerError::Setup {
            message: message.into(),
        }
    }
}
