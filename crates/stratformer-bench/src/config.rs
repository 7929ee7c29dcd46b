use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use stratformer_core::belief::PRIOR_TOLERANCE;
use thiserror::Error;
use tracing::Level;

const DEFAULT_WINDOW_SIZE: usize = 8;
const DEFAULT_NOVELTY_THRESHOLD: f64 = 0.5;
const RUN_ID_ALLOWED: &str = "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789._-";

/// Action weights per decision-point key.
pub type PolicyTable = BTreeMap<String, BTreeMap<u32, f64>>;

/// Root experiment configuration loaded from YAML.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ExperimentConfig {
    pub run_id: String,
    #[serde(default)]
    pub seed: Option<u64>,
    pub rounds: usize,
    pub hypotheses: Vec<HypothesisConfig>,
    pub opponent: OpponentConfig,
    pub decision_points: Vec<DecisionPointConfig>,
    #[serde(default)]
    pub responses: Vec<ResponseConfig>,
    #[serde(default)]
    pub novelty: NoveltyConfig,
    #[serde(default)]
    pub selection: SelectionConfig,
    pub outputs: OutputsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl ExperimentConfig {
    /// Load configuration from a YAML file on disk.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let path_buf = path.to_path_buf();
        let file = File::open(path).map_err(|source| ConfigError::Read {
            source,
            path: path_buf.clone(),
        })?;
        let reader = BufReader::new(file);
        let mut cfg: ExperimentConfig =
            serde_yaml::from_reader(reader).map_err(|source| ConfigError::Parse {
                source,
                path: path_buf.clone(),
            })?;
        cfg.validate().map_err(|source| ConfigError::Invalid {
            path: path_buf,
            source,
        })?;
        Ok(cfg)
    }

    /// Validate the configuration without performing I/O.
    pub fn validate(&mut self) -> Result<(), ValidationError> {
        validate_run_id(&self.run_id)?;
        if self.rounds == 0 {
            return Err(invalid("rounds", "number of rounds must be greater than zero"));
        }
        validate_hypotheses(&self.hypotheses)?;
        validate_decision_points(&self.decision_points)?;
        self.opponent.validate(&self.hypotheses)?;
        validate_responses(&self.responses, &self.hypotheses)?;
        self.novelty.validate()?;
        self.selection.validate(&self.candidate_names())?;
        self.outputs.validate(&self.run_id)?;
        self.logging.normalize();
        Ok(())
    }

    /// Resolve output templates (e.g., `{run_id}` placeholders) into concrete paths.
    pub fn resolved_outputs(&self) -> ResolvedOutputs {
        ResolvedOutputs {
            jsonl: resolve_template(&self.run_id, &self.outputs.jsonl),
            summary_md: resolve_template(&self.run_id, &self.outputs.summary_md),
            plots_dir: resolve_template(&self.run_id, &self.outputs.plots_dir),
        }
    }

    /// Prior masses in hypothesis order; uniform when no hypothesis sets one.
    pub fn prior(&self) -> Vec<(String, f64)> {
        if self.hypotheses.iter().all(|h| h.prior.is_none()) {
            let mass = 1.0 / self.hypotheses.len().max(1) as f64;
            return self
                .hypotheses
                .iter()
                .map(|h| (h.name.clone(), mass))
                .collect();
        }
        self.hypotheses
            .iter()
            .map(|h| (h.name.clone(), h.prior.unwrap_or(0.0)))
            .collect()
    }

    /// Response names when payoffs are configured, otherwise the hypotheses.
    pub fn candidate_names(&self) -> Vec<String> {
        if self.responses.is_empty() {
            self.hypotheses.iter().map(|h| h.name.clone()).collect()
        } else {
            self.responses.iter().map(|r| r.name.clone()).collect()
        }
    }
}

/// One opponent hypothesis tracked by the posterior.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct HypothesisConfig {
    pub name: String,
    pub kind: PolicyKind,
    #[serde(default)]
    pub prior: Option<f64>,
    #[serde(default)]
    pub table: Option<PolicyTable>,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    Uniform,
    Table,
}

/// The simulated opponent: a named hypothesis, or a table no hypothesis
/// matches.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct OpponentConfig {
    #[serde(default)]
    pub hypothesis: Option<String>,
    #[serde(default)]
    pub table: Option<PolicyTable>,
}

impl OpponentConfig {
    fn validate(&self, hypotheses: &[HypothesisConfig]) -> Result<(), ValidationError> {
        match (&self.hypothesis, &self.table) {
            (Some(name), None) => {
                if !hypotheses.iter().any(|h| &h.name == name) {
                    return Err(invalid(
                        "opponent.hypothesis",
                        format!("hypothesis '{name}' is not defined"),
                    ));
                }
                Ok(())
            }
            (None, Some(table)) => validate_table("opponent.table", table),
            _ => Err(invalid(
                "opponent",
                "exactly one of 'hypothesis' or 'table' must be set",
            )),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct DecisionPointConfig {
    pub key: String,
    pub legal_actions: Vec<u32>,
}

/// A candidate response with its payoff against each hypothesis.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ResponseConfig {
    pub name: String,
    #[serde(default)]
    pub payoffs: BTreeMap<String, f64>,
    #[serde(default)]
    pub exploitability: Option<f64>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct NoveltyConfig {
    #[serde(default = "default_window_size")]
    pub window_size: usize,
    #[serde(default = "default_novelty_threshold")]
    pub threshold: f64,
}

impl Default for NoveltyConfig {
    fn default() -> Self {
        Self {
            window_size: DEFAULT_WINDOW_SIZE,
            threshold: DEFAULT_NOVELTY_THRESHOLD,
        }
    }
}

impl NoveltyConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        if self.window_size == 0 {
            return Err(invalid("novelty.window_size", "window must hold at least one sample"));
        }
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(invalid(
                "novelty.threshold",
                format!("threshold {} is outside [0, 1]", self.threshold),
            ));
        }
        Ok(())
    }
}

fn default_window_size() -> usize {
    DEFAULT_WINDOW_SIZE
}

fn default_novelty_threshold() -> f64 {
    DEFAULT_NOVELTY_THRESHOLD
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct SelectionConfig {
    #[serde(default)]
    pub kl_reg: f64,
    #[serde(default)]
    pub exploitability_limit: Option<f64>,
    #[serde(default)]
    pub baseline: BaselineConfig,
}

impl SelectionConfig {
    fn validate(&self, candidates: &[String]) -> Result<(), ValidationError> {
        if !self.kl_reg.is_finite() || self.kl_reg < 0.0 {
            return Err(invalid(
                "selection.kl_reg",
                "regularization weight must be finite and non-negative",
            ));
        }
        if let Some(limit) = self.exploitability_limit
            && !limit.is_finite()
        {
            return Err(invalid(
                "selection.exploitability_limit",
                "limit must be finite when set",
            ));
        }
        self.baseline.validate(candidates)
    }
}

/// Divergence reference for the selector.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BaselineConfig {
    #[default]
    Uniform,
    Mixture {
        weights: BTreeMap<String, f64>,
    },
    Behavior {
        reference: Vec<f64>,
        induced: BTreeMap<String, Vec<f64>>,
    },
}

impl BaselineConfig {
    fn validate(&self, candidates: &[String]) -> Result<(), ValidationError> {
        match self {
            BaselineConfig::Uniform => Ok(()),
            BaselineConfig::Mixture { weights } => {
                for name in weights.keys() {
                    if !candidates.contains(name) {
                        return Err(invalid(
                            "selection.baseline.weights",
                            format!("'{name}' is not a candidate"),
                        ));
                    }
                }
                validate_mass("selection.baseline.weights", weights.values().copied())
            }
            BaselineConfig::Behavior { reference, induced } => {
                validate_mass("selection.baseline.reference", reference.iter().copied())?;
                for (name, dist) in induced {
                    if !candidates.contains(name) {
                        return Err(invalid(
                            "selection.baseline.induced",
                            format!("'{name}' is not a candidate"),
                        ));
                    }
                    if dist.len() != reference.len() {
                        return Err(invalid(
                            "selection.baseline.induced",
                            format!("'{name}' does not match the reference length"),
                        ));
                    }
                    validate_mass("selection.baseline.induced", dist.iter().copied())?;
                }
                Ok(())
            }
        }
    }
}

/// Output artifact configuration.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct OutputsConfig {
    pub jsonl: String,
    pub summary_md: String,
    pub plots_dir: String,
}

impl OutputsConfig {
    fn validate(&self, run_id: &str) -> Result<(), ValidationError> {
        for (label, value) in [
            ("outputs.jsonl", &self.jsonl),
            ("outputs.summary_md", &self.summary_md),
            ("outputs.plots_dir", &self.plots_dir),
        ] {
            if value.trim().is_empty() {
                return Err(invalid(label, "path must not be empty"));
            }

            let resolved = resolve_template(run_id, value);
            if resolved.components().count() == 0 {
                return Err(invalid(label, "resolved path is invalid"));
            }
        }
        Ok(())
    }
}

/// Logging configuration defaults to disabled structured logs.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct LoggingConfig {
    #[serde(default)]
    pub enable_structured: bool,
    #[serde(default = "default_tracing_level")]
    pub tracing_level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enable_structured: false,
            tracing_level: default_tracing_level(),
        }
    }
}

impl LoggingConfig {
    fn normalize(&mut self) {
        if self.tracing_level.trim().is_empty() {
            self.tracing_level = default_tracing_level();
        }
    }

    pub fn level(&self) -> Option<Level> {
        match self.tracing_level.to_ascii_lowercase().as_str() {
            "trace" => Some(Level::TRACE),
            "debug" => Some(Level::DEBUG),
            "info" => Some(Level::INFO),
            "warn" | "warning" => Some(Level::WARN),
            "error" => Some(Level::ERROR),
            _ => None,
        }
    }
}

fn default_tracing_level() -> String {
    "info".to_string()
}

fn invalid(field: impl Into<String>, message: impl Into<String>) -> ValidationError {
    ValidationError::InvalidField {
        field: field.into(),
        message: message.into(),
    }
}

fn validate_run_id(run_id: &str) -> Result<(), ValidationError> {
    if run_id.trim().is_empty() {
        return Err(invalid("run_id", "run_id must not be empty"));
    }

    if !run_id.chars().all(|c| RUN_ID_ALLOWED.contains(c)) {
        return Err(invalid(
            "run_id",
            "run_id may only contain alphanumeric characters, '.', '_' or '-'",
        ));
    }

    Ok(())
}

fn validate_name(field: &str, name: &str) -> Result<(), ValidationError> {
    if name.trim().is_empty() {
        return Err(invalid(field, "name must not be empty"));
    }
    if !name.chars().all(|c| RUN_ID_ALLOWED.contains(c)) {
        return Err(invalid(
            format!("{field}[{name}]"),
            "name contains invalid characters",
        ));
    }
    Ok(())
}

fn validate_hypotheses(hypotheses: &[HypothesisConfig]) -> Result<(), ValidationError> {
    if hypotheses.is_empty() {
        return Err(invalid("hypotheses", "at least one hypothesis must be specified"));
    }

    let mut seen = HashSet::new();
    for hypothesis in hypotheses {
        validate_name("hypotheses.name", &hypothesis.name)?;
        if !seen.insert(hypothesis.name.as_str()) {
            return Err(invalid(
                "hypotheses",
                format!("hypothesis '{}' defined more than once", hypothesis.name),
            ));
        }
        match (hypothesis.kind, &hypothesis.table) {
            (PolicyKind::Table, Some(table)) => {
                validate_table(&format!("hypotheses[{}].table", hypothesis.name), table)?
            }
            (PolicyKind::Table, None) => {
                return Err(invalid(
                    format!("hypotheses[{}].table", hypothesis.name),
                    "table policies need a table",
                ));
            }
            (PolicyKind::Uniform, Some(_)) => {
                return Err(invalid(
                    format!("hypotheses[{}].table", hypothesis.name),
                    "uniform policies take no table",
                ));
            }
            (PolicyKind::Uniform, None) => {}
        }
    }

    let set = hypotheses.iter().filter(|h| h.prior.is_some()).count();
    if set > 0 && set < hypotheses.len() {
        return Err(invalid(
            "hypotheses.prior",
            "either every hypothesis sets a prior or none does",
        ));
    }
    if set > 0 {
        validate_mass("hypotheses.prior", hypotheses.iter().filter_map(|h| h.prior))?;
    }
    Ok(())
}

fn validate_table(field: &str, table: &PolicyTable) -> Result<(), ValidationError> {
    for (state, row) in table {
        if row.values().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(invalid(
                field,
                format!("state '{state}' has a negative or non-finite weight"),
            ));
        }
        if row.values().sum::<f64>() <= 0.0 {
            return Err(invalid(field, format!("state '{state}' has no positive weight")));
        }
    }
    Ok(())
}

fn validate_decision_points(points: &[DecisionPointConfig]) -> Result<(), ValidationError> {
    if points.is_empty() {
        return Err(invalid(
            "decision_points",
            "at least one decision point must be specified",
        ));
    }
    let mut seen = HashSet::new();
    for point in points {
        if !seen.insert(point.key.as_str()) {
            return Err(invalid(
                "decision_points",
                format!("decision point '{}' defined more than once", point.key),
            ));
        }
        if point.legal_actions.is_empty() {
            return Err(invalid(
                format!("decision_points[{}].legal_actions", point.key),
                "at least one legal action is required",
            ));
        }
    }
    Ok(())
}

fn validate_responses(
    responses: &[ResponseConfig],
    hypotheses: &[HypothesisConfig],
) -> Result<(), ValidationError> {
    let mut seen = HashSet::new();
    for response in responses {
        validate_name("responses.name", &response.name)?;
        if !seen.insert(response.name.as_str()) {
            return Err(invalid(
                "responses",
                format!("response '{}' defined more than once", response.name),
            ));
        }
        for (hypothesis, payoff) in &response.payoffs {
            if !hypotheses.iter().any(|h| &h.name == hypothesis) {
                return Err(invalid(
                    format!("responses[{}].payoffs", response.name),
                    format!("hypothesis '{hypothesis}' is not defined"),
                ));
            }
            if !payoff.is_finite() {
                return Err(invalid(
                    format!("responses[{}].payoffs", response.name),
                    "payoffs must be finite",
                ));
            }
        }
        if let Some(value) = response.exploitability
            && !value.is_finite()
        {
            return Err(invalid(
                format!("responses[{}].exploitability", response.name),
                "exploitability must be finite",
            ));
        }
    }
    Ok(())
}

fn validate_mass(field: &str, values: impl Iterator<Item = f64>) -> Result<(), ValidationError> {
    let mut total = 0.0;
    for value in values {
        if !value.is_finite() || value < 0.0 {
            return Err(invalid(field, format!("mass {value} is negative or not finite")));
        }
        total += value;
    }
    if (total - 1.0).abs() > PRIOR_TOLERANCE {
        return Err(invalid(field, format!("masses sum to {total}, expected 1")));
    }
    Ok(())
}

fn resolve_template(run_id: &str, template: &str) -> PathBuf {
    let replaced = template.replace("{run_id}", run_id);
    PathBuf::from(replaced)
}

/// Fully resolved output paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedOutputs {
    pub jsonl: PathBuf,
    pub summary_md: PathBuf,
    pub plots_dir: PathBuf,
}

/// Errors surfaced when loading configuration files.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path:?}: {source}")]
    Read {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },
    #[error("failed to parse config {path:?}: {source}")]
    Parse {
        #[source]
        source: serde_yaml::Error,
        path: PathBuf,
    },
    #[error("invalid configuration in {path:?}: {source}")]
    Invalid {
        path: PathBuf,
        source: ValidationError,
    },
}

impl ConfigError {
    pub fn path(&self) -> &Path {
        match self {
            ConfigError::Read { path, .. }
            | ConfigError::Parse { path, .. }
            | ConfigError::Invalid { path, .. } => path.as_path(),
        }
    }
}

/// Validation failures captured with contextual metadata.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("{field}: {message}")]
    InvalidField { field: String, message: String },
}
