use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

const ROUND_TARGET: &str = "stratformer_agent::round";
const SELECT_TARGET: &str = "stratformer_core::select";
const POSTERIOR_TARGET: &str = "stratformer_core::posterior";

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("{context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse telemetry JSON: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Default, Serialize)]
pub struct TelemetrySummary {
    pub rounds: RoundTelemetrySummary,
    pub selector_warnings: usize,
    pub eliminations: usize,
}

#[derive(Debug, Default, Serialize)]
pub struct RoundTelemetrySummary {
    pub count: usize,
    pub novelty_count: usize,
    pub rejected: usize,
    pub avg_max_posterior: Option<f64>,
    pub avg_entropy: Option<f64>,
    pub fallback_counts: BTreeMap<String, usize>,
    pub chosen_counts: BTreeMap<String, usize>,
}

#[derive(Debug)]
struct Average {
    sum: f64,
    count: usize,
}

impl Average {
    fn new() -> Self {
        Self { sum: 0.0, count: 0 }
    }

    fn add(&mut self, value: f64) {
        self.sum += value;
        self.count += 1;
    }

    fn mean(&self) -> Option<f64> {
        if self.count == 0 {
            None
        } else {
            Some(self.sum / self.count as f64)
        }
    }
}

/// Aggregate the agent and selector events captured in a JSON telemetry log.
pub fn summarise_telemetry(path: &Path) -> Result<TelemetrySummary, TelemetryError> {
    if !path.exists() {
        return Ok(TelemetrySummary::default());
    }

    let file = File::open(path).map_err(|source| TelemetryError::Io {
        context: "opening telemetry log",
        source,
    })?;
    let reader = BufReader::new(file);

    let mut summary = TelemetrySummary::default();
    let mut max_posterior_avg = Average::new();
    let mut entropy_avg = Average::new();

    for line in reader.lines() {
        let line = line.map_err(|source| TelemetryError::Io {
            context: "reading telemetry line",
            source,
        })?;
        if line.trim().is_empty() {
            continue;
        }

        let payload: Value = serde_json::from_str(&line)?;
        let target = payload
            .get("target")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let level = payload
            .get("level")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let fields = payload
            .get("fields")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();

        match target {
            ROUND_TARGET if level == "WARN" => summary.rounds.rejected += 1,
            ROUND_TARGET if fields.contains_key("chosen") => {
                let rounds = &mut summary.rounds;
                rounds.count += 1;

                if fields.get("novelty").and_then(Value::as_bool) == Some(true) {
                    rounds.novelty_count += 1;
                }
                if let Some(value) = fields.get("max_posterior").and_then(Value::as_f64) {
                    max_posterior_avg.add(value);
                }
                if let Some(value) = fields.get("entropy").and_then(Value::as_f64) {
                    entropy_avg.add(value);
                }

                let fallback = label(fields.get("fallback"));
                if fallback != "none" {
                    *rounds.fallback_counts.entry(fallback.to_string()).or_insert(0) += 1;
                }
                let chosen = label(fields.get("chosen"));
                *rounds.chosen_counts.entry(chosen.to_string()).or_insert(0) += 1;
            }
            SELECT_TARGET if level == "WARN" => summary.selector_warnings += 1,
            POSTERIOR_TARGET if level == "WARN" => summary.eliminations += 1,
            _ => {}
        }
    }

    summary.rounds.avg_max_posterior = max_posterior_avg.mean();
    summary.rounds.avg_entropy = entropy_avg.mean();

    Ok(summary)
}

fn label(value: Option<&Value>) -> &str {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or("<unset>")
}

pub fn write_summary_outputs(
    telemetry_path: &Path,
    output_dir: &Path,
) -> Result<Option<TelemetryOutputs>, TelemetryError> {
    if !telemetry_path.exists() {
        return Ok(None);
    }

    let summary = summarise_telemetry(telemetry_path)?;
    let json_path = output_dir.join("telemetry_summary.json");
    let md_path = output_dir.join("telemetry_summary.md");

    std::fs::write(
        &json_path,
        serde_json::to_vec_pretty(&summary).map_err(TelemetryError::from)?,
    )
    .map_err(|source| TelemetryError::Io {
        context: "writing telemetry summary json",
        source,
    })?;

    let markdown = render_markdown(&summary, telemetry_path);
    std::fs::write(&md_path, markdown).map_err(|source| TelemetryError::Io {
        context: "writing telemetry summary markdown",
        source,
    })?;

    Ok(Some(TelemetryOutputs {
        summary,
        json_path,
        markdown_path: md_path,
    }))
}

pub fn append_highlights_to_markdown(
    summary_path: &Path,
    outputs: &TelemetryOutputs,
) -> Result<(), TelemetryError> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(summary_path)
        .map_err(|source| TelemetryError::Io {
            context: "opening summary markdown for telemetry append",
            source,
        })?;

    let rounds = &outputs.summary.rounds;
    let mut section = String::new();
    section.push_str("\n## Telemetry Highlights\n");
    section.push_str(&format!("- Round events captured: {}\n", rounds.count));
    section.push_str(&format!("- Novelty rounds: {}\n", rounds.novelty_count));
    if rounds.rejected > 0 {
        section.push_str(&format!("- Rejected rounds: {}\n", rounds.rejected));
    }
    if let Some(value) = rounds.avg_max_posterior {
        section.push_str(&format!("- Avg max posterior: {:.3}\n", value));
    }
    if let Some(value) = rounds.avg_entropy {
        section.push_str(&format!("- Avg posterior entropy: {:.3} nats\n", value));
    }
    section.push_str(&format!(
        "- Selector fallback warnings: {}\n",
        outputs.summary.selector_warnings
    ));
    if !rounds.fallback_counts.is_empty() {
        section.push_str("- Fallbacks:\n");
        for (label, count) in &rounds.fallback_counts {
            section.push_str(&format!("  - {}: {}\n", label, count));
        }
    }

    write!(file, "{section}").map_err(|source| TelemetryError::Io {
        context: "writing telemetry highlights",
        source,
    })?;

    Ok(())
}

fn render_markdown(summary: &TelemetrySummary, telemetry_path: &Path) -> String {
    let mut output = String::new();
    output.push_str("# Telemetry Summary\n\n");
    output.push_str(&format!("- Source: `{}`\n", telemetry_path.display()));
    output.push('\n');

    output.push_str("## Rounds\n");
    output.push_str(&format!("- Events: {}\n", summary.rounds.count));
    output.push_str(&format!("- Novelty: {}\n", summary.rounds.novelty_count));
    output.push_str(&format!("- Rejected: {}\n", summary.rounds.rejected));
    if let Some(value) = summary.rounds.avg_max_posterior {
        output.push_str(&format!("- Avg max posterior: {:.3}\n", value));
    }
    if let Some(value) = summary.rounds.avg_entropy {
        output.push_str(&format!("- Avg entropy: {:.3}\n", value));
    }
    output.push('\n');

    output.push_str("## Chosen Responses\n");
    if summary.rounds.chosen_counts.is_empty() {
        output.push_str("- <none>\n");
    } else {
        for (label, count) in &summary.rounds.chosen_counts {
            output.push_str(&format!("- {}: {}\n", label, count));
        }
    }
    output.push('\n');

    output.push_str("## Warnings\n");
    output.push_str(&format!(
        "- Selector fallbacks: {}\n",
        summary.selector_warnings
    ));
    output.push_str(&format!("- Eliminations: {}\n", summary.eliminations));
    output
}

#[derive(Debug)]
pub struct TelemetryOutputs {
    pub summary: TelemetrySummary,
    pub json_path: PathBuf,
    pub markdown_path: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp_file(lines: &[&str]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().expect("create temp file");
        for line in lines {
            writeln!(file, "{line}").expect("write line");
        }
        file
    }

    #[test]
    fn summarises_round_and_warning_events() {
        let lines = vec![
            r#"{"level":"INFO","target":"stratformer_agent::round","fields":{"round":1,"max_posterior":0.4,"entropy":1.0,"novelty":false,"chosen":"counter_a","fallback":"none"}}"#,
            r#"{"level":"WARN","target":"stratformer_core::select","fields":{"message":"selection fell back","reason":"novelty"}}"#,
            r#"{"level":"INFO","target":"stratformer_agent::round","fields":{"round":2,"max_posterior":0.3,"entropy":1.1,"novelty":true,"chosen":"safe","fallback":"novelty"}}"#,
            r#"{"level":"WARN","target":"stratformer_core::posterior","fields":{"message":"evidence eliminated every hypothesis"}}"#,
            r#"{"level":"WARN","target":"stratformer_agent::round","fields":{"message":"round rejected"}}"#,
            r#"{"level":"INFO","target":"stratformer_agent::round","fields":{"message":"posterior reset to prior","round":2}}"#,
        ];
        let file = write_temp_file(&lines);
        let summary = summarise_telemetry(file.path()).expect("summarise");
        assert_eq!(summary.rounds.count, 2);
        assert_eq!(summary.rounds.novelty_count, 1);
        assert_eq!(summary.rounds.rejected, 1);
        assert!((summary.rounds.avg_max_posterior.unwrap() - 0.35).abs() < 1e-12);
        assert_eq!(summary.rounds.fallback_counts.get("novelty"), Some(&1));
        assert_eq!(summary.rounds.chosen_counts.get("safe"), Some(&1));
        assert_eq!(summary.selector_warnings, 1);
        assert_eq!(summary.eliminations, 1);
    }

    #[test]
    fn handles_missing_file() {
        let path = Path::new("tests/does/not/exist.jsonl");
        let summary = summarise_telemetry(path).expect("summarise missing file");
        assert_eq!(summary.rounds.count, 0);
        assert!(summary.rounds.avg_max_posterior.is_none());
        assert!(summary.rounds.chosen_counts.is_empty());
    }

    #[test]
    fn appends_highlights_to_summary_markdown() {
        let mut summary_file = tempfile::NamedTempFile::new().expect("summary temp file");
        write!(summary_file, "# Experiment Summary\n").expect("seed summary content");

        let mut fallback_counts = BTreeMap::new();
        fallback_counts.insert("novelty".to_string(), 3);
        let outputs = TelemetryOutputs {
            summary: TelemetrySummary {
                rounds: RoundTelemetrySummary {
                    count: 12,
                    novelty_count: 3,
                    rejected: 0,
                    avg_max_posterior: Some(0.612),
                    avg_entropy: Some(0.8),
                    fallback_counts,
                    chosen_counts: BTreeMap::new(),
                },
                selector_warnings: 3,
                eliminations: 0,
            },
            json_path: PathBuf::from("telemetry_summary.json"),
            markdown_path: PathBuf::from("telemetry_summary.md"),
        };

        append_highlights_to_markdown(summary_file.path(), &outputs).expect("append highlights");

        let contents = std::fs::read_to_string(summary_file.path()).expect("read summary file");
        assert!(contents.contains("## Telemetry Highlights"));
        assert!(contents.contains("Round events captured: 12"));
        assert!(contents.contains("Avg max posterior: 0.612"));
        assert!(contents.contains("novelty: 3"));
    }
}
