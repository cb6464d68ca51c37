//! Pipeline progress reporting.
//!
//! Reports what each stage is doing during `hinv run` so users can follow a
//! long fetch. Progress is emitted on **stderr** so stdout stays parseable;
//! diagnostics go through `tracing` and are independent of this.

use std::io::Write;
use std::sync::Arc;

use crate::pipeline::Stage;

/// A single progress event.
#[derive(Clone, Debug)]
pub enum ProgressEvent {
    /// A stage is starting for `sources` sources.
    StageStarted { stage: Stage, sources: usize },
    /// `n` records handled so far for one source in one stage.
    Records { stage: Stage, source: String, n: u64 },
    /// One source finished a stage. `error` is set when it failed.
    SourceFinished {
        stage: Stage,
        source: String,
        error: Option<String>,
    },
}

/// Reports pipeline progress. Shared between concurrently running sources.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// Human-friendly progress on stderr: "fetch qualys  1,234 records".
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: ProgressEvent) {
        let line = match &event {
            ProgressEvent::StageStarted { stage, sources } => {
                format!("{}  starting ({} sources)\n", stage, sources)
            }
            ProgressEvent::Records { stage, source, n } => {
                format!("{} {}  {} records\n", stage, source, format_number(*n))
            }
            ProgressEvent::SourceFinished {
                stage,
                source,
                error: None,
            } => format!("{} {}  done\n", stage, source),
            ProgressEvent::SourceFinished {
                stage,
                source,
                error: Some(error),
            } => format!("{} {}  FAILED: {}\n", stage, source, error),
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: ProgressEvent) {
        let obj = match &event {
            ProgressEvent::StageStarted { stage, sources } => serde_json::json!({
                "event": "stage_started",
                "stage": stage.as_str(),
                "sources": sources
            }),
            ProgressEvent::Records { stage, source, n } => serde_json::json!({
                "event": "progress",
                "stage": stage.as_str(),
                "source": source,
                "n": n
            }),
            ProgressEvent::SourceFinished {
                stage,
                source,
                error,
            } => serde_json::json!({
                "event": "source_finished",
                "stage": stage.as_str(),
                "source": source,
                "ok": error.is_none(),
                "error": error
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: ProgressEvent) {}
}

pub(crate) fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Arc<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Arc::new(NoProgress),
            ProgressMode::Human => Arc::new(StderrProgress),
            ProgressMode::Json => Arc::new(JsonProgress),
        }
    }
}
