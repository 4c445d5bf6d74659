use colored::Colorize;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

/// Structured log events for the generator-judge pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LogEvent {
    PipelineStarted {
        conversation_id: String,
        mode: String,
        message_preview: String,
    },
    CritiqueStarted {
        message_id: String,
    },
    GenerationStarted {
        iteration: u32,
    },
    GenerationCompleted {
        iteration: u32,
        chars: usize,
        duration_secs: f64,
    },
    EvaluationStarted {
        iteration: u32,
    },
    CriterionScored {
        iteration: u32,
        name: String,
        score: f64,
        passed: bool,
    },
    EvaluationCompleted {
        iteration: u32,
        overall_score: f64,
        should_regenerate: bool,
    },
    RefinementScheduled {
        next_iteration: u32,
    },
    PipelineCompleted {
        conversation_id: String,
        iterations: u32,
        overall_score: f64,
        duration_secs: f64,
    },
    PipelineCancelled {
        conversation_id: String,
    },
    ErrorEncountered {
        conversation_id: String,
        error: String,
    },
}

impl LogEvent {
    /// Add a timestamp to serialize with the event
    fn with_timestamp(&self) -> serde_json::Value {
        let mut value = serde_json::to_value(self).unwrap_or_default();
        if let Some(obj) = value.as_object_mut() {
            obj.insert(
                "timestamp".to_string(),
                serde_json::Value::String(chrono::Utc::now().to_rfc3339()),
            );
        }
        value
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable format with colors and visual structure
    #[default]
    Pretty,
    /// JSON lines format for machine consumption
    Json,
    /// Compact single-line format
    Compact,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            "compact" => Ok(LogFormat::Compact),
            _ => Err(format!("Unknown log format: {}", s)),
        }
    }
}

/// Logger for pipeline events - handles both console output and file logging
pub struct Logger {
    format: LogFormat,
    file_writer: Option<Mutex<File>>,
}

impl Logger {
    pub fn new(format: LogFormat) -> Self {
        Self {
            format,
            file_writer: None,
        }
    }

    /// Create a logger with file output in addition to console
    pub fn with_file(format: LogFormat, log_path: &Path) -> std::io::Result<Self> {
        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)?;

        Ok(Self {
            format,
            file_writer: Some(Mutex::new(file)),
        })
    }

    pub fn log(&self, event: &LogEvent) {
        // File output is always JSON lines
        if let Some(ref writer) = self.file_writer {
            if let Ok(mut file) = writer.lock() {
                let json = event.with_timestamp();
                let _ = writeln!(file, "{}", json);
            }
        }

        match self.format {
            LogFormat::Json => self.log_json(event),
            LogFormat::Pretty => self.log_pretty(event),
            LogFormat::Compact => self.log_compact(event),
        }
    }

    fn log_json(&self, event: &LogEvent) {
        if let Ok(json) = serde_json::to_string(event) {
            let _ = writeln!(std::io::stderr(), "{}", json);
        }
    }

    fn log_pretty(&self, event: &LogEvent) {
        let mut stderr = std::io::stderr();
        match event {
            LogEvent::PipelineStarted {
                conversation_id,
                mode,
                message_preview,
            } => {
                let _ = writeln!(stderr);
                let _ = writeln!(
                    stderr,
                    "{} {} {}",
                    "gavel".bold().bright_white(),
                    conversation_id.dimmed(),
                    format!("[{}]", mode).bright_blue()
                );
                let _ = writeln!(
                    stderr,
                    "  {} {}",
                    "Message:".dimmed(),
                    Self::truncate(message_preview, 70).dimmed()
                );
                let _ = writeln!(stderr);
            }
            LogEvent::CritiqueStarted { .. } => {
                let _ = writeln!(
                    stderr,
                    "  {} {}",
                    "▶".bright_yellow(),
                    "INPUT CRITIQUE".bright_yellow().bold()
                );
            }
            LogEvent::GenerationStarted { iteration } => {
                let header = format!("── Iteration {} ", iteration);
                let _ = writeln!(stderr, "{}", header.bright_blue().bold());
                let _ = writeln!(
                    stderr,
                    "  {} {}",
                    "▶".bright_cyan(),
                    "GENERATOR".bright_cyan().bold()
                );
            }
            LogEvent::GenerationCompleted {
                chars,
                duration_secs,
                ..
            } => {
                let _ = writeln!(
                    stderr,
                    "    {} {} chars ({:.1}s)",
                    "✓".bright_green(),
                    chars,
                    duration_secs
                );
            }
            LogEvent::EvaluationStarted { .. } => {
                let _ = writeln!(
                    stderr,
                    "  {} {}",
                    "▶".bright_magenta(),
                    "JUDGE".bright_magenta().bold()
                );
            }
            LogEvent::CriterionScored {
                name,
                score,
                passed,
                ..
            } => {
                let mark = if *passed {
                    "✓".bright_green().to_string()
                } else {
                    "✗".bright_red().to_string()
                };
                let _ = writeln!(stderr, "    {} {} {:.0}", mark, name, score);
            }
            LogEvent::EvaluationCompleted {
                overall_score,
                should_regenerate,
                ..
            } => {
                let decision = if *should_regenerate {
                    format!("→ Overall {:.1}, refining", overall_score)
                        .bright_yellow()
                        .to_string()
                } else {
                    format!("✓ Overall {:.1}, accepted", overall_score)
                        .bright_green()
                        .to_string()
                };
                let _ = writeln!(stderr, "    {}", decision);
                let _ = writeln!(stderr);
            }
            LogEvent::RefinementScheduled { .. } => {}
            LogEvent::PipelineCompleted {
                iterations,
                overall_score,
                duration_secs,
                ..
            } => {
                let _ = writeln!(
                    stderr,
                    "{} Completed after {} iteration(s), score {:.1} ({:.1}s)",
                    "✓".bright_green(),
                    iterations,
                    overall_score,
                    duration_secs
                );
            }
            LogEvent::PipelineCancelled { conversation_id } => {
                let _ = writeln!(
                    stderr,
                    "{} Cancelled ({})",
                    "⚠".bright_yellow(),
                    conversation_id.dimmed()
                );
            }
            LogEvent::ErrorEncountered { error, .. } => {
                let _ = writeln!(stderr, "{} {}", "✗".bright_red(), error.bright_red());
            }
        }
    }

    fn log_compact(&self, event: &LogEvent) {
        let mut stderr = std::io::stderr();
        let timestamp = chrono::Utc::now().format("%H:%M:%S");
        let msg = match event {
            LogEvent::PipelineStarted {
                conversation_id, ..
            } => format!("[{}] pipeline:start:{}", timestamp, conversation_id),
            LogEvent::CritiqueStarted { message_id } => {
                format!("[{}] critique:start:{}", timestamp, message_id)
            }
            LogEvent::GenerationStarted { iteration } => {
                format!("[{}] generator:start:{}", timestamp, iteration)
            }
            LogEvent::GenerationCompleted {
                iteration,
                chars,
                duration_secs,
            } => format!(
                "[{}] generator:done:{} {}ch {:.1}s",
                timestamp, iteration, chars, duration_secs
            ),
            LogEvent::EvaluationStarted { iteration } => {
                format!("[{}] judge:start:{}", timestamp, iteration)
            }
            LogEvent::CriterionScored {
                name, score, passed, ..
            } => format!(
                "[{}] judge:{}={:.0}{}",
                timestamp,
                name,
                score,
                if *passed { "" } else { " FAIL" }
            ),
            LogEvent::EvaluationCompleted {
                iteration,
                overall_score,
                should_regenerate,
            } => format!(
                "[{}] judge:done:{} {:.1} {}",
                timestamp,
                iteration,
                overall_score,
                if *should_regenerate { "REFINE" } else { "ACCEPT" }
            ),
            LogEvent::RefinementScheduled { next_iteration } => {
                format!("[{}] refine:{}", timestamp, next_iteration)
            }
            LogEvent::PipelineCompleted {
                iterations,
                overall_score,
                duration_secs,
                ..
            } => format!(
                "[{}] pipeline:done:{} {:.1} {:.1}s",
                timestamp, iterations, overall_score, duration_secs
            ),
            LogEvent::PipelineCancelled { conversation_id } => {
                format!("[{}] pipeline:cancel:{}", timestamp, conversation_id)
            }
            LogEvent::ErrorEncountered { error, .. } => {
                format!("[{}] error:{}", timestamp, error)
            }
        };
        let _ = writeln!(stderr, "{}", msg);
    }

    fn truncate(s: &str, max_len: usize) -> String {
        if s.chars().count() > max_len {
            let truncated: String = s.chars().take(max_len.saturating_sub(3)).collect();
            format!("{}...", truncated)
        } else {
            s.to_string()
        }
    }
}
