//! Indexer progress reporting.
//!
//! Reports what `agent-nav index` is doing so long runs are observable.
//! Progress is emitted on **stderr** so stdout remains parseable for scripts.

use std::io::Write;

/// How a single record was produced.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ExtractionMode {
    /// Content hash matched the cache; nothing was recomputed.
    Cached,
    Llm,
    Heuristic,
}

impl ExtractionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractionMode::Cached => "cached",
            ExtractionMode::Llm => "llm",
            ExtractionMode::Heuristic => "heuristic",
        }
    }
}

#[derive(Clone, Debug)]
pub enum IndexProgressEvent {
    /// README discovery finished.
    Discovered { total: u64 },
    /// One project processed; `n` counts completions so far.
    Extracted {
        id: String,
        mode: ExtractionMode,
        n: u64,
        total: u64,
    },
}

/// Receives progress events from the indexer's worker pool.
pub trait IndexProgressReporter: Send + Sync {
    fn report(&self, event: IndexProgressEvent);
}

/// Human-friendly progress on stderr: "index  1,234 / 5,000  rag_pdf_chat (llm)".
pub struct StderrProgress;

impl IndexProgressReporter for StderrProgress {
    fn report(&self, event: IndexProgressEvent) {
        let line = match &event {
            IndexProgressEvent::Discovered { total } => {
                format!("index  discovered {} READMEs\n", format_number(*total))
            }
            IndexProgressEvent::Extracted { id, mode, n, total } => format!(
                "index  {} / {}  {} ({})\n",
                format_number(*n),
                format_number(*total),
                id,
                mode.as_str()
            ),
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl IndexProgressReporter for JsonProgress {
    fn report(&self, event: IndexProgressEvent) {
        let obj = match &event {
            IndexProgressEvent::Discovered { total } => serde_json::json!({
                "event": "progress",
                "phase": "discovered",
                "total": total
            }),
            IndexProgressEvent::Extracted { id, mode, n, total } => serde_json::json!({
                "event": "progress",
                "phase": "extracted",
                "id": id,
                "mode": mode.as_str(),
                "n": n,
                "total": total
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

pub struct NoProgress;

impl IndexProgressReporter for NoProgress {
    fn report(&self, _event: IndexProgressEvent) {}
}

pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
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

    /// Parses `--progress`; `None` picks the TTY default.
    pub fn from_flag(flag: Option<&str>) -> anyhow::Result<Self> {
        match flag.map(|f| f.trim().to_lowercase()) {
            None => Ok(Self::default_for_tty()),
            Some(f) => match f.as_str() {
                "off" | "none" => Ok(ProgressMode::Off),
                "human" => Ok(ProgressMode::Human),
                "json" => Ok(ProgressMode::Json),
                other => anyhow::bail!("Unknown progress mode: {}. Use off, human, or json.", other),
            },
        }
    }

    pub fn reporter(&self) -> Box<dyn IndexProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_number_comma() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }

    #[test]
    fn progress_flag_parsing() {
        assert_eq!(ProgressMode::from_flag(Some("JSON")).unwrap(), ProgressMode::Json);
        assert_eq!(ProgressMode::from_flag(Some("off")).unwrap(), ProgressMode::Off);
        assert!(ProgressMode::from_flag(Some("loud")).is_err());
    }
}
