use crate::errors::LinebarsError;
use crate::log_retention::{enforce_total_budget, rotate_if_oversized, segment_bytes};
use serde::Serialize;
use serde_json::Value;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

pub const DEFAULT_DISK_BUDGET_BYTES: u64 = 50 * 1024 * 1024;
pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 4096;

#[derive(Debug, Clone)]
pub struct JsonlLogger {
    pub path: PathBuf,
    pub max_payload_bytes: usize,
    pub budget_bytes: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogEvent<'a> {
    pub level: &'a str,
    pub event_type: &'a str,
    pub payload: Value,
}

impl JsonlLogger {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
            budget_bytes: DEFAULT_DISK_BUDGET_BYTES,
        }
    }

    pub fn append(&self, event: &LogEvent<'_>) -> Result<(), LinebarsError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| LinebarsError::Io(e.to_string()))?;
        }
        rotate_if_oversized(&self.path, segment_bytes(self.budget_bytes))?;
        let truncated = truncate_json(event.payload.clone(), self.max_payload_bytes);
        let line = serde_json::to_string(&LogEvent {
            level: event.level,
            event_type: event.event_type,
            payload: truncated,
        })
        .map_err(|e| LinebarsError::Io(e.to_string()))?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| LinebarsError::Io(e.to_string()))?;
        file.write_all(line.as_bytes())
            .map_err(|e| LinebarsError::Io(e.to_string()))?;
        file.write_all(b"\n")
            .map_err(|e| LinebarsError::Io(e.to_string()))?;

        enforce_total_budget(&self.path, self.budget_bytes)?;
        Ok(())
    }
}

static RUN_LOGGER: OnceLock<Mutex<Option<JsonlLogger>>> = OnceLock::new();

fn logger_slot() -> &'static Mutex<Option<JsonlLogger>> {
    RUN_LOGGER.get_or_init(|| Mutex::new(None))
}

/// Route `append_run_log` to `logger` for the rest of the process (or until cleared).
pub fn init_run_log(logger: JsonlLogger) {
    if let Ok(mut slot) = logger_slot().lock() {
        *slot = Some(logger);
    }
}

pub fn clear_run_log() {
    if let Ok(mut slot) = logger_slot().lock() {
        *slot = None;
    }
}

/// Best-effort append to the run log. No-op until `init_run_log` is called.
pub fn append_run_log(level: &str, event_type: &str, payload: Value) {
    let logger = match logger_slot().lock() {
        Ok(slot) => slot.clone(),
        Err(_) => return,
    };
    if let Some(logger) = logger {
        let _ = logger.append(&LogEvent {
            level,
            event_type,
            payload,
        });
    }
}

pub fn structured_fallback_line(index: usize, identity: &str, line: &str) -> String {
    format!(
        "line={index} identity={identity} status={} ",
        line.replace('\n', "\\n")
    )
}

fn truncate_json(value: Value, max_bytes: usize) -> Value {
    let rendered = serde_json::to_string(&value).unwrap_or_default();
    if rendered.len() <= max_bytes {
        return value;
    }
    let mut cut = max_bytes.saturating_sub(3);
    while cut > 0 && !rendered.is_char_boundary(cut) {
        cut -= 1;
    }
    Value::String(format!("{}...", &rendered[..cut]))
}

#[cfg(test)]
mod tests {
    use super::{structured_fallback_line, truncate_json, JsonlLogger, LogEvent};
    use serde_json::{json, Value};

    #[test]
    fn logger_truncates_large_payloads_and_writes_jsonl() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("run.jsonl");
        let mut logger = JsonlLogger::new(&path);
        logger.max_payload_bytes = 20;
        logger.budget_bytes = 1024;

        logger
            .append(&LogEvent {
                level: "debug",
                event_type: "session.message",
                payload: json!({"raw": "w1->processed abcdefghijklmnopqrstuvwxyz"}),
            })
            .expect("append");

        let text = std::fs::read_to_string(&path).expect("read");
        assert!(text.contains("\"event_type\":\"session.message\""));
        assert!(text.contains("..."));
    }

    #[test]
    fn appending_never_touches_other_files_in_the_log_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        let dataset = std::fs::File::create(dir.path().join("dataset.bin")).expect("dataset");
        dataset.set_len(60 * 1024 * 1024).expect("sparse");
        std::fs::write(dir.path().join("notes.txt"), "keep me").expect("notes");

        JsonlLogger::new(dir.path().join("run.jsonl"))
            .append(&LogEvent {
                level: "info",
                event_type: "session.open",
                payload: json!({"lines": 2}),
            })
            .expect("append");

        assert!(dir.path().join("dataset.bin").exists());
        assert!(dir.path().join("notes.txt").exists());
        assert!(dir.path().join("run.jsonl").exists());
    }

    #[test]
    fn full_log_rolls_over_and_old_segments_are_pruned() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("run.jsonl");
        let mut logger = JsonlLogger::new(&path);
        logger.budget_bytes = 400;

        for n in 0..40 {
            logger
                .append(&LogEvent {
                    level: "debug",
                    event_type: "session.message",
                    payload: json!({"raw": format!("w1->processed {n}")}),
                })
                .expect("append");
        }

        let segments = crate::log_retention::rotated_segments(&path).expect("segments");
        assert!(!segments.is_empty());
        let total = segments
            .iter()
            .chain(std::iter::once(&path))
            .map(|p| std::fs::metadata(p).expect("meta").len())
            .sum::<u64>();
        assert!(total <= 400, "log footprint {total} exceeds budget");
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let value = truncate_json(json!({"text": "████████████"}), 12);
        match value {
            Value::String(text) => assert!(text.ends_with("...")),
            other => panic!("expected string, got {other:?}"),
        }
    }

    #[test]
    fn fallback_line_is_deterministic() {
        let line = structured_fallback_line(1, "w2", "Processing |##| 100%\nnext");
        assert_eq!(
            line,
            "line=1 identity=w2 status=Processing |##| 100%\\nnext "
        );
    }
}
