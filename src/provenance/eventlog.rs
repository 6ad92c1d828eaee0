//! Append-only JSONL build event log.

use crate::core::types::{BuildEvent, TimestampedEvent};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Generate an ISO 8601 timestamp.
pub fn now_iso8601() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let dur = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    let secs = dur.as_secs();
    let days = secs / 86400;
    let time_secs = secs % 86400;
    let hours = time_secs / 3600;
    let minutes = (time_secs % 3600) / 60;
    let seconds = time_secs % 60;

    // Days since epoch to Y-M-D (proleptic Gregorian, UTC)
    let mut y = 1970i64;
    let mut remaining = days as i64;
    loop {
        let year_days = if is_leap(y) { 366 } else { 365 };
        if remaining < year_days {
            break;
        }
        remaining -= year_days;
        y += 1;
    }
    let leap = is_leap(y);
    let month_days = [
        31,
        if leap { 29 } else { 28 },
        31,
        30,
        31,
        30,
        31,
        31,
        30,
        31,
        30,
        31,
    ];
    let mut m = 0;
    for (i, &md) in month_days.iter().enumerate() {
        if remaining < md as i64 {
            m = i + 1;
            break;
        }
        remaining -= md as i64;
    }
    let d = remaining + 1;

    format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}Z",
        y, m, d, hours, minutes, seconds
    )
}

fn is_leap(y: i64) -> bool {
    (y % 4 == 0 && y % 100 != 0) || y % 400 == 0
}

/// Generate a run ID.
pub fn generate_run_id() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    format!("r-{:012x}", nanos & 0xFFFF_FFFF_FFFF)
}

pub fn event_log_path(cache_dir: &Path) -> PathBuf {
    cache_dir.join("events.jsonl")
}

/// Event log shared by every task of one build run.
#[derive(Debug)]
pub struct EventLog {
    path: PathBuf,
    run_id: String,
    file: Mutex<File>,
}

impl EventLog {
    pub fn open(cache_dir: &Path, run_id: &str) -> Result<Self, String> {
        std::fs::create_dir_all(cache_dir)
            .map_err(|e| format!("cannot create cache dir {}: {}", cache_dir.display(), e))?;
        let path = event_log_path(cache_dir);
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| format!("cannot open event log {}: {}", path.display(), e))?;
        Ok(Self {
            path,
            run_id: run_id.to_string(),
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Append one event as a single JSON line.
    pub fn append(&self, event: BuildEvent) -> Result<(), String> {
        let te = TimestampedEvent {
            ts: now_iso8601(),
            run_id: self.run_id.clone(),
            event,
        };
        let json = serde_json::to_string(&te).map_err(|e| format!("JSON serialize error: {}", e))?;
        let mut file = self.file.lock().unwrap_or_else(|e| e.into_inner());
        writeln!(file, "{}", json).map_err(|e| format!("write error: {}", e))
    }

    /// Append, reporting failures on stderr instead of failing the build.
    pub fn emit(&self, event: BuildEvent) {
        if let Err(e) = self.append(event) {
            eprintln!("warning: event log {}: {}", self.path.display(), e);
        }
    }
}

/// Read every event in a log; malformed lines are skipped.
pub fn read_events(path: &Path) -> Result<Vec<TimestampedEvent>, String> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
    Ok(content
        .lines()
        .filter_map(|line| serde_json::from_str(line).ok())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_iso8601() {
        let ts = now_iso8601();
        assert!(ts.starts_with("20"));
        assert!(ts.ends_with('Z'));
        assert!(ts.contains('T'));
    }

    #[test]
    fn test_generate_run_id() {
        let id = generate_run_id();
        assert!(id.starts_with("r-"));
        assert!(id.len() > 4);
    }

    #[test]
    fn test_event_log_path() {
        assert_eq!(
            event_log_path(Path::new("/p/.kiln")),
            PathBuf::from("/p/.kiln/events.jsonl")
        );
    }

    #[test]
    fn test_append_and_read() {
        let dir = tempfile::tempdir().unwrap();
        let log = EventLog::open(&dir.path().join(".kiln"), "r-abc").unwrap();
        log.append(BuildEvent::GoalStarted {
            goal: "top".to_string(),
        })
        .unwrap();
        log.emit(BuildEvent::RuleCached {
            goal: "top".to_string(),
            rule: "compile".to_string(),
        });

        let content = std::fs::read_to_string(log.path()).unwrap();
        assert_eq!(content.lines().count(), 2);
        assert!(content.contains("goal_started"));
        assert!(content.contains("r-abc"));

        let events = read_events(log.path()).unwrap();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[1].event, BuildEvent::RuleCached { .. }));
    }

    #[test]
    fn test_read_skips_malformed_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        std::fs::write(
            &path,
            "not json\n{\"ts\":\"t\",\"run_id\":\"r\",\"event\":\"goal_started\",\"goal\":\"g\"}\n",
        )
        .unwrap();
        assert_eq!(read_events(&path).unwrap().len(), 1);
        assert!(read_events(&dir.path().join("none")).unwrap().is_empty());
    }

    #[test]
    fn test_is_leap() {
        assert!(is_leap(2000));
        assert!(!is_leap(1900));
        assert!(!is_leap(2100));
        assert!(is_leap(2024));
        assert!(!is_leap(2026));
    }
}
