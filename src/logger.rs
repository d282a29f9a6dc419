use std::fs::{File, OpenOptions};
use std::io::Write;

use chrono::Utc;
use serde_json::{json, Value};
use tracing::warn;

use crate::status::FanStatus;

pub enum WireLogMode {
    /// Log every request and every poll result.
    Full,
    /// Log requests, but suppress poll entries whose decoded status is
    /// unchanged under change-detection equality.
    Changed,
}

pub(crate) struct WireLogger {
    mode: WireLogMode,
    file: File,
    previous: Option<FanStatus>,
}

impl WireLogger {
    pub fn new(mode: WireLogMode, path: &str) -> std::io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        Ok(Self {
            mode,
            file,
            previous: None,
        })
    }

    pub fn log_request(&mut self, method: &str, path: &str) {
        let entry = json!({
            "ts": Utc::now().to_rfc3339(),
            "dir": "req",
            "method": method,
            "path": path,
        });
        self.write_line(&entry);
    }

    pub fn log_status(&mut self, status: Option<&FanStatus>) {
        let changed = match (&self.previous, status) {
            (Some(prev), Some(curr)) => prev != curr,
            (None, Some(_)) => true,
            _ => false,
        };

        let suppress = matches!(self.mode, WireLogMode::Changed) && status.is_some() && !changed;
        if !suppress {
            let entry = json!({
                "ts": Utc::now().to_rfc3339(),
                "dir": "poll",
                "decoded": status.is_some(),
                "status": status,
            });
            self.write_line(&entry);
        }

        if let Some(curr) = status {
            self.previous = Some(curr.clone());
        }
    }

    fn write_line(&mut self, entry: &Value) {
        if let Ok(line) = serde_json::to_string(entry)
            && let Err(e) = writeln!(self.file, "{line}")
        {
            warn!("failed to write log entry: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use tempfile::NamedTempFile;

    fn read_lines(path: &str) -> Vec<Value> {
        let mut contents = String::new();
        std::fs::File::open(path)
            .unwrap()
            .read_to_string(&mut contents)
            .unwrap();
        contents
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    fn sample(speed: i32, timer: i32) -> FanStatus {
        FanStatus {
            power: true,
            speed,
            oscillate: false,
            oscillate_speed: 0,
            timer,
        }
    }

    #[test]
    fn log_request_writes_ndjson() {
        let tmp = NamedTempFile::new().unwrap();
        let path = tmp.path().to_str().unwrap();
        let mut logger = WireLogger::new(WireLogMode::Full, path).unwrap();
        logger.log_request("POST", "/power/on");

        let lines = read_lines(path);
        assert_eq!(lines[0]["dir"], "req");
        assert_eq!(lines[0]["method"], "POST");
        assert_eq!(lines[0]["path"], "/power/on");
        assert!(lines[0]["ts"].as_str().is_some());
    }

    #[test]
    fn full_mode_logs_every_poll() {
        let tmp = NamedTempFile::new().unwrap();
        let path = tmp.path().to_str().unwrap();
        let mut logger = WireLogger::new(WireLogMode::Full, path).unwrap();

        logger.log_status(Some(&sample(1, 10)));
        logger.log_status(Some(&sample(1, 10)));

        let lines = read_lines(path);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["status"]["speed"], 1);
    }

    #[test]
    fn changed_mode_suppresses_unchanged_polls() {
        let tmp = NamedTempFile::new().unwrap();
        let path = tmp.path().to_str().unwrap();
        let mut logger = WireLogger::new(WireLogMode::Changed, path).unwrap();

        logger.log_status(Some(&sample(1, 10)));
        // Timer-only change is not a change under status equality.
        logger.log_status(Some(&sample(1, 20)));
        logger.log_status(Some(&sample(2, 20)));

        let lines = read_lines(path);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1]["status"]["speed"], 2);
    }

    #[test]
    fn failed_decode_is_logged_in_changed_mode() {
        let tmp = NamedTempFile::new().unwrap();
        let path = tmp.path().to_str().unwrap();
        let mut logger = WireLogger::new(WireLogMode::Changed, path).unwrap();

        logger.log_status(None);

        let lines = read_lines(path);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0]["decoded"], false);
        assert!(lines[0]["status"].is_null());
    }
}
