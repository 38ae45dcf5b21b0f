//! Isolate meta file parser
//!
//! Isolate writes `key:value` lines describing how the boxed program ended.

use std::time::Duration;

/// How the boxed program ended, as isolate reports it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IsolateStatus {
    /// Exited with status 0
    Ok,
    /// Exited with a non-zero status
    RuntimeError,
    /// Killed by a signal
    Signal(i32),
    /// Time or wall-time limit exceeded
    TimeOut,
    /// Isolate itself failed
    InternalError,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IsolateMeta {
    pub status: IsolateStatus,
    pub exit_code: i32,
    pub time: Duration,
    pub wall_time: Duration,
    /// Peak memory in KB (cg-mem or max-rss)
    pub memory_kb: u32,
    /// Isolate's human-readable explanation, if any
    pub message: String,
}

impl Default for IsolateMeta {
    fn default() -> Self {
        Self {
            status: IsolateStatus::Ok,
            exit_code: 0,
            time: Duration::ZERO,
            wall_time: Duration::ZERO,
            memory_kb: 0,
            message: String::new(),
        }
    }
}

fn seconds(value: &str) -> Option<Duration> {
    value
        .parse::<f64>()
        .ok()
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(Duration::from_secs_f64)
}

pub fn parse_meta(content: &str) -> IsolateMeta {
    let mut meta = IsolateMeta::default();
    let mut status = "";
    let mut signal = None;

    for (key, value) in content.lines().filter_map(|line| line.split_once(':')) {
        let value = value.trim();
        match key.trim() {
            "status" => status = value,
            "exitcode" => meta.exit_code = value.parse().unwrap_or(0),
            "exitsig" => signal = value.parse::<i32>().ok(),
            "time" => meta.time = seconds(value).unwrap_or_default(),
            "time-wall" => meta.wall_time = seconds(value).unwrap_or_default(),
            "cg-mem" | "max-rss" => {
                if let Ok(kb) = value.parse::<u32>() {
                    meta.memory_kb = meta.memory_kb.max(kb);
                }
            }
            "message" => meta.message = value.to_string(),
            _ => {}
        }
    }

    meta.status = match (status, signal) {
        ("TO", _) => IsolateStatus::TimeOut,
        ("XX", _) => IsolateStatus::InternalError,
        (_, Some(sig)) => IsolateStatus::Signal(sig),
        ("SG", None) => IsolateStatus::Signal(0),
        ("RE", _) => IsolateStatus::RuntimeError,
        _ if meta.exit_code != 0 => IsolateStatus::RuntimeError,
        _ => IsolateStatus::Ok,
    };

    meta
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_exit() {
        let meta = parse_meta("time:0.015\ntime-wall:0.020\ncg-mem:1024\nexitcode:0\n");

        assert_eq!(meta.status, IsolateStatus::Ok);
        assert_eq!(meta.time, Duration::from_millis(15));
        assert_eq!(meta.wall_time, Duration::from_millis(20));
        assert_eq!(meta.memory_kb, 1024);
    }

    #[test]
    fn test_non_zero_exit() {
        let meta = parse_meta("status:RE\nexitcode:3\nmessage:Exited with error status 3\n");

        assert_eq!(meta.status, IsolateStatus::RuntimeError);
        assert_eq!(meta.exit_code, 3);
        assert_eq!(meta.message, "Exited with error status 3");
    }

    #[test]
    fn test_wall_time_exceeded() {
        let meta = parse_meta("status:TO\ntime-wall:181.002\nmessage:Time limit exceeded (wall clock)\n");

        assert_eq!(meta.status, IsolateStatus::TimeOut);
        assert_eq!(meta.wall_time, Duration::from_millis(181_002));
    }

    #[test]
    fn test_signal() {
        assert_eq!(parse_meta("status:SG\nexitsig:11\n").status, IsolateStatus::Signal(11));
        assert_eq!(parse_meta("status:XX\n").status, IsolateStatus::InternalError);
    }
}
