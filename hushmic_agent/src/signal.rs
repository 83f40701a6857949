//! Dictation-activity sources. Each emits only on an actual state change.

use crate::automation::ProcessView;
use crate::error::ControlError;
use std::io::BufRead;
use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info};

pub const DICTATION_APP: &str = "Wispr Flow";
const LOG_PREDICATE: &str = "subsystem == 'com.apple.coremedia' AND composedMessage CONTAINS 'Wispr Flow' AND composedMessage CONTAINS 'Recording'";
const LOG_WINDOW: &str = "10s";

pub trait LogQuery: Send {
    /// Recent recording-state log lines, compact style.
    fn recent(&self) -> Result<String, ControlError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct UnifiedLog;

impl LogQuery for UnifiedLog {
    fn recent(&self) -> Result<String, ControlError> {
        let output = Command::new("log")
            .args(["show", "--predicate", LOG_PREDICATE, "--style", "compact", "--last", LOG_WINDOW])
            .output()?;
        if !output.status.success() {
            return Err(ControlError::ActionFailed(format!("log show exited with {}", output.status)));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

pub struct LogActivityMonitor {
    log: Box<dyn LogQuery>,
    processes: Arc<dyn ProcessView>,
    poll_interval: Duration,
    active: bool,
}

impl LogActivityMonitor {
    pub fn new(log: Box<dyn LogQuery>, processes: Arc<dyn ProcessView>, poll_interval: Duration) -> Self {
        Self {
            log,
            processes,
            poll_interval,
            active: false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Samples once; returns the new state if it changed.
    pub fn poll(&mut self) -> Option<bool> {
        let next = match self.log.recent() {
            Ok(output) => {
                let processes = Arc::clone(&self.processes);
                recording_state(&output, self.active, || processes.any_running(&[DICTATION_APP]))
            }
            Err(e) => {
                debug!(error = %e, "log query failed");
                false
            }
        };
        if next == self.active {
            return None;
        }
        info!(from = self.active, to = next, "dictation state changed");
        self.active = next;
        Some(next)
    }

    pub fn run_until(mut self, stop: &AtomicBool, mut emit: impl FnMut(bool)) {
        while !stop.load(Ordering::Relaxed) {
            if let Some(active) = self.poll() {
                emit(active);
            }
            thread::sleep(self.poll_interval);
        }
    }
}

/// The last decisive line wins. With no entries at all the previous state holds only
/// while the dictation app is still running.
pub fn recording_state(output: &str, previous: bool, dictation_running: impl FnOnce() -> bool) -> bool {
    let entries: Vec<&str> = output
        .lines()
        .filter(|l| !l.trim().is_empty() && !l.starts_with("Timestamp"))
        .collect();
    if entries.is_empty() {
        return previous && dictation_running();
    }

    for line in entries.iter().rev() {
        let lower = line.to_lowercase();
        if !lower.contains("wispr flow") {
            continue;
        }
        if line.contains("Recording = YES") || lower.contains("starting recording") {
            return true;
        }
        if line.contains("Recording = NO") || lower.contains("stopping recording") {
            return false;
        }
    }

    if output.to_lowercase().contains("stopping recording") {
        return false;
    }
    previous
}

pub fn parse_activity_line(line: &str) -> Option<bool> {
    match line.trim().to_ascii_lowercase().as_str() {
        "on" | "1" | "true" | "active" | "start" => Some(true),
        "off" | "0" | "false" | "inactive" | "stop" => Some(false),
        _ => None,
    }
}

/// Reads `on`/`off` lines until EOF, emitting changes only.
pub fn run_line_source(reader: impl BufRead, mut emit: impl FnMut(bool)) {
    let mut active = false;
    for line in reader.lines() {
        let Ok(line) = line else { break };
        match parse_activity_line(&line) {
            Some(next) if next != active => {
                active = next;
                emit(next);
            }
            Some(_) => {}
            None if line.trim().is_empty() => {}
            None => debug!(%line, "ignoring unrecognized activity line"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::sync::Mutex;

    const HEADER: &str = "Timestamp               Ty Process[PID:TID]\n";

    #[test]
    fn last_decisive_line_wins() {
        let out = format!(
            "{HEADER}2024-05-01 10:00:00.1 Df coreaudiod: Wispr Flow Recording = YES\n\
             2024-05-01 10:00:02.3 Df coreaudiod: Wispr Flow Recording = NO\n"
        );
        assert!(!recording_state(&out, true, || true));

        let out = format!("{HEADER}x: Wispr Flow starting recording\n");
        assert!(recording_state(&out, false, || true));
    }

    #[test]
    fn empty_window_keeps_state_only_while_app_runs() {
        assert!(recording_state(HEADER, true, || true));
        assert!(!recording_state(HEADER, true, || false));
        assert!(!recording_state("", false, || true));
    }

    #[test]
    fn undecided_lines_keep_previous_state() {
        let out = format!("{HEADER}x: Wispr Flow Recording route changed\n");
        assert!(recording_state(&out, true, || false));
        assert!(!recording_state(&out, false, || true));
    }

    struct Scripted(Mutex<Vec<&'static str>>);

    impl LogQuery for Scripted {
        fn recent(&self) -> Result<String, ControlError> {
            let mut q = self.0.lock().unwrap();
            Ok(if q.is_empty() { String::new() } else { q.remove(0).to_string() })
        }
    }

    struct NoProcesses;

    impl ProcessView for NoProcesses {
        fn running_processes(&self) -> Result<Vec<String>, ControlError> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn monitor_emits_only_changes() {
        let log = Scripted(Mutex::new(vec![
            "a: Wispr Flow Recording = YES",
            "a: Wispr Flow Recording = YES",
            "a: Wispr Flow Recording = NO",
        ]));
        let mut m = LogActivityMonitor::new(Box::new(log), Arc::new(NoProcesses), Duration::from_millis(1));
        assert_eq!(m.poll(), Some(true));
        assert_eq!(m.poll(), None);
        assert_eq!(m.poll(), Some(false));
        assert_eq!(m.poll(), None);
    }

    #[test]
    fn line_source_debounces() {
        let input = Cursor::new("on\non\nbogus\n\noff\nOFF\non\n");
        let mut seen = Vec::new();
        run_line_source(input, |a| seen.push(a));
        assert_eq!(seen, vec![true, false, true]);
    }
}
