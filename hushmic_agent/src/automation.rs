//! OS-facing seams: UI scripting and the running-process view.

use crate::error::ControlError;
use std::process::{Command, Output, Stdio};
use std::sync::{Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

/// A script still running at this point is killed, so its keystroke never lands after the
/// caller's one-second wait has given up.
pub const SCRIPT_TIMEOUT: Duration = Duration::from_millis(700);
const PS_TIMEOUT: Duration = Duration::from_millis(500);
const CHILD_POLL: Duration = Duration::from_millis(10);

/// Runs `cmd` to completion, killing it if it outlives `limit`.
pub fn output_within(cmd: &mut Command, limit: Duration) -> Result<Output, ControlError> {
    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;
    let deadline = Instant::now() + limit;
    while child.try_wait()?.is_none() {
        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            return Err(ControlError::Timeout(limit));
        }
        thread::sleep(CHILD_POLL);
    }
    Ok(child.wait_with_output()?)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Modifier {
    Command,
    Shift,
    Control,
    Option,
}

impl Modifier {
    fn script_name(self) -> &'static str {
        match self {
            Modifier::Command => "command down",
            Modifier::Shift => "shift down",
            Modifier::Control => "control down",
            Modifier::Option => "option down",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Shortcut {
    pub key: &'static str,
    pub modifiers: &'static [Modifier],
}

impl Shortcut {
    pub const fn new(key: &'static str, modifiers: &'static [Modifier]) -> Self {
        Self { key, modifiers }
    }

    /// `keystroke "m" using {command down, shift down}`
    pub fn keystroke(&self) -> String {
        let key = quote(self.key);
        if self.modifiers.is_empty() {
            return format!("keystroke {key}");
        }
        let mods: Vec<&str> = self.modifiers.iter().map(|m| m.script_name()).collect();
        format!("keystroke {key} using {{{}}}", mods.join(", "))
    }
}

/// AppleScript string literal.
pub fn quote(s: &str) -> String {
    let escaped = s.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{escaped}\"")
}

pub trait UiAutomation: Send + Sync {
    /// Runs a script and returns its trimmed stdout.
    fn run_script(&self, script: &str) -> Result<String, ControlError>;

    fn send_shortcut(&self, process: &str, shortcut: Shortcut) -> Result<(), ControlError> {
        let script = format!(
            "tell application \"System Events\" to tell process {} to {}",
            quote(process),
            shortcut.keystroke()
        );
        self.run_script(&script).map(|_| ())
    }

    fn activate(&self, application: &str) -> Result<(), ControlError> {
        self.run_script(&format!("tell application {} to activate", quote(application)))
            .map(|_| ())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct OsaScript;

impl UiAutomation for OsaScript {
    #[cfg(target_os = "macos")]
    fn run_script(&self, script: &str) -> Result<String, ControlError> {
        let output = output_within(Command::new("osascript").arg("-e").arg(script), SCRIPT_TIMEOUT)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ControlError::ActionFailed(format!("osascript: {}", stderr.trim())));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    #[cfg(not(target_os = "macos"))]
    fn run_script(&self, _script: &str) -> Result<String, ControlError> {
        Err(ControlError::ActionFailed("unsupported platform".to_string()))
    }
}

pub trait ProcessView: Send + Sync {
    fn running_processes(&self) -> Result<Vec<String>, ControlError>;

    fn any_running(&self, names: &[&str]) -> bool {
        match self.running_processes() {
            Ok(running) => running
                .iter()
                .any(|p| names.iter().any(|n| p.eq_ignore_ascii_case(n))),
            Err(e) => {
                tracing::debug!(error = %e, "process listing failed");
                false
            }
        }
    }
}

const PS_SNAPSHOT_TTL: Duration = Duration::from_millis(500);

/// `ps` listing, reused for a short while so a pass over every controller spawns it once.
#[derive(Default)]
pub struct PsProcessView {
    snapshot: Mutex<Option<(Instant, Vec<String>)>>,
}

impl PsProcessView {
    fn list() -> Result<Vec<String>, ControlError> {
        #[cfg(target_os = "macos")]
        let args = ["-axco", "comm"];
        #[cfg(not(target_os = "macos"))]
        let args = ["-eo", "comm"];

        let output = output_within(Command::new("ps").args(args), PS_TIMEOUT)?;
        if !output.status.success() {
            return Err(ControlError::ActionFailed(format!(
                "ps exited with {}",
                output.status
            )));
        }
        Ok(parse_ps_output(&String::from_utf8_lossy(&output.stdout)))
    }
}

impl ProcessView for PsProcessView {
    fn running_processes(&self) -> Result<Vec<String>, ControlError> {
        let mut snapshot = self.snapshot.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some((taken, names)) = snapshot.as_ref() {
            if taken.elapsed() < PS_SNAPSHOT_TTL {
                return Ok(names.clone());
            }
        }
        let names = Self::list()?;
        *snapshot = Some((Instant::now(), names.clone()));
        Ok(names)
    }
}

/// One process name per line; the header row is dropped.
pub fn parse_ps_output(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .filter(|l| !matches!(*l, "COMM" | "COMMAND"))
        .map(|l| l.rsplit('/').next().unwrap_or(l).to_string())
        .collect()
}
