//! Test utilities for brique-lib.
//!
//! Cross-platform shell helpers for tests that spawn real processes, and a [`RecordingRunner`]
//! for tests that only need to see what would have been spawned.

use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::Mutex;

use crate::error::{ErrorKind, Result};
use crate::process::{Input, Invocation, Output, Runner};

/// Returns the shell command and args to echo an environment variable.
///
/// Since environment variable expansion requires a shell, this returns
/// the shell binary and appropriate arguments.
#[cfg(unix)]
pub fn shell_echo_env(var: &str) -> (&'static str, Vec<String>) {
  ("/bin/sh", vec!["-c".to_string(), format!("echo \"${}\"", var)])
}

#[cfg(windows)]
pub fn shell_echo_env(var: &str) -> (&'static str, Vec<String>) {
  ("cmd.exe", vec!["/C".to_string(), format!("echo %{}%", var)])
}

/// Returns the shell command and args to execute a shell script.
#[cfg(unix)]
pub fn shell_cmd(script: &str) -> (&'static str, Vec<String>) {
  ("/bin/sh", vec!["-c".to_string(), script.to_string()])
}

#[cfg(windows)]
pub fn shell_cmd(script: &str) -> (&'static str, Vec<String>) {
  ("cmd.exe", vec!["/C".to_string(), script.to_string()])
}

#[derive(Debug, Default)]
struct Recorded {
  commands: Vec<String>,
  envs: Vec<Vec<(String, String)>>,
  stdin: Vec<u8>,
  quiet_stderr: Vec<bool>,
}

/// A runner that records invocations instead of spawning them.
///
/// Programs exit with 0 unless configured otherwise with [`exit`](Self::exit) or
/// [`missing`](Self::missing).
#[derive(Debug, Default)]
pub struct RecordingRunner {
  missing: HashSet<String>,
  exits: HashMap<String, i32>,
  recorded: Mutex<Recorded>,
}

impl RecordingRunner {
  /// Make `program` fail to start, as if it were not installed.
  pub fn missing(mut self, program: &str) -> Self {
    self.missing.insert(program.to_string());
    self
  }

  /// Make `program` exit with `code`.
  pub fn exit(mut self, program: &str, code: i32) -> Self {
    self.exits.insert(program.to_string(), code);
    self
  }

  /// Every invocation so far, rendered as `program arg...`.
  pub fn commands(&self) -> Vec<String> {
    self.recorded.lock().unwrap().commands.clone()
  }

  /// Environment overrides of every invocation so far.
  pub fn envs(&self) -> Vec<Vec<(String, String)>> {
    self.recorded.lock().unwrap().envs.clone()
  }

  /// For every invocation so far, whether its stderr was discarded.
  pub fn quiet_stderr(&self) -> Vec<bool> {
    self.recorded.lock().unwrap().quiet_stderr.clone()
  }

  /// Bytes piped to the most recent invocation that had byte input.
  pub fn last_stdin(&self) -> Vec<u8> {
    self.recorded.lock().unwrap().stdin.clone()
  }
}

impl Runner for RecordingRunner {
  fn run(&self, invocation: Invocation<'_>) -> Result<i32> {
    let mut recorded = self.recorded.lock().unwrap();
    recorded.commands.push(invocation.to_string());
    recorded.envs.push(invocation.env.clone());
    recorded.quiet_stderr.push(matches!(invocation.stderr, Output::Null));
    if let Input::Bytes(bytes) = invocation.stdin {
      recorded.stdin = bytes.to_vec();
    }

    if self.missing.contains(&invocation.program) {
      return Err(
        ErrorKind::Spawn {
          program: invocation.program.clone(),
          source: io::Error::new(io::ErrorKind::NotFound, "not installed"),
        }
        .into(),
      );
    }
    Ok(self.exits.get(&invocation.program).copied().unwrap_or(0))
  }
}
