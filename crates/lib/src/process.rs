//! Synchronous subprocess execution.
//!
//! Everything that spawns a process goes through the [`Runner`] trait, so the tool layer can
//! be driven by a recording runner in tests.

use std::fmt;
use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, ExitStatus, Stdio};

use tracing::debug;

use crate::error::{ErrorKind, Result};

/// Where a child process reads its standard input from.
#[derive(Debug, Default)]
pub enum Input<'a> {
  #[default]
  Inherit,
  Bytes(&'a [u8]),
  Null,
}

/// Where a child process writes one of its output streams.
#[derive(Debug, Default)]
pub enum Output<'a> {
  #[default]
  Inherit,
  Capture(&'a mut Vec<u8>),
  Null,
}

impl Output<'_> {
  fn stdio(&self) -> Stdio {
    match self {
      Output::Inherit => Stdio::inherit(),
      Output::Capture(_) => Stdio::piped(),
      Output::Null => Stdio::null(),
    }
  }

  fn fill(self, bytes: Vec<u8>) {
    if let Output::Capture(buffer) = self {
      buffer.extend(bytes);
    }
  }
}

/// One process to spawn.
#[derive(Debug)]
pub struct Invocation<'a> {
  pub program: String,
  pub args: Vec<String>,
  /// Added on top of the inherited host environment.
  pub env: Vec<(String, String)>,
  pub cwd: Option<PathBuf>,
  pub stdin: Input<'a>,
  pub stdout: Output<'a>,
  pub stderr: Output<'a>,
}

impl<'a> Invocation<'a> {
  pub fn new(program: impl Into<String>) -> Self {
    Self {
      program: program.into(),
      args: Vec::new(),
      env: Vec::new(),
      cwd: None,
      stdin: Input::Inherit,
      stdout: Output::Inherit,
      stderr: Output::Inherit,
    }
  }

  pub fn arg(mut self, arg: impl Into<String>) -> Self {
    self.args.push(arg.into());
    self
  }

  pub fn args<I, S>(mut self, args: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.args.extend(args.into_iter().map(Into::into));
    self
  }

  pub fn env(mut self, env: Vec<(String, String)>) -> Self {
    self.env = env;
    self
  }

  pub fn cwd(mut self, cwd: Option<PathBuf>) -> Self {
    self.cwd = cwd;
    self
  }

  pub fn stdin(mut self, stdin: Input<'a>) -> Self {
    self.stdin = stdin;
    self
  }

  pub fn stdout(mut self, stdout: Output<'a>) -> Self {
    self.stdout = stdout;
    self
  }

  pub fn stderr(mut self, stderr: Output<'a>) -> Self {
    self.stderr = stderr;
    self
  }
}

impl fmt::Display for Invocation<'_> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.program)?;
    for arg in &self.args {
      write!(f, " {arg}")?;
    }
    Ok(())
  }
}

/// Spawns processes and waits for them.
pub trait Runner: Send + Sync {
  /// Run to completion and return the exit code.
  ///
  /// A process that cannot be started fails with [`ErrorKind::Spawn`].
  fn run(&self, invocation: Invocation<'_>) -> Result<i32>;
}

/// Runs real processes on the host.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl Runner for SystemRunner {
  fn run(&self, invocation: Invocation<'_>) -> Result<i32> {
    debug!(command = %invocation, cwd = ?invocation.cwd, "spawning process");

    let Invocation {
      program,
      args,
      env,
      cwd,
      stdin,
      stdout,
      stderr,
    } = invocation;

    let mut command = Command::new(&program);
    command.args(&args).envs(env);
    if let Some(cwd) = &cwd {
      command.current_dir(cwd);
    }
    command
      .stdin(match stdin {
        Input::Inherit => Stdio::inherit(),
        Input::Bytes(_) => Stdio::piped(),
        Input::Null => Stdio::null(),
      })
      .stdout(stdout.stdio())
      .stderr(stderr.stdio());

    let mut child = command.spawn().map_err(|source| ErrorKind::Spawn {
      program: program.clone(),
      source,
    })?;

    let pipe = child.stdin.take();
    let output = std::thread::scope(|scope| {
      if let (Some(mut pipe), Input::Bytes(bytes)) = (pipe, stdin) {
        scope.spawn(move || {
          // The child may exit without draining its input.
          if let Err(err) = pipe.write_all(bytes) {
            debug!(%err, "stdin closed early");
          }
        });
      }
      child.wait_with_output()
    })?;

    stdout.fill(output.stdout);
    stderr.fill(output.stderr);

    let code = exit_code(output.status);
    debug!(program = %program, code, "process exited");
    Ok(code)
  }
}

fn exit_code(status: ExitStatus) -> i32 {
  if let Some(code) = status.code() {
    return code;
  }
  #[cfg(unix)]
  {
    use std::os::unix::process::ExitStatusExt;
    if let Some(signal) = status.signal() {
      return 128 + signal;
    }
  }
  1
}
