//! Error types for build operations.
//!
//! Every fatal condition is an [`ErrorKind`]. It travels wrapped in a [`BuildError`], which also
//! records the source location that raised it. Public entry points re-point that location at
//! their caller, so a failure is reported against the build script line rather than against
//! library internals.

use std::fmt;
use std::io;
use std::panic::Location;

use thiserror::Error;

/// The fatal conditions a build can run into.
#[derive(Debug, Error)]
pub enum ErrorKind {
  #[error("target {0:?} is already registered")]
  DuplicateTarget(String),

  #[error("invalid target {0:?}")]
  UnknownTarget(String),

  #[error("missing default target")]
  NoDefaultTarget,

  #[error("build context already initialized with root {0:?}")]
  AlreadyInitialized(String),

  #[error("missing check for {tool}")]
  MissingCheck { tool: String },

  #[error("missing root identifier for {tool}")]
  MissingRootId { tool: String },

  /// The tool exists on the host but its availability check failed.
  #[error("error checking {tool}: exit code {code}")]
  CheckFailed { tool: String, code: i32 },

  #[error("error running {tool}: exit code {code}")]
  ToolFailed { tool: String, code: i32 },

  #[error("error building image {image} for {tool}: exit code {code}")]
  ImageBuildFailed { tool: String, image: String, code: i32 },

  #[error("failed to start {program}: {source}")]
  Spawn {
    program: String,
    #[source]
    source: io::Error,
  },

  #[error("unsupported host platform {0:?}")]
  UnsupportedPlatform(String),

  #[error("file {0:?} does not exist")]
  NoMatch(String),

  #[error("no source files")]
  NoSourceFiles,

  #[error("invalid pattern {pattern:?}: {source}")]
  Pattern {
    pattern: String,
    #[source]
    source: glob::PatternError,
  },

  #[error("only one source file allowed when destination is a file")]
  MultipleSources,

  #[error("invalid compression level {0}")]
  InvalidLevel(i32),

  #[error("unsupported archive {0:?}")]
  UnsupportedArchive(String),

  #[error("refusing to extract {0:?} outside of the destination")]
  UnsafeEntry(String),

  #[error("walk error: {0}")]
  Walk(#[from] walkdir::Error),

  #[error("zip error: {0}")]
  Zip(#[from] zip::result::ZipError),

  #[error("io error: {0}")]
  Io(#[from] io::Error),

  /// Raised by target bodies through [`BuildError::msg`].
  #[error("{0}")]
  Message(String),
}

/// A fatal build error together with the location that raised it.
#[derive(Debug)]
pub struct BuildError {
  kind: ErrorKind,
  location: &'static Location<'static>,
}

impl BuildError {
  #[track_caller]
  pub fn new(kind: ErrorKind) -> Self {
    Self {
      kind,
      location: Location::caller(),
    }
  }

  /// Fail the build with a plain message, located at the caller.
  #[track_caller]
  pub fn msg(message: impl Into<String>) -> Self {
    Self::new(ErrorKind::Message(message.into()))
  }

  pub fn kind(&self) -> &ErrorKind {
    &self.kind
  }

  pub fn into_kind(self) -> ErrorKind {
    self.kind
  }

  pub fn location(&self) -> &'static Location<'static> {
    self.location
  }

  pub(crate) fn at(mut self, location: &'static Location<'static>) -> Self {
    self.location = location;
    self
  }
}

impl fmt::Display for BuildError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}:{}: {}", self.location.file(), self.location.line(), self.kind)
  }
}

impl std::error::Error for BuildError {
  fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
    std::error::Error::source(&self.kind)
  }
}

impl From<ErrorKind> for BuildError {
  #[track_caller]
  fn from(kind: ErrorKind) -> Self {
    Self::new(kind)
  }
}

impl From<io::Error> for BuildError {
  #[track_caller]
  fn from(err: io::Error) -> Self {
    Self::new(ErrorKind::Io(err))
  }
}

impl From<walkdir::Error> for BuildError {
  #[track_caller]
  fn from(err: walkdir::Error) -> Self {
    Self::new(ErrorKind::Walk(err))
  }
}

impl From<zip::result::ZipError> for BuildError {
  #[track_caller]
  fn from(err: zip::result::ZipError) -> Self {
    Self::new(ErrorKind::Zip(err))
  }
}

/// Result type for build operations.
pub type Result<T, E = BuildError> = std::result::Result<T, E>;

pub(crate) trait Located<T> {
  /// Re-point an error at `location`, normally the caller of a public entry point.
  fn located(self, location: &'static Location<'static>) -> Result<T>;
}

impl<T> Located<T> for Result<T> {
  fn located(self, location: &'static Location<'static>) -> Result<T> {
    self.map_err(|err| err.at(location))
  }
}
