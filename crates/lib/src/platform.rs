//! Target platforms and platform fan-out.

use std::fmt;
use std::panic::Location;

use rayon::prelude::*;
use tracing::debug;

use crate::context::BuildContext;
use crate::error::{BuildError, ErrorKind, Located, Result};

/// Operating systems a build can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Os {
  Linux,
  MacOs,
  Windows,
}

impl Os {
  /// Every platform, in fan-out order.
  pub const ALL: [Os; 3] = [Os::Linux, Os::MacOs, Os::Windows];

  /// Detect the host operating system.
  #[track_caller]
  pub fn current() -> Result<Self> {
    Self::from_rust_os(std::env::consts::OS)
  }

  /// Map a `std::env::consts::OS` value.
  #[track_caller]
  fn from_rust_os(os: &str) -> Result<Self> {
    match os {
      "linux" => Ok(Self::Linux),
      "macos" => Ok(Self::MacOs),
      "windows" => Ok(Self::Windows),
      other => Err(BuildError::new(ErrorKind::UnsupportedPlatform(other.to_string()))),
    }
  }

  /// Returns the lowercase identifier, as used in `GOOS`-style platform names.
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Linux => "linux",
      Self::MacOs => "darwin",
      Self::Windows => "windows",
    }
  }

  /// Suffix of executable file names.
  pub fn exe_suffix(&self) -> &'static str {
    match self {
      Self::Windows => ".exe",
      _ => "",
    }
  }
}

impl fmt::Display for Os {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.as_str())
  }
}

impl BuildContext {
  /// Platforms to build for: every platform when cross-building, the host otherwise.
  #[track_caller]
  pub fn platforms(&self) -> Result<Vec<Os>> {
    if self.config().cross {
      return Ok(Os::ALL.to_vec());
    }
    let caller = Location::caller();
    Ok(vec![Os::current().located(caller)?])
  }

  /// Call `f` once per platform.
  ///
  /// In parallel mode every call runs concurrently and all of them finish before this returns.
  /// Either way the first error, in platform order, is returned.
  #[track_caller]
  pub fn for_each_platform<F>(&self, f: F) -> Result<()>
  where
    F: Fn(Os) -> Result<()> + Send + Sync,
  {
    let platforms = self.platforms()?;
    if !self.config().parallel {
      return platforms.into_iter().try_for_each(f);
    }

    debug!(count = platforms.len(), "building platforms in parallel");
    let results: Vec<Result<()>> = platforms.into_par_iter().map(f).collect();
    results.into_iter().collect()
  }
}
