//! The build context shared by every target of a run.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::error::{BuildError, ErrorKind, Result};
use crate::process::{Runner, SystemRunner};
use crate::target::Registry;
use crate::tool::Tool;

/// Default container engine binary.
pub const DEFAULT_ENGINE: &str = "docker";

/// Run-wide switches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
  /// Show progress details and image build output.
  pub verbose: bool,
  /// Run every tool in a container, even when it is installed locally.
  pub force_containers: bool,
  /// Fan out over linux, darwin and windows instead of the host platform only.
  pub cross: bool,
  /// Run platform fan-outs concurrently.
  pub parallel: bool,
  /// Container engine binary, `docker` unless overridden.
  pub engine: String,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      verbose: false,
      force_containers: false,
      cross: false,
      parallel: false,
      engine: DEFAULT_ENGINE.to_string(),
    }
  }
}

impl Config {
  /// Read the configuration from `BRIQUE_*` environment variables.
  pub fn from_env() -> Self {
    Self {
      verbose: env_flag("BRIQUE_VERBOSE"),
      force_containers: env_flag("BRIQUE_CONTAINERS"),
      cross: env_flag("BRIQUE_CROSS"),
      parallel: env_flag("BRIQUE_PARALLEL"),
      engine: std::env::var("BRIQUE_ENGINE")
        .ok()
        .filter(|engine| !engine.is_empty())
        .unwrap_or_else(|| DEFAULT_ENGINE.to_string()),
    }
  }
}

fn env_flag(name: &str) -> bool {
  std::env::var(name)
    .map(|value| matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
    .unwrap_or(false)
}

/// Mutable state guarded by the context mutex.
pub(crate) struct State {
  pub(crate) root: Option<String>,
  pub(crate) targets: Registry,
  pub(crate) tools: HashMap<String, Tool>,
}

/// State shared by every target of one run.
///
/// Created once by the driver and passed to every target body. Holds the root identifier
/// used to namespace container images, the registered targets and the tool cache.
pub struct BuildContext {
  config: Config,
  runner: Arc<dyn Runner>,
  state: Mutex<State>,
}

impl BuildContext {
  pub fn new(config: Config) -> Self {
    Self::with_runner(config, Arc::new(SystemRunner))
  }

  pub fn with_runner(config: Config, runner: Arc<dyn Runner>) -> Self {
    Self {
      config,
      runner,
      state: Mutex::new(State {
        root: None,
        targets: Registry::default(),
        tools: HashMap::new(),
      }),
    }
  }

  /// Set the root identifier. Allowed once per context.
  #[track_caller]
  pub fn init(&self, root: impl Into<String>) -> Result<()> {
    let root = root.into();
    let mut state = self.lock();
    if let Some(existing) = &state.root {
      return Err(BuildError::new(ErrorKind::AlreadyInitialized(existing.clone())));
    }
    debug!(root = %root, "build context initialized");
    state.root = Some(root);
    Ok(())
  }

  pub fn root(&self) -> Option<String> {
    self.lock().root.clone()
  }

  pub fn config(&self) -> &Config {
    &self.config
  }

  pub(crate) fn runner(&self) -> &dyn Runner {
    self.runner.as_ref()
  }

  pub(crate) fn lock(&self) -> MutexGuard<'_, State> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }
}
