//! Target registration and dispatch.
//!
//! A target is a named build step. Targets are registered once at startup, the first one
//! becoming the default, and run sequentially in the order they are requested.

use std::collections::HashMap;
use std::fmt;
use std::panic::Location;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info};

use crate::context::BuildContext;
use crate::error::{BuildError, ErrorKind, Located, Result};

/// Column at which target descriptions start in [`BuildContext::usage`].
const NAME_COLUMN: usize = 12;

/// Body of a target.
pub type Callback = Arc<dyn Fn(&BuildContext) -> Result<()> + Send + Sync>;

/// A registered build step.
#[derive(Clone)]
pub struct Target {
  name: String,
  description: String,
  callback: Callback,
}

impl Target {
  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn description(&self) -> &str {
    &self.description
  }
}

impl fmt::Debug for Target {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Target")
      .field("name", &self.name)
      .field("description", &self.description)
      .finish_non_exhaustive()
  }
}

/// Targets by name, remembering registration order.
#[derive(Default)]
pub(crate) struct Registry {
  order: Vec<String>,
  targets: HashMap<String, Target>,
}

impl Registry {
  fn insert(&mut self, target: Target) -> bool {
    if self.targets.contains_key(&target.name) {
      return false;
    }
    self.order.push(target.name.clone());
    self.targets.insert(target.name.clone(), target);
    true
  }

  fn get(&self, name: &str) -> Option<&Target> {
    self.targets.get(name)
  }

  fn first(&self) -> Option<&Target> {
    self.order.first().and_then(|name| self.targets.get(name))
  }

  fn in_order(&self) -> impl Iterator<Item = &Target> {
    self.order.iter().filter_map(|name| self.targets.get(name))
  }
}

impl BuildContext {
  /// Register a target. The first target registered becomes the default.
  #[track_caller]
  pub fn register<F>(&self, name: impl Into<String>, description: impl Into<String>, callback: F) -> Result<Target>
  where
    F: Fn(&BuildContext) -> Result<()> + Send + Sync + 'static,
  {
    self.register_callback(name.into(), description.into(), Arc::new(callback))
  }

  /// Register every target yielded by a discovery provider, in order.
  #[track_caller]
  pub fn register_all<I>(&self, targets: I) -> Result<()>
  where
    I: IntoIterator<Item = (String, String, Callback)>,
  {
    for (name, description, callback) in targets {
      self.register_callback(name, description, callback)?;
    }
    Ok(())
  }

  #[track_caller]
  fn register_callback(&self, name: String, description: String, callback: Callback) -> Result<Target> {
    let target = Target {
      name,
      description,
      callback,
    };
    if !self.lock().targets.insert(target.clone()) {
      return Err(BuildError::new(ErrorKind::DuplicateTarget(target.name)));
    }
    debug!(name = %target.name, "registered target");
    Ok(target)
  }

  /// Registered targets, in registration order.
  pub fn targets(&self) -> Vec<Target> {
    self.lock().targets.in_order().cloned().collect()
  }

  /// The target run when no names are requested.
  pub fn default_target(&self) -> Option<Target> {
    self.lock().targets.first().cloned()
  }

  /// Alphabetical two-column listing of the registered targets.
  pub fn usage(&self) -> String {
    let mut targets = self.targets();
    targets.sort_by(|a, b| a.name.cmp(&b.name));
    targets
      .iter()
      .map(|target| usage_line(&target.name, &target.description))
      .collect()
  }

  /// Run the requested targets in order, or the default target when none are requested.
  ///
  /// Every name is checked before anything runs. The first failing target stops the run.
  #[track_caller]
  pub fn run<S: AsRef<str>>(&self, requested: &[S]) -> Result<()> {
    let caller = Location::caller();
    let runs = self.select(requested).located(caller)?;

    debug!("build started");
    let start = Instant::now();
    for target in &runs {
      self.build(target)?;
    }
    debug!(elapsed = ?start.elapsed(), "build finished");
    Ok(())
  }

  /// Run a single target, with timing.
  pub fn build(&self, target: &Target) -> Result<()> {
    info!(name = %target.name, "> {}", target.name);
    let start = Instant::now();
    (target.callback)(self)?;
    info!(name = %target.name, elapsed = ?start.elapsed(), "< {}", target.name);
    Ok(())
  }

  fn select<S: AsRef<str>>(&self, requested: &[S]) -> Result<Vec<Target>> {
    let state = self.lock();
    if requested.is_empty() {
      let default = state.targets.first().ok_or(ErrorKind::NoDefaultTarget)?;
      return Ok(vec![default.clone()]);
    }
    requested
      .iter()
      .map(|name| {
        let name = name.as_ref();
        state
          .targets
          .get(name)
          .cloned()
          .ok_or_else(|| BuildError::new(ErrorKind::UnknownTarget(name.to_string())))
      })
      .collect()
  }
}

fn usage_line(name: &str, description: &str) -> String {
  if name.len() < NAME_COLUMN {
    let line = format!("  {name}{}{description}", " ".repeat(NAME_COLUMN - name.len()));
    format!("{}\n", line.trim_end())
  } else if description.is_empty() {
    format!("  {name}\n")
  } else {
    format!("  {name}\n{}{description}\n", " ".repeat(NAME_COLUMN + 2))
  }
}

/// Derive a target name from a camel-case identifier: `AllStuff` becomes `all-stuff`.
///
/// A run of capitals stays one word, so `HTTP` gives `http` and `AllHTTP` gives `all-http`.
pub fn target_name(identifier: &str) -> String {
  let mut name = String::with_capacity(identifier.len() + 4);
  let mut upper = true;
  for c in identifier.chars() {
    if c.is_uppercase() {
      if !upper {
        name.push('-');
      }
      upper = true;
    } else {
      upper = false;
    }
    name.extend(c.to_lowercase());
  }
  name
}

/// Derive a one-line description from a doc comment, dropping a leading identifier.
pub fn target_description(identifier: &str, doc: &str) -> String {
  let doc = doc.strip_prefix(identifier).unwrap_or(doc);
  doc.lines().next().unwrap_or_default().trim().to_string()
}
