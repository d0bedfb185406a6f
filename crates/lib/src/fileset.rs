//! Glob-based file selection.
//!
//! A [`Fileset`] names files with include globs, relative to an optional base directory, and
//! prunes them with exclude globs. [`Fileset::resolve`] expands the includes into existing
//! paths and [`Fileset::walk`] visits every file and directory under them.

use std::collections::HashSet;
use std::fs::Metadata;
use std::io;
use std::panic::Location;
use std::path::{Component, Path, PathBuf};

use glob::{MatchOptions, Pattern};
use tracing::debug;
use walkdir::WalkDir;

use crate::error::{BuildError, ErrorKind, Located, Result};
use crate::paths;

/// Exclude matching: `*` stays within one path segment.
const EXCLUDE_OPTIONS: MatchOptions = MatchOptions {
  case_sensitive: true,
  require_literal_separator: true,
  require_literal_leading_dot: false,
};

/// Include and exclude globs under an optional base directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Fileset {
  dir: Option<PathBuf>,
  includes: Vec<String>,
  excludes: Vec<String>,
}

/// One path visited by [`Fileset::walk`].
#[derive(Debug)]
pub struct Entry {
  /// Location on disk.
  pub path: PathBuf,
  /// Forward-slash path relative to the fileset, as it appears in copies and archives.
  pub rel: String,
  /// Metadata of the entry itself, symlinks are not followed.
  pub metadata: Metadata,
}

impl Entry {
  pub fn is_dir(&self) -> bool {
    self.metadata.is_dir()
  }
}

impl Fileset {
  /// An empty fileset relative to the working directory.
  pub fn new() -> Self {
    Self::default()
  }

  /// An empty fileset relative to `dir`.
  pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
    let dir = dir.into();
    Self {
      dir: (!dir.as_os_str().is_empty()).then_some(dir),
      ..Self::default()
    }
  }

  /// A fileset over explicit paths or globs, relative to the working directory.
  pub fn of<I, S>(includes: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Self {
      includes: includes.into_iter().map(Into::into).collect(),
      ..Self::default()
    }
  }

  /// Build a fileset from comma-separated include and exclude lists.
  ///
  /// Empty entries are dropped. An empty include list selects the base directory itself.
  pub fn parse(dir: impl Into<PathBuf>, includes: &str, excludes: &str) -> Self {
    let mut includes = split(includes);
    if includes.is_empty() {
      includes.push(".".to_string());
    }
    Self {
      includes,
      excludes: split(excludes),
      ..Self::in_dir(dir)
    }
  }

  pub fn include(mut self, pattern: impl Into<String>) -> Self {
    self.includes.push(pattern.into());
    self
  }

  pub fn exclude(mut self, pattern: impl Into<String>) -> Self {
    self.excludes.push(pattern.into());
    self
  }

  pub fn dir(&self) -> Option<&Path> {
    self.dir.as_deref()
  }

  pub fn includes(&self) -> &[String] {
    &self.includes
  }

  pub fn excludes(&self) -> &[String] {
    &self.excludes
  }

  /// Location on disk of an include, joined with the base directory unless absolute.
  pub fn locate(&self, include: &str) -> PathBuf {
    match &self.dir {
      Some(dir) if !Path::new(include).is_absolute() => paths::normalize(&dir.join(include)),
      _ => paths::normalize(Path::new(include)),
    }
  }

  /// Expand the includes into the paths that exist.
  ///
  /// The returned fileset keeps the base directory and excludes. Its includes are the matches,
  /// in glob order, relative to the base directory when there is one, with forward slashes.
  ///
  /// With `fail_on_empty` an include matching nothing fails with [`ErrorKind::NoMatch`] and an
  /// empty result fails with [`ErrorKind::NoSourceFiles`]. Otherwise unmatched includes are
  /// dropped.
  #[track_caller]
  pub fn resolve(&self, fail_on_empty: bool) -> Result<Fileset> {
    let caller = Location::caller();
    self.resolve_matches(fail_on_empty).located(caller)
  }

  fn resolve_matches(&self, fail_on_empty: bool) -> Result<Fileset> {
    let mut resolved = Vec::new();
    for include in &self.includes {
      let shown = self.locate(include);
      let pattern = match &self.dir {
        Some(dir) if !Path::new(include).is_absolute() => {
          let escaped = Pattern::escape(&dir.to_string_lossy());
          paths::normalize(&Path::new(&escaped).join(include))
        }
        _ => shown.clone(),
      };
      let pattern = pattern.to_string_lossy().into_owned();

      let matches = glob::glob(&pattern).map_err(|source| ErrorKind::Pattern {
        pattern: pattern.clone(),
        source,
      })?;
      let before = resolved.len();
      for found in matches {
        let found = found.map_err(io::Error::from)?;
        let found = match &self.dir {
          Some(dir) => paths::relative(dir, &found).unwrap_or(found),
          None => found,
        };
        resolved.push(paths::to_slash(&found));
      }

      if resolved.len() == before {
        if fail_on_empty {
          return Err(ErrorKind::NoMatch(shown.to_string_lossy().into_owned()).into());
        }
        debug!(pattern = %shown.display(), "no match");
      }
    }

    if fail_on_empty && resolved.is_empty() {
      return Err(ErrorKind::NoSourceFiles.into());
    }
    Ok(Self {
      dir: self.dir.clone(),
      includes: resolved,
      excludes: self.excludes.clone(),
    })
  }

  /// Visit every path under the includes, directories before their children, in lexical order.
  ///
  /// Relative paths are taken from the base directory, or rooted at the last component of the
  /// include when there is none. A relative path is visited once even when several includes
  /// reach it. An excluded path is skipped along with everything under it.
  ///
  /// Errors returned by `visit` are passed through untouched.
  #[track_caller]
  pub fn walk<F>(&self, mut visit: F) -> Result<()>
  where
    F: FnMut(&Entry) -> Result<()>,
  {
    let caller = Location::caller();
    let excludes = self
      .excludes
      .iter()
      .map(|exclude| {
        Pattern::new(exclude).map_err(|source| ErrorKind::Pattern {
          pattern: exclude.clone(),
          source,
        })
      })
      .collect::<std::result::Result<Vec<_>, _>>()
      .map_err(|kind| BuildError::new(kind).at(caller))?;

    let mut seen = HashSet::new();
    for include in &self.includes {
      let root = self.locate(include);
      let mut entries = WalkDir::new(&root).sort_by_file_name().into_iter();
      while let Some(entry) = entries.next() {
        let entry = entry.map_err(|err| BuildError::from(err).at(caller))?;
        let rel = match &self.dir {
          Some(dir) => relative_or_self(dir, entry.path()),
          None => rerooted(&root, entry.path()),
        };
        if !seen.insert(rel.clone()) {
          continue;
        }
        if excludes.iter().any(|exclude| exclude.matches_with(&rel, EXCLUDE_OPTIONS)) {
          debug!(path = %entry.path().display(), "excluded");
          if entry.file_type().is_dir() {
            entries.skip_current_dir();
          }
          continue;
        }

        let metadata = entry.metadata().map_err(|err| BuildError::from(err).at(caller))?;
        visit(&Entry {
          path: entry.into_path(),
          rel,
          metadata,
        })?;
      }
    }
    Ok(())
  }
}

/// Resolve several filesets, see [`Fileset::resolve`].
#[track_caller]
pub fn resolve_all(filesets: &[Fileset], fail_on_empty: bool) -> Result<Vec<Fileset>> {
  let caller = Location::caller();
  filesets
    .iter()
    .map(|fileset| fileset.resolve_matches(fail_on_empty))
    .collect::<Result<Vec<_>>>()
    .located(caller)
}

fn split(list: &str) -> Vec<String> {
  list
    .split(',')
    .map(str::trim)
    .filter(|item| !item.is_empty())
    .map(str::to_string)
    .collect()
}

fn relative_or_self(base: &Path, path: &Path) -> String {
  let rel = paths::relative(base, path).unwrap_or_else(|| path.to_path_buf());
  paths::to_slash(&rel)
}

/// `path` relative to `root`, prefixed with the last component of `root`.
fn rerooted(root: &Path, path: &Path) -> String {
  let base = match root.components().next_back() {
    Some(Component::Normal(name)) => PathBuf::from(name),
    Some(Component::ParentDir) => PathBuf::from(".."),
    _ => PathBuf::new(),
  };
  let inner = paths::relative(root, path).unwrap_or_default();
  paths::to_slash(&paths::normalize(&base.join(inner)))
}
