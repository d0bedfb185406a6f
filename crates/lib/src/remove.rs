//! Deleting filesets.

use std::fs;
use std::io;
use std::panic::Location;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{Located, Result};
use crate::fileset::{Fileset, resolve_all};

/// Delete every path matched by `filesets`. Missing paths are skipped.
///
/// Without excludes each matched path is deleted recursively. With excludes the matched trees
/// are walked and deleted bottom-up, so a directory still holding excluded entries survives.
#[track_caller]
pub fn remove(filesets: &[Fileset]) -> Result<()> {
  let caller = Location::caller();
  remove_filesets(filesets).located(caller)
}

fn remove_filesets(filesets: &[Fileset]) -> Result<()> {
  for fileset in resolve_all(filesets, false)? {
    if fileset.excludes().is_empty() {
      for include in fileset.includes() {
        remove_tree(&fileset.locate(include))?;
      }
      continue;
    }

    let mut walked: Vec<PathBuf> = Vec::new();
    fileset.walk(|entry| {
      walked.push(entry.path.clone());
      Ok(())
    })?;
    for path in walked.iter().rev() {
      remove_entry(path)?;
    }
  }
  Ok(())
}

fn remove_tree(path: &Path) -> Result<()> {
  let metadata = match fs::symlink_metadata(path) {
    Ok(metadata) => metadata,
    Err(err) if err.kind() == io::ErrorKind::NotFound => {
      debug!(path = %path.display(), "already removed");
      return Ok(());
    }
    Err(err) => return Err(err.into()),
  };
  if metadata.is_dir() {
    fs::remove_dir_all(path)?;
  } else {
    fs::remove_file(path)?;
  }
  debug!(path = %path.display(), "removed");
  Ok(())
}

fn remove_entry(path: &Path) -> Result<()> {
  let metadata = match fs::symlink_metadata(path) {
    Ok(metadata) => metadata,
    Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
    Err(err) => return Err(err.into()),
  };
  if metadata.is_dir() {
    if fs::read_dir(path)?.next().is_some() {
      debug!(path = %path.display(), "keeping non-empty directory");
      return Ok(());
    }
    fs::remove_dir(path)?;
  } else {
    fs::remove_file(path)?;
  }
  debug!(path = %path.display(), "removed");
  Ok(())
}
