//! Copying filesets.

use std::fs;
use std::io;
use std::panic::Location;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{ErrorKind, Located, Result};
use crate::fileset::{Fileset, resolve_all};
use crate::paths;

/// Copy every file matched by `filesets` to `destination`.
///
/// The destination is a file when it already is one, or when it does not exist, does not end
/// with a separator and there is exactly one source. A single source file is then copied onto
/// it. In every other case each walked path is recreated as `destination/<relative path>`,
/// keeping permissions.
///
/// Copying a file onto itself does nothing.
#[track_caller]
pub fn copy(destination: impl AsRef<Path>, filesets: &[Fileset]) -> Result<()> {
  let caller = Location::caller();
  copy_filesets(destination.as_ref(), filesets).located(caller)
}

fn copy_filesets(destination: &Path, filesets: &[Fileset]) -> Result<()> {
  let resolved = resolve_all(filesets, true)?;
  let sources: Vec<PathBuf> = resolved
    .iter()
    .flat_map(|fileset| fileset.includes().iter().map(|include| fileset.locate(include)))
    .collect();

  let to_file = match fs::metadata(destination) {
    Err(err) if err.kind() == io::ErrorKind::NotFound => !ends_with_separator(destination) && sources.len() == 1,
    Err(err) => return Err(err.into()),
    Ok(metadata) if metadata.is_dir() => false,
    Ok(_) if sources.len() > 1 => return Err(ErrorKind::MultipleSources.into()),
    Ok(_) => true,
  };

  if to_file
    && let [source] = sources.as_slice()
    && !fs::metadata(source)?.is_dir()
  {
    if let Some(parent) = destination.parent().filter(|parent| !parent.as_os_str().is_empty()) {
      fs::create_dir_all(parent)?;
    }
    return copy_file(source, destination);
  }

  for fileset in &resolved {
    fileset.walk(|entry| {
      let target = destination.join(&entry.rel);
      if entry.is_dir() {
        debug!(from = %entry.path.display(), to = %target.display(), "copying dir");
        fs::create_dir_all(&target)?;
        fs::set_permissions(&target, entry.metadata.permissions())?;
        return Ok(());
      }
      if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
      }
      copy_file(&entry.path, &target)
    })?;
  }
  Ok(())
}

fn copy_file(source: &Path, destination: &Path) -> Result<()> {
  if same_file(source, destination)? {
    debug!(path = %source.display(), "skipping copy onto itself");
    return Ok(());
  }
  debug!(from = %source.display(), to = %destination.display(), "copying file");
  fs::copy(source, destination)?;
  Ok(())
}

fn same_file(a: &Path, b: &Path) -> Result<bool> {
  let a = paths::normalize(&std::path::absolute(a)?);
  let b = paths::normalize(&std::path::absolute(b)?);
  Ok(a == b)
}

fn ends_with_separator(path: &Path) -> bool {
  let text = path.as_os_str().to_string_lossy();
  text.ends_with('/') || (cfg!(windows) && text.ends_with('\\'))
}

#[cfg(test)]
mod tests {
  use tempfile::TempDir;

  use super::*;

  fn file(root: &TempDir, name: &str, content: &str) -> PathBuf {
    let path = root.path().join(name);
    if let Some(parent) = path.parent() {
      fs::create_dir_all(parent).unwrap();
    }
    fs::write(&path, content).unwrap();
    path
  }

  fn read(root: &TempDir, name: &str) -> String {
    fs::read_to_string(root.path().join(name)).unwrap()
  }

  fn sources(paths: &[&Path]) -> Vec<Fileset> {
    vec![Fileset::of(paths.iter().map(|path| path.to_string_lossy().into_owned()))]
  }

  #[test]
  fn file_to_missing_file() {
    let root = TempDir::new().unwrap();
    let foo = file(&root, "foo.txt", "foo");

    copy(root.path().join("bar.txt"), &sources(&[&foo])).unwrap();

    assert_eq!(read(&root, "bar.txt"), "foo");
    assert_eq!(read(&root, "foo.txt"), "foo");
  }

  #[test]
  fn file_to_existing_file() {
    let root = TempDir::new().unwrap();
    let foo = file(&root, "foo.txt", "foo");
    file(&root, "bar.txt", "bar");

    copy(root.path().join("bar.txt"), &sources(&[&foo])).unwrap();

    assert_eq!(read(&root, "bar.txt"), "foo");
  }

  #[test]
  fn file_to_missing_dir() {
    let root = TempDir::new().unwrap();
    let foo = file(&root, "foo.txt", "foo");
    let destination = format!("{}/", root.path().join("destination").display());

    copy(&destination, &sources(&[&foo])).unwrap();

    assert_eq!(read(&root, "destination/foo.txt"), "foo");
  }

  #[test]
  fn file_to_existing_dir() {
    let root = TempDir::new().unwrap();
    let foo = file(&root, "foo.txt", "foo");
    fs::create_dir(root.path().join("destination")).unwrap();

    copy(root.path().join("destination"), &sources(&[&foo])).unwrap();

    assert_eq!(read(&root, "destination/foo.txt"), "foo");
  }

  #[test]
  fn file_to_missing_nested_path() {
    let root = TempDir::new().unwrap();
    let foo = file(&root, "foo.txt", "foo");

    copy(root.path().join("bar/bar.txt"), &sources(&[&foo])).unwrap();

    assert_eq!(read(&root, "bar/bar.txt"), "foo");
  }

  #[test]
  fn several_sources_onto_file_fail() {
    let root = TempDir::new().unwrap();
    let foo = file(&root, "foo.txt", "foo");
    file(&root, "bar.txt", "bar");

    let err = copy(root.path().join("bar.txt"), &sources(&[&foo, &foo])).unwrap_err();

    assert_eq!(
      err.kind().to_string(),
      "only one source file allowed when destination is a file"
    );
    assert_eq!(read(&root, "bar.txt"), "bar");
  }

  #[test]
  fn missing_source_is_named() {
    let root = TempDir::new().unwrap();
    let foo = file(&root, "foo.txt", "foo");
    let missing = root.path().join("source").join("non-existing*");

    let err = copy(root.path().join("destination"), &sources(&[&missing, &foo])).unwrap_err();

    assert_eq!(
      err.kind().to_string(),
      format!("file {:?} does not exist", missing.to_string_lossy())
    );
    assert!(!root.path().join("destination").exists());
  }

  #[test]
  fn file_onto_itself_is_noop() {
    let root = TempDir::new().unwrap();
    let foo = file(&root, "foo.txt", "foo");

    copy(&foo, &sources(&[&foo])).unwrap();

    assert_eq!(read(&root, "foo.txt"), "foo");
  }

  #[test]
  fn tree_to_missing_path() {
    let root = TempDir::new().unwrap();
    file(&root, "source/foo.txt", "foo");
    file(&root, "source/bar/bar.txt", "bar");

    copy(root.path().join("destination"), &sources(&[&root.path().join("source/bar")])).unwrap();

    assert_eq!(read(&root, "destination/bar/bar.txt"), "bar");
    assert!(!root.path().join("destination/foo.txt").exists());
  }

  #[test]
  fn tree_with_glob() {
    let root = TempDir::new().unwrap();
    file(&root, "source/foo.txt", "foo");
    file(&root, "source/bar/bar.txt", "bar");

    copy(root.path().join("destination"), &sources(&[&root.path().join("source/*")])).unwrap();

    assert_eq!(read(&root, "destination/foo.txt"), "foo");
    assert_eq!(read(&root, "destination/bar/bar.txt"), "bar");
  }

  #[test]
  fn fileset_with_base_and_excludes() {
    let root = TempDir::new().unwrap();
    file(&root, "source/keep.txt", "keep");
    file(&root, "source/skip.log", "skip");
    file(&root, "source/nested/deep.txt", "deep");

    let fileset = Fileset::parse(root.path().join("source"), "*", "*.log");
    copy(root.path().join("out/"), &[fileset]).unwrap();

    assert_eq!(read(&root, "out/keep.txt"), "keep");
    assert_eq!(read(&root, "out/nested/deep.txt"), "deep");
    assert!(!root.path().join("out/skip.log").exists());
  }

  #[cfg(unix)]
  #[test]
  fn permissions_are_kept() {
    use std::os::unix::fs::PermissionsExt;

    let root = TempDir::new().unwrap();
    let script = file(&root, "source/run.sh", "#!/bin/sh\n");
    fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();

    copy(root.path().join("out/"), &sources(&[&root.path().join("source")])).unwrap();

    let mode = fs::metadata(root.path().join("out/source/run.sh")).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o755);
  }
}
