//! Lexical path helpers.
//!
//! None of these touch the filesystem.

use std::path::{Component, Path, PathBuf};

/// Normalize a path: drop `.` components and fold `name/..` pairs.
///
/// Leading `..` components of a relative path are kept, `..` directly under the root is
/// dropped, and an empty result becomes `.`.
pub fn normalize(path: &Path) -> PathBuf {
  let mut normalized = PathBuf::new();
  let mut depth = 0usize;
  for component in path.components() {
    match component {
      Component::CurDir => {}
      Component::ParentDir => {
        if depth > 0 {
          normalized.pop();
          depth -= 1;
        } else if !normalized.has_root() {
          normalized.push("..");
        }
      }
      Component::Normal(name) => {
        normalized.push(name);
        depth += 1;
      }
      Component::RootDir | Component::Prefix(_) => normalized.push(component),
    }
  }
  if normalized.as_os_str().is_empty() {
    PathBuf::from(".")
  } else {
    normalized
  }
}

/// Compute `target` relative to `base`.
///
/// Both paths are normalized first. Returns `None` when one is absolute and the other is
/// not, or when `base` climbs above `target` with `..` components that cannot be undone.
pub fn relative(base: &Path, target: &Path) -> Option<PathBuf> {
  let base = normalize(base);
  let target = normalize(target);
  if base.is_absolute() != target.is_absolute() {
    return None;
  }

  let base_components: Vec<_> = base.components().filter(|c| *c != Component::CurDir).collect();
  let target_components: Vec<_> = target.components().filter(|c| *c != Component::CurDir).collect();

  let common_len = base_components
    .iter()
    .zip(target_components.iter())
    .take_while(|(a, b)| a == b)
    .count();

  if base_components[common_len..].contains(&Component::ParentDir) {
    return None;
  }

  let mut relative = PathBuf::new();
  for _ in common_len..base_components.len() {
    relative.push("..");
  }
  for component in &target_components[common_len..] {
    relative.push(component);
  }

  if relative.as_os_str().is_empty() {
    Some(PathBuf::from("."))
  } else {
    Some(relative)
  }
}

/// Render a path with forward-slash separators.
pub fn to_slash(path: &Path) -> String {
  let text = path.to_string_lossy();
  if cfg!(windows) {
    text.replace('\\', "/")
  } else {
    text.into_owned()
  }
}
