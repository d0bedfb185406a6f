//! Archive engine.
//!
//! Serializes filesets to tar (optionally gzipped) and zip streams and extracts them again.
//! Entries are named by their forward-slash path relative to the fileset, directories with a
//! trailing slash. Regular files that look executable but lack the owner execute bit get it.
//!
//! Supported names:
//! - `.tar`
//! - `.tar.gz` / `.tgz` / `.gz`
//! - `.zip`

mod tarball;
mod zipfile;

use std::fs::{self, File, Metadata};
use std::io::{BufReader, BufWriter, Read, Write};
use std::panic::Location;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{BuildError, ErrorKind, Located, Result};
use crate::fileset::{Fileset, resolve_all};

/// Destination or source name standing for the standard streams.
pub const STDIO: &str = "-";

/// Owner execute permission bit.
const OWNER_EXEC: u32 = 0o100;

const ELF_MAGIC: &[u8] = b"\x7fELF";
const ET_EXEC: u16 = 2;

/// Archive format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
  Tar { gzip: bool },
  Zip,
}

impl ArchiveKind {
  /// Pick the format from a file name suffix.
  #[track_caller]
  pub fn from_name(name: &str) -> Result<Self> {
    if name.ends_with(".tar") {
      Ok(Self::Tar { gzip: false })
    } else if name.ends_with(".gz") || name.ends_with(".tgz") {
      Ok(Self::Tar { gzip: true })
    } else if name.ends_with(".zip") {
      Ok(Self::Zip)
    } else {
      Err(BuildError::new(ErrorKind::UnsupportedArchive(name.to_string())))
    }
  }
}

/// Compression level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Level {
  #[default]
  Default,
  /// From 0 (stored) to 9 (best compression).
  Fixed(u32),
}

impl Level {
  /// Build a level from 0 to 9, or -1 for the default.
  #[track_caller]
  pub fn new(level: i32) -> Result<Self> {
    match level {
      -1 => Ok(Self::Default),
      0..=9 => Ok(Self::Fixed(level.unsigned_abs())),
      _ => Err(BuildError::new(ErrorKind::InvalidLevel(level))),
    }
  }

  fn gzip(self) -> flate2::Compression {
    match self {
      Self::Default => flate2::Compression::default(),
      Self::Fixed(level) => flate2::Compression::new(level),
    }
  }

  fn zip(self) -> Option<i64> {
    match self {
      Self::Default => None,
      Self::Fixed(level) => Some(i64::from(level)),
    }
  }
}

/// Write every path matched by `filesets` to `destination`, or to `stdout` when it is `-`.
///
/// Parent directories of the destination are created. Every include has to match.
#[track_caller]
pub fn write(
  kind: ArchiveKind,
  destination: impl AsRef<Path>,
  level: Level,
  filesets: &[Fileset],
  stdout: &mut dyn Write,
) -> Result<()> {
  let caller = Location::caller();
  write_archive(kind, destination.as_ref(), level, filesets, stdout).located(caller)
}

fn write_archive(
  kind: ArchiveKind,
  destination: &Path,
  level: Level,
  filesets: &[Fileset],
  stdout: &mut dyn Write,
) -> Result<()> {
  let resolved = resolve_all(filesets, true)?;
  debug!(destination = %destination.display(), ?kind, "writing archive");

  if destination == Path::new(STDIO) {
    return match kind {
      ArchiveKind::Tar { gzip } => tarball::write(stdout, gzip, level, &resolved),
      ArchiveKind::Zip => {
        let buffer = zipfile::write(std::io::Cursor::new(Vec::new()), level, &resolved)?;
        stdout.write_all(&buffer.into_inner())?;
        Ok(())
      }
    };
  }

  if let Some(parent) = destination.parent().filter(|parent| !parent.as_os_str().is_empty()) {
    fs::create_dir_all(parent)?;
  }
  let file = File::create(destination)?;
  match kind {
    ArchiveKind::Tar { gzip } => {
      let mut out = BufWriter::new(file);
      tarball::write(&mut out, gzip, level, &resolved)?;
      out.flush()?;
    }
    ArchiveKind::Zip => {
      zipfile::write(file, level, &resolved)?;
    }
  }
  Ok(())
}

/// Extract `source`, or `stdin` when it is `-`, into `destination`.
#[track_caller]
pub fn read(
  kind: ArchiveKind,
  source: impl AsRef<Path>,
  destination: impl AsRef<Path>,
  stdin: &mut dyn Read,
) -> Result<()> {
  let caller = Location::caller();
  read_archive(kind, source.as_ref(), destination.as_ref(), stdin).located(caller)
}

fn read_archive(kind: ArchiveKind, source: &Path, destination: &Path, stdin: &mut dyn Read) -> Result<()> {
  debug!(source = %source.display(), destination = %destination.display(), ?kind, "reading archive");
  fs::create_dir_all(destination)?;

  let from_stdin = source == Path::new(STDIO);
  match kind {
    ArchiveKind::Tar { gzip } if from_stdin => tarball::read(stdin, gzip, destination),
    ArchiveKind::Tar { gzip } => tarball::read(BufReader::new(File::open(source)?), gzip, destination),
    ArchiveKind::Zip if from_stdin => {
      let mut buffer = Vec::new();
      stdin.read_to_end(&mut buffer)?;
      zipfile::read(std::io::Cursor::new(buffer), destination)
    }
    ArchiveKind::Zip => zipfile::read(BufReader::new(File::open(source)?), destination),
  }
}

/// An in-memory tar stream holding one regular file.
pub fn single_file(name: &str, content: &[u8], mode: u32) -> Result<Vec<u8>> {
  tarball::single_file(name, content, mode)
}

/// Whether file content is an ELF executable or a script with a `#!` line.
pub fn is_executable(content: &[u8]) -> bool {
  if content.starts_with(b"#!") {
    return true;
  }
  if !content.starts_with(ELF_MAGIC) || content.len() < 18 {
    return false;
  }
  let e_type = [content[16], content[17]];
  let e_type = match content[5] {
    1 => u16::from_le_bytes(e_type),
    2 => u16::from_be_bytes(e_type),
    _ => return false,
  };
  e_type == ET_EXEC
}

/// Mode to store for a regular file, with the owner execute bit added to executables.
fn file_mode(rel: &str, mode: u32, content: &[u8]) -> u32 {
  if mode & OWNER_EXEC == 0 && is_executable(content) {
    debug!(entry = rel, "fixed execute permissions");
    return mode | OWNER_EXEC;
  }
  mode
}

#[cfg(unix)]
fn permissions(metadata: &Metadata) -> u32 {
  use std::os::unix::fs::PermissionsExt;
  metadata.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn permissions(metadata: &Metadata) -> u32 {
  match (metadata.is_dir(), metadata.permissions().readonly()) {
    (true, _) => 0o755,
    (false, true) => 0o444,
    (false, false) => 0o644,
  }
}

#[cfg(unix)]
fn set_permissions(path: &Path, mode: u32) -> Result<()> {
  use std::os::unix::fs::PermissionsExt;
  fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
  Ok(())
}

#[cfg(not(unix))]
fn set_permissions(_path: &Path, _mode: u32) -> Result<()> {
  Ok(())
}

/// Directory modes held back until every entry is extracted, so read-only directories can
/// still be filled.
#[derive(Default)]
struct DirModes(Vec<(PathBuf, u32)>);

impl DirModes {
  fn defer(&mut self, path: PathBuf, mode: u32) {
    self.0.push((path, mode));
  }

  /// Apply the modes, children before their parents.
  fn apply(mut self) -> Result<()> {
    self.0.sort_by(|a, b| b.0.cmp(&a.0));
    for (path, mode) in self.0 {
      set_permissions(&path, mode)?;
    }
    Ok(())
  }
}

/// Reject entry names that would land outside the destination.
fn check_entry(name: &Path) -> Result<()> {
  use std::path::Component;
  let safe = name
    .components()
    .all(|component| matches!(component, Component::Normal(_) | Component::CurDir));
  if safe {
    Ok(())
  } else {
    Err(ErrorKind::UnsafeEntry(name.to_string_lossy().into_owned()).into())
  }
}
