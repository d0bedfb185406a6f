use std::fs::{self, File};
use std::io::{self, Read, Seek, Write};
use std::path::Path;

use tracing::debug;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use super::{DirModes, Level, check_entry, file_mode, permissions, set_permissions};
use crate::error::{ErrorKind, Result};
use crate::fileset::Fileset;

pub(super) fn write<W: Write + Seek>(out: W, level: Level, filesets: &[Fileset]) -> Result<W> {
  let options = match level {
    Level::Fixed(0) => SimpleFileOptions::default().compression_method(CompressionMethod::Stored),
    _ => SimpleFileOptions::default()
      .compression_method(CompressionMethod::Deflated)
      .compression_level(level.zip()),
  };

  let mut zip = ZipWriter::new(out);
  for fileset in filesets {
    fileset.walk(|entry| {
      if entry.rel == "." {
        return Ok(());
      }
      debug!(entry = %entry.rel, "compressing");
      let mode = permissions(&entry.metadata);
      if entry.is_dir() {
        zip.add_directory(format!("{}/", entry.rel), options.unix_permissions(mode))?;
        return Ok(());
      }
      let content = fs::read(&entry.path)?;
      let mode = file_mode(&entry.rel, mode, &content);
      zip.start_file(entry.rel.as_str(), options.unix_permissions(mode))?;
      zip.write_all(&content)?;
      Ok(())
    })?;
  }
  Ok(zip.finish()?)
}

pub(super) fn read<R: Read + Seek>(input: R, destination: &Path) -> Result<()> {
  let mut archive = ZipArchive::new(input)?;
  let mut dir_modes = DirModes::default();
  for index in 0..archive.len() {
    let mut file = archive.by_index(index)?;
    let name = file
      .enclosed_name()
      .ok_or_else(|| ErrorKind::UnsafeEntry(file.name().to_string()))?;
    check_entry(&name)?;
    let path = destination.join(&name);

    let mode = file.unix_mode().map(|mode| mode & 0o7777);
    if file.is_dir() {
      debug!(path = %path.display(), "creating directory");
      fs::create_dir_all(&path)?;
      if let Some(mode) = mode {
        dir_modes.defer(path, mode);
      }
    } else {
      debug!(path = %path.display(), "extracting");
      if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
      }
      let mut out = File::create(&path)?;
      io::copy(&mut file, &mut out)?;
      if let Some(mode) = mode {
        set_permissions(&path, mode)?;
      }
    }
  }
  dir_modes.apply()
}
