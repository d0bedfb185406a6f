use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::Path;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use tar::{Archive, Builder, EntryType, Header};
use tracing::debug;

use super::{DirModes, Level, check_entry, file_mode, permissions, set_permissions};
use crate::error::Result;
use crate::fileset::{Entry, Fileset};

pub(super) fn write<W: Write>(out: W, gzip: bool, level: Level, filesets: &[Fileset]) -> Result<()> {
  if gzip {
    let encoder = append_all(GzEncoder::new(out, level.gzip()), filesets)?;
    encoder.finish()?;
  } else {
    append_all(out, filesets)?;
  }
  Ok(())
}

fn append_all<W: Write>(out: W, filesets: &[Fileset]) -> Result<W> {
  let mut builder = Builder::new(out);
  for fileset in filesets {
    fileset.walk(|entry| append(&mut builder, entry))?;
  }
  Ok(builder.into_inner()?)
}

fn append<W: Write>(builder: &mut Builder<W>, entry: &Entry) -> Result<()> {
  if entry.rel == "." {
    return Ok(());
  }
  debug!(entry = %entry.rel, "compressing");

  let mut header = Header::new_gnu();
  header.set_metadata(&entry.metadata);
  header.set_mode(permissions(&entry.metadata));

  let file_type = entry.metadata.file_type();
  if file_type.is_dir() {
    header.set_size(0);
    builder.append_data(&mut header, format!("{}/", entry.rel), io::empty())?;
  } else if file_type.is_symlink() {
    header.set_size(0);
    header.set_link_name(fs::read_link(&entry.path)?)?;
    builder.append_data(&mut header, &entry.rel, io::empty())?;
  } else {
    let content = fs::read(&entry.path)?;
    header.set_mode(file_mode(&entry.rel, permissions(&entry.metadata), &content));
    header.set_size(content.len() as u64);
    builder.append_data(&mut header, &entry.rel, content.as_slice())?;
  }
  Ok(())
}

pub(super) fn read<R: Read>(input: R, gzip: bool, destination: &Path) -> Result<()> {
  if gzip {
    extract(Archive::new(GzDecoder::new(input)), destination)
  } else {
    extract(Archive::new(input), destination)
  }
}

fn extract<R: Read>(mut archive: Archive<R>, destination: &Path) -> Result<()> {
  let mut dir_modes = DirModes::default();
  for entry in archive.entries()? {
    let mut entry = entry?;
    let name = entry.path()?.into_owned();
    check_entry(&name)?;
    let path = destination.join(&name);
    let mode = entry.header().mode()?;

    match entry.header().entry_type() {
      EntryType::Directory => {
        debug!(path = %path.display(), "creating directory");
        fs::create_dir_all(&path)?;
        dir_modes.defer(path, mode);
      }
      EntryType::Regular | EntryType::Continuous => {
        debug!(path = %path.display(), "extracting");
        if let Some(parent) = path.parent() {
          fs::create_dir_all(parent)?;
        }
        let mut file = File::create(&path)?;
        io::copy(&mut entry, &mut file)?;
        set_permissions(&path, mode)?;
      }
      other => {
        debug!(path = %path.display(), kind = ?other, "unpacking special entry");
        if let Some(parent) = path.parent() {
          fs::create_dir_all(parent)?;
        }
        entry.unpack(&path)?;
      }
    }
  }
  dir_modes.apply()
}

pub(super) fn single_file(name: &str, content: &[u8], mode: u32) -> Result<Vec<u8>> {
  let mut header = Header::new_gnu();
  header.set_entry_type(EntryType::Regular);
  header.set_size(content.len() as u64);
  header.set_mode(mode);

  let mut builder = Builder::new(Vec::new());
  builder.append_data(&mut header, name, content)?;
  Ok(builder.into_inner()?)
}
