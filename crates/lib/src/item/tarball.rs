use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use tracing::debug;

use super::{ItemError, io_err};
use crate::config::LayerOpts;
use crate::facts::{Provide, Require};
use crate::path::ImagePath;
use crate::subvol::Subvol;
use crate::util::hash::{ContentHash, hash_file};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Compression {
  None,
  Gzip,
  Zstd,
}

impl Compression {
  fn detect(path: &Path) -> Option<Self> {
    let name = path.file_name()?.to_str()?;
    if name.ends_with(".tar") {
      Some(Compression::None)
    } else if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
      Some(Compression::Gzip)
    } else if name.ends_with(".tar.zst") {
      Some(Compression::Zstd)
    } else {
      None
    }
  }
}

/// Extract an archive into `into_dir`.
///
/// The archive is hashed when the item is constructed. Listing and
/// extraction both re-check that hash, so the contents the graph validated
/// are the contents that get extracted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TarballItem {
  pub from_target: String,
  pub source: PathBuf,
  pub into_dir: ImagePath,
  /// Extract everything as the building user instead of the owners recorded
  /// in the archive.
  pub force_root_ownership: bool,
  compression: Compression,
  hash: ContentHash,
}

impl TarballItem {
  pub fn new(
    from_target: impl Into<String>,
    source: impl Into<PathBuf>,
    into_dir: &str,
    force_root_ownership: bool,
  ) -> Result<Self, ItemError> {
    let source = source.into();
    if !source.is_file() {
      return Err(ItemError::MissingSource(source));
    }
    let compression = Compression::detect(&source).ok_or_else(|| ItemError::UnsupportedArchive(source.clone()))?;
    let hash = hash_file(&source)?;
    Ok(Self {
      from_target: from_target.into(),
      into_dir: ImagePath::new(into_dir)?,
      force_root_ownership,
      compression,
      hash,
      source,
    })
  }

  fn verify(&self) -> Result<(), ItemError> {
    let actual = hash_file(&self.source)?;
    if actual != self.hash {
      return Err(ItemError::SourceChanged {
        path: self.source.clone(),
        expected: self.hash.0.clone(),
        actual: actual.0,
      });
    }
    Ok(())
  }

  fn open(&self) -> Result<tar::Archive<Box<dyn Read>>, ItemError> {
    let archive_err = |source| ItemError::Archive {
      path: self.source.clone(),
      source,
    };
    let file = File::open(&self.source).map_err(archive_err)?;
    let reader: Box<dyn Read> = match self.compression {
      Compression::None => Box::new(file),
      Compression::Gzip => Box::new(GzDecoder::new(file)),
      Compression::Zstd => Box::new(zstd::stream::read::Decoder::new(file).map_err(archive_err)?),
    };
    Ok(tar::Archive::new(reader))
  }

  fn archive_err(&self) -> impl Fn(std::io::Error) -> ItemError + '_ {
    |source| ItemError::Archive {
      path: self.source.clone(),
      source,
    }
  }

  /// Directories in the archive (other than `into_dir` itself) are provided
  /// as directories; every other member as a file.
  pub fn provides(&self) -> Result<Vec<Provide>, ItemError> {
    self.verify()?;
    let mut archive = self.open()?;
    let mut out = Vec::new();
    for entry in archive.entries().map_err(self.archive_err())? {
      let entry = entry.map_err(self.archive_err())?;
      let member = entry.path().map_err(self.archive_err())?;
      let path = self.into_dir.join(ImagePath::from_path(&member)?.as_str())?;
      if path == self.into_dir {
        continue;
      }
      if entry.header().entry_type().is_dir() {
        out.push(Provide::directory(path));
      } else {
        out.push(Provide::file(path));
      }
    }
    Ok(out)
  }

  pub fn requires(&self) -> Vec<Require> {
    vec![Require::directory(self.into_dir.clone())]
  }

  /// Extract without overwriting. Directories that already exist are kept
  /// as they are.
  pub fn build(&self, subvol: &Subvol, _opts: &LayerOpts) -> Result<(), ItemError> {
    self.verify()?;
    let dest = subvol.resolve(&self.into_dir)?;
    debug!(source = %self.source.display(), into = %self.into_dir, "extracting tarball");

    let mut archive = self.open()?;
    archive.set_overwrite(false);
    archive.set_preserve_permissions(true);
    archive.set_preserve_ownerships(!self.force_root_ownership);

    for entry in archive.entries().map_err(self.archive_err())? {
      let mut entry = entry.map_err(self.archive_err())?;
      if entry.header().entry_type().is_dir() {
        let member = entry.path().map_err(self.archive_err())?;
        let existing = self.into_dir.join(ImagePath::from_path(&member)?.as_str())?;
        if fs::symlink_metadata(subvol.abs(&existing)?).is_ok_and(|m| m.is_dir()) {
          continue;
        }
      }
      let unpacked = entry.unpack_in(&dest).map_err(io_err(&dest))?;
      if !unpacked {
        let member = entry.path().map_err(self.archive_err())?.into_owned();
        return Err(ItemError::Invalid(format!(
          "archive member {} escapes {}",
          member.display(),
          self.into_dir
        )));
      }
    }
    Ok(())
  }
}
