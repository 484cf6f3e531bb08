//! Test utilities for layerc-lib.
//!
//! Helpers to build archives and throwaway layers without touching the host.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use flate2::Compression;
use flate2::write::GzEncoder;

use crate::path::ImagePath;

/// Shorthand for a normalized path in tests.
pub fn ip(s: &str) -> ImagePath {
  ImagePath::new(s).unwrap()
}

/// An archive member: a directory when `content` is `None`.
pub struct Member<'a> {
  pub path: &'a str,
  pub content: Option<&'a [u8]>,
}

pub fn dir(path: &str) -> Member<'_> {
  Member { path, content: None }
}

pub fn file<'a>(path: &'a str, content: &'a [u8]) -> Member<'a> {
  Member {
    path,
    content: Some(content),
  }
}

fn append_members<W: Write>(builder: &mut tar::Builder<W>, members: &[Member<'_>]) {
  for member in members {
    let mut header = tar::Header::new_gnu();
    match member.content {
      Some(content) => {
        header.set_entry_type(tar::EntryType::Regular);
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, member.path, content).unwrap();
      }
      None => {
        header.set_entry_type(tar::EntryType::Directory);
        header.set_size(0);
        header.set_mode(0o755);
        header.set_cksum();
        builder.append_data(&mut header, member.path, std::io::empty()).unwrap();
      }
    }
  }
}

/// Write a gzip-compressed tarball at `dest`.
pub fn write_tar_gz(dest: &Path, members: &[Member<'_>]) -> PathBuf {
  let file = fs::File::create(dest).unwrap();
  let encoder = GzEncoder::new(file, Compression::default());
  let mut builder = tar::Builder::new(encoder);
  append_members(&mut builder, members);
  builder.into_inner().unwrap().finish().unwrap();
  dest.to_path_buf()
}

/// Write an uncompressed tarball at `dest`.
pub fn write_tar(dest: &Path, members: &[Member<'_>]) -> PathBuf {
  let file = fs::File::create(dest).unwrap();
  let mut builder = tar::Builder::new(file);
  append_members(&mut builder, members);
  builder.into_inner().unwrap();
  dest.to_path_buf()
}

/// Write `content` to `dir/name` and return the path.
pub fn host_file(dir: &Path, name: &str, content: &str) -> PathBuf {
  let path = dir.join(name);
  if let Some(parent) = path.parent() {
    fs::create_dir_all(parent).unwrap();
  }
  fs::write(&path, content).unwrap();
  path
}
