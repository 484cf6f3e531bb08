use std::path::PathBuf;

use super::ItemError;
use super::scan::scan_tree;
use crate::facts::Provide;
use crate::path::ImagePath;
use crate::util::passwd::read_accounts;

/// Everything the phases left in the layer, as facts.
///
/// Built by scanning the subvolume once the phases ran; seeds the
/// dependency graph for ordinary items. Its metadata directory is
/// provided as do-not-access.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhasesProvideItem {
  pub from_target: String,
  pub subvol_path: PathBuf,
}

impl PhasesProvideItem {
  pub fn new(from_target: impl Into<String>, subvol_path: impl Into<PathBuf>) -> Self {
    Self {
      from_target: from_target.into(),
      subvol_path: subvol_path.into(),
    }
  }

  pub fn provides(&self) -> Result<Vec<Provide>, ItemError> {
    let mut out = scan_tree(&self.subvol_path, &ImagePath::root(), &self.subvol_path)?;
    for user in read_accounts(&self.subvol_path, "etc/passwd")? {
      out.push(Provide::User { name: user.name });
    }
    for group in read_accounts(&self.subvol_path, "etc/group")? {
      out.push(Provide::Group { name: group.name });
    }
    Ok(out)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::util::testutil::{host_file, ip};
  use tempfile::TempDir;

  #[test]
  fn reports_tree_users_and_groups() {
    let temp = TempDir::new().unwrap();
    host_file(temp.path(), "etc/passwd", "root:x:0:0::/root:/bin/sh\n");
    host_file(temp.path(), "etc/group", "root:x:0:\nwheel:x:10:\n");
    host_file(temp.path(), ".meta/parent", "");

    let provides = PhasesProvideItem::new("//l:l", temp.path()).provides().unwrap();

    assert!(provides.contains(&Provide::directory(ImagePath::root())));
    assert!(provides.contains(&Provide::file(ip("etc/passwd"))));
    assert!(provides.contains(&Provide::DoNotAccess { path: ip(".meta") }));
    assert!(provides.contains(&Provide::User { name: "root".into() }));
    assert!(provides.contains(&Provide::Group { name: "wheel".into() }));
  }
}
