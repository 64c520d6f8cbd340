//! Output writing.
//!
//! Collision decisions are made in row order, before rendering, so they are
//! reproducible. Bytes always go to a temp file in the target directory first
//! and are renamed into place; a failed write never leaves a partial file.

use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::config::CollisionPolicy;
use crate::error::{AutogenError, Result};

/// Upper bound on `name_N` attempts under the auto-number policy.
const MAX_AUTO_NUMBER: usize = 100_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Planned {
    Write(PathBuf),
    /// Target exists and the policy says skip.
    Skip(PathBuf),
}

#[derive(Debug)]
pub struct OutputWriter {
    dir: PathBuf,
    policy: CollisionPolicy,
    claimed: HashSet<PathBuf>,
}

impl OutputWriter {
    pub fn new(dir: &Path, policy: CollisionPolicy) -> Result<Self> {
        fs::create_dir_all(dir).map_err(|e| AutogenError::io(dir, e))?;
        Ok(Self {
            dir: dir.to_path_buf(),
            policy,
            claimed: HashSet::new(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn taken(&self, path: &Path) -> bool {
        self.claimed.contains(path) || path.exists()
    }

    /// Decide where `file_name` goes. Names claimed earlier in this run count as
    /// taken even before their bytes are written.
    pub fn plan(&mut self, file_name: &str) -> Result<Planned> {
        let target = self.dir.join(file_name);
        let planned = match self.policy {
            CollisionPolicy::Overwrite => Planned::Write(target),
            CollisionPolicy::Skip if self.taken(&target) => Planned::Skip(target),
            CollisionPolicy::Skip => Planned::Write(target),
            CollisionPolicy::AutoNumber => Planned::Write(self.next_free(&target)?),
        };
        if let Planned::Write(path) = &planned {
            self.claimed.insert(path.clone());
        }
        Ok(planned)
    }

    fn next_free(&self, target: &Path) -> Result<PathBuf> {
        if !self.taken(target) {
            return Ok(target.to_path_buf());
        }
        let stem = target
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let extension = target
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();
        for n in 1..=MAX_AUTO_NUMBER {
            let candidate = self.dir.join(format!("{}_{}{}", stem, n, extension));
            if !self.taken(&candidate) {
                debug!("{} exists; numbering to {}", target.display(), candidate.display());
                return Ok(candidate);
            }
        }
        Err(AutogenError::io(
            target,
            std::io::Error::new(std::io::ErrorKind::AlreadyExists, "no free numbered name"),
        ))
    }

    /// Write `bytes` to `path` through a temp file in the same directory.
    pub fn write(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        let dir = path.parent().unwrap_or(&self.dir);
        let mut temp = NamedTempFile::new_in(dir).map_err(|e| AutogenError::io(dir, e))?;
        temp.write_all(bytes)
            .and_then(|_| temp.as_file().sync_all())
            .map_err(|e| AutogenError::io(temp.path(), e))?;
        temp.persist(path)
            .map_err(|e| AutogenError::io(path, e.error))?;
        info!("wrote {} ({} bytes)", path.display(), bytes.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overwrite_policy() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = OutputWriter::new(dir.path(), CollisionPolicy::Overwrite).unwrap();
        let Planned::Write(path) = writer.plan("a.svg").unwrap() else {
            panic!("expected write");
        };
        writer.write(&path, b"one").unwrap();
        writer.write(&path, b"two").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"two");
    }

    #[test]
    fn test_skip_policy() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.svg"), b"old").unwrap();
        let mut writer = OutputWriter::new(dir.path(), CollisionPolicy::Skip).unwrap();
        assert_eq!(
            writer.plan("a.svg").unwrap(),
            Planned::Skip(dir.path().join("a.svg"))
        );
        assert_eq!(
            writer.plan("b.svg").unwrap(),
            Planned::Write(dir.path().join("b.svg"))
        );
        // claimed within the run, not yet on disk
        assert_eq!(
            writer.plan("b.svg").unwrap(),
            Planned::Skip(dir.path().join("b.svg"))
        );
    }

    #[test]
    fn test_auto_number_policy() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.svg"), b"old").unwrap();
        let mut writer = OutputWriter::new(dir.path(), CollisionPolicy::AutoNumber).unwrap();
        assert_eq!(
            writer.plan("a.svg").unwrap(),
            Planned::Write(dir.path().join("a_1.svg"))
        );
        assert_eq!(
            writer.plan("a.svg").unwrap(),
            Planned::Write(dir.path().join("a_2.svg"))
        );
    }

    #[test]
    fn test_no_temp_files_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = OutputWriter::new(dir.path(), CollisionPolicy::Overwrite).unwrap();
        let Planned::Write(path) = writer.plan("out.svg").unwrap() else {
            panic!("expected write");
        };
        writer.write(&path, b"<svg/>").unwrap();
        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["out.svg"]);
    }
}
