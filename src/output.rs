//! All-or-nothing output for one run.
//!
//! Every file is first written to a temp file in its target directory.
//! [`OutputBatch::commit`] renames them into place; when a rename fails the
//! files already renamed are removed again. A batch dropped without a
//! successful commit deletes its temp files and the directories it created.

use crate::error::Result;
use std::cmp::Reverse;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

/// Output files staged for one run
#[derive(Debug, Default)]
pub struct OutputBatch {
    staged: Vec<(NamedTempFile, PathBuf)>,
    /// Directories that did not exist before staging
    created_dirs: Vec<PathBuf>,
    committed: bool,
}

impl OutputBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.staged.len()
    }

    pub fn is_empty(&self) -> bool {
        self.staged.is_empty()
    }

    /// Write `path`'s contents into a temp file beside it
    pub fn stage<P, F>(&mut self, path: P, contents: F) -> Result<()>
    where
        P: AsRef<Path>,
        F: FnOnce(&mut dyn Write) -> Result<()>,
    {
        let path = path.as_ref();
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        self.create_dir(dir)?;

        let mut staged = NamedTempFile::new_in(dir)?;
        {
            let mut writer = BufWriter::new(&mut staged);
            contents(&mut writer)?;
            writer.flush()?;
        }

        debug!(path = %path.display(), "Output staged");
        self.staged.push((staged, path.to_path_buf()));
        Ok(())
    }

    /// Rename every staged file into place, in staging order
    pub fn commit(mut self) -> Result<Vec<PathBuf>> {
        let mut pending = std::mem::take(&mut self.staged).into_iter();
        let mut written: Vec<PathBuf> = Vec::new();

        while let Some((file, target)) = pending.next() {
            if let Err(err) = file.persist(&target) {
                drop(err.file);
                drop(pending);
                for path in &written {
                    if let Err(e) = fs::remove_file(path) {
                        warn!(path = %path.display(), error = %e, "Failed to remove output");
                    }
                }
                warn!(
                    path = %target.display(),
                    removed = written.len(),
                    "Output commit failed, written files removed"
                );
                return Err(err.error.into());
            }
            written.push(target);
        }

        self.committed = true;
        info!(files = written.len(), "Outputs committed");
        Ok(written)
    }

    fn create_dir(&mut self, dir: &Path) -> Result<()> {
        let missing: Vec<PathBuf> = dir
            .ancestors()
            .take_while(|d| !d.as_os_str().is_empty() && !d.exists())
            .map(Path::to_path_buf)
            .collect();
        if missing.is_empty() {
            return Ok(());
        }

        fs::create_dir_all(dir)?;
        self.created_dirs.extend(missing);
        Ok(())
    }
}

impl Drop for OutputBatch {
    fn drop(&mut self) {
        if self.committed {
            return;
        }

        // Temp files first, so created directories are empty
        self.staged.clear();
        self.created_dirs
            .sort_by_key(|dir| Reverse(dir.components().count()));
        for dir in &self.created_dirs {
            if let Err(e) = fs::remove_dir(dir) {
                debug!(path = %dir.display(), error = %e, "Directory left in place");
            }
        }
    }
}
