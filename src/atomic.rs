//! Staged writes that replace the target with a single rename.

use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

const STAGING_MARKER: &str = ".davpart.";

/// A sibling temp file that becomes the target on [`AtomicFile::finalize`].
pub struct AtomicFile {
    target: PathBuf,
    temp_path: PathBuf,
    file: File,
}

impl AtomicFile {
    /// Creates the temp file next to `target`; the parent must already exist.
    pub async fn new(target: &Path) -> io::Result<Self> {
        let parent = target
            .parent()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "target has no parent"))?;
        let temp_path = staging_path(parent, target);
        let file = File::create(&temp_path).await?;
        Ok(Self {
            target: target.to_path_buf(),
            temp_path,
            file,
        })
    }

    pub fn file_mut(&mut self) -> &mut File {
        &mut self.file
    }

    /// Drops the staged data.
    pub async fn cleanup(self) {
        drop(self.file);
        let _ = fs::remove_file(&self.temp_path).await;
    }

    /// Flushes, syncs, and renames the staged file over the target.
    pub async fn finalize(mut self) -> io::Result<()> {
        self.file.flush().await?;
        self.file.sync_all().await?;
        drop(self.file);

        if let Err(err) = fs::rename(&self.temp_path, &self.target).await {
            #[cfg(windows)]
            {
                if fs::remove_file(&self.target).await.is_ok() {
                    return fs::rename(&self.temp_path, &self.target).await;
                }
            }
            let _ = fs::remove_file(&self.temp_path).await;
            return Err(err);
        }

        Ok(())
    }
}

/// Hidden sibling of `target` inside `parent`, unique per call.
pub fn staging_path(parent: &Path, target: &Path) -> PathBuf {
    let base = target
        .file_name()
        .map(|name| name.to_string_lossy())
        .unwrap_or_else(|| "file".into());
    parent.join(format!(".{base}{STAGING_MARKER}{}", Uuid::new_v4().simple()))
}

/// Whether a directory entry name belongs to an in-flight staged write.
pub fn is_staging_name(name: &str) -> bool {
    name.starts_with('.') && name.contains(STAGING_MARKER)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn finalize_replaces_target_and_leaves_no_staging_file() {
        let temp = tempdir().expect("tempdir");
        let target = temp.path().join("doc.txt");
        std::fs::write(&target, b"old contents").expect("write");

        let mut atomic = AtomicFile::new(&target).await.expect("stage");
        atomic.file_mut().write_all(b"new").await.expect("write");
        atomic.finalize().await.expect("finalize");

        assert_eq!(std::fs::read(&target).expect("read"), b"new");
        let names: Vec<String> = std::fs::read_dir(temp.path())
            .expect("read_dir")
            .map(|entry| entry.expect("entry").file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["doc.txt".to_string()]);
    }

    #[tokio::test]
    async fn cleanup_keeps_original() {
        let temp = tempdir().expect("tempdir");
        let target = temp.path().join("doc.txt");
        std::fs::write(&target, b"keep").expect("write");

        let mut atomic = AtomicFile::new(&target).await.expect("stage");
        atomic.file_mut().write_all(b"partial").await.expect("write");
        atomic.cleanup().await;

        assert_eq!(std::fs::read(&target).expect("read"), b"keep");
        assert_eq!(std::fs::read_dir(temp.path()).expect("read_dir").count(), 1);
    }

    #[test]
    fn staging_names_are_recognised() {
        assert!(is_staging_name(".report.pdf.davpart.0123abcd"));
        assert!(!is_staging_name("report.pdf"));
        assert!(!is_staging_name(".hidden"));
    }
}
