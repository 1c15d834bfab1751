use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::ErrorKind;
use url::Url;

use crate::transfer::{OsRename, Rename};

/// Storage root plus the rename primitive used by MOVE.
#[derive(Clone)]
pub struct Storage {
    root: PathBuf,
    renamer: Arc<dyn Rename>,
}

impl Storage {
    pub fn new(root: PathBuf) -> Self {
        Self::with_renamer(root, Arc::new(OsRename))
    }

    pub fn with_renamer(root: PathBuf, renamer: Arc<dyn Rename>) -> Self {
        Self { root, renamer }
    }

    pub fn root_path(&self) -> &Path {
        &self.root
    }

    pub fn renamer(&self) -> &dyn Rename {
        self.renamer.as_ref()
    }

    /// Resolves a raw (percent-encoded) request path to a location under the root.
    ///
    /// A missing leaf (or any missing trailing components when
    /// `allow_missing_leaf` is set) is accepted so callers can create it; the
    /// handler decides whether absence is an error.
    pub async fn resolve_path_checked(
        &self,
        url_path: &str,
        allow_missing_leaf: bool,
    ) -> Result<PathBuf, StorageError> {
        let decoded = decode_url_path(url_path)?;
        let target = self.resolve(&decoded)?;
        self.ensure_no_symlink_components(&target, allow_missing_leaf)
            .await?;
        Ok(target)
    }

    /// Resolves a `Destination` header, which may be an absolute URL or a path.
    /// Only the path component is used.
    pub async fn resolve_destination(&self, header: &str) -> Result<PathBuf, StorageError> {
        let path = destination_path(header)?;
        self.resolve_path_checked(&path, true).await
    }

    fn resolve(&self, decoded: &str) -> Result<PathBuf, StorageError> {
        if decoded.contains('\0') {
            return Err(StorageError::InvalidPath);
        }

        let trimmed = decoded.trim_start_matches(['/', '\\']);
        let mut normalized = PathBuf::new();
        for component in Path::new(trimmed).components() {
            match component {
                Component::Normal(segment) => normalized.push(segment),
                Component::CurDir => continue,
                // `..` above the root is dropped, like URL dot-segment removal.
                Component::ParentDir => {
                    normalized.pop();
                }
                Component::RootDir | Component::Prefix(_) => {
                    return Err(StorageError::InvalidPath);
                }
            }
        }

        let target = self.root.join(normalized);
        if !target.starts_with(&self.root) {
            return Err(StorageError::InvalidPath);
        }
        Ok(target)
    }

    async fn ensure_no_symlink_components(
        &self,
        target: &Path,
        allow_missing_leaf: bool,
    ) -> Result<(), StorageError> {
        let relative = target
            .strip_prefix(&self.root)
            .map_err(|_| StorageError::InvalidPath)?;
        let mut current = PathBuf::from(&self.root);
        let mut components = relative.components().peekable();

        while let Some(component) = components.next() {
            current.push(component.as_os_str());
            match fs::symlink_metadata(&current).await {
                Ok(metadata) => {
                    if metadata.file_type().is_symlink() {
                        return Err(StorageError::InvalidPath);
                    }
                    if components.peek().is_some() && !metadata.is_dir() {
                        return Err(StorageError::Io(io::Error::from(ErrorKind::NotFound)));
                    }
                }
                Err(err) if err.kind() == ErrorKind::NotFound && allow_missing_leaf => {
                    return Ok(());
                }
                Err(err) => return Err(StorageError::Io(err)),
            }
        }

        Ok(())
    }
}

/// Percent-decodes a URL path. Invalid UTF-8 after decoding is rejected.
pub fn decode_url_path(raw: &str) -> Result<String, StorageError> {
    urlencoding::decode(raw)
        .map(|decoded| decoded.into_owned())
        .map_err(|_| StorageError::InvalidPath)
}

/// Extracts the still-encoded path from a `Destination` header value.
fn destination_path(header: &str) -> Result<String, StorageError> {
    let header = header.trim();
    if header.is_empty() {
        return Err(StorageError::InvalidPath);
    }
    let base = Url::parse("http://localhost/").map_err(|_| StorageError::InvalidPath)?;
    let url = base.join(header).map_err(|_| StorageError::InvalidPath)?;
    Ok(url.path().to_string())
}

#[derive(Debug)]
pub enum StorageError {
    InvalidPath,
    Io(io::Error),
}

impl From<io::Error> for StorageError {
    fn from(err: io::Error) -> Self {
        StorageError::Io(err)
    }
}
