//! Recursive copy and move of files and directory trees.
//!
//! MOVE tries a single `rename` first. When that fails (typically because
//! source and destination sit on different devices) the tree is copied in
//! full and only then is the source removed, so a failed copy never loses
//! data.

use axum::http::StatusCode;
use futures_util::future::{BoxFuture, FutureExt};
use std::fs::Metadata;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::atomic::staging_path;
use crate::error::DavError;

/// Rename primitive used by MOVE. Swappable so cross-device failures can be
/// simulated.
pub trait Rename: Send + Sync + 'static {
    fn rename<'a>(&'a self, from: &'a Path, to: &'a Path) -> BoxFuture<'a, io::Result<()>>;
}

/// Plain `rename(2)`.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsRename;

impl Rename for OsRename {
    fn rename<'a>(&'a self, from: &'a Path, to: &'a Path) -> BoxFuture<'a, io::Result<()>> {
        fs::rename(from, to).boxed()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransferMode {
    Copy,
    Move,
}

impl TransferMode {
    pub fn as_str(self) -> &'static str {
        match self {
            TransferMode::Copy => "copy",
            TransferMode::Move => "move",
        }
    }
}

/// How a move was carried out.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MoveStrategy {
    Renamed,
    CopiedThenDeleted,
}

/// Runs a COPY or MOVE between two resolved storage paths and returns the
/// status to answer with: 201 for a new destination, 204 for a replaced one.
pub async fn transfer(
    renamer: &dyn Rename,
    mode: TransferMode,
    src: &Path,
    dest: &Path,
    overwrite: bool,
) -> Result<StatusCode, DavError> {
    let src_metadata = fs::symlink_metadata(src).await?;
    if src.starts_with(dest) || dest.starts_with(src) {
        return Err(DavError::BadRequest("source and destination overlap".into()));
    }

    let dest_metadata = match fs::symlink_metadata(dest).await {
        Ok(metadata) => Some(metadata),
        Err(err) if err.kind() == ErrorKind::NotFound => None,
        Err(err) => return Err(DavError::Internal(err.to_string())),
    };
    let dest_existed = dest_metadata.is_some();
    if dest_existed && !overwrite {
        return Err(DavError::PreconditionFailed);
    }

    // A destination of the other kind is set aside rather than deleted, so a
    // failed transfer can put it back.
    let displaced = match &dest_metadata {
        Some(existing) if existing.is_dir() != src_metadata.is_dir() => Some(
            set_aside(dest)
                .await
                .map_err(|err| DavError::Internal(err.to_string()))?,
        ),
        _ => None,
    };

    let result = match mode {
        TransferMode::Copy => copy_tree(src, dest).await,
        TransferMode::Move => move_tree(renamer, src, dest).await.map(|_| ()),
    };
    if let Err(err) = result {
        if let Some(aside) = &displaced {
            restore(dest, aside).await;
        }
        return Err(match err.kind() {
            ErrorKind::NotFound => DavError::NotFound,
            _ => DavError::Internal(format!("{} failed: {err}", mode.as_str())),
        });
    }

    if let Some(aside) = &displaced
        && let Err(err) = remove_path(aside).await
    {
        warn!(path = %aside.display(), error = %err, "failed to remove replaced destination");
    }

    Ok(if dest_existed {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::CREATED
    })
}

async fn set_aside(dest: &Path) -> io::Result<PathBuf> {
    let parent = dest
        .parent()
        .ok_or_else(|| io::Error::new(ErrorKind::InvalidInput, "destination has no parent"))?;
    let aside = staging_path(parent, dest);
    fs::rename(dest, &aside).await?;
    Ok(aside)
}

/// Drops whatever a failed transfer left at `dest` and renames the displaced
/// entry back.
async fn restore(dest: &Path, aside: &Path) {
    if let Err(err) = remove_path(dest).await
        && err.kind() != ErrorKind::NotFound
    {
        warn!(path = %dest.display(), error = %err, "failed to clear partial destination");
    }
    if let Err(err) = fs::rename(aside, dest).await {
        warn!(
            path = %dest.display(),
            aside = %aside.display(),
            error = %err,
            "failed to restore replaced destination"
        );
    }
}

async fn remove_path(path: &Path) -> io::Result<()> {
    let metadata = fs::symlink_metadata(path).await?;
    remove_tree(path, &metadata).await
}

/// Moves `src` to `dest`, falling back to copy-then-delete when rename fails.
///
/// A `NotFound` rename error means the source vanished and is returned as-is;
/// every other error kind triggers the fallback.
pub async fn move_tree(renamer: &dyn Rename, src: &Path, dest: &Path) -> io::Result<MoveStrategy> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).await?;
    }

    match renamer.rename(src, dest).await {
        Ok(()) => Ok(MoveStrategy::Renamed),
        Err(err) if err.kind() == ErrorKind::NotFound => Err(err),
        Err(err) => {
            debug!(error = %err, kind = ?err.kind(), "rename failed, falling back to copy");
            copy_tree(src, dest).await?;
            let metadata = fs::symlink_metadata(src).await?;
            remove_tree(src, &metadata).await?;
            Ok(MoveStrategy::CopiedThenDeleted)
        }
    }
}

/// Copies a file or directory tree. Existing directories are merged and
/// existing files overwritten. Symlinks are recreated, not followed.
pub fn copy_tree<'a>(src: &'a Path, dest: &'a Path) -> BoxFuture<'a, io::Result<()>> {
    async move {
        let metadata = fs::symlink_metadata(src).await?;
        if metadata.file_type().is_symlink() {
            return copy_symlink(src, dest).await;
        }

        if metadata.is_dir() {
            fs::create_dir_all(dest).await?;
            let mut entries = fs::read_dir(src).await?;
            while let Some(entry) = entries.next_entry().await? {
                let child_dest = dest.join(entry.file_name());
                copy_tree(&entry.path(), &child_dest).await?;
            }
        } else {
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent).await?;
            }
            copy_file(src, dest).await?;
        }
        Ok(())
    }
    .boxed()
}

#[cfg(unix)]
async fn copy_symlink(src: &Path, dest: &Path) -> io::Result<()> {
    let link_target = fs::read_link(src).await?;
    match fs::symlink_metadata(dest).await {
        Ok(existing) if !existing.is_dir() => fs::remove_file(dest).await?,
        Ok(_) => {}
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(err) => return Err(err),
    }
    debug!(path = %src.display(), target = %link_target.display(), "recreating symlink");
    fs::symlink(link_target, dest).await
}

#[cfg(not(unix))]
async fn copy_symlink(src: &Path, _dest: &Path) -> io::Result<()> {
    Err(io::Error::new(
        ErrorKind::Unsupported,
        format!("cannot copy symlink {}", src.display()),
    ))
}

async fn copy_file(src: &Path, dest: &Path) -> io::Result<u64> {
    let mut reader = File::open(src).await?;
    let mut writer = File::create(dest).await?;
    let copied = tokio::io::copy(&mut reader, &mut writer).await?;
    writer.flush().await?;
    Ok(copied)
}

/// Removes a file or a whole directory tree.
pub async fn remove_tree(path: &Path, metadata: &Metadata) -> io::Result<()> {
    if metadata.is_dir() {
        fs::remove_dir_all(path).await
    } else {
        fs::remove_file(path).await
    }
}
