use anyhow::{Context, anyhow};
use async_recursion::async_recursion;
use tracing::instrument;

use crate::extensions::AllowList;

/// Error type for copy operations that preserves operation summary even on failure.
#[derive(Debug, thiserror::Error)]
#[error("{source:#}")]
pub struct Error {
    #[source]
    pub source: anyhow::Error,
    pub summary: Summary,
}

impl Error {
    #[must_use]
    pub fn new(source: anyhow::Error, summary: Summary) -> Self {
        Error { source, summary }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Summary {
    pub bytes_copied: u64,
    pub files_copied: usize,
    pub files_skipped: usize,
    pub directories_created: usize,
    pub directories_unchanged: usize,
    pub directories_pruned: usize,
}

impl Summary {
    /// `true` when at least one file was copied somewhere in the subtree.
    #[must_use]
    pub fn has_files(&self) -> bool {
        self.files_copied > 0
    }
}

impl std::ops::Add for Summary {
    type Output = Self;
    fn add(self, other: Self) -> Self {
        Self {
            bytes_copied: self.bytes_copied + other.bytes_copied,
            files_copied: self.files_copied + other.files_copied,
            files_skipped: self.files_skipped + other.files_skipped,
            directories_created: self.directories_created + other.directories_created,
            directories_unchanged: self.directories_unchanged + other.directories_unchanged,
            directories_pruned: self.directories_pruned + other.directories_pruned,
        }
    }
}

impl std::fmt::Display for Summary {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "bytes copied: {}\n\
            files copied: {}\n\
            files skipped by filter: {}\n\
            directories created: {}\n\
            directories unchanged: {}\n\
            directories pruned: {}",
            bytesize::ByteSize(self.bytes_copied),
            self.files_copied,
            self.files_skipped,
            self.directories_created,
            self.directories_unchanged,
            self.directories_pruned,
        )
    }
}

/// Create `dst` if missing, returning `true` if this call created it.
async fn make_dir(dst: &std::path::Path) -> Result<bool, anyhow::Error> {
    match tokio::fs::create_dir(dst).await {
        Ok(()) => Ok(true),
        Err(error) if error.kind() == std::io::ErrorKind::AlreadyExists => {
            let dst_metadata = tokio::fs::metadata(dst)
                .await
                .with_context(|| format!("failed reading metadata from dst: {:?}", &dst))?;
            if !dst_metadata.is_dir() {
                return Err(anyhow!("destination {:?} exists and is not a directory", dst));
            }
            tracing::debug!("'dst' is a directory, leaving it as is");
            Ok(false)
        }
        Err(error) => Err(error).with_context(|| format!("cannot create directory {dst:?}")),
    }
}

/// `true` when both paths resolve to the same inode; a missing `dst` never matches.
async fn same_file(src: &std::path::Path, dst: &std::path::Path) -> bool {
    use std::os::unix::fs::MetadataExt;
    match (tokio::fs::metadata(src).await, tokio::fs::metadata(dst).await) {
        (Ok(src_metadata), Ok(dst_metadata)) => {
            src_metadata.dev() == dst_metadata.dev() && src_metadata.ino() == dst_metadata.ino()
        }
        _ => false,
    }
}

#[instrument]
async fn copy_file(src: &std::path::Path, dst: &std::path::Path) -> Result<Summary, Error> {
    tracing::debug!("copying data");
    // opening dst for writing would truncate src as well
    if same_file(src, dst).await {
        return Err(Error::new(
            anyhow!("cannot copy {:?} onto itself ({:?})", src, dst),
            Default::default(),
        ));
    }
    // existing files are replaced, matching a merge into a pre-populated destination
    let bytes_copied = tokio::fs::copy(src, dst)
        .await
        .with_context(|| format!("failed copying {:?} to {:?}", &src, &dst))
        .map_err(|err| Error::new(err, Default::default()))?;
    Ok(Summary {
        bytes_copied,
        files_copied: 1,
        ..Default::default()
    })
}

/// Recursively copy `src` into `dst`, merging into existing directories and overwriting
/// existing files.
///
/// When `allow_list` is set only files with an allowed suffix are copied. With `prune_if_empty`
/// a `dst` created by this call that ends up without any qualifying file is removed again;
/// directories that already existed are never removed. Symlinks are followed. Entries are
/// processed one at a time. Copying a directory or file onto itself is an error and leaves
/// both sides untouched.
#[instrument(skip(allow_list))]
#[async_recursion]
async fn copy_dir(
    src: &std::path::Path,
    dst: &std::path::Path,
    allow_list: Option<&AllowList>,
    prune_if_empty: bool,
) -> Result<Summary, Error> {
    tracing::debug!("process contents of 'src' directory");
    let mut entries = tokio::fs::read_dir(src)
        .await
        .with_context(|| format!("cannot open directory {src:?} for reading"))
        .map_err(|err| Error::new(err, Default::default()))?;
    if same_file(src, dst).await {
        return Err(Error::new(
            anyhow!("cannot copy directory {:?} into itself ({:?})", src, dst),
            Default::default(),
        ));
    }
    let created = make_dir(dst)
        .await
        .map_err(|err| Error::new(err, Default::default()))?;
    let mut copy_summary = if created {
        Summary {
            directories_created: 1,
            ..Default::default()
        }
    } else {
        Summary {
            directories_unchanged: 1,
            ..Default::default()
        }
    };
    while let Some(entry) = entries
        .next_entry()
        .await
        .with_context(|| format!("failed traversing src directory {:?}", &src))
        .map_err(|err| Error::new(err, copy_summary))?
    {
        let entry_path = entry.path();
        let dst_path = dst.join(entry.file_name());
        let entry_metadata = tokio::fs::metadata(&entry_path)
            .await
            .with_context(|| format!("failed reading metadata from src: {:?}", &entry_path))
            .map_err(|err| Error::new(err, copy_summary))?;
        if entry_metadata.is_dir() {
            copy_summary = copy_summary
                + copy_dir(&entry_path, &dst_path, allow_list, allow_list.is_some())
                    .await
                    .map_err(|err| Error::new(err.source, copy_summary + err.summary))?;
            continue;
        }
        if let Some(allow_list) = allow_list
            && !allow_list.allows(&entry_path)
        {
            tracing::trace!("skipping {:?}, suffix not allowed", &entry_path);
            copy_summary.files_skipped += 1;
            continue;
        }
        copy_summary = copy_summary
            + copy_file(&entry_path, &dst_path)
                .await
                .map_err(|err| Error::new(err.source, copy_summary + err.summary))?;
    }
    if prune_if_empty && created && !copy_summary.has_files() {
        tracing::debug!("no qualifying files under {:?}, pruning {:?}", src, dst);
        // anything created below was pruned already, so the directory is empty
        tokio::fs::remove_dir(dst)
            .await
            .with_context(|| format!("failed pruning empty directory {:?}", &dst))
            .map_err(|err| Error::new(err, copy_summary))?;
        copy_summary.directories_pruned += 1;
    }
    Ok(copy_summary)
}

/// Verbatim recursive merge-copy of `src` into `dst`.
pub async fn copy_tree(src: &std::path::Path, dst: &std::path::Path) -> Result<Summary, Error> {
    copy_dir(src, dst, None, false).await
}

/// Copy only files whose suffix is in `allow_list`, pruning destination subdirectories that
/// end up without qualifying files.
pub async fn copy_filtered_summary(
    src: &std::path::Path,
    dst: &std::path::Path,
    allow_list: &AllowList,
) -> Result<Summary, Error> {
    copy_dir(src, dst, Some(allow_list), false).await
}

/// Filtered copy returning whether any qualifying file was copied anywhere in the subtree.
pub async fn copy_filtered(
    src: &std::path::Path,
    dst: &std::path::Path,
    allow_list: &AllowList,
) -> Result<bool, Error> {
    Ok(copy_filtered_summary(src, dst, allow_list)
        .await?
        .has_files())
}
