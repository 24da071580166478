use anyhow::{Context, Result};
use async_recursion::async_recursion;
use tracing::instrument;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Summary {
    pub files_removed: usize,
    pub symlinks_removed: usize,
    pub directories_removed: usize,
}

impl std::ops::Add for Summary {
    type Output = Self;
    fn add(self, other: Self) -> Self {
        Self {
            files_removed: self.files_removed + other.files_removed,
            symlinks_removed: self.symlinks_removed + other.symlinks_removed,
            directories_removed: self.directories_removed + other.directories_removed,
        }
    }
}

impl std::fmt::Display for Summary {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "files removed: {}\n\
            symlinks removed: {}\n\
            directories removed: {}",
            self.files_removed, self.symlinks_removed, self.directories_removed,
        )
    }
}

/// Remove `path` and, for directories, everything below it.
///
/// Symlinks are removed, never followed.
#[instrument]
#[async_recursion]
pub async fn rm(path: &std::path::Path) -> Result<Summary> {
    tracing::debug!("remove: {:?}", path);
    let metadata = tokio::fs::symlink_metadata(path)
        .await
        .with_context(|| format!("failed reading metadata from {:?}", &path))?;
    if !metadata.is_dir() {
        tokio::fs::remove_file(path)
            .await
            .with_context(|| format!("failed removing {:?}", &path))?;
        if metadata.is_symlink() {
            return Ok(Summary {
                symlinks_removed: 1,
                ..Default::default()
            });
        }
        return Ok(Summary {
            files_removed: 1,
            ..Default::default()
        });
    }
    let mut summary = clear_dir(path).await?;
    tokio::fs::remove_dir(path)
        .await
        .with_context(|| format!("failed removing directory {:?}", &path))?;
    summary.directories_removed += 1;
    Ok(summary)
}

/// Remove every entry inside `path`, leaving the (now empty) directory itself in place.
///
/// Entries are removed one at a time; the first failure stops the walk.
#[instrument]
pub async fn clear_dir(path: &std::path::Path) -> Result<Summary> {
    let mut entries = tokio::fs::read_dir(path)
        .await
        .with_context(|| format!("cannot open directory {:?} for reading", path))?;
    let mut summary = Summary::default();
    while let Some(entry) = entries
        .next_entry()
        .await
        .with_context(|| format!("failed traversing directory {:?}", &path))?
    {
        summary = summary + rm(&entry.path()).await?;
    }
    tracing::debug!("cleared {:?}", path);
    Ok(summary)
}
