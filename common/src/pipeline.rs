//! The archive, hash, copy and move sequence
//!
//! A run walks these stages strictly in order and stops at the first failure:
//!
//! 1. validate the source, destination and copy roots
//! 2. archive every immediate subdirectory of the source into `<name>.zip`
//! 3. hash every archive into [`MANIFEST_FILE_NAME`] and hash the manifest itself (the
//!    fingerprint)
//! 4. optionally replicate the output directory and the sources under the copy root
//! 5. optionally copy the sources into the output directory, confirm, and clear the originals
//!
//! Nothing destructive happens before stages 2 and 3 succeeded, and originals are only cleared
//! after the operator confirmed (unless confirmation is disabled).

use anyhow::{Context, anyhow};
use std::path::{Component, Path, PathBuf};
use tracing::instrument;

use crate::archive;
use crate::config::RunConfiguration;
use crate::copy;
use crate::extensions::AllowList;
use crate::hash;
use crate::paths;
use crate::prompt::{self, Prompt};
use crate::rm;

pub const MANIFEST_FILE_NAME: &str = "hashes.txt";

const SUBDIRECTORY_QUESTION: &str = "Insert subdirectory name: ";
const PAUSE_QUESTION: &str = "Press ENTER to exit...";

/// Reasons a run stops on purpose
#[derive(Debug, thiserror::Error)]
pub enum Abort {
    #[error("move of sources into {0:?} was not confirmed, aborting with sources untouched")]
    UserDeclined(PathBuf),
}

/// Error type for a run that preserves what was completed before the failure.
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

    /// `true` when the operator declined clearing the sources.
    #[must_use]
    pub fn is_user_declined(&self) -> bool {
        self.source.downcast_ref::<Abort>().is_some()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Summary {
    pub subdirectories: usize,
    pub archives_written: usize,
    pub archives_skipped: usize,
    pub archive_entries: usize,
    pub bytes_archived: u64,
    pub files_copied: usize,
    pub bytes_copied: u64,
    pub directories_pruned: usize,
    pub entries_cleared: usize,
    /// Digest of the manifest
    pub fingerprint: Option<String>,
}

impl Summary {
    fn add_copied(&mut self, copied: &copy::Summary) {
        self.files_copied += copied.files_copied;
        self.bytes_copied += copied.bytes_copied;
        self.directories_pruned += copied.directories_pruned;
    }

    fn add_archived(&mut self, result: &archive::ArchiveResult) {
        if result.archive.is_some() {
            self.archives_written += 1;
        } else {
            self.archives_skipped += 1;
        }
        self.archive_entries += result.files;
        self.bytes_archived += result.bytes;
    }
}

impl std::fmt::Display for Summary {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "subdirectories: {}\n\
            archives written: {}\n\
            archives skipped: {}\n\
            archive entries: {}\n\
            bytes archived: {}\n\
            files copied: {}\n\
            bytes copied: {}\n\
            directories pruned: {}\n\
            entries cleared: {}\n\
            fingerprint: {}",
            self.subdirectories,
            self.archives_written,
            self.archives_skipped,
            self.archive_entries,
            bytesize::ByteSize(self.bytes_archived),
            self.files_copied,
            bytesize::ByteSize(self.bytes_copied),
            self.directories_pruned,
            self.entries_cleared,
            self.fingerprint.as_deref().unwrap_or("-"),
        )
    }
}

/// The operator-supplied subdirectory name must stay below the root it is joined to.
fn parse_subdirectory(answer: &str) -> anyhow::Result<PathBuf> {
    let name = answer.trim();
    if name.is_empty() {
        return Err(anyhow!("subdirectory name must not be empty"));
    }
    let path = PathBuf::from(name);
    if !path
        .components()
        .all(|component| matches!(component, Component::Normal(_)))
    {
        return Err(anyhow!(
            "subdirectory name {:?} must be a relative path without '..'",
            name
        ));
    }
    Ok(path)
}

/// Copy `src` into `dst`, filtered through `allow_list` when given, accounting into `summary`.
async fn replicate(
    src: &Path,
    dst: &Path,
    allow_list: Option<&AllowList>,
    summary: &mut Summary,
) -> anyhow::Result<()> {
    let result = match allow_list {
        Some(allow_list) => copy::copy_filtered_summary(src, dst, allow_list).await,
        None => copy::copy_tree(src, dst).await,
    };
    match result {
        Ok(copied) => {
            tracing::debug!("copied {:?} into {:?}: {}", src, dst, &copied);
            summary.add_copied(&copied);
            Ok(())
        }
        Err(error) => {
            summary.add_copied(&error.summary);
            Err(error.source).with_context(|| format!("failed copying {src:?} into {dst:?}"))
        }
    }
}

async fn archive_all(
    config: &RunConfiguration,
    allow_list: &AllowList,
    subdirectories: &[PathBuf],
    dst_dir: &Path,
    summary: &mut Summary,
) -> anyhow::Result<Vec<PathBuf>> {
    tracing::info!(
        "archiving {:?} into {:?} {} filter",
        &config.source,
        dst_dir,
        if config.filter_archive { "with" } else { "without" }
    );
    let filter = config.filter_archive.then_some(allow_list);
    let mut archives = vec![];
    for src_dir in subdirectories {
        let result = archive::zip_directory(src_dir, dst_dir, filter, config.prune_empty)
            .await
            .with_context(|| format!("failed archiving {src_dir:?}"))?;
        summary.add_archived(&result);
        match result.archive {
            Some(archive) => {
                tracing::debug!("archive {:?} written ({} files)", &archive, result.files);
                archives.push(archive);
            }
            None => tracing::info!(
                "{:?} not archived (empty directory or no files allowed by filter)",
                &result.source
            ),
        }
    }
    tracing::info!("{} directories archived", archives.len());
    Ok(archives)
}

/// Write the manifest for `archives` into `dst_dir` and return the manifest's own digest.
#[instrument(skip(archives))]
async fn write_manifest(
    archives: &[PathBuf],
    dst_dir: &Path,
    algorithm: hash::HashAlgorithm,
) -> anyhow::Result<String> {
    let mut manifest = String::new();
    for archive in archives {
        let digest = hash::hash_file_with(archive, algorithm).await?;
        let name = archive
            .file_name()
            .ok_or_else(|| anyhow!("archive {:?} does not have a file name", archive))?
            .to_string_lossy();
        tracing::debug!("{name} ({algorithm}): {digest}");
        manifest.push_str(&format!("{name} ({algorithm}): {digest}\n"));
    }
    let manifest_path = dst_dir.join(MANIFEST_FILE_NAME);
    tokio::fs::write(&manifest_path, manifest)
        .await
        .with_context(|| format!("failed writing manifest {manifest_path:?}"))?;
    tracing::info!("{} archives hashed into {:?}", archives.len(), &manifest_path);
    let fingerprint = hash::hash_file_with(&manifest_path, algorithm).await?;
    Ok(fingerprint)
}

async fn execute(
    config: &RunConfiguration,
    allow_list: &AllowList,
    prompt: &mut dyn Prompt,
    summary: &mut Summary,
) -> anyhow::Result<()> {
    paths::check_paths(
        &config.source,
        &config.destination,
        config.copy_to.as_deref(),
    )
    .await?;
    tracing::debug!("paths checked");

    let subdirectory = if config.named_subdirectory {
        Some(parse_subdirectory(&prompt.ask(SUBDIRECTORY_QUESTION)?)?)
    } else {
        None
    };
    let dst_dir = match &subdirectory {
        Some(name) => {
            let dst_dir = config.destination.join(name);
            paths::ensure_dir("destination", &dst_dir).await?;
            dst_dir
        }
        None => config.destination.clone(),
    };

    let subdirectories = paths::subdirectories(&config.source).await?;
    summary.subdirectories = subdirectories.len();
    let archives = archive_all(config, allow_list, &subdirectories, &dst_dir, summary).await?;

    let fingerprint = write_manifest(&archives, &dst_dir, config.algorithm).await?;
    tracing::info!("fingerprint ({}): {}", config.algorithm, &fingerprint);
    summary.fingerprint = Some(fingerprint);

    if let Some(copy_root) = &config.copy_to {
        let cpy_dir = match &subdirectory {
            Some(name) => {
                let cpy_dir = copy_root.join(name);
                paths::ensure_dir("copy", &cpy_dir).await?;
                cpy_dir
            }
            None => copy_root.clone(),
        };
        tracing::debug!(
            "copying {:?} and {:?} into {:?}",
            &dst_dir,
            &config.source,
            &cpy_dir
        );
        replicate(&dst_dir, &cpy_dir, None, summary).await?;
        replicate(
            &config.source,
            &cpy_dir,
            config.filter_copy.then_some(allow_list),
            summary,
        )
        .await?;
        tracing::info!("copy into {:?} completed", &cpy_dir);
    }

    if config.move_after {
        tracing::debug!("moving {:?} into {:?}", &config.source, &dst_dir);
        replicate(
            &config.source,
            &dst_dir,
            config.filter_move.then_some(allow_list),
            summary,
        )
        .await?;
        if config.require_confirmation {
            let answer = prompt.ask(&format!(
                "Check if {} contains the src files and write Y to confirm: ",
                dst_dir.display()
            ))?;
            if !prompt::is_affirmative(&answer) {
                return Err(Abort::UserDeclined(dst_dir).into());
            }
        }
        for src_dir in &subdirectories {
            let cleared = rm::clear_dir(src_dir).await?;
            summary.entries_cleared +=
                cleared.files_removed + cleared.symlinks_removed + cleared.directories_removed;
            tracing::debug!("cleared {:?}: {}", src_dir, &cleared);
        }
        tracing::info!("move into {:?} completed", &dst_dir);
    }

    tracing::info!("process completed successfully");
    if config.pause_on_exit {
        prompt.ask(PAUSE_QUESTION)?;
    }
    Ok(())
}

/// Run every stage for `config`, asking `prompt` whenever the operator has to answer.
///
/// Returns the run's counters and fingerprint. On failure the counters describe what was
/// completed before the failing stage.
#[instrument(skip_all, fields(src = ?config.source, dst = ?config.destination))]
pub async fn run(
    config: &RunConfiguration,
    allow_list: &AllowList,
    prompt: &mut dyn Prompt,
) -> Result<Summary, Error> {
    let mut summary = Summary::default();
    match execute(config, allow_list, prompt, &mut summary).await {
        Ok(()) => Ok(summary),
        Err(source) => Err(Error::new(source, summary)),
    }
}
