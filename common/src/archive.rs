use anyhow::{Context, Result, anyhow};
use async_recursion::async_recursion;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::instrument;

use crate::extensions::{self, AllowList};

/// Outcome of archiving one source subdirectory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveResult {
    pub source: PathBuf,
    /// `None` when nothing qualified and empty archives are pruned
    pub archive: Option<PathBuf>,
    pub files: usize,
    /// uncompressed size of the archived files
    pub bytes: u64,
}

struct Entry {
    path: PathBuf,
    name: String,
    size: u64,
}

/// Archive entry name for `path` relative to `root`, always `/`-separated.
fn entry_name(root: &Path, path: &Path) -> Result<String> {
    let rel = path
        .strip_prefix(root)
        .with_context(|| format!("{path:?} is not below {root:?}"))?;
    let parts: Vec<_> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Ok(parts.join("/"))
}

#[async_recursion]
async fn collect(
    root: &Path,
    dir: &Path,
    allow_list: Option<&AllowList>,
    out: &mut Vec<Entry>,
) -> Result<()> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .with_context(|| format!("cannot open directory {dir:?} for reading"))?;
    while let Some(entry) = entries
        .next_entry()
        .await
        .with_context(|| format!("failed traversing directory {:?}", &dir))?
    {
        let path = entry.path();
        let mut metadata = tokio::fs::symlink_metadata(&path)
            .await
            .with_context(|| format!("failed reading metadata from {:?}", &path))?;
        if metadata.is_dir() {
            collect(root, &path, allow_list, out).await?;
            continue;
        }
        if metadata.is_symlink() {
            // file symlinks are archived by content, directory symlinks are not descended into
            match tokio::fs::metadata(&path).await {
                Ok(target) if target.is_file() => metadata = target,
                _ => {
                    tracing::debug!("skipping symlink {:?}", &path);
                    continue;
                }
            }
        }
        if !metadata.is_file() {
            tracing::debug!("skipping special file {:?}", &path);
            continue;
        }
        if !extensions::qualifies(allow_list, &path) {
            tracing::trace!("skipping {:?}, suffix not allowed", &path);
            continue;
        }
        let name = entry_name(root, &path)?;
        out.push(Entry {
            path,
            name,
            size: metadata.len(),
        });
    }
    Ok(())
}

fn write_zip(dst_zip: &Path, entries: &[Entry]) -> Result<()> {
    let file = std::fs::File::create(dst_zip)
        .with_context(|| format!("failed to create zip {:?}", dst_zip))?;
    let mut zip = zip::ZipWriter::new(std::io::BufWriter::new(file));
    for entry in entries {
        let options = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated)
            .last_modified_time(zip::DateTime::default())
            .large_file(entry.size >= u64::from(u32::MAX));
        let mut source = std::fs::File::open(&entry.path)
            .with_context(|| format!("failed to open {:?} for archiving", &entry.path))?;
        zip.start_file(entry.name.as_str(), options)
            .with_context(|| format!("failed to add {} to {:?}", &entry.name, dst_zip))?;
        std::io::copy(&mut source, &mut zip)
            .with_context(|| format!("failed to write {} to {:?}", &entry.name, dst_zip))?;
    }
    let mut writer = zip
        .finish()
        .with_context(|| format!("failed to finalize zip {:?}", dst_zip))?;
    writer
        .flush()
        .with_context(|| format!("failed to flush zip {:?}", dst_zip))?;
    Ok(())
}

/// Archive `src_dir` into `<dst_dir>/<name of src_dir>.zip`.
///
/// Walks `src_dir` recursively and includes every regular file that qualifies under
/// `allow_list` (all files when it is `None` or empty). Entry names are relative to `src_dir`
/// and use `/` separators; entries are added in sorted order and carry no timestamps, so
/// identical content always produces an identical archive. When `prune_empty` is set and no
/// file qualifies, nothing is written and the result carries no archive path. Otherwise an
/// archive is always written, even with zero entries.
#[instrument(skip(allow_list))]
pub async fn zip_directory(
    src_dir: &Path,
    dst_dir: &Path,
    allow_list: Option<&AllowList>,
    prune_empty: bool,
) -> Result<ArchiveResult> {
    let dir_name = src_dir
        .file_name()
        .ok_or_else(|| anyhow!("source {:?} does not have a basename", src_dir))?;
    let mut archive_name = dir_name.to_owned();
    archive_name.push(".zip");
    let dst_zip = dst_dir.join(archive_name);
    let mut entries = vec![];
    collect(src_dir, src_dir, allow_list, &mut entries).await?;
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    let files = entries.len();
    let bytes = entries.iter().map(|entry| entry.size).sum();
    if prune_empty && entries.is_empty() {
        tracing::debug!("no qualifying files in {:?}, not creating {:?}", src_dir, dst_zip);
        return Ok(ArchiveResult {
            source: src_dir.to_owned(),
            archive: None,
            files: 0,
            bytes: 0,
        });
    }
    tracing::debug!("writing {} files into {:?}", files, &dst_zip);
    let zip_path = dst_zip.clone();
    tokio::task::spawn_blocking(move || write_zip(&zip_path, &entries))
        .await
        .context("zip writer task failed")??;
    Ok(ArchiveResult {
        source: src_dir.to_owned(),
        archive: Some(dst_zip),
        files,
        bytes,
    })
}
