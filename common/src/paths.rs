use std::path::{Path, PathBuf};
use tracing::instrument;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("source directory {0:?} does not exist")]
    NotFound(PathBuf),
    #[error("{role} directory {path:?} is not a directory")]
    NotADirectory { role: &'static str, path: PathBuf },
    #[error("{role} directory {path:?} must not be the {other_role} directory {other:?} or lie inside it")]
    Overlap {
        role: &'static str,
        path: PathBuf,
        other_role: &'static str,
        other: PathBuf,
    },
    #[error("failed to {action} {path:?}: {source}")]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

async fn is_dir(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|md| md.is_dir())
        .unwrap_or(false)
}

async fn create_dir_all(path: &Path) -> Result<(), Error> {
    match tokio::fs::create_dir_all(path).await {
        Ok(()) => Ok(()),
        // an existing non-directory entry is reported by the type check below
        Err(error) if error.kind() == std::io::ErrorKind::AlreadyExists => Ok(()),
        Err(error) if tokio::fs::symlink_metadata(path).await.is_ok() => {
            tracing::debug!("not creating {:?}: {}", path, error);
            Ok(())
        }
        Err(source) => Err(Error::Io {
            action: "create directory",
            path: path.to_owned(),
            source,
        }),
    }
}

async fn canonical(path: &Path) -> Result<PathBuf, Error> {
    tokio::fs::canonicalize(path).await.map_err(|source| Error::Io {
        action: "resolve",
        path: path.to_owned(),
        source,
    })
}

/// `inner` must neither resolve to `outer` nor lie below it.
fn check_outside(
    role: &'static str,
    inner: (&Path, &Path),
    other_role: &'static str,
    outer: (&Path, &Path),
) -> Result<(), Error> {
    let (inner, inner_resolved) = inner;
    let (outer, outer_resolved) = outer;
    if inner_resolved.starts_with(outer_resolved) {
        return Err(Error::Overlap {
            role,
            path: inner.to_owned(),
            other_role,
            other: outer.to_owned(),
        });
    }
    Ok(())
}

/// Validate the run's root directories.
///
/// Fails with [`Error::NotFound`] when `src` does not exist. Creates `dst` and `cpy` (including
/// missing parents) when absent and only then checks that all of them are directories, so a
/// `dst` that exists as a regular file is reported as [`Error::NotADirectory`].
///
/// Copying a tree onto itself truncates every file it holds, so after symlinks are resolved
/// `dst` must lie outside `src`, and `cpy` outside both `src` and `dst`
/// ([`Error::Overlap`]).
#[instrument]
pub async fn check_paths(src: &Path, dst: &Path, cpy: Option<&Path>) -> Result<(), Error> {
    if tokio::fs::metadata(src).await.is_err() {
        return Err(Error::NotFound(src.to_owned()));
    }
    create_dir_all(dst).await?;
    if let Some(cpy) = cpy {
        create_dir_all(cpy).await?;
    }
    if !is_dir(src).await {
        return Err(Error::NotADirectory {
            role: "source",
            path: src.to_owned(),
        });
    }
    if !is_dir(dst).await {
        return Err(Error::NotADirectory {
            role: "destination",
            path: dst.to_owned(),
        });
    }
    if let Some(cpy) = cpy
        && !is_dir(cpy).await
    {
        return Err(Error::NotADirectory {
            role: "copy",
            path: cpy.to_owned(),
        });
    }
    let src_resolved = canonical(src).await?;
    let dst_resolved = canonical(dst).await?;
    check_outside(
        "destination",
        (dst, &dst_resolved),
        "source",
        (src, &src_resolved),
    )?;
    if let Some(cpy) = cpy {
        let cpy_resolved = canonical(cpy).await?;
        check_outside(
            "copy",
            (cpy, &cpy_resolved),
            "destination",
            (dst, &dst_resolved),
        )?;
        check_outside("copy", (cpy, &cpy_resolved), "source", (src, &src_resolved))?;
    }
    Ok(())
}

/// Create `path` (with parents) if needed and verify it is a directory.
#[instrument]
pub async fn ensure_dir(role: &'static str, path: &Path) -> Result<(), Error> {
    create_dir_all(path).await?;
    if !is_dir(path).await {
        return Err(Error::NotADirectory {
            role,
            path: path.to_owned(),
        });
    }
    Ok(())
}

/// Immediate subdirectories of `path`, sorted by name.
///
/// Symlinks pointing at directories count as subdirectories.
#[instrument]
pub async fn subdirectories(path: &Path) -> Result<Vec<PathBuf>, Error> {
    let io_err = |source| Error::Io {
        action: "list directory",
        path: path.to_owned(),
        source,
    };
    let mut entries = tokio::fs::read_dir(path).await.map_err(io_err)?;
    let mut dirs = vec![];
    while let Some(entry) = entries.next_entry().await.map_err(io_err)? {
        let entry_path = entry.path();
        if is_dir(&entry_path).await {
            dirs.push(entry_path);
        }
    }
    dirs.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(dirs)
}
