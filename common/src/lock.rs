//! Single-instance execution lock backed by a marker file
//!
//! Acquisition exclusively creates the marker (create-new semantics) and writes the holder's
//! process id into it. While another process holds the marker, acquisition polls every
//! [`LockConfig::poll_interval`] until [`LockConfig::max_wait`] is exhausted. A timeout almost
//! always means a crashed instance left a stale marker behind, so the binary turns it into an
//! immediate exit with [`LOCK_TIMEOUT_EXIT_CODE`] instead of retrying forever.
//!
//! # Example
//!
//! ```rust,no_run
//! use common::lock::{ExecutionLock, LockConfig};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = LockConfig::new(std::env::temp_dir().join("example.lock"));
//! let lock = ExecutionLock::acquire(&config).await?;
//! // ... exclusive work ...
//! drop(lock); // marker removed
//! # Ok(())
//! # }
//! ```

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tracing::instrument;

/// Process exit status used when the lock cannot be acquired in time.
pub const LOCK_TIMEOUT_EXIT_CODE: i32 = 3;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);
pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_LOCK_FILE_NAME: &str = "ziphash.lock";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(
        "could not acquire lock {path:?}: still held by another process after waiting {}",
        humantime::format_duration(*waited)
    )]
    Timeout { path: PathBuf, waited: Duration },
    #[error("failed to {action} lock file {path:?}: {source}")]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Where the marker lives and how long to wait for it
#[derive(Debug, Clone)]
pub struct LockConfig {
    pub path: PathBuf,
    pub poll_interval: Duration,
    pub max_wait: Duration,
}

impl LockConfig {
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_wait: DEFAULT_MAX_WAIT,
        }
    }

    /// Marker path shared by every instance on this host.
    #[must_use]
    pub fn default_path() -> PathBuf {
        std::env::temp_dir().join(DEFAULT_LOCK_FILE_NAME)
    }
}

impl Default for LockConfig {
    fn default() -> Self {
        Self::new(Self::default_path())
    }
}

/// Exclusive hold on a marker file, released when dropped
#[derive(Debug)]
pub struct ExecutionLock {
    path: PathBuf,
    file: Option<std::fs::File>,
}

impl ExecutionLock {
    async fn try_create(path: &Path) -> Result<Option<std::fs::File>, Error> {
        let mut file = match tokio::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)
            .await
        {
            Ok(file) => file,
            Err(error) if error.kind() == std::io::ErrorKind::AlreadyExists => return Ok(None),
            Err(source) => {
                return Err(Error::Io {
                    action: "create",
                    path: path.to_owned(),
                    source,
                });
            }
        };
        Self::stamp(path, &mut file).await?;
        Ok(Some(file.into_std().await))
    }

    /// Write our process id into the marker just created at `path`.
    ///
    /// On failure the marker is removed again, otherwise every later run would wait for a
    /// holder that never existed.
    async fn stamp<W>(path: &Path, marker: &mut W) -> Result<(), Error>
    where
        W: tokio::io::AsyncWrite + Unpin,
    {
        let written: std::io::Result<()> = async {
            marker
                .write_all(std::process::id().to_string().as_bytes())
                .await?;
            marker.flush().await
        }
        .await;
        if let Err(source) = written {
            if let Err(error) = tokio::fs::remove_file(path).await {
                tracing::error!("failed to remove unwritten lock {:?}: {}", path, error);
            }
            return Err(Error::Io {
                action: "write",
                path: path.to_owned(),
                source,
            });
        }
        Ok(())
    }

    /// Wait until the marker at `config.path` can be created exclusively.
    ///
    /// Fails with [`Error::Timeout`] once `config.max_wait` has elapsed and with [`Error::Io`]
    /// for any failure other than the marker already existing.
    #[instrument]
    pub async fn acquire(config: &LockConfig) -> Result<Self, Error> {
        let start = Instant::now();
        let mut announced = false;
        loop {
            if let Some(file) = Self::try_create(&config.path).await? {
                tracing::debug!("lock {:?} acquired", &config.path);
                return Ok(Self {
                    path: config.path.clone(),
                    file: Some(file),
                });
            }
            if !announced {
                tracing::warn!(
                    "process already executing (lock: {:?}), waiting...",
                    &config.path
                );
                announced = true;
            }
            let waited = start.elapsed();
            if waited >= config.max_wait {
                return Err(Error::Timeout {
                    path: config.path.clone(),
                    waited,
                });
            }
            tokio::time::sleep(config.poll_interval).await;
        }
    }

    /// Like [`ExecutionLock::acquire`], but a timeout terminates the process with
    /// [`LOCK_TIMEOUT_EXIT_CODE`].
    pub async fn acquire_or_exit(config: &LockConfig) -> Result<Self, Error> {
        match Self::acquire(config).await {
            Err(error @ Error::Timeout { .. }) => {
                tracing::error!("{}, giving up", &error);
                std::process::exit(LOCK_TIMEOUT_EXIT_CODE);
            }
            other => other,
        }
    }

    #[must_use]
    pub fn is_acquired(&self) -> bool {
        self.file.is_some()
    }

    /// Close the marker handle and delete the marker. Calling it again is a no-op.
    pub fn release(&mut self) -> Result<(), Error> {
        let Some(file) = self.file.take() else {
            return Ok(());
        };
        drop(file);
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                tracing::debug!("lock {:?} released", &self.path);
                Ok(())
            }
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(Error::Io {
                action: "remove",
                path: self.path.clone(),
                source,
            }),
        }
    }
}

impl Drop for ExecutionLock {
    fn drop(&mut self) {
        if let Err(error) = self.release() {
            tracing::error!("{}", &error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutils;
    use tracing_test::traced_test;

    struct BrokenWriter;

    impl tokio::io::AsyncWrite for BrokenWriter {
        fn poll_write(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
            _buf: &[u8],
        ) -> std::task::Poll<std::io::Result<usize>> {
            std::task::Poll::Ready(Err(std::io::Error::other("no space left on device")))
        }

        fn poll_flush(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::task::Poll::Ready(Ok(()))
        }

        fn poll_shutdown(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::task::Poll::Ready(Ok(()))
        }
    }

    fn quick(path: PathBuf, max_wait: Duration) -> LockConfig {
        LockConfig {
            path,
            poll_interval: Duration::from_millis(10),
            max_wait,
        }
    }

    #[tokio::test]
    #[traced_test]
    async fn acquire_writes_pid_and_release_removes_marker() -> anyhow::Result<()> {
        let tmp_dir = testutils::create_temp_dir().await?;
        let path = tmp_dir.join("proc.lock");
        let mut lock = ExecutionLock::acquire(&LockConfig::new(path.clone())).await?;
        assert!(lock.is_acquired());
        assert_eq!(
            tokio::fs::read_to_string(&path).await?,
            std::process::id().to_string()
        );
        lock.release()?;
        assert!(!lock.is_acquired());
        assert!(!path.exists());
        // a second release is harmless
        lock.release()?;
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn drop_releases() -> anyhow::Result<()> {
        let tmp_dir = testutils::create_temp_dir().await?;
        let path = tmp_dir.join("ctx.lock");
        {
            let _lock = ExecutionLock::acquire(&LockConfig::new(path.clone())).await?;
            assert!(path.exists());
        }
        assert!(!path.exists());
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn second_holder_times_out() -> anyhow::Result<()> {
        let tmp_dir = testutils::create_temp_dir().await?;
        let path = tmp_dir.join("timeout.lock");
        let first = ExecutionLock::acquire(&quick(path.clone(), Duration::ZERO)).await?;
        let start = Instant::now();
        match ExecutionLock::acquire(&quick(path.clone(), Duration::from_millis(100))).await {
            Err(Error::Timeout { path: reported, waited }) => {
                assert_eq!(reported, path);
                assert!(waited >= Duration::from_millis(100));
            }
            other => panic!("expected a timeout, got {other:?}"),
        }
        assert!(start.elapsed() >= Duration::from_millis(100));
        assert!(logs_contain("process already executing"));
        // the holder's marker is untouched by the failed attempt
        assert!(first.is_acquired());
        assert_eq!(
            tokio::fs::read_to_string(&path).await?,
            std::process::id().to_string()
        );
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn contended_acquire_succeeds_after_release() -> anyhow::Result<()> {
        let tmp_dir = testutils::create_temp_dir().await?;
        let path = tmp_dir.join("retry.lock");
        let mut first = ExecutionLock::acquire(&quick(path.clone(), Duration::ZERO)).await?;
        let releaser = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            first.release()
        });
        let second = ExecutionLock::acquire(&quick(path.clone(), Duration::from_secs(10))).await?;
        releaser.await??;
        assert!(second.is_acquired());
        assert!(path.exists());
        drop(second);
        assert!(!path.exists());
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn foreign_marker_is_never_removed() -> anyhow::Result<()> {
        let tmp_dir = testutils::create_temp_dir().await?;
        let path = tmp_dir.join("foreign.lock");
        tokio::fs::write(&path, "12345").await?;
        let result = ExecutionLock::acquire(&quick(path.clone(), Duration::ZERO)).await;
        assert!(matches!(result, Err(Error::Timeout { .. })));
        // nobody acquired anything, so the stale marker is still there for diagnosis
        assert_eq!(tokio::fs::read_to_string(&path).await?, "12345");
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn failed_pid_write_removes_marker() -> anyhow::Result<()> {
        let tmp_dir = testutils::create_temp_dir().await?;
        let path = tmp_dir.join("unwritten.lock");
        tokio::fs::write(&path, "").await?;
        let result = ExecutionLock::stamp(&path, &mut BrokenWriter).await;
        match result {
            Err(Error::Io { action, source, .. }) => {
                assert_eq!(action, "write");
                assert!(source.to_string().contains("no space left"));
            }
            other => panic!("expected a write error, got {other:?}"),
        }
        assert!(!path.exists());
        // the next run is not blocked by the leftover
        let lock = ExecutionLock::acquire(&quick(path.clone(), Duration::ZERO)).await?;
        assert!(lock.is_acquired());
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn missing_parent_is_an_io_error() -> anyhow::Result<()> {
        let tmp_dir = testutils::create_temp_dir().await?;
        let path = tmp_dir.join("no").join("such").join("dir.lock");
        let result = ExecutionLock::acquire(&quick(path, Duration::from_secs(10))).await;
        assert!(matches!(result, Err(Error::Io { action: "create", .. })));
        Ok(())
    }
}
