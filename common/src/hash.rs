//! Streaming file digests
//!
//! Files are read in [`CHUNK_SIZE`] chunks so memory use stays bounded regardless of file size.
//! Algorithm names follow the spelling used in the manifest (`sha3_256`, `blake2b`, ...).

use std::path::{Path, PathBuf};
use tokio::io::AsyncReadExt;
use tracing::instrument;

pub const CHUNK_SIZE: usize = 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("unsupported hash algorithm: {0:?} (supported: {supported})", supported = HashAlgorithm::names().join(", "))]
    UnsupportedAlgorithm(String),
    #[error("file to hash {0:?} does not exist")]
    NotFound(PathBuf),
    #[error("failed reading {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Digest algorithms available on every platform
#[derive(
    Copy,
    Clone,
    Debug,
    Default,
    PartialEq,
    Eq,
    Hash,
    clap::ValueEnum,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    strum::IntoStaticStr,
)]
pub enum HashAlgorithm {
    #[value(name = "md5")]
    #[strum(serialize = "md5")]
    Md5,
    #[value(name = "sha1")]
    #[strum(serialize = "sha1")]
    Sha1,
    #[value(name = "sha224")]
    #[strum(serialize = "sha224")]
    Sha224,
    #[value(name = "sha256")]
    #[strum(serialize = "sha256")]
    Sha256,
    #[value(name = "sha384")]
    #[strum(serialize = "sha384")]
    Sha384,
    #[value(name = "sha512")]
    #[strum(serialize = "sha512")]
    Sha512,
    #[value(name = "sha3_224")]
    #[strum(serialize = "sha3_224")]
    Sha3_224,
    #[default]
    #[value(name = "sha3_256")]
    #[strum(serialize = "sha3_256")]
    Sha3_256,
    #[value(name = "sha3_384")]
    #[strum(serialize = "sha3_384")]
    Sha3_384,
    #[value(name = "sha3_512")]
    #[strum(serialize = "sha3_512")]
    Sha3_512,
    #[value(name = "blake2b")]
    #[strum(serialize = "blake2b")]
    Blake2b,
    #[value(name = "blake2s")]
    #[strum(serialize = "blake2s")]
    Blake2s,
}

impl HashAlgorithm {
    #[must_use]
    pub fn names() -> Vec<&'static str> {
        use strum::IntoEnumIterator;
        Self::iter().map(<&'static str>::from).collect()
    }

    /// Fresh hasher for this algorithm.
    #[must_use]
    pub fn hasher(self) -> Box<dyn digest::DynDigest + Send> {
        use digest::Digest;
        match self {
            Self::Md5 => Box::new(md5::Md5::new()),
            Self::Sha1 => Box::new(sha1::Sha1::new()),
            Self::Sha224 => Box::new(sha2::Sha224::new()),
            Self::Sha256 => Box::new(sha2::Sha256::new()),
            Self::Sha384 => Box::new(sha2::Sha384::new()),
            Self::Sha512 => Box::new(sha2::Sha512::new()),
            Self::Sha3_224 => Box::new(sha3::Sha3_224::new()),
            Self::Sha3_256 => Box::new(sha3::Sha3_256::new()),
            Self::Sha3_384 => Box::new(sha3::Sha3_384::new()),
            Self::Sha3_512 => Box::new(sha3::Sha3_512::new()),
            Self::Blake2b => Box::new(blake2::Blake2b512::new()),
            Self::Blake2s => Box::new(blake2::Blake2s256::new()),
        }
    }

    /// Parse an algorithm name, failing with [`Error::UnsupportedAlgorithm`].
    pub fn from_name(name: &str) -> Result<Self, Error> {
        name.parse()
            .map_err(|_| Error::UnsupportedAlgorithm(name.to_owned()))
    }
}

/// Hex digest of the file at `path` computed with `algorithm`.
#[instrument]
pub async fn hash_file_with(path: &Path, algorithm: HashAlgorithm) -> Result<String, Error> {
    let mut file = match tokio::fs::File::open(path).await {
        Ok(file) => file,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
            return Err(Error::NotFound(path.to_owned()));
        }
        Err(source) => {
            return Err(Error::Io {
                path: path.to_owned(),
                source,
            });
        }
    };
    let mut hasher = algorithm.hasher();
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = file.read(&mut buf).await.map_err(|source| Error::Io {
            path: path.to_owned(),
            source,
        })?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Hex digest of the file at `path` computed with the algorithm called `algorithm`.
///
/// The name is checked before the file is touched, so an unknown algorithm is reported even
/// for a missing file.
pub async fn hash_file(path: &Path, algorithm: &str) -> Result<String, Error> {
    let algorithm = HashAlgorithm::from_name(algorithm)?;
    hash_file_with(path, algorithm).await
}
