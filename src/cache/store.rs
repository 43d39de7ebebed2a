//! On-disk artifact storage.
//!
//! Owns every file under the output root: the primary `.html` page, its
//! compressed siblings, and the validators derived from file metadata.

use std::{
    fmt,
    io::ErrorKind,
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};

use bytes::Bytes;
use thiserror::Error;
use tokio::fs;

use super::{
    codec::{self, CompressionEffort, Encoded, Encoding},
    keys::ArtifactPath,
    minify::Minifier,
};

type Encoder = fn(&[u8], Encoding, CompressionEffort) -> Encoded;

/// Ticks (100 ns) between 0001-01-01 and the Unix epoch.
const UNIX_EPOCH_TICKS: u128 = 621_355_968_000_000_000;
const NANOS_PER_TICK: u128 = 100;

/// Storage failures. A missing file is never one of these.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to create directory `{path}`")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write `{path}`")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to read `{path}`")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to remove `{path}`")]
    Remove {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Entity tag derived from an artifact's modification time.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Validator(String);

impl Validator {
    /// Validator for a modification timestamp, in .NET-style ticks.
    pub fn from_modified(modified: SystemTime) -> Self {
        let ticks = match modified.duration_since(UNIX_EPOCH) {
            Ok(after) => UNIX_EPOCH_TICKS + after.as_nanos() / NANOS_PER_TICK,
            Err(err) => {
                UNIX_EPOCH_TICKS.saturating_sub(err.duration().as_nanos() / NANOS_PER_TICK)
            }
        };
        Self(ticks.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Strong entity tag form, e.g. `"638412345678901234"`.
    pub fn to_etag(&self) -> String {
        format!("\"{}\"", self.0)
    }

    /// Whether an `If-None-Match` header value names this validator.
    ///
    /// Accepts `*`, comma-separated lists, weak tags, and bare unquoted tokens.
    pub fn matches_if_none_match(&self, header: &str) -> bool {
        header.split(',').map(str::trim).any(|candidate| {
            if candidate == "*" {
                return true;
            }
            let candidate = candidate.strip_prefix("W/").unwrap_or(candidate);
            let candidate = candidate
                .strip_prefix('"')
                .and_then(|inner| inner.strip_suffix('"'))
                .unwrap_or(candidate);
            candidate == self.0
        })
    }
}

impl fmt::Display for Validator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A stored page found on disk.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub path: ArtifactPath,
    pub body: Bytes,
    pub modified: SystemTime,
    pub validator: Validator,
}

/// Result of a successful write.
#[derive(Debug, Clone)]
pub struct PersistedArtifact {
    /// The bytes written to the primary file, after minification.
    pub body: Bytes,
    pub validator: Validator,
    pub variants: Vec<Encoding>,
}

/// Body chosen for a client after content negotiation.
#[derive(Debug, Clone)]
pub struct SelectedVariant {
    pub body: Bytes,
    pub encoding: Option<Encoding>,
}

/// Which variants to produce on write.
#[derive(Debug, Clone, Copy, Default)]
pub struct CompressionFlags {
    pub gzip: bool,
    pub brotli: bool,
    pub effort: CompressionEffort,
}

impl CompressionFlags {
    fn allows(self, encoding: Encoding) -> bool {
        match encoding {
            Encoding::Gzip => self.gzip,
            Encoding::Brotli => self.brotli,
        }
    }
}

/// Codings a client accepts, parsed from `Accept-Encoding`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AcceptedEncodings {
    pub gzip: bool,
    pub brotli: bool,
}

impl AcceptedEncodings {
    /// Parse an `Accept-Encoding` header. Tokens with `q=0` are refused.
    pub fn parse(header: Option<&str>) -> Self {
        let mut accepted = Self::default();
        let Some(header) = header else {
            return accepted;
        };

        for entry in header.split(',') {
            let mut parts = entry.split(';').map(str::trim);
            let coding = parts.next().unwrap_or_default().to_ascii_lowercase();
            let refused = parts.any(|param| {
                param
                    .strip_prefix("q=")
                    .and_then(|q| q.parse::<f32>().ok())
                    .is_some_and(|q| q <= 0.0)
            });
            if refused {
                continue;
            }
            match coding.as_str() {
                "gzip" | "x-gzip" => accepted.gzip = true,
                "br" => accepted.brotli = true,
                "*" => {
                    accepted.gzip = true;
                    accepted.brotli = true;
                }
                _ => {}
            }
        }
        accepted
    }

    fn accepts(self, encoding: Encoding) -> bool {
        match encoding {
            Encoding::Gzip => self.gzip,
            Encoding::Brotli => self.brotli,
        }
    }
}

/// Filesystem-backed artifact storage.
#[derive(Debug)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Read the primary page. A missing file is `Ok(None)`.
    pub async fn try_read(&self, path: &ArtifactPath) -> Result<Option<Artifact>, StoreError> {
        let primary = path.primary();
        let metadata = match fs::metadata(primary).await {
            Ok(metadata) if metadata.is_file() => metadata,
            Ok(_) => return Ok(None),
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(read_error(primary, source)),
        };
        let modified = metadata
            .modified()
            .map_err(|source| read_error(primary, source))?;

        let body = match fs::read(primary).await {
            Ok(body) => Bytes::from(body),
            // Removed between the stat and the read.
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(read_error(primary, source)),
        };

        Ok(Some(Artifact {
            path: path.clone(),
            body,
            modified,
            validator: Validator::from_modified(modified),
        }))
    }

    /// Pick the body to send: brotli, then gzip, then the primary bytes.
    ///
    /// A variant qualifies only if the client accepts it, it is enabled, and
    /// its sibling file exists.
    pub async fn select_variant(
        &self,
        artifact: &Artifact,
        accepted: AcceptedEncodings,
        enabled: CompressionFlags,
    ) -> Result<SelectedVariant, StoreError> {
        for encoding in [Encoding::Brotli, Encoding::Gzip] {
            if !(accepted.accepts(encoding) && enabled.allows(encoding)) {
                continue;
            }
            let sibling = artifact.path.variant(encoding);
            match fs::read(&sibling).await {
                Ok(body) => {
                    return Ok(SelectedVariant {
                        body: Bytes::from(body),
                        encoding: Some(encoding),
                    });
                }
                Err(err) if err.kind() == ErrorKind::NotFound => continue,
                Err(source) => return Err(read_error(&sibling, source)),
            }
        }

        Ok(SelectedVariant {
            body: artifact.body.clone(),
            encoding: None,
        })
    }

    /// Minify and persist a rendered page plus its enabled variants.
    ///
    /// A variant that is disabled or fails to encode is not written, and any
    /// sibling left by an earlier write is removed. Files are written one
    /// after another; a concurrent reader may observe a new primary next to an
    /// old variant.
    pub async fn write(
        &self,
        path: &ArtifactPath,
        html: &str,
        minifier: &dyn Minifier,
        compression: CompressionFlags,
    ) -> Result<PersistedArtifact, StoreError> {
        self.write_with(path, html, minifier, compression, codec::encode)
            .await
    }

    async fn write_with(
        &self,
        path: &ArtifactPath,
        html: &str,
        minifier: &dyn Minifier,
        compression: CompressionFlags,
        encoder: Encoder,
    ) -> Result<PersistedArtifact, StoreError> {
        let primary = path.primary();
        if let Some(parent) = primary.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|source| StoreError::CreateDir {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }

        let body = Bytes::from(minifier.minify(html));
        write_file(primary, &body).await?;

        let mut variants = Vec::new();
        for encoding in [Encoding::Gzip, Encoding::Brotli] {
            let sibling = path.variant(encoding);
            let encoded = compression
                .allows(encoding)
                .then(|| encoder(&body, encoding, compression.effort))
                .and_then(Encoded::compressed);
            match encoded {
                Some(encoded) => {
                    write_file(&sibling, &encoded).await?;
                    variants.push(encoding);
                }
                None => {
                    remove_file(&sibling).await?;
                }
            }
        }

        let validator = self.validator(path).await?;
        Ok(PersistedArtifact {
            body,
            validator,
            variants,
        })
    }

    /// Validator of the primary file as it is on disk now.
    pub async fn validator(&self, path: &ArtifactPath) -> Result<Validator, StoreError> {
        let primary = path.primary();
        let metadata = fs::metadata(primary)
            .await
            .map_err(|source| read_error(primary, source))?;
        let modified = metadata
            .modified()
            .map_err(|source| read_error(primary, source))?;
        Ok(Validator::from_modified(modified))
    }

    /// Delete the primary page and every sibling. Returns the number of files
    /// removed; missing files are skipped.
    pub async fn remove(&self, path: &ArtifactPath) -> Result<usize, StoreError> {
        let mut removed = 0;
        let files = [
            path.primary().to_path_buf(),
            path.variant(Encoding::Gzip),
            path.variant(Encoding::Brotli),
        ];
        for file in files {
            if remove_file(&file).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

/// Delete `path` if present. Returns whether a file was removed.
async fn remove_file(path: &Path) -> Result<bool, StoreError> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
        Err(source) => Err(StoreError::Remove {
            path: path.to_path_buf(),
            source,
        }),
    }
}

async fn write_file(path: &Path, contents: &[u8]) -> Result<(), StoreError> {
    fs::write(path, contents)
        .await
        .map_err(|source| StoreError::Write {
            path: path.to_path_buf(),
            source,
        })
}

fn read_error(path: &Path, source: std::io::Error) -> StoreError {
    StoreError::Read {
        path: path.to_path_buf(),
        source,
    }
}
