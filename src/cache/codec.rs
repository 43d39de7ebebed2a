//! Precomputed compression variants.
//!
//! Encoding is best effort: a failure hands back the input unchanged and the
//! caller stores no variant for that write.

use std::io::{Cursor, Write};

use brotli::enc::BrotliEncoderParams;
use bytes::Bytes;
use flate2::{Compression, write::GzEncoder};
use serde::Deserialize;
use tracing::warn;

const BROTLI_FASTEST_QUALITY: i32 = 1;
const BROTLI_BEST_QUALITY: i32 = 11;
const BROTLI_WINDOW: i32 = 22;

/// Content codings a stored page may be precompressed with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Encoding {
    Gzip,
    Brotli,
}

impl Encoding {
    /// Value for `Content-Encoding` and the `Accept-Encoding` token.
    pub fn label(self) -> &'static str {
        match self {
            Self::Gzip => "gzip",
            Self::Brotli => "br",
        }
    }

    /// Extension appended to the primary artifact file name.
    pub fn file_suffix(self) -> &'static str {
        match self {
            Self::Gzip => "gz",
            Self::Brotli => "br",
        }
    }
}

/// Compression effort trade-off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum CompressionEffort {
    Fastest,
    #[default]
    Best,
}

/// Outcome of [`encode`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Encoded {
    Compressed(Bytes),
    /// The encoder failed; holds the input bytes.
    Uncompressed(Bytes),
}

impl Encoded {
    /// The compressed stream, if encoding succeeded.
    pub fn compressed(self) -> Option<Bytes> {
        match self {
            Self::Compressed(bytes) => Some(bytes),
            Self::Uncompressed(_) => None,
        }
    }

    pub fn into_bytes(self) -> Bytes {
        match self {
            Self::Compressed(bytes) | Self::Uncompressed(bytes) => bytes,
        }
    }
}

/// Compress `data` with `encoding`, falling back to the input on failure.
///
/// Empty input still produces a complete stream so the variant decodes.
pub fn encode(data: &[u8], encoding: Encoding, effort: CompressionEffort) -> Encoded {
    let result = match encoding {
        Encoding::Gzip => gzip(data, effort),
        Encoding::Brotli => brotli(data, effort),
    };

    match result {
        Ok(encoded) => Encoded::Compressed(Bytes::from(encoded)),
        Err(err) => {
            warn!(
                encoding = encoding.label(),
                error = %err,
                "compression failed, keeping uncompressed bytes"
            );
            Encoded::Uncompressed(Bytes::copy_from_slice(data))
        }
    }
}

fn gzip(data: &[u8], effort: CompressionEffort) -> std::io::Result<Vec<u8>> {
    let level = match effort {
        CompressionEffort::Fastest => Compression::fast(),
        CompressionEffort::Best => Compression::best(),
    };
    let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 2), level);
    encoder.write_all(data)?;
    encoder.finish()
}

fn brotli(data: &[u8], effort: CompressionEffort) -> std::io::Result<Vec<u8>> {
    let params = BrotliEncoderParams {
        quality: match effort {
            CompressionEffort::Fastest => BROTLI_FASTEST_QUALITY,
            CompressionEffort::Best => BROTLI_BEST_QUALITY,
        },
        lgwin: BROTLI_WINDOW,
        ..Default::default()
    };
    let mut output = Vec::with_capacity(data.len() / 2);
    brotli::BrotliCompress(&mut Cursor::new(data), &mut output, &params)?;
    Ok(output)
}
