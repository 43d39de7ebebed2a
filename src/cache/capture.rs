//! Response body capture.
//!
//! The interceptor needs the rendered bytes to persist them, and the client
//! still needs every byte the handler produced. Two strategies implement
//! [`ResponseCapture`]:
//!
//! - [`BufferedCapture`] copies frames into one contiguous buffer and sends
//!   that buffer on.
//! - [`ChunkedCapture`] keeps the handler's reference-counted chunks, joins
//!   them only for persistence, and replays the original chunks to the client.
//!
//! Both stop collecting once `limit` is exceeded and hand back a body that
//! replays what was read followed by the untouched remainder of the stream.

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use bytes::{Bytes, BytesMut};
use futures::{StreamExt, stream};
use http_body_util::BodyExt;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("response body stream failed")]
    Body(#[source] axum::Error),
}

/// Outcome of capturing a response body.
pub enum Captured {
    /// The whole body fit under the limit.
    Complete(CapturedBody),
    /// The body exceeded the limit; `body` still yields every byte.
    Overflow { body: Body },
}

/// A fully captured body.
pub struct CapturedBody {
    /// Contiguous bytes for persistence.
    pub bytes: Bytes,
    /// Body that reproduces the original response for the client.
    pub replay: Body,
}

/// Strategy for reading a handler's response body while keeping it deliverable.
#[async_trait]
pub trait ResponseCapture: Send + Sync {
    async fn capture(&self, body: Body, limit: usize) -> Result<Captured, CaptureError>;
}

/// Capture strategies selectable from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum CaptureMode {
    #[default]
    Buffered,
    Chunked,
}

impl CaptureMode {
    pub fn build(self) -> Arc<dyn ResponseCapture> {
        match self {
            Self::Buffered => Arc::new(BufferedCapture),
            Self::Chunked => Arc::new(ChunkedCapture),
        }
    }
}

/// Substitutes a single growable buffer for the response stream.
#[derive(Debug, Clone, Copy, Default)]
pub struct BufferedCapture;

#[async_trait]
impl ResponseCapture for BufferedCapture {
    async fn capture(&self, mut body: Body, limit: usize) -> Result<Captured, CaptureError> {
        let mut buffer = BytesMut::new();
        while let Some(frame) = body.frame().await {
            let frame = frame.map_err(CaptureError::Body)?;
            let Ok(data) = frame.into_data() else {
                // Trailers carry nothing worth storing.
                continue;
            };
            if buffer.len() + data.len() > limit {
                let read = buffer.freeze();
                return Ok(Captured::Overflow {
                    body: resume(vec![read, data], body),
                });
            }
            buffer.extend_from_slice(&data);
        }

        let bytes = buffer.freeze();
        Ok(Captured::Complete(CapturedBody {
            replay: Body::from(bytes.clone()),
            bytes,
        }))
    }
}

/// Keeps the handler's chunks as-is and replays them with original boundaries.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChunkedCapture;

#[async_trait]
impl ResponseCapture for ChunkedCapture {
    async fn capture(&self, mut body: Body, limit: usize) -> Result<Captured, CaptureError> {
        let mut chunks: Vec<Bytes> = Vec::new();
        let mut total = 0usize;
        while let Some(frame) = body.frame().await {
            let frame = frame.map_err(CaptureError::Body)?;
            let Ok(data) = frame.into_data() else {
                continue;
            };
            total += data.len();
            chunks.push(data);
            if total > limit {
                return Ok(Captured::Overflow {
                    body: resume(chunks, body),
                });
            }
        }

        let bytes = match chunks.as_slice() {
            [] => Bytes::new(),
            [single] => single.clone(),
            many => {
                let mut joined = BytesMut::with_capacity(total);
                for chunk in many {
                    joined.extend_from_slice(chunk);
                }
                joined.freeze()
            }
        };

        let replay = Body::from_stream(stream::iter(chunks.into_iter().map(Ok::<_, axum::Error>)));
        Ok(Captured::Complete(CapturedBody { bytes, replay }))
    }
}

/// Chain already-read chunks in front of the unread remainder of `rest`.
fn resume(read: Vec<Bytes>, rest: Body) -> Body {
    let head = stream::iter(
        read.into_iter()
            .filter(|chunk| !chunk.is_empty())
            .map(Ok::<_, axum::Error>),
    );
    Body::from_stream(head.chain(rest.into_data_stream()))
}
