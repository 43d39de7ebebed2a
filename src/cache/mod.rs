//! Static page cache.
//!
//! Sits between the router and a page handler:
//!
//! - **Hit**: the stored `.html` (or its `.br`/`.gz` sibling) is served from
//!   disk and the handler never runs; `If-None-Match` yields `304`.
//! - **Miss**: the handler renders, the body is captured, minified, written
//!   under the output root, and sent on with the same caching headers a hit
//!   would carry.
//! - **Bypass**: development mode or `?__test__` serves live without touching
//!   storage; `?__update__` skips the read and rewrites the stored page.
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! output_dir = "/var/lib/pagefreeze/html"
//! expire_minutes = 3
//! gzip = true
//! brotli = true
//! # ... see config.rs for all options
//! ```

pub mod capture;
pub mod codec;
pub(crate) mod config;
mod flight;
pub mod keys;
mod middleware;
pub mod minify;
pub mod mode;
pub mod store;

pub use capture::{BufferedCapture, CaptureMode, ChunkedCapture, ResponseCapture};
pub use codec::{CompressionEffort, Encoding};
pub use config::{CacheConfig, default_output_dir};
pub use flight::{MissGuard, MissLocks};
pub use keys::{ArtifactPath, KeyError, KeyPolicy};
pub use middleware::{CacheDecision, CacheState, static_page_layer};
pub use minify::{CommentStripper, Identity, Minifier, MinifyMode};
pub use mode::RequestMode;
pub use store::{AcceptedEncodings, Artifact, ArtifactStore, StoreError, Validator};
