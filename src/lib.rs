//! pagefreeze: a static page cache for axum.
//!
//! Pages rendered by a handler are written to disk on first request, along
//! with precompressed siblings, and later requests are answered from those
//! files without running the handler. See [`cache`] for the interceptor.

pub mod application;
pub mod cache;
pub mod config;
pub mod infra;
pub mod presentation;
