//! Static page interceptor.
//!
//! Serves stored pages for GET/HEAD requests, answers conditional requests
//! with `304`, and persists freshly rendered `200` responses for later hits.

use std::{sync::Arc, time::Instant};

use axum::{
    body::Body,
    extract::State,
    http::{
        HeaderMap, HeaderValue, Method, Request, StatusCode,
        header::{
            ACCEPT_ENCODING, CACHE_CONTROL, CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE, DATE,
            ETAG, EXPIRES, IF_NONE_MATCH, SET_COOKIE, VARY,
        },
    },
    middleware::Next,
    response::{IntoResponse, Response},
};
use metrics::{counter, histogram};
use time::{OffsetDateTime, macros::format_description};
use tracing::{debug, error, instrument, warn};

use crate::application::error::ErrorReport;

use super::{
    CacheConfig,
    capture::{Captured, ResponseCapture},
    flight::MissLocks,
    keys::{self, ArtifactPath},
    minify::Minifier,
    mode::classify,
    store::{AcceptedEncodings, ArtifactStore, CompressionFlags, SelectedVariant, Validator},
};

const SOURCE: &str = "cache::middleware";
const HTML_CONTENT_TYPE: &str = "text/html; charset=utf-8";

pub(crate) const METRIC_HIT: &str = "pagefreeze_cache_hit_total";
pub(crate) const METRIC_MISS: &str = "pagefreeze_cache_miss_total";
pub(crate) const METRIC_NOT_MODIFIED: &str = "pagefreeze_cache_not_modified_total";
pub(crate) const METRIC_BYPASS: &str = "pagefreeze_cache_bypass_total";
pub(crate) const METRIC_WRITE: &str = "pagefreeze_cache_write_total";
pub(crate) const METRIC_WRITE_ERROR: &str = "pagefreeze_cache_write_error_total";
pub(crate) const METRIC_WRITE_MS: &str = "pagefreeze_cache_write_ms";

/// What the interceptor decided for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheDecision {
    Bypass,
    Hit,
    NotModified,
    Miss,
}

impl CacheDecision {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Bypass => "bypass",
            Self::Hit => "hit",
            Self::NotModified => "not_modified",
            Self::Miss => "miss",
        }
    }

    fn metric(self) -> &'static str {
        match self {
            Self::Bypass => METRIC_BYPASS,
            Self::Hit => METRIC_HIT,
            Self::NotModified => METRIC_NOT_MODIFIED,
            Self::Miss => METRIC_MISS,
        }
    }

    fn record(self) {
        counter!(self.metric()).increment(1);
        debug!(cache = "static", outcome = self.as_str(), "cache decision");
    }
}

/// Shared state for the interceptor.
#[derive(Clone)]
pub struct CacheState {
    pub config: Arc<CacheConfig>,
    pub store: Arc<ArtifactStore>,
    pub capture: Arc<dyn ResponseCapture>,
    pub minifier: Arc<dyn Minifier>,
    pub locks: Option<MissLocks>,
}

impl CacheState {
    /// Build state from configuration, using the configured minifier and
    /// capture strategy.
    pub fn new(config: CacheConfig) -> Self {
        let store = Arc::new(ArtifactStore::new(config.output_dir.clone()));
        let capture = config.capture.build();
        let minifier = config.minify.build();
        let locks = config.serialize_misses.then(MissLocks::new);
        Self {
            config: Arc::new(config),
            store,
            capture,
            minifier,
            locks,
        }
    }

    /// Replace the minifier, e.g. with an external HTML minification engine.
    pub fn with_minifier(mut self, minifier: Arc<dyn Minifier>) -> Self {
        self.minifier = minifier;
        self
    }

    fn compression_flags(&self) -> CompressionFlags {
        CompressionFlags {
            gzip: self.config.gzip,
            brotli: self.config.brotli,
            effort: self.config.compression_effort,
        }
    }

    /// Answer from storage if the page is there.
    async fn serve_stored(&self, path: &ArtifactPath, headers: &HeaderMap) -> Option<Response> {
        let artifact = match self.store.try_read(path).await {
            Ok(Some(artifact)) => artifact,
            Ok(None) => return None,
            Err(err) => {
                warn!(
                    cache = "static",
                    error = %err,
                    source_chain = ?error_chain(&err),
                    "failed to read stored page, rendering live"
                );
                return None;
            }
        };

        if let Some(value) = header_str(headers, IF_NONE_MATCH) {
            if artifact.validator.matches_if_none_match(value) {
                CacheDecision::NotModified.record();
                return Some(not_modified(&artifact.validator));
            }
        }

        let accepted = AcceptedEncodings::parse(header_str(headers, ACCEPT_ENCODING));
        let selected = match self
            .store
            .select_variant(&artifact, accepted, self.compression_flags())
            .await
        {
            Ok(selected) => selected,
            Err(err) => {
                warn!(
                    cache = "static",
                    error = %err,
                    "failed to read compressed variant, serving primary"
                );
                SelectedVariant {
                    body: artifact.body.clone(),
                    encoding: None,
                }
            }
        };

        CacheDecision::Hit.record();
        let mut response = Response::new(Body::from(selected.body));
        let headers = response.headers_mut();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(HTML_CONTENT_TYPE));
        if let Some(encoding) = selected.encoding {
            headers.insert(CONTENT_ENCODING, HeaderValue::from_static(encoding.label()));
        }
        self.apply_freshness(headers, &artifact.validator);
        Some(response)
    }

    /// Capture a rendered response, store it, and attach caching headers.
    ///
    /// The client always receives the page, whether or not storing succeeds.
    async fn persist(&self, path: &ArtifactPath, response: Response) -> Response {
        let (mut parts, body) = response.into_parts();
        let captured = match self
            .capture
            .capture(body, self.config.max_capture_bytes)
            .await
        {
            Ok(Captured::Complete(captured)) => captured,
            Ok(Captured::Overflow { body }) => {
                debug!(
                    cache = "static",
                    limit = self.config.max_capture_bytes,
                    "response exceeds capture limit, not storing"
                );
                return Response::from_parts(parts, body);
            }
            Err(err) => {
                error!(cache = "static", error = %err, "failed to read rendered response");
                let mut response = StatusCode::INTERNAL_SERVER_ERROR.into_response();
                ErrorReport::from_error(SOURCE, StatusCode::INTERNAL_SERVER_ERROR, &err)
                    .attach(&mut response);
                return response;
            }
        };

        let Ok(html) = std::str::from_utf8(&captured.bytes) else {
            debug!(cache = "static", "response is not UTF-8 text, not storing");
            return Response::from_parts(parts, captured.replay);
        };

        let started = Instant::now();
        let persisted = match self
            .store
            .write(path, html, self.minifier.as_ref(), self.compression_flags())
            .await
        {
            Ok(persisted) => persisted,
            Err(err) => {
                counter!(METRIC_WRITE_ERROR).increment(1);
                error!(
                    cache = "static",
                    error = %err,
                    source_chain = ?error_chain(&err),
                    path = %path.primary().display(),
                    "failed to store rendered page, delivering uncached"
                );
                return Response::from_parts(parts, captured.replay);
            }
        };
        histogram!(METRIC_WRITE_MS).record(started.elapsed().as_secs_f64() * 1000.0);
        counter!(METRIC_WRITE).increment(1);
        debug!(
            cache = "static",
            path = %path.primary().display(),
            variants = persisted.variants.len(),
            "stored rendered page"
        );

        // The client gets exactly what later hits will get.
        let body = if persisted.body == captured.bytes {
            captured.replay
        } else {
            parts.headers.remove(CONTENT_LENGTH);
            Body::from(persisted.body)
        };
        self.apply_freshness(&mut parts.headers, &persisted.validator);
        Response::from_parts(parts, body)
    }

    /// `Cache-Control`, `ETag`, `Date`, `Expires`, and `Vary` when variants
    /// exist. Identical on hits and fresh renders.
    fn apply_freshness(&self, headers: &mut HeaderMap, validator: &Validator) {
        let max_age = format!("max-age={}", self.config.max_age_seconds());
        if let Ok(value) = HeaderValue::from_str(&max_age) {
            headers.insert(CACHE_CONTROL, value);
        }
        if let Ok(value) = HeaderValue::from_str(&validator.to_etag()) {
            headers.insert(ETAG, value);
        }

        let now = OffsetDateTime::now_utc();
        if let Some(value) = http_date(now) {
            headers.insert(DATE, value);
        }
        let lifetime = time::Duration::minutes(i64::from(self.config.expire_minutes));
        if let Some(value) = now.checked_add(lifetime).and_then(http_date) {
            headers.insert(EXPIRES, value);
        }

        if self.config.compression_enabled() {
            headers.insert(VARY, HeaderValue::from_static("accept-encoding"));
        }
    }
}

/// Middleware for static page caching.
///
/// Apply with `axum::middleware::from_fn_with_state` around page routes.
#[instrument(skip_all, fields(path = %request.uri().path()))]
pub async fn static_page_layer(
    State(cache): State<CacheState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let method = request.method().clone();
    if method != Method::GET && method != Method::HEAD {
        return next.run(request).await;
    }

    let query = request.uri().query();
    let mode = classify(&cache.config, query);
    if mode.bypass_all {
        CacheDecision::Bypass.record();
        return next.run(request).await;
    }

    let artifact_path = match keys::resolve(
        cache.store.root(),
        request.uri().path(),
        query,
        cache.config.key_policy(),
    ) {
        Ok(path) => path,
        Err(err) => {
            warn!(cache = "static", error = %err, "request path cannot be cached, serving live");
            return next.run(request).await;
        }
    };

    if !mode.force_refresh {
        if let Some(response) = cache.serve_stored(&artifact_path, request.headers()).await {
            return response;
        }
    }

    let guard = match &cache.locks {
        Some(locks) => Some(locks.acquire(artifact_path.primary().to_path_buf()).await),
        None => None,
    };
    if guard.is_some() && !mode.force_refresh {
        // Another request may have stored the page while this one waited.
        if let Some(response) = cache.serve_stored(&artifact_path, request.headers()).await {
            return response;
        }
    }

    CacheDecision::Miss.record();
    let response = next.run(request).await;

    // HEAD responses carry no body to store.
    if method != Method::GET || !should_store_response(&response) {
        return response;
    }

    let response = cache.persist(&artifact_path, response).await;
    drop(guard);
    response
}

/// Only plain, complete `200` pages are stored.
fn should_store_response(response: &Response) -> bool {
    if response.status() != StatusCode::OK {
        return false;
    }

    let headers = response.headers();
    if headers.contains_key(SET_COOKIE) || headers.contains_key(CONTENT_ENCODING) {
        return false;
    }

    !header_str(headers, CONTENT_TYPE).is_some_and(|value| value.starts_with("text/event-stream"))
}

fn not_modified(validator: &Validator) -> Response {
    let mut response = StatusCode::NOT_MODIFIED.into_response();
    if let Ok(value) = HeaderValue::from_str(&validator.to_etag()) {
        response.headers_mut().insert(ETAG, value);
    }
    response
}

fn header_str(headers: &HeaderMap, name: axum::http::HeaderName) -> Option<&str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

/// IMF-fixdate, e.g. `Sun, 06 Nov 1994 08:49:37 GMT`.
fn http_date(at: OffsetDateTime) -> Option<HeaderValue> {
    let formatted = at
        .format(format_description!(
            "[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second] GMT"
        ))
        .ok()?;
    HeaderValue::from_str(&formatted).ok()
}

fn error_chain(error: &dyn std::error::Error) -> Vec<String> {
    let mut chain = Vec::new();
    let mut current = error.source();
    while let Some(inner) = current {
        chain.push(inner.to_string());
        current = inner.source();
    }
    chain
}
