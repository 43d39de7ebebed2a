//! Per-request cache bypass classification.

use url::form_urlencoded;

use super::CacheConfig;

/// How the interceptor treats a single request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RequestMode {
    /// Never read or write the cache.
    pub bypass_all: bool,
    /// Skip the read, but render and overwrite the stored page.
    pub force_refresh: bool,
}

/// Classify a request from the process configuration and its query string.
///
/// Markers match on key presence; `?__test__` and `?__test__=1` are the same.
pub fn classify(config: &CacheConfig, query: Option<&str>) -> RequestMode {
    let mut test = false;
    let mut update = false;
    if let Some(query) = query {
        for (name, _) in form_urlencoded::parse(query.as_bytes()) {
            if name == config.test_marker.as_str() {
                test = true;
            } else if name == config.update_marker.as_str() {
                update = true;
            }
        }
    }

    RequestMode {
        bypass_all: config.development_mode || test,
        force_refresh: update,
    }
}
