use std::{
    collections::HashMap,
    sync::{
        Arc, OnceLock,
        atomic::{AtomicUsize, Ordering},
    },
};

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header::IF_NONE_MATCH},
    middleware,
    routing::get,
};
use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};
use pagefreeze::cache::{CacheConfig, CacheState, static_page_layer};
use serial_test::serial;
use tower::ServiceExt;

fn snapshotter() -> &'static Snapshotter {
    static SNAPSHOTTER: OnceLock<Snapshotter> = OnceLock::new();
    SNAPSHOTTER.get_or_init(|| {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();
        recorder
            .install()
            .expect("debug metrics recorder should install in this test process");
        snapshotter
    })
}

/// Counter totals, and histogram samples recorded since the last snapshot,
/// keyed by metric name.
fn readings() -> HashMap<String, u64> {
    snapshotter()
        .snapshot()
        .into_vec()
        .into_iter()
        .map(|(composite_key, _, _, value)| {
            let reading = match value {
                DebugValue::Counter(total) => total,
                DebugValue::Histogram(samples) => samples.len() as u64,
                DebugValue::Gauge(_) => 0,
            };
            (composite_key.key().name().to_string(), reading)
        })
        .collect()
}

fn delta(before: &HashMap<String, u64>, after: &HashMap<String, u64>, name: &str) -> u64 {
    after.get(name).copied().unwrap_or(0) - before.get(name).copied().unwrap_or(0)
}

fn app(config: CacheConfig, calls: Arc<AtomicUsize>) -> Router {
    Router::new()
        .route(
            "/reports/",
            get(move || {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    "<p>report</p>"
                }
            }),
        )
        .layer(middleware::from_fn_with_state(
            CacheState::new(config),
            static_page_layer,
        ))
}

async fn send(app: &Router, request: Request<Body>) -> axum::response::Response {
    app.clone()
        .oneshot(request)
        .await
        .expect("router should respond")
}

#[tokio::test]
#[serial]
async fn interceptor_outcomes_emit_expected_metrics() {
    snapshotter();
    let before = readings();

    let dir = tempfile::tempdir().expect("tempdir");
    let calls = Arc::new(AtomicUsize::new(0));
    let app = app(
        CacheConfig {
            output_dir: dir.path().to_path_buf(),
            ..Default::default()
        },
        Arc::clone(&calls),
    );

    let miss = send(&app, Request::get("/reports/").body(Body::empty()).unwrap()).await;
    let etag = miss
        .headers()
        .get("etag")
        .expect("etag on stored page")
        .clone();
    let hit = send(&app, Request::get("/reports/").body(Body::empty()).unwrap()).await;
    assert_eq!(hit.status(), StatusCode::OK);
    let not_modified = send(
        &app,
        Request::get("/reports/")
            .header(IF_NONE_MATCH, etag)
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(not_modified.status(), StatusCode::NOT_MODIFIED);
    let bypass = send(
        &app,
        Request::get("/reports/?__test__")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(bypass.status(), StatusCode::OK);

    let after = readings();
    assert_eq!(delta(&before, &after, "pagefreeze_cache_miss_total"), 1);
    assert_eq!(delta(&before, &after, "pagefreeze_cache_hit_total"), 1);
    assert_eq!(
        delta(&before, &after, "pagefreeze_cache_not_modified_total"),
        1
    );
    assert_eq!(delta(&before, &after, "pagefreeze_cache_bypass_total"), 1);
    assert_eq!(delta(&before, &after, "pagefreeze_cache_write_total"), 1);
    assert_eq!(after.get("pagefreeze_cache_write_ms").copied(), Some(1));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
#[serial]
async fn failed_writes_are_counted() {
    snapshotter();
    let before = readings();

    let dir = tempfile::tempdir().expect("tempdir");
    let blocker = dir.path().join("occupied");
    std::fs::write(&blocker, "file").expect("write blocker");
    let calls = Arc::new(AtomicUsize::new(0));
    let app = app(
        CacheConfig {
            output_dir: blocker,
            ..Default::default()
        },
        Arc::clone(&calls),
    );

    let response = send(&app, Request::get("/reports/").body(Body::empty()).unwrap()).await;
    assert_eq!(response.status(), StatusCode::OK);

    let after = readings();
    assert_eq!(
        delta(&before, &after, "pagefreeze_cache_write_error_total"),
        1
    );
    assert_eq!(delta(&before, &after, "pagefreeze_cache_write_total"), 0);
}
