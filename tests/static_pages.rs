use std::{
    io::Read,
    path::Path,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use axum::{
    Router,
    body::{Body, to_bytes},
    extract::State,
    http::{
        Method, Request, StatusCode,
        header::{
            ACCEPT_ENCODING, CACHE_CONTROL, CONTENT_ENCODING, ETAG, EXPIRES, IF_NONE_MATCH,
            SET_COOKIE, VARY,
        },
    },
    middleware,
    response::{Html, IntoResponse, Response},
    routing::get,
};
use pagefreeze::cache::{CacheConfig, CacheState, CaptureMode, MinifyMode, static_page_layer};
use tempfile::TempDir;
use tower::ServiceExt;

#[derive(Clone, Default)]
struct Renders(Arc<AtomicUsize>);

impl Renders {
    fn bump(&self) -> usize {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

struct Harness {
    dir: TempDir,
    renders: Renders,
    router: Router,
}

impl Harness {
    fn new(configure: impl FnOnce(&mut CacheConfig)) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = CacheConfig {
            output_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        configure(&mut config);
        Self::with_config(dir, config)
    }

    fn with_config(dir: TempDir, config: CacheConfig) -> Self {
        let renders = Renders::default();
        let router = Router::new()
            .route("/reports/", get(report_page).post(report_page))
            .route("/slow", get(slow_page))
            .route("/missing", get(missing_page))
            .route("/session", get(session_page))
            .route("/empty", get(empty_page))
            .fallback(report_page)
            .with_state(renders.clone())
            .layer(middleware::from_fn_with_state(
                CacheState::new(config),
                static_page_layer,
            ));
        Self {
            dir,
            renders,
            router,
        }
    }

    fn root(&self) -> &Path {
        self.dir.path()
    }

    async fn send(&self, request: Request<Body>) -> Response {
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router is infallible")
    }

    async fn get(&self, uri: &str) -> Response {
        self.send(Request::get(uri).body(Body::empty()).expect("request"))
            .await
    }
}

async fn report_page(State(renders): State<Renders>) -> Html<String> {
    let n = renders.bump();
    Html(format!(
        "<html><body><!-- generated -->\n<h1>Report</h1><p>render {n}</p></body></html>"
    ))
}

async fn slow_page(State(renders): State<Renders>) -> Html<String> {
    let n = renders.bump();
    tokio::time::sleep(Duration::from_millis(50)).await;
    Html(format!("<p>slow {n}</p>"))
}

async fn missing_page(State(renders): State<Renders>) -> Response {
    renders.bump();
    (StatusCode::NOT_FOUND, Html("<p>gone</p>")).into_response()
}

async fn session_page(State(renders): State<Renders>) -> Response {
    renders.bump();
    ([(SET_COOKIE, "sid=abc")], Html("<p>hello</p>")).into_response()
}

async fn empty_page(State(renders): State<Renders>) -> Html<&'static str> {
    renders.bump();
    Html("")
}

async fn body_string(response: Response) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    String::from_utf8(bytes.to_vec()).expect("utf-8 body")
}

fn header<'a>(response: &'a Response, name: axum::http::HeaderName) -> Option<&'a str> {
    response
        .headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
}

#[tokio::test]
async fn first_request_stores_and_later_requests_hit() {
    let harness = Harness::new(|_| {});

    let first = harness.get("/reports/").await;
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(header(&first, CACHE_CONTROL), Some("max-age=60"));
    assert!(header(&first, EXPIRES).is_some());
    let etag = header(&first, ETAG).expect("etag on miss").to_string();
    let first_body = body_string(first).await;
    assert!(first_body.contains("render 1"));
    assert_eq!(harness.renders.count(), 1);

    let stored = std::fs::read_to_string(harness.root().join("reports/index.html"))
        .expect("stored page");
    assert_eq!(stored, first_body);

    let second = harness.get("/reports/").await;
    assert_eq!(second.status(), StatusCode::OK);
    assert_eq!(header(&second, ETAG), Some(etag.as_str()));
    assert_eq!(body_string(second).await, first_body);
    assert_eq!(harness.renders.count(), 1);

    let conditional = harness
        .send(
            Request::get("/reports/")
                .header(IF_NONE_MATCH, etag.as_str())
                .body(Body::empty())
                .expect("request"),
        )
        .await;
    assert_eq!(conditional.status(), StatusCode::NOT_MODIFIED);
    assert_eq!(header(&conditional, ETAG), Some(etag.as_str()));
    assert!(body_string(conditional).await.is_empty());
    assert_eq!(harness.renders.count(), 1);
}

#[tokio::test]
async fn stale_validator_gets_full_page() {
    let harness = Harness::new(|_| {});
    harness.get("/reports/").await;

    let response = harness
        .send(
            Request::get("/reports/")
                .header(IF_NONE_MATCH, "\"1\"")
                .body(Body::empty())
                .expect("request"),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_string(response).await.contains("render 1"));
}

#[tokio::test]
async fn test_marker_never_touches_storage() {
    let harness = Harness::new(|_| {});

    let response = harness.get("/reports/?__test__").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(header(&response, ETAG).is_none());
    assert!(!harness.root().join("reports/index.html").exists());

    harness.get("/reports/").await;
    assert_eq!(harness.renders.count(), 2);

    let live = harness.get("/reports/?__test__=1").await;
    assert!(body_string(live).await.contains("render 3"));
}

#[tokio::test]
async fn update_marker_rerenders_and_overwrites() {
    let harness = Harness::new(|_| {});
    harness.get("/reports/").await;

    let refreshed = harness.get("/reports/?__update__").await;
    assert_eq!(refreshed.status(), StatusCode::OK);
    assert!(body_string(refreshed).await.contains("render 2"));

    let stored = std::fs::read_to_string(harness.root().join("reports/index.html"))
        .expect("stored page");
    assert!(stored.contains("render 2"));

    let hit = harness.get("/reports/").await;
    assert!(body_string(hit).await.contains("render 2"));
    assert_eq!(harness.renders.count(), 2);
}

#[tokio::test]
async fn development_mode_always_renders() {
    let harness = Harness::new(|config| config.development_mode = true);

    for expected in 1..=3 {
        let response = harness.get("/reports/").await;
        assert!(body_string(response).await.contains(&format!("render {expected}")));
    }
    assert!(!harness.root().join("reports").exists());
}

#[tokio::test]
async fn precompressed_variants_follow_accept_encoding() {
    let harness = Harness::new(|config| {
        config.gzip = true;
        config.brotli = true;
    });

    let first = harness.get("/reports/").await;
    assert_eq!(header(&first, VARY), Some("accept-encoding"));
    let plain = body_string(first).await;
    assert!(harness.root().join("reports/index.html.gz").exists());
    assert!(harness.root().join("reports/index.html.br").exists());

    let br = harness
        .send(
            Request::get("/reports/")
                .header(ACCEPT_ENCODING, "gzip, deflate, br")
                .body(Body::empty())
                .expect("request"),
        )
        .await;
    assert_eq!(header(&br, CONTENT_ENCODING), Some("br"));
    let compressed = to_bytes(br.into_body(), usize::MAX).await.expect("body");
    let mut decoded = Vec::new();
    brotli::BrotliDecompress(&mut compressed.as_ref(), &mut decoded).expect("brotli");
    assert_eq!(String::from_utf8(decoded).expect("utf-8"), plain);

    let gz = harness
        .send(
            Request::get("/reports/")
                .header(ACCEPT_ENCODING, "gzip, br;q=0")
                .body(Body::empty())
                .expect("request"),
        )
        .await;
    assert_eq!(header(&gz, CONTENT_ENCODING), Some("gzip"));
    let compressed = to_bytes(gz.into_body(), usize::MAX).await.expect("body");
    let mut decoded = String::new();
    flate2::read::GzDecoder::new(compressed.as_ref())
        .read_to_string(&mut decoded)
        .expect("gzip");
    assert_eq!(decoded, plain);

    let identity = harness.get("/reports/").await;
    assert!(header(&identity, CONTENT_ENCODING).is_none());
    assert_eq!(body_string(identity).await, plain);
    assert_eq!(harness.renders.count(), 1);
}

#[tokio::test]
async fn empty_page_variants_still_decode() {
    let harness = Harness::new(|config| {
        config.gzip = true;
        config.brotli = true;
    });
    harness.get("/empty").await;

    let br = harness
        .send(
            Request::get("/empty")
                .header(ACCEPT_ENCODING, "br")
                .body(Body::empty())
                .expect("request"),
        )
        .await;
    assert_eq!(header(&br, CONTENT_ENCODING), Some("br"));
    let compressed = to_bytes(br.into_body(), usize::MAX).await.expect("body");
    let mut decoded = Vec::new();
    brotli::BrotliDecompress(&mut compressed.as_ref(), &mut decoded).expect("brotli");
    assert!(decoded.is_empty());

    let gz = harness
        .send(
            Request::get("/empty")
                .header(ACCEPT_ENCODING, "gzip")
                .body(Body::empty())
                .expect("request"),
        )
        .await;
    assert_eq!(header(&gz, CONTENT_ENCODING), Some("gzip"));
    let compressed = to_bytes(gz.into_body(), usize::MAX).await.expect("body");
    let mut decoded = Vec::new();
    flate2::read::GzDecoder::new(compressed.as_ref())
        .read_to_end(&mut decoded)
        .expect("gzip");
    assert!(decoded.is_empty());
    assert_eq!(harness.renders.count(), 1);
}

#[tokio::test]
async fn non_ok_and_cookie_responses_are_not_stored() {
    let harness = Harness::new(|_| {});

    let missing = harness.get("/missing").await;
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    assert!(header(&missing, ETAG).is_none());
    harness.get("/missing").await;
    assert!(!harness.root().join("missing.html").exists());

    harness.get("/session").await;
    harness.get("/session").await;
    assert!(!harness.root().join("session.html").exists());

    assert_eq!(harness.renders.count(), 4);
}

#[tokio::test]
async fn storage_failure_still_delivers_the_page() {
    let dir = tempfile::tempdir().expect("tempdir");
    let blocker = dir.path().join("not-a-dir");
    std::fs::write(&blocker, "file").expect("write blocker");
    let config = CacheConfig {
        output_dir: blocker,
        ..Default::default()
    };
    let harness = Harness::with_config(dir, config);

    let response = harness.get("/reports/").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(header(&response, ETAG).is_none());
    assert!(body_string(response).await.contains("render 1"));

    let again = harness.get("/reports/").await;
    assert!(body_string(again).await.contains("render 2"));
}

#[tokio::test]
async fn first_response_is_the_minified_page() {
    let harness = Harness::new(|config| config.minify = MinifyMode::StripComments);

    let first = body_string(harness.get("/reports/").await).await;
    assert!(!first.contains("<!-- generated -->"));
    assert!(first.contains("render 1"));

    let hit = body_string(harness.get("/reports/").await).await;
    assert_eq!(hit, first);
}

#[tokio::test]
async fn chunked_capture_stores_the_same_page() {
    let harness = Harness::new(|config| config.capture = CaptureMode::Chunked);

    let first = body_string(harness.get("/reports/").await).await;
    let stored = std::fs::read_to_string(harness.root().join("reports/index.html"))
        .expect("stored page");
    assert_eq!(stored, first);
}

#[tokio::test]
async fn oversized_pages_are_delivered_but_not_stored() {
    let harness = Harness::new(|config| config.max_capture_bytes = 16);

    let response = harness.get("/reports/").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_string(response).await.contains("render 1"));
    assert!(!harness.root().join("reports/index.html").exists());
}

#[tokio::test]
async fn head_and_post_are_never_stored() {
    let harness = Harness::new(|_| {});

    let head = harness
        .send(
            Request::head("/reports/")
                .body(Body::empty())
                .expect("request"),
        )
        .await;
    assert_eq!(head.status(), StatusCode::OK);

    let post = harness
        .send(
            Request::builder()
                .method(Method::POST)
                .uri("/reports/")
                .body(Body::empty())
                .expect("request"),
        )
        .await;
    assert_eq!(post.status(), StatusCode::OK);
    assert!(!harness.root().join("reports/index.html").exists());
    assert_eq!(harness.renders.count(), 2);
}

#[tokio::test]
async fn head_is_answered_from_storage() {
    let harness = Harness::new(|_| {});
    harness.get("/reports/").await;

    let head = harness
        .send(
            Request::head("/reports/")
                .body(Body::empty())
                .expect("request"),
        )
        .await;
    assert_eq!(head.status(), StatusCode::OK);
    assert!(header(&head, ETAG).is_some());
    assert_eq!(harness.renders.count(), 1);
}

#[tokio::test]
async fn query_parameters_select_distinct_pages() {
    let harness = Harness::new(|config| config.include_query = true);

    harness.get("/reports/?b=2&a=1").await;
    assert!(harness.root().join("reports/index-a=1-b=2.html").exists());

    let reordered = harness.get("/reports/?a=1&b=2&__update__").await;
    assert!(body_string(reordered).await.contains("render 2"));

    harness.get("/reports/?a=1&b=2").await;
    harness.get("/reports/?a=3").await;
    assert!(harness.root().join("reports/index-a=3.html").exists());
    assert_eq!(harness.renders.count(), 3);
}

#[tokio::test]
async fn traversal_paths_are_served_live() {
    let harness = Harness::new(|_| {});

    let response = harness.get("/a/../../escape").await;
    assert_eq!(response.status(), StatusCode::OK);
    harness.get("/a/../../escape").await;

    assert_eq!(harness.renders.count(), 2);
    let parent = harness.root().parent().expect("tempdir has a parent");
    assert!(!parent.join("escape.html").exists());
}

#[tokio::test]
async fn serialized_misses_render_once() {
    let harness = Arc::new(Harness::new(|config| config.serialize_misses = true));

    let requests = (0..8).map(|_| {
        let harness = Arc::clone(&harness);
        tokio::spawn(async move {
            let response = harness.get("/slow").await;
            body_string(response).await
        })
    });
    let bodies: Vec<String> = futures::future::join_all(requests)
        .await
        .into_iter()
        .map(|joined| joined.expect("task"))
        .collect();

    assert_eq!(harness.renders.count(), 1);
    assert!(bodies.iter().all(|body| body == "<p>slow 1</p>"));
}

#[tokio::test]
async fn concurrent_misses_both_succeed_without_serialization() {
    let harness = Arc::new(Harness::new(|_| {}));

    let requests = (0..2).map(|_| {
        let harness = Arc::clone(&harness);
        tokio::spawn(async move { harness.get("/slow").await.status() })
    });
    for joined in futures::future::join_all(requests).await {
        assert_eq!(joined.expect("task"), StatusCode::OK);
    }

    assert!(harness.root().join("slow.html").exists());
    assert!((1..=2).contains(&harness.renders.count()));
}
