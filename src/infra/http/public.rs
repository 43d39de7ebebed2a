use std::sync::Arc;

use axum::{
    Router,
    extract::{Path, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::get,
};

use crate::{
    application::catalog::ReportCatalog,
    cache::{CacheState, static_page_layer},
    presentation::views::{
        IndexTemplate, ReportTemplate, ReportsTemplate, SITE_NAME, render_not_found_response,
        render_template_response,
    },
};

use super::middleware::{log_responses, set_request_context};

#[derive(Clone)]
pub struct HttpState {
    pub catalog: Arc<ReportCatalog>,
    pub cache: Option<CacheState>,
}

pub fn build_router(state: HttpState) -> Router {
    // Pages rendered by handlers; stored on first render when caching is on.
    let cached_routes = Router::new()
        .route("/", get(index))
        .route("/reports", get(reports_index))
        .route("/reports/", get(reports_index))
        .route("/reports/{slug}", get(report_detail))
        .fallback(fallback);

    let cached_routes = if let Some(cache_state) = state.cache.clone() {
        cached_routes.layer(middleware::from_fn_with_state(
            cache_state,
            static_page_layer,
        ))
    } else {
        cached_routes
    };

    let static_routes = Router::new().route("/_health", get(health));

    cached_routes
        .merge(static_routes)
        .with_state(state)
        .layer(middleware::from_fn(log_responses))
        .layer(middleware::from_fn(set_request_context))
}

async fn index(State(state): State<HttpState>) -> Response {
    let renders = state.catalog.record_render();
    render_template_response(
        IndexTemplate {
            site_name: SITE_NAME,
            renders,
        },
        StatusCode::OK,
    )
}

async fn reports_index(State(state): State<HttpState>) -> Response {
    let renders = state.catalog.record_render();
    render_template_response(
        ReportsTemplate {
            site_name: SITE_NAME,
            renders,
            reports: state.catalog.reports(),
        },
        StatusCode::OK,
    )
}

async fn report_detail(State(state): State<HttpState>, Path(slug): Path<String>) -> Response {
    let renders = state.catalog.record_render();
    match state.catalog.find(&slug) {
        Some(report) => render_template_response(
            ReportTemplate {
                site_name: SITE_NAME,
                renders,
                report,
            },
            StatusCode::OK,
        ),
        None => render_not_found_response(renders),
    }
}

async fn fallback(State(state): State<HttpState>) -> Response {
    render_not_found_response(state.catalog.render_count())
}

async fn health() -> Response {
    StatusCode::NO_CONTENT.into_response()
}
