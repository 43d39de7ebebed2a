use askama::Template;
use axum::{
    http::StatusCode,
    response::{Html, IntoResponse, Response},
};

use crate::application::{
    catalog::Report,
    error::{AppError, ErrorReport},
};

pub const SITE_NAME: &str = "pagefreeze";

#[derive(Template)]
#[template(path = "index.html")]
pub struct IndexTemplate {
    pub site_name: &'static str,
    pub renders: u64,
}

#[derive(Template)]
#[template(path = "reports.html")]
pub struct ReportsTemplate<'a> {
    pub site_name: &'static str,
    pub renders: u64,
    pub reports: &'a [Report],
}

#[derive(Template)]
#[template(path = "report.html")]
pub struct ReportTemplate<'a> {
    pub site_name: &'static str,
    pub renders: u64,
    pub report: &'a Report,
}

#[derive(Template)]
#[template(path = "error.html")]
pub struct ErrorTemplate {
    pub site_name: &'static str,
    pub renders: u64,
    pub heading: &'static str,
    pub message: &'static str,
}

pub fn render_template<T: Template>(template: T) -> Result<Html<String>, AppError> {
    template.render().map(Html).map_err(AppError::from)
}

pub fn render_template_response<T: Template>(template: T, status: StatusCode) -> Response {
    match render_template(template) {
        Ok(html) => (status, html).into_response(),
        Err(err) => err.into_response(),
    }
}

pub fn render_not_found_response(renders: u64) -> Response {
    let template = ErrorTemplate {
        site_name: SITE_NAME,
        renders,
        heading: "Not found",
        message: "There is no page at this address.",
    };
    let mut response = render_template_response(template, StatusCode::NOT_FOUND);
    ErrorReport::from_message(
        "presentation::views::render_not_found_response",
        StatusCode::NOT_FOUND,
        "Resource not found",
    )
    .attach(&mut response);
    response
}
