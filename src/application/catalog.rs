//! Demo content served behind the page cache.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub slug: &'static str,
    pub title: &'static str,
    pub summary: &'static str,
    pub body: &'static str,
}

/// Reports plus a render counter.
///
/// Every handler invocation bumps the counter, so a value that stops moving
/// across reloads means the page came from storage.
#[derive(Debug)]
pub struct ReportCatalog {
    reports: Vec<Report>,
    renders: AtomicU64,
}

impl Default for ReportCatalog {
    fn default() -> Self {
        Self::new(vec![
            Report {
                slug: "quarterly",
                title: "Quarterly summary",
                summary: "Revenue and traffic for the last quarter.",
                body: "Traffic grew steadily while revenue held flat.",
            },
            Report {
                slug: "uptime",
                title: "Uptime",
                summary: "Availability of every public endpoint.",
                body: "All endpoints stayed above 99.9% availability.",
            },
            Report {
                slug: "storage",
                title: "Storage growth",
                summary: "How much disk the stored pages use.",
                body: "Precompressed siblings add roughly a third on top of the HTML.",
            },
        ])
    }
}

impl ReportCatalog {
    pub fn new(reports: Vec<Report>) -> Self {
        Self {
            reports,
            renders: AtomicU64::new(0),
        }
    }

    pub fn reports(&self) -> &[Report] {
        &self.reports
    }

    pub fn find(&self, slug: &str) -> Option<&Report> {
        self.reports.iter().find(|report| report.slug == slug)
    }

    /// Count one render and return the new total.
    pub fn record_render(&self) -> u64 {
        self.renders.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn render_count(&self) -> u64 {
        self.renders.load(Ordering::Relaxed)
    }
}
