//! Pluggable HTML minification applied before a page is persisted.

use std::sync::Arc;

use lol_html::{RewriteStrSettings, doc_comments, rewrite_str};
use serde::Deserialize;
use tracing::warn;

/// A pure `text -> text` transform run once per stored page.
///
/// Never invoked when serving from the cache. Closures implement it:
///
/// ```
/// use pagefreeze::cache::Minifier;
///
/// let trim = |html: &str| html.trim().to_string();
/// assert_eq!(trim.minify("  <p>x</p>\n"), "<p>x</p>");
/// ```
pub trait Minifier: Send + Sync {
    fn minify(&self, html: &str) -> String;
}

impl<F> Minifier for F
where
    F: Fn(&str) -> String + Send + Sync,
{
    fn minify(&self, html: &str) -> String {
        self(html)
    }
}

/// Pass-through minifier.
#[derive(Debug, Clone, Copy, Default)]
pub struct Identity;

impl Minifier for Identity {
    fn minify(&self, html: &str) -> String {
        html.to_string()
    }
}

/// Removes HTML comments, keeping IE conditional comments.
///
/// Falls back to the input if the document cannot be rewritten.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommentStripper;

impl Minifier for CommentStripper {
    fn minify(&self, html: &str) -> String {
        let rewritten = rewrite_str(
            html,
            RewriteStrSettings {
                document_content_handlers: vec![doc_comments!(|comment| {
                    if !comment.text().starts_with("[if") {
                        comment.remove();
                    }
                    Ok(())
                })],
                ..RewriteStrSettings::default()
            },
        );

        match rewritten {
            Ok(output) => output,
            Err(err) => {
                warn!(error = %err, "minifier failed, storing page unchanged");
                html.to_string()
            }
        }
    }
}

/// Built-in minifiers selectable from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum MinifyMode {
    #[default]
    None,
    StripComments,
}

impl MinifyMode {
    pub fn build(self) -> Arc<dyn Minifier> {
        match self {
            Self::None => Arc::new(Identity),
            Self::StripComments => Arc::new(CommentStripper),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_returns_input() {
        assert_eq!(Identity.minify("<p> a </p>"), "<p> a </p>");
    }

    #[test]
    fn closures_are_minifiers() {
        let upper: Arc<dyn Minifier> = Arc::new(|html: &str| html.to_uppercase());
        assert_eq!(upper.minify("<p>a</p>"), "<P>A</P>");
    }

    #[test]
    fn strips_plain_comments() {
        let html = "<html><!-- build 42 --><body><p>hi</p><!--x--></body></html>";
        assert_eq!(
            CommentStripper.minify(html),
            "<html><body><p>hi</p></body></html>"
        );
    }

    #[test]
    fn keeps_conditional_comments() {
        let html = "<head><!--[if IE]><link rel=\"stylesheet\" href=\"ie.css\"><![endif]--></head>";
        assert_eq!(CommentStripper.minify(html), html);
    }

    #[test]
    fn comment_markers_inside_scripts_are_untouched() {
        let html = "<script>var s = \"<!-- not a comment -->\";</script>";
        assert_eq!(CommentStripper.minify(html), html);
    }

    #[test]
    fn mode_builds_matching_minifier() {
        assert_eq!(MinifyMode::None.build().minify("<!--a--><p></p>"), "<!--a--><p></p>");
        assert_eq!(MinifyMode::StripComments.build().minify("<!--a--><p></p>"), "<p></p>");
    }
}
