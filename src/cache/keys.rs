//! Cache key derivation.
//!
//! Maps a request path (and, when enabled, its query parameters) onto a file
//! location under the configured output root.

use std::path::{Path, PathBuf};

use thiserror::Error;
use url::form_urlencoded;

use super::codec::Encoding;

const INDEX_TOKEN: &str = "index";
const ARTIFACT_EXTENSION: &str = "html";
/// Starts every query parameter in the file name.
const PARAM_DELIMITER: char = '-';
const VALUE_DELIMITER: char = '=';
/// Starts a `_XX` escape of one UTF-8 byte.
const ESCAPE: char = '_';

/// Static policy inputs for key derivation.
#[derive(Debug, Clone, Copy)]
pub struct KeyPolicy<'a> {
    pub include_query: bool,
    pub test_marker: &'a str,
    pub update_marker: &'a str,
}

/// Request path segments that cannot be mapped under the output root.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyError {
    #[error("path segment `{segment}` would escape the output root")]
    Traversal { segment: String },
    #[error("path segment contains a forbidden character")]
    ForbiddenCharacter,
}

/// Location of a cached page and its compressed siblings.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArtifactPath {
    primary: PathBuf,
}

impl ArtifactPath {
    /// The uncompressed `.html` file.
    pub fn primary(&self) -> &Path {
        &self.primary
    }

    /// Sibling file holding the `encoding` variant, e.g. `index.html.br`.
    pub fn variant(&self, encoding: Encoding) -> PathBuf {
        let mut name = self.primary.clone().into_os_string();
        name.push(".");
        name.push(encoding.file_suffix());
        PathBuf::from(name)
    }
}

/// Resolve the artifact location for a request.
///
/// `path` is the URL path as received; `query` is the raw query string.
pub fn resolve(
    root: &Path,
    path: &str,
    query: Option<&str>,
    policy: KeyPolicy<'_>,
) -> Result<ArtifactPath, KeyError> {
    let mut segments = Vec::new();
    for segment in path.split('/').filter(|segment| !segment.is_empty()) {
        validate_segment(segment)?;
        segments.push(segment.to_string());
    }

    if path.is_empty() || path.ends_with('/') {
        segments.push(INDEX_TOKEN.to_string());
    }

    if policy.include_query {
        let token = query_token(query.unwrap_or(""), policy);
        if let Some(last) = segments.last_mut() {
            let mut tail = String::with_capacity(last.len() + token.len());
            escape_into(&mut tail, last, |ch| ch != ESCAPE && ch != PARAM_DELIMITER);
            tail.push_str(&token);
            *last = tail;
        }
    }

    let mut primary = root.to_path_buf();
    for segment in &segments {
        primary.push(segment);
    }
    let mut file = primary.into_os_string();
    file.push(".");
    file.push(ARTIFACT_EXTENSION);

    Ok(ArtifactPath {
        primary: PathBuf::from(file),
    })
}

fn validate_segment(segment: &str) -> Result<(), KeyError> {
    if segment == "." || segment == ".." {
        return Err(KeyError::Traversal {
            segment: segment.to_string(),
        });
    }
    // `C:` would turn into a drive prefix on Windows.
    if segment.contains(['\\', '\0', ':']) {
        return Err(KeyError::ForbiddenCharacter);
    }
    Ok(())
}

/// Fold query parameters into a file-name-safe suffix.
///
/// Each parameter contributes `-<name>` and, when non-empty, `=<value>`.
/// Names and values keep ASCII alphanumerics and CJK ideographs; every other
/// character is written as `_XX` per UTF-8 byte, so the token never contains
/// a bare delimiter and distinct parameter sets give distinct tokens. The
/// final path segment is escaped for `_` and `-` before the token is appended.
/// Parameters are sorted so their order in the URL does not matter.
fn query_token(query: &str, policy: KeyPolicy<'_>) -> String {
    let mut pairs: Vec<(String, String)> = form_urlencoded::parse(query.as_bytes())
        .filter(|(name, _)| name != policy.test_marker && name != policy.update_marker)
        .map(|(name, value)| (name.into_owned(), value.into_owned()))
        .collect();
    pairs.sort();

    let mut token = String::new();
    for (name, value) in &pairs {
        token.push(PARAM_DELIMITER);
        escape_into(&mut token, name, is_plain);
        if !value.is_empty() {
            token.push(VALUE_DELIMITER);
            escape_into(&mut token, value, is_plain);
        }
    }
    token
}

fn escape_into(out: &mut String, text: &str, keep: impl Fn(char) -> bool) {
    let mut buf = [0u8; 4];
    for ch in text.chars() {
        if keep(ch) {
            out.push(ch);
            continue;
        }
        for byte in ch.encode_utf8(&mut buf).bytes() {
            out.push(ESCAPE);
            out.push_str(&format!("{byte:02X}"));
        }
    }
}

fn is_plain(ch: char) -> bool {
    ch.is_ascii_alphanumeric()
        || ('\u{4E00}'..='\u{9FCB}').contains(&ch)
        || ('\u{3400}'..='\u{4DB5}').contains(&ch)
        || ch == '\u{3007}'
}
