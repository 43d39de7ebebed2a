//! Out-of-band removal of stored pages.

use tracing::info;

use crate::cache::{ArtifactStore, CacheConfig, keys};

use super::error::AppError;

/// Delete the primary page and compressed siblings a request for
/// `path?query` would be answered from. Returns the number of files removed.
pub async fn purge_page(
    config: &CacheConfig,
    path: &str,
    query: Option<&str>,
) -> Result<usize, AppError> {
    let store = ArtifactStore::new(config.output_dir.clone());
    let artifact = keys::resolve(store.root(), path, query, config.key_policy())
        .map_err(|err| AppError::unexpected(format!("cannot map `{path}`: {err}")))?;

    let removed = store.remove(&artifact).await?;
    info!(
        path = %artifact.primary().display(),
        removed,
        "purged stored page"
    );
    Ok(removed)
}
