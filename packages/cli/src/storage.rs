//! Source file resolution against object storage or the local source
//! directory.

use std::path::PathBuf;

use collision_metrics_object_store::{ExecutionMode, ObjectStore};

use crate::config::SourceConfig;

/// Connects to the configured bucket, or returns `None` for local-only
/// runs.
///
/// # Errors
///
/// Returns an error if the client cannot be built for `mode`.
pub async fn connect(
    source: &SourceConfig,
    mode: ExecutionMode,
) -> Result<Option<ObjectStore>, Box<dyn std::error::Error>> {
    let Some(bucket) = &source.bucket else {
        log::info!("No bucket configured, reading sources from {}", source.local_dir.display());
        return Ok(None);
    };
    Ok(Some(ObjectStore::connect(mode, bucket, &source.region).await?))
}

/// Returns the local path of `file_name`, downloading it first when a
/// bucket is configured.
///
/// # Errors
///
/// Returns an error if the download fails or the object does not exist.
pub async fn resolve_source(
    source: &SourceConfig,
    store: Option<&ObjectStore>,
    file_name: &str,
) -> Result<PathBuf, Box<dyn std::error::Error>> {
    match store {
        Some(store) => {
            let path = store
                .fetch_source(&source.prefix, file_name, &source.local_dir)
                .await?;
            Ok(path)
        }
        None => Ok(source.local_dir.join(file_name)),
    }
}
