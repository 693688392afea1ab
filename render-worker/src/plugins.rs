//! Plugin (LoRA) weight cache.
//!
//! Populated once at consumer start: plugin ids come from the database,
//! weight files from blob storage. The generator backend reads the cached
//! files from local disk, keyed by plugin id.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use thiserror::Error;

use render_common::jobqueue::{JobQueueError, JobRepository};

use crate::storage::BlobStore;

/// Bucket holding plugin weight files.
pub const PLUGIN_BUCKET: &str = "plugin_weights";

/// Local directory the generator backend reads weights from.
pub const PLUGIN_CACHE_DIR: &str = "./lora_cache";

#[derive(Error, Debug)]
pub enum PluginCacheError {
    #[error("failed to list plugins: {0}")]
    Database(#[from] JobQueueError),
    #[error("failed to write plugin weights: {0}")]
    Io(#[from] std::io::Error),
}

/// Local cache of plugin weight files, keyed by plugin id.
#[derive(Default)]
pub struct PluginCache {
    paths: HashMap<String, PathBuf>,
}

impl PluginCache {
    /// Download every known plugin's weights into `dir`, skipping files
    /// already present. A failed download is logged and leaves that
    /// plugin out of the cache; jobs referencing it fail at generation
    /// time instead of blocking worker startup.
    pub async fn warm(
        dir: &Path,
        repo: &dyn JobRepository,
        store: &dyn BlobStore,
    ) -> Result<Self, PluginCacheError> {
        tokio::fs::create_dir_all(dir).await?;

        let mut paths = HashMap::new();
        for plugin_id in repo.list_plugin_ids().await? {
            let filename = format!("{plugin_id}.safetensors");
            // Plugin ids may contain path separators; flatten them.
            let local_path = dir.join(filename.replace('/', "_"));

            if !local_path.exists() {
                match store.download(PLUGIN_BUCKET, &filename).await {
                    Ok(bytes) => {
                        tokio::fs::write(&local_path, bytes).await?;
                        tracing::info!(%plugin_id, "downloaded plugin weights");
                    }
                    Err(error) => {
                        tracing::error!(%plugin_id, %error, "failed to download plugin weights");
                        continue;
                    }
                }
            }
            paths.insert(plugin_id, local_path);
        }

        Ok(Self { paths })
    }

    /// Path of a cached plugin's weights, if present.
    pub fn path(&self, plugin_id: &str) -> Option<&Path> {
        self.paths.get(plugin_id).map(PathBuf::as_path)
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}
