pub mod fs;
pub mod memory;
pub mod s3;

use std::sync::Arc;

use crate::application::ports::storage::Storage;
use crate::bootstrap::config::Config;

/// Builds the configured `Storage` driver from `Config::storage_driver`
/// (`STORAGE` env var: `memory`, `fs:<root>`, or `s3`).
pub async fn build(cfg: &Config) -> anyhow::Result<Arc<dyn Storage>> {
    match cfg.storage_driver.as_str() {
        "memory" => Ok(Arc::new(memory::MemoryStorage::new())),
        "s3" => Ok(Arc::new(s3::S3Storage::new(cfg).await?)),
        other => {
            let root = other
                .strip_prefix("fs:")
                .unwrap_or("./data/rooms")
                .to_string();
            Ok(Arc::new(fs::FsStorage::new(root)))
        }
    }
}
