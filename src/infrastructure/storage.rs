use crate::config::AppConfig;
use crate::services::storage::StorageArea;
use std::sync::Arc;
use tracing::info;

pub const UPLOADS: &str = "uploads";
pub const OUTPUTS: &str = "outputs";

/// Creates both storage directories and returns `(uploads, outputs)`.
pub async fn setup_storage(
    config: &AppConfig,
) -> std::io::Result<(Arc<StorageArea>, Arc<StorageArea>)> {
    let uploads = Arc::new(StorageArea::new(UPLOADS, &config.upload_dir));
    let outputs = Arc::new(StorageArea::new(OUTPUTS, &config.output_dir));

    for area in [&uploads, &outputs] {
        area.ensure_dir().await?;
        info!("📂 {} dir: {}", area.name(), area.root().display());
    }

    Ok((uploads, outputs))
}
