use crate::config::ProcessorConfig;
use crate::services::processor::{CommandProcessor, ExternalProcessor};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

pub fn setup_processor(config: &ProcessorConfig) -> Arc<dyn ExternalProcessor> {
    info!(
        "⚙️  Processor: {} {} (timeout {:?})",
        config.program,
        config.base_args.join(" "),
        config.timeout
    );

    // Missing scripts only surface when a job runs, so say so up front
    if let Some(script) = config.base_args.first().filter(|a| !a.starts_with('-')) {
        if !Path::new(script).exists() {
            tracing::warn!(
                "⚠️  Processor script '{}' not found; processing requests will fail",
                script
            );
        }
    }

    Arc::new(CommandProcessor::from_config(config))
}
