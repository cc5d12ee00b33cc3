use crate::api::error::AppError;
use crate::services::processor::{ExternalProcessor, ProcessorError};
use crate::services::storage::StorageArea;
use crate::utils::validation::validate_storage_key;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize, Serialize, ToSchema)]
pub struct RateConfig {
    #[serde(default)]
    pub rate_spot: f64,
    #[serde(default)]
    pub rate_remote: f64,
}

/// A request to turn staged trade history files into a dashboard
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, ToSchema)]
pub struct ProcessingRequest {
    #[serde(default)]
    pub trade_history_files: Vec<String>,
    #[serde(default)]
    pub jisdor_file: String,
    #[serde(default)]
    pub config: RateConfig,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOutcome {
    pub output_file: String,
    pub logs: String,
}

pub fn dashboard_name(timestamp: i64, token: Option<&str>) -> String {
    match token {
        Some(t) => format!("dashboard_{}-{}.xlsx", timestamp, t),
        None => format!("dashboard_{}.xlsx", timestamp),
    }
}

/// Rates are passed without fractional digits
pub fn format_rate(rate: f64) -> String {
    format!("{:.0}", rate)
}

pub struct JobService {
    uploads: Arc<StorageArea>,
    outputs: Arc<StorageArea>,
    processor: Arc<dyn ExternalProcessor>,
}

impl JobService {
    pub fn new(
        uploads: Arc<StorageArea>,
        outputs: Arc<StorageArea>,
        processor: Arc<dyn ExternalProcessor>,
    ) -> Self {
        Self {
            uploads,
            outputs,
            processor,
        }
    }

    /// Rejects a request before anything is spawned or written.
    pub async fn validate(&self, req: &ProcessingRequest) -> Result<(), AppError> {
        if req.jisdor_file.is_empty() {
            return Err(AppError::InvalidInput("JISDOR file is required".to_string()));
        }
        if req.trade_history_files.is_empty() {
            return Err(AppError::InvalidInput(
                "At least one trade history file is required".to_string(),
            ));
        }
        if !req.config.rate_spot.is_finite() || !req.config.rate_remote.is_finite() {
            return Err(AppError::InvalidInput("Rates must be finite numbers".to_string()));
        }

        for name in std::iter::once(&req.jisdor_file).chain(&req.trade_history_files) {
            validate_storage_key(name).map_err(|e| AppError::InvalidInput(e.message))?;
            if self.uploads.stat(name).await?.is_none() {
                return Err(AppError::InvalidInput(format!("Staged file not found: {}", name)));
            }
        }

        Ok(())
    }

    /// Argument vector for the processor, in the order it expects.
    pub fn build_args(
        &self,
        req: &ProcessingRequest,
        output_path: String,
    ) -> Result<Vec<String>, AppError> {
        let path = |key: &str| -> Result<String, AppError> {
            Ok(self.uploads.path_of(key)?.to_string_lossy().into_owned())
        };

        let mut args = vec![
            "--jisdor".to_string(),
            path(&req.jisdor_file)?,
            "--output".to_string(),
            output_path,
            "--rate-spot".to_string(),
            format_rate(req.config.rate_spot),
            "--rate-remote".to_string(),
            format_rate(req.config.rate_remote),
        ];

        for file in &req.trade_history_files {
            args.push("--trade-file".to_string());
            args.push(path(file)?);
        }

        Ok(args)
    }

    /// Runs one processing job to completion.
    pub async fn dispatch(
        &self,
        req: ProcessingRequest,
        cancel: CancellationToken,
    ) -> Result<JobOutcome, AppError> {
        tracing::info!("📋 Process request received");
        tracing::info!("   JISDOR file: {}", req.jisdor_file);
        tracing::info!("   Trade files: {:?}", req.trade_history_files);
        tracing::info!("   Rate spot: {}", format_rate(req.config.rate_spot));
        tracing::info!("   Rate remote: {}", format_rate(req.config.rate_remote));

        self.validate(&req).await?;

        // Inputs stay readable for the whole run; sorted to keep lock order stable
        let inputs: BTreeSet<&String> = std::iter::once(&req.jisdor_file)
            .chain(&req.trade_history_files)
            .collect();
        let mut input_guards = Vec::with_capacity(inputs.len());
        for key in inputs {
            input_guards.push(self.uploads.read_lock(key).await);
        }

        // Hidden until the processor succeeds; removed if this future is dropped
        let timestamp = Utc::now().timestamp();
        let pending = self
            .outputs
            .reserve_pending(|token| dashboard_name(timestamp, token))
            .await?;
        let output_key = pending.key().to_string();
        let output_path = pending.pending_path().to_string_lossy().into_owned();

        let args = self.build_args(&req, output_path)?;
        tracing::info!("⚙️  Executing processor with arguments:");
        for (i, arg) in args.iter().enumerate() {
            tracing::info!("   [{}] {}", i, arg);
        }

        let result = self.processor.run(args, cancel).await;
        drop(input_guards);

        let failure = match result {
            Ok(output) if output.success() => {
                tracing::debug!("📝 Processor output:\n{}", output.logs);
                pending.commit().await?;
                tracing::info!("✅ Processing completed successfully: {}", output_key);
                return Ok(JobOutcome {
                    output_file: output_key,
                    logs: output.logs,
                });
            }
            Ok(output) => {
                tracing::debug!("📝 Processor output:\n{}", output.logs);
                let status = match output.exit_code {
                    Some(code) => format!("exit status {}", code),
                    None => "terminated by signal".to_string(),
                };
                AppError::ProcessingFailed {
                    message: format!("Processing failed: {}", status),
                    logs: output.logs,
                }
            }
            Err(e @ ProcessorError::Launch(_)) | Err(e @ ProcessorError::Io(_)) => {
                AppError::ProcessingFailed {
                    message: format!("Processing failed: {}", e),
                    logs: String::new(),
                }
            }
            Err(e) => AppError::ProcessingFailed {
                message: format!("Processing failed: {}", e),
                logs: e.logs().to_string(),
            },
        };

        tracing::error!("❌ {}", failure);
        // Whatever the processor left behind is not a valid artifact
        drop(pending);

        Err(failure)
    }
}
