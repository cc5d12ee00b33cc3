use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Maximum age of an entry in one storage area before the sweeper evicts it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub max_age: Duration,
}

impl RetentionPolicy {
    pub fn new(max_age: Duration) -> Self {
        Self { max_age }
    }
}

/// Retention windows for both storage areas
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionConfig {
    /// Staged uploads (default: 1 hour)
    pub uploads: RetentionPolicy,

    /// Generated dashboards (default: 24 hours)
    pub outputs: RetentionPolicy,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            uploads: RetentionPolicy::new(Duration::from_secs(60 * 60)),
            outputs: RetentionPolicy::new(Duration::from_secs(24 * 60 * 60)),
        }
    }
}

/// How the external dashboard processor is launched
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Executable to spawn (default: "python")
    pub program: String,

    /// Arguments placed before the job arguments (default: the processor script)
    pub base_args: Vec<String>,

    /// Hard limit on a single run (default: 30 minutes)
    pub timeout: Duration,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            program: "python".to_string(),
            base_args: vec!["python/processor.py".to_string()],
            timeout: Duration::from_secs(30 * 60),
        }
    }
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Directory holding staged uploads (default: "./uploads")
    pub upload_dir: PathBuf,

    /// Directory holding generated dashboards (default: "./outputs")
    pub output_dir: PathBuf,

    /// Frontend assets served for unknown paths (default: "./static")
    pub static_dir: PathBuf,

    /// Maximum upload size in bytes (default: 50 MB)
    pub max_upload_size: usize,

    /// Accepted upload extensions, matched case-sensitively
    pub allowed_extensions: Vec<String>,

    pub retention: RetentionConfig,

    /// Period of the background sweep; `None` sweeps only at startup
    pub sweep_interval: Option<Duration>,

    pub processor: ProcessorConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            upload_dir: PathBuf::from("./uploads"),
            output_dir: PathBuf::from("./outputs"),
            static_dir: PathBuf::from("./static"),
            max_upload_size: 50 * 1024 * 1024, // 50 MB
            allowed_extensions: vec![".xlsx".to_string(), ".xls".to_string(), ".csv".to_string()],
            retention: RetentionConfig::default(),
            sweep_interval: None,
            processor: ProcessorConfig::default(),
        }
    }
}

fn env_secs(key: &str) -> Option<Duration> {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let default = Self::default();

        Self {
            upload_dir: env::var("UPLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or(default.upload_dir),

            output_dir: env::var("OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or(default.output_dir),

            static_dir: env::var("STATIC_DIR")
                .map(PathBuf::from)
                .unwrap_or(default.static_dir),

            max_upload_size: env::var("MAX_UPLOAD_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.max_upload_size),

            allowed_extensions: env::var("ALLOWED_EXTENSIONS")
                .ok()
                .map(|v| {
                    v.split(',')
                        .map(str::trim)
                        .filter(|e| !e.is_empty())
                        .map(|e| {
                            if e.starts_with('.') {
                                e.to_string()
                            } else {
                                format!(".{}", e)
                            }
                        })
                        .collect::<Vec<_>>()
                })
                .filter(|list| !list.is_empty())
                .unwrap_or(default.allowed_extensions),

            retention: RetentionConfig {
                uploads: env_secs("UPLOAD_RETENTION_SECS")
                    .map(RetentionPolicy::new)
                    .unwrap_or(default.retention.uploads),
                outputs: env_secs("OUTPUT_RETENTION_SECS")
                    .map(RetentionPolicy::new)
                    .unwrap_or(default.retention.outputs),
            },

            sweep_interval: env_secs("SWEEP_INTERVAL_SECS").filter(|d| !d.is_zero()),

            processor: ProcessorConfig {
                program: env::var("PROCESSOR_PROGRAM").unwrap_or(default.processor.program),
                base_args: env::var("PROCESSOR_ARGS")
                    .map(|v| v.split_whitespace().map(str::to_string).collect())
                    .unwrap_or(default.processor.base_args),
                timeout: env_secs("PROCESSOR_TIMEOUT_SECS")
                    .filter(|d| !d.is_zero())
                    .unwrap_or(default.processor.timeout),
            },
        }
    }

    /// Create config for development and tests (short processor timeout)
    pub fn development() -> Self {
        Self {
            processor: ProcessorConfig {
                timeout: Duration::from_secs(60),
                ..ProcessorConfig::default()
            },
            ..Self::default()
        }
    }

    /// Point both storage areas below `root`
    pub fn with_storage_root(mut self, root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        self.upload_dir = root.join("uploads");
        self.output_dir = root.join("outputs");
        self
    }
}
