//! The external dashboard processor.
//!
//! The processor is an opaque batch tool driven by command line flags. It is
//! reached through [`ExternalProcessor`] so jobs can run against a fake in tests.

use crate::config::ProcessorConfig;
use async_trait::async_trait;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;

/// Outcome of a processor run that exited on its own
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    /// `None` when the process was terminated by a signal
    pub exit_code: Option<i32>,
    /// Standard output and standard error, in arrival order
    pub logs: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

#[derive(Error, Debug)]
pub enum ProcessorError {
    #[error("failed to start processor: {0}")]
    Launch(std::io::Error),

    #[error("processor I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("processor timed out after {after:?}")]
    TimedOut { after: Duration, logs: String },

    #[error("processor run was cancelled")]
    Cancelled { logs: String },
}

impl ProcessorError {
    /// Output captured before the run was aborted
    pub fn logs(&self) -> &str {
        match self {
            ProcessorError::TimedOut { logs, .. } | ProcessorError::Cancelled { logs } => logs,
            _ => "",
        }
    }
}

#[async_trait]
pub trait ExternalProcessor: Send + Sync {
    /// Runs the processor with `args` until it exits, `cancel` fires or the
    /// implementation's time limit is reached.
    async fn run(
        &self,
        args: Vec<String>,
        cancel: CancellationToken,
    ) -> Result<ProcessOutput, ProcessorError>;
}

/// Spawns a local program, e.g. `python python/processor.py <args>`
pub struct CommandProcessor {
    program: String,
    base_args: Vec<String>,
    timeout: Duration,
}

enum Completion {
    Exited(std::io::Result<ExitStatus>),
    TimedOut,
    Cancelled,
}

impl CommandProcessor {
    pub fn new(program: impl Into<String>, base_args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            base_args,
            timeout,
        }
    }

    pub fn from_config(config: &ProcessorConfig) -> Self {
        Self::new(config.program.clone(), config.base_args.clone(), config.timeout)
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

async fn pump<R: AsyncRead + Unpin>(
    reader: Option<R>,
    sink: &tokio::sync::Mutex<Vec<u8>>,
) -> std::io::Result<()> {
    let Some(reader) = reader else {
        return Ok(());
    };
    let mut reader = BufReader::new(reader);
    let mut line = Vec::new();
    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line).await? == 0 {
            return Ok(());
        }
        sink.lock().await.extend_from_slice(&line);
    }
}

async fn collect_and_wait(
    child: &mut Child,
    sink: &tokio::sync::Mutex<Vec<u8>>,
) -> std::io::Result<ExitStatus> {
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let (out, err) = tokio::join!(pump(stdout, sink), pump(stderr, sink));
    out?;
    err?;
    child.wait().await
}

#[async_trait]
impl ExternalProcessor for CommandProcessor {
    async fn run(
        &self,
        args: Vec<String>,
        cancel: CancellationToken,
    ) -> Result<ProcessOutput, ProcessorError> {
        let mut child = Command::new(&self.program)
            .args(&self.base_args)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(ProcessorError::Launch)?;

        tracing::debug!("Spawned processor pid={:?}", child.id());

        let sink = tokio::sync::Mutex::new(Vec::new());
        let completion = tokio::select! {
            status = collect_and_wait(&mut child, &sink) => Completion::Exited(status),
            _ = tokio::time::sleep(self.timeout) => Completion::TimedOut,
            _ = cancel.cancelled() => Completion::Cancelled,
        };

        let logs = String::from_utf8_lossy(&sink.into_inner()).into_owned();

        match completion {
            Completion::Exited(status) => {
                let status = status?;
                Ok(ProcessOutput {
                    exit_code: status.code(),
                    logs,
                })
            }
            Completion::TimedOut => {
                tracing::warn!("⏱️  Processor exceeded {:?}, killing it", self.timeout);
                if let Err(e) = child.kill().await {
                    tracing::warn!("Failed to kill processor: {}", e);
                }
                Err(ProcessorError::TimedOut {
                    after: self.timeout,
                    logs,
                })
            }
            Completion::Cancelled => {
                tracing::warn!("🛑 Processor run cancelled, killing it");
                if let Err(e) = child.kill().await {
                    tracing::warn!("Failed to kill processor: {}", e);
                }
                Err(ProcessorError::Cancelled { logs })
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn shell(script: &str, timeout: Duration) -> CommandProcessor {
        CommandProcessor::new(
            "sh",
            vec!["-c".to_string(), script.to_string(), "sh".to_string()],
            timeout,
        )
    }

    #[tokio::test]
    async fn test_captures_stdout_and_stderr() {
        let processor = shell("echo out; echo err >&2; exit 0", Duration::from_secs(10));
        let output = processor.run(vec![], CancellationToken::new()).await.unwrap();
        assert!(output.success());
        assert!(output.logs.contains("out\n"));
        assert!(output.logs.contains("err\n"));
    }

    #[tokio::test]
    async fn test_passes_arguments_in_order() {
        let processor = shell("echo \"$@\"", Duration::from_secs(10));
        let args = vec!["--jisdor".to_string(), "a b".to_string(), "--rate-spot".to_string()];
        let output = processor.run(args, CancellationToken::new()).await.unwrap();
        assert_eq!(output.logs, "--jisdor a b --rate-spot\n");
    }

    #[tokio::test]
    async fn test_reports_non_zero_exit() {
        let processor = shell("echo boom >&2; exit 3", Duration::from_secs(10));
        let output = processor.run(vec![], CancellationToken::new()).await.unwrap();
        assert!(!output.success());
        assert_eq!(output.exit_code, Some(3));
        assert_eq!(output.logs, "boom\n");
    }

    #[tokio::test]
    async fn test_launch_failure() {
        let processor =
            CommandProcessor::new("/nonexistent/processor-binary", vec![], Duration::from_secs(1));
        let err = processor.run(vec![], CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, ProcessorError::Launch(_)));
    }

    #[tokio::test]
    async fn test_timeout_kills_process() {
        let processor = shell("echo started; exec sleep 30", Duration::from_millis(300));
        let started = std::time::Instant::now();
        let err = processor.run(vec![], CancellationToken::new()).await.unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(matches!(err, ProcessorError::TimedOut { .. }));
        assert!(err.logs().contains("started"));
    }

    #[tokio::test]
    async fn test_cancellation_kills_process() {
        let processor = shell("exec sleep 30", Duration::from_secs(60));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });
        let err = processor.run(vec![], cancel).await.unwrap_err();
        assert!(matches!(err, ProcessorError::Cancelled { .. }));
    }
}
