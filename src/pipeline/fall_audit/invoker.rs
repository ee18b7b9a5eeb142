//! Runs the local llamafile binary once per prompt.
//!
//! The prompt travels as a process argument; stdin is never used. Exit code 0
//! is the only success, whatever the child printed. The child is supervised
//! so that a timeout (and, optionally, a cancel request) can kill it.
//!
//! On unix the child gets its own process group, so a terminal Ctrl+C
//! reaches only this process and the in-flight note can finish.

use std::ffi::OsString;
use std::io::Read;
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Output, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use super::cancel::CancellationToken;
use super::error::InferenceError;
use super::traits::InferenceBackend;

/// Low temperature keeps the yes/no answer close to deterministic.
pub const DEFAULT_TEMPERATURE: f32 = 0.03;

pub const DEFAULT_TIMEOUT_SECS: u64 = 900;

/// Stays under the Windows command-line limit (32 767 UTF-16 units)
/// with room for the executable, model path and flags.
pub const DEFAULT_MAX_PROMPT_BYTES: usize = 30_000;

const POLL_INTERVAL: Duration = Duration::from_millis(50);
const DRAIN_AFTER_KILL: Duration = Duration::from_millis(100);

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

#[derive(Debug, Clone)]
pub struct InvokerConfig {
    pub executable: PathBuf,
    pub model: PathBuf,
    pub temperature: f32,
    /// `None` waits for the process forever.
    pub timeout: Option<Duration>,
    pub max_prompt_bytes: usize,
    /// Kill the in-flight process when the run is cancelled.
    pub hard_cancel: bool,
}

impl InvokerConfig {
    pub fn new(executable: impl Into<PathBuf>, model: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            model: model.into(),
            temperature: DEFAULT_TEMPERATURE,
            timeout: Some(Duration::from_secs(DEFAULT_TIMEOUT_SECS)),
            max_prompt_bytes: DEFAULT_MAX_PROMPT_BYTES,
            hard_cancel: false,
        }
    }
}

pub struct LlamafileInvoker {
    config: InvokerConfig,
}

impl LlamafileInvoker {
    pub fn new(config: InvokerConfig) -> Self {
        Self { config }
    }

    /// Fixed argument list: model, prompt, temperature, logging off.
    pub fn args(&self, prompt: &str) -> Vec<OsString> {
        vec![
            "-m".into(),
            self.config.model.clone().into_os_string(),
            "-p".into(),
            prompt.into(),
            "--temp".into(),
            self.config.temperature.to_string().into(),
            "--log-disable".into(),
        ]
    }

    fn command(&self, prompt: &str) -> Command {
        let mut command = Command::new(&self.config.executable);
        command
            .args(self.args(prompt))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            command.creation_flags(CREATE_NO_WINDOW);
        }

        command
    }

    fn launch_error(&self, source: std::io::Error) -> InferenceError {
        InferenceError::Launch {
            executable: self.config.executable.display().to_string(),
            source,
        }
    }

    fn supervise(
        &self,
        mut child: Child,
        cancel: &CancellationToken,
    ) -> Result<String, InferenceError> {
        let started_at = Instant::now();
        let stdout_rx = child.stdout.take().map(spawn_reader);
        let stderr_rx = child.stderr.take().map(spawn_reader);

        loop {
            if let Some(status) = child.try_wait()? {
                let stdout = stdout_rx.map(|rx| rx.recv().unwrap_or_default()).unwrap_or_default();
                let stderr = stderr_rx.map(|rx| rx.recv().unwrap_or_default()).unwrap_or_default();
                return finish(Output {
                    status,
                    stdout,
                    stderr,
                });
            }

            if self.config.hard_cancel && cancel.is_cancelled() {
                kill(&mut child);
                tracing::info!("Inference process killed on cancel request");
                return Err(InferenceError::Cancelled);
            }

            if let Some(limit) = self.config.timeout {
                if started_at.elapsed() >= limit {
                    kill(&mut child);
                    let stderr = stderr_rx
                        .and_then(|rx| rx.recv_timeout(DRAIN_AFTER_KILL).ok())
                        .unwrap_or_default();
                    tracing::warn!(
                        timeout_secs = limit.as_secs(),
                        "Inference process timed out and was killed"
                    );
                    return Err(InferenceError::Timeout {
                        after_secs: limit.as_secs(),
                        stderr: String::from_utf8_lossy(&stderr).trim().to_string(),
                    });
                }
            }

            thread::sleep(POLL_INTERVAL);
        }
    }
}

impl InferenceBackend for LlamafileInvoker {
    fn generate(&self, prompt: &str, cancel: &CancellationToken) -> Result<String, InferenceError> {
        if prompt.len() > self.config.max_prompt_bytes {
            return Err(InferenceError::PromptTooLong {
                len: prompt.len(),
                max: self.config.max_prompt_bytes,
            });
        }

        let mut command = self.command(prompt);

        if self.config.timeout.is_none() && !self.config.hard_cancel {
            let output = command.output().map_err(|e| self.launch_error(e))?;
            return finish(output);
        }

        let child = command.spawn().map_err(|e| self.launch_error(e))?;
        self.supervise(child, cancel)
    }
}

fn spawn_reader<R: Read + Send + 'static>(mut pipe: R) -> mpsc::Receiver<Vec<u8>> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        let _ = tx.send(buf);
    });
    rx
}

fn kill(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

fn finish(output: Output) -> Result<String, InferenceError> {
    if output.status.success() {
        return Ok(String::from_utf8_lossy(&output.stdout).trim().to_string());
    }
    Err(InferenceError::NonZeroExit {
        code: exit_code(output.status),
        signal: exit_signal(output.status),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    })
}

fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}

#[cfg(unix)]
fn exit_signal(status: ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_: ExitStatus) -> Option<i32> {
    None
}
