use std::io::Read;
use std::process::{ChildStderr, ChildStdout, Command, Stdio};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::app::error::AppError;
use crate::app::models::Charset;
use crate::app::state::{BackgroundRegistry, BackgroundTaskInfo};

pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchMode {
    Blocking,
    /// Long-running background server: spawned, never waited on.
    Detached,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostCommand {
    program: String,
    args: Vec<String>,
    timeout: Option<Duration>,
    mode: LaunchMode,
}

impl HostCommand {
    pub fn blocking(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            timeout: None,
            mode: LaunchMode::Blocking,
        }
    }

    pub fn detached(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            timeout: None,
            mode: LaunchMode::Detached,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn mode(&self) -> LaunchMode {
        self.mode
    }

    pub fn display(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(self.program.clone());
        for arg in &self.args {
            if arg.contains(char::is_whitespace) {
                parts.push(format!("\"{arg}\""));
            } else {
                parts.push(arg.clone());
            }
        }
        parts.join(" ")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    Output(String),
    Launched { pid: u32 },
}

pub trait CommandRunner {
    fn run_blocking(&self, command: &HostCommand, trace_id: &str) -> Result<String, AppError>;

    fn spawn_detached(&self, command: &HostCommand, trace_id: &str) -> Result<u32, AppError>;

    fn execute(&self, command: &HostCommand, trace_id: &str) -> Result<CommandOutcome, AppError> {
        match command.mode() {
            LaunchMode::Blocking => self.run_blocking(command, trace_id).map(CommandOutcome::Output),
            LaunchMode::Detached => self
                .spawn_detached(command, trace_id)
                .map(|pid| CommandOutcome::Launched { pid }),
        }
    }

    /// Handle and status of every tracked detached launch.
    fn background_tasks(&self) -> Vec<BackgroundTaskInfo> {
        Vec::new()
    }

    fn reap_background(&self) -> usize {
        0
    }
}

/// Runs commands as real child processes.
pub struct ProcessRunner {
    charsets: Vec<Charset>,
    default_timeout: Duration,
    background: BackgroundRegistry,
}

impl ProcessRunner {
    pub fn new(charsets: Vec<Charset>, default_timeout: Duration) -> Self {
        let charsets = if charsets.is_empty() {
            Charset::default_order()
        } else {
            charsets
        };
        Self {
            charsets,
            default_timeout,
            background: BackgroundRegistry::new(),
        }
    }

    pub fn background(&self) -> &BackgroundRegistry {
        &self.background
    }
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self::new(Charset::default_order(), DEFAULT_COMMAND_TIMEOUT)
    }
}

impl CommandRunner for ProcessRunner {
    fn run_blocking(&self, command: &HostCommand, trace_id: &str) -> Result<String, AppError> {
        let timeout = command.timeout().unwrap_or(self.default_timeout);
        debug!(trace_id = %trace_id, command = %command.display(), "running command");
        let raw = run_command_with_timeout(command.program(), command.args(), timeout, trace_id)?;
        interpret_output(&raw, &self.charsets, &command.display(), trace_id)
    }

    fn spawn_detached(&self, command: &HostCommand, trace_id: &str) -> Result<u32, AppError> {
        let mut child = Command::new(command.program())
            .args(command.args())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|err| {
                AppError::system(
                    format!("Failed to spawn {}: {err}", command.display()),
                    trace_id,
                )
            })?;

        // One probe only: a launch that already failed is reported, anything
        // else is "submitted, not confirmed".
        if let Ok(Some(status)) = child.try_wait() {
            if !status.success() {
                return Err(AppError::command(
                    format!(
                        "Detached command exited immediately with {:?}: {}",
                        status.code(),
                        command.display()
                    ),
                    trace_id,
                ));
            }
        }

        let pid = self.background.register(command.display(), child);
        info!(trace_id = %trace_id, pid, command = %command.display(), "detached command launched");
        Ok(pid)
    }

    fn background_tasks(&self) -> Vec<BackgroundTaskInfo> {
        self.background.snapshot()
    }

    fn reap_background(&self) -> usize {
        self.background.reap_finished()
    }
}

#[derive(Debug, Clone)]
pub struct RawOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub exit_code: Option<i32>,
}

pub fn run_command_with_timeout(
    program: &str,
    args: &[String],
    timeout: Duration,
    trace_id: &str,
) -> Result<RawOutput, AppError> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|err| AppError::system(format!("Failed to spawn {program}: {err}"), trace_id))?;

    // Drain stdout/stderr in parallel; a chatty child blocks once the pipe
    // buffer fills and would otherwise run into the timeout.
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| AppError::system("Failed to capture stdout", trace_id))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| AppError::system("Failed to capture stderr", trace_id))?;

    let stdout_handle = drain(Pipe::Out(stdout));
    let stderr_handle = drain(Pipe::Err(stderr));

    let start = Instant::now();
    let exit_code = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status.code(),
            Ok(None) => {
                if start.elapsed() > timeout {
                    let _ = child.kill();
                    let _ = child.wait();
                    let _ = stdout_handle.join();
                    let _ = stderr_handle.join();
                    return Err(AppError::command(
                        format!("{program} timed out after {}s", timeout.as_secs()),
                        trace_id,
                    ));
                }
                std::thread::sleep(Duration::from_millis(50));
            }
            Err(err) => {
                let _ = stdout_handle.join();
                let _ = stderr_handle.join();
                return Err(AppError::system(
                    format!("Failed to poll {program}: {err}"),
                    trace_id,
                ));
            }
        }
    };

    Ok(RawOutput {
        stdout: stdout_handle.join().unwrap_or_default(),
        stderr: stderr_handle.join().unwrap_or_default(),
        exit_code,
    })
}

enum Pipe {
    Out(ChildStdout),
    Err(ChildStderr),
}

fn drain(pipe: Pipe) -> JoinHandle<Vec<u8>> {
    std::thread::spawn(move || {
        let mut reader: Box<dyn Read + Send> = match pipe {
            Pipe::Out(stdout) => Box::new(stdout),
            Pipe::Err(stderr) => Box::new(stderr),
        };
        let mut buffer = Vec::<u8>::new();
        let mut temp = [0u8; 4096];
        loop {
            match reader.read(&mut temp) {
                Ok(0) => break,
                Ok(count) => buffer.extend_from_slice(&temp[..count]),
                Err(_) => break,
            }
        }
        buffer
    })
}

/// Applies the exit-code and stream-selection rules to a finished process.
pub fn interpret_output(
    raw: &RawOutput,
    charsets: &[Charset],
    command_display: &str,
    trace_id: &str,
) -> Result<String, AppError> {
    if raw.exit_code != Some(0) {
        let stderr = decode_bytes(&raw.stderr, charsets, trace_id)?;
        warn!(
            trace_id = %trace_id,
            command = %command_display,
            exit_code = ?raw.exit_code,
            stderr = %stderr.trim(),
            "command failed"
        );
        return Err(AppError::command(stderr.trim().to_string(), trace_id));
    }
    if raw.stdout.is_empty() {
        return decode_bytes(&raw.stderr, charsets, trace_id);
    }
    decode_bytes(&raw.stdout, charsets, trace_id)
}

pub fn decode_bytes(bytes: &[u8], charsets: &[Charset], trace_id: &str) -> Result<String, AppError> {
    if bytes.is_empty() {
        return Ok(String::new());
    }
    for charset in charsets {
        match charset.decode(bytes) {
            Some(text) => return Ok(text),
            None => debug!(trace_id = %trace_id, charset = charset.label(), "decode attempt failed"),
        }
    }
    let tried = charsets
        .iter()
        .map(|charset| charset.label())
        .collect::<Vec<_>>()
        .join(", ");
    Err(AppError::decode(
        format!("Output did not decode with any of: {tried}"),
        trace_id,
    ))
}
