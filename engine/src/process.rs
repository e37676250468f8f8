//! External command execution.
//!
//! One OS process per call, no retries. A run fails when the process exits
//! non-zero or writes anything to stderr, and output beyond the configured
//! cap aborts the run with [`EngineError::OutputTooLarge`].

use std::fmt;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::Stdio;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::error::EngineError;

pub use linterhub_config::DEFAULT_MAX_OUTPUT_BYTES;

const READ_CHUNK_BYTES: usize = 8192;

/// A program, its arguments and the directory to run it in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    program: String,
    args: Vec<String>,
    cwd: Option<PathBuf>,
}

impl CommandLine {
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    #[must_use]
    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    #[must_use]
    pub fn cwd(&self) -> Option<&Path> {
        self.cwd.as_deref()
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            if arg.contains(char::is_whitespace) {
                write!(f, " \"{arg}\"")?;
            } else {
                write!(f, " {arg}")?;
            }
        }
        Ok(())
    }
}

pub type RunFut<'a> = Pin<Box<dyn Future<Output = Result<String, EngineError>> + Send + 'a>>;

/// Seam for executing engine commands; tests substitute a scripted runner.
pub trait CommandRunner: Send + Sync {
    /// Run `command` to completion and return its stdout.
    fn run<'a>(&'a self, command: &'a CommandLine, cancel: &'a CancellationToken) -> RunFut<'a>;
}

/// [`CommandRunner`] backed by real child processes.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    max_output_bytes: usize,
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_OUTPUT_BYTES)
    }
}

impl ProcessRunner {
    #[must_use]
    pub fn new(max_output_bytes: usize) -> Self {
        Self { max_output_bytes }
    }

    pub async fn execute(
        &self,
        command: &CommandLine,
        cancel: &CancellationToken,
    ) -> Result<String, EngineError> {
        let spawn_error = |source: io::Error| EngineError::Spawn {
            command: command.to_string(),
            source: Arc::new(source),
        };

        let program = resolve_program(&command.program).map_err(spawn_error)?;
        let mut cmd = Command::new(program);
        cmd.args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &command.cwd {
            cmd.current_dir(cwd);
        }

        tracing::debug!(command = %command, "Spawning engine process");
        let mut child = cmd.spawn().map_err(spawn_error)?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| spawn_error(io::Error::other("stdout was not captured")))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| spawn_error(io::Error::other("stderr was not captured")))?;

        let limit = self.max_output_bytes;
        let outcome = tokio::select! {
            () = cancel.cancelled() => Err(EngineError::Cancelled),
            res = async {
                let (out, err) = tokio::try_join!(
                    read_to_end_limited(stdout, limit, command),
                    read_to_end_limited(stderr, limit, command),
                )?;
                let status = child.wait().await.map_err(spawn_error)?;
                Ok((status, out, err))
            } => res,
        };

        let (status, out, err) = match outcome {
            Ok(done) => done,
            Err(e) => {
                // kill_on_drop would also reap it; be explicit so the engine stops now.
                let _ = child.start_kill();
                tracing::debug!(command = %command, "Engine process aborted: {e}");
                return Err(e);
            }
        };

        let stderr = String::from_utf8_lossy(&err).into_owned();
        if !status.success() || !stderr.is_empty() {
            return Err(EngineError::Process {
                command: command.to_string(),
                code: status.code(),
                stderr,
            });
        }

        Ok(String::from_utf8_lossy(&out).into_owned())
    }
}

impl CommandRunner for ProcessRunner {
    fn run<'a>(&'a self, command: &'a CommandLine, cancel: &'a CancellationToken) -> RunFut<'a> {
        Box::pin(self.execute(command, cancel))
    }
}

/// Bare program names are looked up on `PATH`; anything with a directory
/// component is used as given.
fn resolve_program(program: &str) -> io::Result<PathBuf> {
    let path = Path::new(program);
    if path.is_absolute() || path.components().count() > 1 {
        return Ok(path.to_path_buf());
    }
    which::which(program).map_err(|e| {
        io::Error::new(
            io::ErrorKind::NotFound,
            format!("{program} not found in PATH: {e}"),
        )
    })
}

/// A failed pipe read is an error, never an early end of output.
async fn read_to_end_limited<R: AsyncRead + Unpin>(
    mut reader: R,
    max_bytes: usize,
    command: &CommandLine,
) -> Result<Vec<u8>, EngineError> {
    let mut buf = Vec::new();
    let mut tmp = [0u8; READ_CHUNK_BYTES];

    loop {
        let n = match reader.read(&mut tmp).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                return Err(EngineError::Spawn {
                    command: command.to_string(),
                    source: Arc::new(e),
                });
            }
        };
        if buf.len() + n > max_bytes {
            return Err(EngineError::OutputTooLarge { limit: max_bytes });
        }
        buf.extend_from_slice(&tmp[..n]);
    }

    Ok(buf)
}
