//! Bridge executable runner.
//!
//! Every device interaction goes through an external bridge executable
//! (adb). This module runs it two ways:
//!
//! - [`Bridge::run`]: blocking, output captured, non-zero exit is fatal
//! - [`Bridge::spawn`]: non-blocking, returns a [`TraceProcess`] the caller
//!   must explicitly [`wait`](TraceProcess::wait) on
//!
//! Nothing here retries; every invocation is attempted once.

use std::io::Write;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::time::Instant;
use torq_common::{Error, Result};
use tracing::{debug, instrument, trace, warn};

/// Captured output of a completed bridge invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BridgeOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl BridgeOutput {
    pub fn from_stdout(stdout: impl Into<Vec<u8>>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: Vec::new(),
        }
    }

    /// Stdout as string (lossy UTF-8 conversion).
    pub fn stdout_str(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }
}

/// A running asynchronous capture on the device.
pub trait TraceProcess {
    /// Block until the process exits. Non-zero exit is fatal.
    fn wait(&mut self) -> Result<()>;
}

/// Transport used by the production device implementation.
pub trait Bridge {
    /// Run to completion and capture output.
    fn run(&self, args: &[String]) -> Result<BridgeOutput>;

    /// Start without waiting, optionally feeding `stdin`.
    fn spawn(&self, args: &[String], stdin: Option<&str>) -> Result<Box<dyn TraceProcess>>;
}

/// Bridge backed by the adb executable.
#[derive(Debug, Clone)]
pub struct AdbBridge {
    program: PathBuf,
}

impl AdbBridge {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn describe(&self, args: &[String]) -> String {
        let mut line = self.program.display().to_string();
        for arg in args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }

    fn spawn_error(&self, args: &[String], err: std::io::Error) -> Error {
        Error::BridgeSpawn {
            command: self.describe(args),
            message: err.to_string(),
        }
    }
}

impl Bridge for AdbBridge {
    #[instrument(level = "debug", skip(self), fields(program = %self.program.display()))]
    fn run(&self, args: &[String]) -> Result<BridgeOutput> {
        let start = Instant::now();
        let output = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| self.spawn_error(args, e))?;

        trace!(
            duration_ms = start.elapsed().as_millis() as u64,
            exit_code = ?output.status.code(),
            "bridge command finished"
        );

        if !output.status.success() {
            return Err(Error::BridgeExit {
                command: self.describe(args),
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(BridgeOutput {
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }

    #[instrument(level = "debug", skip(self, stdin), fields(program = %self.program.display()))]
    fn spawn(&self, args: &[String], stdin: Option<&str>) -> Result<Box<dyn TraceProcess>> {
        let mut command = Command::new(&self.program);
        command
            .args(args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::inherit())
            .stderr(Stdio::piped());

        let mut child = command.spawn().map_err(|e| self.spawn_error(args, e))?;

        if let Some(input) = stdin {
            if let Some(mut pipe) = child.stdin.take() {
                if let Err(e) = pipe.write_all(input.as_bytes()) {
                    drop(pipe);
                    warn!(pid = child.id(), error = %e, "stdin write failed; killing bridge process");
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(Error::Io(e));
                }
                // Dropping the pipe closes it so the reader sees EOF.
            }
        }

        debug!(pid = child.id(), "bridge process started");
        Ok(Box::new(ChildProcess {
            command: self.describe(args),
            child: Some(child),
        }))
    }
}

/// [`TraceProcess`] over a spawned child.
#[derive(Debug)]
pub struct ChildProcess {
    command: String,
    child: Option<Child>,
}

impl TraceProcess for ChildProcess {
    fn wait(&mut self) -> Result<()> {
        let Some(child) = self.child.take() else {
            return Ok(());
        };
        let output = child.wait_with_output()?;
        if !output.status.success() {
            return Err(Error::BridgeExit {
                command: self.command.clone(),
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}
