//! Command model and executors.
//!
//! Each [`Command`] variant pairs typed parameters with two operations:
//!
//! - `validate(device)`: device-dependent pre-flight checks only
//! - `execute(device, ctx)`: the full side-effecting sequence
//!
//! Both return `Result<Checked>`: the outer `Result` carries fatal failures,
//! the inner [`Checked`] carries user-correctable ones. A validation error
//! stops the command where it was found. Nothing already done is undone.

/// Unwrap the fatal channel and return early on a validation failure.
macro_rules! try_checked {
    ($checked:expr) => {
        if let Err(err) = $checked? {
            return Ok(Err(err));
        }
    };
}

mod config;
mod hardware;
mod profiler;
mod vm;

pub use config::ConfigCommand;
pub use hardware::HwCommand;
pub use profiler::{PerfettoConfigSource, ProfilerCommand, ProfilerEvent};
pub use vm::VmCommand;

use crate::config::TorqConfig;
use crate::device::Device;
use crate::poll::Clock;
use crate::viewer::TraceViewer;
use serde::Serialize;
use std::io::Write;
use torq_common::{Checked, Result};
use tracing::info;

/// Collaborators shared by every executor for one invocation.
pub struct ExecContext<'a> {
    pub config: &'a TorqConfig,
    pub clock: &'a dyn Clock,
    pub viewer: &'a dyn TraceViewer,
    /// Sink for command payloads (listings, reports, rendered configs).
    pub out: &'a mut dyn Write,
}

/// A parsed torq invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "args", rename_all = "snake_case")]
pub enum Command {
    Profiler(ProfilerCommand),
    Hardware(HwCommand),
    Config(ConfigCommand),
    Vm(VmCommand),
}

impl Command {
    pub fn kind(&self) -> &'static str {
        match self {
            Command::Profiler(_) => "profiler",
            Command::Hardware(_) => "hw",
            Command::Config(_) => "config",
            Command::Vm(_) => "vm",
        }
    }

    pub fn validate(&self, device: &mut dyn Device) -> Result<Checked> {
        match self {
            Command::Profiler(cmd) => cmd.validate(device),
            Command::Hardware(cmd) => cmd.validate(device),
            Command::Config(_) | Command::Vm(_) => Ok(Ok(())),
        }
    }

    pub fn execute(&self, device: &mut dyn Device, ctx: &mut ExecContext<'_>) -> Result<Checked> {
        info!(command = self.kind(), "executing command");
        match self {
            Command::Profiler(cmd) => cmd.execute(device, ctx),
            Command::Hardware(cmd) => cmd.execute(device, ctx),
            Command::Config(cmd) => cmd.execute(ctx),
            Command::Vm(cmd) => cmd.execute(device),
        }
    }
}
