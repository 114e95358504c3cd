//! torq core library
//!
//! This library drives an Android device through adb:
//! - Configuration loading and validation
//! - Structured logging setup
//! - The device capability interface and its adb-backed implementation
//! - Perfetto trace configuration building
//! - Simpleperf to Gecko profile conversion
//! - Command model and executors (profiler, hw, config, vm)
//! - Trace viewer hand-off
//!
//! Argument parsing lives with the caller, which builds a [`command::Command`]
//! and hands it a [`device::Device`] plus an [`command::ExecContext`].

pub mod bridge;
pub mod command;
pub mod config;
pub mod device;
pub mod gecko;
pub mod hardware;
pub mod logging;
pub mod poll;
pub mod trace_config;
pub mod viewer;

pub use torq_common::{Checked, Error, Result, UserId, ValidationError};
