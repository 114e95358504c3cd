//! Device capability interface.
//!
//! [`Device`] is the only channel through which commands touch the target.
//! Two implementations exist:
//!
//! - [`AdbDevice`]: production, every operation is a bridge invocation
//! - [`FakeDevice`]: in-memory, records calls and replays scripted state
//!
//! Expected, user-correctable conditions come back as
//! [`Checked`](torq_common::Checked) values. Bridge failures are fatal and
//! propagate through the outer `Result`.

mod adb;
mod fake;
pub mod parse;

pub use adb::AdbDevice;
pub use fake::{DeviceOp, FakeDevice, FakeTrace};

use crate::bridge::TraceProcess;
use crate::hardware::{HwProfile, MemorySize};
use std::path::Path;
use torq_common::{Checked, Result, UserId};

/// Operations torq performs against one target device.
///
/// Call order matters: the connection must be resolved before anything
/// else, and the trace must be started before its artifact is pulled.
pub trait Device {
    /// The resolved serial, once [`resolve_connection`](Device::resolve_connection) succeeded.
    fn serial(&self) -> Option<&str>;

    /// Pick the target among connected devices.
    ///
    /// An explicitly requested serial wins, then the serial environment
    /// variable, then the sole connected device.
    fn resolve_connection(&mut self) -> Result<Checked>;

    /// Restart adbd as root and block until the device reconnects.
    fn root_elevate(&mut self) -> Result<()>;

    fn remove_file(&mut self, remote: &str) -> Result<()>;
    fn pull_file(&mut self, remote: &str, local: &Path) -> Result<()>;

    /// Start perfetto with a text config. Returns without waiting.
    fn start_perfetto_trace(&mut self, config: &str) -> Result<Box<dyn TraceProcess>>;

    /// Start a system-wide simpleperf recording. Returns without waiting.
    fn start_simpleperf_trace(
        &mut self,
        events: &[String],
        duration_ms: u64,
    ) -> Result<Box<dyn TraceProcess>>;

    fn get_all_users(&mut self) -> Result<Vec<UserId>>;
    fn get_current_user(&mut self) -> Result<UserId>;

    /// Request a switch. Does not wait for it to finish.
    fn perform_user_switch(&mut self, user: UserId) -> Result<()>;

    fn user_exists(&mut self, user: UserId) -> Result<Checked>;
    fn app_exists(&mut self, app: &str) -> Result<Checked>;
    fn simpleperf_event_exists(&mut self, event: &str) -> Result<Checked>;

    fn start_package(&mut self, app: &str) -> Result<()>;
    fn force_stop_package(&mut self, app: &str) -> Result<()>;

    fn get_num_cpus(&mut self) -> Result<u32>;
    fn get_max_num_cpus(&mut self) -> Result<u32>;
    fn get_memory(&mut self) -> Result<MemorySize>;
    fn get_max_memory(&mut self) -> Result<MemorySize>;

    fn set_num_cpus(&mut self, num_cpus: u32) -> Result<()>;
    fn set_memory(&mut self, memory: MemorySize) -> Result<()>;
    fn set_prop(&mut self, name: &str, value: &str) -> Result<()>;

    /// Apply a named profile: cpus first, then memory. No rollback.
    fn set_hw_config(&mut self, profile: HwProfile) -> Result<()> {
        self.set_num_cpus(profile.num_cpus())?;
        self.set_memory(profile.memory())
    }
}
