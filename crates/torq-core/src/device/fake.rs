//! In-memory [`Device`] for tests and dry runs.

use super::Device;
use crate::bridge::TraceProcess;
use crate::hardware::MemorySize;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use torq_common::{Checked, Error, Result, UserId, ValidationError};

/// Operations a [`FakeDevice`] records and can be scripted to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceOp {
    ResolveConnection,
    RootElevate,
    RemoveFile,
    PullFile,
    StartPerfettoTrace,
    StartSimpleperfTrace,
    /// Waiting on a trace started by this device.
    WaitTrace,
    GetAllUsers,
    GetCurrentUser,
    PerformUserSwitch,
    UserExists,
    AppExists,
    SimpleperfEventExists,
    StartPackage,
    ForceStopPackage,
    GetNumCpus,
    GetMaxNumCpus,
    GetMemory,
    GetMaxMemory,
    SetNumCpus,
    SetMemory,
    SetProp,
}

/// Trace handle returned by [`FakeDevice`]; finishes immediately.
#[derive(Debug, Default)]
pub struct FakeTrace {
    fail: bool,
}

impl TraceProcess for FakeTrace {
    fn wait(&mut self) -> Result<()> {
        if self.fail {
            return Err(scripted_failure(DeviceOp::WaitTrace));
        }
        Ok(())
    }
}

fn scripted_failure(op: DeviceOp) -> Error {
    Error::BridgeExit {
        command: format!("fake {op:?}"),
        code: Some(1),
        stderr: "scripted failure".to_string(),
    }
}

/// Device simulated in memory.
///
/// Every call is recorded in order. State (users, packages, hardware) is
/// plain public data so tests can arrange it directly.
#[derive(Debug)]
pub struct FakeDevice {
    pub serial: String,
    pub users: Vec<UserId>,
    pub current_user: UserId,
    pub packages: Vec<String>,
    pub simpleperf_events: Vec<String>,
    pub num_cpus: u32,
    pub max_num_cpus: u32,
    pub memory: MemorySize,
    pub max_memory: MemorySize,
    pub props: BTreeMap<String, String>,
    /// Returned by `resolve_connection` instead of resolving.
    pub connection_error: Option<ValidationError>,
    /// Every `(remote, local)` pull, in order.
    pub pulls: Vec<(String, PathBuf)>,
    /// Every config handed to `start_perfetto_trace`.
    pub perfetto_configs: Vec<String>,
    /// Every switch target, in order.
    pub switches: Vec<UserId>,
    resolved: bool,
    calls: Vec<DeviceOp>,
    failures: HashSet<DeviceOp>,
}

impl Default for FakeDevice {
    fn default() -> Self {
        Self::new("emulator-5554")
    }
}

impl FakeDevice {
    /// Two users (0 and 1), user 0 in the foreground, 8 cpus and 8G.
    pub fn new(serial: impl Into<String>) -> Self {
        Self {
            serial: serial.into(),
            users: vec![UserId(0), UserId(1)],
            current_user: UserId(0),
            packages: Vec::new(),
            simpleperf_events: vec!["cpu-cycles".to_string(), "instructions".to_string()],
            num_cpus: 8,
            max_num_cpus: 8,
            memory: MemorySize::from_gigabytes(8),
            max_memory: MemorySize::from_gigabytes(8),
            props: BTreeMap::new(),
            connection_error: None,
            pulls: Vec::new(),
            perfetto_configs: Vec::new(),
            switches: Vec::new(),
            resolved: false,
            calls: Vec::new(),
            failures: HashSet::new(),
        }
    }

    /// Make `op` fail fatally on every call.
    pub fn fail_on(mut self, op: DeviceOp) -> Self {
        self.failures.insert(op);
        self
    }

    pub fn calls(&self) -> &[DeviceOp] {
        &self.calls
    }

    pub fn count(&self, op: DeviceOp) -> usize {
        self.calls.iter().filter(|c| **c == op).count()
    }

    fn record(&mut self, op: DeviceOp) -> Result<()> {
        self.calls.push(op);
        if self.failures.contains(&op) {
            return Err(scripted_failure(op));
        }
        Ok(())
    }

    fn trace(&self) -> Box<dyn TraceProcess> {
        Box::new(FakeTrace {
            fail: self.failures.contains(&DeviceOp::WaitTrace),
        })
    }
}

impl Device for FakeDevice {
    fn serial(&self) -> Option<&str> {
        self.resolved.then_some(self.serial.as_str())
    }

    fn resolve_connection(&mut self) -> Result<Checked> {
        self.record(DeviceOp::ResolveConnection)?;
        if let Some(err) = &self.connection_error {
            return Ok(Err(err.clone()));
        }
        self.resolved = true;
        Ok(Ok(()))
    }

    fn root_elevate(&mut self) -> Result<()> {
        self.record(DeviceOp::RootElevate)
    }

    fn remove_file(&mut self, _remote: &str) -> Result<()> {
        self.record(DeviceOp::RemoveFile)
    }

    /// Records the pull and writes an empty artifact at `local`.
    fn pull_file(&mut self, remote: &str, local: &Path) -> Result<()> {
        self.record(DeviceOp::PullFile)?;
        std::fs::write(local, b"")?;
        self.pulls.push((remote.to_string(), local.to_path_buf()));
        Ok(())
    }

    fn start_perfetto_trace(&mut self, config: &str) -> Result<Box<dyn TraceProcess>> {
        self.record(DeviceOp::StartPerfettoTrace)?;
        self.perfetto_configs.push(config.to_string());
        Ok(self.trace())
    }

    fn start_simpleperf_trace(
        &mut self,
        _events: &[String],
        _duration_ms: u64,
    ) -> Result<Box<dyn TraceProcess>> {
        self.record(DeviceOp::StartSimpleperfTrace)?;
        Ok(self.trace())
    }

    fn get_all_users(&mut self) -> Result<Vec<UserId>> {
        self.record(DeviceOp::GetAllUsers)?;
        Ok(self.users.clone())
    }

    fn get_current_user(&mut self) -> Result<UserId> {
        self.record(DeviceOp::GetCurrentUser)?;
        Ok(self.current_user)
    }

    fn perform_user_switch(&mut self, user: UserId) -> Result<()> {
        self.record(DeviceOp::PerformUserSwitch)?;
        self.switches.push(user);
        self.current_user = user;
        Ok(())
    }

    fn user_exists(&mut self, user: UserId) -> Result<Checked> {
        self.record(DeviceOp::UserExists)?;
        if self.users.contains(&user) {
            return Ok(Ok(()));
        }
        Ok(Err(ValidationError::bare(format!(
            "User ID {user} does not exist on device with serial {}.",
            self.serial
        ))))
    }

    fn app_exists(&mut self, app: &str) -> Result<Checked> {
        self.record(DeviceOp::AppExists)?;
        if self.packages.iter().any(|p| p == app) {
            return Ok(Ok(()));
        }
        Ok(Err(ValidationError::bare(format!(
            "Package {app} does not exist on device with serial {}.",
            self.serial
        ))))
    }

    fn simpleperf_event_exists(&mut self, event: &str) -> Result<Checked> {
        self.record(DeviceOp::SimpleperfEventExists)?;
        if self.simpleperf_events.iter().any(|e| e == event) {
            return Ok(Ok(()));
        }
        Ok(Err(ValidationError::bare(format!(
            "Simpleperf event {event} is not supported on device with serial {}.",
            self.serial
        ))))
    }

    fn start_package(&mut self, _app: &str) -> Result<()> {
        self.record(DeviceOp::StartPackage)
    }

    fn force_stop_package(&mut self, _app: &str) -> Result<()> {
        self.record(DeviceOp::ForceStopPackage)
    }

    fn get_num_cpus(&mut self) -> Result<u32> {
        self.record(DeviceOp::GetNumCpus)?;
        Ok(self.num_cpus)
    }

    fn get_max_num_cpus(&mut self) -> Result<u32> {
        self.record(DeviceOp::GetMaxNumCpus)?;
        Ok(self.max_num_cpus)
    }

    fn get_memory(&mut self) -> Result<MemorySize> {
        self.record(DeviceOp::GetMemory)?;
        Ok(self.memory)
    }

    fn get_max_memory(&mut self) -> Result<MemorySize> {
        self.record(DeviceOp::GetMaxMemory)?;
        Ok(self.max_memory)
    }

    fn set_num_cpus(&mut self, num_cpus: u32) -> Result<()> {
        self.record(DeviceOp::SetNumCpus)?;
        self.num_cpus = num_cpus;
        Ok(())
    }

    fn set_memory(&mut self, memory: MemorySize) -> Result<()> {
        self.record(DeviceOp::SetMemory)?;
        self.memory = memory;
        Ok(())
    }

    fn set_prop(&mut self, name: &str, value: &str) -> Result<()> {
        self.record(DeviceOp::SetProp)?;
        self.props.insert(name.to_string(), value.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::HwProfile;

    #[test]
    fn unresolved_until_connection_resolved() {
        let mut device = FakeDevice::default();
        assert_eq!(device.serial(), None);
        device.resolve_connection().unwrap().unwrap();
        assert_eq!(device.serial(), Some("emulator-5554"));
    }

    #[test]
    fn scripted_connection_error_is_returned() {
        let mut device = FakeDevice::default();
        device.connection_error = Some(ValidationError::bare("There are currently no devices connected."));
        let err = device.resolve_connection().unwrap().unwrap_err();
        assert_eq!(err.message, "There are currently no devices connected.");
        assert_eq!(device.serial(), None);
    }

    #[test]
    fn scripted_failure_is_fatal_and_recorded() {
        let mut device = FakeDevice::default().fail_on(DeviceOp::RootElevate);
        assert!(device.root_elevate().is_err());
        assert_eq!(device.calls(), &[DeviceOp::RootElevate]);
    }

    #[test]
    fn wait_failure_surfaces_from_trace() {
        let mut device = FakeDevice::default().fail_on(DeviceOp::WaitTrace);
        let mut trace = device.start_perfetto_trace("duration_ms: 1").unwrap();
        assert!(trace.wait().is_err());
    }

    #[test]
    fn switching_updates_current_user() {
        let mut device = FakeDevice::default();
        device.perform_user_switch(UserId(1)).unwrap();
        assert_eq!(device.get_current_user().unwrap(), UserId(1));
        assert_eq!(device.switches, vec![UserId(1)]);
    }

    #[test]
    fn hw_profile_sets_cpus_then_memory() {
        let mut device = FakeDevice::default();
        device.set_hw_config(HwProfile::Seaturtle).unwrap();
        assert_eq!(device.calls(), &[DeviceOp::SetNumCpus, DeviceOp::SetMemory]);
        assert_eq!(device.num_cpus, 2);
        assert_eq!(device.memory, MemorySize::from_gigabytes(3));
    }

    #[test]
    fn hw_profile_stops_at_first_failure() {
        let mut device = FakeDevice::default().fail_on(DeviceOp::SetNumCpus);
        assert!(device.set_hw_config(HwProfile::Seahawk).is_err());
        assert_eq!(device.count(DeviceOp::SetMemory), 0);
    }
}
