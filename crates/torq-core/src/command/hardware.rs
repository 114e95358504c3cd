//! Hardware command: inspect or constrain cpu count and memory.

use super::ExecContext;
use crate::device::Device;
use crate::hardware::{HwProfile, MemorySize};
use serde::Serialize;
use std::io::Write;
use torq_common::{Checked, Result, ValidationError};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum HwCommand {
    /// Apply a named profile, or explicit cpu/memory limits.
    Set {
        profile: Option<HwProfile>,
        num_cpus: Option<u32>,
        memory: Option<MemorySize>,
    },
    /// Report the current cpu count and memory.
    Get,
    /// Report the named profiles.
    List,
}

impl HwCommand {
    fn requested(&self) -> (Option<u32>, Option<MemorySize>) {
        match self {
            HwCommand::Set {
                profile: Some(profile),
                ..
            } => (Some(profile.num_cpus()), Some(profile.memory())),
            HwCommand::Set {
                num_cpus, memory, ..
            } => (*num_cpus, *memory),
            HwCommand::Get | HwCommand::List => (None, None),
        }
    }

    /// Requested limits must fit the device. The first violation wins.
    pub fn validate(&self, device: &mut dyn Device) -> Result<Checked> {
        let (num_cpus, memory) = self.requested();
        if let Some(num_cpus) = num_cpus {
            let max = device.get_max_num_cpus()?;
            if num_cpus > max {
                return Ok(Err(ValidationError::bare(format!(
                    "The number of cpus requested is not available on the device. Requested: {num_cpus}, Available: {max}"
                ))));
            }
        }
        if let Some(memory) = memory {
            let max = device.get_max_memory()?;
            if memory > max {
                return Ok(Err(ValidationError::bare(format!(
                    "The amount of memory requested is not available on the device. Requested: {memory}, Available: {max}"
                ))));
            }
        }
        Ok(Ok(()))
    }

    pub fn execute(&self, device: &mut dyn Device, ctx: &mut ExecContext<'_>) -> Result<Checked> {
        if let HwCommand::List = self {
            for profile in HwProfile::ALL {
                writeln!(
                    ctx.out,
                    "{profile}: num_cpus={}, memory={}",
                    profile.num_cpus(),
                    profile.memory()
                )?;
            }
            return Ok(Ok(()));
        }

        try_checked!(device.resolve_connection());

        match self {
            HwCommand::Get => {
                let num_cpus = device.get_num_cpus()?;
                let memory = device.get_memory()?;
                writeln!(ctx.out, "num_cpus: {num_cpus}\nmemory: {memory}")?;
            }
            HwCommand::Set {
                profile,
                num_cpus,
                memory,
            } => {
                if profile.is_none() && num_cpus.is_none() && memory.is_none() {
                    return Ok(Err(ValidationError::suggest(
                        "Cannot set the hardware config without any values.",
                        "Specify a profile, --num-cpus or --memory.",
                    )));
                }
                try_checked!(self.validate(device));
                device.root_elevate()?;
                match profile {
                    Some(profile) => {
                        info!(%profile, "applying hardware profile");
                        device.set_hw_config(*profile)?;
                    }
                    None => {
                        if let Some(num_cpus) = num_cpus {
                            device.set_num_cpus(*num_cpus)?;
                        }
                        if let Some(memory) = memory {
                            device.set_memory(*memory)?;
                        }
                    }
                }
            }
            HwCommand::List => {}
        }
        Ok(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TorqConfig;
    use crate::device::{DeviceOp, FakeDevice};
    use crate::poll::ManualClock;
    use crate::viewer::RecordingViewer;

    fn run(command: &HwCommand, device: &mut FakeDevice) -> (Result<Checked>, String) {
        let config = TorqConfig::default();
        let clock = ManualClock::new();
        let viewer = RecordingViewer::default();
        let mut out = Vec::new();
        let result = {
            let mut ctx = ExecContext {
                config: &config,
                clock: &clock,
                viewer: &viewer,
                out: &mut out,
            };
            command.execute(device, &mut ctx)
        };
        (result, String::from_utf8(out).unwrap())
    }

    fn set(num_cpus: Option<u32>, memory: Option<u32>) -> HwCommand {
        HwCommand::Set {
            profile: None,
            num_cpus,
            memory: memory.map(MemorySize::from_gigabytes),
        }
    }

    #[test]
    fn too_many_cpus_is_reported_with_both_values() {
        let mut device = FakeDevice::default();
        device.max_num_cpus = 4;
        let err = set(Some(6), None).validate(&mut device).unwrap().unwrap_err();
        assert_eq!(
            err.message,
            "The number of cpus requested is not available on the device. Requested: 6, Available: 4"
        );
    }

    #[test]
    fn too_much_memory_is_reported() {
        let mut device = FakeDevice::default();
        device.max_memory = MemorySize::from_gigabytes(4);
        let err = set(None, Some(8)).validate(&mut device).unwrap().unwrap_err();
        assert_eq!(
            err.message,
            "The amount of memory requested is not available on the device. Requested: 8G, Available: 4G"
        );
    }

    #[test]
    fn cpu_failure_skips_memory_check() {
        let mut device = FakeDevice::default();
        device.max_num_cpus = 2;
        device.max_memory = MemorySize::from_gigabytes(1);
        let err = set(Some(4), Some(8)).validate(&mut device).unwrap().unwrap_err();
        assert!(err.message.contains("cpus"));
        assert_eq!(device.count(DeviceOp::GetMaxMemory), 0);
    }

    #[test]
    fn set_applies_in_sequence_after_root() {
        let mut device = FakeDevice::default();
        let (result, _) = run(&set(Some(2), Some(4)), &mut device);
        result.unwrap().unwrap();
        let calls = device.calls();
        assert_eq!(
            &calls[calls.len() - 3..],
            &[DeviceOp::RootElevate, DeviceOp::SetNumCpus, DeviceOp::SetMemory]
        );
        assert_eq!(device.num_cpus, 2);
    }

    #[test]
    fn partial_failure_is_not_rolled_back() {
        let mut device = FakeDevice::default().fail_on(DeviceOp::SetMemory);
        let (result, _) = run(&set(Some(2), Some(4)), &mut device);
        assert!(result.is_err());
        assert_eq!(device.num_cpus, 2);
        assert_eq!(device.memory, MemorySize::from_gigabytes(8));
    }

    #[test]
    fn profile_is_validated_against_device() {
        let mut device = FakeDevice::default();
        device.max_num_cpus = 2;
        let command = HwCommand::Set {
            profile: Some(HwProfile::Seahawk),
            num_cpus: None,
            memory: None,
        };
        let (result, _) = run(&command, &mut device);
        assert!(result.unwrap().is_err());
        assert_eq!(device.count(DeviceOp::RootElevate), 0);
    }

    #[test]
    fn empty_set_is_rejected() {
        let mut device = FakeDevice::default();
        let (result, _) = run(&set(None, None), &mut device);
        assert!(result.unwrap().is_err());
        assert_eq!(device.count(DeviceOp::RootElevate), 0);
    }

    #[test]
    fn get_reports_current_values() {
        let mut device = FakeDevice::default();
        device.num_cpus = 6;
        let (result, out) = run(&HwCommand::Get, &mut device);
        result.unwrap().unwrap();
        assert_eq!(out, "num_cpus: 6\nmemory: 8G\n");
    }

    #[test]
    fn list_needs_no_device() {
        let mut device = FakeDevice::default();
        let (result, out) = run(&HwCommand::List, &mut device);
        result.unwrap().unwrap();
        assert!(out.contains("seahawk: num_cpus=4, memory=4G"));
        assert!(out.contains("seaturtle"));
        assert!(device.calls().is_empty());
    }
}
