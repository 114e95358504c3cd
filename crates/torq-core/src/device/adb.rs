//! Production [`Device`] backed by the adb bridge.

use super::parse;
use super::Device;
use crate::bridge::{AdbBridge, Bridge, BridgeOutput, TraceProcess};
use crate::config::{DeviceConfig, TorqConfig};
use crate::hardware::MemorySize;
use crate::poll::{wait_until, Clock, PollPolicy, SystemClock};
use std::path::Path;
use torq_common::{Checked, Error, Result, UserId, ValidationError};
use tracing::{debug, info, instrument};

const CPU_ONLINE_PATH: &str = "/sys/devices/system/cpu/online";
const CPU_POSSIBLE_PATH: &str = "/sys/devices/system/cpu/possible";
const MEMINFO_PATH: &str = "/proc/meminfo";

/// Device reached through `adb -s <serial>`.
pub struct AdbDevice<B: Bridge = AdbBridge, C: Clock = SystemClock> {
    bridge: B,
    clock: C,
    paths: DeviceConfig,
    reconnect: PollPolicy,
    serial_env_var: String,
    env_serial: Option<String>,
    requested_serial: Option<String>,
    serial: Option<String>,
}

impl AdbDevice {
    /// Device using the configured adb executable and the wall clock.
    ///
    /// The serial environment variable is read once, here.
    pub fn new(config: &TorqConfig, requested_serial: Option<String>) -> Self {
        Self::with_parts(
            config,
            requested_serial,
            AdbBridge::new(config.adb_path.clone()),
            SystemClock,
        )
    }
}

impl<B: Bridge, C: Clock> AdbDevice<B, C> {
    pub fn with_parts(
        config: &TorqConfig,
        requested_serial: Option<String>,
        bridge: B,
        clock: C,
    ) -> Self {
        let env_serial = std::env::var(&config.serial_env_var)
            .ok()
            .filter(|s| !s.is_empty());
        Self {
            bridge,
            clock,
            paths: config.device.clone(),
            reconnect: PollPolicy::new(
                config.root.poll_interval(),
                config.root.reconnect_timeout(),
            ),
            serial_env_var: config.serial_env_var.clone(),
            env_serial,
            requested_serial,
            serial: None,
        }
    }

    /// Replace the serial taken from the environment.
    pub fn with_env_serial(mut self, serial: Option<String>) -> Self {
        self.env_serial = serial;
        self
    }

    pub fn bridge(&self) -> &B {
        &self.bridge
    }

    fn resolved(&self) -> Result<&str> {
        self.serial.as_deref().ok_or(Error::SerialUnresolved)
    }

    fn connected_devices(&self) -> Result<Vec<String>> {
        let output = self.bridge.run(&["devices".to_string()])?;
        Ok(parse::parse_devices(&output.stdout_str()))
    }

    /// `adb -s <serial> <args...>`
    fn serial_args(&self, args: &[&str]) -> Result<Vec<String>> {
        let serial = self.resolved()?;
        let mut full = vec!["-s".to_string(), serial.to_string()];
        full.extend(args.iter().map(|a| a.to_string()));
        Ok(full)
    }

    fn adb(&self, args: &[&str]) -> Result<BridgeOutput> {
        let args = self.serial_args(args)?;
        debug!(?args, "adb");
        self.bridge.run(&args)
    }

    fn shell(&self, command: &[&str]) -> Result<String> {
        let mut args = vec!["shell"];
        args.extend_from_slice(command);
        Ok(self.adb(&args)?.stdout_str())
    }

    fn cpu_count(&self, path: &str) -> Result<u32> {
        let cpus = parse::parse_cpu_list(&self.shell(&["cat", path])?)?;
        Ok(cpus.len() as u32)
    }

    fn mem_total(&self) -> Result<MemorySize> {
        let kb = parse::parse_mem_total_kb(&self.shell(&["cat", MEMINFO_PATH])?)?;
        Ok(MemorySize::from_kilobytes_ceil(kb))
    }
}

impl<B: Bridge, C: Clock> Device for AdbDevice<B, C> {
    fn serial(&self) -> Option<&str> {
        self.serial.as_deref()
    }

    #[instrument(level = "debug", skip(self))]
    fn resolve_connection(&mut self) -> Result<Checked> {
        let devices = self.connected_devices()?;

        if let Some(serial) = &self.requested_serial {
            if !devices.contains(serial) {
                return Ok(Err(ValidationError::bare(format!(
                    "Device with serial {serial} is not connected."
                ))));
            }
            self.serial = Some(serial.clone());
        } else if let Some(serial) = &self.env_serial {
            if !devices.contains(serial) {
                return Ok(Err(ValidationError::bare(format!(
                    "Device with serial {serial} is set as environment variable, {}, but is not connected.",
                    self.serial_env_var
                ))));
            }
            self.serial = Some(serial.clone());
        } else {
            match devices.as_slice() {
                [] => {
                    return Ok(Err(ValidationError::bare(
                        "There are currently no devices connected.",
                    )))
                }
                [only] => self.serial = Some(only.clone()),
                many => {
                    let mut suggestion = String::from(
                        "Run one of the following commands to choose one of the connected devices:",
                    );
                    for serial in many {
                        suggestion.push_str(&format!("\n\t torq --serial {serial}"));
                    }
                    return Ok(Err(ValidationError::suggest(
                        "There is more than one device currently connected.",
                        suggestion,
                    )));
                }
            }
        }

        info!(serial = ?self.serial, "resolved device");
        Ok(Ok(()))
    }

    #[instrument(level = "debug", skip(self))]
    fn root_elevate(&mut self) -> Result<()> {
        self.adb(&["root"])?;
        let serial = self.resolved()?.to_string();
        let reconnected = wait_until(&self.clock, self.reconnect, || {
            Ok(self.connected_devices()?.contains(&serial))
        })?;
        if !reconnected {
            return Err(Error::ReconnectTimeout { serial });
        }
        debug!(%serial, "device reconnected as root");
        Ok(())
    }

    fn remove_file(&mut self, remote: &str) -> Result<()> {
        self.shell(&["rm", "-f", remote]).map(drop)
    }

    fn pull_file(&mut self, remote: &str, local: &Path) -> Result<()> {
        let local = local.display().to_string();
        self.adb(&["pull", remote, local.as_str()]).map(drop)
    }

    fn start_perfetto_trace(&mut self, config: &str) -> Result<Box<dyn TraceProcess>> {
        let args = self.serial_args(&[
            "shell",
            "perfetto",
            "-c",
            "-",
            "--txt",
            "-o",
            self.paths.perfetto_trace_path.as_str(),
        ])?;
        debug!(?args, "starting perfetto");
        self.bridge.spawn(&args, Some(config))
    }

    fn start_simpleperf_trace(
        &mut self,
        events: &[String],
        duration_ms: u64,
    ) -> Result<Box<dyn TraceProcess>> {
        let events = events.join(",");
        let seconds = (duration_ms as f64 / 1000.0).to_string();
        let args = self.serial_args(&[
            "shell",
            "simpleperf",
            "record",
            "-a",
            "-e",
            events.as_str(),
            "--duration",
            seconds.as_str(),
            "-o",
            self.paths.simpleperf_data_path.as_str(),
        ])?;
        debug!(?args, "starting simpleperf");
        self.bridge.spawn(&args, None)
    }

    fn get_all_users(&mut self) -> Result<Vec<UserId>> {
        parse::parse_users(&self.shell(&["pm", "list", "users"])?)
    }

    fn get_current_user(&mut self) -> Result<UserId> {
        parse::parse_current_user(&self.shell(&["am", "get-current-user"])?)
    }

    fn perform_user_switch(&mut self, user: UserId) -> Result<()> {
        info!(%user, "switching user");
        self.shell(&["am", "switch-user", user.to_string().as_str()]).map(drop)
    }

    fn user_exists(&mut self, user: UserId) -> Result<Checked> {
        let users = self.get_all_users()?;
        if users.contains(&user) {
            return Ok(Ok(()));
        }
        let serial = self.resolved()?;
        let ids = users
            .iter()
            .map(UserId::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        Ok(Err(ValidationError::suggest(
            format!("User ID {user} does not exist on device with serial {serial}."),
            format!("Select from one of the following user IDs on device with serial {serial}: {ids}"),
        )))
    }

    fn app_exists(&mut self, app: &str) -> Result<Checked> {
        let packages = self.shell(&["pm", "list", "packages"])?;
        if parse::package_listed(&packages, app) {
            return Ok(Ok(()));
        }
        let serial = self.resolved()?;
        Ok(Err(ValidationError::bare(format!(
            "Package {app} does not exist on device with serial {serial}."
        ))))
    }

    fn simpleperf_event_exists(&mut self, event: &str) -> Result<Checked> {
        let listing = self.shell(&["simpleperf", "list"])?;
        if parse::simpleperf_event_listed(&listing, event) {
            return Ok(Ok(()));
        }
        let serial = self.resolved()?;
        Ok(Err(ValidationError::bare(format!(
            "Simpleperf event {event} is not supported on device with serial {serial}."
        ))))
    }

    fn start_package(&mut self, app: &str) -> Result<()> {
        self.shell(&[
            "monkey",
            "-p",
            app,
            "-c",
            "android.intent.category.LAUNCHER",
            "1",
        ])
        .map(drop)
    }

    fn force_stop_package(&mut self, app: &str) -> Result<()> {
        self.shell(&["am", "force-stop", app]).map(drop)
    }

    fn get_num_cpus(&mut self) -> Result<u32> {
        self.cpu_count(CPU_ONLINE_PATH)
    }

    fn get_max_num_cpus(&mut self) -> Result<u32> {
        self.cpu_count(CPU_POSSIBLE_PATH)
    }

    /// The pending memory limit if one is set, else the kernel's total.
    fn get_memory(&mut self) -> Result<MemorySize> {
        let prop = self.paths.memory_limit_prop.clone();
        let limit = self.shell(&["getprop", prop.as_str()])?;
        match limit.trim() {
            "" => self.mem_total(),
            value => value
                .parse()
                .map_err(|e| Error::unexpected_output(format!("getprop {prop}"), format!("{e}"))),
        }
    }

    fn get_max_memory(&mut self) -> Result<MemorySize> {
        self.mem_total()
    }

    /// Online the first `num_cpus` possible cpus and offline the rest.
    ///
    /// cpu0 cannot be hot-unplugged and is never touched.
    fn set_num_cpus(&mut self, num_cpus: u32) -> Result<()> {
        let possible = parse::parse_cpu_list(&self.shell(&["cat", CPU_POSSIBLE_PATH])?)?;
        for (index, cpu) in possible.iter().enumerate() {
            if *cpu == 0 {
                continue;
            }
            let online = if (index as u32) < num_cpus { 1 } else { 0 };
            let write = format!("echo {online} > /sys/devices/system/cpu/cpu{cpu}/online");
            self.shell(&[write.as_str()])?;
        }
        info!(num_cpus, "cpu count applied");
        Ok(())
    }

    fn set_memory(&mut self, memory: MemorySize) -> Result<()> {
        let prop = self.paths.memory_limit_prop.clone();
        self.set_prop(&prop, &memory.to_string())?;
        info!(%memory, "memory limit applied at next boot");
        Ok(())
    }

    fn set_prop(&mut self, name: &str, value: &str) -> Result<()> {
        self.shell(&["setprop", name, value]).map(drop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::poll::ManualClock;
    use std::cell::RefCell;
    use std::collections::VecDeque;

    /// Replays canned stdout in order and records every argument vector.
    #[derive(Default)]
    struct ScriptedBridge {
        replies: RefCell<VecDeque<Result<String>>>,
        /// Returned once `replies` is exhausted.
        fallback: Option<String>,
        calls: RefCell<Vec<Vec<String>>>,
    }

    impl ScriptedBridge {
        fn new(replies: &[&str]) -> Self {
            Self {
                replies: RefCell::new(replies.iter().map(|r| Ok(r.to_string())).collect()),
                ..Self::default()
            }
        }

        fn with_fallback(mut self, fallback: &str) -> Self {
            self.fallback = Some(fallback.to_string());
            self
        }

        fn calls(&self) -> Vec<Vec<String>> {
            self.calls.borrow().clone()
        }
    }

    struct Finished;

    impl TraceProcess for Finished {
        fn wait(&mut self) -> Result<()> {
            Ok(())
        }
    }

    impl Bridge for ScriptedBridge {
        fn run(&self, args: &[String]) -> Result<BridgeOutput> {
            self.calls.borrow_mut().push(args.to_vec());
            let reply = self.replies.borrow_mut().pop_front();
            match reply {
                Some(reply) => reply.map(BridgeOutput::from_stdout),
                None => Ok(BridgeOutput::from_stdout(
                    self.fallback.clone().unwrap_or_default(),
                )),
            }
        }

        fn spawn(&self, args: &[String], _stdin: Option<&str>) -> Result<Box<dyn TraceProcess>> {
            self.calls.borrow_mut().push(args.to_vec());
            Ok(Box::new(Finished))
        }
    }

    const ONE_DEVICE: &str = "List of devices attached\nemulator-5554\tdevice\n";
    const TWO_DEVICES: &str =
        "List of devices attached\nemulator-5554\tdevice\nemulator-5556\tdevice\n";
    const NO_DEVICES: &str = "List of devices attached\n\n";

    fn device(bridge: ScriptedBridge, requested: Option<&str>) -> AdbDevice<ScriptedBridge, ManualClock> {
        AdbDevice::with_parts(
            &TorqConfig::default(),
            requested.map(String::from),
            bridge,
            ManualClock::new(),
        )
        .with_env_serial(None)
    }

    fn resolved(bridge: ScriptedBridge) -> AdbDevice<ScriptedBridge, ManualClock> {
        let mut scripted = ScriptedBridge::new(&[ONE_DEVICE]);
        scripted.replies.borrow_mut().extend(bridge.replies.take());
        scripted.fallback = bridge.fallback;
        let mut device = device(scripted, None);
        device.resolve_connection().unwrap().unwrap();
        device
    }

    #[test]
    fn requested_serial_must_be_connected() {
        let mut device = device(ScriptedBridge::new(&[ONE_DEVICE]), Some("R58M"));
        let err = device.resolve_connection().unwrap().unwrap_err();
        assert_eq!(err.message, "Device with serial R58M is not connected.");
        assert_eq!(err.suggestion, None);
        assert_eq!(device.serial(), None);
        assert_eq!(device.bridge().calls().len(), 1);
    }

    #[test]
    fn requested_serial_is_selected() {
        let mut device = device(ScriptedBridge::new(&[TWO_DEVICES]), Some("emulator-5556"));
        device.resolve_connection().unwrap().unwrap();
        assert_eq!(device.serial(), Some("emulator-5556"));
    }

    #[test]
    fn env_serial_must_be_connected() {
        let mut device = device(ScriptedBridge::new(&[ONE_DEVICE]), None)
            .with_env_serial(Some("R58M".to_string()));
        let err = device.resolve_connection().unwrap().unwrap_err();
        assert_eq!(
            err.message,
            "Device with serial R58M is set as environment variable, ANDROID_SERIAL, but is not connected."
        );
    }

    #[test]
    fn env_serial_is_selected_among_many() {
        let mut device = device(ScriptedBridge::new(&[TWO_DEVICES]), None)
            .with_env_serial(Some("emulator-5556".to_string()));
        device.resolve_connection().unwrap().unwrap();
        assert_eq!(device.serial(), Some("emulator-5556"));
    }

    #[test]
    fn sole_device_is_auto_selected() {
        let mut device = device(ScriptedBridge::new(&[ONE_DEVICE]), None);
        device.resolve_connection().unwrap().unwrap();
        assert_eq!(device.serial(), Some("emulator-5554"));
    }

    #[test]
    fn no_devices_connected() {
        let mut device = device(ScriptedBridge::new(&[NO_DEVICES]), None);
        let err = device.resolve_connection().unwrap().unwrap_err();
        assert_eq!(err.message, "There are currently no devices connected.");
    }

    #[test]
    fn many_devices_lists_each_in_order() {
        let mut device = device(ScriptedBridge::new(&[TWO_DEVICES]), None);
        let err = device.resolve_connection().unwrap().unwrap_err();
        assert_eq!(err.message, "There is more than one device currently connected.");
        assert_eq!(
            err.suggestion.as_deref(),
            Some(
                "Run one of the following commands to choose one of the connected devices:\
                 \n\t torq --serial emulator-5554\
                 \n\t torq --serial emulator-5556"
            )
        );
    }

    #[test]
    fn commands_before_resolution_are_rejected() {
        let mut device = device(ScriptedBridge::new(&[]), None);
        assert!(matches!(device.get_current_user(), Err(Error::SerialUnresolved)));
        assert!(device.bridge().calls().is_empty());
    }

    #[test]
    fn root_waits_for_reconnection() {
        let mut device = resolved(ScriptedBridge::new(&["restarting adbd as root\n", NO_DEVICES, NO_DEVICES, ONE_DEVICE]));
        device.root_elevate().unwrap();
        assert_eq!(device.clock.elapsed().as_millis(), 1000);
        let calls = device.bridge().calls();
        assert_eq!(calls[1], vec!["-s", "emulator-5554", "root"]);
    }

    #[test]
    fn root_times_out_after_deadline() {
        let mut device = resolved(ScriptedBridge::new(&["restarting adbd as root\n"]).with_fallback(NO_DEVICES));
        let err = device.root_elevate().unwrap_err();
        assert_eq!(
            err.to_string(),
            "Device with serial emulator-5554 took too long to reconnect after being rooted."
        );
        assert_eq!(device.clock.elapsed().as_secs(), 5);
        // resolve + root + 11 polls at 0.5 s over 5 s
        assert_eq!(device.bridge().calls().len(), 13);
    }

    #[test]
    fn users_and_current_user() {
        let mut device = resolved(ScriptedBridge::new(&[
            "Users:\n\tUserInfo{0:Driver:813} running\n\tUserInfo{1:Guest:410}\n",
            "1\n",
        ]));
        assert_eq!(device.get_all_users().unwrap(), vec![UserId(0), UserId(1)]);
        assert_eq!(device.get_current_user().unwrap(), UserId(1));
        let calls = device.bridge().calls();
        assert_eq!(calls[1], vec!["-s", "emulator-5554", "shell", "pm", "list", "users"]);
        assert_eq!(calls[2], vec!["-s", "emulator-5554", "shell", "am", "get-current-user"]);
    }

    #[test]
    fn missing_user_suggests_existing_ids() {
        let mut device = resolved(ScriptedBridge::new(&[
            "Users:\n\tUserInfo{0:Driver:813} running\n\tUserInfo{1:Guest:410}\n",
        ]));
        let err = device.user_exists(UserId(3)).unwrap().unwrap_err();
        assert_eq!(err.message, "User ID 3 does not exist on device with serial emulator-5554.");
        assert_eq!(
            err.suggestion.as_deref(),
            Some("Select from one of the following user IDs on device with serial emulator-5554: 0, 1")
        );
    }

    #[test]
    fn perfetto_trace_reads_config_from_stdin() {
        let mut device = resolved(ScriptedBridge::new(&[]));
        let mut trace = device.start_perfetto_trace("duration_ms: 1000\n").unwrap();
        trace.wait().unwrap();
        let calls = device.bridge().calls();
        assert_eq!(
            calls[1],
            vec![
                "-s",
                "emulator-5554",
                "shell",
                "perfetto",
                "-c",
                "-",
                "--txt",
                "-o",
                "/data/misc/perfetto-traces/trace.perfetto-trace"
            ]
        );
    }

    #[test]
    fn simpleperf_duration_in_seconds() {
        let mut device = resolved(ScriptedBridge::new(&[]));
        let events = vec!["cpu-cycles".to_string(), "instructions".to_string()];
        device.start_simpleperf_trace(&events, 1500).unwrap();
        let call = &device.bridge().calls()[1];
        assert!(call.windows(2).any(|w| w == ["-e", "cpu-cycles,instructions"]));
        assert!(call.windows(2).any(|w| w == ["--duration", "1.5"]));
    }

    #[test]
    fn hardware_queries() {
        let mut device = resolved(ScriptedBridge::new(&[
            "0-3\n",
            "0-7\n",
            "\n",
            "MemTotal:        3884476 kB\n",
            "MemTotal:        7884476 kB\n",
        ]));
        assert_eq!(device.get_num_cpus().unwrap(), 4);
        assert_eq!(device.get_max_num_cpus().unwrap(), 8);
        assert_eq!(device.get_memory().unwrap(), MemorySize::from_gigabytes(4));
        assert_eq!(device.get_max_memory().unwrap(), MemorySize::from_gigabytes(8));
    }

    #[test]
    fn pending_memory_limit_is_reported() {
        let mut device = resolved(ScriptedBridge::new(&["3G\n"]));
        assert_eq!(device.get_memory().unwrap(), MemorySize::from_gigabytes(3));
    }

    #[test]
    fn set_num_cpus_toggles_all_but_cpu0() {
        let mut device = resolved(ScriptedBridge::new(&["0-3\n"]));
        device.set_num_cpus(2).unwrap();
        let writes: Vec<String> = device.bridge().calls()[2..]
            .iter()
            .map(|c| c[3].clone())
            .collect();
        assert_eq!(
            writes,
            vec![
                "echo 1 > /sys/devices/system/cpu/cpu1/online",
                "echo 0 > /sys/devices/system/cpu/cpu2/online",
                "echo 0 > /sys/devices/system/cpu/cpu3/online",
            ]
        );
    }

    #[test]
    fn set_memory_writes_limit_prop() {
        let mut device = resolved(ScriptedBridge::new(&[]));
        device.set_memory(MemorySize::from_gigabytes(4)).unwrap();
        assert_eq!(
            device.bridge().calls()[1],
            vec!["-s", "emulator-5554", "shell", "setprop", "persist.sys.torq.mem_limit", "4G"]
        );
    }

    #[test]
    fn bridge_failure_is_fatal() {
        let bridge = ScriptedBridge::new(&[ONE_DEVICE]);
        bridge.replies.borrow_mut().push_back(Err(Error::BridgeExit {
            command: "adb pull".into(),
            code: Some(1),
            stderr: "remote object does not exist".into(),
        }));
        let mut device = device(bridge, None);
        device.resolve_connection().unwrap().unwrap();
        let err = device
            .pull_file("/data/misc/perfetto-traces/trace.perfetto-trace", Path::new("/tmp/t"))
            .unwrap_err();
        assert_eq!(err.code(), 21);
    }
}
