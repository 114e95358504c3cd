//! Profiler command: multi-run trace capture.
//!
//! # Sequence
//!
//! 1. Local argument checks
//! 2. Connection resolution and device pre-flight ([`ProfilerCommand::validate`])
//! 3. Root elevation
//! 4. Stale on-device artifact removal
//! 5. Trace config construction and ftrace edits
//! 6. User-switch precondition, then the switch to `from_user` if needed
//! 7. Runs, each: start trace, trigger, wait, pull, and for simpleperf
//!    the optional Gecko conversion
//! 8. Switch back to the original user
//! 9. Viewer hand-off of the last perfetto artifact
//!
//! Any failure stops the sequence where it happened.

use super::ExecContext;
use crate::bridge::TraceProcess;
use crate::config::TorqConfig;
use crate::device::Device;
use crate::gecko::GeckoConverter;
use crate::logging::generate_run_id;
use crate::trace_config::{PredefinedConfig, ProfilerKind, TraceConfig};
use serde::Serialize;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use torq_common::{Checked, Error, Result, UserId, ValidationError};
use tracing::{debug, info, info_span};

pub const DEFAULT_DUR_MS: u64 = 10_000;

/// What a run captures.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProfilerEvent {
    #[default]
    Custom,
    UserSwitch,
    AppStartup,
}

/// Where the perfetto config comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PerfettoConfigSource {
    Predefined(PredefinedConfig),
    /// Text-proto file used verbatim.
    File(PathBuf),
}

impl Default for PerfettoConfigSource {
    fn default() -> Self {
        PerfettoConfigSource::Predefined(PredefinedConfig::Default)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProfilerCommand {
    pub event: ProfilerEvent,
    pub profiler: ProfilerKind,
    pub out_dir: PathBuf,
    pub dur_ms: Option<u64>,
    pub app: Option<String>,
    pub runs: u32,
    pub simpleperf_events: Vec<String>,
    pub perfetto_config: PerfettoConfigSource,
    pub between_dur_ms: u64,
    pub ui: bool,
    pub excluded_ftrace_events: Vec<String>,
    pub included_ftrace_events: Vec<String>,
    pub from_user: Option<UserId>,
    pub to_user: Option<UserId>,
    /// Simpleperf scripts directory; overrides `simpleperf.scripts_path`.
    pub scripts_path: Option<PathBuf>,
    /// Symbols directory; overrides `simpleperf.symbols_path`.
    pub symbols: Option<PathBuf>,
}

impl Default for ProfilerCommand {
    fn default() -> Self {
        Self {
            event: ProfilerEvent::Custom,
            profiler: ProfilerKind::Perfetto,
            out_dir: PathBuf::from("."),
            dur_ms: Some(DEFAULT_DUR_MS),
            app: None,
            runs: 1,
            simpleperf_events: vec!["cpu-cycles".to_string()],
            perfetto_config: PerfettoConfigSource::default(),
            between_dur_ms: DEFAULT_DUR_MS,
            ui: false,
            excluded_ftrace_events: Vec::new(),
            included_ftrace_events: Vec::new(),
            from_user: None,
            to_user: None,
            scripts_path: None,
            symbols: None,
        }
    }
}

impl ProfilerCommand {
    /// Device pre-flight: the app, simpleperf events and users must exist.
    pub fn validate(&self, device: &mut dyn Device) -> Result<Checked> {
        if let Some(app) = &self.app {
            try_checked!(device.app_exists(app));
        }
        if self.profiler == ProfilerKind::Simpleperf {
            for event in &self.simpleperf_events {
                try_checked!(device.simpleperf_event_exists(event));
            }
        }
        if let Some(user) = self.from_user {
            try_checked!(device.user_exists(user));
        }
        if let Some(user) = self.to_user {
            try_checked!(device.user_exists(user));
        }
        Ok(Ok(()))
    }

    /// Argument combinations that need no device to reject.
    fn check_arguments(&self) -> Checked {
        let user_switch = self.event == ProfilerEvent::UserSwitch;
        let app_startup = self.event == ProfilerEvent::AppStartup;

        if let (Some(user), false) = (self.from_user, user_switch) {
            return Err(ValidationError::suggest(
                "Command is invalid because --from-user is passed, but --event is not set to user-switch.",
                format!("Set --event user-switch --from-user {user} to perform a user-switch from user {user}."),
            ));
        }
        if let (Some(user), false) = (self.to_user, user_switch) {
            return Err(ValidationError::suggest(
                "Command is invalid because --to-user is passed, but --event is not set to user-switch.",
                format!("Set --event user-switch --to-user {user} to perform a user-switch to user {user}."),
            ));
        }
        if user_switch && self.to_user.is_none() {
            return Err(ValidationError::suggest(
                "Command is invalid because --to-user is not passed.",
                "Set --event user-switch --to-user <user-id> to perform a user-switch.",
            ));
        }
        if self.app.is_some() && !app_startup {
            return Err(ValidationError::suggest(
                "Command is invalid because --app is passed and --event is not set to app-startup.",
                "To profile an app startup run: torq --event app-startup --app <package-name>",
            ));
        }
        if app_startup && self.app.is_none() {
            return Err(ValidationError::suggest(
                "Command is invalid because --app is not passed.",
                "Set --event app-startup --app <package> to perform an app-startup.",
            ));
        }
        if self.runs == 0 {
            return Err(ValidationError::bare(
                "Command is invalid because --runs cannot be set to a value smaller than 1.",
            ));
        }
        if self.runs > 1 && self.ui {
            return Err(ValidationError::suggest(
                "Command is invalid because --ui cannot be passed if --runs is set to a value greater than 1.",
                format!("Set torq -r {} --no-ui to perform {} runs.", self.runs, self.runs),
            ));
        }
        Ok(())
    }

    pub fn execute(&self, device: &mut dyn Device, ctx: &mut ExecContext<'_>) -> Result<Checked> {
        if let Err(err) = self.check_arguments() {
            return Ok(Err(err));
        }
        let converter = match self.gecko_converter(ctx.config) {
            Ok(converter) => converter,
            Err(err) => return Ok(Err(err)),
        };
        let span = info_span!("profiler", run_id = %generate_run_id(), event = ?self.event);
        let _guard = span.enter();

        try_checked!(device.resolve_connection());
        try_checked!(self.validate(device));
        let serial = device.serial().ok_or(Error::SerialUnresolved)?.to_string();

        device.root_elevate()?;

        let remote = match self.profiler {
            ProfilerKind::Perfetto => ctx.config.device.perfetto_trace_path.clone(),
            ProfilerKind::Simpleperf => ctx.config.device.simpleperf_data_path.clone(),
        };
        device.remove_file(&remote)?;

        let trace_text = match self.build_trace_config()? {
            Ok(text) => text,
            Err(err) => return Ok(Err(err)),
        };

        let original_user = match self.event {
            ProfilerEvent::UserSwitch => {
                let current = device.get_current_user()?;
                if let Err(err) = self.check_user_switch(current, &serial) {
                    return Ok(Err(err));
                }
                Some(current)
            }
            _ => None,
        };

        std::fs::create_dir_all(&self.out_dir)?;
        let stamp = chrono::Local::now().format("%Y-%m-%d-%H-%M-%S").to_string();
        let mut artifacts = Vec::with_capacity(self.runs as usize);

        if let (Some(from_user), Some(original)) = (self.from_user, original_user) {
            if from_user != original {
                info!(user = %from_user, "switching to starting user");
                device.perform_user_switch(from_user)?;
            }
        }

        for run in 1..=self.runs {
            info!(%serial, run, runs = self.runs, "starting run");
            let mut trace = self.start_run(device, &trace_text)?;
            trace.wait()?;

            let local = self.out_dir.join(self.artifact_name(&stamp, run));
            device.pull_file(&remote, &local)?;
            info!(run, path = %local.display(), "artifact pulled");
            if let Some(converter) = &converter {
                let gecko = converter.convert(&local)?;
                info!(run, path = %gecko.display(), "gecko profile written");
                artifacts.push(local);
                artifacts.push(gecko);
            } else {
                artifacts.push(local);
            }

            if run < self.runs {
                debug!(between_dur_ms = self.between_dur_ms, "waiting before next run");
                ctx.clock.sleep(Duration::from_millis(self.between_dur_ms));
            }
        }

        if let Some(original) = original_user {
            if device.get_current_user()? != original {
                info!(user = %original, "switching back to original user");
                device.perform_user_switch(original)?;
            }
        }

        for artifact in &artifacts {
            writeln!(ctx.out, "{}", artifact.display())?;
        }

        if self.ui && self.profiler == ProfilerKind::Perfetto {
            if let Some(last) = artifacts.last() {
                ctx.viewer.open(last)?;
            }
        }
        Ok(Ok(()))
    }

    /// Gecko conversion for simpleperf runs, when a scripts directory is known.
    fn gecko_converter(
        &self,
        config: &TorqConfig,
    ) -> std::result::Result<Option<GeckoConverter>, ValidationError> {
        if self.profiler != ProfilerKind::Simpleperf {
            return Ok(None);
        }
        let Some(scripts) = self.scripts_path.as_ref().or(config.simpleperf.scripts_path.as_ref())
        else {
            return Ok(None);
        };
        let symbols = self.symbols.as_ref().or(config.simpleperf.symbols_path.as_ref());
        let converter = GeckoConverter::new(scripts, symbols.map(PathBuf::as_path));
        converter.check()?;
        Ok(Some(converter))
    }

    /// Text handed to perfetto; empty for simpleperf, whose events are flags.
    fn build_trace_config(&self) -> Result<std::result::Result<String, ValidationError>> {
        let has_edits =
            !self.excluded_ftrace_events.is_empty() || !self.included_ftrace_events.is_empty();

        let mut config = match &self.perfetto_config {
            PerfettoConfigSource::File(path) => {
                if has_edits {
                    return Ok(Err(ValidationError::suggest(
                        format!(
                            "Cannot edit ftrace events of the custom config file {}.",
                            path.display()
                        ),
                        "Edit the ftrace events in the file directly, or use a predefined config.",
                    )));
                }
                return Ok(Ok(std::fs::read_to_string(path)?));
            }
            PerfettoConfigSource::Predefined(PredefinedConfig::Default) => {
                TraceConfig::default_config(self.profiler, self.dur_ms)?
            }
            PerfettoConfigSource::Predefined(preset) => {
                TraceConfig::predefined(*preset, self.dur_ms)?
            }
        };

        if let Err(err) =
            config.apply_edits(&self.excluded_ftrace_events, &self.included_ftrace_events)
        {
            return Ok(Err(err));
        }
        match self.profiler {
            ProfilerKind::Perfetto => Ok(Ok(config.render())),
            ProfilerKind::Simpleperf => Ok(Ok(String::new())),
        }
    }

    fn check_user_switch(&self, current: UserId, serial: &str) -> Checked {
        let Some(to_user) = self.to_user else {
            return Ok(());
        };
        let conflict = match self.from_user {
            Some(from_user) => from_user == to_user,
            None => current == to_user,
        };
        if conflict {
            return Err(ValidationError::suggest(
                format!(
                    "Cannot perform user-switch to user {to_user} because the current user on device {serial} is already {to_user}."
                ),
                "Choose a --to-user ID that is different than the --from-user ID.",
            ));
        }
        Ok(())
    }

    /// Start capture and trigger the event.
    fn start_run(&self, device: &mut dyn Device, trace_text: &str) -> Result<Box<dyn TraceProcess>> {
        match self.event {
            ProfilerEvent::Custom => self.start_trace(device, trace_text),
            ProfilerEvent::UserSwitch => {
                let to_user = self.to_user.ok_or_else(|| {
                    Error::Config("user-switch event without a target user".into())
                })?;
                let trace = self.start_trace(device, trace_text)?;
                info!(user = %to_user, "triggering user switch");
                device.perform_user_switch(to_user)?;
                Ok(trace)
            }
            ProfilerEvent::AppStartup => {
                let app = self
                    .app
                    .as_deref()
                    .ok_or_else(|| Error::Config("app-startup event without an app".into()))?;
                device.force_stop_package(app)?;
                let trace = self.start_trace(device, trace_text)?;
                info!(app, "launching app");
                device.start_package(app)?;
                Ok(trace)
            }
        }
    }

    fn start_trace(&self, device: &mut dyn Device, trace_text: &str) -> Result<Box<dyn TraceProcess>> {
        match self.profiler {
            ProfilerKind::Perfetto => device.start_perfetto_trace(trace_text),
            ProfilerKind::Simpleperf => {
                let duration_ms = self.dur_ms.ok_or(Error::MissingDuration)?;
                device.start_simpleperf_trace(&self.simpleperf_events, duration_ms)
            }
        }
    }

    /// `<stem>-<timestamp>[-run<k>].<ext>`; the run suffix only for multi-run captures.
    fn artifact_name(&self, stamp: &str, run: u32) -> String {
        let stem = match self.profiler {
            ProfilerKind::Perfetto => "trace",
            ProfilerKind::Simpleperf => "perf",
        };
        let suffix = if self.runs > 1 {
            format!("-run{run}")
        } else {
            String::new()
        };
        format!("{stem}-{stamp}{suffix}.{}", self.profiler.extension())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TorqConfig;
    use crate::device::{DeviceOp, FakeDevice};
    use crate::poll::ManualClock;
    use crate::viewer::RecordingViewer;
    use tempfile::TempDir;

    struct Harness {
        config: TorqConfig,
        clock: ManualClock,
        viewer: RecordingViewer,
        out: Vec<u8>,
        dir: TempDir,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                config: TorqConfig::default(),
                clock: ManualClock::new(),
                viewer: RecordingViewer::default(),
                out: Vec::new(),
                dir: tempfile::tempdir().expect("tempdir"),
            }
        }

        fn command(&self) -> ProfilerCommand {
            ProfilerCommand {
                out_dir: self.dir.path().to_path_buf(),
                dur_ms: Some(1000),
                ..ProfilerCommand::default()
            }
        }

        fn run(&mut self, command: &ProfilerCommand, device: &mut FakeDevice) -> Result<Checked> {
            let mut ctx = ExecContext {
                config: &self.config,
                clock: &self.clock,
                viewer: &self.viewer,
                out: &mut self.out,
            };
            command.execute(device, &mut ctx)
        }
    }

    #[test]
    fn sequence_for_a_single_custom_run() {
        let mut harness = Harness::new();
        let mut device = FakeDevice::default();
        let command = harness.command();

        harness.run(&command, &mut device).unwrap().unwrap();

        assert_eq!(
            device.calls(),
            &[
                DeviceOp::ResolveConnection,
                DeviceOp::RootElevate,
                DeviceOp::RemoveFile,
                DeviceOp::StartPerfettoTrace,
                DeviceOp::PullFile,
            ]
        );
        assert!(device.perfetto_configs[0].contains("duration_ms: 1000"));
        assert_eq!(harness.clock.sleep_count(), 0);
    }

    #[test]
    fn runs_sleep_between_but_not_after() {
        let mut harness = Harness::new();
        let mut device = FakeDevice::default();
        let command = ProfilerCommand {
            runs: 3,
            between_dur_ms: 2000,
            ..harness.command()
        };

        harness.run(&command, &mut device).unwrap().unwrap();

        assert_eq!(device.count(DeviceOp::PullFile), 3);
        assert_eq!(harness.clock.elapsed(), Duration::from_secs(4));
        let names: Vec<String> = device
            .pulls
            .iter()
            .map(|(_, local)| local.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert!(names[0].starts_with("trace-") && names[0].ends_with("-run1.perfetto-trace"));
        assert!(names[2].ends_with("-run3.perfetto-trace"));
    }

    #[test]
    fn zero_runs_rejected_before_device_contact() {
        let mut harness = Harness::new();
        let mut device = FakeDevice::default();
        let command = ProfilerCommand {
            runs: 0,
            ..harness.command()
        };
        assert!(harness.run(&command, &mut device).unwrap().is_err());
        assert!(device.calls().is_empty());
    }

    #[test]
    fn custom_file_is_used_verbatim() {
        let mut harness = Harness::new();
        let path = harness.dir.path().join("custom.pbtxt");
        std::fs::write(&path, "duration_ms: 42\n").unwrap();
        let mut device = FakeDevice::default();
        let command = ProfilerCommand {
            perfetto_config: PerfettoConfigSource::File(path),
            ..harness.command()
        };

        harness.run(&command, &mut device).unwrap().unwrap();
        assert_eq!(device.perfetto_configs, vec!["duration_ms: 42\n".to_string()]);
    }

    #[test]
    fn custom_file_rejects_ftrace_edits() {
        let mut harness = Harness::new();
        let mut device = FakeDevice::default();
        let command = ProfilerCommand {
            perfetto_config: PerfettoConfigSource::File(harness.dir.path().join("custom.pbtxt")),
            excluded_ftrace_events: vec!["power/cpu_idle".to_string()],
            ..harness.command()
        };

        let err = harness.run(&command, &mut device).unwrap().unwrap_err();
        assert!(err.message.contains("custom config file"));
        assert_eq!(device.count(DeviceOp::StartPerfettoTrace), 0);
    }

    #[test]
    fn simpleperf_checks_events_and_skips_viewer() {
        let mut harness = Harness::new();
        let mut device = FakeDevice::default();
        let command = ProfilerCommand {
            profiler: ProfilerKind::Simpleperf,
            ui: true,
            ..harness.command()
        };

        harness.run(&command, &mut device).unwrap().unwrap();
        assert_eq!(device.count(DeviceOp::SimpleperfEventExists), 1);
        assert_eq!(device.count(DeviceOp::StartSimpleperfTrace), 1);
        assert_eq!(device.pulls[0].0, "/data/local/tmp/perf.data");
        assert!(harness.viewer.opened().is_empty());
    }

    #[test]
    fn unsupported_simpleperf_event_is_validation_error() {
        let mut harness = Harness::new();
        let mut device = FakeDevice::default();
        let command = ProfilerCommand {
            profiler: ProfilerKind::Simpleperf,
            simpleperf_events: vec!["bogus-event".to_string()],
            ..harness.command()
        };

        let err = harness.run(&command, &mut device).unwrap().unwrap_err();
        assert!(err.message.contains("bogus-event"));
        assert_eq!(device.count(DeviceOp::RootElevate), 0);
    }

    #[test]
    fn app_startup_stops_then_launches() {
        let mut harness = Harness::new();
        let mut device = FakeDevice::default();
        device.packages.push("com.android.settings".to_string());
        let command = ProfilerCommand {
            event: ProfilerEvent::AppStartup,
            app: Some("com.android.settings".to_string()),
            ..harness.command()
        };

        harness.run(&command, &mut device).unwrap().unwrap();
        let calls = device.calls();
        let stop = calls.iter().position(|c| *c == DeviceOp::ForceStopPackage).unwrap();
        let start = calls.iter().position(|c| *c == DeviceOp::StartPerfettoTrace).unwrap();
        let launch = calls.iter().position(|c| *c == DeviceOp::StartPackage).unwrap();
        assert!(stop < start && start < launch);
    }

    #[test]
    fn app_startup_requires_app() {
        let mut harness = Harness::new();
        let mut device = FakeDevice::default();
        let command = ProfilerCommand {
            event: ProfilerEvent::AppStartup,
            ..harness.command()
        };
        let err = harness.run(&command, &mut device).unwrap().unwrap_err();
        assert_eq!(err.message, "Command is invalid because --app is not passed.");
        assert!(device.calls().is_empty());
    }

    #[test]
    fn event_specific_arguments_require_their_event() {
        let harness = Harness::new();
        let cases = [
            (
                ProfilerCommand {
                    from_user: Some(UserId(0)),
                    ..harness.command()
                },
                "--from-user is passed, but --event is not set to user-switch",
            ),
            (
                ProfilerCommand {
                    to_user: Some(UserId(1)),
                    ..harness.command()
                },
                "--to-user is passed, but --event is not set to user-switch",
            ),
            (
                ProfilerCommand {
                    app: Some("com.android.settings".to_string()),
                    ..harness.command()
                },
                "--app is passed and --event is not set to app-startup",
            ),
            (
                ProfilerCommand {
                    event: ProfilerEvent::UserSwitch,
                    ..harness.command()
                },
                "--to-user is not passed",
            ),
        ];
        for (command, expected) in cases {
            let err = command.check_arguments().unwrap_err();
            assert!(err.message.contains(expected), "{}", err.message);
        }
    }

    #[test]
    fn ui_with_multiple_runs_is_rejected() {
        let mut harness = Harness::new();
        let mut device = FakeDevice::default();
        let command = ProfilerCommand {
            runs: 2,
            ui: true,
            ..harness.command()
        };

        let err = harness.run(&command, &mut device).unwrap().unwrap_err();
        assert_eq!(
            err.message,
            "Command is invalid because --ui cannot be passed if --runs is set to a value greater than 1."
        );
        assert_eq!(err.suggestion.as_deref(), Some("Set torq -r 2 --no-ui to perform 2 runs."));
        assert!(device.calls().is_empty());
    }

    #[test]
    fn ui_opens_the_artifact() {
        let mut harness = Harness::new();
        let mut device = FakeDevice::default();
        let command = ProfilerCommand {
            ui: true,
            ..harness.command()
        };

        harness.run(&command, &mut device).unwrap().unwrap();
        assert_eq!(harness.viewer.opened(), vec![device.pulls[0].1.clone()]);
    }

    #[test]
    fn artifacts_are_reported_on_output() {
        let mut harness = Harness::new();
        let mut device = FakeDevice::default();
        let command = harness.command();

        harness.run(&command, &mut device).unwrap().unwrap();
        let out = String::from_utf8(harness.out.clone()).unwrap();
        assert_eq!(out.trim_end(), device.pulls[0].1.display().to_string());
    }
}
