//! Perfetto trace configuration builder.
//!
//! A [`TraceConfig`] starts from one of the [`PredefinedConfig`] presets and
//! is then edited through validated [`exclude`](TraceConfig::exclude) and
//! [`include`](TraceConfig::include) calls before being rendered as perfetto
//! text proto and written to the tracing daemon's stdin.
//!
//! # Edit rules
//!
//! - Excluding an event requires it to be active.
//! - Including an event requires it to be inactive.
//! - A batch of edits stops at the first invalid one and leaves the config
//!   untouched.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::fmt::Write as _;
use std::str::FromStr;
use thiserror::Error;
use torq_common::{Checked, Error, Result, ValidationError};

/// Full ftrace catalog, alphabetical.
pub const DEFAULT_FTRACE_EVENTS: [&str; 28] = [
    "dmabuf_heap/dma_heap_stat",
    "ftrace/print",
    "gpu_mem/gpu_mem_total",
    "ion/ion_stat",
    "kmem/ion_heap_grow",
    "kmem/ion_heap_shrink",
    "kmem/rss_stat",
    "lowmemorykiller/lowmemory_kill",
    "mm_event/mm_event_record",
    "oom/mark_victim",
    "oom/oom_score_adj_update",
    "power/cpu_frequency",
    "power/cpu_idle",
    "power/gpu_frequency",
    "power/suspend_resume",
    "power/wakeup_source_activate",
    "power/wakeup_source_deactivate",
    "sched/sched_blocked_reason",
    "sched/sched_process_exit",
    "sched/sched_process_free",
    "sched/sched_switch",
    "sched/sched_wakeup",
    "sched/sched_wakeup_new",
    "sched/sched_waking",
    "task/task_newtask",
    "task/task_rename",
    "vmscan/*",
    "workqueue/*",
];

const LIGHTWEIGHT_FTRACE_EVENTS: [&str; 10] = [
    "ftrace/print",
    "power/cpu_frequency",
    "power/cpu_idle",
    "power/suspend_resume",
    "sched/sched_switch",
    "sched/sched_wakeup",
    "sched/sched_wakeup_new",
    "sched/sched_waking",
    "task/task_newtask",
    "task/task_rename",
];

const MEMORY_FTRACE_EVENTS: [&str; 12] = [
    "dmabuf_heap/dma_heap_stat",
    "ftrace/print",
    "gpu_mem/gpu_mem_total",
    "ion/ion_stat",
    "kmem/ion_heap_grow",
    "kmem/ion_heap_shrink",
    "kmem/rss_stat",
    "lowmemorykiller/lowmemory_kill",
    "mm_event/mm_event_record",
    "oom/mark_victim",
    "oom/oom_score_adj_update",
    "vmscan/*",
];

const DEFAULT_ATRACE_CATEGORIES: [&str; 22] = [
    "aidl",
    "am",
    "binder_driver",
    "camera",
    "dalvik",
    "disk",
    "freq",
    "gfx",
    "hal",
    "idle",
    "input",
    "memory",
    "memreclaim",
    "network",
    "power",
    "res",
    "sched",
    "ss",
    "sync",
    "thermal",
    "view",
    "wm",
];

const LIGHTWEIGHT_ATRACE_CATEGORIES: [&str; 9] = [
    "am", "dalvik", "freq", "gfx", "idle", "power", "sched", "view", "wm",
];

const MEMORY_ATRACE_CATEGORIES: [&str; 4] = ["am", "dalvik", "memory", "memreclaim"];

/// Performance data source used for a capture.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProfilerKind {
    #[default]
    Perfetto,
    Simpleperf,
}

impl ProfilerKind {
    /// Artifact file extension on the host.
    pub fn extension(&self) -> &'static str {
        match self {
            ProfilerKind::Perfetto => "perfetto-trace",
            ProfilerKind::Simpleperf => "data",
        }
    }
}

/// Built-in configuration presets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PredefinedConfig {
    #[default]
    Default,
    Lightweight,
    Memory,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown predefined config {0:?}; expected one of: default, lightweight, memory")]
pub struct UnknownConfigError(String);

impl PredefinedConfig {
    pub const ALL: [PredefinedConfig; 3] = [
        PredefinedConfig::Default,
        PredefinedConfig::Lightweight,
        PredefinedConfig::Memory,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            PredefinedConfig::Default => "default",
            PredefinedConfig::Lightweight => "lightweight",
            PredefinedConfig::Memory => "memory",
        }
    }

    fn ftrace_events(&self) -> &'static [&'static str] {
        match self {
            PredefinedConfig::Default => &DEFAULT_FTRACE_EVENTS,
            PredefinedConfig::Lightweight => &LIGHTWEIGHT_FTRACE_EVENTS,
            PredefinedConfig::Memory => &MEMORY_FTRACE_EVENTS,
        }
    }

    fn atrace_categories(&self) -> &'static [&'static str] {
        match self {
            PredefinedConfig::Default => &DEFAULT_ATRACE_CATEGORIES,
            PredefinedConfig::Lightweight => &LIGHTWEIGHT_ATRACE_CATEGORIES,
            PredefinedConfig::Memory => &MEMORY_ATRACE_CATEGORIES,
        }
    }

    /// Ring buffer sizes: process/log, stats, ftrace.
    fn buffer_sizes_kb(&self) -> [u32; 3] {
        match self {
            PredefinedConfig::Default => [4096, 4096, 260_096],
            PredefinedConfig::Lightweight => [2048, 2048, 65_536],
            PredefinedConfig::Memory => [4096, 8192, 131_072],
        }
    }
}

impl fmt::Display for PredefinedConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PredefinedConfig {
    type Err = UnknownConfigError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        PredefinedConfig::ALL
            .into_iter()
            .find(|c| c.name() == s)
            .ok_or_else(|| UnknownConfigError(s.to_string()))
    }
}

/// Editable perfetto configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceConfig {
    kind: ProfilerKind,
    preset: PredefinedConfig,
    duration_ms: u64,
    events: BTreeSet<String>,
}

impl TraceConfig {
    /// The `default` preset with the full ftrace catalog.
    ///
    /// A missing duration is a usage error, not a validation failure.
    pub fn default_config(kind: ProfilerKind, duration_ms: Option<u64>) -> Result<Self> {
        let mut config = Self::predefined(PredefinedConfig::Default, duration_ms)?;
        config.kind = kind;
        Ok(config)
    }

    pub fn predefined(preset: PredefinedConfig, duration_ms: Option<u64>) -> Result<Self> {
        let duration_ms = duration_ms.ok_or(Error::MissingDuration)?;
        Ok(Self {
            kind: ProfilerKind::Perfetto,
            preset,
            duration_ms,
            events: preset.ftrace_events().iter().map(|e| e.to_string()).collect(),
        })
    }

    pub fn kind(&self) -> ProfilerKind {
        self.kind
    }

    pub fn preset(&self) -> PredefinedConfig {
        self.preset
    }

    pub fn duration_ms(&self) -> u64 {
        self.duration_ms
    }

    /// Active ftrace events, alphabetical.
    pub fn events(&self) -> impl Iterator<Item = &str> {
        self.events.iter().map(String::as_str)
    }

    pub fn contains(&self, event: &str) -> bool {
        self.events.contains(event)
    }

    fn listing(&self) -> String {
        self.events.iter().fold(String::new(), |mut out, event| {
            let _ = write!(out, "\n\t {event}");
            out
        })
    }

    /// Remove an active event.
    pub fn exclude(&mut self, event: &str) -> Checked {
        if !self.events.remove(event) {
            return Err(ValidationError::suggest(
                format!(
                    "Cannot remove ftrace event {event} from config because it is not one of the config's ftrace events."
                ),
                format!(
                    "Please specify one of the following possible ftrace events:{}",
                    self.listing()
                ),
            ));
        }
        Ok(())
    }

    /// Add an event that is not yet active.
    pub fn include(&mut self, event: &str) -> Checked {
        if self.events.contains(event) {
            return Err(ValidationError::suggest(
                format!(
                    "Cannot add ftrace event {event} to config because it is already one of the config's ftrace events."
                ),
                format!(
                    "Please do not specify any of the following ftrace events that are already included:{}",
                    self.listing()
                ),
            ));
        }
        self.events.insert(event.to_string());
        Ok(())
    }

    /// Apply exclusions, then inclusions, stopping at the first invalid one.
    ///
    /// On error the config is unchanged.
    pub fn apply_edits(&mut self, excluded: &[String], included: &[String]) -> Checked {
        let mut draft = self.clone();
        for event in excluded {
            draft.exclude(event)?;
        }
        for event in included {
            draft.include(event)?;
        }
        *self = draft;
        Ok(())
    }

    /// Perfetto text-proto form.
    pub fn render(&self) -> String {
        let preset = self.preset;
        let mut out = String::new();

        for size_kb in preset.buffer_sizes_kb() {
            let _ = write!(
                out,
                "buffers: {{\n  size_kb: {size_kb}\n  fill_policy: RING_BUFFER\n}}\n"
            );
        }
        out.push('\n');

        out.push_str(
            "data_sources: {\n  config {\n    name: \"linux.process_stats\"\n    process_stats_config {\n      scan_all_processes_on_start: true\n",
        );
        if preset == PredefinedConfig::Memory {
            out.push_str("      proc_stats_poll_ms: 1000\n");
        }
        out.push_str("    }\n  }\n}\n\n");

        out.push_str("data_sources: {\n  config {\n    name: \"android.log\"\n    android_log_config {\n    }\n  }\n}\n\n");
        out.push_str("data_sources {\n  config {\n    name: \"android.packages_list\"\n  }\n}\n\n");

        match preset {
            PredefinedConfig::Default => {
                out.push_str(
                    "data_sources: {\n  config {\n    name: \"linux.sys_stats\"\n    target_buffer: 1\n    sys_stats_config {\n      stat_period_ms: 500\n      stat_counters: STAT_CPU_TIMES\n      stat_counters: STAT_FORK_COUNT\n    }\n  }\n}\n\n",
                );
                out.push_str(
                    "data_sources: {\n  config {\n    name: \"android.surfaceflinger.frametimeline\"\n    target_buffer: 2\n  }\n}\n\n",
                );
            }
            PredefinedConfig::Memory => {
                out.push_str(
                    "data_sources: {\n  config {\n    name: \"linux.sys_stats\"\n    target_buffer: 1\n    sys_stats_config {\n      meminfo_period_ms: 1000\n      meminfo_counters: MEMINFO_ACTIVE_ANON\n      meminfo_counters: MEMINFO_ACTIVE_FILE\n      meminfo_counters: MEMINFO_INACTIVE_ANON\n      meminfo_counters: MEMINFO_INACTIVE_FILE\n      meminfo_counters: MEMINFO_MEM_AVAILABLE\n      meminfo_counters: MEMINFO_MEM_FREE\n      meminfo_counters: MEMINFO_SWAP_CACHED\n      vmstat_period_ms: 1000\n      vmstat_counters: VMSTAT_NR_FREE_PAGES\n      vmstat_counters: VMSTAT_PGFAULT\n      vmstat_counters: VMSTAT_PGMAJFAULT\n    }\n  }\n}\n\n",
                );
            }
            PredefinedConfig::Lightweight => {}
        }

        out.push_str("data_sources: {\n  config {\n    name: \"linux.ftrace\"\n    target_buffer: 2\n    ftrace_config {\n");
        for event in &self.events {
            let _ = writeln!(out, "      ftrace_events: \"{event}\"");
        }
        for category in preset.atrace_categories() {
            let _ = writeln!(out, "      atrace_categories: \"{category}\"");
        }
        out.push_str("      atrace_apps: \"*\"\n      buffer_size_kb: 16384\n      drain_period_ms: 150\n      symbolize_ksyms: true\n    }\n  }\n}\n\n");

        let _ = write!(
            out,
            "duration_ms: {}\nwrite_into_file: true\nfile_write_period_ms: 5000\nmax_file_size_bytes: 100000000000\nflush_period_ms: 5000\nincremental_state_config {{\n  clear_period_ms: 5000\n}}\n",
            self.duration_ms
        );
        out
    }
}
