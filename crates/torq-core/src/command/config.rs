//! Predefined-config command: list, print or copy a preset. No device access.

use super::ExecContext;
use crate::trace_config::{PredefinedConfig, TraceConfig};
use serde::Serialize;
use std::io::Write;
use std::path::PathBuf;
use torq_common::{Checked, Result, ValidationError};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ConfigCommand {
    List,
    Show {
        name: PredefinedConfig,
        dur_ms: Option<u64>,
        excluded_ftrace_events: Vec<String>,
        included_ftrace_events: Vec<String>,
    },
    Pull {
        name: PredefinedConfig,
        dur_ms: Option<u64>,
        excluded_ftrace_events: Vec<String>,
        included_ftrace_events: Vec<String>,
        /// Defaults to `./<name>.pbtxt`.
        file_path: Option<PathBuf>,
    },
}

fn build(
    name: PredefinedConfig,
    dur_ms: Option<u64>,
    excluded: &[String],
    included: &[String],
) -> Result<std::result::Result<String, ValidationError>> {
    let mut config = TraceConfig::predefined(name, dur_ms)?;
    Ok(config.apply_edits(excluded, included).map(|()| config.render()))
}

impl ConfigCommand {
    pub fn execute(&self, ctx: &mut ExecContext<'_>) -> Result<Checked> {
        match self {
            ConfigCommand::List => {
                for preset in PredefinedConfig::ALL {
                    writeln!(ctx.out, "{preset}")?;
                }
            }
            ConfigCommand::Show {
                name,
                dur_ms,
                excluded_ftrace_events,
                included_ftrace_events,
            } => {
                let text = match build(*name, *dur_ms, excluded_ftrace_events, included_ftrace_events)? {
                    Ok(text) => text,
                    Err(err) => return Ok(Err(err)),
                };
                ctx.out.write_all(text.as_bytes())?;
            }
            ConfigCommand::Pull {
                name,
                dur_ms,
                excluded_ftrace_events,
                included_ftrace_events,
                file_path,
            } => {
                let text = match build(*name, *dur_ms, excluded_ftrace_events, included_ftrace_events)? {
                    Ok(text) => text,
                    Err(err) => return Ok(Err(err)),
                };
                let path = file_path
                    .clone()
                    .unwrap_or_else(|| PathBuf::from(format!("./{name}.pbtxt")));
                std::fs::write(&path, text)?;
                info!(config = %name, path = %path.display(), "config written");
                writeln!(ctx.out, "{}", path.display())?;
            }
        }
        Ok(Ok(()))
    }
}
