//! Host-side conversion of simpleperf recordings to Gecko profiles.
//!
//! Runs the simpleperf scripts in two steps:
//!
//! 1. `binary_cache_builder.py -i <perf.data> [-lib <symbols>]` collects the
//!    binaries referenced by the recording into `./binary_cache`
//! 2. `gecko_profile_generator.py -i <perf.data>` prints the profile JSON,
//!    which is written next to the recording with a `.json` extension
//!
//! Both run with the recording's directory as working directory so the
//! second step finds the cache built by the first.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Instant;
use torq_common::{Checked, Error, Result, ValidationError};
use tracing::{debug, info, instrument};

pub const BINARY_CACHE_BUILDER: &str = "binary_cache_builder.py";
pub const GECKO_PROFILE_GENERATOR: &str = "gecko_profile_generator.py";

/// Expand a leading `~` to the home directory.
pub fn expand_home(path: &Path) -> PathBuf {
    match (path.strip_prefix("~"), dirs::home_dir()) {
        (Ok(rest), Some(home)) => home.join(rest),
        _ => path.to_path_buf(),
    }
}

/// Converter bound to one scripts directory and optional symbols directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeckoConverter {
    scripts_dir: PathBuf,
    symbols_dir: Option<PathBuf>,
}

impl GeckoConverter {
    pub fn new(scripts_dir: &Path, symbols_dir: Option<&Path>) -> Self {
        Self {
            scripts_dir: expand_home(scripts_dir),
            symbols_dir: symbols_dir.map(expand_home),
        }
    }

    pub fn scripts_dir(&self) -> &Path {
        &self.scripts_dir
    }

    /// Both scripts must exist, and the symbols directory if one was given.
    pub fn check(&self) -> Checked {
        for script in [BINARY_CACHE_BUILDER, GECKO_PROFILE_GENERATOR] {
            let path = self.scripts_dir.join(script);
            if !path.is_file() {
                return Err(ValidationError::suggest(
                    format!("Cannot convert simpleperf data because {} does not exist.", path.display()),
                    "Set the simpleperf scripts path to the directory containing the simpleperf scripts.",
                ));
            }
        }
        if let Some(symbols) = &self.symbols_dir {
            if !symbols.is_dir() {
                return Err(ValidationError::suggest(
                    format!("Cannot convert simpleperf data because the symbols directory {} does not exist.", symbols.display()),
                    "Set the symbols path to a directory of unstripped libraries.",
                ));
            }
        }
        Ok(())
    }

    /// Where the profile for `raw` is written.
    pub fn gecko_path(raw: &Path) -> PathBuf {
        raw.with_extension("json")
    }

    /// Convert `raw` and return the path of the written profile.
    #[instrument(level = "debug", skip(self), fields(raw = %raw.display()))]
    pub fn convert(&self, raw: &Path) -> Result<PathBuf> {
        let workdir = match raw.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        info!("building simpleperf binary cache");
        let mut cache_args = vec!["-i".to_string(), raw.display().to_string()];
        if let Some(symbols) = &self.symbols_dir {
            cache_args.push("-lib".to_string());
            cache_args.push(symbols.display().to_string());
        }
        self.run_script(BINARY_CACHE_BUILDER, &cache_args, &workdir)?;

        let profile = self.run_script(
            GECKO_PROFILE_GENERATOR,
            &["-i".to_string(), raw.display().to_string()],
            &workdir,
        )?;
        if profile.is_empty() {
            return Err(Error::Conversion {
                step: GECKO_PROFILE_GENERATOR.to_string(),
                message: "no profile was produced".to_string(),
            });
        }

        let gecko = Self::gecko_path(raw);
        std::fs::write(&gecko, profile)?;
        debug!(path = %gecko.display(), "gecko profile written");
        Ok(gecko)
    }

    /// Run one script to completion and return its stdout.
    fn run_script(&self, script: &str, args: &[String], workdir: &Path) -> Result<Vec<u8>> {
        let program = self.scripts_dir.join(script);
        let start = Instant::now();
        let output = Command::new(&program)
            .args(args)
            .current_dir(workdir)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| Error::Conversion {
                step: script.to_string(),
                message: format!("failed to run {}: {e}", program.display()),
            })?;

        debug!(
            script,
            duration_ms = start.elapsed().as_millis() as u64,
            exit_code = ?output.status.code(),
            "simpleperf script finished"
        );

        if !output.status.success() {
            return Err(Error::Conversion {
                step: script.to_string(),
                message: format!(
                    "exited with status {:?}: {}",
                    output.status.code(),
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }
        Ok(output.stdout)
    }
}
