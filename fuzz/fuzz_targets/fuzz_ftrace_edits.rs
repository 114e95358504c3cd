//! Fuzz target for ftrace event edits on a predefined config.
//!
//! A rejected edit batch must leave the config untouched.

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use torq_core::trace_config::{PredefinedConfig, TraceConfig};

#[derive(Debug, Arbitrary)]
struct Edits {
    preset: u8,
    excluded: Vec<String>,
    included: Vec<String>,
}

fuzz_target!(|edits: Edits| {
    let preset = PredefinedConfig::ALL[edits.preset as usize % PredefinedConfig::ALL.len()];
    let Ok(mut config) = TraceConfig::predefined(preset, Some(1000)) else {
        return;
    };
    let before = config.render();
    if config.apply_edits(&edits.excluded, &edits.included).is_err() {
        assert_eq!(config.render(), before);
    }
});
