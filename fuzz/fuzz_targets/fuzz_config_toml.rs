//! Fuzz target for torq.toml loading.
//!
//! Parsing and validation should only ever return an error.

#![no_main]

use libfuzzer_sys::fuzz_target;
use std::path::Path;
use torq_core::config::TorqConfig;

fuzz_target!(|data: &str| {
    let _ = TorqConfig::from_toml_str(data, Path::new("fuzz.toml"));
});
