//! Fuzz target for kernel cpu list parsing (`0-3,5`).

#![no_main]

use libfuzzer_sys::fuzz_target;
use torq_core::device::parse::parse_cpu_list;

fuzz_target!(|data: &str| {
    if let Ok(cpus) = parse_cpu_list(data) {
        assert!(cpus.iter().all(|cpu| *cpu < 8192));
    }
});
