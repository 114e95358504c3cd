//! Fuzz target for /proc/meminfo and memory size parsing.

#![no_main]

use libfuzzer_sys::fuzz_target;
use torq_core::device::parse::parse_mem_total_kb;
use torq_core::hardware::MemorySize;

fuzz_target!(|data: &str| {
    if let Ok(kb) = parse_mem_total_kb(data) {
        let _ = MemorySize::from_kilobytes_ceil(kb);
    }
    let _ = data.parse::<MemorySize>();
});
