//! Fuzz target for `adb devices` output parsing.

#![no_main]

use libfuzzer_sys::fuzz_target;
use torq_core::device::parse::parse_devices;

fuzz_target!(|data: &str| {
    for serial in parse_devices(data) {
        assert!(!serial.is_empty());
        assert!(!serial.contains(char::is_whitespace));
    }
});
