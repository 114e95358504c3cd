//! Fuzz target for `pm list users` and `am get-current-user` parsing.
//!
//! Both parsers should reject malformed input with an error, never panic.

#![no_main]

use libfuzzer_sys::fuzz_target;
use torq_core::device::parse::{parse_current_user, parse_users};

fuzz_target!(|data: &str| {
    let _ = parse_users(data);
    let _ = parse_current_user(data);
});
