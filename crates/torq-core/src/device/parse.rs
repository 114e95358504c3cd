//! Parsers for bridge command output.
//!
//! These are pure functions over captured stdout so they can be fuzzed and
//! property-tested without a device.

use torq_common::{Error, Result, UserId};

const DEVICES_HEADER: &str = "List of devices attached";

/// Serials of connected devices from `adb devices`, in listing order.
///
/// The header line and daemon notices (`* daemon started ...`) are skipped.
/// Only entries whose state is exactly `device` count; `offline`,
/// `unauthorized` and the like are ignored.
pub fn parse_devices(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| !line.starts_with(DEVICES_HEADER) && !line.starts_with('*'))
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let serial = fields.next()?;
            let state = fields.next()?;
            (state == "device").then(|| serial.to_string())
        })
        .collect()
}

/// User IDs from `pm list users`.
///
/// Entries look like `UserInfo{0:Driver:813} running`; the ID is the integer
/// between `{` and the first `:`. Lines without a `UserInfo{` entry are skipped.
pub fn parse_users(output: &str) -> Result<Vec<UserId>> {
    let mut users = Vec::new();
    for line in output.lines() {
        let Some(start) = line.find("UserInfo{") else {
            continue;
        };
        let rest = &line[start + "UserInfo{".len()..];
        let id = rest
            .split(':')
            .next()
            .filter(|_| rest.contains(':'))
            .ok_or_else(|| Error::unexpected_output("pm list users", line.trim()))?;
        let id = id
            .parse::<UserId>()
            .map_err(|e| Error::unexpected_output("pm list users", format!("{line}: {e}")))?;
        users.push(id);
    }
    Ok(users)
}

/// Output of `am get-current-user`.
pub fn parse_current_user(output: &str) -> Result<UserId> {
    output
        .parse::<UserId>()
        .map_err(|e| Error::unexpected_output("am get-current-user", format!("{output:?}: {e}")))
}

/// Upper bound on cpu indices; matches the kernel's largest `NR_CPUS`.
const MAX_CPU_INDEX: u32 = 8192;

/// Expand a sysfs cpu list such as `0-3,6` into individual cpu indices.
pub fn parse_cpu_list(output: &str) -> Result<Vec<u32>> {
    let text = output.trim();
    let bad = |detail: &str| Error::unexpected_output("cpu list", format!("{text:?}: {detail}"));
    if text.is_empty() {
        return Ok(Vec::new());
    }

    let mut cpus = Vec::new();
    for part in text.split(',') {
        match part.split_once('-') {
            Some((lo, hi)) => {
                let lo: u32 = lo.trim().parse().map_err(|_| bad("bad range start"))?;
                let hi: u32 = hi.trim().parse().map_err(|_| bad("bad range end"))?;
                if lo > hi {
                    return Err(bad("descending range"));
                }
                if hi >= MAX_CPU_INDEX {
                    return Err(bad("cpu index out of range"));
                }
                cpus.extend(lo..=hi);
            }
            None => {
                let cpu: u32 = part.trim().parse().map_err(|_| bad("bad cpu index"))?;
                if cpu >= MAX_CPU_INDEX {
                    return Err(bad("cpu index out of range"));
                }
                cpus.push(cpu);
            }
        }
    }
    Ok(cpus)
}

/// `MemTotal` in kilobytes from `/proc/meminfo`.
pub fn parse_mem_total_kb(meminfo: &str) -> Result<u64> {
    meminfo
        .lines()
        .find_map(|line| line.strip_prefix("MemTotal:"))
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|kb| kb.parse().ok())
        .ok_or_else(|| Error::unexpected_output("cat /proc/meminfo", "no MemTotal entry"))
}

/// Whether `pm list packages` output names `app` exactly.
pub fn package_listed(output: &str, app: &str) -> bool {
    output
        .lines()
        .filter_map(|line| line.trim().strip_prefix("package:"))
        .any(|name| name == app)
}

/// Whether `simpleperf list` output names `event` exactly.
pub fn simpleperf_event_listed(output: &str, event: &str) -> bool {
    output
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .any(|name| name == event)
}
