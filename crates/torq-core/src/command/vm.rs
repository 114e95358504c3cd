//! VM command: toggle traced_relay for virtualized Android.

use crate::device::Device;
use serde::Serialize;
use torq_common::{Checked, Result};
use tracing::info;

pub const TRACED_ENABLE_PROP: &str = "persist.traced.enable";
pub const TRACED_RELAY_PORT_PROP: &str = "traced_relay.relay_port";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum VmCommand {
    /// Relay to traced over `relay_port` (a socket address).
    Enable { relay_port: String },
    Disable,
}

impl VmCommand {
    pub fn execute(&self, device: &mut dyn Device) -> Result<Checked> {
        try_checked!(device.resolve_connection());
        device.root_elevate()?;
        match self {
            VmCommand::Enable { relay_port } => {
                device.set_prop(TRACED_RELAY_PORT_PROP, relay_port)?;
                device.set_prop(TRACED_ENABLE_PROP, "2")?;
                info!(%relay_port, "traced_relay enabled");
            }
            VmCommand::Disable => {
                device.set_prop(TRACED_ENABLE_PROP, "1")?;
                info!("traced_relay disabled");
            }
        }
        Ok(Ok(()))
    }
}
