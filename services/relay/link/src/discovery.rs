//! Serial port discovery.
//!
//! The radio bridge enumerates as a USB serial device whose product string
//! identifies the board. With the address set to `auto`, the first port (by
//! name) whose description contains the filter is used.

use crate::LinkError;
use serialport::{SerialPortInfo, SerialPortType};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info};

/// Address value that enables discovery
pub const AUTO_ADDRESS: &str = "auto";

/// Description substring of the radio bridge board
pub const DEFAULT_PORT_FILTER: &str = "Feather 32u4";

/// Name and human-readable description of a port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortDescription {
    /// OS port name, e.g. `/dev/ttyACM0` or `COM3`
    pub name: String,
    /// Name plus USB product and manufacturer, when known
    pub description: String,
}

impl PortDescription {
    /// Describe a port from its name and optional USB strings
    pub fn new(name: &str, product: Option<&str>, manufacturer: Option<&str>) -> Self {
        let mut description = name.to_string();
        for part in [product, manufacturer].into_iter().flatten() {
            description.push_str(" - ");
            description.push_str(part);
        }
        Self {
            name: name.to_string(),
            description,
        }
    }
}

impl From<&SerialPortInfo> for PortDescription {
    fn from(info: &SerialPortInfo) -> Self {
        match &info.port_type {
            SerialPortType::UsbPort(usb) => Self::new(
                &info.port_name,
                usb.product.as_deref(),
                usb.manufacturer.as_deref(),
            ),
            _ => Self::new(&info.port_name, None, None),
        }
    }
}

/// Chooses the serial port to use
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortSelector {
    /// Explicit port name, or `auto`
    pub address: String,
    /// Description substring used when `address` is `auto`
    pub filter: String,
}

impl Default for PortSelector {
    fn default() -> Self {
        Self {
            address: AUTO_ADDRESS.to_string(),
            filter: DEFAULT_PORT_FILTER.to_string(),
        }
    }
}

impl PortSelector {
    /// Create a selector
    pub fn new(address: impl Into<String>, filter: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            filter: filter.into(),
        }
    }

    /// True when the port is found by description
    pub fn is_auto(&self) -> bool {
        self.address.eq_ignore_ascii_case(AUTO_ADDRESS)
    }

    /// Pick a port from `ports`
    pub fn select(&self, ports: &[PortDescription]) -> Option<String> {
        if !self.is_auto() {
            return Some(self.address.clone());
        }
        let mut matching: Vec<&PortDescription> = ports
            .iter()
            .filter(|port| port.description.contains(&self.filter))
            .collect();
        matching.sort_by(|a, b| a.name.cmp(&b.name));
        matching.first().map(|port| port.name.clone())
    }

    /// Pick a port from the ports currently attached
    pub fn find(&self) -> Result<Option<String>, LinkError> {
        if !self.is_auto() {
            return Ok(Some(self.address.clone()));
        }
        let ports: Vec<PortDescription> = serialport::available_ports()?
            .iter()
            .map(PortDescription::from)
            .collect();
        for port in &ports {
            debug!("Found serial port: {}", port.description);
        }
        Ok(self.select(&ports))
    }

    /// Poll until a matching port appears or the stop signal fires
    pub async fn wait_for_port(
        &self,
        poll_interval: Duration,
        stop: &mut watch::Receiver<bool>,
    ) -> Result<String, LinkError> {
        let mut announced = false;
        loop {
            if *stop.borrow() {
                return Err(LinkError::Stopped);
            }

            let filter = self.clone();
            let found = tokio::task::spawn_blocking(move || filter.find())
                .await
                .map_err(|e| LinkError::Task(e.to_string()))??;
            if let Some(name) = found {
                info!("Using serial port {}", name);
                return Ok(name);
            }

            if !announced {
                info!("Waiting for a serial port matching '{}'", self.filter);
                announced = true;
            }
            tokio::select! {
                _ = tokio::time::sleep(poll_interval) => {}
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        return Err(LinkError::Stopped);
                    }
                }
            }
        }
    }
}
