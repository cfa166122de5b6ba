// model.rs - Scan data model
// Serialized as-is into scan_results.json and the API responses.

use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Port {
    pub port: u16,
    pub state: String,
    pub service: String,
    pub version: Option<String>,
    pub http_response: Option<String>,
    /// PNG, base64 then URL encoded
    pub screenshot: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Host {
    pub ip: String,
    pub mac: Option<String>,
    pub vendor: Option<String>,
    pub hostname: Option<String>,
    pub os: Option<String>,
    pub icon: Option<String>,
    #[serde(default)]
    pub open_ports: Vec<Port>,
}

impl Host {
    pub fn new(ip: impl Into<String>) -> Self {
        Self {
            ip: ip.into(),
            ..Self::default()
        }
    }

    /// Key for numeric ordering; unparsable addresses sort last
    pub fn sort_key(&self) -> (u8, u32) {
        match self.ip.parse::<Ipv4Addr>() {
            Ok(addr) => (0, u32::from(addr)),
            Err(_) => (1, 0),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scan {
    pub network: String,
    pub hosts: Vec<Host>,
    /// Unix seconds
    pub start: f64,
    pub end: Option<f64>,
}

impl Scan {
    pub fn new(network: impl Into<String>) -> Self {
        Self {
            network: network.into(),
            hosts: Vec::new(),
            start: unix_now(),
            end: None,
        }
    }

    pub fn host_mut(&mut self, ip: &str) -> Option<&mut Host> {
        self.hosts.iter_mut().find(|h| h.ip == ip)
    }

    pub fn duration(&self) -> Option<f64> {
        self.end.map(|end| end - self.start)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScanState {
    pub scanning: bool,
    pub current_host: Option<String>,
}

pub fn unix_now() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}
