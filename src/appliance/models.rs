//! Typed payloads read from the appliance.
//!
//! Field names follow the DSM Web API so the structs deserialize straight out
//! of the `data` member of a response envelope.

use serde::{Deserialize, Deserializer};

/// `SYNO.DSM.Info` / `getinfo`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DeviceInformation {
    pub model: String,
    /// Installed RAM in MiB.
    pub ram: u64,
    pub serial: String,
    pub temperature: f64,
    #[serde(default)]
    pub temperature_warn: bool,
    /// Seconds since boot.
    pub uptime: u64,
    pub version_string: String,
}

/// Utilization gauges, already reduced from the raw payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Utilization {
    pub cpu_total_load: f64,
    pub memory_real_usage: f64,
    pub network_up: f64,
    pub network_down: f64,
}

/// `SYNO.Storage.CGI.Storage` / `load_info`.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct StorageInfo {
    #[serde(default)]
    pub volumes: Vec<Volume>,
    #[serde(default)]
    pub disks: Vec<Disk>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Volume {
    pub id: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub size: VolumeSize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub struct VolumeSize {
    #[serde(default, deserialize_with = "byte_count")]
    pub total: Option<u64>,
    #[serde(default, deserialize_with = "byte_count")]
    pub used: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Disk {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub smart_status: Option<String>,
    #[serde(default, rename = "temp")]
    pub temperature: Option<f64>,
}

/// `SYNO.Core.System.Utilization` / `get`, as sent by the appliance.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct UtilizationPayload {
    pub cpu: CpuLoad,
    pub memory: MemoryUsage,
    #[serde(default)]
    pub network: Vec<NetworkDevice>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct CpuLoad {
    #[serde(default)]
    pub user_load: f64,
    #[serde(default)]
    pub system_load: f64,
    #[serde(default)]
    pub other_load: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct MemoryUsage {
    pub real_usage: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct NetworkDevice {
    pub device: String,
    #[serde(default)]
    pub rx: f64,
    #[serde(default)]
    pub tx: f64,
}

impl From<UtilizationPayload> for Utilization {
    fn from(raw: UtilizationPayload) -> Self {
        // DSM reports an aggregate "total" device; older firmware may not.
        let (network_up, network_down) =
            match raw.network.iter().find(|dev| dev.device == "total") {
                Some(total) => (total.tx, total.rx),
                None => raw
                    .network
                    .iter()
                    .fold((0.0, 0.0), |(up, down), dev| (up + dev.tx, down + dev.rx)),
            };

        Self {
            cpu_total_load: raw.cpu.user_load + raw.cpu.system_load + raw.cpu.other_load,
            memory_real_usage: raw.memory.real_usage,
            network_up,
            network_down,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrString {
    Number(u64),
    Text(String),
}

/// Byte counts arrive as JSON strings on most firmware.
fn byte_count<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<NumberOrString>::deserialize(deserializer)? {
        None => Ok(None),
        Some(NumberOrString::Number(n)) => Ok(Some(n)),
        Some(NumberOrString::Text(text)) => {
            let text = text.trim();
            if text.is_empty() {
                return Ok(None);
            }
            text.parse::<u64>().map(Some).map_err(|err| {
                serde::de::Error::custom(format!("invalid byte count {text:?}: {err}"))
            })
        }
    }
}
