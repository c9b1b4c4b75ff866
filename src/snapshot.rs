use crate::appliance::{DeviceInformation, Disk, StorageInfo, Utilization, Volume};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const SECONDS_PER_DAY: u64 = 86_400;
const SECONDS_PER_HOUR: u64 = 3_600;
const SECONDS_PER_MINUTE: u64 = 60;
const BYTES_PER_TIB: f64 = 1_099_511_627_776.0;

/// Point-in-time view of one appliance, serialized as the forwarded document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceSnapshot {
    pub model: String,
    pub serial: String,
    pub dsm_version: String,
    pub ram_mb: u64,
    pub temperature: f64,
    pub temperature_warn: bool,
    pub uptime_days: u64,
    pub uptime_hours: u64,
    pub uptime_minutes: u64,
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub net_up: f64,
    pub net_down: f64,
    pub volumes: Vec<VolumeInfo>,
    pub disks: Vec<DiskInfo>,
    pub overall_percent_used: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VolumeInfo {
    pub id: String,
    pub name: String,
    pub status: String,
    pub percent_used: Option<f64>,
    pub size_total_tib: Option<f64>,
    pub size_used_tib: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiskInfo {
    pub id: String,
    pub name: Option<String>,
    pub status: Option<String>,
    pub smart_status: Option<String>,
    pub temperature: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Uptime {
    pub days: u64,
    pub hours: u64,
    pub minutes: u64,
}

impl Uptime {
    pub fn from_seconds(seconds: u64) -> Self {
        let days = seconds / SECONDS_PER_DAY;
        let remainder = seconds % SECONDS_PER_DAY;
        let hours = remainder / SECONDS_PER_HOUR;
        let remainder = remainder % SECONDS_PER_HOUR;
        Self {
            days,
            hours,
            minutes: remainder / SECONDS_PER_MINUTE,
        }
    }
}

/// Friendly names for volume ids.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct VolumeNames {
    #[serde(default)]
    pub fallback_to_id: bool,
    #[serde(default = "default_volume_aliases")]
    pub aliases: BTreeMap<String, String>,
}

impl Default for VolumeNames {
    fn default() -> Self {
        Self {
            fallback_to_id: false,
            aliases: default_volume_aliases(),
        }
    }
}

impl VolumeNames {
    pub fn name_for(&self, volume_id: &str) -> String {
        match self.aliases.get(volume_id) {
            Some(alias) => alias.clone(),
            None if self.fallback_to_id => volume_id.to_string(),
            None => String::new(),
        }
    }
}

fn default_volume_aliases() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("volume_1".to_string(), "nas".to_string()),
        ("volume_2".to_string(), "k8s-data".to_string()),
    ])
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct CapacityTotals {
    total_bytes: u64,
    used_bytes: u64,
}

impl CapacityTotals {
    fn add(self, volume: &Volume) -> Self {
        Self {
            total_bytes: self
                .total_bytes
                .saturating_add(volume.size.total.unwrap_or(0)),
            used_bytes: self
                .used_bytes
                .saturating_add(volume.size.used.unwrap_or(0)),
        }
    }

    fn percent_used(self) -> u64 {
        if self.total_bytes == 0 {
            return 0;
        }
        let ratio = self.used_bytes as f64 / self.total_bytes as f64;
        (ratio * 100.0).round_ties_even() as u64
    }
}

impl DeviceSnapshot {
    pub fn assemble(
        information: &DeviceInformation,
        utilization: &Utilization,
        storage: &StorageInfo,
        names: &VolumeNames,
    ) -> Self {
        let uptime = Uptime::from_seconds(information.uptime);
        let (volumes, totals) = fold_volumes(&storage.volumes, names);
        let disks = storage.disks.iter().map(DiskInfo::from).collect();

        Self {
            model: information.model.clone(),
            serial: information.serial.clone(),
            dsm_version: information.version_string.clone(),
            ram_mb: information.ram,
            temperature: information.temperature,
            temperature_warn: information.temperature_warn,
            uptime_days: uptime.days,
            uptime_hours: uptime.hours,
            uptime_minutes: uptime.minutes,
            cpu_percent: utilization.cpu_total_load,
            memory_percent: utilization.memory_real_usage,
            net_up: utilization.network_up,
            net_down: utilization.network_down,
            volumes,
            disks,
            overall_percent_used: totals.percent_used(),
        }
    }
}

fn fold_volumes(volumes: &[Volume], names: &VolumeNames) -> (Vec<VolumeInfo>, CapacityTotals) {
    volumes.iter().fold(
        (Vec::with_capacity(volumes.len()), CapacityTotals::default()),
        |(mut records, totals), volume| {
            records.push(VolumeInfo {
                id: volume.id.clone(),
                name: names.name_for(&volume.id),
                status: volume.status.clone(),
                percent_used: volume_percent_used(volume),
                size_total_tib: bytes_to_tib(volume.size.total),
                size_used_tib: bytes_to_tib(volume.size.used),
            });
            (records, totals.add(volume))
        },
    )
}

fn volume_percent_used(volume: &Volume) -> Option<f64> {
    match (volume.size.used, volume.size.total) {
        (Some(used), Some(total)) if total > 0 => {
            Some(round_to(used as f64 / total as f64 * 100.0, 1))
        }
        _ => None,
    }
}

pub fn bytes_to_tib(bytes: Option<u64>) -> Option<f64> {
    bytes.map(|b| round_to(b as f64 / BYTES_PER_TIB, 2))
}

/// Rounds half to even at the given number of decimal places.
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10_f64.powi(decimals);
    (value * factor).round_ties_even() / factor
}

impl From<&Disk> for DiskInfo {
    fn from(disk: &Disk) -> Self {
        Self {
            id: disk.id.clone(),
            name: disk.name.clone(),
            status: disk.status.clone(),
            smart_status: disk.smart_status.clone(),
            temperature: disk.temperature,
        }
    }
}
