use crate::run::{RunOutcome, RunReport};
use crate::snapshot::DeviceSnapshot;
use prometheus::core::Collector;
use prometheus::{opts, Encoder, Gauge, GaugeVec, Registry, TextEncoder};
use std::fs;
use std::path::Path;
use std::time::UNIX_EPOCH;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("failed to encode metrics: {0}")]
    Encode(#[from] prometheus::Error),
    #[error("failed to write metrics textfile {path}: {source}")]
    Write {
        path: String,
        source: std::io::Error,
    },
}

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub last_run_outcome: GaugeVec,
    pub last_run_timestamp_seconds: Gauge,
    pub run_duration_seconds: Gauge,
    pub cpu_percent: Gauge,
    pub memory_percent: Gauge,
    pub temperature_celsius: Gauge,
    pub temperature_warn: Gauge,
    pub uptime_seconds: Gauge,
    pub net_up_bytes_per_sec: Gauge,
    pub net_down_bytes_per_sec: Gauge,
    pub overall_percent_used: Gauge,
    pub volume_percent_used: GaugeVec,
    pub volume_size_total_tib: GaugeVec,
    pub disk_temperature_celsius: GaugeVec,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let last_run_outcome = GaugeVec::new(
            opts!(
                "synology_collector_last_run_outcome",
                "1 for the outcome of the most recent run, 0 for the others"
            ),
            &["outcome"],
        )?;
        let last_run_timestamp_seconds = Gauge::with_opts(opts!(
            "synology_collector_last_run_timestamp_seconds",
            "Unix time the most recent run started"
        ))?;
        let run_duration_seconds = Gauge::with_opts(opts!(
            "synology_collector_run_duration_seconds",
            "Wall-clock duration of the most recent run"
        ))?;
        let cpu_percent = Gauge::with_opts(opts!(
            "synology_cpu_percent",
            "Total CPU load reported by the appliance in percent"
        ))?;
        let memory_percent = Gauge::with_opts(opts!(
            "synology_memory_percent",
            "Real memory usage reported by the appliance in percent"
        ))?;
        let temperature_celsius = Gauge::with_opts(opts!(
            "synology_temperature_celsius",
            "System temperature in Celsius"
        ))?;
        let temperature_warn = Gauge::with_opts(opts!(
            "synology_temperature_warn",
            "1 if the appliance flags its temperature"
        ))?;
        let uptime_seconds = Gauge::with_opts(opts!(
            "synology_uptime_seconds",
            "Appliance uptime, minute resolution"
        ))?;
        let net_up_bytes_per_sec = Gauge::with_opts(opts!(
            "synology_net_up_bytes_per_sec",
            "Outbound network throughput across all interfaces"
        ))?;
        let net_down_bytes_per_sec = Gauge::with_opts(opts!(
            "synology_net_down_bytes_per_sec",
            "Inbound network throughput across all interfaces"
        ))?;
        let overall_percent_used = Gauge::with_opts(opts!(
            "synology_overall_percent_used",
            "Used capacity across all volumes in percent"
        ))?;
        let volume_percent_used = GaugeVec::new(
            opts!("synology_volume_percent_used", "Used capacity per volume in percent"),
            &["id", "name"],
        )?;
        let volume_size_total_tib = GaugeVec::new(
            opts!("synology_volume_size_total_tib", "Volume size in TiB"),
            &["id", "name"],
        )?;
        let disk_temperature_celsius = GaugeVec::new(
            opts!(
                "synology_disk_temperature_celsius",
                "Disk temperature in Celsius"
            ),
            &["id", "name"],
        )?;

        register(&registry, &last_run_outcome)?;
        register(&registry, &last_run_timestamp_seconds)?;
        register(&registry, &run_duration_seconds)?;
        register(&registry, &cpu_percent)?;
        register(&registry, &memory_percent)?;
        register(&registry, &temperature_celsius)?;
        register(&registry, &temperature_warn)?;
        register(&registry, &uptime_seconds)?;
        register(&registry, &net_up_bytes_per_sec)?;
        register(&registry, &net_down_bytes_per_sec)?;
        register(&registry, &overall_percent_used)?;
        register(&registry, &volume_percent_used)?;
        register(&registry, &volume_size_total_tib)?;
        register(&registry, &disk_temperature_celsius)?;

        Ok(Self {
            registry,
            last_run_outcome,
            last_run_timestamp_seconds,
            run_duration_seconds,
            cpu_percent,
            memory_percent,
            temperature_celsius,
            temperature_warn,
            uptime_seconds,
            net_up_bytes_per_sec,
            net_down_bytes_per_sec,
            overall_percent_used,
            volume_percent_used,
            volume_size_total_tib,
            disk_temperature_celsius,
        })
    }

    pub fn record_run(&self, report: &RunReport) {
        for outcome in RunOutcome::ALL {
            self.last_run_outcome
                .with_label_values(&[outcome.as_str()])
                .set(if outcome == report.outcome { 1.0 } else { 0.0 });
        }
        let started = report
            .started_at
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        self.last_run_timestamp_seconds.set(started);
        self.run_duration_seconds.set(report.elapsed.as_secs_f64());

        if let Some(snapshot) = &report.snapshot {
            self.update_from_snapshot(snapshot);
        }
    }

    pub fn update_from_snapshot(&self, snapshot: &DeviceSnapshot) {
        self.cpu_percent.set(snapshot.cpu_percent);
        self.memory_percent.set(snapshot.memory_percent);
        self.temperature_celsius.set(snapshot.temperature);
        self.temperature_warn
            .set(if snapshot.temperature_warn { 1.0 } else { 0.0 });
        let uptime = snapshot.uptime_days * 86_400
            + snapshot.uptime_hours * 3_600
            + snapshot.uptime_minutes * 60;
        self.uptime_seconds.set(uptime as f64);
        self.net_up_bytes_per_sec.set(snapshot.net_up);
        self.net_down_bytes_per_sec.set(snapshot.net_down);
        self.overall_percent_used
            .set(snapshot.overall_percent_used as f64);

        for v in &snapshot.volumes {
            let labels = [v.id.as_str(), v.name.as_str()];
            if let Some(pct) = v.percent_used {
                self.volume_percent_used.with_label_values(&labels).set(pct);
            }
            if let Some(size) = v.size_total_tib {
                self.volume_size_total_tib
                    .with_label_values(&labels)
                    .set(size);
            }
        }

        for d in &snapshot.disks {
            if let Some(temp) = d.temperature {
                self.disk_temperature_celsius
                    .with_label_values(&[d.id.as_str(), d.name.as_deref().unwrap_or_default()])
                    .set(temp);
            }
        }
    }

    pub fn encode_metrics(&self) -> Result<Vec<u8>, prometheus::Error> {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        let mf = self.registry.gather();
        encoder.encode(&mf, &mut buf)?;
        Ok(buf)
    }

    /// Writes the exposition next to `path` and renames it into place so a
    /// scraper never reads a partial file.
    pub fn write_textfile(&self, path: &Path) -> Result<(), MetricsError> {
        let encoded = self.encode_metrics()?;
        let tmp = path.with_extension("prom.tmp");
        let write_err = |source| MetricsError::Write {
            path: path.display().to_string(),
            source,
        };
        fs::write(&tmp, encoded).map_err(write_err)?;
        fs::rename(&tmp, path).map_err(write_err)
    }
}

fn register<T: Collector + Clone + 'static>(
    registry: &Registry,
    collector: &T,
) -> Result<(), prometheus::Error> {
    registry.register(Box::new(collector.clone()))
}
