pub mod dsm;
pub mod models;

pub use models::{DeviceInformation, Disk, StorageInfo, Utilization, Volume, VolumeSize};

use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricGroup {
    Information,
    Utilization,
    Storage,
}

impl MetricGroup {
    pub fn as_str(self) -> &'static str {
        match self {
            MetricGroup::Information => "information",
            MetricGroup::Utilization => "utilization",
            MetricGroup::Storage => "storage",
        }
    }
}

impl fmt::Display for MetricGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum ApplianceError {
    #[error("request to {api} failed: {source}")]
    Transport {
        api: String,
        source: reqwest::Error,
    },
    #[error("request to {api} timed out")]
    Timeout { api: String },
    #[error("{api} responded with HTTP {status}")]
    HttpStatus { api: String, status: u16 },
    #[error("authentication rejected (code {code}): {message}")]
    Authentication { code: u16, message: String },
    #[error("{api} failed with code {code}: {message}")]
    Api {
        api: String,
        code: u16,
        message: String,
    },
    #[error("malformed {api} response: {message}")]
    Malformed {
        api: String,
        message: String,
        body: String,
    },
    #[error("appliance does not expose {0}")]
    UnsupportedApi(String),
    #[error("invalid appliance address {0}")]
    InvalidAddress(String),
}

impl ApplianceError {
    /// Request URLs carry `passwd` and `_sid` in the query, so the URL is
    /// dropped from the stored error.
    pub(crate) fn transport(api: &str, source: reqwest::Error) -> Self {
        let source = source.without_url();
        if source.is_timeout() {
            ApplianceError::Timeout {
                api: api.to_string(),
            }
        } else {
            ApplianceError::Transport {
                api: api.to_string(),
                source,
            }
        }
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, ApplianceError::Authentication { .. })
    }
}

/// Opens authenticated sessions against one appliance.
pub trait ApplianceClient {
    type Session: ApplianceSession;

    async fn open_session(&self) -> Result<Self::Session, ApplianceError>;
}

/// One authenticated session. Each call is a fresh remote read.
pub trait ApplianceSession {
    async fn information(&self) -> Result<DeviceInformation, ApplianceError>;

    async fn utilization(&self) -> Result<Utilization, ApplianceError>;

    async fn storage(&self) -> Result<StorageInfo, ApplianceError>;

    /// Ends the session on the appliance.
    async fn close(self) -> Result<(), ApplianceError>;
}
