use crate::snapshot::VolumeNames;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const ENV_HOST: &str = "NAS_IP";
pub const ENV_PORT: &str = "NAS_PORT";
pub const ENV_USER: &str = "NAS_USER";
pub const ENV_INGEST_URL: &str = "LOCAL_API_BASE_URL";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub appliance: ApplianceConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default = "default_run_timeout", with = "duration_str")]
    pub run_timeout: Duration,
    #[serde(default)]
    pub volume_names: VolumeNames,
    #[serde(default)]
    pub metrics_textfile: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApplianceConfig {
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
    #[serde(default = "default_password_env")]
    pub password_env: String,
    #[serde(default = "default_request_timeout", with = "duration_str")]
    pub request_timeout: Duration,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IngestConfig {
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_request_timeout", with = "duration_str")]
    pub request_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            appliance: ApplianceConfig::default(),
            ingest: IngestConfig::default(),
            run_timeout: default_run_timeout(),
            volume_names: VolumeNames::default(),
            metrics_textfile: None,
        }
    }
}

impl Default for ApplianceConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 0,
            username: String::new(),
            password: None,
            password_env: default_password_env(),
            request_timeout: default_request_timeout(),
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            request_timeout: default_request_timeout(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("не удалось прочитать файл конфигурации {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("не удалось разобрать YAML в {path}: {source}")]
    Parse {
        path: String,
        source: serde_yaml::Error,
    },
    #[error("ошибка валидации конфигурации: {0}")]
    Validation(String),
}

impl Config {
    /// Reads the optional file, applies environment overrides and validates.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut cfg = match path {
            Some(path) => Self::load_from_file(path)?,
            None => Self::default(),
        };
        cfg.apply_env_overrides(|name| std::env::var(name).ok())?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        let path_display = path_ref.display().to_string();
        let text = fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
            path: path_display.clone(),
            source,
        })?;

        serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path_display,
            source,
        })
    }

    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        if let Some(host) = read(ENV_HOST) {
            self.appliance.host = host;
        }
        if let Some(port) = read(ENV_PORT) {
            self.appliance.port = port.parse().map_err(|_| {
                ConfigError::Validation(format!("{ENV_PORT} должен быть номером порта, получено '{port}'"))
            })?;
        }
        if let Some(user) = read(ENV_USER) {
            self.appliance.username = user;
        }
        if let Some(password) = read(&self.appliance.password_env) {
            self.appliance.password = Some(password);
        }
        if let Some(url) = read(ENV_INGEST_URL) {
            self.ingest.url = url;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_appliance(&self.appliance)?;
        self.ingest_url()?;
        if self.ingest.request_timeout.is_zero() {
            return Err(ConfigError::Validation(
                "ingest.request_timeout должен быть > 0".to_string(),
            ));
        }
        if self.run_timeout.is_zero() {
            return Err(ConfigError::Validation(
                "run_timeout должен быть > 0".to_string(),
            ));
        }
        if self
            .volume_names
            .aliases
            .keys()
            .any(|id| id.trim().is_empty())
        {
            return Err(ConfigError::Validation(
                "ключи volume_names.aliases не должны быть пустыми".to_string(),
            ));
        }
        Ok(())
    }

    pub fn ingest_url(&self) -> Result<Url, ConfigError> {
        if self.ingest.url.trim().is_empty() {
            return Err(ConfigError::Validation(format!(
                "поле ingest.url обязательно (или задайте {ENV_INGEST_URL})"
            )));
        }
        let url = Url::parse(self.ingest.url.trim()).map_err(|err| {
            ConfigError::Validation(format!("ingest.url '{}' некорректен: {err}", self.ingest.url))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::Validation(format!(
                "ingest.url должен использовать http или https, получено '{}'",
                url.scheme()
            )));
        }
        Ok(url)
    }

    pub fn example_yaml() -> &'static str {
        include_str!("../config.yaml.example")
    }
}

impl ApplianceConfig {
    pub fn password(&self) -> &str {
        self.password.as_deref().unwrap_or_default()
    }
}

fn validate_appliance(cfg: &ApplianceConfig) -> Result<(), ConfigError> {
    if cfg.host.trim().is_empty() {
        return Err(ConfigError::Validation(format!(
            "поле appliance.host обязательно (или задайте {ENV_HOST})"
        )));
    }
    if cfg.port == 0 {
        return Err(ConfigError::Validation(format!(
            "appliance.port должен быть в диапазоне 1..65535 (или задайте {ENV_PORT})"
        )));
    }
    if cfg.username.trim().is_empty() {
        return Err(ConfigError::Validation(format!(
            "поле appliance.username обязательно (или задайте {ENV_USER})"
        )));
    }
    if cfg.password().is_empty() {
        return Err(ConfigError::Validation(format!(
            "не задан пароль устройства: задайте переменную '{}' или appliance.password",
            cfg.password_env
        )));
    }
    if cfg.request_timeout.is_zero() {
        return Err(ConfigError::Validation(
            "appliance.request_timeout должен быть > 0".to_string(),
        ));
    }
    Ok(())
}

fn default_password_env() -> String {
    "NAS_PASSWORD".to_string()
}

const fn default_request_timeout() -> Duration {
    Duration::from_secs(10)
}

const fn default_run_timeout() -> Duration {
    Duration::from_secs(30)
}

mod duration_str {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        humantime::parse_duration(&text).map_err(serde::de::Error::custom)
    }

    pub fn serialize<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }
}
