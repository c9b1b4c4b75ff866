//! Client for the DiskStation Manager Web API.
//!
//! A session is: discover CGI paths through `SYNO.API.Info`, log in with
//! `SYNO.API.Auth` to obtain a `sid`, pass `_sid` on every data call, log out.
//! Every response is wrapped in `{ "success": bool, "data": .., "error": { "code": n } }`.
//! Only plain HTTP is spoken.

use super::models::UtilizationPayload;
use super::{
    ApplianceClient, ApplianceError, ApplianceSession, DeviceInformation, StorageInfo,
    Utilization,
};
use crate::config::ApplianceConfig;
use reqwest::{Client, Url};
use serde::de::{DeserializeOwned, IgnoredAny};
use serde::Deserialize;
use std::collections::HashMap;
use std::net::IpAddr;
use tracing::debug;

pub const API_INFO: &str = "SYNO.API.Info";
pub const API_AUTH: &str = "SYNO.API.Auth";
pub const API_DSM_INFO: &str = "SYNO.DSM.Info";
pub const API_UTILIZATION: &str = "SYNO.Core.System.Utilization";
pub const API_STORAGE: &str = "SYNO.Storage.CGI.Storage";

const QUERY_PATH: &str = "query.cgi";
const SESSION_NAME: &str = "SynologyCollector";

/// Version we speak per API, clamped into the range the appliance advertises.
const PREFERRED_VERSIONS: [(&str, u32); 4] = [
    (API_AUTH, 6),
    (API_DSM_INFO, 2),
    (API_UTILIZATION, 1),
    (API_STORAGE, 1),
];

pub struct DsmClient {
    http: Client,
    base_url: Url,
    username: String,
    password: String,
}

pub struct DsmSession {
    http: Client,
    base_url: Url,
    endpoints: HashMap<String, Endpoint>,
    sid: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Endpoint {
    path: String,
    version: u32,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    success: bool,
    data: Option<T>,
    error: Option<ErrorBody>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: u16,
}

#[derive(Debug, Deserialize)]
struct ApiInfo {
    path: String,
    #[serde(rename = "minVersion")]
    min_version: u32,
    #[serde(rename = "maxVersion")]
    max_version: u32,
}

#[derive(Debug, Deserialize)]
struct LoginData {
    sid: String,
}

impl DsmClient {
    pub fn new(cfg: &ApplianceConfig) -> Result<Self, ApplianceError> {
        let base_url = base_url(&cfg.host, cfg.port)?;
        let http = Client::builder()
            .user_agent(concat!("synology-collector/", env!("CARGO_PKG_VERSION")))
            .timeout(cfg.request_timeout)
            .build()
            .map_err(|err| ApplianceError::transport("http client", err))?;

        Ok(Self {
            http,
            base_url,
            username: cfg.username.clone(),
            password: cfg.password().to_string(),
        })
    }

    async fn discover(&self) -> Result<HashMap<String, Endpoint>, ApplianceError> {
        let wanted = PREFERRED_VERSIONS
            .iter()
            .map(|(api, _)| *api)
            .collect::<Vec<_>>()
            .join(",");
        let url = join(&self.base_url, QUERY_PATH)?;
        let infos: HashMap<String, ApiInfo> = require(
            API_INFO,
            call(
                &self.http,
                url,
                API_INFO,
                &[
                    ("api", API_INFO),
                    ("version", "1"),
                    ("method", "query"),
                    ("query", wanted.as_str()),
                ],
            )
            .await?,
        )?;

        PREFERRED_VERSIONS
            .iter()
            .map(|(api, preferred)| {
                let info = infos
                    .get(*api)
                    .ok_or_else(|| ApplianceError::UnsupportedApi((*api).to_string()))?;
                let version = (*preferred).min(info.max_version).max(info.min_version);
                Ok((
                    (*api).to_string(),
                    Endpoint {
                        path: info.path.clone(),
                        version,
                    },
                ))
            })
            .collect()
    }
}

impl ApplianceClient for DsmClient {
    type Session = DsmSession;

    async fn open_session(&self) -> Result<DsmSession, ApplianceError> {
        let endpoints = self.discover().await?;
        let auth = endpoint(&endpoints, API_AUTH)?;
        let url = join(&self.base_url, &auth.path)?;
        let version = auth.version.to_string();

        debug!(api = API_AUTH, version = auth.version, user = %self.username, "logging in");
        let login: LoginData = require(
            API_AUTH,
            call(
                &self.http,
                url,
                API_AUTH,
                &[
                    ("api", API_AUTH),
                    ("version", version.as_str()),
                    ("method", "login"),
                    ("account", self.username.as_str()),
                    ("passwd", self.password.as_str()),
                    ("session", SESSION_NAME),
                    ("format", "sid"),
                ],
            )
            .await?,
        )?;

        Ok(DsmSession {
            http: self.http.clone(),
            base_url: self.base_url.clone(),
            endpoints,
            sid: login.sid,
        })
    }
}

impl DsmSession {
    async fn fetch<T: DeserializeOwned>(
        &self,
        api: &str,
        method: &str,
    ) -> Result<T, ApplianceError> {
        let target = endpoint(&self.endpoints, api)?;
        let url = join(&self.base_url, &target.path)?;
        let version = target.version.to_string();
        require(
            api,
            call(
                &self.http,
                url,
                api,
                &[
                    ("api", api),
                    ("version", version.as_str()),
                    ("method", method),
                    ("_sid", self.sid.as_str()),
                ],
            )
            .await?,
        )
    }
}

impl ApplianceSession for DsmSession {
    async fn information(&self) -> Result<DeviceInformation, ApplianceError> {
        self.fetch(API_DSM_INFO, "getinfo").await
    }

    async fn utilization(&self) -> Result<Utilization, ApplianceError> {
        let raw: UtilizationPayload = self.fetch(API_UTILIZATION, "get").await?;
        Ok(raw.into())
    }

    async fn storage(&self) -> Result<StorageInfo, ApplianceError> {
        self.fetch(API_STORAGE, "load_info").await
    }

    async fn close(self) -> Result<(), ApplianceError> {
        let auth = endpoint(&self.endpoints, API_AUTH)?;
        let url = join(&self.base_url, &auth.path)?;
        let version = auth.version.to_string();
        let _: Option<IgnoredAny> = call(
            &self.http,
            url,
            API_AUTH,
            &[
                ("api", API_AUTH),
                ("version", version.as_str()),
                ("method", "logout"),
                ("session", SESSION_NAME),
                ("_sid", self.sid.as_str()),
            ],
        )
        .await?;
        debug!("logged out");
        Ok(())
    }
}

/// Sends one GET and unwraps the envelope. Query strings carry credentials,
/// so only the api name and path are logged.
async fn call<T: DeserializeOwned>(
    http: &Client,
    url: Url,
    api: &str,
    query: &[(&str, &str)],
) -> Result<Option<T>, ApplianceError> {
    debug!(api, path = url.path(), "dsm request");
    let resp = http
        .get(url)
        .query(query)
        .send()
        .await
        .map_err(|err| ApplianceError::transport(api, err))?;

    let status = resp.status();
    if !status.is_success() {
        return Err(ApplianceError::HttpStatus {
            api: api.to_string(),
            status: status.as_u16(),
        });
    }

    let body = resp
        .text()
        .await
        .map_err(|err| ApplianceError::transport(api, err))?;
    let envelope: Envelope<T> =
        serde_json::from_str(&body).map_err(|err| ApplianceError::Malformed {
            api: api.to_string(),
            message: err.to_string(),
            body: body.clone(),
        })?;

    if envelope.success {
        return Ok(envelope.data);
    }
    // DSM sends no error object for some failures; 100 is its "unknown error".
    let code = envelope.error.map_or(100, |e| e.code);
    Err(api_error(api, code))
}

fn require<T>(api: &str, data: Option<T>) -> Result<T, ApplianceError> {
    data.ok_or_else(|| ApplianceError::Malformed {
        api: api.to_string(),
        message: "response has no data".to_string(),
        body: String::new(),
    })
}

fn endpoint<'a>(
    endpoints: &'a HashMap<String, Endpoint>,
    api: &str,
) -> Result<&'a Endpoint, ApplianceError> {
    endpoints
        .get(api)
        .ok_or_else(|| ApplianceError::UnsupportedApi(api.to_string()))
}

/// `http://host:port/webapi/`, with IPv6 literals bracketed.
fn base_url(host: &str, port: u16) -> Result<Url, ApplianceError> {
    let host = host.trim();
    let address = match host.parse::<IpAddr>() {
        Ok(IpAddr::V6(ip)) => format!("[{ip}]:{port}"),
        _ => format!("{host}:{port}"),
    };
    Url::parse(&format!("http://{address}/webapi/"))
        .map_err(|err| ApplianceError::InvalidAddress(format!("{address}: {err}")))
}

fn join(base: &Url, path: &str) -> Result<Url, ApplianceError> {
    base.join(path)
        .map_err(|err| ApplianceError::InvalidAddress(format!("{base}{path}: {err}")))
}

fn api_error(api: &str, code: u16) -> ApplianceError {
    let message = describe_error(api, code).to_string();
    if api == API_AUTH || matches!(code, 105 | 106 | 107 | 119) {
        ApplianceError::Authentication { code, message }
    } else {
        ApplianceError::Api {
            api: api.to_string(),
            code,
            message,
        }
    }
}

fn describe_error(api: &str, code: u16) -> &'static str {
    match (api, code) {
        (_, 100) => "unknown error",
        (_, 101) => "invalid parameter",
        (_, 102) => "requested API does not exist",
        (_, 103) => "requested method does not exist",
        (_, 104) => "requested version does not support this functionality",
        (_, 105) => "insufficient user privilege",
        (_, 106) => "session timed out",
        (_, 107) => "session interrupted by duplicate login",
        (_, 119) => "session id not found",
        (API_AUTH, 400) => "no such account or incorrect password",
        (API_AUTH, 401) => "account disabled",
        (API_AUTH, 402) => "permission denied",
        (API_AUTH, 403) => "2-step verification code required",
        (API_AUTH, 404) => "failed to authenticate 2-step verification code",
        (API_AUTH, 406) => "2-step verification is enforced for this account",
        (API_AUTH, 407) => "client IP address blocked",
        (API_AUTH, 408) => "password expired and cannot be changed",
        (API_AUTH, 409) => "password expired",
        (API_AUTH, 410) => "password must be changed",
        _ => "unrecognized error code",
    }
}
