use crate::snapshot::DeviceSnapshot;
use reqwest::header::CONTENT_TYPE;
use reqwest::redirect::Policy;
use reqwest::{Client, Url};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Longest response body kept for diagnostics.
const MAX_ERROR_BODY: usize = 2048;

#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("failed to serialize snapshot: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("POST {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("POST {url} returned HTTP {status}")]
    Status {
        url: String,
        status: u16,
        body: Option<String>,
    },
    #[error("forwarding did not finish within {0:?}")]
    DeadlineExceeded(Duration),
}

impl ForwardError {
    pub fn status_code(&self) -> Option<u16> {
        match self {
            ForwardError::Status { status, .. } => Some(*status),
            ForwardError::Transport { source, .. } => source.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    pub fn url(&self) -> Option<&str> {
        match self {
            ForwardError::Transport { url, .. } | ForwardError::Status { url, .. } => {
                Some(url.as_str())
            }
            _ => None,
        }
    }

    pub fn body(&self) -> Option<&str> {
        match self {
            ForwardError::Status { body, .. } => body.as_deref(),
            _ => None,
        }
    }
}

/// Redirects are not followed: a 3xx would turn the POST into a GET.
pub fn build_client(timeout: Duration) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(concat!("synology-collector/", env!("CARGO_PKG_VERSION")))
        .timeout(timeout)
        .redirect(Policy::none())
        .build()
}

/// POSTs the snapshot as JSON. Anything but a 2xx answer is an error.
pub async fn send(
    client: &Client,
    endpoint: &Url,
    snapshot: &DeviceSnapshot,
) -> Result<(), ForwardError> {
    let body = serde_json::to_vec(snapshot)?;
    debug!(url = %endpoint, bytes = body.len(), "posting snapshot");

    let resp = client
        .post(endpoint.clone())
        .header(CONTENT_TYPE, "application/json")
        .body(body)
        .send()
        .await
        .map_err(|source| ForwardError::Transport {
            url: endpoint.to_string(),
            source,
        })?;

    let status = resp.status();
    if status.is_success() {
        return Ok(());
    }

    let body = resp
        .text()
        .await
        .ok()
        .filter(|text| !text.is_empty())
        .map(truncate_body);
    Err(ForwardError::Status {
        url: endpoint.to_string(),
        status: status.as_u16(),
        body,
    })
}

fn truncate_body(mut text: String) -> String {
    if text.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        text.truncate(cut);
    }
    text
}
