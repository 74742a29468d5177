//! Control panel REST lookups.
//!
//! Only the server lookup is needed before opening a terminal: it confirms
//! the server exists for this account and gives a readable label.

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;
use url::Url;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Server not found")]
    NotFound,

    #[error("request rejected with status {0}")]
    Status(u16),

    #[error("invalid request URL: {0}")]
    Url(#[from] url::ParseError),

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

/// Server details as returned by the panel API
#[allow(dead_code)]
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ServerInfo {
    pub id: String,
    pub name: String,
    pub server_type: String,
    pub hosting_provider: String,
    pub cpu_cores: u32,
    pub memory_gb: f64,
    pub status: String,
    #[serde(default)]
    pub aws_region: Option<String>,
    #[serde(default)]
    pub aws_public_ip: Option<String>,
    pub hourly_rate: f64,
}

impl ServerInfo {
    /// `name [status] · region · 2 vCPU / 4 GB`
    pub fn label(&self) -> String {
        let location = self
            .aws_region
            .as_deref()
            .filter(|r| !r.is_empty())
            .unwrap_or(&self.hosting_provider);
        format!(
            "{} [{}] · {} · {} vCPU / {} GB",
            self.name, self.status, location, self.cpu_cores, self.memory_gb
        )
    }
}

/// Label for a server whose details are not known
pub fn short_label(server_id: &str) -> String {
    let short: String = server_id.chars().take(8).collect();
    format!("{}...", short)
}

/// Panel API client
pub struct PanelClient {
    http: reqwest::Client,
    base: Url,
    servers_path: String,
    token: String,
}

impl PanelClient {
    pub fn new(base: Url, servers_path: &str, token: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base,
            servers_path: servers_path.trim_matches('/').to_string(),
            token: token.to_string(),
        }
    }

    fn server_url(&self, server_id: &str) -> Result<Url, ApiError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| ApiError::Url(url::ParseError::RelativeUrlWithCannotBeABaseBase))?
            .pop_if_empty()
            .extend(self.servers_path.split('/').filter(|s| !s.is_empty()))
            .push(server_id);
        Ok(url)
    }

    /// Fetch server details
    pub async fn server(&self, server_id: &str) -> Result<ServerInfo, ApiError> {
        let url = self.server_url(server_id)?;
        debug!("GET {}", url);

        let response = self.http.get(url).bearer_auth(&self.token).send().await?;
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(ApiError::NotFound);
        }
        if !status.is_success() {
            return Err(ApiError::Status(status.as_u16()));
        }
        Ok(response.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ServerInfo {
        serde_json::from_str(
            r#"{
                "id": "5f0c2a4e-1111-2222-3333-444455556666",
                "name": "build-box",
                "server_type": "standard",
                "hosting_provider": "aws",
                "cpu_cores": 2,
                "memory_gb": 4,
                "status": "running",
                "aws_region": "eu-west-1",
                "aws_public_ip": "203.0.113.7",
                "hourly_rate": 0.05
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_label() {
        let mut info = sample();
        assert_eq!(info.label(), "build-box [running] · eu-west-1 · 2 vCPU / 4 GB");

        info.aws_region = None;
        info.hosting_provider = "docker".to_string();
        info.memory_gb = 0.5;
        info.status = "stopped".to_string();
        assert_eq!(info.label(), "build-box [stopped] · docker · 2 vCPU / 0.5 GB");
    }

    #[test]
    fn test_missing_optional_fields() {
        let info: ServerInfo = serde_json::from_str(
            r#"{"id":"x","name":"n","server_type":"t","hosting_provider":"docker",
                "cpu_cores":1,"memory_gb":1,"status":"stopped","hourly_rate":0}"#,
        )
        .unwrap();
        assert_eq!(info.aws_region, None);
    }

    #[test]
    fn test_short_label() {
        assert_eq!(short_label("5f0c2a4e-1111"), "5f0c2a4e...");
        assert_eq!(short_label("abc"), "abc...");
    }

    #[test]
    fn test_server_url() {
        let client = PanelClient::new(Url::parse("http://localhost:8000/").unwrap(), "/v2/servers/", "t");
        assert_eq!(
            client.server_url("srv-1").unwrap().as_str(),
            "http://localhost:8000/v2/servers/srv-1"
        );
    }
}
