//! Ludus API client

use async_trait::async_trait;
use ludus_common::logs::split_lines;
use ludus_common::{Error, PollRequest, RangeConfig, Result, StatusReport, StatusSource};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::CliConfig;

/// Deployed range as returned by `GET /range`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RangeObject {
    #[serde(rename = "userID", default)]
    pub user_id: String,
    #[serde(rename = "rangeNumber", default)]
    pub range_number: u32,
    #[serde(rename = "rangeState", default)]
    pub range_state: String,
    #[serde(rename = "lastDeployment", default)]
    pub last_deployment: Option<String>,
    #[serde(rename = "numberOfVMs", default)]
    pub number_of_vms: u32,
    #[serde(rename = "testingEnabled", default)]
    pub testing_enabled: bool,
    #[serde(rename = "VMs", default)]
    pub vms: Vec<VmObject>,
}

/// Deployed VM entry of a range
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VmObject {
    #[serde(rename = "proxmoxID", default)]
    pub proxmox_id: u32,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "poweredOn", default)]
    pub powered_on: bool,
    #[serde(default)]
    pub ip: Option<String>,
}

/// A template currently building
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateStatus {
    pub template: String,
    pub user: String,
}

/// One page of a server-side log
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogPage {
    #[serde(default)]
    pub result: String,
    #[serde(default)]
    pub cursor: Option<u64>,
}

/// Body of `POST /range/deploy`
#[derive(Debug, Clone, Default, Serialize)]
pub struct DeployRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub force: Option<bool>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub only_roles: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<String>,
}

#[derive(Deserialize)]
struct ConfigResponse {
    result: String,
}

/// Client for the Ludus management API
#[derive(Clone)]
pub struct LudusClient {
    http: reqwest::Client,
    base_url: String,
}

impl LudusClient {
    /// Create a client from CLI configuration
    pub fn new(config: &CliConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(key) = &config.api_key {
            let value = HeaderValue::from_str(key)
                .map_err(|_| Error::InvalidConfig("API key is not a valid header value".into()))?;
            headers.insert("X-API-Key", value);
        }

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.request_timeout())
            .danger_accept_invalid_certs(config.insecure_tls)
            .build()
            .map_err(transport)?;

        Ok(Self {
            http,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http.request(method, format!("{}{}", self.base_url, path))
    }

    async fn send_json<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T> {
        let response = builder.send().await.map_err(transport)?;
        let response = check_status(response).await?;
        response.json().await.map_err(transport)
    }

    // Range operations

    /// Get the range owned by `user_id` (or the caller's own range)
    pub async fn get_range(&self, user_id: Option<&str>) -> Result<RangeObject> {
        let builder = self.request(Method::GET, "/range").query(&user_query(user_id));
        self.send_json(builder).await
    }

    /// Fetch range deploy log lines after `resume_line`
    pub async fn range_logs(&self, user_id: Option<&str>, resume_line: Option<u64>) -> Result<LogPage> {
        let mut query = user_query(user_id);
        if let Some(line) = resume_line {
            query.push(("resumeline", line.to_string()));
        }
        let builder = self.request(Method::GET, "/range/logs").query(&query);
        self.send_json(builder).await
    }

    /// Start a range deployment
    pub async fn deploy_range(&self, user_id: Option<&str>, body: &DeployRequest) -> Result<Value> {
        let builder = self
            .request(Method::POST, "/range/deploy")
            .query(&user_query(user_id))
            .json(body);
        self.send_json(builder).await
    }

    /// Abort a running deployment
    pub async fn abort_range(&self, user_id: Option<&str>) -> Result<()> {
        let builder = self
            .request(Method::POST, "/range/abort")
            .query(&user_query(user_id));
        let _: Value = self.send_json(builder).await?;
        Ok(())
    }

    /// Fetch and parse the range config
    pub async fn range_config(&self, user_id: Option<&str>) -> Result<RangeConfig> {
        let builder = self
            .request(Method::GET, "/range/config")
            .query(&user_query(user_id));
        let response: ConfigResponse = self.send_json(builder).await?;
        RangeConfig::from_yaml(&response.result)
    }

    // Template operations

    /// Templates currently building
    pub async fn templates_status(&self) -> Result<Vec<TemplateStatus>> {
        let builder = self.request(Method::GET, "/templates/status");
        let statuses: Option<Vec<TemplateStatus>> = self.send_json(builder).await?;
        Ok(statuses.unwrap_or_default())
    }

    /// Fetch template build log lines after `resume_line`
    pub async fn template_logs(&self, resume_line: Option<u64>) -> Result<LogPage> {
        let mut query = Vec::new();
        if let Some(line) = resume_line {
            query.push(("resumeline", line.to_string()));
        }
        let builder = self.request(Method::GET, "/templates/logs").query(&query);
        self.send_json(builder).await
    }
}

fn user_query(user_id: Option<&str>) -> Vec<(&'static str, String)> {
    user_id
        .filter(|id| !id.is_empty())
        .map(|id| vec![("userID", id.to_string())])
        .unwrap_or_default()
}

fn transport(e: reqwest::Error) -> Error {
    Error::Transport(e.to_string())
}

async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let fallback = status
        .canonical_reason()
        .unwrap_or("request failed")
        .to_string();
    let body = response.text().await.unwrap_or_default();
    Err(Error::Api {
        status: status.as_u16(),
        message: extract_error_message(&body, &fallback),
    })
}

/// Pull a readable message out of the error bodies Ludus returns.
pub fn extract_error_message(body: &str, fallback: &str) -> String {
    let Ok(value) = serde_json::from_str::<Value>(body) else {
        let trimmed = body.trim();
        return if trimmed.is_empty() {
            fallback.to_string()
        } else {
            trimmed.to_string()
        };
    };

    let candidates = [
        value.pointer("/error/message"),
        value.get("error"),
        value.get("message"),
        value.get("details"),
    ];
    let message = candidates
        .into_iter()
        .flatten()
        .find_map(|v| v.as_str().map(str::to_string));
    message.unwrap_or_else(|| fallback.to_string())
}

fn log_report(status: String, page: LogPage) -> StatusReport {
    StatusReport {
        status,
        log_lines: Some(split_lines(&page.result)),
        next_cursor: page.cursor,
    }
}

/// Range deployment status, keyed by the owning user ID
pub struct RangeStatusSource {
    client: LudusClient,
}

impl RangeStatusSource {
    pub fn new(client: LudusClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl StatusSource for RangeStatusSource {
    async fn poll(&self, request: &PollRequest) -> Result<StatusReport> {
        let user = Some(request.owner_id.as_str());
        let range = self.client.get_range(user).await?;
        debug!(user = %range.user_id, state = %range.range_state, "Range status");

        if !request.include_logs {
            return Ok(StatusReport::status(range.range_state));
        }

        // A failed log fetch should not hide a good status answer
        match self.client.range_logs(user, request.log_cursor).await {
            Ok(page) => Ok(log_report(range.range_state, page)),
            Err(e) => {
                warn!("Failed to fetch range logs: {}", e);
                Ok(StatusReport::status(range.range_state))
            }
        }
    }
}

/// Template build progress. Reports `ACTIVE` while any watched template
/// is building and `SUCCESS` once none are.
pub struct TemplateBuildSource {
    client: LudusClient,
    templates: Vec<String>,
}

impl TemplateBuildSource {
    /// Watch `templates`, or every build when empty
    pub fn new(client: LudusClient, templates: Vec<String>) -> Self {
        Self { client, templates }
    }

    fn building(&self, statuses: &[TemplateStatus]) -> bool {
        statuses
            .iter()
            .any(|s| self.templates.is_empty() || self.templates.contains(&s.template))
    }
}

#[async_trait]
impl StatusSource for TemplateBuildSource {
    async fn poll(&self, request: &PollRequest) -> Result<StatusReport> {
        let statuses = self.client.templates_status().await?;
        let status = if self.building(&statuses) { "ACTIVE" } else { "SUCCESS" }.to_string();

        if !request.include_logs {
            return Ok(StatusReport::status(status));
        }

        match self.client.template_logs(request.log_cursor).await {
            Ok(page) => Ok(log_report(status, page)),
            Err(e) => {
                warn!("Failed to fetch template logs: {}", e);
                Ok(StatusReport::status(status))
            }
        }
    }
}
