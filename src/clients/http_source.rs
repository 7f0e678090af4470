//! REST client for the upstream settlement platform.

use std::error::Error as StdError;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

use crate::config::FlowSourceConfig;
use crate::interfaces::flow_source::Result;
use crate::interfaces::{
    operation, FlowHeader, FlowMetadata, FlowSource, FlowSourceError, Page, PaymentItem,
};

/// Header carrying the API gateway subscription key.
pub const SUBSCRIPTION_KEY_HEADER: &str = "Ocp-Apim-Subscription-Key";

/// Message hyper reports when the peer hangs up without replying.
const EMPTY_REPLY_MESSAGE: &str = "connection closed before message completed";

/// HTTP flow source configuration.
#[derive(Debug, Clone)]
pub struct HttpFlowSourceConfig {
    pub base_url: String,
    pub subscription_key: Option<String>,
    pub timeout: Duration,
    pub page_size: u32,
}

impl Default for HttpFlowSourceConfig {
    fn default() -> Self {
        Self::from(&FlowSourceConfig::default())
    }
}

impl From<&FlowSourceConfig> for HttpFlowSourceConfig {
    fn from(config: &FlowSourceConfig) -> Self {
        Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            subscription_key: config.subscription_key.clone().filter(|k| !k.is_empty()),
            timeout: config.timeout(),
            page_size: config.page_size.max(1),
        }
    }
}

impl HttpFlowSourceConfig {
    /// Set the base URL.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Set the subscription key.
    pub fn with_subscription_key(mut self, key: impl Into<String>) -> Self {
        self.subscription_key = Some(key.into());
        self
    }

    /// Set the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Pagination block of a paged response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageInfo {
    page_number: u32,
    tot_page: u32,
}

#[derive(Debug, Deserialize)]
struct PagedResponse<T> {
    metadata: PageInfo,
    #[serde(default = "Vec::new")]
    data: Vec<T>,
}

impl<T> From<PagedResponse<T>> for Page<T> {
    fn from(response: PagedResponse<T>) -> Self {
        Page::new(
            response.data,
            response.metadata.page_number,
            response.metadata.tot_page,
        )
    }
}

/// Flow source backed by the platform's REST API.
pub struct HttpFlowSource {
    client: Client,
    config: HttpFlowSourceConfig,
}

impl HttpFlowSource {
    pub fn new(config: HttpFlowSourceConfig) -> std::result::Result<Self, FlowSourceError> {
        if config.base_url.is_empty() {
            return Err(FlowSourceError::permanent("configure", "base URL not configured"));
        }

        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| FlowSourceError::permanent("configure", e.to_string()))?;

        Ok(Self { client, config })
    }

    fn flows_url(&self, domain: &str) -> String {
        format!("{}/organizations/{}/fdrs", self.config.base_url, domain)
    }

    fn flow_url(&self, domain: &str, flow_code: &str, revision: i64, psp_id: &str) -> String {
        format!(
            "{}/{}/revisions/{}/psps/{}",
            self.flows_url(domain),
            flow_code,
            revision,
            psp_id
        )
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        operation: &str,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let mut request = self.client.get(url).query(query);
        if let Some(key) = &self.config.subscription_key {
            request = request.header(SUBSCRIPTION_KEY_HEADER, key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| classify_error(operation, &e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(operation, status, &body));
        }

        debug!(operation, url, "Upstream call succeeded");
        response
            .json::<T>()
            .await
            .map_err(|e| classify_error(operation, &e))
    }
}

/// Map a non-success HTTP status to a tagged error.
pub(crate) fn classify_status(operation: &str, status: StatusCode, body: &str) -> FlowSourceError {
    let message = format!(
        "HTTP {} - {}",
        status,
        body.chars().take(200).collect::<String>()
    );
    if is_retryable_status(status) {
        FlowSourceError::transient(operation, message)
    } else {
        FlowSourceError::permanent(operation, message)
    }
}

/// Retry 429 (rate limit) and 5xx (server errors).
pub(crate) fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn classify_error(operation: &str, err: &reqwest::Error) -> FlowSourceError {
    if is_empty_reply(err) {
        return FlowSourceError::empty_reply(operation);
    }
    if let Some(status) = err.status() {
        return classify_status(operation, status, "");
    }
    if err.is_decode() {
        return FlowSourceError::permanent(operation, err.to_string());
    }
    if err.is_timeout() || err.is_connect() || err.is_request() || err.is_body() {
        return FlowSourceError::transient(operation, err.to_string());
    }
    FlowSourceError::permanent(operation, err.to_string())
}

/// True if the error, or anything in its source chain, is the peer closing
/// the connection before sending a response.
pub(crate) fn is_empty_reply(err: &(dyn StdError + 'static)) -> bool {
    let mut current: Option<&(dyn StdError + 'static)> = Some(err);
    while let Some(e) = current {
        if e.to_string().contains(EMPTY_REPLY_MESSAGE) {
            return true;
        }
        current = e.source();
    }
    false
}

// Full precision: cursors sit one microsecond before a pending flow.
fn format_since(since: DateTime<Utc>) -> String {
    since.to_rfc3339_opts(SecondsFormat::Micros, true)
}

#[async_trait]
impl FlowSource for HttpFlowSource {
    async fn list_flows(
        &self,
        domain: &str,
        since: Option<DateTime<Utc>>,
        page: u32,
    ) -> Result<Page<FlowHeader>> {
        let mut query = vec![
            ("page", page.to_string()),
            ("size", self.config.page_size.to_string()),
        ];
        if let Some(since) = since {
            query.push(("publishedGt", format_since(since)));
        }

        let response: PagedResponse<FlowHeader> = self
            .get_json(operation::LIST_FLOWS, &self.flows_url(domain), &query)
            .await?;
        Ok(response.into())
    }

    async fn get_flow_details(
        &self,
        domain: &str,
        flow_code: &str,
        revision: i64,
        psp_id: &str,
    ) -> Result<FlowMetadata> {
        self.get_json(
            operation::GET_FLOW_DETAILS,
            &self.flow_url(domain, flow_code, revision, psp_id),
            &[],
        )
        .await
    }

    async fn get_payments(
        &self,
        domain: &str,
        flow_code: &str,
        revision: i64,
        psp_id: &str,
        page: u32,
    ) -> Result<Page<PaymentItem>> {
        let url = format!("{}/payments", self.flow_url(domain, flow_code, revision, psp_id));
        let query = [
            ("page", page.to_string()),
            ("size", self.config.page_size.to_string()),
        ];

        let response: PagedResponse<PaymentItem> = self
            .get_json(operation::GET_PAYMENTS, &url, &query)
            .await?;
        Ok(response.into())
    }
}
