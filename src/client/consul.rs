//! Registry source backed by the Consul agent HTTP API

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace};

use crate::config::ConsulSettings;
use crate::model::RegistryEntry;
use crate::source::{RegistrationRequest, RegistrySource, SourceError};

const TOKEN_HEADER: &str = "X-Consul-Token";

// ============================================================================
// Wire format
// ============================================================================

/// Entry of `GET /v1/agent/services`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AgentService {
    #[serde(rename = "ID")]
    id: String,
    service: String,
    #[serde(default)]
    tags: Option<Vec<String>>,
    #[serde(default)]
    address: String,
    #[serde(default)]
    port: u16,
}

impl From<AgentService> for RegistryEntry {
    fn from(svc: AgentService) -> Self {
        RegistryEntry {
            id: svc.id,
            service: svc.service,
            tags: svc.tags.unwrap_or_default(),
            address: svc.address,
            port: svc.port,
        }
    }
}

/// Body of `PUT /v1/agent/service/register`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
struct AgentServiceRegistration<'a> {
    #[serde(rename = "ID")]
    id: &'a str,
    name: &'a str,
    tags: &'a [String],
    address: &'a str,
    port: u16,
    enable_tag_override: bool,
}

impl<'a> From<&'a RegistrationRequest> for AgentServiceRegistration<'a> {
    fn from(request: &'a RegistrationRequest) -> Self {
        Self {
            id: &request.id,
            name: &request.service,
            tags: &request.tags,
            address: &request.endpoint.address,
            port: request.endpoint.port,
            enable_tag_override: false,
        }
    }
}

// ============================================================================
// SBIO: I/O implementation (real HTTP client)
// ============================================================================

#[derive(Clone)]
pub struct ConsulClient {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl ConsulClient {
    pub fn new(settings: &ConsulSettings, timeout: Duration) -> Result<Self, SourceError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: settings.address.trim_end_matches('/').to_string(),
            token: settings.token.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match self.token {
            Some(ref token) => request.header(TOKEN_HEADER, token),
            None => request,
        }
    }

    async fn error_from(response: reqwest::Response) -> SourceError {
        let status = response.status().as_u16();
        let message = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        SourceError::Api { status, message }
    }
}

#[async_trait]
impl RegistrySource for ConsulClient {
    async fn list_entries(&self) -> Result<Vec<RegistryEntry>, SourceError> {
        let url = format!("{}/v1/agent/services", self.base_url);
        trace!("GET {}", url);

        let response = self.authorize(self.client.get(&url)).send().await?;
        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }

        let services: HashMap<String, AgentService> = response
            .json()
            .await
            .map_err(|e| SourceError::Parse(e.to_string()))?;
        debug!("Consul agent reports {} services", services.len());

        let mut entries: Vec<RegistryEntry> =
            services.into_values().map(RegistryEntry::from).collect();
        entries.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(entries)
    }

    async fn register(&self, request: &RegistrationRequest) -> Result<RegistryEntry, SourceError> {
        let url = format!("{}/v1/agent/service/register", self.base_url);
        let body = AgentServiceRegistration::from(request);

        let response = self
            .authorize(self.client.put(&url).json(&body))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }

        Ok(request.to_entry())
    }

    async fn deregister(&self, id: &str) -> Result<(), SourceError> {
        let mut url = reqwest::Url::parse(&self.base_url)
            .map_err(|e| SourceError::Unavailable(format!("invalid Consul address: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| SourceError::Unavailable("invalid Consul address".to_string()))?
            .pop_if_empty()
            .extend(["v1", "agent", "service", "deregister", id]);

        let response = self.authorize(self.client.put(url)).send().await?;
        match response.status() {
            status if status.is_success() => {
                info!("Service with ID {} deregistered from Consul", id);
                Ok(())
            }
            StatusCode::NOT_FOUND => {
                debug!("Service with ID {} was already gone from Consul", id);
                Ok(())
            }
            _ => Err(Self::error_from(response).await),
        }
    }
}
