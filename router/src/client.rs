//! Clients the router uses to reach tier services.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use strata_retrieval::{
    ErrorBody, QueryAnswer, QueryRequest, RebuildRequest, TierError, TierHealth, TierService,
    TierStats, rebuild_path,
};
use strata_tier_pipeline::PipelineReport;
use strata_vector_index::TierLevel;
use tracing::debug;

use crate::error::{Result, RouterError};

/// Trait for reaching one tier service.
#[async_trait]
pub trait TierClient: Send + Sync {
    /// Tier this client talks to.
    fn tier(&self) -> TierLevel;

    /// Server name reported in routing info and health maps.
    fn name(&self) -> &str;

    /// Ask the tier a question.
    async fn query(&self, request: &QueryRequest) -> Result<QueryAnswer>;

    /// Fetch the tier's live health.
    async fn health(&self) -> Result<TierHealth>;

    /// Fetch the tier's index statistics.
    async fn stats(&self) -> Result<TierStats>;

    /// Rebuild the tier from its input.
    async fn rebuild(&self, request: &RebuildRequest) -> Result<PipelineReport>;
}

/// Talks to a tier service over HTTP.
///
/// Calls carry no timeout of their own; the dispatcher bounds each attempt
/// and dropping the future releases the connection.
#[derive(Debug, Clone)]
pub struct HttpTierClient {
    tier: TierLevel,
    name: String,
    base_url: String,
    client: Client,
}

impl HttpTierClient {
    pub fn new(tier: TierLevel, base_url: impl Into<String>, client: Client) -> Self {
        Self {
            tier,
            name: tier.server_name().to_string(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn unreachable(&self, err: &reqwest::Error) -> RouterError {
        RouterError::Unreachable {
            server: self.name.clone(),
            message: err.to_string(),
        }
    }

    async fn decode<T: DeserializeOwned>(&self, response: Response) -> Result<T> {
        let status = response.status();
        if status.is_success() {
            return response.json::<T>().await.map_err(|e| RouterError::Tier {
                server: self.name.clone(),
                status: Some(status.as_u16()),
                kind: "invalid_response".to_string(),
                message: e.to_string(),
            });
        }
        let text = response.text().await.unwrap_or_default();
        let (kind, message) = match serde_json::from_str::<ErrorBody>(&text) {
            Ok(body) => (body.error, body.message),
            Err(_) => ("http_error".to_string(), text),
        };
        debug!(server = %self.name, status = status.as_u16(), %kind, "tier returned error");
        Err(RouterError::Tier {
            server: self.name.clone(),
            status: Some(status.as_u16()),
            kind,
            message,
        })
    }
}

#[async_trait]
impl TierClient for HttpTierClient {
    fn tier(&self) -> TierLevel {
        self.tier
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn query(&self, request: &QueryRequest) -> Result<QueryAnswer> {
        let response = self
            .client
            .post(self.url("/query"))
            .json(request)
            .send()
            .await
            .map_err(|e| self.unreachable(&e))?;
        self.decode(response).await
    }

    async fn health(&self) -> Result<TierHealth> {
        let response = self
            .client
            .get(self.url("/health"))
            .send()
            .await
            .map_err(|e| self.unreachable(&e))?;
        self.decode(response).await
    }

    async fn stats(&self) -> Result<TierStats> {
        let response = self
            .client
            .get(self.url("/stats"))
            .send()
            .await
            .map_err(|e| self.unreachable(&e))?;
        self.decode(response).await
    }

    async fn rebuild(&self, request: &RebuildRequest) -> Result<PipelineReport> {
        let response = self
            .client
            .post(self.url(rebuild_path(self.tier)))
            .json(request)
            .send()
            .await
            .map_err(|e| self.unreachable(&e))?;
        self.decode(response).await
    }
}

/// Calls a [`TierService`] in the same process.
pub struct LocalTierClient {
    service: Arc<TierService>,
    name: String,
}

impl LocalTierClient {
    pub fn new(service: Arc<TierService>) -> Self {
        Self {
            name: service.tier().server_name().to_string(),
            service,
        }
    }

    fn tier_error(&self, err: TierError) -> RouterError {
        RouterError::Tier {
            server: self.name.clone(),
            status: None,
            kind: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}

#[async_trait]
impl TierClient for LocalTierClient {
    fn tier(&self) -> TierLevel {
        self.service.tier()
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn query(&self, request: &QueryRequest) -> Result<QueryAnswer> {
        self.service
            .answer(&request.question, request.top_k, request.max_output_tokens)
            .await
            .map_err(|e| self.tier_error(e))
    }

    async fn health(&self) -> Result<TierHealth> {
        Ok(self.service.health().await)
    }

    async fn stats(&self) -> Result<TierStats> {
        Ok(self.service.stats().await)
    }

    async fn rebuild(&self, request: &RebuildRequest) -> Result<PipelineReport> {
        self.service
            .rebuild(request.target_ratio)
            .await
            .map_err(|e| self.tier_error(e))
    }
}
