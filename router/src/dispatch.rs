//! Dispatch with fallback.
//!
//! Each query is classified, sent to the primary tier, and retried once
//! against a fallback tier when the primary reports `running=false`, errors,
//! or runs out of its share of the request budget. A primary that reports
//! `running=false` is never queried.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use strata_retrieval::{Citation, QueryAnswer, QueryRequest};
use strata_vector_index::TierLevel;
use tokio::time::{Instant, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::classify::{Classification, ClassificationRules, Complexity, classify};
use crate::client::{HttpTierClient, TierClient};
use crate::config::RouterConfig;
use crate::error::{Result, RouterError};

/// Why an attempt against a tier did not produce an answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackReason {
    /// The tier reports `running=false` or has no configured server.
    PrimaryTierUnavailable,
    /// The tier could not be reached.
    PrimaryTierUnreachable,
    /// The tier answered with an error.
    PrimaryTierError,
    /// The tier did not answer within its budget.
    Timeout,
}

impl fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FallbackReason::PrimaryTierUnavailable => "primary_tier_unavailable",
            FallbackReason::PrimaryTierUnreachable => "primary_tier_unreachable",
            FallbackReason::PrimaryTierError => "primary_tier_error",
            FallbackReason::Timeout => "timeout",
        };
        f.write_str(name)
    }
}

/// Body of the router's `POST /query`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteRequest {
    pub question: String,
    #[serde(default)]
    pub top_k: Option<usize>,
    #[serde(default)]
    pub max_output_tokens: Option<u32>,
    /// Skip classification and use this server (`server1`..`server3`).
    #[serde(default)]
    pub target_server: Option<String>,
}

impl RouteRequest {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            top_k: None,
            max_output_tokens: None,
            target_server: None,
        }
    }

    pub fn with_target(mut self, server: impl Into<String>) -> Self {
        self.target_server = Some(server.into());
        self
    }
}

/// How a query was routed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingInfo {
    pub primary_server: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_server: Option<String>,
    pub complexity: Complexity,
    pub confidence: f64,
    pub fallback_used: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<FallbackReason>,
    /// What went wrong with the primary, when the fallback answered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_error: Option<String>,
    /// The request named its server instead of being classified.
    #[serde(default)]
    pub target_override: bool,
}

/// A tier's answer plus the routing that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutedAnswer {
    pub answer: String,
    pub citations: Vec<Citation>,
    pub used_top_k: usize,
    pub routing_info: RoutingInfo,
    pub prompt: String,
}

impl RoutedAnswer {
    fn new(answer: QueryAnswer, routing_info: RoutingInfo) -> Self {
        Self {
            answer: answer.answer,
            citations: answer.citations,
            used_top_k: answer.used_top_k,
            routing_info,
            prompt: answer.prompt,
        }
    }
}

/// Outcome of one failed attempt.
enum AttemptFailure {
    Cancelled,
    Failed {
        reason: FallbackReason,
        error: String,
    },
}

/// Routes queries to tier clients.
pub struct Dispatcher {
    clients: Vec<Arc<dyn TierClient>>,
    rules: ClassificationRules,
    fallback_order: Vec<TierLevel>,
    request_timeout: Duration,
    primary_share: f64,
    pub(crate) health_timeout: Duration,
    pub(crate) rebuild_timeout: Duration,
}

impl Dispatcher {
    /// Create a dispatcher over `clients`.
    pub fn new(config: &RouterConfig, clients: Vec<Arc<dyn TierClient>>) -> Result<Self> {
        let problems = config.validate();
        if !problems.is_empty() {
            return Err(RouterError::InvalidConfig(problems.join("; ")));
        }
        Ok(Self {
            clients,
            rules: config.classification.clone(),
            fallback_order: config.fallback_order.clone(),
            request_timeout: config.request_timeout(),
            primary_share: config.primary_budget_share,
            health_timeout: config.health_timeout(),
            rebuild_timeout: config.rebuild_timeout(),
        })
    }

    /// Create a dispatcher that reaches the configured servers over HTTP.
    pub fn over_http(config: &RouterConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| RouterError::InvalidConfig(format!("failed to build HTTP client: {e}")))?;
        let clients = config
            .servers
            .iter()
            .map(|server| {
                Arc::new(HttpTierClient::new(server.tier, &server.url, http.clone()))
                    as Arc<dyn TierClient>
            })
            .collect();
        Self::new(config, clients)
    }

    pub fn clients(&self) -> &[Arc<dyn TierClient>] {
        &self.clients
    }

    /// Client for `tier`, if one is configured.
    pub fn client_for(&self, tier: TierLevel) -> Option<&Arc<dyn TierClient>> {
        self.clients.iter().find(|c| c.tier() == tier)
    }

    /// Tier served by the server called `name`.
    pub fn resolve_server(&self, name: &str) -> Result<TierLevel> {
        self.clients
            .iter()
            .find(|c| c.name() == name)
            .map(|c| c.tier())
            .ok_or_else(|| RouterError::UnknownServer(name.to_string()))
    }

    /// Classify `question` with this dispatcher's rules.
    pub fn classify(&self, question: &str) -> Classification {
        classify(question, &self.rules)
    }

    /// First tier in the fallback order that is not `primary`.
    pub fn fallback_for(&self, primary: TierLevel) -> Option<TierLevel> {
        self.fallback_order.iter().copied().find(|t| *t != primary)
    }

    /// Answer `request`, falling back once if the primary tier fails.
    pub async fn route(
        &self,
        request: &RouteRequest,
        cancel: &CancellationToken,
    ) -> Result<RoutedAnswer> {
        let question = request.question.trim();
        if question.is_empty() {
            return Err(RouterError::InvalidRequest(
                "question must not be empty".to_string(),
            ));
        }

        let classification = self.classify(question);
        let (primary, target_override) = match &request.target_server {
            Some(name) => (self.resolve_server(name)?, true),
            None => (classification.tier, false),
        };
        let fallback = self.fallback_for(primary);
        let tier_request = QueryRequest {
            question: question.to_string(),
            top_k: request.top_k,
            max_output_tokens: request.max_output_tokens,
        };
        let mut routing = RoutingInfo {
            primary_server: primary.server_name().to_string(),
            fallback_server: None,
            complexity: classification.complexity,
            confidence: if target_override {
                1.0
            } else {
                classification.confidence
            },
            fallback_used: false,
            fallback_reason: None,
            primary_error: None,
            target_override,
        };
        info!(
            complexity = %routing.complexity,
            confidence = routing.confidence,
            primary = %routing.primary_server,
            target_override,
            "routing query"
        );

        let deadline = Instant::now() + self.request_timeout;
        let primary_budget = self.request_timeout.mul_f64(self.primary_share);
        let (reason, primary_error) =
            match self.attempt(primary, &tier_request, primary_budget, cancel).await {
                Ok(answer) => return Ok(RoutedAnswer::new(answer, routing)),
                Err(AttemptFailure::Cancelled) => return Err(RouterError::Cancelled),
                Err(AttemptFailure::Failed { reason, error }) => (reason, error),
            };
        warn!(primary = %routing.primary_server, %reason, "primary tier failed: {primary_error}");

        let Some(fallback) = fallback else {
            return Err(RouterError::AllTiersUnavailable {
                primary: routing.primary_server,
                primary_reason: reason,
                primary_error,
                fallback: None,
                fallback_error: None,
            });
        };
        let fallback_name = fallback.server_name().to_string();
        let remaining = deadline.saturating_duration_since(Instant::now());
        match self.attempt(fallback, &tier_request, remaining, cancel).await {
            Ok(answer) => {
                info!(fallback = %fallback_name, "answered by fallback tier");
                routing.fallback_server = Some(fallback_name);
                routing.fallback_used = true;
                routing.fallback_reason = Some(reason);
                routing.primary_error = Some(primary_error);
                Ok(RoutedAnswer::new(answer, routing))
            }
            Err(AttemptFailure::Cancelled) => Err(RouterError::Cancelled),
            Err(AttemptFailure::Failed { error, .. }) => {
                warn!(fallback = %fallback_name, "fallback tier failed: {error}");
                Err(RouterError::AllTiersUnavailable {
                    primary: routing.primary_server,
                    primary_reason: reason,
                    primary_error,
                    fallback: Some(fallback_name),
                    fallback_error: Some(error),
                })
            }
        }
    }

    /// Check `tier` is running, then query it, all within `budget`.
    async fn attempt(
        &self,
        tier: TierLevel,
        request: &QueryRequest,
        budget: Duration,
        cancel: &CancellationToken,
    ) -> std::result::Result<QueryAnswer, AttemptFailure> {
        let Some(client) = self.client_for(tier) else {
            return Err(AttemptFailure::Failed {
                reason: FallbackReason::PrimaryTierUnavailable,
                error: format!("no server configured for tier {tier}"),
            });
        };
        let started = Instant::now();
        let timed_out = || AttemptFailure::Failed {
            reason: FallbackReason::Timeout,
            error: format!("{} timed out after {} ms", client.name(), budget.as_millis()),
        };

        let health = tokio::select! {
            _ = cancel.cancelled() => return Err(AttemptFailure::Cancelled),
            result = timeout(self.health_timeout.min(budget), client.health()) => result,
        };
        match health {
            Err(_) => return Err(timed_out()),
            Ok(Err(e)) => {
                return Err(AttemptFailure::Failed {
                    reason: e.fallback_reason(),
                    error: e.to_string(),
                });
            }
            Ok(Ok(health)) if !health.running => {
                return Err(AttemptFailure::Failed {
                    reason: FallbackReason::PrimaryTierUnavailable,
                    error: format!("{} reports running=false", client.name()),
                });
            }
            Ok(Ok(_)) => {}
        }

        let remaining = budget.saturating_sub(started.elapsed());
        let answer = tokio::select! {
            _ = cancel.cancelled() => return Err(AttemptFailure::Cancelled),
            result = timeout(remaining, client.query(request)) => result,
        };
        match answer {
            Ok(Ok(answer)) => Ok(answer),
            Ok(Err(e)) => Err(AttemptFailure::Failed {
                reason: e.fallback_reason(),
                error: e.to_string(),
            }),
            Err(_) => Err(timed_out()),
        }
    }
}
