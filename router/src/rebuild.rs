//! Rebuilding tiers through the router.
//!
//! `POST /ingest` walks tier 1, 2, 3 in order. Tier health is read again
//! before each step, so a fresh tier-1 build marks tier 2 stale and the
//! rebuild cascades down without extra bookkeeping.

use serde::{Deserialize, Serialize};
use strata_retrieval::{RebuildRequest, TierHealth};
use strata_tier_pipeline::PipelineReport;
use strata_vector_index::TierLevel;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::dispatch::Dispatcher;
use crate::error::{Result, RouterError};

/// Body of the router's `POST /ingest`. An empty body means no force.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestRequest {
    #[serde(default)]
    pub force_rebuild: bool,
}

/// What the router did with one tier during `ingest_all`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepAction {
    Rebuilt,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RebuildStep {
    pub server: String,
    pub tier: TierLevel,
    pub action: StepAction,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report: Option<PipelineReport>,
}

/// Body returned by the router's `POST /ingest`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestOutcome {
    pub message: String,
    /// Documents that made it into tier 1; zero when tier 1 was skipped.
    pub files_processed: usize,
    pub chunks_added: usize,
    pub steps: Vec<RebuildStep>,
}

/// Why `tier` needs a rebuild, or `None` when it can be skipped.
fn rebuild_reason(force: bool, health: &TierHealth) -> Option<&'static str> {
    if force {
        Some("forced")
    } else if health.vector_count == 0 {
        Some("index is empty")
    } else if health.stale {
        Some("upstream summary changed")
    } else {
        None
    }
}

impl Dispatcher {
    /// Rebuild one tier, bounded by the rebuild timeout.
    pub async fn rebuild_tier(
        &self,
        tier: TierLevel,
        request: &RebuildRequest,
        cancel: &CancellationToken,
    ) -> Result<PipelineReport> {
        let client = self
            .client_for(tier)
            .ok_or_else(|| RouterError::UnknownServer(tier.server_name().to_string()))?;
        info!(server = client.name(), "rebuilding tier");
        let result = tokio::select! {
            _ = cancel.cancelled() => return Err(RouterError::Cancelled),
            result = timeout(self.rebuild_timeout, client.rebuild(request)) => result,
        };
        let report = result.map_err(|_| RouterError::Timeout {
            server: client.name().to_string(),
            after_ms: u64::try_from(self.rebuild_timeout.as_millis()).unwrap_or(u64::MAX),
        })??;
        info!(
            server = client.name(),
            files = report.files_processed,
            chunks = report.chunks_added,
            generation = report.generation,
            "tier rebuilt"
        );
        Ok(report)
    }

    /// Run the tier 1 → 2 → 3 pipeline, skipping tiers that are already
    /// current unless `force_rebuild` is set.
    pub async fn ingest_all(
        &self,
        force_rebuild: bool,
        cancel: &CancellationToken,
    ) -> Result<IngestOutcome> {
        let mut steps = Vec::with_capacity(TierLevel::ALL.len());
        for tier in TierLevel::ALL {
            let Some(client) = self.client_for(tier) else {
                return Err(RouterError::UnknownServer(tier.server_name().to_string()));
            };
            let health = tokio::select! {
                _ = cancel.cancelled() => return Err(RouterError::Cancelled),
                result = timeout(self.health_timeout, client.health()) => {
                    result.map_err(|_| RouterError::Timeout {
                        server: client.name().to_string(),
                        after_ms: u64::try_from(self.health_timeout.as_millis())
                            .unwrap_or(u64::MAX),
                    })??
                }
            };
            let step = match rebuild_reason(force_rebuild, &health) {
                Some(reason) => {
                    let report = self
                        .rebuild_tier(tier, &RebuildRequest::default(), cancel)
                        .await?;
                    RebuildStep {
                        server: client.name().to_string(),
                        tier,
                        action: StepAction::Rebuilt,
                        reason: reason.to_string(),
                        report: Some(report),
                    }
                }
                None => {
                    info!(server = client.name(), "tier is current, skipping");
                    RebuildStep {
                        server: client.name().to_string(),
                        tier,
                        action: StepAction::Skipped,
                        reason: "index is current".to_string(),
                        report: None,
                    }
                }
            };
            steps.push(step);
        }

        let tier_one = steps
            .iter()
            .find(|s| s.tier == TierLevel::L1)
            .and_then(|s| s.report.as_ref());
        let files_processed = tier_one.map_or(0, |r| r.files_processed);
        let chunks_added = tier_one.map_or(0, |r| r.chunks_added);
        let rebuilt = steps
            .iter()
            .filter(|s| s.action == StepAction::Rebuilt)
            .count();
        let message = if rebuilt == 0 {
            "All tiers are current; nothing rebuilt".to_string()
        } else {
            format!("Ingestion complete; rebuilt {rebuilt} of {} tiers", steps.len())
        };
        Ok(IngestOutcome {
            message,
            files_processed,
            chunks_added,
            steps,
        })
    }
}
