//! Index statistics gathered from every tier.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use strata_retrieval::TierStats;
use tokio::time::timeout;
use tracing::debug;

use crate::dispatch::Dispatcher;

/// One server's entry in [`SystemStats`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerStats {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<TierStats>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Statistics of every tier, keyed by server name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemStats {
    pub servers: BTreeMap<String, ServerStats>,
    /// Vectors across the tiers that answered.
    pub total_vectors: usize,
    pub router_version: String,
    pub collected_at: DateTime<Utc>,
}

impl Dispatcher {
    /// Ask every tier for its statistics in parallel, each bounded by the
    /// health timeout. Tiers that fail are listed with their error.
    pub async fn system_stats(&self) -> SystemStats {
        let limit = self.health_timeout;
        let requests = self.clients().iter().map(|client| async move {
            let entry = match timeout(limit, client.stats()).await {
                Ok(Ok(stats)) => ServerStats {
                    stats: Some(stats),
                    error: None,
                },
                Ok(Err(e)) => ServerStats {
                    stats: None,
                    error: Some(e.to_string()),
                },
                Err(_) => ServerStats {
                    stats: None,
                    error: Some(format!("stats timed out after {} ms", limit.as_millis())),
                },
            };
            (client.name().to_string(), entry)
        });
        let servers: BTreeMap<String, ServerStats> = join_all(requests).await.into_iter().collect();
        let total_vectors = servers
            .values()
            .filter_map(|s| s.stats.as_ref())
            .map(|s| s.vectors)
            .sum();
        debug!(servers = servers.len(), total_vectors, "system stats collected");
        SystemStats {
            servers,
            total_vectors,
            router_version: env!("CARGO_PKG_VERSION").to_string(),
            collected_at: Utc::now(),
        }
    }
}
