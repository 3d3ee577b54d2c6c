//! System health aggregation and the periodic health monitor.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use strata_retrieval::TierHealth;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::dispatch::Dispatcher;

/// Overall state of the tier fleet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallHealth {
    /// Every tier is running.
    Healthy,
    /// Some tiers are running.
    Degraded,
    /// No tier is running.
    Unhealthy,
}

impl OverallHealth {
    pub fn from_counts(healthy: usize, total: usize) -> Self {
        if total > 0 && healthy == total {
            OverallHealth::Healthy
        } else if healthy > 0 {
            OverallHealth::Degraded
        } else {
            OverallHealth::Unhealthy
        }
    }
}

/// One server's entry in [`SystemHealth`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerStatus {
    pub running: bool,
    /// The tier's own report, when it answered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health: Option<TierHealth>,
    /// Why the tier could not report.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ServerStatus {
    pub fn reported(health: TierHealth) -> Self {
        Self {
            running: health.running,
            health: Some(health),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            running: false,
            health: None,
            error: Some(error.into()),
        }
    }
}

/// Health of every tier, aggregated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemHealth {
    pub servers: BTreeMap<String, ServerStatus>,
    pub overall_health: OverallHealth,
    pub healthy_count: usize,
    pub total_count: usize,
    pub checked_at: DateTime<Utc>,
}

impl SystemHealth {
    /// Aggregate per-server statuses.
    pub fn from_statuses(statuses: impl IntoIterator<Item = (String, ServerStatus)>) -> Self {
        let servers: BTreeMap<String, ServerStatus> = statuses.into_iter().collect();
        let healthy_count = servers.values().filter(|s| s.running).count();
        let total_count = servers.len();
        Self {
            overall_health: OverallHealth::from_counts(healthy_count, total_count),
            servers,
            healthy_count,
            total_count,
            checked_at: Utc::now(),
        }
    }

    /// Names of servers that are not running.
    pub fn down(&self) -> Vec<&str> {
        self.servers
            .iter()
            .filter(|(_, s)| !s.running)
            .map(|(name, _)| name.as_str())
            .collect()
    }
}

impl Dispatcher {
    /// Ask every tier for its health in parallel, each bounded by the health
    /// timeout.
    pub async fn system_health(&self) -> SystemHealth {
        let limit = self.health_timeout;
        let checks = self.clients().iter().map(|client| async move {
            let status = match timeout(limit, client.health()).await {
                Ok(Ok(health)) => ServerStatus::reported(health),
                Ok(Err(e)) => ServerStatus::failed(e.to_string()),
                Err(_) => ServerStatus::failed(format!(
                    "health check timed out after {} ms",
                    limit.as_millis()
                )),
            };
            (client.name().to_string(), status)
        });
        let health = SystemHealth::from_statuses(join_all(checks).await);
        debug!(
            overall = ?health.overall_health,
            healthy = health.healthy_count,
            total = health.total_count,
            "system health computed"
        );
        health
    }
}

/// Background task that recomputes system health on an interval.
pub struct HealthMonitor {
    latest: watch::Receiver<Option<SystemHealth>>,
    task: JoinHandle<()>,
}

impl HealthMonitor {
    /// Start monitoring. The task stops when `cancel` is cancelled.
    pub fn spawn(
        dispatcher: Arc<Dispatcher>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> Self {
        let (tx, latest) = watch::channel(None);
        let task = tokio::spawn(async move {
            info!(interval_secs = interval.as_secs(), "health monitor started");
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let health = tokio::select! {
                    _ = cancel.cancelled() => break,
                    health = dispatcher.system_health() => health,
                };
                log_health(&health);
                tx.send_replace(Some(health));
            }
            info!("health monitor stopped");
        });
        Self { latest, task }
    }

    /// Most recent aggregate, once the first check has finished.
    pub fn latest(&self) -> Option<SystemHealth> {
        self.latest.borrow().clone()
    }

    /// Receiver notified after every check.
    pub fn subscribe(&self) -> watch::Receiver<Option<SystemHealth>> {
        self.latest.clone()
    }

    /// Wait for the task to exit after cancellation.
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            error!("health monitor task failed: {e}");
        }
    }
}

fn log_health(health: &SystemHealth) {
    let down = health.down();
    match health.overall_health {
        OverallHealth::Healthy => debug!(total = health.total_count, "all tiers healthy"),
        OverallHealth::Degraded => warn!(
            healthy = health.healthy_count,
            total = health.total_count,
            down = ?down,
            "system degraded"
        ),
        OverallHealth::Unhealthy => error!(total = health.total_count, "no tier is running"),
    }
}
