//! Configuration for the router.

use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use strata_vector_index::TierLevel;

use crate::classify::ClassificationRules;

/// Where a tier server listens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierEndpoint {
    pub tier: TierLevel,
    /// Base URL, e.g. `http://127.0.0.1:8001`.
    pub url: String,
}

impl TierEndpoint {
    pub fn new(tier: TierLevel, url: impl Into<String>) -> Self {
        Self {
            tier,
            url: url.into(),
        }
    }

    /// `http://127.0.0.1:{port}` for `tier`.
    pub fn local(tier: TierLevel, port: u16) -> Self {
        Self::new(tier, format!("http://127.0.0.1:{port}"))
    }
}

/// Configuration for the router.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Interface to bind.
    pub host: String,

    /// Port to bind.
    pub port: u16,

    /// Tier servers, one per tier.
    pub servers: Vec<TierEndpoint>,

    /// Fallback candidates in preference order; the first one that is not
    /// the primary tier is used.
    pub fallback_order: Vec<TierLevel>,

    /// Budget for one routed query, primary and fallback attempts together.
    pub request_timeout_secs: u64,

    /// Share of the budget the primary attempt may use.
    pub primary_budget_share: f64,

    /// Per-tier bound on a health check.
    pub health_timeout_secs: u64,

    /// Bound on one tier rebuild triggered through the router.
    pub rebuild_timeout_secs: u64,

    /// Recompute system health on this interval; `None` disables the monitor.
    pub monitor_interval_secs: Option<u64>,

    /// Keyword table used to pick a tier.
    pub classification: ClassificationRules,
}

impl RouterConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn health_timeout(&self) -> Duration {
        Duration::from_secs(self.health_timeout_secs)
    }

    pub fn rebuild_timeout(&self) -> Duration {
        Duration::from_secs(self.rebuild_timeout_secs)
    }

    /// Set the tier servers.
    pub fn with_servers(mut self, servers: Vec<TierEndpoint>) -> Self {
        self.servers = servers;
        self
    }

    /// Set the classification table.
    pub fn with_classification(mut self, rules: ClassificationRules) -> Self {
        self.classification = rules;
        self
    }

    /// Set the per-query budget.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_secs = timeout.as_secs();
        self
    }

    /// Address to bind, as `host:port`.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Problems that make this configuration unusable. Empty when valid.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.servers.is_empty() {
            problems.push("router has no tier servers".to_string());
        }
        let mut seen = HashSet::new();
        for server in &self.servers {
            if !seen.insert(server.tier) {
                problems.push(format!("tier {} is configured more than once", server.tier));
            }
            if !(server.url.starts_with("http://") || server.url.starts_with("https://")) {
                problems.push(format!(
                    "tier {} url {:?} is not an http(s) URL",
                    server.tier, server.url
                ));
            }
        }
        if self.fallback_order.is_empty() {
            problems.push("fallback_order is empty".to_string());
        }
        for (name, secs) in [
            ("request_timeout_secs", self.request_timeout_secs),
            ("health_timeout_secs", self.health_timeout_secs),
            ("rebuild_timeout_secs", self.rebuild_timeout_secs),
        ] {
            if secs == 0 {
                problems.push(format!("{name} must be greater than zero"));
            }
        }
        if self.monitor_interval_secs == Some(0) {
            problems.push("monitor_interval_secs must be greater than zero".to_string());
        }
        if !(self.primary_budget_share > 0.0 && self.primary_budget_share < 1.0) {
            problems.push(format!(
                "primary_budget_share {} outside (0, 1)",
                self.primary_budget_share
            ));
        }
        problems.extend(
            self.classification
                .validate()
                .into_iter()
                .map(|p| format!("classification: {p}")),
        );
        problems
    }
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            servers: vec![
                TierEndpoint::local(TierLevel::L1, 8001),
                TierEndpoint::local(TierLevel::L2, 8002),
                TierEndpoint::local(TierLevel::L3, 8003),
            ],
            fallback_order: vec![TierLevel::L1, TierLevel::L2],
            request_timeout_secs: 30,
            primary_budget_share: 0.5,
            health_timeout_secs: 5,
            rebuild_timeout_secs: 3600,
            monitor_interval_secs: None,
            classification: ClassificationRules::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_config_is_valid() {
        let config = RouterConfig::default();
        assert_eq!(config.validate(), Vec::<String>::new());
        assert_eq!(config.bind_addr(), "127.0.0.1:8000");
        assert_eq!(config.servers[2].url, "http://127.0.0.1:8003");
    }

    #[test]
    fn test_validate_reports_every_problem() {
        let config = RouterConfig {
            servers: vec![
                TierEndpoint::local(TierLevel::L1, 8001),
                TierEndpoint::new(TierLevel::L1, "localhost:8002"),
            ],
            fallback_order: Vec::new(),
            health_timeout_secs: 0,
            primary_budget_share: 1.0,
            ..RouterConfig::default()
        };
        let problems = config.validate();
        assert_eq!(problems.len(), 5, "{problems:?}");
        assert!(problems.iter().any(|p| p.contains("more than once")));
        assert!(problems.iter().any(|p| p.contains("health_timeout_secs")));
    }
}
