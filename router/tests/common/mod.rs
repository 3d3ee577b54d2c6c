#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use strata_retrieval::{
    Citation, QueryAnswer, QueryRequest, RebuildRequest, TierHealth, TierStats,
};
use strata_router::{
    ClassificationRules, Complexity, Dispatcher, KeywordRule, RouterConfig, RouterError,
    TierClient,
};
use strata_tier_pipeline::PipelineReport;
use strata_vector_index::TierLevel;

/// Scriptable stand-in for a tier service.
pub struct FakeTier {
    tier: TierLevel,
    name: String,
    pub running: AtomicBool,
    pub reachable: AtomicBool,
    pub stale: AtomicBool,
    pub vector_count: AtomicUsize,
    pub queries: AtomicUsize,
    pub rebuilds: AtomicUsize,
    query_delay: Option<Duration>,
    failure: Option<(u16, &'static str)>,
}

impl FakeTier {
    pub fn new(tier: TierLevel) -> Self {
        Self {
            tier,
            name: tier.server_name().to_string(),
            running: AtomicBool::new(true),
            reachable: AtomicBool::new(true),
            stale: AtomicBool::new(false),
            vector_count: AtomicUsize::new(10),
            queries: AtomicUsize::new(0),
            rebuilds: AtomicUsize::new(0),
            query_delay: None,
            failure: None,
        }
    }

    /// A tier that answers under a different server name.
    pub fn named(tier: TierLevel, name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::new(tier)
        }
    }

    pub fn stopped(self) -> Self {
        self.running.store(false, Ordering::SeqCst);
        self
    }

    pub fn unreachable(self) -> Self {
        self.reachable.store(false, Ordering::SeqCst);
        self
    }

    pub fn slow(mut self, delay: Duration) -> Self {
        self.query_delay = Some(delay);
        self
    }

    pub fn failing(mut self, status: u16, kind: &'static str) -> Self {
        self.failure = Some((status, kind));
        self
    }

    pub fn with_vectors(self, count: usize) -> Self {
        self.vector_count.store(count, Ordering::SeqCst);
        self
    }

    pub fn marked_stale(self) -> Self {
        self.stale.store(true, Ordering::SeqCst);
        self
    }

    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    pub fn rebuilds(&self) -> usize {
        self.rebuilds.load(Ordering::SeqCst)
    }

    fn refused(&self) -> RouterError {
        RouterError::Unreachable {
            server: self.name.clone(),
            message: "connection refused".to_string(),
        }
    }
}

#[async_trait]
impl TierClient for FakeTier {
    fn tier(&self) -> TierLevel {
        self.tier
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn query(&self, request: &QueryRequest) -> strata_router::Result<QueryAnswer> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        if !self.reachable.load(Ordering::SeqCst) {
            return Err(self.refused());
        }
        if let Some(delay) = self.query_delay {
            tokio::time::sleep(delay).await;
        }
        if let Some((status, kind)) = self.failure {
            return Err(RouterError::Tier {
                server: self.name.clone(),
                status: Some(status),
                kind: kind.to_string(),
                message: format!("{kind} on {}", self.name),
            });
        }
        Ok(QueryAnswer {
            answer: format!("answer from {}", self.name),
            citations: vec![Citation {
                source_file: "act.pdf".to_string(),
                page_start: 1,
                page_end: 2,
                score: 0.9,
                snippet: "Royalties are payable every quarter.".to_string(),
            }],
            used_top_k: request.top_k.unwrap_or(3),
            prompt: format!("prompt for {}", request.question),
        })
    }

    async fn health(&self) -> strata_router::Result<TierHealth> {
        if !self.reachable.load(Ordering::SeqCst) {
            return Err(self.refused());
        }
        Ok(TierHealth {
            tier: self.tier,
            server: self.name.clone(),
            running: self.running.load(Ordering::SeqCst),
            vector_count: self.vector_count.load(Ordering::SeqCst),
            files_indexed: 2,
            built_at: None,
            source_generation: Some(1),
            stale: self.stale.load(Ordering::SeqCst),
            last_checked: Utc::now(),
        })
    }

    async fn stats(&self) -> strata_router::Result<TierStats> {
        if !self.reachable.load(Ordering::SeqCst) {
            return Err(self.refused());
        }
        let stats = serde_json::from_value(json!({
            "tier": self.tier,
            "vectors": self.vector_count.load(Ordering::SeqCst),
            "files_indexed": 2,
            "vector_dim": 8,
            "built_at": null,
            "source_generation": 1,
            "index_path": format!("/data/{}/index.bin", self.name),
            "metadata_path": format!("/data/{}/meta.json", self.name),
            "index_exists": true,
            "query_cache": { "entries": 0, "capacity": 64, "hits": 0, "misses": 0 }
        }))
        .unwrap();
        Ok(stats)
    }

    async fn rebuild(&self, _request: &RebuildRequest) -> strata_router::Result<PipelineReport> {
        let run = self.rebuilds.fetch_add(1, Ordering::SeqCst) + 1;
        self.vector_count.store(12, Ordering::SeqCst);
        self.stale.store(false, Ordering::SeqCst);
        Ok(report(self.tier, run as u64))
    }
}

/// A successful pipeline report for `tier`.
pub fn report(tier: TierLevel, generation: u64) -> PipelineReport {
    serde_json::from_value(json!({
        "tier": tier,
        "run_id": "6f1c2a4e-1d0b-4a43-9d6e-2f7a9c1b5e10",
        "generation": generation,
        "source_generation": generation,
        "documents": [],
        "files_processed": 3,
        "chunks_added": 42,
        "input_length": 10_000,
        "output_length": 1_000,
        "compression_ratio": 0.1,
        "within_tolerance": true,
        "processing_time_secs": 1.5,
        "failures": [],
        "section_failures": []
    }))
    .unwrap()
}

/// The three fakes, in tier order.
pub fn fleet(l1: FakeTier, l2: FakeTier, l3: FakeTier) -> [Arc<FakeTier>; 3] {
    [Arc::new(l1), Arc::new(l2), Arc::new(l3)]
}

pub fn dispatcher(config: &RouterConfig, tiers: &[Arc<FakeTier>]) -> Dispatcher {
    let clients = tiers
        .iter()
        .map(|t| Arc::clone(t) as Arc<dyn TierClient>)
        .collect();
    Dispatcher::new(config, clients).unwrap()
}

/// Only the "simple" bucket, answered by tier 3.
pub fn simple_only_rules() -> ClassificationRules {
    ClassificationRules::with_rules(vec![
        KeywordRule::new(
            Complexity::Simple,
            TierLevel::L3,
            &["key points", "summary", "gist"],
        )
        .with_confidence(0.3, 0.8),
    ])
}

pub fn simple_only_config() -> RouterConfig {
    RouterConfig::default().with_classification(simple_only_rules())
}
