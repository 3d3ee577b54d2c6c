//! Router over real tier services running in-process.

use std::sync::Arc;

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use strata_embeddings::{Embedder, HashingEmbedder};
use strata_retrieval::{TierConfig, TierService};
use strata_router::{
    Complexity, Dispatcher, FallbackReason, LocalTierClient, OverallHealth, RouteRequest,
    RouterConfig, StepAction, TierClient,
};
use strata_tier_pipeline::extraction::PAGE_BREAK;
use strata_tier_pipeline::{
    ChunkerConfig, Collaborators, Completion, CompletionError, DataLayout, PlainTextExtractor,
};
use strata_vector_index::TierLevel;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

/// Answers questions with a fixed sentence and summarizes by keeping the
/// leading characters of the excerpt.
struct ScriptedCompletion;

#[async_trait]
impl Completion for ScriptedCompletion {
    fn model(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, prompt: &str, _max: u32) -> Result<String, CompletionError> {
        if prompt.contains("\nQuestion:\n") {
            return Ok("Royalties are due quarterly [1].".to_string());
        }
        let target: usize = prompt
            .split(" characters)")
            .next()
            .and_then(|head| head.rsplit('(').next())
            .and_then(|n| n.parse().ok())
            .unwrap_or(200);
        let excerpt = prompt
            .split_once("---\n")
            .map(|(_, rest)| rest.trim_end_matches("\n---"))
            .unwrap_or_default();
        Ok(excerpt.chars().take(target).collect())
    }
}

fn page(topic: &str, n: usize) -> String {
    (0..n)
        .map(|i| format!("The {topic} clause {i} sets duties for operators."))
        .collect::<Vec<_>>()
        .join(" ")
}

struct Stack {
    _dir: TempDir,
    services: Vec<Arc<TierService>>,
    dispatcher: Dispatcher,
}

async fn stack() -> Stack {
    let dir = TempDir::new().unwrap();
    let raw = dir.path().join("raw");
    std::fs::create_dir_all(&raw).unwrap();
    let sep = PAGE_BREAK.to_string();
    std::fs::write(
        raw.join("mining.txt"),
        [page("mining", 12), page("royalty", 8)].join(&sep),
    )
    .unwrap();
    std::fs::write(raw.join("water.txt"), page("water", 15)).unwrap();

    let layout = DataLayout::new(dir.path().join("data"));
    let embedder: Arc<dyn Embedder> = Arc::new(HashingEmbedder::new(64));
    let mut services = Vec::new();
    for tier in TierLevel::ALL {
        let mut config = TierConfig::for_tier(tier)
            .with_documents_dir(&raw)
            .with_chunker(ChunkerConfig {
                chunk_size: 300,
                chunk_overlap: 50,
            });
        config.pipeline.compression_ratio = 0.5;
        config.pipeline.summarizer.min_target_chars = 50;
        let collaborators = Collaborators {
            embedder: Arc::clone(&embedder),
            completion: Arc::new(ScriptedCompletion),
            extractor: Arc::new(PlainTextExtractor::new()),
        };
        let service = TierService::open(config, collaborators, &layout).await.unwrap();
        services.push(Arc::new(service));
    }

    let clients = services
        .iter()
        .map(|s| Arc::new(LocalTierClient::new(Arc::clone(s))) as Arc<dyn TierClient>)
        .collect();
    let dispatcher = Dispatcher::new(&RouterConfig::default(), clients).unwrap();
    Stack {
        _dir: dir,
        services,
        dispatcher,
    }
}

#[tokio::test]
async fn test_ingest_then_route_across_real_tiers() {
    let stack = stack().await;
    let cancel = CancellationToken::new();

    let outcome = stack.dispatcher.ingest_all(false, &cancel).await.unwrap();
    assert_eq!(outcome.files_processed, 2);
    assert!(outcome.chunks_added > 0);
    assert!(
        outcome
            .steps
            .iter()
            .all(|s| s.action == StepAction::Rebuilt)
    );
    assert!(stack.services.iter().all(|s| !s.index().is_empty()));

    let stats = stack.dispatcher.system_stats().await;
    let indexed: usize = stack.services.iter().map(|s| s.index().len()).sum();
    assert_eq!(stats.total_vectors, indexed);
    assert!(stats.servers.values().all(|s| s.error.is_none()));

    let again = stack.dispatcher.ingest_all(false, &cancel).await.unwrap();
    assert!(again.steps.iter().all(|s| s.action == StepAction::Skipped));

    // "give me" is moderate (tier 2), "key points" simple (tier 3).
    let routed = stack
        .dispatcher
        .route(&RouteRequest::new("Give me the key points"), &cancel)
        .await
        .unwrap();
    assert_eq!(routed.routing_info.primary_server, "server2");
    assert_eq!(routed.routing_info.complexity, Complexity::Moderate);
    assert!(!routed.routing_info.fallback_used);
    assert_eq!(routed.answer, "Royalties are due quarterly [1].");
    assert!(!routed.citations.is_empty());
}

#[tokio::test]
async fn test_stopped_tier_falls_back_in_process() {
    let stack = stack().await;
    let cancel = CancellationToken::new();
    stack.dispatcher.ingest_all(false, &cancel).await.unwrap();
    stack.services[1].set_running(false);

    let routed = stack
        .dispatcher
        .route(&RouteRequest::new("Please explain the royalty regime"), &cancel)
        .await
        .unwrap();
    let info = routed.routing_info;
    assert_eq!(info.primary_server, "server2");
    assert_eq!(info.fallback_server.as_deref(), Some("server1"));
    assert_eq!(info.fallback_reason, Some(FallbackReason::PrimaryTierUnavailable));

    let health = stack.dispatcher.system_health().await;
    assert_eq!(health.overall_health, OverallHealth::Degraded);
    assert_eq!(health.down(), vec!["server2"]);
}

#[tokio::test]
async fn test_tier_one_rebuild_marks_tier_two_stale() {
    let stack = stack().await;
    let cancel = CancellationToken::new();
    stack.dispatcher.ingest_all(false, &cancel).await.unwrap();

    stack
        .dispatcher
        .rebuild_tier(TierLevel::L1, &Default::default(), &cancel)
        .await
        .unwrap();
    assert!(stack.services[1].health().await.stale);

    let outcome = stack.dispatcher.ingest_all(false, &cancel).await.unwrap();
    let actions: Vec<_> = outcome.steps.iter().map(|s| s.action).collect();
    assert_eq!(
        actions,
        vec![StepAction::Skipped, StepAction::Rebuilt, StepAction::Rebuilt]
    );
}
