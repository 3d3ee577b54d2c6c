mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use common::{FakeTier, dispatcher, fleet, simple_only_config};
use pretty_assertions::assert_eq;
use strata_router::{
    Complexity, FallbackReason, HealthMonitor, OverallHealth, RouteRequest, RouterConfig,
    RouterError, StepAction,
};
use strata_vector_index::TierLevel;
use tokio_test::assert_err;
use tokio_util::sync::CancellationToken;

const KEY_POINTS: &str = "what are the key points about policy X?";

#[tokio::test]
async fn test_simple_question_goes_to_tier_three() {
    let tiers = fleet(
        FakeTier::new(TierLevel::L1),
        FakeTier::new(TierLevel::L2),
        FakeTier::new(TierLevel::L3),
    );
    let dispatcher = dispatcher(&simple_only_config(), &tiers);

    let routed = dispatcher
        .route(&RouteRequest::new(KEY_POINTS), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(routed.answer, "answer from server3");
    let info = routed.routing_info;
    assert_eq!(info.primary_server, "server3");
    assert_eq!(info.complexity, Complexity::Simple);
    assert!((info.confidence - 0.4).abs() < 1e-9, "{}", info.confidence);
    assert!(!info.fallback_used);
    assert_eq!(info.fallback_server, None);
    assert_eq!(tiers[2].queries(), 1);
}

#[tokio::test]
async fn test_stopped_primary_is_never_queried() {
    let tiers = fleet(
        FakeTier::new(TierLevel::L1),
        FakeTier::new(TierLevel::L2),
        FakeTier::new(TierLevel::L3).stopped(),
    );
    let dispatcher = dispatcher(&simple_only_config(), &tiers);

    let routed = dispatcher
        .route(&RouteRequest::new(KEY_POINTS), &CancellationToken::new())
        .await
        .unwrap();

    let info = routed.routing_info;
    assert_eq!(info.primary_server, "server3");
    assert!(info.fallback_used);
    assert_eq!(info.fallback_server.as_deref(), Some("server1"));
    assert_eq!(info.fallback_reason, Some(FallbackReason::PrimaryTierUnavailable));
    assert_eq!(routed.answer, "answer from server1");
    assert_eq!(tiers[2].queries(), 0);
    assert_eq!(tiers[0].queries(), 1);
}

#[tokio::test]
async fn test_primary_and_fallback_down_is_reported_distinctly() {
    let tiers = fleet(
        FakeTier::new(TierLevel::L1).unreachable(),
        FakeTier::new(TierLevel::L2),
        FakeTier::new(TierLevel::L3).stopped(),
    );
    let dispatcher = dispatcher(&simple_only_config(), &tiers);

    let err = dispatcher
        .route(&RouteRequest::new(KEY_POINTS), &CancellationToken::new())
        .await
        .unwrap_err();

    match err {
        RouterError::AllTiersUnavailable {
            primary,
            primary_reason,
            fallback,
            fallback_error,
            ..
        } => {
            assert_eq!(primary, "server3");
            assert_eq!(primary_reason, FallbackReason::PrimaryTierUnavailable);
            assert_eq!(fallback.as_deref(), Some("server1"));
            assert!(fallback_error.unwrap().contains("connection refused"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(tiers[2].queries(), 0);
}

#[tokio::test]
async fn test_failing_tier_one_falls_back_to_tier_two() {
    let tiers = fleet(
        FakeTier::new(TierLevel::L1).failing(502, "completion_error"),
        FakeTier::new(TierLevel::L2),
        FakeTier::new(TierLevel::L3),
    );
    let dispatcher = dispatcher(&RouterConfig::default(), &tiers);

    let routed = dispatcher
        .route(
            &RouteRequest::new("Which licences were revoked last year?"),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    let info = routed.routing_info;
    assert_eq!(info.complexity, Complexity::Unmatched);
    assert_eq!(info.primary_server, "server1");
    assert_eq!(info.fallback_server.as_deref(), Some("server2"));
    assert_eq!(info.fallback_reason, Some(FallbackReason::PrimaryTierError));
    assert!(info.primary_error.unwrap().contains("completion_error"));
}

#[tokio::test(start_paused = true)]
async fn test_slow_primary_times_out_within_its_share_of_the_budget() {
    let tiers = fleet(
        FakeTier::new(TierLevel::L1),
        FakeTier::new(TierLevel::L2),
        FakeTier::new(TierLevel::L3).slow(Duration::from_secs(60)),
    );
    let dispatcher = dispatcher(&simple_only_config(), &tiers);
    let started = tokio::time::Instant::now();

    let routed = dispatcher
        .route(&RouteRequest::new(KEY_POINTS), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(routed.routing_info.fallback_reason, Some(FallbackReason::Timeout));
    assert_eq!(routed.answer, "answer from server1");
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(15), "{elapsed:?}");
    assert!(elapsed < Duration::from_secs(30), "{elapsed:?}");
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_request_stops_waiting() {
    let tiers = fleet(
        FakeTier::new(TierLevel::L1),
        FakeTier::new(TierLevel::L2),
        FakeTier::new(TierLevel::L3).slow(Duration::from_secs(60)),
    );
    let dispatcher = Arc::new(dispatcher(&simple_only_config(), &tiers));
    let cancel = CancellationToken::new();

    let handle = tokio::spawn({
        let dispatcher = Arc::clone(&dispatcher);
        let cancel = cancel.clone();
        async move {
            dispatcher
                .route(&RouteRequest::new(KEY_POINTS), &cancel)
                .await
        }
    });
    tokio::time::sleep(Duration::from_secs(1)).await;
    cancel.cancel();

    let err = handle.await.unwrap().unwrap_err();
    assert!(matches!(err, RouterError::Cancelled), "{err}");
    assert_eq!(tiers[0].queries(), 0);
}

#[tokio::test]
async fn test_target_server_overrides_classification() {
    let tiers = fleet(
        FakeTier::new(TierLevel::L1),
        FakeTier::new(TierLevel::L2),
        FakeTier::new(TierLevel::L3),
    );
    let dispatcher = dispatcher(&simple_only_config(), &tiers);

    let routed = dispatcher
        .route(
            &RouteRequest::new(KEY_POINTS).with_target("server2"),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(routed.routing_info.primary_server, "server2");
    assert!(routed.routing_info.target_override);
    assert_eq!(routed.routing_info.confidence, 1.0);
    assert_eq!(tiers[2].queries(), 0);

    let err = dispatcher
        .route(
            &RouteRequest::new(KEY_POINTS).with_target("server9"),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, RouterError::UnknownServer(ref name) if name == "server9"));
}

#[tokio::test]
async fn test_blank_question_is_rejected() {
    let tiers = fleet(
        FakeTier::new(TierLevel::L1),
        FakeTier::new(TierLevel::L2),
        FakeTier::new(TierLevel::L3),
    );
    let dispatcher = dispatcher(&RouterConfig::default(), &tiers);
    let err = assert_err!(
        dispatcher
            .route(&RouteRequest::new("  "), &CancellationToken::new())
            .await
    );
    assert_eq!(err.kind(), "invalid_request");
}

#[tokio::test]
async fn test_two_of_four_servers_down_is_degraded() {
    let tiers = vec![
        Arc::new(FakeTier::new(TierLevel::L1)),
        Arc::new(FakeTier::new(TierLevel::L2).unreachable()),
        Arc::new(FakeTier::new(TierLevel::L3)),
        Arc::new(FakeTier::named(TierLevel::L3, "server4").stopped()),
    ];
    let dispatcher = dispatcher(&RouterConfig::default(), &tiers);

    let health = dispatcher.system_health().await;

    assert_eq!(health.overall_health, OverallHealth::Degraded);
    assert_eq!((health.healthy_count, health.total_count), (2, 4));
    assert!(health.servers["server2"].error.is_some());
    assert!(health.servers["server4"].health.is_some());
    assert_eq!(health.down(), vec!["server2", "server4"]);
}

#[tokio::test]
async fn test_stats_sum_reachable_tiers_and_list_failures() {
    let tiers = fleet(
        FakeTier::new(TierLevel::L1).with_vectors(120),
        FakeTier::new(TierLevel::L2).unreachable(),
        FakeTier::new(TierLevel::L3).with_vectors(8),
    );
    let dispatcher = dispatcher(&RouterConfig::default(), &tiers);

    let stats = dispatcher.system_stats().await;

    assert_eq!(stats.servers.len(), 3);
    assert_eq!(stats.total_vectors, 128);
    assert_eq!(stats.router_version, env!("CARGO_PKG_VERSION"));
    let server1 = stats.servers["server1"].stats.as_ref().unwrap();
    assert_eq!((server1.tier, server1.vectors), (TierLevel::L1, 120));
    assert!(stats.servers["server2"].stats.is_none());
    assert!(
        stats.servers["server2"].error.as_deref().unwrap_or_default().contains("connection refused")
    );
}

#[tokio::test(start_paused = true)]
async fn test_health_monitor_tracks_tier_state() {
    let tiers = fleet(
        FakeTier::new(TierLevel::L1),
        FakeTier::new(TierLevel::L2),
        FakeTier::new(TierLevel::L3),
    );
    let dispatcher = Arc::new(dispatcher(&RouterConfig::default(), &tiers));
    let cancel = CancellationToken::new();
    let monitor = HealthMonitor::spawn(dispatcher, Duration::from_secs(10), cancel.clone());
    let mut updates = monitor.subscribe();

    updates.changed().await.unwrap();
    let first = monitor.latest().unwrap();
    assert_eq!(first.overall_health, OverallHealth::Healthy);

    for tier in &tiers {
        tier.running.store(false, Ordering::SeqCst);
    }
    updates.changed().await.unwrap();
    let second = monitor.latest().unwrap();
    assert_eq!(second.overall_health, OverallHealth::Unhealthy);
    assert_eq!(second.healthy_count, 0);

    cancel.cancel();
    monitor.join().await;
}

#[tokio::test]
async fn test_ingest_skips_current_tiers() {
    let tiers = fleet(
        FakeTier::new(TierLevel::L1),
        FakeTier::new(TierLevel::L2).marked_stale(),
        FakeTier::new(TierLevel::L3).with_vectors(0),
    );
    let dispatcher = dispatcher(&RouterConfig::default(), &tiers);

    let outcome = dispatcher
        .ingest_all(false, &CancellationToken::new())
        .await
        .unwrap();

    let actions: Vec<_> = outcome.steps.iter().map(|s| s.action).collect();
    assert_eq!(
        actions,
        vec![StepAction::Skipped, StepAction::Rebuilt, StepAction::Rebuilt]
    );
    assert_eq!(outcome.steps[1].reason, "upstream summary changed");
    assert_eq!(outcome.steps[2].reason, "index is empty");
    assert_eq!(outcome.files_processed, 0);
    assert_eq!(tiers[0].rebuilds(), 0);

    let again = dispatcher
        .ingest_all(false, &CancellationToken::new())
        .await
        .unwrap();
    assert!(
        again
            .steps
            .iter()
            .all(|s| s.action == StepAction::Skipped)
    );
    assert_eq!(again.message, "All tiers are current; nothing rebuilt");
}

#[tokio::test]
async fn test_forced_ingest_rebuilds_every_tier() {
    let tiers = fleet(
        FakeTier::new(TierLevel::L1),
        FakeTier::new(TierLevel::L2),
        FakeTier::new(TierLevel::L3),
    );
    let dispatcher = dispatcher(&RouterConfig::default(), &tiers);

    let outcome = dispatcher
        .ingest_all(true, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.files_processed, 3);
    assert_eq!(outcome.chunks_added, 42);
    assert_eq!(outcome.message, "Ingestion complete; rebuilt 3 of 3 tiers");
    assert!(tiers.iter().all(|t| t.rebuilds() == 1));
}

#[tokio::test]
async fn test_ingest_stops_at_an_unreachable_tier() {
    let tiers = fleet(
        FakeTier::new(TierLevel::L1).with_vectors(0),
        FakeTier::new(TierLevel::L2).unreachable(),
        FakeTier::new(TierLevel::L3),
    );
    let dispatcher = dispatcher(&RouterConfig::default(), &tiers);

    let err = dispatcher
        .ingest_all(false, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, RouterError::Unreachable { ref server, .. } if server == "server2"));
    assert_eq!(tiers[0].rebuilds(), 1);
    assert_eq!(tiers[2].rebuilds(), 0);
}
