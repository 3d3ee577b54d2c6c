//! Starting tier services and the router.

use std::sync::Arc;

use anyhow::Context;
use strata_retrieval::TierService;
use strata_router::{Dispatcher, HealthMonitor, LocalTierClient, TierClient};
use strata_tier_pipeline::{Collaborators, OpenAiCompletion, PlainTextExtractor};
use strata_vector_index::TierLevel;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::settings::Settings;

/// Embedder, completion and extractor shared by every tier.
pub fn collaborators(settings: &Settings) -> anyhow::Result<Collaborators> {
    let embedder = settings.embedder.build()?;
    if !embedder.is_available() {
        warn!(provider = embedder.name(), "embedder has no API key; queries will fail");
    }
    let completion = OpenAiCompletion::new(settings.completion.clone())
        .context("failed to build completion client")?;
    if !completion.is_configured() {
        warn!("completion service has no API key; answers and summaries will fail");
    }
    Ok(Collaborators {
        embedder,
        completion: Arc::new(completion),
        extractor: Arc::new(PlainTextExtractor::new()),
    })
}

pub async fn open_tier(
    settings: &Settings,
    tier: TierLevel,
    collaborators: Collaborators,
) -> anyhow::Result<Arc<TierService>> {
    let service = TierService::open(settings.tier_config(tier), collaborators, &settings.layout())
        .await
        .with_context(|| format!("failed to open tier {tier}"))?;
    Ok(Arc::new(service))
}

async fn serve_tier(service: Arc<TierService>, shutdown: CancellationToken) -> anyhow::Result<()> {
    let addr = service.config().bind_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    strata_retrieval::http::serve(listener, service, shutdown).await?;
    Ok(())
}

async fn serve_router(
    settings: &Settings,
    dispatcher: Dispatcher,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let dispatcher = Arc::new(dispatcher);
    let monitor = settings.router.monitor_interval_secs.map(|secs| {
        HealthMonitor::spawn(
            Arc::clone(&dispatcher),
            std::time::Duration::from_secs(secs),
            shutdown.child_token(),
        )
    });
    let addr = settings.router.bind_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    let served = strata_router::http::serve(listener, dispatcher, shutdown.clone()).await;
    shutdown.cancel();
    if let Some(monitor) = monitor {
        monitor.join().await;
    }
    served?;
    Ok(())
}

/// Run one tier service until `shutdown`.
pub async fn run_tier(
    settings: &Settings,
    tier: TierLevel,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let service = open_tier(settings, tier, collaborators(settings)?).await?;
    serve_tier(service, shutdown).await
}

/// Run the router against tier servers reached over HTTP.
pub async fn run_router(settings: &Settings, shutdown: CancellationToken) -> anyhow::Result<()> {
    let dispatcher = Dispatcher::over_http(&settings.router)?;
    serve_router(settings, dispatcher, shutdown).await
}

/// Run all three tiers and the router in this process.
///
/// With `in_process` the router calls the tier services directly and the
/// tiers are not served over HTTP.
pub async fn run_standalone(
    settings: &Settings,
    in_process: bool,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let collaborators = collaborators(settings)?;
    let mut services = Vec::with_capacity(TierLevel::ALL.len());
    for tier in TierLevel::ALL {
        services.push(open_tier(settings, tier, collaborators.clone()).await?);
    }

    if in_process {
        info!("running standalone with in-process tiers");
        let clients = services
            .into_iter()
            .map(|service| Arc::new(LocalTierClient::new(service)) as Arc<dyn TierClient>)
            .collect();
        let dispatcher = Dispatcher::new(&settings.router, clients)?;
        return serve_router(settings, dispatcher, shutdown).await;
    }

    let mut router_config = settings.router.clone();
    router_config.servers = settings.local_endpoints();
    let dispatcher = Dispatcher::over_http(&router_config)?;

    let mut tasks = JoinSet::new();
    for service in services {
        tasks.spawn(serve_tier(service, shutdown.clone()));
    }
    let router_settings = Settings {
        router: router_config,
        ..settings.clone()
    };
    let router_shutdown = shutdown.clone();
    tasks.spawn(async move { serve_router(&router_settings, dispatcher, router_shutdown).await });

    let mut first_error = None;
    while let Some(joined) = tasks.join_next().await {
        let result = joined.context("server task panicked").and_then(|r| r);
        if let Err(e) = result {
            warn!("server exited with error: {e:#}");
            shutdown.cancel();
            first_error.get_or_insert(e);
        }
    }
    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
