use axum::{
    Router,
    extract::Extension,
    routing::{get, post},
};
use clap::Parser;
use cluster_coordinator::catalog::CatalogStore;
use cluster_coordinator::config::{CliArgs, NodeConfig};
use cluster_coordinator::membership::{
    Collaborators, CommandAbsorber, ControlConfig, ControlService, HttpCatalogFetcher,
    HttpClusterAgent, HttpReadinessProbe, NodeStatusStore,
};
use cluster_coordinator::planner::{ExecutionPlanner, StepRegistry, register_builtin_steps};
use cluster_coordinator::routing::Router as RequestRouter;
use cluster_coordinator::session::{Dispatcher, DispatcherConfig};
use cluster_coordinator::transport::handlers::*;
use cluster_coordinator::transport::protocol::*;
use cluster_coordinator::transport::{Forwarder, Transport};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = NodeConfig::try_from(CliArgs::parse())?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if config.log_json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    tracing::info!("Starting node {} on {}", config.node, config.bind);

    // 1. Catalog:
    let catalog = CatalogStore::open(&config.catalog_path)?;
    {
        let current = catalog.current();
        tracing::info!(
            "Catalog {:?} effective {} with {} datasets",
            current.version(),
            current.effective_date(),
            current.datasets().len()
        );
    }

    // 2. Planning and sessions:
    let registry = StepRegistry::new();
    register_builtin_steps(&registry);

    let router = Arc::new(match config.rng_seed {
        Some(seed) => RequestRouter::with_seed(seed),
        None => RequestRouter::new(),
    });
    let planner = Arc::new(ExecutionPlanner::new(
        registry.clone(),
        router.clone(),
        &config.node.to_string(),
    ));

    let forwarder = Arc::new(Forwarder::new(&config.state_dir));
    let transport: Arc<dyn Transport> = forwarder.clone();
    let dispatcher = Dispatcher::spawn(
        DispatcherConfig {
            local_node: config.node.to_string(),
            session_timeout: config.session_timeout,
            sweep_interval: config.sweep_interval,
        },
        catalog.clone(),
        planner,
        transport.clone(),
    );

    // 3. Membership control:
    let status = Arc::new(NodeStatusStore::open(&config.status_path()).await?);
    let control = ControlService::new(
        config.node.clone(),
        catalog.clone(),
        status,
        Collaborators {
            agent: Arc::new(HttpClusterAgent::new(config.node.clone(), catalog.clone())),
            fetcher: Arc::new(HttpCatalogFetcher::new()),
            absorber: Arc::new(CommandAbsorber::new(config.absorb_command.clone())),
            probe: Arc::new(HttpReadinessProbe::new()),
        },
        ControlConfig {
            absorb_poll_interval: config.absorb_poll_interval,
            absorb_deadline: config.absorb_deadline,
            live_nodes_path: config.live_nodes_path(),
        },
    );

    // 4. HTTP Router:
    let app = Router::new()
        .route(ENDPOINT_ROUTE, post(handle_route))
        .route(ENDPOINT_MESSAGE, post(handle_message))
        .route(ENDPOINT_RESULT, post(handle_result))
        .route(ENDPOINT_CONTROL, post(handle_control))
        .route(ENDPOINT_STATUS, get(handle_status))
        .route(ENDPOINT_CATALOG, get(handle_catalog))
        .layer(Extension(catalog.clone()))
        .layer(Extension(router))
        .layer(Extension(registry))
        .layer(Extension(transport))
        .layer(Extension(dispatcher))
        .layer(Extension(control));

    // 5. Replay buffered requests:
    forwarder.spawn_resume_loop(config.resume_interval);

    // 6. Reload the catalog on SIGHUP:
    #[cfg(unix)]
    {
        let catalog = catalog.clone();
        tokio::spawn(async move {
            let Ok(mut hangup) =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup())
            else {
                tracing::warn!("Cannot listen for SIGHUP, catalog reload disabled");
                return;
            };
            while hangup.recv().await.is_some() {
                match catalog.reload() {
                    Ok(model) => tracing::info!(
                        "Catalog reloaded, effective {}",
                        model.effective_date()
                    ),
                    Err(e) => tracing::error!("Catalog reload failed, keeping current: {}", e),
                }
            }
        });
    }

    // 7. Start HTTP server:
    tracing::info!("HTTP server listening on {}", config.bind);
    tracing::info!("Press Ctrl+C to shutdown");

    let listener = tokio::net::TcpListener::bind(config.bind).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
