use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use anyhow::{Context, Result};
use shared::types::{DiscoveryReply, ServiceRecord};
use discoveryd::api;
use discoveryd::config::Config;
use discoveryd::face::{Face, MemoryNetwork};
use discoveryd::registry::SessionRegistry;
use discoveryd::session::{DiscoveryCallback, DiscoverySession, Role};

fn log_discovery(group: String) -> DiscoveryCallback {
    Arc::new(move |record: &ServiceRecord, reply: &DiscoveryReply| {
        tracing::info!(
            "[{}] {} is {:?}: {:?}",
            group,
            record.received_key(),
            reply.status,
            reply.service_details
        );
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("discoveryd=info"))
        )
        .init();

    tracing::info!("Starting discoveryd");

    // Load config
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "/etc/ndnsd/discoveryd.toml".to_string());

    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path))?;

    tracing::info!("Loaded config from {} as node {}", config_path, config.node.name);

    let face: Arc<dyn Face> = Arc::new(MemoryNetwork::new());
    let signer = config.node.signing.signer();

    // Create cancellation token for graceful shutdown
    let cancel = CancellationToken::new();
    let registry = Arc::new(SessionRegistry::new(cancel.clone()));

    for (i, producer) in config.producers.iter().enumerate() {
        let services = producer
            .definitions()
            .with_context(|| format!("Failed to load services of producer {}", i))?
            .iter()
            .map(|d| d.to_record())
            .collect();
        let session_config = config.node.session_config(&producer.group, &config.producer_node(i));
        registry.add(
            DiscoverySession::new(
                Role::Producer { services },
                session_config,
                face.clone(),
                log_discovery(producer.group.to_uri()),
            )
            .with_signer(signer.clone()),
        );
    }

    for (i, consumer) in config.consumers.iter().enumerate() {
        let session_config = config.node.session_config(&consumer.group, &config.consumer_node(i));
        registry.add(
            DiscoverySession::new(
                Role::Consumer { continuous: consumer.continuous },
                session_config,
                face.clone(),
                log_discovery(consumer.group.to_uri()),
            )
            .with_signer(signer.clone()),
        );
    }

    // A session that fails to register is logged and left out; the rest run.
    if let Err(e) = registry.start_all() {
        tracing::error!("Not every session started: {}", e);
    }
    tracing::info!("{} session(s) running", registry.handles().len());

    // Build API router
    let app_state = api::AppState {
        registry: registry.clone(),
        config: Arc::new(config.node.clone()),
    };
    let app = api::router(app_state);

    // Bind HTTP server
    let listener = tokio::net::TcpListener::bind(&config.api.listen)
        .await
        .with_context(|| format!("Failed to bind to {}", config.api.listen))?;

    tracing::info!("API listening on {}", config.api.listen);

    // Run server with graceful shutdown
    let server_cancel = cancel.clone();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async move { server_cancel.cancelled().await })
            .await
        {
            tracing::error!("Server error: {}", e);
        }
    });

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutdown signal received");

    // Trigger cancellation
    registry.stop_all();
    cancel.cancel();

    // Wait for all tasks to complete
    let (_, server) = tokio::join!(registry.join_all(), server_handle);
    if let Err(e) = server {
        tracing::error!("Server task failed: {}", e);
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
