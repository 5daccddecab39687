use callwire::application::calling::{CallManager, CallingPorts, LoggingFlowEngine};
use callwire::config::Config;
use callwire::infrastructure::messaging::EventBroadcaster;
use callwire::infrastructure::whatsapp::WhatsAppClient;
use callwire::interface::api::{build_router, init_metrics, AppState};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[cfg(feature = "postgres")]
use callwire::infrastructure::persistence::{
    create_pool, run_migrations, PgAccountRepository, PgAgentDirectory, PgAgentTransferRepository,
    PgCallLogRepository, PgCallPermissionRepository, PgIvrFlowRepository,
};
#[cfg(not(feature = "postgres"))]
use callwire::infrastructure::persistence::{
    MemoryAccountRepository, MemoryAgentDirectory, MemoryAgentTransferRepository, MemoryCallLogRepository,
    MemoryCallPermissionRepository, MemoryIvrFlowRepository,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting callwire");

    let config = Config::load()?;
    if !config.calling.enabled {
        warn!("Calling is disabled, inbound calls will be rejected");
    }

    let provider = Arc::new(WhatsAppClient::new(&config.whatsapp)?);

    #[cfg(feature = "postgres")]
    let ports = {
        info!("Initializing database connection...");
        let pool = create_pool(&config.database).await?;
        run_migrations(&pool).await?;
        info!("Database migrations completed");

        CallingPorts {
            provider,
            call_logs: Arc::new(PgCallLogRepository::new(pool.clone())),
            transfers: Arc::new(PgAgentTransferRepository::new(pool.clone())),
            permissions: Arc::new(PgCallPermissionRepository::new(pool.clone())),
            ivr_flows: Arc::new(PgIvrFlowRepository::new(pool.clone())),
            accounts: Arc::new(PgAccountRepository::new(pool.clone())),
            directory: Arc::new(PgAgentDirectory::new(pool)),
            flow_engine: Arc::new(LoggingFlowEngine),
        }
    };

    #[cfg(not(feature = "postgres"))]
    let ports = {
        warn!("Built without postgres, state is kept in memory");
        CallingPorts {
            provider,
            call_logs: Arc::new(MemoryCallLogRepository::new()),
            transfers: Arc::new(MemoryAgentTransferRepository::new()),
            permissions: Arc::new(MemoryCallPermissionRepository::new()),
            ivr_flows: Arc::new(MemoryIvrFlowRepository::new()),
            accounts: Arc::new(MemoryAccountRepository::new()),
            directory: Arc::new(MemoryAgentDirectory::new()),
            flow_engine: Arc::new(LoggingFlowEngine),
        }
    };

    let events = Arc::new(EventBroadcaster::default());
    let manager = CallManager::new(config.calling.clone(), ports, events);

    let prometheus_handle = init_metrics()?;
    let app = build_router(AppState::new(manager.clone()), prometheus_handle);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("API server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Ending live calls...");
    manager.end_all().await;
    info!("callwire stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
    }
}
