mod auth;
mod email;
mod error;
mod request_tracing;
mod routes;
mod server_config;
mod state;
#[cfg(test)]
mod testing;

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use axum::{extract::FromRef, Router};
use email::{client::GmailConnector, mailbox::MailboxConnector};
use mimalloc::MiMalloc;
use routes::AppRouter;
use server_config::{ApiLimits, LogFormat, ServerConfig};
use state::inbox_processor::ProcessorRegistry;
use tokio::signal;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

pub type HttpClient = reqwest::Client;

#[derive(Clone, FromRef)]
struct ServerState {
    registry: ProcessorRegistry,
    connector: Arc<dyn MailboxConnector>,
    limits: ApiLimits,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = ServerConfig::load().context("Failed to load server config")?;
    init_tracing(config.server.log_format);
    tracing::info!("{}", config);

    let http_client = reqwest::ClientBuilder::new()
        .use_rustls_tls()
        .timeout(config.ingest.request_timeout())
        .build()?;

    let connector: Arc<dyn MailboxConnector> = Arc::new(GmailConnector::new(http_client));
    let registry = ProcessorRegistry::builder()
        .with_connector(connector.clone())
        .with_page_size(config.ingest.page_size)
        .with_idle_ttl(config.registry.idle_ttl())
        .build()?;

    let state = ServerState {
        registry: registry.clone(),
        connector,
        limits: config.api,
    };
    let router = AppRouter::create(state, &config.server.allowed_origins);

    let mut scheduler = JobScheduler::new().await?;
    add_eviction_job(&scheduler, registry, config.registry.eviction_interval()).await?;
    scheduler.set_shutdown_handler(Box::new(move || {
        Box::pin(async move {
            tracing::info!("Shutting down scheduler");
        })
    }));
    scheduler.start().await?;

    run_server(router, config.server.port, scheduler).await
}

fn init_tracing(log_format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::registry().with(filter);

    match log_format {
        LogFormat::Text => subscriber
            .with(tracing_subscriber::fmt::Layer::default().with_ansi(false))
            .init(),
        LogFormat::Json => subscriber
            .with(tracing_subscriber::fmt::Layer::default().json())
            .init(),
    }
}

/// Periodically drops processors nobody has looked at within the idle TTL
async fn add_eviction_job(
    scheduler: &JobScheduler,
    registry: ProcessorRegistry,
    interval: Duration,
) -> anyhow::Result<()> {
    scheduler
        .add(Job::new_repeated_async(interval, move |uuid, mut l| {
            let registry = registry.clone();
            Box::pin(async move {
                let evicted = registry.evict_idle();
                if evicted > 0 {
                    tracing::info!("Eviction job {} removed {} idle processors", uuid, evicted);
                }
                if let Some(current) = registry.get_current_state() {
                    tracing::debug!("{}", current);
                }

                let next_tick = l.next_tick_for_job(uuid).await;
                if let Ok(Some(ts)) = next_tick {
                    tracing::debug!("Next time for eviction job is {:?}", ts)
                }
            })
        })?)
        .await?;

    Ok(())
}

async fn run_server(router: Router, port: u16, scheduler: JobScheduler) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    tracing::info!("Inbox stats server running on http://{}", addr);

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(scheduler))
    .await?;

    tracing::info!("Server shut down, exiting");
    Ok(())
}

async fn shutdown_signal(mut scheduler: JobScheduler) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {:?}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {:?}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    if let Err(e) = scheduler.shutdown().await {
        tracing::error!("Failed to shut down scheduler: {:?}", e);
    }
    tracing::info!("Cleanups done, shutting down");
}
