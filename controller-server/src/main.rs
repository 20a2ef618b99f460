mod auth;
mod config;
mod routes;

use std::sync::Arc;
use trace_err::*;
use tracing::{error, info};
use whisk_controller::controller::Controller;

const PKG_NAME: &str = env!("CARGO_PKG_NAME");
const PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

fn listen_for_cancel(
    cancel_token: &tokio_util::sync::CancellationToken,
    task_tracker: &tokio_util::task::TaskTracker,
) {
    #[cfg(unix)]
    let mut term_handler =
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .trace_expect("Failed to register signal handlers");
    #[cfg(not(unix))]
    let mut term_handler = std::future::pending();

    let cancel_token = cancel_token.clone();
    let task_tracker_cloned = task_tracker.clone();
    task_tracker.spawn(async move {
        tokio::select! {
            _ = term_handler.recv() => {
                // Signal stop
                info!("Received terminate signal, stopping...");
            }
            _ = tokio::signal::ctrl_c() => {
                // Signal stop
                info!("Received CTRL+C, stopping...");
            }
        }

        // Cancel everything
        cancel_token.cancel();
        task_tracker_cloned.close();
    });
}

async fn start_storage(config: &mut config::Config) -> anyhow::Result<()> {
    if let Some(entity_storage) = &config.entity_storage {
        config.controller.entity_storage = match entity_storage {
            config::EntityStorage::Memory => Some(whisk_controller::storage::entity_mem::new()),

            #[cfg(feature = "sqlite-storage")]
            config::EntityStorage::Sqlite(entity_storage) => Some(whisk_sqlite_storage::new(
                entity_storage
                    .as_ref()
                    .unwrap_or(&whisk_sqlite_storage::Config::default()),
                config.upgrade_storage,
            )?),
        };
    }

    if let Some(blob_storage) = &config.blob_storage {
        config.controller.blob_storage = match blob_storage {
            config::BlobStorage::Memory(blob_storage) => blob_storage
                .as_ref()
                .map(|blob_storage| whisk_controller::storage::blob_mem::new(blob_storage)),

            #[cfg(feature = "s3-storage")]
            config::BlobStorage::S3(blob_storage) => Some(
                whisk_s3_storage::new(
                    blob_storage
                        .as_ref()
                        .unwrap_or(&whisk_s3_storage::Config::default()),
                )
                .await?,
            ),
        };
    }

    if let Some(broker) = &config.broker {
        config.controller.broker = match broker {
            config::Broker::Memory(broker) => broker
                .as_ref()
                .map(|broker| whisk_controller::broker::mem::new(broker)),

            #[cfg(feature = "redis-broker")]
            config::Broker::Redis(broker) => Some(
                whisk_redis_broker::new(
                    broker
                        .as_ref()
                        .unwrap_or(&whisk_redis_broker::Config::default()),
                )
                .await?,
            ),
        };
    }

    Ok(())
}

/// Make sure the namespaces from configuration exist with their credentials.
async fn provision_namespaces(
    config: &config::Config,
    controller: &Controller,
) -> anyhow::Result<()> {
    for namespace in &config.namespaces {
        match controller
            .store()
            .create_namespace(namespace.to_entity())
            .await
        {
            Ok(namespace) => info!("Provisioned namespace: {}", namespace.name),
            Err(whisk_controller::Error::Conflict(_)) => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command line
    let Some((config, config_source)) = config::init() else {
        return Ok(());
    };

    // Resolve log level: env var overrides config, default to INFO
    let log_level = std::env::var("WHISK_CONTROLLER_LOG_LEVEL")
        .ok()
        .and_then(|s| s.parse::<tracing::Level>().ok())
        .or(config.log_level)
        .unwrap_or(tracing::Level::INFO);

    {
        use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};
        let filter = EnvFilter::builder()
            .with_default_directive(
                tracing_subscriber::filter::LevelFilter::from_level(log_level).into(),
            )
            .from_env_lossy();
        tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer().with_filter(filter))
            .init();
    }

    info!("{} version {} starting...", PKG_NAME, PKG_VERSION);
    info!("{config_source}");

    inner_main(config).await.inspect_err(|e| error!("{e}"))
}

async fn inner_main(mut config: config::Config) -> anyhow::Result<()> {
    // Start storage and broker backends
    start_storage(&mut config).await?;

    // Start the controller
    let controller = Arc::new(Controller::new(&config.controller));
    controller.start().await?;

    provision_namespaces(&config, &controller).await?;

    // Prepare for graceful shutdown
    let cancel_token = tokio_util::sync::CancellationToken::new();
    let task_tracker = tokio_util::task::TaskTracker::new();

    // Start the HTTP façade
    let router = routes::router(controller.clone());
    let listener = tokio::net::TcpListener::bind(&config.listen).await?;
    info!("Listening on {}", config.listen);

    let shutdown = cancel_token.clone();
    let server = task_tracker.spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
            .inspect_err(|e| error!("HTTP server failed: {e}"))
    });

    // And wait for shutdown signal
    listen_for_cancel(&cancel_token, &task_tracker);

    info!("Started successfully");

    // And wait for cancel token
    cancel_token.cancelled().await;

    // Wait for all tasks to finish
    _ = server.await;
    task_tracker.wait().await;

    // Shut down the controller
    controller.shutdown().await;

    info!("Stopped");

    Ok(())
}
