//! VerticaDB operator
//!
//! Reconciles one VerticaDB: installs the pods, revives the database from
//! communal storage when asked to, and restarts Vertica processes that
//! went down.

use anyhow::{Context, Result};
use kube::Client;
use operator_lib::health::{components, HealthRegistry};
use operator_lib::{NamespacedName, OperatorMetrics, ReconcileContext, StructuredLogger};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod admintools;
mod api;
mod config;
mod driver;
mod events;
mod kube_exec;
mod kube_platform;

const OPERATOR_NAME: &str = "vdb-operator";
const OPERATOR_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    let config = config::OperatorConfig::load()?;
    let logger = StructuredLogger::new(OPERATOR_NAME);
    logger.log_startup(OPERATOR_VERSION, &config.namespace, &config.vdb_name);

    let client = Client::try_default()
        .await
        .context("failed to create kubernetes client")?;

    let health_registry = HealthRegistry::new();
    for name in [components::INSTALL, components::REVIVE, components::RESTART] {
        health_registry.register(name).await;
    }
    let metrics = OperatorMetrics::new();

    let runner = Arc::new(kube_exec::KubeExecRunner::new(client.clone()));
    let events = Arc::new(events::KubeEventRecorder::new(
        client.clone(),
        OPERATOR_NAME,
        logger.clone(),
    ));
    let ctx = ReconcileContext {
        platform: Arc::new(kube_platform::KubePlatform::new(client.clone())),
        runner: runner.clone(),
        dispatcher: Arc::new(admintools::AdmintoolsDispatcher::new(runner, events.clone())),
        events,
        metrics: metrics.clone(),
    };

    let app_state = Arc::new(api::AppState::new(health_registry.clone(), metrics));
    let api_port = config.api_port;
    tokio::spawn(async move {
        if let Err(e) = api::serve(api_port, app_state).await {
            error!(error = %e, "API server stopped");
        }
    });

    let driver = driver::Driver::new(
        ctx,
        health_registry,
        logger,
        NamespacedName::new(&config.namespace, &config.vdb_name),
        config.restart_read_only,
    )
    .with_timing(config.requeue_interval(), config.pass_timeout());

    driver
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for the shutdown signal");
            }
        })
        .await;
    info!("Shutting down");
    Ok(())
}
