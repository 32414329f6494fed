//! callaudit-pipeline - batch call-audit orchestration service
//!
//! Runs three long-lived tasks in one process: the batch pipeline
//! orchestrator, the call drain loop, and the small HTTP boundary
//! (health, webhook receiver, matching fan-out). One active orchestrator
//! process per deployment is assumed.

use anyhow::Result;
use callaudit_pipeline::config::Settings;
use callaudit_pipeline::pipeline::drain::CallDrainLoop;
use callaudit_pipeline::pipeline::orchestrator::Orchestrator;
use callaudit_pipeline::pipeline::refresher::BatchStatusRefresher;
use callaudit_pipeline::pipeline::PipelineFlags;
use callaudit_pipeline::services::{
    EventLog, InferenceClient, MediatorClient, StageDispatcher, WebhookClient,
};
use callaudit_pipeline::AppState;
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let settings = Settings::from_env();
    tracing::info!("Starting callaudit-pipeline");
    tracing::info!("Version: {}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Database: {}", settings.database_path);
    tracing::info!("GPU hosts: {:?}", settings.gpu_host_list());

    let db = callaudit_pipeline::db::init_database_pool(Path::new(&settings.database_path)).await?;
    tracing::info!("Database connection established");

    let mediator = Arc::new(MediatorClient::new(
        settings.gpu_host_list(),
        settings.mediator_port,
        settings.http_timeout(),
    )?);
    let inference = InferenceClient::new(settings.mediator_port, settings.http_timeout())?;
    let webhook = WebhookClient::new(settings.audit_server_url.clone());
    let event_log = EventLog::new(db.clone());
    let flags = Arc::new(PipelineFlags::new());

    let dispatcher = StageDispatcher::new(
        db.clone(),
        mediator.clone(),
        inference.clone(),
        event_log.clone(),
        settings.dispatch_concurrency,
    );

    let orchestrator = Orchestrator::new(
        db.clone(),
        settings.clone(),
        mediator.clone(),
        mediator.clone(),
        dispatcher,
        event_log.clone(),
        flags.clone(),
    );
    tokio::spawn(orchestrator.run());

    let drain = CallDrainLoop::new(
        db.clone(),
        settings.clone(),
        mediator.clone(),
        inference,
        webhook,
        flags.clone(),
    );
    tokio::spawn(drain.run());

    let refresher = BatchStatusRefresher::new(
        db.clone(),
        event_log.clone(),
        settings.poll_interval(),
    );
    tokio::spawn(refresher.run());

    let state = AppState::new(db, settings.clone(), flags);
    let app = callaudit_pipeline::build_router(state);

    let listener = tokio::net::TcpListener::bind(&settings.listen_addr).await?;
    tracing::info!("Listening on http://{}", settings.listen_addr);
    axum::serve(listener, app).await?;

    Ok(())
}
