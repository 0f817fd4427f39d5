//! recruit-notify server binary entrypoint.

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use recruit_common::config::AppConfig;
use recruit_common::rules::NotificationRules;
use recruit_engine::{Distributor, Scheduler};

use recruit_api::bootstrap::{build_context, prepare_store};
use recruit_api::routes::create_router;
use recruit_api::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("recruit_api=info,recruit_engine=info,tower_http=debug")
    });
    if std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json")) {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    tracing::info!("Starting recruit-notify...");

    // Load configuration
    let config = AppConfig::from_env()?;
    let rules = NotificationRules::load(&config.rules_path)?;
    let jobs = rules.schedule_jobs();

    let ctx = build_context(&config, rules)?;
    prepare_store(
        &ctx,
        &config.subscription_criteria,
        config.webhook_endpoint.as_deref(),
    )
    .await?;

    // Scheduled delivery
    let scheduler = Scheduler::new(jobs, Arc::new(Distributor::new(&ctx)))?;
    tracing::info!(jobs = scheduler.job_count(), "Scheduler configured");
    let (stop_tx, stop_rx) = tokio::sync::watch::channel(false);
    let scheduler_task = tokio::spawn(scheduler.run(async move {
        let mut stop_rx = stop_rx;
        let _ = stop_rx.wait_for(|stopped| *stopped).await;
    }));

    // Start server
    let app = create_router(AppState::new(&ctx, config.systems.clone()));
    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    tracing::info!("Webhook server listening on {}", config.listen_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = stop_tx.send(true);
    scheduler_task.await?;
    tracing::info!("recruit-notify stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
