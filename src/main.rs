use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use tokio::{signal, sync::mpsc};
use tracing::{error, info, warn};

use pantry_api as api;
use pantry_api::payments::{DisabledProcessor, PaymentProcessor, ProcessorError, StripeClient};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = api::config::load_config()?;
    api::config::init_tracing(cfg.log_level(), cfg.log_json);

    let db_pool = api::db::establish_connection_from_app_config(&cfg).await?;
    if cfg.auto_migrate {
        api::db::run_migrations(&db_pool).await.map_err(|e| {
            error!("Failed running migrations: {}", e);
            e
        })?;
    }
    let db_arc = Arc::new(db_pool);

    let (event_tx, event_rx) = mpsc::channel(cfg.event_channel_capacity);
    let event_sender = Arc::new(api::events::EventSender::new(event_tx));
    tokio::spawn(api::events::process_events(event_rx));

    let auth_cfg =
        api::auth::AuthConfig::from_app_config(&cfg).context("failed to create auth config")?;
    let auth_service = Arc::new(api::auth::AuthService::new(auth_cfg));

    let processor: Arc<dyn PaymentProcessor> = match StripeClient::from_config(&cfg) {
        Ok(client) => Arc::new(client),
        Err(ProcessorError::NotConfigured) => {
            warn!("payment_api_key is not set; payment endpoints will return 502");
            Arc::new(DisabledProcessor)
        }
        Err(e) => return Err(e).context("failed to build payment processor client"),
    };
    if cfg.payment_webhook_secret.is_none() {
        warn!("payment_webhook_secret is not set; every webhook delivery will be rejected");
    }

    let services =
        api::handlers::AppServices::new(db_arc.clone(), &cfg, processor, Some(event_sender));

    let app_state = api::AppState {
        db: db_arc,
        config: cfg.clone(),
        auth: auth_service,
        services,
    };
    let app = api::app_router(app_state);

    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port)
        .parse()
        .with_context(|| format!("invalid listen address {}:{}", cfg.host, cfg.port))?;
    info!("pantry-api listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("pantry-api stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {}", e);
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
    info!("shutdown signal received");
}
