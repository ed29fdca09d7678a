use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use tokio::signal;
use tracing::{error, info, warn};

use factory_stock_api as api;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = api::config::load_config()?;
    api::config::init_tracing(&cfg.log_level, cfg.log_json);

    // Init DB
    let db_pool = api::db::establish_connection_from_app_config(&cfg).await?;
    if cfg.auto_migrate {
        api::db::run_migrations(&db_pool).await.map_err(|e| {
            error!("Failed running migrations: {}", e);
            e
        })?;
    }
    let db_arc = Arc::new(db_pool);

    // Init events
    let (event_sender, event_rx) = api::events::EventSender::channel(cfg.event_channel_capacity);
    let event_loop = tokio::spawn(api::events::process_events(event_rx));

    let state = api::AppState::new(db_arc.clone(), cfg.clone(), Some(event_sender.clone()));

    let backup_task = if cfg.backup_enabled {
        Some(api::backup::spawn_backup_scheduler(
            state.stock.clone(),
            cfg.backup_settings(),
            Some(event_sender.clone()),
        ))
    } else {
        info!("Periodic backups disabled");
        None
    };
    // the state and the scheduler hold the remaining senders
    drop(event_sender);

    let app = api::app_router(state);

    // Bind and serve
    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port)
        .parse()
        .with_context(|| format!("invalid listen address {}:{}", cfg.host, cfg.port))?;
    info!("factory-stock-api listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(task) = backup_task {
        task.abort();
        let _ = task.await;
    }
    // with the router and the scheduler gone no sender is left
    match tokio::time::timeout(Duration::from_secs(5), event_loop).await {
        Ok(Ok(processed)) => info!(processed, "event loop finished"),
        Ok(Err(e)) => error!("event loop failed: {}", e),
        Err(_) => warn!("event loop still busy at shutdown"),
    }

    if let Ok(pool) = Arc::try_unwrap(db_arc) {
        api::db::close_pool(pool).await?;
    }
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
                error!("failed to install signal handler: {}", e);
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
