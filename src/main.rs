use std::sync::Arc;

use axum::http::Method;
use axum::{Router, routing::get};
use clap::Parser;
use favorites::config::{Cli, Config, default_config_dir, default_config_path};
use favorites::db::Database;
use favorites::favorites::{ChannelSubscriber, EventBus, TableResolver};
use favorites::handler::{AppState, healthcheck};
use tokio::{signal, sync::mpsc};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let args = Cli::parse();

    // --config puts data (the database) next to the config file,
    // otherwise both live in ~/.favorites/
    let (config_path, data_dir) = match args.config_path {
        Some(path) => {
            let path = std::path::PathBuf::from(path);
            let dir = path
                .parent()
                .map(|p| p.to_path_buf())
                .unwrap_or_else(|| std::path::PathBuf::from("."));
            (path, dir)
        }
        None => (default_config_path(), default_config_dir()),
    };

    if let Err(e) = std::fs::create_dir_all(&data_dir) {
        eprintln!("failed to create data directory {:?}: {}", data_dir, e);
        std::process::exit(1);
    }

    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    tracing::info!("favorites.svc starting");

    let cfg = Config::new(&config_path.to_string_lossy()).unwrap_or_else(|e| {
        tracing::error!(error = %e, path = ?config_path, "failed to load config file");
        std::process::exit(1);
    });
    let db = Arc::new(Database::new(&cfg, &data_dir).await.unwrap_or_else(|e| {
        tracing::error!(error = %e, "failed to setup database");
        std::process::exit(1);
    }));

    if let Err(e) = favorites::favorites::register_content_types(&db, &cfg.favorites.content_types).await {
        tracing::error!(error = %e, "failed to register content types");
        std::process::exit(1);
    }
    let resolver = TableResolver::new(&cfg.favorites.content_types).unwrap_or_else(|e| {
        tracing::error!(error = %e, "invalid content type configuration");
        std::process::exit(1);
    });

    if cfg.favorites.hook_secret.as_deref().is_none_or(str::is_empty) {
        tracing::warn!("favorites.hook_secret not set, entity-deleted hook is disabled");
    }

    let address = format!("0.0.0.0:{}", cfg.app.get_port());
    let cancellation_token = CancellationToken::new();
    let (shutdown_complete_tx, mut shutdown_complete_rx) = mpsc::channel::<()>(1);

    let (subscriber, mut created_rx) = ChannelSubscriber::new();
    let mut events = EventBus::new();
    events.subscribe(Arc::new(subscriber));

    // Drains favorite-created events off the request path
    let events_token = cancellation_token.clone();
    let events_done = shutdown_complete_tx.clone();
    tokio::spawn(async move {
        let _done = events_done;
        loop {
            tokio::select! {
                event = created_rx.recv() => match event {
                    Some(event) => tracing::info!(
                        content_type_id = event.content_type_id,
                        object_id = %event.object_id,
                        count = event.count,
                        average_score = ?event.average_score,
                        "favorite created event"
                    ),
                    None => break,
                },
                _ = events_token.cancelled() => {
                    tracing::info!("event consumer shutting down");
                    break;
                }
            }
        }
    });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers(Any);

    let state = AppState {
        db: db.clone(),
        events: Arc::new(events),
        resolver: Arc::new(resolver),
        settings: Arc::new(cfg.favorites.clone()),
    };

    let app = Router::new()
        .route("/healthcheck", get(healthcheck))
        .nest("/favorites", favorites::favorites::routes())
        .layer(cors)
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&address).await.unwrap_or_else(|e| {
        tracing::error!(error = %e, "failed to setup tcp listener");
        std::process::exit(1);
    });

    tracing::info!("favorites.svc running on {}", &address);
    tokio::select! {
        result = axum::serve(listener, app) => {
            if let Err(err) = result {
                tracing::error!(error = %err, "server error");
                std::process::exit(1);
            }
        }
        _ = signal::ctrl_c() => {
            tracing::info!("ctrl+c signal received, preparing to shutdown");
            cancellation_token.cancel();
        }
    }

    drop(shutdown_complete_tx);
    shutdown_complete_rx.recv().await;

    if let Err(e) = db.sync().await {
        tracing::warn!(error = %e, "final replica sync failed");
    }
    tracing::info!("favorites.svc going off, graceful shutdown complete");
}
