use std::sync::Arc;

use bookshelf::auth::SessionGate;
use bookshelf::config::{Backend, Cli, Config, default_config_dir, default_config_path};
use bookshelf::db::Database;
use bookshelf::handler::AppState;
use bookshelf::store::BookStore;
use bookshelf::tree::{MemoryTree, SqlTree, TreeStore};
use clap::Parser;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let args = Cli::parse();
    dotenvy::dotenv().ok();

    // Determine config path and data directory
    // If --config is provided, use its parent directory for data (database, etc.)
    // Otherwise use ~/.bookshelf/ for both
    let (config_path, data_dir) = match args.config_path {
        Some(path) => {
            let path = std::path::PathBuf::from(path);
            let dir = path
                .parent()
                .map(|p| p.to_path_buf())
                .unwrap_or_else(|| std::path::PathBuf::from("."));
            (path, dir)
        }
        None => {
            let dir = default_config_dir();
            (default_config_path(), dir)
        }
    };

    // Ensure data directory exists
    if let Err(e) = std::fs::create_dir_all(&data_dir) {
        eprintln!("failed to create data directory {:?}: {}", data_dir, e);
        std::process::exit(1);
    }

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    tracing::info!("bookshelf.svc starting");

    let cfg = Config::new(&config_path.to_string_lossy()).unwrap_or_else(|e| {
        tracing::error!(error = %e, path = ?config_path, "failed to load config file");
        std::process::exit(1);
    });

    let tree: Arc<dyn TreeStore> = match cfg.app.backend {
        Backend::Memory => {
            tracing::warn!("using in-memory tree, data will not survive a restart");
            Arc::new(MemoryTree::new())
        }
        Backend::Libsql => {
            let db = Database::new(&cfg, &data_dir).await.unwrap_or_else(|e| {
                tracing::error!(error = %e, "failed to setup database");
                std::process::exit(1);
            });
            if let Err(e) = db.sync().await {
                tracing::warn!(error = %e, "initial replica sync failed, serving local state");
            }
            Arc::new(SqlTree::new(Arc::new(db)))
        }
    };

    let books = BookStore::new(tree, cfg.app.collection.clone()).with_id_strategy(cfg.app.id_strategy);
    let session = SessionGate::new(cfg.session.token.as_deref(), cfg.session.user.clone());
    match session.fingerprint() {
        Some(fingerprint) => tracing::info!(%fingerprint, "session gate enabled"),
        None => tracing::info!("no session token configured, /api/user will reject all requests"),
    }
    tracing::info!(
        collection = %cfg.app.collection,
        id_strategy = ?cfg.app.id_strategy,
        "book store ready"
    );

    let app = bookshelf::app(AppState {
        books: Arc::new(books),
        session: Arc::new(session),
    });

    let address = format!("0.0.0.0:{}", cfg.app.get_port());
    let cancellation_token = CancellationToken::new();

    let shutdown_token = cancellation_token.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            tracing::info!("ctrl+c signal received, preparing to shutdown");
            shutdown_token.cancel();
        }
    });

    let listener = tokio::net::TcpListener::bind(&address).await.unwrap_or_else(|e| {
        tracing::error!(error = %e, "failed to setup tcp listener");
        std::process::exit(1);
    });

    tracing::info!("bookshelf.svc running on {}", &address);
    if let Err(err) = axum::serve(listener, app)
        .with_graceful_shutdown(cancellation_token.cancelled_owned())
        .await
    {
        tracing::error!(error = %err, "server stopped with an error");
        std::process::exit(1);
    }

    tracing::info!("bookshelf.svc going off, graceful shutdown complete");
}
