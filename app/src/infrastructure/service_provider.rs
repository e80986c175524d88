use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::extract::{State, WebSocketUpgrade};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use domain::service::{BlobStore, ResultCache, TaskEventSink, TaskManager};
use service::engine::build_process_engine;
use service::result_cache::SledResultCache;
use service::task_manager::{SchedulerConfig, TaskManagerImpl};
use service::FsBlobStore;
use tower_http::trace::TraceLayer;

use crate::auth::{NoopValidator, StaticTokenValidator, TokenValidator};
use crate::config::ServerConfig;
use crate::infrastructure::BackgroundService;
use crate::session::handler::{handle_socket, reject_over_capacity, ConnectionContext};
use crate::session::registry::SessionRegistry;

/// Constructs every `Arc<dyn Trait>` the session layer and task manager need,
/// in dependency order. Replaces the teacher's private `build_container!`
/// macro (`alice-di`, a git-only dependency the teacher's own workspace
/// manifest flags for replacement before open-sourcing) with plain,
/// explicit Rust — see DESIGN.md.
pub struct ServiceProvider {
    pub task_manager_impl: Arc<TaskManagerImpl>,
    pub result_cache: Arc<SledResultCache>,
    ws_acceptor: Arc<WsAcceptor>,
}

impl ServiceProvider {
    pub async fn build(config: ServerConfig) -> anyhow::Result<Self> {
        let config = Arc::new(config);
        let data_dir = PathBuf::from(&config.data_dir);

        let blob_store = Arc::new(
            FsBlobStore::new(data_dir.join("blobs"), config.scheduler.delete_after_transcription)
                .await
                .context("failed to initialize blob store")?,
        );

        let cache_ttl = Duration::from_secs(config.cache.cache_ttl_hours.saturating_mul(3600));
        let result_cache =
            SledResultCache::open(data_dir.join("cache"), cache_ttl).context("failed to open result cache")?;

        let engine = build_process_engine(
            &config.scheduler.concurrency_mode,
            config.scheduler.max_concurrent_tasks,
            &config.scheduler.engine_command,
        );

        let registry = SessionRegistry::new(config.session_queue_capacity);
        let event_sink: Arc<dyn TaskEventSink> = registry.clone();

        let scheduler_config = SchedulerConfig {
            max_queue_size: config.scheduler.max_queue_size,
            max_concurrent: config.scheduler.max_concurrent_tasks,
            retry_times: config.scheduler.retry_times,
            task_timeout: Duration::from_secs(config.scheduler.task_timeout_minutes.saturating_mul(60)),
            merge_gap_ms: (config.scheduler.merge_gap_s * 1000.0) as u64,
            cache_enabled: config.cache.cache_enabled,
        };

        let task_manager_impl = Arc::new(TaskManagerImpl::new(
            blob_store.clone() as Arc<dyn BlobStore>,
            result_cache.clone() as Arc<dyn ResultCache>,
            engine,
            event_sink,
            scheduler_config,
        ));
        let task_manager: Arc<dyn TaskManager> = task_manager_impl.clone();

        let token_validator: Arc<dyn TokenValidator> = if config.auth.enabled {
            Arc::new(StaticTokenValidator::new(config.auth.valid_tokens.clone()))
        } else {
            Arc::new(NoopValidator)
        };

        let connection_ctx = Arc::new(ConnectionContext {
            config: config.clone(),
            task_manager,
            blob_store: blob_store as Arc<dyn BlobStore>,
            registry,
            token_validator,
        });

        let addr: SocketAddr = format!("{}:{}", config.host, config.port)
            .parse()
            .with_context(|| format!("invalid host/port: {}:{}", config.host, config.port))?;
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind websocket acceptor to {addr}"))?;
        tracing::info!(%addr, "websocket acceptor bound");

        let app = Router::new()
            .route("/ws", get(ws_handler))
            .layer(TraceLayer::new_for_http())
            .with_state(connection_ctx);

        let ws_acceptor = Arc::new(WsAcceptor { listener: tokio::sync::Mutex::new(Some(listener)), app });

        Ok(Self { task_manager_impl, result_cache, ws_acceptor })
    }

    /// Mirrors the teacher's `IBackgroundService` vector the `build_container!`
    /// macro assembled (`main.rs`'s `sp.provide()`): every independently
    /// running task this process owns, spawned by `main` and awaited until
    /// shutdown.
    pub fn background_services(&self) -> Vec<Arc<dyn BackgroundService>> {
        vec![self.ws_acceptor.clone()]
    }
}

struct WsAcceptor {
    listener: tokio::sync::Mutex<Option<tokio::net::TcpListener>>,
    app: Router,
}

#[async_trait::async_trait]
impl BackgroundService for WsAcceptor {
    async fn run(&self) {
        let Some(listener) = self.listener.lock().await.take() else {
            tracing::error!("websocket acceptor already consumed");
            return;
        };
        if let Err(e) = axum::serve(listener, self.app.clone()).await {
            tracing::error!(error = %e, "websocket acceptor exited unexpectedly");
        }
    }
}

async fn ws_handler(State(ctx): State<Arc<ConnectionContext>>, ws: WebSocketUpgrade) -> Response {
    if ctx.registry.connection_count() >= ctx.config.max_connections {
        return ws.on_upgrade(reject_over_capacity);
    }
    ws.on_upgrade(move |socket| handle_socket(socket, ctx))
}
