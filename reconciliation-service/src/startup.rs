//! Application startup and lifecycle management.

use crate::config::ReconciliationConfig;
use crate::handlers::{
    health::{health_check, liveness_check, readiness_check},
    invoices::{get_invoice, get_invoice_by_number, invoice_candidates, search_invoices},
    metrics::metrics_handler,
    reconciliation::{
        get_batch_status, get_batch_summary, list_batch_transactions, list_batches, upload_batch,
    },
    transactions::{
        bulk_confirm_transactions, confirm_transaction, get_transaction, get_transaction_audit,
        manual_match_transaction, mark_transaction_external, reject_transaction,
    },
};
use crate::services::{
    BatchWorker, Database, JobDispatcher, NoopProgressMirror, ProgressMirror, RedisJobQueue,
    RedisProgressMirror, init_metrics,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::HeaderValue,
    middleware,
    routing::{get, post},
};
use service_core::error::AppError;
use service_core::middleware::metrics::metrics_middleware;
use service_core::middleware::rate_limit::{build_ip_rate_limiter, ip_rate_limit_middleware};
use service_core::middleware::tracing::request_id_middleware;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ReconciliationConfig,
    pub db: Arc<Database>,
    pub mirror: Arc<dyn ProgressMirror>,
    pub dispatcher: Arc<JobDispatcher>,
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    state: AppState,
}

impl Application {
    /// Build the application with the given configuration.
    pub async fn build(config: ReconciliationConfig) -> Result<Self, AppError> {
        Self::build_internal(config, true).await
    }

    /// Build the application without running migrations.
    /// Use this in tests when migrations are already applied by the test harness.
    pub async fn build_without_migrations(config: ReconciliationConfig) -> Result<Self, AppError> {
        Self::build_internal(config, false).await
    }

    async fn build_internal(
        config: ReconciliationConfig,
        run_migrations: bool,
    ) -> Result<Self, AppError> {
        // Initialize metrics
        init_metrics();

        // Connect to database
        let db = Database::new(
            &config.database.url,
            config.database.max_connections,
            config.database.min_connections,
        )
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to connect to PostgreSQL");
            e
        })?;

        if run_migrations {
            db.run_migrations().await.map_err(|e| {
                tracing::error!(error = %e, "Failed to run migrations");
                e
            })?;
        }

        let db = Arc::new(db);

        // Redis backs the job queue and the progress mirror; both
        // degrade gracefully when it is absent or unreachable.
        let (mirror, queue) = Self::connect_redis(&config).await;

        let worker = Arc::new(BatchWorker::new(db.clone(), mirror.clone()));
        if let Some(queue) = &queue {
            queue.spawn_consumers(worker.clone(), config.worker.clone());
        }
        let dispatcher = Arc::new(JobDispatcher::new(queue, worker));

        let state = AppState {
            config: config.clone(),
            db,
            mirror,
            dispatcher,
        };

        let host: std::net::IpAddr = config
            .common
            .host
            .parse()
            .unwrap_or_else(|_| std::net::IpAddr::from([0, 0, 0, 0]));
        let addr = SocketAddr::new(host, config.common.port);
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!(error = %e, addr = %addr, "Failed to bind HTTP listener");
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!(port = port, "Reconciliation service listener bound");

        Ok(Self {
            port,
            listener,
            state,
        })
    }

    async fn connect_redis(
        config: &ReconciliationConfig,
    ) -> (Arc<dyn ProgressMirror>, Option<RedisJobQueue>) {
        let Some(url) = &config.redis.url else {
            tracing::info!("Redis not configured - using in-process queue and no-op mirror");
            return (Arc::new(NoopProgressMirror), None);
        };

        let client = match redis::Client::open(url.as_str()) {
            Ok(client) => client,
            Err(e) => {
                tracing::warn!(error = %e, "Invalid Redis URL - falling back to in-process execution");
                return (Arc::new(NoopProgressMirror), None);
            }
        };

        match client.get_connection_manager().await {
            Ok(manager) => {
                tracing::info!("Connected to Redis");
                (
                    Arc::new(RedisProgressMirror::new(manager.clone())),
                    Some(RedisJobQueue::new(manager)),
                )
            }
            Err(e) => {
                tracing::warn!(error = %e, "Redis unreachable - falling back to in-process execution");
                (Arc::new(NoopProgressMirror), None)
            }
        }
    }

    /// Get the port the server is listening on.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Get a reference to the database.
    pub fn db(&self) -> &Database {
        &self.state.db
    }

    /// Run the application until stopped.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        let config = &self.state.config;

        let api = Router::new()
            .route("/reconciliation/upload", post(upload_batch))
            .route("/reconciliation", get(list_batches))
            .route("/reconciliation/:batch_id", get(get_batch_status))
            .route(
                "/reconciliation/:batch_id/transactions",
                get(list_batch_transactions),
            )
            .route("/reconciliation/:batch_id/summary", get(get_batch_summary))
            .route("/transactions/bulk-confirm", post(bulk_confirm_transactions))
            .route("/transactions/:id/confirm", post(confirm_transaction))
            .route("/transactions/:id/reject", post(reject_transaction))
            .route("/transactions/:id/match", post(manual_match_transaction))
            .route("/transactions/:id/external", post(mark_transaction_external))
            .route("/transactions/:id/audit", get(get_transaction_audit))
            .route("/transactions/:id", get(get_transaction))
            .route("/invoices/search", get(search_invoices))
            .route("/invoices/candidates", get(invoice_candidates))
            .route("/invoices/by-number/:number", get(get_invoice_by_number))
            .route("/invoices/:id", get(get_invoice));

        let cors = if config.cors_origins.is_empty() {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        } else {
            let origins: Vec<HeaderValue> = config
                .cors_origins
                .iter()
                .filter_map(|origin| origin.parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(Any)
                .allow_headers(Any)
        };

        let rate_limiter = build_ip_rate_limiter(
            config.rate_limit.max_requests,
            config.rate_limit.window_seconds,
        );

        let router = Router::new()
            .nest(&config.api_prefix, api)
            .route("/health", get(health_check))
            .route("/health/ready", get(readiness_check))
            .route("/health/live", get(liveness_check))
            .route("/metrics", get(metrics_handler))
            .layer(DefaultBodyLimit::max(config.upload.max_bytes))
            .layer(cors)
            .layer(TraceLayer::new_for_http())
            .layer(middleware::from_fn(metrics_middleware))
            .layer(middleware::from_fn(request_id_middleware))
            .layer(middleware::from_fn_with_state(
                rate_limiter,
                ip_rate_limit_middleware,
            ))
            .with_state(self.state.clone());

        tracing::info!(
            service = "reconciliation-service",
            version = env!("CARGO_PKG_VERSION"),
            port = self.port,
            api_prefix = %self.state.config.api_prefix,
            "Service ready to accept connections"
        );

        axum::serve(
            self.listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
    }
}
