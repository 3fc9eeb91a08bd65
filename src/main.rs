use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::{body::Body, routing::get, Router};
use http::{HeaderValue, StatusCode};
use tower_governor::governor::GovernorConfigBuilder;
use tower_governor::{GovernorError, GovernorLayer};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod clock;
mod config;
mod db;
mod error;
mod lifecycle;
mod routes;
mod services;

use clock::{Clock, SystemClock};
use config::Config;
use services::senders::{ChannelSender, EmailSender};

pub struct AppState {
    pub db: sqlx::SqlitePool,
    pub config: Config,
    pub clock: Arc<dyn Clock>,
    pub email_sender: Arc<dyn ChannelSender>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "taskmaster_notifications=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    tracing::info!("Starting Task Master notifications service");

    // Initialize database
    let pool = services::init::init_db(&config).await?;

    let email_sender: Arc<dyn ChannelSender> = Arc::new(EmailSender::new(&config.email));

    let app_state = Arc::new(AppState {
        db: pool,
        config: config.clone(),
        clock: Arc::new(SystemClock),
        email_sender,
    });

    // Shutdown notifiers: broadcast for tokio workers, flag for std threads
    let (shutdown_tx, _shutdown_rx) = tokio::sync::broadcast::channel::<()>(1);
    let thread_shutdown = Arc::new(AtomicBool::new(false));

    // Spawn the dispatch sweep worker
    let bg_handles = services::init::spawn_background_workers(app_state.clone(), shutdown_tx.clone());

    // Rate limiter for the public webhook endpoint
    let mut webhooks_builder = GovernorConfigBuilder::default();
    webhooks_builder.per_second(config.rate_limit.webhook_per_second.into());
    webhooks_builder.burst_size(config.rate_limit.webhook_burst);
    webhooks_builder.error_handler(|error: GovernorError| -> http::Response<Body> {
        match error {
            GovernorError::TooManyRequests { wait_time, headers } => {
                let body = serde_json::json!({
                    "error": {
                        "code": "RATE_LIMITED",
                        "message": "Rate limit exceeded",
                        "retry_after_seconds": wait_time
                    }
                })
                .to_string();

                let mut resp = http::Response::new(Body::from(body));
                *resp.status_mut() = StatusCode::TOO_MANY_REQUESTS;
                resp.headers_mut().insert(
                    http::header::CONTENT_TYPE,
                    HeaderValue::from_static("application/json"),
                );
                if let Some(hmap) = headers {
                    for (name, value) in hmap.iter() {
                        resp.headers_mut().append(name.clone(), value.clone());
                    }
                }
                if let Ok(retry_after) = HeaderValue::from_str(&wait_time.to_string()) {
                    resp.headers_mut()
                        .insert(http::header::RETRY_AFTER, retry_after);
                }
                resp
            }
            GovernorError::UnableToExtractKey => {
                let mut resp = http::Response::new(Body::from(
                    "Unable to determine client IP for rate limiting",
                ));
                *resp.status_mut() = StatusCode::BAD_REQUEST;
                resp
            }
            GovernorError::Other { code, msg, headers } => {
                let body = msg.unwrap_or_else(|| "Rate limiting error".to_string());
                let mut resp = http::Response::new(Body::from(body));
                *resp.status_mut() =
                    StatusCode::from_u16(code.as_u16()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
                if let Some(hmap) = headers {
                    for (name, value) in hmap.iter() {
                        resp.headers_mut().append(name.clone(), value.clone());
                    }
                }
                resp
            }
        }
    });
    let webhooks_gov_conf = Arc::new(
        webhooks_builder
            .finish()
            .ok_or_else(|| anyhow::anyhow!("Failed to build webhooks governor config"))?,
    );
    // Background cleanup for the webhooks limiter storage
    let webhooks_cleaner = {
        let limiter = webhooks_gov_conf.limiter().clone();
        let interval = Duration::from_secs(60);
        let flag = thread_shutdown.clone();
        std::thread::spawn(move || {
            // Use smaller sleep granularity to allow quick shutdown.
            let tick = Duration::from_secs(1);
            loop {
                for _ in 0..interval.as_secs() {
                    if flag.load(Ordering::SeqCst) {
                        tracing::info!("Webhooks rate limiter cleanup thread exiting");
                        return;
                    }
                    std::thread::sleep(tick);
                }
                tracing::debug!("webhooks rate limiter size: {}", limiter.len());
                limiter.retain_recent();
            }
        })
    };

    let webhooks_rate_layer = GovernorLayer {
        config: webhooks_gov_conf.clone(),
    };

    // Build router
    let app = Router::new()
        .route("/health", get(routes::health::health_check))
        .nest("/api/notifications", routes::notifications::router())
        .nest(
            "/webhooks",
            routes::webhooks::router().layer(webhooks_rate_layer),
        )
        .with_state(app_state.clone())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(
                    config
                        .server
                        .frontend_url
                        .parse::<HeaderValue>()
                        .map_err(|_| anyhow::anyhow!("Invalid FRONTEND_URL for CORS"))?,
                )
                .allow_methods([http::Method::GET, http::Method::POST, http::Method::OPTIONS])
                .allow_headers([http::header::CONTENT_TYPE, http::header::ACCEPT])
                .allow_credentials(true),
        );

    // Start server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    tracing::info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let server_fut = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    );

    let shutdown_tx_clone = shutdown_tx.clone();
    let thread_shutdown_clone = thread_shutdown.clone();
    let signal_fut = async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            let mut term =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("Failed to bind SIGTERM");
            tokio::select! {
                _ = ctrl_c => {},
                _ = term.recv() => {},
            }
        }

        #[cfg(not(unix))]
        {
            ctrl_c.await.expect("Failed to bind Ctrl+C");
        }

        tracing::info!("Shutdown signal received, notifying background workers and threads");
        let _ = shutdown_tx_clone.send(());
        thread_shutdown_clone.store(true, Ordering::SeqCst);
    };

    tokio::select! {
        res = server_fut => {
            if let Err(e) = res {
                tracing::error!("Server error: {}", e);
            }
        }
        _ = signal_fut => {
            tracing::info!("Signal handler completed; server future dropped to stop accepting new connections");
        }
    }

    // Give the dispatch worker some time to finish the current batch.
    let shutdown_wait = Duration::from_secs(15);
    tracing::info!(
        "Waiting up to {}s for background workers to exit",
        shutdown_wait.as_secs()
    );
    let bg_wait = async {
        for h in bg_handles {
            let _ = h.await;
        }
    };
    let _ = tokio::time::timeout(shutdown_wait, bg_wait).await;

    // Join the cleanup thread; it checks `thread_shutdown` and exits quickly.
    if let Err(e) = webhooks_cleaner.join() {
        tracing::warn!("Webhooks cleanup thread join failed: {:?}", e);
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
