use std::any::Any;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use ama_store::{Database, MessageRepo, RoomRepo};
use axum::extract::State;
use axum::http::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, LINK};
use axum::http::{HeaderName, HeaderValue, Method};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch};
use axum::{Json, Router};
use tokio_util::sync::CancellationToken;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use crate::api;
use crate::broadcast::{Broadcaster, DEFAULT_WRITE_TIMEOUT};
use crate::error::ApiError;
use crate::registry::SubscriberRegistry;
use crate::subscription;

/// Server configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Upper bound on a single write to one subscriber.
    pub write_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        }
    }
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub rooms: RoomRepo,
    pub messages: MessageRepo,
    pub registry: Arc<SubscriberRegistry>,
    pub broadcaster: Broadcaster,
    /// Parent of every subscriber's cancellation handle.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(db: Database, config: &ServerConfig) -> Self {
        let registry = Arc::new(SubscriberRegistry::new());
        Self {
            rooms: RoomRepo::new(db.clone()),
            messages: MessageRepo::new(db),
            broadcaster: Broadcaster::new(Arc::clone(&registry), config.write_timeout),
            registry,
            shutdown: CancellationToken::new(),
        }
    }
}

fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(|origin: &HeaderValue, _| {
            let origin = origin.as_bytes();
            origin.starts_with(b"https://") || origin.starts_with(b"http://")
        }))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
            Method::PATCH,
        ])
        .allow_headers([
            ACCEPT,
            AUTHORIZATION,
            CONTENT_TYPE,
            HeaderName::from_static("x-csrf-token"),
        ])
        .expose_headers([LINK])
        .allow_credentials(false)
        .max_age(Duration::from_secs(300))
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    let messages = Router::new()
        .route("/", get(api::list_messages).post(api::create_message))
        .route("/{message_id}", get(api::get_message))
        .route(
            "/{message_id}/reactions",
            patch(api::add_reaction).delete(api::remove_reaction),
        )
        .route("/{message_id}/answers", patch(api::mark_answered));

    let rooms = Router::new()
        .route("/", get(api::list_rooms).post(api::create_room))
        .nest("/{room_id}/messages", messages);

    let router = Router::new()
        .route("/subscribers/{room_id}", get(subscription::subscribe))
        .route("/health", get(health_handler))
        .nest("/api/rooms", rooms)
        .with_state(state);

    with_middleware(router)
}

fn with_middleware(router: Router) -> Router {
    router
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(cors_layer())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
}

fn panic_response(err: Box<dyn Any + Send + 'static>) -> Response {
    let message = err
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| err.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("<non-string panic payload>");
    tracing::error!(panic = message, "handler panicked");
    ApiError::Internal.into_response()
}

/// Create and start the server. Returns a handle to shut it down.
pub async fn start(config: ServerConfig, db: Database) -> Result<ServerHandle, std::io::Error> {
    let state = AppState::new(db, &config);
    let registry = Arc::clone(&state.registry);
    let shutdown = state.shutdown.clone();

    let router = build_router(state);
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    tracing::info!(port = local_addr.port(), "AMA server started");

    let server = tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            let app = router.into_make_service_with_connect_info::<SocketAddr>();
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(shutdown.cancelled_owned())
                .await
            {
                tracing::error!(error = %e, "server error");
            }
        }
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        registry,
        shutdown,
        server,
    })
}

/// Handle returned by `start()`; keeps the server task alive.
pub struct ServerHandle {
    pub port: u16,
    registry: Arc<SubscriberRegistry>,
    shutdown: CancellationToken,
    server: tokio::task::JoinHandle<()>,
}

impl ServerHandle {
    pub fn registry(&self) -> &Arc<SubscriberRegistry> {
        &self.registry
    }

    /// Stop accepting requests, wake every parked subscriber, and wait for
    /// the server task to finish.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        if let Err(e) = self.server.await {
            tracing::error!(error = %e, "server task failed");
        }
    }
}

/// Health check HTTP endpoint.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "rooms": state.registry.active_rooms(),
        "subscribers": state.registry.total_subscribers(),
    }))
}
