use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, State, WebSocketUpgrade};
use axum::http::{HeaderValue, StatusCode};
use axum::middleware;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use quarry_runtime::{spawn_resume, spawn_session, Agent, AgentOutcome, NullSink};

use crate::auth::{auth_middleware, AuthConfig};
use crate::rate_limiter::DailyRateLimiter;
use crate::session_manager::SessionManager;
use crate::types::*;

pub const DEFAULT_CHANNEL_CAPACITY: usize = 32;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub agent: Arc<Agent>,
    pub auth_config: Arc<AuthConfig>,
    pub rate_limiter: Arc<DailyRateLimiter>,
    pub session_manager: Arc<SessionManager>,
    pub allowed_origins: Vec<String>,
    /// Progress channel size per streaming session
    pub channel_capacity: usize,
}

impl AppState {
    pub fn new(agent: Arc<Agent>, auth_config: AuthConfig, daily_limit: u32) -> Self {
        Self {
            agent,
            auth_config: Arc::new(auth_config),
            rate_limiter: Arc::new(DailyRateLimiter::new(daily_limit)),
            session_manager: Arc::new(SessionManager::default()),
            allowed_origins: Vec::new(),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }

    pub fn with_allowed_origins(mut self, origins: Vec<String>) -> Self {
        self.allowed_origins = origins;
        self
    }

    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }
}

/// Create the Axum router with all routes
pub fn create_router(state: AppState) -> Router {
    let cors = if state.allowed_origins.is_empty() {
        // Permissive for development
        CorsLayer::permissive()
    } else {
        let origins: Vec<HeaderValue> = state
            .allowed_origins
            .iter()
            .filter_map(|origin| match origin.parse() {
                Ok(value) => Some(value),
                Err(_) => {
                    warn!(origin = %origin, "Ignoring invalid CORS origin");
                    None
                }
            })
            .collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    };

    let auth_config = state.auth_config.clone();

    Router::new()
        .route("/health", get(health_check))
        .route("/api/v1/ask", post(ask))
        .route("/api/v1/continue/{id}", post(continue_session))
        .route("/ws/ask", get(ws_upgrade))
        .layer(middleware::from_fn(move |req, next| {
            auth_middleware(auth_config.clone(), req, next)
        }))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Start the gateway server
pub async fn start_server(state: AppState, host: &str, port: u16) -> anyhow::Result<()> {
    spawn_cleanup(state.clone());
    let router = create_router(state);
    let addr = format!("{}:{}", host, port);

    info!(addr = %addr, "Starting gateway server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Gateway server stopped");
    Ok(())
}

const CLEANUP_INTERVAL: tokio::time::Duration = tokio::time::Duration::from_secs(600);

fn spawn_cleanup(state: AppState) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(CLEANUP_INTERVAL);
        loop {
            interval.tick().await;
            let users = state.rate_limiter.cleanup();
            let sessions = state.session_manager.cleanup().await;
            info!(users, sessions, "Periodic cleanup");
        }
    });
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for Ctrl+C");
        return;
    }
    info!("Shutdown signal received, draining connections...");
    tokio::time::sleep(tokio::time::Duration::from_secs(5)).await;
    info!("Drain complete, shutting down");
}

// --- REST Handlers ---

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, error: impl Into<String>) -> ApiError {
    (status, Json(ErrorResponse { error: error.into() }))
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        degraded: !state.agent.retriever().is_available(),
    })
}

const MAX_QUERY_LENGTH: usize = 50_000; // 50KB

fn validate_query(query: &str) -> Result<(), ApiError> {
    if query.len() > MAX_QUERY_LENGTH {
        return Err(api_error(
            StatusCode::PAYLOAD_TOO_LARGE,
            format!("Query exceeds maximum length of {} bytes", MAX_QUERY_LENGTH),
        ));
    }
    if query.trim().is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "Query is empty"));
    }
    Ok(())
}

fn charge(state: &AppState, user_id: &str) -> Result<(), ApiError> {
    let status = state.rate_limiter.check(user_id);
    if status.allowed {
        return Ok(());
    }
    info!(user_id = %user_id, used = status.used, "Daily query limit reached");
    Err(api_error(
        StatusCode::TOO_MANY_REQUESTS,
        format!(
            "Daily limit of {} queries reached. Try again tomorrow.",
            state.rate_limiter.daily_limit()
        ),
    ))
}

/// Register a resumable outcome and build the response body
async fn finish(state: &AppState, user_id: &str, mut outcome: AgentOutcome) -> AskResponse {
    let continuation_id = match outcome.resume.take() {
        Some(suspended) => Some(state.session_manager.insert(user_id, suspended).await),
        None => None,
    };
    AskResponse::new(&outcome, continuation_id)
}

async fn ask(State(state): State<AppState>, Json(req): Json<AskRequest>) -> Result<Json<AskResponse>, ApiError> {
    validate_query(&req.query)?;
    let user_id = req.user().to_string();
    charge(&state, &user_id)?;

    let outcome = state.agent.ask(&req.into_query()).await;
    Ok(Json(finish(&state, &user_id, outcome).await))
}

async fn continue_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<AskResponse>, ApiError> {
    let pending = state
        .session_manager
        .take(&id)
        .await
        .map_err(|e| api_error(StatusCode::NOT_FOUND, e.to_string()))?;
    charge(&state, &pending.user_id)?;

    let outcome = state.agent.resume(pending.suspended, &NullSink).await;
    Ok(Json(finish(&state, &pending.user_id, outcome).await))
}

// --- WebSocket Handler ---

async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws_connection(socket, state))
}

const WS_IDLE_TIMEOUT: tokio::time::Duration = tokio::time::Duration::from_secs(300);

type WsSender = SplitSink<WebSocket, Message>;

async fn send_event(sender: &mut WsSender, event: &ServerEvent) -> bool {
    match serde_json::to_string(event) {
        Ok(json) => sender.send(Message::Text(json.into())).await.is_ok(),
        Err(e) => {
            error!(error = %e, "Failed to encode server event");
            true
        }
    }
}

async fn handle_ws_connection(socket: WebSocket, state: AppState) {
    use tokio::time::timeout;

    let (mut ws_sender, mut ws_receiver) = socket.split();

    // One session at a time per connection; progress is forwarded as it arrives
    loop {
        let text = match timeout(WS_IDLE_TIMEOUT, ws_receiver.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => text,
            Ok(Some(Ok(Message::Close(_)))) | Ok(None) => {
                info!("WebSocket connection closed by client");
                break;
            }
            Ok(Some(Ok(_))) => continue,
            Ok(Some(Err(_))) => {
                info!("WebSocket error, closing connection");
                break;
            }
            Err(_) => {
                info!(
                    "WebSocket idle timeout ({}s), closing connection",
                    WS_IDLE_TIMEOUT.as_secs()
                );
                break;
            }
        };

        let event = match serde_json::from_str::<ClientMessage>(text.as_str()) {
            Ok(message) => stream_session(&state, message, &mut ws_sender).await,
            Err(e) => Some(ServerEvent::Error {
                message: format!("Invalid message: {}", e),
            }),
        };
        if let Some(event) = event {
            if !send_event(&mut ws_sender, &event).await {
                break;
            }
        }
    }
}

/// Run one ask or continue, forwarding progress. Returns the closing event.
async fn stream_session(state: &AppState, message: ClientMessage, sender: &mut WsSender) -> Option<ServerEvent> {
    let (user_id, (mut rx, handle)) = match message {
        ClientMessage::Ask(req) => {
            if let Err((_, Json(err))) = validate_query(&req.query) {
                return Some(ServerEvent::Error { message: err.error });
            }
            let user_id = req.user().to_string();
            if let Err((_, Json(err))) = charge(state, &user_id) {
                return Some(ServerEvent::Error { message: err.error });
            }
            let session = spawn_session(state.agent.clone(), req.into_query(), state.channel_capacity);
            (user_id, session)
        }
        ClientMessage::Continue { continuation_id } => {
            let pending = match state.session_manager.take(&continuation_id).await {
                Ok(pending) => pending,
                Err(e) => return Some(ServerEvent::Error { message: e.to_string() }),
            };
            if let Err((_, Json(err))) = charge(state, &pending.user_id) {
                return Some(ServerEvent::Error { message: err.error });
            }
            let session = spawn_resume(state.agent.clone(), pending.suspended, state.channel_capacity);
            (pending.user_id, session)
        }
    };

    let mut client_gone = false;
    while let Some(update) = rx.recv().await {
        if !client_gone && !send_event(sender, &ServerEvent::from(update)).await {
            // keep draining so the session can finish and persist its state
            client_gone = true;
        }
    }

    match handle.await {
        Ok(outcome) => {
            let response = finish(state, &user_id, outcome).await;
            Some(ServerEvent::Done {
                termination: response.termination,
                turns: response.turns,
                continuation_id: response.continuation_id,
            })
        }
        Err(e) => {
            error!(error = %e, "Session task failed");
            Some(ServerEvent::Error {
                message: "Session failed".to_string(),
            })
        }
    }
}
