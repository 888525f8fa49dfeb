use std::sync::Arc;

use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use tokio::sync::{broadcast, mpsc};
use tower_http::cors::CorsLayer;

use atelier_core::events::GenerationEvent;
use atelier_engine::Generator;
use atelier_store::StoreError;

use crate::client::{self, ClientId, ClientRegistry};
use crate::config::AppConfig;
use crate::event_bridge;
use crate::handlers::{self, HandlerState};
use crate::rpc::RpcRequest;

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub handler_state: Arc<HandlerState>,
    pub client_registry: Arc<ClientRegistry>,
    pub message_tx: mpsc::Sender<(ClientId, String)>,
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .route("/images/{reference}", get(image_handler))
        .route("/thumbnails/{reference}", get(thumbnail_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// Create and start the server. Returns a handle that keeps the background
/// tasks alive.
pub async fn start(
    config: AppConfig,
    generator: Arc<Generator>,
    event_tx: broadcast::Sender<GenerationEvent>,
) -> Result<ServerHandle, std::io::Error> {
    let client_registry = Arc::new(ClientRegistry::new(config.max_send_queue));

    let bridge_handle =
        event_bridge::create_bridge(Arc::clone(&client_registry), event_tx.subscribe());

    let cleanup_handle = client::start_cleanup_task(
        Arc::clone(&client_registry),
        std::time::Duration::from_secs(60),
    );

    let (msg_tx, msg_rx) = mpsc::channel::<(ClientId, String)>(1024);

    let port = config.port;
    let handler_state = Arc::new(HandlerState::new(generator, config));

    let app_state = AppState {
        handler_state: Arc::clone(&handler_state),
        client_registry: Arc::clone(&client_registry),
        message_tx: msg_tx,
    };

    let rpc_handle = tokio::spawn(process_rpc_messages(
        msg_rx,
        handler_state,
        client_registry,
    ));

    let router = build_router(app_state);
    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    tracing::info!(port = local_addr.port(), "Atelier server started");

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        _server: server_handle,
        _bridge: bridge_handle,
        _rpc: rpc_handle,
        _cleanup: cleanup_handle,
    })
}

/// Handle returned by `start()` — dropping it does not stop the tasks.
pub struct ServerHandle {
    pub port: u16,
    _server: tokio::task::JoinHandle<()>,
    _bridge: tokio::task::JoinHandle<()>,
    _rpc: tokio::task::JoinHandle<()>,
    _cleanup: tokio::task::JoinHandle<()>,
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (client_id, rx) = state.client_registry.register();
    tracing::info!(client_id = %client_id, "WebSocket client connected");

    client::handle_ws_connection(
        socket,
        client_id,
        rx,
        state.client_registry,
        state.message_tx,
    )
    .await;
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let resp = handlers::dispatch(
        &state.handler_state,
        "health",
        &serde_json::json!({}),
        None,
    )
    .await;

    let body = resp.result.unwrap_or_default();
    let healthy = body.get("status").and_then(|s| s.as_str()) == Some("healthy");
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, axum::Json(body))
}

async fn image_handler(
    Path(reference): Path<String>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    serve_stored_file(&state, &reference, "image/png")
}

async fn thumbnail_handler(
    Path(reference): Path<String>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    serve_stored_file(&state, &reference, "image/jpeg")
}

fn serve_stored_file(state: &AppState, reference: &str, content_type: &'static str) -> axum::response::Response {
    match state.handler_state.generator.images().read_bytes(reference) {
        Ok(bytes) => (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, content_type),
                (
                    header::CACHE_CONTROL,
                    "public, max-age=31536000, immutable",
                ),
            ],
            bytes,
        )
            .into_response(),
        Err(StoreError::NotFound(_)) => {
            (StatusCode::NOT_FOUND, "Not found").into_response()
        }
        Err(StoreError::InvalidReference(_)) => {
            (StatusCode::BAD_REQUEST, "Invalid reference").into_response()
        }
        Err(e) => {
            tracing::error!(reference, error = %e, "failed to serve image");
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal error").into_response()
        }
    }
}

/// Pump incoming WebSocket messages through the RPC dispatcher.
///
/// Each message is handled on its own task so a long-running generation
/// never stalls unrelated calls; mutual exclusion of generations is the
/// orchestrator's guard, not the message loop.
async fn process_rpc_messages(
    mut rx: mpsc::Receiver<(ClientId, String)>,
    state: Arc<HandlerState>,
    registry: Arc<ClientRegistry>,
) {
    while let Some((client_id, raw_message)) = rx.recv().await {
        let state = Arc::clone(&state);
        let registry = Arc::clone(&registry);
        let _ = tokio::spawn(async move {
            let request: RpcRequest = match serde_json::from_str(&raw_message) {
                Ok(req) => req,
                Err(_) => {
                    let resp = crate::rpc::RpcResponse::parse_error();
                    if let Ok(json) = serde_json::to_string(&resp) {
                        let _ = registry.send_to(&client_id, json);
                    }
                    return;
                }
            };

            let params = request.params.unwrap_or(serde_json::json!({}));
            let response =
                handlers::dispatch(&state, &request.method, &params, request.id).await;

            if let Ok(json) = serde_json::to_string(&response) {
                let _ = registry.send_to(&client_id, json);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    use atelier_store::{ImageStore, SessionStore};
    use atelier_synth::mock::{MockEngine, MockRender};

    struct Fixture {
        generator: Arc<Generator>,
        event_tx: broadcast::Sender<GenerationEvent>,
        dir: PathBuf,
    }

    impl Drop for Fixture {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.dir);
        }
    }

    fn setup(renders: Vec<MockRender>) -> Fixture {
        let dir = std::env::temp_dir().join(format!("atelier-server-test-{}", uuid::Uuid::now_v7()));
        let sessions = SessionStore::open(&dir.join("session.json")).unwrap();
        let images = ImageStore::open(&dir.join("images")).unwrap();
        let (event_tx, _) = broadcast::channel(256);
        let engine = Arc::new(MockEngine::new(renders));
        let generator = Arc::new(Generator::new(
            engine,
            sessions,
            images,
            event_tx.clone(),
        ));
        Fixture {
            generator,
            event_tx,
            dir,
        }
    }

    fn test_config() -> AppConfig {
        AppConfig {
            port: 0, // random port
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn server_starts_and_serves_health() {
        let f = setup(vec![]);
        let handle = start(test_config(), Arc::clone(&f.generator), f.event_tx.clone())
            .await
            .unwrap();
        assert!(handle.port > 0);

        let url = format!("http://127.0.0.1:{}/health", handle.port);
        let resp = reqwest::get(&url).await.unwrap();
        assert_eq!(resp.status(), 200);

        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["busy"], false);
    }

    #[tokio::test]
    async fn missing_image_is_404() {
        let f = setup(vec![]);
        let handle = start(test_config(), Arc::clone(&f.generator), f.event_tx.clone())
            .await
            .unwrap();

        let url = format!("http://127.0.0.1:{}/images/gen_missing.png", handle.port);
        let resp = reqwest::get(&url).await.unwrap();
        assert_eq!(resp.status(), 404);
    }

    #[tokio::test]
    async fn traversal_reference_is_400() {
        let f = setup(vec![]);
        let handle = start(test_config(), Arc::clone(&f.generator), f.event_tx.clone())
            .await
            .unwrap();

        let url = format!(
            "http://127.0.0.1:{}/images/%2E%2E%2Fsession.json",
            handle.port
        );
        let resp = reqwest::get(&url).await.unwrap();
        assert_eq!(resp.status(), 400);
    }

    #[tokio::test]
    async fn generated_image_is_served_with_png_content_type() {
        let f = setup(vec![MockRender::image()]);
        let entry = f
            .generator
            .generate_new("a cat", &atelier_core::config::GenerationConfig::default())
            .await
            .unwrap();

        let handle = start(test_config(), Arc::clone(&f.generator), f.event_tx.clone())
            .await
            .unwrap();

        let url = format!("http://127.0.0.1:{}/images/{}", handle.port, entry.image_ref);
        let resp = reqwest::get(&url).await.unwrap();
        assert_eq!(resp.status(), 200);
        assert_eq!(
            resp.headers().get(header::CONTENT_TYPE).unwrap(),
            "image/png"
        );
        let bytes = resp.bytes().await.unwrap();
        assert!(!bytes.is_empty());
    }

    #[tokio::test]
    async fn build_router_creates_routes() {
        let f = setup(vec![]);
        let handler_state = Arc::new(HandlerState::new(
            Arc::clone(&f.generator),
            AppConfig::default(),
        ));
        let client_registry = Arc::new(ClientRegistry::new(32));
        let (msg_tx, _msg_rx) = mpsc::channel(32);

        let _router = build_router(AppState {
            handler_state,
            client_registry,
            message_tx: msg_tx,
        });
    }
}
