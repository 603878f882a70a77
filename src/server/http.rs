//! HTTP server implementation
//!
//! Uses hyper http1 with TokioIo. Routes:
//!
//! - `GET /ws`: WebSocket upgrade into a connection actor
//! - `GET /health`: liveness plus the number of live connections

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use super::client::{serve_client, ConnectionConfig};
use super::hub::HubHandle;
use crate::actions::ActionRegistry;
use crate::config::Args;
use crate::types::{ArchwayError, Result};

/// Shared application state
pub struct AppState {
    pub args: Args,
    pub hub: HubHandle,
    pub registry: Arc<ActionRegistry>,
    pub connection: ConnectionConfig,
}

impl AppState {
    pub fn new(args: Args, hub: HubHandle, registry: ActionRegistry) -> Self {
        let connection = args.connection_config();
        Self {
            args,
            hub,
            registry: Arc::new(registry),
            connection,
        }
    }
}

/// Accept connections until the listener fails
pub async fn run(state: Arc<AppState>) -> Result<()> {
    let listener = TcpListener::bind(state.args.listen).await?;
    serve(listener, state).await
}

/// Serve on an already bound listener
pub async fn serve(listener: TcpListener, state: Arc<AppState>) -> Result<()> {
    info!("Archway listening on {}", listener.local_addr()?);

    if state.args.dev_mode {
        warn!("Development mode enabled - in-memory stores allowed");
    }

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);

                    let service = service_fn(move |req| {
                        let state = Arc::clone(&state);
                        async move { handle_request(state, addr, req).await }
                    });

                    if let Err(err) = http1::Builder::new()
                        .serve_connection(io, service)
                        .with_upgrades()
                        .await
                    {
                        debug!("Error serving connection from {}: {:?}", addr, err);
                    }
                });
            }
            Err(e) => {
                error!("Error accepting connection: {:?}", e);
            }
        }
    }
}

/// Route incoming HTTP requests
async fn handle_request(
    state: Arc<AppState>,
    addr: SocketAddr,
    req: Request<Incoming>,
) -> std::result::Result<Response<Full<Bytes>>, Infallible> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    debug!("[{}] {} {}", addr, method, path);

    let response = match (method, path.as_str()) {
        (Method::GET, "/health") => {
            let connections = state.hub.connection_count().await;
            json_response(
                StatusCode::OK,
                serde_json::json!({ "status": "ok", "connections": connections }),
            )
        }
        (Method::GET, "/ws") => {
            if hyper_tungstenite::is_upgrade_request(&req) {
                handle_upgrade(&state, req)
            } else {
                error_response(&ArchwayError::BadRequest(
                    "WebSocket upgrade required for /ws".to_string(),
                ))
            }
        }
        _ => json_response(
            StatusCode::NOT_FOUND,
            serde_json::json!({ "error": "Not Found", "path": &path }),
        ),
    };
    Ok(response)
}

fn handle_upgrade(state: &AppState, mut req: Request<Incoming>) -> Response<Full<Bytes>> {
    let config = state.connection.websocket_config();
    match hyper_tungstenite::upgrade(&mut req, Some(config)) {
        Ok((response, websocket)) => {
            let hub = state.hub.clone();
            let registry = Arc::clone(&state.registry);
            let connection = state.connection.clone();

            tokio::spawn(async move {
                match websocket.await {
                    Ok(ws) => serve_client(ws, hub, registry, connection).await,
                    Err(e) => warn!("WebSocket handshake failed: {}", e),
                }
            });
            response
        }
        Err(e) => error_response(&ArchwayError::BadRequest(e.to_string())),
    }
}

fn json_response(status: StatusCode, body: serde_json::Value) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body.to_string())));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

fn error_response(err: &ArchwayError) -> Response<Full<Bytes>> {
    json_response(
        err.status_code(),
        serde_json::json!({ "error": err.to_string() }),
    )
}
