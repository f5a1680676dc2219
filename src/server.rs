//! Thin HTTP listener feeding the ingestion coordinator or the mock engine

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error, info, warn};

use crate::config::{Mode, ServerConfig};
use crate::dispatch::DispatchPool;
use crate::event::{parse_query, Event};
use crate::forward::{ForwardEngine, RetryPolicy};
use crate::ingest::IngestCoordinator;
use crate::mock::{MockEngine, CONTROL_PREFIX};
use crate::storage::EventLogWriter;
use crate::{HooksinkError, Result};

/// Request handling state for the active mode
#[derive(Clone)]
enum App {
    Listen {
        coordinator: Arc<IngestCoordinator>,
        pool: DispatchPool,
    },
    Mock {
        engine: Arc<MockEngine>,
    },
}

/// HTTP server hosting exactly one of the two operating modes
pub struct Server {
    config: Arc<ServerConfig>,
    app: App,
    shutdown_tx: broadcast::Sender<()>,
}

impl Server {
    /// Validate the configuration and assemble the mode's components
    ///
    /// # Errors
    ///
    /// Returns error if the configuration, mock spec, or save path is invalid
    pub fn build(config: ServerConfig) -> Result<Self> {
        config.validate()?;
        let (shutdown_tx, _) = broadcast::channel(1);

        let app = match config.mode {
            Mode::Listen => {
                let pool = DispatchPool::new(&config.limits);

                let forwarder = config.forward.as_ref().map(|forward| {
                    ForwardEngine::new(
                        pool.clone(),
                        forward.target_url.clone(),
                        RetryPolicy::from(forward),
                    )
                });

                let writer = match config.save_path {
                    Some(ref path) => Some(EventLogWriter::open(path)?),
                    None => None,
                };

                let coordinator = Arc::new(IngestCoordinator::new(
                    writer,
                    forwarder,
                    config.pretty,
                    config.quiet,
                    config.exit_after,
                    shutdown_tx.clone(),
                ));

                App::Listen { coordinator, pool }
            }
            Mode::Mock => {
                let spec_path = config.mock_spec.as_ref().ok_or_else(|| {
                    HooksinkError::Config("mock mode requires a spec file".to_string())
                })?;

                App::Mock {
                    engine: Arc::new(MockEngine::from_file(spec_path)?),
                }
            }
        };

        Ok(Self {
            config: Arc::new(config),
            app,
            shutdown_tx,
        })
    }

    /// Handle for triggering a graceful shutdown externally
    #[must_use]
    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// Bind the configured address and serve until shutdown
    ///
    /// # Errors
    ///
    /// Returns error if the address cannot be bound
    pub async fn run(self) -> Result<()> {
        let listener =
            TcpListener::bind((self.config.host.as_str(), self.config.port)).await?;
        self.serve(listener).await
    }

    /// Serve connections from an already-bound listener until SIGINT or a
    /// shutdown signal, then drain outbound work within the grace period
    ///
    /// # Errors
    ///
    /// Returns error if the listener address cannot be read
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        let addr = listener.local_addr()?;
        match self.app {
            App::Listen { .. } => info!("Listening on http://{addr}"),
            App::Mock { ref engine } => info!(
                "Mock server on http://{addr} ({} route(s) configured)",
                engine.route_count()
            ),
        }

        let conn_slots = Arc::new(Semaphore::new(self.config.limits.max_inbound_connections));
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            let Ok(permit) = Arc::clone(&conn_slots).try_acquire_owned() else {
                                warn!("Connection limit reached, rejecting {peer_addr}");
                                drop(stream);
                                continue;
                            };
                            self.spawn_connection(stream, peer_addr, permit);
                        }
                        Err(e) => error!("Accept error: {e}"),
                    }
                }
                _ = &mut ctrl_c => {
                    info!("Received SIGINT, shutting down");
                    break;
                }
                _ = shutdown_rx.recv() => {
                    info!("Received shutdown signal");
                    break;
                }
            }
        }

        drop(listener);

        if let App::Listen { ref pool, .. } = self.app {
            let cancelled = pool.drain(self.config.limits.drain_grace()).await;
            if cancelled > 0 {
                warn!("{cancelled} outbound dispatch(es) cancelled at shutdown");
            }
        }

        info!("Shutdown complete");
        Ok(())
    }

    fn spawn_connection(
        &self,
        stream: TcpStream,
        peer_addr: SocketAddr,
        permit: OwnedSemaphorePermit,
    ) {
        let app = self.app.clone();
        let max_body = self.config.limits.max_request_size;

        tokio::spawn(async move {
            let _permit = permit;
            let service = service_fn(move |req: Request<Incoming>| {
                let app = app.clone();
                async move {
                    Ok::<_, Infallible>(handle_request(&app, req, peer_addr, max_body).await)
                }
            });

            if let Err(e) = hyper::server::conn::http1::Builder::new()
                .serve_connection(TokioIo::new(stream), service)
                .await
            {
                debug!("Connection error from {peer_addr}: {e}");
            }
        });
    }
}

async fn handle_request(
    app: &App,
    req: Request<Incoming>,
    peer: SocketAddr,
    max_body: usize,
) -> Response<Full<Bytes>> {
    match app {
        App::Listen { coordinator, .. } => handle_listen(coordinator, req, peer, max_body).await,
        App::Mock { engine } => handle_mock(engine, req).await,
    }
}

/// Listen mode: catch-all capture plus the `/health` probe
async fn handle_listen(
    coordinator: &IngestCoordinator,
    req: Request<Incoming>,
    peer: SocketAddr,
    max_body: usize,
) -> Response<Full<Bytes>> {
    if req.method() == Method::GET && req.uri().path() == "/health" {
        return json_response(
            StatusCode::OK,
            &serde_json::json!({
                "status": "healthy",
                "version": env!("CARGO_PKG_VERSION"),
                "events_received": coordinator.events_seen(),
            }),
        );
    }

    let (parts, body) = req.into_parts();
    let body = match read_body(body, max_body).await {
        Ok(bytes) => bytes,
        Err(response) => return response,
    };

    let event = Event::from_parts(
        parts.method.as_str(),
        parts.uri.path(),
        header_pairs(&parts.headers),
        parse_query(parts.uri.query()),
        &body,
        &peer.ip().to_string(),
    );

    coordinator.ingest(event);

    json_response(StatusCode::OK, &serde_json::json!({"status": "received"}))
}

/// Mock mode: control endpoints plus the scripted catch-all
async fn handle_mock(engine: &MockEngine, req: Request<Incoming>) -> Response<Full<Bytes>> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    if path.starts_with(CONTROL_PREFIX) {
        return handle_mock_control(engine, &method, &path);
    }

    let scripted = engine.respond(&path, method.as_str());

    // Delay is scoped to this connection's task only
    if !scripted.delay.is_zero() {
        tokio::time::sleep(scripted.delay).await;
    }

    let status = StatusCode::from_u16(scripted.status).unwrap_or(StatusCode::OK);
    json_response(status, &scripted.body)
}

fn handle_mock_control(
    engine: &MockEngine,
    method: &Method,
    path: &str,
) -> Response<Full<Bytes>> {
    let endpoint = path.trim_start_matches(CONTROL_PREFIX);

    match (method, endpoint) {
        (&Method::GET, "stats") => json_response(StatusCode::OK, &engine.stats()),
        (&Method::POST, "reset") => {
            engine.reset();
            json_response(
                StatusCode::OK,
                &serde_json::json!({"status": "reset", "message": "call counts cleared"}),
            )
        }
        (&Method::GET, "health") => json_response(
            StatusCode::OK,
            &serde_json::json!({
                "status": "healthy",
                "version": env!("CARGO_PKG_VERSION"),
                "routes_configured": engine.route_count(),
            }),
        ),
        _ => json_response(
            StatusCode::NOT_FOUND,
            &serde_json::json!({"error": "unknown control endpoint"}),
        ),
    }
}

fn header_pairs(headers: &hyper::HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(name, value)| {
            (
                name.to_string(),
                value.to_str().unwrap_or("<invalid>").to_string(),
            )
        })
        .collect()
}

async fn read_body(
    body: Incoming,
    max_size: usize,
) -> std::result::Result<Bytes, Response<Full<Bytes>>> {
    let collected = body.collect().await.map_err(|e| {
        json_response(
            StatusCode::BAD_REQUEST,
            &serde_json::json!({"error": format!("failed to read body: {e}")}),
        )
    })?;

    let bytes = collected.to_bytes();
    if bytes.len() > max_size {
        return Err(json_response(
            StatusCode::PAYLOAD_TOO_LARGE,
            &serde_json::json!({
                "error": format!("body of {} bytes exceeds limit of {max_size}", bytes.len())
            }),
        ));
    }

    Ok(bytes)
}

fn json_response<T: serde::Serialize>(status: StatusCode, body: &T) -> Response<Full<Bytes>> {
    let payload = serde_json::to_vec(body).expect("JSON response serialization cannot fail");

    Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .body(Full::new(Bytes::from(payload)))
        .expect("Failed to build response")
}
