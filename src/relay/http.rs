//! Lobby HTTP surface.
//!
//! | Method | Path | Response |
//! |--------|------|----------|
//! | `GET` | `/rooms` | `[RoomInfo]` |
//! | `GET` | `/clients` | `[ClientInfo]` |
//! | `GET` | `/clients/get-username?wsid=ID` | `{"wsid", "username"}` |
//! | `POST` | `/set-username` | body `{"wsid", "username"}` |
//!
//! Served by `tiny_http` on its own thread so lobby polling never touches
//! the async runtime.

// ============================================================================
// Imports
// ============================================================================

use std::io::Read;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tiny_http::{Header, Method, Request, Response, Server};
use tracing::{debug, info, warn};
use url::form_urlencoded;

use crate::error::{Error, Result};
use crate::identifiers::SocketId;

use super::registry::SessionRegistry;

// ============================================================================
// Constants
// ============================================================================

/// How often the serving thread checks the shutdown flag.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Largest accepted request body.
const MAX_BODY: u64 = 16 * 1024;

// ============================================================================
// Bodies
// ============================================================================

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
struct Username {
    wsid: SocketId,
    username: String,
}

#[derive(Debug, Serialize)]
struct Failure<'a> {
    error: &'a str,
}

/// Status code and JSON body.
type Reply = (u16, String);

fn json<T: Serialize>(status: u16, value: &T) -> Reply {
    match serde_json::to_string(value) {
        Ok(body) => (status, body),
        Err(e) => {
            warn!(error = %e, "Failed to serialize lobby response");
            (500, r#"{"error":"serialization failed"}"#.to_string())
        }
    }
}

fn failure(status: u16, error: &str) -> Reply {
    json(status, &Failure { error })
}

// ============================================================================
// Routing
// ============================================================================

/// Answers one lobby request.
fn dispatch(
    method: &Method,
    url: &str,
    body: &str,
    registry: &RwLock<SessionRegistry>,
    now: Instant,
) -> Reply {
    let (path, query) = url.split_once('?').unwrap_or((url, ""));

    match (method, path) {
        (Method::Get, "/rooms") => json(200, &registry.read().rooms(now)),

        (Method::Get, "/clients") => json(200, &registry.read().clients(now)),

        (Method::Get, "/clients/get-username") => {
            let Some(wsid) = form_urlencoded::parse(query.as_bytes())
                .find(|(key, _)| key == "wsid")
                .map(|(_, value)| SocketId::new(value.into_owned()))
            else {
                return failure(400, "missing wsid");
            };

            match registry.read().client(&wsid, now) {
                Some(info) => json(
                    200,
                    &Username {
                        wsid,
                        username: info.username,
                    },
                ),
                None => failure(404, "unknown wsid"),
            }
        }

        (Method::Post, "/set-username") => {
            let Ok(request) = serde_json::from_str::<Username>(body) else {
                return failure(400, "expected {\"wsid\", \"username\"}");
            };

            match registry.write().rename(&request.wsid, request.username.clone()) {
                Ok(()) => json(200, &request),
                Err(_) => failure(404, "unknown wsid"),
            }
        }

        _ => failure(404, "not found"),
    }
}

// ============================================================================
// LobbyServer
// ============================================================================

/// Background HTTP server exposing lobby state.
pub struct LobbyServer {
    addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl LobbyServer {
    /// Binds the lobby and starts serving on a background thread.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`] if the address cannot be bound.
    pub fn start(addr: SocketAddr, registry: Arc<RwLock<SessionRegistry>>) -> Result<Self> {
        let server = Server::http(addr)
            .map_err(|e| Error::connection(format!("failed to bind lobby on {addr}: {e}")))?;
        let addr = server.server_addr().to_ip().unwrap_or(addr);

        let shutdown = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&shutdown);

        let handle = thread::Builder::new()
            .name("fmsocket-lobby".into())
            .spawn(move || serve(server, registry, flag))?;

        info!(%addr, "Lobby HTTP server started");

        Ok(Self {
            addr,
            shutdown,
            handle: Some(handle),
        })
    }

    /// Address the lobby is bound to.
    #[inline]
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stops serving and joins the thread.
    pub fn shutdown(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            warn!("Lobby thread panicked");
        }
        debug!("Lobby HTTP server stopped");
    }
}

impl Drop for LobbyServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn serve(server: Server, registry: Arc<RwLock<SessionRegistry>>, shutdown: Arc<AtomicBool>) {
    while !shutdown.load(Ordering::SeqCst) {
        match server.recv_timeout(POLL_INTERVAL) {
            Ok(Some(request)) => handle(request, &registry),
            Ok(None) => {}
            Err(e) => {
                warn!(error = %e, "Lobby receive failed");
                break;
            }
        }
    }
}

fn handle(mut request: Request, registry: &RwLock<SessionRegistry>) {
    let mut body = String::new();
    if *request.method() == Method::Post
        && let Err(e) = request.as_reader().take(MAX_BODY).read_to_string(&mut body)
    {
        debug!(error = %e, "Unreadable lobby request body");
    }

    let (status, payload) = dispatch(request.method(), request.url(), &body, registry, Instant::now());
    debug!(method = %request.method(), url = request.url(), status, "Lobby request");

    let mut response = Response::from_string(payload).with_status_code(status);
    if let Ok(header) = Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..]) {
        response.add_header(header);
    }

    if let Err(e) = request.respond(response) {
        debug!(error = %e, "Failed to send lobby response");
    }
}

// ============================================================================
// Tests
// ============================================================================
