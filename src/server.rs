//! HTTP front door: prompt intake, OAuth callback and liveness.
//!
//! tiny_http accepts on a blocking thread; each request is routed on the
//! tokio runtime so slow agent calls never stall the accept loop.

use crate::error::Error;
use crate::orchestrator::{AuthorizationOutcome, Orchestrator};
use crate::registry::RegistryError;
use serde::Deserialize;
use std::collections::HashMap;
use std::io::{Cursor, Read};
use std::net::SocketAddr;
use std::sync::Arc;
use tiny_http::{Header, Method, Request, Response, Server};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};
use url::Url;
use uuid::Uuid;

/// Largest request body accepted on `POST /requests`.
const MAX_BODY_BYTES: u64 = 64 * 1024;

#[derive(Debug, Deserialize)]
struct PromptRequest {
    user_id: String,
    prompt: String,
}

/// A rendered response, independent of the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Reply {
    status: u16,
    content_type: &'static str,
    body: String,
}

impl Reply {
    fn json(status: u16, value: &serde_json::Value) -> Self {
        Self {
            status,
            content_type: "application/json",
            body: value.to_string(),
        }
    }

    fn html(status: u16, body: String) -> Self {
        Self {
            status,
            content_type: "text/html; charset=utf-8",
            body,
        }
    }

    fn error(status: u16, message: impl std::fmt::Display) -> Self {
        Self::json(status, &serde_json::json!({ "error": message.to_string() }))
    }

    fn into_response(self) -> Response<Cursor<Vec<u8>>> {
        let length = self.body.len();
        let headers = Header::from_bytes(&b"Content-Type"[..], self.content_type.as_bytes())
            .into_iter()
            .collect();
        Response::new(
            self.status.into(),
            headers,
            Cursor::new(self.body.into_bytes()),
            Some(length),
            None,
        )
    }
}

pub struct GateServer {
    server: Arc<Server>,
    orchestrator: Arc<Orchestrator>,
}

impl GateServer {
    pub fn bind(addr: &str, orchestrator: Arc<Orchestrator>) -> Result<Self, Error> {
        let server = Server::http(addr).map_err(|e| Error::Io(std::io::Error::other(e)))?;
        Ok(Self {
            server: Arc::new(server),
            orchestrator,
        })
    }

    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.server.server_addr().to_ip()
    }

    /// Serve until `shutdown` fires.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), Error> {
        if let Some(addr) = self.local_addr() {
            info!(%addr, "Listening");
        }

        let runtime = Handle::current();
        let server = Arc::clone(&self.server);
        let orchestrator = Arc::clone(&self.orchestrator);
        let accept =
            tokio::task::spawn_blocking(move || accept_loop(&server, &orchestrator, &runtime));

        shutdown.cancelled().await;
        info!("Shutting down");
        self.server.unblock();
        accept.await.map_err(|e| Error::Io(std::io::Error::other(e)))
    }
}

fn accept_loop(server: &Server, orchestrator: &Arc<Orchestrator>, runtime: &Handle) {
    for mut request in server.incoming_requests() {
        let method = request.method().clone();
        let url = request.url().to_string();
        let body = if method == Method::Post {
            match read_body(&mut request) {
                Ok(body) => body,
                Err(reply) => {
                    warn!(%url, status = reply.status, "Rejected request body");
                    respond(request, reply);
                    continue;
                }
            }
        } else {
            String::new()
        };

        let orchestrator = Arc::clone(orchestrator);
        let span = info_span!("request", id = %Uuid::new_v4());
        runtime.spawn(
            async move {
                let reply = route(&orchestrator, &method, &url, &body).await;
                debug!(%method, %url, status = reply.status, "Handled request");
                let _ = tokio::task::spawn_blocking(move || respond(request, reply)).await;
            }
            .instrument(span),
        );
    }
}

/// Read at most [`MAX_BODY_BYTES`]; anything larger is rejected, not cut short.
fn read_body(request: &mut Request) -> Result<String, Reply> {
    let too_large = || Reply::error(413, format!("Request body exceeds {MAX_BODY_BYTES} bytes"));
    if request
        .body_length()
        .is_some_and(|len| len as u64 > MAX_BODY_BYTES)
    {
        return Err(too_large());
    }

    let mut body = String::new();
    request
        .as_reader()
        .take(MAX_BODY_BYTES + 1)
        .read_to_string(&mut body)
        .map_err(|e| Reply::error(400, format!("Unreadable request body: {e}")))?;
    if body.len() as u64 > MAX_BODY_BYTES {
        return Err(too_large());
    }
    Ok(body)
}

fn respond(request: Request, reply: Reply) {
    if let Err(e) = request.respond(reply.into_response()) {
        debug!("Failed to write response: {e}");
    }
}

async fn route(orchestrator: &Orchestrator, method: &Method, url: &str, body: &str) -> Reply {
    let path = url.split('?').next().unwrap_or_default();
    match (method, path) {
        (Method::Get, "/health") => Reply::json(200, &serde_json::json!({ "status": "ok" })),
        (Method::Get, "/oauth/callback") => oauth_callback(orchestrator, url).await,
        (Method::Post, "/requests") => prompt(orchestrator, body).await,
        (_, "/health" | "/oauth/callback" | "/requests") => Reply::error(405, "Method not allowed"),
        _ => Reply::error(404, "Not found"),
    }
}

async fn prompt(orchestrator: &Orchestrator, body: &str) -> Reply {
    let request: PromptRequest = match serde_json::from_str(body) {
        Ok(request) => request,
        Err(e) => return Reply::error(400, format!("Invalid request: {e}")),
    };
    if request.user_id.trim().is_empty() {
        return Reply::error(400, "user_id must not be empty");
    }

    match orchestrator
        .handle_request(&request.user_id, &request.prompt)
        .await
    {
        Ok(outcome) => match serde_json::to_value(&outcome) {
            Ok(value) => Reply::json(200, &value),
            Err(e) => Reply::error(500, e),
        },
        Err(e) => {
            warn!(user_id = %request.user_id, "Request failed: {e}");
            Reply::error(error_status(&e), e)
        }
    }
}

async fn oauth_callback(orchestrator: &Orchestrator, url: &str) -> Reply {
    let Some(user_id) = query_param(url, "user_id").filter(|id| !id.is_empty()) else {
        return Reply::html(400, failure_page("Missing user_id parameter"));
    };

    match orchestrator.complete_authorization(&user_id).await {
        Ok(AuthorizationOutcome::Ready { .. }) => Reply::html(
            200,
            success_page("Your Gmail account is connected. You can close this tab."),
        ),
        Ok(AuthorizationOutcome::PendingReadiness) => Reply::html(
            200,
            success_page(
                "Your Gmail account is connected. The mail server is still starting, \
                 so the first request may take a moment.",
            ),
        ),
        Err(e) => {
            warn!(%user_id, "Authorization callback failed: {e}");
            Reply::html(error_status(&e), failure_page(&e.to_string()))
        }
    }
}

fn error_status(error: &Error) -> u16 {
    match error {
        Error::Registry(RegistryError::NotFound(_)) => 404,
        Error::Registry(RegistryError::Provisioning { .. }) | Error::Agent(_) => 502,
        _ => 500,
    }
}

fn query_param(url: &str, name: &str) -> Option<String> {
    let parsed = Url::parse(&format!("http://localhost{url}")).ok()?;
    let params: HashMap<_, _> = parsed.query_pairs().collect();
    params.get(name).map(ToString::to_string)
}

fn success_page(message: &str) -> String {
    format!(
        r"<!DOCTYPE html>
<html>
<head>
    <title>Gmail Connected</title>
    <style>
        body {{ font-family: system-ui, sans-serif; text-align: center; padding: 50px; }}
        h1 {{ color: #22c55e; }}
    </style>
</head>
<body>
    <h1>Gmail Connected</h1>
    <p>{}</p>
</body>
</html>",
        html_escape(message)
    )
}

fn failure_page(error: &str) -> String {
    format!(
        r"<!DOCTYPE html>
<html>
<head>
    <title>Authorization Failed</title>
    <style>
        body {{ font-family: system-ui, sans-serif; text-align: center; padding: 50px; }}
        h1 {{ color: #ef4444; }}
    </style>
</head>
<body>
    <h1>Authorization Failed</h1>
    <p>{}</p>
    <p>Please try again.</p>
</body>
</html>",
        html_escape(error)
    )
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
