//! Throwaway HTTP servers for exercising the clients in tests.

use std::io::{Cursor, Read};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::JoinHandle;
use tiny_http::{Header, Response, Server};

/// A request as seen by a [`TestServer`] handler.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: String,
    pub url: String,
    pub body: String,
    pub headers: Vec<(String, String)>,
}

impl Recorded {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// What a handler sends back.
#[derive(Debug, Clone)]
pub struct Reply {
    pub status: u16,
    pub body: String,
    pub headers: Vec<(String, String)>,
}

impl Reply {
    pub fn status(status: u16) -> Self {
        Self {
            status,
            body: String::new(),
            headers: Vec::new(),
        }
    }

    pub fn json(value: &serde_json::Value) -> Self {
        Self::status(200)
            .with_body(value.to_string())
            .with_header("Content-Type", "application/json")
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }
}

/// HTTP server on an ephemeral localhost port. Stops when dropped.
pub struct TestServer {
    server: Arc<Server>,
    hits: Arc<AtomicUsize>,
    handle: Option<JoinHandle<()>>,
    pub base_url: String,
}

impl TestServer {
    pub fn start<F>(handler: F) -> Self
    where
        F: Fn(&Recorded) -> Reply + Send + 'static,
    {
        let server = Arc::new(Server::http("127.0.0.1:0").expect("bind test server"));
        let addr = server
            .server_addr()
            .to_ip()
            .expect("test server has an IP address");
        let hits = Arc::new(AtomicUsize::new(0));

        let handle = {
            let server = Arc::clone(&server);
            let hits = Arc::clone(&hits);
            std::thread::spawn(move || {
                for mut request in server.incoming_requests() {
                    hits.fetch_add(1, Ordering::SeqCst);
                    let mut body = String::new();
                    let _ = request.as_reader().read_to_string(&mut body);
                    let recorded = Recorded {
                        method: request.method().to_string(),
                        url: request.url().to_string(),
                        body,
                        headers: request
                            .headers()
                            .iter()
                            .map(|h| (h.field.to_string(), h.value.to_string()))
                            .collect(),
                    };
                    let reply = handler(&recorded);
                    let headers = reply
                        .headers
                        .iter()
                        .filter_map(|(name, value)| {
                            Header::from_bytes(name.as_bytes(), value.as_bytes()).ok()
                        })
                        .collect();
                    let length = reply.body.len();
                    // Built by hand so no default Content-Type shadows ours.
                    let response = Response::new(
                        reply.status.into(),
                        headers,
                        Cursor::new(reply.body.into_bytes()),
                        Some(length),
                        None,
                    );
                    let _ = request.respond(response);
                }
            })
        };

        Self {
            server,
            hits,
            handle: Some(handle),
            base_url: format!("http://{addr}"),
        }
    }

    /// Number of requests received so far.
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.server.unblock();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// A localhost URL that refuses connections.
pub fn dead_url() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind free port");
    let addr = listener.local_addr().expect("local addr");
    drop(listener);
    format!("http://{addr}")
}
