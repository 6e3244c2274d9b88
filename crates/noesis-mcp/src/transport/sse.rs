//! HTTP + server-sent events transport.
//!
//! Responses arrive on a long-lived GET event stream. The stream's first
//! `endpoint` event names the URL that requests are POSTed to.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::StreamExt;
use noesis_core::ServerConfig;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::Url;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{method_not_found_frame, route_inbound, Inbound, PendingRequests, RpcCore};
use crate::error::{McpError, TransportError};
use crate::framing::SseParser;
use crate::protocol::ClientInfo;

/// Transport speaking to a server over HTTP with an SSE back channel.
pub struct SseTransport {
    pub(super) core: RpcCore,
    pub(super) client_info: ClientInfo,
    config: Arc<ServerConfig>,
    http: reqwest::Client,
    endpoint: parking_lot::Mutex<Option<watch::Receiver<Option<Url>>>>,
    alive: Arc<AtomicBool>,
    reader: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl SseTransport {
    pub(super) fn new(core: RpcCore, config: Arc<ServerConfig>, client_info: ClientInfo) -> Self {
        Self {
            core,
            client_info,
            config,
            http: reqwest::Client::new(),
            endpoint: parking_lot::Mutex::new(None),
            alive: Arc::new(AtomicBool::new(false)),
            reader: parking_lot::Mutex::new(None),
        }
    }

    /// URL requests are currently POSTed to.
    pub fn endpoint(&self) -> Option<Url> {
        self.endpoint.lock().as_ref().and_then(|rx| rx.borrow().clone())
    }

    pub(super) async fn open(&self) -> Result<(), McpError> {
        let raw = self
            .config
            .url
            .as_deref()
            .ok_or_else(|| McpError::handshake("sse transport needs a url"))?;
        let base = Url::parse(raw).map_err(|e| McpError::handshake(format!("invalid url '{}': {}", raw, e)))?;
        debug!(server = %self.core.server(), url = %base, "Opening event stream");

        // Only the response head is bounded; the stream itself stays open.
        let deadline = self.core.timeout();
        let opening = self.http.get(base.clone()).header(ACCEPT, "text/event-stream").send();
        let response = tokio::time::timeout(deadline, opening)
            .await
            .map_err(|_| McpError::handshake(format!("event stream did not open within {} ms", deadline.as_millis())))?
            .map_err(|e| TransportError::Http(e.to_string()))?;
        if !response.status().is_success() {
            return Err(TransportError::Http(format!("event stream returned {}", response.status())).into());
        }

        let (endpoint_tx, mut endpoint_rx) = watch::channel(None);
        *self.endpoint.lock() = Some(endpoint_rx.clone());
        self.alive.store(true, Ordering::SeqCst);

        let reader = tokio::spawn(read_events(
            self.core.server().to_string(),
            base,
            response,
            self.http.clone(),
            Arc::clone(self.core.pending()),
            endpoint_tx,
            Arc::clone(&self.alive),
        ));
        if let Some(old) = self.reader.lock().replace(reader) {
            old.abort();
        }

        let announced = tokio::time::timeout(self.core.timeout(), endpoint_rx.wait_for(Option::is_some))
            .await
            .map(|ready| ready.is_ok())
            .unwrap_or(false);
        if !announced {
            self.close().await?;
            return Err(TransportError::MissingEndpoint.into());
        }
        Ok(())
    }

    pub(super) async fn write(&self, frame: &str) -> Result<(), TransportError> {
        if !self.is_live() {
            return Err(TransportError::NotConnected);
        }
        let url = self.endpoint().ok_or(TransportError::MissingEndpoint)?;
        post(&self.http, url, frame, Some(self.core.timeout())).await
    }

    pub(super) async fn close(&self) -> Result<(), TransportError> {
        self.alive.store(false, Ordering::SeqCst);
        self.endpoint.lock().take();
        if let Some(reader) = self.reader.lock().take() {
            reader.abort();
        }
        Ok(())
    }

    pub(super) fn is_live(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }
}

async fn post(
    http: &reqwest::Client,
    url: Url,
    frame: &str,
    timeout: Option<std::time::Duration>,
) -> Result<(), TransportError> {
    let mut request = http
        .post(url.clone())
        .header(CONTENT_TYPE, "application/json")
        .body(frame.to_string());
    if let Some(timeout) = timeout {
        request = request.timeout(timeout);
    }

    let response = request
        .send()
        .await
        .map_err(|e| TransportError::Http(e.to_string()))?;
    if !response.status().is_success() {
        return Err(TransportError::Http(format!("POST {} returned {}", url, response.status())));
    }
    Ok(())
}

async fn read_events(
    server: String,
    base: Url,
    response: reqwest::Response,
    http: reqwest::Client,
    pending: Arc<PendingRequests>,
    endpoint_tx: watch::Sender<Option<Url>>,
    alive: Arc<AtomicBool>,
) {
    let mut parser = SseParser::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                warn!(server = %server, error = %e, "Event stream failed");
                break;
            }
        };

        for event in parser.feed(&chunk) {
            match event.event_type() {
                "endpoint" => match base.join(event.data.trim()) {
                    Ok(url) => {
                        debug!(server = %server, endpoint = %url, "Server announced message endpoint");
                        endpoint_tx.send_replace(Some(url));
                    }
                    Err(e) => warn!(server = %server, error = %e, "Ignoring unusable endpoint event"),
                },
                "message" => {
                    let Inbound::ServerRequest { id, method } = route_inbound(&server, &event.data, &pending) else {
                        continue;
                    };
                    let target = endpoint_tx.borrow().clone();
                    let sent = match (method_not_found_frame(id, &method), target) {
                        (Ok(reply), Some(url)) => post(&http, url, &reply, None).await.map_err(McpError::from),
                        (Ok(_), None) => Err(TransportError::MissingEndpoint.into()),
                        (Err(e), _) => Err(e),
                    };
                    if let Err(e) = sent {
                        warn!(server = %server, method = %method, error = %e, "Could not answer server request");
                    }
                }
                other => debug!(server = %server, event = other, "Ignoring event"),
            }
        }
    }

    alive.store(false, Ordering::SeqCst);
    let failed = pending.fail_all(|| TransportError::ConnectionClosed.into());
    if failed > 0 {
        warn!(server = %server, failed, "Event stream ended with requests in flight");
    }
}
