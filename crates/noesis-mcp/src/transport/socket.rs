//! WebSocket transport: one JSON-RPC message per text frame.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use noesis_core::ServerConfig;
use tokio::net::TcpStream;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use super::{method_not_found_frame, route_inbound, Inbound, PendingRequests, RpcCore};
use crate::error::{McpError, TransportError};
use crate::protocol::ClientInfo;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = Arc<AsyncMutex<Option<SplitSink<WsStream, Message>>>>;

/// Transport speaking to a server over a WebSocket.
pub struct SocketTransport {
    pub(super) core: RpcCore,
    pub(super) client_info: ClientInfo,
    config: Arc<ServerConfig>,
    sink: WsSink,
    alive: Arc<AtomicBool>,
    reader: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl SocketTransport {
    pub(super) fn new(core: RpcCore, config: Arc<ServerConfig>, client_info: ClientInfo) -> Self {
        Self {
            core,
            client_info,
            config,
            sink: Arc::new(AsyncMutex::new(None)),
            alive: Arc::new(AtomicBool::new(false)),
            reader: parking_lot::Mutex::new(None),
        }
    }

    pub(super) async fn open(&self) -> Result<(), McpError> {
        let url = self
            .config
            .url
            .as_deref()
            .ok_or_else(|| McpError::handshake("socket transport needs a url"))?;
        debug!(server = %self.core.server(), url, "Opening WebSocket");

        let deadline = self.core.timeout();
        let (stream, _response) = tokio::time::timeout(deadline, connect_async(url))
            .await
            .map_err(|_| {
                McpError::handshake(format!("no WebSocket upgrade within {} ms", deadline.as_millis()))
            })?
            .map_err(|e| TransportError::WebSocket(e.to_string()))?;
        let (sink, stream) = stream.split();

        *self.sink.lock().await = Some(sink);
        self.alive.store(true, Ordering::SeqCst);

        let reader = tokio::spawn(read_frames(
            self.core.server().to_string(),
            stream,
            Arc::clone(self.core.pending()),
            Arc::clone(&self.sink),
            Arc::clone(&self.alive),
        ));
        if let Some(old) = self.reader.lock().replace(reader) {
            old.abort();
        }
        Ok(())
    }

    pub(super) async fn write(&self, frame: &str) -> Result<(), TransportError> {
        if !self.is_live() {
            return Err(TransportError::NotConnected);
        }
        send_text(&self.sink, frame).await
    }

    pub(super) async fn close(&self) -> Result<(), TransportError> {
        self.alive.store(false, Ordering::SeqCst);

        let sink = self.sink.lock().await.take();
        let result = match sink {
            Some(mut sink) => {
                // A peer that already hung up makes the close frame fail.
                if let Err(e) = sink.send(Message::Close(None)).await {
                    debug!(server = %self.core.server(), error = %e, "Close frame not delivered");
                }
                sink.close()
                    .await
                    .map_err(|e| TransportError::WebSocket(e.to_string()))
            }
            None => Ok(()),
        };

        if let Some(reader) = self.reader.lock().take() {
            reader.abort();
        }
        result.or_else(|e| {
            debug!(server = %self.core.server(), error = %e, "WebSocket close");
            Ok(())
        })
    }

    pub(super) fn is_live(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }
}

async fn send_text(sink: &AsyncMutex<Option<SplitSink<WsStream, Message>>>, frame: &str) -> Result<(), TransportError> {
    let mut guard = sink.lock().await;
    let sink = guard.as_mut().ok_or(TransportError::NotConnected)?;
    sink.send(Message::Text(frame.to_string()))
        .await
        .map_err(|e| TransportError::WebSocket(e.to_string()))
}

async fn read_frames(
    server: String,
    mut stream: SplitStream<WsStream>,
    pending: Arc<PendingRequests>,
    sink: WsSink,
    alive: Arc<AtomicBool>,
) {
    while let Some(frame) = stream.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                Ok(text) => text,
                Err(_) => {
                    debug!(server = %server, "Ignoring non-UTF-8 binary frame");
                    continue;
                }
            },
            Ok(Message::Close(frame)) => {
                debug!(server = %server, ?frame, "WebSocket closed by server");
                break;
            }
            Ok(_) => continue,
            Err(e) => {
                warn!(server = %server, error = %e, "WebSocket read failed");
                break;
            }
        };

        // Some servers batch several newline-delimited messages per frame.
        for line in text.lines().filter(|l| !l.trim().is_empty()) {
            if let Inbound::ServerRequest { id, method } = route_inbound(&server, line, &pending) {
                let sent = match method_not_found_frame(id, &method) {
                    Ok(reply) => send_text(&sink, &reply).await.map_err(McpError::from),
                    Err(e) => Err(e),
                };
                if let Err(e) = sent {
                    warn!(server = %server, method = %method, error = %e, "Could not answer server request");
                }
            }
        }
    }

    alive.store(false, Ordering::SeqCst);
    let failed = pending.fail_all(|| TransportError::ConnectionClosed.into());
    if failed > 0 {
        warn!(server = %server, failed, "WebSocket closed with requests in flight");
    }
}
