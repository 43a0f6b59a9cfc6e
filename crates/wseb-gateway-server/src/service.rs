//! Applications served behind emulated sessions.

use std::fmt;
use std::sync::Arc;

use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio_util::codec::{BytesCodec, FramedRead};
use tracing::{debug, info, warn};
use wseb_proto::Message;
use wseb_session::{ConnectionReceiver, ConnectionSender, WsebConnection};

use crate::config::HandlerConfig;

/// Takes ownership of the application side of each new session.
pub trait SessionAcceptor: Send + Sync + fmt::Debug {
    /// Serve `connection` until the session ends. Must not block.
    fn accept(&self, connection: WsebConnection);
}

/// Build the acceptor for a configured handler.
#[must_use]
pub fn build_acceptor(handler: &HandlerConfig) -> Arc<dyn SessionAcceptor> {
    match handler {
        HandlerConfig::Echo => Arc::new(EchoService),
        HandlerConfig::Proxy { connect } => Arc::new(ProxyService::new(connect.clone())),
    }
}

/// Sends every message back to the client unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoService;

impl SessionAcceptor for EchoService {
    fn accept(&self, mut connection: WsebConnection) {
        tokio::spawn(async move {
            while let Some(item) = connection.recv().await {
                match item {
                    Ok(message) => {
                        if connection.send(message).await.is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        debug!(session_id = %connection.id(), error = %err, "Echo session ended");
                        break;
                    }
                }
            }
        });
    }
}

/// Relays each session to its own TCP connection.
///
/// Client messages are written to the socket as raw bytes; socket reads go
/// back to the client as binary messages. Either side ending closes the
/// other.
#[derive(Debug, Clone)]
pub struct ProxyService {
    connect: String,
}

impl ProxyService {
    /// Relay sessions to `connect`.
    #[must_use]
    pub fn new(connect: impl Into<String>) -> Self {
        Self {
            connect: connect.into(),
        }
    }

    /// Backend address.
    #[must_use]
    pub fn connect_addr(&self) -> &str {
        &self.connect
    }
}

impl SessionAcceptor for ProxyService {
    fn accept(&self, connection: WsebConnection) {
        let addr = self.connect.clone();
        tokio::spawn(async move {
            let session_id = connection.id().clone();
            let stream = match TcpStream::connect(&addr).await {
                Ok(stream) => stream,
                Err(e) => {
                    warn!(session_id = %session_id, backend = %addr, error = %e, "Backend connect failed");
                    connection.close();
                    return;
                }
            };
            info!(session_id = %session_id, backend = %addr, "Proxy connected");

            let (sender, receiver) = connection.split();
            let (read_half, write_half) = stream.into_split();
            tokio::select! {
                () = backend_to_client(read_half, &sender) => {}
                () = client_to_backend(receiver, write_half) => {}
            }
            sender.close();
            debug!(session_id = %session_id, "Proxy finished");
        });
    }
}

async fn backend_to_client(read_half: tokio::net::tcp::OwnedReadHalf, sender: &ConnectionSender) {
    let mut frames = FramedRead::new(read_half, BytesCodec::new());
    while let Some(chunk) = frames.next().await {
        let Ok(chunk) = chunk else {
            break;
        };
        if sender.send(Message::Binary(chunk.freeze())).await.is_err() {
            break;
        }
    }
}

async fn client_to_backend(
    mut receiver: ConnectionReceiver,
    mut write_half: tokio::net::tcp::OwnedWriteHalf,
) {
    while let Some(Ok(message)) = receiver.recv().await {
        let written = match &message {
            Message::Text(text) => write_half.write_all(text.as_bytes()).await,
            Message::Binary(bytes) => write_half.write_all(bytes).await,
        };
        if written.is_err() {
            break;
        }
    }
    let _ = write_half.shutdown().await;
}
