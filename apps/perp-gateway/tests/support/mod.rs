//! In-memory venue peer.
//!
//! [`DuplexDialer`] resolves every dial to a `tokio::io::duplex` pipe with
//! a WebSocket on each end. The server end of each dial is handed to the
//! test through [`MockVenue::accept`].

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use perp_gateway::infrastructure::websocket::{
    ConnectionError, DialRequest, Dialer, FrameSink, FrameStream,
};
use serde_json::Value;
use tokio::io::DuplexStream;
use tokio::sync::{Mutex, mpsc};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::Role;

/// How long a test waits for any single expected event.
pub const WAIT: Duration = Duration::from_secs(2);

/// Server end of one dialed socket.
pub type ServerSocket = WebSocketStream<DuplexStream>;

/// Dialer backed by in-memory pipes.
#[derive(Debug)]
pub struct DuplexDialer {
    accepted: mpsc::UnboundedSender<ServerSocket>,
    dials: AtomicUsize,
}

/// Test side of a [`DuplexDialer`].
#[derive(Debug)]
pub struct MockVenue {
    accepted: Mutex<mpsc::UnboundedReceiver<ServerSocket>>,
}

impl DuplexDialer {
    /// Dialer plus the venue that receives its sockets.
    pub fn pair() -> (Arc<Self>, MockVenue) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                accepted: tx,
                dials: AtomicUsize::new(0),
            }),
            MockVenue {
                accepted: Mutex::new(rx),
            },
        )
    }

    /// Successful dials so far.
    pub fn dials(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Dialer for DuplexDialer {
    async fn dial(&self, _request: DialRequest) -> Result<(FrameSink, FrameStream), ConnectionError> {
        let (client_io, server_io) = tokio::io::duplex(1 << 20);
        let (client, server) = tokio::join!(
            WebSocketStream::from_raw_socket(client_io, Role::Client, None),
            WebSocketStream::from_raw_socket(server_io, Role::Server, None),
        );
        self.accepted
            .send(server)
            .map_err(|_| ConnectionError::Dial("mock venue gone".into()))?;
        self.dials.fetch_add(1, Ordering::SeqCst);
        let (sink, stream) = client.split();
        Ok((Box::pin(sink), Box::pin(stream)))
    }
}

impl MockVenue {
    /// Next socket dialed by the gateway.
    pub async fn accept(&self) -> ServerSocket {
        tokio::time::timeout(WAIT, self.accepted.lock().await.recv())
            .await
            .expect("no dial within deadline")
            .expect("dialer dropped")
    }
}

/// Send a JSON text frame to the gateway.
pub async fn push(socket: &mut ServerSocket, frame: &Value) {
    socket
        .send(Message::text(frame.to_string()))
        .await
        .expect("push frame");
}

/// Next frame of any kind from the gateway.
pub async fn next_message(socket: &mut ServerSocket) -> Message {
    tokio::time::timeout(WAIT, socket.next())
        .await
        .expect("no frame within deadline")
        .expect("socket ended")
        .expect("read frame")
}

/// Next JSON text frame from the gateway, skipping control frames.
pub async fn next_json(socket: &mut ServerSocket) -> Value {
    loop {
        if let Message::Text(text) = next_message(socket).await {
            return serde_json::from_str(text.as_str()).expect("gateway sent invalid JSON");
        }
    }
}

/// Await `future` with the shared deadline.
pub async fn within<F: std::future::Future>(future: F) -> F::Output {
    tokio::time::timeout(WAIT, future)
        .await
        .expect("deadline exceeded")
}
