use crate::batcher::AudioUplink;
use crate::messages::Handshake;
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use rxbridge_core::{ClientSessionId, ConnectError, ReadError, SendError, SessionConfig};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Upper bound on flushing a close frame to a backend that stopped reading.
const CLOSE_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// One live websocket to the backend. Never mutated after publication: a
/// reconnect builds a fresh one and swaps it in.
///
/// `close` flips `closed` before touching the writer, which aborts any send
/// or read parked on the socket and releases its half.
pub struct BackendConnection {
    writer: AsyncMutex<SplitSink<WsStream, Message>>,
    reader: AsyncMutex<SplitStream<WsStream>>,
    closed: watch::Sender<bool>,
}

impl BackendConnection {
    fn new(ws: WsStream) -> Self {
        let (writer, reader) = ws.split();
        Self {
            writer: AsyncMutex::new(writer),
            reader: AsyncMutex::new(reader),
            closed: watch::channel(false).0,
        }
    }

    pub async fn send(&self, message: Message) -> Result<(), SendError> {
        let mut closed = self.closed.subscribe();
        if *closed.borrow() {
            return Err(SendError::Closed);
        }
        tokio::select! {
            biased;
            _ = closed.changed() => Err(SendError::Closed),
            sent = async { self.writer.lock().await.send(message).await } => {
                sent.map_err(|e| SendError::Transport(e.to_string()))
            }
        }
    }

    pub async fn next_message(&self) -> Result<Message, ReadError> {
        let mut closed = self.closed.subscribe();
        if *closed.borrow() {
            return Err(ReadError::Closed);
        }
        let next = tokio::select! {
            biased;
            _ = closed.changed() => return Err(ReadError::Closed),
            next = async { self.reader.lock().await.next().await } => next,
        };
        match next {
            Some(Ok(message)) => Ok(message),
            Some(Err(e)) => Err(ReadError::Transport(e.to_string())),
            None => Err(ReadError::Closed),
        }
    }

    pub async fn close(&self) {
        self.closed.send_replace(true);
        let graceful = async { self.writer.lock().await.close().await };
        match tokio::time::timeout(CLOSE_GRACE, graceful).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::debug!("closing backend connection: {e}"),
            Err(_) => tracing::debug!("backend not reading, dropping connection without close frame"),
        }
    }
}

/// Sole owner of the backend connection for one bridge.
///
/// The slot lock is only held to clone or swap the `Arc`; all network I/O
/// happens on the cloned handle after the lock is released.
pub struct BackendConnector {
    session_id: ClientSessionId,
    config: SessionConfig,
    slot: Mutex<Option<Arc<BackendConnection>>>,
    state: Mutex<ConnectionState>,
}

impl BackendConnector {
    pub fn new(session_id: ClientSessionId, config: SessionConfig) -> Self {
        Self {
            session_id,
            config,
            slot: Mutex::new(None),
            state: Mutex::new(ConnectionState::Disconnected),
        }
    }

    pub fn session_id(&self) -> &ClientSessionId {
        &self.session_id
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    fn slot(&self) -> MutexGuard<'_, Option<Arc<BackendConnection>>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Clone of the live handle, if any.
    pub fn current(&self) -> Option<Arc<BackendConnection>> {
        self.slot().clone()
    }

    /// Dial the backend, send the handshake and publish the new handle.
    pub async fn connect(&self) -> Result<(), ConnectError> {
        self.set_state(ConnectionState::Connecting);
        match self.dial().await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.set_state(ConnectionState::Disconnected);
                Err(e)
            }
        }
    }

    /// Drop the stale handle and dial again. Called from the receive path
    /// only.
    pub async fn reconnect(&self) -> Result<(), ConnectError> {
        self.set_state(ConnectionState::Reconnecting);
        let stale = self.slot().take();
        if let Some(stale) = stale {
            stale.close().await;
        }
        self.dial().await
    }

    pub async fn close(&self) {
        let stale = self.slot().take();
        self.set_state(ConnectionState::Disconnected);
        if let Some(stale) = stale {
            stale.close().await;
            tracing::debug!(session_id = %self.session_id, "backend connection closed");
        }
    }

    async fn dial(&self) -> Result<(), ConnectError> {
        let url = self.config.backend_url.as_str();
        let timeout = self.config.handshake_timeout;

        let ws = tokio::time::timeout(timeout, self.open(url))
            .await
            .map_err(|_| ConnectError::Timeout {
                url: url.to_string(),
                timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            })??;

        let connection = Arc::new(BackendConnection::new(ws));

        let replaced = self.slot().replace(connection);
        self.set_state(ConnectionState::Connected);
        if let Some(replaced) = replaced {
            replaced.close().await;
        }

        tracing::info!(
            session_id = %self.session_id,
            url = %url,
            model = %self.config.model,
            "connected to backend"
        );
        Ok(())
    }

    async fn open(&self, url: &str) -> Result<WsStream, ConnectError> {
        let (mut ws, _response) = connect_async(url).await.map_err(|e| ConnectError::Dial {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

        let handshake = serde_json::to_string(&Handshake::new(&self.session_id, &self.config))
            .map_err(|e| ConnectError::Handshake(e.to_string()))?;
        ws.send(Message::Text(handshake))
            .await
            .map_err(|e| ConnectError::Handshake(e.to_string()))?;
        Ok(ws)
    }
}

#[async_trait]
impl AudioUplink for BackendConnector {
    async fn send_audio(&self, frame: Vec<u8>) -> Result<bool, SendError> {
        let Some(connection) = self.current() else {
            return Ok(false);
        };
        connection.send(Message::Binary(frame)).await?;
        Ok(true)
    }
}
