use crate::connector::BackendConnector;
use crate::messages::{classify, Inbound};
use rxbridge_core::{codec, unix_nanos, ClientSessionId, ParseError, ResultEnvelope, SinkError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;

/// Why the receive loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverExit {
    Stopped,
    BackendDisconnected,
}

enum Flow {
    Continue,
    Terminal,
}

/// Encode `envelope` and hand it to the sink without waiting.
pub fn deliver(sink: &mpsc::Sender<Vec<u8>>, envelope: &ResultEnvelope) -> Result<(), SinkError> {
    let bytes = match codec::encode(envelope) {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!("dropping unencodable envelope: {e}");
            return Ok(());
        }
    };
    sink.try_send(bytes).map_err(|e| match e {
        TrySendError::Full(_) => SinkError::Full,
        TrySendError::Closed(_) => SinkError::Closed,
    })
}

/// Receive path of a bridge: reads backend messages, turns results into
/// envelopes and keeps the connection alive across failures.
pub struct ResultReceiver {
    connector: Arc<BackendConnector>,
    session_id: ClientSessionId,
    results: mpsc::Sender<Vec<u8>>,
    stop_rx: watch::Receiver<bool>,
    reconnect_delay: Duration,
}

impl ResultReceiver {
    pub fn new(
        connector: Arc<BackendConnector>,
        results: mpsc::Sender<Vec<u8>>,
        stop_rx: watch::Receiver<bool>,
        reconnect_delay: Duration,
    ) -> Self {
        Self {
            session_id: *connector.session_id(),
            connector,
            results,
            stop_rx,
            reconnect_delay,
        }
    }

    fn stopped(&self) -> bool {
        *self.stop_rx.borrow()
    }

    pub async fn run(mut self) -> ReceiverExit {
        loop {
            if self.stopped() {
                return ReceiverExit::Stopped;
            }

            let Some(connection) = self.connector.current() else {
                if !self.recover().await {
                    return ReceiverExit::Stopped;
                }
                continue;
            };

            let read = tokio::select! {
                read = connection.next_message() => read,
                _ = self.stop_rx.changed() => return ReceiverExit::Stopped,
            };
            drop(connection);

            match read {
                Ok(message) => {
                    if let Flow::Terminal = self.handle(message) {
                        tracing::info!(session_id = %self.session_id, "backend ended the session");
                        self.connector.close().await;
                        return ReceiverExit::BackendDisconnected;
                    }
                }
                Err(e) => {
                    if self.stopped() {
                        return ReceiverExit::Stopped;
                    }
                    tracing::warn!(session_id = %self.session_id, "{e}, reconnecting");
                    if !self.recover().await {
                        return ReceiverExit::Stopped;
                    }
                }
            }
        }
    }

    /// One reconnect attempt; on failure wait out the backoff. Returns
    /// `false` when a stop was requested meanwhile.
    async fn recover(&mut self) -> bool {
        let attempt = tokio::select! {
            attempt = self.connector.reconnect() => attempt,
            _ = self.stop_rx.changed() => return false,
        };
        match attempt {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(
                    session_id = %self.session_id,
                    delay_ms = u64::try_from(self.reconnect_delay.as_millis()).unwrap_or(u64::MAX),
                    "reconnect failed: {e}"
                );
                tokio::select! {
                    _ = tokio::time::sleep(self.reconnect_delay) => !self.stopped(),
                    _ = self.stop_rx.changed() => false,
                }
            }
        }
    }

    fn handle(&self, message: Message) -> Flow {
        match message {
            Message::Text(text) => match classify(&text, &self.session_id) {
                Ok(inbound) => self.dispatch(inbound),
                Err(e) => {
                    tracing::warn!(session_id = %self.session_id, "{e}");
                    Flow::Continue
                }
            },
            Message::Binary(bytes) => {
                match codec::decode(&bytes).map_err(ParseError::from) {
                    Ok(envelope) => self.forward(&envelope),
                    Err(e) => tracing::warn!(session_id = %self.session_id, "{e}"),
                }
                Flow::Continue
            }
            Message::Close(frame) => {
                tracing::debug!(session_id = %self.session_id, ?frame, "backend sent close");
                Flow::Continue
            }
            _ => Flow::Continue,
        }
    }

    fn dispatch(&self, inbound: Inbound) -> Flow {
        match inbound {
            Inbound::ForeignSession(_) | Inbound::Ignored => {}
            Inbound::Wait { minutes } => {
                tracing::warn!(session_id = %self.session_id, ?minutes, "backend at capacity");
            }
            Inbound::BackendError(detail) => {
                tracing::error!(session_id = %self.session_id, "backend error: {detail}");
            }
            Inbound::ServerReady { backend } => {
                tracing::info!(session_id = %self.session_id, ?backend, "backend ready");
            }
            Inbound::Disconnect => return Flow::Terminal,
            Inbound::LanguageDetected {
                language,
                probability,
            } => {
                tracing::info!(
                    session_id = %self.session_id,
                    language = %language,
                    ?probability,
                    "backend detected language"
                );
            }
            Inbound::Segments(segments) => match serde_json::to_vec(&segments) {
                Ok(payload) => {
                    let envelope = ResultEnvelope::segments(unix_nanos(chrono::Utc::now()), payload);
                    self.forward(&envelope);
                }
                Err(e) => tracing::warn!(session_id = %self.session_id, "serializing segments: {e}"),
            },
        }
        Flow::Continue
    }

    fn forward(&self, envelope: &ResultEnvelope) {
        match deliver(&self.results, envelope) {
            Ok(()) => {}
            Err(SinkError::Full) => {
                tracing::warn!(session_id = %self.session_id, "result sink full, dropping envelope");
            }
            Err(SinkError::Closed) => {
                tracing::debug!(session_id = %self.session_id, "result sink closed, dropping envelope");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deliver_encodes_envelope() {
        let (tx, mut rx) = mpsc::channel(1);
        let envelope = ResultEnvelope::segments(99, b"[]".to_vec());
        deliver(&tx, &envelope).unwrap();
        let bytes = rx.try_recv().unwrap();
        assert_eq!(codec::decode(&bytes).unwrap(), envelope);
    }

    #[test]
    fn test_deliver_full_sink_drops_without_blocking() {
        let (tx, mut rx) = mpsc::channel(1);
        deliver(&tx, &ResultEnvelope::segments(1, b"first".to_vec())).unwrap();
        let result = deliver(&tx, &ResultEnvelope::segments(2, b"second".to_vec()));
        assert_eq!(result, Err(SinkError::Full));

        let kept = codec::decode(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(kept.payload, b"first");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_deliver_closed_sink() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let result = deliver(&tx, &ResultEnvelope::metric(1, 0.0));
        assert_eq!(result, Err(SinkError::Closed));
    }
}
