use crate::batcher::AudioBatcher;
use crate::connector::{BackendConnector, ConnectionState};
use crate::extension_trait::AudioExtension;
use crate::receiver::ResultReceiver;
use async_trait::async_trait;
use rxbridge_core::{
    AudioFormat, AudioSample, BackendPolicy, BridgeError, ClientSessionId, ConfigError,
    SessionConfig, TaskKind,
};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Keys that belong to the operator's backend policy. Clients may send them,
/// but they are never honoured.
const SERVER_CONTROLLED_KEYS: &[&str] = &[
    "backend_url",
    "url",
    "model",
    "use_vad",
    "send_last_n_segments",
    "no_speech_thresh",
];

struct Running {
    stop_tx: watch::Sender<bool>,
    connector: Arc<BackendConnector>,
    batcher: JoinHandle<crate::batcher::BatchStats>,
    receiver: JoinHandle<crate::receiver::ReceiverExit>,
}

/// Streams receiver audio to a speech-to-text backend and relays its
/// transcription segments as envelopes.
pub struct WhisperBridge {
    session_id: ClientSessionId,
    config: SessionConfig,
    running: Option<Running>,
}

impl WhisperBridge {
    pub fn new(format: AudioFormat, config: SessionConfig) -> Result<Self, ConfigError> {
        validate_format(&format)?;
        Ok(Self {
            session_id: ClientSessionId::new(),
            config,
            running: None,
        })
    }

    /// Build a bridge from client parameters. Only `language` and `task` are
    /// read from `params`; everything else comes from `policy`.
    pub fn from_params(
        format: AudioFormat,
        params: &toml::Value,
        policy: &BackendPolicy,
    ) -> Result<Self, ConfigError> {
        for key in SERVER_CONTROLLED_KEYS {
            if params.get(key).is_some() {
                tracing::warn!(key = %key, "ignoring server-controlled extension parameter");
            }
        }

        let language = match params.get("language") {
            None => None,
            Some(toml::Value::String(s)) if s.is_empty() => {
                return Err(invalid("language", "must not be empty"))
            }
            Some(toml::Value::String(s)) if s == "auto" => None,
            Some(toml::Value::String(s)) => Some(s.clone()),
            Some(_) => return Err(invalid("language", "expected a string")),
        };

        let task = match params.get("task") {
            None => TaskKind::Transcribe,
            Some(toml::Value::String(s)) => TaskKind::parse(s)
                .ok_or_else(|| invalid("task", "expected \"transcribe\" or \"translate\""))?,
            Some(_) => return Err(invalid("task", "expected a string")),
        };

        let config = SessionConfig {
            backend_url: policy.url.clone(),
            model: policy.model.clone(),
            language,
            task,
            batch_interval: policy.batch_interval(),
            use_vad: policy.use_vad,
            send_last_n_segments: policy.send_last_n_segments,
            no_speech_thresh: policy.no_speech_thresh,
            handshake_timeout: policy.handshake_timeout(),
            reconnect_delay: policy.reconnect_delay(),
        };
        Self::new(format, config)
    }

    pub fn session_id(&self) -> &ClientSessionId {
        &self.session_id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.running
            .as_ref()
            .map(|r| r.connector.state())
            .unwrap_or(ConnectionState::Disconnected)
    }
}

fn invalid(name: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidParameter {
        name: name.to_string(),
        reason: reason.to_string(),
    }
}

pub fn validate_format(format: &AudioFormat) -> Result<(), ConfigError> {
    if format.channels != 1 {
        return Err(ConfigError::UnsupportedAudioFormat(format!(
            "channels must be 1, got {}",
            format.channels
        )));
    }
    if format.bits_per_sample != 16 {
        return Err(ConfigError::UnsupportedAudioFormat(format!(
            "bits_per_sample must be 16, got {}",
            format.bits_per_sample
        )));
    }
    Ok(())
}

#[async_trait]
impl AudioExtension for WhisperBridge {
    fn name(&self) -> &str {
        "whisper"
    }

    async fn start(
        &mut self,
        samples: mpsc::Receiver<AudioSample>,
        results: mpsc::Sender<Vec<u8>>,
    ) -> Result<(), BridgeError> {
        if self.running.is_some() {
            return Err(BridgeError::AlreadyRunning);
        }

        let connector = Arc::new(BackendConnector::new(self.session_id, self.config.clone()));
        connector.connect().await?;

        let (stop_tx, stop_rx) = watch::channel(false);

        let batcher = AudioBatcher::new(
            Arc::clone(&connector),
            self.config.batch_interval,
            self.session_id,
        );
        let batcher = tokio::spawn(batcher.run(samples, stop_rx.clone()));

        let receiver = ResultReceiver::new(
            Arc::clone(&connector),
            results,
            stop_rx,
            self.config.reconnect_delay,
        );
        let receiver = tokio::spawn(receiver.run());

        tracing::info!(
            session_id = %self.session_id,
            language = ?self.config.language,
            task = %self.config.task.as_str(),
            "whisper bridge started"
        );

        self.running = Some(Running {
            stop_tx,
            connector,
            batcher,
            receiver,
        });
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), BridgeError> {
        let Some(running) = self.running.take() else {
            return Ok(());
        };

        let _ = running.stop_tx.send(true);
        running.connector.close().await;

        match running.batcher.await {
            Ok(stats) => tracing::debug!(session_id = %self.session_id, ?stats, "send path exited"),
            Err(e) => tracing::warn!(session_id = %self.session_id, "send path task failed: {e}"),
        }
        match running.receiver.await {
            Ok(exit) => tracing::debug!(session_id = %self.session_id, ?exit, "receive path exited"),
            Err(e) => tracing::warn!(session_id = %self.session_id, "receive path task failed: {e}"),
        }

        // A reconnect racing the stop signal may have published a handle.
        running.connector.close().await;
        tracing::info!(session_id = %self.session_id, "whisper bridge stopped");
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running.is_some()
    }
}
