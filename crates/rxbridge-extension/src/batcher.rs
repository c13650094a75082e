use async_trait::async_trait;
use byteorder::{ByteOrder, LittleEndian};
use rxbridge_core::{AudioSample, ClientSessionId, SendError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;

/// Where batched audio goes. Implemented by the backend connector.
#[async_trait]
pub trait AudioUplink: Send + Sync {
    /// Send one binary frame. `Ok(false)` means no connection was held and
    /// the frame was dropped.
    async fn send_audio(&self, frame: Vec<u8>) -> Result<bool, SendError>;
}

/// Convert signed 16-bit PCM to normalized little-endian f32 bytes.
pub fn normalize_pcm(pcm: &[i16]) -> Vec<u8> {
    let floats: Vec<f32> = pcm.iter().map(|&s| s as f32 / 32768.0).collect();
    let mut bytes = vec![0u8; floats.len() * 4];
    LittleEndian::write_f32_into(&floats, &mut bytes);
    bytes
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchStats {
    pub frames_sent: u64,
    pub frames_dropped: u64,
    pub send_failures: u64,
}

/// Send path of a bridge: collects capture ticks and flushes them to the
/// uplink on a fixed timer.
pub struct AudioBatcher<U: AudioUplink + ?Sized> {
    uplink: Arc<U>,
    interval: Duration,
    session_id: ClientSessionId,
    buffer: Vec<i16>,
    stats: BatchStats,
}

impl<U: AudioUplink + ?Sized> AudioBatcher<U> {
    pub fn new(uplink: Arc<U>, interval: Duration, session_id: ClientSessionId) -> Self {
        Self {
            uplink,
            interval,
            session_id,
            buffer: Vec::new(),
            stats: BatchStats::default(),
        }
    }

    /// Runs until `stop_rx` flips or the sample source closes. Samples still
    /// buffered at that point are discarded.
    pub async fn run(
        mut self,
        mut samples: mpsc::Receiver<AudioSample>,
        mut stop_rx: watch::Receiver<bool>,
    ) -> BatchStats {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        while !*stop_rx.borrow() {
            tokio::select! {
                _ = stop_rx.changed() => break,
                _ = ticker.tick() => self.flush(&mut stop_rx).await,
                sample = samples.recv() => match sample {
                    Some(sample) => self.buffer.extend_from_slice(&sample.pcm),
                    None => {
                        tracing::debug!(session_id = %self.session_id, "sample source closed");
                        break;
                    }
                },
            }
        }

        if !self.buffer.is_empty() {
            tracing::debug!(
                session_id = %self.session_id,
                samples = self.buffer.len(),
                "discarding unsent audio"
            );
        }
        tracing::debug!(session_id = %self.session_id, stats = ?self.stats, "batcher exited");
        self.stats
    }

    async fn flush(&mut self, stop_rx: &mut watch::Receiver<bool>) {
        if self.buffer.is_empty() {
            return;
        }
        let pcm = std::mem::take(&mut self.buffer);
        let frame = normalize_pcm(&pcm);

        let sent = tokio::select! {
            sent = self.uplink.send_audio(frame) => sent,
            _ = stop_rx.changed() => {
                tracing::debug!(session_id = %self.session_id, "stop requested mid-send, frame dropped");
                return;
            }
        };
        match sent {
            Ok(true) => self.stats.frames_sent += 1,
            Ok(false) => self.stats.frames_dropped += 1,
            Err(SendError::Closed) => {
                self.stats.frames_dropped += 1;
                tracing::debug!(session_id = %self.session_id, "connection closed mid-send, frame dropped");
            }
            Err(e) => {
                self.stats.send_failures += 1;
                tracing::warn!(session_id = %self.session_id, "audio send failed: {e}");
            }
        }
    }
}
