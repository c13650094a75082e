use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// One capture tick of mono 16-bit PCM from the receiver.
#[derive(Debug, Clone)]
pub struct AudioSample {
    pub pcm: Vec<i16>,
    pub rtp_timestamp: u32,
    pub captured_at: DateTime<Utc>,
}

impl AudioSample {
    pub fn new(pcm: Vec<i16>, rtp_timestamp: u32) -> Self {
        Self {
            pcm,
            rtp_timestamp,
            captured_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub channels: u16,
    pub bits_per_sample: u16,
    pub sample_rate: u32,
}

/// Token identifying one bridge instance to a backend that may be shared
/// between several bridges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientSessionId(Uuid);

impl ClientSessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// True when `uid` (as sent back by the backend) names this session.
    pub fn matches(&self, uid: &str) -> bool {
        Uuid::parse_str(uid).map(|u| u == self.0).unwrap_or(false)
    }
}

impl Default for ClientSessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClientSessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    Transcribe,
    Translate,
}

impl TaskKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "transcribe" => Some(Self::Transcribe),
            "translate" => Some(Self::Translate),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transcribe => "transcribe",
            Self::Translate => "translate",
        }
    }
}

/// Everything one bridge needs to talk to its backend. Built once by the
/// factory and never changed afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub backend_url: String,
    pub model: String,
    /// `None` lets the backend detect the language itself.
    pub language: Option<String>,
    pub task: TaskKind,
    pub batch_interval: Duration,
    pub use_vad: bool,
    pub send_last_n_segments: u32,
    pub no_speech_thresh: f32,
    pub handshake_timeout: Duration,
    pub reconnect_delay: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EnvelopeKind {
    /// Length-prefixed transcription segments (JSON).
    Segments = 0x01,
    /// Fixed 4-byte big-endian f32, no length prefix.
    Metric = 0x02,
}

impl EnvelopeKind {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x01 => Some(Self::Segments),
            0x02 => Some(Self::Metric),
            _ => None,
        }
    }

    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResultEnvelope {
    pub kind: EnvelopeKind,
    /// Nanoseconds since the Unix epoch.
    pub timestamp: u64,
    pub payload: Vec<u8>,
}

impl ResultEnvelope {
    pub fn segments(timestamp: u64, payload: Vec<u8>) -> Self {
        Self {
            kind: EnvelopeKind::Segments,
            timestamp,
            payload,
        }
    }

    pub fn metric(timestamp: u64, value: f32) -> Self {
        Self {
            kind: EnvelopeKind::Metric,
            timestamp,
            payload: value.to_be_bytes().to_vec(),
        }
    }

    pub fn metric_value(&self) -> Option<f32> {
        if self.kind != EnvelopeKind::Metric {
            return None;
        }
        let bytes: [u8; 4] = self.payload.as_slice().try_into().ok()?;
        Some(f32::from_be_bytes(bytes))
    }
}

/// Envelope timestamp for `at`. Instants before the epoch clamp to zero.
pub fn unix_nanos(at: DateTime<Utc>) -> u64 {
    at.timestamp_nanos_opt()
        .and_then(|n| u64::try_from(n).ok())
        .unwrap_or(0)
}
