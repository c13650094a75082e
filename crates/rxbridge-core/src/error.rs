use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("environment variable not found: {0}")]
    EnvVarNotFound(String),

    #[error("unsupported audio format: {0}")]
    UnsupportedAudioFormat(String),

    #[error("invalid parameter '{name}': {reason}")]
    InvalidParameter { name: String, reason: String },
}

#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("handshake with {url} timed out after {timeout_ms}ms")]
    Timeout { url: String, timeout_ms: u64 },

    #[error("failed to dial {url}: {reason}")]
    Dial { url: String, reason: String },

    #[error("failed to send handshake: {0}")]
    Handshake(String),
}

#[derive(Debug, Error)]
pub enum SendError {
    #[error("backend send failed: {0}")]
    Transport(String),

    #[error("backend connection closed")]
    Closed,
}

#[derive(Debug, Error)]
pub enum ReadError {
    #[error("backend read failed: {0}")]
    Transport(String),

    #[error("backend closed the connection")]
    Closed,
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("malformed backend JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("malformed backend frame: {0}")]
    Frame(#[from] CodecError),
}

#[derive(Debug, Error, PartialEq)]
pub enum CodecError {
    #[error("frame too short: {actual} bytes, need at least {expected}")]
    Truncated { expected: usize, actual: usize },

    #[error("unknown envelope kind: 0x{0:02x}")]
    UnknownKind(u8),

    #[error("declared payload length {declared} exceeds {available} available bytes")]
    LengthOverrun { declared: usize, available: usize },

    #[error("payload of {0} bytes does not fit the length prefix")]
    PayloadTooLarge(usize),

    #[error("metric payload must be 4 bytes, got {0}")]
    MetricSize(usize),
}

#[derive(Debug, Error, PartialEq)]
pub enum SinkError {
    #[error("result sink is full")]
    Full,

    #[error("result sink is closed")]
    Closed,
}

#[derive(Debug, Error)]
pub enum ExtensionError {
    #[error("audio extension not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error(transparent)]
    Connect(#[from] ConnectError),

    #[error("bridge is already running")]
    AlreadyRunning,
}
