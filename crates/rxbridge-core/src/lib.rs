pub mod codec;
pub mod config;
pub mod error;
pub mod types;

pub use config::{AppConfig, BackendPolicy};
pub use error::{
    BridgeError, CodecError, ConfigError, ConnectError, ExtensionError, ParseError, ReadError,
    SendError, SinkError,
};
pub use types::{
    unix_nanos, AudioFormat, AudioSample, ClientSessionId, EnvelopeKind, ResultEnvelope,
    SessionConfig, TaskKind,
};
