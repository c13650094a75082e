pub mod batcher;
pub mod connector;
pub mod extension_trait;
pub mod messages;
pub mod receiver;
pub mod registry;
pub mod whisper_bridge;

pub use batcher::{AudioBatcher, AudioUplink, BatchStats};
pub use connector::{BackendConnection, BackendConnector, ConnectionState};
pub use extension_trait::AudioExtension;
pub use receiver::{ReceiverExit, ResultReceiver};
pub use registry::{ExtensionFactory, ExtensionRegistry};
pub use whisper_bridge::WhisperBridge;
