use async_trait::async_trait;
use rxbridge_core::{AudioSample, BridgeError};
use tokio::sync::mpsc;

/// A named consumer attached to one receiver's audio stream.
///
/// Implementations are constructed through
/// [`ExtensionRegistry`](crate::ExtensionRegistry), which validates the audio
/// format before anything is built.
#[async_trait]
pub trait AudioExtension: Send + Sync {
    /// Registry name of this extension (e.g. `"whisper"`).
    fn name(&self) -> &str;
    /// Begin consuming `samples` and delivering encoded envelopes to
    /// `results`. Fails if the backend cannot be reached.
    async fn start(
        &mut self,
        samples: mpsc::Receiver<AudioSample>,
        results: mpsc::Sender<Vec<u8>>,
    ) -> Result<(), BridgeError>;
    /// Stop all work and wait for it to finish. Safe to call repeatedly.
    async fn stop(&mut self) -> Result<(), BridgeError>;
    /// Returns `true` between a successful `start` and the next `stop`.
    fn is_running(&self) -> bool;
}
