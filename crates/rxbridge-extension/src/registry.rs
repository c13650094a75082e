use crate::extension_trait::AudioExtension;
use rxbridge_core::{AudioFormat, BackendPolicy, ConfigError, ExtensionError};
use std::collections::HashMap;

/// Builds one extension from the stream's audio format, client parameters
/// and the operator's backend policy. Must not touch the network.
pub type ExtensionFactory =
    fn(AudioFormat, &toml::Value, &BackendPolicy) -> Result<Box<dyn AudioExtension>, ConfigError>;

pub struct ExtensionRegistry {
    policy: BackendPolicy,
    factories: HashMap<String, ExtensionFactory>,
}

impl ExtensionRegistry {
    pub fn new(policy: BackendPolicy) -> Self {
        let mut registry = Self {
            policy,
            factories: HashMap::new(),
        };
        registry.register("whisper", |format, params, policy| {
            let bridge = crate::whisper_bridge::WhisperBridge::from_params(format, params, policy)?;
            Ok(Box::new(bridge))
        });
        registry
    }

    pub fn register(&mut self, name: &str, factory: ExtensionFactory) {
        self.factories.insert(name.to_string(), factory);
    }

    pub fn create(
        &self,
        name: &str,
        format: AudioFormat,
        params: &toml::Value,
    ) -> Result<Box<dyn AudioExtension>, ExtensionError> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| ExtensionError::NotFound(name.to_string()))?;
        let extension = factory(format, params, &self.policy)?;
        tracing::debug!(extension = %name, ?format, "audio extension created");
        Ok(extension)
    }

    pub fn list_extensions(&self) -> Vec<&str> {
        self.factories.keys().map(|s| s.as_str()).collect()
    }

    pub fn policy(&self) -> &BackendPolicy {
        &self.policy
    }
}

impl Default for ExtensionRegistry {
    fn default() -> Self {
        Self::new(BackendPolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::WhisperBridge;

    fn mono16() -> AudioFormat {
        AudioFormat {
            channels: 1,
            bits_per_sample: 16,
            sample_rate: 16000,
        }
    }

    fn empty() -> toml::Value {
        toml::Value::Table(Default::default())
    }

    #[test]
    fn test_registry_new_has_whisper() {
        let registry = ExtensionRegistry::default();
        let extension = registry.create("whisper", mono16(), &empty()).unwrap();
        assert_eq!(extension.name(), "whisper");
    }

    #[test]
    fn test_registry_create_unknown_returns_error() {
        let registry = ExtensionRegistry::default();
        match registry.create("nope", mono16(), &empty()) {
            Err(ExtensionError::NotFound(name)) => assert_eq!(name, "nope"),
            _ => panic!("expected NotFound error"),
        }
    }

    #[test]
    fn test_registry_stereo_is_config_error() {
        let registry = ExtensionRegistry::default();
        let format = AudioFormat {
            channels: 2,
            ..mono16()
        };
        match registry.create("whisper", format, &empty()) {
            Err(ExtensionError::Config(ConfigError::UnsupportedAudioFormat(_))) => {}
            _ => panic!("expected UnsupportedAudioFormat"),
        }
    }

    #[test]
    fn test_registry_passes_policy_to_factory() {
        let policy = BackendPolicy {
            model: "tiny.en".to_string(),
            ..BackendPolicy::default()
        };
        let mut registry = ExtensionRegistry::new(policy);
        registry.register("checked", |format, params, policy| {
            assert_eq!(policy.model, "tiny.en");
            Ok(Box::new(WhisperBridge::from_params(format, params, policy)?))
        });
        assert!(registry.create("checked", mono16(), &empty()).is_ok());
    }

    #[test]
    fn test_registry_list_extensions_includes_whisper() {
        let registry = ExtensionRegistry::default();
        assert!(registry.list_extensions().contains(&"whisper"));
    }

    #[test]
    fn test_registry_register_overwrites() {
        let mut registry = ExtensionRegistry::default();
        registry.register("whisper", |_, _, _| {
            Err(ConfigError::UnsupportedAudioFormat("disabled".to_string()))
        });
        assert!(registry.create("whisper", mono16(), &empty()).is_err());
        assert_eq!(registry.list_extensions().len(), 1);
    }
}
