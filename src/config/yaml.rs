use serde::Deserialize;
use std::path::PathBuf;

use crate::core::realtime::ToolDefinition;

/// Complete YAML configuration structure
///
/// All fields are optional to allow partial configuration. Values present
/// here override the environment.
///
/// # Example YAML structure
/// ```yaml
/// credentials:
///   api_key: "sk-..."
///   api_base_url: "https://api.openai.com/v1"
///
/// realtime:
///   model: "gpt-realtime"
///   voice: "alloy"
///   transport: "socket"
///   handshake_timeout_ms: 10000
///
/// assistant:
///   instructions: "You are a friendly travel assistant."
///   language: "French"
///   greeting: "Greet the traveller and ask where they are headed."
///   transcription_model: "gpt-4o-mini-transcribe"
///
/// turn_detection:
///   mode: "server_vad"
///   silence_duration_ms: 600
///   create_response: true
///
/// audio:
///   min_utterance_ms: 500
///   prebuffer_ms: 200
///   chunk_ms: 20
///
/// tools:
///   timeout_ms: 15000
///   definitions:
///     - name: "get_weather"
///       description: "Current weather for a city"
///       parameters: { type: object, properties: { city: { type: string } } }
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub credentials: Option<CredentialsYaml>,
    pub realtime: Option<RealtimeYaml>,
    pub assistant: Option<AssistantYaml>,
    pub turn_detection: Option<TurnDetectionYaml>,
    pub audio: Option<AudioYaml>,
    pub tools: Option<ToolsYaml>,
}

/// Credential settings from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct CredentialsYaml {
    pub api_key: Option<String>,
    pub api_base_url: Option<String>,
}

/// Realtime endpoint settings from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct RealtimeYaml {
    pub model: Option<String>,
    pub voice: Option<String>,
    /// "socket" or "peer"
    pub transport: Option<String>,
    pub websocket_url: Option<String>,
    pub calls_url: Option<String>,
    pub handshake_timeout_ms: Option<u64>,
    pub negotiation_timeout_ms: Option<u64>,
}

/// Assistant persona from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AssistantYaml {
    pub instructions: Option<String>,
    pub language: Option<String>,
    pub greeting: Option<String>,
    /// "none" disables input transcription
    pub transcription_model: Option<String>,
}

/// Turn detection from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct TurnDetectionYaml {
    /// server_vad, semantic_vad or none
    pub mode: Option<String>,
    pub threshold: Option<f32>,
    pub prefix_padding_ms: Option<u32>,
    pub silence_duration_ms: Option<u32>,
    pub eagerness: Option<String>,
    pub create_response: Option<bool>,
    pub interrupt_response: Option<bool>,
}

/// Audio pipeline tuning from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AudioYaml {
    pub min_utterance_ms: Option<u64>,
    pub prebuffer_ms: Option<u64>,
    pub chunk_ms: Option<u64>,
}

/// Tool catalog from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ToolsYaml {
    pub timeout_ms: Option<u64>,
    pub definitions: Vec<ToolDefinition>,
}

impl YamlConfig {
    /// Load YAML configuration from a file
    ///
    /// # Errors
    /// Returns an error if:
    /// - The file cannot be read
    /// - The YAML is malformed
    /// - Required fields have invalid types
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file {}: {e}", path.display()))?;

        let config: YamlConfig = serde_yaml::from_str(&contents)
            .map_err(|e| format!("Failed to parse YAML config: {e}"))?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_yaml_config_partial() {
        let yaml = r#"
realtime:
  voice: "shimmer"
audio:
  prebuffer_ms: 120
"#;

        let config: YamlConfig = serde_yaml::from_str(yaml).unwrap();
        let realtime = config.realtime.unwrap();
        assert_eq!(realtime.voice.as_deref(), Some("shimmer"));
        assert!(realtime.model.is_none());
        assert_eq!(config.audio.unwrap().prebuffer_ms, Some(120));
        assert!(config.credentials.is_none());
        assert!(config.tools.is_none());
    }

    #[test]
    fn test_yaml_config_empty() {
        let config: YamlConfig = serde_yaml::from_str("{}").unwrap();
        assert!(config.realtime.is_none());
        assert!(config.turn_detection.is_none());
    }

    #[test]
    fn test_yaml_tools() {
        let yaml = r#"
tools:
  definitions:
    - name: "convert_currency"
    - name: "translate"
      description: "Translate a phrase"
"#;
        let config: YamlConfig = serde_yaml::from_str(yaml).unwrap();
        let tools = config.tools.unwrap();
        assert_eq!(tools.definitions.len(), 2);
        assert!(tools.definitions[0].description.is_none());
        assert!(tools.timeout_ms.is_none());
    }

    #[test]
    fn test_from_file_not_found() {
        let path = PathBuf::from("/nonexistent/voyage.yaml");
        let result = YamlConfig::from_file(&path);

        assert!(result.is_err());
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Failed to read config file")
        );
    }

    #[test]
    fn test_from_file_invalid_yaml() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("invalid.yaml");

        fs::write(&config_path, "invalid: yaml: content:").unwrap();

        let result = YamlConfig::from_file(&config_path);

        assert!(result.is_err());
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Failed to parse YAML")
        );
    }
}
