//! Configuration for the voice engine
//!
//! This module loads engine configuration from environment variables and YAML
//! files. Priority: YAML > ENV vars > .env values > defaults.
//!
//! # Modules
//! - `yaml`: YAML configuration file loading
//! - `env`: Environment variable loading
//! - `merge`: Applying YAML overrides on top of the environment
//! - `validation`: Configuration validation logic
//!
//! # Example
//! ```rust,no_run
//! use voyage_realtime::config::EngineConfig;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = EngineConfig::from_env()?;
//!
//! // Load from YAML file with environment variable base
//! let config_path = PathBuf::from("voyage.yaml");
//! let config = EngineConfig::from_file(&config_path)?;
//!
//! println!("Using model {}", config.model);
//! # Ok(())
//! # }
//! ```

use std::path::PathBuf;
use std::time::Duration;

mod env;
mod merge;
mod validation;
mod yaml;

pub use yaml::YamlConfig;

use crate::core::audio::PlaybackConfig;
use crate::core::conversation::DEFAULT_MIN_UTTERANCE_MS;
use crate::core::realtime::transport::TransportEndpoint;
use crate::core::realtime::{ToolDefinition, TransportKind, TurnDetectionConfig};

pub const DEFAULT_API_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_WEBSOCKET_URL: &str = "wss://api.openai.com/v1/realtime";
pub const DEFAULT_CALLS_URL: &str = "https://api.openai.com/v1/realtime/calls";
pub const DEFAULT_MODEL: &str = "gpt-realtime";
pub const DEFAULT_VOICE: &str = "alloy";
pub const DEFAULT_TRANSCRIPTION_MODEL: &str = "gpt-4o-mini-transcribe";
pub const DEFAULT_INSTRUCTIONS: &str = "You are a friendly travel assistant. \
Help the user with directions, weather, currency conversion, translation, nearby places \
and their travel calendar. Use the available tools for facts you do not know. \
Keep spoken answers short and conversational.";

/// Engine configuration
///
/// Contains everything needed to run a voice session:
/// - Credentials (API key and the base URL secrets are minted from)
/// - Realtime endpoint, model, voice and transport strategy
/// - Assistant instructions, preferred language and greeting
/// - Turn detection and tool catalog
/// - Audio pipeline tuning and timeouts
#[derive(Debug, Clone)]
pub struct EngineConfig {
    // Credentials
    /// Long-lived API key used only to mint ephemeral credentials
    pub api_key: Option<String>,
    pub api_base_url: String,

    // Realtime endpoint
    pub websocket_url: String,
    pub calls_url: String,
    pub model: String,
    pub voice: String,
    pub transport: TransportKind,

    // Assistant
    pub instructions: String,
    /// Preferred reply language, e.g. "en" or "French"
    pub language: Option<String>,
    /// Instructions for a response requested right after connecting
    pub greeting: Option<String>,
    /// Input transcription model; `None` disables user transcripts
    pub transcription_model: Option<String>,

    // Turn taking
    /// `None` disables server turn detection
    pub turn_detection: Option<TurnDetectionConfig>,
    pub tools: Vec<ToolDefinition>,

    // Audio
    pub min_utterance_ms: u64,
    pub prebuffer_ms: u64,
    pub chunk_ms: u64,

    // Timeouts
    pub handshake_timeout_ms: u64,
    pub negotiation_timeout_ms: u64,
    /// Per-call tool budget; `None` lets tools run until they finish
    pub tool_timeout_ms: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            websocket_url: DEFAULT_WEBSOCKET_URL.to_string(),
            calls_url: DEFAULT_CALLS_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            voice: DEFAULT_VOICE.to_string(),
            transport: TransportKind::Socket,
            instructions: DEFAULT_INSTRUCTIONS.to_string(),
            language: None,
            greeting: None,
            transcription_model: Some(DEFAULT_TRANSCRIPTION_MODEL.to_string()),
            turn_detection: Some(TurnDetectionConfig::default()),
            tools: Vec::new(),
            min_utterance_ms: DEFAULT_MIN_UTTERANCE_MS,
            prebuffer_ms: 200,
            chunk_ms: 20,
            handshake_timeout_ms: 10_000,
            negotiation_timeout_ms: 10_000,
            tool_timeout_ms: None,
        }
    }
}

/// Zeroize the API key when the configuration is dropped.
impl Drop for EngineConfig {
    fn drop(&mut self) {
        use zeroize::Zeroize;

        if let Some(ref mut key) = self.api_key {
            key.zeroize();
        }
    }
}

impl EngineConfig {
    /// Load configuration from a YAML file with environment variable base
    ///
    /// Environment variables (including values loaded from `.env` in
    /// `main`) provide the base; YAML values override them. The merged
    /// configuration is validated before it is returned.
    ///
    /// # Errors
    /// Returns an error if:
    /// - The YAML file cannot be read or is malformed
    /// - Environment variables have invalid formats
    /// - Configuration validation fails
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        let yaml_config = yaml::YamlConfig::from_file(path)?;
        let config = merge::merge_config(Some(yaml_config))?;
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration for values the engine cannot run with.
    pub fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        validation::validate_endpoints(self)?;
        validation::validate_audio(self)?;
        validation::validate_timeouts(self)?;
        validation::validate_tools(&self.tools)?;
        Ok(())
    }

    /// Get the API key, or an error naming the variable to set.
    pub fn require_api_key(&self) -> Result<&str, String> {
        match self.api_key.as_deref() {
            Some(key) if !key.is_empty() => Ok(key),
            _ => Err("OpenAI API key not configured (set OPENAI_API_KEY)".to_string()),
        }
    }

    pub fn endpoint(&self) -> TransportEndpoint {
        TransportEndpoint {
            websocket_url: self.websocket_url.clone(),
            calls_url: self.calls_url.clone(),
            model: self.model.clone(),
        }
    }

    pub fn playback_config(&self) -> PlaybackConfig {
        PlaybackConfig {
            chunk: Duration::from_millis(self.chunk_ms),
            prebuffer: Duration::from_millis(self.prebuffer_ms),
            ..PlaybackConfig::default()
        }
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn negotiation_timeout(&self) -> Duration {
        Duration::from_millis(self.negotiation_timeout_ms)
    }

    pub fn tool_timeout(&self) -> Option<Duration> {
        self.tool_timeout_ms.map(Duration::from_millis)
    }

    /// Whether the client must commit the buffer and request responses itself.
    pub fn manual_turns(&self) -> bool {
        self.turn_detection
            .as_ref()
            .is_some_and(|td| !td.creates_response())
    }
}

/// Turn detection preset for a mode name.
pub(crate) fn turn_detection_for_mode(mode: &str) -> Result<Option<TurnDetectionConfig>, String> {
    match mode.trim().to_lowercase().as_str() {
        "server_vad" | "server" => Ok(Some(TurnDetectionConfig::default())),
        "semantic_vad" | "semantic" => Ok(Some(TurnDetectionConfig::SemanticVad {
            eagerness: None,
            create_response: Some(true),
            interrupt_response: Some(true),
        })),
        "none" | "off" | "disabled" => Ok(None),
        other => Err(format!(
            "Invalid turn detection mode '{other}'. Expected server_vad, semantic_vad or none"
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;
    use std::fs;
    use tempfile::TempDir;

    // Helper to clean up environment variables
    fn cleanup_env_vars() {
        unsafe {
            env::remove_var("OPENAI_API_KEY");
            env::remove_var("REALTIME_API_BASE_URL");
            env::remove_var("REALTIME_WS_URL");
            env::remove_var("REALTIME_CALLS_URL");
            env::remove_var("REALTIME_MODEL");
            env::remove_var("REALTIME_VOICE");
            env::remove_var("REALTIME_TRANSPORT");
            env::remove_var("REALTIME_INSTRUCTIONS");
            env::remove_var("REALTIME_LANGUAGE");
            env::remove_var("REALTIME_GREETING");
            env::remove_var("REALTIME_TRANSCRIPTION_MODEL");
            env::remove_var("REALTIME_TURN_DETECTION");
            env::remove_var("REALTIME_AUTO_RESPONSE");
            env::remove_var("REALTIME_MIN_UTTERANCE_MS");
            env::remove_var("REALTIME_PREBUFFER_MS");
            env::remove_var("REALTIME_CHUNK_MS");
            env::remove_var("REALTIME_HANDSHAKE_TIMEOUT_MS");
            env::remove_var("REALTIME_NEGOTIATION_TIMEOUT_MS");
            env::remove_var("REALTIME_TOOL_TIMEOUT_MS");
        }
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.model, "gpt-realtime");
        assert!(!config.manual_turns());
        assert_eq!(config.playback_config().prebuffer, Duration::from_millis(200));
        assert_eq!(config.endpoint().websocket_url, DEFAULT_WEBSOCKET_URL);
    }

    #[test]
    fn test_require_api_key() {
        let mut config = EngineConfig::default();
        assert!(config.require_api_key().unwrap_err().contains("OPENAI_API_KEY"));
        config.api_key = Some("sk-test".to_string());
        assert_eq!(config.require_api_key().unwrap(), "sk-test");
    }

    #[test]
    fn test_manual_turns() {
        let mut config = EngineConfig::default();
        config.turn_detection = Some(TurnDetectionConfig::ServerVad {
            threshold: None,
            prefix_padding_ms: None,
            silence_duration_ms: None,
            create_response: Some(false),
            interrupt_response: None,
        });
        assert!(config.manual_turns());

        config.turn_detection = None;
        assert!(!config.manual_turns());
    }

    #[test]
    fn test_turn_detection_for_mode() {
        assert!(matches!(
            turn_detection_for_mode("server_vad"),
            Ok(Some(TurnDetectionConfig::ServerVad { .. }))
        ));
        assert!(matches!(
            turn_detection_for_mode("Semantic"),
            Ok(Some(TurnDetectionConfig::SemanticVad { .. }))
        ));
        assert!(matches!(turn_detection_for_mode("off"), Ok(None)));
        assert!(turn_detection_for_mode("push_to_talk").is_err());
    }

    #[test]
    #[serial]
    fn test_from_env() {
        cleanup_env_vars();
        unsafe {
            env::set_var("OPENAI_API_KEY", "sk-env");
            env::set_var("REALTIME_TRANSPORT", "webrtc");
            env::set_var("REALTIME_LANGUAGE", "French");
            env::set_var("REALTIME_MIN_UTTERANCE_MS", "300");
            env::set_var("REALTIME_AUTO_RESPONSE", "false");
            env::set_var("REALTIME_TOOL_TIMEOUT_MS", "5000");
        }

        let config = EngineConfig::from_env().unwrap();
        assert_eq!(config.api_key.as_deref(), Some("sk-env"));
        assert_eq!(config.transport, TransportKind::Peer);
        assert_eq!(config.language.as_deref(), Some("French"));
        assert_eq!(config.min_utterance_ms, 300);
        assert!(config.manual_turns());
        assert_eq!(config.tool_timeout(), Some(Duration::from_secs(5)));

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_env_invalid_number() {
        cleanup_env_vars();
        unsafe {
            env::set_var("REALTIME_PREBUFFER_MS", "lots");
        }

        let result = EngineConfig::from_env();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("REALTIME_PREBUFFER_MS"));

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_file_yaml_overrides_env() {
        cleanup_env_vars();

        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("voyage.yaml");

        let yaml_content = r#"
credentials:
  api_key: "sk-yaml"

realtime:
  model: "gpt-realtime-mini"
  voice: "verse"

assistant:
  language: "Spanish"
  greeting: "Say hello"

turn_detection:
  mode: "semantic_vad"
  eagerness: "low"
  create_response: false

tools:
  timeout_ms: 8000
  definitions:
    - name: "get_weather"
      description: "Weather for a city"
      parameters:
        type: object
        properties:
          city: { type: string }
"#;

        fs::write(&config_path, yaml_content).unwrap();

        unsafe {
            env::set_var("OPENAI_API_KEY", "sk-env");
            env::set_var("REALTIME_VOICE", "alloy");
            env::set_var("REALTIME_PREBUFFER_MS", "300");
        }

        let config = EngineConfig::from_file(&config_path).unwrap();

        // YAML overrides ENV
        assert_eq!(config.api_key.as_deref(), Some("sk-yaml"));
        assert_eq!(config.voice, "verse");
        // ENV value kept where YAML is silent
        assert_eq!(config.prebuffer_ms, 300);
        assert_eq!(config.model, "gpt-realtime-mini");
        assert_eq!(config.greeting.as_deref(), Some("Say hello"));
        assert!(config.manual_turns());
        match config.turn_detection.as_ref().unwrap() {
            TurnDetectionConfig::SemanticVad { eagerness, .. } => {
                assert_eq!(eagerness.as_deref(), Some("low"))
            }
            other => panic!("unexpected turn detection {:?}", other),
        }
        assert_eq!(config.tools.len(), 1);
        assert_eq!(config.tools[0].name, "get_weather");
        assert_eq!(config.tool_timeout_ms, Some(8000));

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_file_missing_file() {
        cleanup_env_vars();

        let config_path = PathBuf::from("/nonexistent/voyage.yaml");
        let result = EngineConfig::from_file(&config_path);

        assert!(result.is_err());
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Failed to read config file")
        );
    }

    #[test]
    #[serial]
    fn test_from_file_rejects_invalid_values() {
        cleanup_env_vars();

        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("voyage.yaml");
        fs::write(
            &config_path,
            r#"
audio:
  prebuffer_ms: 10
  chunk_ms: 40
"#,
        )
        .unwrap();

        let result = EngineConfig::from_file(&config_path);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("prebuffer"));
    }
}
