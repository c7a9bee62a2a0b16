use std::env;
use std::str::FromStr;

use super::{EngineConfig, turn_detection_for_mode};
use crate::core::realtime::{TransportKind, TurnDetectionConfig};

/// Read a variable, treating empty values as unset.
fn env_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T>(key: &str) -> Result<Option<T>, String>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env_var(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| format!("Invalid value for {key}: {raw} ({e})")),
        None => Ok(None),
    }
}

fn env_bool(key: &str) -> Result<Option<bool>, String> {
    match env_var(key) {
        Some(raw) => match raw.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(Some(true)),
            "false" | "0" | "no" | "off" => Ok(Some(false)),
            _ => Err(format!("Invalid boolean for {key}: {raw}")),
        },
        None => Ok(None),
    }
}

/// Set `create_response` on whichever turn detection variant is configured.
pub(super) fn set_create_response(turn_detection: &mut Option<TurnDetectionConfig>, value: bool) {
    match turn_detection {
        Some(TurnDetectionConfig::ServerVad {
            create_response, ..
        })
        | Some(TurnDetectionConfig::SemanticVad {
            create_response, ..
        }) => *create_response = Some(value),
        None => {}
    }
}

impl EngineConfig {
    /// Load configuration from environment variables
    ///
    /// Unset variables keep their defaults. A `.env` file, if any, is
    /// loaded by `main` before this runs, so actual environment variables
    /// take precedence over it.
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let mut config = EngineConfig::default();

        config.api_key = env_var("OPENAI_API_KEY");
        if let Some(url) = env_var("REALTIME_API_BASE_URL") {
            config.api_base_url = url;
        }
        if let Some(url) = env_var("REALTIME_WS_URL") {
            config.websocket_url = url;
        }
        if let Some(url) = env_var("REALTIME_CALLS_URL") {
            config.calls_url = url;
        }
        if let Some(model) = env_var("REALTIME_MODEL") {
            config.model = model;
        }
        if let Some(voice) = env_var("REALTIME_VOICE") {
            config.voice = voice;
        }
        if let Some(transport) = env_var("REALTIME_TRANSPORT") {
            config.transport = TransportKind::parse(&transport)
                .ok_or_else(|| format!("Invalid value for REALTIME_TRANSPORT: {transport}"))?;
        }

        if let Some(instructions) = env_var("REALTIME_INSTRUCTIONS") {
            config.instructions = instructions;
        }
        config.language = env_var("REALTIME_LANGUAGE");
        config.greeting = env_var("REALTIME_GREETING");
        if let Some(model) = env_var("REALTIME_TRANSCRIPTION_MODEL") {
            config.transcription_model = match model.to_lowercase().as_str() {
                "none" | "off" => None,
                _ => Some(model),
            };
        }

        if let Some(mode) = env_var("REALTIME_TURN_DETECTION") {
            config.turn_detection = turn_detection_for_mode(&mode)?;
        }
        if let Some(auto) = env_bool("REALTIME_AUTO_RESPONSE")? {
            set_create_response(&mut config.turn_detection, auto);
        }

        if let Some(ms) = env_parse("REALTIME_MIN_UTTERANCE_MS")? {
            config.min_utterance_ms = ms;
        }
        if let Some(ms) = env_parse("REALTIME_PREBUFFER_MS")? {
            config.prebuffer_ms = ms;
        }
        if let Some(ms) = env_parse("REALTIME_CHUNK_MS")? {
            config.chunk_ms = ms;
        }
        if let Some(ms) = env_parse("REALTIME_HANDSHAKE_TIMEOUT_MS")? {
            config.handshake_timeout_ms = ms;
        }
        if let Some(ms) = env_parse("REALTIME_NEGOTIATION_TIMEOUT_MS")? {
            config.negotiation_timeout_ms = ms;
        }
        config.tool_timeout_ms = env_parse("REALTIME_TOOL_TIMEOUT_MS")?;

        Ok(config)
    }
}
