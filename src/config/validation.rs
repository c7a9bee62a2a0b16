use std::collections::HashSet;

use super::EngineConfig;
use crate::core::realtime::ToolDefinition;

/// Longest utterance filter that still lets normal speech through.
const MAX_MIN_UTTERANCE_MS: u64 = 10_000;

/// Validate that every endpoint parses and uses the expected scheme.
pub(super) fn validate_endpoints(config: &EngineConfig) -> Result<(), String> {
    check_url("api_base_url", &config.api_base_url, &["https", "http"])?;
    check_url("websocket_url", &config.websocket_url, &["wss", "ws"])?;
    check_url("calls_url", &config.calls_url, &["https", "http"])?;

    if config.model.trim().is_empty() {
        return Err("model must not be empty".to_string());
    }
    if config.voice.trim().is_empty() {
        return Err("voice must not be empty".to_string());
    }
    Ok(())
}

fn check_url(name: &str, value: &str, schemes: &[&str]) -> Result<(), String> {
    let url = url::Url::parse(value).map_err(|e| format!("Invalid {name} '{value}': {e}"))?;
    if !schemes.contains(&url.scheme()) {
        return Err(format!(
            "Invalid {name} '{value}': scheme must be one of {}",
            schemes.join(", ")
        ));
    }
    Ok(())
}

/// Validate audio tuning.
pub(super) fn validate_audio(config: &EngineConfig) -> Result<(), String> {
    if config.chunk_ms == 0 {
        return Err("chunk_ms must be greater than zero".to_string());
    }
    if config.prebuffer_ms < config.chunk_ms {
        return Err(format!(
            "prebuffer_ms ({}) must be at least chunk_ms ({})",
            config.prebuffer_ms, config.chunk_ms
        ));
    }
    if config.min_utterance_ms > MAX_MIN_UTTERANCE_MS {
        return Err(format!(
            "min_utterance_ms ({}) must not exceed {MAX_MIN_UTTERANCE_MS}",
            config.min_utterance_ms
        ));
    }
    Ok(())
}

pub(super) fn validate_timeouts(config: &EngineConfig) -> Result<(), String> {
    if config.handshake_timeout_ms == 0 {
        return Err("handshake_timeout_ms must be greater than zero".to_string());
    }
    if config.negotiation_timeout_ms == 0 {
        return Err("negotiation_timeout_ms must be greater than zero".to_string());
    }
    if config.tool_timeout_ms == Some(0) {
        return Err("tool timeout must be greater than zero when set".to_string());
    }
    Ok(())
}

/// Tool names must be present and unique.
pub(super) fn validate_tools(tools: &[ToolDefinition]) -> Result<(), String> {
    let mut seen = HashSet::new();
    for tool in tools {
        if tool.name.trim().is_empty() {
            return Err("Tool definitions must have a name".to_string());
        }
        if !seen.insert(tool.name.as_str()) {
            return Err(format!("Duplicate tool definition '{}'", tool.name));
        }
    }
    Ok(())
}
