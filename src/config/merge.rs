use super::env::set_create_response;
use super::yaml::{TurnDetectionYaml, YamlConfig};
use super::{EngineConfig, turn_detection_for_mode};
use crate::core::realtime::{TransportKind, TurnDetectionConfig};

/// Build the configuration from the environment, then apply YAML overrides.
pub(super) fn merge_config(
    yaml: Option<YamlConfig>,
) -> Result<EngineConfig, Box<dyn std::error::Error>> {
    let mut config = EngineConfig::from_env()?;
    let Some(yaml) = yaml else {
        return Ok(config);
    };

    if let Some(credentials) = yaml.credentials {
        if credentials.api_key.is_some() {
            config.api_key = credentials.api_key;
        }
        if let Some(url) = credentials.api_base_url {
            config.api_base_url = url;
        }
    }

    if let Some(realtime) = yaml.realtime {
        if let Some(model) = realtime.model {
            config.model = model;
        }
        if let Some(voice) = realtime.voice {
            config.voice = voice;
        }
        if let Some(transport) = realtime.transport {
            config.transport = TransportKind::parse(&transport)
                .ok_or_else(|| format!("Invalid realtime.transport: {transport}"))?;
        }
        if let Some(url) = realtime.websocket_url {
            config.websocket_url = url;
        }
        if let Some(url) = realtime.calls_url {
            config.calls_url = url;
        }
        if let Some(ms) = realtime.handshake_timeout_ms {
            config.handshake_timeout_ms = ms;
        }
        if let Some(ms) = realtime.negotiation_timeout_ms {
            config.negotiation_timeout_ms = ms;
        }
    }

    if let Some(assistant) = yaml.assistant {
        if let Some(instructions) = assistant.instructions {
            config.instructions = instructions;
        }
        if assistant.language.is_some() {
            config.language = assistant.language;
        }
        if assistant.greeting.is_some() {
            config.greeting = assistant.greeting;
        }
        if let Some(model) = assistant.transcription_model {
            config.transcription_model = match model.to_lowercase().as_str() {
                "none" | "off" => None,
                _ => Some(model),
            };
        }
    }

    if let Some(turn_detection) = yaml.turn_detection {
        apply_turn_detection(&mut config.turn_detection, turn_detection)?;
    }

    if let Some(audio) = yaml.audio {
        if let Some(ms) = audio.min_utterance_ms {
            config.min_utterance_ms = ms;
        }
        if let Some(ms) = audio.prebuffer_ms {
            config.prebuffer_ms = ms;
        }
        if let Some(ms) = audio.chunk_ms {
            config.chunk_ms = ms;
        }
    }

    if let Some(tools) = yaml.tools {
        if tools.timeout_ms.is_some() {
            config.tool_timeout_ms = tools.timeout_ms;
        }
        if !tools.definitions.is_empty() {
            config.tools = tools.definitions;
        }
    }

    Ok(config)
}

fn apply_turn_detection(
    target: &mut Option<TurnDetectionConfig>,
    yaml: TurnDetectionYaml,
) -> Result<(), String> {
    if let Some(mode) = yaml.mode.as_deref() {
        *target = turn_detection_for_mode(mode)?;
    }

    match target {
        Some(TurnDetectionConfig::ServerVad {
            threshold,
            prefix_padding_ms,
            silence_duration_ms,
            interrupt_response,
            ..
        }) => {
            if yaml.threshold.is_some() {
                *threshold = yaml.threshold;
            }
            if yaml.prefix_padding_ms.is_some() {
                *prefix_padding_ms = yaml.prefix_padding_ms;
            }
            if yaml.silence_duration_ms.is_some() {
                *silence_duration_ms = yaml.silence_duration_ms;
            }
            if yaml.interrupt_response.is_some() {
                *interrupt_response = yaml.interrupt_response;
            }
        }
        Some(TurnDetectionConfig::SemanticVad {
            eagerness,
            interrupt_response,
            ..
        }) => {
            if yaml.eagerness.is_some() {
                *eagerness = yaml.eagerness;
            }
            if yaml.interrupt_response.is_some() {
                *interrupt_response = yaml.interrupt_response;
            }
        }
        None => {}
    }

    if let Some(create) = yaml.create_response {
        set_create_response(target, create);
    }
    Ok(())
}
