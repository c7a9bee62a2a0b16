//! Session configuration and the readiness handshake.
//!
//! After the transport opens, the server announces the session with
//! `session.created`. The client pushes its full configuration and the
//! session is ready once `session.updated` acknowledges it. Anything else
//! that arrives meanwhile is kept, in order, for the dispatcher.

use std::time::Duration;
use tracing::{debug, info, warn};

use super::base::{RealtimeError, RealtimeResult};
use super::messages::{
    AudioInputSettings, AudioOutputSettings, AudioSettings, AudioWireFormat, ClientEvent,
    DecodedFrame, InputAudioTranscription, ServerEvent, SessionConfig, ToolDef,
    decode_server_frame,
};
use super::transport::{InboundFrame, OutboundFrame, TransportChannels};
use crate::config::EngineConfig;
use crate::core::audio::WIRE_SAMPLE_RATE;

/// Append the reply-language rule to the base instructions.
pub fn compose_instructions(base: &str, language: Option<&str>) -> String {
    match language.map(str::trim).filter(|l| !l.is_empty()) {
        Some(language) => format!(
            "{}\n\nAlways reply in {}, whatever language the user speaks.",
            base.trim_end(),
            language
        ),
        None => base.to_string(),
    }
}

/// Two-letter hint for the transcription model when the language is given as a code.
fn transcription_language(language: Option<&str>) -> Option<String> {
    language
        .map(str::trim)
        .filter(|l| l.len() == 2 && l.chars().all(|c| c.is_ascii_alphabetic()))
        .map(str::to_lowercase)
}

/// The full configuration pushed once the session is created.
pub fn build_session_config(config: &EngineConfig) -> SessionConfig {
    let language = config.language.as_deref();
    let format = AudioWireFormat::pcm(WIRE_SAMPLE_RATE);

    SessionConfig {
        model: Some(config.model.clone()),
        output_modalities: Some(vec!["audio".to_string()]),
        instructions: Some(compose_instructions(&config.instructions, language)),
        audio: Some(AudioSettings {
            input: Some(AudioInputSettings {
                format: Some(format.clone()),
                transcription: config.transcription_model.as_ref().map(|model| {
                    InputAudioTranscription {
                        model: model.clone(),
                        language: transcription_language(language),
                    }
                }),
                turn_detection: Some(config.turn_detection.clone()),
            }),
            output: Some(AudioOutputSettings {
                format: Some(format),
                voice: Some(config.voice.clone()),
            }),
        }),
        tools: (!config.tools.is_empty())
            .then(|| config.tools.iter().map(ToolDef::from).collect()),
        tool_choice: (!config.tools.is_empty()).then(|| "auto".to_string()),
        ..SessionConfig::patch()
    }
}

/// Patch carrying only the instructions for a new reply language.
pub fn language_patch(base_instructions: &str, language: &str) -> ClientEvent {
    ClientEvent::SessionUpdate {
        session: SessionConfig {
            instructions: Some(compose_instructions(base_instructions, Some(language))),
            ..SessionConfig::patch()
        },
    }
}

/// Session settings sent with the credential request.
pub fn credential_session(config: &EngineConfig) -> serde_json::Value {
    serde_json::json!({
        "type": "realtime",
        "model": config.model,
        "audio": { "output": { "voice": config.voice } },
    })
}

/// Outcome of a successful handshake.
#[derive(Debug)]
pub struct Handshake {
    pub session_id: Option<String>,
    /// Frames received before readiness, in arrival order
    pub buffered: Vec<InboundFrame>,
}

/// Wait for `session.created`, push `session`, wait for `session.updated`.
pub async fn perform_handshake(
    channels: &mut TransportChannels,
    session: SessionConfig,
    timeout: Duration,
) -> RealtimeResult<Handshake> {
    let exchange = async {
        let mut pending_config = Some(session);
        let mut session_id = None;
        let mut buffered = Vec::new();

        loop {
            let Some(frame) = channels.inbound.recv().await else {
                return Err(RealtimeError::ConnectionFailed(
                    "Transport closed during handshake".to_string(),
                ));
            };

            let text = match frame {
                InboundFrame::Text(text) => text,
                InboundFrame::Closed(reason) => {
                    return Err(RealtimeError::ConnectionFailed(format!(
                        "Transport closed during handshake: {}",
                        reason.unwrap_or_else(|| "no reason".to_string())
                    )));
                }
                audio @ InboundFrame::Audio(_) => {
                    buffered.push(audio);
                    continue;
                }
            };

            match decode_server_frame(&text) {
                DecodedFrame::Event(ServerEvent::SessionCreated { session })
                    if pending_config.is_some() =>
                {
                    debug!(session_id = ?session.id, "Session created, pushing configuration");
                    session_id = session.id;
                    if let Some(config) = pending_config.take() {
                        channels
                            .outbound
                            .send(OutboundFrame::Event(ClientEvent::SessionUpdate {
                                session: config,
                            }))
                            .await
                            .map_err(|_| {
                                RealtimeError::ConnectionFailed(
                                    "Transport closed during handshake".to_string(),
                                )
                            })?;
                    }
                }
                DecodedFrame::Event(ServerEvent::SessionUpdated { session })
                    if pending_config.is_none() =>
                {
                    let session_id = session.id.or(session_id);
                    info!(
                        session_id = session_id.as_deref().unwrap_or("-"),
                        buffered = buffered.len(),
                        "Session ready"
                    );
                    return Ok(Handshake {
                        session_id,
                        buffered,
                    });
                }
                DecodedFrame::Event(ServerEvent::Error { error }) => {
                    warn!(code = ?error.code, message = %error.message, "Session rejected");
                    return Err(RealtimeError::HandshakeFailed(error.message));
                }
                _ => buffered.push(InboundFrame::Text(text)),
            }
        }
    };

    tokio::time::timeout(timeout, exchange)
        .await
        .map_err(|_| RealtimeError::NegotiationTimeout(timeout.as_millis() as u64))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::realtime::TurnDetectionConfig;
    use crate::core::realtime::ToolDefinition;
    use crate::core::realtime::credential::EphemeralCredential;
    use crate::core::realtime::transport::{MemoryTransport, RealtimeTransport};
    use serde_json::json;

    async fn open_memory() -> (TransportChannels, crate::core::realtime::transport::MemoryServer) {
        let (mut transport, server) = MemoryTransport::new();
        let config = EngineConfig::default();
        let channels = transport
            .open(&EphemeralCredential::new("ek", None), &config.endpoint())
            .await
            .unwrap();
        (channels, server)
    }

    #[test]
    fn test_compose_instructions() {
        assert_eq!(compose_instructions("Be brief.", None), "Be brief.");
        assert_eq!(compose_instructions("Be brief.", Some("  ")), "Be brief.");
        let composed = compose_instructions("Be brief.\n", Some("Japanese"));
        assert!(composed.starts_with("Be brief.\n\n"));
        assert!(composed.contains("Always reply in Japanese"));
    }

    #[test]
    fn test_build_session_config() {
        let mut config = EngineConfig::default();
        config.language = Some("fr".to_string());
        config.tools = vec![ToolDefinition {
            name: "get_weather".to_string(),
            description: None,
            parameters: None,
        }];

        let value = serde_json::to_value(build_session_config(&config)).unwrap();
        assert_eq!(value["type"], "realtime");
        assert_eq!(value["audio"]["input"]["format"], json!({"type": "audio/pcm", "rate": 24000}));
        assert_eq!(value["audio"]["input"]["transcription"]["language"], "fr");
        assert_eq!(value["audio"]["input"]["turn_detection"]["type"], "server_vad");
        assert_eq!(value["audio"]["output"]["voice"], "alloy");
        assert_eq!(value["tools"][0]["type"], "function");
        assert_eq!(value["tool_choice"], "auto");
        assert!(value["instructions"].as_str().unwrap().contains("Always reply in fr"));
    }

    #[test]
    fn test_disabled_turn_detection_serializes_null() {
        let mut config = EngineConfig::default();
        config.turn_detection = None;
        config.transcription_model = None;
        let value = serde_json::to_value(build_session_config(&config)).unwrap();
        assert!(value["audio"]["input"]["turn_detection"].is_null());
        assert!(value["audio"]["input"].get("turn_detection").is_some());
        assert!(value["audio"]["input"].get("transcription").is_none());
        assert!(value.get("tools").is_none());
    }

    #[test]
    fn test_language_patch_only_carries_instructions() {
        let config = EngineConfig::default();
        let value = serde_json::to_value(language_patch(&config.instructions, "German")).unwrap();
        assert_eq!(value["type"], "session.update");
        let session = value["session"].as_object().unwrap();
        assert_eq!(session.len(), 2);
        assert!(session["instructions"].as_str().unwrap().contains("German"));
    }

    #[tokio::test]
    async fn test_handshake_buffers_early_frames() {
        let (mut channels, mut server) = open_memory().await;

        let server_task = tokio::spawn(async move {
            server
                .send_event(json!({"type": "rate_limits.updated", "rate_limits": []}))
                .await;
            let pushed = server.complete_handshake().await;
            (server, pushed)
        });

        let mut config = EngineConfig::default();
        config.turn_detection = Some(TurnDetectionConfig::default());
        let handshake = perform_handshake(
            &mut channels,
            build_session_config(&config),
            Duration::from_secs(1),
        )
        .await
        .unwrap();

        let (_server, pushed) = server_task.await.unwrap();
        assert!(pushed.unwrap().audio.is_some());
        assert_eq!(handshake.session_id.as_deref(), Some("sess_memory"));
        assert_eq!(handshake.buffered.len(), 1);
    }

    #[tokio::test]
    async fn test_handshake_rejected() {
        let (mut channels, server) = open_memory().await;
        server
            .send_event(json!({
                "type": "error",
                "error": {"type": "invalid_request_error", "message": "bad voice"}
            }))
            .await;

        let err = perform_handshake(&mut channels, SessionConfig::patch(), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, RealtimeError::HandshakeFailed(ref m) if m == "bad voice"));
    }

    #[tokio::test]
    async fn test_handshake_closed() {
        let (mut channels, server) = open_memory().await;
        server.close(Some("going away")).await;
        let err = perform_handshake(&mut channels, SessionConfig::patch(), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, RealtimeError::ConnectionFailed(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_handshake_times_out() {
        let (mut channels, _server) = open_memory().await;
        let err = perform_handshake(
            &mut channels,
            SessionConfig::patch(),
            Duration::from_millis(500),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, RealtimeError::NegotiationTimeout(500)));
    }
}
