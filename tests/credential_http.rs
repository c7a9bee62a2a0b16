//! HTTP side of session setup against wiremock: credential minting and the
//! peer-connection SDP exchange.
//!
//! Run with: cargo test --test credential_http

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use wiremock::matchers::{body_partial_json, body_string, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use voyage_realtime::core::realtime::messages::ClientEvent;
use voyage_realtime::core::realtime::session::credential_session;
use voyage_realtime::core::realtime::transport::{
    PeerChannels, PeerConnection, PeerConnectionFactory,
};
use voyage_realtime::core::realtime::{InboundFrame, OutboundFrame, TransportEndpoint};
use voyage_realtime::{
    CredentialProvider, EngineConfig, EphemeralCredential, HttpCredentialProvider, PeerTransport,
    RealtimeError, RealtimeResult, RealtimeTransport, TransportKind,
};

const WAIT: Duration = Duration::from_secs(2);

// ============================================================================
// CREDENTIALS
// ============================================================================

#[tokio::test]
async fn test_mints_client_secret() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/realtime/client_secrets"))
        .and(header("authorization", "Bearer sk-test"))
        .and(body_partial_json(json!({"session": {"type": "realtime", "model": "gpt-realtime"}})))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"value": "ek_abc123", "expires_at": 1_900_000_000u64})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let config = EngineConfig::default();
    let provider = HttpCredentialProvider::new(
        &format!("{}/v1", server.uri()),
        "sk-test",
        credential_session(&config),
    )
    .unwrap();
    assert!(provider.endpoint().ends_with("/v1/realtime/client_secrets"));

    let credential = provider.fetch_ephemeral_credential().await.unwrap();
    assert_eq!(credential.secret(), "ek_abc123");
    assert_eq!(credential.expires_at(), Some(1_900_000_000));
}

#[tokio::test]
async fn test_accepts_legacy_session_shape() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/realtime/client_secrets"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "sess_legacy",
            "client_secret": {"value": "ek_legacy", "expires_at": 42}
        })))
        .mount(&server)
        .await;

    let provider =
        HttpCredentialProvider::new(&format!("{}/", server.uri()), "sk-test", json!({})).unwrap();
    let credential = provider.fetch_ephemeral_credential().await.unwrap();
    assert_eq!(credential.secret(), "ek_legacy");
    assert_eq!(credential.expires_at(), Some(42));
}

#[tokio::test]
async fn test_http_failure_carries_status_and_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/realtime/client_secrets"))
        .respond_with(
            ResponseTemplate::new(401).set_body_string(r#"{"error":{"message":"Incorrect API key"}}"#),
        )
        .mount(&server)
        .await;

    let provider = HttpCredentialProvider::new(&server.uri(), "sk-wrong", json!({})).unwrap();
    let err = provider.fetch_ephemeral_credential().await.unwrap_err();
    match err {
        RealtimeError::CredentialFetch { status, message } => {
            assert_eq!(status, 401);
            assert!(message.contains("Incorrect API key"));
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[tokio::test]
async fn test_unparseable_credential_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/realtime/client_secrets"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"unexpected": true})))
        .mount(&server)
        .await;

    let provider = HttpCredentialProvider::new(&server.uri(), "sk-test", json!({})).unwrap();
    let err = provider.fetch_ephemeral_credential().await.unwrap_err();
    assert!(matches!(err, RealtimeError::CredentialFetch { status: 200, .. }));
}

// ============================================================================
// PEER SDP EXCHANGE
// ============================================================================

const OFFER: &str = "v=0\r\no=- 1 1 IN IP4 127.0.0.1\r\ns=offer\r\n";
const ANSWER: &str = "v=0\r\no=- 2 2 IN IP4 127.0.0.1\r\ns=answer\r\n";

/// The far ends of the channels handed to the transport.
struct PeerEnds {
    events_in: mpsc::Receiver<String>,
    events_out: mpsc::Sender<String>,
    audio_in: mpsc::Receiver<Bytes>,
    audio_out: mpsc::Sender<Bytes>,
}

/// Peer stack that records the answer it was given and hands out
/// in-memory channels.
struct FakePeer {
    answer: Arc<Mutex<Option<String>>>,
    channels: Option<PeerChannels>,
}

#[async_trait]
impl PeerConnection for FakePeer {
    async fn create_offer(&mut self) -> RealtimeResult<String> {
        Ok(OFFER.to_string())
    }

    async fn apply_answer(&mut self, sdp: &str) -> RealtimeResult<()> {
        *self.answer.lock() = Some(sdp.to_string());
        Ok(())
    }

    async fn open_channels(&mut self) -> RealtimeResult<PeerChannels> {
        self.channels
            .take()
            .ok_or_else(|| RealtimeError::HandshakeFailed("channels already opened".to_string()))
    }

    async fn close(&mut self) {}
}

fn fake_factory() -> (PeerConnectionFactory, Arc<Mutex<Option<String>>>, PeerEnds) {
    let (events_tx, events_in) = mpsc::channel(16);
    let (events_out, events_rx) = mpsc::channel(16);
    let (audio_tx, audio_in) = mpsc::channel(16);
    let (audio_out, audio_rx) = mpsc::channel(16);

    let channels = Arc::new(Mutex::new(Some(PeerChannels {
        events_tx,
        events_rx,
        audio_tx,
        audio_rx,
    })));
    let answer = Arc::new(Mutex::new(None));

    let recorded = Arc::clone(&answer);
    let factory: PeerConnectionFactory = Arc::new(move || -> Box<dyn PeerConnection> {
        Box::new(FakePeer {
            answer: Arc::clone(&recorded),
            channels: channels.lock().take(),
        })
    });

    (
        factory,
        answer,
        PeerEnds {
            events_in,
            events_out,
            audio_in,
            audio_out,
        },
    )
}

fn endpoint(server: &MockServer) -> TransportEndpoint {
    TransportEndpoint {
        websocket_url: "wss://example.invalid/v1/realtime".to_string(),
        calls_url: format!("{}/v1/realtime/calls", server.uri()),
        model: "gpt-realtime".to_string(),
    }
}

#[tokio::test]
async fn test_peer_negotiates_and_bridges() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/realtime/calls"))
        .and(query_param("model", "gpt-realtime"))
        .and(header("authorization", "Bearer ek_peer"))
        .and(header("content-type", "application/sdp"))
        .and(body_string(OFFER))
        .respond_with(ResponseTemplate::new(201).set_body_string(ANSWER))
        .expect(1)
        .mount(&server)
        .await;

    let (factory, answer, mut ends) = fake_factory();
    let mut transport = PeerTransport::new(Some(factory)).unwrap();
    assert_eq!(transport.kind(), TransportKind::Peer);

    let mut channels = transport
        .open(&EphemeralCredential::new("ek_peer", None), &endpoint(&server))
        .await
        .unwrap();
    assert_eq!(answer.lock().as_deref(), Some(ANSWER));

    // Events go out as JSON on the data channel, audio on the track
    channels
        .outbound
        .send(OutboundFrame::Event(ClientEvent::InputAudioBufferClear))
        .await
        .unwrap();
    channels
        .outbound
        .send(OutboundFrame::Audio(Bytes::from_static(&[0, 1])))
        .await
        .unwrap();
    let sent = tokio::time::timeout(WAIT, ends.events_in.recv()).await.unwrap().unwrap();
    assert!(sent.contains("input_audio_buffer.clear"));
    let audio = tokio::time::timeout(WAIT, ends.audio_in.recv()).await.unwrap().unwrap();
    assert_eq!(audio.as_ref(), &[0, 1]);

    ends.events_out
        .send(json!({"type": "session.created"}).to_string())
        .await
        .unwrap();
    ends.audio_out.send(Bytes::from_static(&[9, 9])).await.unwrap();
    let first = tokio::time::timeout(WAIT, channels.inbound.recv()).await.unwrap().unwrap();
    assert!(matches!(first, InboundFrame::Text(ref t) if t.contains("session.created")));
    let second = tokio::time::timeout(WAIT, channels.inbound.recv()).await.unwrap().unwrap();
    assert_eq!(second, InboundFrame::Audio(Bytes::from_static(&[9, 9])));

    // Losing the data channel ends the session
    drop(ends.events_out);
    let closed = tokio::time::timeout(WAIT, channels.inbound.recv()).await.unwrap().unwrap();
    assert!(matches!(closed, InboundFrame::Closed(Some(_))));

    transport.close().await;
}

#[tokio::test]
async fn test_peer_sdp_rejection_fails_handshake() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/realtime/calls"))
        .respond_with(ResponseTemplate::new(400).set_body_string("invalid offer"))
        .mount(&server)
        .await;

    let (factory, answer, _ends) = fake_factory();
    let mut transport = PeerTransport::new(Some(factory)).unwrap();
    let err = transport
        .open(&EphemeralCredential::new("ek_peer", None), &endpoint(&server))
        .await
        .unwrap_err();

    match err {
        RealtimeError::HandshakeFailed(message) => {
            assert!(message.contains("400"));
            assert!(message.contains("invalid offer"));
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert!(answer.lock().is_none());
}
