//! In-process transport.
//!
//! [`MemoryTransport`] plays the client side; the paired [`MemoryServer`]
//! plays the model service. Used by the replay command and by tests to
//! drive whole conversations without a network.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

use super::{
    InboundFrame, OutboundFrame, RealtimeTransport, TRANSPORT_CHANNEL_CAPACITY,
    TransportChannels, TransportEndpoint,
};
use crate::core::realtime::base::{RealtimeError, RealtimeResult, TransportKind};
use crate::core::realtime::credential::EphemeralCredential;
use crate::core::realtime::messages::{ClientEvent, SessionConfig};

#[derive(Debug, Default)]
struct OpenRecord {
    secret: Option<String>,
    endpoint: Option<TransportEndpoint>,
    closes: usize,
}

pub struct MemoryTransport {
    kind: TransportKind,
    channels: Option<TransportChannels>,
    record: Arc<Mutex<OpenRecord>>,
}

impl MemoryTransport {
    /// Create a connected transport and server pair.
    pub fn new() -> (Self, MemoryServer) {
        let (out_tx, out_rx) = mpsc::channel(TRANSPORT_CHANNEL_CAPACITY);
        let (in_tx, in_rx) = mpsc::channel(TRANSPORT_CHANNEL_CAPACITY);
        let record = Arc::new(Mutex::new(OpenRecord::default()));
        (
            Self {
                kind: TransportKind::Socket,
                channels: Some(TransportChannels {
                    outbound: out_tx,
                    inbound: in_rx,
                }),
                record: Arc::clone(&record),
            },
            MemoryServer {
                inbound: in_tx,
                outbound: out_rx,
                record,
            },
        )
    }

    /// Behave like the given strategy, e.g. `Peer` to exercise output buffer clears.
    pub fn with_kind(mut self, kind: TransportKind) -> Self {
        self.kind = kind;
        self
    }
}

#[async_trait]
impl RealtimeTransport for MemoryTransport {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    async fn open(
        &mut self,
        credential: &EphemeralCredential,
        endpoint: &TransportEndpoint,
    ) -> RealtimeResult<TransportChannels> {
        let channels = self.channels.take().ok_or_else(|| {
            RealtimeError::TransportUnavailable("memory transport already used".to_string())
        })?;
        let mut record = self.record.lock();
        record.secret = Some(credential.secret().to_string());
        record.endpoint = Some(endpoint.clone());
        debug!(model = %endpoint.model, "Memory transport opened");
        Ok(channels)
    }

    async fn close(&mut self) {
        self.record.lock().closes += 1;
    }
}

/// Server side of a [`MemoryTransport`].
pub struct MemoryServer {
    inbound: mpsc::Sender<InboundFrame>,
    outbound: mpsc::Receiver<OutboundFrame>,
    record: Arc<Mutex<OpenRecord>>,
}

impl MemoryServer {
    /// Send a JSON event to the client.
    pub async fn send_event(&self, event: serde_json::Value) -> bool {
        self.send_text(event.to_string()).await
    }

    /// Send a raw text frame, which need not be valid JSON.
    pub async fn send_text(&self, text: impl Into<String>) -> bool {
        self.inbound
            .send(InboundFrame::Text(text.into()))
            .await
            .is_ok()
    }

    /// Send assistant audio as if it arrived on a media track.
    pub async fn send_audio(&self, pcm: Bytes) -> bool {
        self.inbound.send(InboundFrame::Audio(pcm)).await.is_ok()
    }

    /// Simulate the connection dropping.
    pub async fn close(&self, reason: Option<&str>) -> bool {
        self.inbound
            .send(InboundFrame::Closed(reason.map(str::to_string)))
            .await
            .is_ok()
    }

    /// Next frame from the client, audio included.
    pub async fn recv(&mut self) -> Option<OutboundFrame> {
        self.outbound.recv().await
    }

    /// Next event from the client, skipping microphone audio.
    pub async fn recv_event(&mut self) -> Option<ClientEvent> {
        loop {
            match self.outbound.recv().await? {
                OutboundFrame::Event(event) => return Some(event),
                OutboundFrame::Audio(_) => continue,
            }
        }
    }

    /// Events already queued by the client, skipping audio. Does not wait.
    pub fn drain_events(&mut self) -> Vec<ClientEvent> {
        let mut events = Vec::new();
        while let Ok(frame) = self.outbound.try_recv() {
            if let OutboundFrame::Event(event) = frame {
                events.push(event);
            }
        }
        events
    }

    /// Run the service side of the handshake: announce the session, wait for
    /// the configuration push and acknowledge it.
    pub async fn complete_handshake(&mut self) -> Option<SessionConfig> {
        self.send_event(serde_json::json!({
            "type": "session.created",
            "event_id": "evt_srv_created",
            "session": { "id": "sess_memory", "model": "gpt-realtime" }
        }))
        .await;

        let config = loop {
            if let ClientEvent::SessionUpdate { session } = self.recv_event().await? {
                break session;
            }
        };

        self.send_event(serde_json::json!({
            "type": "session.updated",
            "event_id": "evt_srv_updated",
            "session": { "id": "sess_memory" }
        }))
        .await;
        Some(config)
    }

    /// Credential secret the client opened with.
    pub fn opened_with(&self) -> Option<String> {
        self.record.lock().secret.clone()
    }

    pub fn endpoint(&self) -> Option<TransportEndpoint> {
        self.record.lock().endpoint.clone()
    }

    /// How many times the client closed the transport.
    pub fn close_count(&self) -> usize {
        self.record.lock().closes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint() -> TransportEndpoint {
        TransportEndpoint {
            websocket_url: "wss://example.invalid".to_string(),
            calls_url: "https://example.invalid/calls".to_string(),
            model: "gpt-realtime".to_string(),
        }
    }

    #[tokio::test]
    async fn test_channels_are_handed_out_once() {
        let (mut transport, server) = MemoryTransport::new();
        let credential = EphemeralCredential::new("ek_mem", None);

        let channels = transport.open(&credential, &endpoint()).await.unwrap();
        assert_eq!(server.opened_with().as_deref(), Some("ek_mem"));
        assert!(transport.open(&credential, &endpoint()).await.is_err());

        transport.close().await;
        assert_eq!(server.close_count(), 1);
        drop(channels);
    }

    #[tokio::test]
    async fn test_frames_flow_both_ways() {
        let (mut transport, mut server) = MemoryTransport::new();
        let credential = EphemeralCredential::new("ek", None);
        let mut channels = transport.open(&credential, &endpoint()).await.unwrap();

        channels
            .outbound
            .send(OutboundFrame::Audio(Bytes::from_static(&[0, 0])))
            .await
            .unwrap();
        channels
            .outbound
            .send(OutboundFrame::Event(ClientEvent::InputAudioBufferCommit))
            .await
            .unwrap();
        assert_eq!(server.recv_event().await, Some(ClientEvent::InputAudioBufferCommit));

        server.send_text("not json").await;
        assert_eq!(
            channels.inbound.recv().await,
            Some(InboundFrame::Text("not json".to_string()))
        );
        server.close(Some("bye")).await;
        assert_eq!(
            channels.inbound.recv().await,
            Some(InboundFrame::Closed(Some("bye".to_string())))
        );
    }

    #[test]
    fn test_with_kind() {
        let (transport, _server) = MemoryTransport::new();
        assert!(!transport.supports_output_buffer_clear());
        let transport = transport.with_kind(TransportKind::Peer);
        assert!(transport.supports_output_buffer_clear());
    }
}
