//! Transports carrying protocol events and audio.
//!
//! Each strategy implements [`RealtimeTransport`]. Opening a transport
//! yields a pair of channels; everything above this module speaks only in
//! [`OutboundFrame`]s and [`InboundFrame`]s and never sees a socket or a
//! peer connection.

mod memory;
mod peer;
mod websocket;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use super::base::{RealtimeResult, TransportKind};
use super::credential::EphemeralCredential;
use super::messages::ClientEvent;

pub use memory::{MemoryServer, MemoryTransport};
pub use peer::{PeerChannels, PeerConnection, PeerConnectionFactory, PeerTransport};
pub use websocket::WebSocketTransport;

/// Channel capacity between the engine and a transport pump.
pub(crate) const TRANSPORT_CHANNEL_CAPACITY: usize = 256;

/// Frames sent to the model.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundFrame {
    Event(ClientEvent),
    /// Microphone audio in wire format. The socket transport wraps it in
    /// `input_audio_buffer.append`; the peer transport writes it to the track.
    Audio(Bytes),
}

/// Frames received from the model.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    /// A JSON event
    Text(String),
    /// Assistant audio from a media track (peer transport)
    Audio(Bytes),
    /// The transport failed or the server closed it
    Closed(Option<String>),
}

/// Channels handed out by [`RealtimeTransport::open`].
#[derive(Debug)]
pub struct TransportChannels {
    pub outbound: mpsc::Sender<OutboundFrame>,
    pub inbound: mpsc::Receiver<InboundFrame>,
}

/// Where the realtime service lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportEndpoint {
    /// WebSocket URL, e.g. `wss://api.openai.com/v1/realtime`
    pub websocket_url: String,
    /// SDP exchange URL, e.g. `https://api.openai.com/v1/realtime/calls`
    pub calls_url: String,
    pub model: String,
}

/// One transport strategy.
///
/// The strategy is a construction-time capability: when it cannot run,
/// `open` fails with `TransportUnavailable` rather than falling back.
#[async_trait]
pub trait RealtimeTransport: Send {
    fn kind(&self) -> TransportKind;

    /// Whether the server keeps an output audio buffer that must be cleared on barge-in.
    fn supports_output_buffer_clear(&self) -> bool {
        self.kind() == TransportKind::Peer
    }

    /// Open the transport and start pumping frames.
    async fn open(
        &mut self,
        credential: &EphemeralCredential,
        endpoint: &TransportEndpoint,
    ) -> RealtimeResult<TransportChannels>;

    /// Stop pumping and release the connection. Safe to call when not open.
    async fn close(&mut self);
}

/// Append `model` as a query parameter.
pub(crate) fn with_model(base: &str, model: &str) -> RealtimeResult<url::Url> {
    let mut url = url::Url::parse(base).map_err(|e| {
        super::base::RealtimeError::InvalidConfiguration(format!("Invalid URL {}: {}", base, e))
    })?;
    url.query_pairs_mut().append_pair("model", model);
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_model() {
        let url = with_model("wss://api.openai.com/v1/realtime", "gpt-realtime").unwrap();
        assert_eq!(url.as_str(), "wss://api.openai.com/v1/realtime?model=gpt-realtime");
        assert!(with_model("not a url", "m").is_err());
    }
}
