//! Peer-connection transport.
//!
//! Events travel on a data channel named `oai-events`, audio on media
//! tracks. The SDP offer is exchanged over HTTP with the ephemeral
//! credential as bearer token. The media stack itself sits behind
//! [`PeerConnection`] so the transport can be built without one; without a
//! factory, `open` fails with `TransportUnavailable`.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{
    InboundFrame, OutboundFrame, RealtimeTransport, TRANSPORT_CHANNEL_CAPACITY,
    TransportChannels, TransportEndpoint, with_model,
};
use crate::core::realtime::base::{RealtimeError, RealtimeResult, TransportKind};
use crate::core::realtime::credential::EphemeralCredential;

/// Name of the data channel carrying JSON events.
pub const EVENTS_CHANNEL: &str = "oai-events";

/// Default budget for offer, SDP exchange and channel opening.
const DEFAULT_NEGOTIATION_TIMEOUT: Duration = Duration::from_secs(10);

/// Channels of an established peer connection.
#[derive(Debug)]
pub struct PeerChannels {
    /// JSON text written to the events data channel
    pub events_tx: mpsc::Sender<String>,
    /// JSON text read from the events data channel
    pub events_rx: mpsc::Receiver<String>,
    /// Wire-format PCM written to the outgoing audio track
    pub audio_tx: mpsc::Sender<Bytes>,
    /// Wire-format PCM decoded from the incoming audio track
    pub audio_rx: mpsc::Receiver<Bytes>,
}

/// A media stack able to negotiate one peer connection.
#[async_trait]
pub trait PeerConnection: Send {
    /// Create the events channel and audio track, gather ICE candidates
    /// completely and return the local SDP offer.
    async fn create_offer(&mut self) -> RealtimeResult<String>;

    async fn apply_answer(&mut self, sdp: &str) -> RealtimeResult<()>;

    /// Wait for the events channel to open and hand out the channels.
    async fn open_channels(&mut self) -> RealtimeResult<PeerChannels>;

    async fn close(&mut self);
}

/// Builds a fresh peer connection for each session.
pub type PeerConnectionFactory = Arc<dyn Fn() -> Box<dyn PeerConnection> + Send + Sync>;

pub struct PeerTransport {
    factory: Option<PeerConnectionFactory>,
    client: reqwest::Client,
    negotiation_timeout: Duration,
    connection: Option<Box<dyn PeerConnection>>,
    cancel: Option<CancellationToken>,
    task: Option<JoinHandle<()>>,
}

impl PeerTransport {
    pub fn new(factory: Option<PeerConnectionFactory>) -> RealtimeResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| {
                RealtimeError::InvalidConfiguration(format!("Failed to create HTTP client: {e}"))
            })?;
        Ok(Self {
            factory,
            client,
            negotiation_timeout: DEFAULT_NEGOTIATION_TIMEOUT,
            connection: None,
            cancel: None,
            task: None,
        })
    }

    pub fn with_negotiation_timeout(mut self, timeout: Duration) -> Self {
        self.negotiation_timeout = timeout;
        self
    }
}

/// POST the offer to the calls endpoint and return the SDP answer.
async fn exchange_sdp(
    client: &reqwest::Client,
    credential: &EphemeralCredential,
    endpoint: &TransportEndpoint,
    offer: String,
) -> RealtimeResult<String> {
    let url = with_model(&endpoint.calls_url, &endpoint.model)?;
    let response = client
        .post(url)
        .header(http::header::AUTHORIZATION, credential.bearer())
        .header(http::header::CONTENT_TYPE, "application/sdp")
        .body(offer)
        .send()
        .await
        .map_err(|e| RealtimeError::ConnectionFailed(format!("SDP exchange failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        return Err(RealtimeError::HandshakeFailed(format!(
            "SDP exchange rejected (HTTP {}): {}",
            status.as_u16(),
            body
        )));
    }

    response
        .text()
        .await
        .map_err(|e| RealtimeError::HandshakeFailed(format!("Failed to read SDP answer: {e}")))
}

async fn negotiate(
    client: &reqwest::Client,
    connection: &mut Box<dyn PeerConnection>,
    credential: &EphemeralCredential,
    endpoint: &TransportEndpoint,
) -> RealtimeResult<PeerChannels> {
    let offer = connection.create_offer().await?;
    debug!(offer_len = offer.len(), "Local SDP offer ready");
    let answer = exchange_sdp(client, credential, endpoint, offer).await?;
    connection.apply_answer(&answer).await?;
    connection.open_channels().await
}

/// Forward frames between the engine and the peer channels until either
/// side goes away.
async fn bridge(
    channels: PeerChannels,
    mut out_rx: mpsc::Receiver<OutboundFrame>,
    in_tx: mpsc::Sender<InboundFrame>,
    cancel: CancellationToken,
) {
    let PeerChannels {
        events_tx,
        mut events_rx,
        audio_tx,
        mut audio_rx,
    } = channels;

    let reason = loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => return,

            frame = out_rx.recv() => {
                match frame {
                    Some(OutboundFrame::Event(event)) => {
                        let json = match event.to_frame() {
                            Ok(json) => json,
                            Err(e) => {
                                error!("Failed to serialize event: {}", e);
                                continue;
                            }
                        };
                        if events_tx.send(json).await.is_err() {
                            break Some("events channel closed".to_string());
                        }
                    }
                    Some(OutboundFrame::Audio(bytes)) => {
                        if audio_tx.send(bytes).await.is_err() {
                            break Some("audio track closed".to_string());
                        }
                    }
                    None => return,
                }
            }

            text = events_rx.recv() => {
                let Some(text) = text else {
                    break Some("events channel closed".to_string());
                };
                if in_tx.send(InboundFrame::Text(text)).await.is_err() {
                    return;
                }
            }

            audio = audio_rx.recv() => {
                match audio {
                    Some(bytes) => {
                        if in_tx.send(InboundFrame::Audio(bytes)).await.is_err() {
                            return;
                        }
                    }
                    None => break Some("audio track closed".to_string()),
                }
            }
        }
    };

    warn!(reason = ?reason, "Peer connection lost");
    let _ = in_tx.send(InboundFrame::Closed(reason)).await;
}

#[async_trait]
impl RealtimeTransport for PeerTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Peer
    }

    async fn open(
        &mut self,
        credential: &EphemeralCredential,
        endpoint: &TransportEndpoint,
    ) -> RealtimeResult<TransportChannels> {
        self.close().await;

        let Some(factory) = self.factory.as_ref() else {
            return Err(RealtimeError::TransportUnavailable(
                "no peer connection stack configured".to_string(),
            ));
        };
        let mut connection = factory();

        let budget = self.negotiation_timeout;
        let negotiated = tokio::time::timeout(
            budget,
            negotiate(&self.client, &mut connection, credential, endpoint),
        )
        .await;
        let channels = match negotiated {
            Ok(Ok(channels)) => channels,
            Ok(Err(e)) => {
                connection.close().await;
                return Err(e);
            }
            Err(_) => {
                connection.close().await;
                return Err(RealtimeError::NegotiationTimeout(budget.as_millis() as u64));
            }
        };

        info!(model = %endpoint.model, channel = EVENTS_CHANNEL, "Peer connection established");

        let (out_tx, out_rx) = mpsc::channel::<OutboundFrame>(TRANSPORT_CHANNEL_CAPACITY);
        let (in_tx, in_rx) = mpsc::channel::<InboundFrame>(TRANSPORT_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(bridge(channels, out_rx, in_tx, cancel.clone()));

        self.connection = Some(connection);
        self.cancel = Some(cancel);
        self.task = Some(task);

        Ok(TransportChannels {
            outbound: out_tx,
            inbound: in_rx,
        })
    }

    async fn close(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        if let Some(mut connection) = self.connection.take() {
            connection.close().await;
            debug!("Peer connection closed");
        }
    }
}
