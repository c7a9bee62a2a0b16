//! WebSocket transport: JSON events over one socket, audio base64-encoded
//! inside `input_audio_buffer.append` and `response.output_audio.delta`.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use http::HeaderValue;
use http::header::AUTHORIZATION;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{
    InboundFrame, OutboundFrame, RealtimeTransport, TRANSPORT_CHANNEL_CAPACITY,
    TransportChannels, TransportEndpoint, with_model,
};
use crate::core::realtime::base::{RealtimeError, RealtimeResult, TransportKind};
use crate::core::realtime::credential::EphemeralCredential;
use crate::core::realtime::messages::ClientEvent;

/// Socket transport. No reconnection: a dropped socket ends the session.
#[derive(Default)]
pub struct WebSocketTransport {
    cancel: Option<CancellationToken>,
    task: Option<JoinHandle<()>>,
}

impl WebSocketTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn encode(frame: OutboundFrame) -> RealtimeResult<String> {
        match frame {
            OutboundFrame::Event(event) => event.to_frame(),
            OutboundFrame::Audio(bytes) => ClientEvent::audio_append(&bytes).to_frame(),
        }
    }
}

#[async_trait]
impl RealtimeTransport for WebSocketTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Socket
    }

    async fn open(
        &mut self,
        credential: &EphemeralCredential,
        endpoint: &TransportEndpoint,
    ) -> RealtimeResult<TransportChannels> {
        self.close().await;

        let url = with_model(&endpoint.websocket_url, &endpoint.model)?;
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| RealtimeError::ConnectionFailed(e.to_string()))?;
        let bearer = HeaderValue::from_str(&credential.bearer())
            .map_err(|e| RealtimeError::InvalidConfiguration(format!("Invalid credential: {e}")))?;
        request.headers_mut().insert(AUTHORIZATION, bearer);

        let (ws_stream, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| RealtimeError::ConnectionFailed(e.to_string()))?;

        info!(url = %endpoint.websocket_url, model = %endpoint.model, "Realtime socket connected");

        let (mut ws_sink, mut ws_stream) = ws_stream.split();
        let (out_tx, mut out_rx) = mpsc::channel::<OutboundFrame>(TRANSPORT_CHANNEL_CAPACITY);
        let (in_tx, in_rx) = mpsc::channel::<InboundFrame>(TRANSPORT_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();

        let task = tokio::spawn(async move {
            let reason = loop {
                tokio::select! {
                    biased;

                    _ = task_cancel.cancelled() => {
                        let _ = ws_sink.send(Message::Close(None)).await;
                        debug!("Realtime socket closed locally");
                        return;
                    }

                    frame = out_rx.recv() => {
                        let Some(frame) = frame else {
                            let _ = ws_sink.send(Message::Close(None)).await;
                            return;
                        };
                        let json = match Self::encode(frame) {
                            Ok(json) => json,
                            Err(e) => {
                                error!("Failed to serialize event: {}", e);
                                continue;
                            }
                        };
                        if let Err(e) = ws_sink.send(Message::Text(json.into())).await {
                            error!("Failed to send WebSocket message: {}", e);
                            break Some(e.to_string());
                        }
                    }

                    msg = ws_stream.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                if in_tx.send(InboundFrame::Text(text.as_str().to_owned())).await.is_err() {
                                    return;
                                }
                            }
                            Some(Ok(Message::Ping(data))) => {
                                if let Err(e) = ws_sink.send(Message::Pong(data)).await {
                                    warn!("Failed to send pong: {}", e);
                                }
                            }
                            Some(Ok(Message::Close(frame))) => {
                                info!("WebSocket closed by server");
                                break frame.map(|f| f.reason.as_str().to_owned());
                            }
                            Some(Ok(Message::Binary(data))) => {
                                debug!(len = data.len(), "Ignoring binary frame");
                            }
                            Some(Ok(_)) => {}
                            Some(Err(e)) => {
                                error!("WebSocket error: {}", e);
                                break Some(e.to_string());
                            }
                            None => break None,
                        }
                    }
                }
            };
            let _ = in_tx.send(InboundFrame::Closed(reason)).await;
        });

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
    }
}
