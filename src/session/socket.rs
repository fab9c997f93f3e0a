//! Websocket-backed event socket.
//!
//! A reader task owns the websocket. Text frames are decoded through a
//! per-platform [`SocketCodec`] into [`RelayEvent`]s; liveness probes are
//! serviced on the same connection so a wedged socket fails its ack even
//! when the platform's REST API is healthy.

use crate::error::PlatformError;
use crate::session::traits::{EventSource, RelayEvent};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// What a decoded text frame turned out to be.
pub enum Decoded {
    Event(RelayEvent),
    /// Acknowledgment of an outstanding liveness probe.
    Ack,
    Ignore,
}

/// Per-platform wire codec for the event socket.
pub trait SocketCodec: Send + 'static {
    /// Payload for the next liveness probe.
    fn probe(&mut self) -> String;

    /// Decode one text frame.
    fn decode(&mut self, text: &str) -> Decoded;
}

pub(crate) enum SocketCommand {
    Probe { ack: oneshot::Sender<()> },
    Close,
}

/// Clonable handle issuing liveness probes on the socket.
#[derive(Clone)]
pub struct SocketPinger {
    commands: mpsc::Sender<SocketCommand>,
}

impl SocketPinger {
    pub(crate) fn new(commands: mpsc::Sender<SocketCommand>) -> Self {
        Self { commands }
    }

    /// Send one probe and wait for its ack. The caller bounds this with a
    /// timeout; an error means the socket is gone.
    pub async fn ping(&self) -> Result<(), PlatformError> {
        let (ack, acked) = oneshot::channel();
        self.commands
            .send(SocketCommand::Probe { ack })
            .await
            .map_err(|_| PlatformError::StreamClosed)?;
        acked.await.map_err(|_| PlatformError::StreamClosed)
    }
}

/// Event socket handle held by the session's listen loop.
pub struct EventSocket {
    events: Option<mpsc::Receiver<RelayEvent>>,
    commands: mpsc::Sender<SocketCommand>,
    reader: Option<JoinHandle<()>>,
}

impl EventSocket {
    /// Take ownership of a connected websocket and start its reader task.
    pub fn spawn(ws: WsStream, codec: impl SocketCodec, platform: &'static str) -> Self {
        let (event_tx, events) = mpsc::channel(256);
        let (commands, command_rx) = mpsc::channel(8);
        let reader = tokio::spawn(read_loop(ws, codec, platform, event_tx, command_rx));
        Self {
            events: Some(events),
            commands,
            reader: Some(reader),
        }
    }
}

impl EventSource for EventSocket {
    async fn next(&mut self) -> Result<RelayEvent, PlatformError> {
        match self.events.as_mut() {
            Some(events) => events.recv().await.ok_or(PlatformError::StreamClosed),
            None => Err(PlatformError::StreamClosed),
        }
    }

    fn pinger(&self) -> SocketPinger {
        SocketPinger::new(self.commands.clone())
    }

    async fn shutdown(&mut self) {
        // Dropping the receiver first unblocks a reader stuck forwarding
        // into a full event channel.
        self.events.take();
        let _ = self.commands.send(SocketCommand::Close).await;
        if let Some(reader) = self.reader.take() {
            let _ = reader.await;
        }
    }
}

async fn read_loop(
    mut ws: WsStream,
    mut codec: impl SocketCodec,
    platform: &'static str,
    events: mpsc::Sender<RelayEvent>,
    mut commands: mpsc::Receiver<SocketCommand>,
) {
    // At most one probe is ever outstanding (the heartbeat loop awaits each
    // ack before probing again).
    let mut pending_ack: Option<oneshot::Sender<()>> = None;
    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(SocketCommand::Probe { ack }) => {
                    let payload = codec.probe();
                    if let Err(error) = ws.send(WsMessage::text(payload)).await {
                        tracing::warn!(platform, %error, "failed to send liveness probe");
                        break;
                    }
                    pending_ack = Some(ack);
                }
                Some(SocketCommand::Close) | None => {
                    let _ = ws.close(None).await;
                    break;
                }
            },
            frame = ws.next() => match frame {
                Some(Ok(WsMessage::Text(text))) => match codec.decode(&text) {
                    Decoded::Event(event) => {
                        if events.send(event).await.is_err() {
                            break;
                        }
                    }
                    Decoded::Ack => {
                        if let Some(ack) = pending_ack.take() {
                            let _ = ack.send(());
                        }
                    }
                    Decoded::Ignore => {}
                },
                Some(Ok(WsMessage::Ping(payload))) => {
                    let _ = ws.send(WsMessage::Pong(payload)).await;
                }
                Some(Ok(WsMessage::Close(_))) | None => {
                    tracing::debug!(platform, "server closed event stream");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(error)) => {
                    tracing::warn!(platform, %error, "event stream read failed");
                    break;
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    /// Minimal line codec for the loopback server below.
    struct TestCodec;

    impl SocketCodec for TestCodec {
        fn probe(&mut self) -> String {
            "probe".to_string()
        }

        fn decode(&mut self, text: &str) -> Decoded {
            match text.strip_prefix("event:") {
                Some(body) => Decoded::Event(RelayEvent::Message {
                    channel_id: "C1".to_string(),
                    user_id: "U1".to_string(),
                    text: body.to_string(),
                }),
                None if text == "ack" => Decoded::Ack,
                None => Decoded::Ignore,
            }
        }
    }

    #[tokio::test]
    async fn delivers_events_and_acks_probes_over_a_live_socket() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.expect("accept");
            let mut ws = tokio_tungstenite::accept_async(stream).await.expect("handshake");
            ws.send(WsMessage::text("event:hello")).await.expect("send event");
            // Answer probes until the client closes.
            while let Some(Ok(frame)) = ws.next().await {
                match frame {
                    WsMessage::Text(_) => ws.send(WsMessage::text("ack")).await.expect("send ack"),
                    WsMessage::Close(_) => break,
                    _ => {}
                }
            }
        });

        let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}"))
            .await
            .expect("connect");
        let mut socket = EventSocket::spawn(ws, TestCodec, "test");

        let event = tokio::time::timeout(Duration::from_secs(5), socket.next())
            .await
            .expect("event in time")
            .expect("event");
        assert_eq!(
            event,
            RelayEvent::Message {
                channel_id: "C1".to_string(),
                user_id: "U1".to_string(),
                text: "hello".to_string(),
            }
        );

        let pinger = socket.pinger();
        tokio::time::timeout(Duration::from_secs(5), pinger.ping())
            .await
            .expect("ack in time")
            .expect("ack");

        socket.shutdown().await;
        let _ = tokio::time::timeout(Duration::from_secs(5), server).await;

        // The socket is gone; further probes must fail, not hang.
        let error = pinger.ping().await.expect_err("socket closed");
        assert!(matches!(error, PlatformError::StreamClosed));
    }
}
