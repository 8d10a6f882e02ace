//! WebSocket transport implementation.
//!
//! One reader task per connection decodes frames and dispatches them in
//! arrival order; one writer task drains the outbound queue. Requests from
//! callers never wait on the socket, they are queued for the writer.

use async_trait::async_trait;
use beacon_protocol::codec::{self, Encoding};
use beacon_protocol::{is_compatible, Credential, Frame};
use bytes::BytesMut;
use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Error as WsError, Message},
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info, trace, warn};

use crate::dispatch::Dispatcher;
use crate::traits::{
    ConnectionState, LifecycleEvent, RawEvent, Transport, TransportConfig, TransportError,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

enum Outbound {
    Message(Message),
    Close,
}

/// Result of decoding one WebSocket message.
enum Inbound {
    Frames(Vec<Frame>),
    Closed,
}

/// State shared between the handle and its connection tasks.
struct Shared {
    state: Mutex<ConnectionState>,
    session_id: RwLock<Option<String>>,
    outbound: Mutex<Option<mpsc::UnboundedSender<Outbound>>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    has_connected: AtomicBool,
    /// Bumped on every connect and disconnect so a finishing reader can tell
    /// whether it still owns the session.
    generation: AtomicU64,
}

impl Shared {
    fn new() -> Self {
        Self {
            state: Mutex::new(ConnectionState::Disconnected),
            session_id: RwLock::new(None),
            outbound: Mutex::new(None),
            reader: Mutex::new(None),
            has_connected: AtomicBool::new(false),
            generation: AtomicU64::new(0),
        }
    }

    /// Drop the session and return the state it was in.
    fn teardown(&self) -> ConnectionState {
        let previous = std::mem::replace(&mut *self.state.lock(), ConnectionState::Disconnected);
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.session_id.write().take();
        if let Some(tx) = self.outbound.lock().take() {
            let _ = tx.send(Outbound::Close);
        }
        previous
    }
}

/// WebSocket client transport.
pub struct WebSocketTransport {
    config: TransportConfig,
    dispatcher: Arc<Dispatcher>,
    shared: Arc<Shared>,
}

impl WebSocketTransport {
    /// Create a transport for `config.url`. Nothing is opened until
    /// [`Transport::connect`] is called.
    #[must_use]
    pub fn new(config: TransportConfig) -> Self {
        Self {
            config,
            dispatcher: Arc::new(Dispatcher::new()),
            shared: Arc::new(Shared::new()),
        }
    }

    /// The configuration this transport was built with.
    #[must_use]
    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    fn encoding(&self) -> Encoding {
        if self.config.compress {
            Encoding::MessagePack
        } else {
            Encoding::Json
        }
    }

    /// Open the socket and run the session handshake.
    async fn handshake(&self) -> Result<(WsStream, String, BytesMut), TransportError> {
        let (mut ws, _) = connect_async(self.config.url.as_str())
            .await
            .map_err(|e| TransportError::Handshake(e.to_string()))?;

        debug!(url = %self.config.url, "WebSocket opened, sending connect frame");

        let hello = encode_frame(&Frame::connect(self.config.key.clone()), self.encoding())?;
        ws.send(hello)
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;

        let mut buffer = BytesMut::new();
        loop {
            let message = match ws.next().await {
                Some(Ok(message)) => message,
                Some(Err(e)) => return Err(TransportError::ReceiveFailed(e.to_string())),
                None => return Err(TransportError::ConnectionClosed),
            };

            let frames = match decode_message(message, &mut buffer, self.config.max_message_size)? {
                Inbound::Frames(frames) => frames,
                Inbound::Closed => return Err(TransportError::ConnectionClosed),
            };

            for frame in frames {
                match frame {
                    Frame::Connected {
                        session_id,
                        version,
                        ..
                    } => {
                        if !is_compatible(version) {
                            return Err(TransportError::IncompatibleVersion(version));
                        }
                        return Ok((ws, session_id, buffer));
                    }
                    Frame::Error { code, message } => {
                        return Err(TransportError::Handshake(format!("{code}: {message}")));
                    }
                    other => debug!(kind = other.kind(), "Ignoring frame before handshake"),
                }
            }
        }
    }

    /// Install a completed session and spawn its tasks.
    fn start(&self, ws: WsStream, session_id: String, buffer: BytesMut) -> Result<(), TransportError> {
        let mut state = self.shared.state.lock();
        if *state != ConnectionState::Connecting {
            // disconnect() ran while the handshake was in flight
            debug!("Connect cancelled during handshake");
            return Err(TransportError::ConnectionClosed);
        }

        let (mut sink, stream) = ws.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<Outbound>();
        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;

        *self.shared.session_id.write() = Some(session_id.clone());
        *self.shared.outbound.lock() = Some(tx.clone());
        *state = ConnectionState::Connected;
        drop(state);

        tokio::spawn(async move {
            while let Some(outbound) = rx.recv().await {
                match outbound {
                    Outbound::Message(message) => {
                        if let Err(e) = sink.send(message).await {
                            warn!("Failed to send frame: {}", e);
                            break;
                        }
                    }
                    Outbound::Close => {
                        let _ = sink.close().await;
                        break;
                    }
                }
            }
        });

        let reader = Reader {
            dispatcher: Arc::clone(&self.dispatcher),
            shared: Arc::clone(&self.shared),
            outbound: tx,
            generation,
            encoding: self.encoding(),
            log: self.config.log,
            max_message_size: self.config.max_message_size,
        };
        let handle = tokio::spawn(reader.run(stream, buffer));
        if let Some(previous) = self.shared.reader.lock().replace(handle) {
            previous.abort();
        }

        let reconnect = self.shared.has_connected.swap(true, Ordering::SeqCst);
        info!(session = %session_id, url = %self.config.url, "Connected");

        self.dispatcher.dispatch_lifecycle(&LifecycleEvent::Connected {
            session_id: session_id.clone(),
        });
        if reconnect {
            self.dispatcher
                .dispatch_lifecycle(&LifecycleEvent::Reconnected { session_id });
        }
        Ok(())
    }

    fn fail(&self, error: &TransportError) {
        {
            let mut state = self.shared.state.lock();
            if *state == ConnectionState::Connecting {
                *state = ConnectionState::Disconnected;
            }
        }
        warn!(url = %self.config.url, "Connect failed: {}", error);
        self.dispatcher.dispatch_lifecycle(&LifecycleEvent::Error {
            message: error.to_string(),
        });
    }

    fn send(&self, frame: Frame) -> Result<(), TransportError> {
        let message = encode_frame(&frame, self.encoding())?;
        let outbound = self.shared.outbound.lock();
        let tx = outbound.as_ref().ok_or(TransportError::NotConnected)?;
        if self.config.log {
            debug!(kind = frame.kind(), "-> {:?}", frame);
        }
        tx.send(Outbound::Message(message))
            .map_err(|_| TransportError::ConnectionClosed)
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn connect(&self, timeout: Duration) -> Result<(), TransportError> {
        {
            let mut state = self.shared.state.lock();
            let current = *state;
            if current != ConnectionState::Disconnected {
                debug!(state = %current, "Connect ignored");
                return Ok(());
            }
            *state = ConnectionState::Connecting;
        }

        let result = match tokio::time::timeout(timeout, self.handshake()).await {
            Ok(Ok((ws, session_id, buffer))) => return self.start(ws, session_id, buffer),
            Ok(Err(e)) => e,
            Err(_) => TransportError::Timeout(timeout),
        };
        self.fail(&result);
        Err(result)
    }

    fn disconnect(&self) {
        let previous = self.shared.teardown();
        if let Some(reader) = self.shared.reader.lock().take() {
            reader.abort();
        }
        match previous {
            ConnectionState::Disconnected => return,
            // No session was announced, so there is nothing to report.
            ConnectionState::Connecting => {
                debug!(url = %self.config.url, "Connect cancelled");
                return;
            }
            ConnectionState::Connected => {}
        }
        info!(url = %self.config.url, "Disconnected");
        self.dispatcher.dispatch_lifecycle(&LifecycleEvent::Disconnected {
            reason: "client disconnect".into(),
        });
    }

    fn state(&self) -> ConnectionState {
        *self.shared.state.lock()
    }

    fn session_id(&self) -> Option<String> {
        self.shared.session_id.read().clone()
    }

    fn subscribe(
        &self,
        channel: &str,
        credential: Option<Credential>,
    ) -> Result<(), TransportError> {
        self.send(Frame::subscribe(channel, credential))
    }

    fn unsubscribe(&self, channel: &str) -> Result<(), TransportError> {
        self.send(Frame::unsubscribe(channel))
    }

    fn whisper(
        &self,
        channel: &str,
        event: &str,
        data: serde_json::Value,
    ) -> Result<(), TransportError> {
        self.send(Frame::whisper(channel, event, data))
    }

    fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    fn name(&self) -> &'static str {
        "websocket"
    }
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        self.shared.teardown();
        if let Some(reader) = self.shared.reader.lock().take() {
            reader.abort();
        }
    }
}

/// Per-connection inbound loop.
struct Reader {
    dispatcher: Arc<Dispatcher>,
    shared: Arc<Shared>,
    outbound: mpsc::UnboundedSender<Outbound>,
    generation: u64,
    encoding: Encoding,
    log: bool,
    max_message_size: usize,
}

impl Reader {
    fn is_current(&self) -> bool {
        self.shared.generation.load(Ordering::SeqCst) == self.generation
    }

    async fn run(self, mut stream: SplitStream<WsStream>, mut buffer: BytesMut) {
        // Binary frames that arrived together with the handshake response.
        match drain_frames(&mut buffer) {
            Ok(frames) => frames.into_iter().for_each(|frame| self.handle(frame)),
            Err(e) => warn!("Dropping undecodable handshake trailer: {}", e),
        }

        let reason = loop {
            let message = match stream.next().await {
                Some(Ok(message)) => message,
                Some(Err(WsError::ConnectionClosed)) | None => break "connection closed".to_string(),
                Some(Err(e)) => break format!("receive failed: {e}"),
            };
            if !self.is_current() {
                return;
            }

            match decode_message(message, &mut buffer, self.max_message_size) {
                Ok(Inbound::Frames(frames)) => {
                    for frame in frames {
                        self.handle(frame);
                    }
                }
                Ok(Inbound::Closed) => break "closed by server".to_string(),
                Err(e) => warn!("Dropping undecodable message: {}", e),
            }
        };

        // Only the reader of the live session may tear it down.
        if self.is_current() && self.shared.teardown() == ConnectionState::Connected {
            info!(reason = %reason, "Connection lost");
            self.dispatcher
                .dispatch_lifecycle(&LifecycleEvent::Disconnected { reason });
        }
    }

    fn handle(&self, frame: Frame) {
        if self.log {
            debug!(kind = frame.kind(), "<- {:?}", frame);
        }

        match frame {
            Frame::Event {
                channel,
                event,
                data,
            } => {
                self.dispatcher.dispatch(&RawEvent {
                    event,
                    channel,
                    data,
                });
            }
            Frame::Whisper {
                channel,
                event,
                data,
            } => {
                self.dispatcher.dispatch(&RawEvent::new(event, channel, data));
            }
            Frame::Presence {
                channel,
                action,
                members,
            } => {
                let data = match action {
                    beacon_protocol::PresenceAction::Here => serde_json::to_value(members),
                    _ => serde_json::to_value(members.into_iter().next()),
                }
                .unwrap_or(serde_json::Value::Null);
                self.dispatcher
                    .dispatch(&RawEvent::new(action.event_name(), channel, data));
            }
            Frame::Error { code, message } => {
                warn!(code, "Server error: {}", message);
                self.dispatcher.dispatch_lifecycle(&LifecycleEvent::Error {
                    message: format!("{code}: {message}"),
                });
            }
            Frame::Ping { timestamp } => {
                match encode_frame(&Frame::Pong { timestamp }, self.encoding) {
                    Ok(pong) => {
                        let _ = self.outbound.send(Outbound::Message(pong));
                    }
                    Err(e) => warn!("Failed to encode pong: {}", e),
                }
            }
            Frame::Pong { .. } => trace!("Pong received"),
            other => debug!(kind = other.kind(), "Ignoring unexpected frame"),
        }
    }
}

fn encode_frame(frame: &Frame, encoding: Encoding) -> Result<Message, TransportError> {
    Ok(match encoding {
        Encoding::Json => Message::Text(codec::encode_json(frame)?),
        Encoding::MessagePack => Message::Binary(codec::encode(frame)?.to_vec()),
    })
}

fn decode_message(
    message: Message,
    buffer: &mut BytesMut,
    max_message_size: usize,
) -> Result<Inbound, TransportError> {
    match message {
        Message::Text(text) => {
            check_size(text.len(), max_message_size)?;
            Ok(Inbound::Frames(vec![codec::decode_json(&text)?]))
        }
        Message::Binary(data) => {
            check_size(data.len(), max_message_size)?;
            buffer.extend_from_slice(&data);
            Ok(Inbound::Frames(drain_frames(buffer)?))
        }
        Message::Close(_) => Ok(Inbound::Closed),
        // tungstenite answers pings itself
        Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => Ok(Inbound::Frames(Vec::new())),
    }
}

/// Decode every complete frame at the front of `buffer`.
///
/// A bad length prefix or payload leaves the stream position unknown, so the
/// buffer is cleared and decoding resumes with the next message.
fn drain_frames(buffer: &mut BytesMut) -> Result<Vec<Frame>, TransportError> {
    let mut frames = Vec::new();
    loop {
        match codec::decode_from(buffer) {
            Ok(Some(frame)) => frames.push(frame),
            Ok(None) => return Ok(frames),
            Err(e) => {
                buffer.clear();
                return Err(e.into());
            }
        }
    }
}

fn check_size(len: usize, max: usize) -> Result<(), TransportError> {
    if len > max {
        warn!("Message too large: {} bytes (max: {})", len, max);
        return Err(TransportError::Protocol(
            beacon_protocol::ProtocolError::FrameTooLarge(len),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_encode_frame_follows_encoding() {
        let frame = Frame::unsubscribe("orders");
        assert!(matches!(
            encode_frame(&frame, Encoding::Json).unwrap(),
            Message::Text(_)
        ));
        assert!(matches!(
            encode_frame(&frame, Encoding::MessagePack).unwrap(),
            Message::Binary(_)
        ));
    }

    #[test]
    fn test_decode_binary_message_with_two_frames() {
        let first = Frame::event("orders", "Shipped", json!({"id": 1}));
        let second = Frame::event("orders", "Shipped", json!({"id": 2}));
        let mut wire = BytesMut::new();
        codec::encode_into(&first, &mut wire).unwrap();
        codec::encode_into(&second, &mut wire).unwrap();

        let mut buffer = BytesMut::new();
        match decode_message(Message::Binary(wire.to_vec()), &mut buffer, 64 * 1024).unwrap() {
            Inbound::Frames(frames) => assert_eq!(frames, vec![first, second]),
            Inbound::Closed => panic!("unexpected close"),
        }
    }

    #[test]
    fn test_bad_length_prefix_does_not_poison_later_messages() {
        let mut buffer = BytesMut::new();
        let bad = u32::MAX.to_be_bytes().to_vec();
        assert!(matches!(
            decode_message(Message::Binary(bad), &mut buffer, 64 * 1024),
            Err(TransportError::Protocol(_))
        ));
        assert!(buffer.is_empty());

        for id in 1..=3 {
            let frame = Frame::event("orders", "Shipped", json!({ "id": id }));
            let wire = codec::encode(&frame).unwrap().to_vec();
            match decode_message(Message::Binary(wire), &mut buffer, 64 * 1024).unwrap() {
                Inbound::Frames(frames) => assert_eq!(frames, vec![frame]),
                Inbound::Closed => panic!("unexpected close"),
            }
        }
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_decode_rejects_oversized_message() {
        let text = codec::encode_json(&Frame::event("orders", "Shipped", json!("x".repeat(64))))
            .unwrap();
        let mut buffer = BytesMut::new();
        assert!(matches!(
            decode_message(Message::Text(text), &mut buffer, 16),
            Err(TransportError::Protocol(_))
        ));
    }

    #[test]
    fn test_new_transport_is_disconnected() {
        let transport = WebSocketTransport::new(TransportConfig::new("ws://127.0.0.1:1"));
        assert_eq!(transport.state(), ConnectionState::Disconnected);
        assert_eq!(transport.session_id(), None);
        assert!(matches!(
            transport.subscribe("orders", None),
            Err(TransportError::NotConnected)
        ));
        // Disconnecting an idle transport is a no-op.
        transport.disconnect();
        assert_eq!(transport.name(), "websocket");
    }
}
