//! Framed DAP transport over a TCP socket or a pre-connected stream pair
//! (adapter stdio, in-memory duplex in tests).

use crate::adapter::connection::{configure_tcp_socket, connect_with_retry};
use crate::framing::{encode, FrameDecoder};
use crate::{Error, ProtocolMessage, Result};
use aidb_config::SessionConfig;
use async_trait::async_trait;
use std::net::Ipv4Addr;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{watch, Mutex};
use tracing::{debug, trace, warn};

const READ_CHUNK_BYTES: usize = 8 * 1024;

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Disconnected,
    Connecting,
    Connected,
}

/// One result of [`Transport::receive`]
#[derive(Debug)]
pub enum Incoming {
    Message(ProtocolMessage),
    /// A frame that could not be decoded; already consumed
    Malformed(Error),
    /// EOF or local disconnect
    Closed,
}

/// Bidirectional framed channel to one debug adapter.
///
/// `receive` must be cancel-safe: dropping its future between frames or in
/// the middle of one never loses bytes.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self) -> Result<()>;

    /// Write one framed message. Concurrent sends are serialized.
    async fn send(&self, message: &ProtocolMessage) -> Result<()>;

    async fn receive(&self) -> Result<Incoming>;

    async fn disconnect(&self) -> Result<()>;

    fn state(&self) -> TransportState;

    /// Complete frames already read off the wire but not yet returned
    async fn drain_buffered(&self) -> Vec<ProtocolMessage>;

    fn endpoint(&self) -> &str;

    fn is_connected(&self) -> bool {
        self.state() == TransportState::Connected
    }
}

struct ReadSide {
    stream: Option<BoxedReader>,
    decoder: FrameDecoder,
}

struct TcpTarget {
    host: Ipv4Addr,
    port: u16,
    config: SessionConfig,
}

/// [`Transport`] over any `AsyncRead`/`AsyncWrite` pair
pub struct StreamTransport {
    endpoint: String,
    tcp: Option<TcpTarget>,
    reader: Mutex<ReadSide>,
    writer: Mutex<Option<BoxedWriter>>,
    state: watch::Sender<TransportState>,
}

impl StreamTransport {
    /// Wrap streams that are already connected (stdio pipes, duplex)
    pub fn from_streams<R, W>(reader: R, writer: W, endpoint: impl Into<String>) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (state, _) = watch::channel(TransportState::Connected);
        Self {
            endpoint: endpoint.into(),
            tcp: None,
            reader: Mutex::new(ReadSide {
                stream: Some(Box::new(reader)),
                decoder: FrameDecoder::new(),
            }),
            writer: Mutex::new(Some(Box::new(writer))),
            state,
        }
    }

    /// A TCP transport; nothing happens until [`Transport::connect`]
    pub fn tcp(host: Ipv4Addr, port: u16, config: SessionConfig) -> Self {
        let (state, _) = watch::channel(TransportState::Disconnected);
        Self {
            endpoint: format!("{}:{}", host, port),
            tcp: Some(TcpTarget { host, port, config }),
            reader: Mutex::new(ReadSide {
                stream: None,
                decoder: FrameDecoder::new(),
            }),
            writer: Mutex::new(None),
            state,
        }
    }

    pub fn subscribe_state(&self) -> watch::Receiver<TransportState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: TransportState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(endpoint = %self.endpoint, ?previous, ?state, "Transport state changed");
        }
    }
}

#[async_trait]
impl Transport for StreamTransport {
    async fn connect(&self) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }
        let Some(target) = &self.tcp else {
            return Err(Error::Communication(format!(
                "{}: stream transport cannot reconnect",
                self.endpoint
            )));
        };

        self.set_state(TransportState::Connecting);
        let stream = match connect_with_retry(target.host, target.port, &target.config).await {
            Ok(stream) => stream,
            Err(e) => {
                self.set_state(TransportState::Disconnected);
                return Err(e);
            }
        };
        configure_tcp_socket(&stream);
        let (read_half, write_half) = stream.into_split();

        {
            let mut reader = self.reader.lock().await;
            reader.stream = Some(Box::new(read_half));
            reader.decoder = FrameDecoder::new();
        }
        *self.writer.lock().await = Some(Box::new(write_half));
        self.set_state(TransportState::Connected);
        Ok(())
    }

    async fn send(&self, message: &ProtocolMessage) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }
        let frame = encode(message)?;

        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(Error::NotConnected)?;
        let written = async {
            writer.write_all(&frame).await?;
            writer.flush().await
        }
        .await;

        if let Err(e) = written {
            drop(guard);
            warn!(endpoint = %self.endpoint, "Write failed: {}", e);
            self.set_state(TransportState::Disconnected);
            return Err(Error::Communication(e.to_string()));
        }
        trace!("Sent {}", message.describe());
        Ok(())
    }

    async fn receive(&self) -> Result<Incoming> {
        let mut state_rx = self.state.subscribe();
        let mut side = self.reader.lock().await;
        let ReadSide { stream, decoder } = &mut *side;
        let mut chunk = [0u8; READ_CHUNK_BYTES];

        loop {
            if let Some(frame) = decoder.next_frame() {
                return Ok(match frame {
                    Ok(message) => Incoming::Message(message),
                    Err(e) => Incoming::Malformed(e),
                });
            }

            let Some(stream) = stream.as_mut() else {
                return Ok(Incoming::Closed);
            };

            let read = tokio::select! {
                read = stream.read(&mut chunk) => read,
                _ = state_rx.wait_for(|s| *s == TransportState::Disconnected) => {
                    return Ok(Incoming::Closed);
                }
            };

            match read {
                Ok(0) => {
                    if decoder.has_partial() {
                        debug!(
                            endpoint = %self.endpoint,
                            bytes = decoder.buffered_len(),
                            "EOF inside a frame, partial bytes dropped"
                        );
                    }
                    self.set_state(TransportState::Disconnected);
                    return Ok(Incoming::Closed);
                }
                Ok(n) => decoder.push(&chunk[..n]),
                Err(e) => {
                    self.set_state(TransportState::Disconnected);
                    return Err(Error::Communication(e.to_string()));
                }
            }
        }
    }

    async fn disconnect(&self) -> Result<()> {
        self.set_state(TransportState::Disconnected);
        if let Some(mut writer) = self.writer.lock().await.take() {
            if let Err(e) = writer.shutdown().await {
                debug!(endpoint = %self.endpoint, "Shutdown after disconnect: {}", e);
            }
        }
        // A receive in progress holds the read side; it sees the state
        // change and returns on its own.
        if let Ok(mut reader) = self.reader.try_lock() {
            reader.stream = None;
        }
        Ok(())
    }

    fn state(&self) -> TransportState {
        *self.state.borrow()
    }

    async fn drain_buffered(&self) -> Vec<ProtocolMessage> {
        let mut side = self.reader.lock().await;
        let mut messages = Vec::new();
        while let Some(frame) = side.decoder.next_frame() {
            match frame {
                Ok(message) => messages.push(message),
                Err(e) => debug!("Skipping malformed buffered frame: {}", e),
            }
        }
        messages
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Event, Request};
    use std::time::Duration;
    use tokio::io::{duplex, split};

    fn pair() -> (StreamTransport, tokio::io::DuplexStream) {
        let (ours, theirs) = duplex(64 * 1024);
        let (r, w) = split(ours);
        (StreamTransport::from_streams(r, w, "duplex"), theirs)
    }

    #[tokio::test]
    async fn test_send_writes_framed_message() {
        let (transport, mut peer) = pair();
        let msg = ProtocolMessage::Request(Request::new(1, "threads"));
        transport.send(&msg).await.unwrap();

        let expected = encode(&msg).unwrap();
        let mut buf = vec![0u8; expected.len()];
        peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, expected);
    }

    #[tokio::test]
    async fn test_cancelled_receive_keeps_partial_frame() {
        let (transport, mut peer) = pair();
        let frame = encode(&ProtocolMessage::Event(Event::new(1, "initialized"))).unwrap();
        let (head, tail) = frame.split_at(10);

        peer.write_all(head).await.unwrap();
        let cancelled = tokio::time::timeout(Duration::from_millis(50), transport.receive()).await;
        assert!(cancelled.is_err());

        peer.write_all(tail).await.unwrap();
        match transport.receive().await.unwrap() {
            Incoming::Message(m) => assert_eq!(m.describe(), "event:initialized"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_eof_reports_closed() {
        let (transport, peer) = pair();
        drop(peer);
        assert!(matches!(transport.receive().await.unwrap(), Incoming::Closed));
        assert_eq!(transport.state(), TransportState::Disconnected);
        let err = transport
            .send(&ProtocolMessage::Request(Request::new(1, "threads")))
            .await
            .unwrap_err();
        assert_eq!(err, Error::NotConnected);
    }

    #[tokio::test]
    async fn test_disconnect_unblocks_receive() {
        let (transport, _peer) = pair();
        let transport = std::sync::Arc::new(transport);
        let rx = {
            let t = transport.clone();
            tokio::spawn(async move { t.receive().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        transport.disconnect().await.unwrap();
        let result = tokio::time::timeout(Duration::from_secs(2), rx)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result.unwrap(), Incoming::Closed));
    }

    #[tokio::test]
    async fn test_malformed_frame_surfaced_then_next_message() {
        let (transport, mut peer) = pair();
        peer.write_all(b"Content-Length: 5\r\n\r\n{bad}").await.unwrap();
        peer.write_all(&encode(&ProtocolMessage::Event(Event::new(2, "stopped"))).unwrap())
            .await
            .unwrap();
        assert!(matches!(transport.receive().await.unwrap(), Incoming::Malformed(_)));
        assert!(matches!(transport.receive().await.unwrap(), Incoming::Message(_)));
    }

    #[tokio::test]
    async fn test_tcp_connect_and_exchange() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let transport =
            StreamTransport::tcp(aidb_config::LOCALHOST_IPV4, port, SessionConfig::default());
        assert_eq!(transport.state(), TransportState::Disconnected);

        let accept = tokio::spawn(async move { listener.accept().await.unwrap().0 });
        transport.connect().await.unwrap();
        let mut server = accept.await.unwrap();
        assert!(transport.is_connected());
        assert_eq!(transport.endpoint(), format!("127.0.0.1:{}", port));

        let frame = encode(&ProtocolMessage::Event(Event::new(1, "initialized"))).unwrap();
        server.write_all(&frame).await.unwrap();
        assert!(matches!(transport.receive().await.unwrap(), Incoming::Message(_)));
    }
}
