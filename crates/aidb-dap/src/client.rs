//! DAP client: sequence numbers, request/response correlation and event
//! fan-out on top of a [`Transport`].
//!
//! Responses carry an event watermark. Every response is stamped with the
//! number of events the receiver had dispatched before it, so a caller can
//! wait until its consumer has applied everything the adapter said before
//! answering.

use crate::receiver::MessageReceiver;
use crate::transport::Transport;
use crate::{Error, Event, ProtocolMessage, Request, Response, Result};
use aidb_config::SessionConfig;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tracing::{debug, trace, warn};

/// Answers adapter-initiated requests (`runInTerminal`, `startDebugging`).
///
/// `Ok(body)` becomes a success response, `Err` a failure response carrying
/// the error text.
#[async_trait]
pub trait ReverseRequestHandler: Send + Sync {
    async fn handle(&self, request: &Request) -> Result<Option<serde_json::Value>>;
}

/// A response together with the number of events dispatched before it
#[derive(Debug, Clone)]
pub struct Delivered {
    pub response: Response,
    pub events_before: u64,
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub request_timeout: Duration,
    /// Capacity of the ordered event stream and of each raw subscription
    pub event_channel_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::from(&SessionConfig::default())
    }
}

impl From<&SessionConfig> for ClientConfig {
    fn from(config: &SessionConfig) -> Self {
        Self {
            request_timeout: config.request_timeout(),
            event_channel_capacity: config.event_channel_capacity,
        }
    }
}

struct PendingEntry {
    command: String,
    tx: oneshot::Sender<Result<Delivered>>,
}

/// Routing tables shared between the client and its receive loop.
///
/// The receiver only holds a `Weak` to this; dropping the client ends the
/// loop.
pub(crate) struct Router {
    next_seq: AtomicI64,
    pending: RwLock<HashMap<i64, PendingEntry>>,
    /// Ordered stream consumed by the session's event bridge
    events_tx: RwLock<Option<mpsc::Sender<Event>>>,
    /// Lossy raw subscriptions
    subscribers: RwLock<Vec<mpsc::Sender<Event>>>,
    events_dispatched: AtomicU64,
    reverse_handler: RwLock<Option<Arc<dyn ReverseRequestHandler>>>,
    closed: AtomicBool,
}

impl Router {
    fn new(events_tx: mpsc::Sender<Event>) -> Self {
        Self {
            next_seq: AtomicI64::new(1),
            pending: RwLock::new(HashMap::new()),
            events_tx: RwLock::new(Some(events_tx)),
            subscribers: RwLock::new(Vec::new()),
            events_dispatched: AtomicU64::new(0),
            reverse_handler: RwLock::new(None),
            closed: AtomicBool::new(false),
        }
    }

    pub(crate) fn next_seq(&self) -> i64 {
        self.next_seq.fetch_add(1, Ordering::SeqCst)
    }

    pub(crate) async fn reverse_handler(&self) -> Option<Arc<dyn ReverseRequestHandler>> {
        self.reverse_handler.read().await.clone()
    }

    async fn register(&self, seq: i64, command: &str) -> Result<oneshot::Receiver<Result<Delivered>>> {
        let (tx, rx) = oneshot::channel();
        let lock_start = Instant::now();
        let mut pending = self.pending.write().await;
        let waited_us = lock_start.elapsed().as_micros();
        if waited_us > 1000 {
            warn!(
                waited_us,
                pending_count = pending.len(),
                "Slow lock acquisition on pending requests"
            );
        }
        // Checked under the lock so a closing receiver cannot miss this entry
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::TransportClosed("client closed".to_string()));
        }
        pending.insert(
            seq,
            PendingEntry {
                command: command.to_string(),
                tx,
            },
        );
        Ok(rx)
    }

    async fn unregister(&self, seq: i64) {
        self.pending.write().await.remove(&seq);
    }

    pub(crate) async fn deliver_response(&self, response: Response) {
        let events_before = self.events_dispatched.load(Ordering::SeqCst);
        let entry = self.pending.write().await.remove(&response.request_seq);
        match entry {
            Some(entry) => {
                if entry.command != response.command {
                    debug!(
                        expected = %entry.command,
                        got = %response.command,
                        "Response command differs from request"
                    );
                }
                let delivered = Delivered {
                    response,
                    events_before,
                };
                if entry.tx.send(Ok(delivered)).is_err() {
                    debug!("Response arrived after the caller gave up");
                }
            }
            None => warn!(
                request_seq = response.request_seq,
                command = %response.command,
                "Response for unknown request"
            ),
        }
    }

    pub(crate) async fn deliver_event(&self, event: Event) {
        let primary = self.events_tx.read().await.clone();
        if let Some(tx) = primary {
            if tx.send(event.clone()).await.is_err() {
                trace!("Event stream consumer gone, {} not applied", event.event);
            }
        }
        self.events_dispatched.fetch_add(1, Ordering::SeqCst);

        let subscribers = self.subscribers.read().await;
        for tx in subscribers.iter() {
            if let Err(mpsc::error::TrySendError::Full(_)) = tx.try_send(event.clone()) {
                warn!("Event subscriber full, dropping {}", event.event);
            }
        }
    }

    /// Fail every pending request and refuse new ones
    pub(crate) async fn close(&self, reason: impl Fn() -> Error) {
        let mut pending = self.pending.write().await;
        self.closed.store(true, Ordering::SeqCst);
        let count = pending.len();
        for (_, entry) in pending.drain() {
            let _ = entry.tx.send(Err(reason()));
        }
        drop(pending);
        if count > 0 {
            debug!(count, "Failed outstanding requests: {}", reason());
        }

        self.events_tx.write().await.take();
        self.subscribers.write().await.clear();
    }
}

/// A request that has been written to the adapter but not yet answered
pub struct PendingRequest {
    seq: i64,
    command: String,
    rx: oneshot::Receiver<Result<Delivered>>,
    router: Arc<Router>,
    timeout: Duration,
}

impl PendingRequest {
    pub fn seq(&self) -> i64 {
        self.seq
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    /// Wait for the response. On timeout the pending entry is removed.
    pub async fn wait(self) -> Result<Delivered> {
        let started = Instant::now();
        match tokio::time::timeout(self.timeout, self.rx).await {
            Ok(Ok(result)) => {
                trace!(
                    command = %self.command,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "DAP request completed"
                );
                result
            }
            Ok(Err(_)) => Err(Error::TransportClosed(
                "response channel closed".to_string(),
            )),
            Err(_) => {
                self.router.unregister(self.seq).await;
                let timeout_ms = self.timeout.as_millis() as u64;
                warn!(command = %self.command, seq = self.seq, timeout_ms, "DAP request timed out");
                Err(Error::Timeout(timeout_ms))
            }
        }
    }
}

/// Client half of one adapter connection
pub struct DapClient {
    transport: Arc<dyn Transport>,
    router: Arc<Router>,
    receiver: MessageReceiver,
    config: ClientConfig,
    event_stream: Mutex<Option<mpsc::Receiver<Event>>>,
}

impl DapClient {
    /// Start the receive loop over `transport`
    pub fn start(transport: Arc<dyn Transport>, config: ClientConfig) -> Self {
        let (events_tx, events_rx) = mpsc::channel(config.event_channel_capacity);
        let router = Arc::new(Router::new(events_tx));
        let receiver = MessageReceiver::start(transport.clone(), Arc::downgrade(&router));
        Self {
            transport,
            router,
            receiver,
            config,
            event_stream: Mutex::new(Some(events_rx)),
        }
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn request_timeout(&self) -> Duration {
        self.config.request_timeout
    }

    /// Write a request and return a handle to await its response
    pub async fn start_request(
        &self,
        command: &str,
        arguments: Option<serde_json::Value>,
    ) -> Result<PendingRequest> {
        self.start_request_with_timeout(command, arguments, self.config.request_timeout)
            .await
    }

    pub async fn start_request_with_timeout(
        &self,
        command: &str,
        arguments: Option<serde_json::Value>,
        timeout: Duration,
    ) -> Result<PendingRequest> {
        let seq = self.router.next_seq();
        let rx = self.router.register(seq, command).await?;

        let request = Request {
            seq,
            command: command.to_string(),
            arguments,
        };
        if let Err(e) = self.transport.send(&ProtocolMessage::Request(request)).await {
            self.router.unregister(seq).await;
            return Err(e);
        }
        debug!(command, seq, "Sent DAP request");

        Ok(PendingRequest {
            seq,
            command: command.to_string(),
            rx,
            router: self.router.clone(),
            timeout,
        })
    }

    /// Send a request and wait for the response, with its event watermark
    #[tracing::instrument(skip(self, arguments), fields(seq))]
    pub async fn send_request_ordered(
        &self,
        command: &str,
        arguments: Option<serde_json::Value>,
    ) -> Result<Delivered> {
        let pending = self.start_request(command, arguments).await?;
        tracing::Span::current().record("seq", pending.seq());
        pending.wait().await
    }

    /// Send a request and wait for the response
    pub async fn send_request(
        &self,
        command: &str,
        arguments: Option<serde_json::Value>,
    ) -> Result<Response> {
        Ok(self.send_request_ordered(command, arguments).await?.response)
    }

    /// The ordered event stream. Only one consumer may take it.
    pub async fn take_event_stream(&self) -> Option<mpsc::Receiver<Event>> {
        self.event_stream.lock().await.take()
    }

    /// Raw event subscription. Events are dropped for this subscriber if
    /// it falls behind.
    pub async fn subscribe_events(&self) -> mpsc::Receiver<Event> {
        let (tx, rx) = mpsc::channel(self.config.event_channel_capacity);
        let mut subscribers = self.router.subscribers.write().await;
        subscribers.retain(|existing| !existing.is_closed());
        subscribers.push(tx);
        debug!(total = subscribers.len(), "Event subscriber registered");
        rx
    }

    pub async fn subscriber_count(&self) -> usize {
        self.router.subscribers.read().await.len()
    }

    /// Drop subscriptions whose receivers are gone
    pub async fn cleanup_dropped_subscribers(&self) -> usize {
        let mut subscribers = self.router.subscribers.write().await;
        let before = subscribers.len();
        subscribers.retain(|tx| !tx.is_closed());
        before - subscribers.len()
    }

    /// Drop pending entries whose callers abandoned the wait
    pub async fn cleanup_orphaned_requests(&self) -> usize {
        let mut pending = self.router.pending.write().await;
        let before = pending.len();
        pending.retain(|_, entry| !entry.tx.is_closed());
        let removed = before - pending.len();
        if removed > 0 {
            debug!(removed, "Cleaned up orphaned pending requests");
        }
        removed
    }

    pub async fn pending_request_count(&self) -> usize {
        self.router.pending.read().await.len()
    }

    /// Number of events handed to the ordered stream so far
    pub fn events_dispatched(&self) -> u64 {
        self.router.events_dispatched.load(Ordering::SeqCst)
    }

    pub async fn set_reverse_handler(&self, handler: Arc<dyn ReverseRequestHandler>) {
        *self.router.reverse_handler.write().await = Some(handler);
    }

    /// True while the receive loop is running
    pub fn is_alive(&self) -> bool {
        self.receiver.is_running()
    }

    /// Stop the receive loop and disconnect the transport.
    ///
    /// Frames already buffered are delivered first; requests still pending
    /// afterwards fail with `Cancelled`. Idempotent.
    pub async fn close(&self, timeout: Duration) {
        self.receiver.stop(timeout).await;
        self.router
            .close(|| Error::Cancelled("client closed".to_string()))
            .await;
        if let Err(e) = self.transport.disconnect().await {
            debug!("Transport disconnect: {}", e);
        }
    }
}

impl Drop for DapClient {
    fn drop(&mut self) {
        self.receiver.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framing::{encode, FrameDecoder};
    use crate::transport::StreamTransport;
    use serde_json::json;
    use tokio::io::{duplex, split, AsyncReadExt, AsyncWriteExt, DuplexStream};

    fn client_with_peer(timeout_ms: u64) -> (DapClient, DuplexStream) {
        let (ours, theirs) = duplex(64 * 1024);
        let (r, w) = split(ours);
        let transport: Arc<dyn Transport> = Arc::new(StreamTransport::from_streams(r, w, "test"));
        let config = ClientConfig {
            request_timeout: Duration::from_millis(timeout_ms),
            event_channel_capacity: 16,
        };
        (DapClient::start(transport, config), theirs)
    }

    async fn read_request(peer: &mut DuplexStream, decoder: &mut FrameDecoder) -> Request {
        loop {
            if let Some(frame) = decoder.next_frame() {
                match frame.unwrap() {
                    ProtocolMessage::Request(r) => return r,
                    other => panic!("expected request, got {:?}", other),
                }
            }
            let mut buf = [0u8; 4096];
            let n = peer.read(&mut buf).await.unwrap();
            assert!(n > 0, "client closed");
            decoder.push(&buf[..n]);
        }
    }

    async fn write(peer: &mut DuplexStream, message: ProtocolMessage) {
        peer.write_all(&encode(&message).unwrap()).await.unwrap();
    }

    #[tokio::test]
    async fn test_response_correlated_by_request_seq() {
        let (client, mut peer) = client_with_peer(2_000);
        let client = Arc::new(client);

        let a = tokio::spawn({
            let c = client.clone();
            async move { c.send_request("threads", None).await }
        });
        let b = tokio::spawn({
            let c = client.clone();
            async move { c.send_request("stackTrace", Some(json!({"threadId": 1}))).await }
        });

        let mut decoder = FrameDecoder::new();
        let first = read_request(&mut peer, &mut decoder).await;
        let second = read_request(&mut peer, &mut decoder).await;
        // Answer out of order
        for req in [&second, &first] {
            write(
                &mut peer,
                ProtocolMessage::Response(Response::success(100 + req.seq, req.seq, &req.command)),
            )
            .await;
        }

        assert_eq!(a.await.unwrap().unwrap().command, "threads");
        assert_eq!(b.await.unwrap().unwrap().command, "stackTrace");
        assert_eq!(client.pending_request_count().await, 0);
    }

    #[tokio::test]
    async fn test_timeout_removes_pending_entry() {
        let (client, _peer) = client_with_peer(50);
        let err = client.send_request("evaluate", None).await.unwrap_err();
        assert_eq!(err, Error::Timeout(50));
        assert_eq!(client.pending_request_count().await, 0);
    }

    #[tokio::test]
    async fn test_watermark_counts_events_before_response() {
        let (client, mut peer) = client_with_peer(2_000);
        let mut events = client.take_event_stream().await.unwrap();
        let mut decoder = FrameDecoder::new();

        let pending = client.start_request("continue", None).await.unwrap();
        let req = read_request(&mut peer, &mut decoder).await;
        write(&mut peer, ProtocolMessage::Event(Event::new(1, "continued"))).await;
        write(&mut peer, ProtocolMessage::Event(Event::new(2, "stopped"))).await;
        write(
            &mut peer,
            ProtocolMessage::Response(Response::success(3, req.seq, "continue")),
        )
        .await;

        let delivered = pending.wait().await.unwrap();
        assert_eq!(delivered.events_before, 2);
        assert_eq!(events.recv().await.unwrap().event, "continued");
        assert_eq!(events.recv().await.unwrap().event, "stopped");
    }

    #[tokio::test]
    async fn test_disconnect_fails_outstanding_request() {
        let (client, mut peer) = client_with_peer(30_000);
        let mut decoder = FrameDecoder::new();
        let pending = client
            .start_request("evaluate", Some(json!({"expression": "x"})))
            .await
            .unwrap();
        read_request(&mut peer, &mut decoder).await;
        drop(peer);

        let err = tokio::time::timeout(Duration::from_secs(2), pending.wait())
            .await
            .expect("request hung after disconnect")
            .unwrap_err();
        assert!(matches!(err, Error::TransportClosed(_)));

        // New requests fail fast too
        let err = client.send_request("threads", None).await.unwrap_err();
        assert!(matches!(err, Error::NotConnected | Error::TransportClosed(_)));
    }

    #[tokio::test]
    async fn test_close_cancels_pending() {
        let (client, _peer) = client_with_peer(30_000);
        let pending = client.start_request("threads", None).await.unwrap();
        client.close(Duration::from_secs(1)).await;
        let err = pending.wait().await.unwrap_err();
        assert!(matches!(err, Error::Cancelled(_)));
        assert!(!client.is_alive());
    }

    #[tokio::test]
    async fn test_subscribers_cleaned_up() {
        let (client, _peer) = client_with_peer(1_000);
        let first = client.subscribe_events().await;
        let _second = client.subscribe_events().await;
        drop(first);
        assert_eq!(client.cleanup_dropped_subscribers().await, 1);
        assert_eq!(client.subscriber_count().await, 1);
    }

    #[tokio::test]
    async fn test_orphaned_requests_cleaned_up() {
        let (client, _peer) = client_with_peer(30_000);
        let pending = client.start_request("threads", None).await.unwrap();
        drop(pending);
        assert_eq!(client.cleanup_orphaned_requests().await, 1);
        assert_eq!(client.pending_request_count().await, 0);
    }
}
