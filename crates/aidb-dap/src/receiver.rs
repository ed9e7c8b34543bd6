//! Background receive loop: one per transport.
//!
//! Reads frames and routes them: responses to their waiting caller by
//! `request_seq`, events to the ordered stream (then raw subscribers), and
//! reverse requests to the registered handler.

use crate::client::Router;
use crate::transport::{Incoming, Transport};
use crate::{Error, ProtocolMessage, Request, Response};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

enum Exit {
    Stopped,
    Closed(String),
    ClientDropped,
}

pub struct MessageReceiver {
    running: Arc<AtomicBool>,
    stopping: AtomicBool,
    shutdown: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl MessageReceiver {
    pub(crate) fn start(transport: Arc<dyn Transport>, router: Weak<Router>) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(receive_loop(
            transport,
            router,
            shutdown_rx,
            running.clone(),
        ));
        Self {
            running,
            stopping: AtomicBool::new(false),
            shutdown,
            task: Mutex::new(Some(task)),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Ask the loop to finish and wait up to `timeout` for it. Idempotent.
    pub async fn stop(&self, timeout: Duration) {
        if self.stopping.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shutdown.send_replace(true);

        let task = match self.task.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        let Some(mut task) = task else {
            return;
        };
        if tokio::time::timeout(timeout, &mut task).await.is_err() {
            warn!("Receive loop did not stop within {:?}, aborting", timeout);
            task.abort();
            self.running.store(false, Ordering::SeqCst);
        }
    }

    pub(crate) fn abort(&self) {
        let task = match self.task.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(task) = task {
            task.abort();
        }
        self.running.store(false, Ordering::SeqCst);
    }
}

async fn receive_loop(
    transport: Arc<dyn Transport>,
    router: Weak<Router>,
    mut shutdown: watch::Receiver<bool>,
    running: Arc<AtomicBool>,
) {
    debug!(endpoint = transport.endpoint(), "Receive loop started");

    let exit = loop {
        let incoming = tokio::select! {
            biased;
            _ = shutdown.wait_for(|stop| *stop) => break Exit::Stopped,
            incoming = transport.receive() => incoming,
        };
        let Some(router) = router.upgrade() else {
            break Exit::ClientDropped;
        };
        match incoming {
            Ok(Incoming::Message(message)) => dispatch(message, &router, &transport).await,
            Ok(Incoming::Malformed(e)) => warn!("Skipping malformed frame: {}", e),
            Ok(Incoming::Closed) => break Exit::Closed("adapter closed the connection".to_string()),
            Err(e) => break Exit::Closed(e.to_string()),
        }
    };

    if let Some(router) = router.upgrade() {
        match exit {
            Exit::Stopped => {
                let buffered = transport.drain_buffered().await;
                if !buffered.is_empty() {
                    debug!(count = buffered.len(), "Delivering buffered frames before stop");
                }
                for message in buffered {
                    dispatch(message, &router, &transport).await;
                }
                router
                    .close(|| Error::Cancelled("session stopping".to_string()))
                    .await;
            }
            Exit::Closed(reason) => {
                info!(endpoint = transport.endpoint(), "Adapter connection ended: {}", reason);
                router.close(|| Error::TransportClosed(reason.clone())).await;
            }
            Exit::ClientDropped => {}
        }
    }

    running.store(false, Ordering::SeqCst);
    debug!(endpoint = transport.endpoint(), "Receive loop finished");
}

async fn dispatch(message: ProtocolMessage, router: &Arc<Router>, transport: &Arc<dyn Transport>) {
    match message {
        ProtocolMessage::Response(response) => router.deliver_response(response).await,
        ProtocolMessage::Event(event) => router.deliver_event(event).await,
        ProtocolMessage::Request(request) => {
            // Handlers may issue their own requests; never block the loop on them
            let router = router.clone();
            let transport = transport.clone();
            tokio::spawn(async move {
                answer_reverse_request(request, &router, transport.as_ref()).await;
            });
        }
    }
}

async fn answer_reverse_request(request: Request, router: &Router, transport: &dyn Transport) {
    debug!(command = %request.command, seq = request.seq, "Reverse request");
    let seq = router.next_seq();
    let response = match router.reverse_handler().await {
        Some(handler) => match handler.handle(&request).await {
            Ok(body) => {
                let response = Response::success(seq, request.seq, &request.command);
                match body {
                    Some(body) => response.with_body(body),
                    None => response,
                }
            }
            Err(e) => Response::error(seq, request.seq, &request.command, e.to_string()),
        },
        None => Response::error(
            seq,
            request.seq,
            &request.command,
            Error::NotSupported(request.command.clone()).to_string(),
        ),
    };

    if let Err(e) = transport.send(&ProtocolMessage::Response(response)).await {
        warn!(command = %request.command, "Failed to answer reverse request: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use crate::client::{ClientConfig, DapClient, ReverseRequestHandler};
    use crate::framing::{encode, FrameDecoder};
    use crate::transport::{StreamTransport, Transport};
    use crate::{Error, Event, ProtocolMessage, Request, Result};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::io::{duplex, split, AsyncReadExt, AsyncWriteExt, DuplexStream};

    fn start() -> (DapClient, DuplexStream) {
        let (ours, theirs) = duplex(64 * 1024);
        let (r, w) = split(ours);
        let transport: Arc<dyn Transport> = Arc::new(StreamTransport::from_streams(r, w, "test"));
        (DapClient::start(transport, ClientConfig::default()), theirs)
    }

    async fn next_message(peer: &mut DuplexStream, decoder: &mut FrameDecoder) -> ProtocolMessage {
        loop {
            if let Some(frame) = decoder.next_frame() {
                return frame.unwrap();
            }
            let mut buf = [0u8; 4096];
            let n = peer.read(&mut buf).await.unwrap();
            assert!(n > 0);
            decoder.push(&buf[..n]);
        }
    }

    struct Echo;

    #[async_trait]
    impl ReverseRequestHandler for Echo {
        async fn handle(&self, request: &Request) -> Result<Option<serde_json::Value>> {
            match request.command.as_str() {
                "runInTerminal" => Ok(Some(json!({"processId": 4242}))),
                other => Err(Error::Protocol(format!("unsupported: {}", other))),
            }
        }
    }

    #[tokio::test]
    async fn test_reverse_request_without_handler_gets_error() {
        let (_client, mut peer) = start();
        let request = Request::new(7, "startDebugging").with_arguments(json!({}));
        peer.write_all(&encode(&ProtocolMessage::Request(request)).unwrap())
            .await
            .unwrap();

        let mut decoder = FrameDecoder::new();
        match next_message(&mut peer, &mut decoder).await {
            ProtocolMessage::Response(r) => {
                assert_eq!(r.request_seq, 7);
                assert!(!r.success);
                assert_eq!(r.message.as_deref(), Some("not supported: startDebugging"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_reverse_request_handler_answers() {
        let (client, mut peer) = start();
        client.set_reverse_handler(Arc::new(Echo)).await;
        let request = Request::new(3, "runInTerminal")
            .with_arguments(json!({"cwd": "/tmp", "args": ["python", "x.py"]}));
        peer.write_all(&encode(&ProtocolMessage::Request(request)).unwrap())
            .await
            .unwrap();

        let mut decoder = FrameDecoder::new();
        match next_message(&mut peer, &mut decoder).await {
            ProtocolMessage::Response(r) => {
                assert!(r.success);
                assert_eq!(r.body.unwrap()["processId"], 4242);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_terminated_event_does_not_end_loop() {
        let (client, mut peer) = start();
        let mut events = client.take_event_stream().await.unwrap();
        for (seq, name) in [(1, "terminated"), (2, "output")] {
            peer.write_all(&encode(&ProtocolMessage::Event(Event::new(seq, name))).unwrap())
                .await
                .unwrap();
        }
        assert_eq!(events.recv().await.unwrap().event, "terminated");
        assert_eq!(events.recv().await.unwrap().event, "output");
        assert!(client.is_alive());

        drop(peer);
        assert!(events.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let (client, _peer) = start();
        client.close(Duration::from_secs(1)).await;
        client.close(Duration::from_secs(1)).await;
        assert!(!client.is_alive());
    }
}
