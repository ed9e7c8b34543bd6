//! Scripted DAP peer speaking real `Content-Length` framing over an
//! in-memory duplex stream.
//!
//! By default it behaves like debugpy: `launch` is only answered after
//! `configurationDone`, and the `initialized` event follows the launch
//! request. Every command has a canned reply that tests can override.

use aidb_dap::constants::{events, requests, stop_reasons};
use aidb_dap::framing::{encode, FrameDecoder};
use aidb_dap::{Capabilities, Event, ProtocolMessage, Request, Response};
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{split, AsyncReadExt, AsyncWriteExt, DuplexStream, WriteHalf};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, trace};

/// Thread every canned reply talks about
pub const MAIN_THREAD_ID: i64 = 1;
/// Variables reference of the canned locals scope
pub const LOCALS_REF: i64 = 100;
/// Variables reference of the canned globals scope
pub const GLOBALS_REF: i64 = 200;
/// Frame id of the canned top frame
pub const TOP_FRAME_ID: i64 = 1000;

/// How the mock answers one request
#[derive(Debug, Clone)]
pub enum Reply {
    Success(Option<Value>),
    Failure(String),
    /// Never answer
    Silent,
    /// Close the connection instead of answering
    Disconnect,
    /// Send these events, then the reply
    EventsBefore(Vec<(String, Option<Value>)>, Box<Reply>),
    /// Send the reply, then these events
    EventsAfter(Box<Reply>, Vec<(String, Option<Value>)>),
}

impl Reply {
    pub fn ok() -> Self {
        Self::Success(None)
    }

    pub fn body(body: Value) -> Self {
        Self::Success(Some(body))
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self::Failure(message.into())
    }

    /// A `stopped` event goes out before this reply
    pub fn after_stop(self, reason: &str) -> Self {
        Self::EventsBefore(vec![stopped_event(reason)], Box::new(self))
    }

    pub fn then_event(self, event: &str, body: Option<Value>) -> Self {
        Self::EventsAfter(Box::new(self), vec![(event.to_string(), body)])
    }
}

fn stopped_event(reason: &str) -> (String, Option<Value>) {
    (
        events::STOPPED.to_string(),
        Some(json!({
            "reason": reason,
            "threadId": MAIN_THREAD_ID,
            "allThreadsStopped": true
        })),
    )
}

/// Capabilities with every optional feature the engine uses turned on
pub fn full_capabilities() -> Capabilities {
    Capabilities {
        supports_configuration_done_request: Some(true),
        supports_conditional_breakpoints: Some(true),
        supports_hit_conditional_breakpoints: Some(true),
        supports_log_points: Some(true),
        supports_function_breakpoints: Some(true),
        supports_restart_request: Some(true),
        supports_terminate_request: Some(true),
        ..Capabilities::default()
    }
}

/// Script for one mock adapter
#[derive(Debug, Clone)]
pub struct MockAdapter {
    capabilities: Capabilities,
    stop_on_entry: bool,
    defer_launch: bool,
    once: HashMap<String, VecDeque<Reply>>,
    always: HashMap<String, Reply>,
}

impl Default for MockAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl MockAdapter {
    pub fn new() -> Self {
        Self {
            capabilities: full_capabilities(),
            stop_on_entry: false,
            defer_launch: true,
            once: HashMap::new(),
            always: HashMap::new(),
        }
    }

    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Emit `stopped(entry)` right after the handshake
    pub fn stop_on_entry(mut self) -> Self {
        self.stop_on_entry = true;
        self
    }

    /// Answer `launch`/`attach` at once, like js-debug and java-debug
    pub fn immediate_launch(mut self) -> Self {
        self.defer_launch = false;
        self
    }

    /// Use `reply` for every `command`
    pub fn on(mut self, command: &str, reply: Reply) -> Self {
        self.always.insert(command.to_string(), reply);
        self
    }

    /// Use `reply` for the next `command` only; queued replies go first
    pub fn once(mut self, command: &str, reply: Reply) -> Self {
        self.once.entry(command.to_string()).or_default().push_back(reply);
        self
    }

    /// Serve DAP on `stream` until it closes
    pub fn spawn(self, stream: DuplexStream) -> MockAdapterHandle {
        let requests = Arc::new(Mutex::new(Vec::new()));
        let (received_tx, received_rx) = watch::channel(0usize);
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let handle = MockAdapterHandle {
            requests: requests.clone(),
            received: received_rx,
            control: control_tx,
        };
        tokio::spawn(run(self, stream, requests, received_tx, control_rx));
        handle
    }

    fn scripted(&mut self, command: &str) -> Option<Reply> {
        if let Some(reply) = self.once.get_mut(command).and_then(|q| q.pop_front()) {
            return Some(reply);
        }
        self.always.get(command).cloned()
    }
}

enum Control {
    Event(String, Option<Value>),
    Reverse(String, Option<Value>, oneshot::Sender<Response>),
    Disconnect,
}

/// Test-side view of a running mock adapter
#[derive(Debug, Clone)]
pub struct MockAdapterHandle {
    requests: Arc<Mutex<Vec<Request>>>,
    received: watch::Receiver<usize>,
    control: mpsc::UnboundedSender<Control>,
}

impl MockAdapterHandle {
    /// Every request received so far, in arrival order
    pub fn requests(&self) -> Vec<Request> {
        lock(&self.requests).clone()
    }

    pub fn commands(&self) -> Vec<String> {
        lock(&self.requests).iter().map(|r| r.command.clone()).collect()
    }

    pub fn requests_for(&self, command: &str) -> Vec<Request> {
        lock(&self.requests)
            .iter()
            .filter(|r| r.command == command)
            .cloned()
            .collect()
    }

    pub fn count(&self, command: &str) -> usize {
        lock(&self.requests).iter().filter(|r| r.command == command).count()
    }

    /// First request with this command, waiting up to `timeout` for it
    pub async fn wait_for_request(&self, command: &str, timeout: Duration) -> Option<Request> {
        let mut rx = self.received.clone();
        let found = tokio::time::timeout(timeout, async {
            loop {
                if let Some(request) = self.requests_for(command).into_iter().next() {
                    return Some(request);
                }
                if rx.changed().await.is_err() {
                    return self.requests_for(command).into_iter().next();
                }
            }
        })
        .await;
        found.ok().flatten()
    }

    pub fn emit_event(&self, event: &str, body: Option<Value>) {
        let _ = self.control.send(Control::Event(event.to_string(), body));
    }

    pub fn emit_stopped(&self, reason: &str) {
        let (event, body) = stopped_event(reason);
        self.emit_event(&event, body);
    }

    /// Send an adapter-initiated request and wait for the client's answer
    pub async fn send_reverse_request(&self, command: &str, arguments: Option<Value>) -> Option<Response> {
        let (tx, rx) = oneshot::channel();
        self.control
            .send(Control::Reverse(command.to_string(), arguments, tx))
            .ok()?;
        tokio::time::timeout(Duration::from_secs(5), rx).await.ok()?.ok()
    }

    /// Drop the connection as if the adapter crashed
    pub fn disconnect(&self) {
        let _ = self.control.send(Control::Disconnect);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

enum Action {
    Event(String, Option<Value>),
    Respond(std::result::Result<Option<Value>, String>),
    Disconnect,
}

fn flatten(reply: Reply, out: &mut Vec<Action>) {
    match reply {
        Reply::Success(body) => out.push(Action::Respond(Ok(body))),
        Reply::Failure(message) => out.push(Action::Respond(Err(message))),
        Reply::Silent => {}
        Reply::Disconnect => out.push(Action::Disconnect),
        Reply::EventsBefore(events, inner) => {
            out.extend(events.into_iter().map(|(e, b)| Action::Event(e, b)));
            flatten(*inner, out);
        }
        Reply::EventsAfter(inner, events) => {
            flatten(*inner, out);
            out.extend(events.into_iter().map(|(e, b)| Action::Event(e, b)));
        }
    }
}

struct Wire {
    writer: WriteHalf<DuplexStream>,
    seq: i64,
}

impl Wire {
    fn next_seq(&mut self) -> i64 {
        self.seq += 1;
        self.seq
    }

    async fn write(&mut self, message: ProtocolMessage) -> bool {
        trace!(message = %message.describe(), "Mock adapter sending");
        match encode(&message) {
            Ok(frame) => self.writer.write_all(&frame).await.is_ok(),
            Err(_) => false,
        }
    }

    async fn event(&mut self, event: &str, body: Option<Value>) -> bool {
        let mut message = Event::new(self.next_seq(), event);
        message.body = body;
        self.write(ProtocolMessage::Event(message)).await
    }

    /// Carry out `actions` for `request`. False once the connection should close.
    async fn perform(&mut self, request: &Request, actions: Vec<Action>) -> bool {
        for action in actions {
            let open = match action {
                Action::Event(event, body) => self.event(&event, body).await,
                Action::Respond(Ok(body)) => {
                    let mut response = Response::success(self.next_seq(), request.seq, &request.command);
                    response.body = body;
                    self.write(ProtocolMessage::Response(response)).await
                }
                Action::Respond(Err(message)) => {
                    let response = Response::error(self.next_seq(), request.seq, &request.command, message);
                    self.write(ProtocolMessage::Response(response)).await
                }
                Action::Disconnect => false,
            };
            if !open {
                return false;
            }
        }
        true
    }
}

struct Peer {
    script: MockAdapter,
    wire: Wire,
    deferred_launch: Option<Request>,
    reverse: HashMap<i64, oneshot::Sender<Response>>,
    next_breakpoint_id: i64,
}

async fn run(
    script: MockAdapter,
    stream: DuplexStream,
    requests: Arc<Mutex<Vec<Request>>>,
    received: watch::Sender<usize>,
    mut control: mpsc::UnboundedReceiver<Control>,
) {
    let (mut reader, writer) = split(stream);
    let mut peer = Peer {
        script,
        wire: Wire { writer, seq: 0 },
        deferred_launch: None,
        reverse: HashMap::new(),
        next_breakpoint_id: 1,
    };
    let mut decoder = FrameDecoder::new();
    let mut buf = vec![0u8; 16 * 1024];

    'serve: loop {
        tokio::select! {
            read = reader.read(&mut buf) => {
                let n = match read {
                    Ok(0) | Err(_) => break 'serve,
                    Ok(n) => n,
                };
                decoder.push(&buf[..n]);
                while let Some(frame) = decoder.next_frame() {
                    let Ok(message) = frame else { continue };
                    match message {
                        ProtocolMessage::Request(request) => {
                            lock(&requests).push(request.clone());
                            received.send_modify(|count| *count += 1);
                            if !peer.handle(request).await {
                                break 'serve;
                            }
                        }
                        ProtocolMessage::Response(response) => {
                            if let Some(tx) = peer.reverse.remove(&response.request_seq) {
                                let _ = tx.send(response);
                            }
                        }
                        ProtocolMessage::Event(_) => {}
                    }
                }
            }
            command = control.recv() => {
                let open = match command {
                    Some(Control::Event(event, body)) => peer.wire.event(&event, body).await,
                    Some(Control::Reverse(command, arguments, tx)) => {
                        let seq = peer.wire.next_seq();
                        peer.reverse.insert(seq, tx);
                        let mut request = Request::new(seq, command);
                        request.arguments = arguments;
                        peer.wire.write(ProtocolMessage::Request(request)).await
                    }
                    Some(Control::Disconnect) | None => false,
                };
                if !open {
                    break 'serve;
                }
            }
        }
    }
    debug!("Mock adapter closed");
}

impl Peer {
    async fn handle(&mut self, request: Request) -> bool {
        let command = request.command.as_str();
        if let Some(reply) = self.script.scripted(command) {
            let mut actions = Vec::new();
            flatten(reply, &mut actions);
            return self.wire.perform(&request, actions).await;
        }

        match command {
            requests::LAUNCH | requests::ATTACH => {
                if self.script.defer_launch {
                    self.deferred_launch = Some(request);
                    self.wire.event(events::INITIALIZED, None).await
                } else {
                    let answered = self.wire.perform(&request, vec![Action::Respond(Ok(None))]).await;
                    answered && self.wire.event(events::INITIALIZED, None).await
                }
            }
            requests::CONFIGURATION_DONE => {
                let mut open = self.wire.perform(&request, vec![Action::Respond(Ok(None))]).await;
                if let Some(launch) = self.deferred_launch.take() {
                    open = open && self.wire.perform(&launch, vec![Action::Respond(Ok(None))]).await;
                }
                if self.script.stop_on_entry {
                    let (event, body) = stopped_event(stop_reasons::ENTRY);
                    open = open && self.wire.event(&event, body).await;
                }
                open
            }
            _ => {
                let reply = self.default_reply(&request);
                let mut actions = Vec::new();
                flatten(reply, &mut actions);
                self.wire.perform(&request, actions).await
            }
        }
    }

    fn default_reply(&mut self, request: &Request) -> Reply {
        let args = request.arguments.clone().unwrap_or(Value::Null);
        match request.command.as_str() {
            requests::INITIALIZE => match serde_json::to_value(&self.script.capabilities) {
                Ok(caps) => Reply::body(caps),
                Err(e) => Reply::fail(e.to_string()),
            },
            requests::SET_BREAKPOINTS => {
                let lines: Vec<i64> = args["breakpoints"]
                    .as_array()
                    .map(|bps| bps.iter().filter_map(|bp| bp["line"].as_i64()).collect())
                    .unwrap_or_default();
                let breakpoints: Vec<Value> = lines
                    .into_iter()
                    .map(|line| json!({"id": self.take_breakpoint_id(), "verified": true, "line": line}))
                    .collect();
                Reply::body(json!({ "breakpoints": breakpoints }))
            }
            requests::SET_FUNCTION_BREAKPOINTS => {
                let count = args["breakpoints"].as_array().map_or(0, |bps| bps.len());
                let breakpoints: Vec<Value> = (0..count)
                    .map(|_| json!({"id": self.take_breakpoint_id(), "verified": true}))
                    .collect();
                Reply::body(json!({ "breakpoints": breakpoints }))
            }
            requests::THREADS => Reply::body(json!({
                "threads": [{"id": MAIN_THREAD_ID, "name": "MainThread"}]
            })),
            requests::STACK_TRACE => Reply::body(json!({
                "stackFrames": [
                    {"id": TOP_FRAME_ID, "name": "compute", "source": {"path": "/app/main.py"}, "line": 12, "column": 1},
                    {"id": TOP_FRAME_ID + 1, "name": "<module>", "source": {"path": "/app/main.py"}, "line": 30, "column": 1}
                ],
                "totalFrames": 2
            })),
            requests::SCOPES => Reply::body(json!({
                "scopes": [
                    {"name": "Locals", "presentationHint": "locals", "variablesReference": LOCALS_REF, "expensive": false},
                    {"name": "Globals", "variablesReference": GLOBALS_REF, "expensive": false}
                ]
            })),
            requests::VARIABLES => {
                let variables = match args["variablesReference"].as_i64() {
                    Some(LOCALS_REF) => json!([
                        {"name": "x", "value": "1", "type": "int", "variablesReference": 0},
                        {"name": "items", "value": "[1, 2]", "type": "list", "variablesReference": 300}
                    ]),
                    Some(GLOBALS_REF) => json!([
                        {"name": "__name__", "value": "'__main__'", "type": "str", "variablesReference": 0}
                    ]),
                    _ => json!([]),
                };
                Reply::body(json!({ "variables": variables }))
            }
            requests::EVALUATE => {
                let expression = args["expression"].as_str().unwrap_or_default();
                Reply::body(json!({"result": expression, "type": "str", "variablesReference": 0}))
            }
            requests::CONTINUE => Reply::body(json!({"allThreadsContinued": true})),
            requests::NEXT | requests::STEP_IN | requests::STEP_OUT => {
                let (event, body) = stopped_event(stop_reasons::STEP);
                Reply::ok().then_event(&event, body)
            }
            requests::PAUSE => {
                let (event, body) = stopped_event(stop_reasons::PAUSE);
                Reply::ok().then_event(&event, body)
            }
            requests::RESTART | requests::DISCONNECT | requests::TERMINATE => Reply::ok(),
            other => Reply::fail(format!("unrecognized request '{}'", other)),
        }
    }

    fn take_breakpoint_id(&mut self) -> i64 {
        let id = self.next_breakpoint_id;
        self.next_breakpoint_id += 1;
        id
    }
}
