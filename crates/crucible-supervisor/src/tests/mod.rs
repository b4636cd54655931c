//! Shared test doubles for the supervisor crate.
//!
//! Everything here keeps tests in-memory: scripted launchers stand in
//! for real worker processes, with the test holding the feeding end of
//! the worker's event stream and a view of the bytes the channel wrote.


use std::collections::{HashMap, VecDeque};
use std::io::{self, Cursor, Read, Write};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::mpsc::{Receiver, Sender, channel};
use std::sync::{Arc, Mutex};

use crucible_proto::{
    FrameTag, ValidationEvent, ValidationOptions, ValidationRequest, ValidationTarget, read_frame,
    write_frame,
};

use crate::channel::{ChannelError, WorkerHandle, WorkerLauncher, WorkerLink};
use crate::listener::ValidationListener;
use crate::suite::TestSuite;

// ---------------------------------------------------------------------------
// Frame helpers
// ---------------------------------------------------------------------------

/// Encodes a request into the frame bytes a worker would read.
pub(crate) fn encode_request(request: &ValidationRequest) -> Vec<u8> {
    let payload = request.encode().expect("encode request");
    let mut bytes = Vec::new();
    write_frame(&mut bytes, FrameTag::Request, &payload).expect("write request frame");
    bytes
}

/// Encodes one event into frame bytes.
pub(crate) fn encode_event(event: &ValidationEvent) -> Vec<u8> {
    let (tag, payload) = event.encode().expect("encode event");
    let mut bytes = Vec::new();
    write_frame(&mut bytes, tag, &payload).expect("write event frame");
    bytes
}

/// Decodes every event frame in `bytes`, in order.
pub(crate) fn decode_events(bytes: &[u8]) -> Vec<ValidationEvent> {
    let mut cursor = Cursor::new(bytes);
    let mut events = Vec::new();
    while let Some((tag, payload)) = read_frame(&mut cursor).expect("read frame") {
        events.push(ValidationEvent::decode(tag, &payload).expect("decode event"));
    }
    events
}

// ---------------------------------------------------------------------------
// Suite double
// ---------------------------------------------------------------------------

/// A deterministic suite: logs one line per run and fails targets by
/// configured counts.
#[derive(Default)]
pub(crate) struct ScriptedSuite {
    failures_by_id: HashMap<String, u32>,
}

impl ScriptedSuite {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn failing(mut self, target_id: &str, failures: u32) -> Self {
        self.failures_by_id.insert(target_id.to_owned(), failures);
        self
    }
}

impl TestSuite for ScriptedSuite {
    fn run(
        &self,
        target: &ValidationTarget,
        _options: &ValidationOptions,
        log: &mut dyn FnMut(&str),
    ) -> u32 {
        let id = target.id();
        log(&format!("validating {id}"));
        self.failures_by_id.get(&id).copied().unwrap_or(0)
    }
}

// ---------------------------------------------------------------------------
// Listener double
// ---------------------------------------------------------------------------

/// A listener callback as observed by [`RecordingListener`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Recorded {
    Started(String),
    Log(String),
    ItemComplete(String, u32),
    AllComplete,
    ConnectionLost,
}

/// Records every callback it receives, in order.
#[derive(Default)]
pub(crate) struct RecordingListener {
    events: Mutex<Vec<Recorded>>,
}

impl RecordingListener {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn events(&self) -> Vec<Recorded> {
        self.events.lock().expect("lock").clone()
    }

    /// Events with log lines filtered out, for order assertions.
    pub(crate) fn milestones(&self) -> Vec<Recorded> {
        self.events()
            .into_iter()
            .filter(|event| !matches!(event, Recorded::Log(_)))
            .collect()
    }

    pub(crate) fn connection_lost_count(&self) -> usize {
        self.events()
            .iter()
            .filter(|event| matches!(event, Recorded::ConnectionLost))
            .count()
    }

    fn record(&self, event: Recorded) {
        self.events.lock().expect("lock").push(event);
    }
}

impl ValidationListener for RecordingListener {
    fn validation_started(&self, target_id: &str) {
        self.record(Recorded::Started(target_id.to_owned()));
    }

    fn log_message(&self, text: &str) {
        self.record(Recorded::Log(text.to_owned()));
    }

    fn item_complete(&self, target_id: &str, failure_count: u32) {
        self.record(Recorded::ItemComplete(target_id.to_owned(), failure_count));
    }

    fn all_items_complete(&self) {
        self.record(Recorded::AllComplete);
    }

    fn connection_lost(&self) {
        self.record(Recorded::ConnectionLost);
    }
}

// ---------------------------------------------------------------------------
// Launcher doubles
// ---------------------------------------------------------------------------

/// Blocking reader over chunks fed from the test. Returns EOF once every
/// sender is dropped, which is how a test simulates a worker crash.
struct FedReader {
    receiver: Receiver<Vec<u8>>,
    pending: Vec<u8>,
    offset: usize,
}

impl Read for FedReader {
    fn read(&mut self, buffer: &mut [u8]) -> io::Result<usize> {
        while self.offset >= self.pending.len() {
            match self.receiver.recv() {
                Ok(chunk) => {
                    self.pending = chunk;
                    self.offset = 0;
                }
                Err(_) => return Ok(0),
            }
        }
        let available = self.pending.len() - self.offset;
        let count = available.min(buffer.len());
        buffer[..count].copy_from_slice(&self.pending[self.offset..self.offset + count]);
        self.offset += count;
        Ok(count)
    }
}

/// Captures everything the channel writes to the "worker".
#[derive(Clone)]
struct SharedWriter(Arc<Mutex<Vec<u8>>>);

impl Write for SharedWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.0.lock().expect("lock").extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// A handle for a "worker" that is already gone.
struct NullHandle;

impl WorkerHandle for NullHandle {
    fn try_wait(&mut self) -> io::Result<Option<i32>> {
        Ok(Some(0))
    }

    fn kill(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// The test-side controls of one scripted worker connection.
pub(crate) struct ScriptedLink {
    feed: Option<Sender<Vec<u8>>>,
    written: Arc<Mutex<Vec<u8>>>,
}

impl ScriptedLink {
    /// Streams one event frame to the channel reader.
    pub(crate) fn feed_event(&self, event: &ValidationEvent) {
        self.feed
            .as_ref()
            .expect("link still open")
            .send(encode_event(event))
            .expect("feed event");
    }

    /// Streams raw bytes, for malformed-frame scenarios.
    pub(crate) fn feed_bytes(&self, bytes: Vec<u8>) {
        self.feed
            .as_ref()
            .expect("link still open")
            .send(bytes)
            .expect("feed bytes");
    }

    /// Simulates the worker dying: the reader sees EOF.
    pub(crate) fn kill_worker(&mut self) {
        drop(self.feed.take());
    }

    /// Returns everything the channel has written so far.
    pub(crate) fn written_bytes(&self) -> Vec<u8> {
        self.written.lock().expect("lock").clone()
    }
}

enum LaunchOutcome {
    Succeed(WorkerLink),
    Fail,
}

/// Hands out pre-scripted connections, or spawn failures, in order.
pub(crate) struct ScriptedLauncher {
    outcomes: Mutex<VecDeque<LaunchOutcome>>,
    attempts: AtomicU32,
}

impl ScriptedLauncher {
    /// Creates a launcher with `count` working connections queued.
    pub(crate) fn with_links(count: usize) -> (Arc<Self>, Vec<ScriptedLink>) {
        let mut outcomes = VecDeque::new();
        let mut links = Vec::new();
        for _ in 0..count {
            let (outcome, link) = scripted_connection();
            outcomes.push_back(outcome);
            links.push(link);
        }
        (
            Arc::new(Self {
                outcomes: Mutex::new(outcomes),
                attempts: AtomicU32::new(0),
            }),
            links,
        )
    }

    /// Creates a launcher whose first attempt fails and whose second
    /// succeeds.
    pub(crate) fn fail_then_link() -> (Arc<Self>, ScriptedLink) {
        let (outcome, link) = scripted_connection();
        let outcomes = VecDeque::from([LaunchOutcome::Fail, outcome]);
        (
            Arc::new(Self {
                outcomes: Mutex::new(outcomes),
                attempts: AtomicU32::new(0),
            }),
            link,
        )
    }

    pub(crate) fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

fn scripted_connection() -> (LaunchOutcome, ScriptedLink) {
    let (feed, receiver) = channel();
    let written = Arc::new(Mutex::new(Vec::new()));
    let link = WorkerLink {
        writer: Box::new(SharedWriter(Arc::clone(&written))),
        reader: Box::new(FedReader {
            receiver,
            pending: Vec::new(),
            offset: 0,
        }),
        handle: Box::new(NullHandle),
    };
    (
        LaunchOutcome::Succeed(link),
        ScriptedLink {
            feed: Some(feed),
            written,
        },
    )
}

impl WorkerLauncher for Arc<ScriptedLauncher> {
    fn launch(&self) -> Result<WorkerLink, ChannelError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        match self.outcomes.lock().expect("lock").pop_front() {
            Some(LaunchOutcome::Succeed(link)) => Ok(link),
            Some(LaunchOutcome::Fail) | None => Err(ChannelError::Spawn {
                message: String::from("scripted spawn failure"),
                source: None,
            }),
        }
    }
}
