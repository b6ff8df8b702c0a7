//! Typed event records and the bounded bus that carries them.
//!
//! Controllers, the claude invoker, and the git adapter are the producers; the
//! presentation adapter is the single consumer. The bus is the only channel
//! between the orchestration task and the renderer task.

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tracing::trace;

/// Default number of events buffered before `emit` waits for the consumer.
pub const DEFAULT_CAPACITY: usize = 100;

/// Discriminant of an [`Event`]; derived from the payload, never set by hand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    RunStarted,
    AssistantText,
    ToolUse,
    ToolResult,
    ExecutionResult,
    LoopStarted,
    IterationStarted,
    IterationCompleted,
    IterationFailed,
    LoopCompleted,
    LoopInterrupted,
    SleepStarted,
    EvolveStarted,
    RoundStarted,
    ImprovementStarted,
    ComparisonStarted,
    ComparisonRetry,
    WinnerSelected,
    EvolveCompleted,
    EvolveInterrupted,
    BranchCreated,
    BranchCheckedOut,
    BranchDeleted,
    CommitsSquashed,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::RunStarted => "run-started",
            EventKind::AssistantText => "assistant-text",
            EventKind::ToolUse => "tool-use",
            EventKind::ToolResult => "tool-result",
            EventKind::ExecutionResult => "execution-result",
            EventKind::LoopStarted => "loop-started",
            EventKind::IterationStarted => "iteration-started",
            EventKind::IterationCompleted => "iteration-completed",
            EventKind::IterationFailed => "iteration-failed",
            EventKind::LoopCompleted => "loop-completed",
            EventKind::LoopInterrupted => "loop-interrupted",
            EventKind::SleepStarted => "sleep-started",
            EventKind::EvolveStarted => "evolve-started",
            EventKind::RoundStarted => "round-started",
            EventKind::ImprovementStarted => "improvement-started",
            EventKind::ComparisonStarted => "comparison-started",
            EventKind::ComparisonRetry => "comparison-retry",
            EventKind::WinnerSelected => "winner-selected",
            EventKind::EvolveCompleted => "evolve-completed",
            EventKind::EvolveInterrupted => "evolve-interrupted",
            EventKind::BranchCreated => "branch-created",
            EventKind::BranchCheckedOut => "branch-checked-out",
            EventKind::BranchDeleted => "branch-deleted",
            EventKind::CommitsSquashed => "commits-squashed",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload of an event. The shape is fixed per kind.
///
/// Durations serialize as fractional seconds.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum EventPayload {
    RunStarted {
        prompt: String,
        working_dir: String,
        /// `ANTHROPIC_BASE_URL`, surfaced for display only.
        base_url: Option<String>,
        files: Vec<String>,
    },
    AssistantText {
        text: String,
    },
    ToolUse {
        name: String,
        input: Map<String, Value>,
    },
    ToolResult {
        content: String,
    },
    ExecutionResult {
        #[serde(serialize_with = "as_secs")]
        duration: Duration,
    },
    LoopStarted {
        total: u32,
    },
    IterationStarted {
        current: u32,
        total: u32,
    },
    IterationCompleted {
        current: u32,
        total: u32,
        #[serde(serialize_with = "as_secs")]
        duration: Duration,
    },
    IterationFailed {
        current: u32,
        total: u32,
        error: String,
    },
    LoopCompleted {
        total: u32,
        successful: u32,
        failed: u32,
        /// Never populated; kept so consumers see a stable shape.
        #[serde(serialize_with = "as_secs")]
        total_duration: Duration,
    },
    LoopInterrupted {
        completed: u32,
        total: u32,
    },
    SleepStarted {
        #[serde(serialize_with = "as_secs")]
        duration: Duration,
    },
    EvolveStarted {
        total: u32,
    },
    RoundStarted {
        round: u32,
        total: u32,
    },
    ImprovementStarted {
        branch: String,
    },
    ComparisonStarted {
        winner: String,
        challenger: String,
    },
    ComparisonRetry {
        attempt: u32,
        max: u32,
    },
    WinnerSelected {
        winner: String,
        loser: String,
    },
    EvolveCompleted {
        final_branch: String,
        total_rounds: u32,
        /// Never populated; kept so consumers see a stable shape.
        #[serde(serialize_with = "as_secs")]
        total_duration: Duration,
    },
    EvolveInterrupted {
        completed: u32,
        total: u32,
        winner: String,
    },
    BranchCreated {
        name: String,
        /// Empty when the branch was created at HEAD.
        base: String,
    },
    BranchCheckedOut {
        name: String,
    },
    BranchDeleted {
        name: String,
    },
    /// `branch` is the squash base, not the squashed branch.
    CommitsSquashed {
        branch: String,
    },
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            EventPayload::RunStarted { .. } => EventKind::RunStarted,
            EventPayload::AssistantText { .. } => EventKind::AssistantText,
            EventPayload::ToolUse { .. } => EventKind::ToolUse,
            EventPayload::ToolResult { .. } => EventKind::ToolResult,
            EventPayload::ExecutionResult { .. } => EventKind::ExecutionResult,
            EventPayload::LoopStarted { .. } => EventKind::LoopStarted,
            EventPayload::IterationStarted { .. } => EventKind::IterationStarted,
            EventPayload::IterationCompleted { .. } => EventKind::IterationCompleted,
            EventPayload::IterationFailed { .. } => EventKind::IterationFailed,
            EventPayload::LoopCompleted { .. } => EventKind::LoopCompleted,
            EventPayload::LoopInterrupted { .. } => EventKind::LoopInterrupted,
            EventPayload::SleepStarted { .. } => EventKind::SleepStarted,
            EventPayload::EvolveStarted { .. } => EventKind::EvolveStarted,
            EventPayload::RoundStarted { .. } => EventKind::RoundStarted,
            EventPayload::ImprovementStarted { .. } => EventKind::ImprovementStarted,
            EventPayload::ComparisonStarted { .. } => EventKind::ComparisonStarted,
            EventPayload::ComparisonRetry { .. } => EventKind::ComparisonRetry,
            EventPayload::WinnerSelected { .. } => EventKind::WinnerSelected,
            EventPayload::EvolveCompleted { .. } => EventKind::EvolveCompleted,
            EventPayload::EvolveInterrupted { .. } => EventKind::EvolveInterrupted,
            EventPayload::BranchCreated { .. } => EventKind::BranchCreated,
            EventPayload::BranchCheckedOut { .. } => EventKind::BranchCheckedOut,
            EventPayload::BranchDeleted { .. } => EventKind::BranchDeleted,
            EventPayload::CommitsSquashed { .. } => EventKind::CommitsSquashed,
        }
    }
}

fn as_secs<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(duration.as_secs_f64())
}

/// A timestamped event as seen by the consumer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    pub kind: EventKind,
    pub timestamp: DateTime<Utc>,
    pub payload: EventPayload,
}

impl Event {
    /// Stamp `payload` with the current wall-clock time.
    pub fn now(payload: EventPayload) -> Self {
        Self {
            kind: payload.kind(),
            timestamp: Utc::now(),
            payload,
        }
    }
}

/// Producer handle. Cheap to clone; all clones share the same close state.
#[derive(Debug, Clone)]
pub struct Emitter {
    sender: Arc<Mutex<Option<mpsc::Sender<Event>>>>,
}

impl Emitter {
    /// Stamp and enqueue an event.
    ///
    /// Waits while the buffer is full. Once the bus is closed (or the consumer
    /// dropped its stream) the event is discarded.
    pub async fn emit(&self, payload: EventPayload) {
        let Some(sender) = self.current_sender() else {
            trace!(kind = %payload.kind(), "bus closed, dropping event");
            return;
        };
        let event = Event::now(payload);
        if let Err(err) = sender.send(event).await {
            trace!(kind = %err.0.kind, "consumer gone, dropping event");
        }
    }

    /// Close the bus. Idempotent; the stream ends after buffered events.
    pub fn close(&self) {
        if let Ok(mut guard) = self.sender.lock() {
            guard.take();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.current_sender().is_none()
    }

    fn current_sender(&self) -> Option<mpsc::Sender<Event>> {
        self.sender.lock().ok().and_then(|guard| guard.clone())
    }
}

/// Read side of the bus.
#[derive(Debug)]
pub struct EventStream {
    receiver: mpsc::Receiver<Event>,
}

impl EventStream {
    /// Next event in emission order, or `None` once the bus is closed and drained.
    pub async fn next(&mut self) -> Option<Event> {
        self.receiver.recv().await
    }

    /// Non-blocking variant of [`EventStream::next`].
    pub fn try_next(&mut self) -> Option<Event> {
        self.receiver.try_recv().ok()
    }
}

/// Bounded FIFO of events with exactly one subscriber.
#[derive(Debug)]
pub struct EventBus {
    emitter: Emitter,
    stream: Mutex<Option<EventStream>>,
}

impl EventBus {
    /// Create a bus that buffers up to `capacity` events (at least one).
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        Self {
            emitter: Emitter {
                sender: Arc::new(Mutex::new(Some(sender))),
            },
            stream: Mutex::new(Some(EventStream { receiver })),
        }
    }

    pub fn emitter(&self) -> Emitter {
        self.emitter.clone()
    }

    /// Take the read-only stream. Only the first call gets it.
    pub fn subscribe(&self) -> Option<EventStream> {
        self.stream.lock().ok().and_then(|mut guard| guard.take())
    }

    pub fn close(&self) {
        self.emitter.close();
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
