//! Task lifecycle state machine.
//!
//! A [`Task`] represents one asynchronous unit of work: an RPC call, a
//! slice, a print. It moves through `PENDING -> RUNNING -> STOPPED` and,
//! once stopped, records how it concluded (`ENDED`/`FAILED`/`CANCELED`).
//! Every transition fires lifecycle events through the task's
//! [`EventQueue`], so observers always see transitions in the order they
//! were applied.
//!
//! Transitions outside the table are rejected with
//! [`IllegalTransition`] and leave the task unchanged. Nothing is silently
//! ignored at this layer; cooperative cancellation policies (for example
//! "cancel only if still running") belong to the callers that own the work.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use serde_json::Value;

use crate::error::IllegalTransition;
use crate::event::{Event, EventQueue};

/// Coarse lifecycle phase of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Running,
    Stopped,
}

/// How a stopped task concluded. Set exactly when the task reaches
/// [`TaskState::Stopped`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskConclusion {
    Ended,
    Failed,
    Canceled,
}

/// The lifecycle events a task can receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskEvent {
    Start,
    Heartbeat,
    End,
    Fail,
    Cancel,
}

/// Data attached to a task transition.
///
/// `Step` carries a task handle, which is how the process machine forwards
/// the currently progressing child as the aggregate's heartbeat payload.
#[derive(Clone)]
pub enum Payload {
    Null,
    Json(Value),
    Step(Task),
}

impl Payload {
    /// The JSON value carried by this payload, if any.
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Payload::Json(value) => Some(value),
            _ => None,
        }
    }

    /// Render the payload as JSON. A `Step` payload renders as the carried
    /// task's current progress.
    pub fn to_json(&self) -> Value {
        match self {
            Payload::Null => Value::Null,
            Payload::Json(value) => value.clone(),
            Payload::Step(task) => task.progress().to_json(),
        }
    }

    /// The task carried by a `Step` payload, if any.
    pub fn as_step(&self) -> Option<&Task> {
        match self {
            Payload::Step(task) => Some(task),
            _ => None,
        }
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Payload::Json(value)
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::Null => f.write_str("Null"),
            Payload::Json(value) => f.debug_tuple("Json").field(value).finish(),
            Payload::Step(task) => f.debug_tuple("Step").field(&task.state()).finish(),
        }
    }
}

struct Fields {
    state: TaskState,
    conclusion: Option<TaskConclusion>,
    progress: Payload,
    result: Payload,
    failure: Payload,
}

struct TaskInner {
    fields: Mutex<Fields>,
    start_event: Event<Task>,
    heartbeat_event: Event<Task>,
    end_event: Event<Task>,
    fail_event: Event<Task>,
    cancel_event: Event<Task>,
    running_event: Event<Task>,
    stopped_event: Event<Task>,
}

/// A handle to one task. Cheap to clone; identity is handle identity
/// (compare with [`Task::same`]). Callers that need an external ID keep
/// their own map, the way the RPC engine tracks pending request ids.
#[derive(Clone)]
pub struct Task {
    inner: Arc<TaskInner>,
}

/// A non-owning task handle, used internally to break reference cycles
/// between a task and listeners that drive it.
#[derive(Clone)]
pub(crate) struct WeakTask {
    inner: Weak<TaskInner>,
}

impl WeakTask {
    pub(crate) fn upgrade(&self) -> Option<Task> {
        self.inner.upgrade().map(|inner| Task { inner })
    }
}

impl Task {
    /// Create a pending task whose lifecycle events deliver on `queue`.
    pub fn new(queue: &EventQueue) -> Self {
        Self {
            inner: Arc::new(TaskInner {
                fields: Mutex::new(Fields {
                    state: TaskState::Pending,
                    conclusion: None,
                    progress: Payload::Null,
                    result: Payload::Null,
                    failure: Payload::Null,
                }),
                start_event: Event::new("task.start", queue),
                heartbeat_event: Event::new("task.heartbeat", queue),
                end_event: Event::new("task.end", queue),
                fail_event: Event::new("task.fail", queue),
                cancel_event: Event::new("task.cancel", queue),
                running_event: Event::new("task.running", queue),
                stopped_event: Event::new("task.stopped", queue),
            }),
        }
    }

    /// Whether two handles refer to the same task.
    pub fn same(&self, other: &Task) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn downgrade(&self) -> WeakTask {
        WeakTask {
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub fn state(&self) -> TaskState {
        self.lock_fields().state
    }

    pub fn conclusion(&self) -> Option<TaskConclusion> {
        self.lock_fields().conclusion
    }

    /// The last heartbeat payload.
    pub fn progress(&self) -> Payload {
        self.lock_fields().progress.clone()
    }

    /// The payload from `end`, once ended.
    pub fn result(&self) -> Payload {
        self.lock_fields().result.clone()
    }

    /// The payload from `fail`, once failed.
    pub fn failure(&self) -> Payload {
        self.lock_fields().failure.clone()
    }

    /// Fired once on `PENDING -> RUNNING`.
    pub fn start_event(&self) -> &Event<Task> {
        &self.inner.start_event
    }

    /// Fired on each heartbeat while running.
    pub fn heartbeat_event(&self) -> &Event<Task> {
        &self.inner.heartbeat_event
    }

    /// Fired once if the task ends successfully.
    pub fn end_event(&self) -> &Event<Task> {
        &self.inner.end_event
    }

    /// Fired once if the task fails.
    pub fn fail_event(&self) -> &Event<Task> {
        &self.inner.fail_event
    }

    /// Fired once if the task is canceled.
    pub fn cancel_event(&self) -> &Event<Task> {
        &self.inner.cancel_event
    }

    /// Level event: fired once when the task becomes RUNNING.
    pub fn running_event(&self) -> &Event<Task> {
        &self.inner.running_event
    }

    /// Level event: fired once when the task becomes STOPPED, whatever the
    /// conclusion.
    pub fn stopped_event(&self) -> &Event<Task> {
        &self.inner.stopped_event
    }

    pub fn start(&self) -> Result<(), IllegalTransition> {
        self.transition(TaskEvent::Start, Payload::Null)
    }

    pub fn heartbeat(&self, progress: Payload) -> Result<(), IllegalTransition> {
        self.transition(TaskEvent::Heartbeat, progress)
    }

    pub fn end(&self, result: Payload) -> Result<(), IllegalTransition> {
        self.transition(TaskEvent::End, result)
    }

    pub fn fail(&self, failure: Payload) -> Result<(), IllegalTransition> {
        self.transition(TaskEvent::Fail, failure)
    }

    pub fn cancel(&self) -> Result<(), IllegalTransition> {
        self.transition(TaskEvent::Cancel, Payload::Null)
    }

    /// The single transition function. Updates state under the lock, then
    /// fires the edge event followed by the level event (both enqueue;
    /// FIFO delivery preserves the order).
    fn transition(&self, event: TaskEvent, data: Payload) -> Result<(), IllegalTransition> {
        let fired: (&Event<Task>, Option<&Event<Task>>) = {
            let mut fields = self.lock_fields();
            match (fields.state, event) {
                (TaskState::Pending, TaskEvent::Start) => {
                    fields.state = TaskState::Running;
                    (&self.inner.start_event, Some(&self.inner.running_event))
                }
                (TaskState::Pending, TaskEvent::Cancel)
                | (TaskState::Running, TaskEvent::Cancel) => {
                    fields.state = TaskState::Stopped;
                    fields.conclusion = Some(TaskConclusion::Canceled);
                    (&self.inner.cancel_event, Some(&self.inner.stopped_event))
                }
                (TaskState::Running, TaskEvent::Heartbeat) => {
                    fields.progress = data;
                    (&self.inner.heartbeat_event, None)
                }
                (TaskState::Running, TaskEvent::End) => {
                    fields.state = TaskState::Stopped;
                    fields.conclusion = Some(TaskConclusion::Ended);
                    fields.result = data;
                    (&self.inner.end_event, Some(&self.inner.stopped_event))
                }
                (TaskState::Running, TaskEvent::Fail) => {
                    fields.state = TaskState::Stopped;
                    fields.conclusion = Some(TaskConclusion::Failed);
                    fields.failure = data;
                    (&self.inner.fail_event, Some(&self.inner.stopped_event))
                }
                (state, event) => return Err(IllegalTransition { state, event }),
            }
        };
        fired.0.fire(self.clone());
        if let Some(level) = fired.1 {
            level.fire(self.clone());
        }
        Ok(())
    }

    fn lock_fields(&self) -> std::sync::MutexGuard<'_, Fields> {
        self.inner
            .fields
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fields = self.lock_fields();
        f.debug_struct("Task")
            .field("state", &fields.state)
            .field("conclusion", &fields.conclusion)
            .finish()
    }
}
