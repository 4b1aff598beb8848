//! Bidirectional JSON-RPC 2.0 engine over a blocking [`Transport`].
//!
//! One [`JsonRpc`] is both client and server on its connection: it serves
//! registered methods to the peer while issuing its own requests and
//! notifications, with responses correlated back by id. Incoming bytes are
//! framed by [`JsonFramer`](crate::protocol::JsonFramer), so messages may
//! arrive back to back or split at any byte boundary.
//!
//! # Example
//!
//! ```ignore
//! let queue = EventQueue::new();
//! let rpc = JsonRpc::new(Box::new(transport), &queue)?;
//! rpc.register("ping", |_params| Ok(Outcome::Value(json!("pong"))));
//! queue.spawn_loop();
//! rpc.run()?; // blocks serving the connection until EOF or stop()
//! ```

pub mod message;
mod registry;

pub use message::Params;
pub use registry::{Handler, MethodRegistry, Outcome};

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::{json, Map, Value};

use crate::error::MethodError;
use crate::event::EventQueue;
use crate::protocol::JsonFramer;
use crate::rpc::message::codes;
use crate::task::{Payload, Task, TaskConclusion};
use crate::transport::Transport;

struct RpcInner {
    queue: EventQueue,
    registry: MethodRegistry,
    writer: Mutex<Box<dyn Transport>>,
    /// Separate handle used only to shut the connection down. Kept out of
    /// the writer mutex so stop() works even while a write is in flight.
    control: Mutex<Box<dyn Transport>>,
    /// Outstanding outbound requests awaiting a response, by id.
    pending: Mutex<HashMap<i64, Task>>,
    /// Tasks returned by served methods, kept alive until they stop.
    serving: Mutex<Vec<Task>>,
    next_id: AtomicI64,
    stopped: AtomicBool,
}

impl RpcInner {
    fn write_value(&self, value: &Value) -> crate::Result<()> {
        let data = serde_json::to_vec(value)?;
        tracing::debug!(bytes = data.len(), "writing message");
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        writer.write_all(&data)?;
        writer.flush()?;
        Ok(())
    }

    /// Write from a listener, where there is no caller to report to.
    fn write_or_log(&self, value: &Value) {
        if let Err(err) = self.write_value(value) {
            tracing::error!(%err, "failed to write message");
        }
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, HashMap<i64, Task>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_serving(&self) -> std::sync::MutexGuard<'_, Vec<Task>> {
        self.serving.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A JSON-RPC 2.0 endpoint bound to one connection.
///
/// Cheap to clone; clones share the connection, registry, and pending map.
/// One thread runs [`run`](JsonRpc::run) to pump incoming messages; any
/// thread may issue [`request`](JsonRpc::request) or
/// [`notify`](JsonRpc::notify) concurrently.
#[derive(Clone)]
pub struct JsonRpc {
    inner: Arc<RpcInner>,
    reader: Arc<Mutex<Option<Box<dyn Transport>>>>,
}

impl JsonRpc {
    /// Bind an engine to `transport`, delivering task and listener activity
    /// through `queue`.
    pub fn new(transport: Box<dyn Transport>, queue: &EventQueue) -> crate::Result<Self> {
        let writer = transport.try_clone()?;
        let control = transport.try_clone()?;
        Ok(Self {
            inner: Arc::new(RpcInner {
                queue: queue.clone(),
                registry: MethodRegistry::new(),
                writer: Mutex::new(writer),
                control: Mutex::new(control),
                pending: Mutex::new(HashMap::new()),
                serving: Mutex::new(Vec::new()),
                next_id: AtomicI64::new(0),
                stopped: AtomicBool::new(false),
            }),
            reader: Arc::new(Mutex::new(Some(transport))),
        })
    }

    /// Register a method served to the peer.
    pub fn register<F>(&self, name: impl Into<String>, handler: F)
    where
        F: Fn(Params) -> Result<Outcome, MethodError> + Send + Sync + 'static,
    {
        self.inner.registry.register(name, handler);
    }

    /// Register a method with a usage string.
    pub fn register_with_usage<F>(
        &self,
        name: impl Into<String>,
        usage: impl Into<String>,
        handler: F,
    ) where
        F: Fn(Params) -> Result<Outcome, MethodError> + Send + Sync + 'static,
    {
        self.inner.registry.register_with_usage(name, usage, handler);
    }

    /// Every registered method with its usage string.
    pub fn methods(&self) -> Vec<(String, Option<String>)> {
        self.inner.registry.methods()
    }

    /// Pump the connection on the calling thread until end of stream, a
    /// transport fault, or [`stop`](JsonRpc::stop).
    ///
    /// Residual bytes at end of stream are flushed through the framer so a
    /// final unterminated text still produces a parse error response
    /// attempt rather than silent loss.
    pub fn run(&self) -> crate::Result<()> {
        let mut reader = {
            let mut slot = self.reader.lock().unwrap_or_else(PoisonError::into_inner);
            match slot.take() {
                Some(reader) => reader,
                // A second run() on a clone has nothing to do.
                None => return Ok(()),
            }
        };
        let mut framer = JsonFramer::new();
        let mut buf = [0u8; 4096];
        let result = loop {
            if self.inner.stopped.load(Ordering::SeqCst) {
                break Ok(());
            }
            match reader.read_some(&mut buf) {
                Ok(0) => break Ok(()),
                Ok(n) => {
                    for frame in framer.push(&buf[..n]) {
                        self.handle_frame(&frame);
                    }
                }
                Err(err) => {
                    if self.inner.stopped.load(Ordering::SeqCst) {
                        break Ok(());
                    }
                    break Err(err.into());
                }
            }
        };
        if let Some(frame) = framer.finish() {
            self.handle_frame(&frame);
        }
        tracing::debug!("connection pump ended");
        result
    }

    /// Stop the engine: a blocked [`run`](JsonRpc::run) returns promptly.
    ///
    /// Uses the control handle, never the writer mutex, so it cannot be
    /// stalled behind a write blocked on peer backpressure.
    pub fn stop(&self) {
        self.inner.stopped.store(true, Ordering::SeqCst);
        let mut control = self
            .inner
            .control
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Err(err) = control.shutdown() {
            tracing::debug!(%err, "transport shutdown during stop");
        }
    }

    /// Send a notification: fire and forget, no correlation.
    pub fn notify(&self, method: &str, params: Params) -> crate::Result<()> {
        self.inner
            .write_value(&message::notification(method, params))
    }

    /// Build a request task.
    ///
    /// Nothing is sent yet: starting the returned task serializes and
    /// writes the request, and only after the write does the task enter the
    /// pending map (so a response cannot race its own registration). The
    /// task ends with the peer's result or fails with the peer's error
    /// object; either way it leaves the pending map when it stops.
    pub fn request(&self, method: &str, params: Params) -> Task {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(method, id, "building request");
        let task = Task::new(&self.inner.queue);
        let wire = message::request(id, method, params);

        let weak = Arc::downgrade(&self.inner);
        task.running_event().attach(move |task: &Task| {
            if let Some(inner) = weak.upgrade() {
                match inner.write_value(&wire) {
                    Ok(()) => {
                        inner.lock_pending().insert(id, task.clone());
                    }
                    Err(err) => {
                        tracing::error!(%err, id, "request write failed");
                        let _ = task.fail(Payload::Json(json!({
                            "message": err.to_string(),
                        })));
                    }
                }
            }
        });

        let weak = Arc::downgrade(&self.inner);
        task.stopped_event().attach(move |_task: &Task| {
            if let Some(inner) = weak.upgrade() {
                inner.lock_pending().remove(&id);
            }
        });

        task
    }

    /// [`request`](JsonRpc::request) with a completion callback attached to
    /// the task's stopped event before it is returned.
    pub fn request_with<F>(&self, method: &str, params: Params, on_complete: F) -> Task
    where
        F: Fn(&Task) + Send + Sync + 'static,
    {
        let task = self.request(method, params);
        task.stopped_event().attach(on_complete);
        task
    }

    /// Dispatch one framed text: parse, classify, and write back whatever
    /// response it produces.
    fn handle_frame(&self, frame: &[u8]) {
        let response = match serde_json::from_slice::<Value>(frame) {
            Err(err) => {
                tracing::debug!(%err, "unparseable message");
                Some(message::error_response(
                    None,
                    codes::PARSE_ERROR,
                    "parse error",
                    None,
                ))
            }
            Ok(Value::Object(map)) => self.handle_object(map),
            Ok(Value::Array(items)) => self.handle_array(items),
            Ok(_) => Some(message::error_response(
                None,
                codes::INVALID_REQUEST,
                "invalid request",
                None,
            )),
        };
        if let Some(response) = response {
            self.inner.write_or_log(&response);
        }
    }

    fn handle_object(&self, map: Map<String, Value>) -> Option<Value> {
        let id = message::request_id(&map);
        if message::is_request(&map) {
            self.handle_request(&map, id)
        } else if message::is_response(&map) {
            self.handle_response(&map, id);
            None
        } else {
            Some(message::error_response(
                id,
                codes::INVALID_REQUEST,
                "invalid request",
                None,
            ))
        }
    }

    /// A batch: each element dispatched independently; responses collected.
    /// An empty batch is itself invalid; an all-notification batch produces
    /// nothing at all.
    fn handle_array(&self, items: Vec<Value>) -> Option<Value> {
        if items.is_empty() {
            return Some(message::error_response(
                None,
                codes::INVALID_REQUEST,
                "invalid request",
                None,
            ));
        }
        let responses: Vec<Value> = items
            .into_iter()
            .filter_map(|item| match item {
                Value::Object(map) => self.handle_object(map),
                _ => Some(message::error_response(
                    None,
                    codes::INVALID_REQUEST,
                    "invalid request",
                    None,
                )),
            })
            .collect();
        if responses.is_empty() {
            None
        } else {
            Some(Value::Array(responses))
        }
    }

    /// Serve one request. For notifications (`id` absent) every response,
    /// error responses included, is suppressed; the method still runs.
    fn handle_request(&self, map: &Map<String, Value>, id: Option<Value>) -> Option<Value> {
        let method = map
            .get("method")
            .and_then(Value::as_str)
            .unwrap_or_default();
        tracing::debug!(method, ?id, "handling request");

        let handler = match self.inner.registry.lookup(method) {
            Some(handler) => handler,
            None => {
                return id.map(|id| {
                    message::error_response(
                        Some(id),
                        codes::METHOD_NOT_FOUND,
                        "method not found",
                        None,
                    )
                })
            }
        };

        let params = match Params::from_request(map.get("params")) {
            Ok(params) => params,
            Err(()) => {
                return id.map(|id| {
                    message::error_response(
                        Some(id),
                        codes::INVALID_PARAMS,
                        "invalid params",
                        None,
                    )
                })
            }
        };

        let outcome = match catch_unwind(AssertUnwindSafe(|| handler(params))) {
            Ok(outcome) => outcome,
            Err(panic) => {
                tracing::warn!(method, "method panicked");
                Err(MethodError::Uncaught {
                    name: "panic".to_string(),
                    message: panic_message(panic.as_ref()),
                })
            }
        };

        match outcome {
            Ok(Outcome::Value(result)) => {
                id.map(|id| message::success_response(Some(id), result))
            }
            Ok(Outcome::Task(task)) => {
                self.defer_response(&task, id);
                None
            }
            Err(MethodError::InvalidParams) => id.map(|id| {
                message::error_response(Some(id), codes::INVALID_PARAMS, "invalid params", None)
            }),
            Err(MethodError::Fault(fault)) => id.map(|id| {
                message::error_response(Some(id), fault.code, &fault.message, fault.data)
            }),
            Err(MethodError::Uncaught { name, message }) => {
                tracing::warn!(method, name, "uncaught method failure");
                id.map(|id| {
                    message::error_response(
                        Some(id),
                        codes::UNCAUGHT_EXCEPTION,
                        "uncaught exception",
                        Some(json!({"name": name, "args": [], "message": message})),
                    )
                })
            }
        }
    }

    /// Start a method's task and arrange for the response to be sent when
    /// it stops. The task runs even for a notification; only the response
    /// is suppressed then.
    fn defer_response(&self, task: &Task, id: Option<Value>) {
        self.inner.lock_serving().push(task.clone());

        let weak = Arc::downgrade(&self.inner);
        let deferred_id = id.clone();
        task.stopped_event().attach(move |task: &Task| {
            let inner = match weak.upgrade() {
                Some(inner) => inner,
                None => return,
            };
            inner.lock_serving().retain(|kept| !kept.same(task));
            let id = match &deferred_id {
                Some(id) => Some(id.clone()),
                None => return,
            };
            let response = match task.conclusion() {
                Some(TaskConclusion::Ended) => {
                    message::success_response(id, task.result().to_json())
                }
                Some(TaskConclusion::Failed) => message::error_response(
                    id,
                    codes::TASK_FAILED,
                    "task failed",
                    Some(task.failure().to_json()),
                ),
                Some(TaskConclusion::Canceled) => {
                    message::error_response(id, codes::TASK_CANCELED, "task canceled", None)
                }
                // stopped fires only after a conclusion is recorded.
                None => unreachable!("stopped task without conclusion"),
            };
            inner.write_or_log(&response);
        });

        if let Err(err) = task.start() {
            tracing::error!(%err, "method returned a task that cannot start");
            self.inner.lock_serving().retain(|kept| !kept.same(task));
            if let Some(id) = id {
                self.inner.write_or_log(&message::error_response(
                    Some(id),
                    codes::INTERNAL_ERROR,
                    "internal error",
                    None,
                ));
            }
        }
    }

    /// Correlate a response back to its request task. Responses for ids
    /// that are unknown (or never ours) are logged and dropped.
    fn handle_response(&self, map: &Map<String, Value>, id: Option<Value>) {
        let id = match id.as_ref().and_then(Value::as_i64) {
            Some(id) => id,
            None => {
                tracing::debug!(?id, "dropping response with foreign id");
                return;
            }
        };
        let task = match self.inner.lock_pending().remove(&id) {
            Some(task) => task,
            None => {
                tracing::debug!(id, "dropping response for unknown id");
                return;
            }
        };
        if message::is_error_response(map) {
            let error = map.get("error").cloned().unwrap_or(Value::Null);
            if let Err(err) = task.fail(Payload::Json(error)) {
                tracing::debug!(%err, id, "response for already-stopped task");
            }
        } else {
            let result = map.get("result").cloned().unwrap_or(Value::Null);
            if let Err(err) = task.end(Payload::Json(result)) {
                tracing::debug!(%err, id, "response for already-stopped task");
            }
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
