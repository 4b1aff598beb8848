//! Task sequencing: compose an ordered list of tasks into one aggregate.
//!
//! [`sequence`] returns an aggregate [`Task`] that runs its children one
//! after another. While a child runs, its heartbeats are forwarded as
//! aggregate heartbeats carrying the child itself ([`Payload::Step`]) so
//! observers can see which step is progressing. A child ending advances the
//! sequence; a child failing fails the aggregate immediately and later
//! steps never start; cancellation propagates in both directions exactly
//! once. The aggregate ends with the final child's result.
//!
//! The sequencing logic is a small trampolined, defunctionalized
//! interpreter over a four-term language (literal/sequence/yield/abort)
//! with an explicit context stack. `refocus` is the eval transition on
//! terms, `refocus_aux` the apply transition on contexts; the machine runs
//! until it suspends on a yielded child or aborts with the final value.
//! Suspension is what lets "wait until an externally-driven child task
//! finishes" be expressed without any coroutine facility: the child's end
//! listener resumes the machine with `send`.

use std::sync::{Arc, Mutex, PoisonError};

use crate::event::EventQueue;
use crate::task::{Payload, Task, TaskState, WeakTask};

/// The term language. A sequence of tasks `[a, b, c]` compiles to
/// `Abort(Sequence(Sequence(Yield(Literal(a)), Yield(Literal(b))), Yield(Literal(c))))`.
enum Term {
    /// Evaluates to the task it carries.
    Literal(Task),
    /// Evaluates the first term, discards its value, then evaluates the
    /// second; the whole term's value is the second term's value.
    Sequence(Box<Term>, Box<Term>),
    /// Evaluates its inner term, then suspends the machine with that value.
    Yield(Box<Term>),
    /// Evaluates its inner term, then halts the machine with that value.
    /// Not an error: it marks ordinary termination of the sequence.
    Abort(Box<Term>),
}

/// Defunctionalized continuations ("stack frames") for [`Term`] evaluation.
enum Context {
    /// The frame under an abort term. Has no enclosing frame: reaching it
    /// discards whatever surrounded the abort.
    Abort,
    /// The frame awaiting the first half of a sequence; holds the second
    /// half and the enclosing frame.
    Sequence { next: Term, outer: Box<Context> },
    /// The frame awaiting a yield's inner value.
    Yield(Box<Context>),
}

/// Values threaded through the machine: a task literal on the way down, a
/// task's result on the way back up through `send`.
enum MachineValue {
    Task(Task),
    Data(Payload),
}

enum Phase {
    /// The eval transition: advance into `term` under `context`.
    Refocus { term: Term, context: Context },
    /// The apply transition: advance out with `value` under `context`.
    RefocusAux { context: Context, value: MachineValue },
    /// Suspended on a yielded value; `send` resumes under `context`.
    Yielded { value: Task, context: Context },
    /// Halted with the final value. The machine cannot proceed.
    Aborted { value: Payload },
}

struct Machine {
    phase: Option<Phase>,
}

impl Machine {
    /// Compile `tasks` into the term language. The caller runs
    /// [`evaluate`](Machine::evaluate) to reach the first suspension.
    fn create(tasks: Vec<Task>) -> Self {
        let mut terms = tasks
            .into_iter()
            .map(|t| Term::Yield(Box::new(Term::Literal(t))));
        let term = match terms.next() {
            Some(first) => terms.fold(first, |acc, t| Term::Sequence(Box::new(acc), Box::new(t))),
            // An empty sequence halts immediately with a null result.
            None => {
                return Self {
                    phase: Some(Phase::Aborted {
                        value: Payload::Null,
                    }),
                }
            }
        };
        Self {
            phase: Some(Phase::Refocus {
                term: Term::Abort(Box::new(term)),
                context: Context::Abort,
            }),
        }
    }

    fn refocus(term: Term, context: Context) -> Phase {
        match term {
            Term::Literal(task) => Phase::RefocusAux {
                context,
                value: MachineValue::Task(task),
            },
            Term::Sequence(first, second) => Phase::Refocus {
                term: *first,
                context: Context::Sequence {
                    next: *second,
                    outer: Box::new(context),
                },
            },
            Term::Yield(inner) => Phase::Refocus {
                term: *inner,
                context: Context::Yield(Box::new(context)),
            },
            Term::Abort(inner) => Phase::Refocus {
                term: *inner,
                context: Context::Abort,
            },
        }
    }

    fn refocus_aux(context: Context, value: MachineValue) -> Phase {
        match context {
            Context::Abort => Phase::Aborted {
                value: match value {
                    MachineValue::Data(payload) => payload,
                    // Only possible for a bare literal under abort, which
                    // the sequence compiler never produces.
                    MachineValue::Task(_) => Payload::Null,
                },
            },
            Context::Sequence { next, outer } => Phase::Refocus {
                term: next,
                context: *outer,
            },
            Context::Yield(outer) => match value {
                MachineValue::Task(task) => Phase::Yielded {
                    value: task,
                    context: *outer,
                },
                MachineValue::Data(payload) => Phase::Aborted { value: payload },
            },
        }
    }

    /// Run the trampoline until the machine suspends or halts.
    fn evaluate(&mut self) {
        loop {
            match self.phase.take().expect("machine phase always present") {
                Phase::Refocus { term, context } => {
                    self.phase = Some(Self::refocus(term, context));
                }
                Phase::RefocusAux { context, value } => {
                    self.phase = Some(Self::refocus_aux(context, value));
                }
                done @ (Phase::Yielded { .. } | Phase::Aborted { .. }) => {
                    self.phase = Some(done);
                    break;
                }
            }
        }
    }

    /// Resume a suspended machine with a value, then evaluate to the next
    /// suspension or halt. Returns false if the machine was not suspended.
    fn send(&mut self, value: Payload) -> bool {
        match self.phase.take().expect("machine phase always present") {
            Phase::Yielded { context, .. } => {
                self.phase = Some(Phase::RefocusAux {
                    context,
                    value: MachineValue::Data(value),
                });
                self.evaluate();
                true
            }
            other => {
                self.phase = Some(other);
                false
            }
        }
    }

    fn yielded(&self) -> Option<&Task> {
        match self.phase.as_ref() {
            Some(Phase::Yielded { value, .. }) => Some(value),
            _ => None,
        }
    }

    fn aborted(&self) -> Option<&Payload> {
        match self.phase.as_ref() {
            Some(Phase::Aborted { value }) => Some(value),
            _ => None,
        }
    }

    /// Drop any remaining terms/contexts. Used when the sequence is cut
    /// short by failure or cancellation so child tasks are released.
    fn clear(&mut self) {
        self.phase = Some(Phase::Aborted {
            value: Payload::Null,
        });
    }
}

/// Drives the machine from child task listeners. The aggregate's own start
/// and cancel listeners hold the driver strongly; children hold it weakly,
/// so dropping the aggregate releases the whole in-flight sequence.
struct Driver {
    machine: Mutex<Machine>,
    current: Mutex<Option<Task>>,
    aggregate: WeakTask,
}

enum Step {
    Start(Task),
    Finish(Payload),
}

impl Driver {
    fn lock_machine(&self) -> std::sync::MutexGuard<'_, Machine> {
        self.machine.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_current(&self) -> std::sync::MutexGuard<'_, Option<Task>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn aggregate(&self) -> Option<Task> {
        self.aggregate.upgrade()
    }

    /// After evaluation: either attach to and start the yielded child, or
    /// end the aggregate with the final value.
    fn advance(self: &Arc<Self>) {
        let step = {
            let machine = self.lock_machine();
            if let Some(value) = machine.aborted() {
                Step::Finish(value.clone())
            } else if let Some(child) = machine.yielded() {
                Step::Start(child.clone())
            } else {
                // evaluate() only stops on Yielded or Aborted.
                unreachable!("machine stopped mid-step")
            }
        };
        match step {
            Step::Finish(value) => {
                *self.lock_current() = None;
                if let Some(aggregate) = self.aggregate() {
                    if let Err(err) = aggregate.end(value) {
                        tracing::debug!(%err, "aggregate already stopped before final end");
                    }
                }
            }
            Step::Start(child) => {
                *self.lock_current() = Some(child.clone());
                self.attach_child(&child);
                if let Err(err) = child.start() {
                    // A task handed to sequence() was not PENDING; treat it
                    // as a failed step.
                    tracing::error!(%err, "sequence child could not be started");
                    self.lock_machine().clear();
                    *self.lock_current() = None;
                    if let Some(aggregate) = self.aggregate() {
                        if aggregate.state() != TaskState::Stopped {
                            let _ = aggregate.fail(Payload::Json(serde_json::json!({
                                "message": err.to_string(),
                            })));
                        }
                    }
                }
            }
        }
    }

    fn attach_child(self: &Arc<Self>, child: &Task) {
        let weak = Arc::downgrade(self);

        child.heartbeat_event().attach({
            let weak = weak.clone();
            move |child: &Task| {
                if let Some(driver) = weak.upgrade() {
                    driver.on_child_heartbeat(child);
                }
            }
        });
        child.end_event().attach({
            let weak = weak.clone();
            move |child: &Task| {
                if let Some(driver) = weak.upgrade() {
                    driver.on_child_end(child);
                }
            }
        });
        child.fail_event().attach({
            let weak = weak.clone();
            move |child: &Task| {
                if let Some(driver) = weak.upgrade() {
                    driver.on_child_fail(child);
                }
            }
        });
        child.cancel_event().attach({
            let weak = weak.clone();
            move |_child: &Task| {
                if let Some(driver) = weak.upgrade() {
                    driver.on_child_cancel();
                }
            }
        });
    }

    /// Forward the child's heartbeat, passing the child itself so callers
    /// can introspect which step is progressing.
    fn on_child_heartbeat(&self, child: &Task) {
        if let Some(aggregate) = self.aggregate() {
            if aggregate.state() == TaskState::Running {
                let _ = aggregate.heartbeat(Payload::Step(child.clone()));
            }
        }
    }

    fn on_child_end(self: &Arc<Self>, child: &Task) {
        {
            let mut machine = self.lock_machine();
            if !machine.send(child.result()) {
                tracing::debug!("child ended but machine was not suspended");
                return;
            }
        }
        self.advance();
    }

    /// Failure propagates immediately; later steps never start.
    fn on_child_fail(self: &Arc<Self>, child: &Task) {
        self.lock_machine().clear();
        *self.lock_current() = None;
        if let Some(aggregate) = self.aggregate() {
            if aggregate.state() != TaskState::Stopped {
                let _ = aggregate.fail(child.failure());
            }
        }
    }

    /// A canceled child concludes the aggregate, unless the aggregate
    /// already stopped (which is how aggregate-initiated cancellation
    /// avoids bouncing back down).
    fn on_child_cancel(self: &Arc<Self>) {
        self.lock_machine().clear();
        *self.lock_current() = None;
        if let Some(aggregate) = self.aggregate() {
            if aggregate.state() != TaskState::Stopped {
                let _ = aggregate.cancel();
            }
        }
    }

    fn on_aggregate_start(self: &Arc<Self>) {
        self.lock_machine().evaluate();
        self.advance();
    }

    /// Cancel the active child, if any; its cancel listener will not bounce
    /// the cancellation back because the aggregate is already stopped.
    fn on_aggregate_cancel(&self) {
        let child = self.lock_current().take();
        if let Some(child) = child {
            if child.state() != TaskState::Stopped {
                let _ = child.cancel();
            }
        }
        self.lock_machine().clear();
    }
}

/// Compose `tasks` into one aggregate task delivering on `queue`.
///
/// The aggregate is returned PENDING; the first child starts only once the
/// aggregate is started. Children must be PENDING and are driven entirely
/// by the aggregate. An empty list yields an aggregate that ends with a
/// null result as soon as it is started.
pub fn sequence(queue: &EventQueue, tasks: Vec<Task>) -> Task {
    let aggregate = Task::new(queue);
    let driver = Arc::new(Driver {
        machine: Mutex::new(Machine::create(tasks)),
        current: Mutex::new(None),
        aggregate: aggregate.downgrade(),
    });

    aggregate.start_event().attach({
        let driver = Arc::clone(&driver);
        move |_: &Task| driver.on_aggregate_start()
    });
    aggregate.cancel_event().attach({
        let driver = Arc::clone(&driver);
        move |_: &Task| driver.on_aggregate_cancel()
    });

    aggregate
}
