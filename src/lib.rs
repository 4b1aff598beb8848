//! printwire: protocol and orchestration engine for a 3D-print dispatch
//! daemon.
//!
//! The daemon sits between user interfaces and printer drivers: clients
//! connect over a socket, ask for long-running jobs (slice, print, print to
//! file), and watch progress flow back while the daemon talks to its
//! drivers over further connections. This crate is the engine that makes
//! that shape work:
//!
//! - [`EventQueue`]/[`Event`]: queued, FIFO listener notification with a
//!   single delivery thread,
//! - [`Task`]: the PENDING/RUNNING/STOPPED lifecycle of a long-running
//!   job, with progress heartbeats and an ENDED/FAILED/CANCELED conclusion,
//! - [`sequence`]: composition of tasks into an aggregate that runs them
//!   one after another,
//! - [`JsonFramer`]: incremental recovery of back-to-back JSON texts from
//!   a byte stream,
//! - [`JsonRpc`]: a symmetric JSON-RPC 2.0 endpoint, server and client on
//!   the same connection, with deferred responses for methods that return
//!   tasks,
//! - [`Address`]/[`Transport`]: blocking socket plumbing underneath.
//!
//! # Example
//!
//! ```ignore
//! use printwire::{Address, EventQueue, JsonRpc, Outcome, Params};
//!
//! let queue = EventQueue::new();
//! queue.spawn_loop();
//!
//! let listener = "pipe:/var/run/printwired.socket".parse::<Address>()?.listen()?;
//! let transport = listener.accept()?;
//! let rpc = JsonRpc::new(Box::new(transport), &queue)?;
//! rpc.register("hello", |_params| Ok(Outcome::Value("world".into())));
//! rpc.run()?; // serve until the client hangs up
//! ```

pub mod error;
pub mod event;
pub mod process;
pub mod protocol;
pub mod rpc;
pub mod task;
pub mod transport;

pub use error::{AddressError, Error, IllegalTransition, MethodError, Result, RpcFault};
pub use event::{Event, EventQueue, ListenerHandle};
pub use process::sequence;
pub use protocol::JsonFramer;
pub use rpc::{JsonRpc, MethodRegistry, Outcome, Params};
pub use task::{Payload, Task, TaskConclusion, TaskEvent, TaskState};
pub use transport::{Address, StreamTransport, Transport, TransportListener};
