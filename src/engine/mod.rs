// src/engine/mod.rs

//! The per-workspace scheduling engine.
//!
//! This module ties together:
//! - the modification queue (the only thread-safe hand-off point)
//! - the graph worker, a single cooperative consumer that owns the graph
//! - the scheduling state machine on (node-status, edge-status) pairs
//! - the run controller (subset bookkeeping, resume, completion sweep)
//! - the event bus that decouples scheduling from transport
//!
//! All mutation and propagation for a workspace is linearized in queue
//! order; HTTP handlers and runner callbacks only produce into the queue.

pub mod events;
pub mod mutation;
pub mod runs;
pub mod scheduler;
pub mod worker;

pub use events::{Event, EventBus, EventKind, EventSink, MemorySink};
pub use mutation::{ApplyOutcome, Mutation, MutationRecord, Origin, RunRequest};
pub use runs::{RunRegistry, RunState};
pub use worker::GraphWorker;
