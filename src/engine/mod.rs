//! The continuous batch-analysis engine.
//!
//! This module is the orchestration core: two independently scheduled
//! processing pools share one exclusive evaluator, pull deduplicated work
//! from the job source, persist results through a validating sink, and
//! recover automatically from every failure class without terminating.
//!
//! # Architecture
//!
//! ```text
//!                 ┌─────────────────────────────┐
//!                 │           Engine            │
//!                 │ start/pause/resume/stop     │
//!                 └──────┬───────────┬──────────┘
//!                        │           │
//!             ┌──────────▼──┐   ┌────▼────────┐   ┌──────────────┐
//!             │ volume loop │   │  deep loop  │   │ health loop  │
//!             └──────┬──────┘   └────┬────────┘   └──────┬───────┘
//!                    │               │                   │
//!                    └───────┬───────┘              probes + recovery
//!                            │
//!                     ┌──────▼──────┐
//!                     │ BatchRunner │──── oracle (exclusive)
//!                     └──────┬──────┘──── job source
//!                            │
//!                     ┌──────▼──────┐
//!                     │ ResultSink  │──── store
//!                     └─────────────┘
//! ```
//!
//! Each loop reschedules itself unconditionally; failures become counters
//! and events, never terminations. Crossing the consecutive-error threshold
//! (or a failed health probe) runs the recovery procedure: suspend, back
//! off, reset the evaluator, zero the error counters, persist, resume.

pub mod batch;
pub mod events;
pub mod sink;
pub mod state;

mod health;
mod recovery;
mod scheduler;

pub use batch::{BatchError, BatchRunner};
pub use events::{EngineEvent, EventBus};
pub use scheduler::Engine;
pub use sink::{ResultSink, SinkError};
pub use state::{EngineSnapshot, EngineState, EngineStatus, PoolHealth};
