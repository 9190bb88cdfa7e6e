//! Worker system: one stream worker per rule.
//!
//! Core components:
//! - `state` — worker state machine (Starting → Running → Stopping → Stopped, or Failed)
//! - `stream` — the consume → transform → produce loop and its handle
//! - `pool` — synchronized registry of running workers

pub mod pool;
pub mod state;
pub mod stream;

pub use pool::{AddOutcome, PoolConfig, WorkerPool};
pub use state::{StateTransition, WorkerState};
pub use stream::{StreamWorker, WorkerHandle, WorkerStatus, WorkerTask};
