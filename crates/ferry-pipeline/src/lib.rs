//! Bounded-concurrency scheduling of the ferry pipeline.
//!
//! ```text
//! add_service ×N ─► download ─► build ─► push
//!                  (1 job per   (1 job per  (1 job per
//!                   template)    function)   function)
//! ```
//!
//! Every phase runs its jobs through a [`WorkerPool`] of `pool_size`
//! workers. The first failing job cancels the rest of its phase; jobs that
//! have not started never start, and the phase returns that first error.

pub mod error;
pub mod pool;
pub mod scheduler;
pub mod state;

pub use error::{Error, Result};
pub use pool::WorkerPool;
pub use scheduler::{Scheduler, SchedulerOptions};
pub use state::FunctionState;
