//! gridsched-scheduler — per-server grid job scheduling.
//!
//! Ties the registry, pricing engine and migration planner together into
//! one [`Scheduler`] per grid server. Resources pull work through
//! heartbeats; the scheduler plans each queued job (stay, go to a local
//! resource, or migrate towards a cheaper peer), dispatches with the
//! configured policy, and keeps dispatch history and the done queue.
//!
//! # Architecture
//!
//! ```text
//! Dispatcher (serial Event -> Outcome loop)
//!   └── Scheduler
//!       ├── Registry (servers, resources, users)
//!       ├── JobQueue (pending jobs) / JobQueue (done jobs)
//!       ├── Pricing (per-resource price control)
//!       ├── Planner (best resource per job, schedule hints)
//!       └── SchedulingPolicy (FIFO / BestFit / MaxThroughput)
//! ```

pub mod dispatch;
pub mod error;
pub mod history;
pub mod migration;
pub mod policy;
pub mod scheduler;

pub use dispatch::{Dispatcher, Event, Outcome};
pub use error::{SchedulerError, SchedulerResult};
pub use migration::{MigrationRequest, ReturnRequest};
pub use policy::{BestFit, Fifo, MaxThroughput, SchedulingPolicy, policy_for};
pub use scheduler::{FilterSummary, HeartbeatOutcome, Scheduler, job_owner, remaining_slot};
