//! Placement decisions for the grid scheduler.
//!
//! This crate answers "where should this job run, and at what price". It
//! never owns the job queue (that's `gridsched-scheduler`); it reads the
//! registry and returns verdicts the scheduler applies.
//!
//! # Components
//!
//! - **`fit`** — Hard constraints between a job and a resource
//! - **`pricing`** — MINPRICE/MAXPRICE evaluation and the load multiplier
//! - **`scorer`** — Weighted fitness score used by best-fit selection
//! - **`planner`** — Best local or remote target with migration penalties

pub mod fit;
pub mod planner;
pub mod pricing;
pub mod scorer;

pub use fit::{
    DEFAULT_VGRID, FitRejection, HierarchicalVgridAccess, VgridAccess, check_fit, job_fits_resource, shell_pattern,
    vgrid_is_default, vgrid_request_and_job_match,
};
pub use planner::{BestChoice, Candidate, Planner};
pub use pricing::Pricing;
pub use scorer::{FitnessWeights, best_fit, fitness_score};
