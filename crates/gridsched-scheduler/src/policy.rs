//! Job selection policies.
//!
//! The scheduler narrows the queue to eligible candidates (must-match,
//! fit, and for most policies a `GO` hint naming the resource) and the
//! policy picks one of them.

use std::fmt;

use gridsched_core::{Algorithm, Job, ResourceConf};
use gridsched_placement::{FitnessWeights, best_fit};

/// Picks the job to dispatch among pre-filtered candidates.
pub trait SchedulingPolicy: Send + Sync + fmt::Debug {
    fn algorithm(&self) -> Algorithm;

    /// Whether candidates must carry a `GO` hint naming the resource.
    fn requires_go(&self) -> bool {
        true
    }

    /// Queue index of the chosen job. `candidates` hold `(queue index,
    /// job)` pairs in queue order.
    fn select(&self, candidates: &[(usize, &Job)], res: &ResourceConf) -> Option<usize>;
}

/// First eligible job in queue order.
#[derive(Debug, Default, Clone)]
pub struct Fifo;

impl SchedulingPolicy for Fifo {
    fn algorithm(&self) -> Algorithm {
        Algorithm::Fifo
    }

    fn select(&self, candidates: &[(usize, &Job)], _res: &ResourceConf) -> Option<usize> {
        candidates.first().map(|(index, _)| *index)
    }
}

/// Eligible job that uses the largest share of the resource.
#[derive(Debug, Default, Clone)]
pub struct BestFit {
    pub weights: FitnessWeights,
}

impl SchedulingPolicy for BestFit {
    fn algorithm(&self) -> Algorithm {
        Algorithm::BestFit
    }

    fn select(&self, candidates: &[(usize, &Job)], res: &ResourceConf) -> Option<usize> {
        best_fit(candidates.iter().copied(), res, &self.weights).map(|(index, _)| index)
    }
}

/// Shortest fitting job, hinted or not.
#[derive(Debug, Default, Clone)]
pub struct MaxThroughput;

impl SchedulingPolicy for MaxThroughput {
    fn algorithm(&self) -> Algorithm {
        Algorithm::MaxThroughput
    }

    fn requires_go(&self) -> bool {
        false
    }

    fn select(&self, candidates: &[(usize, &Job)], _res: &ResourceConf) -> Option<usize> {
        // min_by_key keeps the first of equal keys.
        candidates
            .iter()
            .min_by_key(|(_, job)| job.cpu_time)
            .map(|(index, _)| *index)
    }
}

pub fn policy_for(algorithm: Algorithm) -> Box<dyn SchedulingPolicy> {
    match algorithm {
        Algorithm::Fifo => Box::new(Fifo),
        Algorithm::BestFit => Box::new(BestFit::default()),
        Algorithm::MaxThroughput => Box::new(MaxThroughput),
    }
}
