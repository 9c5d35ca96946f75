//! Job fitness scoring for best-fit selection.
//!
//! A job's fitness on a resource is the weighted sum of
//! `job_attr / resource_attr` over the countable attributes, so jobs that
//! use more of what the resource offers score higher. A mismatch in the
//! sandbox flag scales the score down to near zero.

use serde::{Deserialize, Serialize};

use gridsched_core::{Capacity, Job, ResourceConf};

/// Factor applied when job and resource disagree on sandboxing.
pub const SANDBOX_PENALTY: f64 = 0.0001;

/// Per-attribute weights for the fitness score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FitnessWeights {
    pub cpu_count: f64,
    pub node_count: f64,
    pub cpu_time: f64,
    pub memory: f64,
    pub disk: f64,
}

impl Default for FitnessWeights {
    fn default() -> Self {
        Self {
            cpu_count: 100.0,
            node_count: 100.0,
            cpu_time: 60.0,
            memory: 30.0,
            disk: 10.0,
        }
    }
}

impl FitnessWeights {
    pub fn weight(&self, field: Capacity) -> f64 {
        match field {
            Capacity::CpuCount => self.cpu_count,
            Capacity::NodeCount => self.node_count,
            Capacity::CpuTime => self.cpu_time,
            Capacity::Memory => self.memory,
            Capacity::Disk => self.disk,
        }
    }

    /// Score of a job that uses exactly what the resource offers.
    pub fn perfect_score(&self) -> f64 {
        Capacity::ALL.iter().map(|f| self.weight(*f)).sum()
    }
}

/// Fraction of `offered` that `wanted` uses. Nothing wanted of nothing
/// offered is a perfect fit.
fn fit_rate(wanted: u64, offered: u64) -> f64 {
    match (wanted, offered) {
        (0, 0) => 1.0,
        (_, 0) => 0.0,
        (w, o) => w as f64 / o as f64,
    }
}

/// Weighted fitness of `job` on `res` (higher = tighter fit).
pub fn fitness_score(job: &Job, res: &ResourceConf, weights: &FitnessWeights) -> f64 {
    let mut score: f64 = Capacity::ALL
        .iter()
        .map(|field| {
            let offered = res.capacity(*field).unwrap_or(0);
            fit_rate(job.demand(*field), offered) * weights.weight(*field)
        })
        .sum();
    if res.sandbox != job.sandbox {
        score *= SANDBOX_PENALTY;
    }
    score
}

/// Index and score of the best-fitting job among `candidates`.
/// The earliest job wins ties.
pub fn best_fit<'a>(
    candidates: impl IntoIterator<Item = (usize, &'a Job)>,
    res: &ResourceConf,
    weights: &FitnessWeights,
) -> Option<(usize, f64)> {
    let mut best: Option<(usize, f64)> = None;
    for (index, job) in candidates {
        let score = fitness_score(job, res, weights);
        if best.is_none_or(|(_, top)| score > top) {
            best = Some((index, score));
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_job(id: &str, cpu: u64) -> Job {
        let mut job = Job::new(id);
        job.cpu_count = cpu;
        job.node_count = 1;
        job.cpu_time = 60;
        job.memory = 128;
        job.disk = 1;
        job
    }

    fn make_resource() -> ResourceConf {
        let mut res = ResourceConf::new("r1");
        res.cpu_count = Some(2);
        res.node_count = Some(1);
        res.cpu_time = Some(300);
        res.memory = Some(512);
        res.disk = Some(8);
        res
    }

    #[test]
    fn weighted_ratios() {
        let weights = FitnessWeights::default();
        let res = make_resource();
        assert!((fitness_score(&make_job("j1", 1), &res, &weights) - 170.75).abs() < 1e-9);
        assert!((fitness_score(&make_job("j2", 2), &res, &weights) - 220.75).abs() < 1e-9);
    }

    #[test]
    fn empty_job_on_empty_resource_is_perfect() {
        let weights = FitnessWeights::default();
        let mut res = ResourceConf::new("r0");
        for field in Capacity::ALL {
            res.set_capacity(field, 0);
        }
        let score = fitness_score(&Job::new("j0"), &res, &weights);
        assert_eq!(score, weights.perfect_score());
        assert_eq!(score, 300.0);
    }

    #[test]
    fn sandbox_mismatch_penalised() {
        let weights = FitnessWeights::default();
        let mut res = make_resource();
        let job = make_job("j1", 1);
        let plain = fitness_score(&job, &res, &weights);
        res.sandbox = true;
        let penalised = fitness_score(&job, &res, &weights);
        assert!((penalised - plain * SANDBOX_PENALTY).abs() < 1e-12);
    }

    #[test]
    fn best_fit_picks_highest_then_earliest() {
        let weights = FitnessWeights::default();
        let res = make_resource();
        let jobs = [make_job("a", 1), make_job("b", 2), make_job("c", 2)];
        let best = best_fit(jobs.iter().enumerate(), &res, &weights).unwrap();
        assert_eq!(best.0, 1);
        assert!(best_fit(std::iter::empty(), &res, &weights).is_none());
    }
}
