//! Migration planner.
//!
//! Finds the resource, local or remote, that offers the largest margin
//! between a job's price ceiling and the resource price once migration
//! and delay penalties are paid. The winner decides whether the job should
//! run here (`GO`), move to a peer (`MIGRATE`) or wait (`STAY`).

use serde::Serialize;
use tracing::debug;

use gridsched_core::{Job, Resource};
use gridsched_state::Registry;

use crate::fit::{VgridAccess, job_fits_resource};
use crate::pricing::Pricing;

/// Price band, relative to the best price, counted as competitive when
/// estimating the requesting resource's chance of getting the job.
pub const TOP_PRICE_BAND: f64 = 1.05;

/// Scale of the exponential delay penalty.
pub const DELAY_SCALE: f64 = 0.00005;

/// Delay penalties below this are treated as zero so free jobs still run
/// on free resources.
pub const DELAY_PENALTY_FLOOR: f64 = 0.001;

/// A resource the job fits at a non-negative margin.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Candidate {
    pub resource_id: String,
    pub distance: u32,
    /// Price of running the job on the resource.
    pub res_price: f64,
    /// `job_price - res_price`.
    pub raw_diff: f64,
    /// `raw_diff` minus migration and delay penalties.
    pub price_diff: f64,
    pub expected_delay: f64,
}

/// Outcome of [`Planner::best_resource`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BestChoice {
    pub best: Option<Candidate>,
    /// Other resources with the same margin and distance as the winner.
    pub equiv: Vec<String>,
    /// Number of candidates within the top price band.
    pub fit_count: usize,
    /// Estimated chance that the requesting resource gets the job.
    pub schedule_chance: Option<f64>,
}

impl BestChoice {
    /// Winner id followed by its equivalents.
    pub fn targets(&self) -> Vec<String> {
        self.best
            .iter()
            .map(|b| b.resource_id.clone())
            .chain(self.equiv.iter().cloned())
            .collect()
    }
}

/// Planner view over the registry at one instant.
pub struct Planner<'a> {
    pub registry: &'a Registry,
    pub pricing: &'a Pricing,
    pub vgrids: &'a dyn VgridAccess,
    pub expire_after: f64,
    pub now: f64,
}

impl<'a> Planner<'a> {
    /// Linear penalty on jobs that already moved, to avoid thrashing.
    pub fn thrashing_penalty(&self, job: &Job, res: &Resource) -> f64 {
        let distance = self.registry.resource_distance(res);
        2.0 * (f64::from(job.migrate_count) + f64::from(distance))
    }

    /// Cost of moving `job` to the server owning `res`. Zero for local
    /// resources.
    pub fn migrate_penalty(&self, job: &Job, res: &Resource) -> f64 {
        if self.registry.resource_distance(res) == 0 {
            return 0.0;
        }
        // Input sizes are not tracked; every job counts as one size unit.
        let size = 1.0;
        size * self.registry.resource_migrate_cost(res) + self.thrashing_penalty(job, res)
    }

    /// Penalty growing exponentially with the resource's expected delay as
    /// that delay approaches the job expiry horizon.
    pub fn delay_penalty(&self, res: &Resource) -> f64 {
        let expire_factor = if self.expire_after < 60.0 {
            0.0
        } else {
            16.0 / self.expire_after
        };
        let penalty = DELAY_SCALE * ((res.stats.expected_delay * expire_factor).exp() - 1.0);
        if penalty < DELAY_PENALTY_FLOOR { 0.0 } else { penalty }
    }

    fn candidate(&self, job: &Job, res: &Resource, distance: u32) -> Option<Candidate> {
        let (job_price, res_price) = self.pricing.current_prices(job, res, self.now);
        let raw_diff = job_price.as_f64() - res_price;
        let mut price_diff = raw_diff - self.delay_penalty(res);
        if distance > 0 {
            price_diff -= self.migrate_penalty(job, res);
        }
        if price_diff < 0.0 {
            debug!(
                job_id = %job.job_id,
                resource_id = %res.id(),
                res_price,
                job_price = job_price.as_f64(),
                price_diff,
                "price not acceptable"
            );
            return None;
        }
        Some(Candidate {
            resource_id: res.id().to_string(),
            distance,
            res_price,
            raw_diff,
            price_diff,
            expected_delay: res.stats.expected_delay,
        })
    }

    /// Select the best target for `job`.
    ///
    /// The winner maximises `price_diff`, then minimises distance; exact
    /// ties are collected in `equiv`. When `request_id` names the resource
    /// asking for work, its chance of receiving the job is estimated from
    /// the candidates priced within [`TOP_PRICE_BAND`] of the winner.
    pub fn best_resource(&self, job: &mut Job, request_id: Option<&str>) -> BestChoice {
        let mut local = Vec::new();
        let mut remote = Vec::new();

        for res in self.registry.resources() {
            if !job_fits_resource(job, &res.conf, self.vgrids) {
                continue;
            }
            let distance = self.registry.resource_distance(res);
            if let Some(candidate) = self.candidate(job, res, distance) {
                if distance > 0 {
                    remote.push(candidate);
                } else {
                    local.push(candidate);
                }
            }
        }

        let mut choice = BestChoice::default();
        for candidate in local.iter().chain(&remote) {
            let better = match &choice.best {
                None => true,
                Some(best) => {
                    candidate.price_diff > best.price_diff
                        || (candidate.price_diff == best.price_diff && candidate.distance < best.distance)
                }
            };
            let tied = choice
                .best
                .as_ref()
                .is_some_and(|best| candidate.price_diff == best.price_diff && candidate.distance == best.distance);
            if better {
                choice.best = Some(candidate.clone());
                choice.equiv.clear();
            } else if tied {
                choice.equiv.push(candidate.resource_id.clone());
            }
        }

        let Some(best) = &choice.best else {
            return choice;
        };

        let ceiling = best.res_price * TOP_PRICE_BAND;
        let top_local: Vec<&Candidate> = local.iter().filter(|c| c.res_price <= ceiling).collect();
        let top_remote = remote.iter().filter(|c| c.res_price <= ceiling).count();
        choice.fit_count = top_local.len() + top_remote;

        if let Some(request_id) = request_id {
            if top_local.iter().any(|c| c.resource_id == request_id) {
                choice.schedule_chance = if choice.fit_count == 1 || best.resource_id == request_id {
                    Some(1.0)
                } else {
                    Some(1.0 / choice.fit_count as f64)
                };
            } else if let Some(request) = self.registry.find_resource(request_id) {
                let mut trial = job.clone();
                if job_fits_resource(&mut trial, &request.conf, self.vgrids) {
                    choice.schedule_chance = Some(0.1 / choice.fit_count as f64);
                }
            }
        }

        choice
    }
}
