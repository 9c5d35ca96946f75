//! Pricing engine.
//!
//! A resource's unit price is its MINPRICE expression scaled by the
//! resource's load multiplier; a job's price ceiling is its MAXPRICE
//! expression. The multiplier follows supply and demand: it rises slowly
//! while jobs are dispatched below their ceiling and decays while
//! heartbeats go unanswered.

use tracing::{debug, error, info, warn};

use gridsched_core::clock::calendar_bindings;
use gridsched_core::{Bindings, Capacity, ExprResult, Job, Price, PriceEvaluator, Resource, ResourceConf};

/// CPU seconds per billable unit.
pub const UNIT_LENGTH: u64 = 3600;

/// Unit price used when MINPRICE cannot be evaluated, so typos never make
/// a resource free.
pub const BROKEN_MIN_PRICE: f64 = 1e9;

/// Recent history window used to detect sustained failure.
pub const SHORT_LEN: usize = 10;

#[derive(Debug, Clone)]
pub struct Pricing {
    evaluator: PriceEvaluator,
    multiply_delta: f64,
}

impl Pricing {
    pub fn new(multiply_delta: f64) -> ExprResult<Self> {
        Ok(Self {
            evaluator: PriceEvaluator::new()?,
            multiply_delta,
        })
    }

    pub fn multiply_delta(&self) -> f64 {
        self.multiply_delta
    }

    pub fn evaluator(&self) -> &PriceEvaluator {
        &self.evaluator
    }

    /// MINPRICE bindings: calendar fields plus one flag per runtime
    /// environment the resource offers, set when the job requires it.
    pub fn min_price_bindings(&self, conf: &ResourceConf, job_re: &[String], now: f64) -> Bindings {
        let mut bindings = calendar_bindings(now);
        for re in &conf.runtime_environment {
            let required = job_re.iter().any(|name| *name == re.name);
            bindings.insert(re.name.clone(), if required { 1.0 } else { 0.0 });
        }
        bindings
    }

    /// Price of one unit at `conf` for a job requiring `job_re`.
    pub fn unit_price(&self, conf: &ResourceConf, load_multiply: f64, job_re: &[String], now: f64) -> f64 {
        let min_price = match &conf.min_price {
            Some(expr) => {
                let bindings = self.min_price_bindings(conf, job_re, now);
                match self.evaluator.eval_price(expr, &bindings) {
                    Price::Value(v) => v,
                    Price::Illegal => {
                        error!(resource_id = %conf.resource_id, %expr, "MINPRICE failed to evaluate, forcing high price");
                        BROKEN_MIN_PRICE
                    }
                }
            }
            None => {
                warn!(resource_id = %conf.resource_id, "no MINPRICE, using 0");
                0.0
            }
        };
        min_price * load_multiply
    }

    /// Current MAXPRICE of `job`, with `exec_delay` bound to its age.
    pub fn max_price(&self, job: &Job, now: f64) -> Price {
        let bindings = Bindings::from([("exec_delay".to_string(), now - job.received_timestamp)]);
        self.evaluator.eval_price(&job.max_price, &bindings)
    }

    /// `(job_price, resource_price)` for running `job` on `res` now.
    ///
    /// MAXFILL fields are billed at the resource's full value. If the job
    /// extent cannot be computed the result is `(Illegal, 0.0)` so no
    /// dispatch can happen until the job is fixed.
    pub fn current_prices(&self, job: &Job, res: &Resource, now: f64) -> (Price, f64) {
        let mut extent = [0u64; 3];
        for (slot, field) in extent
            .iter_mut()
            .zip([Capacity::CpuCount, Capacity::NodeCount, Capacity::CpuTime])
        {
            *slot = if job.wants_max_fill(field) {
                match res.conf.capacity(field) {
                    Some(v) => v,
                    None => {
                        error!(job_id = %job.job_id, resource_id = %res.id(), %field, "MAXFILL field missing on resource");
                        return (Price::Illegal, 0.0);
                    }
                }
            } else {
                job.demand(field)
            };
        }

        let Some(cpu_secs) = extent[0]
            .checked_mul(extent[1])
            .and_then(|v| v.checked_mul(extent[2]))
        else {
            error!(job_id = %job.job_id, "job extent overflows");
            return (Price::Illegal, 0.0);
        };
        let units = cpu_secs.div_ceil(UNIT_LENGTH);

        let unit_price = self.unit_price(&res.conf, res.stats.load_multiply, &job.runtime_environment, now);
        let res_price = units as f64 * unit_price;
        let job_price = self.max_price(job, now);
        if job_price.is_illegal() {
            error!(job_id = %job.job_id, expr = %job.max_price, "MAXPRICE failed to evaluate");
        }
        (job_price, res_price)
    }

    /// Adjust the load multiplier after the newest history slot has been
    /// settled, then refresh `LOAD` and `CUR_PRICE`.
    pub fn update_price(&self, res: &mut Resource, now: f64) {
        let stats = &mut res.stats;
        let backlog = stats.sched_hist.len();
        stats.load = stats.sched_hist.count_where(|v| *v == 1) as f64 / backlog as f64;

        let window = SHORT_LEN.min(backlog);
        let short_load = stats.sched_hist.recent(window).filter(|v| **v == 1).count() as f64 / window as f64;
        let cur_sched = *stats.sched_hist.newest();
        let cur_price = *stats.price_hist.newest();
        let cur_diff = *stats.diff_hist.newest();
        let mult = stats.load_multiply;
        let delta = self.multiply_delta;

        let new_mult = if short_load == 0.0 && mult > 1.0 {
            let decayed = 1.0 + 0.9 * (mult - 1.0);
            info!(resource_id = %res.conf.resource_id, multiplier = decayed, "no recent jobs, multiplier falls back");
            decayed
        } else if cur_sched == 0 {
            (mult - delta).max(1.0)
        } else if cur_price == 0.0 {
            mult
        } else if cur_diff > 0.0 {
            let price_rise = delta * cur_price / mult;
            if cur_diff >= price_rise {
                mult + delta
            } else {
                // Close to the ceiling: rise by exactly cur_diff, rounded down.
                let prec = 1e16;
                mult + (prec * cur_diff * mult / cur_price).floor() / prec
            }
        } else {
            mult
        };

        stats.load_multiply = new_mult.max(1.0);
        let load_multiply = stats.load_multiply;
        res.stats.cur_price = self.unit_price(&res.conf, load_multiply, &[], now);
        debug!(
            resource_id = %res.conf.resource_id,
            load = res.stats.load,
            multiplier = load_multiply,
            cur_price = res.stats.cur_price,
            "price updated"
        );
    }
}
