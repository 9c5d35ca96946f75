//! Dispatch history and job lifecycle bookkeeping.

use tracing::{debug, error, info};

use gridsched_core::{Job, JobStatus};

use crate::error::SchedulerResult;
use crate::migration::ReturnRequest;
use crate::scheduler::{Scheduler, job_owner};

impl Scheduler {
    /// Record that `job` was dispatched to `resource_id`.
    ///
    /// Marks the resource's newest history slot as scheduled with the
    /// price and raw margin of the decision.
    pub fn update_history(&mut self, job: &mut Job, resource_id: &str) {
        job.execute_timestamp = Some(self.now());

        let backlog = self.config.scheduler.history_backlog;
        while !self.history.is_empty() && self.history.len() >= backlog {
            self.history.pop_front();
        }
        if backlog > 0 {
            self.history.push_back(job.clone());
        }

        match self.registry.find_user_mut(job_owner(job)) {
            Some(user) => {
                user.sched_hist.push(job.job_id.clone());
                user.sched_cnt += 1;
            }
            // Owners of migrated jobs live elsewhere.
            None => debug!(job_id = %job.job_id, owner = %job_owner(job), "no local owner record"),
        }

        match self.registry.find_resource_mut(resource_id) {
            Some(res) => {
                res.stats.sched_hist.set_newest(1);
                res.stats.sched_cnt += 1;
                res.stats.price_hist.set_newest(job.exec_price);
                res.stats.diff_hist.set_newest(job.exec_rawdiff);
            }
            None => error!(%resource_id, job_id = %job.job_id, "history update for unknown resource"),
        }
    }

    /// A resource finished `job`. Queues it for return to its owner and
    /// returns the resource's new done count, if the resource is known.
    pub fn finished_job(&mut self, resource_id: &str, mut job: Job) -> SchedulerResult<Option<u64>> {
        job.status = JobStatus::Finished;
        let job_id = job.job_id.clone();
        self.done_queue.push_back(job)?;

        let Some(res) = self.registry.find_resource_mut(resource_id) else {
            error!(%resource_id, %job_id, "finished job from unknown resource");
            return Ok(None);
        };
        res.stats.done_hist.push(job_id.clone());
        res.stats.done_cnt += 1;
        info!(%resource_id, %job_id, done = res.stats.done_cnt, "job finished");
        Ok(Some(res.stats.done_cnt))
    }

    /// Account a finished job to its owner if the owner is local.
    /// Returns whether the job has reached its owner.
    pub fn returned_job(&mut self, job: &Job) -> bool {
        let Some(user) = self.registry.find_user(job_owner(job)) else {
            return false;
        };
        if self.registry.user_distance(user) != 0 {
            return false;
        }
        let Some(user) = self.registry.find_user_mut(job_owner(job)) else {
            return false;
        };
        user.done_hist.push(job.job_id.clone());
        user.done_cnt += 1;
        // Migrated jobs were never scheduled here.
        user.sched_cnt = user.sched_cnt.max(user.done_cnt);
        true
    }

    /// Walk the done queue: retire jobs owned locally and hand the rest
    /// to the peer on the path to their owner, at most `migrate_limit`
    /// of them. Jobs of unknown owners wait for later rounds.
    pub fn process_done_queue(&mut self) -> Vec<ReturnRequest> {
        let limit = self.config.scheduler.migrate_limit;
        let ids: Vec<String> = self.done_queue.iter().map(|j| j.job_id.clone()).collect();
        let mut returns = Vec::new();
        let mut local = 0usize;

        for job_id in ids {
            let Some(job) = self.done_queue.get_by_id(&job_id).cloned() else {
                continue;
            };
            if self.returned_job(&job) {
                self.done_queue.dequeue_by_id(&job_id);
                local += 1;
                continue;
            }
            if returns.len() >= limit {
                continue;
            }
            let Some(user) = self.registry.find_user(job_owner(&job)) else {
                info!(%job_id, owner = %job_owner(&job), "unknown owner, delaying return");
                continue;
            };
            let peer_id = self.registry.user_direction(user).to_string();
            if self.config.peer_cost(&peer_id).is_none() {
                info!(%job_id, %peer_id, "no direct link towards owner, delaying return");
                continue;
            }
            if let Some(job) = self.done_queue.dequeue_by_id(&job_id) {
                returns.push(ReturnRequest { peer_id, job });
            }
        }

        if local > 0 || !returns.is_empty() {
            info!(local, remote = returns.len(), "returned finished jobs");
        }
        returns
    }

    /// Remove jobs queued for longer than `expire_after`, scanning from the
    /// back of the queue. Returns the removed jobs.
    pub fn expire_jobs(&mut self) -> Vec<Job> {
        let expire_after = self.config.scheduler.expire_after;
        let mut expired = Vec::new();
        if expire_after <= 0.0 {
            return expired;
        }
        let now = self.now();
        for index in (0..self.queue.len()).rev() {
            let too_old = self
                .queue
                .get(index)
                .is_some_and(|job| now - job.queued_timestamp > expire_after);
            if !too_old {
                continue;
            }
            if let Some(mut job) = self.queue.dequeue(index) {
                info!(job_id = %job.job_id, queued_for = now - job.queued_timestamp, expire_after, "expiring job");
                job.status = JobStatus::Expired;
                expired.push(job);
            }
        }
        if !expired.is_empty() {
            info!(count = expired.len(), "expired jobs");
        }
        expired
    }
}
