//! Job migration between peer servers.
//!
//! The planner only marks jobs `MIGRATE <peer>`; this module hands them
//! over. Transport is external: requests are returned to the caller, and
//! jobs arriving from peers are queued like local submissions.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use gridsched_core::{Job, JobStatus};

use crate::error::SchedulerResult;
use crate::scheduler::Scheduler;

/// A queued job leaving for `peer_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationRequest {
    pub peer_id: String,
    pub job: Job,
}

/// A finished job travelling back towards its owner through `peer_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReturnRequest {
    pub peer_id: String,
    pub job: Job,
}

impl Scheduler {
    /// Dequeue up to `migrate_limit` jobs marked for migration to a
    /// directly connected peer.
    pub fn migrate_jobs(&mut self) -> Vec<MigrationRequest> {
        let mut requests = Vec::new();
        if self.config.peers.is_empty() {
            return requests;
        }
        let limit = self.config.scheduler.migrate_limit;
        let marked: Vec<(String, String)> = self
            .queue
            .iter()
            .filter_map(|job| {
                let peer = job.schedule_hint.as_ref()?.migrate_peer()?;
                Some((job.job_id.clone(), peer.to_string()))
            })
            .collect();

        for (job_id, peer_id) in marked {
            if requests.len() >= limit {
                break;
            }
            if self.config.peer_cost(&peer_id).is_none() {
                warn!(%job_id, %peer_id, "migration target is not a direct peer");
                continue;
            }
            let Some(mut job) = self.queue.dequeue_by_id(&job_id) else {
                continue;
            };
            job.clear_schedule();
            job.migrate_count += 1;
            info!(%job_id, %peer_id, migrate_count = job.migrate_count, "migrating job");
            requests.push(MigrationRequest { peer_id, job });
        }

        if !requests.is_empty() {
            info!(count = requests.len(), "migrated jobs");
        }
        requests
    }

    /// Queue a job handed over by a peer. Its timestamps and
    /// `MIGRATE_COUNT` are kept; planning starts afresh.
    pub fn accept_migrated_job(&mut self, mut job: Job) -> SchedulerResult<()> {
        job.clear_schedule();
        job.status = JobStatus::Queued;
        let job_id = job.job_id.clone();
        let migrate_count = job.migrate_count;
        self.queue.push_back(job)?;
        info!(%job_id, migrate_count, "accepted migrated job");
        Ok(())
    }

    /// Queue a finished job travelling back towards its owner.
    pub fn accept_returned_job(&mut self, job: Job) -> SchedulerResult<()> {
        info!(job_id = %job.job_id, "accepted returned job");
        self.done_queue.push_back(job)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use gridsched_core::{GridConfig, ManualClock, ScheduleHint};

    use super::*;

    fn test_scheduler(limit: usize) -> Scheduler {
        let mut config = GridConfig::standalone("grid-a").with_peer("grid-b", 2.0);
        config.scheduler.migrate_limit = limit;
        Scheduler::new(config, Arc::new(ManualClock::new(1_000.0))).unwrap()
    }

    fn hinted(id: &str, hint: Option<ScheduleHint>) -> Job {
        let mut job = Job::new(id);
        job.schedule_hint = hint;
        job.schedule_timestamp = Some(1.0);
        job
    }

    #[test]
    fn marked_jobs_leave_up_to_limit() {
        let mut sched = test_scheduler(2);
        let to_b = Some(ScheduleHint::Migrate("grid-b".into()));
        sched.queue.push_back(hinted("a", to_b.clone())).unwrap();
        sched.queue.push_back(hinted("b", Some(ScheduleHint::Go))).unwrap();
        sched.queue.push_back(hinted("c", to_b.clone())).unwrap();
        sched.queue.push_back(hinted("d", to_b)).unwrap();
        sched
            .queue
            .push_back(hinted("e", Some(ScheduleHint::Migrate("grid-z".into()))))
            .unwrap();

        let requests = sched.migrate_jobs();
        let ids: Vec<&str> = requests.iter().map(|r| r.job.job_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
        assert!(requests.iter().all(|r| r.peer_id == "grid-b"));
        assert!(requests.iter().all(|r| r.job.migrate_count == 1));
        assert!(requests.iter().all(|r| r.job.schedule_hint.is_none()));

        let left: Vec<&str> = sched.queue().iter().map(|j| j.job_id.as_str()).collect();
        assert_eq!(left, vec!["b", "d", "e"]);
    }

    #[test]
    fn no_peers_no_migration() {
        let mut sched = Scheduler::new(
            GridConfig::standalone("solo"),
            Arc::new(ManualClock::new(0.0)),
        )
        .unwrap();
        sched
            .queue
            .push_back(hinted("a", Some(ScheduleHint::Migrate("grid-b".into()))))
            .unwrap();
        assert!(sched.migrate_jobs().is_empty());
        assert_eq!(sched.queue().len(), 1);
    }

    #[test]
    fn migrated_job_keeps_count_and_loses_plan() {
        let mut sched = test_scheduler(10);
        let mut job = hinted("m1", Some(ScheduleHint::Go));
        job.migrate_count = 3;
        job.queued_timestamp = 500.0;
        sched.accept_migrated_job(job).unwrap();

        let queued = sched.queue().get_by_id("m1").unwrap();
        assert_eq!(queued.migrate_count, 3);
        assert_eq!(queued.queued_timestamp, 500.0);
        assert!(queued.schedule_hint.is_none());
        assert!(sched.accept_migrated_job(Job::new("m1")).is_err());
    }

    #[test]
    fn returned_job_lands_in_done_queue() {
        let mut sched = test_scheduler(10);
        sched.accept_returned_job(Job::new("r1")).unwrap();
        assert_eq!(sched.done_queue().len(), 1);
    }
}
