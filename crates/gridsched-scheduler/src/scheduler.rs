//! Scheduler — owns the job queue and the registry of one grid server.
//!
//! The `Scheduler` is the single writer for everything a server knows:
//! - Registers resources on heartbeat and hands them jobs
//! - Plans every queued job against local and remote resources
//! - Merges peer gossip and publishes its own status
//! - Records dispatch and completion history
//!
//! Operations are synchronous and run to completion; the `Dispatcher`
//! serialises the events that drive them.

use std::collections::VecDeque;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use gridsched_cluster::{GossipBatch, PeerUpdateReport};
use gridsched_core::{
    Algorithm, Capacity, Clock, EntityKind, GridConfig, Job, JobStatus, JobType, MustMatch, ResourceConf,
    ScheduleHint,
};
use gridsched_placement::{HierarchicalVgridAccess, Planner, Pricing, VgridAccess, check_fit, job_fits_resource};
use gridsched_state::{JobQueue, Registry, RegistryCache};

use crate::error::{SchedulerError, SchedulerResult};
use crate::policy::{SchedulingPolicy, policy_for};

/// Load level below which a server advertises spare capacity.
pub const LO_LOAD: f64 = 0.45;
/// Load level above which a server advertises congestion.
pub const HI_LOAD: f64 = 0.85;
pub const TARGET_LOAD: f64 = 0.75;

/// Result of one resource heartbeat.
#[derive(Debug, Clone, Default, Serialize)]
pub struct HeartbeatOutcome {
    /// Job dispatched to the resource, if any.
    pub job: Option<Job>,
    /// Bulk jobs of the same user packed into the remaining slot.
    pub backfill: Vec<Job>,
    /// Jobs removed from the queue for waiting too long.
    pub expired: Vec<Job>,
}

/// How a filter pass left the queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FilterSummary {
    pub cached: usize,
    pub go: usize,
    pub migrate: usize,
    pub stay: usize,
}

/// Per-server scheduler state.
pub struct Scheduler {
    pub(crate) config: GridConfig,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) registry: Registry,
    pub(crate) queue: JobQueue,
    pub(crate) done_queue: JobQueue,
    pub(crate) history: VecDeque<Job>,
    pub(crate) pricing: Pricing,
    pub(crate) policy: Box<dyn SchedulingPolicy>,
    pub(crate) vgrids: Arc<dyn VgridAccess>,
}

impl Scheduler {
    /// Create a scheduler for the server described by `config`.
    pub fn new(config: GridConfig, clock: Arc<dyn Clock>) -> SchedulerResult<Self> {
        config.validate()?;
        let now = clock.now();
        let pricing = Pricing::new(config.scheduler.multiply_delta)?;
        let vgrids: Arc<dyn VgridAccess> = match &config.vgrids {
            Some(table) => Arc::new(HierarchicalVgridAccess::with_members(table.members.clone())),
            None => Arc::new(HierarchicalVgridAccess::open()),
        };
        let registry = Registry::new(config.server_id(), &config.server.server_fqdn, now);
        let policy = policy_for(config.scheduler.algorithm);

        info!(
            server_id = %config.server_id(),
            algorithm = ?config.scheduler.algorithm,
            peers = config.peers.len(),
            expire_after = config.scheduler.expire_after,
            "scheduler initialized"
        );

        let mut scheduler = Self {
            history: VecDeque::with_capacity(config.scheduler.history_backlog),
            config,
            clock,
            registry,
            queue: JobQueue::new(),
            done_queue: JobQueue::new(),
            pricing,
            policy,
            vgrids,
        };
        scheduler.update_local_server();
        Ok(scheduler)
    }

    /// Replace the VGrid access predicate.
    pub fn with_vgrid_access(mut self, vgrids: Arc<dyn VgridAccess>) -> Self {
        self.vgrids = vgrids;
        self
    }

    /// Replace the job selection policy.
    pub fn with_policy(mut self, policy: Box<dyn SchedulingPolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn config(&self) -> &GridConfig {
        &self.config
    }

    pub fn algorithm(&self) -> Algorithm {
        self.policy.algorithm()
    }

    pub fn now(&self) -> f64 {
        self.clock.now()
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut Registry {
        &mut self.registry
    }

    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    pub fn done_queue(&self) -> &JobQueue {
        &self.done_queue
    }

    /// Recently dispatched jobs, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &Job> {
        self.history.iter()
    }

    pub fn pricing(&self) -> &Pricing {
        &self.pricing
    }

    // ── Jobs ───────────────────────────────────────────────────────

    /// Queue a newly submitted job at the tail and account it to its
    /// owner.
    pub fn submit_job(&mut self, mut job: Job) -> SchedulerResult<()> {
        if job.job_id.is_empty() {
            return Err(SchedulerError::InvalidJob("empty JOB_ID".into()));
        }
        let now = self.now();
        if job.received_timestamp == 0.0 {
            job.received_timestamp = now;
        }
        job.queued_timestamp = now;
        job.status = JobStatus::Queued;
        let owner = job_owner(&job).to_string();
        let job_id = job.job_id.clone();
        self.queue.push_back(job)?;

        if !owner.is_empty() {
            let local_id = self.registry.local_id().to_string();
            let user = self.registry.update_user(&owner, &local_id)?;
            user.queue_hist.push(job_id.clone());
            user.queue_cnt += 1;
            self.registry.touch_user(&owner, now);
        }
        info!(%job_id, %owner, queued = self.queue.len(), "job queued");
        Ok(())
    }

    // ── Planning ───────────────────────────────────────────────────

    /// Plan every queued job, marking it `GO`, `MIGRATE <peer>` or `STAY`.
    ///
    /// With a requesting resource, jobs planned after it was first seen
    /// and within the reschedule interval keep their hint. The resource's
    /// `EXPECTED_DELAY` is rebuilt from the chance of it receiving each
    /// job.
    pub fn schedule_filter(&mut self, resource: Option<&ResourceConf>) -> FilterSummary {
        let now = self.now();
        let Self {
            config,
            registry,
            queue,
            pricing,
            vgrids,
            ..
        } = self;

        let mut request_id = None;
        let mut first_request = now;
        if let Some(conf) = resource {
            match registry.find_resource_mut(&conf.resource_id) {
                Some(res) => {
                    res.stats.expected_delay = 0.0;
                    if res.stats.first_seen > 0.0 {
                        first_request = res.stats.first_seen;
                    }
                    request_id = Some(conf.resource_id.clone());
                }
                None => warn!(resource_id = %conf.resource_id, "filtering for unregistered resource"),
            }
        }
        debug!(request = ?request_id, jobs = queue.len(), "running schedule filter");

        let reschedule_interval = config.scheduler.reschedule_interval;
        let mut summary = FilterSummary::default();
        for job in queue.iter_mut() {
            let cached = job.schedule_hint.is_some()
                && job
                    .schedule_timestamp
                    .is_some_and(|ts| ts > first_request && now - ts < reschedule_interval);
            if cached {
                summary.cached += 1;
                continue;
            }

            job.clear_schedule();
            let choice = Planner {
                registry: &*registry,
                pricing: &*pricing,
                vgrids: &**vgrids,
                expire_after: config.scheduler.expire_after,
                now,
            }
            .best_resource(job, request_id.as_deref());

            if let (Some(chance), Some(id)) = (choice.schedule_chance, request_id.as_deref()) {
                if let Some(res) = registry.find_resource_mut(id) {
                    res.stats.expected_delay += chance * job.cpu_time as f64;
                }
            }

            job.schedule_timestamp = Some(now);
            let targets = choice.targets();
            let Some(best) = choice.best else {
                debug!(job_id = %job.job_id, "no resource offers a suitable price");
                job.schedule_hint = Some(ScheduleHint::Stay);
                summary.stay += 1;
                continue;
            };
            if job.status == JobStatus::Frozen {
                debug!(job_id = %job.job_id, "holding frozen job");
                job.schedule_hint = Some(ScheduleHint::Stay);
                summary.stay += 1;
                continue;
            }

            if best.distance > 0 {
                let direction = registry
                    .find_resource(&best.resource_id)
                    .map(|res| registry.resource_direction(res).to_string())
                    .unwrap_or_default();
                debug!(job_id = %job.job_id, resource_id = %best.resource_id, peer = %direction, "remote resource offers best price");
                job.schedule_hint = Some(ScheduleHint::Migrate(direction));
                summary.migrate += 1;
            } else {
                debug!(job_id = %job.job_id, resource_id = %best.resource_id, diff = best.price_diff, "local resource offers best price");
                job.schedule_hint = Some(ScheduleHint::Go);
                summary.go += 1;
            }
            job.schedule_targets = targets;
            job.expected_delay = best.expected_delay;
            job.exec_price = best.res_price;
            job.exec_diff = best.price_diff;
            job.exec_rawdiff = best.raw_diff;
        }

        info!(
            cached = summary.cached,
            go = summary.go,
            migrate = summary.migrate,
            stay = summary.stay,
            "schedule filter done"
        );
        summary
    }

    /// Fitness and migration filter run before every selection.
    pub fn filter_jobs(&mut self, resource: Option<&ResourceConf>) -> FilterSummary {
        self.schedule_filter(resource)
    }

    /// Pick, dequeue and record the job the policy selects for `res`.
    ///
    /// Returns `None` when no queued job is eligible.
    pub fn schedule(&mut self, res: &ResourceConf, must_match: &MustMatch) -> Option<Job> {
        self.filter_jobs(Some(res));

        let requires_go = self.policy.requires_go();
        let vgrids = self.vgrids.as_ref();
        let candidates: Vec<(usize, &Job)> = self
            .queue
            .iter()
            .enumerate()
            .filter(|(_, job)| must_match.matches(job))
            .filter(|(_, job)| !requires_go || job.is_go_for(&res.resource_id))
            .filter(|(_, job)| check_fit(job, res, vgrids).is_ok())
            .collect();
        let index = self.policy.select(&candidates, res)?;

        let mut job = self.queue.dequeue(index)?;
        job_fits_resource(&mut job, res, self.vgrids.as_ref());
        job.exec_resource = Some(res.resource_id.clone());
        job.status = JobStatus::Executing;
        self.update_history(&mut job, &res.resource_id);
        info!(
            job_id = %job.job_id,
            resource_id = %res.resource_id,
            price = job.exec_price,
            policy = ?self.policy.algorithm(),
            "job scheduled"
        );
        Some(job)
    }

    /// Extra bulk jobs of the same user that fit beside `best_job` on
    /// `res`. The jobs are dequeued and recorded; the caller dispatches
    /// them together with `best_job`.
    pub fn backfill(&mut self, best_job: &Job, res: &ResourceConf) -> Vec<Job> {
        let mut extra: Vec<Job> = Vec::new();
        if best_job.job_type != JobType::Bulk {
            return extra;
        }
        let must_match = MustMatch {
            user_cert: Some(best_job.user_cert.clone()),
            job_type: Some(JobType::Bulk),
        };
        loop {
            let remaining = remaining_slot(std::iter::once(best_job).chain(&extra), res);
            debug!(
                job_id = %best_job.job_id,
                cpu_count = ?remaining.cpu_count,
                node_count = ?remaining.node_count,
                "backfill remaining slot"
            );
            match self.schedule(&remaining, &must_match) {
                Some(job) => {
                    info!(job_id = %best_job.job_id, backfill = %job.job_id, "backfill job");
                    extra.push(job);
                }
                None => break,
            }
        }
        extra
    }

    // ── Resources ──────────────────────────────────────────────────

    /// Full per-request sequence for a resource asking for work:
    /// register or refresh it, open a new history slot, expire old jobs,
    /// schedule (plus backfill) and finally adjust its price.
    pub fn heartbeat(&mut self, conf: ResourceConf, must_match: &MustMatch) -> SchedulerResult<HeartbeatOutcome> {
        if conf.resource_id.is_empty() {
            return Err(SchedulerError::InvalidResource("empty RESOURCE_ID".into()));
        }
        let now = self.now();
        let mut conf = conf;
        conf.server = self.registry.local_id().to_string();
        conf.last_seen = now;
        let resource_id = conf.resource_id.clone();

        let is_new = self.registry.find_resource(&resource_id).is_none();
        let res = self.registry.update_resource(conf.clone())?;
        if is_new {
            res.stats.cur_price = self.pricing.unit_price(&res.conf, res.stats.load_multiply, &[], now);
            info!(%resource_id, cur_price = res.stats.cur_price, "resource registered");
        }
        self.registry.touch_resource(&resource_id, now);

        let expired = self.expire_jobs();
        let job = self.schedule(&conf, must_match);
        let backfill = match &job {
            Some(job) => self.backfill(job, &conf),
            None => Vec::new(),
        };
        if job.is_none() {
            info!(%resource_id, queued = self.queue.len(), "no queued job fits resource");
        }

        if let Some(res) = self.registry.find_resource_mut(&resource_id) {
            self.pricing.update_price(res, now);
        }
        Ok(HeartbeatOutcome { job, backfill, expired })
    }

    // ── Servers and gossip ─────────────────────────────────────────

    /// Refresh the local server record.
    pub fn update_local_server(&mut self) {
        let now = self.now();
        let queued = self.queue.len();
        let local_id = self.registry.local_id().to_string();
        let server = self.registry.local_server_mut();
        server.fqdn = self.config.server.server_fqdn.clone();
        server.queued = queued;
        server.lo_load = LO_LOAD;
        server.hi_load = HI_LOAD;
        server.target_load = TARGET_LOAD;
        server.expire_after = self.config.scheduler.expire_after;
        server.distance = 0;
        server.migrate_cost = 0.0;
        server.migrate_direction = local_id;
        if server.first_seen == 0.0 {
            server.first_seen = now;
        }
        server.last_seen = now;
    }

    /// Status batch to send to every peer.
    pub fn publish_status(&mut self) -> GossipBatch {
        self.update_local_server();
        gridsched_cluster::snapshot(&self.registry, self.config.scheduler.forward_gossip)
    }

    /// Merge a gossip batch delivered by the direct peer `peer_id`.
    pub fn update_peer_status(&mut self, peer_id: &str, batch: GossipBatch) -> SchedulerResult<PeerUpdateReport> {
        let link_cost = self
            .config
            .peer_cost(peer_id)
            .ok_or_else(|| SchedulerError::UnknownPeer(peer_id.to_string()))?;
        let now = self.now();
        Ok(gridsched_cluster::update_peer_status(
            &mut self.registry,
            peer_id,
            link_cost,
            batch,
            self.config.scheduler.expire_peer,
            now,
        ))
    }

    /// Drop peers not heard from within `expire_peer`, then expire any
    /// entity older than the cache ttl.
    pub fn remove_stale_data(&mut self) -> Vec<(EntityKind, String)> {
        let now = self.now();
        let mut removed: Vec<(EntityKind, String)> =
            gridsched_cluster::remove_stale_data(&mut self.registry, self.config.scheduler.expire_peer, now)
                .into_iter()
                .map(|id| (EntityKind::Server, id))
                .collect();
        removed.extend(self.registry.expire_entities(now, self.config.scheduler.cache_ttl));
        removed
    }

    // ── Cache ──────────────────────────────────────────────────────

    pub fn get_cache(&self) -> RegistryCache {
        self.registry.get_cache()
    }

    /// Load a registry snapshot and expire whatever is too old.
    pub fn set_cache(&mut self, cache: RegistryCache) -> Vec<(EntityKind, String)> {
        let now = self.now();
        let expired = self.registry.set_cache(cache, now, self.config.scheduler.cache_ttl);
        self.update_local_server();
        expired
    }
}

/// User the job is accounted to.
pub fn job_owner(job: &Job) -> &str {
    if job.owner.is_empty() { &job.user_cert } else { &job.owner }
}

/// Copy of `res` with the memory, disk, node and cpu demands of `jobs`
/// subtracted, saturating at zero.
pub fn remaining_slot<'a>(jobs: impl IntoIterator<Item = &'a Job>, res: &ResourceConf) -> ResourceConf {
    let mut slot = res.clone();
    let jobs: Vec<&Job> = jobs.into_iter().collect();
    for field in [Capacity::Memory, Capacity::Disk, Capacity::NodeCount, Capacity::CpuCount] {
        if let Some(offered) = res.capacity(field) {
            let used: u64 = jobs.iter().map(|job| job.demand(field)).sum();
            slot.set_capacity(field, offered.saturating_sub(used));
        }
    }
    slot
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridsched_core::{ManualClock, Server};

    const START: f64 = 1_000_000.0;

    fn test_scheduler(algorithm: Algorithm) -> (Scheduler, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(START));
        let config = GridConfig::standalone("grid-a")
            .with_peer("grid-b", 30.0)
            .with_algorithm(algorithm);
        (Scheduler::new(config, clock.clone()).unwrap(), clock)
    }

    fn test_resource(id: &str, min_price: &str) -> ResourceConf {
        let mut conf = ResourceConf::new(id);
        conf.cpu_count = Some(2);
        conf.node_count = Some(1);
        conf.cpu_time = Some(300);
        conf.memory = Some(512);
        conf.disk = Some(8);
        conf.architecture = "X86".into();
        conf.job_type = JobType::All;
        conf.min_price = Some(min_price.into());
        conf
    }

    fn test_job(id: &str, cpu_count: u64, max_price: &str) -> Job {
        let mut job = Job::new(id);
        job.owner = "alice".into();
        job.user_cert = "alice".into();
        job.cpu_count = cpu_count;
        job.node_count = 1;
        job.cpu_time = 60;
        job.memory = 128;
        job.disk = 1;
        job.architecture = "X86".into();
        job.max_price = max_price.into();
        job
    }

    #[test]
    fn new_scheduler_publishes_local_server() {
        let (sched, _) = test_scheduler(Algorithm::Fifo);
        let local = sched.registry().local_server();
        assert_eq!(local.server_id, "grid-a");
        assert_eq!(local.distance, 0);
        assert_eq!(local.lo_load, LO_LOAD);
        assert_eq!(local.last_seen, START);
        assert_eq!(sched.algorithm(), Algorithm::Fifo);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let clock = Arc::new(ManualClock::new(START));
        let config = GridConfig::standalone("");
        assert!(matches!(Scheduler::new(config, clock), Err(SchedulerError::Config(_))));
    }

    #[test]
    fn submit_stamps_and_accounts_job() {
        let (mut sched, _) = test_scheduler(Algorithm::Fifo);
        sched.submit_job(test_job("j1", 1, "100")).unwrap();
        let job = sched.queue().get(0).unwrap();
        assert_eq!(job.queued_timestamp, START);
        assert_eq!(job.received_timestamp, START);
        let user = sched.registry().find_user("alice").unwrap();
        assert_eq!(user.queue_cnt, 1);
        assert_eq!(user.queue_hist.newest(), "j1");
        assert_eq!(user.server, "grid-a");

        assert!(matches!(
            sched.submit_job(test_job("j1", 1, "100")),
            Err(SchedulerError::State(_))
        ));
        assert!(matches!(
            sched.submit_job(Job::new("")),
            Err(SchedulerError::InvalidJob(_))
        ));
        assert_eq!(sched.registry().find_user("alice").unwrap().queue_cnt, 1);
    }

    #[test]
    fn heartbeat_dispatches_and_prices() {
        let (mut sched, _) = test_scheduler(Algorithm::Fifo);
        sched.submit_job(test_job("j1", 1, "100")).unwrap();
        let outcome = sched
            .heartbeat(test_resource("r1", "10"), &MustMatch::default())
            .unwrap();

        let job = outcome.job.unwrap();
        assert_eq!(job.exec_resource.as_deref(), Some("r1"));
        assert_eq!(job.status, JobStatus::Executing);
        assert_eq!(job.exec_price, 10.0);
        assert_eq!(job.exec_rawdiff, 90.0);
        assert!(sched.queue().is_empty());

        let res = sched.registry().find_resource("r1").unwrap();
        assert_eq!(*res.stats.sched_hist.newest(), 1);
        assert_eq!(res.stats.sched_cnt, 1);
        assert_eq!(*res.stats.price_hist.newest(), 10.0);
        assert!(res.stats.load_multiply > 1.0);
        assert!(res.stats.cur_price > 10.0);
        assert_eq!(sched.history().count(), 1);
        assert_eq!(sched.registry().find_user("alice").unwrap().sched_cnt, 1);
    }

    #[test]
    fn empty_resource_id_is_rejected() {
        let (mut sched, _) = test_scheduler(Algorithm::Fifo);
        let result = sched.heartbeat(ResourceConf::new(""), &MustMatch::default());
        assert!(matches!(result, Err(SchedulerError::InvalidResource(_))));
    }

    #[test]
    fn idle_heartbeat_lowers_nothing_below_one() {
        let (mut sched, clock) = test_scheduler(Algorithm::BestFit);
        for _ in 0..5 {
            clock.advance(60.0);
            let outcome = sched
                .heartbeat(test_resource("r1", "10"), &MustMatch::default())
                .unwrap();
            assert!(outcome.job.is_none());
        }
        let res = sched.registry().find_resource("r1").unwrap();
        assert_eq!(res.stats.load_multiply, 1.0);
        assert_eq!(res.stats.cur_price, 10.0);
    }

    #[test]
    fn filter_marks_stay_when_too_expensive() {
        let (mut sched, _) = test_scheduler(Algorithm::Fifo);
        sched.submit_job(test_job("j1", 1, "10")).unwrap();
        let outcome = sched
            .heartbeat(test_resource("r1", "100"), &MustMatch::default())
            .unwrap();
        assert!(outcome.job.is_none());
        let job = sched.queue().get(0).unwrap();
        assert_eq!(job.schedule_hint, Some(ScheduleHint::Stay));
        assert!(job.schedule_targets.is_empty());
    }

    #[test]
    fn frozen_jobs_stay() {
        let (mut sched, _) = test_scheduler(Algorithm::Fifo);
        sched.submit_job(test_job("j1", 1, "100")).unwrap();
        sched.queue.get_mut(0).unwrap().status = JobStatus::Frozen;
        let outcome = sched
            .heartbeat(test_resource("r1", "1"), &MustMatch::default())
            .unwrap();
        assert!(outcome.job.is_none());
        assert_eq!(sched.queue().get(0).unwrap().schedule_hint, Some(ScheduleHint::Stay));
    }

    #[test]
    fn cached_hint_survives_within_interval() {
        let (mut sched, clock) = test_scheduler(Algorithm::Fifo);
        sched.submit_job(test_job("j1", 1, "10")).unwrap();
        sched
            .heartbeat(test_resource("r1", "100"), &MustMatch::default())
            .unwrap();
        let conf = test_resource("r1", "100");

        // Planned in the same instant the resource appeared: not cached.
        clock.advance(10.0);
        let summary = sched.schedule_filter(Some(&conf));
        assert_eq!(summary.cached, 0);

        clock.advance(10.0);
        let summary = sched.schedule_filter(Some(&conf));
        assert_eq!(summary.cached, 1);

        clock.advance(1800.0);
        let summary = sched.schedule_filter(Some(&conf));
        assert_eq!(summary.cached, 0);
        assert_eq!(summary.stay, 1);
    }

    #[test]
    fn remote_resource_yields_migrate_hint() {
        let (mut sched, clock) = test_scheduler(Algorithm::Fifo);
        let mut peer = Server::new("grid-b", "grid-b.example.org");
        peer.distance = 1;
        peer.migrate_cost = 30.0;
        peer.migrate_direction = "grid-b".into();
        peer.last_seen = START;
        sched.registry_mut().update_server(peer);
        let mut remote = test_resource("rb", "10");
        remote.server = "grid-b".into();
        sched.registry_mut().update_resource(remote).unwrap();

        sched.submit_job(test_job("j1", 1, "100")).unwrap();
        clock.advance(1.0);
        let outcome = sched
            .heartbeat(test_resource("ra", "50"), &MustMatch::default())
            .unwrap();
        assert!(outcome.job.is_none());
        let job = sched.queue().get(0).unwrap();
        assert_eq!(job.schedule_hint, Some(ScheduleHint::Migrate("grid-b".into())));
        assert_eq!(job.schedule_targets, vec!["rb".to_string()]);
        assert_eq!(job.exec_diff, 58.0);
    }

    #[test]
    fn must_match_restricts_selection() {
        let (mut sched, _) = test_scheduler(Algorithm::Fifo);
        sched.submit_job(test_job("j1", 1, "100")).unwrap();
        let must_match = MustMatch {
            user_cert: Some("bob".into()),
            job_type: None,
        };
        let outcome = sched.heartbeat(test_resource("r1", "1"), &must_match).unwrap();
        assert!(outcome.job.is_none());
        assert_eq!(sched.queue().len(), 1);
    }

    #[test]
    fn backfill_packs_same_user_bulk_jobs() {
        let (mut sched, _) = test_scheduler(Algorithm::Fifo);
        for id in ["b1", "b2", "b3"] {
            let mut job = test_job(id, 1, "100");
            job.job_type = JobType::Bulk;
            sched.submit_job(job).unwrap();
        }
        let mut other = test_job("other", 1, "100");
        other.user_cert = "bob".into();
        other.owner = "bob".into();
        other.job_type = JobType::Bulk;
        sched.submit_job(other).unwrap();

        let mut res = test_resource("r1", "1");
        res.node_count = Some(2);
        let outcome = sched.heartbeat(res, &MustMatch::default()).unwrap();
        assert_eq!(outcome.job.unwrap().job_id, "b1");
        // Two cpus and two nodes: one each for b1, the rest for b2.
        let extra: Vec<&str> = outcome.backfill.iter().map(|j| j.job_id.as_str()).collect();
        assert_eq!(extra, vec!["b2"]);
        let left: Vec<&str> = sched.queue().iter().map(|j| j.job_id.as_str()).collect();
        assert_eq!(left, vec!["b3", "other"]);
    }

    #[test]
    fn batch_jobs_are_not_backfilled() {
        let (mut sched, _) = test_scheduler(Algorithm::Fifo);
        let best = test_job("j1", 1, "100");
        assert!(sched.backfill(&best, &test_resource("r1", "1")).is_empty());
    }

    #[test]
    fn remaining_slot_subtracts_and_saturates() {
        let res = test_resource("r1", "1");
        let a = test_job("a", 1, "1");
        let b = test_job("b", 3, "1");
        let slot = remaining_slot([&a], &res);
        assert_eq!(slot.cpu_count, Some(1));
        assert_eq!(slot.memory, Some(384));
        assert_eq!(slot.disk, Some(7));
        assert_eq!(slot.node_count, Some(0));
        assert_eq!(slot.cpu_time, Some(300));
        assert_eq!(remaining_slot([&a, &b], &res).cpu_count, Some(0));
    }

    #[test]
    fn owner_falls_back_to_certificate() {
        let mut job = Job::new("j1");
        job.user_cert = "cert".into();
        assert_eq!(job_owner(&job), "cert");
        job.owner = "alice".into();
        assert_eq!(job_owner(&job), "alice");
    }

    #[test]
    fn peer_status_requires_configured_peer() {
        let (mut sched, _) = test_scheduler(Algorithm::Fifo);
        let result = sched.update_peer_status("grid-x", GossipBatch::default());
        assert!(matches!(result, Err(SchedulerError::UnknownPeer(_))));
    }

    #[test]
    fn peer_gossip_round_trip_between_schedulers() {
        let (mut a, _) = test_scheduler(Algorithm::Fifo);
        let clock_b = Arc::new(ManualClock::new(START));
        let config_b = GridConfig::standalone("grid-b").with_peer("grid-a", 30.0);
        let mut b = Scheduler::new(config_b, clock_b).unwrap();
        b.heartbeat(test_resource("rb", "10"), &MustMatch::default()).unwrap();

        let report = a.update_peer_status("grid-b", b.publish_status()).unwrap();
        assert_eq!(report.accepted, vec!["grid-b".to_string()]);
        let peer = a.registry().find_server("grid-b").unwrap();
        assert_eq!(peer.distance, 1);
        assert_eq!(peer.migrate_cost, 30.0);
        assert_eq!(a.registry().find_resource("rb").unwrap().conf.server, "grid-b");
    }

    #[test]
    fn stale_peers_are_removed() {
        let (mut sched, clock) = test_scheduler(Algorithm::Fifo);
        let mut peer = Server::new("grid-b", "grid-b.example.org");
        peer.distance = 1;
        peer.last_seen = START;
        sched.registry_mut().update_server(peer);
        clock.advance(601.0);
        let removed = sched.remove_stale_data();
        assert_eq!(removed, vec![(EntityKind::Server, "grid-b".to_string())]);
    }

    #[test]
    fn cache_round_trip_is_a_no_op() {
        let (mut sched, _) = test_scheduler(Algorithm::Fifo);
        sched.heartbeat(test_resource("r1", "1"), &MustMatch::default()).unwrap();
        sched.submit_job(test_job("j1", 1, "100")).unwrap();
        sched.update_local_server();
        let cache = sched.get_cache();
        let expired = sched.set_cache(cache.clone());
        assert!(expired.is_empty());
        assert_eq!(sched.get_cache(), cache);
    }
}
