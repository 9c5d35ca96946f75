//! Serial event loop around a [`Scheduler`].
//!
//! Every state change arrives as an [`Event`] and is applied one at a time,
//! so the scheduler needs no locking. Each event yields exactly one
//! [`Outcome`], including failures.

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use gridsched_cluster::{GossipBatch, PeerUpdateReport};
use gridsched_core::{EntityKind, Job, MustMatch, ResourceConf};

use crate::migration::{MigrationRequest, ReturnRequest};
use crate::scheduler::{FilterSummary, HeartbeatOutcome, Scheduler};

/// Input to the dispatcher. Serialised as one JSON object per line with
/// an `event` tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    /// A local resource asks for work.
    Heartbeat {
        resource: ResourceConf,
        #[serde(default)]
        must_match: MustMatch,
    },
    /// A user submits a job locally.
    Submit { job: Job },
    /// A peer delivered its status snapshot.
    PeerStatus { peer_id: String, batch: GossipBatch },
    /// A resource finished a job.
    Completion { resource_id: String, job: Job },
    /// A peer handed over a queued job.
    Migrated { job: Job },
    /// A peer forwarded a finished job towards its owner.
    Returned { job: Job },
    /// Periodic planning round.
    Rebalance,
    /// Produce the status snapshot for peers.
    Publish,
    /// Drop peers and entities that went silent.
    ExpireStale,
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::Heartbeat { .. } => "heartbeat",
            Event::Submit { .. } => "submit",
            Event::PeerStatus { .. } => "peer_status",
            Event::Completion { .. } => "completion",
            Event::Migrated { .. } => "migrated",
            Event::Returned { .. } => "returned",
            Event::Rebalance => "rebalance",
            Event::Publish => "publish",
            Event::ExpireStale => "expire_stale",
        }
    }
}

/// Result of applying one [`Event`].
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    Dispatched {
        resource_id: String,
        #[serde(flatten)]
        result: HeartbeatOutcome,
    },
    Queued {
        job_id: String,
    },
    PeerUpdated {
        peer_id: String,
        report: PeerUpdateReport,
    },
    Finished {
        resource_id: String,
        job_id: String,
        done_count: Option<u64>,
    },
    Rebalanced {
        summary: FilterSummary,
        expired: Vec<Job>,
        migrations: Vec<MigrationRequest>,
        returns: Vec<ReturnRequest>,
    },
    Status {
        batch: GossipBatch,
    },
    Expired {
        removed: Vec<(EntityKind, String)>,
    },
    Failed {
        event: &'static str,
        error: String,
    },
}

/// Owns a [`Scheduler`] and applies events to it in arrival order.
pub struct Dispatcher {
    scheduler: Scheduler,
}

impl Dispatcher {
    pub fn new(scheduler: Scheduler) -> Self {
        Self { scheduler }
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn scheduler_mut(&mut self) -> &mut Scheduler {
        &mut self.scheduler
    }

    pub fn into_scheduler(self) -> Scheduler {
        self.scheduler
    }

    /// Apply a single event.
    pub fn handle(&mut self, event: Event) -> Outcome {
        let name = event.name();
        debug!(event = name, "handling event");
        let sched = &mut self.scheduler;

        let result = match event {
            Event::Heartbeat { resource, must_match } => {
                let resource_id = resource.resource_id.clone();
                sched
                    .heartbeat(resource, &must_match)
                    .map(|result| Outcome::Dispatched { resource_id, result })
            }
            Event::Submit { job } => {
                let job_id = job.job_id.clone();
                sched.submit_job(job).map(|()| Outcome::Queued { job_id })
            }
            Event::PeerStatus { peer_id, batch } => sched
                .update_peer_status(&peer_id, batch)
                .map(|report| Outcome::PeerUpdated { peer_id, report }),
            Event::Completion { resource_id, job } => {
                let job_id = job.job_id.clone();
                sched.finished_job(&resource_id, job).map(|done_count| Outcome::Finished {
                    resource_id,
                    job_id,
                    done_count,
                })
            }
            Event::Migrated { job } => {
                let job_id = job.job_id.clone();
                sched.accept_migrated_job(job).map(|()| Outcome::Queued { job_id })
            }
            Event::Returned { job } => {
                let job_id = job.job_id.clone();
                sched.accept_returned_job(job).map(|()| Outcome::Queued { job_id })
            }
            Event::Rebalance => Ok(rebalance(sched)),
            Event::Publish => Ok(Outcome::Status {
                batch: sched.publish_status(),
            }),
            Event::ExpireStale => Ok(Outcome::Expired {
                removed: sched.remove_stale_data(),
            }),
        };

        result.unwrap_or_else(|e| {
            warn!(event = name, error = %e, "event failed");
            Outcome::Failed {
                event: name,
                error: e.to_string(),
            }
        })
    }

    /// Apply events from `events` until the channel closes, the outcome
    /// receiver goes away or `shutdown` fires. Hands the scheduler back so
    /// the caller can persist its state.
    pub async fn run(
        mut self,
        mut events: mpsc::Receiver<Event>,
        outcomes: mpsc::Sender<Outcome>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Scheduler {
        info!(server_id = %self.scheduler.config().server_id(), "dispatcher started");

        loop {
            tokio::select! {
                event = events.recv() => {
                    let Some(event) = event else {
                        info!("event source closed");
                        break;
                    };
                    let outcome = self.handle(event);
                    if outcomes.send(outcome).await.is_err() {
                        warn!("outcome receiver dropped");
                        break;
                    }
                }
                _ = shutdown.changed() => {
                    info!("dispatcher shutting down");
                    break;
                }
            }
        }

        self.scheduler
    }
}

fn rebalance(sched: &mut Scheduler) -> Outcome {
    let expired = sched.expire_jobs();
    let summary = sched.filter_jobs(None);
    let migrations = sched.migrate_jobs();
    let returns = sched.process_done_queue();
    sched.update_local_server();
    Outcome::Rebalanced {
        summary,
        expired,
        migrations,
        returns,
    }
}
