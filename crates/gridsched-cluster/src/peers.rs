//! Peer state integrator.
//!
//! Merges gossip batches from peers into the local registry. Every server
//! entry is shifted by one hop (distance + 1, link cost added, direction =
//! the delivering peer) and then accepted only if it is fresh, newer than
//! what we hold and reached over a path that is no more expensive. Entities
//! bound to a rejected server are dropped from the batch so a worse path
//! never reintroduces them.

use std::collections::BTreeMap;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use gridsched_core::{Entity, EntityKind, Server};
use gridsched_state::Registry;

use crate::gossip::GossipBatch;

/// Why a server entry in a peer batch was not applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    #[error("entry is older than the peer expiry window")]
    Expired,

    #[error("entry is not newer than the known one")]
    StaleData,

    #[error("known path is cheaper")]
    PathTooExpensive,

    #[error("entry describes the local server")]
    LocalServer,

    #[error("migrate cost is negative or not finite")]
    InvalidCost,
}

/// What one call to [`update_peer_status`] changed.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PeerUpdateReport {
    pub accepted: Vec<String>,
    pub rejected: Vec<(String, RejectReason)>,
    pub updated: Vec<(EntityKind, String)>,
    pub pruned: Vec<(EntityKind, String)>,
    pub unbound: Vec<(EntityKind, String)>,
}

impl PeerUpdateReport {
    pub fn changed(&self) -> bool {
        !self.accepted.is_empty() || !self.updated.is_empty() || !self.pruned.is_empty()
    }
}

/// Whether `last_seen` falls outside the `expire_peer` window.
fn outdated(last_seen: f64, expire_peer: f64, now: f64) -> bool {
    if last_seen > now {
        warn!(last_seen, now, "found timestamp in the future");
    }
    last_seen + expire_peer < now
}

/// Decide whether `incoming` (already shifted by one hop) should replace
/// `current`.
pub fn relevant_update(
    current: Option<&Server>,
    incoming: &Server,
    expire_peer: f64,
    now: f64,
) -> Result<(), RejectReason> {
    if outdated(incoming.last_seen, expire_peer, now) {
        return Err(RejectReason::Expired);
    }
    let Some(current) = current else {
        info!(server_id = %incoming.server_id, "found new server");
        return Ok(());
    };
    if current.last_seen >= incoming.last_seen {
        return Err(RejectReason::StaleData);
    }
    if current.migrate_cost < incoming.migrate_cost {
        return Err(RejectReason::PathTooExpensive);
    }
    debug!(
        server_id = %incoming.server_id,
        cur_cost = current.migrate_cost,
        new_cost = incoming.migrate_cost,
        "found same or cheaper path"
    );
    Ok(())
}

/// Split off the batch entries bound to `server_id`.
fn take_bound<E: Entity>(batch: &mut BTreeMap<String, E>, server_id: &str) -> BTreeMap<String, E> {
    let (bound, rest) = std::mem::take(batch)
        .into_iter()
        .partition(|(_, e)| e.origin() == server_id);
    *batch = rest;
    bound
}

/// Integrate a gossip batch delivered by `peer_id` over a link costing
/// `link_cost`.
pub fn update_peer_status(
    registry: &mut Registry,
    peer_id: &str,
    link_cost: f64,
    batch: GossipBatch,
    expire_peer: f64,
    now: f64,
) -> PeerUpdateReport {
    let GossipBatch {
        servers,
        mut resources,
        mut users,
    } = batch;
    let mut report = PeerUpdateReport::default();

    for (server_id, mut server) in servers {
        server.server_id = server_id.clone();
        server.distance = server.distance.saturating_add(1);
        server.migrate_cost += link_cost;
        server.migrate_direction = peer_id.to_string();

        let verdict = if registry.is_local(&server_id) {
            Err(RejectReason::LocalServer)
        } else if !server.migrate_cost.is_finite() || server.migrate_cost < 0.0 {
            Err(RejectReason::InvalidCost)
        } else {
            relevant_update(registry.find_server(&server_id), &server, expire_peer, now)
        };

        let bound_resources = take_bound(&mut resources, &server_id);
        let bound_users = take_bound(&mut users, &server_id);

        if let Err(reason) = verdict {
            info!(
                %peer_id,
                %server_id,
                %reason,
                resources = bound_resources.len(),
                users = bound_users.len(),
                "not updating server"
            );
            report.rejected.push((server_id, reason));
            continue;
        }

        info!(%peer_id, %server_id, distance = server.distance, cost = server.migrate_cost, "updating server");
        registry.update_server(server);
        report.accepted.push(server_id.clone());

        // The origin dropped anything it no longer publishes.
        let gone: Vec<String> = registry
            .resources()
            .filter(|r| r.conf.server == server_id && !bound_resources.contains_key(r.id()))
            .map(|r| r.id().to_string())
            .collect();
        for id in gone {
            info!(%server_id, resource_id = %id, "pruning resource");
            registry.remove_resource(&id);
            report.pruned.push((EntityKind::Resource, id));
        }
        let gone: Vec<String> = registry
            .users()
            .filter(|u| u.server == server_id && !bound_users.contains_key(&u.user_id))
            .map(|u| u.user_id.clone())
            .collect();
        for id in gone {
            info!(%server_id, user_id = %id, "pruning user");
            registry.remove_user(&id);
            report.pruned.push((EntityKind::User, id));
        }

        for (id, mut res) in bound_resources {
            if registry
                .find_resource(&id)
                .is_some_and(|cur| cur.conf.last_seen >= res.conf.last_seen)
            {
                continue;
            }
            res.conf.resource_id = id.clone();
            match registry.insert_resource(res) {
                Ok(()) => report.updated.push((EntityKind::Resource, id)),
                Err(e) => warn!(resource_id = %id, error = %e, "failed to store peer resource"),
            }
        }
        for (id, mut user) in bound_users {
            if registry
                .find_user(&id)
                .is_some_and(|cur| cur.last_seen >= user.last_seen)
            {
                continue;
            }
            user.user_id = id.clone();
            match registry.insert_user(user) {
                Ok(()) => report.updated.push((EntityKind::User, id)),
                Err(e) => warn!(user_id = %id, error = %e, "failed to store peer user"),
            }
        }
    }

    if !resources.is_empty() {
        warn!(%peer_id, ids = ?resources.keys().collect::<Vec<_>>(), "unbound resources from peer");
        report
            .unbound
            .extend(resources.into_keys().map(|id| (EntityKind::Resource, id)));
    }
    if !users.is_empty() {
        warn!(%peer_id, ids = ?users.keys().collect::<Vec<_>>(), "unbound users from peer");
        report
            .unbound
            .extend(users.into_keys().map(|id| (EntityKind::User, id)));
    }

    report
}

/// Drop every peer server not heard from within `expire_peer` seconds,
/// together with the resources and users bound to it.
pub fn remove_stale_data(registry: &mut Registry, expire_peer: f64, now: f64) -> Vec<String> {
    let stale: Vec<String> = registry
        .peer_servers()
        .filter(|s| outdated(s.last_seen, expire_peer, now))
        .map(|s| s.server_id.clone())
        .collect();
    for server_id in &stale {
        info!(%server_id, "dropping stale data");
        registry.remove_server(server_id);
    }
    stale
}
