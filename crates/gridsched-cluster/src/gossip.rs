//! Gossip batches exchanged between peer servers.
//!
//! A batch is a snapshot of servers, resources and users keyed by id. The
//! transport is external; batches arrive whole and are discarded once
//! integrated.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use gridsched_core::{Resource, Server, User};
use gridsched_state::Registry;

/// Status snapshot published to, or received from, a peer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GossipBatch {
    pub servers: BTreeMap<String, Server>,
    pub resources: BTreeMap<String, Resource>,
    pub users: BTreeMap<String, User>,
}

impl GossipBatch {
    pub fn is_empty(&self) -> bool {
        self.servers.is_empty() && self.resources.is_empty() && self.users.is_empty()
    }

    pub fn entity_count(&self) -> usize {
        self.servers.len() + self.resources.len() + self.users.len()
    }
}

/// Build the batch this server publishes to its peers.
///
/// Only the local server and entities bound to it are included unless
/// `forward` is set, in which case every known entity is relayed with the
/// path data this server holds for it. The local server always advertises
/// distance 0 and migrate cost 0.
pub fn snapshot(registry: &Registry, forward: bool) -> GossipBatch {
    let local_id = registry.local_id();
    let mut local = registry.local_server().clone();
    local.distance = 0;
    local.migrate_cost = 0.0;
    local.migrate_direction = local_id.to_string();

    let mut batch = GossipBatch::default();
    batch.servers.insert(local_id.to_string(), local);
    if forward {
        for server in registry.peer_servers() {
            batch.servers.insert(server.server_id.clone(), server.clone());
        }
    }
    for res in registry.resources() {
        if forward || registry.is_local(&res.conf.server) {
            batch.resources.insert(res.id().to_string(), res.clone());
        }
    }
    for user in registry.users() {
        if forward || registry.is_local(&user.server) {
            batch.users.insert(user.user_id.clone(), user.clone());
        }
    }

    debug!(
        server_id = %local_id,
        servers = batch.servers.len(),
        resources = batch.resources.len(),
        users = batch.users.len(),
        forward,
        "gossip snapshot built"
    );
    batch
}
