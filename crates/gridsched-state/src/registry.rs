//! Registry — in-memory maps of known servers, resources and users.
//!
//! Entities refer to their owning server by id (`SERVER`), never by
//! reference; every cross lookup goes through the registry. The local
//! server record is held apart from the peer map so it can never be
//! pruned, expired or replaced by gossip.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use gridsched_core::{Entity, EntityKind, Resource, ResourceConf, Server, User};

use crate::error::{StateError, StateResult};

/// Snapshot of the three registry maps for warm restarts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistryCache {
    pub servers: BTreeMap<String, Server>,
    pub resources: BTreeMap<String, Resource>,
    pub users: BTreeMap<String, User>,
}

impl RegistryCache {
    pub fn is_empty(&self) -> bool {
        self.servers.is_empty() && self.resources.is_empty() && self.users.is_empty()
    }
}

/// Known entities, keyed by id.
#[derive(Debug, Clone)]
pub struct Registry {
    local: Server,
    peers: BTreeMap<String, Server>,
    resources: BTreeMap<String, Resource>,
    users: BTreeMap<String, User>,
}

impl Registry {
    /// Create a registry holding only the local server.
    pub fn new(local_id: &str, fqdn: &str, now: f64) -> Self {
        let mut local = Server::new(local_id, fqdn);
        local.migrate_direction = local_id.to_string();
        local.first_seen = now;
        local.last_seen = now;
        Self {
            local,
            peers: BTreeMap::new(),
            resources: BTreeMap::new(),
            users: BTreeMap::new(),
        }
    }

    pub fn local_id(&self) -> &str {
        &self.local.server_id
    }

    pub fn local_server(&self) -> &Server {
        &self.local
    }

    pub fn local_server_mut(&mut self) -> &mut Server {
        &mut self.local
    }

    pub fn is_local(&self, server_id: &str) -> bool {
        server_id == self.local.server_id
    }

    // ── Servers ────────────────────────────────────────────────────

    /// The local server followed by every known peer.
    pub fn servers(&self) -> impl Iterator<Item = &Server> {
        std::iter::once(&self.local).chain(self.peers.values())
    }

    pub fn peer_servers(&self) -> impl Iterator<Item = &Server> {
        self.peers.values()
    }

    pub fn server_count(&self) -> usize {
        self.peers.len() + 1
    }

    pub fn find_server(&self, server_id: &str) -> Option<&Server> {
        if self.is_local(server_id) {
            Some(&self.local)
        } else {
            self.peers.get(server_id)
        }
    }

    pub fn find_server_mut(&mut self, server_id: &str) -> Option<&mut Server> {
        if self.is_local(server_id) {
            Some(&mut self.local)
        } else {
            self.peers.get_mut(server_id)
        }
    }

    /// Create or overwrite a server record. `FIRST_SEEN` survives when the
    /// incoming record does not carry one.
    ///
    /// Server records always travel whole: every field is serialized and
    /// none is optional, so replacing the record is the same as merging it
    /// key by key.
    pub fn update_server(&mut self, server: Server) -> &mut Server {
        let slot = if self.is_local(&server.server_id) {
            &mut self.local
        } else {
            match self.peers.entry(server.server_id.clone()) {
                Entry::Occupied(e) => e.into_mut(),
                Entry::Vacant(e) => {
                    debug!(server_id = %server.server_id, "new server");
                    return e.insert(server);
                }
            }
        };
        let first_seen = slot.first_seen;
        *slot = server;
        if slot.first_seen == 0.0 {
            slot.first_seen = first_seen;
        }
        slot
    }

    /// Remove a peer server and every resource and user bound to it.
    /// The local server cannot be removed.
    pub fn remove_server(&mut self, server_id: &str) -> Option<Server> {
        if self.is_local(server_id) {
            warn!(%server_id, "refusing to remove local server");
            return None;
        }
        let server = self.peers.remove(server_id)?;
        let before = (self.resources.len(), self.users.len());
        self.resources.retain(|_, r| r.conf.server != server_id);
        self.users.retain(|_, u| u.server != server_id);
        info!(
            %server_id,
            resources = before.0 - self.resources.len(),
            users = before.1 - self.users.len(),
            "server removed"
        );
        Some(server)
    }

    // ── Resources ──────────────────────────────────────────────────

    pub fn resources(&self) -> impl Iterator<Item = &Resource> {
        self.resources.values()
    }

    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }

    pub fn find_resource(&self, resource_id: &str) -> Option<&Resource> {
        self.resources.get(resource_id)
    }

    pub fn find_resource_mut(&mut self, resource_id: &str) -> Option<&mut Resource> {
        self.resources.get_mut(resource_id)
    }

    /// Create or merge a resource from its configuration. Statistics of an
    /// existing resource are kept; new resources start with zeroed history.
    pub fn update_resource(&mut self, conf: ResourceConf) -> StateResult<&mut Resource> {
        if self.find_server(&conf.server).is_none() {
            return Err(StateError::UnknownServer(conf.server));
        }
        match self.resources.entry(conf.resource_id.clone()) {
            Entry::Occupied(e) => {
                let res = e.into_mut();
                res.conf = conf;
                Ok(res)
            }
            Entry::Vacant(e) => {
                debug!(resource_id = %conf.resource_id, server_id = %conf.server, "new resource");
                Ok(e.insert(Resource::new(conf)))
            }
        }
    }

    /// Store a complete resource record, e.g. one received from a peer.
    /// Histories are refitted to their fixed length.
    pub fn insert_resource(&mut self, mut resource: Resource) -> StateResult<()> {
        if self.find_server(&resource.conf.server).is_none() {
            return Err(StateError::UnknownServer(resource.conf.server));
        }
        resource.stats.fit_histories();
        self.resources
            .insert(resource.conf.resource_id.clone(), resource);
        Ok(())
    }

    pub fn remove_resource(&mut self, resource_id: &str) -> Option<Resource> {
        self.resources.remove(resource_id)
    }

    // ── Users ──────────────────────────────────────────────────────

    pub fn users(&self) -> impl Iterator<Item = &User> {
        self.users.values()
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    pub fn find_user(&self, user_id: &str) -> Option<&User> {
        self.users.get(user_id)
    }

    pub fn find_user_mut(&mut self, user_id: &str) -> Option<&mut User> {
        self.users.get_mut(user_id)
    }

    /// Create a user bound to `server_id`, or rebind an existing one.
    pub fn update_user(&mut self, user_id: &str, server_id: &str) -> StateResult<&mut User> {
        if self.find_server(server_id).is_none() {
            return Err(StateError::UnknownServer(server_id.to_string()));
        }
        let user = self.users.entry(user_id.to_string()).or_insert_with(|| {
            debug!(%user_id, %server_id, "new user");
            User::new(user_id, server_id)
        });
        user.server = server_id.to_string();
        Ok(user)
    }

    /// Store a complete user record, e.g. one received from a peer.
    /// Histories are refitted to their fixed length.
    pub fn insert_user(&mut self, mut user: User) -> StateResult<()> {
        if self.find_server(&user.server).is_none() {
            return Err(StateError::UnknownServer(user.server));
        }
        user.fit_histories();
        self.users.insert(user.user_id.clone(), user);
        Ok(())
    }

    pub fn remove_user(&mut self, user_id: &str) -> Option<User> {
        self.users.remove(user_id)
    }

    // ── Freshness ──────────────────────────────────────────────────

    pub fn touch_server(&mut self, server_id: &str, now: f64) -> bool {
        let Some(server) = self.find_server_mut(server_id) else {
            return false;
        };
        if server.first_seen == 0.0 {
            server.first_seen = now;
        }
        server.last_seen = now;
        true
    }

    /// Mark a user as seen locally.
    pub fn touch_user(&mut self, user_id: &str, now: f64) -> bool {
        let local_id = self.local.server_id.clone();
        let Some(user) = self.users.get_mut(user_id) else {
            return false;
        };
        if user.first_seen == 0.0 {
            user.first_seen = now;
        }
        user.last_seen = now;
        user.server = local_id;
        true
    }

    /// Mark a resource as seen locally and open a fresh history slot.
    ///
    /// The newest `SCHED_HIST`, `PRICE_HIST` and `DIFF_HIST` entries start
    /// at zero and are only set if a job is actually dispatched before the
    /// next heartbeat.
    pub fn touch_resource(&mut self, resource_id: &str, now: f64) -> bool {
        let local_id = self.local.server_id.clone();
        let Some(res) = self.resources.get_mut(resource_id) else {
            return false;
        };
        if res.stats.first_seen == 0.0 {
            res.stats.first_seen = now;
        }
        res.conf.last_seen = now;
        res.conf.server = local_id;
        res.stats.last_load = res.stats.load;
        res.stats.sched_hist.rotate();
        res.stats.price_hist.rotate();
        res.stats.diff_hist.rotate();
        true
    }

    /// Drop every entity not seen within `ttl` seconds. The local server
    /// record is never expired.
    pub fn expire_entities(&mut self, now: f64, ttl: f64) -> Vec<(EntityKind, String)> {
        let mut expired = Vec::new();
        expire_map(&mut self.peers, now, ttl, &mut expired);
        // Entities bound to an expired server go with it.
        let gone: Vec<String> = expired.iter().map(|(_, id)| id.clone()).collect();
        self.resources.retain(|id, r| {
            let keep = !gone.contains(&r.conf.server);
            if !keep {
                expired.push((EntityKind::Resource, id.clone()));
            }
            keep
        });
        self.users.retain(|id, u| {
            let keep = !gone.contains(&u.server);
            if !keep {
                expired.push((EntityKind::User, id.clone()));
            }
            keep
        });
        expire_map(&mut self.resources, now, ttl, &mut expired);
        expire_map(&mut self.users, now, ttl, &mut expired);
        if !expired.is_empty() {
            info!(count = expired.len(), "expired cached entities");
        }
        expired
    }

    // ── Path lookups ───────────────────────────────────────────────

    /// Server record for `server_id`, falling back to the local server.
    fn server_or_local(&self, server_id: &str) -> &Server {
        match self.find_server(server_id) {
            Some(server) => server,
            None => {
                warn!(%server_id, "unknown server, using local server");
                &self.local
            }
        }
    }

    pub fn server_distance(&self, server_id: &str) -> u32 {
        self.server_or_local(server_id).distance
    }

    pub fn server_migrate_cost(&self, server_id: &str) -> f64 {
        self.server_or_local(server_id).migrate_cost
    }

    /// Peer to forward to in order to reach `server_id`.
    pub fn server_direction(&self, server_id: &str) -> &str {
        &self.server_or_local(server_id).migrate_direction
    }

    pub fn resource_distance(&self, res: &Resource) -> u32 {
        self.server_distance(&res.conf.server)
    }

    pub fn resource_migrate_cost(&self, res: &Resource) -> f64 {
        self.server_migrate_cost(&res.conf.server)
    }

    pub fn resource_direction(&self, res: &Resource) -> &str {
        self.server_direction(&res.conf.server)
    }

    pub fn user_distance(&self, user: &User) -> u32 {
        self.server_distance(&user.server)
    }

    pub fn user_direction(&self, user: &User) -> &str {
        self.server_direction(&user.server)
    }

    // ── Cache ──────────────────────────────────────────────────────

    pub fn get_cache(&self) -> RegistryCache {
        RegistryCache {
            servers: self
                .servers()
                .map(|s| (s.server_id.clone(), s.clone()))
                .collect(),
            resources: self.resources.clone(),
            users: self.users.clone(),
        }
    }

    /// Replace the registry contents with a cached snapshot, keeping the
    /// live local server record, then expire stale entries.
    pub fn set_cache(&mut self, cache: RegistryCache, now: f64, ttl: f64) -> Vec<(EntityKind, String)> {
        let local_id = self.local.server_id.clone();
        self.peers = cache
            .servers
            .into_iter()
            .filter(|(id, _)| *id != local_id)
            .collect();
        self.resources = cache.resources;
        self.users = cache.users;
        for res in self.resources.values_mut() {
            res.stats.fit_histories();
        }
        for user in self.users.values_mut() {
            user.fit_histories();
        }

        let peers = &self.peers;
        let known = |server: &str| server == local_id || peers.contains_key(server);
        let before = (self.resources.len(), self.users.len());
        self.resources.retain(|_, r| known(&r.conf.server));
        self.users.retain(|_, u| known(&u.server));
        let orphans = before.0 - self.resources.len() + before.1 - self.users.len();
        if orphans > 0 {
            warn!(orphans, "dropped cached entities bound to unknown servers");
        }

        info!(
            servers = self.peers.len(),
            resources = self.resources.len(),
            users = self.users.len(),
            "registry cache loaded"
        );
        self.expire_entities(now, ttl)
    }
}

fn expire_map<E: Entity>(
    map: &mut BTreeMap<String, E>,
    now: f64,
    ttl: f64,
    expired: &mut Vec<(EntityKind, String)>,
) {
    map.retain(|id, entity| {
        let keep = entity.last_seen() + ttl >= now;
        if !keep {
            debug!(kind = %E::KIND, %id, last_seen = entity.last_seen(), "expiring entity");
            expired.push((E::KIND, id.clone()));
        }
        keep
    });
}
