//! Shared records used across the grid scheduler crates.
//!
//! Field names serialize in the upper-case form used on the wire between
//! grid servers (`JOB_ID`, `CPUCOUNT`, `MIGRATE_COST`, ...).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::ring::RingBuffer;

/// Slots kept in each resource history ring.
pub const RESOURCE_BACKLOG: usize = 100;
/// Slots kept in each user history ring.
pub const USER_BACKLOG: usize = 100;
/// Default length of the global dispatch history.
pub const HISTORY_BACKLOG: usize = 100;

// ── Enumerations ───────────────────────────────────────────────────

/// Countable job requirements / resource capacities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Capacity {
    CpuCount,
    NodeCount,
    CpuTime,
    Memory,
    Disk,
}

impl Capacity {
    pub const ALL: [Capacity; 5] = [
        Capacity::CpuCount,
        Capacity::NodeCount,
        Capacity::CpuTime,
        Capacity::Memory,
        Capacity::Disk,
    ];

    pub fn field(self) -> &'static str {
        match self {
            Capacity::CpuCount => "CPUCOUNT",
            Capacity::NodeCount => "NODECOUNT",
            Capacity::CpuTime => "CPUTIME",
            Capacity::Memory => "MEMORY",
            Capacity::Disk => "DISK",
        }
    }
}

impl fmt::Display for Capacity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.field())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobType {
    #[default]
    Batch,
    Bulk,
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobStatus {
    #[default]
    Queued,
    Executing,
    Frozen,
    Finished,
    Canceled,
    Expired,
}

/// Planner annotation attached to each queued job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ScheduleHint {
    /// Run on one of the local `SCHEDULE_TARGETS`.
    Go,
    /// Forward to the named peer server.
    Migrate(String),
    /// No acceptable resource right now.
    Stay,
}

impl ScheduleHint {
    pub fn is_go(&self) -> bool {
        matches!(self, ScheduleHint::Go)
    }

    pub fn migrate_peer(&self) -> Option<&str> {
        match self {
            ScheduleHint::Migrate(peer) => Some(peer),
            _ => None,
        }
    }
}

impl fmt::Display for ScheduleHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScheduleHint::Go => f.write_str("GO"),
            ScheduleHint::Migrate(peer) => write!(f, "MIGRATE {peer}"),
            ScheduleHint::Stay => f.write_str("STAY"),
        }
    }
}

impl FromStr for ScheduleHint {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split_whitespace();
        match (parts.next(), parts.next(), parts.next()) {
            (Some("GO"), _, None) => Ok(ScheduleHint::Go),
            (Some("STAY"), None, None) => Ok(ScheduleHint::Stay),
            (Some("MIGRATE"), Some(peer), None) => Ok(ScheduleHint::Migrate(peer.to_string())),
            _ => Err(format!("invalid schedule hint: {s:?}")),
        }
    }
}

impl TryFrom<String> for ScheduleHint {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ScheduleHint> for String {
    fn from(hint: ScheduleHint) -> Self {
        hint.to_string()
    }
}

// ── Runtime environments ───────────────────────────────────────────

/// A runtime environment offered by a resource, with its parameter bindings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RuntimeEnvRepr")]
pub struct RuntimeEnv {
    pub name: String,
    pub bindings: Vec<(String, String)>,
}

impl RuntimeEnv {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            bindings: Vec::new(),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RuntimeEnvRepr {
    Name(String),
    Pair(String, Vec<(String, String)>),
    Full {
        name: String,
        #[serde(default)]
        bindings: Vec<(String, String)>,
    },
}

impl From<RuntimeEnvRepr> for RuntimeEnv {
    fn from(repr: RuntimeEnvRepr) -> Self {
        match repr {
            RuntimeEnvRepr::Name(name) => RuntimeEnv::named(name),
            RuntimeEnvRepr::Pair(name, bindings) | RuntimeEnvRepr::Full { name, bindings } => {
                RuntimeEnv { name, bindings }
            }
        }
    }
}

// ── Jobs ───────────────────────────────────────────────────────────

fn default_maxprice() -> String {
    "0".to_string()
}

/// A queued grid job.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct Job {
    pub job_id: String,
    #[serde(default)]
    pub owner: String,
    #[serde(default)]
    pub user_cert: String,

    #[serde(default, rename = "CPUCOUNT")]
    pub cpu_count: u64,
    #[serde(default, rename = "NODECOUNT")]
    pub node_count: u64,
    #[serde(default, rename = "CPUTIME")]
    pub cpu_time: u64,
    #[serde(default)]
    pub memory: u64,
    #[serde(default)]
    pub disk: u64,

    #[serde(default)]
    pub architecture: String,
    #[serde(default)]
    pub platform: String,
    #[serde(default, rename = "JOBTYPE")]
    pub job_type: JobType,
    #[serde(default)]
    pub sandbox: bool,
    #[serde(default, rename = "RUNTIMEENVIRONMENT")]
    pub runtime_environment: Vec<String>,
    #[serde(default)]
    pub vgrid: Vec<String>,
    #[serde(default = "default_maxprice", rename = "MAXPRICE")]
    pub max_price: String,
    #[serde(default, rename = "MAXFILL")]
    pub max_fill: Vec<String>,

    #[serde(default)]
    pub received_timestamp: f64,
    #[serde(default)]
    pub queued_timestamp: f64,
    #[serde(default, rename = "FORCEDDESTINATION", skip_serializing_if = "Option::is_none")]
    pub forced_destination: Option<String>,
    #[serde(default, rename = "RESOURCE")]
    pub resource_patterns: Vec<String>,
    #[serde(default)]
    pub migrate_count: u32,
    #[serde(default)]
    pub status: JobStatus,

    // Planner fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule_timestamp: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule_hint: Option<ScheduleHint>,
    #[serde(default)]
    pub expected_delay: f64,
    #[serde(default)]
    pub schedule_targets: Vec<String>,
    #[serde(default)]
    pub exec_price: f64,
    #[serde(default)]
    pub exec_diff: f64,
    #[serde(default)]
    pub exec_rawdiff: f64,

    // Dispatch fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exec_resource: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execute_timestamp: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_vgrid: Option<String>,
}

impl Job {
    pub fn new(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            max_price: default_maxprice(),
            ..Default::default()
        }
    }

    /// Requested amount of a countable attribute.
    pub fn demand(&self, capacity: Capacity) -> u64 {
        match capacity {
            Capacity::CpuCount => self.cpu_count,
            Capacity::NodeCount => self.node_count,
            Capacity::CpuTime => self.cpu_time,
            Capacity::Memory => self.memory,
            Capacity::Disk => self.disk,
        }
    }

    pub fn set_demand(&mut self, capacity: Capacity, value: u64) {
        match capacity {
            Capacity::CpuCount => self.cpu_count = value,
            Capacity::NodeCount => self.node_count = value,
            Capacity::CpuTime => self.cpu_time = value,
            Capacity::Memory => self.memory = value,
            Capacity::Disk => self.disk = value,
        }
    }

    /// Whether MAXFILL asks for the resource's full value of `capacity`.
    pub fn wants_max_fill(&self, capacity: Capacity) -> bool {
        self.max_fill
            .iter()
            .any(|f| f.eq_ignore_ascii_case("ALL") || f.eq_ignore_ascii_case(capacity.field()))
    }

    /// Reset every planner field to its unscheduled default.
    pub fn clear_schedule(&mut self) {
        self.schedule_timestamp = None;
        self.schedule_hint = None;
        self.expected_delay = 0.0;
        self.schedule_targets.clear();
        self.exec_price = 0.0;
        self.exec_diff = 0.0;
        self.exec_rawdiff = 0.0;
    }

    /// Copy the planner fields of `src` onto this job.
    pub fn copy_schedule(&mut self, src: &Job) {
        self.schedule_timestamp = src.schedule_timestamp;
        self.schedule_hint = src.schedule_hint.clone();
        self.expected_delay = src.expected_delay;
        self.schedule_targets = src.schedule_targets.clone();
        self.exec_price = src.exec_price;
        self.exec_diff = src.exec_diff;
        self.exec_rawdiff = src.exec_rawdiff;
    }

    pub fn is_go_for(&self, resource_id: &str) -> bool {
        self.schedule_hint.as_ref().is_some_and(ScheduleHint::is_go)
            && self.schedule_targets.iter().any(|t| t == resource_id)
    }
}

/// Attribute constraints a policy must honour when picking a job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct MustMatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_cert: Option<String>,
    #[serde(default, rename = "JOBTYPE", skip_serializing_if = "Option::is_none")]
    pub job_type: Option<JobType>,
}

impl MustMatch {
    pub fn is_empty(&self) -> bool {
        self.user_cert.is_none() && self.job_type.is_none()
    }

    pub fn matches(&self, job: &Job) -> bool {
        self.user_cert.as_ref().is_none_or(|c| *c == job.user_cert)
            && self.job_type.is_none_or(|t| t == job.job_type)
    }
}

// ── Resources ──────────────────────────────────────────────────────

fn default_true() -> bool {
    true
}

/// Static resource configuration as presented in a heartbeat or gossip.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct ResourceConf {
    pub resource_id: String,
    #[serde(default, rename = "HOSTURL")]
    pub host_url: String,
    #[serde(default)]
    pub server: String,

    #[serde(default, rename = "CPUCOUNT", skip_serializing_if = "Option::is_none")]
    pub cpu_count: Option<u64>,
    #[serde(default, rename = "NODECOUNT", skip_serializing_if = "Option::is_none")]
    pub node_count: Option<u64>,
    #[serde(default, rename = "CPUTIME", skip_serializing_if = "Option::is_none")]
    pub cpu_time: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk: Option<u64>,

    #[serde(default)]
    pub architecture: String,
    #[serde(default)]
    pub platform: String,
    #[serde(default, rename = "JOBTYPE")]
    pub job_type: JobType,
    #[serde(default)]
    pub sandbox: bool,
    #[serde(default = "default_true")]
    pub anonymous: bool,
    #[serde(default, rename = "RUNTIMEENVIRONMENT")]
    pub runtime_environment: Vec<RuntimeEnv>,
    #[serde(default)]
    pub vgrid: Vec<String>,
    #[serde(default, rename = "MINPRICE", skip_serializing_if = "Option::is_none")]
    pub min_price: Option<String>,
    #[serde(default)]
    pub last_seen: f64,
}

impl ResourceConf {
    pub fn new(resource_id: impl Into<String>) -> Self {
        Self {
            resource_id: resource_id.into(),
            anonymous: true,
            ..Default::default()
        }
    }

    /// Offered amount of a countable attribute, if configured.
    pub fn capacity(&self, capacity: Capacity) -> Option<u64> {
        match capacity {
            Capacity::CpuCount => self.cpu_count,
            Capacity::NodeCount => self.node_count,
            Capacity::CpuTime => self.cpu_time,
            Capacity::Memory => self.memory,
            Capacity::Disk => self.disk,
        }
    }

    pub fn set_capacity(&mut self, capacity: Capacity, value: u64) {
        let slot = match capacity {
            Capacity::CpuCount => &mut self.cpu_count,
            Capacity::NodeCount => &mut self.node_count,
            Capacity::CpuTime => &mut self.cpu_time,
            Capacity::Memory => &mut self.memory,
            Capacity::Disk => &mut self.disk,
        };
        *slot = Some(value);
    }

    /// Name used when matching job `RESOURCE` patterns.
    pub fn public_id(&self) -> String {
        if self.anonymous {
            anon_resource_id(&self.resource_id)
        } else {
            self.resource_id.clone()
        }
    }

    pub fn offers_runtime_env(&self, name: &str) -> bool {
        self.runtime_environment.iter().any(|re| re.name == name)
    }
}

/// Runtime statistics the scheduler keeps per resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", default)]
pub struct ResourceStats {
    pub load: f64,
    pub last_load: f64,
    pub expected_delay: f64,
    pub load_multiply: f64,
    pub cur_price: f64,
    pub sched_hist: RingBuffer<u8>,
    pub price_hist: RingBuffer<f64>,
    pub diff_hist: RingBuffer<f64>,
    pub done_hist: RingBuffer<String>,
    pub sched_cnt: u64,
    pub done_cnt: u64,
    pub first_seen: f64,
}

impl Default for ResourceStats {
    fn default() -> Self {
        Self {
            load: 0.0,
            last_load: 0.0,
            expected_delay: 0.0,
            load_multiply: 1.0,
            cur_price: 0.0,
            sched_hist: RingBuffer::new(RESOURCE_BACKLOG),
            price_hist: RingBuffer::new(RESOURCE_BACKLOG),
            diff_hist: RingBuffer::new(RESOURCE_BACKLOG),
            done_hist: RingBuffer::new(RESOURCE_BACKLOG),
            sched_cnt: 0,
            done_cnt: 0,
            first_seen: 0.0,
        }
    }
}

/// A known resource: its configuration plus scheduler statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    #[serde(flatten)]
    pub conf: ResourceConf,
    #[serde(flatten)]
    pub stats: ResourceStats,
}

impl ResourceStats {
    /// Bring every history back to [`RESOURCE_BACKLOG`] slots, e.g. after
    /// decoding a peer record.
    pub fn fit_histories(&mut self) {
        self.sched_hist.resize(RESOURCE_BACKLOG);
        self.price_hist.resize(RESOURCE_BACKLOG);
        self.diff_hist.resize(RESOURCE_BACKLOG);
        self.done_hist.resize(RESOURCE_BACKLOG);
    }
}

impl Resource {
    pub fn new(conf: ResourceConf) -> Self {
        Self {
            conf,
            stats: ResourceStats::default(),
        }
    }

    pub fn id(&self) -> &str {
        &self.conf.resource_id
    }
}

// ── Users and servers ──────────────────────────────────────────────

/// A job owner known to the scheduler. History rings hold job ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct User {
    pub user_id: String,
    #[serde(default)]
    pub server: String,
    #[serde(default = "user_ring")]
    pub queue_hist: RingBuffer<String>,
    #[serde(default = "user_ring")]
    pub sched_hist: RingBuffer<String>,
    #[serde(default = "user_ring")]
    pub done_hist: RingBuffer<String>,
    #[serde(default)]
    pub queue_cnt: u64,
    #[serde(default)]
    pub sched_cnt: u64,
    #[serde(default)]
    pub done_cnt: u64,
    #[serde(default)]
    pub first_seen: f64,
    #[serde(default)]
    pub last_seen: f64,
}

fn user_ring() -> RingBuffer<String> {
    RingBuffer::new(USER_BACKLOG)
}

impl User {
    pub fn new(user_id: impl Into<String>, server: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            server: server.into(),
            queue_hist: user_ring(),
            sched_hist: user_ring(),
            done_hist: user_ring(),
            queue_cnt: 0,
            sched_cnt: 0,
            done_cnt: 0,
            first_seen: 0.0,
            last_seen: 0.0,
        }
    }

    /// Bring every history back to [`USER_BACKLOG`] slots.
    pub fn fit_histories(&mut self) {
        self.queue_hist.resize(USER_BACKLOG);
        self.sched_hist.resize(USER_BACKLOG);
        self.done_hist.resize(USER_BACKLOG);
    }
}

/// A grid server, either the local one or a peer reached over gossip.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", default)]
pub struct Server {
    pub server_id: String,
    pub fqdn: String,
    pub queued: usize,
    pub lo_load: f64,
    pub hi_load: f64,
    pub target_load: f64,
    pub expire_after: f64,
    pub distance: u32,
    pub migrate_cost: f64,
    pub migrate_direction: String,
    pub first_seen: f64,
    pub last_seen: f64,
}

impl Server {
    pub fn new(server_id: impl Into<String>, fqdn: impl Into<String>) -> Self {
        Self {
            server_id: server_id.into(),
            fqdn: fqdn.into(),
            ..Default::default()
        }
    }
}

// ── Entity plumbing ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Server,
    Resource,
    User,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Server => f.write_str("server"),
            EntityKind::Resource => f.write_str("resource"),
            EntityKind::User => f.write_str("user"),
        }
    }
}

/// Common view over registry entries.
pub trait Entity {
    const KIND: EntityKind;

    fn entity_id(&self) -> &str;
    fn last_seen(&self) -> f64;
    /// Id of the server the entity belongs to.
    fn origin(&self) -> &str;
}

impl Entity for Server {
    const KIND: EntityKind = EntityKind::Server;

    fn entity_id(&self) -> &str {
        &self.server_id
    }
    fn last_seen(&self) -> f64 {
        self.last_seen
    }
    fn origin(&self) -> &str {
        &self.server_id
    }
}

impl Entity for Resource {
    const KIND: EntityKind = EntityKind::Resource;

    fn entity_id(&self) -> &str {
        &self.conf.resource_id
    }
    fn last_seen(&self) -> f64 {
        self.conf.last_seen
    }
    fn origin(&self) -> &str {
        &self.conf.server
    }
}

impl Entity for User {
    const KIND: EntityKind = EntityKind::User;

    fn entity_id(&self) -> &str {
        &self.user_id
    }
    fn last_seen(&self) -> f64 {
        self.last_seen
    }
    fn origin(&self) -> &str {
        &self.server
    }
}

/// Anonymous but stable public name for a resource id.
///
/// Any trailing `_<exe>` part survives unhashed so execution nodes of the
/// same resource remain distinguishable.
pub fn anon_resource_id(resource_id: &str) -> String {
    let (res_part, exe_part) = match resource_id.rsplit_once('_') {
        Some((res, exe)) => (res, exe),
        None => (resource_id, ""),
    };
    let digest = hex::encode(Sha256::digest(res_part.as_bytes()));
    let mut anon = digest[..32].to_string();
    if !exe_part.is_empty() {
        anon.push('_');
        anon.push_str(exe_part);
    }
    anon
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schedule_hint_wire_form() {
        let hint: ScheduleHint = "MIGRATE grid-b".parse().unwrap();
        assert_eq!(hint, ScheduleHint::Migrate("grid-b".into()));
        assert_eq!(hint.to_string(), "MIGRATE grid-b");
        assert_eq!(
            serde_json::to_string(&ScheduleHint::Go).unwrap(),
            "\"GO\""
        );
        assert!("MIGRATE".parse::<ScheduleHint>().is_err());
        assert!("LATER".parse::<ScheduleHint>().is_err());
    }

    #[test]
    fn job_parses_wire_fields() {
        let job: Job = serde_json::from_str(
            r#"{"JOB_ID":"j1","CPUCOUNT":1,"NODECOUNT":1,"CPUTIME":60,"MEMORY":128,"DISK":1,
                "ARCHITECTURE":"X86","JOBTYPE":"batch","SANDBOX":false,"RUNTIMEENVIRONMENT":[],
                "VGRID":["ANY"],"MAXPRICE":"1000","USER_CERT":"u1","SCHEDULE_HINT":"GO",
                "SCHEDULE_TARGETS":["r1"]}"#,
        )
        .unwrap();
        assert_eq!(job.cpu_time, 60);
        assert_eq!(job.max_price, "1000");
        assert!(job.is_go_for("r1"));
        assert!(!job.is_go_for("r2"));
        assert_eq!(job.migrate_count, 0);
        assert_eq!(job.status, JobStatus::Queued);
    }

    #[test]
    fn resource_round_trips_with_stats() {
        let mut res = Resource::new(ResourceConf::new("r1"));
        res.conf.cpu_count = Some(4);
        res.stats.sched_hist.push(1);
        let json = serde_json::to_string(&res).unwrap();
        assert!(json.contains("\"LOAD_MULTIPLY\":1.0"));
        let back: Resource = serde_json::from_str(&json).unwrap();
        assert_eq!(back, res);
    }

    #[test]
    fn resource_conf_defaults() {
        let conf: ResourceConf =
            serde_json::from_str(r#"{"RESOURCE_ID":"r1","RUNTIMEENVIRONMENT":["POVRAY3.6",["LOCALDISK",[["PATH","/tmp"]]]]}"#)
                .unwrap();
        assert!(conf.anonymous);
        assert_eq!(conf.job_type, JobType::Batch);
        assert!(conf.offers_runtime_env("POVRAY3.6"));
        assert_eq!(conf.runtime_environment[1].bindings[0].1, "/tmp");
        assert_eq!(conf.capacity(Capacity::Disk), None);
    }

    #[test]
    fn anon_id_keeps_exe_suffix() {
        let a = anon_resource_id("host.example.org.0_exe1");
        let b = anon_resource_id("host.example.org.0_exe2");
        assert!(a.ends_with("_exe1"));
        assert_eq!(a[..32], b[..32]);
        assert_eq!(anon_resource_id("plain").len(), 32);
    }

    #[test]
    fn must_match_filters() {
        let mut job = Job::new("j1");
        job.user_cert = "u1".into();
        job.job_type = JobType::Bulk;

        assert!(MustMatch::default().matches(&job));
        let m = MustMatch {
            user_cert: Some("u1".into()),
            job_type: Some(JobType::Bulk),
        };
        assert!(m.matches(&job));
        let m = MustMatch {
            user_cert: Some("u2".into()),
            job_type: None,
        };
        assert!(!m.matches(&job));
    }

    #[test]
    fn max_fill_all_covers_every_field() {
        let mut job = Job::new("j1");
        job.max_fill = vec!["ALL".into()];
        assert!(Capacity::ALL.iter().all(|c| job.wants_max_fill(*c)));
        job.max_fill = vec!["CPUTIME".into()];
        assert!(job.wants_max_fill(Capacity::CpuTime));
        assert!(!job.wants_max_fill(Capacity::Disk));
    }

    #[test]
    fn clear_schedule_resets_planner_fields() {
        let mut job = Job::new("j1");
        job.schedule_hint = Some(ScheduleHint::Stay);
        job.schedule_targets = vec!["r1".into()];
        job.exec_price = 3.0;
        let snapshot = job.clone();
        job.clear_schedule();
        assert!(job.schedule_hint.is_none());
        assert!(job.schedule_targets.is_empty());
        job.copy_schedule(&snapshot);
        assert_eq!(job.exec_price, 3.0);
    }
}
