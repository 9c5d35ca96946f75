//! Hard-constraint matching of jobs against resources.
//!
//! Checks run in a fixed order and the first failure wins:
//! forced destination, resource name patterns, architecture, job type,
//! sandbox, platform, countable capacities, runtime environments, VGrid.

use std::collections::BTreeMap;

use glob::{Pattern, PatternError};
use thiserror::Error;
use tracing::{debug, warn};

use gridsched_core::{Capacity, Job, JobType, ResourceConf};

/// Name of the VGrid every user and resource belongs to.
pub const DEFAULT_VGRID: &str = "Generic";

/// Why a job does not fit a resource.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FitRejection {
    #[error("job is forced to {0}")]
    ForcedDestination(String),

    #[error("no RESOURCE pattern matches {0}")]
    ResourcePattern(String),

    #[error("architecture {job} does not match {resource}")]
    Architecture { job: String, resource: String },

    #[error("job type {job:?} not accepted by {resource:?} resource")]
    JobType { job: JobType, resource: JobType },

    #[error("non-sandbox job on sandbox resource")]
    Sandbox,

    #[error("platform {job} does not match {resource}")]
    Platform { job: String, resource: String },

    #[error("{field} {wanted} exceeds {offered}")]
    Capacity {
        field: Capacity,
        wanted: u64,
        offered: u64,
    },

    #[error("resource configuration lacks {0}")]
    ConfigurationMissing(&'static str),

    #[error("runtime environment {0} not offered")]
    RuntimeEnv(String),

    #[error("no accessible VGrid in common")]
    Vgrid,
}

impl FitRejection {
    /// Whether the rejection comes from broken configuration rather than an
    /// ordinary mismatch.
    pub fn is_config_error(&self) -> bool {
        matches!(self, FitRejection::ConfigurationMissing(_))
    }
}

// ── VGrid access ───────────────────────────────────────────────────

/// Access predicate matching job VGrids against resource VGrids.
pub trait VgridAccess: Send + Sync {
    /// Return the resource VGrid through which `owner` may run a job
    /// requesting `job_vgrids` on `resource`, if any.
    fn access_match(&self, owner: &str, job_vgrids: &[String], resource: &ResourceConf) -> Option<String>;
}

pub fn vgrid_is_default(vgrid: &str) -> bool {
    vgrid.is_empty() || vgrid.eq_ignore_ascii_case(DEFAULT_VGRID)
}

/// A job VGrid fits a resource VGrid when the resource VGrid is the same
/// VGrid or one of its parents (`DALTON` serves `DALTON/DK`).
pub fn vgrid_request_and_job_match(resource_vgrid: &str, job_vgrid: &str) -> bool {
    if vgrid_is_default(resource_vgrid) && vgrid_is_default(job_vgrid) {
        return true;
    }
    let res_parts: Vec<&str> = resource_vgrid.split('/').collect();
    let job_parts: Vec<&str> = job_vgrid.split('/').collect();
    res_parts.len() <= job_parts.len() && res_parts.iter().zip(&job_parts).all(|(r, j)| r == j)
}

/// Hierarchical VGrid matching with an optional user membership table.
///
/// Without a table every user may use every VGrid. With a table a user may
/// use the default VGrid plus the VGrids listed for them (and their
/// sub-VGrids).
#[derive(Debug, Clone, Default)]
pub struct HierarchicalVgridAccess {
    members: Option<BTreeMap<String, Vec<String>>>,
}

impl HierarchicalVgridAccess {
    pub fn open() -> Self {
        Self { members: None }
    }

    pub fn with_members(members: BTreeMap<String, Vec<String>>) -> Self {
        Self {
            members: Some(members),
        }
    }

    fn user_allowed(&self, owner: &str, job_vgrid: &str) -> bool {
        if vgrid_is_default(job_vgrid) {
            return true;
        }
        match &self.members {
            None => true,
            Some(table) => table.get(owner).is_some_and(|allowed| {
                allowed
                    .iter()
                    .any(|v| vgrid_request_and_job_match(v, job_vgrid))
            }),
        }
    }
}

impl VgridAccess for HierarchicalVgridAccess {
    fn access_match(&self, owner: &str, job_vgrids: &[String], resource: &ResourceConf) -> Option<String> {
        let default = [DEFAULT_VGRID.to_string()];
        let job_vgrids = if job_vgrids.is_empty() { &default[..] } else { job_vgrids };
        let res_vgrids = if resource.vgrid.is_empty() {
            &default[..]
        } else {
            &resource.vgrid[..]
        };

        for job_vgrid in job_vgrids {
            if !self.user_allowed(owner, job_vgrid) {
                debug!(%owner, %job_vgrid, "user not allowed in vgrid");
                continue;
            }
            if let Some(res_vgrid) = res_vgrids
                .iter()
                .find(|rv| vgrid_request_and_job_match(rv, job_vgrid))
            {
                return Some(res_vgrid.clone());
            }
        }
        None
    }
}

// ── Fit predicate ──────────────────────────────────────────────────

/// Compile a shell-style `RESOURCE` pattern (`*`, `?`, `[seq]`, `[!seq]`).
///
/// Runs of `*` collapse to one. A pattern that does not parse, such as an
/// unterminated `[`, matches itself literally.
pub fn shell_pattern(pattern: &str) -> Result<Pattern, PatternError> {
    let mut collapsed = String::with_capacity(pattern.len());
    for c in pattern.chars() {
        if c == '*' && collapsed.ends_with('*') {
            continue;
        }
        collapsed.push(c);
    }
    Pattern::new(&collapsed).or_else(|e| {
        debug!(%pattern, error = %e, "matching RESOURCE pattern literally");
        Pattern::new(&Pattern::escape(pattern))
    })
}

/// Check every hard constraint of `job` against `res`. On success returns
/// the resource VGrid the job would run under.
pub fn check_fit(job: &Job, res: &ResourceConf, vgrids: &dyn VgridAccess) -> Result<String, FitRejection> {
    if res.resource_id.is_empty() {
        return Err(FitRejection::ConfigurationMissing("RESOURCE_ID"));
    }

    if let Some(forced) = job.forced_destination.as_deref().filter(|f| !f.is_empty()) {
        if forced != res.resource_id {
            return Err(FitRejection::ForcedDestination(forced.to_string()));
        }
    }

    if !job.resource_patterns.is_empty() {
        let public_id = res.public_id();
        let matched = job.resource_patterns.iter().any(|p| match shell_pattern(p) {
            Ok(pattern) => pattern.matches(&public_id),
            Err(e) => {
                warn!(job_id = %job.job_id, pattern = %p, error = %e, "invalid RESOURCE pattern");
                false
            }
        });
        if !matched {
            return Err(FitRejection::ResourcePattern(public_id));
        }
    }

    if !job.architecture.is_empty() && job.architecture != res.architecture {
        return Err(FitRejection::Architecture {
            job: job.architecture.clone(),
            resource: res.architecture.clone(),
        });
    }

    let type_ok = match res.job_type {
        JobType::All => true,
        JobType::Bulk => matches!(job.job_type, JobType::Bulk | JobType::Batch),
        other => job.job_type == other,
    };
    if !type_ok {
        return Err(FitRejection::JobType {
            job: job.job_type,
            resource: res.job_type,
        });
    }

    if !job.sandbox && res.sandbox {
        return Err(FitRejection::Sandbox);
    }

    if !res.platform.is_empty() && !job.platform.eq_ignore_ascii_case(&res.platform) {
        return Err(FitRejection::Platform {
            job: job.platform.clone(),
            resource: res.platform.clone(),
        });
    }

    for field in Capacity::ALL {
        let offered = res
            .capacity(field)
            .ok_or(FitRejection::ConfigurationMissing(field.field()))?;
        let wanted = job.demand(field);
        if wanted > offered {
            return Err(FitRejection::Capacity {
                field,
                wanted,
                offered,
            });
        }
    }

    if let Some(missing) = job
        .runtime_environment
        .iter()
        .find(|re| !res.offers_runtime_env(re))
    {
        return Err(FitRejection::RuntimeEnv(missing.clone()));
    }

    vgrids
        .access_match(&job.owner, &job.vgrid, res)
        .ok_or(FitRejection::Vgrid)
}

/// Boolean fit predicate. Records the matched VGrid on the job and logs
/// the predicate that fired on rejection.
pub fn job_fits_resource(job: &mut Job, res: &ResourceConf, vgrids: &dyn VgridAccess) -> bool {
    match check_fit(job, res, vgrids) {
        Ok(res_vgrid) => {
            job.resource_vgrid = Some(res_vgrid);
            true
        }
        Err(reason) if reason.is_config_error() => {
            warn!(job_id = %job.job_id, resource_id = %res.resource_id, %reason, "fit check failed on configuration");
            false
        }
        Err(reason) => {
            debug!(job_id = %job.job_id, resource_id = %res.resource_id, %reason, "job does not fit");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridsched_core::RuntimeEnv;

    fn test_job() -> Job {
        let mut job = Job::new("j1");
        job.owner = "alice".into();
        job.cpu_count = 1;
        job.node_count = 1;
        job.cpu_time = 60;
        job.memory = 128;
        job.disk = 1;
        job.architecture = "X86".into();
        job.vgrid = vec!["ANY".into()];
        job
    }

    fn test_resource() -> ResourceConf {
        let mut res = ResourceConf::new("r1");
        res.cpu_count = Some(2);
        res.node_count = Some(1);
        res.cpu_time = Some(300);
        res.memory = Some(512);
        res.disk = Some(8);
        res.architecture = "X86".into();
        res.job_type = JobType::All;
        res.vgrid = vec!["ANY".into()];
        res
    }

    fn fit(job: &Job, res: &ResourceConf) -> Result<String, FitRejection> {
        check_fit(job, res, &HierarchicalVgridAccess::open())
    }

    #[test]
    fn matching_job_fits_and_records_vgrid() {
        let mut job = test_job();
        assert!(job_fits_resource(&mut job, &test_resource(), &HierarchicalVgridAccess::open()));
        assert_eq!(job.resource_vgrid.as_deref(), Some("ANY"));
    }

    #[test]
    fn forced_destination_requires_exact_id() {
        let mut job = test_job();
        job.forced_destination = Some("r2".into());
        assert!(matches!(fit(&job, &test_resource()), Err(FitRejection::ForcedDestination(_))));
        job.forced_destination = Some("r1".into());
        assert!(fit(&job, &test_resource()).is_ok());
    }

    #[test]
    fn resource_patterns_match_public_name() {
        let mut res = test_resource();
        res.anonymous = false;
        res.resource_id = "dido.imada.sdu.dk.0".into();
        let mut job = test_job();
        job.resource_patterns = vec!["*.sdu.dk.*".into()];
        assert!(fit(&job, &res).is_ok());

        // Anonymous resources only expose the hashed name.
        res.anonymous = true;
        assert!(matches!(fit(&job, &res), Err(FitRejection::ResourcePattern(_))));
    }

    #[test]
    fn shell_patterns_follow_fnmatch() {
        let matches = |p: &str, name: &str| shell_pattern(p).unwrap().matches(name);
        assert!(matches("*.sdu.dk.*", "dido.imada.sdu.dk.0"));
        assert!(!matches("*.sdu.dk", "dido.imada.sdu.dk.0"));
        assert!(matches("node?.grid", "node7.grid"));
        assert!(matches("node[0-3].grid", "node2.grid"));
        assert!(!matches("node[!0-3].grid", "node2.grid"));
        assert!(matches("a+b(c)", "a+b(c)"));
        assert!(matches("rack[1", "rack[1"));
        assert!(matches("grid**.dk", "grid.imada.dk"));
    }

    #[test]
    fn architecture_empty_job_matches_any() {
        let mut job = test_job();
        job.architecture.clear();
        assert!(fit(&job, &test_resource()).is_ok());
        job.architecture = "ARM".into();
        assert!(matches!(fit(&job, &test_resource()), Err(FitRejection::Architecture { .. })));
    }

    #[test]
    fn job_type_rules() {
        let mut res = test_resource();
        let mut job = test_job();

        res.job_type = JobType::Bulk;
        job.job_type = JobType::Batch;
        assert!(fit(&job, &res).is_ok());

        res.job_type = JobType::Batch;
        job.job_type = JobType::Bulk;
        assert!(matches!(fit(&job, &res), Err(FitRejection::JobType { .. })));
    }

    #[test]
    fn sandbox_rules() {
        let mut res = test_resource();
        let mut job = test_job();
        res.sandbox = true;
        assert_eq!(fit(&job, &res), Err(FitRejection::Sandbox));
        job.sandbox = true;
        assert!(fit(&job, &res).is_ok());
        res.sandbox = false;
        assert!(fit(&job, &res).is_ok());
    }

    #[test]
    fn platform_is_case_insensitive() {
        let mut res = test_resource();
        let mut job = test_job();
        res.platform = "Linux".into();
        job.platform = "LINUX".into();
        assert!(fit(&job, &res).is_ok());
        job.platform = "windows".into();
        assert!(matches!(fit(&job, &res), Err(FitRejection::Platform { .. })));
    }

    #[test]
    fn capacity_bounds() {
        let mut job = test_job();
        job.memory = 1024;
        assert_eq!(
            fit(&job, &test_resource()),
            Err(FitRejection::Capacity {
                field: Capacity::Memory,
                wanted: 1024,
                offered: 512
            })
        );
    }

    #[test]
    fn missing_capacity_is_configuration_error() {
        let mut res = test_resource();
        res.disk = None;
        let err = fit(&test_job(), &res).unwrap_err();
        assert_eq!(err, FitRejection::ConfigurationMissing("DISK"));
        assert!(err.is_config_error());
    }

    #[test]
    fn runtime_environments_required() {
        let mut job = test_job();
        job.runtime_environment = vec!["POVRAY3.6".into()];
        let mut res = test_resource();
        assert_eq!(fit(&job, &res), Err(FitRejection::RuntimeEnv("POVRAY3.6".into())));
        res.runtime_environment.push(RuntimeEnv::named("POVRAY3.6"));
        assert!(fit(&job, &res).is_ok());
    }

    #[test]
    fn vgrid_prefix_matching() {
        assert!(vgrid_request_and_job_match("DALTON", "DALTON/DK"));
        assert!(!vgrid_request_and_job_match("DALTON/DK", "DALTON"));
        assert!(vgrid_request_and_job_match("generic", ""));
        assert!(!vgrid_request_and_job_match("A", "B"));
    }

    #[test]
    fn vgrid_defaults_when_lists_empty() {
        let mut job = test_job();
        job.vgrid.clear();
        let mut res = test_resource();
        res.vgrid.clear();
        assert_eq!(fit(&job, &res), Ok(DEFAULT_VGRID.to_string()));
    }

    #[test]
    fn membership_table_restricts_users() {
        let members = BTreeMap::from([("alice".to_string(), vec!["DALTON".to_string()])]);
        let access = HierarchicalVgridAccess::with_members(members);
        let mut res = test_resource();
        res.vgrid = vec!["DALTON".into()];

        let mut job = test_job();
        job.vgrid = vec!["DALTON/DK".into()];
        assert_eq!(check_fit(&job, &res, &access), Ok("DALTON".into()));

        job.owner = "mallory".into();
        assert_eq!(check_fit(&job, &res, &access), Err(FitRejection::Vgrid));
    }
}
