//! JobQueue — ordered queue of jobs with unique ids.

use serde::{Deserialize, Serialize};
use tracing::debug;

use gridsched_core::Job;

use crate::error::{StateError, StateResult};

/// Ordered job queue. Index 0 is the head.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobQueue {
    jobs: Vec<Job>,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Insert `job` at `index` (clamped to the queue length).
    /// Fails if a job with the same `JOB_ID` is already queued.
    pub fn enqueue(&mut self, job: Job, index: usize) -> StateResult<()> {
        if self.position(&job.job_id).is_some() {
            return Err(StateError::DuplicateJob(job.job_id));
        }
        let index = index.min(self.jobs.len());
        debug!(job_id = %job.job_id, index, "job enqueued");
        self.jobs.insert(index, job);
        Ok(())
    }

    pub fn push_back(&mut self, job: Job) -> StateResult<()> {
        let tail = self.jobs.len();
        self.enqueue(job, tail)
    }

    pub fn get(&self, index: usize) -> Option<&Job> {
        self.jobs.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Job> {
        self.jobs.get_mut(index)
    }

    pub fn get_by_id(&self, job_id: &str) -> Option<&Job> {
        self.jobs.iter().find(|j| j.job_id == job_id)
    }

    pub fn position(&self, job_id: &str) -> Option<usize> {
        self.jobs.iter().position(|j| j.job_id == job_id)
    }

    /// Remove and return the job at `index`.
    pub fn dequeue(&mut self, index: usize) -> Option<Job> {
        if index < self.jobs.len() {
            Some(self.jobs.remove(index))
        } else {
            None
        }
    }

    pub fn dequeue_by_id(&mut self, job_id: &str) -> Option<Job> {
        let index = self.position(job_id)?;
        self.dequeue(index)
    }

    /// Remove every job matching `pred`, returning them in queue order.
    pub fn drain_where(&mut self, mut pred: impl FnMut(&Job) -> bool) -> Vec<Job> {
        let mut kept = Vec::with_capacity(self.jobs.len());
        let mut drained = Vec::new();
        for job in self.jobs.drain(..) {
            if pred(&job) {
                drained.push(job);
            } else {
                kept.push(job);
            }
        }
        self.jobs = kept;
        drained
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Job> {
        self.jobs.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, Job> {
        self.jobs.iter_mut()
    }
}

impl<'a> IntoIterator for &'a JobQueue {
    type Item = &'a Job;
    type IntoIter = std::slice::Iter<'a, Job>;

    fn into_iter(self) -> Self::IntoIter {
        self.jobs.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue_of(ids: &[&str]) -> JobQueue {
        let mut q = JobQueue::new();
        for id in ids {
            q.push_back(Job::new(*id)).unwrap();
        }
        q
    }

    fn ids(q: &JobQueue) -> Vec<&str> {
        q.iter().map(|j| j.job_id.as_str()).collect()
    }

    #[test]
    fn enqueue_rejects_duplicate_id() {
        let mut q = queue_of(&["j1"]);
        let err = q.push_back(Job::new("j1")).unwrap_err();
        assert!(matches!(err, StateError::DuplicateJob(id) if id == "j1"));
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn enqueue_at_index_clamps() {
        let mut q = queue_of(&["a", "b"]);
        q.enqueue(Job::new("head"), 0).unwrap();
        q.enqueue(Job::new("tail"), 99).unwrap();
        assert_eq!(ids(&q), vec!["head", "a", "b", "tail"]);
    }

    #[test]
    fn dequeue_removes_exactly_once() {
        let mut q = queue_of(&["a", "b", "c"]);
        assert_eq!(q.dequeue(1).unwrap().job_id, "b");
        assert_eq!(q.len(), 2);
        assert!(q.dequeue(5).is_none());
        assert_eq!(q.dequeue_by_id("c").unwrap().job_id, "c");
        assert!(q.dequeue_by_id("c").is_none());
        assert_eq!(ids(&q), vec!["a"]);
    }

    #[test]
    fn drain_where_keeps_order() {
        let mut q = queue_of(&["a1", "b1", "a2", "b2"]);
        let drained = q.drain_where(|j| j.job_id.starts_with('a'));
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[1].job_id, "a2");
        assert_eq!(ids(&q), vec!["b1", "b2"]);
    }

    #[test]
    fn empty_queue_lookups() {
        let q = JobQueue::new();
        assert!(q.is_empty());
        assert!(q.get(0).is_none());
        assert!(q.get_by_id("x").is_none());
    }
}
