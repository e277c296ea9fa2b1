//! In-process stores for tests and database-less local runs.
//!
//! [`MemoryJobStore`] serializes updates per job through a fixed table of
//! async mutex shards. Jobs in different shards update in parallel and
//! there is no global lock.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use brickyard_core::job::Job;
use brickyard_core::trace::{self, NewTraceEvent, TraceEvent};
use brickyard_core::types::{JobId, Timestamp};
use tokio::sync::Mutex;

use crate::store::{
    JobFilter, JobMutation, JobStore, StoreError, TraceStore, UpdateOutcome,
};

/// Default number of lock shards.
const DEFAULT_SHARDS: usize = 16;

pub struct MemoryJobStore {
    shards: Vec<Mutex<HashMap<JobId, Job>>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::with_shards(DEFAULT_SHARDS)
    }

    pub fn with_shards(count: usize) -> Self {
        let shards = (0..count.max(1)).map(|_| Mutex::new(HashMap::new())).collect();
        Self { shards }
    }

    fn shard(&self, id: &JobId) -> &Mutex<HashMap<JobId, Job>> {
        let mut hasher = DefaultHasher::new();
        id.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % self.shards.len()]
    }

    async fn snapshot(&self) -> Vec<Job> {
        let mut all = Vec::new();
        for shard in &self.shards {
            all.extend(shard.lock().await.values().cloned());
        }
        all
    }
}

impl Default for MemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn insert(&self, job: &Job) -> Result<(), StoreError> {
        let mut shard = self.shard(&job.id).lock().await;
        if shard.contains_key(&job.id) {
            return Err(StoreError::Duplicate(job.id));
        }
        shard.insert(job.id, job.clone());
        Ok(())
    }

    async fn get(&self, id: JobId) -> Result<Option<Job>, StoreError> {
        Ok(self.shard(&id).lock().await.get(&id).cloned())
    }

    async fn list(&self, filter: &JobFilter) -> Result<Vec<Job>, StoreError> {
        let mut jobs: Vec<Job> = self
            .snapshot()
            .await
            .into_iter()
            .filter(|job| filter.matches(job))
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

        Ok(jobs
            .into_iter()
            .skip(filter.effective_offset() as usize)
            .take(filter.effective_limit() as usize)
            .collect())
    }

    async fn list_stalled(
        &self,
        older_than: Timestamp,
        limit: i64,
    ) -> Result<Vec<Job>, StoreError> {
        let mut jobs: Vec<Job> = self
            .snapshot()
            .await
            .into_iter()
            .filter(|job| !job.is_terminal() && job.stage_updated_at < older_than)
            .collect();
        jobs.sort_by_key(|job| job.stage_updated_at);
        jobs.truncate(limit.max(0) as usize);
        Ok(jobs)
    }

    async fn update(&self, id: JobId, mutation: JobMutation) -> Result<UpdateOutcome, StoreError> {
        let mut shard = self.shard(&id).lock().await;
        let Some(current) = shard.get_mut(&id) else {
            return Ok(UpdateOutcome::NotFound);
        };

        match mutation(&*current) {
            None => Ok(UpdateOutcome::Unchanged(current.clone())),
            Some(after) => {
                let before = std::mem::replace(current, after.clone());
                Ok(UpdateOutcome::Updated { before, after })
            }
        }
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryTraceStore {
    events: Mutex<HashMap<JobId, Vec<TraceEvent>>>,
    next_id: AtomicI64,
}

impl MemoryTraceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TraceStore for MemoryTraceStore {
    async fn append(
        &self,
        job_id: JobId,
        event: NewTraceEvent,
        received_at: Timestamp,
    ) -> Result<TraceEvent, StoreError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let stored = event.into_event(id, job_id, received_at);
        self.events
            .lock()
            .await
            .entry(job_id)
            .or_default()
            .push(stored.clone());
        Ok(stored)
    }

    async fn list_for_job(&self, job_id: JobId) -> Result<Vec<TraceEvent>, StoreError> {
        let mut events = self
            .events
            .lock()
            .await
            .get(&job_id)
            .cloned()
            .unwrap_or_default();
        trace::sort_for_read(&mut events);
        Ok(events)
    }
}
