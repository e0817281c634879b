use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::job::{Job, JobId};
use crate::store::{JobStore, StoreError};

pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(10);

struct CachedList {
    jobs: BTreeMap<JobId, Job>,
    fetched_at: Instant,
}

/// Envuelve un store y cachea `list_jobs` durante `ttl`.
///
/// Lo que escribe otro proceso puede tardar hasta `ttl` en verse en el
/// listado. `get_job` siempre lee del store; las escrituras hechas a través
/// de este wrapper invalidan el cache.
pub struct CachedJobStore<S: ?Sized> {
    ttl: Duration,
    cached: Mutex<Option<CachedList>>,
    inner: Box<S>,
}

impl<S: JobStore + ?Sized> CachedJobStore<S> {
    pub fn new(inner: Box<S>, ttl: Duration) -> Self {
        Self {
            ttl,
            cached: Mutex::new(None),
            inner,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Igual que `list_jobs`, con el "ahora" explícito.
    pub fn list_jobs_at(&self, now: Instant) -> Result<BTreeMap<JobId, Job>, StoreError> {
        let mut cached = self
            .cached
            .lock()
            .map_err(|_| StoreError::Unavailable("lock cache".to_string()))?;

        if let Some(entry) = cached.as_ref() {
            if now.saturating_duration_since(entry.fetched_at) < self.ttl {
                return Ok(entry.jobs.clone());
            }
        }

        let jobs = self.inner.list_jobs()?;
        debug!("cache de jobs refrescado ({} jobs)", jobs.len());
        *cached = Some(CachedList {
            jobs: jobs.clone(),
            fetched_at: now,
        });
        Ok(jobs)
    }

    pub fn invalidate(&self) {
        if let Ok(mut cached) = self.cached.lock() {
            *cached = None;
        }
    }
}

impl<S: JobStore + ?Sized> JobStore for CachedJobStore<S> {
    fn list_jobs(&self) -> Result<BTreeMap<JobId, Job>, StoreError> {
        self.list_jobs_at(Instant::now())
    }

    fn get_job(&self, id: &str) -> Result<Job, StoreError> {
        self.inner.get_job(id)
    }

    fn put_job(&self, id: &str, job: &Job) -> Result<u64, StoreError> {
        let result = self.inner.put_job(id, job);
        self.invalidate();
        result
    }

    fn put_job_if(&self, id: &str, job: &Job, expected_version: u64) -> Result<u64, StoreError> {
        let result = self.inner.put_job_if(id, job, expected_version);
        self.invalidate();
        result
    }
}
