use dbnet_connection::ConnectionRegistry;
use dbnet_core::{DbnetError, ExecStatus, Result, TaskEngine, Waited};
use dbnet_store::Store;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::live::{LiveJob, job_record};
use crate::{JobBrokerConfig, JobRequest, JobSnapshot};

type LiveJobs = Arc<Mutex<HashMap<String, Arc<LiveJob>>>>;

/// Registry of live extract/load jobs.
///
/// A job stays registered while it runs and for a grace period after it
/// settles; cancelling evicts it immediately.
pub struct JobBroker {
    registry: Arc<ConnectionRegistry>,
    store: Store,
    engine: Arc<dyn TaskEngine>,
    config: JobBrokerConfig,
    live: LiveJobs,
}

impl JobBroker {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        store: Store,
        engine: Arc<dyn TaskEngine>,
        config: JobBrokerConfig,
    ) -> Self {
        Self {
            registry,
            store,
            engine,
            config,
            live: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn config(&self) -> &JobBrokerConfig {
        &self.config
    }

    pub fn live_count(&self) -> usize {
        self.live.lock().len()
    }

    pub fn is_live(&self, id: &str) -> bool {
        self.live.lock().contains_key(id)
    }

    fn get(&self, id: &str) -> Option<Arc<LiveJob>> {
        self.live.lock().get(id).cloned()
    }

    /// Submit a job, or with `continuation` wait again on the live job of
    /// the same id
    #[tracing::instrument(
        skip(self, request),
        fields(
            job_id = %request.id,
            source = %request.source.conn,
            target = %request.target.conn
        )
    )]
    pub async fn submit(&self, request: JobRequest, continuation: bool) -> Result<Waited<JobSnapshot>> {
        if continuation {
            let job = self.get(&request.id).ok_or_else(|| {
                DbnetError::NotFound(format!("could not find job {} to continue", request.id))
            })?;
            tracing::debug!("continuing job");
            return Ok(self.respond(&job, true).await);
        }

        let wait = request.wait;
        let job = self.start(request)?;
        Ok(self.respond(&job, wait).await)
    }

    /// Current snapshot of a job, from the live registry or the store
    pub fn status(&self, id: &str) -> Result<JobSnapshot> {
        if let Some(job) = self.get(id) {
            return Ok(job.snapshot());
        }
        let record = self
            .store
            .load_job(id)?
            .ok_or_else(|| DbnetError::NotFound(format!("could not find job {}", id)))?;
        Ok(serde_json::from_value(record.result)?)
    }

    /// Cancel a running job and evict it
    #[tracing::instrument(skip(self))]
    pub fn cancel(&self, id: &str) -> Result<JobSnapshot> {
        let job = self
            .live
            .lock()
            .remove(id)
            .ok_or_else(|| DbnetError::NotFound(format!("could not find job {}", id)))?;

        job.cancel.cancel();
        let snapshot = job.cancelled_snapshot();
        persist(&self.store, &job, &snapshot);
        tracing::info!("job cancelled");
        Ok(snapshot)
    }

    /// Cancel and evict every live job
    pub fn shutdown(&self) {
        let all: Vec<Arc<LiveJob>> = self.live.lock().drain().map(|(_, j)| j).collect();
        for job in all {
            job.cancel.cancel();
        }
    }

    fn start(&self, mut request: JobRequest) -> Result<Arc<LiveJob>> {
        if request.id.is_empty() {
            request.id = uuid::Uuid::new_v4().to_string();
        }

        let mut config = request.task_config();
        config.source_conn = Some(self.registry.config(&request.source.conn, "")?);
        config.target_conn = Some(self.registry.config(&request.target.conn, "")?);
        let task = self.engine.new_task(&request.id, config)?;
        let payload = serde_json::to_value(&request)?;

        let previous = self.live.lock().remove(&request.id);
        if let Some(previous) = previous {
            tracing::debug!("replacing live job with the same id");
            previous.cancel.cancel();
        }

        let job = LiveJob::new(request.id.clone(), payload, task);
        self.live.lock().insert(job.id.clone(), Arc::clone(&job));
        persist(&self.store, &job, &job.snapshot());

        tokio::spawn(run(
            Arc::clone(&job),
            self.store.clone(),
            Arc::clone(&self.live),
            self.config.eviction_grace,
        ));
        tracing::info!(job_type = %job.task.task_type(), "job submitted");
        Ok(job)
    }

    async fn respond(&self, job: &LiveJob, wait: bool) -> Waited<JobSnapshot> {
        if !wait || job.is_finished() {
            return Waited::Ready(job.snapshot());
        }
        if job.wait_done(self.config.continue_after).await {
            Waited::Ready(job.snapshot())
        } else {
            Waited::Pending(job.snapshot())
        }
    }
}

/// The job worker: runs the task, records the outcome, then evicts the job
/// once the grace period has passed
async fn run(job: Arc<LiveJob>, store: Store, live: LiveJobs, grace: Duration) {
    job.task.execute(job.cancel.clone()).await;
    job.settle();

    let snapshot = job.snapshot();
    persist(&store, &job, &snapshot);
    job.finish();
    match snapshot.status {
        ExecStatus::Error => {
            tracing::warn!(job_id = %job.id, error = %snapshot.error, "job failed")
        }
        status => tracing::info!(
            job_id = %job.id,
            status = status.as_str(),
            rows = snapshot.rows,
            duration = snapshot.duration,
            "job finished"
        ),
    }

    tokio::time::sleep(grace).await;
    let mut live = live.lock();
    if live.get(&job.id).is_some_and(|j| Arc::ptr_eq(j, &job)) {
        live.remove(&job.id);
        tracing::debug!(job_id = %job.id, "job evicted");
    }
}

fn persist(store: &Store, job: &LiveJob, snapshot: &JobSnapshot) {
    if let Err(e) = store.save_job(&job_record(job, snapshot)) {
        tracing::warn!(job_id = %job.id, error = %e, "could not persist job");
    }
}
