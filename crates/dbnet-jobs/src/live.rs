use dbnet_core::{CancellationToken, ExecStatus, Task};
use dbnet_store::JobRecord;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;

use crate::{JobConfigSummary, JobSnapshot};

pub(crate) struct LiveJob {
    pub id: String,
    /// The submission as received
    pub request: serde_json::Value,
    pub task: Arc<dyn Task>,
    pub cancel: CancellationToken,
    /// Epoch milliseconds
    pub start_time: i64,
    started: Instant,
    /// Seconds, once the task has returned
    finished_after: Mutex<Option<f64>>,
    done: watch::Sender<bool>,
}

impl LiveJob {
    pub fn new(id: String, request: serde_json::Value, task: Arc<dyn Task>) -> Arc<Self> {
        let (done, _) = watch::channel(false);
        Arc::new(Self {
            id,
            request,
            task,
            cancel: CancellationToken::new(),
            start_time: chrono::Utc::now().timestamp_millis(),
            started: Instant::now(),
            finished_after: Mutex::new(None),
            done,
        })
    }

    /// Freeze the duration once the task has returned
    pub fn settle(&self) {
        *self.finished_after.lock() = Some(self.started.elapsed().as_secs_f64());
    }

    /// Wake everyone waiting on the job
    pub fn finish(&self) {
        self.done.send_replace(true);
    }

    pub fn is_finished(&self) -> bool {
        *self.done.borrow()
    }

    pub async fn wait_done(&self, limit: Duration) -> bool {
        let mut rx = self.done.subscribe();
        matches!(
            tokio::time::timeout(limit, rx.wait_for(|done| *done)).await,
            Ok(Ok(_))
        )
    }

    pub fn snapshot(&self) -> JobSnapshot {
        let task = self.task.as_ref();
        let config = task.config();
        let (row_rate, byte_rate) = task.rates();
        let duration = self
            .finished_after
            .lock()
            .unwrap_or_else(|| self.started.elapsed().as_secs_f64());

        JobSnapshot {
            id: self.id.clone(),
            job_type: task.task_type(),
            status: task.status(),
            error: task.error().unwrap_or_default(),
            rows: task.rows(),
            row_rate,
            byte_rate,
            progress: task.progress(),
            start_time: self.start_time,
            duration,
            bytes: task.bytes(),
            config: JobConfigSummary {
                source: config.source.clone(),
                target: config.target.clone(),
                mode: config.mode.clone(),
            },
        }
    }

    /// Snapshot for a job that was cancelled from outside; the task may not
    /// have noticed yet
    pub fn cancelled_snapshot(&self) -> JobSnapshot {
        let mut snapshot = self.snapshot();
        if !snapshot.status.is_terminal() {
            snapshot.status = ExecStatus::Cancelled;
        }
        snapshot
    }
}

pub(crate) fn job_record(job: &LiveJob, snapshot: &JobSnapshot) -> JobRecord {
    JobRecord {
        id: snapshot.id.clone(),
        job_type: snapshot.job_type.clone(),
        status: snapshot.status.as_str().to_string(),
        error: snapshot.error.clone(),
        request: job.request.clone(),
        result: serde_json::to_value(snapshot).unwrap_or(serde_json::Value::Null),
        time: job.start_time,
        duration: snapshot.duration,
    }
}
