use std::{
    fmt::Display,
    future::Future,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
};

use time::OffsetDateTime;
use tracing::{info, warn};

use super::StepStatus;
use crate::generations::model::GenerationStatus;

pub type JobId = u64;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("job {0} not found")]
    NotFound(JobId),
    #[error("job {0} is processing")]
    Busy(JobId),
    #[error("illegal transition {from} -> {to}")]
    IllegalTransition {
        from: GenerationStatus,
        to: GenerationStatus,
    },
}

#[derive(Debug, Clone)]
pub struct Job<I, O> {
    pub id: JobId,
    pub input: I,
    pub status: GenerationStatus,
    pub status_text: Option<String>,
    pub output: Option<O>,
    pub error: Option<String>,
    pub created_at: OffsetDateTime,
}

impl<I, O> Job<I, O> {
    fn advance(&mut self, to: GenerationStatus) -> Result<(), QueueError> {
        use GenerationStatus::*;
        let legal = matches!(
            (self.status, to),
            (Pending, Processing) | (Processing, Completed) | (Processing, Failed)
        );
        if !legal {
            return Err(QueueError::IllegalTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }
}

/// Lets a running worker publish progress text for its own job.
#[derive(Clone)]
pub struct StatusHandle {
    set: Arc<dyn Fn(Option<String>) + Send + Sync>,
}

impl StatusHandle {
    pub fn set(&self, text: impl Into<String>) {
        (self.set)(Some(text.into()));
    }

    pub fn clear(&self) {
        (self.set)(None);
    }

    /// Adapter for the workflow status callbacks.
    pub fn sink(&self) -> impl Fn(StepStatus) + Send + Sync + 'static {
        let handle = self.clone();
        move |s| handle.set(s.label())
    }
}

/// FIFO of generation jobs, processed strictly one at a time.
pub struct JobQueue<I, O> {
    jobs: Arc<Mutex<Vec<Job<I, O>>>>,
    next_id: Arc<AtomicU64>,
}

impl<I, O> Clone for JobQueue<I, O> {
    fn clone(&self) -> Self {
        Self {
            jobs: self.jobs.clone(),
            next_id: self.next_id.clone(),
        }
    }
}

impl<I, O> Default for JobQueue<I, O> {
    fn default() -> Self {
        Self {
            jobs: Arc::new(Mutex::new(Vec::new())),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A job taken out of `Pending`. Dropped unsettled, it fails the job, so a
/// worker that panics or is cancelled cannot leave it processing.
struct Claim<'a, I, O> {
    jobs: &'a Mutex<Vec<Job<I, O>>>,
    id: JobId,
    settled: bool,
}

impl<I, O> Drop for Claim<'_, I, O> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let reason = if std::thread::panicking() {
            "Worker panicked"
        } else {
            "Job was interrupted"
        };
        let mut jobs = lock(self.jobs);
        if let Some(job) = jobs.iter_mut().find(|j| j.id == self.id) {
            if job.advance(GenerationStatus::Failed).is_ok() {
                job.status_text = Some(format!("Failed: {reason}"));
                job.error = Some(reason.to_string());
                warn!(job_id = self.id, error = reason, "job abandoned");
            }
        }
    }
}

impl<I, O> JobQueue<I, O>
where
    I: Clone + Send + 'static,
    O: Clone + Send + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&self, input: I) -> JobId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        lock(&self.jobs).push(Job {
            id,
            input,
            status: GenerationStatus::Pending,
            status_text: None,
            output: None,
            error: None,
            created_at: OffsetDateTime::now_utc(),
        });
        id
    }

    pub fn jobs(&self) -> Vec<Job<I, O>> {
        lock(&self.jobs).clone()
    }

    pub fn get(&self, id: JobId) -> Option<Job<I, O>> {
        lock(&self.jobs).iter().find(|j| j.id == id).cloned()
    }

    pub fn next_pending(&self) -> Option<JobId> {
        lock(&self.jobs)
            .iter()
            .find(|j| j.status == GenerationStatus::Pending)
            .map(|j| j.id)
    }

    pub fn is_busy(&self) -> bool {
        lock(&self.jobs)
            .iter()
            .any(|j| j.status == GenerationStatus::Processing)
    }

    pub fn remove(&self, id: JobId) -> Result<Job<I, O>, QueueError> {
        let mut jobs = lock(&self.jobs);
        let idx = jobs
            .iter()
            .position(|j| j.id == id)
            .ok_or(QueueError::NotFound(id))?;
        if jobs[idx].status == GenerationStatus::Processing {
            return Err(QueueError::Busy(id));
        }
        Ok(jobs.remove(idx))
    }

    /// Claims the oldest pending job and runs `worker` on it to completion.
    ///
    /// Returns `None` when nothing is pending or another job is already
    /// processing. The returned job is in a terminal state.
    pub async fn run_next<W, Fut, E>(&self, worker: W) -> Option<Job<I, O>>
    where
        W: FnOnce(I, StatusHandle) -> Fut,
        Fut: Future<Output = Result<O, E>>,
        E: Display,
    {
        let (id, input) = {
            let mut jobs = lock(&self.jobs);
            if jobs.iter().any(|j| j.status == GenerationStatus::Processing) {
                return None;
            }
            let job = jobs
                .iter_mut()
                .find(|j| j.status == GenerationStatus::Pending)?;
            job.advance(GenerationStatus::Processing).ok()?;
            job.status_text = Some("Processing...".into());
            (job.id, job.input.clone())
        };
        info!(job_id = id, "job started");

        let mut claim = Claim {
            jobs: &self.jobs,
            id,
            settled: false,
        };
        let handle = self.status_handle(id);
        let outcome = worker(input, handle).await;
        claim.settled = true;

        let mut jobs = lock(&self.jobs);
        // the job cannot be removed while processing
        let job = jobs.iter_mut().find(|j| j.id == id)?;
        match outcome {
            Ok(output) => {
                job.advance(GenerationStatus::Completed).ok()?;
                job.output = Some(output);
                job.status_text = None;
                info!(job_id = id, "job completed");
            }
            Err(e) => {
                let msg = e.to_string();
                job.advance(GenerationStatus::Failed).ok()?;
                job.status_text = Some(format!("Failed: {msg}"));
                warn!(job_id = id, error = %msg, "job failed");
                job.error = Some(msg);
            }
        }
        Some(job.clone())
    }

    /// Runs pending jobs oldest-first until none is left.
    pub async fn run_until_idle<W, Fut, E>(&self, mut worker: W) -> Vec<Job<I, O>>
    where
        W: FnMut(I, StatusHandle) -> Fut,
        Fut: Future<Output = Result<O, E>>,
        E: Display,
    {
        let mut finished = Vec::new();
        while let Some(job) = self.run_next(|input, handle| worker(input, handle)).await {
            finished.push(job);
        }
        finished
    }

    fn status_handle(&self, id: JobId) -> StatusHandle {
        let jobs = self.jobs.clone();
        StatusHandle {
            set: Arc::new(move |text| {
                let mut jobs = lock(&jobs);
                if let Some(job) = jobs
                    .iter_mut()
                    .find(|j| j.id == id && j.status == GenerationStatus::Processing)
                {
                    job.status_text = text;
                }
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    type Queue = JobQueue<&'static str, String>;

    #[tokio::test]
    async fn processes_oldest_pending_first() {
        let q = Queue::new();
        q.enqueue("a");
        q.enqueue("b");
        q.enqueue("c");

        let done = q
            .run_until_idle(|input, _| async move { Ok::<_, String>(input.to_uppercase()) })
            .await;

        let outputs: Vec<_> = done.iter().map(|j| j.output.clone().unwrap()).collect();
        assert_eq!(outputs, vec!["A", "B", "C"]);
        assert!(q
            .jobs()
            .iter()
            .all(|j| j.status == GenerationStatus::Completed));
        assert!(q.next_pending().is_none());
    }

    #[tokio::test]
    async fn never_runs_two_jobs_at_once() {
        let q = Queue::new();
        for _ in 0..3 {
            q.enqueue("x");
        }
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let q2 = q.clone();
        let (r, p) = (running.clone(), peak.clone());
        q.run_until_idle(move |_, _| {
            let (r, p, q2) = (r.clone(), p.clone(), q2.clone());
            async move {
                let now = r.fetch_add(1, Ordering::SeqCst) + 1;
                p.fetch_max(now, Ordering::SeqCst);
                assert!(q2.is_busy());
                // a nested attempt to start another job is refused
                assert!(q2
                    .run_next(|_, _| async { Ok::<_, String>(String::new()) })
                    .await
                    .is_none());
                tokio::task::yield_now().await;
                r.fetch_sub(1, Ordering::SeqCst);
                Ok::<_, String>("ok".to_string())
            }
        })
        .await;

        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert!(!q.is_busy());
    }

    #[tokio::test]
    async fn failure_is_recorded_and_queue_moves_on() {
        let q = Queue::new();
        let bad = q.enqueue("bad");
        let good = q.enqueue("good");

        q.run_until_idle(|input, _| async move {
            if input == "bad" {
                Err("Timeout after 60000ms".to_string())
            } else {
                Ok(input.to_string())
            }
        })
        .await;

        let bad = q.get(bad).unwrap();
        assert_eq!(bad.status, GenerationStatus::Failed);
        assert_eq!(bad.error.as_deref(), Some("Timeout after 60000ms"));
        assert_eq!(bad.status_text.as_deref(), Some("Failed: Timeout after 60000ms"));
        assert_eq!(q.get(good).unwrap().status, GenerationStatus::Completed);
    }

    #[tokio::test]
    async fn worker_status_updates_reach_the_running_job() {
        let q = Queue::new();
        let id = q.enqueue("a");
        let q2 = q.clone();

        q.run_next(move |_, handle| async move {
            let sink = handle.sink();
            sink(StepStatus::Retrying);
            assert_eq!(q2.get(id).unwrap().status_text.as_deref(), Some("Retrying..."));
            Ok::<_, String>("done".to_string())
        })
        .await
        .unwrap();

        assert_eq!(q.get(id).unwrap().status_text, None);
    }

    #[tokio::test]
    async fn remove_refuses_processing_job() {
        let q = Queue::new();
        let id = q.enqueue("a");
        let q2 = q.clone();

        q.run_next(move |_, _| async move {
            assert_eq!(q2.remove(id).unwrap_err(), QueueError::Busy(id));
            Ok::<_, String>(String::new())
        })
        .await
        .unwrap();

        assert_eq!(q.remove(id).unwrap().id, id);
        assert_eq!(q.remove(id).unwrap_err(), QueueError::NotFound(id));
    }

    #[tokio::test]
    async fn panicking_worker_fails_its_job() {
        let q = Queue::new();
        let id = q.enqueue("boom");
        let next = q.enqueue("fine");

        let q2 = q.clone();
        let joined = tokio::spawn(async move {
            q2.run_next(|input, _| async move {
                if input == "boom" {
                    panic!("worker blew up");
                }
                Ok::<_, String>(input.to_string())
            })
            .await
        })
        .await;
        assert!(joined.unwrap_err().is_panic());

        let job = q.get(id).unwrap();
        assert_eq!(job.status, GenerationStatus::Failed);
        assert!(job.error.is_some());
        assert!(!q.is_busy());

        let done = q
            .run_next(|input, _| async move { Ok::<_, String>(input.to_string()) })
            .await
            .unwrap();
        assert_eq!(done.id, next);
        assert_eq!(done.status, GenerationStatus::Completed);
    }

    #[tokio::test]
    async fn cancelled_run_fails_its_job() {
        let q = Queue::new();
        let id = q.enqueue("slow");

        let cancelled = tokio::time::timeout(
            std::time::Duration::from_millis(20),
            q.run_next(|_, _| std::future::pending::<Result<String, String>>()),
        )
        .await;
        assert!(cancelled.is_err());

        let job = q.get(id).unwrap();
        assert_eq!(job.status, GenerationStatus::Failed);
        assert_eq!(job.status_text.as_deref(), Some("Failed: Job was interrupted"));
        assert_eq!(q.remove(id).unwrap().id, id);
    }

    #[test]
    fn terminal_jobs_cannot_be_restarted() {
        let q = Queue::new();
        let id = q.enqueue("a");
        let mut job = q.get(id).unwrap();
        job.advance(GenerationStatus::Processing).unwrap();
        job.advance(GenerationStatus::Completed).unwrap();
        assert_eq!(
            job.advance(GenerationStatus::Processing).unwrap_err(),
            QueueError::IllegalTransition {
                from: GenerationStatus::Completed,
                to: GenerationStatus::Processing,
            }
        );

        let mut fresh = q.get(id).unwrap();
        assert!(fresh.advance(GenerationStatus::Completed).is_err());
    }
}
