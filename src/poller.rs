use crate::artifact::ArtifactRef;
use crate::error::ClientError;
use crate::state::AudioStatus;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};

/// What the backend says about an artifact on a single status query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactStatus {
    Ready,
    Generating,
    /// The file entry does not exist (yet).
    NotFound,
}

/// Status query collaborator. Must be idempotent; it is called once per tick.
#[async_trait]
pub trait StatusSource: Send + Sync {
    async fn artifact_status(&self, artifact: &ArtifactRef) -> Result<ArtifactStatus, ClientError>;
}

/// How a `NotFound` answer is treated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotFoundPolicy {
    /// Same as `Generating`: the server may not have created the file yet.
    #[default]
    KeepWaiting,
    /// Report `Error` on the first `NotFound`.
    Fail,
}

#[derive(Debug, Clone)]
pub struct PollPolicy {
    pub max_attempts: u32,
    /// Delay before every query, including the first.
    pub interval: Duration,
    /// Optional wall-clock bound on top of the attempt budget.
    pub deadline: Option<Duration>,
    pub not_found: NotFoundPolicy,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 100,
            interval: Duration::from_millis(1000),
            deadline: None,
            not_found: NotFoundPolicy::KeepWaiting,
        }
    }
}

/// Terminal result of one poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Ready,
    /// Attempt budget (or deadline) spent while the artifact was still pending.
    Timeout,
    /// Transport failure, or an artifact that cannot be queried at all.
    Error,
}

impl PollOutcome {
    pub fn audio_status(self) -> AudioStatus {
        match self {
            PollOutcome::Ready => AudioStatus::Ready,
            PollOutcome::Timeout => AudioStatus::Timeout,
            PollOutcome::Error => AudioStatus::Error,
        }
    }
}

pub struct Poller {
    source: Arc<dyn StatusSource>,
    policy: PollPolicy,
}

impl Poller {
    pub fn new(source: Arc<dyn StatusSource>, policy: PollPolicy) -> Self {
        Self { source, policy }
    }

    /// Drive one artifact to a terminal outcome.
    ///
    /// Returns `None` if `cancel_rx` flips to `true` or its sender is dropped
    /// before a terminal outcome is reached.
    pub async fn run(
        &self,
        artifact: &ArtifactRef,
        mut cancel_rx: watch::Receiver<bool>,
    ) -> Option<PollOutcome> {
        if artifact.is_empty() {
            log::warn!("[poller] empty artifact reference, not polling");
            return Some(PollOutcome::Error);
        }

        let started = Instant::now();
        let mut attempts: u32 = 0;
        while attempts < self.policy.max_attempts {
            tokio::select! {
                _ = sleep(self.policy.interval) => {}
                _ = cancelled(&mut cancel_rx) => {
                    log::debug!("[poller] {} cancelled after {} attempts", artifact, attempts);
                    return None;
                }
            }

            let status = tokio::select! {
                status = self.source.artifact_status(artifact) => status,
                _ = cancelled(&mut cancel_rx) => {
                    log::debug!("[poller] {} cancelled during query", artifact);
                    return None;
                }
            };

            match status {
                Ok(ArtifactStatus::Ready) => {
                    log::info!("[poller] {} ready after {} attempts", artifact, attempts + 1);
                    return Some(PollOutcome::Ready);
                }
                Ok(ArtifactStatus::NotFound) if self.policy.not_found == NotFoundPolicy::Fail => {
                    log::warn!("[poller] {} not found on server", artifact);
                    return Some(PollOutcome::Error);
                }
                Ok(pending) => {
                    attempts += 1;
                    log::debug!(
                        "[poller] {} {:?} (attempt {}/{})",
                        artifact,
                        pending,
                        attempts,
                        self.policy.max_attempts
                    );
                }
                Err(e) => {
                    log::error!("[poller] {} status query failed: {}", artifact, e);
                    return Some(PollOutcome::Error);
                }
            }

            if let Some(deadline) = self.policy.deadline {
                if started.elapsed() >= deadline {
                    log::warn!("[poller] {} deadline of {:?} passed", artifact, deadline);
                    return Some(PollOutcome::Timeout);
                }
            }
        }

        log::warn!("[poller] {} timed out after {} attempts", artifact, attempts);
        Some(PollOutcome::Timeout)
    }
}

/// Resolves once cancellation is requested or the owning handle is gone.
async fn cancelled(cancel_rx: &mut watch::Receiver<bool>) {
    let _ = cancel_rx.wait_for(|cancel| *cancel).await;
}

/// A live poll task, or scheduled follow-up work for an artifact.
/// Dropping the handle cancels it.
pub struct PollHandle {
    artifact: ArtifactRef,
    cancel_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl PollHandle {
    pub fn artifact(&self) -> &ArtifactRef {
        &self.artifact
    }

    pub fn cancel(&self) {
        let _ = self.cancel_tx.send(true);
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the task, including whatever `on_outcome` does.
    #[cfg(test)]
    pub async fn join(self) {
        let PollHandle {
            artifact,
            cancel_tx,
            task,
        } = self;
        if let Err(e) = task.await {
            log::error!("[poller] task for {} aborted: {}", artifact, e);
        }
        drop(cancel_tx);
    }
}

/// Run `poller` on a tokio task and hand the terminal outcome to `on_outcome`.
///
/// `on_outcome` runs at most once, and not at all when the poll is cancelled.
/// Cancelling after the outcome stops `on_outcome` at its next await, so a
/// delayed playback never fires once the handle is cancelled or dropped.
pub fn spawn<F, Fut>(poller: Arc<Poller>, artifact: ArtifactRef, on_outcome: F) -> PollHandle
where
    F: FnOnce(PollOutcome) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let (cancel_tx, cancel_rx) = watch::channel(false);
    let mut follow_up_rx = cancel_rx.clone();
    let task_artifact = artifact.clone();
    let task = tokio::spawn(async move {
        log::info!("[poller] watching {}", task_artifact);
        let Some(outcome) = poller.run(&task_artifact, cancel_rx).await else {
            return;
        };
        guarded(&task_artifact, on_outcome(outcome), &mut follow_up_rx).await;
    });
    PollHandle {
        artifact,
        cancel_tx,
        task,
    }
}

/// Run `work` for `artifact` under the same cancel contract as a poll.
pub fn spawn_task<Fut>(artifact: ArtifactRef, work: Fut) -> PollHandle
where
    Fut: Future<Output = ()> + Send + 'static,
{
    let (cancel_tx, mut cancel_rx) = watch::channel(false);
    let task_artifact = artifact.clone();
    let task = tokio::spawn(async move {
        guarded(&task_artifact, work, &mut cancel_rx).await;
    });
    PollHandle {
        artifact,
        cancel_tx,
        task,
    }
}

async fn guarded<Fut>(artifact: &ArtifactRef, work: Fut, cancel_rx: &mut watch::Receiver<bool>)
where
    Fut: Future<Output = ()>,
{
    // `work` is polled first so its synchronous prefix (settling the message)
    // always runs; only what comes after its first await can be cut off.
    tokio::select! {
        biased;
        _ = work => {}
        _ = cancelled(cancel_rx) => {
            log::debug!("[poller] pending work for {} cancelled", artifact);
        }
    }
}
