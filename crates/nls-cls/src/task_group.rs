//! ---
//! nls_section: "05-networking-external-interfaces"
//! nls_subsection: "module"
//! nls_type: "source"
//! nls_scope: "code"
//! nls_description: "Licensing API client and hierarchical snapshot fetcher."
//! nls_version: "v0.1.0"
//! nls_owner: "tbd"
//! ---
use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::error::{ClsError, Result};

/// Bounded fan-out of fallible tasks with fail-fast cancellation.
///
/// At most `limit` tasks run their body at once. The first error aborts every
/// sibling; dropping the group aborts everything still running.
pub struct TaskGroup<T> {
    tasks: JoinSet<Result<T>>,
    permits: Arc<Semaphore>,
}

impl<T: Send + 'static> TaskGroup<T> {
    /// Create a group that runs at most `limit` tasks concurrently. A zero
    /// limit is treated as one.
    pub fn new(limit: usize) -> Self {
        Self {
            tasks: JoinSet::new(),
            permits: Arc::new(Semaphore::new(limit.max(1))),
        }
    }

    /// Queue a task. It starts once a permit is available.
    pub fn spawn<F>(&mut self, task: F)
    where
        F: Future<Output = Result<T>> + Send + 'static,
    {
        let permits = Arc::clone(&self.permits);
        self.tasks.spawn(async move {
            let _permit = permits
                .acquire_owned()
                .await
                .map_err(|_| ClsError::Task("task group closed".into()))?;
            task.await
        });
    }

    /// Number of queued or running tasks.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether no task has been spawned.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Wait for all tasks. Returns their outputs in completion order, or the
    /// first error once the remaining tasks have been aborted and reaped.
    pub async fn wait(mut self) -> Result<Vec<T>> {
        let mut outputs = Vec::with_capacity(self.tasks.len());
        while let Some(joined) = self.tasks.join_next().await {
            let outcome = joined.unwrap_or_else(|err| Err(ClsError::Task(err.to_string())));
            match outcome {
                Ok(output) => outputs.push(output),
                Err(err) => {
                    self.tasks.abort_all();
                    while self.tasks.join_next().await.is_some() {}
                    return Err(err);
                }
            }
        }
        Ok(outputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn respects_concurrency_limit() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut group = TaskGroup::new(3);
        for i in 0..12 {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            group.spawn(async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(15)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                Ok(i)
            });
        }
        assert_eq!(group.len(), 12);
        let mut outputs = group.wait().await.unwrap();
        outputs.sort_unstable();
        assert_eq!(outputs, (0..12).collect::<Vec<_>>());
        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert!(peak.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn first_error_cancels_siblings() {
        let finished = Arc::new(AtomicBool::new(false));
        let mut group: TaskGroup<()> = TaskGroup::new(4);
        for _ in 0..3 {
            let finished = Arc::clone(&finished);
            group.spawn(async move {
                tokio::time::sleep(Duration::from_secs(5)).await;
                finished.store(true, Ordering::SeqCst);
                Ok(())
            });
        }
        group.spawn(async { Err::<(), _>(ClsError::Task("boom".into())) });

        let result = tokio::time::timeout(Duration::from_secs(2), group.wait())
            .await
            .expect("wait should return promptly after the failure");
        assert!(matches!(result, Err(ClsError::Task(msg)) if msg == "boom"));
        assert!(!finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn panicking_task_surfaces_as_error() {
        let mut group: TaskGroup<u8> = TaskGroup::new(1);
        group.spawn(async {
            let missing: Option<u8> = None;
            Ok(missing.expect("task blew up"))
        });
        let err = group.wait().await.unwrap_err();
        assert!(matches!(err, ClsError::Task(_)));
    }

    #[tokio::test]
    async fn empty_group_yields_nothing() {
        let group: TaskGroup<u8> = TaskGroup::new(0);
        assert!(group.is_empty());
        assert!(group.wait().await.unwrap().is_empty());
    }
}
