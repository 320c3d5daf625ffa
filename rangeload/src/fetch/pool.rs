//! Bounded worker pool with ordered results.
//!
//! Items are pulled lazily from an iterator and handed to spawned tokio
//! tasks, at most `workers` at a time. Results come back in submission
//! order regardless of completion order; a finished task whose predecessors
//! are still running holds its slot until they are yielded.

use std::future::Future;

use futures::stream::{self, BoxStream, StreamExt};
use tokio::task::JoinError;

/// A pooled task that did not run to completion.
#[derive(Debug)]
pub struct TaskFailed<K> {
    /// The item the task was started for.
    pub item: K,
    /// Why the task stopped.
    pub source: JoinError,
}

/// Run `task` over `items` with bounded concurrency, yielding in order.
///
/// With `sequential_first` the first item runs inline on the polling task,
/// and concurrent dispatch begins only after its result has been yielded.
pub fn ordered<I, F, Fut, T>(
    items: I,
    workers: usize,
    sequential_first: bool,
    task: F,
) -> BoxStream<'static, Result<T, TaskFailed<I::Item>>>
where
    I: Iterator + Send + 'static,
    I::Item: Clone + Send + 'static,
    F: Fn(I::Item) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    let workers = workers.max(1);
    let mut items = items;

    let head = if sequential_first { items.next() } else { None };
    let head_task = task.clone();
    let head = stream::iter(head).then(move |item| {
        let fut = head_task(item);
        async move { Ok(fut.await) }
    });

    let tail = stream::iter(items)
        .map(move |item| {
            let handle = tokio::spawn(task(item.clone()));
            async move {
                handle
                    .await
                    .map_err(|source| TaskFailed { item, source })
            }
        })
        .buffered(workers);

    head.chain(tail).boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_results_in_submission_order() {
        let results: Vec<_> = ordered(0u64..20, 4, false, |i| async move {
            // Later items finish first.
            tokio::time::sleep(Duration::from_millis(20 - i)).await;
            i
        })
        .map(|r| r.unwrap())
        .collect()
        .await;

        assert_eq!(results, (0..20).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let task = {
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            move |_: u32| {
                let active = Arc::clone(&active);
                let peak = Arc::clone(&peak);
                async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                }
            }
        };

        let count = ordered(0..30, 3, false, task).count().await;
        assert_eq!(count, 30);
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn test_sequential_first_finishes_before_others_start() {
        let started = Arc::new(AtomicUsize::new(0));
        let task = {
            let started = Arc::clone(&started);
            move |i: u32| {
                let started = Arc::clone(&started);
                async move {
                    let before = started.fetch_add(1, Ordering::SeqCst);
                    if i == 0 {
                        tokio::time::sleep(Duration::from_millis(20)).await;
                    }
                    (i, before)
                }
            }
        };

        let results: Vec<_> = ordered(0..5, 4, true, task)
            .map(|r| r.unwrap())
            .collect()
            .await;

        // Nothing else had started while the first item was running.
        assert_eq!(results[0], (0, 0));
        assert_eq!(results.iter().map(|(i, _)| *i).collect::<Vec<_>>(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_panicking_task_reports_its_item() {
        let results: Vec<_> = ordered(0..3, 2, false, |i: u32| async move {
            if i == 1 {
                panic!("boom");
            }
            i
        })
        .collect()
        .await;

        assert_eq!(results[0].as_ref().ok(), Some(&0));
        let failed = results[1].as_ref().unwrap_err();
        assert_eq!(failed.item, 1);
        assert!(failed.source.is_panic());
        assert_eq!(results[2].as_ref().ok(), Some(&2));
    }
}
