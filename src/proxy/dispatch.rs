//! Bounded-concurrency dispatch of independent checks

use futures::stream::{self, StreamExt};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Run `check` over every item with at most `concurrency` checks in flight
///
/// Admission goes through a counting semaphore: a permit is taken before a
/// check starts and dropped when it finishes, whatever the outcome. Results
/// come back in input order, one per item, but a slow check never holds a
/// slot once it is done.
pub async fn dispatch<T, R, F, Fut>(items: Vec<T>, concurrency: usize, check: F) -> Vec<R>
where
    F: Fn(T) -> Fut,
    Fut: Future<Output = R>,
{
    let concurrency = concurrency.max(1);
    let gate = Arc::new(Semaphore::new(concurrency));

    let mut results: Vec<(usize, R)> = stream::iter(items.into_iter().enumerate())
        .map(|(idx, item)| {
            let gate = Arc::clone(&gate);
            let fut = check(item);
            async move {
                // The gate is never closed, so acquire cannot fail here.
                let _permit = gate.acquire().await.ok();
                (idx, fut.await)
            }
        })
        .buffer_unordered(concurrency)
        .collect()
        .await;

    results.sort_by_key(|(idx, _)| *idx);
    results.into_iter().map(|(_, result)| result).collect()
}
