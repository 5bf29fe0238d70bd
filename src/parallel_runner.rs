// src/parallel_runner.rs

//! ParallelRunner: fan-out primitive used by every parallel phase (spec
//! §4.6). Spawns one task per host, waits for all of them, and surfaces
//! the first error observed; later errors are logged and discarded.

use crate::error::{Error, Result};
use futures::future::BoxFuture;
use tokio::task::JoinSet;
use tracing::warn;

/// Runs `op` concurrently across every item in `items`, one Tokio task per
/// item, and waits for all to complete — even after the first error,
/// matching the source's "no cancellation" contract (spec §4.6/§5).
///
/// Returns the first error observed, keyed by arrival order in the join
/// set (not by input order — scheduling may reorder which host's task
/// lands first, and tests must tolerate this per spec §5).
pub async fn run_all<T, F>(items: Vec<T>, op: F) -> Result<()>
where
    T: Send + 'static,
    F: Fn(T) -> BoxFuture<'static, Result<()>> + Send + Sync + 'static,
{
    let mut set = JoinSet::new();
    for item in items {
        let fut = op(item);
        set.spawn(fut);
    }

    let mut first_error: Option<Error> = None;
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                if first_error.is_none() {
                    first_error = Some(e);
                } else {
                    warn!(error = %e, "discarding additional error from parallel phase");
                }
            }
            Err(join_err) => {
                let e = Error::Transport {
                    host: "unknown".to_string(),
                    message: format!("worker task panicked: {join_err}"),
                };
                if first_error.is_none() {
                    first_error = Some(e);
                } else {
                    warn!(error = %join_err, "discarding additional panic from parallel phase");
                }
            }
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn runs_every_item_and_succeeds_when_all_succeed() {
        let calls = Arc::new(AtomicUsize::new(0));
        let items = vec![1, 2, 3];
        let calls2 = calls.clone();
        run_all(items, move |_n| {
            let calls = calls2.clone();
            Box::pin(async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        })
        .await
        .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn surfaces_an_error_and_still_runs_every_item() {
        let calls = Arc::new(AtomicUsize::new(0));
        let items = vec![1, 2, 3];
        let calls2 = calls.clone();
        let result = run_all(items, move |n| {
            let calls = calls2.clone();
            Box::pin(async move {
                calls.fetch_add(1, Ordering::SeqCst);
                if n == 2 {
                    Err(Error::Lock("shard".to_string()))
                } else {
                    Ok(())
                }
            })
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
