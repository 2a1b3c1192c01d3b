use std::sync::Mutex;

use futures_util::future::BoxFuture;
use tokio::task::JoinHandle;
use tracing::warn;

/// Host hook for work that may outlive the response: the run hands over its
/// enrichment tail and returns immediately.
pub trait BackgroundHook: Send + Sync {
    fn wait_until(&self, task: BoxFuture<'static, ()>);
}

/// Spawns each task on the tokio runtime and keeps the handle so a caller
/// (tests, graceful shutdown) can wait for the tail to finish.
#[derive(Default)]
pub struct TokioHook {
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl TokioHook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Await every task handed over so far.
    pub async fn drain(&self) {
        let handles = match self.handles.lock() {
            Ok(mut guard) => std::mem::take(&mut *guard),
            Err(_) => return,
        };
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Background task panicked or was cancelled");
            }
        }
    }
}

impl BackgroundHook for TokioHook {
    fn wait_until(&self, task: BoxFuture<'static, ()>) {
        let handle = tokio::spawn(task);
        if let Ok(mut guard) = self.handles.lock() {
            guard.retain(|h| !h.is_finished());
            guard.push(handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::FutureExt;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn drain_waits_for_spawned_tasks() {
        let hook = TokioHook::new();
        let done = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let done = Arc::clone(&done);
            hook.wait_until(
                async move {
                    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                    done.fetch_add(1, Ordering::SeqCst);
                }
                .boxed(),
            );
        }
        hook.drain().await;
        assert_eq!(done.load(Ordering::SeqCst), 3);
    }
}
