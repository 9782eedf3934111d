//! Change notification plumbing
//!
//! An external watcher (file system, poller, UI action) owns the detection
//! side; this module only carries its signals into the engine. Events are
//! queued on a bounded channel and handled one at a time, so a burst of
//! notifications for the same source reduces to sequential reloads rather
//! than concurrent ones.

use crate::{Result, TabLensError};
use std::future::Future;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Signal from an external change watcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceEvent {
    /// The named source's content changed and should be re-ingested.
    Modified(String),
    /// The named source disappeared; its registration should be dropped.
    Removed(String),
}

impl SourceEvent {
    pub fn source(&self) -> &str {
        match self {
            SourceEvent::Modified(s) | SourceEvent::Removed(s) => s,
        }
    }
}

/// Cheap clonable handle given to watchers. Holds a weak sender so that
/// outstanding notifier handles do not keep a shut-down listener alive.
#[derive(Clone)]
pub struct ChangeNotifier {
    tx: mpsc::WeakSender<SourceEvent>,
}

impl ChangeNotifier {
    pub async fn source_changed(&self, source: impl Into<String>) -> Result<()> {
        self.send(SourceEvent::Modified(source.into())).await
    }

    pub async fn source_removed(&self, source: impl Into<String>) -> Result<()> {
        self.send(SourceEvent::Removed(source.into())).await
    }

    /// Non-blocking variant for synchronous watcher callbacks. A full queue
    /// drops the event, which is safe because a later reload observes the
    /// same final file state.
    pub fn try_source_changed(&self, source: impl Into<String>) -> bool {
        let Some(tx) = self.tx.upgrade() else {
            return false;
        };
        let event = SourceEvent::Modified(source.into());
        match tx.try_send(event) {
            Ok(()) => true,
            Err(err) => {
                warn!(error = %err, "dropping change notification");
                false
            }
        }
    }

    async fn send(&self, event: SourceEvent) -> Result<()> {
        let tx = self.tx.upgrade().ok_or_else(|| {
            TabLensError::Computation("change listener is not running".to_string())
        })?;
        tx.send(event).await.map_err(|_| {
            TabLensError::Computation("change listener is not running".to_string())
        })
    }
}

/// Listener task that forwards watcher events into a handler.
pub struct ChangeMonitor {
    tx: mpsc::Sender<SourceEvent>,
    task: JoinHandle<()>,
}

impl ChangeMonitor {
    /// Start the listener loop. `handler` is invoked once per event, in
    /// arrival order.
    pub fn spawn<H, Fut>(capacity: usize, mut handler: H) -> Self
    where
        H: FnMut(SourceEvent) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let (tx, mut rx) = mpsc::channel::<SourceEvent>(capacity.max(1));
        let task = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                debug!(source = event.source(), "handling change notification");
                handler(event).await;
            }
        });
        Self { tx, task }
    }

    pub fn notifier(&self) -> ChangeNotifier {
        ChangeNotifier {
            tx: self.tx.downgrade(),
        }
    }

    /// Stop accepting events and wait for queued ones to drain.
    pub async fn shutdown(self) {
        drop(self.tx);
        let _ = self.task.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::sync::Mutex;

    #[tokio::test]
    async fn test_events_reach_handler_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let monitor = {
            let seen = seen.clone();
            ChangeMonitor::spawn(8, move |event| {
                let seen = seen.clone();
                async move {
                    seen.lock().await.push(event);
                }
            })
        };
        let notifier = monitor.notifier();
        notifier.source_changed("orders").await.unwrap();
        notifier.source_removed("orders").await.unwrap();
        monitor.shutdown().await;

        let seen = seen.lock().await;
        assert_eq!(
            *seen,
            vec![
                SourceEvent::Modified("orders".to_string()),
                SourceEvent::Removed("orders".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_notify_after_shutdown_fails() {
        let count = Arc::new(AtomicUsize::new(0));
        let monitor = {
            let count = count.clone();
            ChangeMonitor::spawn(1, move |_| {
                count.fetch_add(1, Ordering::SeqCst);
                async {}
            })
        };
        let notifier = monitor.notifier();
        notifier.source_changed("t").await.unwrap();
        monitor.shutdown().await;
        assert!(notifier.source_changed("t").await.is_err());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
