//! Poll cycles and the repeating poll task.

use super::ManagerInner;
use crate::types::DataSource;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Weak;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

/// Outcome of one poll cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PollReport {
    /// Every remote source returned data.
    pub ok: bool,
    /// Number of remote sources polled.
    pub sources: usize,
    /// Labels of the sources that returned nothing or timed out.
    pub failed: Vec<String>,
    /// Items that changed a property.
    pub applied: usize,
}

impl ManagerInner {
    /// Poll every remote source concurrently and merge the results.
    ///
    /// Cycles never overlap. Items of a source are merged even when another
    /// source failed; the report is then not `ok`.
    pub(crate) async fn poll_cycle(&self, timeout: Duration) -> PollReport {
        let _flight = self.poll_lock.lock().await;
        if self.is_disposed() {
            return PollReport::default();
        }

        let chain = self.chain.load_full();
        let remotes = chain.remote_sources();
        let started = Instant::now();

        let mut tasks = JoinSet::new();
        for (index, source) in remotes.iter().cloned().enumerate() {
            tasks.spawn(async move {
                let result = tokio::time::timeout(timeout, source.poll_properties(timeout)).await;
                (index, result)
            });
        }

        let mut results: Vec<Option<DataSource>> = vec![None; remotes.len()];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, Ok(data))) => results[index] = data,
                Ok((index, Err(_))) => {
                    warn!(source = %remotes[index].label(), timeout_ms = timeout.as_millis() as u64, "Source timed out");
                }
                Err(e) => warn!("Poll task failed: {}", e),
            }
        }

        // Results of a cycle interrupted by dispose are dropped
        if self.is_disposed() {
            return PollReport::default();
        }

        let mut report = PollReport {
            ok: true,
            sources: remotes.len(),
            ..PollReport::default()
        };
        let mut seen: HashSet<String> = HashSet::new();
        for (index, result) in results.into_iter().enumerate() {
            let Some(data) = result else {
                report.ok = false;
                report.failed.push(remotes[index].label());
                continue;
            };
            for item in data.into_items() {
                // Highest priority source wins within a cycle
                if !seen.insert(item.key.clone()) || chain.shadowed_by_higher_remote(index, &item.key) {
                    continue;
                }
                if self.apply_item(item) {
                    report.applied += 1;
                }
            }
        }

        debug!(
            sources = report.sources,
            failed = report.failed.len(),
            applied = report.applied,
            duration_ms = started.elapsed().as_millis() as u64,
            "Poll cycle completed"
        );
        report
    }
}

/// Handle on the repeating poll task.
pub(crate) struct PollerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl PollerHandle {
    pub(crate) fn spawn(inner: Weak<ManagerInner>) -> Self {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(run(inner, shutdown_rx));
        Self { shutdown, task }
    }

    /// Stop the loop. A cycle in flight is aborted.
    pub(crate) fn stop(self) {
        let _ = self.shutdown.send(true);
        self.task.abort();
    }
}

/// Sleep, poll, repeat. The next sleep only starts once the previous cycle
/// has completed.
async fn run(inner: Weak<ManagerInner>, mut shutdown: watch::Receiver<bool>) {
    loop {
        let Some(interval) = inner.upgrade().map(|m| m.settings().polling.interval()) else {
            break;
        };

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.changed() => break,
        }
        if *shutdown.borrow() {
            break;
        }

        let Some(manager) = inner.upgrade() else {
            break;
        };
        if manager.is_disposed() {
            break;
        }
        let timeout = manager.settings().polling.source_timeout();
        let report = manager.poll_cycle(timeout).await;
        if report.sources == 0 {
            info!("No remote sources left, polling stopped");
            break;
        }
        if !report.ok {
            info!(failed = ?report.failed, "Some dynamic properties sources failed, keeping cached values");
        }
    }
    debug!("Poll loop ended");
}
