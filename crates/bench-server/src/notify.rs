//! Decoupled notification of finished tests.
//!
//! The aggregation path only pushes a [`TestSummary`] onto an unbounded
//! channel. A background task delivers it, so a slow or failing notifier
//! can never stall or fail a submission.

use std::sync::Arc;

use async_trait::async_trait;
use bench_core::TestSummary;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

#[derive(Debug, Error)]
#[error("notification failed: {0}")]
pub struct NotifyError(pub String);

/// Something that wants to hear about finished tests.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, summary: &TestSummary) -> Result<(), NotifyError>;
}

/// Writes finished tests to the log.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, summary: &TestSummary) -> Result<(), NotifyError> {
        info!(
            test_id = summary.test_id,
            outcome = ?summary.outcome,
            elo = summary.elo,
            error = summary.error,
            "{}",
            summary.render()
        );
        Ok(())
    }
}

pub type NotificationSender = mpsc::UnboundedSender<TestSummary>;

/// Spawn the delivery task. It runs until every sender is dropped.
pub fn spawn_dispatcher(notifier: Arc<dyn Notifier>) -> (NotificationSender, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<TestSummary>();

    let handle = tokio::spawn(async move {
        while let Some(summary) = rx.recv().await {
            if let Err(e) = notifier.notify(&summary).await {
                warn!(test_id = summary.test_id, error = %e, "failed to deliver notification");
            }
        }
    });

    (tx, handle)
}
