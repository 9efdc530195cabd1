//! Fire-and-forget notification dispatch
//!
//! The transport (mail/SMS) is an external collaborator behind
//! [`NotificationSink`]. [`QueuedDispatcher`] decouples dispatch from the
//! workflow commit with a channel and a worker thread: a transport failure
//! is logged, never propagated, so it cannot unwind a committed transition.

use super::notify::NotificationMessage;
use crossbeam_channel::{Sender, unbounded};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::warn;

pub trait NotificationSink: Send + Sync {
    fn send(&self, message: &NotificationMessage) -> anyhow::Result<()>;
}

/// Swallows everything. Useful when no transport is wired up.
pub struct NullSink;

impl NotificationSink for NullSink {
    fn send(&self, _message: &NotificationMessage) -> anyhow::Result<()> {
        Ok(())
    }
}

pub struct QueuedDispatcher {
    tx: Option<Sender<NotificationMessage>>,
    worker: Option<JoinHandle<()>>,
}

impl QueuedDispatcher {
    pub fn new(inner: Arc<dyn NotificationSink>) -> Self {
        let (tx, rx) = unbounded::<NotificationMessage>();
        let worker = std::thread::spawn(move || {
            for message in rx {
                if let Err(err) = inner.send(&message) {
                    warn!(tag = %message.tag, error = %err, "queued dispatch failed");
                }
            }
        });
        Self {
            tx: Some(tx),
            worker: Some(worker),
        }
    }
}

impl NotificationSink for QueuedDispatcher {
    fn send(&self, message: &NotificationMessage) -> anyhow::Result<()> {
        if let Some(tx) = &self.tx {
            // a disconnected worker is a shutdown race, not a caller problem
            let _ = tx.send(message.clone());
        }
        Ok(())
    }
}

impl Drop for QueuedDispatcher {
    fn drop(&mut self) {
        // dropping the sender disconnects the channel; the worker drains
        // whatever is still queued and exits
        self.tx.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}
