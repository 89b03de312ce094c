//! # Live collection subscriptions
//!
//! Keeps a local list in sync with a remote query. The remote delivers a
//! full materialized snapshot on every change; it is decoded, stripped of
//! soft-deleted records and handed over wholesale.
//!
//! Handles are scoped: dropping one releases the listener, and
//! `unsubscribe().await` additionally waits until no callback can still run.
//! Transport errors stall the subscription (logged, no retry); owners
//! resubscribe.

use std::sync::{Arc, Mutex};

use domains::document::Query;
use domains::errors::WriteError;
use domains::models::Record;
use domains::ports::{DocumentStore, Snapshot};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::Result;
use crate::observable::Observable;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionStatus {
    Active,
    /// The listener reported an error and stopped updating
    Stalled,
    Closed,
}

pub struct SubscriptionHandle {
    collection: String,
    task: Option<JoinHandle<()>>,
    status: watch::Receiver<SubscriptionStatus>,
}

impl SubscriptionHandle {
    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn status(&self) -> SubscriptionStatus {
        match &self.task {
            None => SubscriptionStatus::Closed,
            Some(_) => *self.status.borrow(),
        }
    }

    /// Releases the listener and waits for the delivery task to finish, so
    /// no snapshot can reach local state after this returns.
    pub async fn unsubscribe(mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            let _ = task.await;
            tracing::debug!(collection = %self.collection, "unsubscribed");
        }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

pub(crate) fn decode_visible<T: Record>(collection: &str, snapshot: Snapshot) -> Vec<T> {
    snapshot
        .iter()
        .filter_map(|doc| match doc.decode::<T>() {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::warn!(collection = %collection, error = %e, "skipping undecodable document");
                None
            }
        })
        .filter(|record| !record.is_deleted())
        .collect()
}

/// Opens `query` and calls `on_snapshot` with every decoded snapshot. The
/// first snapshot is delivered before this returns.
pub async fn subscribe<T, F>(
    documents: &Arc<dyn DocumentStore>,
    query: Query,
    mut on_snapshot: F,
) -> Result<SubscriptionHandle>
where
    T: Record,
    F: FnMut(Vec<T>) + Send + 'static,
{
    let collection = query.collection.clone();
    let mut listener = documents.listen(query).await?;

    match listener.next().await {
        Some(Ok(first)) => on_snapshot(decode_visible(&collection, first)),
        Some(Err(e)) => return Err(e.into()),
        None => {
            return Err(WriteError::Unavailable(format!("listener on {collection} closed")).into());
        }
    }

    let (status_tx, status_rx) = watch::channel(SubscriptionStatus::Active);
    let task_collection = collection.clone();
    let task = tokio::spawn(async move {
        while let Some(next) = listener.next().await {
            match next {
                Ok(snapshot) => on_snapshot(decode_visible(&task_collection, snapshot)),
                Err(e) => {
                    tracing::warn!(collection = %task_collection, error = %e, "live subscription stalled");
                    let _ = status_tx.send(SubscriptionStatus::Stalled);
                    return;
                }
            }
        }
        let _ = status_tx.send(SubscriptionStatus::Closed);
    });

    tracing::debug!(collection = %collection, "subscribed");
    Ok(SubscriptionHandle {
        collection,
        task: Some(task),
        status: status_rx,
    })
}

/// Mirrors `query` into `target`, replacing its contents on every snapshot.
pub async fn mirror<T: Record>(
    documents: &Arc<dyn DocumentStore>,
    query: Query,
    target: Observable<Vec<T>>,
) -> Result<SubscriptionHandle> {
    subscribe(documents, query, move |items: Vec<T>| {
        target.replace(items);
    })
    .await
}

/// Holds at most one subscription; a store swaps it when its query changes.
#[derive(Default)]
pub struct SubscriptionSlot {
    current: Mutex<Option<SubscriptionHandle>>,
}

impl SubscriptionSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, handle: SubscriptionHandle) {
        let previous = self
            .current
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .replace(handle);
        drop(previous);
    }

    /// Releases the held subscription, waiting for it to stop.
    pub async fn clear(&self) {
        let previous = self.current.lock().unwrap_or_else(|p| p.into_inner()).take();
        if let Some(handle) = previous {
            handle.unsubscribe().await;
        }
    }

    pub fn status(&self) -> SubscriptionStatus {
        self.current
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .as_ref()
            .map_or(SubscriptionStatus::Closed, SubscriptionHandle::status)
    }
}
