//! # Optimistic mutation pipeline
//!
//! Reducer-with-compensation: the local change is applied synchronously and
//! returns its inverse; the remote write runs; on failure the inverse is
//! applied and the error is returned. On success nothing else happens, the
//! next snapshot overwrites local state idempotently.
//!
//! Inverses are operations, not saved copies, so snapshots that land while
//! the write is in flight are not clobbered by a rollback.

use std::future::Future;

use domains::models::Record;

use crate::error::{Result, StoreError};
use crate::observable::Observable;

pub type Compensation<S> = Box<dyn FnOnce(&mut S) + Send>;

pub async fn apply<S, R, E, Fut>(
    mirror: &Observable<S>,
    label: &str,
    forward: impl FnOnce(&mut S) -> Option<Compensation<S>>,
    remote: Fut,
) -> Result<R>
where
    S: Clone + Send + Sync,
    Fut: Future<Output = std::result::Result<R, E>>,
    E: Into<StoreError>,
{
    let mut compensation = None;
    mirror.update(|state| compensation = forward(state));

    match remote.await {
        Ok(value) => Ok(value),
        Err(e) => {
            let err = e.into();
            tracing::warn!(mutation = label, error = %err, "remote write failed, reverting local change");
            if let Some(undo) = compensation {
                mirror.update(undo);
            }
            Err(err)
        }
    }
}

/// Adds or removes `id`; returns whether the list changed.
pub fn set_membership(ids: &mut Vec<String>, id: &str, present: bool) -> bool {
    let position = ids.iter().position(|existing| existing == id);
    match (present, position) {
        (true, None) => {
            ids.push(id.to_string());
            true
        }
        (false, Some(index)) => {
            ids.remove(index);
            true
        }
        _ => false,
    }
}

/// Forward step for toggling `member` in a set-valued field of the item
/// `item_id` inside a mirrored list. Its inverse toggles it back, so a
/// snapshot landing mid-flight is left intact.
pub fn toggle_membership<T, F>(
    item_id: String,
    member: String,
    present: bool,
    field: F,
) -> impl FnOnce(&mut Vec<T>) -> Option<Compensation<Vec<T>>>
where
    T: Record,
    F: Fn(&mut T) -> &mut Vec<String> + Send + 'static,
{
    move |items: &mut Vec<T>| {
        let item = items.iter_mut().find(|item| item.id() == item_id)?;
        if !set_membership(field(item), &member, present) {
            return None;
        }
        Some(Box::new(move |items: &mut Vec<T>| {
            if let Some(item) = items.iter_mut().find(|item| item.id() == item_id) {
                set_membership(field(item), &member, !present);
            }
        }))
    }
}

/// Forward step that hides `item_id` from a mirrored list; the inverse puts
/// it back where it was.
pub fn hide_item<T: Record>(item_id: String) -> impl FnOnce(&mut Vec<T>) -> Option<Compensation<Vec<T>>> {
    move |items: &mut Vec<T>| {
        let index = items.iter().position(|item| item.id() == item_id)?;
        let removed = items.remove(index);
        Some(Box::new(move |items: &mut Vec<T>| {
            if !items.iter().any(|item| item.id() == removed.id()) {
                let index = index.min(items.len());
                items.insert(index, removed);
            }
        }))
    }
}
