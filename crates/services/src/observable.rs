//! # Observable
//!
//! Explicit state containers with a subscribe/notify interface. Every domain
//! store keeps its local mirror in one of these; renderers hold a
//! `watch::Receiver` and re-render when it changes.

use std::sync::Arc;

use tokio::sync::watch;

pub struct Observable<T> {
    tx: Arc<watch::Sender<T>>,
}

impl<T> Clone for Observable<T> {
    fn clone(&self) -> Self {
        Self {
            tx: Arc::clone(&self.tx),
        }
    }
}

impl<T: Clone + Send + Sync> Observable<T> {
    pub fn new(initial: T) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx: Arc::new(tx) }
    }

    /// Clone of the current value.
    pub fn get(&self) -> T {
        self.tx.borrow().clone()
    }

    /// Reads without cloning. Do not call back into this observable from `f`.
    pub fn read<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.tx.borrow())
    }

    /// Replaces the value wholesale and notifies observers.
    pub fn replace(&self, value: T) -> T {
        self.tx.send_replace(value)
    }

    /// Mutates in place and notifies observers.
    pub fn update(&self, f: impl FnOnce(&mut T)) {
        self.tx.send_modify(f);
    }

    /// Mutates in place; observers are notified only when `f` returns true.
    pub fn update_if(&self, f: impl FnOnce(&mut T) -> bool) -> bool {
        self.tx.send_if_modified(f)
    }

    /// New observer. The current value counts as already seen.
    pub fn subscribe(&self) -> watch::Receiver<T> {
        self.tx.subscribe()
    }
}

impl<T: Clone + Send + Sync + Default> Default for Observable<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn observers_see_updates_but_not_silent_ones() {
        let counter = Observable::new(0u32);
        let mut rx = counter.subscribe();
        assert!(!rx.has_changed().unwrap());

        counter.update(|n| *n += 1);
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), 1);

        assert!(!counter.update_if(|_| false));
        assert!(!rx.has_changed().unwrap());

        assert_eq!(counter.replace(7), 1);
        assert_eq!(counter.get(), 7);
    }
}
