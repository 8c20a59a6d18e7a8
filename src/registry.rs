//! Fan-out of one upstream callback to many subscribers.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Subscription key. `0` asks the channel helpers to derive one from an address.
pub type CallbackId = u64;

/// Return `id` unless it is `0`, in which case the address is used.
pub fn derive_id<T: ?Sized>(id: CallbackId, address: *const T) -> CallbackId {
    if id != 0 {
        id
    } else {
        address as *const () as usize as CallbackId
    }
}

/// Thread-safe map of subscribers sharing one callable signature `F`.
///
/// A single mutex guards the map and is held for the whole of [`dispatch`],
/// so a slow subscriber delays every other subscriber as well as concurrent
/// [`listen`]/[`unlisten`] calls. Subscribers must not block, and must not
/// call back into the same registry.
///
/// [`dispatch`]: CallbackRegistry::dispatch
/// [`listen`]: CallbackRegistry::listen
/// [`unlisten`]: CallbackRegistry::unlisten
pub struct CallbackRegistry<F: ?Sized> {
    callbacks: Mutex<BTreeMap<CallbackId, Box<F>>>,
}

impl<F: ?Sized> CallbackRegistry<F> {
    pub fn new() -> Self {
        Self {
            callbacks: Mutex::new(BTreeMap::new()),
        }
    }

    // A subscriber that panicked mid-dispatch leaves the map itself intact.
    fn lock(&self) -> MutexGuard<'_, BTreeMap<CallbackId, Box<F>>> {
        self.callbacks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `callback` under `id`.
    ///
    /// # Panics
    /// If `id` is already registered. Ids must be unique per registry.
    pub fn listen(&self, id: CallbackId, callback: Box<F>) {
        let mut callbacks = self.lock();
        if callbacks.contains_key(&id) {
            drop(callbacks);
            panic!("callback id {:#x} is already registered", id);
        }
        callbacks.insert(id, callback);
        log::trace!("callback {:#x} registered", id);
    }

    /// Remove the subscriber under `id`. Unknown ids are ignored.
    pub fn unlisten(&self, id: CallbackId) {
        if self.lock().remove(&id).is_some() {
            log::trace!("callback {:#x} removed", id);
        }
    }

    /// Call `invoke` once per subscriber, in ascending id order.
    pub fn dispatch(&self, mut invoke: impl FnMut(&F)) {
        let callbacks = self.lock();
        for callback in callbacks.values() {
            invoke(callback);
        }
    }

    pub fn contains(&self, id: CallbackId) -> bool {
        self.lock().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}

impl<F: ?Sized> Default for CallbackRegistry<F> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    type Callback = dyn Fn(u32) + Send + Sync;

    #[test]
    fn test_unlisten_is_idempotent() {
        let registry: CallbackRegistry<Callback> = CallbackRegistry::new();
        registry.listen(7, Box::new(|_| {}));
        assert!(registry.contains(7));
        registry.unlisten(7);
        registry.unlisten(7);
        assert!(registry.is_empty());
    }

    #[test]
    #[should_panic(expected = "already registered")]
    fn test_duplicate_id_panics() {
        let registry: CallbackRegistry<Callback> = CallbackRegistry::new();
        registry.listen(1, Box::new(|_| {}));
        registry.listen(1, Box::new(|_| {}));
    }

    #[test]
    fn test_dispatch_reaches_every_subscriber_once_in_stable_order() {
        let registry: CallbackRegistry<Callback> = CallbackRegistry::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for id in [30u64, 10, 20, 40, 5] {
            let order = order.clone();
            registry.listen(id, Box::new(move |value| order.lock().unwrap().push((id, value))));
        }

        registry.dispatch(|cb| cb(1));
        registry.dispatch(|cb| cb(2));

        let order = order.lock().unwrap();
        let first: Vec<u64> = order.iter().filter(|(_, v)| *v == 1).map(|(id, _)| *id).collect();
        let second: Vec<u64> = order.iter().filter(|(_, v)| *v == 2).map(|(id, _)| *id).collect();
        assert_eq!(first, vec![5, 10, 20, 30, 40]);
        assert_eq!(first, second);
    }

    #[test]
    fn test_dispatch_concurrent_with_listen() {
        let registry: Arc<CallbackRegistry<Callback>> = Arc::new(CallbackRegistry::new());
        let hits = Arc::new(AtomicUsize::new(0));

        let dispatcher = {
            let registry = registry.clone();
            std::thread::spawn(move || {
                for i in 0..1000 {
                    registry.dispatch(|cb| cb(i));
                }
            })
        };

        for id in 1..=100u64 {
            let hits = hits.clone();
            registry.listen(id, Box::new(move |_| {
                hits.fetch_add(1, Ordering::Relaxed);
            }));
            if id % 2 == 0 {
                registry.unlisten(id);
            }
        }
        dispatcher.join().unwrap();

        assert_eq!(registry.len(), 50);
        let before = hits.load(Ordering::Relaxed);
        registry.dispatch(|cb| cb(0));
        assert_eq!(hits.load(Ordering::Relaxed), before + 50);
    }

    #[test]
    fn test_registry_survives_panicking_subscriber() {
        let registry: Arc<CallbackRegistry<Callback>> = Arc::new(CallbackRegistry::new());
        registry.listen(1, Box::new(|_| panic!("subscriber failure")));

        let r = registry.clone();
        let result = std::thread::spawn(move || r.dispatch(|cb| cb(0))).join();
        assert!(result.is_err());

        registry.unlisten(1);
        registry.listen(2, Box::new(|_| {}));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_derive_id() {
        let value = 5u32;
        let address = &value as *const u32;
        assert_eq!(derive_id(42, address), 42);
        assert_eq!(derive_id(0, address), address as usize as u64);
    }
}
