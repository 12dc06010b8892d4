use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tokio::runtime::Handle;

use crate::message::{Message, StatusUpdate};
use crate::modem::SpectrumSnapshot;

type Callback<T> = Arc<dyn Fn(T) + Send + Sync>;

struct Inner<T> {
    next_key: AtomicU64,
    subscribers: Mutex<BTreeMap<u64, Callback<T>>>,
    runtime: Handle,
}

/// Fire-and-forget fan-out: every publish runs each subscriber on its own task.
pub struct EventBus<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for EventBus<T> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<T: Clone + Send + 'static> EventBus<T> {
    pub fn new(runtime: Handle) -> Self {
        Self {
            inner: Arc::new(Inner {
                next_key: AtomicU64::new(0),
                subscribers: Mutex::new(BTreeMap::new()),
                runtime,
            }),
        }
    }

    pub fn subscribe<F>(&self, callback: F) -> Subscription<T>
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        let key = self.inner.next_key.fetch_add(1, Ordering::Relaxed);
        self.inner
            .subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key, Arc::new(callback));
        Subscription { bus: Arc::downgrade(&self.inner), key }
    }

    pub fn publish(&self, event: T) {
        let subscribers: Vec<Callback<T>> = self
            .inner
            .subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();

        for callback in subscribers {
            let event = event.clone();
            self.inner.runtime.spawn(async move { callback(event) });
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// Registration token. Dropping it keeps the subscription alive.
pub struct Subscription<T> {
    bus: Weak<Inner<T>>,
    key: u64,
}

impl<T> Subscription<T> {
    pub fn unsubscribe(self) {
        if let Some(inner) = self.bus.upgrade() {
            inner
                .subscribers
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&self.key);
        }
    }
}

/// Every event stream a session produces.
pub struct SessionEvents {
    pub messages: EventBus<Message>,
    pub status: EventBus<StatusUpdate>,
    pub transmission_begin: EventBus<()>,
    pub listening_begin: EventBus<()>,
    pub spectrum: EventBus<SpectrumSnapshot>,
}

impl SessionEvents {
    pub fn new(runtime: Handle) -> Self {
        Self {
            messages: EventBus::new(runtime.clone()),
            status: EventBus::new(runtime.clone()),
            transmission_begin: EventBus::new(runtime.clone()),
            listening_begin: EventBus::new(runtime.clone()),
            spectrum: EventBus::new(runtime),
        }
    }
}
