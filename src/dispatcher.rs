//! Synchronous fan-out of messages to registered listeners
//!
//! Listeners run in registration order on the caller's thread. Every dispatch
//! iterates a snapshot of the registry taken before the first listener runs, and
//! the registry lock is released while listeners execute. A listener can
//! therefore add or remove listeners (including itself) from inside its
//! callback. A listener removed mid-dispatch is skipped if its turn has not
//! come yet; a listener added mid-dispatch first sees the next message.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

/// Lock a mutex, recovering the data if a previous holder panicked.
///
/// Every critical section in this crate leaves its data consistent, so a
/// poisoned lock carries no broken invariant.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

type Listener<M> = Arc<dyn Fn(&M) + Send + Sync>;

struct Entry<M> {
    id: u64,
    active: Arc<AtomicBool>,
    listener: Listener<M>,
}

impl<M> Clone for Entry<M> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            active: Arc::clone(&self.active),
            listener: Arc::clone(&self.listener),
        }
    }
}

struct Registry<M> {
    next_id: u64,
    entries: Vec<Entry<M>>,
}

/// Registry of listeners for messages of type `M`
pub struct Dispatcher<M> {
    registry: Arc<Mutex<Registry<M>>>,
}

impl<M> Clone for Dispatcher<M> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
        }
    }
}

impl<M: 'static> Default for Dispatcher<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: 'static> Dispatcher<M> {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry {
                next_id: 0,
                entries: Vec::new(),
            })),
        }
    }

    /// Register a listener. It stays registered until the returned handle is
    /// unsubscribed; dropping the handle alone does not remove it.
    pub fn add_listener<F>(&self, listener: F) -> ListenerHandle
    where
        F: Fn(&M) + Send + Sync + 'static,
    {
        let active = Arc::new(AtomicBool::new(true));
        let id = {
            let mut registry = lock(&self.registry);
            let id = registry.next_id;
            registry.next_id += 1;
            registry.entries.push(Entry {
                id,
                active: Arc::clone(&active),
                listener: Arc::new(listener),
            });
            id
        };

        let weak: Weak<Mutex<Registry<M>>> = Arc::downgrade(&self.registry);
        ListenerHandle {
            active,
            detach: Mutex::new(Some(Box::new(move || {
                if let Some(registry) = weak.upgrade() {
                    lock(&registry).entries.retain(|entry| entry.id != id);
                }
            }))),
        }
    }

    /// Deliver `message` to every listener registered when the call started.
    ///
    /// Returns how many listeners were invoked.
    pub fn dispatch(&self, message: &M) -> usize {
        let snapshot: Vec<Entry<M>> = lock(&self.registry).entries.clone();

        let mut delivered = 0;
        for entry in snapshot {
            if entry.active.load(Ordering::SeqCst) {
                (entry.listener)(message);
                delivered += 1;
            }
        }
        delivered
    }

    pub fn listener_count(&self) -> usize {
        lock(&self.registry).entries.len()
    }

    /// Remove every listener. Outstanding handles become inert.
    pub fn clear(&self) {
        let entries = std::mem::take(&mut lock(&self.registry).entries);
        for entry in entries {
            entry.active.store(false, Ordering::SeqCst);
        }
    }
}

/// Handle returned by [`Dispatcher::add_listener`]
pub struct ListenerHandle {
    active: Arc<AtomicBool>,
    detach: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl ListenerHandle {
    /// Stop delivery to this listener. Safe to call repeatedly and from
    /// inside any listener callback.
    pub fn unsubscribe(&self) {
        self.active.store(false, Ordering::SeqCst);
        let detach = lock(&self.detach).take();
        if let Some(detach) = detach {
            detach();
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Convert into a guard that unsubscribes when dropped
    pub fn into_guard(self) -> ListenerGuard {
        ListenerGuard(self)
    }
}

impl std::fmt::Debug for ListenerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerHandle")
            .field("active", &self.is_active())
            .finish()
    }
}

/// Unsubscribes its listener on drop
#[derive(Debug)]
pub struct ListenerGuard(ListenerHandle);

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        self.0.unsubscribe();
    }
}
