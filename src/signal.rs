//! Multi-subscriber signal/slot channel (spec §3/§4.C4).
//!
//! Not present in the teacher crate — modeled after the contract spec.md
//! describes and after `KDBindings::Signal` as used throughout
//! `examples/original_source/src/KDNetwork/http_client.h` (e.g.
//! `Signal<const HttpRequest &, const HttpResponse &> responseReceived`).
//! Ownership is explicit: the emitter owns the [`Signal`], slots are held
//! weakly by id and resolved at emit time, and cross-thread delivery goes
//! through the target reactor's deferred-slot queue
//! ([`crate::reactor::ReactorHandle::post_deferred`]) rather than a
//! callback captured by reference.

use crate::reactor::ReactorHandle;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

type Slot<Args> = Box<dyn Fn(Args) + Send + Sync>;

enum Subscriber<Args> {
    /// Invoked synchronously, inline, on the emitting thread.
    Direct(Slot<Args>),
    /// Invoked on `reactor`'s thread via its deferred-slot queue.
    Deferred { reactor: ReactorHandle, slot: Slot<Args> },
}

struct Entry<Args> {
    id: u64,
    subscriber: Subscriber<Args>,
}

struct Inner<Args> {
    subscribers: Mutex<Vec<Arc<Entry<Args>>>>,
    next_id: AtomicU64,
}

/// An in-thread-synchronous, cross-thread-deferred multi-subscriber
/// channel. `Args` must be `Clone` because a deferred dispatch clones the
/// emitted value into the closure posted to the target reactor.
///
/// Cloning a `Signal` yields another handle to the same subscriber list
/// (the way a KDBindings `Signal` reference is shared) rather than an
/// independent signal — useful for handing a connect-only view of a
/// component's signal out of a `Mutex`-guarded inner struct without
/// borrowing past the lock.
pub struct Signal<Args: Clone + Send + 'static> {
    inner: Arc<Inner<Args>>,
}

impl<Args: Clone + Send + 'static> Clone for Signal<Args> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<Args: Clone + Send + 'static> Default for Signal<Args> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Args: Clone + Send + 'static> Signal<Args> {
    /// Create an empty signal with no subscribers.
    pub fn new() -> Self {
        Self { inner: Arc::new(Inner { subscribers: Mutex::new(Vec::new()), next_id: AtomicU64::new(0) }) }
    }

    /// Subscribe a slot invoked synchronously, inline, whenever [`emit`]
    /// is called on this thread.
    pub fn connect(&self, slot: impl Fn(Args) + Send + Sync + 'static) -> ConnectionHandle<Args> {
        self.push(Subscriber::Direct(Box::new(slot)))
    }

    /// Subscribe a slot that must run on `reactor`'s thread. `emit` on any
    /// thread appends an invocation of `slot` to `reactor`'s deferred-slot
    /// queue and wakes it; the slot itself only ever runs on the reactor's
    /// own thread (spec §4.C4, §5).
    pub fn connect_deferred(
        &self,
        reactor: ReactorHandle,
        slot: impl Fn(Args) + Send + Sync + 'static,
    ) -> ConnectionHandle<Args> {
        self.push(Subscriber::Deferred { reactor, slot: Box::new(slot) })
    }

    fn push(&self, subscriber: Subscriber<Args>) -> ConnectionHandle<Args> {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.subscribers.lock().unwrap().push(Arc::new(Entry { id, subscriber }));
        ConnectionHandle { inner: Arc::downgrade(&self.inner), id }
    }

    /// Notify every live subscriber. Direct subscribers run inline, in
    /// subscription order; deferred subscribers have their invocation
    /// queued on their reactor and run later, in the order this call
    /// enqueues them relative to other posts from this thread (spec §5
    /// cross-thread FIFO-per-producer guarantee).
    pub fn emit(&self, args: Args) {
        let subscribers = self.inner.subscribers.lock().unwrap().clone();
        for entry in subscribers.iter() {
            match &entry.subscriber {
                Subscriber::Direct(slot) => slot(args.clone()),
                Subscriber::Deferred { reactor, .. } => {
                    let slot_args = args.clone();
                    let entry = entry.clone();
                    reactor.post_deferred(Box::new(move || {
                        if let Subscriber::Deferred { slot, .. } = &entry.subscriber {
                            slot(slot_args);
                        }
                    }));
                }
            }
        }
    }

    /// Number of currently connected subscribers (including any whose
    /// handle has been dropped but not yet disconnected by another
    /// emit/connect call — disconnection removes eagerly on drop, so this
    /// is exact in practice).
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.lock().unwrap().len()
    }
}

/// RAII token returned by [`Signal::connect`]/[`Signal::connect_deferred`].
/// Disconnects the slot when dropped; dropping from any thread is safe
/// (spec §5).
pub struct ConnectionHandle<Args: Clone + Send + 'static> {
    inner: Weak<Inner<Args>>,
    id: u64,
}

impl<Args: Clone + Send + 'static> ConnectionHandle<Args> {
    /// Disconnect explicitly, equivalent to dropping the handle.
    pub fn disconnect(self) {
        drop(self)
    }
}

impl<Args: Clone + Send + 'static> Drop for ConnectionHandle<Args> {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.subscribers.lock().unwrap().retain(|e| e.id != self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn direct_slot_runs_inline() {
        let signal: Signal<i32> = Signal::new();
        let sum = Arc::new(AtomicUsize::new(0));
        let s = sum.clone();
        let _conn = signal.connect(move |n| {
            s.fetch_add(n as usize, Ordering::SeqCst);
        });
        signal.emit(3);
        signal.emit(4);
        assert_eq!(sum.load(Ordering::SeqCst), 7);
    }

    #[test]
    fn dropped_handle_disconnects() {
        let signal: Signal<i32> = Signal::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let conn = signal.connect(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        signal.emit(1);
        drop(conn);
        signal.emit(1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn multiple_subscribers_all_fire_in_order() {
        let signal: Signal<i32> = Signal::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        let o1 = order.clone();
        let o2 = order.clone();
        let _c1 = signal.connect(move |_| o1.lock().unwrap().push(1));
        let _c2 = signal.connect(move |_| o2.lock().unwrap().push(2));
        signal.emit(0);
        assert_eq!(*order.lock().unwrap(), vec![1, 2]);
    }
}
