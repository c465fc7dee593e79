//! Registry of in-flight requests keyed by operation identity.
//!
//! The first caller for a key starts the work; every caller that arrives while
//! it is pending receives a clone of the same [`Shared`] handle and observes the
//! same settled output. The slot removes itself when the work settles, so the
//! next caller after that starts fresh.
//!
//! The registry only holds a weak reference to the work. If every caller's
//! handle is dropped before it settles, the work is dropped with them and the
//! key no longer counts as pending.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared, WeakShared};
use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Awaitable handle to a pending request. Cloning it does not restart work.
pub type Pending<V> = Shared<BoxFuture<'static, V>>;

/// Identifies one registration for a key. See [`InFlight::is_current`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket(u64);

struct Slot<V: Clone> {
    ticket: Ticket,
    pending: Option<WeakShared<BoxFuture<'static, V>>>,
}

impl<V: Clone> Slot<V> {
    fn live(&self) -> Option<Pending<V>> {
        self.pending.as_ref()?.upgrade()
    }
}

pub struct InFlight<K, V: Clone> {
    slots: Arc<DashMap<K, Slot<V>>>,
    next_id: AtomicU64,
}

impl<K, V> InFlight<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self { slots: Arc::new(DashMap::new()), next_id: AtomicU64::new(0) }
    }

    /// Join the pending request for `key`, or register the one built by `start`.
    ///
    /// Returns the handle and whether this call started the work. `start` is
    /// only invoked when nothing is pending; it must build the future lazily.
    /// It receives the registration's [`Ticket`].
    pub fn join_or_start<F>(&self, key: K, start: F) -> (Pending<V>, bool)
    where
        F: FnOnce(Ticket) -> BoxFuture<'static, V>,
    {
        match self.slots.entry(key.clone()) {
            Entry::Occupied(mut occupied) => {
                if let Some(pending) = occupied.get().live() {
                    return (pending, false);
                }
                // Every waiter of the previous registration went away.
                let (pending, slot) = self.register(key, start);
                occupied.insert(slot);
                (pending, true)
            }
            Entry::Vacant(vacant) => {
                let (pending, slot) = self.register(key, start);
                vacant.insert(slot);
                (pending, true)
            }
        }
    }

    fn register<F>(&self, key: K, start: F) -> (Pending<V>, Slot<V>)
    where
        F: FnOnce(Ticket) -> BoxFuture<'static, V>,
    {
        let ticket = Ticket(self.next_id.fetch_add(1, Ordering::Relaxed));
        let slots = Arc::clone(&self.slots);
        let work = start(ticket);
        let pending = async move {
            let output = work.await;
            slots.remove_if(&key, |_, slot| slot.ticket == ticket);
            output
        }
        .boxed()
        .shared();
        let slot = Slot { ticket, pending: pending.downgrade() };
        (pending, slot)
    }

    /// Await the request for `key`, starting it if nothing is pending.
    pub async fn run<F>(&self, key: K, start: F) -> V
    where
        F: FnOnce() -> BoxFuture<'static, V>,
    {
        let (pending, _) = self.join_or_start(key, |_| start());
        pending.await
    }

    /// Handle to the pending request for `key`, if any.
    pub fn pending(&self, key: &K) -> Option<Pending<V>> {
        self.slots.get(key).and_then(|slot| slot.live())
    }

    /// Whether `ticket` is still the registration for `key`, i.e. nothing has
    /// forgotten or replaced it since it started.
    pub fn is_current(&self, key: &K, ticket: Ticket) -> bool {
        self.slots.get(key).is_some_and(|slot| slot.ticket == ticket)
    }

    /// Drop the registration for `key`. Existing waiters still complete, but
    /// the next caller starts a new request.
    pub fn forget(&self, key: &K) {
        self.slots.remove(key);
    }

    pub fn is_pending(&self, key: &K) -> bool {
        self.pending(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.live().is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K, V> Default for InFlight<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V: Clone> fmt::Debug for InFlight<K, V>
where
    K: Eq + Hash,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InFlight").field("pending", &self.slots.len()).finish()
    }
}
