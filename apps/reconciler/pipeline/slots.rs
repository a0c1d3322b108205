use super::{ReconcileError, View};
use crate::source::FetchError;
use std::{
    collections::HashMap,
    hash::Hash,
    sync::{Arc, Mutex, MutexGuard},
};
use tokio::sync::{oneshot, watch};
use tracing::debug;

type Outcome<T> = Result<View<T>, ReconcileError>;
type Waiter<T> = oneshot::Sender<Outcome<T>>;

struct Slot<T> {
    generation: u64,
    /// `Some` while a fetch is in flight; holds the callers riding on it.
    waiters: Option<Vec<Waiter<T>>>,
    /// Live scopes watching this key.
    interest: usize,
    view: watch::Sender<View<T>>,
}

impl<T: Default> Default for Slot<T> {
    fn default() -> Self {
        let (view, _) = watch::channel(View::default());
        Self {
            generation: 0,
            waiters: None,
            interest: 0,
            view,
        }
    }
}

pub(crate) enum Begin<T> {
    /// The caller starts the fetch; its own outcome arrives on `receiver` like any
    /// follower's.
    Lead {
        generation: u64,
        receiver: oneshot::Receiver<Outcome<T>>,
    },
    Follow(oneshot::Receiver<Outcome<T>>),
}

/// Per-key request state: one fetch in flight at a time, later callers coalesce onto
/// it, and a generation counter lets cancellation invalidate whatever is in flight.
pub(crate) struct RequestSlots<K, T> {
    slots: Mutex<HashMap<K, Slot<T>>>,
}

impl<K, T> RequestSlots<K, T>
where
    K: Eq + Hash + Clone + std::fmt::Debug,
    T: Clone + Default,
{
    pub(crate) fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<K, Slot<T>>> {
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn view(&self, key: &K) -> View<T> {
        self.lock()
            .get(key)
            .map(|slot| slot.view.borrow().clone())
            .unwrap_or_default()
    }

    pub(crate) fn subscribe(&self, key: &K) -> watch::Receiver<View<T>> {
        self.lock().entry(key.clone()).or_default().view.subscribe()
    }

    /// Either starts a new fetch (the caller leads) or joins the one in flight.
    pub(crate) fn begin(&self, key: &K) -> Begin<T> {
        let mut slots = self.lock();
        let slot = slots.entry(key.clone()).or_default();
        let (sender, receiver) = oneshot::channel();

        if let Some(waiters) = slot.waiters.as_mut() {
            waiters.push(sender);
            debug!(?key, "Joining in-flight fetch");
            return Begin::Follow(receiver);
        }

        slot.generation += 1;
        slot.waiters = Some(vec![sender]);
        // previous data stays visible while loading
        slot.view.send_modify(|view| view.is_loading = true);
        Begin::Lead {
            generation: slot.generation,
            receiver,
        }
    }

    /// Publishes the outcome of the fetch started under `generation`.
    ///
    /// `settle` only runs when that generation is still current, so a cancelled or
    /// superseded fetch never reaches the cache.
    pub(crate) fn finish(
        &self,
        key: &K,
        generation: u64,
        settle: impl FnOnce() -> Result<T, FetchError>,
    ) -> Outcome<T> {
        let mut slots = self.lock();
        let Some(slot) = slots.get_mut(key) else {
            return Err(ReconcileError::Cancelled);
        };
        if slot.generation != generation || slot.waiters.is_none() {
            debug!(?key, generation, current = slot.generation, "Discarding stale fetch");
            return Err(ReconcileError::Cancelled);
        }

        let result = match settle() {
            Ok(data) => {
                let view = View {
                    data,
                    error: None,
                    is_loading: false,
                };
                slot.view.send_replace(view.clone());
                Ok(view)
            }
            Err(e) => {
                // last-known-good data stays
                slot.view.send_modify(|view| {
                    view.error = Some(e.clone());
                    view.is_loading = false;
                });
                Err(ReconcileError::Fetch(e))
            }
        };

        let waiters = slot.waiters.take().unwrap_or_default();
        drop(slots);

        for waiter in waiters {
            let _ = waiter.send(result.clone());
        }
        result
    }

    /// Invalidates whatever is in flight for `key`.
    pub(crate) fn cancel(&self, key: &K) {
        let waiters = {
            let mut slots = self.lock();
            let Some(slot) = slots.get_mut(key) else {
                return;
            };
            Self::invalidate(slot)
        };

        for waiter in waiters {
            let _ = waiter.send(Err(ReconcileError::Cancelled));
        }
    }

    fn invalidate(slot: &mut Slot<T>) -> Vec<Waiter<T>> {
        slot.generation += 1;
        slot.view.send_modify(|view| view.is_loading = false);
        slot.waiters.take().unwrap_or_default()
    }

    /// Registers a live scope on `key`.
    pub(crate) fn retain(&self, key: &K) {
        self.lock().entry(key.clone()).or_default().interest += 1;
    }

    /// Drops a scope's interest in `key`.
    ///
    /// The in-flight fetch is only invalidated once no scope is left and no caller is
    /// still waiting on it; otherwise the scope just detaches.
    pub(crate) fn release(&self, key: &K) {
        let mut slots = self.lock();
        let Some(slot) = slots.get_mut(key) else {
            return;
        };
        slot.interest = slot.interest.saturating_sub(1);

        let Some(waiters) = slot.waiters.as_ref() else {
            return;
        };
        let waiting = waiters.iter().filter(|waiter| !waiter.is_closed()).count();
        if slot.interest > 0 || waiting > 0 {
            debug!(?key, interest = slot.interest, waiting, "Scope detached");
            return;
        }

        debug!(?key, "Last scope gone, discarding in-flight fetch");
        // every receiver is already gone
        drop(Self::invalidate(slot));
    }

    /// Called when the fetch task dies before `finish`.
    pub(crate) fn abandon(&self, key: &K, generation: u64) {
        let waiters = {
            let mut slots = self.lock();
            match slots.get_mut(key) {
                Some(slot) if slot.generation == generation => {
                    slot.view.send_modify(|view| view.is_loading = false);
                    slot.waiters.take().unwrap_or_default()
                }
                _ => Vec::new(),
            }
        };

        for waiter in waiters {
            let _ = waiter.send(Err(ReconcileError::Cancelled));
        }
    }
}

/// Owned by the fetch task; releases waiters if the task dies mid-fetch.
pub(crate) struct LeadGuard<K, T>
where
    K: Eq + Hash + Clone + std::fmt::Debug,
    T: Clone + Default,
{
    slots: Arc<RequestSlots<K, T>>,
    key: K,
    generation: u64,
    armed: bool,
}

impl<K, T> LeadGuard<K, T>
where
    K: Eq + Hash + Clone + std::fmt::Debug,
    T: Clone + Default,
{
    pub(crate) fn new(slots: Arc<RequestSlots<K, T>>, key: K, generation: u64) -> Self {
        Self {
            slots,
            key,
            generation,
            armed: true,
        }
    }

    pub(crate) fn finish(mut self, settle: impl FnOnce() -> Result<T, FetchError>) -> Outcome<T> {
        self.armed = false;
        self.slots.finish(&self.key, self.generation, settle)
    }
}

impl<K, T> Drop for LeadGuard<K, T>
where
    K: Eq + Hash + Clone + std::fmt::Debug,
    T: Clone + Default,
{
    fn drop(&mut self) {
        if self.armed {
            self.slots.abandon(&self.key, self.generation);
        }
    }
}
