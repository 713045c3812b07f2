/*
[INPUT]:  Request keys registered by callers; responses routed in by the correlator
[OUTPUT]: One-shot completion slots shared by every caller waiting on the same key
[POS]:    Tracking layer - pending request table
[UPDATE]: When changing expiry or slot-sharing rules
*/

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, oneshot};
use tokio::time::Instant;

struct Slot<V> {
    generation: u64,
    deadline: Instant,
    waiters: Vec<oneshot::Sender<V>>,
}

/// Handle returned by [`PendingRequests::register`].
pub struct Registration<V> {
    pub receiver: oneshot::Receiver<V>,
    /// True for the caller that created the slot and must send the request.
    pub is_new: bool,
    pub generation: u64,
    pub deadline: Instant,
}

/// Outstanding requests keyed by `K`, completed with a `V`.
pub struct PendingRequests<K, V> {
    slots: Mutex<HashMap<K, Slot<V>>>,
    next_generation: AtomicU64,
}

impl<K, V> PendingRequests<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(1),
        }
    }

    /// Join the slot for `key`, creating it with a `timeout` deadline when absent.
    /// A later caller shares the first caller's deadline.
    pub async fn register(&self, key: K, timeout: Duration) -> Registration<V> {
        let (tx, rx) = oneshot::channel();
        let mut slots = self.slots.lock().await;

        if let Some(slot) = slots.get_mut(&key) {
            slot.waiters.push(tx);
            return Registration {
                receiver: rx,
                is_new: false,
                generation: slot.generation,
                deadline: slot.deadline,
            };
        }

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let deadline = Instant::now() + timeout;
        slots.insert(
            key,
            Slot {
                generation,
                deadline,
                waiters: vec![tx],
            },
        );
        Registration {
            receiver: rx,
            is_new: true,
            generation,
            deadline,
        }
    }

    /// Complete every waiter on `key`. Returns false when nothing was pending.
    pub async fn resolve(&self, key: &K, value: V) -> bool {
        let Some(slot) = self.slots.lock().await.remove(key) else {
            return false;
        };
        for waiter in slot.waiters {
            let _ = waiter.send(value.clone());
        }
        true
    }

    /// Drop the slot if it still belongs to `generation`. Waiters see a closed channel.
    pub async fn expire(&self, key: &K, generation: u64) -> bool {
        let mut slots = self.slots.lock().await;
        match slots.get(key) {
            Some(slot) if slot.generation == generation => {
                slots.remove(key);
                true
            }
            _ => false,
        }
    }

    /// Await a registration until its deadline; expires the slot on timeout.
    pub async fn wait(&self, key: &K, registration: Registration<V>) -> Option<V> {
        match tokio::time::timeout_at(registration.deadline, registration.receiver).await {
            Ok(Ok(value)) => Some(value),
            Ok(Err(_)) => None,
            Err(_) => {
                self.expire(key, registration.generation).await;
                None
            }
        }
    }

    pub async fn pending_keys(&self) -> Vec<K> {
        self.slots.lock().await.keys().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.slots.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.slots.lock().await.is_empty()
    }

    /// Drop every slot; waiters observe a closed channel.
    pub async fn clear(&self) {
        self.slots.lock().await.clear();
    }
}

impl<K, V> Default for PendingRequests<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}
