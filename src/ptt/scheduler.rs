//! Keyed one-shot timers feeding back into the orchestrator

use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Delivered when a timer elapses
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fired<K> {
    pub key: K,
    pub generation: u64,
}

struct Timer {
    generation: u64,
    handle: JoinHandle<()>,
}

/// Owns one abortable task per key
///
/// Rescheduling a key replaces its timer. A [`Fired`] whose generation no
/// longer matches was overtaken and must be ignored; [`Scheduler::fired`]
/// tells the two apart.
pub struct Scheduler<K, M> {
    timers: HashMap<K, Timer>,
    tx: mpsc::UnboundedSender<M>,
    wrap: fn(Fired<K>) -> M,
    generation: u64,
}

impl<K, M> Scheduler<K, M>
where
    K: Eq + Hash + Clone + Send + 'static,
    M: Send + 'static,
{
    pub fn new(tx: mpsc::UnboundedSender<M>, wrap: fn(Fired<K>) -> M) -> Self {
        Self {
            timers: HashMap::new(),
            tx,
            wrap,
            generation: 0,
        }
    }

    pub fn schedule(&mut self, key: K, delay: Duration) {
        self.generation += 1;
        let generation = self.generation;
        let fired = Fired {
            key: key.clone(),
            generation,
        };
        let tx = self.tx.clone();
        let wrap = self.wrap;

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(wrap(fired));
        });

        if let Some(previous) = self.timers.insert(key, Timer { generation, handle }) {
            previous.handle.abort();
        }
    }

    pub fn cancel(&mut self, key: &K) -> bool {
        match self.timers.remove(key) {
            Some(timer) => {
                timer.handle.abort();
                true
            }
            None => false,
        }
    }

    /// Accept a delivery if it belongs to the live timer for its key
    pub fn fired(&mut self, fired: &Fired<K>) -> bool {
        match self.timers.get(&fired.key) {
            Some(timer) if timer.generation == fired.generation => {
                self.timers.remove(&fired.key);
                true
            }
            _ => false,
        }
    }

    pub fn is_scheduled(&self, key: &K) -> bool {
        self.timers.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }

    pub fn cancel_all(&mut self) {
        for (_, timer) in self.timers.drain() {
            timer.handle.abort();
        }
    }
}

impl<K, M> Drop for Scheduler<K, M> {
    fn drop(&mut self) {
        for (_, timer) in self.timers.drain() {
            timer.handle.abort();
        }
    }
}
