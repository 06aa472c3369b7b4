//! Outstanding lifecycle requests awaiting an engine response

use std::collections::HashMap;

use tokio::sync::oneshot;

use crate::engine::{EngineResponse, ResponseId};
use crate::error::EngineError;

pub type ResponseResult = Result<EngineResponse, EngineError>;

struct Waiter {
    serial: u64,
    tx: oneshot::Sender<ResponseResult>,
}

/// At most one waiter per response identity
#[derive(Default)]
pub struct PendingRequests {
    next_serial: u64,
    waiters: HashMap<ResponseId, Waiter>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a waiter for `id`, returning its serial and receiver
    ///
    /// An existing waiter for the same identity is displaced and told so.
    pub fn register(&mut self, id: ResponseId) -> (u64, oneshot::Receiver<ResponseResult>) {
        self.next_serial += 1;
        let serial = self.next_serial;
        let (tx, rx) = oneshot::channel();

        if let Some(previous) = self.waiters.insert(id, Waiter { serial, tx }) {
            tracing::warn!("{} is still pending; replacing it with a newer request", id);
            let _ = previous.tx.send(Err(EngineError::Superseded(id)));
        }
        (serial, rx)
    }

    /// Hand a response to its waiter; `false` if nobody is waiting
    pub fn resolve(&mut self, response: EngineResponse) -> bool {
        match self.waiters.remove(&response.id) {
            Some(waiter) => waiter.tx.send(Ok(response)).is_ok(),
            None => false,
        }
    }

    /// Drop the waiter for `id` if it still belongs to `serial`
    pub fn expire(&mut self, id: ResponseId, serial: u64) -> bool {
        match self.waiters.get(&id) {
            Some(waiter) if waiter.serial == serial => {
                self.waiters.remove(&id);
                true
            }
            _ => false,
        }
    }

    /// Fail every waiter, e.g. when the engine went away
    pub fn fail_all(&mut self, error: EngineError) {
        for (_, waiter) in self.waiters.drain() {
            let _ = waiter.tx.send(Err(error.clone()));
        }
    }

    pub fn contains(&self, id: &ResponseId) -> bool {
        self.waiters.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.waiters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waiters.is_empty()
    }
}
