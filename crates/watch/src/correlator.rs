//! Request/response correlation over a shared channel
//!
//! Control commands sent over the stream carry an id that the exchange echoes
//! back in its reply. `RequestCorrelator` hands out those ids and lets the
//! issuing task await the matching reply while a separate receiver task
//! delivers it.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::error::CorrelatorError;

struct Pending<T> {
    tx: Option<oneshot::Sender<T>>,
    /// Taken by the (single) waiter
    rx: Option<oneshot::Receiver<T>>,
}

/// Removes a wait slot when the waiter finishes, times out, or is dropped
struct Evict<'a, T> {
    correlator: &'a RequestCorrelator<T>,
    id: u64,
}

impl<T> Drop for Evict<'_, T> {
    fn drop(&mut self) {
        self.correlator.lock().pending.remove(&self.id);
    }
}

struct Inner<T> {
    next_id: u64,
    pending: HashMap<u64, Pending<T>>,
}

/// Issues request ids and matches replies to waiters.
///
/// Ids start at 0 and increase by one per `issue`. Each id can be waited on at
/// most once; a successful wait consumes it. A wait that times out or is
/// dropped evicts the entry, so a reply arriving afterwards is reported as
/// `UnknownRequest`.
pub struct RequestCorrelator<T> {
    inner: Mutex<Inner<T>>,
}

impl<T> RequestCorrelator<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                next_id: 0,
                pending: HashMap::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Allocate the next id and register a wait slot for it
    pub fn issue(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        let mut inner = self.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.pending.insert(
            id,
            Pending {
                tx: Some(tx),
                rx: Some(rx),
            },
        );
        id
    }

    /// Wait for the response to `id`.
    ///
    /// Returns `Ok(None)` if `timeout` elapses first. Fails with
    /// `UnknownRequest` if the id was never issued, was already consumed, or
    /// is already being waited on.
    pub async fn wait(
        &self,
        id: u64,
        timeout: Option<Duration>,
    ) -> Result<Option<T>, CorrelatorError> {
        let rx = {
            let mut inner = self.lock();
            inner
                .pending
                .get_mut(&id)
                .and_then(|p| p.rx.take())
                .ok_or(CorrelatorError::UnknownRequest(id))?
        };
        let _evict = Evict {
            correlator: self,
            id,
        };

        let result = match timeout {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(received) => received.ok(),
                Err(_) => {
                    warn!(id, timeout_ms = limit.as_millis() as u64, "Request timed out, evicting");
                    None
                }
            },
            None => rx.await.ok(),
        };

        Ok(result)
    }

    /// Deliver the response for `id`, waking its waiter.
    ///
    /// Fails with `UnknownRequest` if nobody can receive it any more.
    pub fn set_response(&self, id: u64, response: T) -> Result<(), CorrelatorError> {
        let tx = {
            let mut inner = self.lock();
            inner
                .pending
                .get_mut(&id)
                .and_then(|p| p.tx.take())
                .ok_or(CorrelatorError::UnknownRequest(id))?
        };

        if tx.send(response).is_err() {
            // Waiter gave up between lookup and send
            debug!(id, "Response arrived after waiter went away");
            return Err(CorrelatorError::UnknownRequest(id));
        }
        Ok(())
    }

    /// Number of requests issued but not yet consumed or evicted
    pub fn pending(&self) -> usize {
        self.lock().pending.len()
    }
}

impl<T> Default for RequestCorrelator<T> {
    fn default() -> Self {
        Self::new()
    }
}
