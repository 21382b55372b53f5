//! Tracking requests that are currently in flight
//!
//! Cancellation arrives out of band, keyed by the logical request rather
//! than the handle performing the exchange. This registry maps one to the
//! other for exactly as long as a send is outstanding.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::RequestId;

type Store = HashMap<RequestId, Arc<xhr::Request>>;

/// Requests awaiting completion, keyed by logical request identity
#[derive(Default)]
pub(crate) struct InFlight {
    requests: Mutex<Store>,
}

impl InFlight {
    /// Track `request` under `id` until the returned guard is dropped
    pub(crate) fn register(&self, id: RequestId, request: Arc<xhr::Request>) -> Registration<'_> {
        with_lock(&self.requests, |mut store| {
            if store.insert(id, Arc::clone(&request)).is_some() {
                tracing::warn!(%id, "request id already in flight, replacing entry");
            }
        });
        tracing::trace!(%id, "registered in-flight request");
        Registration {
            inflight: self,
            id,
            request,
        }
    }

    /// Abort the request registered under `id`
    ///
    /// Returns whether a request was found.
    pub(crate) fn cancel(&self, id: RequestId) -> bool {
        with_lock(&self.requests, |store| match store.get(&id) {
            Some(request) => {
                request.abort();
                true
            }
            None => false,
        })
    }

    pub(crate) fn len(&self) -> usize {
        with_lock(&self.requests, |store| store.len())
    }

    fn remove(&self, id: RequestId, request: &Arc<xhr::Request>) {
        with_lock(&self.requests, |mut store| {
            // leave a newer registration under the same id alone
            if store
                .get(&id)
                .is_some_and(|current| Arc::ptr_eq(current, request))
            {
                store.remove(&id);
            }
        });
        tracing::trace!(%id, "deregistered in-flight request");
    }
}

/// Removes its request from the registry when dropped
pub(crate) struct Registration<'a> {
    inflight: &'a InFlight,
    id: RequestId,
    request: Arc<xhr::Request>,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        self.inflight.remove(self.id, &self.request);
    }
}

fn with_lock<T, F, R>(lock: &Mutex<T>, f: F) -> R
where
    F: FnOnce(MutexGuard<'_, T>) -> R,
{
    tracing::trace!("taking in-flight lock");
    // entries are inserted and removed whole, a poisoned map is still consistent
    let inner = lock.lock().unwrap_or_else(PoisonError::into_inner);
    let res = f(inner);
    tracing::trace!("releasing in-flight lock");
    res
}
