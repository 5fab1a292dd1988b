// In-flight computation tracking
//
// One watch channel per key that is currently being computed. The first
// caller for a key becomes the leader and runs the computation; everyone
// arriving while it runs subscribes to the same channel and receives the
// same result, success or failure.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;

use super::entry::CacheEntry;
use crate::error::GatewayError;
use crate::request::CacheKey;

pub(crate) type Shared = Option<Result<Arc<CacheEntry>, GatewayError>>;

pub(crate) enum Role {
    /// Run the computation and publish on the sender
    Leader(watch::Sender<Shared>, watch::Receiver<Shared>),
    /// Another caller is computing; wait on its channel
    Follower(watch::Receiver<Shared>),
    /// The entry was published before we registered
    Ready(Arc<CacheEntry>),
}

#[derive(Debug, Default)]
pub(crate) struct InFlight {
    map: Mutex<HashMap<CacheKey, watch::Receiver<Shared>>>,
}

impl InFlight {
    /// Join the computation for `key`, or register as its leader.
    ///
    /// `recheck` runs under the in-flight lock so a result published between
    /// the caller's cache miss and this call is not computed twice.
    pub fn join<F>(&self, key: CacheKey, recheck: F) -> Role
    where
        F: FnOnce() -> Option<Arc<CacheEntry>>,
    {
        let mut map = self.map.lock();
        if let Some(rx) = map.get(&key) {
            return Role::Follower(rx.clone());
        }
        if let Some(entry) = recheck() {
            return Role::Ready(entry);
        }

        let (tx, rx) = watch::channel(None);
        map.insert(key, rx.clone());
        Role::Leader(tx, rx)
    }

    pub fn remove(&self, key: &CacheKey) {
        self.map.lock().remove(key);
    }

    pub fn len(&self) -> usize {
        self.map.lock().len()
    }
}

/// Wait until the leader publishes a result
pub(crate) async fn wait(mut rx: watch::Receiver<Shared>) -> Result<Arc<CacheEntry>, GatewayError> {
    match rx.wait_for(Option::is_some).await {
        Ok(value) => (*value)
            .clone()
            .unwrap_or_else(|| Err(GatewayError::internal("computation published no result"))),
        // Sender dropped without publishing: the computing task panicked
        Err(_) => Err(GatewayError::internal(
            "image computation terminated unexpectedly",
        )),
    }
}
