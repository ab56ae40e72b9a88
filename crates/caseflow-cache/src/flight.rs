//! Per-key de-duplication of concurrent misses.

use crate::key::CacheKey;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type FlightMap = Arc<Mutex<HashMap<CacheKey, Arc<AsyncMutex<()>>>>>;

/// Serializes computations per key.
///
/// The first caller for a key gets a permit immediately; later callers wait
/// until it is dropped. A waiter should look the key up again before
/// computing, since the holder has most likely stored the value by then.
#[derive(Default, Clone)]
pub struct SingleFlight {
    flights: FlightMap,
}

impl SingleFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for exclusive right to compute `key`.
    pub async fn acquire(&self, key: &CacheKey) -> FlightPermit {
        let lock = {
            let mut flights = self.flights.lock();
            Arc::clone(flights.entry(key.clone()).or_default())
        };

        let (guard, waited) = match Arc::clone(&lock).try_lock_owned() {
            Ok(guard) => (guard, false),
            Err(_) => (lock.lock_owned().await, true),
        };

        FlightPermit {
            key: key.clone(),
            guard: Some(guard),
            flights: Arc::clone(&self.flights),
            waited,
        }
    }

    /// Number of keys with a holder or waiters.
    pub fn in_flight(&self) -> usize {
        self.flights.lock().len()
    }
}

/// Exclusive right to compute one key. Released on drop.
pub struct FlightPermit {
    key: CacheKey,
    guard: Option<OwnedMutexGuard<()>>,
    flights: FlightMap,
    waited: bool,
}

impl FlightPermit {
    /// Whether another caller held the key while this one waited.
    pub fn waited(&self) -> bool {
        self.waited
    }
}

impl Drop for FlightPermit {
    fn drop(&mut self) {
        self.guard.take();

        let mut flights = self.flights.lock();
        if flights
            .get(&self.key)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            flights.remove(&self.key);
        }
    }
}

impl std::fmt::Debug for FlightPermit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlightPermit")
            .field("key", &self.key)
            .field("waited", &self.waited)
            .finish()
    }
}
