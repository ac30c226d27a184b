//! TTL-keyed presence cache used to suppress duplicate deliveries.
//!
//! Events and peer shares are deduplicated with separate caches. Expired
//! entries are reaped by a scan every `sweep_every` insert attempts rather
//! than by a timer task, so an idle process does no background work for this.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

pub struct RecentCache {
    items: RwLock<HashMap<String, Instant>>,
    ttl: Duration,
    sweep_every: u32,
    ingress: AtomicU32,
}

impl RecentCache {
    pub fn new(ttl: Duration, sweep_every: u32) -> Self {
        Self {
            items: RwLock::new(HashMap::new()),
            ttl,
            sweep_every: sweep_every.max(1),
            ingress: AtomicU32::new(0),
        }
    }

    /// Returns whether `key` was already seen within the TTL and marks it
    /// seen otherwise. Check and mark are atomic under the write lock, so two
    /// racing deliveries of the same message cannot both pass.
    pub async fn check_and_mark(&self, key: &str) -> bool {
        let sweep_due = self.ingress.fetch_add(1, Ordering::Relaxed) % self.sweep_every == 0;
        let now = Instant::now();
        let mut items = self.items.write().await;
        if sweep_due {
            items.retain(|_, seen| now.duration_since(*seen) < self.ttl);
        }
        match items.get(key) {
            Some(seen) if now.duration_since(*seen) < self.ttl => true,
            _ => {
                items.insert(key.to_string(), now);
                false
            }
        }
    }

    #[cfg(test)]
    pub(crate) async fn len(&self) -> usize {
        self.items.read().await.len()
    }
}
