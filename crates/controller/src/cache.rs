use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use bricks_config::CacheConfig;
use bricks_map::BrickMap;
use bricks_primitives::HashLink;
use parking_lot::Mutex;
use tracing::trace;

#[derive(Debug, Default)]
struct Entries {
    maps: HashMap<HashLink, (Instant, BrickMap)>,
    order: VecDeque<HashLink>,
}

/// Anchored brick maps by version, bounded by entry count and age.
///
/// Versions are immutable, so an entry never goes stale; the bounds only
/// cap memory. The oldest insertion is evicted first.
#[derive(Debug)]
pub struct BrickMapCache {
    capacity: usize,
    ttl: Duration,
    entries: Mutex<Entries>,
}

impl BrickMapCache {
    #[must_use]
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            capacity,
            ttl,
            entries: Mutex::default(),
        }
    }

    /// A cache that keeps nothing.
    #[must_use]
    pub fn disabled() -> Self {
        Self::new(0, Duration::ZERO)
    }

    pub fn get(&self, version: &HashLink) -> Option<BrickMap> {
        let mut entries = self.entries.lock();

        let expired = match entries.maps.get(version) {
            None => {
                trace!(%version, "brick map cache miss");
                return None;
            }
            Some((inserted, map)) if inserted.elapsed() < self.ttl => {
                trace!(%version, "brick map cache hit");
                return Some(map.clone());
            }
            Some(_) => true,
        };

        if expired {
            entries.maps.remove(version);
            entries.order.retain(|link| link != version);
        }

        None
    }

    pub fn insert(&self, version: HashLink, map: BrickMap) {
        if self.capacity == 0 {
            return;
        }

        let mut entries = self.entries.lock();

        if entries
            .maps
            .insert(version, (Instant::now(), map))
            .is_none()
        {
            entries.order.push_back(version);
        }

        while entries.maps.len() > self.capacity {
            let Some(oldest) = entries.order.pop_front() else {
                break;
            };
            entries.maps.remove(&oldest);
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().maps.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().maps.is_empty()
    }
}

impl From<CacheConfig> for BrickMapCache {
    fn from(config: CacheConfig) -> Self {
        Self::new(config.capacity, config.ttl)
    }
}

impl Default for BrickMapCache {
    fn default() -> Self {
        CacheConfig::default().into()
    }
}
