use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

use crate::upstream::EventKey;

// ============================================================================
// Event Deduplicator
// ============================================================================
//
// Time-windowed set of processed event keys. Entries older than `retention`
// are evicted lazily on every access; `capacity` is a hard cap that evicts
// the oldest entries first. An evicted event can be applied again, which the
// order layer absorbs (transitions and placement are idempotent there).
//
// ============================================================================

struct DedupState {
    seen: HashMap<EventKey, Instant>,
    /// Insertion order, oldest first. May hold stale entries for keys that
    /// were recorded again; those are skipped on eviction.
    order: VecDeque<(EventKey, Instant)>,
}

pub struct EventDeduplicator {
    retention: Duration,
    capacity: usize,
    state: Mutex<DedupState>,
}

impl EventDeduplicator {
    pub fn new(retention: Duration, capacity: usize) -> Self {
        Self {
            retention,
            capacity: capacity.max(1),
            state: Mutex::new(DedupState {
                seen: HashMap::new(),
                order: VecDeque::new(),
            }),
        }
    }

    /// Whether the key was recorded within the retention window
    pub fn seen(&self, key: &EventKey) -> bool {
        let mut state = self.lock();
        let now = Instant::now();
        self.evict_expired(&mut state, now);
        state.seen.contains_key(key)
    }

    pub fn record(&self, key: EventKey) {
        let mut state = self.lock();
        let now = Instant::now();
        self.evict_expired(&mut state, now);

        state.seen.insert(key.clone(), now);
        state.order.push_back((key, now));

        while state.seen.len() > self.capacity {
            if !Self::pop_oldest(&mut state) {
                break;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.lock().seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn evict_expired(&self, state: &mut DedupState, now: Instant) {
        loop {
            let expired = match state.order.front() {
                Some((_, at)) => now.duration_since(*at) >= self.retention,
                None => false,
            };
            if !expired {
                break;
            }
            Self::pop_oldest(state);
        }
    }

    /// Remove the front of the queue; returns false once the queue is empty
    fn pop_oldest(state: &mut DedupState) -> bool {
        let Some((key, at)) = state.order.pop_front() else {
            return false;
        };
        if state.seen.get(&key) == Some(&at) {
            state.seen.remove(&key);
        }
        true
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, DedupState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(id: &str) -> EventKey {
        EventKey::Upstream(id.to_string())
    }

    #[tokio::test(start_paused = true)]
    async fn test_recorded_key_is_seen_until_retention_expires() {
        let dedup = EventDeduplicator::new(Duration::from_secs(60), 100);

        assert!(!dedup.seen(&key("a")));
        dedup.record(key("a"));
        assert!(dedup.seen(&key("a")));

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(dedup.seen(&key("a")));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(!dedup.seen(&key("a")));
        assert!(dedup.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_capacity_evicts_oldest_first() {
        let dedup = EventDeduplicator::new(Duration::from_secs(3600), 3);

        for id in ["a", "b", "c", "d"] {
            dedup.record(key(id));
            tokio::time::advance(Duration::from_millis(1)).await;
        }

        assert_eq!(dedup.len(), 3);
        assert!(!dedup.seen(&key("a")));
        assert!(dedup.seen(&key("b")));
        assert!(dedup.seen(&key("d")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_re_recording_extends_the_window() {
        let dedup = EventDeduplicator::new(Duration::from_secs(60), 100);

        dedup.record(key("a"));
        tokio::time::advance(Duration::from_secs(40)).await;
        dedup.record(key("a"));
        tokio::time::advance(Duration::from_secs(40)).await;

        // The first entry expired, the second one is still inside the window
        assert!(dedup.seen(&key("a")));
        assert_eq!(dedup.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_composite_keys_distinguish_codes() {
        use crate::upstream::PollCategory;

        let at = chrono::Utc::now();
        let placed = EventKey::Composite {
            category: PollCategory::Orders,
            subject: "42".to_string(),
            code: "PLC".to_string(),
            at,
        };
        let concluded = EventKey::Composite {
            category: PollCategory::Orders,
            subject: "42".to_string(),
            code: "CON".to_string(),
            at,
        };

        let dedup = EventDeduplicator::new(Duration::from_secs(60), 10);
        dedup.record(placed.clone());
        assert!(dedup.seen(&placed));
        assert!(!dedup.seen(&concluded));
    }
}
