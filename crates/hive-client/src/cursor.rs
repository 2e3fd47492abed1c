//! Forward-only "last seen" timestamps with per-item dedup.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use hive_core::DeviceEvent;

/// Delivered items remembered per cursor.
const RECENT_LIMIT: usize = 1024;

/// Identity of a delivered item.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Seen {
    timestamp: DateTime<Utc>,
    device_id: String,
    id: u64,
    name: String,
}

impl Seen {
    fn of(event: &DeviceEvent) -> Self {
        Self {
            timestamp: event.timestamp(),
            device_id: event.device_id().to_owned(),
            id: event.id(),
            name: event.name().into_owned(),
        }
    }
}

#[derive(Debug, Default)]
struct CursorState {
    /// Exclusive lower bound the subscription started from.
    since: Option<DateTime<Utc>>,
    /// Newest timestamp delivered so far.
    last: Option<DateTime<Utc>>,
    /// Items older than this were forgotten and count as seen.
    horizon: Option<DateTime<Utc>>,
    recent: HashSet<Seen>,
    order: VecDeque<Seen>,
}

/// Position of one subscription in its item stream.
///
/// [`get`](Self::get) is the newest timestamp delivered, used as the next
/// poll or resubscribe bound. Admission is by item identity, so distinct
/// items sharing a timestamp, or arriving out of order, are all delivered
/// while a repeat of an already delivered item is not. The newest
/// deliveries are remembered; anything older than the oldest of them is
/// treated as seen.
#[derive(Debug, Clone, Default)]
pub struct Cursor {
    state: Arc<Mutex<CursorState>>,
}

impl Cursor {
    /// Cursor starting after `since`, or before everything when `None`.
    #[must_use]
    pub fn new(since: Option<DateTime<Utc>>) -> Self {
        Self {
            state: Arc::new(Mutex::new(CursorState {
                since,
                last: since,
                ..CursorState::default()
            })),
        }
    }

    /// Current position.
    #[must_use]
    pub fn get(&self) -> Option<DateTime<Utc>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).last
    }

    /// Record `event` as delivered.
    ///
    /// Returns `false` for an item the caller should not deliver: one
    /// already admitted, one at or before the starting bound, or one older
    /// than everything still remembered.
    pub fn admit(&self, event: &DeviceEvent) -> bool {
        let timestamp = event.timestamp();
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.since.is_some_and(|since| timestamp <= since)
            || state.horizon.is_some_and(|horizon| timestamp < horizon)
        {
            return false;
        }
        let seen = Seen::of(event);
        if !state.recent.insert(seen.clone()) {
            return false;
        }
        state.order.push_back(seen);
        if state.order.len() > RECENT_LIMIT
            && let Some(evicted) = state.order.pop_front()
        {
            state.recent.remove(&evicted);
            state.horizon = state.horizon.max(Some(evicted.timestamp));
        }
        state.last = state.last.max(Some(timestamp));
        true
    }
}
