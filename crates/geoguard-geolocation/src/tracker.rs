//! Request tracker
//!
//! Owns every in-flight privacy request of one page. Each entry ends in
//! exactly one delivery: the matching relay response, or the timeout
//! fallback to the original reading, whichever comes first.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use geoguard_relay::{RequestId, DEFAULT_PRIVACY_LEVEL};

use crate::position::{Position, WatchId};

/// Upper bound on how long a caller waits for a protected position.
pub const DEFAULT_RELAY_TIMEOUT: Duration = Duration::from_millis(3000);

pub type PositionCallback = Arc<dyn Fn(Position) + Send + Sync>;

/// Terminal outcome of one privacy request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Outcome {
    Protected {
        latitude: f64,
        longitude: f64,
        privacy_level: u8,
        is_sensitive: bool,
    },
    PassThrough,
    Error,
}

impl Outcome {
    /// Interpret the flags of a relay response.
    pub fn from_response(
        latitude: f64,
        longitude: f64,
        original: bool,
        error: bool,
        privacy_level: Option<u8>,
        is_sensitive: bool,
    ) -> Self {
        if error {
            Outcome::Error
        } else if original {
            Outcome::PassThrough
        } else {
            Outcome::Protected {
                latitude,
                longitude,
                privacy_level: privacy_level
                    .filter(|level| *level > 0)
                    .unwrap_or(DEFAULT_PRIVACY_LEVEL),
                is_sensitive,
            }
        }
    }

    fn deliver(&self, reading: &Position) -> Position {
        match *self {
            Outcome::Protected {
                latitude,
                longitude,
                privacy_level,
                is_sensitive,
            } => reading.protected(latitude, longitude, privacy_level, is_sensitive),
            Outcome::PassThrough => reading.original(false),
            Outcome::Error => reading.original(true),
        }
    }
}

struct PendingRequest {
    reading: Position,
    callback: PositionCallback,
    watch: Option<WatchId>,
    timeout: Option<JoinHandle<()>>,
}

/// Per-watch bookkeeping. Lives while the watch is active or still has
/// readings in flight.
#[derive(Default)]
struct WatchSlot {
    in_flight: usize,
    cancelled: bool,
    /// Signalled each time one of the watch's readings settles.
    released: Arc<Notify>,
}

#[derive(Default)]
struct TrackerState {
    pending: HashMap<RequestId, PendingRequest>,
    watches: HashMap<WatchId, WatchSlot>,
}

struct TrackerInner {
    state: Mutex<TrackerState>,
    next_id: AtomicU64,
    timeout: Duration,
}

pub struct RequestTracker {
    inner: Arc<TrackerInner>,
}

impl RequestTracker {
    pub fn new(timeout: Duration) -> Self {
        Self {
            inner: Arc::new(TrackerInner {
                state: Mutex::new(TrackerState::default()),
                next_id: AtomicU64::new(0),
                timeout,
            }),
        }
    }

    /// Track a real reading and arm its timeout. Must be called from within
    /// a tokio runtime.
    pub fn register(
        &self,
        reading: Position,
        callback: PositionCallback,
        watch: Option<WatchId>,
    ) -> RequestId {
        let n = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let id = RequestId::new(format!("geo_req_{}", n));

        let mut state = self.inner.state.lock();
        // The timer blocks on the lock until the entry below is in place.
        let timeout = tokio::spawn({
            let tracker = self.clone();
            let id = id.clone();
            async move {
                tokio::time::sleep(tracker.inner.timeout).await;
                tracker.expire(&id);
            }
        });

        if let Some(watch) = watch {
            state.watches.entry(watch).or_default().in_flight += 1;
        }
        state.pending.insert(
            id.clone(),
            PendingRequest {
                reading,
                callback,
                watch,
                timeout: Some(timeout),
            },
        );

        tracing::trace!(request_id = %id, watch = ?watch, "Registered location request");

        id
    }

    /// Deliver `outcome` for `id`. Unknown or already settled ids are
    /// ignored. Returns whether a callback was invoked.
    pub fn resolve(&self, id: &RequestId, outcome: Outcome) -> bool {
        self.settle(id, outcome, true)
    }

    fn expire(&self, id: &RequestId) {
        if self.is_pending(id) {
            tracing::warn!(
                request_id = %id,
                timeout_ms = self.inner.timeout.as_millis() as u64,
                "Location request timed out, using original coordinates"
            );
        }
        self.settle(id, Outcome::PassThrough, false);
    }

    fn settle(&self, id: &RequestId, outcome: Outcome, cancel_timer: bool) -> bool {
        let (callback, position) = {
            let mut state = self.inner.state.lock();

            let Some(mut entry) = state.pending.remove(id) else {
                tracing::debug!(request_id = %id, "Response for unknown or settled request ignored");
                return false;
            };

            if let Some(timeout) = entry.timeout.take() {
                if cancel_timer {
                    timeout.abort();
                }
            }

            if let Some(watch) = entry.watch {
                if let Some(slot) = state.watches.get_mut(&watch) {
                    slot.in_flight = slot.in_flight.saturating_sub(1);
                    if slot.cancelled && slot.in_flight == 0 {
                        state.watches.remove(&watch);
                    } else {
                        slot.released.notify_one();
                    }
                }
            }

            (entry.callback, outcome.deliver(&entry.reading))
        };

        callback(position);
        true
    }

    /// Signal fired whenever a reading of `watch` settles and frees a slot.
    pub fn watch_released(&self, watch: WatchId) -> Arc<Notify> {
        let mut state = self.inner.state.lock();
        Arc::clone(&state.watches.entry(watch).or_default().released)
    }

    /// Forget a cancelled watch. Readings still in flight are delivered when
    /// they settle.
    pub fn clear_watch(&self, watch: WatchId) {
        let mut state = self.inner.state.lock();
        let Some(slot) = state.watches.get_mut(&watch) else {
            return;
        };
        if slot.in_flight > 0 {
            slot.cancelled = true;
        } else {
            state.watches.remove(&watch);
        }
    }

    /// Unsettled requests belonging to `watch`.
    pub fn in_flight_for_watch(&self, watch: WatchId) -> usize {
        self.inner
            .state
            .lock()
            .watches
            .get(&watch)
            .map_or(0, |slot| slot.in_flight)
    }

    /// Requests still waiting for a delivery.
    pub fn pending_count(&self) -> usize {
        self.inner.state.lock().pending.len()
    }

    pub fn is_pending(&self, id: &RequestId) -> bool {
        self.inner.state.lock().pending.contains_key(id)
    }
}

impl Default for RequestTracker {
    fn default() -> Self {
        Self::new(DEFAULT_RELAY_TIMEOUT)
    }
}

impl Clone for RequestTracker {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}
