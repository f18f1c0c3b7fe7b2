//! Geolocation API interceptor
//!
//! Same three entry points as the host API. A successful native reading is
//! registered with the tracker and posted on the page bus as a location
//! request; the response listener routes answers back to the tracker by
//! request id only. Native errors go straight to the caller.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use geoguard_relay::{PageBus, PageListener, PageMessage};

use crate::error::PositionError;
use crate::native::{NativeGeolocation, NativeWatch};
use crate::position::{Position, PositionOptions, WatchId};
use crate::tracker::{Outcome, PositionCallback, RequestTracker, DEFAULT_RELAY_TIMEOUT};

/// Unsettled readings a single watch may have before new ones are held
/// back. Only the newest held-back reading is sent once a slot frees up.
pub const DEFAULT_WATCH_IN_FLIGHT_LIMIT: usize = 4;

pub type ErrorCallback = Arc<dyn Fn(PositionError) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterceptorOptions {
    pub relay_timeout: Duration,
    /// `None` tracks every watch reading.
    pub watch_in_flight_limit: Option<usize>,
}

impl Default for InterceptorOptions {
    fn default() -> Self {
        Self {
            relay_timeout: DEFAULT_RELAY_TIMEOUT,
            watch_in_flight_limit: Some(DEFAULT_WATCH_IN_FLIGHT_LIMIT),
        }
    }
}

/// Page-side sending half: registers a reading, then asks the relay.
#[derive(Clone)]
struct RequestPort {
    bus: PageBus,
    tracker: RequestTracker,
}

impl RequestPort {
    fn track(&self, reading: Position, callback: PositionCallback, watch: Option<WatchId>) {
        let latitude = reading.coords.latitude;
        let longitude = reading.coords.longitude;
        let request_id = self.tracker.register(reading, callback, watch);

        let message = PageMessage::LocationRequest {
            request_id: request_id.clone(),
            latitude,
            longitude,
        };
        if let Err(e) = self.bus.post_message(&message) {
            tracing::warn!(request_id = %request_id, error = %e, "Could not post location request");
            self.tracker.resolve(&request_id, Outcome::PassThrough);
        }
    }
}

pub struct GeolocationInterceptor {
    port: RequestPort,
    native: Arc<dyn NativeGeolocation>,
    options: InterceptorOptions,
    listener: JoinHandle<()>,
    watches: Mutex<HashMap<WatchId, JoinHandle<()>>>,
}

impl GeolocationInterceptor {
    /// Install on `bus`. Must be called from within a tokio runtime.
    pub fn new(
        bus: PageBus,
        native: Arc<dyn NativeGeolocation>,
        options: InterceptorOptions,
    ) -> Self {
        let tracker = RequestTracker::new(options.relay_timeout);
        // Subscribe before the first request can be posted.
        let listener = tokio::spawn(route_responses(bus.listen(), tracker.clone()));

        Self {
            port: RequestPort { bus, tracker },
            native,
            options,
            listener,
            watches: Mutex::new(HashMap::new()),
        }
    }

    pub fn tracker(&self) -> &RequestTracker {
        &self.port.tracker
    }

    pub fn get_current_position(
        &self,
        success: PositionCallback,
        error: Option<ErrorCallback>,
        options: PositionOptions,
    ) {
        let native = Arc::clone(&self.native);
        let port = self.port.clone();

        tokio::spawn(async move {
            match native.get_current_position(&options).await {
                Ok(reading) => port.track(reading, success, None),
                Err(e) => {
                    tracing::debug!(error = %e, "Native location error passed through");
                    if let Some(error) = error {
                        error(e);
                    }
                }
            }
        });
    }

    pub fn watch_position(
        &self,
        success: PositionCallback,
        error: Option<ErrorCallback>,
        options: PositionOptions,
    ) -> WatchId {
        let NativeWatch { id, mut updates } = self.native.watch_position(&options);
        let port = self.port.clone();
        let limit = self.options.watch_in_flight_limit;
        let released = port.tracker.watch_released(id);

        let task = tokio::spawn(async move {
            // Newest reading held back while the watch is at its limit.
            let mut deferred: Option<Position> = None;
            let at_limit = |port: &RequestPort| {
                limit.is_some_and(|limit| port.tracker.in_flight_for_watch(id) >= limit)
            };

            loop {
                tokio::select! {
                    update = updates.recv() => match update {
                        Some(Ok(reading)) => {
                            if at_limit(&port) {
                                tracing::debug!(watch = %id, "Watch reading deferred");
                                deferred = Some(reading);
                            } else {
                                port.track(reading, Arc::clone(&success), Some(id));
                            }
                        }
                        Some(Err(e)) => {
                            if let Some(error) = &error {
                                error(e);
                            }
                        }
                        None => break,
                    },
                    _ = released.notified(), if deferred.is_some() => {
                        if !at_limit(&port) {
                            if let Some(reading) = deferred.take() {
                                port.track(reading, Arc::clone(&success), Some(id));
                            }
                        }
                    }
                }
            }
        });

        self.watches.lock().insert(id, task);
        tracing::debug!(watch = %id, "Watch started");
        id
    }

    /// Stop future native readings. Readings already in flight still settle.
    pub fn clear_watch(&self, id: WatchId) {
        self.native.clear_watch(id);
        if let Some(task) = self.watches.lock().remove(&id) {
            task.abort();
        }
        self.port.tracker.clear_watch(id);
        tracing::debug!(watch = %id, "Watch cleared");
    }
}

impl Drop for GeolocationInterceptor {
    fn drop(&mut self) {
        self.listener.abort();
        for (id, task) in self.watches.lock().drain() {
            self.native.clear_watch(id);
            task.abort();
        }
    }
}

async fn route_responses(mut listener: PageListener, tracker: RequestTracker) {
    while let Some(message) = listener.recv().await {
        if let PageMessage::LocationResponse {
            request_id,
            latitude,
            longitude,
            original,
            error,
            privacy_level,
            is_sensitive,
        } = message
        {
            let outcome = Outcome::from_response(
                latitude,
                longitude,
                original,
                error,
                privacy_level,
                is_sensitive,
            );
            tracker.resolve(&request_id, outcome);
        }
    }
}
