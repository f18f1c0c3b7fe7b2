//! Native geolocation source
//!
//! The real location provider the interceptor wraps. Privacy logic never
//! runs on this side.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

use crate::error::PositionError;
use crate::position::{Position, PositionOptions, WatchId};
use crate::Result;

/// An open native watch. The stream ends when the watch is cleared.
pub struct NativeWatch {
    pub id: WatchId,
    pub updates: mpsc::UnboundedReceiver<Result<Position>>,
}

#[async_trait]
pub trait NativeGeolocation: Send + Sync {
    async fn get_current_position(&self, options: &PositionOptions) -> Result<Position>;

    fn watch_position(&self, options: &PositionOptions) -> NativeWatch;

    fn clear_watch(&self, id: WatchId);
}

/// Source that reports a configured position, for hosts without a location
/// provider and for driving watches by hand.
pub struct FixedGeolocation {
    current: Mutex<Result<Position>>,
    watches: Mutex<HashMap<WatchId, mpsc::UnboundedSender<Result<Position>>>>,
    next_watch: AtomicU64,
}

impl FixedGeolocation {
    pub fn new(position: Position) -> Self {
        Self::with_result(Ok(position))
    }

    /// Source whose every read fails with `error`.
    pub fn failing(error: PositionError) -> Self {
        Self::with_result(Err(error))
    }

    fn with_result(current: Result<Position>) -> Self {
        Self {
            current: Mutex::new(current),
            watches: Mutex::new(HashMap::new()),
            next_watch: AtomicU64::new(1),
        }
    }

    /// Change the reported position without notifying watches.
    pub fn set_position(&self, position: Position) {
        *self.current.lock() = Ok(position);
    }

    /// Report `update` to every open watch and make it the current result.
    pub fn push(&self, update: Result<Position>) {
        *self.current.lock() = update.clone();
        self.watches
            .lock()
            .retain(|_, tx| tx.send(update.clone()).is_ok());
    }

    pub fn active_watches(&self) -> usize {
        self.watches.lock().len()
    }
}

#[async_trait]
impl NativeGeolocation for FixedGeolocation {
    async fn get_current_position(&self, _options: &PositionOptions) -> Result<Position> {
        self.current.lock().clone()
    }

    fn watch_position(&self, _options: &PositionOptions) -> NativeWatch {
        let id = WatchId(self.next_watch.fetch_add(1, Ordering::Relaxed));
        let (tx, updates) = mpsc::unbounded_channel();
        self.watches.lock().insert(id, tx);
        NativeWatch { id, updates }
    }

    fn clear_watch(&self, id: WatchId) {
        self.watches.lock().remove(&id);
    }
}
