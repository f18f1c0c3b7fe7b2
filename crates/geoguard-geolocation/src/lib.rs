//! GeoGuard Geolocation
//!
//! Page-side half of the pipeline. `GeolocationInterceptor` stands in for
//! the host's geolocation API and keeps its contract: every successful
//! native reading reaches the caller's success callback exactly once, either
//! protected or as the original reading, and native errors reach the error
//! callback untouched.

mod error;
mod interceptor;
mod native;
mod position;
mod tracker;

pub use error::{PositionError, PositionErrorCode};
pub use interceptor::{
    ErrorCallback, GeolocationInterceptor, InterceptorOptions, DEFAULT_WATCH_IN_FLIGHT_LIMIT,
};
pub use native::{FixedGeolocation, NativeGeolocation, NativeWatch};
pub use position::{
    synthetic_accuracy, Coordinates, Position, PositionOptions, ProtectionInfo, WatchId,
    BASE_ACCURACY_METERS,
};
pub use tracker::{Outcome, PositionCallback, RequestTracker, DEFAULT_RELAY_TIMEOUT};

pub type Result<T> = std::result::Result<T, PositionError>;
