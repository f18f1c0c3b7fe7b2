//! GeoGuard Core
//!
//! Assembles the boundaries into a running system: one background host
//! shared by every page, and per page a bus, a relay bridge and a
//! geolocation interceptor.

mod config;
mod error;
mod guard;

pub use config::Config;
pub use error::CoreError;
pub use guard::{GeoGuard, Page};

// Re-export core components
pub use geoguard_geolocation::{
    synthetic_accuracy, Coordinates, ErrorCallback, FixedGeolocation, GeolocationInterceptor,
    InterceptorOptions, NativeGeolocation, NativeWatch, Position, PositionCallback,
    PositionError, PositionErrorCode, PositionOptions, ProtectionInfo, RequestTracker, WatchId,
};
pub use geoguard_privacy::{
    BackgroundHost, HostOptions, HttpProtectionClient, PrivacyError, PrivacyLevel,
    PrivacySettings, ProtectionRequest, ProtectionResponse, ProtectionService,
};
pub use geoguard_relay::{
    LatLng, LocationResponse, LocationUpdate, MessageSender, PrivacyStateInfo, RelayError,
    RuntimeClient, RuntimeRequest, RuntimeResponse, SiteSetting,
};
pub use geoguard_storage::{Database, StorageError};

pub type Result<T> = std::result::Result<T, CoreError>;

/// Initialize logging
pub fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    fmt().with_env_filter(filter).with_target(true).init();
}
