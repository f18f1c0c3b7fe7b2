//! GeoGuard Relay
//!
//! The message protocol connecting the three isolation boundaries:
//!
//! ```text
//! page (interceptor) ──PageBus──▶ RelayBridge ──RuntimeClient──▶ privileged worker
//!                    ◀──PageBus── RelayBridge ◀──oneshot reply──
//! ```
//!
//! Nothing here shares memory with the other side. The page bus carries raw
//! JSON values, and only messages carrying one of this protocol's tags are
//! ever decoded.

mod bridge;
mod bus;
mod error;
mod messages;
mod runtime;

pub use bridge::RelayBridge;
pub use bus::{PageBus, PageListener};
pub use error::RelayError;
pub use messages::{
    LatLng, LocationResponse, LocationUpdate, PageMessage, PrivacyStateInfo, RequestId,
    RuntimeRequest, RuntimeResponse, SiteSetting, DEFAULT_PRIVACY_LEVEL,
    LOCATION_REQUEST_TAG, LOCATION_RESPONSE_TAG,
};
pub use runtime::{origin_of, MessageSender, RuntimeClient, RuntimeEnvelope};

pub type Result<T> = std::result::Result<T, RelayError>;
