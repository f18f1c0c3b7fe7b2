//! GeoGuard Privacy
//!
//! Everything that runs in the privileged context:
//! - Settings resolution: site-specific entry for the requesting origin,
//!   else the global defaults
//! - Escalation to a minimum level of 8 for sensitive results
//! - The protection service client (fails open, no retries)
//! - The background host that activates, reloads and terminates the worker

mod client;
mod error;
mod host;
mod resolver;
mod settings;
mod state;

pub use client::{HttpProtectionClient, ProtectionRequest, ProtectionResponse, ProtectionService};
pub use error::PrivacyError;
pub use host::{BackgroundHost, HostOptions};
pub use resolver::PolicyResolver;
pub use settings::{keys, EffectiveSettings, PrivacyLevel, PrivacySettings};
pub use state::PrivacyState;

pub type Result<T> = std::result::Result<T, PrivacyError>;
