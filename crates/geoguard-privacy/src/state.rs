//! Process-wide state of the privileged context

use std::sync::Arc;

use geoguard_relay::LocationUpdate;

use crate::settings::PrivacySettings;

/// Lives exactly as long as one activation of the privileged context.
#[derive(Debug, Default)]
pub struct PrivacyState {
    settings: Arc<PrivacySettings>,
    /// Advisory snapshot of the last protected location, last writer wins.
    last_location: Option<LocationUpdate>,
}

impl PrivacyState {
    pub fn new(settings: PrivacySettings) -> Self {
        Self {
            settings: Arc::new(settings),
            last_location: None,
        }
    }

    /// Current settings. Callers hold the `Arc`, so a concurrent reload never
    /// changes the settings a request is being resolved with.
    pub fn settings(&self) -> Arc<PrivacySettings> {
        Arc::clone(&self.settings)
    }

    pub fn replace_settings(&mut self, settings: PrivacySettings) {
        self.settings = Arc::new(settings);
    }

    pub fn record(&mut self, update: LocationUpdate) {
        self.last_location = Some(update);
    }

    pub fn last_location(&self) -> Option<&LocationUpdate> {
        self.last_location.as_ref()
    }
}
