//! Policy resolver
//!
//! ```text
//! coordinates + origin
//!   ↓ resolve site-else-global settings
//! disabled ──▶ pass-through (original)
//!   ↓ enabled
//! protection service ──failure──▶ pass-through (original, error)
//!   ↓ success
//! record snapshot, escalate if sensitive, broadcast ──▶ protected
//! ```

use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::broadcast;

use geoguard_relay::{LocationResponse, LocationUpdate};

use crate::client::{ProtectionRequest, ProtectionService};
use crate::state::PrivacyState;

#[derive(Clone)]
pub struct PolicyResolver {
    state: Arc<RwLock<PrivacyState>>,
    service: Arc<dyn ProtectionService>,
    updates: broadcast::Sender<LocationUpdate>,
}

impl PolicyResolver {
    pub fn new(
        state: Arc<RwLock<PrivacyState>>,
        service: Arc<dyn ProtectionService>,
        updates: broadcast::Sender<LocationUpdate>,
    ) -> Self {
        Self {
            state,
            service,
            updates,
        }
    }

    pub fn state(&self) -> &Arc<RwLock<PrivacyState>> {
        &self.state
    }

    /// Resolve one location request. Never fails: every error path answers
    /// with the caller's own coordinates.
    pub async fn process_location(
        &self,
        latitude: f64,
        longitude: f64,
        origin: &str,
    ) -> LocationResponse {
        let settings = self.state.read().settings();
        let effective = settings.effective_for(origin);
        let requested = effective.privacy_level;

        if !effective.enabled {
            tracing::debug!(
                origin = %origin,
                site_specific = effective.site_specific,
                "Protection disabled, passing original location through"
            );
            return LocationResponse::pass_through(latitude, longitude, requested.get())
                .with_domain(origin);
        }

        let request = ProtectionRequest {
            latitude,
            longitude,
            privacy_level: requested.get(),
            save_history: settings.save_history,
            domain: origin.to_string(),
        };

        let result = match self.service.protect(&request).await {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(origin = %origin, error = %e, "Protection service failed");
                return LocationResponse::failed(latitude, longitude, requested.get())
                    .with_domain(origin);
            }
        };

        // The snapshot keeps the requested level, the caller gets the escalated one.
        self.state.write().record(LocationUpdate {
            original: result.original,
            private: result.private,
            is_sensitive: result.is_sensitive,
            privacy_level: requested.get(),
            domain: origin.to_string(),
        });

        let final_level = if settings.protect_sensitive && result.is_sensitive {
            requested.escalate_for_sensitive()
        } else {
            requested
        };

        // No subscribers is not an error
        let _ = self.updates.send(LocationUpdate {
            original: result.original,
            private: result.private,
            is_sensitive: result.is_sensitive,
            privacy_level: final_level.get(),
            domain: origin.to_string(),
        });

        tracing::debug!(
            origin = %origin,
            privacy_level = %final_level,
            is_sensitive = result.is_sensitive,
            "Location protected"
        );

        LocationResponse {
            latitude: result.private.latitude,
            longitude: result.private.longitude,
            original: false,
            error: false,
            privacy_level: final_level.get(),
            is_sensitive: result.is_sensitive,
            domain: origin.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ProtectionResponse;
    use crate::error::PrivacyError;
    use crate::settings::{PrivacyLevel, PrivacySettings};
    use crate::Result;
    use async_trait::async_trait;
    use geoguard_relay::{LatLng, SiteSetting};
    use parking_lot::Mutex;
    use std::collections::HashMap;

    /// Shifts coordinates by a fixed offset and records what it was asked.
    struct FakeService {
        sensitive: bool,
        fail: bool,
        calls: Mutex<Vec<ProtectionRequest>>,
    }

    impl FakeService {
        fn new(sensitive: bool, fail: bool) -> Arc<Self> {
            Arc::new(Self {
                sensitive,
                fail,
                calls: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ProtectionService for FakeService {
        async fn protect(&self, request: &ProtectionRequest) -> Result<ProtectionResponse> {
            self.calls.lock().push(request.clone());
            if self.fail {
                return Err(PrivacyError::ServiceStatus(500));
            }
            Ok(ProtectionResponse {
                original: LatLng::new(request.latitude, request.longitude),
                private: LatLng::new(request.latitude + 0.01, request.longitude + 0.01),
                is_sensitive: self.sensitive,
            })
        }
    }

    fn resolver(
        settings: PrivacySettings,
        service: Arc<FakeService>,
    ) -> (PolicyResolver, broadcast::Receiver<LocationUpdate>) {
        let (updates, rx) = broadcast::channel(8);
        let state = Arc::new(RwLock::new(PrivacyState::new(settings)));
        (PolicyResolver::new(state, service, updates), rx)
    }

    #[tokio::test]
    async fn test_site_opt_out_passes_through() {
        let mut settings = PrivacySettings {
            privacy_level: PrivacyLevel::new(9).unwrap(),
            ..PrivacySettings::default()
        };
        settings
            .set_site_settings(HashMap::from([(
                "example.com".to_string(),
                SiteSetting {
                    enabled: false,
                    privacy_level: 4,
                },
            )]))
            .unwrap();
        let service = FakeService::new(false, false);
        let (resolver, _rx) = resolver(settings, service.clone());

        let response = resolver.process_location(40.0, -74.0, "example.com").await;

        assert_eq!(response.latitude, 40.0);
        assert_eq!(response.longitude, -74.0);
        assert!(response.original);
        assert!(!response.error);
        assert_eq!(response.privacy_level, 4);
        assert!(service.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn test_protected_result_and_broadcast() {
        let service = FakeService::new(false, false);
        let (resolver, mut rx) = resolver(PrivacySettings::default(), service.clone());

        let response = resolver.process_location(10.0, 20.0, "maps.test").await;

        assert!(!response.original);
        assert!((response.latitude - 10.01).abs() < 1e-9);
        assert_eq!(response.privacy_level, 5);

        let call = service.calls.lock()[0].clone();
        assert_eq!(call.privacy_level, 5);
        assert!(call.save_history);
        assert_eq!(call.domain, "maps.test");

        let update = rx.recv().await.unwrap();
        assert_eq!(update.domain, "maps.test");
        assert_eq!(update.private, LatLng::new(10.01, 20.01));

        let state = resolver.state().read();
        assert_eq!(state.last_location().unwrap().original, LatLng::new(10.0, 20.0));
    }

    #[tokio::test]
    async fn test_sensitive_result_escalates_returned_level_only() {
        let settings = PrivacySettings {
            privacy_level: PrivacyLevel::new(3).unwrap(),
            ..PrivacySettings::default()
        };
        let service = FakeService::new(true, false);
        let (resolver, mut rx) = resolver(settings, service.clone());

        let response = resolver.process_location(1.0, 2.0, "church.example").await;

        assert_eq!(response.privacy_level, 8);
        assert!(response.is_sensitive);
        // Requested once, at the configured level
        assert_eq!(service.calls.lock().len(), 1);
        assert_eq!(service.calls.lock()[0].privacy_level, 3);
        assert_eq!(rx.recv().await.unwrap().privacy_level, 8);
        assert_eq!(
            resolver.state().read().last_location().unwrap().privacy_level,
            3
        );
    }

    #[tokio::test]
    async fn test_sensitive_without_protect_sensitive() {
        let settings = PrivacySettings {
            privacy_level: PrivacyLevel::new(3).unwrap(),
            protect_sensitive: false,
            ..PrivacySettings::default()
        };
        let (resolver, _rx) = resolver(settings, FakeService::new(true, false));

        let response = resolver.process_location(1.0, 2.0, "church.example").await;
        assert_eq!(response.privacy_level, 3);
        assert!(response.is_sensitive);
    }

    #[tokio::test]
    async fn test_service_failure_keeps_requested_level() {
        let settings = PrivacySettings {
            privacy_level: PrivacyLevel::new(6).unwrap(),
            ..PrivacySettings::default()
        };
        let (resolver, mut rx) = resolver(settings, FakeService::new(false, true));

        let response = resolver.process_location(51.5, -0.12, "example.org").await;

        assert_eq!(response.latitude, 51.5);
        assert!(response.original);
        assert!(response.error);
        assert_eq!(response.privacy_level, 6);
        assert!(rx.try_recv().is_err());
        assert!(resolver.state().read().last_location().is_none());
    }

    #[tokio::test]
    async fn test_broadcast_without_subscribers() {
        let (updates, rx) = broadcast::channel(1);
        drop(rx);
        let state = Arc::new(RwLock::new(PrivacyState::default()));
        let resolver = PolicyResolver::new(state, FakeService::new(false, false), updates);

        let response = resolver.process_location(1.0, 1.0, "a.com").await;
        assert!(!response.original);
    }
}
