//! Wire types for page and runtime messaging

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::error::RelayError;
use crate::Result;

pub const LOCATION_REQUEST_TAG: &str = "GEO_GUARD_LOCATION_REQUEST";
pub const LOCATION_RESPONSE_TAG: &str = "GEO_GUARD_LOCATION_RESPONSE";

/// Level assumed when a response omits one.
pub const DEFAULT_PRIVACY_LEVEL: u8 = 5;

/// Correlation token for one relay round trip.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub latitude: f64,
    pub longitude: f64,
}

impl LatLng {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

/// Messages posted on the page bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PageMessage {
    #[serde(rename = "GEO_GUARD_LOCATION_REQUEST", rename_all = "camelCase")]
    LocationRequest {
        request_id: RequestId,
        latitude: f64,
        longitude: f64,
    },
    #[serde(rename = "GEO_GUARD_LOCATION_RESPONSE", rename_all = "camelCase")]
    LocationResponse {
        #[serde(alias = "originalRequestId")]
        request_id: RequestId,
        latitude: f64,
        longitude: f64,
        #[serde(default)]
        original: bool,
        #[serde(default)]
        error: bool,
        #[serde(default)]
        privacy_level: Option<u8>,
        #[serde(default, rename = "is_sensitive", alias = "isSensitive")]
        is_sensitive: bool,
    },
}

impl PageMessage {
    /// Decode a raw page bus value.
    ///
    /// Returns `Ok(None)` for values that do not carry one of this protocol's
    /// tags, and `Err(Malformed)` for tagged values missing required fields.
    pub fn from_value(value: &serde_json::Value) -> Result<Option<Self>> {
        let tag = match value.get("type").and_then(|t| t.as_str()) {
            Some(tag) => tag,
            None => return Ok(None),
        };

        if tag != LOCATION_REQUEST_TAG && tag != LOCATION_RESPONSE_TAG {
            return Ok(None);
        }

        serde_json::from_value(value.clone())
            .map(Some)
            .map_err(|e| RelayError::Malformed(format!("{}: {}", tag, e)))
    }

    pub fn to_value(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn response_for(request_id: RequestId, response: &LocationResponse) -> Self {
        PageMessage::LocationResponse {
            request_id,
            latitude: response.latitude,
            longitude: response.longitude,
            original: response.original,
            error: response.error,
            privacy_level: Some(response.privacy_level),
            is_sensitive: response.is_sensitive,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteSetting {
    pub enabled: bool,
    pub privacy_level: u8,
}

/// Messages sent to the privileged context, tagged by `action`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum RuntimeRequest {
    ProcessLocation {
        latitude: f64,
        longitude: f64,
    },
    UpdatePrivacyState {
        enabled: bool,
    },
    UpdatePrivacyLevel {
        level: u8,
    },
    #[serde(rename_all = "camelCase")]
    UpdateSiteSettings {
        site_settings: HashMap<String, SiteSetting>,
    },
    RemoveSiteSettings {
        domain: String,
    },
    ClearAllSiteSettings,
    #[serde(rename_all = "camelCase")]
    UpdatePreferences {
        #[serde(default)]
        save_history: Option<bool>,
        #[serde(default)]
        protect_sensitive: Option<bool>,
    },
    GetLocationInfo,
    GetPrivacyState {
        #[serde(default)]
        url: Option<String>,
    },
}

impl RuntimeRequest {
    pub fn action(&self) -> &'static str {
        match self {
            RuntimeRequest::ProcessLocation { .. } => "processLocation",
            RuntimeRequest::UpdatePrivacyState { .. } => "updatePrivacyState",
            RuntimeRequest::UpdatePrivacyLevel { .. } => "updatePrivacyLevel",
            RuntimeRequest::UpdateSiteSettings { .. } => "updateSiteSettings",
            RuntimeRequest::RemoveSiteSettings { .. } => "removeSiteSettings",
            RuntimeRequest::ClearAllSiteSettings => "clearAllSiteSettings",
            RuntimeRequest::UpdatePreferences { .. } => "updatePreferences",
            RuntimeRequest::GetLocationInfo => "getLocationInfo",
            RuntimeRequest::GetPrivacyState { .. } => "getPrivacyState",
        }
    }
}

/// Answer to `processLocation`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationResponse {
    pub latitude: f64,
    pub longitude: f64,
    pub original: bool,
    #[serde(default)]
    pub error: bool,
    pub privacy_level: u8,
    #[serde(default, rename = "is_sensitive")]
    pub is_sensitive: bool,
    #[serde(default)]
    pub domain: String,
}

impl LocationResponse {
    /// Raw coordinates returned because protection is off for the origin.
    pub fn pass_through(latitude: f64, longitude: f64, privacy_level: u8) -> Self {
        Self {
            latitude,
            longitude,
            original: true,
            error: false,
            privacy_level,
            is_sensitive: false,
            domain: String::new(),
        }
    }

    /// Raw coordinates returned because protection failed.
    pub fn failed(latitude: f64, longitude: f64, privacy_level: u8) -> Self {
        Self {
            error: true,
            ..Self::pass_through(latitude, longitude, privacy_level)
        }
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = domain.into();
        self
    }
}

/// Snapshot broadcast after every successful protection, also returned by
/// `getLocationInfo`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationUpdate {
    pub original: LatLng,
    pub private: LatLng,
    pub is_sensitive: bool,
    pub privacy_level: u8,
    pub domain: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrivacyStateInfo {
    pub enabled: bool,
    pub privacy_level: u8,
    pub domain: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum RuntimeResponse {
    Location(LocationResponse),
    LocationInfo { data: Option<LocationUpdate> },
    PrivacyState(PrivacyStateInfo),
    Ack { ok: bool },
    Rejected { error: bool, message: String },
}

impl RuntimeResponse {
    pub fn ack() -> Self {
        RuntimeResponse::Ack { ok: true }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        RuntimeResponse::Rejected {
            error: true,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_foreign_messages_are_ignored() {
        assert!(PageMessage::from_value(&json!({"hello": "world"}))
            .unwrap()
            .is_none());
        assert!(PageMessage::from_value(&json!({"type": "webpackHotUpdate"}))
            .unwrap()
            .is_none());
        assert!(PageMessage::from_value(&json!("GEO_GUARD_LOCATION_REQUEST"))
            .unwrap()
            .is_none());
        assert!(PageMessage::from_value(&json!({"type": 7})).unwrap().is_none());
    }

    #[test]
    fn test_tagged_message_missing_fields_is_malformed() {
        let result = PageMessage::from_value(&json!({
            "type": LOCATION_REQUEST_TAG,
            "requestId": "geo_req_0"
        }));
        assert!(matches!(result, Err(RelayError::Malformed(_))));
    }

    #[test]
    fn test_response_accepts_legacy_field_names() {
        let message = PageMessage::from_value(&json!({
            "type": LOCATION_RESPONSE_TAG,
            "originalRequestId": "geo_req_4",
            "latitude": 1.5,
            "longitude": 2.5,
            "original": false
        }))
        .unwrap()
        .unwrap();

        match message {
            PageMessage::LocationResponse {
                request_id,
                privacy_level,
                error,
                is_sensitive,
                ..
            } => {
                assert_eq!(request_id.as_str(), "geo_req_4");
                assert_eq!(privacy_level, None);
                assert!(!error);
                assert!(!is_sensitive);
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_request_wire_shape() {
        let message = PageMessage::LocationRequest {
            request_id: RequestId::new("geo_req_1"),
            latitude: 40.7128,
            longitude: -74.006,
        };
        let value = message.to_value().unwrap();
        assert_eq!(value["type"], LOCATION_REQUEST_TAG);
        assert_eq!(value["requestId"], "geo_req_1");
        assert_eq!(value["latitude"], 40.7128);
    }

    #[test]
    fn test_runtime_request_actions() {
        let request: RuntimeRequest = serde_json::from_value(json!({
            "action": "processLocation",
            "latitude": 10.0,
            "longitude": 20.0
        }))
        .unwrap();
        assert_eq!(
            request,
            RuntimeRequest::ProcessLocation {
                latitude: 10.0,
                longitude: 20.0
            }
        );

        let request: RuntimeRequest = serde_json::from_value(json!({
            "action": "updateSiteSettings",
            "siteSettings": {"example.com": {"enabled": false, "privacyLevel": 2}}
        }))
        .unwrap();
        assert_eq!(request.action(), "updateSiteSettings");

        let value = serde_json::to_value(RuntimeRequest::ClearAllSiteSettings).unwrap();
        assert_eq!(value, json!({"action": "clearAllSiteSettings"}));
    }

    #[test]
    fn test_failed_response_flags() {
        let response = LocationResponse::failed(1.0, 2.0, 7);
        assert!(response.original);
        assert!(response.error);
        assert_eq!(response.privacy_level, 7);

        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["privacyLevel"], 7);
        assert_eq!(value["is_sensitive"], false);
    }
}
