//! In-page message bus
//!
//! Every listener sees every value posted on the bus, including its own and
//! anything unrelated scripts post. Listeners decode with
//! [`PageMessage::from_value`] and drop what isn't theirs.

use tokio::sync::broadcast;

use crate::messages::PageMessage;
use crate::Result;

const DEFAULT_CAPACITY: usize = 256;

#[derive(Clone)]
pub struct PageBus {
    tx: broadcast::Sender<serde_json::Value>,
}

impl PageBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Post an arbitrary value. Posting with no listeners is not an error.
    pub fn post(&self, value: serde_json::Value) {
        let _ = self.tx.send(value);
    }

    pub fn post_message(&self, message: &PageMessage) -> Result<()> {
        self.post(message.to_value()?);
        Ok(())
    }

    pub fn listen(&self) -> PageListener {
        PageListener {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for PageBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving half of the page bus that yields only protocol messages.
pub struct PageListener {
    rx: broadcast::Receiver<serde_json::Value>,
}

impl PageListener {
    /// Next protocol message, or `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<PageMessage> {
        loop {
            let value = match self.rx.recv().await {
                Ok(value) => value,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Page listener lagged, messages dropped");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            };

            match PageMessage::from_value(&value) {
                Ok(Some(message)) => return Some(message),
                Ok(None) => {
                    tracing::trace!("Ignoring foreign page message");
                }
                Err(e) => {
                    tracing::debug!(error = %e, "Dropping malformed page message");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::RequestId;
    use serde_json::json;

    #[tokio::test]
    async fn test_listener_skips_foreign_and_malformed() {
        let bus = PageBus::new();
        let mut listener = bus.listen();

        bus.post(json!({"type": "analytics", "event": "click"}));
        bus.post(json!({"type": "GEO_GUARD_LOCATION_REQUEST"}));
        bus.post(json!(42));
        bus.post_message(&PageMessage::LocationRequest {
            request_id: RequestId::new("geo_req_9"),
            latitude: 1.0,
            longitude: 2.0,
        })
        .unwrap();

        let message = listener.recv().await.unwrap();
        assert!(matches!(
            message,
            PageMessage::LocationRequest { ref request_id, .. } if request_id.as_str() == "geo_req_9"
        ));
    }

    #[tokio::test]
    async fn test_post_without_listeners() {
        let bus = PageBus::new();
        bus.post(json!({"type": "anything"}));
    }
}
