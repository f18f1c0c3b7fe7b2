//! Relay bridge
//!
//! Store-and-forward hop living in the page's boundary. Picks location
//! requests off the page bus, forwards them over the runtime channel and
//! posts the answer back, keyed by the page's own request id.

use tokio::task::JoinHandle;

use crate::bus::{PageBus, PageListener};
use crate::error::RelayError;
use crate::messages::{LocationResponse, PageMessage, RequestId, RuntimeRequest, RuntimeResponse};
use crate::runtime::{MessageSender, RuntimeClient};
use crate::Result;

#[derive(Clone)]
pub struct RelayBridge {
    bus: PageBus,
    runtime: RuntimeClient,
    sender: MessageSender,
}

impl RelayBridge {
    pub fn new(bus: PageBus, runtime: RuntimeClient, sender: MessageSender) -> Self {
        Self {
            bus,
            runtime,
            sender,
        }
    }

    /// Start listening on the page bus. The bridge holds its own handle on
    /// the bus, so the task runs until the returned handle is aborted.
    pub fn spawn(self) -> JoinHandle<()> {
        let listener = self.bus.listen();
        tokio::spawn(self.run(listener))
    }

    async fn run(self, mut listener: PageListener) {
        while let Some(message) = listener.recv().await {
            let PageMessage::LocationRequest {
                request_id,
                latitude,
                longitude,
            } = message
            else {
                continue;
            };

            // Round trips are independent; a slow one never holds up the rest.
            let bridge = self.clone();
            tokio::spawn(async move {
                bridge.forward(request_id, latitude, longitude).await;
            });
        }

        tracing::debug!(origin = %self.sender.origin(), "Relay bridge stopped");
    }

    async fn forward(&self, request_id: RequestId, latitude: f64, longitude: f64) {
        let response = match self.process_location(latitude, longitude).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(
                    request_id = %request_id,
                    error = %e,
                    "No response from privileged context, using original coordinates"
                );
                LocationResponse::failed(latitude, longitude, crate::DEFAULT_PRIVACY_LEVEL)
            }
        };

        if let Err(e) = self
            .bus
            .post_message(&PageMessage::response_for(request_id.clone(), &response))
        {
            tracing::error!(request_id = %request_id, error = %e, "Failed to post location response");
        }
    }

    async fn process_location(&self, latitude: f64, longitude: f64) -> Result<LocationResponse> {
        let response = self
            .runtime
            .send_message(
                self.sender.clone(),
                RuntimeRequest::ProcessLocation {
                    latitude,
                    longitude,
                },
            )
            .await?;

        match response {
            RuntimeResponse::Location(location) => Ok(location),
            _ => Err(RelayError::UnexpectedResponse("processLocation")),
        }
    }
}
