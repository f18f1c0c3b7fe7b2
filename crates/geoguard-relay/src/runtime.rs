//! Runtime channel into the privileged context
//!
//! Request/response with a `oneshot` reply per message. The privileged side
//! may be gone, or may drop the reply without answering; both surface as
//! errors here and are never retried.

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use url::Url;
use uuid::Uuid;

use crate::error::RelayError;
use crate::messages::{RuntimeRequest, RuntimeResponse};
use crate::Result;

/// Transport metadata attached by the sending boundary, never by the payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageSender {
    pub page_id: Option<Uuid>,
    pub url: Option<String>,
}

impl MessageSender {
    pub fn page(page_id: Uuid, url: impl Into<String>) -> Self {
        Self {
            page_id: Some(page_id),
            url: Some(url.into()),
        }
    }

    /// Sender with no page, e.g. a settings UI.
    pub fn extension() -> Self {
        Self {
            page_id: None,
            url: None,
        }
    }

    /// Hostname of the sender's URL, empty when unknown.
    pub fn origin(&self) -> String {
        self.url.as_deref().map(origin_of).unwrap_or_default()
    }
}

/// Lowercased hostname of `url`, empty when it cannot be parsed.
pub fn origin_of(url: &str) -> String {
    match Url::parse(url) {
        Ok(parsed) => parsed.host_str().unwrap_or("").to_lowercase(),
        Err(e) => {
            tracing::debug!(url = %url, error = %e, "Could not extract origin");
            String::new()
        }
    }
}

pub struct RuntimeEnvelope {
    pub sender: MessageSender,
    pub request: RuntimeRequest,
    pub reply: oneshot::Sender<RuntimeResponse>,
}

impl RuntimeEnvelope {
    /// Answer the message. The sender may have stopped waiting.
    pub fn respond(self, response: RuntimeResponse) {
        let _ = self.reply.send(response);
    }
}

#[derive(Clone)]
pub struct RuntimeClient {
    tx: mpsc::Sender<RuntimeEnvelope>,
}

impl RuntimeClient {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<RuntimeEnvelope>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    pub async fn send_message(
        &self,
        sender: MessageSender,
        request: RuntimeRequest,
    ) -> Result<RuntimeResponse> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(RuntimeEnvelope {
                sender,
                request,
                reply,
            })
            .await
            .map_err(|_| RelayError::ChannelClosed)?;

        response.await.map_err(|_| RelayError::ReplyDropped)
    }
}
