//! Webhook ingestion.
//!
//! Translates remote-directory notifications into `to-local` envelopes. One
//! notification yields exactly one envelope; nothing here reads or writes the
//! identity map or either store.

use crate::model::customer::CustomerFields;
use crate::sync::envelope::{Operation, SyncEnvelope};
use crate::sync::error::{SyncError, SyncResult};
use crate::sync::publisher::EnvelopePublisher;
use log::{info, warn};
use serde::Deserialize;

pub const CUSTOMER_CREATED: &str = "customer.created";
pub const CUSTOMER_UPDATED: &str = "customer.updated";
pub const CUSTOMER_DELETED: &str = "customer.deleted";

/// Notification body as delivered by the remote directory.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    #[serde(rename = "type")]
    pub kind: String,
    pub data: WebhookData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookData {
    pub object: WebhookCustomer,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookCustomer {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

impl WebhookEvent {
    pub fn parse(body: &[u8]) -> SyncResult<Self> {
        serde_json::from_slice(body)
            .map_err(|err| SyncError::MalformedEnvelope(format!("webhook body: {err}")))
    }

    /// Maps the notification onto its `to-local` envelope.
    pub fn into_envelope(self) -> SyncResult<SyncEnvelope> {
        let operation = match self.kind.as_str() {
            CUSTOMER_CREATED => Operation::Create,
            CUSTOMER_UPDATED => Operation::Update,
            CUSTOMER_DELETED => Operation::Delete,
            other => return Err(SyncError::UnsupportedEvent(other.to_string())),
        };

        let WebhookCustomer { id, name, email } = self.data.object;
        if id.trim().is_empty() {
            return Err(SyncError::MalformedEnvelope(format!(
                "{} notification without customer id",
                self.kind
            )));
        }

        let fields = match (operation, name, email) {
            (Operation::Delete, _, _) => None,
            (_, Some(name), Some(email)) => Some(CustomerFields::new(name, email)),
            _ => {
                return Err(SyncError::MalformedEnvelope(format!(
                    "{} notification for {id} lacks name or email",
                    self.kind
                )))
            }
        };

        Ok(SyncEnvelope::inbound(operation, Some(id), None, fields))
    }
}

/// Turns webhook bodies into published `to-local` envelopes.
#[derive(Clone)]
pub struct WebhookIngestor {
    publisher: EnvelopePublisher,
}

impl WebhookIngestor {
    pub fn new(publisher: EnvelopePublisher) -> Self {
        Self { publisher }
    }

    /// Parses, maps and publishes one notification.
    ///
    /// Returns the published envelope. Unknown kinds fail with
    /// `UnsupportedEvent`, unparseable bodies with `MalformedEnvelope`; in
    /// both cases nothing is published.
    pub fn ingest(&self, body: &[u8]) -> SyncResult<SyncEnvelope> {
        let envelope = match WebhookEvent::parse(body).and_then(WebhookEvent::into_envelope) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(
                    "event=webhook_ingest module=webhook status=error error_code={} error={}",
                    err.code(),
                    err.log_detail()
                );
                return Err(err);
            }
        };

        self.publisher.publish(&envelope)?;
        info!(
            "event=webhook_ingest module=webhook status=ok operation={} subject={} event_id={}",
            envelope.operation,
            envelope.subject(),
            envelope.event_id
        );
        Ok(envelope)
    }
}
