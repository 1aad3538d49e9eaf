use std::sync::Mutex;
use std::sync::PoisonError;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use procura_core::domain::agent::PairKey;

use crate::reference::ReferenceTag;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MailError {
    #[error("outbound mail is not configured")]
    NotConfigured,
    #[error("recipient rejected: {0}")]
    Rejected(String),
    #[error("mail transport failed: {0}")]
    Transport(String),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct OutboundEmail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

impl OutboundEmail {
    /// Email for one pair; the subject carries the pair's reference tag.
    pub fn for_pair(pair: &PairKey, to: impl Into<String>, product: &str, body: impl Into<String>) -> Self {
        Self {
            to: to.into(),
            subject: format!("Request for quotation: {product} {}", ReferenceTag::for_pair(pair)),
            body: body.into(),
        }
    }
}

#[async_trait]
pub trait OutboundMailer: Send + Sync {
    async fn send(&self, email: OutboundEmail) -> Result<(), MailError>;
}

/// Used when no mailbox is configured; negotiator messages are then only stored.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopMailer;

#[async_trait]
impl OutboundMailer for NoopMailer {
    async fn send(&self, email: OutboundEmail) -> Result<(), MailError> {
        debug!(to = %email.to, subject = %email.subject, "outbound mail disabled; message not sent");
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<OutboundEmail>>,
    failure: Mutex<Option<MailError>>,
}

impl RecordingMailer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every later `send` fails with `error`.
    pub fn fail_with(&self, error: MailError) {
        *self.failure.lock().unwrap_or_else(PoisonError::into_inner) = Some(error);
    }

    pub fn sent(&self) -> Vec<OutboundEmail> {
        self.sent.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[async_trait]
impl OutboundMailer for RecordingMailer {
    async fn send(&self, email: OutboundEmail) -> Result<(), MailError> {
        if let Some(error) = self.failure.lock().unwrap_or_else(PoisonError::into_inner).clone() {
            return Err(error);
        }
        self.sent.lock().unwrap_or_else(PoisonError::into_inner).push(email);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use procura_core::domain::agent::PairKey;
    use procura_core::domain::negotiation::NegotiationId;
    use procura_core::domain::supplier::SupplierId;

    use super::{MailError, OutboundEmail, OutboundMailer, RecordingMailer};
    use crate::reference::ReferenceTag;

    #[tokio::test]
    async fn outbound_subject_round_trips_through_reference_tag() {
        let pair = PairKey::new(
            NegotiationId("0a1b2c3d-aaaa".to_owned()),
            SupplierId("9f8e7d6c-bbbb".to_owned()),
        );
        let email = OutboundEmail::for_pair(&pair, "sales@nordic.example", "nRF54L15", "Hello");
        assert_eq!(ReferenceTag::find_in(&email.subject), Some(ReferenceTag::for_pair(&pair)));

        let mailer = RecordingMailer::new();
        mailer.send(email.clone()).await.expect("send");
        assert_eq!(mailer.sent(), vec![email.clone()]);

        mailer.fail_with(MailError::Transport("smtp down".to_owned()));
        assert!(mailer.send(email).await.is_err());
        assert_eq!(mailer.sent().len(), 1);
    }
}
