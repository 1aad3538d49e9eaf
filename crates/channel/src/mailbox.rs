use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::inbound::{IngestError, IngestedReply, InboundEmail, InboundReply, ReplyIngestor};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("mailbox failed to connect: {0}")]
    Connect(String),
    #[error("mailbox read failed: {0}")]
    Receive(String),
    #[error("mailbox acknowledge failed: {0}")]
    Acknowledge(String),
    #[error("mailbox disconnect failed: {0}")]
    Disconnect(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self { max_retries: 5, base_delay_ms: 5_000, max_delay_ms: 60_000 }
    }
}

impl ReconnectPolicy {
    fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(16);
        let multiplier = 1_u64 << exponent;
        let delay_ms = self.base_delay_ms.saturating_mul(multiplier).min(self.max_delay_ms);
        Duration::from_millis(delay_ms)
    }
}

/// One fetched message plus the transport-level handle used to acknowledge it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MailboxEnvelope {
    pub uid: String,
    pub email: InboundEmail,
}

/// IMAP-like mailbox. `next_email` blocks until a new message arrives and yields `None` when
/// the session ends.
#[async_trait]
pub trait MailboxTransport: Send + Sync {
    async fn connect(&self) -> Result<(), TransportError>;
    async fn next_email(&self) -> Result<Option<MailboxEnvelope>, TransportError>;
    async fn acknowledge(&self, uid: &str) -> Result<(), TransportError>;
    async fn disconnect(&self) -> Result<(), TransportError>;
}

#[derive(Default)]
pub struct NoopMailboxTransport;

#[async_trait]
impl MailboxTransport for NoopMailboxTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn next_email(&self) -> Result<Option<MailboxEnvelope>, TransportError> {
        Ok(None)
    }

    async fn acknowledge(&self, _uid: &str) -> Result<(), TransportError> {
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        Ok(())
    }
}

/// Destination for replies pulled off the mailbox.
#[async_trait]
pub trait ReplySink: Send + Sync {
    async fn deliver(&self, reply: InboundReply) -> Result<IngestedReply, IngestError>;
}

#[async_trait]
impl ReplySink for ReplyIngestor {
    async fn deliver(&self, reply: InboundReply) -> Result<IngestedReply, IngestError> {
        self.ingest(reply).await
    }
}

pub struct MailboxRunner {
    transport: Arc<dyn MailboxTransport>,
    sink: Arc<dyn ReplySink>,
    reconnect_policy: ReconnectPolicy,
}

impl MailboxRunner {
    pub fn new(
        transport: Arc<dyn MailboxTransport>,
        sink: Arc<dyn ReplySink>,
        reconnect_policy: ReconnectPolicy,
    ) -> Self {
        Self { transport, sink, reconnect_policy }
    }

    /// Pumps the mailbox until the transport closes or reconnects are exhausted. Never fails:
    /// a dead mailbox degrades the service to the synthetic reply channel.
    pub async fn start(&self) {
        for attempt in 0..=self.reconnect_policy.max_retries {
            match self.connect_and_pump(attempt).await {
                Ok(()) => return,
                Err(transport_error) => {
                    warn!(
                        event_name = "ingress.mailbox.transport_failed",
                        attempt,
                        max_retries = self.reconnect_policy.max_retries,
                        error = %transport_error,
                        "mailbox transport failed"
                    );

                    if attempt >= self.reconnect_policy.max_retries {
                        warn!(
                            max_retries = self.reconnect_policy.max_retries,
                            "mailbox retries exhausted; continuing without email ingestion"
                        );
                        return;
                    }

                    let delay = self.reconnect_policy.backoff(attempt);
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
    }

    async fn connect_and_pump(&self, attempt: u32) -> Result<(), TransportError> {
        info!(attempt, "opening mailbox connection");
        self.transport.connect().await?;
        info!(attempt, "mailbox connected");

        loop {
            let Some(envelope) = self.transport.next_email().await? else {
                info!(attempt, "mailbox session closed");
                self.transport.disconnect().await?;
                return Ok(());
            };

            info!(
                event_name = "ingress.mailbox.email_received",
                uid = %envelope.uid,
                correlation_id = %envelope.uid,
                sender = %envelope.email.sender,
                subject = %envelope.email.subject,
                "received supplier email"
            );

            match self.sink.deliver(InboundReply::from_email(envelope.email)).await {
                Ok(stored) => debug!(
                    uid = %envelope.uid,
                    negotiation_id = %stored.pair.negotiation_id,
                    supplier_id = %stored.pair.supplier_id,
                    duplicate = stored.outcome.is_duplicate(),
                    "email ingested"
                ),
                Err(error) => warn!(
                    event_name = "ingress.mailbox.email_dropped",
                    uid = %envelope.uid,
                    correlation_id = %envelope.uid,
                    error = %error,
                    "email could not be ingested; continuing mailbox loop"
                ),
            }

            if let Err(error) = self.transport.acknowledge(&envelope.uid).await {
                warn!(
                    event_name = "ingress.mailbox.ack_failed",
                    uid = %envelope.uid,
                    error = %error,
                    "failed to acknowledge email"
                );
            }
        }
    }
}
