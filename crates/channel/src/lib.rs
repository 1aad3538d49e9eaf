//! Supplier reply ingestion and outbound mail.
//!
//! Replies arrive either through the synthetic HTTP channel (the pair is explicit) or through a
//! mailbox transport (the pair is recovered from the subject reference tag or the sender
//! address). Both paths end in [`ReplyIngestor::ingest`], which attributes, deduplicates and
//! appends the reply as a supplier message.

pub mod inbound;
pub mod mailbox;
pub mod outbound;
pub mod reference;

pub use inbound::{
    IngestError, IngestedReply, InboundEmail, InboundReply, ReplyChannel, ReplyIngestor,
};
pub use mailbox::{
    MailboxEnvelope, MailboxRunner, MailboxTransport, NoopMailboxTransport, ReconnectPolicy,
    ReplySink, TransportError,
};
pub use outbound::{MailError, NoopMailer, OutboundEmail, OutboundMailer, RecordingMailer};
pub use reference::ReferenceTag;
