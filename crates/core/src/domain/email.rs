use chrono::{DateTime, Utc};
use secrecy::SecretString;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct EmailConfigId(pub String);

impl EmailConfigId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

/// Mailbox credentials. At most one row is active at a time.
#[derive(Clone, Debug)]
pub struct EmailConfig {
    pub id: EmailConfigId,
    pub address: String,
    pub app_password: SecretString,
    pub imap_host: String,
    pub imap_port: u16,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}
