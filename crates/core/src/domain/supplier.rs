use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SupplierId(pub String);

impl SupplierId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// First eight hex characters, used in outbound reference tags.
    pub fn short(&self) -> &str {
        short_prefix(&self.0)
    }
}

impl fmt::Display for SupplierId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Supplier {
    pub id: SupplierId,
    pub name: String,
    pub email: Option<String>,
    pub description: String,
    pub insights: Option<String>,
    pub image_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Supplier {
    /// Case-insensitive comparison against the supplier's contact address.
    pub fn has_email(&self, address: &str) -> bool {
        self.email
            .as_deref()
            .map(|email| email.trim().eq_ignore_ascii_case(address.trim()))
            .unwrap_or(false)
    }
}

pub(crate) fn short_prefix(value: &str) -> &str {
    value.get(..8).unwrap_or(value)
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::{Supplier, SupplierId};

    #[test]
    fn short_id_is_first_eight_characters() {
        let id = SupplierId("3f2a9c1e-0000-4000-8000-000000000001".to_string());
        assert_eq!(id.short(), "3f2a9c1e");

        let tiny = SupplierId("abc".to_string());
        assert_eq!(tiny.short(), "abc");
    }

    #[test]
    fn email_match_ignores_case_and_whitespace() {
        let supplier = Supplier {
            id: SupplierId::generate(),
            name: "Nordic Parts".to_string(),
            email: Some("Sales@Nordic.example".to_string()),
            description: String::new(),
            insights: None,
            image_url: None,
            created_at: Utc::now(),
        };

        assert!(supplier.has_email(" sales@nordic.example "));
        assert!(!supplier.has_email("other@nordic.example"));
    }
}
