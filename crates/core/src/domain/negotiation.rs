use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::supplier::{short_prefix, SupplierId};
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NegotiationId(pub String);

impl NegotiationId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn short(&self) -> &str {
        short_prefix(&self.0)
    }
}

impl fmt::Display for NegotiationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NegotiationStatus {
    Active,
    Completed,
    Cancelled,
}

impl NegotiationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "active" => Some(Self::Active),
            "completed" => Some(Self::Completed),
            "cancelled" | "canceled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Active)
    }
}

/// Result of asking a negotiation to move to a new status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StatusChange {
    Applied { from: NegotiationStatus, to: NegotiationStatus },
    Unchanged { status: NegotiationStatus },
}

impl StatusChange {
    pub fn applied(&self) -> bool {
        matches!(self, Self::Applied { .. })
    }

    pub fn status(&self) -> NegotiationStatus {
        match self {
            Self::Applied { to, .. } => *to,
            Self::Unchanged { status } => *status,
        }
    }
}

/// Decides the effect of a status request without mutating anything.
///
/// Terminal statuses absorb every further request, so repeating a completion or a cancel is a
/// successful no-op. Only a request to re-open is an error.
pub fn plan_status_change(
    current: NegotiationStatus,
    next: NegotiationStatus,
) -> Result<StatusChange, DomainError> {
    use NegotiationStatus::{Active, Cancelled, Completed};

    match (current, next) {
        (Active, Active) => Ok(StatusChange::Unchanged { status: Active }),
        (Active, Completed) | (Active, Cancelled) => {
            Ok(StatusChange::Applied { from: current, to: next })
        }
        (Completed, Active) | (Cancelled, Active) => {
            Err(DomainError::InvalidNegotiationTransition { from: current, to: next })
        }
        (terminal, _) => Ok(StatusChange::Unchanged { status: terminal }),
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Negotiation {
    pub id: NegotiationId,
    pub product: String,
    pub strategy: String,
    pub prompt: String,
    pub status: NegotiationStatus,
    pub final_summary: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Negotiation {
    pub fn transition_to(&mut self, next: NegotiationStatus) -> Result<StatusChange, DomainError> {
        let change = plan_status_change(self.status, next)?;
        if change.applied() {
            self.status = next;
            self.updated_at = Utc::now();
        }
        Ok(change)
    }
}

/// Request to open a negotiation with a set of suppliers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewNegotiation {
    pub product: String,
    pub strategy: String,
    pub prompt: String,
    pub suppliers: Vec<SupplierId>,
    pub orchestrator_prompt: String,
    pub negotiator_prompt: String,
}

impl NewNegotiation {
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.product.trim().is_empty() {
            return Err(DomainError::InvariantViolation("product must not be empty".to_string()));
        }
        if self.strategy.trim().is_empty() {
            return Err(DomainError::InvariantViolation("strategy must not be empty".to_string()));
        }
        if self.suppliers.is_empty() {
            return Err(DomainError::InvariantViolation(
                "at least one supplier is required".to_string(),
            ));
        }
        for (index, supplier) in self.suppliers.iter().enumerate() {
            if supplier.0.trim().is_empty() {
                return Err(DomainError::InvariantViolation(format!(
                    "supplier id at position {index} is empty"
                )));
            }
            if self.suppliers[..index].contains(supplier) {
                return Err(DomainError::InvariantViolation(format!(
                    "supplier `{supplier}` is listed more than once"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::{
        plan_status_change, Negotiation, NegotiationId, NegotiationStatus, NewNegotiation,
        StatusChange,
    };
    use crate::domain::supplier::SupplierId;
    use crate::errors::DomainError;

    fn negotiation(status: NegotiationStatus) -> Negotiation {
        Negotiation {
            id: NegotiationId::generate(),
            product: "nRF54L15".to_string(),
            strategy: "aggressive".to_string(),
            prompt: String::new(),
            status,
            final_summary: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn active_moves_to_either_terminal_status() {
        let mut completed = negotiation(NegotiationStatus::Active);
        let change = completed.transition_to(NegotiationStatus::Completed).expect("complete");
        assert!(change.applied());
        assert_eq!(completed.status, NegotiationStatus::Completed);

        let mut cancelled = negotiation(NegotiationStatus::Active);
        cancelled.transition_to(NegotiationStatus::Cancelled).expect("cancel");
        assert_eq!(cancelled.status, NegotiationStatus::Cancelled);
    }

    #[test]
    fn repeating_completion_is_a_successful_no_op() {
        let mut negotiation = negotiation(NegotiationStatus::Completed);
        let change = negotiation.transition_to(NegotiationStatus::Completed).expect("idempotent");

        assert_eq!(change, StatusChange::Unchanged { status: NegotiationStatus::Completed });
        assert_eq!(negotiation.status, NegotiationStatus::Completed);
    }

    #[test]
    fn cancelling_a_completed_negotiation_keeps_it_completed() {
        let change = plan_status_change(NegotiationStatus::Completed, NegotiationStatus::Cancelled)
            .expect("terminal absorbs");
        assert_eq!(change.status(), NegotiationStatus::Completed);
        assert!(!change.applied());
    }

    #[test]
    fn terminal_statuses_never_reopen() {
        for terminal in [NegotiationStatus::Completed, NegotiationStatus::Cancelled] {
            let error = plan_status_change(terminal, NegotiationStatus::Active)
                .expect_err("re-open must fail");
            assert!(matches!(error, DomainError::InvalidNegotiationTransition { .. }));
        }
    }

    #[test]
    fn status_strings_round_trip() {
        for status in [
            NegotiationStatus::Active,
            NegotiationStatus::Completed,
            NegotiationStatus::Cancelled,
        ] {
            assert_eq!(NegotiationStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(NegotiationStatus::parse("paused"), None);
    }

    #[test]
    fn new_negotiation_rejects_empty_and_duplicate_inputs() {
        let base = NewNegotiation {
            product: "nRF54L15".to_string(),
            strategy: "aggressive".to_string(),
            prompt: String::new(),
            suppliers: vec![SupplierId("s1".to_string()), SupplierId("s2".to_string())],
            orchestrator_prompt: "orchestrate".to_string(),
            negotiator_prompt: "negotiate".to_string(),
        };
        base.validate().expect("valid request");

        let empty_product = NewNegotiation { product: "  ".to_string(), ..base.clone() };
        assert!(empty_product.validate().is_err());

        let no_suppliers = NewNegotiation { suppliers: Vec::new(), ..base.clone() };
        assert!(no_suppliers.validate().is_err());

        let duplicate = NewNegotiation {
            suppliers: vec![SupplierId("s1".to_string()), SupplierId("s1".to_string())],
            ..base
        };
        let error = duplicate.validate().expect_err("duplicate supplier");
        assert!(error.to_string().contains("more than once"));
    }
}
