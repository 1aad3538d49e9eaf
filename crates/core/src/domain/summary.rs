use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::agent::{AgentId, PairKey};
use crate::flows::ExhaustionReason;

/// Terminal result of one pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum PairOutcome {
    Converged,
    Exhausted(ExhaustionReason),
}

impl PairOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Converged => "converged",
            Self::Exhausted(_) => "exhausted",
        }
    }

    pub fn exhaustion_reason(&self) -> Option<ExhaustionReason> {
        match self {
            Self::Converged => None,
            Self::Exhausted(reason) => Some(*reason),
        }
    }

    pub fn from_parts(outcome: &str, reason: Option<&str>) -> Option<Self> {
        match outcome.trim().to_ascii_lowercase().as_str() {
            "converged" => Some(Self::Converged),
            "exhausted" => reason.and_then(ExhaustionReason::parse).map(Self::Exhausted),
            _ => None,
        }
    }
}

/// Price quoted by a supplier, as understood by the negotiator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfferTerms {
    pub amount: Decimal,
    pub currency: String,
}

impl OfferTerms {
    pub fn new(amount: Decimal, currency: impl Into<String>) -> Self {
        Self { amount, currency: currency.into().trim().to_ascii_uppercase() }
    }
}

impl fmt::Display for OfferTerms {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.amount, self.currency)
    }
}

impl FromStr for OfferTerms {
    type Err = String;

    /// Accepts `12.50 USD`, `USD 12.50`, `$12.50` and `12.50`.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let cleaned = value.trim().replace(',', "");
        let mut amount = None;
        let mut currency = None;

        for token in cleaned.split_whitespace() {
            let (symbol, rest) = match token.strip_prefix('$') {
                Some(rest) => (Some("USD"), rest),
                None => match token.strip_prefix('€') {
                    Some(rest) => (Some("EUR"), rest),
                    None => (None, token),
                },
            };
            if let Some(symbol) = symbol {
                currency.get_or_insert_with(|| symbol.to_string());
            }
            if rest.is_empty() {
                continue;
            }
            match Decimal::from_str(rest) {
                Ok(parsed) if amount.is_none() => amount = Some(parsed),
                Ok(_) => {}
                Err(_) if rest.chars().all(|ch| ch.is_ascii_alphabetic()) && rest.len() == 3 => {
                    currency.get_or_insert_with(|| rest.to_ascii_uppercase());
                }
                Err(_) => {}
            }
        }

        let amount = amount.ok_or_else(|| format!("no amount found in `{value}`"))?;
        if amount.is_sign_negative() {
            return Err(format!("negative amount in `{value}`"));
        }
        Ok(Self::new(amount, currency.unwrap_or_else(|| "USD".to_string())))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NegotiationSummary {
    pub id: String,
    pub pair: PairKey,
    pub agent_id: Option<AgentId>,
    pub outcome: PairOutcome,
    pub summary: String,
    pub offer: Option<OfferTerms>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Summary content produced when a pair reaches a terminal state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewSummary {
    pub outcome: PairOutcome,
    pub summary: String,
    pub offer: Option<OfferTerms>,
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use rust_decimal::Decimal;

    use super::{OfferTerms, PairOutcome};
    use crate::flows::ExhaustionReason;

    #[test]
    fn parses_common_offer_spellings() {
        let plain = OfferTerms::from_str("12.50 usd").expect("amount with code");
        assert_eq!(plain, OfferTerms::new(Decimal::new(1250, 2), "USD"));

        let leading = OfferTerms::from_str("EUR 1,200").expect("code first");
        assert_eq!(leading, OfferTerms::new(Decimal::new(1200, 0), "EUR"));

        let symbol = OfferTerms::from_str("$9.99").expect("dollar sign");
        assert_eq!(symbol, OfferTerms::new(Decimal::new(999, 2), "USD"));
    }

    #[test]
    fn rejects_offers_without_amount() {
        assert!(OfferTerms::from_str("best price").is_err());
        assert!(OfferTerms::from_str("-4 USD").is_err());
    }

    #[test]
    fn outcome_rebuilds_from_columns() {
        assert_eq!(PairOutcome::from_parts("converged", None), Some(PairOutcome::Converged));
        assert_eq!(
            PairOutcome::from_parts("exhausted", Some("reply_timeout")),
            Some(PairOutcome::Exhausted(ExhaustionReason::ReplyTimeout))
        );
        assert_eq!(PairOutcome::from_parts("exhausted", None), None);
    }
}
