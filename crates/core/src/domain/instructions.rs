use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::agent::PairKey;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instructions {
    pub pair: PairKey,
    pub text: String,
    pub updated_at: DateTime<Utc>,
}

impl Instructions {
    pub fn new(pair: PairKey, text: impl Into<String>) -> Self {
        Self { pair, text: text.into(), updated_at: Utc::now() }
    }
}
