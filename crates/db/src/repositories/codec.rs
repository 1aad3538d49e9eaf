use std::collections::BTreeMap;

use procura_core::chrono::{DateTime, SecondsFormat, SubsecRound, Utc};

use super::RepositoryError;

/// Fixed-width RFC 3339 so that lexical order in SQLite matches time order.
pub(crate) fn format_timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Current time at the precision the columns keep, so written and re-read values compare equal.
pub(crate) fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

pub(crate) fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}

pub(crate) fn parse_u32(column: &str, value: i64) -> Result<u32, RepositoryError> {
    u32::try_from(value).map_err(|_| {
        RepositoryError::Decode(format!("column `{column}` is out of range for u32: {value}"))
    })
}

pub(crate) fn parse_u16(column: &str, value: i64) -> Result<u16, RepositoryError> {
    u16::try_from(value).map_err(|_| {
        RepositoryError::Decode(format!("column `{column}` is out of range for u16: {value}"))
    })
}

pub(crate) fn encode_map(map: &BTreeMap<String, String>) -> Result<String, RepositoryError> {
    serde_json::to_string(map)
        .map_err(|error| RepositoryError::Decode(format!("could not encode string map: {error}")))
}

pub(crate) fn decode_map(
    column: &str,
    value: &str,
) -> Result<BTreeMap<String, String>, RepositoryError> {
    serde_json::from_str(value)
        .map_err(|error| RepositoryError::Decode(format!("invalid JSON in `{column}`: {error}")))
}

pub(crate) fn is_unique_violation(error: &sqlx::Error) -> bool {
    matches!(error, sqlx::Error::Database(database) if database.is_unique_violation())
}

pub(crate) fn is_foreign_key_violation(error: &sqlx::Error) -> bool {
    matches!(error, sqlx::Error::Database(database) if database.is_foreign_key_violation())
}
