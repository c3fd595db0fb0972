//! Database row types and conversions into the shared models.

use chrono::{DateTime, Utc};

use murmur_types::models::AccessKey;

/// SQL expression for the store's current time in unix milliseconds.
/// Key expiry is always judged against this clock.
pub(crate) const NOW_MS: &str = "CAST((julianday('now') - 2440587.5) * 86400000 AS INTEGER)";

pub struct UserRow {
    pub id: i64,
    pub username: String,
    pub password_hash: String,
    pub email: String,
    pub created_at: i64,
}

pub struct AccessKeyRow {
    pub id: i64,
    pub user_id: i64,
    pub key_value: String,
    pub is_active: bool,
    pub created_at: i64,
    pub expires_at: Option<i64>,
}

impl AccessKeyRow {
    pub(crate) const COLUMNS: &'static str =
        "id, user_id, key_value, is_active, created_at, expires_at";

    pub(crate) fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            user_id: row.get(1)?,
            key_value: row.get(2)?,
            is_active: row.get(3)?,
            created_at: row.get(4)?,
            expires_at: row.get(5)?,
        })
    }
}

impl From<AccessKeyRow> for AccessKey {
    fn from(row: AccessKeyRow) -> Self {
        AccessKey {
            id: row.id,
            user_id: row.user_id,
            key_value: row.key_value,
            is_active: row.is_active,
            created_at: from_millis(row.created_at),
            expires_at: row.expires_at.map(from_millis),
        }
    }
}

pub(crate) fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Out-of-range values fall back to the epoch rather than failing the whole query.
pub(crate) fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}
