//! Credential store: users and their bearer access keys.

use chrono::Duration;
use rusqlite::{Connection, params};
use tracing::{debug, info};

use murmur_crypto::keys;
use murmur_crypto::password::{hash_password, verify_dummy, verify_password};
use murmur_types::models::{AccessKey, User, UserId};

use crate::models::{AccessKeyRow, NOW_MS, UserRow, from_millis, now_millis};
use crate::{Database, OptionalExt, Result, StoreError};

impl Database {
    // -- Users --

    /// Register a user. Username and email are each globally unique.
    pub fn create_user(&self, username: &str, password: &str, email: &str) -> Result<UserId> {
        // Hash outside the connection lock.
        let password_hash = hash_password(password)
            .map_err(|e| StoreError::Internal(format!("password hashing failed: {}", e)))?;

        self.with_conn(|conn| {
            let taken: bool = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM users WHERE username = ?1 OR email = ?2)",
                params![username, email],
                |row| row.get(0),
            )?;
            if taken {
                return Err(StoreError::Conflict(
                    "username or email already registered".into(),
                ));
            }

            conn.execute(
                "INSERT INTO users (username, password_hash, email, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![username, password_hash, email, now_millis()],
            )
            .map_err(unique_to_conflict)?;

            let id = conn.last_insert_rowid();
            info!("Created user {} ({})", username, id);
            Ok(id)
        })
    }

    pub fn get_user(&self, id: UserId) -> Result<Option<User>> {
        let row = self.with_conn(|conn| query_user(conn, "id = ?1", &id))?;
        Ok(row.map(user_from_row))
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<User>> {
        let row = self.with_conn(|conn| query_user(conn, "username = ?1", &username))?;
        Ok(row.map(user_from_row))
    }

    // -- Access keys --

    /// Mint a new random key for `user_id`. `ttl = None` issues a key that never expires.
    /// A negative ttl yields a key that is already expired.
    pub fn issue_key(&self, user_id: UserId, ttl: Option<Duration>) -> Result<AccessKey> {
        self.with_conn(|conn| {
            if !user_exists(conn, user_id)? {
                return Err(StoreError::NotFound(format!("user {}", user_id)));
            }
            insert_key(conn, user_id, ttl)
        })
    }

    /// Resolve a key to its owner. Unknown, inactive and expired keys all yield `None`.
    pub fn verify_key(&self, key_value: &str) -> Result<Option<(UserId, String)>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT k.user_id, u.username
                 FROM access_keys k
                 JOIN users u ON u.id = k.user_id
                 WHERE k.key_value = ?1
                   AND k.is_active = 1
                   AND (k.expires_at IS NULL OR k.expires_at > {})",
                NOW_MS
            );
            conn.query_row(&sql, [key_value], |row| Ok((row.get(0)?, row.get(1)?)))
                .optional()
        })
    }

    /// Soft-delete a key. Returns whether a row actually changed, so a second call returns false.
    pub fn deactivate_key(&self, key_value: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE access_keys SET is_active = 0 WHERE key_value = ?1 AND is_active = 1",
                [key_value],
            )?;
            if changed > 0 {
                info!("Deactivated access key");
            }
            Ok(changed > 0)
        })
    }

    /// Active keys for a user, oldest first. Expired keys are included; they are
    /// still listed until explicitly deactivated.
    pub fn list_keys(&self, user_id: UserId) -> Result<Vec<AccessKey>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM access_keys WHERE user_id = ?1 AND is_active = 1 ORDER BY id",
                AccessKeyRow::COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([user_id], AccessKeyRow::from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows.into_iter().map(AccessKey::from).collect())
        })
    }

    /// Check a username/password pair and hand back a usable key.
    ///
    /// If the user already holds an active, unexpired key the oldest such key is
    /// returned unchanged; only otherwise is a new one minted with `ttl`. A wrong
    /// username or password is `Ok(None)`.
    pub fn authenticate(
        &self,
        username: &str,
        password: &str,
        ttl: Option<Duration>,
    ) -> Result<Option<AccessKey>> {
        let Some(user) = self.with_conn(|conn| query_user(conn, "username = ?1", &username))? else {
            // Same argon2 cost as a wrong password.
            verify_dummy(password);
            return Ok(None);
        };

        let matches = verify_password(password, &user.password_hash)
            .map_err(|e| StoreError::Internal(format!("stored hash unreadable: {}", e)))?;
        if !matches {
            return Ok(None);
        }

        // Reuse-or-mint runs under one lock so concurrent logins agree on the key.
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM access_keys
                 WHERE user_id = ?1 AND is_active = 1
                   AND (expires_at IS NULL OR expires_at > {})
                 ORDER BY id LIMIT 1",
                AccessKeyRow::COLUMNS,
                NOW_MS
            );
            let existing = conn
                .query_row(&sql, [user.id], AccessKeyRow::from_row)
                .optional()?;

            match existing {
                Some(row) => {
                    debug!("Reusing access key {} for {}", row.id, user.username);
                    Ok(Some(row.into()))
                }
                None => insert_key(conn, user.id, ttl).map(Some),
            }
        })
    }
}

fn insert_key(conn: &Connection, user_id: UserId, ttl: Option<Duration>) -> Result<AccessKey> {
    let now = now_millis();
    let expires_at = ttl.map(|ttl| now + ttl.num_milliseconds());
    let key_value = keys::generate_access_key();

    conn.execute(
        "INSERT INTO access_keys (user_id, key_value, is_active, created_at, expires_at)
         VALUES (?1, ?2, 1, ?3, ?4)",
        params![user_id, key_value, now, expires_at],
    )?;

    debug!("Issued access key for user {}", user_id);
    Ok(AccessKey {
        id: conn.last_insert_rowid(),
        user_id,
        key_value,
        is_active: true,
        created_at: from_millis(now),
        expires_at: expires_at.map(from_millis),
    })
}

pub(crate) fn user_exists(conn: &Connection, user_id: UserId) -> Result<bool> {
    let exists = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM users WHERE id = ?1)",
        [user_id],
        |row| row.get(0),
    )?;
    Ok(exists)
}

fn query_user(
    conn: &Connection,
    predicate: &str,
    value: &dyn rusqlite::ToSql,
) -> Result<Option<UserRow>> {
    let sql = format!(
        "SELECT id, username, password_hash, email, created_at FROM users WHERE {}",
        predicate
    );
    conn.query_row(&sql, [value], |row| {
        Ok(UserRow {
            id: row.get(0)?,
            username: row.get(1)?,
            password_hash: row.get(2)?,
            email: row.get(3)?,
            created_at: row.get(4)?,
        })
    })
    .optional()
}

fn user_from_row(row: UserRow) -> User {
    User {
        id: row.id,
        username: row.username,
        email: row.email,
        created_at: from_millis(row.created_at),
    }
}

fn unique_to_conflict(e: rusqlite::Error) -> StoreError {
    match e {
        rusqlite::Error::SqliteFailure(ref err, _)
            if err.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            StoreError::Conflict("username or email already registered".into())
        }
        other => other.into(),
    }
}
