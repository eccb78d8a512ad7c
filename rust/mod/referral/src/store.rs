use std::sync::Arc;

use reftrack_core::ServiceError;
use reftrack_sql::{Row, SQLError, SQLStore, Value};

use crate::model::{LeaderboardEntry, PendingClaim, User, UserId};

/// SQL schema for users and pending claims.
///
/// `users.id` is UNIQUE so a racing second insert for the same visitor is
/// ignored by the database even if the caller's lock was bypassed. `seq`
/// records insertion order and breaks leaderboard ties.
const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS users (
    seq             INTEGER PRIMARY KEY AUTOINCREMENT,
    id              INTEGER NOT NULL UNIQUE,
    username        TEXT NOT NULL DEFAULT '',
    referred        INTEGER NOT NULL DEFAULT 0,
    referrer        INTEGER,
    referral_count  INTEGER NOT NULL DEFAULT 0 CHECK (referral_count >= 0),
    referral_link   TEXT NOT NULL,
    joined_at       TEXT NOT NULL,
    CHECK ((referred = 1) = (referrer IS NOT NULL))
);
CREATE INDEX IF NOT EXISTS idx_users_rank ON users(referral_count DESC, seq ASC);

CREATE TABLE IF NOT EXISTS pending_claims (
    seq          INTEGER PRIMARY KEY AUTOINCREMENT,
    visitor_id   INTEGER NOT NULL,
    referrer_id  INTEGER NOT NULL,
    created_at   TEXT NOT NULL,
    UNIQUE (visitor_id, referrer_id)
);
CREATE INDEX IF NOT EXISTS idx_pending_visitor ON pending_claims(visitor_id);
";

const USER_COLUMNS: &str =
    "id, username, referred, referrer, referral_count, referral_link, joined_at";

/// Persistent storage for the referral ledger, backed by SQLStore (SQLite).
pub struct ReferralStore {
    db: Arc<dyn SQLStore>,
}

impl ReferralStore {
    /// Create a new ReferralStore and initialise the schema.
    pub fn new(db: Arc<dyn SQLStore>) -> Result<Self, ServiceError> {
        db.exec_batch(SCHEMA)
            .map_err(|e| ServiceError::Storage(format!("referral schema init: {e}")))?;
        Ok(Self { db })
    }

    // -----------------------------------------------------------------------
    // Users
    // -----------------------------------------------------------------------

    /// Point lookup by user id.
    pub fn get_user(&self, id: UserId) -> Result<Option<User>, ServiceError> {
        let rows = self
            .db
            .query(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                &[Value::Integer(id)],
            )
            .map_err(storage_error)?;

        rows.first().map(row_to_user).transpose()
    }

    /// Insert a user unless a row with the same id exists.
    ///
    /// Returns `true` if this call created the row.
    pub fn insert_user_if_absent(&self, user: &User) -> Result<bool, ServiceError> {
        let affected = self
            .db
            .exec(
                "INSERT OR IGNORE INTO users \
                 (id, username, referred, referrer, referral_count, referral_link, joined_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                &[
                    Value::Integer(user.id),
                    Value::Text(user.username.clone()),
                    Value::from(user.referred),
                    Value::from(user.referrer),
                    Value::Integer(user.referral_count),
                    Value::Text(user.referral_link.clone()),
                    Value::Text(user.joined_at.clone()),
                ],
            )
            .map_err(storage_error)?;

        Ok(affected == 1)
    }

    /// Refresh the display label. Referral columns are never touched here.
    pub fn update_username(&self, id: UserId, username: &str) -> Result<(), ServiceError> {
        let affected = self
            .db
            .exec(
                "UPDATE users SET username = ?1 WHERE id = ?2",
                &[Value::Text(username.to_string()), Value::Integer(id)],
            )
            .map_err(storage_error)?;

        if affected == 0 {
            return Err(ServiceError::NotFound(format!("user {id}")));
        }
        Ok(())
    }

    /// Atomically add one to a user's referral count.
    ///
    /// Returns `false` when no such user exists (nothing was changed).
    pub fn increment_referral_count(&self, id: UserId) -> Result<bool, ServiceError> {
        let affected = self
            .db
            .exec(
                "UPDATE users SET referral_count = referral_count + 1 WHERE id = ?1",
                &[Value::Integer(id)],
            )
            .map_err(storage_error)?;

        Ok(affected == 1)
    }

    /// Credited referral count for one user.
    pub fn referral_count(&self, id: UserId) -> Result<i64, ServiceError> {
        let rows = self
            .db
            .query(
                "SELECT referral_count FROM users WHERE id = ?1",
                &[Value::Integer(id)],
            )
            .map_err(storage_error)?;

        rows.first()
            .and_then(|r| r.get_i64("referral_count"))
            .ok_or_else(|| ServiceError::NotFound(format!("user {id}")))
    }

    /// Total number of users.
    pub fn count_users(&self) -> Result<u64, ServiceError> {
        let rows = self
            .db
            .query("SELECT COUNT(*) as cnt FROM users", &[])
            .map_err(storage_error)?;

        Ok(rows.first().and_then(|r| r.get_i64("cnt")).unwrap_or(0) as u64)
    }

    // -----------------------------------------------------------------------
    // Ranking
    // -----------------------------------------------------------------------

    /// Users ordered by referral count (descending), oldest first on ties.
    pub fn top_referrers(&self, limit: usize) -> Result<Vec<User>, ServiceError> {
        let rows = self
            .db
            .query(
                &format!(
                    "SELECT {USER_COLUMNS} FROM users \
                     ORDER BY referral_count DESC, seq ASC LIMIT ?1"
                ),
                &[Value::Integer(i64::try_from(limit).unwrap_or(i64::MAX))],
            )
            .map_err(storage_error)?;

        rows.iter().map(row_to_user).collect()
    }

    /// The top `limit` referrers numbered from rank 1.
    pub fn leaderboard_entries(&self, limit: usize) -> Result<Vec<LeaderboardEntry>, ServiceError> {
        Ok(self
            .top_referrers(limit)?
            .into_iter()
            .enumerate()
            .map(|(i, u)| LeaderboardEntry {
                rank: i + 1,
                user_id: u.id,
                username: u.username,
                referral_count: u.referral_count,
            })
            .collect())
    }

    /// One-based rank of a user under the leaderboard ordering, with their count.
    pub fn rank_of(&self, id: UserId) -> Result<Option<(usize, i64)>, ServiceError> {
        let rows = self
            .db
            .query(
                "SELECT c.referral_count AS referral_count, \
                        (SELECT COUNT(*) FROM users u \
                          WHERE u.referral_count > c.referral_count \
                             OR (u.referral_count = c.referral_count AND u.seq < c.seq)) + 1 AS position \
                 FROM users c WHERE c.id = ?1",
                &[Value::Integer(id)],
            )
            .map_err(storage_error)?;

        Ok(rows.first().and_then(|r| {
            Some((r.get_i64("position")? as usize, r.get_i64("referral_count")?))
        }))
    }

    // -----------------------------------------------------------------------
    // Pending claims
    // -----------------------------------------------------------------------

    /// Record a claim. Duplicate `(visitor, referrer)` pairs are ignored.
    ///
    /// Returns `true` if a new row was written.
    pub fn record_claim(
        &self,
        visitor_id: UserId,
        referrer_id: UserId,
        now: &str,
    ) -> Result<bool, ServiceError> {
        let affected = self
            .db
            .exec(
                "INSERT OR IGNORE INTO pending_claims (visitor_id, referrer_id, created_at) \
                 VALUES (?1, ?2, ?3)",
                &[
                    Value::Integer(visitor_id),
                    Value::Integer(referrer_id),
                    Value::Text(now.to_string()),
                ],
            )
            .map_err(storage_error)?;

        Ok(affected == 1)
    }

    /// The earliest recorded claim for a visitor.
    pub fn first_claim(&self, visitor_id: UserId) -> Result<Option<PendingClaim>, ServiceError> {
        Ok(self.claims_for(visitor_id)?.into_iter().next())
    }

    /// All outstanding claims for a visitor, oldest first.
    pub fn claims_for(&self, visitor_id: UserId) -> Result<Vec<PendingClaim>, ServiceError> {
        let rows = self
            .db
            .query(
                "SELECT visitor_id, referrer_id, created_at FROM pending_claims \
                 WHERE visitor_id = ?1 ORDER BY seq ASC",
                &[Value::Integer(visitor_id)],
            )
            .map_err(storage_error)?;

        rows.iter().map(row_to_claim).collect()
    }

    /// Drop every claim for a visitor once their user row exists.
    pub fn consume_claims(&self, visitor_id: UserId) -> Result<u64, ServiceError> {
        self.db
            .exec(
                "DELETE FROM pending_claims WHERE visitor_id = ?1",
                &[Value::Integer(visitor_id)],
            )
            .map_err(storage_error)
    }
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

/// Constraint failures are conflicts; everything else is a storage fault.
fn storage_error(e: SQLError) -> ServiceError {
    match e {
        SQLError::Constraint(msg) => ServiceError::Conflict(msg),
        other => ServiceError::Storage(other.to_string()),
    }
}

fn row_to_user(row: &Row) -> Result<User, ServiceError> {
    let id = row
        .get_i64("id")
        .ok_or_else(|| ServiceError::Internal("users row missing id".into()))?;

    Ok(User {
        id,
        username: row.get_str("username").unwrap_or_default().to_string(),
        referred: row.get_bool("referred").unwrap_or(false),
        referrer: row.get_i64("referrer"),
        referral_count: row.get_i64("referral_count").unwrap_or(0),
        referral_link: row.get_str("referral_link").unwrap_or_default().to_string(),
        joined_at: row.get_str("joined_at").unwrap_or_default().to_string(),
    })
}

fn row_to_claim(row: &Row) -> Result<PendingClaim, ServiceError> {
    match (row.get_i64("visitor_id"), row.get_i64("referrer_id")) {
        (Some(visitor_id), Some(referrer_id)) => Ok(PendingClaim {
            visitor_id,
            referrer_id,
            created_at: row.get_str("created_at").unwrap_or_default().to_string(),
        }),
        _ => Err(ServiceError::Internal("malformed pending_claims row".into())),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use reftrack_sql::SqliteStore;

    use super::*;

    /// In-memory SQLite that rejects statements containing an armed fragment.
    pub struct FlakyDb {
        inner: SqliteStore,
        failing: Mutex<Vec<String>>,
    }

    impl FlakyDb {
        pub fn new() -> Self {
            Self {
                inner: SqliteStore::open_in_memory().unwrap(),
                failing: Mutex::new(Vec::new()),
            }
        }

        pub fn fail_on(&self, fragment: &str) {
            self.failing.lock().unwrap().push(fragment.to_string());
        }

        pub fn heal(&self) {
            self.failing.lock().unwrap().clear();
        }

        fn check(&self, sql: &str) -> Result<(), SQLError> {
            match self.failing.lock().unwrap().iter().find(|f| sql.contains(f.as_str())) {
                Some(f) => Err(SQLError::Execution(format!("disk I/O error ({f})"))),
                None => Ok(()),
            }
        }
    }

    impl SQLStore for FlakyDb {
        fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>, SQLError> {
            self.check(sql)?;
            self.inner.query(sql, params)
        }

        fn exec(&self, sql: &str, params: &[Value]) -> Result<u64, SQLError> {
            self.check(sql)?;
            self.inner.exec(sql, params)
        }

        fn exec_batch(&self, sql: &str) -> Result<(), SQLError> {
            self.check(sql)?;
            self.inner.exec_batch(sql)
        }
    }
}
