use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

use crate::model::UserId;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GateError {
    /// The oracle answered with an error that retrying will not fix
    /// (unknown user, bot not admin in the channel, ...).
    #[error("membership oracle rejected lookup: {0}")]
    Oracle(String),

    /// Network or server-side failure; worth retrying.
    #[error("membership oracle transport error: {0}")]
    Transport(String),

    #[error("membership lookup timed out after {0:?}")]
    Timeout(Duration),

    #[error("membership gate unavailable after {attempts} attempt(s): {last}")]
    Unavailable { attempts: u32, last: String },
}

impl GateError {
    fn is_transient(&self) -> bool {
        matches!(self, GateError::Transport(_) | GateError::Timeout(_))
    }
}

// ---------------------------------------------------------------------------
// Oracle boundary
// ---------------------------------------------------------------------------

/// Membership status as reported by the chat platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemberStatus {
    Creator,
    Administrator,
    Member,
    Restricted,
    Left,
    Kicked,
    Other(String),
}

impl MemberStatus {
    pub fn parse(s: &str) -> Self {
        match s {
            "creator" => Self::Creator,
            "administrator" => Self::Administrator,
            "member" => Self::Member,
            "restricted" => Self::Restricted,
            "left" => Self::Left,
            "kicked" => Self::Kicked,
            other => Self::Other(other.to_string()),
        }
    }

    /// Only plain members and the channel owner pass the gate.
    pub fn passes_gate(&self) -> bool {
        matches!(self, Self::Member | Self::Creator)
    }
}

/// External collaborator that knows who is in the channel.
#[async_trait::async_trait]
pub trait MembershipOracle: Send + Sync + 'static {
    /// Raw status string for `user_id` in `channel`.
    async fn member_status(&self, user_id: UserId, channel: &str) -> Result<String, GateError>;
}

// ---------------------------------------------------------------------------
// Gate
// ---------------------------------------------------------------------------

/// Timeout and retry settings for oracle lookups.
#[derive(Debug, Clone)]
pub struct GatePolicy {
    /// Upper bound for a single oracle call.
    pub timeout: Duration,
    /// Total attempts, including the first one. Zero is treated as one.
    pub attempts: u32,
    /// Delay before the first retry; doubled after each failure.
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for GatePolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            attempts: 3,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(2),
        }
    }
}

/// Answers "has this user joined the channel?".
///
/// Every call goes to the oracle; nothing is cached, so a user who joins
/// passes on their very next message.
pub struct MembershipGate {
    oracle: Arc<dyn MembershipOracle>,
    channel: String,
    policy: GatePolicy,
}

impl MembershipGate {
    pub fn new(oracle: Arc<dyn MembershipOracle>, channel: impl Into<String>) -> Self {
        Self::with_policy(oracle, channel, GatePolicy::default())
    }

    pub fn with_policy(
        oracle: Arc<dyn MembershipOracle>,
        channel: impl Into<String>,
        policy: GatePolicy,
    ) -> Self {
        Self {
            oracle,
            channel: channel.into(),
            policy,
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Query the oracle, retrying transient failures with exponential backoff.
    pub async fn check(&self, user_id: UserId) -> Result<bool, GateError> {
        let attempts = self.policy.attempts.max(1);
        let mut backoff = self.policy.initial_backoff;
        let mut attempt = 1;

        loop {
            match self.lookup_once(user_id).await {
                Ok(status) => {
                    debug!(user = user_id, ?status, "membership status");
                    return Ok(status.passes_gate());
                }
                Err(e) if e.is_transient() && attempt < attempts => {
                    debug!(user = user_id, attempt, "membership lookup failed, retrying: {e}");
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(self.policy.max_backoff);
                    attempt += 1;
                }
                Err(e) => {
                    return Err(GateError::Unavailable {
                        attempts: attempt,
                        last: e.to_string(),
                    });
                }
            }
        }
    }

    /// Fail-closed verdict: any lookup failure counts as "not a member".
    pub async fn is_member(&self, user_id: UserId) -> bool {
        match self.check(user_id).await {
            Ok(member) => member,
            Err(e) => {
                warn!(user = user_id, channel = %self.channel, "membership check failed: {e}");
                false
            }
        }
    }

    async fn lookup_once(&self, user_id: UserId) -> Result<MemberStatus, GateError> {
        let call = self.oracle.member_status(user_id, &self.channel);
        match tokio::time::timeout(self.policy.timeout, call).await {
            Ok(Ok(raw)) => Ok(MemberStatus::parse(&raw)),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(GateError::Timeout(self.policy.timeout)),
        }
    }
}

// ---------------------------------------------------------------------------
// Test oracle
// ---------------------------------------------------------------------------
