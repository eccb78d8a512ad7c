use serde::Serialize;

/// External identity of a chat user (Telegram user ids exceed 32 bits).
pub type UserId = i64;

// ---------------------------------------------------------------------------
// User, maps 1:1 to the `users` table
// ---------------------------------------------------------------------------

/// A person who has passed the gate at least once.
///
/// `referrer` is fixed at creation and never reassigned; `referred` mirrors
/// `referrer.is_some()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub referred: bool,
    pub referrer: Option<UserId>,
    pub referral_count: i64,
    pub referral_link: String,
    pub joined_at: String,
}

// ---------------------------------------------------------------------------
// PendingClaim: a referral code seen before the visitor passed the gate
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingClaim {
    pub visitor_id: UserId,
    pub referrer_id: UserId,
    pub created_at: String,
}

// ---------------------------------------------------------------------------
// Visit: one inbound user-initiated event
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Visit {
    pub visitor_id: UserId,
    pub username: String,
    /// Referral code carried by this message, already parsed. `None` is organic.
    pub claimed_referrer: Option<UserId>,
}

impl Visit {
    pub fn new(visitor_id: UserId, username: impl Into<String>) -> Self {
        Self {
            visitor_id,
            username: username.into(),
            claimed_referrer: None,
        }
    }

    pub fn with_referrer(mut self, referrer: Option<UserId>) -> Self {
        self.claimed_referrer = referrer;
        self
    }
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// What happened to the referrer's counter when a new user was created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreditResult {
    /// No referrer, or the user already existed.
    NotApplicable,
    /// The referrer's count went up by one.
    Credited(UserId),
    /// The referrer has no row; the credit was dropped.
    UnknownReferrer(UserId),
    /// The increment failed in storage; logged for reconciliation.
    Failed(UserId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Welcome {
    pub referral_link: String,
    /// True when this visit created the user row.
    pub created: bool,
    pub credit: CreditResult,
}

/// Result of [`crate::ReferralLedger::record_visit`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VisitOutcome {
    /// The visitor has not joined the channel yet.
    JoinRequired,
    Welcome(Welcome),
}

impl VisitOutcome {
    pub fn is_welcome(&self) -> bool {
        matches!(self, VisitOutcome::Welcome(_))
    }

    pub fn referral_link(&self) -> Option<&str> {
        match self {
            VisitOutcome::Welcome(w) => Some(&w.referral_link),
            VisitOutcome::JoinRequired => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Leaderboard
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeaderboardEntry {
    pub rank: usize,
    pub user_id: UserId,
    pub username: String,
    pub referral_count: i64,
}

/// Where the caller stands relative to the returned window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallerRank {
    /// The caller appears in `entries` at this rank.
    InTop { rank: usize },
    /// The caller is outside the window.
    Ranked { rank: usize, referral_count: i64 },
    /// No row, or no referrals and outside the window.
    Unranked,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Leaderboard {
    pub entries: Vec<LeaderboardEntry>,
    pub caller: CallerRank,
}
