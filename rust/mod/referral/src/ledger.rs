use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

use reftrack_core::{ServiceError, now_rfc3339};

use crate::gate::MembershipGate;
use crate::link::ReferralLinks;
use crate::model::{
    CallerRank, CreditResult, Leaderboard, User, UserId, Visit, VisitOutcome, Welcome,
};
use crate::store::ReferralStore;

const LOCK_STRIPES: usize = 64;

// ---------------------------------------------------------------------------
// Per-visitor serialization
// ---------------------------------------------------------------------------

/// Striped async locks: two visits by the same user never interleave
/// between the existence check and the insert/credit that follows it.
struct VisitorLocks {
    stripes: Vec<Mutex<()>>,
}

impl VisitorLocks {
    fn new(n: usize) -> Self {
        Self {
            stripes: (0..n.max(1)).map(|_| Mutex::new(())).collect(),
        }
    }

    async fn lock(&self, id: UserId) -> MutexGuard<'_, ()> {
        let idx = id.rem_euclid(self.stripes.len() as i64) as usize;
        self.stripes[idx].lock().await
    }
}

// ---------------------------------------------------------------------------
// ReferralLedger: attribution state machine
// ---------------------------------------------------------------------------

/// Owns users, pending claims and credited counts.
///
/// Visitor states, checked in order:
///
/// ```text
/// gate fails            → record claim (unknown visitor only) → JoinRequired
/// row exists            → no attribution change               → Welcome
/// no row, no referrer   → insert organic user                 → Welcome
/// no row, referrer      → insert referred user, credit +1     → Welcome
/// ```
///
/// The referrer is resolved from the current message first, then from the
/// earliest pending claim. Once a user row exists it is never re-attributed.
pub struct ReferralLedger {
    store: Arc<ReferralStore>,
    gate: Arc<MembershipGate>,
    links: ReferralLinks,
    locks: VisitorLocks,
}

impl ReferralLedger {
    pub fn new(store: Arc<ReferralStore>, gate: Arc<MembershipGate>, links: ReferralLinks) -> Self {
        Self {
            store,
            gate,
            links,
            locks: VisitorLocks::new(LOCK_STRIPES),
        }
    }

    /// Access the underlying store.
    pub fn store(&self) -> &Arc<ReferralStore> {
        &self.store
    }

    pub fn gate(&self) -> &Arc<MembershipGate> {
        &self.gate
    }

    pub fn links(&self) -> &ReferralLinks {
        &self.links
    }

    // =======================================================================
    // Visits
    // =======================================================================

    /// Apply one visit and report what the user should be told.
    ///
    /// Errors are storage failures on the existence check or on the user
    /// insert; everything after the insert is best-effort and logged.
    pub async fn record_visit(&self, visit: &Visit) -> Result<VisitOutcome, ServiceError> {
        let visitor = visit.visitor_id;
        let claimed = match visit.claimed_referrer {
            Some(referrer) if referrer == visitor => {
                warn!(visitor, "ignoring self-referral code");
                None
            }
            other => other,
        };

        // The gate may be slow; query it before taking the visitor lock.
        let gated = self.gate.is_member(visitor).await;

        let _guard = self.locks.lock(visitor).await;
        let existing = self.store.get_user(visitor)?;

        if !gated {
            if existing.is_none() {
                if let Some(referrer) = claimed {
                    self.record_claim(visitor, referrer);
                }
            }
            return Ok(VisitOutcome::JoinRequired);
        }

        match existing {
            Some(user) => Ok(self.welcome_back(user, visit)),
            None => self.create_user(visit, claimed),
        }
    }

    fn record_claim(&self, visitor: UserId, referrer: UserId) {
        match self.store.record_claim(visitor, referrer, &now_rfc3339()) {
            Ok(true) => info!(visitor, referrer, "pending referral claim recorded"),
            Ok(false) => debug!(visitor, referrer, "pending referral claim already recorded"),
            Err(e) => error!(visitor, referrer, "failed to record pending claim: {e}"),
        }
    }

    fn welcome_back(&self, user: User, visit: &Visit) -> VisitOutcome {
        if !visit.username.is_empty() && visit.username != user.username {
            if let Err(e) = self.store.update_username(user.id, &visit.username) {
                warn!(visitor = user.id, "failed to refresh username: {e}");
            }
        }
        VisitOutcome::Welcome(Welcome {
            referral_link: self.links.link_for(user.id),
            created: false,
            credit: CreditResult::NotApplicable,
        })
    }

    fn create_user(
        &self,
        visit: &Visit,
        claimed: Option<UserId>,
    ) -> Result<VisitOutcome, ServiceError> {
        let visitor = visit.visitor_id;
        let referrer = match claimed {
            Some(referrer) => Some(referrer),
            None => self.store.first_claim(visitor)?.map(|c| c.referrer_id),
        }
        .filter(|r| *r != visitor);

        let referral_link = self.links.link_for(visitor);
        let user = User {
            id: visitor,
            username: visit.username.clone(),
            referred: referrer.is_some(),
            referrer,
            referral_count: 0,
            referral_link: referral_link.clone(),
            joined_at: now_rfc3339(),
        };

        if !self.store.insert_user_if_absent(&user)? {
            // Another delivery of this visit created the row first.
            info!(visitor, "user row already present, skipping attribution");
            return Ok(VisitOutcome::Welcome(Welcome {
                referral_link,
                created: false,
                credit: CreditResult::NotApplicable,
            }));
        }
        info!(visitor, referrer = ?referrer, "user created");

        match self.store.consume_claims(visitor) {
            Ok(0) => {}
            Ok(n) => debug!(visitor, consumed = n, "pending claims consumed"),
            Err(e) => warn!(visitor, "failed to consume pending claims: {e}"),
        }

        let credit = match referrer {
            Some(referrer) => self.credit(visitor, referrer),
            None => CreditResult::NotApplicable,
        };

        Ok(VisitOutcome::Welcome(Welcome {
            referral_link,
            created: true,
            credit,
        }))
    }

    /// Add one to the referrer's count. Called once per newly created user.
    fn credit(&self, visitor: UserId, referrer: UserId) -> CreditResult {
        match self.store.increment_referral_count(referrer) {
            Ok(true) => {
                info!(visitor, referrer, "referral credited");
                CreditResult::Credited(referrer)
            }
            Ok(false) => {
                warn!(visitor, referrer, "referrer has no account, credit dropped");
                CreditResult::UnknownReferrer(referrer)
            }
            Err(e) => {
                error!(visitor, referrer, "referral credit failed, needs reconciliation: {e}");
                CreditResult::Failed(referrer)
            }
        }
    }

    // =======================================================================
    // Stats
    // =======================================================================

    /// Credited referrals for a registered user.
    pub fn my_referral_count(&self, user_id: UserId) -> Result<i64, ServiceError> {
        self.store.referral_count(user_id)
    }

    /// Top `limit` referrers plus the caller's own standing.
    pub fn leaderboard(&self, caller: UserId, limit: usize) -> Result<Leaderboard, ServiceError> {
        let entries = self.store.leaderboard_entries(limit)?;

        let caller = match entries.iter().find(|e| e.user_id == caller) {
            Some(e) => CallerRank::InTop { rank: e.rank },
            None => match self.store.rank_of(caller) {
                Ok(Some((rank, referral_count))) if referral_count > 0 => CallerRank::Ranked {
                    rank,
                    referral_count,
                },
                Ok(_) => CallerRank::Unranked,
                Err(e) => {
                    warn!(caller, "caller rank lookup failed: {e}");
                    CallerRank::Unranked
                }
            },
        };

        Ok(Leaderboard { entries, caller })
    }
}
