//! Referral attribution for a channel-gated chat bot.
//!
//! A visitor presents an optional referral code. Until they join the gated
//! channel the code is parked as a pending claim; on the first visit that
//! passes the gate a user row is created and the referrer is credited once.
//! The transport (Telegram, tests, ...) only has to supply a
//! [`MembershipOracle`] and feed [`Visit`]s to the [`ReferralLedger`].

pub mod gate;
pub mod ledger;
pub mod link;
pub mod model;
pub mod store;

use std::sync::Arc;

use reftrack_core::ServiceError;
use reftrack_sql::SQLStore;

pub use gate::{GateError, GatePolicy, MemberStatus, MembershipGate, MembershipOracle};
pub use ledger::ReferralLedger;
pub use link::{ReferralLinks, parse_referral_code};
pub use model::{
    CallerRank, CreditResult, Leaderboard, LeaderboardEntry, PendingClaim, User, UserId, Visit,
    VisitOutcome, Welcome,
};
pub use store::ReferralStore;

/// Settings the referral module needs from the host binary.
#[derive(Debug, Clone)]
pub struct ReferralConfig {
    /// Public bot handle used in referral links (with or without `@`).
    pub bot_handle: String,
    /// Channel visitors must join, e.g. `@CNCSMEMES`.
    pub channel: String,
    pub gate_policy: GatePolicy,
}

/// The referral module: store, gate and ledger wired together.
pub struct ReferralModule {
    ledger: Arc<ReferralLedger>,
}

impl ReferralModule {
    /// Initialise storage and build the ledger around the given oracle.
    pub fn new(
        db: Arc<dyn SQLStore>,
        oracle: Arc<dyn MembershipOracle>,
        config: ReferralConfig,
    ) -> Result<Self, ServiceError> {
        let store = Arc::new(ReferralStore::new(db)?);
        let gate = Arc::new(MembershipGate::with_policy(
            oracle,
            config.channel,
            config.gate_policy,
        ));
        let ledger = Arc::new(ReferralLedger::new(
            store,
            gate,
            ReferralLinks::new(config.bot_handle),
        ));
        Ok(Self { ledger })
    }

    /// Get a reference to the ledger for dispatching visits and stats queries.
    pub fn ledger(&self) -> &Arc<ReferralLedger> {
        &self.ledger
    }

    pub fn name(&self) -> &str {
        "referral"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::testing::FakeOracle;
    use reftrack_sql::SqliteStore;

    #[tokio::test]
    async fn module_wires_ledger() {
        let db: Arc<dyn SQLStore> = Arc::new(SqliteStore::open_in_memory().unwrap());
        let oracle = Arc::new(FakeOracle::new());
        oracle.join(1);
        let module = ReferralModule::new(
            db,
            oracle,
            ReferralConfig {
                bot_handle: "@demo_bot".into(),
                channel: "@demo".into(),
                gate_policy: GatePolicy::default(),
            },
        )
        .unwrap();

        assert_eq!(module.name(), "referral");
        assert_eq!(module.ledger().gate().channel(), "@demo");
        let out = module.ledger().record_visit(&Visit::new(1, "one")).await.unwrap();
        assert_eq!(out.referral_link(), Some("https://t.me/demo_bot?start=1"));
    }
}
