use std::sync::Arc;

use tracing::{debug, error, info};

use referral::{ReferralLedger, Visit, VisitOutcome, parse_referral_code};
use reftrack_core::ServiceError;

use crate::commands::{Command, InboundEvent};
use crate::replies;

/// Routes inbound commands to the ledger and renders the reply.
pub struct Dispatcher {
    ledger: Arc<ReferralLedger>,
    leaderboard_size: usize,
}

impl Dispatcher {
    pub fn new(ledger: Arc<ReferralLedger>, leaderboard_size: usize) -> Self {
        Self {
            ledger,
            leaderboard_size,
        }
    }

    /// Exactly one reply per event.
    ///
    /// Every command counts as a visit, so a visitor with a parked claim is
    /// registered and their referrer credited by whatever they send first
    /// after joining.
    pub async fn handle(&self, ev: &InboundEvent) -> String {
        let (command, referrer) = match &ev.command {
            Command::Start(arg) => {
                let referrer = parse_referral_code(arg);
                if referrer.is_none() && !arg.is_empty() {
                    debug!(visitor = ev.visitor_id, code = %arg, "ignoring malformed referral code");
                }
                ("start", referrer)
            }
            Command::MyReferrals => ("myreferrals", None),
            Command::Stats => ("stats", None),
        };

        let visit = Visit::new(ev.visitor_id, ev.username.clone()).with_referrer(referrer);
        let welcome = match self.ledger.record_visit(&visit).await {
            Ok(VisitOutcome::JoinRequired) => {
                return replies::join_prompt(self.ledger.gate().channel());
            }
            Ok(VisitOutcome::Welcome(w)) => w,
            Err(e) => return self.failed(ev, command, e),
        };
        if welcome.created {
            info!(visitor = ev.visitor_id, credit = ?welcome.credit, "new user registered");
        }

        match &ev.command {
            Command::Start(_) => replies::welcome(&welcome.referral_link),
            Command::MyReferrals => match self.ledger.my_referral_count(ev.visitor_id) {
                Ok(n) => replies::referral_count(n),
                Err(e) => self.failed(ev, command, e),
            },
            Command::Stats => match self.ledger.leaderboard(ev.visitor_id, self.leaderboard_size) {
                Ok(board) => replies::leaderboard(&board),
                Err(e) => self.failed(ev, command, e),
            },
        }
    }

    fn failed(&self, ev: &InboundEvent, command: &str, e: ServiceError) -> String {
        match &e {
            ServiceError::NotFound(_) => {
                debug!(visitor = ev.visitor_id, command, "unregistered user: {e}")
            }
            _ => error!(
                visitor = ev.visitor_id,
                chat = ev.chat_id,
                command,
                code = e.error_code(),
                "command failed: {e}"
            ),
        }
        replies::failure(&e)
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{FlakyDb, dispatcher, dispatcher_on, event};
    use super::*;

    fn start(id: i64, name: &str, arg: &str) -> InboundEvent {
        event(id, name, Command::Start(arg.into()))
    }

    #[tokio::test]
    async fn non_member_gets_join_prompt() {
        let (d, _members) = dispatcher();
        let reply = d.handle(&start(42, "alice", "7")).await;
        assert!(reply.contains("@CNCSMEMES"));
    }

    #[tokio::test]
    async fn referral_flow_end_to_end() {
        let (d, members) = dispatcher();
        members.join(7);
        members.join(42);

        let reply = d.handle(&start(7, "bob", "")).await;
        assert!(reply.contains("https://t.me/Meme_receiver_bot?start=7"));

        let reply = d.handle(&start(42, "alice", "ref_7")).await;
        assert!(reply.contains("https://t.me/Meme_receiver_bot?start=42"));

        let reply = d.handle(&event(7, "bob", Command::MyReferrals)).await;
        assert_eq!(reply, "You have referred 1 people.");

        let reply = d.handle(&event(42, "alice", Command::Stats)).await;
        assert!(reply.contains("bob"));
        assert!(reply.ends_with("You are #2."));
    }

    #[tokio::test]
    async fn claim_parked_until_join() {
        let (d, members) = dispatcher();
        members.join(7);
        d.handle(&start(7, "bob", "")).await;

        let reply = d.handle(&start(42, "alice", "7")).await;
        assert!(reply.contains("join our channel"));

        members.join(42);
        d.handle(&start(42, "alice", "")).await;
        assert_eq!(
            d.handle(&event(7, "bob", Command::MyReferrals)).await,
            "You have referred 1 people."
        );
    }

    #[tokio::test]
    async fn malformed_code_is_organic() {
        let (d, members) = dispatcher();
        members.join(7);
        members.join(42);
        d.handle(&start(7, "bob", "")).await;
        d.handle(&start(42, "alice", "abc")).await;
        assert_eq!(
            d.handle(&event(7, "bob", Command::MyReferrals)).await,
            "You have referred 0 people."
        );
    }

    #[tokio::test]
    async fn any_command_after_join_registers_and_credits() {
        let (d, members) = dispatcher();
        members.join(7);
        d.handle(&start(7, "bob", "")).await;

        let reply = d.handle(&start(42, "alice", "7")).await;
        assert!(reply.contains("join our channel"));

        members.join(42);
        let reply = d.handle(&event(42, "alice", Command::MyReferrals)).await;
        assert_eq!(reply, "You have referred 0 people.");
        assert_eq!(
            d.handle(&event(7, "bob", Command::MyReferrals)).await,
            "You have referred 1 people."
        );
    }

    #[tokio::test]
    async fn stats_after_join_credits_parked_claim() {
        let (d, members) = dispatcher();
        members.join(7);
        d.handle(&start(7, "bob", "")).await;
        d.handle(&start(42, "alice", "7")).await;

        members.join(42);
        let reply = d.handle(&event(42, "alice", Command::Stats)).await;
        assert!(reply.contains("bob                  1"));
        assert!(reply.ends_with("You are #2."));
    }

    #[tokio::test]
    async fn read_only_commands_are_gated() {
        let (d, _members) = dispatcher();
        let reply = d.handle(&event(99, "ghost", Command::MyReferrals)).await;
        assert!(reply.contains("@CNCSMEMES"));
        let reply = d.handle(&event(99, "ghost", Command::Stats)).await;
        assert!(reply.contains("@CNCSMEMES"));
    }

    #[tokio::test]
    async fn member_without_row_is_registered_by_stats() {
        let (d, members) = dispatcher();
        members.join(99);
        let reply = d.handle(&event(99, "ghost", Command::Stats)).await;
        assert!(reply.contains("ghost"));
        assert!(reply.ends_with("You are #1."));
    }

    #[tokio::test]
    async fn storage_failure_gets_generic_reply() {
        let db = Arc::new(FlakyDb::new());
        let (d, members) = dispatcher_on(db.clone());
        members.join(7);
        d.handle(&start(7, "bob", "")).await;

        db.fail_on("SELECT referral_count FROM users");
        let reply = d.handle(&event(7, "bob", Command::MyReferrals)).await;
        assert_eq!(reply, "Something went wrong, please try again later.");

        db.fail_on("ORDER BY referral_count DESC");
        let reply = d.handle(&event(7, "bob", Command::Stats)).await;
        assert_eq!(reply, "Something went wrong, please try again later.");

        db.fail_on("FROM users");
        let reply = d.handle(&start(7, "bob", "")).await;
        assert_eq!(reply, "Something went wrong, please try again later.");
    }
}
