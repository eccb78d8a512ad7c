//! User-facing reply texts.

use std::fmt::Write as _;

use referral::{CallerRank, Leaderboard, LeaderboardEntry};
use reftrack_core::ServiceError;

pub fn join_prompt(channel: &str) -> String {
    format!(
        "Please join our channel {channel} before using the bot. \
         After joining, send any command here."
    )
}

pub fn welcome(referral_link: &str) -> String {
    format!(
        "Welcome! Share this link with your friends:\n\n{referral_link}\n\n\
         Every friend who joins through it counts towards your referrals."
    )
}

pub fn referral_count(n: i64) -> String {
    format!("You have referred {n} people.")
}

pub fn failure(err: &ServiceError) -> String {
    err.user_message().to_string()
}

/// Fixed-width `Rank / Username / Referrals` table.
pub fn leaderboard_table(entries: &[LeaderboardEntry]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{:<5} {:<20} {:<10}", "Rank", "Username", "Referrals");
    for e in entries {
        let name = if e.username.is_empty() {
            "(no username)"
        } else {
            e.username.as_str()
        };
        let _ = writeln!(out, "{:<5} {:<20} {:<10}", e.rank, name, e.referral_count);
    }
    if entries.is_empty() {
        out.push_str("No referrers yet.\n");
    }
    out
}

/// Machine-readable form of the table for the offline `leaderboard --json`.
pub fn leaderboard_json(entries: &[LeaderboardEntry]) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(entries)
}

/// The table plus a footer with the caller's own standing.
pub fn leaderboard(board: &Leaderboard) -> String {
    let mut out = leaderboard_table(&board.entries);
    out.push('\n');
    out.push_str(&match board.caller {
        CallerRank::InTop { rank } => format!("You are #{rank}."),
        CallerRank::Ranked {
            rank,
            referral_count,
        } => format!("You are #{rank} with {referral_count} referrals."),
        CallerRank::Unranked => "You are unranked.".to_string(),
    });
    out
}
