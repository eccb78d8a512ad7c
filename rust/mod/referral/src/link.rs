use crate::model::UserId;

/// Builds the deep links users share to invite others.
///
/// The link is a pure function of the bot handle and the user id, so it can
/// be cached in the user row and regenerated at any time.
#[derive(Debug, Clone)]
pub struct ReferralLinks {
    bot_handle: String,
}

impl ReferralLinks {
    pub fn new(bot_handle: impl Into<String>) -> Self {
        let handle = bot_handle.into();
        Self {
            bot_handle: handle.trim_start_matches('@').to_string(),
        }
    }

    pub fn bot_handle(&self) -> &str {
        &self.bot_handle
    }

    pub fn link_for(&self, user_id: UserId) -> String {
        format!("https://t.me/{}?start={}", self.bot_handle, user_id)
    }
}

/// Parse the argument of `/start` into a referrer id.
///
/// Accepts a bare id (`7`) or a prefixed one (`ref=7`, `ref_7`). Anything
/// else, including zero and negative ids, is an organic visit.
pub fn parse_referral_code(arg: &str) -> Option<UserId> {
    let arg = arg.trim();
    let digits = arg
        .strip_prefix("ref=")
        .or_else(|| arg.strip_prefix("ref_"))
        .unwrap_or(arg);
    match digits.parse::<UserId>() {
        Ok(id) if id > 0 => Some(id),
        _ => None,
    }
}
