//! Bot configuration, loaded from a TOML file.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use referral::GatePolicy;

use crate::poller::PollConfig;

pub const TOKEN_ENV: &str = "TELEGRAM_BOT_TOKEN";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BotConfig {
    #[serde(default)]
    pub telegram: TelegramSection,
    #[serde(default)]
    pub storage: StorageSection,
    #[serde(default)]
    pub gate: GateSection,
    #[serde(default)]
    pub poll: PollSection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramSection {
    /// Usually supplied through `TELEGRAM_BOT_TOKEN` instead.
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub bot_handle: String,
    #[serde(default)]
    pub channel: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// Bound on every Bot API call except the long poll.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for TelegramSection {
    fn default() -> Self {
        Self {
            token: String::new(),
            bot_handle: String::new(),
            channel: String::new(),
            api_base: default_api_base(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

fn default_api_base() -> String {
    crate::telegram::DEFAULT_API_BASE.to_string()
}

fn default_request_timeout() -> u64 {
    crate::telegram::DEFAULT_REQUEST_TIMEOUT.as_secs()
}

impl TelegramSection {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageSection {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

fn default_data_dir() -> String {
    "./data".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct GateSection {
    #[serde(default = "default_gate_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_gate_attempts")]
    pub attempts: u32,
    #[serde(default = "default_gate_backoff_ms")]
    pub backoff_ms: u64,
}

impl Default for GateSection {
    fn default() -> Self {
        Self {
            timeout_ms: default_gate_timeout_ms(),
            attempts: default_gate_attempts(),
            backoff_ms: default_gate_backoff_ms(),
        }
    }
}

fn default_gate_timeout_ms() -> u64 {
    5_000
}
fn default_gate_attempts() -> u32 {
    3
}
fn default_gate_backoff_ms() -> u64 {
    200
}

impl GateSection {
    pub fn policy(&self) -> GatePolicy {
        let initial_backoff = Duration::from_millis(self.backoff_ms);
        GatePolicy {
            timeout: Duration::from_millis(self.timeout_ms),
            attempts: self.attempts,
            initial_backoff,
            max_backoff: initial_backoff * 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PollSection {
    #[serde(default = "default_poll_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_leaderboard_size")]
    pub leaderboard_size: usize,
}

impl Default for PollSection {
    fn default() -> Self {
        Self {
            timeout_secs: default_poll_timeout(),
            leaderboard_size: default_leaderboard_size(),
        }
    }
}

fn default_poll_timeout() -> u64 {
    60
}
fn default_leaderboard_size() -> usize {
    10
}

impl PollSection {
    pub fn poll_config(&self) -> PollConfig {
        PollConfig {
            timeout_secs: self.timeout_secs,
            ..PollConfig::default()
        }
    }
}

impl BotConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read {}: {}", path.display(), e))?;
        let config: BotConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Environment token wins over the file.
    pub fn apply_token_override(&mut self, token: Option<String>) {
        if let Some(token) = token.filter(|t| !t.is_empty()) {
            self.telegram.token = token;
        }
    }
}

/// Refuse to start with settings the bot cannot run without.
pub fn verify_config(config: &BotConfig) -> anyhow::Result<()> {
    if config.telegram.token.is_empty() {
        anyhow::bail!(
            "Telegram bot token is empty.\n\
             Set {TOKEN_ENV} or [telegram].token in the configuration."
        );
    }
    if config.telegram.bot_handle.trim_start_matches('@').is_empty() {
        anyhow::bail!("[telegram].bot_handle is empty in configuration.");
    }
    if config.telegram.channel.is_empty() {
        anyhow::bail!("[telegram].channel is empty in configuration.");
    }
    if config.telegram.request_timeout_secs == 0 {
        anyhow::bail!("[telegram].request_timeout_secs must be at least 1.");
    }
    if config.storage.data_dir.is_empty() {
        anyhow::bail!("Storage data_dir is empty in configuration.");
    }
    if config.poll.leaderboard_size == 0 {
        anyhow::bail!("[poll].leaderboard_size must be at least 1.");
    }
    Ok(())
}
