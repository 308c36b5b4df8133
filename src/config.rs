use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;

/// What `NotificationChannel::initialize` does about the welcome notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WelcomePolicy {
    /// Greet on every initialization (the behavior dashboards have today).
    Every,
    /// Greet only if the account has no welcome notification yet.
    Once,
    Off,
}

impl FromStr for WelcomePolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "every" | "always" => Ok(WelcomePolicy::Every),
            "once" => Ok(WelcomePolicy::Once),
            "off" | "never" => Ok(WelcomePolicy::Off),
            other => anyhow::bail!("unknown welcome policy '{}' (expected every, once or off)", other),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub supabase_url: String,
    pub anon_key: String,
    /// Pause between NGO profile insert and the automatic sign-in.
    /// Set via CAREBLOOM_NGO_LOGIN_DELAY_MS. Default: 1000.
    pub ngo_login_delay: Duration,
    pub toast_ttl: Duration,
    pub toast_exit: Duration,
    /// Unread notifications rendered on initialize. Default: 5.
    pub backlog_limit: usize,
    pub welcome: WelcomePolicy,
    pub http_timeout: Duration,
    /// Extra attempts for idempotent reads. 0 = disabled.
    pub read_retries: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            supabase_url: "http://localhost:54321".into(),
            anon_key: String::new(),
            ngo_login_delay: Duration::from_millis(1000),
            toast_ttl: Duration::from_millis(5000),
            toast_exit: Duration::from_millis(300),
            backlog_limit: 5,
            welcome: WelcomePolicy::Every,
            http_timeout: Duration::from_secs(10),
            read_retries: 2,
        }
    }
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();

    let supabase_url = std::env::var("SUPABASE_URL")
        .context("SUPABASE_URL must point at the CareBloom project")?;
    let anon_key = std::env::var("SUPABASE_ANON_KEY")
        .context("SUPABASE_ANON_KEY must be set to the project's public anon key")?;

    let defaults = Config::default();

    Ok(Config {
        supabase_url: supabase_url.trim_end_matches('/').to_string(),
        anon_key,
        ngo_login_delay: env_millis("CAREBLOOM_NGO_LOGIN_DELAY_MS").unwrap_or(defaults.ngo_login_delay),
        toast_ttl: env_millis("CAREBLOOM_TOAST_TTL_MS").unwrap_or(defaults.toast_ttl),
        toast_exit: env_millis("CAREBLOOM_TOAST_EXIT_MS").unwrap_or(defaults.toast_exit),
        backlog_limit: std::env::var("CAREBLOOM_BACKLOG_LIMIT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.backlog_limit),
        welcome: match std::env::var("CAREBLOOM_WELCOME") {
            Ok(v) => v.parse()?,
            Err(_) => defaults.welcome,
        },
        http_timeout: std::env::var("CAREBLOOM_HTTP_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.http_timeout),
        read_retries: std::env::var("CAREBLOOM_READ_RETRIES")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.read_retries),
    })
}

fn env_millis(key: &str) -> Option<Duration> {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Duration::from_millis)
}
