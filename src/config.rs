use std::{path::PathBuf, str::FromStr, time::Duration};

use anyhow::{Result, anyhow};
use tracing::warn;

pub fn read_discord_token() -> Result<String> {
    const CANDIDATES: &[&str] = &[
        "DISCORD_TOKEN",
        "DISCORD_BOT_TOKEN",
        "BOT_TOKEN",
        "DOCKER_TOKEN",
    ];
    for key in CANDIDATES {
        if let Ok(val) = std::env::var(key)
            && !val.is_empty()
        {
            return Ok(val);
        }
    }
    Err(anyhow!(
        "Set one of DISCORD_TOKEN, DISCORD_BOT_TOKEN, BOT_TOKEN, or DOCKER_TOKEN in environment"
    ))
}

/// Runtime settings, read once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub token: String,
    /// Base URL of the entitlement service; `None` disables premium lookups
    /// (every guild is then treated as not entitled).
    pub api_base: Option<String>,
    pub api_key: String,
    pub owner_id: Option<u64>,
    pub premium_ttl: Duration,
    pub http_timeout: Duration,
    pub connect_timeout: Duration,
    pub progress_interval: Duration,
    pub default_volume: u8,
    pub playlists_dir: PathBuf,
    pub http_bind: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let token = read_discord_token()?;
        let api_base = std::env::var("MAQAM_API_BASE")
            .ok()
            .map(|s| s.trim_end_matches('/').to_string())
            .filter(|s| !s.is_empty());
        if api_base.is_none() {
            warn!("MAQAM_API_BASE not set; premium checks will report every guild as inactive");
        }
        let owner_id = std::env::var("MAQAM_OWNER_ID")
            .ok()
            .and_then(|s| s.trim().parse::<u64>().ok());

        Ok(Self {
            token,
            api_base,
            api_key: std::env::var("MAQAM_API_KEY").unwrap_or_default(),
            owner_id,
            premium_ttl: Duration::from_secs(env_or("MAQAM_PREMIUM_TTL_SECS", 240)),
            http_timeout: Duration::from_secs(env_or("MAQAM_HTTP_TIMEOUT_SECS", 10)),
            connect_timeout: Duration::from_secs(env_or("MAQAM_CONNECT_TIMEOUT_SECS", 15)),
            progress_interval: Duration::from_secs(
                env_or::<u64>("MAQAM_PROGRESS_INTERVAL_SECS", 10).max(1),
            ),
            default_volume: env_or::<u8>("MAQAM_DEFAULT_VOLUME", 80).min(100),
            playlists_dir: playlists_dir()?,
            http_bind: std::env::var("MAQAM_HTTP_BIND").ok(),
        })
    }
}

fn playlists_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var("MAQAM_PLAYLISTS_DIR") {
        let p = PathBuf::from(dir);
        if p.is_absolute() {
            return Ok(p);
        }
        return Ok(std::env::current_dir()?.join(p));
    }
    let base = dirs::data_dir().ok_or_else(|| anyhow!("no data dir available on this system"))?;
    Ok(base.join("maqam").join("playlists"))
}

fn env_or<T: FromStr + Copy + std::fmt::Display>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => parse_or(key, &raw, default),
        Err(_) => default,
    }
}

fn parse_or<T: FromStr + Copy + std::fmt::Display>(key: &str, raw: &str, default: T) -> T {
    match raw.trim().parse::<T>() {
        Ok(v) => v,
        Err(_) => {
            warn!("{key}={raw:?} is not valid, using {default}");
            default
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_numbers_fall_back_to_default() {
        assert_eq!(parse_or::<u64>("X", "abc", 240), 240);
        assert_eq!(parse_or::<u64>("X", " 30 ", 240), 30);
        assert_eq!(parse_or::<u8>("X", "300", 80), 80);
    }
}
