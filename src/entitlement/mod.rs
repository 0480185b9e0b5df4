//! Per-guild premium entitlement: the billing service client and the
//! fail-open cache that gates playback.

mod cache;
mod client;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serenity::all::GuildId;

use crate::error::UpstreamError;

pub use cache::{EntitlementCache, EntitlementRecord};
pub use client::{PremiumApi, Unconfigured};

/// Subscription state as reported by the billing service.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PremiumStatus {
    pub active: bool,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait EntitlementSource: Send + Sync {
    async fn fetch_status(&self, guild_id: GuildId) -> Result<PremiumStatus, UpstreamError>;
}

/// Time left on a subscription; zero when there is no expiry or it has passed.
pub fn remaining(expires_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Duration {
    expires_at
        .and_then(|at| (at - now).to_std().ok())
        .unwrap_or(Duration::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn remaining_is_never_negative() {
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let later = Utc.with_ymd_and_hms(2025, 1, 2, 0, 0, 0).unwrap();
        assert_eq!(remaining(Some(later), now), Duration::from_secs(86_400));
        assert_eq!(remaining(Some(now), later), Duration::ZERO);
        assert_eq!(remaining(None, now), Duration::ZERO);
    }
}
