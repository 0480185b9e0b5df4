use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, PoisonError, RwLock, RwLockWriteGuard,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use chrono::{DateTime, Utc};
use serenity::all::GuildId;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::{EntitlementSource, PremiumStatus};
use crate::metrics::METRICS;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntitlementRecord {
    pub active: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub fetched_at: Instant,
}

impl EntitlementRecord {
    fn inactive(now: Instant) -> Self {
        Self {
            active: false,
            expires_at: None,
            fetched_at: now,
        }
    }

    fn from_status(status: PremiumStatus, now: Instant) -> Self {
        Self {
            active: status.active,
            expires_at: status.expires_at,
            fetched_at: now,
        }
    }

    fn is_fresh(&self, ttl: Duration, now: Instant) -> bool {
        now.saturating_duration_since(self.fetched_at) < ttl
    }
}

/// Process-wide, time-boxed view of every guild's entitlement.
///
/// Lookups never fail: when the billing service cannot be reached the last
/// known record is served, and a guild that was never fetched is reported as
/// not entitled. Playback is a soft gate, so availability wins over freshness.
///
/// Concurrent misses for one guild are coalesced behind a per-guild refresh
/// slot. A caller that queued behind an upstream attempt takes that attempt's
/// outcome, failed or not, so a lookup waits for at most one upstream call.
pub struct EntitlementCache {
    source: Arc<dyn EntitlementSource>,
    ttl: Duration,
    records: RwLock<HashMap<GuildId, EntitlementRecord>>,
    refreshing: Mutex<HashMap<GuildId, Arc<RefreshSlot>>>,
}

#[derive(Default)]
struct RefreshSlot {
    /// Upstream attempts finished for this guild; read before queueing.
    completed: AtomicU64,
    last: tokio::sync::Mutex<Option<Attempt>>,
}

#[derive(Clone)]
struct Attempt {
    record: EntitlementRecord,
    failed: bool,
}

impl EntitlementCache {
    pub fn new(source: Arc<dyn EntitlementSource>, ttl: Duration) -> Self {
        Self {
            source,
            ttl,
            records: RwLock::new(HashMap::new()),
            refreshing: Mutex::new(HashMap::new()),
        }
    }

    pub async fn get_entitlement(&self, guild_id: GuildId, force_refresh: bool) -> EntitlementRecord {
        if !force_refresh
            && let Some(record) = self.cached(guild_id)
            && record.is_fresh(self.ttl, Instant::now())
        {
            METRICS.inc_entitlement_hit();
            return record;
        }

        let slot = self.refresh_slot(guild_id);
        let seen = slot.completed.load(Ordering::Acquire);
        let mut last = slot.last.lock().await;

        // An attempt finished while we queued; its outcome is as new as ours would be.
        if slot.completed.load(Ordering::Acquire) != seen
            && let Some(attempt) = last.as_ref()
        {
            if attempt.failed {
                METRICS.inc_entitlement_fallback();
            } else {
                METRICS.inc_entitlement_hit();
            }
            return attempt.record.clone();
        }
        if !force_refresh
            && let Some(record) = self.cached(guild_id)
            && record.is_fresh(self.ttl, Instant::now())
        {
            METRICS.inc_entitlement_hit();
            return record;
        }

        METRICS.inc_entitlement_miss();
        let attempt = match self.source.fetch_status(guild_id).await {
            Ok(status) => {
                let record = EntitlementRecord::from_status(status, Instant::now());
                debug!(%guild_id, active = record.active, "entitlement refreshed");
                self.write_records().insert(guild_id, record.clone());
                Attempt {
                    record,
                    failed: false,
                }
            }
            Err(e) => {
                METRICS.inc_entitlement_fallback();
                let record = match self.cached(guild_id) {
                    Some(stale) => {
                        warn!(%guild_id, "entitlement refresh failed, serving stale record: {e}");
                        stale
                    }
                    None => {
                        warn!(%guild_id, "entitlement refresh failed, treating as inactive: {e}");
                        EntitlementRecord::inactive(Instant::now())
                    }
                };
                Attempt {
                    record,
                    failed: true,
                }
            }
        };
        let record = attempt.record.clone();
        *last = Some(attempt);
        slot.completed.fetch_add(1, Ordering::Release);
        record
    }

    /// Drops the cached record so the next lookup goes upstream. Call after
    /// every successful extend/set.
    pub fn invalidate(&self, guild_id: GuildId) {
        self.write_records().remove(&guild_id);
    }

    fn cached(&self, guild_id: GuildId) -> Option<EntitlementRecord> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&guild_id)
            .cloned()
    }

    fn write_records(&self) -> RwLockWriteGuard<'_, HashMap<GuildId, EntitlementRecord>> {
        self.records.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn refresh_slot(&self, guild_id: GuildId) -> Arc<RefreshSlot> {
        self.refreshing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(guild_id)
            .or_default()
            .clone()
    }
}
