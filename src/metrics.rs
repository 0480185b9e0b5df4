use std::{
    sync::Arc,
    sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    time::Instant,
};

use once_cell::sync::Lazy;

pub static METRICS: Lazy<Arc<Metrics>> = Lazy::new(|| Arc::new(Metrics::new()));

#[derive(Debug)]
pub struct Metrics {
    start: Instant,
    ready: AtomicBool,
    sessions: AtomicUsize,
    connected_guilds: AtomicUsize,
    total_queue_len: AtomicUsize,
    tracks_started: AtomicU64,
    entitlement_hits: AtomicU64,
    entitlement_misses: AtomicU64,
    entitlement_fallbacks: AtomicU64,
}

impl Metrics {
    fn new() -> Self {
        Self {
            start: Instant::now(),
            ready: AtomicBool::new(false),
            sessions: AtomicUsize::new(0),
            connected_guilds: AtomicUsize::new(0),
            total_queue_len: AtomicUsize::new(0),
            tracks_started: AtomicU64::new(0),
            entitlement_hits: AtomicU64::new(0),
            entitlement_misses: AtomicU64::new(0),
            entitlement_fallbacks: AtomicU64::new(0),
        }
    }

    pub fn set_ready(&self, v: bool) {
        self.ready.store(v, Ordering::Relaxed);
    }
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }

    pub fn inc_sessions(&self) {
        self.sessions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_connections(&self) {
        self.connected_guilds.fetch_add(1, Ordering::Relaxed);
    }
    pub fn dec_connections(&self) {
        let _ = self
            .connected_guilds
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |x| {
                Some(x.saturating_sub(1))
            });
    }

    pub fn inc_queue(&self, n: usize) {
        self.total_queue_len.fetch_add(n, Ordering::Relaxed);
    }
    pub fn dec_queue(&self, n: usize) {
        let _ = self
            .total_queue_len
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |x| {
                Some(x.saturating_sub(n))
            });
    }

    pub fn inc_tracks_started(&self) {
        self.tracks_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_entitlement_hit(&self) {
        self.entitlement_hits.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_entitlement_miss(&self) {
        self.entitlement_misses.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_entitlement_fallback(&self) {
        self.entitlement_fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_secs: self.start.elapsed().as_secs(),
            ready: self.is_ready(),
            sessions: self.sessions.load(Ordering::Relaxed),
            connected_guilds: self.connected_guilds.load(Ordering::Relaxed),
            total_queue_len: self.total_queue_len.load(Ordering::Relaxed),
            tracks_started: self.tracks_started.load(Ordering::Relaxed),
            entitlement_hits: self.entitlement_hits.load(Ordering::Relaxed),
            entitlement_misses: self.entitlement_misses.load(Ordering::Relaxed),
            entitlement_fallbacks: self.entitlement_fallbacks.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub ready: bool,
    pub sessions: usize,
    pub connected_guilds: usize,
    pub total_queue_len: usize,
    pub tracks_started: u64,
    pub entitlement_hits: u64,
    pub entitlement_misses: u64,
    pub entitlement_fallbacks: u64,
}

impl MetricsSnapshot {
    /// Prometheus text exposition.
    pub fn render(&self) -> String {
        format!(
            concat!(
                "# HELP maqam_uptime_seconds Seconds since process start\n",
                "# TYPE maqam_uptime_seconds counter\n",
                "maqam_uptime_seconds {}\n",
                "# HELP maqam_ready 1 if ready, 0 otherwise\n",
                "# TYPE maqam_ready gauge\n",
                "maqam_ready {}\n",
                "# HELP maqam_sessions Guild sessions created since start\n",
                "# TYPE maqam_sessions gauge\n",
                "maqam_sessions {}\n",
                "# HELP maqam_connected_guilds Guilds with a ready voice connection\n",
                "# TYPE maqam_connected_guilds gauge\n",
                "maqam_connected_guilds {}\n",
                "# HELP maqam_total_queue_len Tracks waiting across all queues (approx)\n",
                "# TYPE maqam_total_queue_len gauge\n",
                "maqam_total_queue_len {}\n",
                "# HELP maqam_tracks_started_total Tracks that started rendering\n",
                "# TYPE maqam_tracks_started_total counter\n",
                "maqam_tracks_started_total {}\n",
                "# HELP maqam_entitlement_lookups_total Entitlement lookups by outcome\n",
                "# TYPE maqam_entitlement_lookups_total counter\n",
                "maqam_entitlement_lookups_total{{outcome=\"hit\"}} {}\n",
                "maqam_entitlement_lookups_total{{outcome=\"miss\"}} {}\n",
                "maqam_entitlement_lookups_total{{outcome=\"fallback\"}} {}\n"
            ),
            self.uptime_secs,
            if self.ready { 1 } else { 0 },
            self.sessions,
            self.connected_guilds,
            self.total_queue_len,
            self.tracks_started,
            self.entitlement_hits,
            self.entitlement_misses,
            self.entitlement_fallbacks,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_includes_entitlement_outcomes() {
        let m = Metrics::new();
        m.inc_entitlement_hit();
        m.inc_entitlement_hit();
        m.inc_entitlement_fallback();
        m.dec_queue(5);
        let body = m.snapshot().render();
        assert!(body.contains("maqam_entitlement_lookups_total{outcome=\"hit\"} 2\n"));
        assert!(body.contains("maqam_entitlement_lookups_total{outcome=\"fallback\"} 1\n"));
        assert!(body.contains("maqam_total_queue_len 0\n"));
    }
}
