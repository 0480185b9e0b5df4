//! "Now playing" side channel.

use std::{sync::Arc, time::Duration};

use anyhow::Result;
use async_trait::async_trait;
use serenity::all::{ChannelId, MessageId};
use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tracing::debug;

use crate::{
    track::{Track, format_clock},
    voice::PlayerHandle,
};

/// Where a status message lives once it has been posted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusTarget {
    pub channel_id: ChannelId,
    pub message_id: MessageId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NowPlaying {
    pub track: Track,
    pub elapsed: Duration,
}

impl NowPlaying {
    pub fn render(&self) -> String {
        let elapsed = format_clock(self.elapsed);
        match self.track.duration {
            Some(total) if !total.is_zero() => {
                let percent = (self.elapsed.as_secs_f64() / total.as_secs_f64() * 100.0)
                    .clamp(0.0, 100.0) as u8;
                format!(
                    "🎶 **{}**\n{} {} / {}",
                    self.track.title,
                    text_bar(percent),
                    elapsed,
                    format_clock(total)
                )
            }
            _ => format!("🎶 **{}**\n{}", self.track.title, elapsed),
        }
    }
}

fn text_bar(percent: u8) -> String {
    // 20-wide bar
    let total = 20u8;
    let filled = ((percent as u16 * total as u16) / 100) as u8;
    let mut s = String::with_capacity((total as usize) * 3 + 2);
    s.push('[');
    for i in 0..total {
        if i < filled {
            s.push('█');
        } else {
            s.push('─');
        }
    }
    s.push(']');
    s
}

/// Publishes now-playing status somewhere a user can see it.
#[async_trait]
pub trait StatusSink: Send + Sync {
    /// Posts a fresh status message and returns where it landed.
    async fn announce(&self, channel_id: ChannelId, status: &NowPlaying) -> Result<StatusTarget>;
    /// Rewrites a previously announced message.
    async fn update(&self, target: &StatusTarget, status: &NowPlaying) -> Result<()>;
}

struct ActiveTimer {
    generation: u64,
    task: JoinHandle<()>,
}

/// Owns at most one periodic status task per session.
pub struct ProgressReporter {
    interval: Duration,
    active: Option<ActiveTimer>,
}

impl ProgressReporter {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            active: None,
        }
    }

    /// Starts ticking for the track identified by `generation`, cancelling
    /// whatever timer was running before.
    pub fn start(
        &mut self,
        generation: u64,
        target: StatusTarget,
        track: Track,
        player: Arc<dyn PlayerHandle>,
        sink: Arc<dyn StatusSink>,
    ) {
        self.stop();
        let period = self.interval;
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The announcement already showed 0:00.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(elapsed) = player.position().await else {
                    continue;
                };
                let status = NowPlaying {
                    track: track.clone(),
                    elapsed,
                };
                if let Err(e) = sink.update(&target, &status).await {
                    debug!(
                        channel = %target.channel_id,
                        message = %target.message_id,
                        "progress update dropped: {e:?}"
                    );
                }
            }
        });
        self.active = Some(ActiveTimer { generation, task });
    }

    pub fn stop(&mut self) {
        if let Some(timer) = self.active.take() {
            timer.task.abort();
        }
    }

    #[cfg(test)]
    pub fn active_generation(&self) -> Option<u64> {
        self.active.as_ref().map(|t| t.generation)
    }

    #[cfg(test)]
    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }
}

impl Drop for ProgressReporter {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    };

    use anyhow::anyhow;

    use super::*;

    const TICK: Duration = Duration::from_secs(10);

    #[derive(Default)]
    struct CountingSink {
        updates: AtomicUsize,
        fail: AtomicBool,
        seen: Mutex<Vec<Duration>>,
    }

    #[async_trait]
    impl StatusSink for CountingSink {
        async fn announce(&self, channel_id: ChannelId, _status: &NowPlaying) -> Result<StatusTarget> {
            Ok(StatusTarget {
                channel_id,
                message_id: MessageId::new(1),
            })
        }

        async fn update(&self, _target: &StatusTarget, status: &NowPlaying) -> Result<()> {
            self.updates.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push(status.elapsed);
            if self.fail.load(Ordering::SeqCst) {
                return Err(anyhow!("Unknown Message"));
            }
            Ok(())
        }
    }

    struct ClockPlayer {
        started: tokio::time::Instant,
    }

    #[async_trait]
    impl PlayerHandle for ClockPlayer {
        fn set_volume(&self, _volume: f32) {}
        fn pause(&self) {}
        fn resume(&self) {}
        fn stop(&self) {}
        async fn position(&self) -> Option<Duration> {
            Some(self.started.elapsed())
        }
    }

    fn target() -> StatusTarget {
        StatusTarget {
            channel_id: ChannelId::new(5),
            message_id: MessageId::new(9),
        }
    }

    fn player() -> Arc<dyn PlayerHandle> {
        Arc::new(ClockPlayer {
            started: tokio::time::Instant::now(),
        })
    }

    fn track() -> Track {
        Track::new("song", "https://example.com/song").with_duration(Duration::from_secs(200))
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_on_interval_with_current_position() {
        let sink = Arc::new(CountingSink::default());
        let mut reporter = ProgressReporter::new(TICK);
        reporter.start(1, target(), track(), player(), sink.clone());

        tokio::time::sleep(TICK * 3 + TICK / 2).await;

        assert_eq!(sink.updates.load(Ordering::SeqCst), 3);
        assert_eq!(*sink.seen.lock().unwrap(), vec![TICK, TICK * 2, TICK * 3]);
        assert_eq!(reporter.active_generation(), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn restarting_replaces_previous_timer() {
        let sink = Arc::new(CountingSink::default());
        let mut reporter = ProgressReporter::new(TICK);
        reporter.start(1, target(), track(), player(), sink.clone());
        reporter.start(2, target(), track(), player(), sink.clone());

        tokio::time::sleep(TICK * 3 + TICK / 2).await;

        assert_eq!(sink.updates.load(Ordering::SeqCst), 3);
        assert_eq!(reporter.active_generation(), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_updates_do_not_stop_the_timer() {
        let sink = Arc::new(CountingSink::default());
        sink.fail.store(true, Ordering::SeqCst);
        let mut reporter = ProgressReporter::new(TICK);
        reporter.start(1, target(), track(), player(), sink.clone());

        tokio::time::sleep(TICK * 4 + TICK / 2).await;

        assert_eq!(sink.updates.load(Ordering::SeqCst), 4);
        assert!(reporter.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_cancels_the_timer() {
        let sink = Arc::new(CountingSink::default());
        let mut reporter = ProgressReporter::new(TICK);
        reporter.start(1, target(), track(), player(), sink.clone());
        reporter.stop();

        tokio::time::sleep(TICK * 3).await;

        assert_eq!(sink.updates.load(Ordering::SeqCst), 0);
        assert!(!reporter.is_active());
    }

    #[test]
    fn render_shows_bar_when_duration_known() {
        let status = NowPlaying {
            track: track(),
            elapsed: Duration::from_secs(100),
        };
        let text = status.render();
        assert!(text.contains("1:40 / 3:20"));
        assert!(text.contains(&"█".repeat(10)));

        let live = NowPlaying {
            track: Track::new("radio", "https://example.com/live"),
            elapsed: Duration::from_secs(5),
        };
        assert_eq!(live.render(), "🎶 **radio**\n0:05");
    }
}
