//! Queue decisions for one guild.
//!
//! Nothing in here performs I/O: the session asks the engine what to do next
//! and carries it out against the voice transport.

use std::collections::VecDeque;

use crate::track::Track;

pub const MAX_VOLUME: u8 = 100;

/// What the session should do after a queue decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Next {
    Play(Track),
    /// Queue ran dry with autoplay on; look up something related to `seed`.
    Autoplay { seed: String },
    Idle,
}

#[derive(Debug, Clone)]
pub struct QueueEngine {
    queue: VecDeque<Track>,
    current: Option<Track>,
    autoplay: bool,
    loop_one: bool,
    volume: u8,
    last_played_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSnapshot {
    pub current: Option<Track>,
    pub upcoming: Vec<Track>,
    pub autoplay: bool,
    pub loop_one: bool,
    pub volume: u8,
}

impl QueueEngine {
    pub fn new(volume: u8) -> Self {
        Self {
            queue: VecDeque::new(),
            current: None,
            autoplay: false,
            loop_one: false,
            volume: volume.min(MAX_VOLUME),
            last_played_url: None,
        }
    }

    /// Appends `track`. When the player is idle the front of the queue is
    /// popped and returned so the caller can start it right away.
    pub fn enqueue(&mut self, track: Track, player_idle: bool) -> Option<Track> {
        self.queue.push_back(track);
        if player_idle {
            self.queue.pop_front()
        } else {
            None
        }
    }

    /// Records that `track` is now rendering.
    pub fn mark_started(&mut self, track: Track) {
        self.last_played_url = Some(track.url.clone());
        self.current = Some(track);
    }

    /// Natural end of the current track.
    pub fn advance_on_end(&mut self) -> Next {
        let finished = self.current.take();
        if self.loop_one
            && let Some(track) = finished
        {
            self.queue.push_front(track);
            return self.pop_or_idle();
        }
        self.advance_without_repeat()
    }

    /// Explicit skip; loop-one is ignored for this one transition.
    pub fn skip(&mut self) -> Next {
        self.current = None;
        self.advance_without_repeat()
    }

    /// Autoplay came back empty-handed (or the lookup failed).
    pub fn autoplay_exhausted(&mut self) -> Next {
        self.current = None;
        Next::Idle
    }

    /// Clears the queue and transient playback state. Autoplay and volume are
    /// guild preferences and survive a stop.
    pub fn stop(&mut self) {
        self.queue.clear();
        self.current = None;
        self.loop_one = false;
    }

    /// Forgets the current track without touching the queue (e.g. when it
    /// failed to load).
    pub fn clear_current(&mut self) {
        self.current = None;
    }

    pub fn adjust_volume(&mut self, delta: i32) -> u8 {
        let v = (self.volume as i32).saturating_add(delta).clamp(0, MAX_VOLUME as i32);
        self.volume = v as u8;
        self.volume
    }

    pub fn toggle_autoplay(&mut self) -> bool {
        self.autoplay = !self.autoplay;
        self.autoplay
    }

    pub fn toggle_loop_one(&mut self) -> bool {
        self.loop_one = !self.loop_one;
        self.loop_one
    }

    pub fn volume(&self) -> u8 {
        self.volume
    }

    pub fn current(&self) -> Option<&Track> {
        self.current.as_ref()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            current: self.current.clone(),
            upcoming: self.queue.iter().cloned().collect(),
            autoplay: self.autoplay,
            loop_one: self.loop_one,
            volume: self.volume,
        }
    }

    fn advance_without_repeat(&mut self) -> Next {
        if let Some(next) = self.queue.pop_front() {
            return Next::Play(next);
        }
        match (&self.last_played_url, self.autoplay) {
            (Some(seed), true) => Next::Autoplay { seed: seed.clone() },
            _ => Next::Idle,
        }
    }

    fn pop_or_idle(&mut self) -> Next {
        self.queue.pop_front().map(Next::Play).unwrap_or(Next::Idle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(name: &str) -> Track {
        Track::new(name, format!("https://example.com/{name}"))
    }

    fn play(engine: &mut QueueEngine, next: Next) -> Option<String> {
        match next {
            Next::Play(track) => {
                let title = track.title.clone();
                engine.mark_started(track);
                Some(title)
            }
            _ => None,
        }
    }

    #[test]
    fn enqueue_on_idle_player_starts_first_entry() {
        let mut q = QueueEngine::new(80);
        assert_eq!(q.enqueue(t("a"), true), Some(t("a")));
        assert!(q.is_empty());
        assert_eq!(q.enqueue(t("b"), false), None);
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn advancing_yields_fifo_order() {
        let mut q = QueueEngine::new(80);
        let first = q.enqueue(t("a"), true).unwrap();
        q.mark_started(first);
        for name in ["b", "c", "d"] {
            q.enqueue(t(name), false);
        }

        let mut order = vec!["a".to_string()];
        loop {
            let next = q.advance_on_end();
            match play(&mut q, next) {
                Some(title) => order.push(title),
                None => break,
            }
        }
        assert_eq!(order, ["a", "b", "c", "d"]);
        assert!(q.current().is_none());
    }

    #[test]
    fn loop_one_replays_until_turned_off() {
        let mut q = QueueEngine::new(80);
        q.mark_started(t("a"));
        q.enqueue(t("b"), false);
        q.toggle_loop_one();

        for _ in 0..5 {
            let next = q.advance_on_end();
            assert_eq!(play(&mut q, next).as_deref(), Some("a"));
        }
        assert_eq!(q.len(), 1);

        q.toggle_loop_one();
        let next = q.advance_on_end();
        assert_eq!(play(&mut q, next).as_deref(), Some("b"));
    }

    #[test]
    fn skip_bypasses_loop_one_once() {
        let mut q = QueueEngine::new(80);
        q.mark_started(t("a"));
        q.enqueue(t("b"), false);
        q.toggle_loop_one();

        let next = q.skip();
        assert_eq!(play(&mut q, next).as_deref(), Some("b"));
        // Loop stays on for the new track.
        let next = q.advance_on_end();
        assert_eq!(play(&mut q, next).as_deref(), Some("b"));
    }

    #[test]
    fn autoplay_seeds_from_last_played() {
        let mut q = QueueEngine::new(80);
        q.mark_started(t("a"));
        assert_eq!(q.advance_on_end(), Next::Idle);

        q.mark_started(t("b"));
        q.toggle_autoplay();
        assert_eq!(
            q.advance_on_end(),
            Next::Autoplay {
                seed: "https://example.com/b".into()
            }
        );
        assert_eq!(q.autoplay_exhausted(), Next::Idle);
    }

    #[test]
    fn autoplay_without_history_goes_idle() {
        let mut q = QueueEngine::new(80);
        q.toggle_autoplay();
        assert_eq!(q.skip(), Next::Idle);
    }

    #[test]
    fn stop_clears_queue_and_loop_but_keeps_preferences() {
        let mut q = QueueEngine::new(80);
        q.mark_started(t("a"));
        q.enqueue(t("b"), false);
        q.toggle_loop_one();
        q.toggle_autoplay();
        q.adjust_volume(-30);

        q.stop();
        let snap = q.snapshot();
        assert!(snap.current.is_none());
        assert!(snap.upcoming.is_empty());
        assert!(!snap.loop_one);
        assert!(snap.autoplay);
        assert_eq!(snap.volume, 50);
    }

    #[test]
    fn volume_is_clamped() {
        let mut q = QueueEngine::new(95);
        assert_eq!(q.adjust_volume(10), 100);
        assert_eq!(q.adjust_volume(10), 100);

        let mut q = QueueEngine::new(5);
        assert_eq!(q.adjust_volume(-10), 0);
        assert_eq!(q.adjust_volume(-10), 0);

        assert_eq!(QueueEngine::new(250).volume(), 100);
    }
}
