//! Per-guild playback sessions.
//!
//! A [`GuildSession`] owns the connection state machine, the player, the queue
//! engine and the progress reporter of one guild. The session mutex is never
//! held across transport or resolver I/O (the short `VoiceGateway::start` call
//! being the one exception), so every step re-validates what it claimed before
//! suspending: the connection attempt id, or the player generation.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex as StdMutex,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use serenity::all::{ChannelId, GuildId};
use tokio::sync::{Mutex, mpsc, watch};
use tracing::{debug, info, warn};

use crate::{
    audio::TrackResolver,
    error::{BotError, BotResult, TransportError, UserInputError},
    metrics::METRICS,
    progress::{NowPlaying, ProgressReporter, StatusSink},
    queue::{Next, QueueEngine, QueueSnapshot},
    track::Track,
    voice::{EventSender, PlayerHandle, SessionEvent, VoiceGateway, gain},
};

/// Consecutive load failures tolerated before the player gives up and idles.
const MAX_LOAD_FAILURES: usize = 3;

#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    pub connect_timeout: Duration,
    pub progress_interval: Duration,
    pub default_volume: u8,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(15),
            progress_interval: Duration::from_secs(10),
            default_volume: 80,
        }
    }
}

/// Collaborators shared by every session.
#[derive(Clone)]
pub struct SessionDeps {
    pub gateway: Arc<dyn VoiceGateway>,
    pub resolver: Arc<dyn TrackResolver>,
    pub sink: Arc<dyn StatusSink>,
    pub settings: SessionSettings,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting { attempt: u64 },
    Ready { channel_id: ChannelId },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerStatus {
    Idle,
    Loading,
    Playing,
    Paused,
}

enum Player {
    Idle,
    Loading {
        generation: u64,
    },
    Playing {
        generation: u64,
        handle: Arc<dyn PlayerHandle>,
    },
    Paused {
        generation: u64,
        handle: Arc<dyn PlayerHandle>,
    },
}

impl Player {
    fn status(&self) -> PlayerStatus {
        match self {
            Player::Idle => PlayerStatus::Idle,
            Player::Loading { .. } => PlayerStatus::Loading,
            Player::Playing { .. } => PlayerStatus::Playing,
            Player::Paused { .. } => PlayerStatus::Paused,
        }
    }

    fn is_loading(&self, generation: u64) -> bool {
        matches!(self, Player::Loading { generation: g } if *g == generation)
    }

    fn rendering_generation(&self) -> Option<u64> {
        match self {
            Player::Playing { generation, .. } | Player::Paused { generation, .. } => {
                Some(*generation)
            }
            _ => None,
        }
    }

    fn handle(&self) -> Option<&Arc<dyn PlayerHandle>> {
        match self {
            Player::Playing { handle, .. } | Player::Paused { handle, .. } => Some(handle),
            _ => None,
        }
    }
}

struct SessionState {
    player: Player,
    queue: QueueEngine,
    progress: ProgressReporter,
    status_channel: Option<ChannelId>,
    generation: u64,
}

/// A queue decision with the player already claimed for it.
enum Step {
    Load { generation: u64, track: Track },
    Lookup { generation: u64, seed: String },
    Settled,
}

impl SessionState {
    fn claim(&mut self, next: Next) -> Step {
        match next {
            Next::Play(track) => {
                let generation = self.bump();
                Step::Load { generation, track }
            }
            Next::Autoplay { seed } => {
                let generation = self.bump();
                Step::Lookup { generation, seed }
            }
            Next::Idle => {
                self.halt();
                Step::Settled
            }
        }
    }

    /// Starts a new player generation; anything in flight for an older one is
    /// now stale.
    fn bump(&mut self) -> u64 {
        self.generation += 1;
        self.player = Player::Loading {
            generation: self.generation,
        };
        self.generation
    }

    fn halt(&mut self) {
        self.progress.stop();
        if let Some(handle) = self.player.handle() {
            handle.stop();
        }
        self.queue.clear_current();
        self.generation += 1;
        self.player = Player::Idle;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Enqueued {
    /// The first of the given tracks started right away.
    Started(Track),
    /// Queued behind whatever is playing; `position` is 1-based.
    Queued { track: Track, position: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub connection: ConnectionState,
    pub player: PlayerStatus,
    pub queue: QueueSnapshot,
}

pub struct GuildSession {
    guild_id: GuildId,
    deps: SessionDeps,
    events: EventSender,
    connection: watch::Sender<ConnectionState>,
    attempts: AtomicU64,
    state: Mutex<SessionState>,
}

impl GuildSession {
    /// Builds a session and hands back the receiving end of its event
    /// channel; whoever owns the session must feed it to [`Self::handle_event`].
    pub fn new(
        guild_id: GuildId,
        deps: SessionDeps,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let (connection, _) = watch::channel(ConnectionState::Disconnected);
        let state = SessionState {
            player: Player::Idle,
            queue: QueueEngine::new(deps.settings.default_volume),
            progress: ProgressReporter::new(deps.settings.progress_interval),
            status_channel: None,
            generation: 0,
        };
        let session = Arc::new(Self {
            guild_id,
            deps,
            events,
            connection,
            attempts: AtomicU64::new(0),
            state: Mutex::new(state),
        });
        (session, rx)
    }

    pub fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.borrow().clone()
    }

    fn is_ready(&self) -> bool {
        matches!(*self.connection.borrow(), ConnectionState::Ready { .. })
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        let st = self.state.lock().await;
        SessionSnapshot {
            connection: self.connection_state(),
            player: st.player.status(),
            queue: st.queue.snapshot(),
        }
    }

    pub async fn now_playing(&self) -> Option<Track> {
        self.state.lock().await.queue.current().cloned()
    }

    /// Resolves `query` and queues it, joining `voice_channel` first when the
    /// session has no live connection.
    pub async fn play(
        &self,
        query: &str,
        voice_channel: Option<ChannelId>,
        text_channel: ChannelId,
        requester: u64,
    ) -> BotResult<Enqueued> {
        let query = query.trim();
        if query.is_empty() {
            return Err(UserInputError::EmptyQuery.into());
        }
        let channel_id = voice_channel.ok_or(UserInputError::NotInVoiceChannel)?;
        self.ensure_connected(channel_id).await?;

        let track = self.deps.resolver.resolve(query).await?.requested_by(requester);
        self.enqueue(vec![track], text_channel).await
    }

    /// Queues already-resolved tracks (e.g. a saved playlist).
    pub async fn play_tracks(
        &self,
        tracks: Vec<Track>,
        voice_channel: Option<ChannelId>,
        text_channel: ChannelId,
    ) -> BotResult<Enqueued> {
        let channel_id = voice_channel.ok_or(UserInputError::NotInVoiceChannel)?;
        if tracks.is_empty() {
            return Err(UserInputError::InvalidArguments("no tracks to play".into()).into());
        }
        self.ensure_connected(channel_id).await?;
        self.enqueue(tracks, text_channel).await
    }

    /// Gets the session to `Ready`, reusing a live connection and waiting on an
    /// attempt already in flight instead of opening a second one.
    pub async fn ensure_connected(&self, channel_id: ChannelId) -> BotResult<()> {
        let current = self.connection_state();
        match current {
            ConnectionState::Ready { .. } => Ok(()),
            ConnectionState::Connecting { .. } => self.await_inflight_connect().await,
            ConnectionState::Disconnected => {
                let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
                let claimed = self.connection.send_if_modified(|state| {
                    if *state == ConnectionState::Disconnected {
                        *state = ConnectionState::Connecting { attempt };
                        true
                    } else {
                        false
                    }
                });
                if claimed {
                    self.connect(channel_id, attempt).await
                } else {
                    // Lost the race to another request; ride along with it.
                    self.await_inflight_connect().await
                }
            }
        }
    }

    async fn await_inflight_connect(&self) -> BotResult<()> {
        let mut rx = self.connection.subscribe();
        let settled = rx
            .wait_for(|s| !matches!(s, ConnectionState::Connecting { .. }))
            .await
            .map(|s| s.clone());
        match settled {
            Ok(ConnectionState::Ready { .. }) => Ok(()),
            _ => Err(TransportError::Join("voice connection attempt failed".into()).into()),
        }
    }

    async fn connect(&self, channel_id: ChannelId, attempt: u64) -> BotResult<()> {
        let timeout = self.deps.settings.connect_timeout;
        let outcome = tokio::time::timeout(
            timeout,
            self.deps
                .gateway
                .connect(self.guild_id, channel_id, self.events.clone()),
        )
        .await
        .unwrap_or(Err(TransportError::Timeout(timeout)));

        let connecting = ConnectionState::Connecting { attempt };
        match outcome {
            Ok(()) => {
                let current = self.connection.send_if_modified(|state| {
                    if *state == connecting {
                        *state = ConnectionState::Ready { channel_id };
                        true
                    } else {
                        false
                    }
                });
                if current {
                    METRICS.inc_connections();
                    info!(guild = %self.guild_id, channel = %channel_id, "voice connection ready");
                    Ok(())
                } else {
                    warn!(guild = %self.guild_id, attempt, "discarding stale voice connection");
                    self.deps.gateway.disconnect(self.guild_id).await;
                    Err(TransportError::NotConnected.into())
                }
            }
            Err(e) => {
                warn!(guild = %self.guild_id, "voice connection failed: {e}");
                // Never leave a half-initialised transport behind.
                self.deps.gateway.disconnect(self.guild_id).await;
                self.connection.send_if_modified(|state| {
                    if *state == connecting {
                        *state = ConnectionState::Disconnected;
                        true
                    } else {
                        false
                    }
                });
                Err(e.into())
            }
        }
    }

    async fn enqueue(&self, tracks: Vec<Track>, text_channel: ChannelId) -> BotResult<Enqueued> {
        let (step, reply) = {
            let mut st = self.state.lock().await;
            // The connection may have dropped while we were resolving.
            if !self.is_ready() {
                return Err(TransportError::NotConnected.into());
            }
            st.status_channel = Some(text_channel);

            let before = st.queue.len();
            let mut idle = matches!(st.player, Player::Idle);
            let mut started = None;
            let mut last = None;
            for track in tracks {
                last = Some(track.clone());
                if let Some(first) = st.queue.enqueue(track, idle) {
                    idle = false;
                    started = Some(first);
                }
            }
            record_queue_change(before, st.queue.len());

            match (started, last) {
                (Some(first), _) => {
                    let reply = Enqueued::Started(first.clone());
                    (st.claim(Next::Play(first)), reply)
                }
                (None, Some(track)) => {
                    let position = st.queue.len();
                    (Step::Settled, Enqueued::Queued { track, position })
                }
                (None, None) => {
                    return Err(UserInputError::InvalidArguments("no tracks to play".into()).into());
                }
            }
        };
        self.drive(step).await?;
        Ok(reply)
    }

    /// Carries a claimed step through autoplay lookups and load failures until
    /// the player settles. Returns the first failure, if any.
    async fn drive(&self, mut step: Step) -> BotResult<()> {
        let mut first_error: Option<BotError> = None;
        let mut failures = 0;
        loop {
            step = match step {
                Step::Settled => break,
                Step::Lookup { generation, seed } => self.lookup_related(generation, &seed).await,
                Step::Load { generation, track } => match self.load(generation, track).await {
                    Ok(()) => break,
                    Err(e) => {
                        failures += 1;
                        let mut st = self.state.lock().await;
                        if !st.player.is_loading(generation) {
                            // Superseded while loading; the newer command owns the player.
                            first_error.get_or_insert(e);
                            break;
                        }
                        warn!(guild = %self.guild_id, "track failed to load: {e}");
                        first_error.get_or_insert(e);
                        if failures >= MAX_LOAD_FAILURES {
                            st.halt();
                            break;
                        }
                        let before = st.queue.len();
                        let next = st.queue.skip();
                        record_queue_change(before, st.queue.len());
                        st.claim(next)
                    }
                },
            };
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn lookup_related(&self, generation: u64, seed: &str) -> Step {
        let found = self.deps.resolver.related(seed).await;
        let mut st = self.state.lock().await;
        if !st.player.is_loading(generation) {
            return Step::Settled;
        }
        match found {
            Ok(Some(track)) => {
                info!(guild = %self.guild_id, "autoplay picked {}", track.title);
                Step::Load { generation, track }
            }
            Ok(None) => {
                debug!(guild = %self.guild_id, "autoplay found nothing for {seed}");
                let next = st.queue.autoplay_exhausted();
                st.claim(next)
            }
            Err(e) => {
                warn!(guild = %self.guild_id, "autoplay lookup failed: {e}");
                let next = st.queue.autoplay_exhausted();
                st.claim(next)
            }
        }
    }

    /// Fetches audio for `track` and starts it, unless `generation` has been
    /// superseded in the meantime.
    async fn load(&self, generation: u64, track: Track) -> BotResult<()> {
        let audio = self.deps.resolver.fetch_audio(&track).await?;

        let (handle, channel) = {
            let mut st = self.state.lock().await;
            if !st.player.is_loading(generation) {
                debug!(guild = %self.guild_id, generation, "dropping superseded load");
                return Ok(());
            }
            // Held across start so an end event cannot observe `Loading`.
            let handle = self
                .deps
                .gateway
                .start(
                    self.guild_id,
                    audio,
                    gain(st.queue.volume()),
                    generation,
                    self.events.clone(),
                )
                .await?;
            st.player = Player::Playing {
                generation,
                handle: handle.clone(),
            };
            st.queue.mark_started(track.clone());
            METRICS.inc_tracks_started();
            info!(guild = %self.guild_id, generation, "now playing {}", track.title);
            (handle, st.status_channel)
        };

        let Some(channel_id) = channel else {
            return Ok(());
        };
        let status = NowPlaying {
            track: track.clone(),
            elapsed: Duration::ZERO,
        };
        match self.deps.sink.announce(channel_id, &status).await {
            Ok(target) => {
                let mut st = self.state.lock().await;
                if st.player.rendering_generation() == Some(generation) {
                    st.progress
                        .start(generation, target, track, handle, self.deps.sink.clone());
                }
            }
            Err(e) => debug!(guild = %self.guild_id, "now-playing announcement failed: {e:?}"),
        }
        Ok(())
    }

    /// Feeds one transport event through the state machine.
    pub async fn handle_event(&self, event: SessionEvent) {
        match event {
            SessionEvent::TrackEnded { generation } => {
                let step = {
                    let mut st = self.state.lock().await;
                    if st.player.rendering_generation() != Some(generation) {
                        debug!(guild = %self.guild_id, generation, "ignoring end of stale track");
                        return;
                    }
                    st.progress.stop();
                    let before = st.queue.len();
                    let next = st.queue.advance_on_end();
                    record_queue_change(before, st.queue.len());
                    st.claim(next)
                };
                if let Err(e) = self.drive(step).await {
                    warn!(guild = %self.guild_id, "advancing the queue failed: {e}");
                }
            }
            SessionEvent::Disconnected => self.teardown().await,
        }
    }

    /// The transport went away: back to `Disconnected` with an idle player.
    async fn teardown(&self) {
        let was_ready = self.connection.send_if_modified(|state| {
            if matches!(state, ConnectionState::Ready { .. }) {
                *state = ConnectionState::Disconnected;
                true
            } else {
                false
            }
        });
        if !was_ready {
            return;
        }
        METRICS.dec_connections();
        info!(guild = %self.guild_id, "voice connection lost");
        self.stop().await;
    }

    /// Stops the current track and moves on without honouring loop-one.
    /// Returns what is playing afterwards.
    pub async fn skip(&self) -> BotResult<Option<Track>> {
        let step = {
            let mut st = self.state.lock().await;
            if matches!(st.player, Player::Idle) && st.queue.is_empty() {
                return Err(UserInputError::NothingPlaying.into());
            }
            st.progress.stop();
            if let Some(handle) = st.player.handle() {
                handle.stop();
            }
            let before = st.queue.len();
            let next = st.queue.skip();
            record_queue_change(before, st.queue.len());
            st.claim(next)
        };
        self.drive(step).await?;
        Ok(self.now_playing().await)
    }

    /// Clears the queue and idles the player. The voice connection stays up.
    pub async fn stop(&self) {
        let mut st = self.state.lock().await;
        METRICS.dec_queue(st.queue.len());
        st.queue.stop();
        st.halt();
    }

    pub async fn pause(&self) -> BotResult<()> {
        let mut st = self.state.lock().await;
        match std::mem::replace(&mut st.player, Player::Idle) {
            Player::Playing { generation, handle } => {
                handle.pause();
                st.player = Player::Paused { generation, handle };
                Ok(())
            }
            paused @ Player::Paused { .. } => {
                st.player = paused;
                Ok(())
            }
            other => {
                st.player = other;
                Err(UserInputError::NothingPlaying.into())
            }
        }
    }

    pub async fn resume(&self) -> BotResult<()> {
        let mut st = self.state.lock().await;
        match std::mem::replace(&mut st.player, Player::Idle) {
            Player::Paused { generation, handle } => {
                handle.resume();
                st.player = Player::Playing { generation, handle };
                Ok(())
            }
            playing @ Player::Playing { .. } => {
                st.player = playing;
                Ok(())
            }
            other => {
                st.player = other;
                Err(UserInputError::NothingPlaying.into())
            }
        }
    }

    /// Applies `delta` to the volume, clamped to 0..=100, without interrupting
    /// the live track.
    pub async fn adjust_volume(&self, delta: i32) -> u8 {
        let mut st = self.state.lock().await;
        let volume = st.queue.adjust_volume(delta);
        if let Some(handle) = st.player.handle() {
            handle.set_volume(gain(volume));
        }
        volume
    }

    pub async fn toggle_autoplay(&self) -> bool {
        self.state.lock().await.queue.toggle_autoplay()
    }

    pub async fn toggle_loop_one(&self) -> bool {
        self.state.lock().await.queue.toggle_loop_one()
    }

    /// Current track followed by everything queued, for saving.
    pub async fn tracks(&self) -> Vec<Track> {
        let st = self.state.lock().await;
        let snap = st.queue.snapshot();
        snap.current.into_iter().chain(snap.upcoming).collect()
    }

    #[cfg(test)]
    async fn reporter_generation(&self) -> Option<u64> {
        self.state.lock().await.progress.active_generation()
    }
}

fn record_queue_change(before: usize, after: usize) {
    if after > before {
        METRICS.inc_queue(after - before);
    } else {
        METRICS.dec_queue(before - after);
    }
}

/// Pumps a session's transport events until the channel closes.
pub async fn run_events(session: Arc<GuildSession>, mut rx: mpsc::UnboundedReceiver<SessionEvent>) {
    while let Some(event) = rx.recv().await {
        session.handle_event(event).await;
    }
    debug!(guild = %session.guild_id(), "session event loop ended");
}

/// Every guild's session, created on first use and kept for the process
/// lifetime.
pub struct SessionRegistry {
    deps: SessionDeps,
    sessions: StdMutex<HashMap<GuildId, Arc<GuildSession>>>,
}

impl SessionRegistry {
    pub fn new(deps: SessionDeps) -> Self {
        Self {
            deps,
            sessions: StdMutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, guild_id: GuildId) -> Option<Arc<GuildSession>> {
        self.sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&guild_id)
            .cloned()
    }

    pub fn get_or_create(&self, guild_id: GuildId) -> Arc<GuildSession> {
        let mut sessions = self
            .sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        sessions
            .entry(guild_id)
            .or_insert_with(|| {
                let (session, rx) = GuildSession::new(guild_id, self.deps.clone());
                tokio::spawn(run_events(session.clone(), rx));
                METRICS.inc_sessions();
                debug!(guild = %guild_id, "created playback session");
                session
            })
            .clone()
    }
}
