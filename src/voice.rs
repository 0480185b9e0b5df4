//! Voice transport seam.
//!
//! Sessions talk to [`VoiceGateway`] and [`PlayerHandle`]; transport callbacks
//! come back as [`SessionEvent`]s on the session's channel instead of
//! mutating state from inside the callback.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use serenity::all::{ChannelId, GuildId};
use songbird::{
    CoreEvent, Event, EventContext, EventHandler as VoiceEventHandler, Songbird, TrackEvent,
    driver::Bitrate, input::Input, tracks::TrackHandle,
};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::{audio::LocalAudio, error::TransportError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The track started under `generation` stopped rendering, for any reason.
    TrackEnded { generation: u64 },
    /// The voice driver dropped the connection.
    Disconnected,
}

pub type EventSender = mpsc::UnboundedSender<SessionEvent>;

#[async_trait]
pub trait PlayerHandle: Send + Sync {
    fn set_volume(&self, volume: f32);
    fn pause(&self);
    fn resume(&self);
    fn stop(&self);
    async fn position(&self) -> Option<Duration>;
}

#[async_trait]
pub trait VoiceGateway: Send + Sync {
    /// Joins `channel_id`; resolves once the transport is ready to carry audio.
    async fn connect(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
        events: EventSender,
    ) -> Result<(), TransportError>;

    /// Leaves the guild's voice channel and drops the transport handle.
    async fn disconnect(&self, guild_id: GuildId);

    /// Replaces whatever is rendering with `audio`. End of the new track is
    /// reported as `TrackEnded { generation }`.
    async fn start(
        &self,
        guild_id: GuildId,
        audio: LocalAudio,
        volume: f32,
        generation: u64,
        events: EventSender,
    ) -> Result<Arc<dyn PlayerHandle>, TransportError>;
}

/// Maps a 0..=100 volume onto the mixer's gain.
pub fn gain(volume: u8) -> f32 {
    f32::from(volume.min(100)) / 100.0
}

pub struct SongbirdGateway {
    manager: Arc<Songbird>,
    bitrate: Bitrate,
}

impl SongbirdGateway {
    pub fn new(manager: Arc<Songbird>, bitrate: Bitrate) -> Self {
        Self { manager, bitrate }
    }
}

#[async_trait]
impl VoiceGateway for SongbirdGateway {
    async fn connect(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
        events: EventSender,
    ) -> Result<(), TransportError> {
        info!("Joining voice channel {} in guild {}", channel_id, guild_id);
        let call_lock = self
            .manager
            .join(guild_id, channel_id)
            .await
            .map_err(|e| TransportError::Join(e.to_string()))?;

        let mut call = call_lock.lock().await;
        call.set_bitrate(self.bitrate);
        call.remove_all_global_events();
        call.add_global_event(
            Event::Core(CoreEvent::DriverDisconnect),
            DisconnectNotifier { events },
        );
        Ok(())
    }

    async fn disconnect(&self, guild_id: GuildId) {
        if let Err(e) = self.manager.remove(guild_id).await {
            debug!("leaving voice in guild {guild_id}: {e}");
        }
    }

    async fn start(
        &self,
        guild_id: GuildId,
        audio: LocalAudio,
        volume: f32,
        generation: u64,
        events: EventSender,
    ) -> Result<Arc<dyn PlayerHandle>, TransportError> {
        let call_lock = self
            .manager
            .get(guild_id)
            .ok_or(TransportError::NotConnected)?;
        let source: Input = songbird::input::File::new(audio.path).into();

        let handle = {
            let mut call = call_lock.lock().await;
            call.play_only_input(source)
        };
        let _ = handle.set_volume(volume);
        for event in [TrackEvent::End, TrackEvent::Error] {
            handle
                .add_event(
                    Event::Track(event),
                    TrackEndNotifier {
                        generation,
                        events: events.clone(),
                    },
                )
                .map_err(|e| TransportError::Player(e.to_string()))?;
        }
        Ok(Arc::new(SongbirdPlayer { handle }))
    }
}

struct SongbirdPlayer {
    handle: TrackHandle,
}

#[async_trait]
impl PlayerHandle for SongbirdPlayer {
    fn set_volume(&self, volume: f32) {
        let _ = self.handle.set_volume(volume);
    }

    fn pause(&self) {
        let _ = self.handle.pause();
    }

    fn resume(&self) {
        let _ = self.handle.play();
    }

    fn stop(&self) {
        let _ = self.handle.stop();
    }

    async fn position(&self) -> Option<Duration> {
        self.handle.get_info().await.ok().map(|state| state.position)
    }
}

struct TrackEndNotifier {
    generation: u64,
    events: EventSender,
}

#[async_trait]
impl VoiceEventHandler for TrackEndNotifier {
    async fn act(&self, _ctx: &EventContext<'_>) -> Option<Event> {
        let _ = self.events.send(SessionEvent::TrackEnded {
            generation: self.generation,
        });
        None
    }
}

struct DisconnectNotifier {
    events: EventSender,
}

#[async_trait]
impl VoiceEventHandler for DisconnectNotifier {
    async fn act(&self, _ctx: &EventContext<'_>) -> Option<Event> {
        let _ = self.events.send(SessionEvent::Disconnected);
        None
    }
}

#[cfg(test)]
mod tests {
    use super::gain;

    #[test]
    fn gain_is_linear_and_capped() {
        assert_eq!(gain(0), 0.0);
        assert_eq!(gain(50), 0.5);
        assert_eq!(gain(100), 1.0);
        assert_eq!(gain(200), 1.0);
    }
}
