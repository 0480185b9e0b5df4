//! Small session controls: toggles, volume, pause/resume and the queue view.

use std::sync::Arc;

use anyhow::{Result, anyhow};
use serenity::all::{Context as SerenityContext, CreateEmbed, CreateMessage, Message};

use super::{reply, reply_error};
use crate::{
    error::UserInputError,
    session::{ConnectionState, PlayerStatus, SessionSnapshot},
    state::AppState,
    track::{Track, format_clock},
};

const QUEUE_PREVIEW: usize = 10;

fn on_off(v: bool) -> &'static str {
    if v { "on" } else { "off" }
}

pub async fn toggle_autoplay(
    ctx: &SerenityContext,
    msg: &Message,
    state: &Arc<AppState>,
) -> Result<()> {
    let guild_id = msg.guild_id.ok_or_else(|| anyhow!("not in a guild"))?;
    let enabled = state.sessions.get_or_create(guild_id).toggle_autoplay().await;
    reply(ctx, msg, format!("🔁 Autoplay is now **{}**", on_off(enabled))).await
}

pub async fn toggle_loop(ctx: &SerenityContext, msg: &Message, state: &Arc<AppState>) -> Result<()> {
    let guild_id = msg.guild_id.ok_or_else(|| anyhow!("not in a guild"))?;
    let enabled = state.sessions.get_or_create(guild_id).toggle_loop_one().await;
    reply(ctx, msg, format!("🔂 Repeat current track is now **{}**", on_off(enabled))).await
}

pub async fn volume(
    ctx: &SerenityContext,
    msg: &Message,
    state: &Arc<AppState>,
    delta: i32,
) -> Result<()> {
    let guild_id = msg.guild_id.ok_or_else(|| anyhow!("not in a guild"))?;
    let volume = state.sessions.get_or_create(guild_id).adjust_volume(delta).await;
    let icon = if delta >= 0 { "🔊" } else { "🔉" };
    reply(ctx, msg, format!("{icon} Volume: **{volume}%**")).await
}

pub async fn pause(ctx: &SerenityContext, msg: &Message, state: &Arc<AppState>) -> Result<()> {
    let guild_id = msg.guild_id.ok_or_else(|| anyhow!("not in a guild"))?;
    let outcome = match state.sessions.get(guild_id) {
        Some(session) => session.pause().await,
        None => Err(UserInputError::NothingPlaying.into()),
    };
    match outcome {
        Ok(()) => reply(ctx, msg, "⏸️ Paused").await,
        Err(e) => reply_error(ctx, msg, &e).await,
    }
}

pub async fn resume(ctx: &SerenityContext, msg: &Message, state: &Arc<AppState>) -> Result<()> {
    let guild_id = msg.guild_id.ok_or_else(|| anyhow!("not in a guild"))?;
    let outcome = match state.sessions.get(guild_id) {
        Some(session) => session.resume().await,
        None => Err(UserInputError::NothingPlaying.into()),
    };
    match outcome {
        Ok(()) => reply(ctx, msg, "▶️ Resumed").await,
        Err(e) => reply_error(ctx, msg, &e).await,
    }
}

pub async fn queue(ctx: &SerenityContext, msg: &Message, state: &Arc<AppState>) -> Result<()> {
    let guild_id = msg.guild_id.ok_or_else(|| anyhow!("not in a guild"))?;
    let Some(session) = state.sessions.get(guild_id) else {
        return reply(ctx, msg, "📭 The queue is empty.").await;
    };
    let snapshot = session.snapshot().await;
    let embed = CreateEmbed::new()
        .title("🎶 Queue")
        .description(render_queue(&snapshot))
        .colour(0x5865F2);
    msg.channel_id
        .send_message(&ctx.http, CreateMessage::new().embed(embed))
        .await?;
    Ok(())
}

fn describe(track: &Track) -> String {
    match track.duration {
        Some(d) => format!("{} `{}`", track.title, format_clock(d)),
        None => track.title.clone(),
    }
}

fn render_queue(snapshot: &SessionSnapshot) -> String {
    let queue = &snapshot.queue;
    let mut lines = Vec::new();
    let paused = if snapshot.player == PlayerStatus::Paused {
        " (paused)"
    } else {
        ""
    };
    match &queue.current {
        Some(track) => lines.push(format!("**Now{paused}:** {}", describe(track))),
        None => lines.push("**Now:** nothing".to_string()),
    }
    if queue.upcoming.is_empty() {
        lines.push("_Nothing queued._".to_string());
    }
    for (i, track) in queue.upcoming.iter().take(QUEUE_PREVIEW).enumerate() {
        lines.push(format!("{}. {}", i + 1, describe(track)));
    }
    if queue.upcoming.len() > QUEUE_PREVIEW {
        lines.push(format!("…and {} more", queue.upcoming.len() - QUEUE_PREVIEW));
    }
    lines.push(format!(
        "\nAutoplay: **{}** · Repeat: **{}** · Volume: **{}%**",
        on_off(queue.autoplay),
        on_off(queue.loop_one),
        queue.volume
    ));
    if let ConnectionState::Ready { channel_id } = snapshot.connection {
        lines.push(format!("Connected to <#{channel_id}>"));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::queue::QueueSnapshot;

    fn snapshot(upcoming: usize) -> SessionSnapshot {
        SessionSnapshot {
            connection: ConnectionState::Disconnected,
            player: PlayerStatus::Playing,
            queue: QueueSnapshot {
                current: Some(
                    Track::new("Now", "https://example.com/now")
                        .with_duration(Duration::from_secs(95)),
                ),
                upcoming: (0..upcoming)
                    .map(|i| Track::new(format!("t{i}"), format!("https://example.com/{i}")))
                    .collect(),
                autoplay: true,
                loop_one: false,
                volume: 70,
            },
        }
    }

    #[test]
    fn queue_view_lists_current_and_flags() {
        let text = render_queue(&snapshot(2));
        assert!(text.starts_with("**Now:** Now `1:35`"));
        assert!(text.contains("1. t0\n2. t1"));
        assert!(text.contains("Autoplay: **on** · Repeat: **off** · Volume: **70%**"));
        assert!(!text.contains("Connected to"));
    }

    #[test]
    fn queue_view_shows_pause_and_channel() {
        let mut snap = snapshot(0);
        snap.player = PlayerStatus::Paused;
        snap.connection = ConnectionState::Ready {
            channel_id: serenity::all::ChannelId::new(55),
        };
        let text = render_queue(&snap);
        assert!(text.starts_with("**Now (paused):** Now"));
        assert!(text.contains("_Nothing queued._"));
        assert!(text.ends_with("Connected to <#55>"));
    }

    #[test]
    fn long_queues_are_truncated() {
        let text = render_queue(&snapshot(QUEUE_PREVIEW + 3));
        assert!(text.contains("10. t9"));
        assert!(!text.contains("11. "));
        assert!(text.contains("…and 3 more"));
    }
}
