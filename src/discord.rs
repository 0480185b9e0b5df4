//! Serenity-backed collaborators: the now-playing message sink and a few
//! cache lookups the command handlers share.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serenity::all::{
    ChannelId, ChannelType, Context as SerenityContext, CreateEmbed, CreateMessage, EditMessage,
    Guild, GuildId, Http, Permissions, UserId,
};
use tracing::{debug, info};

use crate::progress::{NowPlaying, StatusSink, StatusTarget};

const NOW_PLAYING_COLOUR: u32 = 0x1DB954;

/// Posts and edits now-playing embeds in a text channel.
pub struct DiscordStatusSink {
    http: Arc<Http>,
}

impl DiscordStatusSink {
    pub fn new(http: Arc<Http>) -> Self {
        Self { http }
    }
}

fn now_playing_embed(status: &NowPlaying) -> CreateEmbed {
    let mut embed = CreateEmbed::new()
        .title("Now playing")
        .description(status.render())
        .url(status.track.url.clone())
        .colour(NOW_PLAYING_COLOUR);
    if let Some(user) = status.track.requested_by {
        embed = embed.field("Requested by", format!("<@{user}>"), true);
    }
    embed
}

#[async_trait]
impl StatusSink for DiscordStatusSink {
    async fn announce(&self, channel_id: ChannelId, status: &NowPlaying) -> Result<StatusTarget> {
        let msg = channel_id
            .send_message(&self.http, CreateMessage::new().embed(now_playing_embed(status)))
            .await?;
        Ok(StatusTarget {
            channel_id,
            message_id: msg.id,
        })
    }

    async fn update(&self, target: &StatusTarget, status: &NowPlaying) -> Result<()> {
        target
            .channel_id
            .edit_message(
                &self.http,
                target.message_id,
                EditMessage::new().embed(now_playing_embed(status)),
            )
            .await?;
        Ok(())
    }
}

/// The voice channel `user_id` currently sits in, per the gateway cache.
pub fn voice_channel_of(
    ctx: &SerenityContext,
    guild_id: GuildId,
    user_id: UserId,
) -> Option<ChannelId> {
    let guild = ctx.cache.guild(guild_id)?;
    guild
        .voice_states
        .get(&user_id)
        .and_then(|vs| vs.channel_id)
}

pub fn invite_url(app_id: impl std::fmt::Display) -> String {
    let perms = Permissions::VIEW_CHANNEL
        | Permissions::SEND_MESSAGES
        | Permissions::EMBED_LINKS
        | Permissions::READ_MESSAGE_HISTORY
        | Permissions::CONNECT
        | Permissions::SPEAK;
    format!(
        "https://discord.com/api/oauth2/authorize?client_id={}&permissions={}&scope=bot",
        app_id,
        perms.bits()
    )
}

/// Says hello in the first text channel (by position) that accepts the message.
pub async fn greet_new_guild(ctx: &SerenityContext, guild: &Guild) {
    let mut channels: Vec<_> = guild
        .channels
        .values()
        .filter(|c| c.kind == ChannelType::Text)
        .map(|c| (c.position, c.id))
        .collect();
    channels.sort_unstable();

    let greeting = CreateMessage::new().content(
        "👋 Thanks for adding me! Playback is available while this server has an active \
         subscription; it is checked automatically.",
    );
    for (_, channel_id) in channels {
        match channel_id.send_message(&ctx.http, greeting.clone()).await {
            Ok(_) => {
                info!(guild = %guild.id, channel = %channel_id, "posted join greeting");
                return;
            }
            Err(e) => debug!(guild = %guild.id, channel = %channel_id, "greeting not allowed: {e}"),
        }
    }
}
