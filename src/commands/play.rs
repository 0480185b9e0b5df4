use std::sync::Arc;

use anyhow::{Result, anyhow};
use chrono::Utc;
use serenity::all::{Context as SerenityContext, CreateEmbed, CreateMessage, GuildId, Message};
use tracing::info;

use super::{ERROR_COLOUR, reply, reply_error};
use crate::{
    discord::voice_channel_of,
    entitlement::remaining,
    error::UserInputError,
    session::Enqueued,
    state::AppState,
    track::format_remaining,
};

pub async fn handle(
    ctx: &SerenityContext,
    msg: &Message,
    state: &Arc<AppState>,
    query: &str,
) -> Result<()> {
    let guild_id = msg.guild_id.ok_or_else(|| anyhow!("not in a guild"))?;
    if query.trim().is_empty() {
        return reply_error(ctx, msg, &UserInputError::EmptyQuery.into()).await;
    }
    if !require_premium(ctx, msg, state, guild_id).await? {
        return Ok(());
    }

    let voice = voice_channel_of(ctx, guild_id, msg.author.id);
    let session = state.sessions.get_or_create(guild_id);
    match session
        .play(query, voice, msg.channel_id, msg.author.id.get())
        .await
    {
        Ok(Enqueued::Started(track)) => {
            info!(guild = %guild_id, user = %msg.author.id, "started {}", track.title);
            Ok(())
        }
        Ok(Enqueued::Queued { track, position }) => {
            reply(ctx, msg, format!("➕ Queued **{}** at position {position}", track.title)).await
        }
        Err(e) => reply_error(ctx, msg, &e).await,
    }
}

/// Checks the guild's subscription, telling the requester when it is not
/// active. Returns whether the command may go ahead.
pub(super) async fn require_premium(
    ctx: &SerenityContext,
    msg: &Message,
    state: &Arc<AppState>,
    guild_id: GuildId,
) -> Result<bool> {
    let record = state.entitlements.get_entitlement(guild_id, false).await;
    if record.active {
        return Ok(true);
    }

    let left = remaining(record.expires_at, Utc::now());
    let description = if left.is_zero() {
        "💬 Contact the administrators to activate a subscription.".to_string()
    } else {
        format!(
            "⏳ Remaining: **{}**\n💬 Contact the administrators to activate a subscription.",
            format_remaining(left)
        )
    };
    let embed = CreateEmbed::new()
        .title("🚫 This server has no active subscription")
        .description(description)
        .colour(ERROR_COLOUR)
        .timestamp(serenity::all::Timestamp::now());
    msg.channel_id
        .send_message(
            &ctx.http,
            CreateMessage::new()
                .content(format!("<@{}>", msg.author.id))
                .embed(embed),
        )
        .await?;
    Ok(false)
}
