use std::sync::Arc;

use anyhow::{Result, anyhow};
use serenity::all::{Context as SerenityContext, Message};

use super::{play::require_premium, reply, reply_error};
use crate::{
    discord::voice_channel_of,
    error::{BotError, UserInputError},
    session::Enqueued,
    state::AppState,
};

pub async fn save(
    ctx: &SerenityContext,
    msg: &Message,
    state: &Arc<AppState>,
    name: &str,
) -> Result<()> {
    let guild_id = msg.guild_id.ok_or_else(|| anyhow!("not in a guild"))?;
    let tracks = match state.sessions.get(guild_id) {
        Some(session) => session.tracks().await,
        None => Vec::new(),
    };
    if tracks.is_empty() {
        return reply_error(ctx, msg, &UserInputError::NothingToSave.into()).await;
    }
    match state.playlists.save(guild_id, name, &tracks).await {
        Ok(saved) => {
            reply(
                ctx,
                msg,
                format!("💾 Saved **{saved}** ({} tracks)", tracks.len()),
            )
            .await
        }
        Err(e) => reply_error(ctx, msg, &e).await,
    }
}

pub async fn load(
    ctx: &SerenityContext,
    msg: &Message,
    state: &Arc<AppState>,
    name: &str,
) -> Result<()> {
    let guild_id = msg.guild_id.ok_or_else(|| anyhow!("not in a guild"))?;
    if !require_premium(ctx, msg, state, guild_id).await? {
        return Ok(());
    }

    let outcome: Result<(usize, Enqueued), BotError> = async {
        let tracks = state.playlists.load(guild_id, name).await?;
        let count = tracks.len();
        let voice = voice_channel_of(ctx, guild_id, msg.author.id);
        let session = state.sessions.get_or_create(guild_id);
        let enqueued = session.play_tracks(tracks, voice, msg.channel_id).await?;
        Ok((count, enqueued))
    }
    .await;

    match outcome {
        Ok((count, _)) => reply(ctx, msg, format!("📂 Loaded {count} tracks")).await,
        Err(e) => reply_error(ctx, msg, &e).await,
    }
}
