use std::sync::Arc;

use anyhow::{Result, anyhow};
use serenity::all::{Context as SerenityContext, CreateEmbed, CreateMessage, Message};

use super::reply_error;
use crate::{error::UserInputError, state::AppState};

pub async fn handle(ctx: &SerenityContext, msg: &Message, state: &Arc<AppState>) -> Result<()> {
    let guild_id = msg.guild_id.ok_or_else(|| anyhow!("not in a guild"))?;
    let Some(session) = state.sessions.get(guild_id) else {
        return reply_error(ctx, msg, &UserInputError::NothingPlaying.into()).await;
    };

    let embed = match session.skip().await {
        Ok(Some(track)) => CreateEmbed::new()
            .title("⏭️ Skipped")
            .description(format!("Up next: **{}**", track.title))
            .colour(0x00FF7F), // Spring green
        Ok(None) => CreateEmbed::new()
            .title("⏭️ Queue Ended")
            .description("Skipped, and there is nothing left to play.")
            .colour(0xFF6B6B),
        Err(e) => return reply_error(ctx, msg, &e).await,
    };
    msg.channel_id
        .send_message(&ctx.http, CreateMessage::new().embed(embed))
        .await?;
    Ok(())
}
