use std::sync::Arc;

use anyhow::{Result, anyhow};
use serenity::all::{Context as SerenityContext, Message};

use super::{reply, reply_error};
use crate::{error::UserInputError, state::AppState};

pub async fn handle(ctx: &SerenityContext, msg: &Message, state: &Arc<AppState>) -> Result<()> {
    let guild_id = msg.guild_id.ok_or_else(|| anyhow!("not in a guild"))?;
    let Some(session) = state.sessions.get(guild_id) else {
        return reply_error(ctx, msg, &UserInputError::NothingPlaying.into()).await;
    };
    // Stop current and clear queue; the voice connection stays up for the next play.
    session.stop().await;
    reply(ctx, msg, "⏹️ Stopped and cleared the queue.").await
}
