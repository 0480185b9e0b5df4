//! Literal text commands, recognised anywhere in a guild.
//!
//! User commands are bare Arabic tokens; owner commands keep the `!` prefix.

use std::sync::Arc;

use anyhow::Result;
use serenity::all::{Context as SerenityContext, CreateEmbed, CreateMessage, Message};
use tracing::{debug, error};

use crate::{error::BotError, state::AppState};

mod admin;
mod controls;
mod next;
mod play;
mod playlist;
mod stop;

pub const VOLUME_STEP: i32 = 10;

const ERROR_COLOUR: u32 = 0xED4245;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Play(String),
    Skip,
    Stop,
    ToggleAutoplay,
    Queue,
    ToggleLoop,
    Volume(i32),
    SavePlaylist(String),
    LoadPlaylist(String),
    Pause,
    Resume,
    Invite,
    AddPremium(Vec<String>),
    SetPremium(Vec<String>),
    CheckPremium(Option<String>),
}

impl Command {
    fn owner_only(&self) -> bool {
        matches!(
            self,
            Command::Invite
                | Command::AddPremium(_)
                | Command::SetPremium(_)
                | Command::CheckPremium(_)
        )
    }
}

/// Maps a message body onto a command. Anything unrecognised is `None` and
/// gets ignored, since the bot shares channels with normal conversation.
pub fn parse(content: &str) -> Option<Command> {
    let content = content.trim();
    let (head, rest) = match content.split_once(char::is_whitespace) {
        Some((head, rest)) => (head, rest.trim()),
        None => (content, ""),
    };
    let args = || rest.split_whitespace().map(str::to_string).collect::<Vec<_>>();

    let cmd = match (head, rest.is_empty()) {
        ("ش", _) => Command::Play(rest.to_string()),
        ("س", true) => Command::Skip,
        ("وقف", true) => Command::Stop,
        ("اوتو", true) => Command::ToggleAutoplay,
        ("ق", true) => Command::Queue,
        ("تكرار", true) => Command::ToggleLoop,
        ("رفع", true) => Command::Volume(VOLUME_STEP),
        ("خفض", true) => Command::Volume(-VOLUME_STEP),
        ("حفظ", false) => Command::SavePlaylist(rest.to_string()),
        ("تحميل", false) => Command::LoadPlaylist(rest.to_string()),
        ("ايقاف", true) => Command::Pause,
        ("كمل", true) => Command::Resume,
        ("!invite", _) => Command::Invite,
        ("!addpremium", _) => Command::AddPremium(args()),
        ("!setpremium", _) => Command::SetPremium(args()),
        ("!checkpremium", _) => Command::CheckPremium(args().into_iter().next()),
        _ => return None,
    };
    Some(cmd)
}

pub async fn dispatch(ctx: &SerenityContext, msg: &Message, state: &Arc<AppState>) {
    if msg.author.bot {
        return;
    }
    let Some(cmd) = parse(&msg.content) else {
        return;
    };
    if msg.guild_id.is_none() {
        return;
    }
    if cmd.owner_only() && !state.is_owner(msg.author.id.get()) {
        debug!(user = %msg.author.id, "ignoring owner command from non-owner");
        return;
    }

    let label = format!("{cmd:?}");
    let outcome = match cmd {
        Command::Play(query) => play::handle(ctx, msg, state, &query).await,
        Command::Skip => next::handle(ctx, msg, state).await,
        Command::Stop => stop::handle(ctx, msg, state).await,
        Command::ToggleAutoplay => controls::toggle_autoplay(ctx, msg, state).await,
        Command::Queue => controls::queue(ctx, msg, state).await,
        Command::ToggleLoop => controls::toggle_loop(ctx, msg, state).await,
        Command::Volume(delta) => controls::volume(ctx, msg, state, delta).await,
        Command::Pause => controls::pause(ctx, msg, state).await,
        Command::Resume => controls::resume(ctx, msg, state).await,
        Command::SavePlaylist(name) => playlist::save(ctx, msg, state, &name).await,
        Command::LoadPlaylist(name) => playlist::load(ctx, msg, state, &name).await,
        Command::Invite => admin::invite(ctx, msg).await,
        Command::AddPremium(args) => admin::add_premium(ctx, msg, state, &args).await,
        Command::SetPremium(args) => admin::set_premium(ctx, msg, state, &args).await,
        Command::CheckPremium(guild) => admin::check_premium(ctx, msg, state, guild).await,
    };
    if let Err(why) = outcome {
        error!("{label} failed: {why:?}");
    }
}

/// Replies with a domain error; anything else is left to the caller.
async fn reply_error(ctx: &SerenityContext, msg: &Message, err: &BotError) -> Result<()> {
    let embed = CreateEmbed::new()
        .description(format!("❌ {}", err.user_message()))
        .colour(ERROR_COLOUR);
    msg.channel_id
        .send_message(&ctx.http, CreateMessage::new().embed(embed).reference_message(msg))
        .await?;
    Ok(())
}

async fn reply(ctx: &SerenityContext, msg: &Message, text: impl Into<String>) -> Result<()> {
    msg.reply(&ctx.http, text).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_tokens_map_to_commands() {
        assert_eq!(parse("س"), Some(Command::Skip));
        assert_eq!(parse("وقف"), Some(Command::Stop));
        assert_eq!(parse("اوتو"), Some(Command::ToggleAutoplay));
        assert_eq!(parse("ق"), Some(Command::Queue));
        assert_eq!(parse("تكرار"), Some(Command::ToggleLoop));
        assert_eq!(parse("رفع"), Some(Command::Volume(10)));
        assert_eq!(parse("خفض"), Some(Command::Volume(-10)));
        assert_eq!(parse("ايقاف"), Some(Command::Pause));
        assert_eq!(parse("  كمل  "), Some(Command::Resume));
    }

    #[test]
    fn play_keeps_the_whole_query() {
        assert_eq!(
            parse("ش  fairuz   kifak inta "),
            Some(Command::Play("fairuz   kifak inta".into()))
        );
        // An empty query still reaches the handler so it can explain usage.
        assert_eq!(parse("ش"), Some(Command::Play(String::new())));
    }

    #[test]
    fn playlist_commands_need_a_name() {
        assert_eq!(parse("حفظ سهرة"), Some(Command::SavePlaylist("سهرة".into())));
        assert_eq!(parse("تحميل road-trip"), Some(Command::LoadPlaylist("road-trip".into())));
        assert_eq!(parse("حفظ"), None);
        assert_eq!(parse("تحميل   "), None);
    }

    #[test]
    fn conversation_is_ignored() {
        assert_eq!(parse("س ok"), None);
        assert_eq!(parse("شكرا"), None);
        assert_eq!(parse("hello"), None);
        assert_eq!(parse(""), None);
    }

    #[test]
    fn owner_commands_collect_arguments() {
        assert_eq!(parse("!invite"), Some(Command::Invite));
        assert_eq!(
            parse("!addpremium 123 30"),
            Some(Command::AddPremium(vec!["123".into(), "30".into()]))
        );
        assert_eq!(
            parse("!setpremium 123 2026-01-31"),
            Some(Command::SetPremium(vec!["123".into(), "2026-01-31".into()]))
        );
        assert_eq!(parse("!checkpremium"), Some(Command::CheckPremium(None)));
        assert_eq!(
            parse("!checkpremium 99"),
            Some(Command::CheckPremium(Some("99".into())))
        );
        assert!(Command::Invite.owner_only());
        assert!(!Command::Skip.owner_only());
    }
}
