//! Owner-only entitlement administration.

use std::sync::Arc;

use anyhow::{Result, anyhow};
use chrono::{DateTime, NaiveDate, Utc};
use serenity::all::{Context as SerenityContext, GuildId, Message};
use tracing::info;

use super::{reply, reply_error};
use crate::{
    discord::invite_url,
    entitlement::{PremiumApi, remaining},
    error::{BotError, UpstreamError, UserInputError},
    state::AppState,
    track::format_remaining,
};

fn parse_guild(raw: Option<&String>) -> Result<GuildId, UserInputError> {
    raw.and_then(|s| s.parse::<u64>().ok())
        .filter(|id| *id != 0)
        .map(GuildId::new)
        .ok_or_else(|| UserInputError::InvalidArguments("expected a numeric guild id".into()))
}

fn parse_days(raw: Option<&String>) -> Result<u32, UserInputError> {
    raw.and_then(|s| s.parse::<u32>().ok())
        .filter(|d| *d > 0)
        .ok_or_else(|| UserInputError::InvalidArguments("days must be a positive number".into()))
}

/// Midnight UTC of a `YYYY-MM-DD` date.
fn parse_date(raw: Option<&String>) -> Result<DateTime<Utc>, UserInputError> {
    raw.and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok())
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
        .ok_or_else(|| UserInputError::InvalidArguments("expected a date as YYYY-MM-DD".into()))
}

fn api(state: &AppState) -> Result<&PremiumApi, BotError> {
    state
        .premium_api
        .as_ref()
        .ok_or(BotError::Upstream(UpstreamError::NotConfigured))
}

fn format_expiry(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M UTC").to_string()
}

pub async fn invite(ctx: &SerenityContext, msg: &Message) -> Result<()> {
    let app = ctx.http.get_current_application_info().await?;
    reply(
        ctx,
        msg,
        format!(
            "🔗 **Bot Invite**:\n{}\n\nOnce it joins, extend the new server's subscription with `!addpremium`.",
            invite_url(app.id)
        ),
    )
    .await
}

pub async fn add_premium(
    ctx: &SerenityContext,
    msg: &Message,
    state: &Arc<AppState>,
    args: &[String],
) -> Result<()> {
    let outcome: Result<(GuildId, DateTime<Utc>), BotError> = async {
        let guild_id = parse_guild(args.first())?;
        let days = parse_days(args.get(1))?;
        let expires_at = api(state)?.extend(guild_id, days).await?;
        Ok((guild_id, expires_at))
    }
    .await;

    match outcome {
        Ok((guild_id, expires_at)) => {
            state.entitlements.invalidate(guild_id);
            info!(guild = %guild_id, %expires_at, "subscription extended");
            reply(
                ctx,
                msg,
                format!("✅ Extended until **{}**", format_expiry(expires_at)),
            )
            .await
        }
        Err(BotError::UserInput(_)) => {
            reply(ctx, msg, "Usage: `!addpremium <GuildID> <Days>`").await
        }
        Err(e) => reply_error(ctx, msg, &e).await,
    }
}

pub async fn set_premium(
    ctx: &SerenityContext,
    msg: &Message,
    state: &Arc<AppState>,
    args: &[String],
) -> Result<()> {
    let outcome: Result<(GuildId, DateTime<Utc>), BotError> = async {
        let guild_id = parse_guild(args.first())?;
        let at = parse_date(args.get(1))?;
        let expires_at = api(state)?.set(guild_id, at).await?;
        Ok((guild_id, expires_at))
    }
    .await;

    match outcome {
        Ok((guild_id, expires_at)) => {
            state.entitlements.invalidate(guild_id);
            info!(guild = %guild_id, %expires_at, "subscription set");
            reply(
                ctx,
                msg,
                format!("✅ Set to **{}**", format_expiry(expires_at)),
            )
            .await
        }
        Err(BotError::UserInput(_)) => {
            reply(ctx, msg, "Usage: `!setpremium <GuildID> <YYYY-MM-DD>`").await
        }
        Err(e) => reply_error(ctx, msg, &e).await,
    }
}

pub async fn check_premium(
    ctx: &SerenityContext,
    msg: &Message,
    state: &Arc<AppState>,
    guild: Option<String>,
) -> Result<()> {
    let guild_id = match guild {
        Some(raw) => match parse_guild(Some(&raw)) {
            Ok(id) => id,
            Err(e) => return reply_error(ctx, msg, &e.into()).await,
        },
        None => msg.guild_id.ok_or_else(|| anyhow!("not in a guild"))?,
    };

    let record = state.entitlements.get_entitlement(guild_id, true).await;
    let text = match (record.active, record.expires_at) {
        (true, Some(at)) => format!(
            "✅ Premium active, expires **{}** (remaining **{}**)",
            format_expiry(at),
            format_remaining(remaining(Some(at), Utc::now()))
        ),
        (true, None) => "✅ Premium active with no expiry".to_string(),
        (false, _) => "🚫 Not subscribed.".to_string(),
    };
    reply(ctx, msg, text).await
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn s(v: &str) -> String {
        v.to_string()
    }

    #[test]
    fn guild_ids_must_be_nonzero_numbers() {
        assert_eq!(parse_guild(Some(&s("123"))), Ok(GuildId::new(123)));
        assert!(parse_guild(Some(&s("0"))).is_err());
        assert!(parse_guild(Some(&s("abc"))).is_err());
        assert!(parse_guild(None).is_err());
    }

    #[test]
    fn days_must_be_positive() {
        assert_eq!(parse_days(Some(&s("30"))), Ok(30));
        assert!(parse_days(Some(&s("0"))).is_err());
        assert!(parse_days(Some(&s("-3"))).is_err());
    }

    #[test]
    fn dates_are_midnight_utc() {
        assert_eq!(
            parse_date(Some(&s("2026-01-31"))),
            Ok(Utc.with_ymd_and_hms(2026, 1, 31, 0, 0, 0).unwrap())
        );
        assert!(parse_date(Some(&s("31/01/2026"))).is_err());
        assert!(parse_date(Some(&s("2026-02-30"))).is_err());
    }
}
