use std::sync::Arc;

use anyhow::Result;
use serenity::{
    all::{Context as SerenityContext, GatewayIntents, Guild, Http, Message, Ready},
    async_trait,
};
use songbird::{Config as VoiceConfig, Songbird, driver::{Bitrate, MixMode}, serenity::SerenityInit};
use tracing::{error, info, warn};

mod audio;
mod commands;
mod config;
mod discord;
mod entitlement;
mod error;
mod metrics;
mod playlist;
mod progress;
mod queue;
mod session;
mod state;
mod track;
mod voice;
mod web;

use crate::{
    audio::YtDlpResolver,
    config::Config,
    discord::DiscordStatusSink,
    entitlement::{EntitlementCache, EntitlementSource, PremiumApi, Unconfigured},
    metrics::METRICS,
    playlist::JsonPlaylistStore,
    session::{SessionDeps, SessionRegistry, SessionSettings},
    state::AppState,
    voice::SongbirdGateway,
};

struct Handler {
    state: Arc<AppState>,
}

#[async_trait]
impl serenity::prelude::EventHandler for Handler {
    async fn ready(&self, ctx: SerenityContext, ready: Ready) {
        info!("Logged in as {}", ready.user.name);
        METRICS.set_ready(true);

        if let Ok(app) = ctx.http.get_current_application_info().await {
            info!(
                "Invite this bot: {} (app_id={}, user_id={})",
                discord::invite_url(app.id),
                app.id,
                ready.user.id
            );
        }
    }

    async fn guild_create(&self, ctx: SerenityContext, guild: Guild, is_new: Option<bool>) {
        if is_new == Some(true) {
            discord::greet_new_guild(&ctx, &guild).await;
        }
    }

    async fn message(&self, ctx: SerenityContext, msg: Message) {
        commands::dispatch(&ctx, &msg, &self.state).await;
    }
}

fn bitrate() -> Bitrate {
    // Lower, fixed bitrate can reduce CPU usage and packet size, helping avoid stutter on busy hosts.
    let br = std::env::var("MAQAM_BITRATE")
        .ok()
        .and_then(|s| s.parse::<u32>().ok())
        .filter(|v| (16_000..=192_000).contains(v))
        .unwrap_or(96_000);
    Bitrate::BitsPerSecond(br as i32)
}

fn build_state(config: Config, voice: Arc<Songbird>, http: Arc<Http>) -> Result<AppState> {
    let premium_api = match &config.api_base {
        Some(base) => Some(PremiumApi::new(base, &config.api_key, config.http_timeout)?),
        None => None,
    };
    let source: Arc<dyn EntitlementSource> = match &premium_api {
        Some(api) => Arc::new(api.clone()),
        None => Arc::new(Unconfigured),
    };

    let deps = SessionDeps {
        gateway: Arc::new(SongbirdGateway::new(voice, bitrate())),
        resolver: Arc::new(YtDlpResolver),
        sink: Arc::new(DiscordStatusSink::new(http)),
        settings: SessionSettings {
            connect_timeout: config.connect_timeout,
            progress_interval: config.progress_interval,
            default_volume: config.default_volume,
        },
    };

    Ok(AppState {
        entitlements: EntitlementCache::new(source, config.premium_ttl),
        premium_api,
        sessions: SessionRegistry::new(deps),
        playlists: Arc::new(JsonPlaylistStore::new(config.playlists_dir.clone())),
        config,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env()?;

    // Commands are plain messages, so the bot needs to read message content.
    let intents = GatewayIntents::GUILDS
        | GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::MESSAGE_CONTENT
        | GatewayIntents::GUILD_VOICE_STATES;
    // Tune Songbird to reduce chance of audio hiccups under load.
    // - preallocated_tracks: avoid runtime allocations when starting a track
    // - use_softclip(false): small (~3%) perf win; safe since volume <= 1.0 and one track plays at a time
    let voice_cfg = {
        let mix = match std::env::var("MAQAM_MIX_MODE").as_deref() {
            Ok("mono") => MixMode::Mono,
            _ => MixMode::Stereo,
        };
        VoiceConfig::default()
            .preallocated_tracks(2)
            .use_softclip(false)
            .mix_mode(mix)
    };
    let voice = Songbird::serenity_from_config(voice_cfg);

    let http = Arc::new(Http::new(&config.token));
    let token = config.token.clone();
    let http_bind = config.http_bind.clone();
    info!(
        ttl_secs = config.premium_ttl.as_secs(),
        playlists = %config.playlists_dir.display(),
        "entitlement and playlist settings loaded"
    );
    let state = Arc::new(build_state(config, voice.clone(), http)?);

    let mut client = serenity::Client::builder(token, intents)
        .event_handler(Handler { state })
        .register_songbird_with(voice)
        .await?;

    if let Ok(dir) = audio::resolved_download_base_dir() {
        info!("Download cache dir: {}", dir.display());
    }
    info!("Commands: ش <query>, س, وقف, اوتو, ق, تكرار, رفع, خفض, حفظ <name>, تحميل <name>, ايقاف, كمل");
    info!(
        "Tunables: MAQAM_MIX_MODE=mono|stereo, MAQAM_BITRATE=16000..192000, DOWNLOAD_FOLDER=path"
    );

    tokio::spawn(async move {
        if let Err(e) = web::run_http(http_bind).await {
            warn!("health server stopped: {e}");
        }
    });

    if let Err(why) = client.start_autosharded().await {
        error!("Client error: {why:?}");
    }
    Ok(())
}
