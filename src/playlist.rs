//! Saved playlists, one JSON file per guild and name.

use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serenity::all::GuildId;
use tracing::{debug, info};

use crate::{
    error::{BotResult, UpstreamError, UserInputError},
    track::Track,
};

const MAX_NAME_CHARS: usize = 64;

#[async_trait]
pub trait PlaylistStore: Send + Sync {
    /// Stores `tracks` under `name`, replacing any previous list. Returns the
    /// name the list was saved as.
    async fn save(&self, guild_id: GuildId, name: &str, tracks: &[Track]) -> BotResult<String>;
    async fn load(&self, guild_id: GuildId, name: &str) -> BotResult<Vec<Track>>;
}

#[derive(Debug, Serialize, Deserialize)]
struct SavedPlaylist {
    name: String,
    saved_at: DateTime<Utc>,
    tracks: Vec<Track>,
}

/// Keeps only ASCII alphanumerics, `_`, `-` and alphabetic characters from
/// any script, so a name can never escape its guild directory.
pub fn sanitize_name(raw: &str) -> String {
    raw.trim()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || c.is_alphabetic() || *c == '_' || *c == '-')
        .take(MAX_NAME_CHARS)
        .collect()
}

pub struct JsonPlaylistStore {
    root: PathBuf,
}

impl JsonPlaylistStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, guild_id: GuildId, name: &str) -> PathBuf {
        self.root
            .join(guild_id.get().to_string())
            .join(format!("{name}.json"))
    }
}

fn storage_err(path: &Path, e: impl std::fmt::Display) -> UpstreamError {
    UpstreamError::Storage(format!("{}: {e}", path.display()))
}

#[async_trait]
impl PlaylistStore for JsonPlaylistStore {
    async fn save(&self, guild_id: GuildId, name: &str, tracks: &[Track]) -> BotResult<String> {
        let name = sanitize_name(name);
        if name.is_empty() {
            return Err(UserInputError::EmptyPlaylistName.into());
        }
        if tracks.is_empty() {
            return Err(UserInputError::NothingToSave.into());
        }

        let path = self.path_for(guild_id, &name);
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| storage_err(dir, e))?;
        }
        let doc = SavedPlaylist {
            name: name.clone(),
            saved_at: Utc::now(),
            tracks: tracks.to_vec(),
        };
        let body = serde_json::to_vec_pretty(&doc).map_err(|e| storage_err(&path, e))?;

        // Write-then-rename so a crash mid-write never truncates an existing list.
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, body)
            .await
            .map_err(|e| storage_err(&tmp, e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| storage_err(&path, e))?;

        info!(guild = %guild_id, playlist = %name, tracks = tracks.len(), "saved playlist");
        Ok(name)
    }

    async fn load(&self, guild_id: GuildId, name: &str) -> BotResult<Vec<Track>> {
        let name = sanitize_name(name);
        if name.is_empty() {
            return Err(UserInputError::EmptyPlaylistName.into());
        }
        let path = self.path_for(guild_id, &name);
        let body = match tokio::fs::read(&path).await {
            Ok(body) => body,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(UserInputError::UnknownPlaylist(name).into());
            }
            Err(e) => return Err(storage_err(&path, e).into()),
        };
        let doc: SavedPlaylist = serde_json::from_slice(&body).map_err(|e| storage_err(&path, e))?;
        debug!(guild = %guild_id, playlist = %name, tracks = doc.tracks.len(), "loaded playlist");
        Ok(doc.tracks)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::error::BotError;

    fn tracks() -> Vec<Track> {
        vec![
            Track::new("one", "https://www.youtube.com/watch?v=aaaaaaaaaaa")
                .with_duration(Duration::from_secs(180)),
            Track::new("two", "https://www.youtube.com/watch?v=bbbbbbbbbbb").requested_by(42),
        ]
    }

    #[test]
    fn sanitize_strips_path_characters() {
        assert_eq!(sanitize_name("../../etc/passwd"), "etcpasswd");
        assert_eq!(sanitize_name("  chill-mix_2 "), "chill-mix_2");
        assert_eq!(sanitize_name("سهرة"), "سهرة");
        assert_eq!(sanitize_name("a b.c"), "abc");
        assert_eq!(sanitize_name("   "), "");
        assert_eq!(sanitize_name(&"x".repeat(200)).len(), MAX_NAME_CHARS);
    }

    #[tokio::test]
    async fn saved_list_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonPlaylistStore::new(dir.path());
        let guild = GuildId::new(7);

        let saved = store.save(guild, "road trip", &tracks()).await.unwrap();
        assert_eq!(saved, "roadtrip");

        let loaded = store.load(guild, "roadtrip").await.unwrap();
        assert_eq!(loaded, tracks());
        assert!(dir.path().join("7").join("roadtrip.json").exists());
    }

    #[tokio::test]
    async fn saving_again_replaces_the_list() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonPlaylistStore::new(dir.path());
        let guild = GuildId::new(7);

        store.save(guild, "mix", &tracks()).await.unwrap();
        store.save(guild, "mix", &tracks()[..1]).await.unwrap();

        assert_eq!(store.load(guild, "mix").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn playlists_are_scoped_per_guild() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonPlaylistStore::new(dir.path());
        store.save(GuildId::new(1), "mix", &tracks()).await.unwrap();

        let err = store.load(GuildId::new(2), "mix").await.unwrap_err();
        assert!(matches!(
            err,
            BotError::UserInput(UserInputError::UnknownPlaylist(ref n)) if n == "mix"
        ));
    }

    #[tokio::test]
    async fn empty_names_and_lists_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonPlaylistStore::new(dir.path());
        let guild = GuildId::new(7);

        let err = store.save(guild, "../", &tracks()).await.unwrap_err();
        assert!(matches!(err, BotError::UserInput(UserInputError::EmptyPlaylistName)));

        let err = store.save(guild, "mix", &[]).await.unwrap_err();
        assert!(matches!(err, BotError::UserInput(UserInputError::NothingToSave)));

        let err = store.load(guild, "").await.unwrap_err();
        assert!(matches!(err, BotError::UserInput(UserInputError::EmptyPlaylistName)));
    }

    #[tokio::test]
    async fn corrupt_file_is_a_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        let guild_dir = dir.path().join("7");
        std::fs::create_dir_all(&guild_dir).unwrap();
        std::fs::write(guild_dir.join("mix.json"), b"not json").unwrap();

        let store = JsonPlaylistStore::new(dir.path());
        let err = store.load(GuildId::new(7), "mix").await.unwrap_err();
        assert!(matches!(err, BotError::Upstream(UpstreamError::Storage(_))));
    }
}
