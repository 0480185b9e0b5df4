use std::time::Duration;

use thiserror::Error;

/// Anything the bot can report back to whoever issued a command.
#[derive(Debug, Error)]
pub enum BotError {
    #[error(transparent)]
    UserInput(#[from] UserInputError),
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum UserInputError {
    #[error("you must be in a voice channel")]
    NotInVoiceChannel,
    #[error("type a song name or a link after the command")]
    EmptyQuery,
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    #[error("nothing is playing")]
    NothingPlaying,
    #[error("playlist name must not be empty")]
    EmptyPlaylistName,
    #[error("no playlist named `{0}`")]
    UnknownPlaylist(String),
    #[error("there is nothing to save")]
    NothingToSave,
}

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("upstream answered {status}: {message}")]
    Status {
        status: reqwest::StatusCode,
        message: String,
    },
    #[error("malformed upstream payload: {0}")]
    Malformed(String),
    #[error("entitlement service is not configured")]
    NotConfigured,
    #[error("could not resolve `{query}`: {reason}")]
    Resolve { query: String, reason: String },
    #[error("playlist storage failed: {0}")]
    Storage(String),
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("voice connection was not ready within {0:?}")]
    Timeout(Duration),
    #[error("failed to join voice channel: {0}")]
    Join(String),
    #[error("not connected to a voice channel")]
    NotConnected,
    #[error("audio player failed: {0}")]
    Player(String),
}

pub type BotResult<T> = Result<T, BotError>;

impl BotError {
    /// Short text suitable for a chat reply.
    pub fn user_message(&self) -> String {
        match self {
            BotError::UserInput(e) => e.to_string(),
            BotError::Upstream(UpstreamError::Resolve { query, .. }) => {
                format!("couldn't find anything for `{query}`")
            }
            BotError::Upstream(e) => format!("service error: {e}"),
            BotError::Transport(TransportError::Timeout(_)) => {
                "couldn't connect to the voice channel, try again".to_string()
            }
            BotError::Transport(e) => e.to_string(),
        }
    }
}
