use std::sync::Arc;

use crate::{
    config::Config,
    entitlement::{EntitlementCache, PremiumApi},
    playlist::PlaylistStore,
    session::SessionRegistry,
};

/// Everything a command handler needs, shared by the serenity event handler.
pub struct AppState {
    pub config: Config,
    pub entitlements: EntitlementCache,
    /// `None` when no billing service is configured; admin writes then fail.
    pub premium_api: Option<PremiumApi>,
    pub sessions: SessionRegistry,
    pub playlists: Arc<dyn PlaylistStore>,
}

impl AppState {
    pub fn is_owner(&self, user_id: u64) -> bool {
        self.config.owner_id == Some(user_id)
    }
}
