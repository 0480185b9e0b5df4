use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::CONTENT_TYPE;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serenity::all::GuildId;

use super::{EntitlementSource, PremiumStatus};
use crate::error::UpstreamError;

const API_KEY_HEADER: &str = "x-api-key";

/// Client for the billing service's premium endpoints.
#[derive(Debug, Clone)]
pub struct PremiumApi {
    http: reqwest::Client,
    base: String,
    api_key: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ExtendRequest<'a> {
    guild_id: &'a str,
    days: u32,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SetRequest<'a> {
    guild_id: &'a str,
    expires_at: DateTime<Utc>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExpiryResponse {
    expires_at: DateTime<Utc>,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: Option<String>,
}

impl PremiumApi {
    pub fn new(base: &str, api_key: &str, timeout: Duration) -> Result<Self, UpstreamError> {
        let http = reqwest::Client::builder()
            .user_agent("maqam-bot/0.1")
            .timeout(timeout)
            .build()?;
        Ok(Self {
            http,
            base: base.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }

    pub async fn status(&self, guild_id: GuildId) -> Result<PremiumStatus, UpstreamError> {
        let resp = self
            .http
            .get(format!("{}/v1/premium/{}", self.base, guild_id))
            .send()
            .await?;
        decode(resp).await
    }

    /// Adds `days` to the guild's subscription; returns the new expiry.
    pub async fn extend(&self, guild_id: GuildId, days: u32) -> Result<DateTime<Utc>, UpstreamError> {
        let guild = guild_id.to_string();
        let body = ExtendRequest {
            guild_id: &guild,
            days,
        };
        self.write("extend", &body).await
    }

    /// Overwrites the guild's expiry; returns the stored value.
    pub async fn set(
        &self,
        guild_id: GuildId,
        expires_at: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, UpstreamError> {
        let guild = guild_id.to_string();
        let body = SetRequest {
            guild_id: &guild,
            expires_at,
        };
        self.write("set", &body).await
    }

    async fn write<B: Serialize>(&self, op: &str, body: &B) -> Result<DateTime<Utc>, UpstreamError> {
        let resp = self
            .http
            .post(format!("{}/v1/premium/{op}", self.base))
            .header(CONTENT_TYPE, "application/json")
            .header(API_KEY_HEADER, &self.api_key)
            .json(body)
            .send()
            .await?;
        let parsed: ExpiryResponse = decode(resp).await?;
        Ok(parsed.expires_at)
    }
}

async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, UpstreamError> {
    let status = resp.status();
    let text = resp.text().await?;
    if !status.is_success() {
        let message = serde_json::from_str::<ErrorBody>(&text)
            .ok()
            .and_then(|b| b.error)
            .unwrap_or_else(|| "API error".to_string());
        return Err(UpstreamError::Status { status, message });
    }
    serde_json::from_str(&text).map_err(|e| UpstreamError::Malformed(e.to_string()))
}

#[async_trait]
impl EntitlementSource for PremiumApi {
    async fn fetch_status(&self, guild_id: GuildId) -> Result<PremiumStatus, UpstreamError> {
        self.status(guild_id).await
    }
}

/// Stand-in used when no billing service is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct Unconfigured;

#[async_trait]
impl EntitlementSource for Unconfigured {
    async fn fetch_status(&self, _guild_id: GuildId) -> Result<PremiumStatus, UpstreamError> {
        Err(UpstreamError::NotConfigured)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use httpmock::prelude::*;
    use serde_json::json;

    use super::*;

    fn api(server: &MockServer) -> PremiumApi {
        PremiumApi::new(&server.base_url(), "secret", Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn status_parses_active_guild() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/v1/premium/42");
                then.status(200)
                    .json_body(json!({"active": true, "expiresAt": "2030-01-01T00:00:00Z"}));
            })
            .await;

        let status = api(&server).status(GuildId::new(42)).await.unwrap();
        assert!(status.active);
        assert_eq!(
            status.expires_at,
            Some(Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap())
        );
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn null_expiry_is_accepted() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/v1/premium/7");
                then.status(200).json_body(json!({"active": false, "expiresAt": null}));
            })
            .await;

        let status = api(&server).status(GuildId::new(7)).await.unwrap();
        assert_eq!(
            status,
            PremiumStatus {
                active: false,
                expires_at: None
            }
        );
    }

    #[tokio::test]
    async fn non_success_is_an_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/v1/premium/42");
                then.status(503).json_body(json!({"error": "maintenance"}));
            })
            .await;

        let err = api(&server).status(GuildId::new(42)).await.unwrap_err();
        match err {
            UpstreamError::Status { status, message } => {
                assert_eq!(status.as_u16(), 503);
                assert_eq!(message, "maintenance");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn malformed_body_is_an_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/v1/premium/42");
                then.status(200).body("<html>oops</html>");
            })
            .await;

        let err = api(&server).status(GuildId::new(42)).await.unwrap_err();
        assert!(matches!(err, UpstreamError::Malformed(_)));
    }

    #[tokio::test]
    async fn extend_sends_api_key_and_days() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1/premium/extend")
                    .header("x-api-key", "secret")
                    .json_body(json!({"guildId": "42", "days": 30}));
                then.status(200)
                    .json_body(json!({"expiresAt": "2030-01-31T00:00:00Z"}));
            })
            .await;

        let expiry = api(&server).extend(GuildId::new(42), 30).await.unwrap();
        assert_eq!(expiry, Utc.with_ymd_and_hms(2030, 1, 31, 0, 0, 0).unwrap());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn set_posts_iso_timestamp() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1/premium/set")
                    .header("x-api-key", "secret")
                    .json_body(json!({"guildId": "42", "expiresAt": "2031-05-01T00:00:00Z"}));
                then.status(200)
                    .json_body(json!({"expiresAt": "2031-05-01T00:00:00Z"}));
            })
            .await;

        let at = Utc.with_ymd_and_hms(2031, 5, 1, 0, 0, 0).unwrap();
        assert_eq!(api(&server).set(GuildId::new(42), at).await.unwrap(), at);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn rejected_write_surfaces_message() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/premium/extend");
                then.status(401).json_body(json!({"error": "bad key"}));
            })
            .await;

        let err = api(&server).extend(GuildId::new(42), 1).await.unwrap_err();
        assert!(err.to_string().contains("bad key"));
    }

    #[tokio::test]
    async fn unconfigured_source_always_fails() {
        let err = Unconfigured.fetch_status(GuildId::new(1)).await.unwrap_err();
        assert!(matches!(err, UpstreamError::NotConfigured));
    }
}
