//! Discord guild emoji.
//!
//! The user token sees every guild the account belongs to; each guild is a
//! collection under [`Layout::Grouped`]. Using a user token this way is
//! against Discord's terms, which is why the binary makes it opt-in.

use async_trait::async_trait;
use bytes::Bytes;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::adapter::{EmojiService, Layout};
use crate::api::{DEFAULT_BACKOFF, HttpTransport, RateLimitPolicy, RateLimitedClient};
use crate::emoji::{Collection, ContentLocator, Entity, ImageFormat};
use crate::vfs::VfsResult;

pub const DISCORD_API: &str = "https://discord.com/api/v6/";

const CDN: &str = "https://cdn.discordapp.com/emojis/";

/// Permission bit allowing emoji management in a guild.
const MANAGE_EMOJIS: u64 = 0x4000_0000;

/// Snowflake timestamps count milliseconds from 2015-01-01.
const DISCORD_EPOCH_MS: u64 = 1_420_070_400_000;

// Discord buckets rate limits more coarsely than per URL, and emoji routes
// have undocumented per-guild limits; per-URL tracking is an approximation.
const POLICY: RateLimitPolicy = RateLimitPolicy {
    hint_header: "X-RateLimit-Reset-After",
    default_backoff: DEFAULT_BACKOFF,
};

#[derive(Debug, Deserialize)]
struct DiscordUser {
    username: String,
    #[serde(default)]
    discriminator: String,
}

impl DiscordUser {
    fn display(&self) -> String {
        format!("{}#{}", self.username, self.discriminator)
    }
}

/// Permissions arrive as an integer or, in newer API versions, a string.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Permissions {
    Int(u64),
    Str(String),
}

impl Default for Permissions {
    fn default() -> Self {
        Permissions::Int(0)
    }
}

impl Permissions {
    fn bits(&self) -> u64 {
        match self {
            Permissions::Int(bits) => *bits,
            Permissions::Str(s) => s.parse().unwrap_or(0),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Guild {
    id: String,
    name: String,
    #[serde(default)]
    permissions: Permissions,
}

impl From<Guild> for Collection {
    fn from(g: Guild) -> Self {
        Collection {
            writable: g.permissions.bits() & MANAGE_EMOJIS != 0,
            id: g.id,
            name: g.name,
        }
    }
}

#[derive(Debug, Deserialize)]
struct DiscordEmoji {
    id: String,
    name: String,
    #[serde(default)]
    animated: bool,
    /// Only present with MANAGE_EMOJIS.
    #[serde(default)]
    user: Option<DiscordUser>,
}

impl From<DiscordEmoji> for Entity {
    fn from(e: DiscordEmoji) -> Self {
        let ext = if e.animated { "gif" } else { "png" };
        Entity {
            locator: ContentLocator::new(format!("{}{}.{}", CDN, e.id, ext)),
            created: snowflake_time(&e.id),
            creator: e.user.map(|u| u.display()).unwrap_or_default(),
            alias_for: None,
            name: e.name,
            id: Some(e.id),
        }
    }
}

/// Creation time encoded in a snowflake id.
fn snowflake_time(id: &str) -> Option<SystemTime> {
    let id: u64 = id.parse().ok()?;
    Some(UNIX_EPOCH + Duration::from_millis((id >> 22) + DISCORD_EPOCH_MS))
}

/// Every guild one Discord account belongs to.
#[derive(Debug)]
pub struct DiscordService {
    client: RateLimitedClient,
    user: String,
}

impl DiscordService {
    pub async fn connect(transport: Arc<dyn HttpTransport>, token: &str) -> VfsResult<Self> {
        Self::connect_at(transport, token, DISCORD_API).await
    }

    /// [`connect`](Self::connect) against a different API root.
    pub async fn connect_at(
        transport: Arc<dyn HttpTransport>,
        token: &str,
        api_root: &str,
    ) -> VfsResult<Self> {
        let client =
            RateLimitedClient::new("discord", transport, api_root, POLICY).with_authorization(token);
        let me: DiscordUser = client.request_json(client.get("users/@me")).await?;
        let user = me.display();
        tracing::info!(user = %user, "authenticated to Discord");
        Ok(Self { client, user })
    }

    pub fn user(&self) -> &str {
        &self.user
    }
}

#[async_trait]
impl EmojiService for DiscordService {
    fn name(&self) -> &str {
        "discord"
    }

    fn layout(&self) -> Layout {
        Layout::Grouped
    }

    async fn list_collections(&self) -> VfsResult<Vec<Collection>> {
        let guilds: Vec<Guild> = self
            .client
            .request_json(self.client.get("users/@me/guilds"))
            .await?;
        tracing::debug!(count = guilds.len(), "listed guilds");
        Ok(guilds.into_iter().map(Collection::from).collect())
    }

    async fn list_entities(&self, guild: &Collection) -> VfsResult<Vec<Entity>> {
        let emoji: Vec<DiscordEmoji> = self
            .client
            .request_json(self.client.get(&format!("guilds/{}/emojis", guild.id)))
            .await?;
        Ok(emoji.into_iter().map(Entity::from).collect())
    }

    async fn upload(
        &self,
        guild: &Collection,
        name: &str,
        format: ImageFormat,
        data: Bytes,
    ) -> VfsResult<()> {
        let payload = json!({
            "name": name,
            "image": format.data_url(&data),
        });
        let request = self
            .client
            .post(&format!("guilds/{}/emojis", guild.id))
            .with_json(payload);
        self.client.request(request).await?;
        Ok(())
    }

    async fn delete(&self, guild: &Collection, entity: &Entity) -> VfsResult<()> {
        let id = entity.id.as_deref().unwrap_or(entity.name.as_str());
        let request = self
            .client
            .delete(&format!("guilds/{}/emojis/{}", guild.id, id));
        self.client.request(request).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::transport::mock::MockTransport;
    use crate::api::transport::{ApiResponse, Method};
    use crate::api::RequestBody;
    use crate::vfs::VfsError;

    async fn connected(mock: &Arc<MockTransport>) -> DiscordService {
        mock.on(
            Method::Get,
            "/users/@me",
            ApiResponse::json_ok(json!({"id": "1", "username": "ferris", "discriminator": "0001"})),
        );
        DiscordService::connect(mock.clone(), "tok").await.unwrap()
    }

    #[tokio::test]
    async fn test_connect_sends_raw_token() {
        let mock = Arc::new(MockTransport::new());
        let discord = connected(&mock).await;
        assert_eq!(discord.user(), "ferris#0001");

        let sent = &mock.requests()[0];
        assert_eq!(sent.url, "https://discord.com/api/v6/users/@me");
        assert!(sent.headers.contains(&("Authorization".to_string(), "tok".to_string())));
    }

    #[tokio::test]
    async fn test_guild_permissions() {
        let mock = Arc::new(MockTransport::new());
        let discord = connected(&mock).await;
        mock.on(
            Method::Get,
            "/users/@me/guilds",
            ApiResponse::json_ok(json!([
                {"id": "10", "name": "admins", "permissions": 0x4000_0000u64},
                {"id": "20", "name": "members", "permissions": 0},
                {"id": "30", "name": "strings", "permissions": "1073741824"},
                {"id": "40", "name": "bare"},
            ])),
        );

        let guilds = discord.list_collections().await.unwrap();
        let writable: Vec<_> = guilds.iter().map(|g| (g.id.as_str(), g.writable)).collect();
        assert_eq!(
            writable,
            vec![("10", true), ("20", false), ("30", true), ("40", false)]
        );
    }

    #[tokio::test]
    async fn test_list_emoji() {
        let mock = Arc::new(MockTransport::new());
        let discord = connected(&mock).await;
        mock.on(
            Method::Get,
            "/guilds/10/emojis",
            ApiResponse::json_ok(json!([
                {"id": "175928847299117063", "name": "blob", "animated": false,
                 "user": {"username": "alice", "discriminator": "1234"}},
                {"id": "175928847299117064", "name": "spin", "animated": true},
            ])),
        );
        let guild = Collection {
            id: "10".into(),
            name: "admins".into(),
            writable: true,
        };

        let emoji = discord.list_entities(&guild).await.unwrap();
        assert_eq!(emoji[0].filename(), "blob.png");
        assert_eq!(
            emoji[0].locator.as_str(),
            "https://cdn.discordapp.com/emojis/175928847299117063.png"
        );
        assert_eq!(emoji[0].creator, "alice#1234");
        assert_eq!(emoji[1].filename(), "spin.gif");
        assert_eq!(emoji[1].creator, "");
        // 175928847299117063 >> 22 = 41944705796 ms after the Discord epoch.
        assert_eq!(
            emoji[0].created,
            Some(UNIX_EPOCH + Duration::from_millis(1_462_015_105_796))
        );
    }

    #[tokio::test]
    async fn test_upload_as_data_url() {
        let mock = Arc::new(MockTransport::new());
        let discord = connected(&mock).await;
        mock.on(Method::Post, "/guilds/10/emojis", ApiResponse::new(201, "{}"));
        let guild = Collection {
            id: "10".into(),
            name: "g".into(),
            writable: true,
        };

        discord
            .upload(&guild, "hi", ImageFormat::Jpeg, Bytes::from_static(b"hi"))
            .await
            .unwrap();

        let sent = mock.requests().pop().unwrap();
        let RequestBody::Json(body) = sent.body else {
            panic!("upload should be JSON");
        };
        assert_eq!(body["name"], "hi");
        assert_eq!(body["image"], "data:image/jpeg;base64,aGk=");
    }

    #[tokio::test]
    async fn test_delete_by_id() {
        let mock = Arc::new(MockTransport::new());
        let discord = connected(&mock).await;
        mock.on(Method::Delete, "/guilds/10/emojis/99", ApiResponse::new(204, ""));
        let guild = Collection {
            id: "10".into(),
            name: "g".into(),
            writable: true,
        };
        let entity = Entity {
            name: "gone".into(),
            id: Some("99".into()),
            locator: ContentLocator::new("https://cdn.discordapp.com/emojis/99.png"),
            alias_for: None,
            created: None,
            creator: String::new(),
        };

        discord.delete(&guild, &entity).await.unwrap();
        assert_eq!(mock.count(Method::Delete, "/guilds/10/emojis/99"), 1);
    }

    #[tokio::test]
    async fn test_alias_not_supported() {
        let mock = Arc::new(MockTransport::new());
        let discord = connected(&mock).await;
        let guild = Collection {
            id: "10".into(),
            name: "g".into(),
            writable: true,
        };
        let entity = Entity {
            name: "x".into(),
            id: Some("1".into()),
            locator: ContentLocator::new("https://cdn.discordapp.com/emojis/1.png"),
            alias_for: None,
            created: None,
            creator: String::new(),
        };
        assert!(matches!(
            discord.alias(&guild, &entity, "y").await,
            Err(VfsError::NotSupported(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_after_hint() {
        let mock = Arc::new(MockTransport::new());
        let discord = connected(&mock).await;
        mock.on(
            Method::Get,
            "/users/@me/guilds",
            ApiResponse::new(429, "{}").with_header("X-RateLimit-Reset-After", "0.25"),
        )
        .on(Method::Get, "/users/@me/guilds", ApiResponse::json_ok(json!([])));

        let start = tokio::time::Instant::now();
        assert!(discord.list_collections().await.unwrap().is_empty());
        assert!(start.elapsed() >= Duration::from_millis(250));
        assert!(start.elapsed() < DEFAULT_BACKOFF);
    }
}
