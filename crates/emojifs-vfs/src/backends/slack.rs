//! Slack custom emoji.
//!
//! One service per workspace token. The workspace is a single collection,
//! so it mounts with [`Layout::Flat`]. Uploads go through the
//! (undocumented, non-Enterprise) `emoji.add` endpoint.

use async_trait::async_trait;
use bytes::Bytes;
use regex::Regex;
use serde::{Deserialize, Deserializer};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};

use crate::adapter::{EmojiService, Layout};
use crate::api::{
    ApiRequest, ApiResponse, DEFAULT_BACKOFF, FilePart, HttpTransport, RateLimitPolicy,
    RateLimitedClient,
};
use crate::emoji::{Collection, ContentLocator, Entity, ImageFormat};
use crate::vfs::{VfsError, VfsResult};

/// Web API root used until `auth.test` reveals the workspace URL.
pub const SLACK_API: &str = "https://slack.com/api/";

/// A workspace nobody belongs to; Slack answers it with a list of the
/// workspaces the cookie is signed in to.
const SENTINEL_WORKSPACE: &str = "https://emojifs-wasteland.slack.com";

const POLICY: RateLimitPolicy = RateLimitPolicy {
    hint_header: "Retry-After",
    default_backoff: DEFAULT_BACKOFF,
};

/// Every Slack response is an envelope with an `ok` flag.
fn check_ok(response: &ApiResponse) -> VfsResult<()> {
    #[derive(Deserialize)]
    struct Envelope {
        ok: bool,
        #[serde(default)]
        error: Option<String>,
    }

    let envelope: Envelope = response.json()?;
    if envelope.ok {
        return Ok(());
    }
    let error = envelope.error.unwrap_or_else(|| "unknown_error".to_string());
    tracing::error!(error = %error, "slack call failed");
    Err(VfsError::upstream(response.status, error))
}

#[derive(Debug, Deserialize)]
struct AuthTest {
    url: String,
    #[serde(default)]
    team: String,
    #[serde(default)]
    team_id: String,
    user_id: String,
}

#[derive(Debug, Deserialize)]
struct UsersInfo {
    user: SlackUser,
}

#[derive(Debug, Deserialize)]
struct SlackUser {
    name: String,
    #[serde(default)]
    is_admin: bool,
    #[serde(default)]
    is_owner: bool,
    #[serde(default)]
    is_primary_owner: bool,
}

/// One entry of `emoji.adminList`.
#[derive(Debug, Deserialize)]
struct SlackEmoji {
    name: String,
    url: String,
    #[serde(default, deserialize_with = "flag")]
    is_alias: bool,
    #[serde(default)]
    alias_for: String,
    #[serde(default)]
    created: Option<u64>,
    #[serde(default)]
    user_display_name: String,
}

/// Slack sends booleans as either `true` or `1`.
fn flag<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Int(i64),
    }
    Ok(match Flag::deserialize(deserializer)? {
        Flag::Bool(b) => b,
        Flag::Int(i) => i != 0,
    })
}

impl From<SlackEmoji> for Entity {
    fn from(e: SlackEmoji) -> Self {
        let alias_for = (e.is_alias && !e.alias_for.is_empty()).then_some(e.alias_for);
        Entity {
            name: e.name,
            id: None,
            locator: ContentLocator::new(e.url),
            alias_for,
            created: e.created.map(|secs| UNIX_EPOCH + Duration::from_secs(secs)),
            creator: e.user_display_name,
        }
    }
}

/// `https://acme.slack.com/` → `acme`.
fn workspace_from_url(url: &str) -> Option<String> {
    let host = url.strip_prefix("https://")?.split('/').next()?;
    host.strip_suffix(".slack.com")
        .filter(|name| !name.is_empty() && !name.contains('.'))
        .map(str::to_string)
}

/// One Slack workspace.
#[derive(Debug)]
pub struct SlackService {
    client: RateLimitedClient,
    workspace: Collection,
}

impl SlackService {
    /// Authenticate `token` and discover its workspace.
    pub async fn connect(transport: Arc<dyn HttpTransport>, token: &str) -> VfsResult<Self> {
        Self::connect_at(transport, token, SLACK_API).await
    }

    /// [`connect`](Self::connect) against a different API root.
    pub async fn connect_at(
        transport: Arc<dyn HttpTransport>,
        token: &str,
        api_root: &str,
    ) -> VfsResult<Self> {
        let client = RateLimitedClient::new("slack", transport, api_root, POLICY)
            .with_authorization(format!("Bearer {}", token))
            .with_body_check(check_ok);

        let auth: AuthTest = client.request_json(client.get("auth.test")).await?;
        // Later calls go to the workspace's own host.
        let client = client.with_base_url(format!("{}api/", auth.url));
        let name = workspace_from_url(&auth.url).unwrap_or(auth.team);

        let info: UsersInfo = client
            .request_json(client.get("users.info").with_query("user", &auth.user_id))
            .await?;
        let user = info.user;
        let admin = user.is_admin || user.is_owner || user.is_primary_owner;
        tracing::info!(workspace = %name, user = %user.name, admin, "authenticated to Slack");

        Ok(Self {
            client,
            workspace: Collection {
                id: auth.team_id,
                name,
                // Admin is sufficient but not necessary to manage emoji, so
                // let the API decide.
                writable: true,
            },
        })
    }

    /// Workspace name as discovered (or as renamed).
    pub fn workspace(&self) -> &str {
        &self.workspace.name
    }

    /// Present the workspace under a different name.
    pub fn renamed(mut self, name: impl Into<String>) -> Self {
        self.workspace.name = name.into();
        self
    }
}

#[async_trait]
impl EmojiService for SlackService {
    fn name(&self) -> &str {
        &self.workspace.name
    }

    fn layout(&self) -> Layout {
        Layout::Flat
    }

    async fn list_collections(&self) -> VfsResult<Vec<Collection>> {
        Ok(vec![self.workspace.clone()])
    }

    async fn list_entities(&self, _collection: &Collection) -> VfsResult<Vec<Entity>> {
        let emoji: Vec<SlackEmoji> = self
            .client
            .request_all_pages(self.client.get("emoji.adminList"), "emoji")
            .await?;
        tracing::debug!(workspace = %self.workspace.name, count = emoji.len(), "listed emoji");
        Ok(emoji.into_iter().map(Entity::from).collect())
    }

    async fn upload(
        &self,
        _collection: &Collection,
        name: &str,
        format: ImageFormat,
        data: Bytes,
    ) -> VfsResult<()> {
        let image = FilePart {
            field: "image".to_string(),
            filename: format!("{}.{}", name, format.mime_subtype()),
            mime: format.mime_type().to_string(),
            data,
        };
        let request = self
            .client
            .post("emoji.add")
            .with_multipart([("mode", "data"), ("name", name)], image);
        self.client.request(request).await?;
        Ok(())
    }

    async fn delete(&self, _collection: &Collection, entity: &Entity) -> VfsResult<()> {
        let request = self
            .client
            .post("emoji.remove")
            .with_form([("name", entity.name.as_str())]);
        self.client.request(request).await?;
        Ok(())
    }

    async fn alias(
        &self,
        _collection: &Collection,
        target: &Entity,
        alias_name: &str,
    ) -> VfsResult<()> {
        let request = self.client.post("emoji.add").with_form([
            ("mode", "alias"),
            ("name", alias_name),
            ("alias_for", target.name.as_str()),
        ]);
        self.client.request(request).await?;
        Ok(())
    }
}

/// The `d` value from a cookie header, or the whole string if it is a bare value.
fn login_cookie(cookie: &str) -> &str {
    cookie
        .split(';')
        .map(str::trim)
        .find_map(|part| part.strip_prefix("d="))
        .unwrap_or_else(|| cookie.trim())
}

fn compile(pattern: &str) -> VfsResult<Regex> {
    Regex::new(pattern).map_err(|e| VfsError::other(format!("bad pattern {}: {}", pattern, e)))
}

/// Workspace URLs mentioned on the sentinel page.
fn signed_in_workspaces(page: &str) -> VfsResult<BTreeSet<String>> {
    let plain = compile(r"(https://[a-zA-Z0-9\-]+\.slack\.com)")?;
    let quoted = compile(r"&quot;url&quot;:&quot;(https:\\/\\/[a-zA-Z0-9\-]+\.slack\.com)")?;

    let mut workspaces: BTreeSet<String> = plain
        .captures_iter(page)
        .map(|c| c[1].to_string())
        .collect();
    workspaces.extend(quoted.captures_iter(page).map(|c| c[1].replace('\\', "")));
    for ignored in ["https://status.slack.com", "https://api.slack.com", SENTINEL_WORKSPACE] {
        workspaces.remove(ignored);
    }
    Ok(workspaces)
}

/// API tokens embedded in a `/customize/emoji` page.
fn page_tokens(page: &str) -> VfsResult<Vec<String>> {
    let token = compile(r#""api_token":"(xox[a-zA-Z]-[a-zA-Z0-9-]+)""#)?;
    Ok(token.captures_iter(page).map(|c| c[1].to_string()).collect())
}

/// Find an API token for every workspace a login cookie is signed in to.
///
/// Workspaces whose page cannot be fetched are logged and skipped.
pub async fn scrape_tokens(transport: &dyn HttpTransport, cookie: &str) -> VfsResult<Vec<String>> {
    let cookie_header = format!("d={}", login_cookie(cookie));
    let get = |url: String| ApiRequest::get(url).with_header("Cookie", cookie_header.clone());

    let response = transport.send(get(SENTINEL_WORKSPACE.to_string())).await?;
    if !response.is_success() {
        return Err(VfsError::upstream(response.status, response.text()));
    }
    let workspaces = signed_in_workspaces(&response.text())?;

    let mut tokens = Vec::new();
    for workspace in workspaces {
        let url = format!("{}/customize/emoji", workspace);
        match transport.send(get(url)).await {
            Ok(response) if response.is_success() => {
                let found = page_tokens(&response.text())?;
                tracing::debug!(workspace = %workspace, count = found.len(), "scraped tokens");
                tokens.extend(found);
            }
            Ok(response) => {
                tracing::error!(workspace = %workspace, status = response.status, "token scrape failed");
            }
            Err(e) => {
                tracing::error!(workspace = %workspace, error = %e, "token scrape failed");
            }
        }
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::RequestBody;
    use crate::api::transport::Method;
    use crate::api::transport::mock::MockTransport;
    use serde_json::json;

    fn mock_workspace() -> Arc<MockTransport> {
        let mock = Arc::new(MockTransport::new());
        mock.on(
            Method::Get,
            "/auth.test",
            ApiResponse::json_ok(json!({
                "ok": true,
                "url": "https://acme.slack.com/",
                "team": "Acme Corp",
                "team_id": "T01",
                "user_id": "U01",
            })),
        )
        .on(
            Method::Get,
            "/users.info",
            ApiResponse::json_ok(json!({
                "ok": true,
                "user": {"name": "alice", "is_admin": false, "is_owner": true},
            })),
        );
        mock
    }

    #[tokio::test]
    async fn test_connect() {
        let mock = mock_workspace();
        let slack = SlackService::connect(mock.clone(), "xoxp-1").await.unwrap();

        assert_eq!(slack.workspace(), "acme");
        let requests = mock.requests();
        assert_eq!(requests[0].url, "https://slack.com/api/auth.test");
        assert_eq!(requests[1].url, "https://acme.slack.com/api/users.info");
        assert_eq!(requests[1].query_param("user"), Some("U01"));
        assert!(
            requests[0]
                .headers
                .iter()
                .any(|(k, v)| k == "Authorization" && v == "Bearer xoxp-1")
        );

        let slack = slack.renamed("work");
        assert_eq!(slack.list_collections().await.unwrap()[0].name, "work");
    }

    #[tokio::test]
    async fn test_not_ok_is_upstream_failure() {
        let mock = Arc::new(MockTransport::new());
        mock.on(
            Method::Get,
            "/auth.test",
            ApiResponse::json_ok(json!({"ok": false, "error": "invalid_auth"})),
        );
        let err = SlackService::connect(mock, "bad").await.unwrap_err();
        assert!(matches!(err, VfsError::Upstream { ref body, .. } if body == "invalid_auth"));
    }

    #[tokio::test]
    async fn test_list_emoji_pages() {
        let mock = mock_workspace();
        mock.on(
            Method::Get,
            "/emoji.adminList",
            ApiResponse::json_ok(json!({
                "ok": true,
                "emoji": [{
                    "name": "parrot",
                    "url": "https://emoji.slack-edge.com/T01/parrot/abc.gif",
                    "is_alias": 0,
                    "alias_for": "",
                    "created": 1_600_000_000u64,
                    "user_display_name": "bob",
                }],
                "paging": {"count": 1, "total": 2, "page": 1, "pages": 2},
            })),
        )
        .on(
            Method::Get,
            "/emoji.adminList",
            ApiResponse::json_ok(json!({
                "ok": true,
                "emoji": [{
                    "name": "party",
                    "url": "https://emoji.slack-edge.com/T01/parrot/abc.gif",
                    "is_alias": true,
                    "alias_for": "parrot",
                    "created": 1_600_000_100u64,
                    "user_display_name": "carol",
                }],
                "paging": {"count": 1, "total": 2, "page": 2, "pages": 2},
            })),
        );

        let slack = SlackService::connect(mock.clone(), "xoxp-1").await.unwrap();
        let workspace = slack.list_collections().await.unwrap().remove(0);
        let emoji = slack.list_entities(&workspace).await.unwrap();

        assert_eq!(emoji.len(), 2);
        assert_eq!(emoji[0].filename(), "parrot.gif");
        assert_eq!(emoji[0].creator, "bob");
        assert!(!emoji[0].is_alias());
        assert_eq!(
            emoji[0].created,
            Some(UNIX_EPOCH + Duration::from_secs(1_600_000_000))
        );
        assert_eq!(emoji[1].link_target().as_deref(), Some("parrot.gif"));
        assert_eq!(mock.count(Method::Get, "/emoji.adminList"), 2);
    }

    #[tokio::test]
    async fn test_upload_is_multipart() {
        let mock = mock_workspace();
        mock.on(Method::Post, "/emoji.add", ApiResponse::json_ok(json!({"ok": true})));

        let slack = SlackService::connect(mock.clone(), "xoxp-1").await.unwrap();
        let workspace = slack.list_collections().await.unwrap().remove(0);
        slack
            .upload(&workspace, "cat", ImageFormat::Jpeg, Bytes::from_static(b"JFIF"))
            .await
            .unwrap();

        let sent = mock.requests().pop().unwrap();
        assert_eq!(sent.url, "https://acme.slack.com/api/emoji.add");
        match sent.body {
            RequestBody::Multipart { fields, file } => {
                assert!(fields.contains(&("mode".to_string(), "data".to_string())));
                assert!(fields.contains(&("name".to_string(), "cat".to_string())));
                assert_eq!(file.field, "image");
                assert_eq!(file.mime, "image/jpeg");
                assert_eq!(&file.data[..], b"JFIF");
            }
            other => panic!("expected multipart, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_alias_and_delete() {
        let mock = mock_workspace();
        mock.on(Method::Post, "/emoji.add", ApiResponse::json_ok(json!({"ok": true})))
            .on(Method::Post, "/emoji.remove", ApiResponse::json_ok(json!({"ok": true})));

        let slack = SlackService::connect(mock.clone(), "xoxp-1").await.unwrap();
        let workspace = slack.list_collections().await.unwrap().remove(0);
        let parrot = Entity {
            name: "parrot".into(),
            id: None,
            locator: ContentLocator::new("https://e/parrot.gif"),
            alias_for: None,
            created: None,
            creator: String::new(),
        };

        slack.alias(&workspace, &parrot, "party").await.unwrap();
        slack.delete(&workspace, &parrot).await.unwrap();

        let requests = mock.requests();
        let RequestBody::Form(alias) = &requests[2].body else {
            panic!("alias should be a form post");
        };
        assert!(alias.contains(&("alias_for".to_string(), "parrot".to_string())));
        assert!(alias.contains(&("name".to_string(), "party".to_string())));
        let RequestBody::Form(remove) = &requests[3].body else {
            panic!("remove should be a form post");
        };
        assert_eq!(remove, &vec![("name".to_string(), "parrot".to_string())]);
    }

    #[test]
    fn test_workspace_from_url() {
        assert_eq!(workspace_from_url("https://acme.slack.com/").as_deref(), Some("acme"));
        assert_eq!(workspace_from_url("https://a.b.slack.com/"), None);
        assert_eq!(workspace_from_url("https://example.com/"), None);
    }

    #[test]
    fn test_login_cookie() {
        assert_eq!(login_cookie("xoxd-abc"), "xoxd-abc");
        assert_eq!(login_cookie("b=1; d=xoxd-abc; x=2"), "xoxd-abc");
    }

    #[tokio::test]
    async fn test_scrape_tokens() {
        let mock = MockTransport::new();
        mock.on(
            Method::Get,
            "emojifs-wasteland.slack.com",
            ApiResponse::new(
                200,
                r#"<a href="https://acme.slack.com">acme</a> https://status.slack.com
                   &quot;url&quot;:&quot;https:\/\/beta.slack.com&quot;"#,
            ),
        )
        .on(
            Method::Get,
            "acme.slack.com/customize/emoji",
            ApiResponse::new(200, r#"{"api_token":"xoxs-111-aaa","x":1}"#),
        )
        .on(
            Method::Get,
            "beta.slack.com/customize/emoji",
            ApiResponse::new(500, "oops"),
        );

        let tokens = scrape_tokens(&mock, "d=xoxd-secret").await.unwrap();
        assert_eq!(tokens, vec!["xoxs-111-aaa"]);

        assert_eq!(mock.count(Method::Get, "status.slack.com/customize/emoji"), 0);
        assert!(
            mock.requests()
                .iter()
                .all(|r| r.headers.contains(&("Cookie".to_string(), "d=xoxd-secret".to_string())))
        );
    }
}
