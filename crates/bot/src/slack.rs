//! Slack Web API adapter for [`ChatPlatform`].

use core::time::Duration;
use std::collections::{HashMap, HashSet};

use anyhow::{Context as _, Result, anyhow, bail};
use async_trait::async_trait;
use serde::{Deserialize, de::DeserializeOwned};
use serde_json::{Value, json};
use tracing::debug;

use plugin_core::{
    reply::Reply,
    services::{ChatPlatform, FileUpload, PostedMessage},
};

const MEMBERS_PAGE_SIZE: &str = "200";
const USERS_PAGE_SIZE: &str = "200";

/// Fields shared by every Web API response.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    ok: bool,
    error: Option<String>,
    #[serde(flatten)]
    body: T,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct MembersPage {
    members: Vec<String>,
    response_metadata: ResponseMetadata,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ResponseMetadata {
    next_cursor: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct UserInfo {
    user: SlackUser,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct UsersPage {
    members: Vec<SlackUser>,
    response_metadata: ResponseMetadata,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SlackUser {
    id: String,
    is_bot: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PostedBody {
    channel: Option<String>,
    ts: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct UploadTarget {
    upload_url: String,
    file_id: String,
}

#[derive(Debug, Default, Deserialize)]
struct Empty {}

#[derive(Clone)]
pub struct SlackClient {
    http: reqwest::Client,
    api_base: String,
    bot_token: String,
}

impl core::fmt::Debug for SlackClient {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SlackClient")
            .field("api_base", &self.api_base)
            .finish_non_exhaustive()
    }
}

impl SlackClient {
    pub fn new(api_base: &str, bot_token: &str, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("hitter-bot/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .context("building Slack HTTP client")?;
        Ok(Self {
            http,
            api_base: api_base.trim_end_matches('/').to_owned(),
            bot_token: bot_token.trim().to_owned(),
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/{method}", self.api_base)
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<T> {
        let response = request
            .bearer_auth(&self.bot_token)
            .send()
            .await
            .with_context(|| format!("slack api {method} request failed"))?;
        let status = response.status();
        if !status.is_success() {
            bail!("slack api {method} failed with status {}", status.as_u16());
        }
        let envelope: Envelope<T> = response
            .json()
            .await
            .with_context(|| format!("failed to decode slack {method}"))?;
        if !envelope.ok {
            bail!(
                "slack {method} failed: {}",
                envelope.error.unwrap_or_else(|| "unknown error".to_owned())
            );
        }
        Ok(envelope.body)
    }

    async fn get<T: DeserializeOwned>(&self, method: &str, query: &[(&str, &str)]) -> Result<T> {
        let request = self.http.get(self.method_url(method)).query(query);
        self.call(method, request).await
    }

    async fn post<T: DeserializeOwned>(&self, method: &str, payload: &Value) -> Result<T> {
        let request = self.http.post(self.method_url(method)).json(payload);
        self.call(method, request).await
    }

    /// Pages through `users.list` until every id in `wanted` is seen.
    async fn bot_flags(&self, wanted: &HashSet<&str>) -> Result<HashMap<String, bool>> {
        let mut flags = HashMap::with_capacity(wanted.len());
        let mut cursor = String::new();
        loop {
            let page: UsersPage = self
                .get(
                    "users.list",
                    &[("limit", USERS_PAGE_SIZE), ("cursor", cursor.as_str())],
                )
                .await?;
            flags.extend(
                page.members
                    .into_iter()
                    .filter(|u| wanted.contains(u.id.as_str()))
                    .map(|u| (u.id, u.is_bot)),
            );
            if flags.len() == wanted.len() || page.response_metadata.next_cursor.is_empty() {
                break;
            }
            cursor = page.response_metadata.next_cursor;
        }
        Ok(flags)
    }
}

/// Renders reply sections as mrkdwn blocks separated by dividers.
fn reply_blocks(reply: &Reply) -> Value {
    let mut blocks = Vec::with_capacity(reply.sections.len() * 2);
    for (i, section) in reply.sections.iter().enumerate() {
        if i > 0 {
            blocks.push(json!({ "type": "divider" }));
        }
        blocks.push(json!({
            "type": "section",
            "text": { "type": "mrkdwn", "text": section },
        }));
    }
    Value::Array(blocks)
}

#[async_trait]
impl ChatPlatform for SlackClient {
    async fn list_channel_members(&self, channel: &str) -> Result<Vec<String>> {
        let mut members = Vec::new();
        let mut cursor = String::new();
        loop {
            let page: MembersPage = self
                .get(
                    "conversations.members",
                    &[
                        ("channel", channel),
                        ("limit", MEMBERS_PAGE_SIZE),
                        ("cursor", cursor.as_str()),
                    ],
                )
                .await?;
            members.extend(page.members);
            if page.response_metadata.next_cursor.is_empty() {
                break;
            }
            cursor = page.response_metadata.next_cursor;
        }
        debug!(channel, count = members.len(), "Listed channel members");
        Ok(members)
    }

    async fn classify_users(&self, ids: &[String]) -> Result<(Vec<String>, Vec<String>)> {
        let wanted: HashSet<&str> = ids.iter().map(String::as_str).collect();
        let flags = self.bot_flags(&wanted).await?;
        debug!(requested = wanted.len(), listed = flags.len(), "Classified users");

        let mut humans = Vec::new();
        let mut bots = Vec::new();
        for id in ids {
            // Users from other workspaces are missing from users.list.
            let is_bot = match flags.get(id) {
                Some(is_bot) => *is_bot,
                None => {
                    let info: UserInfo = self.get("users.info", &[("user", id.as_str())]).await?;
                    info.user.is_bot
                }
            };
            if is_bot {
                bots.push(id.clone());
            } else {
                humans.push(id.clone());
            }
        }
        Ok((humans, bots))
    }

    async fn post_message(&self, channel: &str, reply: &Reply) -> Result<PostedMessage> {
        let payload = json!({
            "channel": channel,
            "text": reply.fallback_text(),
            "blocks": reply_blocks(reply),
        });
        let posted: PostedBody = self.post("chat.postMessage", &payload).await?;
        Ok(PostedMessage {
            channel: posted.channel.unwrap_or_else(|| channel.to_owned()),
            ts: posted
                .ts
                .ok_or_else(|| anyhow!("slack chat.postMessage response missing ts"))?,
        })
    }

    async fn upload_file(&self, upload: FileUpload) -> Result<()> {
        if upload.content.is_empty() {
            bail!("refusing to upload empty file {}", upload.filename);
        }
        let length = upload.content.len().to_string();
        let target: UploadTarget = self
            .get(
                "files.getUploadURLExternal",
                &[
                    ("filename", upload.filename.as_str()),
                    ("length", length.as_str()),
                ],
            )
            .await?;
        if target.upload_url.is_empty() || target.file_id.is_empty() {
            bail!("slack files.getUploadURLExternal returned no upload target");
        }

        let response = self
            .http
            .post(&target.upload_url)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(upload.content)
            .send()
            .await
            .context("uploading file body to slack")?;
        if !response.status().is_success() {
            bail!(
                "slack external upload failed with status {}",
                response.status().as_u16()
            );
        }

        let mut complete = json!({
            "files": [{ "id": target.file_id, "title": upload.filename }],
            "channel_id": upload.channel,
        });
        if !upload.comment.is_empty() {
            complete["initial_comment"] = Value::String(upload.comment);
        }
        if !upload.thread_ts.is_empty() {
            complete["thread_ts"] = Value::String(upload.thread_ts);
        }
        let _: Empty = self.post("files.completeUploadExternal", &complete).await?;
        Ok(())
    }

    async fn download_file(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .http
            .get(url)
            .bearer_auth(&self.bot_token)
            .send()
            .await
            .context("slack file download failed")?
            .error_for_status()
            .context("slack file download rejected")?;
        Ok(response.bytes().await?.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use axum::{
        Json, Router,
        extract::{Query, State},
        routing::get,
    };
    use plugin_core::reply::Outcome;

    use super::*;

    #[test]
    fn sections_are_separated_by_dividers() {
        let reply = Reply::new("U1", Outcome::Success).with_results("done");
        let blocks = reply_blocks(&reply);
        let kinds: Vec<_> = blocks
            .as_array()
            .unwrap()
            .iter()
            .map(|b| b["type"].as_str().unwrap())
            .collect();
        assert_eq!(kinds, ["section", "divider", "section"]);
        assert_eq!(blocks[2]["text"]["text"], "*Results:*\ndone");
    }

    async fn members(Query(q): Query<HashMap<String, String>>) -> Json<Value> {
        match q.get("cursor").map(String::as_str) {
            Some("") | None => Json(json!({
                "ok": true,
                "members": ["U1", "B1"],
                "response_metadata": { "next_cursor": "page2" },
            })),
            _ => Json(json!({ "ok": true, "members": ["U2"] })),
        }
    }

    async fn users_list(Query(q): Query<HashMap<String, String>>) -> Json<Value> {
        match q.get("cursor").map(String::as_str) {
            Some("") | None => Json(json!({
                "ok": true,
                "members": [
                    { "id": "U1", "is_bot": false },
                    { "id": "B1", "is_bot": true },
                    { "id": "U9", "is_bot": false },
                ],
                "response_metadata": { "next_cursor": "page2" },
            })),
            _ => Json(json!({ "ok": true, "members": [{ "id": "U2", "is_bot": false }] })),
        }
    }

    async fn user_info(
        State(calls): State<Arc<AtomicUsize>>,
        Query(q): Query<HashMap<String, String>>,
    ) -> Json<Value> {
        calls.fetch_add(1, Ordering::SeqCst);
        let id = q.get("user").cloned().unwrap_or_default();
        Json(json!({ "ok": true, "user": { "id": id, "is_bot": id.starts_with('B') } }))
    }

    async fn fake_slack() -> String {
        fake_slack_counting().await.0
    }

    async fn fake_slack_counting() -> (String, Arc<AtomicUsize>) {
        let info_calls = Arc::new(AtomicUsize::new(0));
        let app = Router::new()
            .route("/conversations.members", get(members))
            .route("/users.list", get(users_list))
            .route("/users.info", get(user_info))
            .route(
                "/chat.postMessage",
                axum::routing::post(|| async { Json(json!({ "ok": false, "error": "not_in_channel" })) }),
            );
        let app = app.with_state(Arc::clone(&info_calls));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await });
        (format!("http://{addr}"), info_calls)
    }

    #[tokio::test]
    async fn members_are_paged_and_classified_from_the_user_list() {
        let (base, info_calls) = fake_slack_counting().await;
        let client = SlackClient::new(&base, "xoxb-test", Duration::from_secs(5)).unwrap();

        let members = client.list_channel_members("C1").await.unwrap();
        assert_eq!(members, ["U1", "B1", "U2"]);

        let (humans, bots) = client.classify_users(&members).await.unwrap();
        assert_eq!(humans, ["U1", "U2"]);
        assert_eq!(bots, ["B1"]);
        assert_eq!(info_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn users_missing_from_the_list_are_looked_up_one_by_one() {
        let (base, info_calls) = fake_slack_counting().await;
        let client = SlackClient::new(&base, "xoxb-test", Duration::from_secs(5)).unwrap();
        let ids = ["W7".to_owned(), "U1".to_owned(), "BX".to_owned()];

        let (humans, bots) = client.classify_users(&ids).await.unwrap();
        assert_eq!(humans, ["W7", "U1"]);
        assert_eq!(bots, ["BX"]);
        assert_eq!(info_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn api_errors_surface_the_slack_code() {
        let base = fake_slack().await;
        let client = SlackClient::new(&base, "xoxb-test", Duration::from_secs(5)).unwrap();

        let err = client
            .post_message("C1", &Reply::new("", Outcome::Help))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not_in_channel"));
    }
}
