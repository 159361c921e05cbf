//! Comment store client.
//!
//! The site keeps visitor comments behind a single HTTP function endpoint:
//! `GET` lists, `POST` creates, `DELETE` removes (admin only). Errors come
//! back as `{"error": "..."}` with a non-success status.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use serde_json::json;
use url::Url;

use crate::error::{CommentError, ValidationError};
use crate::storage::CommentsConfig;

const NICKNAME_LEN: (usize, usize) = (2, 20);
const COMMENT_LEN: (usize, usize) = (5, 500);

/// A stored comment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: String,
    pub nickname: String,
    #[serde(rename = "comment", alias = "text")]
    pub text: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "parentId", default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub likes: u32,
}

/// A comment about to be posted, already trimmed and validated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewComment {
    nickname: String,
    text: String,
    parent_id: Option<String>,
}

impl NewComment {
    pub fn new(nickname: &str, text: &str) -> Result<Self, ValidationError> {
        let nickname = nickname.trim();
        let text = text.trim();
        check_length("nickname", nickname, NICKNAME_LEN)?;
        check_length("comment", text, COMMENT_LEN)?;
        Ok(Self {
            nickname: nickname.to_string(),
            text: text.to_string(),
            parent_id: None,
        })
    }

    pub fn reply_to(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    pub fn nickname(&self) -> &str {
        &self.nickname
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn parent_id(&self) -> Option<&str> {
        self.parent_id.as_deref()
    }
}

fn check_length(
    field: &'static str,
    value: &str,
    (min, max): (usize, usize),
) -> Result<(), ValidationError> {
    // The store measures JavaScript string length: UTF-16 code units.
    let len = value.encode_utf16().count();
    if len < min || len > max {
        return Err(ValidationError::Length { field, min, max, len });
    }
    Ok(())
}

/// A top-level comment with its replies, oldest reply first.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Thread {
    pub comment: Comment,
    pub replies: Vec<Comment>,
}

/// Group a flat listing into threads.
///
/// Top-level order is preserved (the store lists newest first). Replies
/// whose parent is not in the listing are promoted to the top level.
pub fn thread(comments: Vec<Comment>) -> Vec<Thread> {
    let ids: std::collections::HashSet<String> =
        comments.iter().map(|c| c.id.clone()).collect();

    let mut replies: HashMap<String, Vec<Comment>> = HashMap::new();
    let mut roots = Vec::new();
    for comment in comments {
        match comment.parent_id.as_deref() {
            Some(parent) if parent != comment.id && ids.contains(parent) => {
                replies.entry(parent.to_string()).or_default().push(comment);
            }
            _ => roots.push(comment),
        }
    }

    roots
        .into_iter()
        .map(|comment| {
            let mut replies = replies.remove(&comment.id).unwrap_or_default();
            replies.sort_by_key(|r| r.timestamp);
            Thread { comment, replies }
        })
        .collect()
}

#[derive(Deserialize)]
struct ListBody {
    #[serde(default)]
    comments: Vec<Comment>,
}

#[derive(Deserialize)]
struct CreatedBody {
    comment: Comment,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

pub struct CommentClient {
    http_client: Client,
    endpoint: Url,
}

impl CommentClient {
    pub fn new(endpoint: Url, timeout: Duration) -> Result<Self, CommentError> {
        let http_client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http_client,
            endpoint,
        })
    }

    pub fn from_config(config: &CommentsConfig) -> Result<Self, CommentError> {
        let endpoint = Url::parse(&config.endpoint)
            .map_err(|_| CommentError::Endpoint(config.endpoint.clone()))?;
        Self::new(endpoint, Duration::from_millis(config.timeout_ms))
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Latest comments, newest first.
    pub async fn list(&self) -> Result<Vec<Comment>, CommentError> {
        let resp = self.http_client.get(self.endpoint.clone()).send().await?;
        let body: ListBody = Self::check(resp).await?.json().await?;
        tracing::debug!(count = body.comments.len(), "comments listed");
        Ok(body.comments)
    }

    pub async fn create(&self, new: &NewComment) -> Result<Comment, CommentError> {
        let payload = json!({
            "nickname": new.nickname,
            "comment": new.text,
            "parentId": new.parent_id,
        });
        let resp = self
            .http_client
            .post(self.endpoint.clone())
            .json(&payload)
            .send()
            .await?;
        let body: CreatedBody = Self::check(resp).await?.json().await?;
        tracing::info!(id = %body.comment.id, "comment posted");
        Ok(body.comment)
    }

    /// Admin removal.
    pub async fn delete(&self, comment_id: &str, admin_password: &str) -> Result<(), CommentError> {
        let payload = json!({
            "commentId": comment_id,
            "adminPassword": admin_password,
        });
        let resp = self
            .http_client
            .delete(self.endpoint.clone())
            .json(&payload)
            .send()
            .await?;
        Self::check(resp).await?;
        tracing::info!(id = comment_id, "comment deleted");
        Ok(())
    }

    async fn check(resp: Response) -> Result<Response, CommentError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let text = resp.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&text)
            .map(|b| b.error)
            .unwrap_or_else(|_| status.canonical_reason().unwrap_or("unknown error").to_string());
        Err(CommentError::Rejected {
            status: status.as_u16(),
            message,
        })
    }
}
