//! Point-in-time HTTP queries: does a session exist, and what is its state.

use std::future::Future;
use std::time::Duration;

use reqwest::StatusCode;
use serde_json::Value;
use tracing::{debug, warn};

use crate::board::{Board, DEFAULT_BOARD_SIZE};
use crate::protocol::{FetchGameResponse, ResultTag, Role, SessionId};

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("server is unavailable")]
    Unavailable,

    #[error("request timed out")]
    Timeout,

    #[error("unexpected status {0}")]
    Status(u16),

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ApiError {
    pub fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_connect() {
            Self::Unavailable
        } else if err.is_timeout() {
            Self::Timeout
        } else if err.is_decode() {
            Self::Malformed(err.to_string())
        } else {
            Self::Other(err.into())
        }
    }
}

/// Authoritative state of a session at the moment it was fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionState {
    pub board: Board,
    pub next: Role,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Found(SessionState),
    /// The server answered `"fail"`: the session is gone or never existed.
    NotFound,
}

pub trait ExistenceCheck: Send + Sync + 'static {
    /// Ask whether `id` names a live session, keeping transport failures
    /// distinct from a negative answer.
    fn check(&self, id: &SessionId) -> impl Future<Output = Result<bool, ApiError>> + Send;

    /// Fail-closed form of [`check`](Self::check): any error means "no".
    fn exists(&self, id: &SessionId) -> impl Future<Output = bool> + Send {
        async move {
            match self.check(id).await {
                Ok(found) => found,
                Err(e) => {
                    warn!(game_id = %id, error = %e, "existence check failed, treating as missing");
                    false
                }
            }
        }
    }
}

pub trait StateFetcher: Send + Sync + 'static {
    fn fetch(&self, id: &SessionId) -> impl Future<Output = Result<FetchOutcome, ApiError>> + Send;
}

/// Runtime view of the `[api]` config section.
#[derive(Clone, Debug)]
pub struct ApiConfig {
    /// Base URL the `search/` and `fetch/` routes hang off, e.g.
    /// `http://127.0.0.1:5000/api`.
    pub base_url: String,
    pub timeout: Duration,
    /// Fetched boards of any other dimension are rejected as malformed.
    /// Must match the controller's board size; see
    /// [`HttpGameApi::board_size`].
    pub board_size: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:5000/api".to_string(),
            timeout: Duration::from_secs(10),
            board_size: DEFAULT_BOARD_SIZE,
        }
    }
}

/// `reqwest`-backed implementation of both queries.
#[derive(Clone, Debug)]
pub struct HttpGameApi {
    client: reqwest::Client,
    base_url: String,
    board_size: usize,
}

impl HttpGameApi {
    pub fn new(config: &ApiConfig) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(ApiError::from_reqwest)?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            board_size: config.board_size,
        })
    }

    pub fn board_size(&self) -> usize {
        self.board_size
    }

    pub fn search_url(&self, id: &SessionId) -> String {
        format!("{}/search/game/{}", self.base_url, id)
    }

    pub fn fetch_url(&self, id: &SessionId) -> String {
        format!("{}/fetch/game/{}", self.base_url, id)
    }

    async fn get_json(&self, url: &str) -> Result<Option<Value>, ApiError> {
        debug!(%url, "GET");
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(ApiError::from_reqwest)?;

        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(ApiError::Status(status.as_u16()));
        }
        let body = resp.json::<Value>().await.map_err(ApiError::from_reqwest)?;
        Ok(Some(body))
    }
}

impl ExistenceCheck for HttpGameApi {
    async fn check(&self, id: &SessionId) -> Result<bool, ApiError> {
        let Some(body) = self.get_json(&self.search_url(id)).await? else {
            return Ok(false);
        };
        interpret_search(&body)
    }
}

impl StateFetcher for HttpGameApi {
    async fn fetch(&self, id: &SessionId) -> Result<FetchOutcome, ApiError> {
        let Some(body) = self.get_json(&self.fetch_url(id)).await? else {
            return Ok(FetchOutcome::NotFound);
        };
        let resp: FetchGameResponse =
            serde_json::from_value(body).map_err(|e| ApiError::Malformed(e.to_string()))?;
        interpret_fetch(resp, self.board_size)
    }
}

/// The search route answers with either a bare boolean or a
/// `{"result": "success" | "fail"}` object.
fn interpret_search(body: &Value) -> Result<bool, ApiError> {
    match body {
        Value::Bool(found) => Ok(*found),
        Value::Object(map) => match map.get("result") {
            Some(tag) => {
                let tag: ResultTag = serde_json::from_value(tag.clone())
                    .map_err(|e| ApiError::Malformed(format!("result: {e}")))?;
                Ok(tag == ResultTag::Success)
            }
            None => Err(ApiError::Malformed("missing result field".to_string())),
        },
        other => Err(ApiError::Malformed(format!(
            "expected boolean or object, got {other}"
        ))),
    }
}

fn interpret_fetch(resp: FetchGameResponse, board_size: usize) -> Result<FetchOutcome, ApiError> {
    if resp.result == ResultTag::Fail {
        return Ok(FetchOutcome::NotFound);
    }

    let board = resp
        .board
        .ok_or_else(|| ApiError::Malformed("success without board".to_string()))?;
    if board.size() != board_size {
        return Err(ApiError::Malformed(format!(
            "board is {}x{}, expected {board_size}x{board_size}",
            board.size(),
            board.size()
        )));
    }

    let code = resp
        .next
        .ok_or_else(|| ApiError::Malformed("success without next".to_string()))?;
    let next = Role::from_player_code(code)
        .ok_or_else(|| ApiError::Malformed(format!("next must be 1 or 2, got {code}")))?;

    Ok(FetchOutcome::Found(SessionState { board, next }))
}
