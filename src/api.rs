use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use reqwest::blocking::{Client as HttpClient, Response};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use crate::feed::{Entity, Page, PageRequest, QueryKey};

pub const DEFAULT_BASE_URL: &str = "https://bumaview.comodoapp.net/";

/// Supplies the bearer token for mutating calls. List reads work without one.
pub trait TokenProvider: Send + Sync {
    fn token(&self) -> Result<String, ApiError>;
}

/// A fixed token taken from configuration. Token acquisition and refresh are
/// the identity provider's problem, not ours.
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        StaticToken(token.into())
    }
}

impl TokenProvider for StaticToken {
    fn token(&self) -> Result<String, ApiError> {
        Ok(self.0.clone())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("api: request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("api: unauthorized")]
    Unauthorized,
    #[error("api: unexpected status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("api: a bearer token is required for this call")]
    TokenRequired,
    #[error("api: malformed response from {endpoint}: {detail}")]
    Malformed {
        endpoint: &'static str,
        detail: String,
    },
}

#[derive(Clone, Default)]
pub struct ClientConfig {
    pub base_url: Option<String>,
    pub user_agent: String,
    pub token_provider: Option<Arc<dyn TokenProvider>>,
    pub http_client: Option<HttpClient>,
}

pub struct Client {
    http: HttpClient,
    user_agent: String,
    base_url: Url,
    token_provider: Option<Arc<dyn TokenProvider>>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("user_agent", &self.user_agent)
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

enum Auth {
    Optional,
    Required,
}

impl Client {
    pub fn new(config: ClientConfig) -> Result<Self> {
        if config.user_agent.trim().is_empty() {
            bail!("bumaview client user agent required");
        }
        let base = config
            .base_url
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let base_url = Url::parse(&base)?;
        let http = match config.http_client {
            Some(client) => client,
            None => HttpClient::builder()
                .timeout(Duration::from_secs(20))
                .build()?,
        };

        Ok(Client {
            http,
            user_agent: config.user_agent,
            base_url,
            token_provider: config.token_provider,
        })
    }

    pub fn companies(&self, req: PageRequest) -> Result<Page<Company>, ApiError> {
        self.fetch_page("/companies/", "companies", req.into_params())
    }

    pub fn questions(&self, req: PageRequest) -> Result<Page<Question>, ApiError> {
        self.fetch_page("/questions", "questions", req.into_params())
    }

    pub fn job_postings(
        &self,
        query: &QueryKey,
        req: PageRequest,
    ) -> Result<Page<JobPosting>, ApiError> {
        let mut params = query.clone().into_params();
        params.extend(req.into_params());
        self.fetch_page("/companies/job-postings", "job-postings", params)
    }

    pub fn positions(&self) -> Result<Vec<Position>, ApiError> {
        let page: Page<Position> =
            self.fetch_page("/users/positions", "positions", Vec::new())?;
        Ok(page.values)
    }

    pub fn question(&self, question_id: i64) -> Result<Question, ApiError> {
        let path = format!("/questions/{question_id}");
        let resp = self.request(Method::GET, &path, &[], None, Auth::Optional)?;
        let value: Value = resp.json()?;
        serde_json::from_value(value).map_err(|err| ApiError::Malformed {
            endpoint: "question",
            detail: err.to_string(),
        })
    }

    pub fn answers(&self, question_id: i64) -> Result<Vec<Answer>, ApiError> {
        let path = format!("/questions/{question_id}/answers");
        let params = [("size".to_string(), "20".to_string())];
        let resp = self.request(Method::GET, &path, &params, None, Auth::Optional)?;
        let value: Value = resp.json()?;
        Ok(decode_page("answers", value).values)
    }

    pub fn comments(&self, answer_id: i64) -> Result<Vec<CommentEntry>, ApiError> {
        let path = format!("/answers/{answer_id}/comments");
        let params = [("size".to_string(), "20".to_string())];
        let resp = self.request(Method::GET, &path, &params, None, Auth::Optional)?;
        let value: Value = resp.json()?;
        Ok(decode_page("comments", value).values)
    }

    pub fn create_question(&self, question: &NewQuestion) -> Result<(), ApiError> {
        let body = serde_json::to_value(question).map_err(|err| ApiError::Malformed {
            endpoint: "create-question",
            detail: err.to_string(),
        })?;
        self.request(Method::POST, "/questions/single", &[], Some(body), Auth::Required)?;
        Ok(())
    }

    pub fn submit_answer(&self, question_id: i64, answer: &str) -> Result<(), ApiError> {
        let path = format!("/questions/{question_id}/answers");
        let body = serde_json::json!({ "answer": answer });
        self.request(Method::POST, &path, &[], Some(body), Auth::Required)?;
        Ok(())
    }

    pub fn submit_comment(&self, answer_id: i64, comment: &str) -> Result<(), ApiError> {
        let path = format!("/answers/{answer_id}/comments");
        let body = serde_json::json!({ "comment": comment });
        self.request(Method::POST, &path, &[], Some(body), Auth::Required)?;
        Ok(())
    }

    fn fetch_page<T>(
        &self,
        path: &str,
        endpoint: &'static str,
        params: Vec<(String, String)>,
    ) -> Result<Page<T>, ApiError>
    where
        T: DeserializeOwned,
    {
        let resp = self.request(Method::GET, path, &params, None, Auth::Optional)?;
        let value: Value = resp.json()?;
        Ok(decode_page(endpoint, value))
    }

    fn request(
        &self,
        method: Method,
        path: &str,
        params: &[(String, String)],
        body: Option<Value>,
        auth: Auth,
    ) -> Result<Response, ApiError> {
        let mut url = self
            .base_url
            .join(path.trim_start_matches('/'))
            .map_err(|err| ApiError::Malformed {
                endpoint: "url",
                detail: err.to_string(),
            })?;
        if !params.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (k, v) in params {
                pairs.append_pair(k, v);
            }
        }

        let mut req = self.http.request(method, url);
        req = req.header(USER_AGENT, self.user_agent.clone());
        match (&auth, &self.token_provider) {
            (Auth::Required, None) => return Err(ApiError::TokenRequired),
            (_, Some(provider)) => {
                let token = provider.token()?;
                req = req.header(AUTHORIZATION, format!("Bearer {token}"));
            }
            (Auth::Optional, None) => {}
        }
        if let Some(body) = body {
            req = req.header(CONTENT_TYPE, "application/json");
            req = req.json(&body);
        }

        let resp = req.send()?;
        let status = resp.status();
        if status.is_success() {
            Ok(resp)
        } else {
            let body = resp.text().unwrap_or_default();
            match status.as_u16() {
                401 | 403 => Err(ApiError::Unauthorized),
                code => Err(ApiError::Status { status: code, body }),
            }
        }
    }
}

/// The one place list envelopes are interpreted. A payload without a `values`
/// array degrades to an empty final page (logged), never an inline guess at
/// the call site; items that fail to decode are skipped with a warning.
pub(crate) fn decode_page<T: DeserializeOwned>(endpoint: &'static str, value: Value) -> Page<T> {
    let envelope: Envelope = match serde_json::from_value(value) {
        Ok(envelope) => envelope,
        Err(err) => {
            tracing::warn!(endpoint, error = %err, "list payload is not an object");
            return Page::empty();
        }
    };
    let Some(values) = envelope.values else {
        tracing::warn!(endpoint, "list payload missing `values`, treating as final empty page");
        return Page::empty();
    };
    let mut decoded = Vec::with_capacity(values.len());
    for item in values {
        match serde_json::from_value::<T>(item) {
            Ok(item) => decoded.push(item),
            Err(err) => {
                tracing::warn!(endpoint, error = %err, "skipping undecodable list item");
            }
        }
    }
    Page {
        values: decoded,
        has_next: envelope.has_next.unwrap_or(false),
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    values: Option<Vec<Value>>,
    #[serde(default)]
    has_next: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Company {
    pub company_id: i64,
    pub company_name: String,
}

impl Entity for Company {
    fn entity_id(&self) -> i64 {
        self.company_id
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    pub question_id: i64,
    #[serde(default)]
    pub company_id: i64,
    #[serde(alias = "content")]
    pub question: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub tag: String,
    #[serde(default)]
    pub question_at: String,
    #[serde(default)]
    pub registrant_id: i64,
}

impl Entity for Question {
    fn entity_id(&self) -> i64 {
        self.question_id
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TechStack {
    pub tech_stack_id: i64,
    pub tech_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobPosting {
    pub company_job_posting_id: i64,
    #[serde(default)]
    pub company_id: i64,
    #[serde(default)]
    pub job_id: String,
    #[serde(default)]
    pub overview: String,
    #[serde(default)]
    pub key_responsibilities: String,
    #[serde(default)]
    pub preferred_qualifications: String,
    #[serde(default)]
    pub benefits_and_perks: String,
    #[serde(default)]
    pub hiring_process: String,
    #[serde(default)]
    pub employment_type: String,
    #[serde(default)]
    pub application_deadline: String,
    #[serde(default)]
    pub work_location: String,
    #[serde(default)]
    pub tech_stacks: Vec<TechStack>,
}

impl Entity for JobPosting {
    fn entity_id(&self) -> i64 {
        self.company_job_posting_id
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub position_id: i64,
    pub position_name: String,
}

impl Entity for Position {
    fn entity_id(&self) -> i64 {
        self.position_id
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Answer {
    #[serde(alias = "id")]
    pub answer_id: i64,
    #[serde(default)]
    pub question_id: i64,
    #[serde(default)]
    pub user_id: i64,
    #[serde(alias = "content")]
    pub answer: String,
    #[serde(default, alias = "author")]
    pub author_name: String,
    #[serde(default, alias = "createdAt")]
    pub created_at: String,
}

impl Entity for Answer {
    fn entity_id(&self) -> i64 {
        self.answer_id
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommentEntry {
    #[serde(alias = "reply_id", alias = "id")]
    pub answer_comment_id: i64,
    #[serde(default)]
    pub answer_id: i64,
    #[serde(default)]
    pub user_id: i64,
    #[serde(alias = "reply", alias = "content")]
    pub comment: String,
    #[serde(default, alias = "author")]
    pub author_name: String,
    #[serde(default, alias = "createdAt")]
    pub created_at: String,
}

impl Entity for CommentEntry {
    fn entity_id(&self) -> i64 {
        self.answer_comment_id
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NewQuestion {
    pub question: String,
    pub company_id: i64,
    pub category: String,
    pub tag: String,
}
