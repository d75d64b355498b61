//! REST client for the campus API.
//!
//! SYSTEM CONTEXT
//! ==============
//! Every endpoint here is externally owned: the user directory, the lecture
//! directory, the per-user timetable store, the syllabus archive and the
//! chat assistant. The view-models only see the `TimetableApi` and
//! `ChatTransport` traits so tests can substitute in-memory fakes.
//!
//! ERROR HANDLING
//! ==============
//! Non-streaming requests are bounded by the configured request timeout.
//! The chat request only bounds connection setup here; per-chunk idle
//! bounds are applied by the consumer reading the stream.

#![allow(clippy::module_name_repetitions)]

#[cfg(test)]
#[path = "api_test.rs"]
mod api_test;

use std::time::Duration;

use futures::StreamExt;
use futures::stream::BoxStream;
use reqwest::header::{CONTENT_TYPE, COOKIE, HeaderMap, HeaderValue};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use super::error::ApiError;
use super::types::{
    AddLectureRequest, AuthStatus, ChatRequest, GeneratedPage, Lecture, LectureId, LectureQuery, MutationAck,
    PageRequest, RemoveLectureRequest, Slot, TimetableResponse, TimetableSnapshot, User, UserId,
};
use crate::config::ClientConfig;

// =============================================================================
// TRAITS
// =============================================================================

/// Endpoints the timetable view-model depends on.
#[async_trait::async_trait]
pub trait TimetableApi: Send + Sync {
    /// `GET /users`.
    async fn list_users(&self) -> Result<Vec<User>, ApiError>;

    /// `GET /me`. `Ok(None)` when the session is anonymous.
    async fn current_user(&self) -> Result<Option<User>, ApiError>;

    /// `GET /users/{id}/timetable`.
    async fn fetch_timetable(&self, user: UserId) -> Result<TimetableSnapshot, ApiError>;

    /// `GET /available-lectures?day=<label>&period=<n>`.
    async fn available_lectures(&self, slot: Slot) -> Result<Vec<Lecture>, ApiError>;

    /// `POST /timetables/{id}/lectures`. Replaces whatever occupies the slot.
    async fn add_lecture(&self, user: UserId, slot: Slot, lecture: LectureId) -> Result<(), ApiError>;

    /// `POST /timetables/{id}/lectures/remove`.
    async fn remove_lecture(&self, user: UserId, slot: Slot) -> Result<(), ApiError>;

    /// `GET /syllabuses/{code}` as an opaque HTML fragment.
    async fn syllabus_html(&self, code: &str) -> Result<String, ApiError>;
}

/// Raw reply body chunks.
pub type ByteStream = BoxStream<'static, Result<Vec<u8>, ApiError>>;

/// How the chat reply body is framed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamFormat {
    /// Every chunk is assistant text.
    Plain,
    /// `text/event-stream` with `data:` lines and a `[DONE]` sentinel.
    EventStream,
}

impl StreamFormat {
    #[must_use]
    pub fn from_content_type(content_type: Option<&str>) -> Self {
        let is_sse = content_type
            .and_then(|ct| ct.split(';').next())
            .is_some_and(|mime| mime.trim().eq_ignore_ascii_case("text/event-stream"));
        if is_sse { Self::EventStream } else { Self::Plain }
    }
}

/// An open chat reply.
pub struct ChatStream {
    pub format: StreamFormat,
    pub body: ByteStream,
}

/// Opens a streaming reply for one chat submission.
#[async_trait::async_trait]
pub trait ChatTransport: Send + Sync {
    /// `POST /chat`.
    async fn open_chat(&self, request: &ChatRequest) -> Result<ChatStream, ApiError>;
}

// =============================================================================
// HTTP CLIENT
// =============================================================================

/// `reqwest`-backed implementation of every campus endpoint.
#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    request_timeout: Duration,
}

impl ApiClient {
    /// Build a client from config. The session cookie, when present, is
    /// sent on every request.
    ///
    /// # Errors
    ///
    /// Returns an error if the cookie is not a valid header value or the
    /// HTTP client cannot be built.
    pub fn new(config: &ClientConfig) -> Result<Self, ApiError> {
        let mut headers = HeaderMap::new();
        if let Some(cookie) = &config.session_cookie {
            headers.insert(COOKIE, HeaderValue::from_str(cookie)?);
        }
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .connect_timeout(Duration::from_secs(config.timeouts.connect_secs))
            .build()
            .map_err(|e| ApiError::HttpClientBuild(e.to_string()))?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_owned(),
            request_timeout: Duration::from_secs(config.timeouts.request_secs),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// `GET /lectures?<filters>`.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure, non-success status, or a
    /// payload that is not a lecture list.
    pub async fn search_lectures(&self, query: &LectureQuery) -> Result<Vec<Lecture>, ApiError> {
        self.get_json("/lectures", &query.to_pairs()).await
    }

    /// `GET /auth?action=check`. A 401 means anonymous, not failure.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure, other non-success statuses,
    /// or a malformed payload.
    pub async fn auth_status(&self) -> Result<AuthStatus, ApiError> {
        match self.get_json("/auth", &[("action", "check".to_owned())]).await {
            Err(e) if e.is_unauthorized() => Ok(AuthStatus::anonymous()),
            other => other,
        }
    }

    /// Browser URL that starts the OAuth login and returns to `redirect`.
    ///
    /// # Errors
    ///
    /// Returns an error if the base URL cannot be parsed.
    pub fn login_url(&self, redirect: &str) -> Result<String, ApiError> {
        self.auth_url(&[("action", "login"), ("redirect", redirect)])
    }

    /// Browser URL that ends the session.
    ///
    /// # Errors
    ///
    /// Returns an error if the base URL cannot be parsed.
    pub fn logout_url(&self) -> Result<String, ApiError> {
        self.auth_url(&[("action", "logout")])
    }

    /// `POST /generate-page`. Requires a session; a 401 surfaces as a
    /// `Status` error for which `is_unauthorized()` holds.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure, non-success status, or a
    /// payload that is not a page.
    pub async fn generate_page(&self, request: &PageRequest) -> Result<GeneratedPage, ApiError> {
        let path = "/generate-page";
        let text = self.send(path, self.http.post(self.url(path)).json(request)).await?;
        let page: GeneratedPage = parse_json(path, &text)?;
        debug!(title = %page.title, html_bytes = page.html_content.len(), "page generated");
        Ok(page)
    }

    fn auth_url(&self, pairs: &[(&str, &str)]) -> Result<String, ApiError> {
        let mut url = reqwest::Url::parse(&self.url("/auth")).map_err(|e| ApiError::InvalidUrl(e.to_string()))?;
        url.query_pairs_mut().extend_pairs(pairs);
        Ok(url.into())
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T, ApiError> {
        let request = self.http.get(self.url(path)).query(query);
        let text = self.send(path, request).await?;
        parse_json(path, &text)
    }

    async fn post_ack<B: Serialize + Sync>(&self, path: &str, body: &B) -> Result<(), ApiError> {
        let request = self.http.post(self.url(path)).json(body);
        let text = self.send(path, request).await?;
        parse_ack(path, &text)
    }

    async fn send(&self, endpoint: &str, request: reqwest::RequestBuilder) -> Result<String, ApiError> {
        let response = request.timeout(self.request_timeout).send().await?;
        let status = response.status();
        let text = response.text().await?;
        debug!(endpoint, status = status.as_u16(), bytes = text.len(), "campus api response");
        if !status.is_success() {
            return Err(ApiError::Status { status: status.as_u16(), body: text });
        }
        Ok(text)
    }
}

fn parse_json<T: DeserializeOwned>(endpoint: &str, text: &str) -> Result<T, ApiError> {
    serde_json::from_str(text).map_err(|e| ApiError::malformed(endpoint, e))
}

/// Mutation endpoints may answer 200 with `success: false`; an empty or
/// non-JSON body on 2xx counts as success.
fn parse_ack(endpoint: &str, text: &str) -> Result<(), ApiError> {
    if text.trim().is_empty() {
        return Ok(());
    }
    let Ok(ack) = serde_json::from_str::<MutationAck>(text) else {
        debug!(endpoint, "mutation ack was not JSON; treating 2xx as success");
        return Ok(());
    };
    if ack.success == Some(false) {
        let message = ack.message.unwrap_or_else(|| "request was not applied".to_owned());
        return Err(ApiError::Rejected(message));
    }
    Ok(())
}

#[async_trait::async_trait]
impl TimetableApi for ApiClient {
    async fn list_users(&self) -> Result<Vec<User>, ApiError> {
        self.get_json("/users", &[]).await
    }

    async fn current_user(&self) -> Result<Option<User>, ApiError> {
        match self.get_json::<User>("/me", &[]).await {
            Ok(user) => Ok(Some(user)),
            Err(e) if e.is_unauthorized() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn fetch_timetable(&self, user: UserId) -> Result<TimetableSnapshot, ApiError> {
        let path = format!("/users/{user}/timetable");
        let wire: TimetableResponse = self.get_json(&path, &[]).await?;
        TimetableSnapshot::from_wire(user, wire)
    }

    async fn available_lectures(&self, slot: Slot) -> Result<Vec<Lecture>, ApiError> {
        let query = [("day", slot.day.label().to_owned()), ("period", slot.period.get().to_string())];
        self.get_json("/available-lectures", &query).await
    }

    async fn add_lecture(&self, user: UserId, slot: Slot, lecture: LectureId) -> Result<(), ApiError> {
        let path = format!("/timetables/{user}/lectures");
        self.post_ack(&path, &AddLectureRequest::new(slot, lecture)).await
    }

    async fn remove_lecture(&self, user: UserId, slot: Slot) -> Result<(), ApiError> {
        let path = format!("/timetables/{user}/lectures/remove");
        match self.post_ack(&path, &RemoveLectureRequest::from(slot)).await {
            // The store reports `success: false` when nothing occupied the slot.
            Err(ApiError::Rejected(message)) => {
                debug!(%user, %slot, reason = %message, "slot already empty");
                Ok(())
            }
            other => other,
        }
    }

    async fn syllabus_html(&self, code: &str) -> Result<String, ApiError> {
        let path = format!("/syllabuses/{code}");
        let request = self.http.get(self.url(&path));
        self.send(&path, request).await
    }
}

#[async_trait::async_trait]
impl ChatTransport for ApiClient {
    async fn open_chat(&self, request: &ChatRequest) -> Result<ChatStream, ApiError> {
        let response = self.http.post(self.url("/chat")).json(request).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Status { status: status.as_u16(), body });
        }
        let format = StreamFormat::from_content_type(
            response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok()),
        );
        debug!(?format, "chat stream opened");
        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()).map_err(ApiError::from))
            .boxed();
        Ok(ChatStream { format, body })
    }
}
