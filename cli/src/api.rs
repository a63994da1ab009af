//! The single gateway to the backend API.
//!
//! Every request goes through [`ApiClient::send`], which attaches the bearer
//! token, classifies failures into one readable message and enforces the
//! session-expiry policy: a 401 clears stored credentials and fires the
//! unauthorized hook before the caller ever sees the error.

use std::sync::Arc;
use std::time::Duration;

use multidb_common::{
    AssignInstanceRequest, AuthResponse, CreateInstanceRequest, DatabaseInstance, LoginRequest,
    QueryRequest, QueryResult, RegisterRequest, StudentInstance, User,
};
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{ClientConfig, API_URL_ENV, USER_AGENT};
use crate::credentials::{CredentialError, CredentialStoreDyn};
use crate::normalize;

pub const MSG_BAD_REQUEST: &str = "Invalid data";
pub const MSG_UNAUTHORIZED: &str = "Not authenticated";
pub const MSG_FORBIDDEN: &str = "Permission denied";
pub const MSG_NOT_FOUND: &str = "Not found";
pub const MSG_SERVER_ERROR: &str = "Server error";
pub const MSG_CONNECTION: &str = "Connection error: no response from server";
pub const MSG_UNEXPECTED: &str = "Unexpected error";

/// A backend failure translated into one human-readable message.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ApiError {
    /// Non-2xx response other than 401.
    #[error("{message}")]
    Api { status: u16, message: String },

    /// 401 response. Credentials are already gone when this is returned.
    #[error("{message}")]
    SessionExpired { message: String },

    /// The request never produced a response (unreachable host, timeout).
    #[error("{}", MSG_CONNECTION)]
    Connection,

    #[error("{}", MSG_UNEXPECTED)]
    Unexpected,

    #[error("Could not read server response: {0}")]
    Decode(String),

    #[error("No active session")]
    NoSession,

    #[error("Credential storage failed: {0}")]
    Storage(String),
}

impl ApiError {
    pub fn is_session_expired(&self) -> bool {
        matches!(self, Self::SessionExpired { .. })
    }
}

impl From<CredentialError> for ApiError {
    fn from(err: CredentialError) -> Self {
        Self::Storage(err.to_string())
    }
}

/// Picks the message for an error response body, in priority order:
/// explicit `message`, then a field-to-messages `errors` map joined with
/// `", "`, then a fixed message for the status code.
pub fn classify_response(status: u16, body: &[u8]) -> String {
    if let Ok(payload) = serde_json::from_slice::<Value>(body) {
        if let Some(msg) = payload.get("message").and_then(Value::as_str) {
            if !msg.is_empty() {
                return msg.to_string();
            }
        }
        if let Some(errors) = payload.get("errors").and_then(Value::as_object) {
            let joined = errors
                .values()
                .flat_map(|v| match v {
                    Value::Array(items) => items
                        .iter()
                        .filter_map(|i| i.as_str().map(str::to_string))
                        .collect::<Vec<_>>(),
                    Value::String(s) => vec![s.clone()],
                    _ => Vec::new(),
                })
                .collect::<Vec<_>>()
                .join(", ");
            if !joined.is_empty() {
                return joined;
            }
        }
    }

    match status {
        400 => MSG_BAD_REQUEST.to_string(),
        401 => MSG_UNAUTHORIZED.to_string(),
        403 => MSG_FORBIDDEN.to_string(),
        404 => MSG_NOT_FOUND.to_string(),
        500 => MSG_SERVER_ERROR.to_string(),
        other => format!("Error {}", other),
    }
}

fn classify_transport(err: reqwest::Error) -> ApiError {
    if err.is_builder() {
        warn!("request could not be built: {}", err);
        ApiError::Unexpected
    } else {
        warn!("request failed without a response: {}", err);
        ApiError::Connection
    }
}

pub type UnauthorizedHook = Arc<dyn Fn() + Send + Sync>;

pub struct ApiClient {
    http: Client,
    base_url: String,
    store: CredentialStoreDyn,
    on_unauthorized: Option<UnauthorizedHook>,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url)
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

impl ApiClient {
    pub fn new(config: &ClientConfig, store: CredentialStoreDyn) -> Result<Self, ApiError> {
        let mut builder = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.timeout);

        // Condition: disable connection pooling when pointed at a test backend.
        if std::env::var(API_URL_ENV).is_ok() {
            builder = builder.pool_max_idle_per_host(0).pool_idle_timeout(None::<Duration>);
        }

        let http = builder.build().map_err(|e| {
            warn!("create http client: {}", e);
            ApiError::Unexpected
        })?;

        Ok(Self {
            http,
            base_url: config.api_url.trim_end_matches('/').to_string(),
            store,
            on_unauthorized: None,
        })
    }

    /// Registers the callback run after a 401 has cleared the credentials.
    pub fn on_unauthorized(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_unauthorized = Some(Arc::new(hook));
        self
    }

    fn url(&self, segments: &[&str]) -> Result<Url, ApiError> {
        let mut url = Url::parse(&self.base_url).map_err(|e| {
            warn!("invalid API base URL {:?}: {}", self.base_url, e);
            ApiError::Unexpected
        })?;
        url.path_segments_mut()
            .map_err(|_| ApiError::Unexpected)?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn expire_session(&self) {
        if let Err(e) = self.store.clear_token().await {
            warn!("failed to clear credentials after 401: {}", e);
        }
        info!("server rejected the session; local credentials cleared");
        if let Some(hook) = &self.on_unauthorized {
            hook();
        }
    }

    /// Sends one request through the auth and error interceptors.
    pub async fn send(&self, builder: RequestBuilder) -> Result<Response, ApiError> {
        let builder = match self.store.get_token().await {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        };

        let resp = builder.send().await.map_err(classify_transport)?;
        let status = resp.status();
        debug!(status = status.as_u16(), url = %resp.url(), "api response");

        if status == StatusCode::UNAUTHORIZED {
            let body = resp.bytes().await.unwrap_or_default();
            self.expire_session().await;
            return Err(ApiError::SessionExpired {
                message: classify_response(status.as_u16(), &body),
            });
        }

        if !status.is_success() {
            let body = resp.bytes().await.unwrap_or_default();
            return Err(ApiError::Api {
                status: status.as_u16(),
                message: classify_response(status.as_u16(), &body),
            });
        }

        Ok(resp)
    }

    async fn decode<T: DeserializeOwned>(resp: Response) -> Result<T, ApiError> {
        resp.json::<T>()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))
    }

    async fn get_json<T: DeserializeOwned>(&self, segments: &[&str]) -> Result<T, ApiError> {
        let url = self.url(segments)?;
        let resp = self.send(self.http.get(url)).await?;
        Self::decode(resp).await
    }

    async fn post_json<B, T>(&self, segments: &[&str], body: &B) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = self.url(segments)?;
        let resp = self.send(self.http.post(url).json(body)).await?;
        Self::decode(resp).await
    }

    async fn establish(&self, auth: AuthResponse) -> Result<User, ApiError> {
        match auth.token.as_deref() {
            Some(token) if !token.is_empty() => self.store.set_token(token).await?,
            _ => {
                warn!("auth response carried no token");
                self.store.clear_token().await?;
            }
        }
        let user = auth.to_user();
        self.store.persist_user(&user).await?;
        info!(user = %user.email, role = %user.role, "signed in");
        Ok(user)
    }

    // -------------------------------------------------------------------
    // Auth
    // -------------------------------------------------------------------

    pub async fn register(&self, req: &RegisterRequest) -> Result<User, ApiError> {
        let auth: AuthResponse = self.post_json(&["auth", "register"], req).await?;
        self.establish(auth).await
    }

    pub async fn login(&self, req: &LoginRequest) -> Result<User, ApiError> {
        let auth: AuthResponse = self.post_json(&["auth", "login"], req).await?;
        self.establish(auth).await
    }

    /// Local only; the backend is not told.
    pub async fn logout(&self) -> Result<(), ApiError> {
        self.store.clear_token().await?;
        Ok(())
    }

    /// Last persisted user snapshot. Not revalidated against the backend.
    pub async fn current_user(&self) -> Result<User, ApiError> {
        self.store.load_user().await?.ok_or(ApiError::NoSession)
    }

    pub async fn token(&self) -> Option<String> {
        self.store.get_token().await
    }

    // -------------------------------------------------------------------
    // Instances
    // -------------------------------------------------------------------

    pub async fn create_instance(
        &self,
        req: &CreateInstanceRequest,
    ) -> Result<DatabaseInstance, ApiError> {
        let created: Value = self.post_json(&["instances"], req).await?;
        Ok(normalize::normalize_instance(&created, 0))
    }

    pub async fn instances(&self) -> Result<Vec<DatabaseInstance>, ApiError> {
        let raw: Vec<Value> = self.get_json(&["instances"]).await?;
        Ok(normalize::normalize_instances(&raw))
    }

    pub async fn assign_instance(&self, req: &AssignInstanceRequest) -> Result<(), ApiError> {
        let url = self.url(&["instances", &req.instance_id, "assign"])?;
        let body = serde_json::json!({ "studentId": req.student_id });
        self.send(self.http.post(url).json(&body)).await?;
        Ok(())
    }

    /// The caller's own assignments, or a given student's when `student_id` is set.
    pub async fn student_instances(
        &self,
        student_id: Option<&str>,
    ) -> Result<Vec<StudentInstance>, ApiError> {
        let raw: Vec<Value> = match student_id {
            Some(id) => self.get_json(&["instances", "student", id]).await?,
            None => self.get_json(&["instances", "my-instances"]).await?,
        };
        Ok(normalize::normalize_student_instances(&raw))
    }

    // -------------------------------------------------------------------
    // Queries and users
    // -------------------------------------------------------------------

    pub async fn execute_query(&self, req: &QueryRequest) -> Result<QueryResult, ApiError> {
        self.post_json(&["query", "execute"], req).await
    }

    pub async fn users(&self) -> Result<Vec<User>, ApiError> {
        let raw: Vec<Value> = self.get_json(&["user"]).await?;
        Ok(normalize::normalize_users(&raw))
    }

    pub async fn students(&self) -> Result<Vec<User>, ApiError> {
        let raw: Vec<Value> = self.get_json(&["user"]).await?;
        Ok(normalize::normalize_students(&raw))
    }
}
