//! HTTP client for the `/api/v1` surface, used by the `studio` CLI to sign in
//! and read or write the account's server-side generation history.

use std::{future::Future, path::PathBuf};

use reqwest::{Client, RequestBuilder};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    auth::dto::{
        AuthResponse, LoginRequest, MessageResponse, RefreshRequest, RefreshResponse,
        RegisterRequest,
    },
    error::ErrorBody,
    generations::{
        dto::{CreateGenerationRequest, GenerationList, UpdateGenerationRequest},
        model::{Generation, GenerationType},
    },
    users::model::PublicUser,
};

pub const DEFAULT_API_URL: &str = "http://localhost:3001";

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("API request failed: {0}")]
    Request(String),
    #[error("{message} (HTTP {status})")]
    Api { status: u16, message: String },
    #[error("Invalid API response: {0}")]
    InvalidResponse(String),
    #[error("Not logged in. Run `studio login` first.")]
    NotLoggedIn,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ClientError {
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ClientError::Api { status: 401, .. })
    }
}

#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    access_token: Option<String>,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            access_token: None,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    pub fn set_token(&mut self, token: Option<String>) {
        self.access_token = token;
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v1{path}", self.base_url)
    }

    fn authed(&self, req: RequestBuilder) -> Result<RequestBuilder, ClientError> {
        let token = self.access_token.as_deref().ok_or(ClientError::NotLoggedIn)?;
        Ok(req.bearer_auth(token))
    }

    async fn send<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T, ClientError> {
        let response = req
            .send()
            .await
            .map_err(|e| ClientError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorBody>(&text)
                .map(|b| b.error)
                .unwrap_or(text);
            debug!(status = status.as_u16(), %message, "api error");
            return Err(ClientError::Api {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|e| ClientError::InvalidResponse(e.to_string()))
    }

    pub async fn register(
        &self,
        email: &str,
        password: &str,
        full_name: Option<&str>,
    ) -> Result<AuthResponse, ClientError> {
        let body = RegisterRequest {
            email: Some(email.to_string()),
            password: Some(password.to_string()),
            full_name: full_name.map(str::to_string),
        };
        self.send(self.client.post(self.url("/auth/register")).json(&body))
            .await
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<AuthResponse, ClientError> {
        let body = LoginRequest {
            email: Some(email.to_string()),
            password: Some(password.to_string()),
        };
        self.send(self.client.post(self.url("/auth/login")).json(&body))
            .await
    }

    pub async fn refresh(&self, refresh_token: &str) -> Result<RefreshResponse, ClientError> {
        let body = RefreshRequest {
            refresh_token: Some(refresh_token.to_string()),
        };
        self.send(self.client.post(self.url("/auth/refresh")).json(&body))
            .await
    }

    pub async fn logout(&self) -> Result<MessageResponse, ClientError> {
        let req = self.authed(self.client.post(self.url("/auth/logout")))?;
        self.send(req).await
    }

    pub async fn me(&self) -> Result<PublicUser, ClientError> {
        let req = self.authed(self.client.get(self.url("/users/me")))?;
        self.send(req).await
    }

    /// `None` clears the stored name.
    pub async fn update_me(&self, full_name: Option<&str>) -> Result<PublicUser, ClientError> {
        let req = self.authed(self.client.put(self.url("/users/me")))?;
        self.send(req.json(&json!({ "full_name": full_name }))).await
    }

    pub async fn list_generations(
        &self,
        kind: Option<GenerationType>,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> Result<GenerationList, ClientError> {
        let mut query: Vec<(&str, String)> = Vec::new();
        if let Some(k) = kind {
            query.push(("type", k.as_str().to_string()));
        }
        if let Some(l) = limit {
            query.push(("limit", l.to_string()));
        }
        if let Some(o) = offset {
            query.push(("offset", o.to_string()));
        }
        let req = self.authed(self.client.get(self.url("/generations")).query(&query))?;
        self.send(req).await
    }

    pub async fn get_generation(&self, id: Uuid) -> Result<Generation, ClientError> {
        let req = self.authed(self.client.get(self.url(&format!("/generations/{id}"))))?;
        self.send(req).await
    }

    pub async fn create_generation(
        &self,
        body: &CreateGenerationRequest,
    ) -> Result<Generation, ClientError> {
        let req = self.authed(self.client.post(self.url("/generations")))?;
        self.send(req.json(body)).await
    }

    pub async fn update_generation(
        &self,
        id: Uuid,
        body: &UpdateGenerationRequest,
    ) -> Result<Generation, ClientError> {
        let req = self.authed(self.client.put(self.url(&format!("/generations/{id}"))))?;
        self.send(req.json(body)).await
    }

    pub async fn delete_generation(&self, id: Uuid) -> Result<MessageResponse, ClientError> {
        let req = self.authed(self.client.delete(self.url(&format!("/generations/{id}"))))?;
        self.send(req).await
    }
}

/// Token pair from the last `login`/`register`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Session {
    pub email: String,
    pub access_token: String,
    pub refresh_token: String,
}

impl From<AuthResponse> for Session {
    fn from(r: AuthResponse) -> Self {
        Self {
            email: r.user.email,
            access_token: r.access_token,
            refresh_token: r.refresh_token,
        }
    }
}

/// The signed-in session, kept as `session.json` beside the CLI settings.
#[derive(Debug)]
pub struct SessionFile {
    path: PathBuf,
    session: Option<Session>,
}

impl SessionFile {
    pub async fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let session = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| warn!(error = %e, path = %path.display(), "session file is corrupt; ignoring"))
                .ok(),
            Err(_) => None,
        };
        Self { path, session }
    }

    pub fn get(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub async fn store(&mut self, session: Session) -> Result<(), ClientError> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir).await?;
        }
        let bytes = serde_json::to_vec_pretty(&session).map_err(std::io::Error::from)?;
        tokio::fs::write(&self.path, bytes).await?;
        info!(email = %session.email, "session saved");
        self.session = Some(session);
        Ok(())
    }

    /// Keeps the refresh token and swaps in a new access token.
    pub async fn replace_access_token(&mut self, token: String) -> Result<(), ClientError> {
        let mut session = self.session.clone().ok_or(ClientError::NotLoggedIn)?;
        session.access_token = token;
        self.store(session).await
    }

    pub async fn clear(&mut self) -> Result<(), ClientError> {
        self.session = None;
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Runs `op`; if the server rejects the access token, refreshes it once from
/// the stored refresh token and runs `op` again.
pub async fn with_refresh<T, F, Fut>(
    api: &mut ApiClient,
    sessions: &mut SessionFile,
    op: F,
) -> Result<T, ClientError>
where
    F: Fn(ApiClient) -> Fut,
    Fut: Future<Output = Result<T, ClientError>>,
{
    match op(api.clone()).await {
        Err(e) if e.is_unauthorized() => {
            let Some(refresh_token) = sessions.get().map(|s| s.refresh_token.clone()) else {
                return Err(e);
            };
            let fresh = api.refresh(&refresh_token).await?;
            info!("access token refreshed");
            api.set_token(Some(fresh.access_token.clone()));
            sessions.replace_access_token(fresh.access_token).await?;
            op(api.clone()).await
        }
        other => other,
    }
}
