use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{Method, Request};
use http_body_util::Full;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, instrument, Level};

use crate::types::{LazyClient, Token};
use crate::{Error, TokenProvider};

/// A token provider for `authorized_user` application default credentials
///
/// These are the credentials written by `gcloud auth application-default login`; tokens are
/// obtained by exchanging the stored refresh token.
#[derive(Debug)]
pub struct ConfigDefaultCredentials {
    client: LazyClient,
    token: RwLock<Option<Arc<Token>>>,
    credentials: UserCredentials,
}

impl ConfigDefaultCredentials {
    pub(crate) fn from_user_credentials(credentials: UserCredentials) -> Self {
        debug!(
            project = ?credentials.quota_project_id,
            client = credentials.client_id,
            "found user credentials"
        );
        Self {
            client: LazyClient::default(),
            token: RwLock::new(None),
            credentials,
        }
    }

    #[instrument(level = Level::DEBUG, skip(self))]
    async fn fetch_token(&self) -> Result<Arc<Token>, Error> {
        let body = Bytes::from(
            serde_json::to_vec(&RefreshRequest {
                client_id: &self.credentials.client_id,
                client_secret: &self.credentials.client_secret,
                grant_type: "refresh_token",
                refresh_token: &self.credentials.refresh_token,
            })
            .map_err(|err| Error::Json("failed to serialize refresh request", err))?,
        );

        self.client
            .get()
            .await?
            .token(
                &|| {
                    Request::builder()
                        .method(Method::POST)
                        .uri(DEFAULT_TOKEN_GCP_URI)
                        .header(CONTENT_TYPE, "application/json")
                        .body(Full::from(body.clone()))
                        .unwrap()
                },
                "ConfigDefaultCredentials",
            )
            .await
    }
}

#[async_trait]
impl TokenProvider for ConfigDefaultCredentials {
    async fn token(&self, _scopes: &[&str]) -> Result<Arc<Token>, Error> {
        if let Some(token) = self.token.read().await.as_ref() {
            if !token.has_expired() {
                return Ok(token.clone());
            }
        }

        let mut locked = self.token.write().await;
        let token = self.fetch_token().await?;
        *locked = Some(token.clone());
        Ok(token)
    }

    async fn project_id(&self) -> Result<Arc<str>, Error> {
        self.credentials
            .quota_project_id
            .clone()
            .ok_or(Error::Str("no project ID in user credentials"))
    }
}

#[derive(Serialize, Debug)]
struct RefreshRequest<'a> {
    client_id: &'a str,
    client_secret: &'a str,
    grant_type: &'a str,
    refresh_token: &'a str,
}

#[derive(Deserialize)]
pub(crate) struct UserCredentials {
    /// Client id
    pub(crate) client_id: String,
    /// Client secret
    pub(crate) client_secret: String,
    /// Project ID
    pub(crate) quota_project_id: Option<Arc<str>>,
    /// Refresh Token
    pub(crate) refresh_token: String,
}

impl std::fmt::Debug for UserCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserCredentials")
            .field("client_id", &self.client_id)
            .field("quota_project_id", &self.quota_project_id)
            .finish_non_exhaustive()
    }
}

const DEFAULT_TOKEN_GCP_URI: &str = "https://accounts.google.com/o/oauth2/token";
