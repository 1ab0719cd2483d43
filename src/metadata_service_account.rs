use std::str;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use http::{Method, Request};
use http_body_util::Full;
use tokio::sync::{OnceCell, RwLock};
use tracing::{debug, instrument, Level};

use crate::types::{LazyClient, Token};
use crate::{Error, TokenProvider};

/// A token provider that queries the GCP instance metadata server for access tokens
///
/// Construction does not contact the metadata server; the first token or project ID request
/// does. See https://cloud.google.com/compute/docs/metadata/predefined-metadata-keys for details.
#[derive(Debug, Default)]
pub struct MetadataServiceAccount {
    client: LazyClient,
    project_id: OnceCell<Arc<str>>,
    token: RwLock<Option<Arc<Token>>>,
}

impl MetadataServiceAccount {
    pub fn new() -> Self {
        Self::default()
    }

    #[instrument(level = Level::DEBUG, skip(self))]
    async fn fetch_token(&self) -> Result<Arc<Token>, Error> {
        self.client
            .get()
            .await?
            .token(
                &|| metadata_request(DEFAULT_TOKEN_GCP_URI),
                "MetadataServiceAccount",
            )
            .await
    }

    async fn fetch_project_id(&self) -> Result<Arc<str>, Error> {
        debug!("getting project ID from GCP instance metadata server");
        let req = metadata_request(DEFAULT_PROJECT_ID_GCP_URI);
        let body = self
            .client
            .get()
            .await?
            .request(req, "MetadataServiceAccount")
            .await?;

        match str::from_utf8(&body) {
            Ok(s) if !s.trim().is_empty() => Ok(Arc::from(s.trim())),
            Ok(_) => Err(Error::Str(
                "empty project ID from GCP instance metadata server",
            )),
            Err(_) => Err(Error::Str(
                "received invalid UTF-8 project ID from GCP instance metadata server",
            )),
        }
    }
}

#[async_trait]
impl TokenProvider for MetadataServiceAccount {
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
        self.project_id
            .get_or_try_init(|| self.fetch_project_id())
            .await
            .cloned()
    }
}

fn metadata_request(uri: &str) -> Request<Full<Bytes>> {
    Request::builder()
        .method(Method::GET)
        .uri(uri)
        .header("Metadata-Flavor", "Google")
        .body(Full::from(Bytes::new()))
        .unwrap()
}

// https://cloud.google.com/compute/docs/metadata/predefined-metadata-keys
const DEFAULT_PROJECT_ID_GCP_URI: &str =
    "http://metadata.google.internal/computeMetadata/v1/project/project-id";
const DEFAULT_TOKEN_GCP_URI: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";
