use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE, Engine};
use bytes::Bytes;
use chrono::Utc;
use http::header::CONTENT_TYPE;
use http::Request;
use http_body_util::Full;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, instrument, Level};
use url::form_urlencoded;

use crate::service_account::ServiceAccountConfig;
use crate::types::{LazyClient, Signer, Token};
use crate::{Error, TokenProvider};

/// A service account built from explicitly supplied credentials
///
/// Tokens are obtained by signing a JWT assertion with the service account's key and
/// exchanging it at the Google OAuth token endpoint.
#[derive(Debug)]
pub struct CustomServiceAccount {
    client: LazyClient,
    config: ServiceAccountConfig,
    signer: Signer,
    tokens: RwLock<HashMap<Vec<String>, Arc<Token>>>,
    subject: Option<String>,
}

impl CustomServiceAccount {
    /// Create a token provider for `config`
    ///
    /// Fails if the private key cannot back an RSA signer, even when it passed normalization.
    pub fn new(config: ServiceAccountConfig) -> Result<Self, Error> {
        debug!(
            project = config.project_id(),
            email = config.client_email(),
            "found credentials"
        );
        Ok(Self {
            client: LazyClient::default(),
            signer: Signer::new(config.private_key_pem())?,
            config,
            tokens: RwLock::new(HashMap::new()),
            subject: None,
        })
    }

    /// Set the `subject` to impersonate a user
    pub fn with_subject(mut self, subject: String) -> Self {
        self.subject = Some(subject);
        self
    }

    #[instrument(level = Level::DEBUG, skip(self))]
    async fn fetch_token(&self, scopes: &[&str]) -> Result<Arc<Token>, Error> {
        let jwt = Claims::new(&self.config, scopes, self.subject.as_deref())
            .to_jwt(&self.signer)?;
        let body = Bytes::from(
            form_urlencoded::Serializer::new(String::new())
                .extend_pairs(&[("grant_type", GRANT_TYPE), ("assertion", jwt.as_str())])
                .finish()
                .into_bytes(),
        );

        self.client
            .get()
            .await?
            .token(
                &|| {
                    Request::post(TOKEN_URI)
                        .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
                        .body(Full::from(body.clone()))
                        .unwrap()
                },
                "CustomServiceAccount",
            )
            .await
    }

    /// The RSA PKCS1 SHA256 [`Signer`] used to sign JWT tokens
    pub fn signer(&self) -> &Signer {
        &self.signer
    }

    /// The resolved credentials backing this provider
    pub fn config(&self) -> &ServiceAccountConfig {
        &self.config
    }
}

#[async_trait]
impl TokenProvider for CustomServiceAccount {
    async fn token(&self, scopes: &[&str]) -> Result<Arc<Token>, Error> {
        let key: Vec<_> = scopes.iter().map(|x| x.to_string()).collect();
        let token = self.tokens.read().await.get(&key).cloned();
        if let Some(token) = token {
            if !token.has_expired() {
                return Ok(token);
            }
        }

        let mut locked = self.tokens.write().await;
        let token = self.fetch_token(scopes).await?;
        locked.insert(key, token.clone());
        Ok(token)
    }

    async fn project_id(&self) -> Result<Arc<str>, Error> {
        Ok(self.config.shared_project_id())
    }
}

/// Permissions requested for a JWT.
/// See https://developers.google.com/identity/protocols/OAuth2ServiceAccount#authorizingrequests.
#[derive(Serialize, Debug)]
pub(crate) struct Claims<'a> {
    iss: &'a str,
    aud: &'a str,
    exp: i64,
    iat: i64,
    sub: Option<&'a str>,
    scope: String,
}

impl<'a> Claims<'a> {
    pub(crate) fn new(
        config: &'a ServiceAccountConfig,
        scopes: &[&str],
        sub: Option<&'a str>,
    ) -> Self {
        let iat = Utc::now().timestamp();
        Claims {
            iss: config.client_email(),
            aud: TOKEN_URI,
            exp: iat + 3600 - 5, // Max validity is 1h
            iat,
            sub,
            scope: scopes.join(" "),
        }
    }

    pub(crate) fn to_jwt(&self, signer: &Signer) -> Result<String, Error> {
        let claims = serde_json::to_string(self)
            .map_err(|err| Error::Json("failed to serialize JWT claims", err))?;

        let mut jwt = String::new();
        URL_SAFE.encode_string(GOOGLE_RS256_HEAD, &mut jwt);
        jwt.push('.');
        URL_SAFE.encode_string(claims, &mut jwt);

        let signature = signer.sign(jwt.as_bytes())?;
        jwt.push('.');
        URL_SAFE.encode_string(&signature, &mut jwt);
        Ok(jwt)
    }
}

pub(crate) const GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const GOOGLE_RS256_HEAD: &str = r#"{"alg":"RS256","typ":"JWT"}"#;
const TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

#[cfg(test)]
mod tests {
    use super::*;

    const RSA_PKCS8: &str = include_str!("../testdata/rsa_pkcs8.pem");

    fn config() -> ServiceAccountConfig {
        ServiceAccountConfig::new(
            "mock-interviews",
            "admin@mock-interviews.iam.gserviceaccount.com",
            RSA_PKCS8,
        )
        .unwrap()
    }

    #[test]
    fn jwt_carries_claims() {
        let config = config();
        let signer = Signer::new(config.private_key_pem()).unwrap();
        let jwt = Claims::new(&config, &["scope-a", "scope-b"], None)
            .to_jwt(&signer)
            .unwrap();

        let parts = jwt.split('.').collect::<Vec<_>>();
        assert_eq!(parts.len(), 3);

        let claims: serde_json::Value =
            serde_json::from_slice(&URL_SAFE.decode(parts[1]).unwrap()).unwrap();
        assert_eq!(claims["iss"], "admin@mock-interviews.iam.gserviceaccount.com");
        assert_eq!(claims["aud"], TOKEN_URI);
        assert_eq!(claims["scope"], "scope-a scope-b");
        assert_eq!(claims["sub"], serde_json::Value::Null);
    }

    #[test]
    fn subject_is_asserted() {
        let account = CustomServiceAccount::new(config())
            .unwrap()
            .with_subject("interviewer@mock-interviews.dev".to_owned());
        let jwt = Claims::new(account.config(), &["scope-a"], account.subject.as_deref())
            .to_jwt(account.signer())
            .unwrap();

        let claims = jwt.split('.').nth(1).unwrap();
        let claims: serde_json::Value =
            serde_json::from_slice(&URL_SAFE.decode(claims).unwrap()).unwrap();
        assert_eq!(claims["sub"], "interviewer@mock-interviews.dev");
    }

    #[tokio::test]
    async fn project_id_comes_from_config() {
        let account = CustomServiceAccount::new(config()).unwrap();
        assert_eq!(&*account.project_id().await.unwrap(), "mock-interviews");
    }

    #[test]
    fn non_rsa_key_fails_construction() {
        // Normalizes fine, but cannot sign JWTs
        let config = ServiceAccountConfig::new(
            "p",
            "e@example.com",
            include_str!("../testdata/ec_p256_pkcs8.pem"),
        )
        .unwrap();
        assert!(CustomServiceAccount::new(config).is_err());
    }
}
