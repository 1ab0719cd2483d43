use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Buf;
use chrono::{DateTime, Utc};
use http::Request;
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper_rustls::HttpsConnectorBuilder;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use ring::rand::SystemRandom;
use ring::signature::{RsaKeyPair, RSA_PKCS1_SHA256};
use rustls_pki_types::pem::PemObject;
use rustls_pki_types::PrivateKeyDer;
use serde::{Deserialize, Deserializer};
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::Error;

#[derive(Clone, Debug)]
pub(crate) struct HttpClient {
    inner: Client<
        hyper_rustls::HttpsConnector<hyper_util::client::legacy::connect::HttpConnector>,
        Full<Bytes>,
    >,
}

impl HttpClient {
    pub(crate) fn new() -> Result<Self, Error> {
        #[cfg(feature = "webpki-roots")]
        let https = HttpsConnectorBuilder::new().with_webpki_roots();
        #[cfg(not(feature = "webpki-roots"))]
        let https = HttpsConnectorBuilder::new()
            .with_native_roots()
            .map_err(|err| {
                Error::Io("failed to load native TLS root certificates for HTTPS", err)
            })?;

        Ok(Self {
            inner: Client::builder(TokioExecutor::new())
                .build(https.https_or_http().enable_http2().build()),
        })
    }

    pub(crate) async fn token(
        &self,
        request: &impl Fn() -> Request<Full<Bytes>>,
        provider: &'static str,
    ) -> Result<Arc<Token>, Error> {
        let mut attempt = 1;
        let body = loop {
            match self.request(request(), provider).await {
                Ok(body) => break body,
                Err(err) if attempt >= TOKEN_ATTEMPTS => return Err(err),
                Err(err) => warn!(?err, provider, attempt, "token request failed, retrying"),
            }
            attempt += 1;
        };

        serde_json::from_slice(&body)
            .map_err(|err| Error::Json("failed to deserialize token from response", err))
    }

    pub(crate) async fn request(
        &self,
        req: Request<Full<Bytes>>,
        provider: &'static str,
    ) -> Result<Bytes, Error> {
        debug!(url = ?req.uri(), provider, "requesting token");
        let (parts, body) = self
            .inner
            .request(req)
            .await
            .map_err(|err| Error::Other("HTTP request failed", Box::new(err)))?
            .into_parts();

        let mut body = body
            .collect()
            .await
            .map_err(|err| Error::Http("failed to read HTTP response body", err))?
            .aggregate();

        let body = body.copy_to_bytes(body.remaining());
        if !parts.status.is_success() {
            let body = String::from_utf8_lossy(body.as_ref());
            warn!(%body, status = ?parts.status, "token request failed");
            return Err(Error::Str("token request failed"));
        }

        Ok(body)
    }
}

/// An [`HttpClient`] built on first use
///
/// Credentials are constructed during bootstrap, which must not depend on TLS roots being
/// loadable; the client is only needed once a token is actually requested.
#[derive(Debug, Default)]
pub(crate) struct LazyClient(OnceCell<HttpClient>);

impl LazyClient {
    pub(crate) async fn get(&self) -> Result<&HttpClient, Error> {
        self.0.get_or_try_init(|| async { HttpClient::new() }).await
    }
}

/// A bearer token issued by a credential
///
/// Providers cache tokens themselves. Neither `Display` nor `Debug` reveal the value; use
/// [`Token::as_str()`] to build the `Authorization` header.
#[derive(Clone, Deserialize)]
pub struct Token {
    access_token: String,
    #[serde(
        deserialize_with = "deserialize_time",
        rename(deserialize = "expires_in")
    )]
    expires_at: DateTime<Utc>,
}

impl Token {
    pub(crate) fn from_string(access_token: String, expires_in: Duration) -> Self {
        Token {
            access_token,
            expires_at: Utc::now() + expires_in,
        }
    }

    /// Whether the token is expired or expires within the next 20 seconds
    pub fn has_expired(&self) -> bool {
        self.expires_at - EXPIRY_MARGIN <= Utc::now()
    }

    pub fn as_str(&self) -> &str {
        &self.access_token
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("access_token", &"****")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// An RSA PKCS1 SHA256 signer
pub struct Signer {
    key: RsaKeyPair,
    rng: SystemRandom,
}

impl Signer {
    /// Load an RSA key from PKCS#8 or PKCS#1 PEM
    pub(crate) fn new(pem: &str) -> Result<Self, Error> {
        let key = PrivateKeyDer::from_pem_slice(pem.as_bytes()).map_err(|err| {
            Error::Other("failed to read credentials private key data", Box::new(err))
        })?;

        let key = match &key {
            PrivateKeyDer::Pkcs8(der) => RsaKeyPair::from_pkcs8(der.secret_pkcs8_der()),
            PrivateKeyDer::Pkcs1(der) => RsaKeyPair::from_der(der.secret_pkcs1_der()),
            _ => return Err(Error::Str("credentials private key is not an RSA key")),
        }
        .map_err(|_| Error::Str("invalid private key in credentials"))?;

        Ok(Signer {
            key,
            rng: SystemRandom::new(),
        })
    }

    /// Sign the input message and return the signature
    pub fn sign(&self, input: &[u8]) -> Result<Vec<u8>, Error> {
        let mut signature = vec![0; self.key.public().modulus_len()];
        self.key
            .sign(&RSA_PKCS1_SHA256, &self.rng, input, &mut signature)
            .map_err(|_| Error::Str("failed to sign with credentials key"))?;
        Ok(signature)
    }
}

impl fmt::Debug for Signer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signer").finish()
    }
}

fn deserialize_time<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let seconds_from_now: u64 = Deserialize::deserialize(deserializer)?;
    Ok(Utc::now() + Duration::from_secs(seconds_from_now))
}

/// Tokens this close to expiry are refreshed instead of handed out
pub(crate) const EXPIRY_MARGIN: Duration = Duration::from_secs(20);
const TOKEN_ATTEMPTS: u8 = 5;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_expiry_from_response() {
        let fresh: Token =
            serde_json::from_str(r#"{"access_token":"abc123","expires_in":3600}"#).unwrap();
        assert_eq!(fresh.as_str(), "abc123");
        assert!(!fresh.has_expired());

        // Inside the refresh margin
        let stale: Token =
            serde_json::from_str(r#"{"access_token":"abc123","expires_in":10}"#).unwrap();
        assert!(stale.has_expired());
        assert!(format!("{stale:?}").contains("****"));
    }

    #[test]
    fn signer_accepts_pkcs8_and_pkcs1() {
        let pkcs8 = Signer::new(include_str!("../testdata/rsa_pkcs8.pem")).unwrap();
        let pkcs1 = Signer::new(include_str!("../testdata/rsa_pkcs1.pem")).unwrap();

        // Same key in both encodings; PKCS#1 v1.5 signatures are deterministic
        assert_eq!(pkcs8.sign(b"payload").unwrap(), pkcs1.sign(b"payload").unwrap());
    }

    #[test]
    fn signer_rejects_non_rsa_keys() {
        let err = Signer::new(include_str!("../testdata/ec_p256_pkcs8.pem")).unwrap_err();
        assert!(matches!(err, Error::Str("invalid private key in credentials")));
    }
}
