//! Firebase Admin bootstrap: credential resolution and service initialization
//!
//! This crate decides, once per process, how server-side Firebase services authenticate and
//! hands out two handles built from that decision: an [`Auth`] handle and a [`Firestore`]
//! handle. Either handle is live and ready to use, or explicitly unavailable.
//!
//! Credentials are resolved from the environment in the following order:
//!
//! 1. An inline secret in `FIREBASE_SERVICE_ACCOUNT_KEY` (JSON or base64-encoded JSON), then
//!    an inline JSON literal in `FIREBASE_SERVICE_ACCOUNT_JSON`.
//! 2. If neither is set, the first readable, non-empty file among
//!    `FIREBASE_SERVICE_ACCOUNT_PATH`, `GOOGLE_APPLICATION_CREDENTIALS`,
//!    `firebase/service-account.json` and `service-account.json`.
//! 3. Outside production, a fallback credential bundled with the crate (if non-empty).
//!
//! Individual fields can be supplied or overridden with `FIREBASE_PROJECT_ID`,
//! `FIREBASE_CLIENT_EMAIL` and `FIREBASE_PRIVATE_KEY`. Private keys are accepted in most of
//! the shapes people paste into `.env` files: quoted, with escaped newlines, as raw base64, or
//! as a whole service account JSON blob. See [`normalize_private_key()`].
//!
//! When no complete service account is found, the bootstrap falls back to the platform default
//! credential (on managed runtimes, or when `GOOGLE_APPLICATION_CREDENTIALS` is set), then to the
//! Firebase emulators, and finally, outside production, to a degraded local mode. In production
//! a missing credential is a hard configuration error.
//!
//! ## Simple usage
//!
//! ```rust,no_run
//! # async fn run() -> Result<(), firebase_bootstrap::Error> {
//! use firebase_bootstrap::AdminContext;
//!
//! let context = AdminContext::from_env();
//! let firestore = context.try_firestore().await?;
//! let database = firestore.database_path().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Sharing the context across requests
//!
//! The context initializes its services at most once, so a single instance can be shared by
//! every request handler.
//!
//! ```rust,no_run
//! use std::sync::OnceLock;
//! use firebase_bootstrap::AdminContext;
//!
//! static ADMIN: OnceLock<AdminContext> = OnceLock::new();
//!
//! fn admin() -> &'static AdminContext {
//!     ADMIN.get_or_init(AdminContext::from_env)
//! }
//! ```

#![warn(unreachable_pub)]

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

mod app;
pub use app::{App, Auth, EmulatorHosts, Firestore};

mod bootstrap;
pub use bootstrap::{AdminContext, AdminServices, Strategy, DEFAULT_APP_NAME};

mod config;
pub use config::{
    BootstrapConfig, EnvironmentSignals, LocalFallback, CLIENT_EMAIL_VARS,
    CREDENTIAL_LOCATION_VARS, EMULATOR_VARS, MANAGED_RUNTIME_VARS, PLACEHOLDER_PROJECT_ID,
    PRIVATE_KEY_VARS, PROJECT_ID_VARS,
};

mod config_default_credentials;
pub use config_default_credentials::ConfigDefaultCredentials;

mod custom_service_account;
pub use custom_service_account::CustomServiceAccount;

mod default_credential;

mod diagnostics;
pub use diagnostics::{Diagnostic, Diagnostics, Stage};

mod metadata_service_account;
pub use metadata_service_account::MetadataServiceAccount;

mod payload;
pub use payload::{decode_payload, DecodedPayload};

mod private_key;
pub use private_key::{normalize_private_key, Attempt, KeyFormat, MIN_KEY_BYTES};

mod service_account;
pub use service_account::{resolve_service_account, ServiceAccountConfig};

mod source;
pub use source::{collect_sources, RawCredentialSource, SourceContent, SourceKind};

mod types;
pub use types::{Signer, Token};

/// A trait for an authentication context that can provide tokens
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Get a valid token for the given scopes
    ///
    /// Tokens are cached until they expire, so this method will only fetch a fresh token once
    /// the current token (for the given scopes) has expired.
    async fn token(&self, scopes: &[&str]) -> Result<Arc<Token>, Error>;

    /// Get the project ID for the authentication context
    async fn project_id(&self) -> Result<Arc<str>, Error>;
}

/// Enumerates all possible errors returned by this library.
#[derive(Error, Debug)]
pub enum Error {
    /// No credential could be resolved and the configuration does not allow a fallback
    #[error(
        "missing Firebase Admin credentials: set FIREBASE_PROJECT_ID, FIREBASE_CLIENT_EMAIL and \
         FIREBASE_PRIVATE_KEY, or provide a service account in FIREBASE_SERVICE_ACCOUNT_KEY"
    )]
    MissingCredentials,

    /// The requested service did not initialize
    #[error("Firebase Admin services are unavailable")]
    Unavailable,

    /// Invalid base64 data
    #[error("{0}: {1}")]
    Base64(&'static str, #[source] base64::DecodeError),

    /// HTTP error
    #[error("{0}: {1}")]
    Http(&'static str, #[source] hyper::Error),

    /// Input/output error
    #[error("{0}: {1}")]
    Io(&'static str, #[source] std::io::Error),

    /// JSON (de)serialization error
    #[error("{0}: {1}")]
    Json(&'static str, #[source] serde_json::Error),

    /// Other errors
    #[error("{0}: {1}")]
    Other(
        &'static str,
        #[source] Box<dyn std::error::Error + Send + Sync>,
    ),

    /// Free-form error without an underlying cause
    #[error("{0}")]
    Str(&'static str),
}
