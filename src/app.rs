use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::config::EnvironmentSignals;
use crate::types::Token;
use crate::{Error, TokenProvider};

const AUTH_SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/cloud-platform",
    "https://www.googleapis.com/auth/firebase",
    "https://www.googleapis.com/auth/identitytoolkit",
    "https://www.googleapis.com/auth/userinfo.email",
];
const FIRESTORE_SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/cloud-platform",
    "https://www.googleapis.com/auth/datastore",
];

const AUTH_ENDPOINT: &str = "https://identitytoolkit.googleapis.com";
const FIRESTORE_ENDPOINT: &str = "https://firestore.googleapis.com";

// The emulators accept this bearer token for privileged access
const EMULATOR_TOKEN: &str = "owner";

/// Emulator hosts for the services this crate hands out
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EmulatorHosts {
    pub auth: Option<String>,
    pub firestore: Option<String>,
}

impl EmulatorHosts {
    pub fn from_signals(signals: &EnvironmentSignals) -> Self {
        Self {
            auth: signals.get("FIREBASE_AUTH_EMULATOR_HOST").map(str::to_owned),
            firestore: signals.get("FIRESTORE_EMULATOR_HOST").map(str::to_owned),
        }
    }
}

/// An initialized Firebase application: a project and the credential used to reach it
pub struct App {
    name: String,
    project_id: Option<Arc<str>>,
    credential: Option<Arc<dyn TokenProvider>>,
    emulators: EmulatorHosts,
}

impl App {
    /// An application without a credential
    pub fn new(name: impl Into<String>, project_id: Option<&str>) -> Self {
        Self {
            name: name.into(),
            project_id: project_id.map(Arc::from),
            credential: None,
            emulators: EmulatorHosts::default(),
        }
    }

    pub fn with_credential(mut self, credential: Arc<dyn TokenProvider>) -> Self {
        self.credential = Some(credential);
        self
    }

    pub fn with_emulators(mut self, emulators: EmulatorHosts) -> Self {
        self.emulators = emulators;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn credential(&self) -> Option<&Arc<dyn TokenProvider>> {
        self.credential.as_ref()
    }

    pub fn emulators(&self) -> &EmulatorHosts {
        &self.emulators
    }

    /// The configured project ID, or the one the credential knows about
    pub async fn project_id(&self) -> Result<Arc<str>, Error> {
        if let Some(project_id) = &self.project_id {
            return Ok(project_id.clone());
        }

        match &self.credential {
            Some(credential) => credential.project_id().await,
            None => Err(Error::Str("no project ID configured for this application")),
        }
    }

    async fn access_token(&self, emulated: bool, scopes: &[&str]) -> Result<Arc<Token>, Error> {
        if emulated {
            return Ok(Arc::new(Token::from_string(
                EMULATOR_TOKEN.to_owned(),
                Duration::from_secs(3600),
            )));
        }

        match &self.credential {
            Some(credential) => credential.token(scopes).await,
            None => Err(Error::Str("no credential configured for this application")),
        }
    }
}

impl fmt::Debug for App {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("App")
            .field("name", &self.name)
            .field("project_id", &self.project_id)
            .field("credential", &self.credential.is_some())
            .field("emulators", &self.emulators)
            .finish()
    }
}

/// Handle for Firebase Authentication admin operations
#[derive(Clone, Debug)]
pub struct Auth {
    app: Arc<App>,
}

impl Auth {
    pub(crate) fn new(app: Arc<App>) -> Self {
        Self { app }
    }

    pub fn app(&self) -> &Arc<App> {
        &self.app
    }

    pub async fn project_id(&self) -> Result<Arc<str>, Error> {
        self.app.project_id().await
    }

    pub fn is_emulated(&self) -> bool {
        self.app.emulators.auth.is_some()
    }

    /// Base URL of the Identity Toolkit API, or of the Auth emulator when one is configured
    pub fn endpoint(&self) -> String {
        match &self.app.emulators.auth {
            Some(host) => format!("http://{host}/identitytoolkit.googleapis.com"),
            None => AUTH_ENDPOINT.to_owned(),
        }
    }

    /// Bearer token for Authentication admin calls
    pub async fn access_token(&self) -> Result<Arc<Token>, Error> {
        self.app.access_token(self.is_emulated(), AUTH_SCOPES).await
    }
}

/// Handle for Cloud Firestore document operations
#[derive(Clone, Debug)]
pub struct Firestore {
    app: Arc<App>,
}

impl Firestore {
    pub(crate) fn new(app: Arc<App>) -> Self {
        Self { app }
    }

    pub fn app(&self) -> &Arc<App> {
        &self.app
    }

    pub async fn project_id(&self) -> Result<Arc<str>, Error> {
        self.app.project_id().await
    }

    pub fn is_emulated(&self) -> bool {
        self.app.emulators.firestore.is_some()
    }

    /// Base URL of the Firestore API, or of the Firestore emulator when one is configured
    pub fn endpoint(&self) -> String {
        match &self.app.emulators.firestore {
            Some(host) => format!("http://{host}"),
            None => FIRESTORE_ENDPOINT.to_owned(),
        }
    }

    /// Resource name of the default database
    pub async fn database_path(&self) -> Result<String, Error> {
        let project_id = self.project_id().await?;
        Ok(format!("projects/{project_id}/databases/(default)"))
    }

    /// Bearer token for Firestore calls
    pub async fn access_token(&self) -> Result<Arc<Token>, Error> {
        self.app
            .access_token(self.is_emulated(), FIRESTORE_SCOPES)
            .await
    }
}
