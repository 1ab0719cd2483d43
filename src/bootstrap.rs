use std::fmt;
use std::sync::Arc;

use tokio::sync::OnceCell;
use tracing::{instrument, Level};

use crate::app::{App, Auth, EmulatorHosts, Firestore};
use crate::config::{BootstrapConfig, LocalFallback, PLACEHOLDER_PROJECT_ID};
use crate::custom_service_account::CustomServiceAccount;
use crate::default_credential::default_credential;
use crate::diagnostics::{Diagnostics, Stage};
use crate::service_account::resolve_service_account;
use crate::Error;

/// Name given to the application created by the bootstrap
pub const DEFAULT_APP_NAME: &str = "[DEFAULT]";

/// How the application ended up authenticating
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Strategy {
    /// A service account resolved from the environment or a credentials file
    ExplicitCredential,
    /// The platform default credential (ADC or the metadata server)
    DefaultCredential,
    /// No credential; services talk to the local emulators
    Emulator,
    /// No credential outside production; sessions will not persist across restarts
    DegradedLocal,
}

/// The outcome of bootstrapping: live service handles, or the reason there are none
pub struct AdminServices {
    auth: Option<Auth>,
    firestore: Option<Firestore>,
    strategy: Option<Strategy>,
    failure: Option<Error>,
    diagnostics: Diagnostics,
}

impl AdminServices {
    fn ready(app: Arc<App>, strategy: Option<Strategy>, diagnostics: Diagnostics) -> Self {
        Self {
            auth: Some(Auth::new(app.clone())),
            firestore: Some(Firestore::new(app)),
            strategy,
            failure: None,
            diagnostics,
        }
    }

    fn unavailable(failure: Error, diagnostics: Diagnostics) -> Self {
        Self {
            auth: None,
            firestore: None,
            strategy: None,
            failure: Some(failure),
            diagnostics,
        }
    }

    /// The Authentication handle, if initialization succeeded
    pub fn auth(&self) -> Option<&Auth> {
        self.auth.as_ref()
    }

    /// The Firestore handle, if initialization succeeded
    pub fn firestore(&self) -> Option<&Firestore> {
        self.firestore.as_ref()
    }

    pub fn is_available(&self) -> bool {
        self.auth.is_some()
    }

    /// The strategy chosen, or `None` if bootstrap failed or reused a registered application
    pub fn strategy(&self) -> Option<Strategy> {
        self.strategy
    }

    /// Why the services are unavailable
    pub fn failure(&self) -> Option<&Error> {
        self.failure.as_ref()
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }
}

impl fmt::Debug for AdminServices {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdminServices")
            .field("available", &self.is_available())
            .field("strategy", &self.strategy)
            .field("failure", &self.failure)
            .finish_non_exhaustive()
    }
}

/// Lazily bootstrapped Firebase Admin services
///
/// The first call to [`AdminContext::services()`] runs the bootstrap; every later call, from any
/// task, gets the same [`AdminServices`]. A failed bootstrap is not retried.
pub struct AdminContext {
    config: BootstrapConfig,
    registered: Option<Arc<App>>,
    services: OnceCell<Arc<AdminServices>>,
}

impl AdminContext {
    pub fn new(config: BootstrapConfig) -> Self {
        Self {
            config,
            registered: None,
            services: OnceCell::new(),
        }
    }

    /// A context configured from the current process environment
    pub fn from_env() -> Self {
        Self::new(BootstrapConfig::from_env())
    }

    /// A context around an application that was already initialized
    ///
    /// Credential resolution is skipped entirely.
    pub fn with_app(config: BootstrapConfig, app: App) -> Self {
        Self {
            config,
            registered: Some(Arc::new(app)),
            services: OnceCell::new(),
        }
    }

    pub fn config(&self) -> &BootstrapConfig {
        &self.config
    }

    /// The bootstrapped services, initializing them on first use
    pub async fn services(&self) -> &Arc<AdminServices> {
        self.services
            .get_or_init(|| async { Arc::new(self.bootstrap().await) })
            .await
    }

    pub async fn auth(&self) -> Option<&Auth> {
        self.services().await.auth()
    }

    pub async fn firestore(&self) -> Option<&Firestore> {
        self.services().await.firestore()
    }

    /// Like [`AdminContext::auth()`], failing with [`Error::Unavailable`]
    pub async fn try_auth(&self) -> Result<&Auth, Error> {
        self.auth().await.ok_or(Error::Unavailable)
    }

    /// Like [`AdminContext::firestore()`], failing with [`Error::Unavailable`]
    pub async fn try_firestore(&self) -> Result<&Firestore, Error> {
        self.firestore().await.ok_or(Error::Unavailable)
    }

    #[instrument(level = Level::DEBUG, skip(self), fields(app = %self.config.app_name))]
    async fn bootstrap(&self) -> AdminServices {
        let mut diagnostics = Diagnostics::new();
        if let Some(app) = &self.registered {
            diagnostics.debug(Stage::Select, "reusing registered application");
            return AdminServices::ready(app.clone(), None, diagnostics);
        }

        match select(&self.config, &mut diagnostics).await {
            Ok((app, strategy)) => {
                diagnostics.info(
                    Stage::Construct,
                    format!("Firebase Admin initialized using {strategy:?}"),
                );
                AdminServices::ready(Arc::new(app), Some(strategy), diagnostics)
            }
            Err(err) => {
                diagnostics.error(
                    Stage::Construct,
                    format!("Firebase Admin initialization failed: {err}"),
                );
                AdminServices::unavailable(err, diagnostics)
            }
        }
    }
}

impl fmt::Debug for AdminContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdminContext")
            .field("config", &self.config)
            .field("registered", &self.registered.is_some())
            .field("services", &self.services.get())
            .finish()
    }
}

/// Decide how to authenticate and build the application
async fn select(
    config: &BootstrapConfig,
    diagnostics: &mut Diagnostics,
) -> Result<(App, Strategy), Error> {
    let signals = &config.signals;
    let emulators = EmulatorHosts::from_signals(signals);

    if let Some(account) = resolve_service_account(config, diagnostics).await {
        let project_id = config.resolve_project_id(Some(account.project_id()));
        let credential = CustomServiceAccount::new(account)?;
        let app = App::new(&config.app_name, project_id.as_deref())
            .with_credential(Arc::new(credential))
            .with_emulators(emulators);
        return Ok((app, Strategy::ExplicitCredential));
    }

    let emulating = signals.emulator_mode();
    let project_id = config.resolve_project_id(None);

    if !config.gate_default_credential || signals.default_credential_supported() {
        let project_id = project_id
            .as_deref()
            .or(emulating.then_some(PLACEHOLDER_PROJECT_ID));
        match default_credential(signals, project_id).await {
            Ok(credential) => {
                let app = App::new(&config.app_name, project_id)
                    .with_credential(credential)
                    .with_emulators(emulators);
                return Ok((app, Strategy::DefaultCredential));
            }
            Err(err) => diagnostics.warn(
                Stage::Construct,
                format!("platform default credential unavailable: {err}"),
            ),
        }
    }

    let project_id = project_id.as_deref().unwrap_or(PLACEHOLDER_PROJECT_ID);
    if emulating {
        diagnostics.info(
            Stage::Select,
            format!("no credential found, using emulators with project {project_id}"),
        );
        let app = App::new(&config.app_name, Some(project_id)).with_emulators(emulators);
        return Ok((app, Strategy::Emulator));
    }

    if config.production || config.local_fallback == LocalFallback::Fail {
        return Err(Error::MissingCredentials);
    }

    diagnostics.warn(
        Stage::Select,
        format!(
            "no Firebase Admin credential found; running without credentials under project \
             {project_id}, sessions will not persist across restarts"
        ),
    );
    let app = App::new(&config.app_name, Some(project_id)).with_emulators(emulators);
    Ok((app, Strategy::DegradedLocal))
}
