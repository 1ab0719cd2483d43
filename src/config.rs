use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::{env, fmt};

use serde_json::{Map, Value};
use tracing::warn;

use crate::payload::DecodedPayload;

/// Variables that enable emulator mode when any of them is non-empty
pub const EMULATOR_VARS: [&str; 9] = [
    "FIRESTORE_EMULATOR_HOST",
    "FIREBASE_AUTH_EMULATOR_HOST",
    "FIREBASE_DATABASE_EMULATOR_HOST",
    "FIREBASE_STORAGE_EMULATOR_HOST",
    "STORAGE_EMULATOR_HOST",
    "PUBSUB_EMULATOR_HOST",
    "FIREBASE_EMULATOR_HUB",
    "FUNCTIONS_EMULATOR",
    "FIREBASE_EMULATOR",
];

/// Variables set by managed Google runtimes (Cloud Run, Cloud Functions, App Engine)
pub const MANAGED_RUNTIME_VARS: &[&str] = &[
    "K_SERVICE",
    "K_REVISION",
    "CLOUD_RUN_JOB",
    "FUNCTION_TARGET",
    "FUNCTION_NAME",
    "GAE_SERVICE",
    "GAE_ENV",
];

/// Variables that point the platform default credential at explicit key material
pub const CREDENTIAL_LOCATION_VARS: &[&str] = &[
    APPLICATION_CREDENTIALS_VAR,
    "GOOGLE_APPLICATION_CREDENTIALS_JSON",
    "GOOGLE_AUTH_CREDENTIALS",
    "GOOGLE_AUTH_CLIENT_EMAIL",
];

/// Environment fallbacks for a service account's project ID, after the payload's own value
pub const PROJECT_ID_VARS: &[&str] = &[
    "FIREBASE_PROJECT_ID",
    "GOOGLE_CLOUD_PROJECT",
    "GCLOUD_PROJECT",
    "NEXT_PUBLIC_FIREBASE_PROJECT_ID",
];

/// Environment fallbacks for a service account's client email
pub const CLIENT_EMAIL_VARS: &[&str] = &[
    "FIREBASE_CLIENT_EMAIL",
    "GOOGLE_CLIENT_EMAIL",
    "GCLOUD_CLIENT_EMAIL",
];

/// Environment fallbacks for a service account's private key
pub const PRIVATE_KEY_VARS: &[&str] = &["FIREBASE_PRIVATE_KEY"];

/// Project ID used when nothing else names one (emulators, degraded local mode)
pub const PLACEHOLDER_PROJECT_ID: &str = "demo-project";

/// Precedence for the application's project ID, after the resolved credential's own value
const APP_PROJECT_ID_VARS: &[&str] = &[
    "FIREBASE_PROJECT_ID",
    "NEXT_PUBLIC_FIREBASE_PROJECT_ID",
    "GOOGLE_CLOUD_PROJECT",
    "GCLOUD_PROJECT",
];

pub(crate) const SERVICE_ACCOUNT_KEY_VAR: &str = "FIREBASE_SERVICE_ACCOUNT_KEY";
pub(crate) const SERVICE_ACCOUNT_JSON_VAR: &str = "FIREBASE_SERVICE_ACCOUNT_JSON";
pub(crate) const SERVICE_ACCOUNT_PATH_VAR: &str = "FIREBASE_SERVICE_ACCOUNT_PATH";
pub(crate) const APPLICATION_CREDENTIALS_VAR: &str = "GOOGLE_APPLICATION_CREDENTIALS";
pub(crate) const APPLICATION_CREDENTIALS_JSON_VARS: &[&str] =
    &["GOOGLE_APPLICATION_CREDENTIALS_JSON", "GOOGLE_AUTH_CREDENTIALS"];

pub(crate) const DEFAULT_CREDENTIAL_PATHS: &[&str] =
    &["firebase/service-account.json", "service-account.json"];

const MODE_VAR: &str = "NODE_ENV";
const BUNDLED_SERVICE_ACCOUNT: &str = include_str!("../firebase/bundled-service-account.json");

/// A read-only snapshot of the environment relevant to credential resolution
///
/// Values are captured once; nothing in this crate reads the process environment after the
/// snapshot is taken.
#[derive(Clone)]
pub struct EnvironmentSignals {
    vars: HashMap<String, String>,
    cwd: PathBuf,
}

impl EnvironmentSignals {
    /// Capture the current process environment and working directory
    pub fn from_process() -> Self {
        let vars = env::vars_os()
            .filter_map(|(key, value)| Some((key.into_string().ok()?, value.into_string().ok()?)));
        Self::from_vars(vars)
    }

    /// Build a snapshot from explicit key/value pairs, using the current working directory
    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: vars
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
            cwd: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }

    /// Resolve relative credential paths against `cwd` instead of the process directory
    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = cwd.into();
        self
    }

    /// The value of `name`, if it is set to something other than whitespace
    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars
            .get(name)
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
    }

    /// The first non-empty value among `names`
    pub fn first(&self, names: &[&str]) -> Option<&str> {
        names.iter().find_map(|name| self.get(name))
    }

    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    pub fn is_production(&self) -> bool {
        self.get(MODE_VAR) == Some("production")
    }

    /// Whether any of the [`EMULATOR_VARS`] is set
    pub fn emulator_mode(&self) -> bool {
        self.first(&EMULATOR_VARS).is_some()
    }

    /// Whether a managed Google runtime marker is present
    pub fn managed_runtime(&self) -> bool {
        self.first(MANAGED_RUNTIME_VARS).is_some()
    }

    /// Whether the platform default credential is worth attempting
    pub fn default_credential_supported(&self) -> bool {
        self.managed_runtime() || self.first(CREDENTIAL_LOCATION_VARS).is_some()
    }
}

impl fmt::Debug for EnvironmentSignals {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = self.vars.keys().collect::<Vec<_>>();
        names.sort();
        f.debug_struct("EnvironmentSignals")
            .field("vars", &names)
            .field("cwd", &self.cwd)
            .finish()
    }
}

/// What to do outside production when no credential, default credential or emulator is found
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LocalFallback {
    /// Start without credentials under the placeholder project ID
    #[default]
    Degraded,
    /// Fail the same way production does
    Fail,
}

/// Configuration for a single bootstrap pass
///
/// Built once (usually with [`BootstrapConfig::from_env()`]) and handed to an
/// [`AdminContext`](crate::AdminContext).
#[derive(Clone, Debug)]
pub struct BootstrapConfig {
    pub(crate) signals: EnvironmentSignals,
    pub(crate) app_name: String,
    pub(crate) production: bool,
    pub(crate) local_fallback: LocalFallback,
    pub(crate) gate_default_credential: bool,
    pub(crate) bundled_fallback: Option<DecodedPayload>,
    pub(crate) fallback_project_id: Option<String>,
}

impl BootstrapConfig {
    /// Configuration derived from the current process environment
    pub fn from_env() -> Self {
        Self::new(EnvironmentSignals::from_process())
    }

    pub fn new(signals: EnvironmentSignals) -> Self {
        Self {
            production: signals.is_production(),
            signals,
            app_name: crate::DEFAULT_APP_NAME.to_owned(),
            local_fallback: LocalFallback::default(),
            gate_default_credential: true,
            bundled_fallback: bundled_service_account(),
            fallback_project_id: None,
        }
    }

    /// Override the production flag derived from `NODE_ENV`
    pub fn with_production(mut self, production: bool) -> Self {
        self.production = production;
        self
    }

    pub fn with_local_fallback(mut self, fallback: LocalFallback) -> Self {
        self.local_fallback = fallback;
        self
    }

    /// Attempt the platform default credential even without a runtime or credential signal
    pub fn with_ungated_default_credential(mut self) -> Self {
        self.gate_default_credential = false;
        self
    }

    /// Replace the fallback credential bundled with the crate
    pub fn with_bundled_fallback(mut self, payload: Option<DecodedPayload>) -> Self {
        self.bundled_fallback = payload.filter(|payload| !payload.is_empty());
        self
    }

    /// Project ID used when neither the credential nor the environment names one
    pub fn with_fallback_project_id(mut self, project_id: impl Into<String>) -> Self {
        self.fallback_project_id = Some(project_id.into());
        self
    }

    pub fn with_app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = name.into();
        self
    }

    pub fn signals(&self) -> &EnvironmentSignals {
        &self.signals
    }

    pub fn is_production(&self) -> bool {
        self.production
    }

    /// Resolve the application's project ID, preferring `credential_value`
    ///
    /// Falls back to `FIREBASE_PROJECT_ID`, `NEXT_PUBLIC_FIREBASE_PROJECT_ID`,
    /// `GOOGLE_CLOUD_PROJECT`, `GCLOUD_PROJECT` and finally the configured fallback.
    pub fn resolve_project_id(&self, credential_value: Option<&str>) -> Option<String> {
        credential_value
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .or_else(|| self.signals.first(APP_PROJECT_ID_VARS))
            .or_else(|| {
                self.fallback_project_id
                    .as_deref()
                    .map(str::trim)
                    .filter(|value| !value.is_empty())
            })
            .map(str::to_owned)
    }
}

fn bundled_service_account() -> Option<DecodedPayload> {
    match serde_json::from_str::<Map<String, Value>>(BUNDLED_SERVICE_ACCOUNT) {
        Ok(map) if !map.is_empty() => Some(DecodedPayload::from(map)),
        Ok(_) => None,
        Err(err) => {
            warn!(%err, "bundled service account is not valid JSON");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_values_are_unset() {
        let signals = EnvironmentSignals::from_vars([
            ("FIREBASE_PROJECT_ID", "   "),
            ("GCLOUD_PROJECT", " gcloud-project "),
        ]);

        assert_eq!(signals.get("FIREBASE_PROJECT_ID"), None);
        assert_eq!(signals.first(PROJECT_ID_VARS), Some("gcloud-project"));
    }

    #[test]
    fn project_id_precedence() {
        let signals = EnvironmentSignals::from_vars([
            ("GOOGLE_CLOUD_PROJECT", "cloud"),
            ("NEXT_PUBLIC_FIREBASE_PROJECT_ID", "public"),
        ]);
        let config = BootstrapConfig::new(signals).with_fallback_project_id("fallback");

        assert_eq!(
            config.resolve_project_id(Some("from-credential")).as_deref(),
            Some("from-credential")
        );
        assert_eq!(config.resolve_project_id(Some(" ")).as_deref(), Some("public"));

        let config = BootstrapConfig::new(EnvironmentSignals::from_vars(Vec::<(String, String)>::new()))
            .with_fallback_project_id("fallback");
        assert_eq!(config.resolve_project_id(None).as_deref(), Some("fallback"));
    }

    #[test]
    fn runtime_signals() {
        let signals = EnvironmentSignals::from_vars([("NODE_ENV", "production")]);
        assert!(signals.is_production());
        assert!(!signals.emulator_mode());
        assert!(!signals.default_credential_supported());

        let signals = EnvironmentSignals::from_vars([
            ("NODE_ENV", "development"),
            ("FIREBASE_AUTH_EMULATOR_HOST", "127.0.0.1:9099"),
            ("K_SERVICE", "interviews"),
        ]);
        assert!(!signals.is_production());
        assert!(signals.emulator_mode());
        assert!(signals.managed_runtime());
        assert!(signals.default_credential_supported());
    }

    #[test]
    fn debug_hides_values() {
        let signals = EnvironmentSignals::from_vars([("FIREBASE_PRIVATE_KEY", "secret-material")]);
        let debug = format!("{signals:?}");
        assert!(debug.contains("FIREBASE_PRIVATE_KEY"));
        assert!(!debug.contains("secret-material"));
    }

    #[test]
    fn bundled_fallback_is_empty_by_default() {
        assert!(bundled_service_account().is_none());
    }
}
