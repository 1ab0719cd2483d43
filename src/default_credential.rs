use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;
use tokio::fs;
use tracing::debug;

use crate::config::{
    EnvironmentSignals, APPLICATION_CREDENTIALS_JSON_VARS, APPLICATION_CREDENTIALS_VAR,
};
use crate::config_default_credentials::{ConfigDefaultCredentials, UserCredentials};
use crate::custom_service_account::CustomServiceAccount;
use crate::metadata_service_account::MetadataServiceAccount;
use crate::service_account::ServiceAccountConfig;
use crate::{Error, TokenProvider};

/// Application default credentials, tagged by their `type` field
// Implementation referenced from
// https://github.com/golang/oauth2/blob/a835fc4358f6852f50c4c5c33fddcd1adade5b0a/google/google.go#L158
#[derive(Deserialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum FlexibleCredentialSource {
    // The `key.json` file created by `gcloud iam service-accounts keys create`
    ServiceAccount(ServiceAccountFile),
    // The file created by `gcloud auth application-default login`
    AuthorizedUser(UserCredentials),
}

#[derive(Deserialize)]
pub(crate) struct ServiceAccountFile {
    project_id: Option<String>,
    client_email: String,
    private_key: String,
}

impl std::fmt::Debug for ServiceAccountFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceAccountFile")
            .field("project_id", &self.project_id)
            .field("client_email", &self.client_email)
            .finish_non_exhaustive()
    }
}

impl FlexibleCredentialSource {
    /// Find explicitly located default credentials
    ///
    /// Inline JSON (`GOOGLE_APPLICATION_CREDENTIALS_JSON`, `GOOGLE_AUTH_CREDENTIALS`) is
    /// preferred over the file named by `GOOGLE_APPLICATION_CREDENTIALS`.
    pub(crate) async fn from_env(signals: &EnvironmentSignals) -> Result<Option<Self>, Error> {
        if let Some(json) = signals.first(APPLICATION_CREDENTIALS_JSON_VARS) {
            debug!("reading default credentials from inline JSON");
            return Self::from_json(json).map(Some);
        }

        match signals.get(APPLICATION_CREDENTIALS_VAR) {
            Some(path) => {
                debug!(path, "reading credentials file from GOOGLE_APPLICATION_CREDENTIALS env var");
                Self::from_file(signals.cwd().join(path)).await.map(Some)
            }
            None => Ok(None),
        }
    }

    fn from_json(json: &str) -> Result<Self, Error> {
        serde_json::from_str(json)
            .map_err(|err| Error::Json("failed to deserialize default credentials", err))
    }

    async fn from_file(path: impl AsRef<Path>) -> Result<Self, Error> {
        let json = fs::read_to_string(path)
            .await
            .map_err(|err| Error::Io("failed to read default credentials file", err))?;
        Self::from_json(&json)
    }

    pub(crate) fn into_provider(
        self,
        project_id: Option<&str>,
    ) -> Result<Arc<dyn TokenProvider>, Error> {
        match self {
            Self::ServiceAccount(file) => {
                let project_id = file.project_id.as_deref().or(project_id).unwrap_or_default();
                let config =
                    ServiceAccountConfig::new(project_id, &file.client_email, &file.private_key)
                        .ok_or(Error::Str(
                            "default service account credentials are incomplete or have an unusable key",
                        ))?;
                Ok(Arc::new(CustomServiceAccount::new(config)?))
            }
            Self::AuthorizedUser(credentials) => Ok(Arc::new(
                ConfigDefaultCredentials::from_user_credentials(credentials),
            )),
        }
    }
}

/// Build the platform default credential
///
/// Explicitly located credentials win; otherwise the metadata server of the managed runtime is
/// used. `project_id` fills in for service account files that do not carry one.
pub(crate) async fn default_credential(
    signals: &EnvironmentSignals,
    project_id: Option<&str>,
) -> Result<Arc<dyn TokenProvider>, Error> {
    match FlexibleCredentialSource::from_env(signals).await? {
        Some(source) => source.into_provider(project_id),
        None => {
            debug!("using GCP instance metadata server");
            Ok(Arc::new(MetadataServiceAccount::new()))
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    const RSA_PKCS8: &str = include_str!("../testdata/rsa_pkcs8.pem");

    #[test]
    fn test_parse_application_default_credentials() {
        let test_creds = r#"{
            "client_id": "***id***.apps.googleusercontent.com",
            "client_secret": "***secret***",
            "quota_project_id": "test_project",
            "refresh_token": "***refresh***",
            "type": "authorized_user"
        }"#;

        let cred_source = FlexibleCredentialSource::from_json(test_creds).unwrap();
        assert!(matches!(
            cred_source,
            FlexibleCredentialSource::AuthorizedUser(_)
        ));
    }

    #[tokio::test]
    async fn authorized_user_project_id() {
        let signals = EnvironmentSignals::from_vars([(
            "GOOGLE_APPLICATION_CREDENTIALS_JSON",
            json!({
                "type": "authorized_user",
                "client_id": "id",
                "client_secret": "secret",
                "refresh_token": "refresh",
                "quota_project_id": "quota-project",
            })
            .to_string(),
        )]);

        let provider = default_credential(&signals, None).await.unwrap();
        assert_eq!(&*provider.project_id().await.unwrap(), "quota-project");
    }

    #[tokio::test]
    async fn service_account_file_uses_fallback_project() {
        let dir = tempfile::tempdir().unwrap();
        let file = json!({
            "type": "service_account",
            "client_email": "sa@example.iam.gserviceaccount.com",
            "private_key": RSA_PKCS8,
        });
        std::fs::write(dir.path().join("adc.json"), file.to_string()).unwrap();

        let signals =
            EnvironmentSignals::from_vars([("GOOGLE_APPLICATION_CREDENTIALS", "adc.json")])
                .with_cwd(dir.path());
        let provider = default_credential(&signals, Some("env-project"))
            .await
            .unwrap();
        assert_eq!(&*provider.project_id().await.unwrap(), "env-project");

        // Without any project ID the service account is incomplete
        assert!(default_credential(&signals, None).await.is_err());
    }

    #[tokio::test]
    async fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let signals =
            EnvironmentSignals::from_vars([("GOOGLE_APPLICATION_CREDENTIALS", "nope.json")])
                .with_cwd(dir.path());
        assert!(matches!(
            default_credential(&signals, None).await,
            Err(Error::Io(..))
        ));
    }
}
