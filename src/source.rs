use std::fmt;
use std::io::ErrorKind;
use std::path::PathBuf;

use tokio::fs;
use tracing::{instrument, Level};

use crate::config::{
    BootstrapConfig, APPLICATION_CREDENTIALS_VAR, DEFAULT_CREDENTIAL_PATHS,
    SERVICE_ACCOUNT_JSON_VAR, SERVICE_ACCOUNT_KEY_VAR, SERVICE_ACCOUNT_PATH_VAR,
};
use crate::diagnostics::{Diagnostics, Stage};
use crate::payload::DecodedPayload;

/// Where a raw credential payload came from
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceKind {
    /// A secret stored directly in an environment variable
    InlineSecret,
    /// A credentials file on disk
    FilePath,
    /// The fallback credential bundled with the crate
    BundledObject,
}

/// Uninterpreted credential content
#[derive(Clone)]
pub enum SourceContent {
    Text(String),
    Object(DecodedPayload),
}

/// A credential payload as found, before any decoding
#[derive(Clone)]
pub struct RawCredentialSource {
    pub kind: SourceKind,
    /// Environment variable name or file path
    pub origin: String,
    pub content: SourceContent,
}

impl fmt::Debug for RawCredentialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawCredentialSource")
            .field("kind", &self.kind)
            .field("origin", &self.origin)
            .finish_non_exhaustive()
    }
}

/// Gather raw credential payloads in priority order
///
/// 1. `FIREBASE_SERVICE_ACCOUNT_KEY`, then `FIREBASE_SERVICE_ACCOUNT_JSON`.
/// 2. Only if neither is set: the first readable, non-empty file among
///    `FIREBASE_SERVICE_ACCOUNT_PATH`, `GOOGLE_APPLICATION_CREDENTIALS`,
///    `firebase/service-account.json` and `service-account.json`.
/// 3. Outside production: the bundled fallback credential, if non-empty.
///
/// Unreadable files are skipped and recorded as warnings.
#[instrument(level = Level::DEBUG, skip_all)]
pub async fn collect_sources(
    config: &BootstrapConfig,
    diagnostics: &mut Diagnostics,
) -> Vec<RawCredentialSource> {
    let signals = &config.signals;
    let mut sources = Vec::new();

    for var in [SERVICE_ACCOUNT_KEY_VAR, SERVICE_ACCOUNT_JSON_VAR] {
        if let Some(value) = signals.get(var) {
            diagnostics.debug(Stage::Source, format!("found inline credential in {var}"));
            sources.push(RawCredentialSource {
                kind: SourceKind::InlineSecret,
                origin: var.to_owned(),
                content: SourceContent::Text(value.to_owned()),
            });
        }
    }

    if sources.is_empty() {
        if let Some(file) = first_credentials_file(config, diagnostics).await {
            sources.push(file);
        }
    }

    if !config.production {
        if let Some(bundled) = config.bundled_fallback.as_ref().filter(|p| !p.is_empty()) {
            diagnostics.debug(Stage::Source, "using bundled fallback credential");
            sources.push(RawCredentialSource {
                kind: SourceKind::BundledObject,
                origin: "bundled".to_owned(),
                content: SourceContent::Object(bundled.clone()),
            });
        }
    }

    sources
}

async fn first_credentials_file(
    config: &BootstrapConfig,
    diagnostics: &mut Diagnostics,
) -> Option<RawCredentialSource> {
    for (path, configured) in candidate_paths(config) {
        match fs::read_to_string(&path).await {
            Ok(text) if text.trim().is_empty() => {
                diagnostics.warn(
                    Stage::Source,
                    format!("credentials file {} is empty, skipping", path.display()),
                );
            }
            Ok(text) => {
                diagnostics.debug(
                    Stage::Source,
                    format!("read credentials file {}", path.display()),
                );
                return Some(RawCredentialSource {
                    kind: SourceKind::FilePath,
                    origin: path.display().to_string(),
                    content: SourceContent::Text(text),
                });
            }
            // The default locations are only a convention; their absence is expected
            Err(err) if err.kind() == ErrorKind::NotFound && !configured => {
                diagnostics.debug(
                    Stage::Source,
                    format!("no credentials file at {}", path.display()),
                );
            }
            Err(err) => {
                diagnostics.warn(
                    Stage::Source,
                    format!("failed to read credentials file {}: {err}", path.display()),
                );
            }
        }
    }

    None
}

/// Candidate credential files, each tagged with whether an environment variable named it
fn candidate_paths(config: &BootstrapConfig) -> Vec<(PathBuf, bool)> {
    let signals = &config.signals;
    let cwd = signals.cwd();

    let configured = [SERVICE_ACCOUNT_PATH_VAR, APPLICATION_CREDENTIALS_VAR]
        .into_iter()
        .filter_map(|var| signals.get(var))
        .map(|path| (cwd.join(path), true));
    let defaults = DEFAULT_CREDENTIAL_PATHS
        .iter()
        .map(|path| (cwd.join(path), false));

    configured.chain(defaults).collect()
}

#[cfg(test)]
mod tests {
    use std::fs;

    use serde_json::json;

    use super::*;
    use crate::config::EnvironmentSignals;

    fn payload(value: serde_json::Value) -> DecodedPayload {
        match value {
            serde_json::Value::Object(map) => DecodedPayload::from(map),
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn inline_secrets_come_first_and_suppress_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("firebase")).unwrap();
        fs::write(dir.path().join("firebase/service-account.json"), "{}").unwrap();

        let signals = EnvironmentSignals::from_vars([
            ("FIREBASE_SERVICE_ACCOUNT_JSON", r#"{"project_id":"json"}"#),
            ("FIREBASE_SERVICE_ACCOUNT_KEY", "eyJwcm9qZWN0X2lkIjoia2V5In0="),
        ])
        .with_cwd(dir.path());
        let config = BootstrapConfig::new(signals).with_production(true);

        let sources = collect_sources(&config, &mut Diagnostics::new()).await;
        let origins = sources.iter().map(|s| s.origin.as_str()).collect::<Vec<_>>();
        assert_eq!(
            origins,
            ["FIREBASE_SERVICE_ACCOUNT_KEY", "FIREBASE_SERVICE_ACCOUNT_JSON"]
        );
        assert!(sources.iter().all(|s| s.kind == SourceKind::InlineSecret));
    }

    #[tokio::test]
    async fn first_readable_file_wins() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("empty.json"), "  \n").unwrap();
        fs::write(dir.path().join("service-account.json"), r#"{"project_id":"root"}"#).unwrap();

        let signals = EnvironmentSignals::from_vars([
            ("FIREBASE_SERVICE_ACCOUNT_PATH", "missing.json"),
            ("GOOGLE_APPLICATION_CREDENTIALS", "empty.json"),
        ])
        .with_cwd(dir.path());
        let config = BootstrapConfig::new(signals).with_production(true);

        let mut diagnostics = Diagnostics::new();
        let sources = collect_sources(&config, &mut diagnostics).await;
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].kind, SourceKind::FilePath);
        assert!(sources[0].origin.ends_with("service-account.json"));

        // The missing configured path and the empty file are both reported
        assert_eq!(diagnostics.at_least(Level::WARN).count(), 2);
    }

    #[tokio::test]
    async fn bundled_fallback_only_outside_production() {
        let dir = tempfile::tempdir().unwrap();
        let signals =
            EnvironmentSignals::from_vars(Vec::<(String, String)>::new()).with_cwd(dir.path());
        let bundled = payload(json!({"project_id": "bundled"}));

        let config = BootstrapConfig::new(signals.clone())
            .with_production(false)
            .with_bundled_fallback(Some(bundled.clone()));
        let sources = collect_sources(&config, &mut Diagnostics::new()).await;
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].kind, SourceKind::BundledObject);

        let config = BootstrapConfig::new(signals)
            .with_production(true)
            .with_bundled_fallback(Some(bundled));
        assert!(collect_sources(&config, &mut Diagnostics::new())
            .await
            .is_empty());
    }

    #[test]
    fn absolute_paths_are_kept() {
        let signals = EnvironmentSignals::from_vars([(
            "GOOGLE_APPLICATION_CREDENTIALS",
            "/etc/secrets/adc.json",
        )])
        .with_cwd("/srv/app");
        let paths = candidate_paths(&BootstrapConfig::new(signals));

        assert_eq!(paths[0], (PathBuf::from("/etc/secrets/adc.json"), true));
        assert_eq!(
            paths[1],
            (PathBuf::from("/srv/app/firebase/service-account.json"), false)
        );
    }
}
