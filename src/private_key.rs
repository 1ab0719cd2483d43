//! Private key normalization
//!
//! Keys reach us through environment variables and config files in many shapes: PEM with
//! escaped newlines, PEM wrapped in quotes, bare base64, or a whole service account JSON blob
//! pasted into the key variable. [`normalize_private_key()`] reduces all of them to one
//! canonical PEM block, and every successful path ends in a structural check of the key.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use ring::rand::SystemRandom;
use ring::signature::{
    EcdsaKeyPair, Ed25519KeyPair, RsaKeyPair, ECDSA_P256_SHA256_ASN1_SIGNING,
    ECDSA_P384_SHA384_ASN1_SIGNING,
};
use rustls_pki_types::pem::PemObject;
use rustls_pki_types::PrivateKeyDer;
use serde_json::{Map, Value};
use tracing::debug;

use crate::payload::LENIENT_BASE64;

/// Smallest decoded key body accepted as plausible key material
pub const MIN_KEY_BYTES: usize = 128;

const PKCS8_LABEL: &str = "PRIVATE KEY";
const PKCS1_LABEL: &str = "RSA PRIVATE KEY";
const BEGIN_MARKER: &str = "-----BEGIN";
const END_MARKER: &str = "-----END";
const LINE_WIDTH: usize = 64;
const MAX_NESTING: u8 = 1;

/// Normalize a private key into canonical PEM
///
/// Returns `None` if no usable key can be recovered from `raw`.
pub fn normalize_private_key(raw: &str) -> Option<String> {
    normalize_at_depth(raw, 0)
}

fn normalize_at_depth(raw: &str, depth: u8) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    let stripped = strip_quotes(trimmed);
    let unescaped = unescape(stripped);
    let value = unescaped.trim();
    for format in KeyFormat::ORDER {
        match format.attempt_at(stripped, value, depth) {
            Attempt::Decoded(pem) => {
                debug!(format = format.name(), "normalized private key");
                return Some(pem);
            }
            Attempt::NotApplicable => continue,
            Attempt::Rejected(reason) => {
                debug!(format = format.name(), reason, "rejected private key");
                return None;
            }
        }
    }

    None
}

/// Outcome of interpreting a key under one [`KeyFormat`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Attempt {
    /// The value was in this format and yielded a validated PEM key
    Decoded(String),
    /// The value is not in this format; try the next one
    NotApplicable,
    /// The value is in this format but the key is unusable; stop
    Rejected(&'static str),
}

/// The encodings a private key is recognized in, tried in [`KeyFormat::ORDER`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyFormat {
    /// A service account JSON object carrying `private_key` or `privateKey`
    NestedJson,
    /// PEM text with begin and end markers
    Pem,
    /// Bare base64 key material
    RawBase64,
}

impl KeyFormat {
    pub const ORDER: [KeyFormat; 3] = [Self::NestedJson, Self::Pem, Self::RawBase64];

    /// Interpret an already unquoted and unescaped `value` in this format
    pub fn attempt(self, value: &str) -> Attempt {
        self.attempt_at(value, value, 0)
    }

    fn attempt_at(self, raw: &str, value: &str, depth: u8) -> Attempt {
        match self {
            Self::NestedJson => nested_json(raw, value, depth),
            Self::Pem => pem(value),
            Self::RawBase64 => raw_base64(value),
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::NestedJson => "nested-json",
            Self::Pem => "pem",
            Self::RawBase64 => "raw-base64",
        }
    }
}

/// `raw` is the value before newline unescaping: JSON strings cannot hold literal newlines,
/// so a pasted blob usually only parses in its original form.
fn nested_json(raw: &str, value: &str, depth: u8) -> Attempt {
    if !(value.starts_with('{') && value.ends_with('}')) {
        return Attempt::NotApplicable;
    }

    if depth >= MAX_NESTING {
        return Attempt::Rejected("service account JSON nested inside another");
    }

    let parsed = serde_json::from_str::<Map<String, Value>>(raw.trim())
        .or_else(|_| serde_json::from_str::<Map<String, Value>>(value));
    let Ok(object) = parsed else {
        return Attempt::Rejected("embedded service account JSON does not parse");
    };

    let Some(inner) = ["private_key", "privateKey"]
        .iter()
        .find_map(|key| object.get(*key).and_then(Value::as_str))
    else {
        return Attempt::Rejected("embedded service account JSON has no private key");
    };

    match normalize_at_depth(inner, depth + 1) {
        Some(pem) => Attempt::Decoded(pem),
        None => Attempt::Rejected("embedded private key is unusable"),
    }
}

fn pem(value: &str) -> Attempt {
    if !(value.contains(BEGIN_MARKER) && value.contains(END_MARKER)) {
        return Attempt::NotApplicable;
    }

    let mut canonical = value
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n");
    canonical.push('\n');

    match validate(&canonical) {
        Ok(()) => Attempt::Decoded(canonical),
        Err(reason) => Attempt::Rejected(reason),
    }
}

fn raw_base64(value: &str) -> Attempt {
    // A lone marker means a truncated PEM paste, not bare key material
    if value.contains(BEGIN_MARKER) || value.contains(END_MARKER) {
        return Attempt::Rejected("incomplete PEM block");
    }

    let body = value
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '/' | '='))
        .collect::<String>();
    if body.is_empty() {
        return Attempt::Rejected("no base64 content");
    }

    let bytes = match LENIENT_BASE64.decode(&body) {
        Ok(bytes) => bytes,
        Err(_) => return Attempt::Rejected("invalid base64 key material"),
    };

    if bytes.len() < MIN_KEY_BYTES {
        return Attempt::Rejected("decoded key material is too short");
    }

    // Bare PKCS#1 bodies are common when copied out of `BEGIN RSA PRIVATE KEY` blocks
    let label = match RsaKeyPair::from_der(&bytes) {
        Ok(_) => PKCS1_LABEL,
        Err(_) => PKCS8_LABEL,
    };

    let pem = to_pem(label, &bytes);
    match validate(&pem) {
        Ok(()) => Attempt::Decoded(pem),
        Err(reason) => Attempt::Rejected(reason),
    }
}

/// Wrap DER bytes in a PEM block labelled `label`
fn to_pem(label: &str, der: &[u8]) -> String {
    let encoded = STANDARD.encode(der);
    let mut pem = String::with_capacity(encoded.len() + encoded.len() / LINE_WIDTH + 80);
    pem.push_str(&format!("-----BEGIN {label}-----\n"));
    let mut rest = encoded.as_str();
    while !rest.is_empty() {
        let (line, tail) = rest.split_at(rest.len().min(LINE_WIDTH));
        pem.push_str(line);
        pem.push('\n');
        rest = tail;
    }
    pem.push_str(&format!("-----END {label}-----\n"));
    pem
}

/// Check that `pem` frames a private key
///
/// Keys ring cannot load (SEC1, unsupported curves or algorithms) are still accepted when the
/// PEM body decodes to at least [`MIN_KEY_BYTES`].
pub(crate) fn validate(pem: &str) -> Result<(), &'static str> {
    let der = PrivateKeyDer::from_pem_slice(pem.as_bytes())
        .map_err(|_| "PEM does not contain a readable private key")?;

    match recognize(&der) {
        Some(kind) => {
            debug!(kind, "private key parsed");
            Ok(())
        }
        None if der.secret_der().len() >= MIN_KEY_BYTES => {
            debug!("private key format unsupported locally, accepting structurally sound PEM");
            Ok(())
        }
        None => Err("private key body is too short"),
    }
}

fn recognize(der: &PrivateKeyDer<'_>) -> Option<&'static str> {
    match der {
        PrivateKeyDer::Pkcs8(key) => {
            let der = key.secret_pkcs8_der();
            if RsaKeyPair::from_pkcs8(der).is_ok() {
                return Some("rsa");
            }

            let rng = SystemRandom::new();
            for alg in [
                &ECDSA_P256_SHA256_ASN1_SIGNING,
                &ECDSA_P384_SHA384_ASN1_SIGNING,
            ] {
                if EcdsaKeyPair::from_pkcs8(alg, der, &rng).is_ok() {
                    return Some("ecdsa");
                }
            }

            Ed25519KeyPair::from_pkcs8_maybe_unchecked(der)
                .ok()
                .map(|_| "ed25519")
        }
        PrivateKeyDer::Pkcs1(key) => RsaKeyPair::from_der(key.secret_pkcs1_der())
            .ok()
            .map(|_| "rsa"),
        _ => None,
    }
}

fn strip_quotes(value: &str) -> &str {
    let mut chars = value.chars();
    match (chars.next(), chars.next_back()) {
        (Some(first), Some(last)) if first == last && matches!(first, '"' | '\'' | '`') => {
            &value[1..value.len() - 1]
        }
        _ => value,
    }
}

/// Collapse escaped and real line endings to `\n` and unescape `\"`
fn unescape(value: &str) -> String {
    value
        .replace("\\r\\n", "\n")
        .replace("\\n", "\n")
        .replace("\\r", "\n")
        .replace("\r\n", "\n")
        .replace('\r', "\n")
        .replace("\\\"", "\"")
}
