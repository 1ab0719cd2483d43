use std::fmt;

use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use serde_json::{Map, Value};
use tracing::debug;

use crate::source::SourceContent;
use crate::Error;

/// Standard alphabet, tolerant of missing or present padding
pub(crate) const LENIENT_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

/// A credential payload parsed into loosely-typed JSON fields
#[derive(Clone, Default, PartialEq)]
pub struct DecodedPayload(Map<String, Value>);

impl DecodedPayload {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The first non-blank string value among `keys`
    pub fn string(&self, keys: &[&str]) -> Option<&str> {
        keys.iter().find_map(|key| {
            self.0
                .get(*key)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|value| !value.is_empty())
        })
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }
}

impl From<Map<String, Value>> for DecodedPayload {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl fmt::Debug for DecodedPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecodedPayload")
            .field("keys", &self.0.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Parse raw source content into a [`DecodedPayload`]
///
/// Structured content is returned as is. Text starting with `{` is parsed as a JSON literal;
/// anything else is treated as base64-encoded JSON.
pub fn decode_payload(content: &SourceContent) -> Result<DecodedPayload, Error> {
    let text = match content {
        SourceContent::Object(payload) => return Ok(payload.clone()),
        SourceContent::Text(text) => text.trim(),
    };

    if text.starts_with('{') {
        return serde_json::from_str::<Map<String, Value>>(text)
            .map(DecodedPayload)
            .map_err(|err| Error::Json("failed to parse credential JSON", err));
    }

    debug!("credential payload is not a JSON literal, decoding as base64");
    let compact = text
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect::<String>();
    let bytes = LENIENT_BASE64
        .decode(compact)
        .map_err(|err| Error::Base64("failed to decode base64 credential payload", err))?;
    let json = String::from_utf8(bytes)
        .map_err(|err| Error::Other("base64 credential payload is not UTF-8", Box::new(err)))?;

    serde_json::from_str::<Map<String, Value>>(&json)
        .map(DecodedPayload)
        .map_err(|err| Error::Json("failed to parse base64-decoded credential JSON", err))
}

#[cfg(test)]
mod tests {
    use base64::engine::general_purpose::STANDARD;

    use super::*;

    const ACCOUNT: &str = r#"{"project_id":"mock-interviews","client_email":"admin@mock-interviews.iam.gserviceaccount.com"}"#;

    #[test]
    fn json_literal() {
        let payload = decode_payload(&SourceContent::Text(format!("  {ACCOUNT}\n"))).unwrap();
        assert_eq!(payload.string(&["project_id"]), Some("mock-interviews"));
    }

    #[test]
    fn base64_json() {
        let encoded = STANDARD.encode(ACCOUNT);
        // Line-wrapped and unpadded input is still accepted
        let wrapped = format!("{}\n{}", &encoded[..40], encoded[40..].trim_end_matches('='));

        let payload = decode_payload(&SourceContent::Text(wrapped)).unwrap();
        assert_eq!(
            payload.string(&["clientEmail", "client_email"]),
            Some("admin@mock-interviews.iam.gserviceaccount.com")
        );
    }

    #[test]
    fn malformed_literal_is_an_error() {
        let err = decode_payload(&SourceContent::Text(r#"{"project_id": "#.to_owned()));
        assert!(matches!(err, Err(Error::Json(..))));
    }

    #[test]
    fn garbage_is_an_error() {
        let err = decode_payload(&SourceContent::Text("not base64 at all!".to_owned()));
        assert!(matches!(err, Err(Error::Base64(..))));

        let not_json = STANDARD.encode("just some text");
        let err = decode_payload(&SourceContent::Text(not_json));
        assert!(matches!(err, Err(Error::Json(..))));
    }

    #[test]
    fn structured_content_is_returned_unchanged() {
        let map = serde_json::from_str::<Map<String, Value>>(ACCOUNT).unwrap();
        let payload = DecodedPayload::from(map);
        let decoded = decode_payload(&SourceContent::Object(payload.clone())).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn blank_strings_are_missing() {
        let map = serde_json::from_str::<Map<String, Value>>(
            r#"{"projectId":"  ","project_id":"fallback","private_key":42}"#,
        )
        .unwrap();
        let payload = DecodedPayload::from(map);
        assert_eq!(payload.string(&["projectId", "project_id"]), Some("fallback"));
        assert_eq!(payload.string(&["private_key"]), None);
    }
}
