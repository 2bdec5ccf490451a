//! Persisted Strategy Decoding
//!
//! Connection strategies are written as tagged tables:
//!
//! ```toml
//! connection = { type = "ssh", credentials_id = "build-key" }
//! ```
//!
//! Configuration saved before strategies became extensible holds a bare tag
//! instead (`slave_type = "JNLP"`). Those two tags are still accepted on read;
//! serialization always produces the tagged form.

use serde::de::value::MapAccessDeserializer;
use serde::de::{self, Deserializer, MapAccess, Visitor};
use serde::Deserialize;
use std::fmt;

use crate::connection::strategy::{ConnectionStrategy, SshStrategy};

/// Legacy tag for SSH launched nodes
pub const LEGACY_SSH: &str = "SSH";

/// Legacy tag for nodes whose agent connects back
pub const LEGACY_JNLP: &str = "JNLP";

/// Strategy for a bare legacy tag.
///
/// `"SSH"` carries no credentials; the enclosing record fills them in from
/// its own legacy field.
pub fn decode_legacy_tag(value: &str) -> Option<ConnectionStrategy> {
    match value {
        LEGACY_SSH => Some(ConnectionStrategy::Ssh(SshStrategy::default())),
        LEGACY_JNLP => Some(ConnectionStrategy::PUSH_AGENT),
        _ => None,
    }
}

/// Current tagged representation
#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Tagged {
    Ssh(SshStrategy),
    #[serde(alias = "jnlp")]
    PushAgent,
    Unspecified,
}

impl From<Tagged> for ConnectionStrategy {
    fn from(tagged: Tagged) -> Self {
        match tagged {
            Tagged::Ssh(ssh) => ConnectionStrategy::Ssh(ssh),
            Tagged::PushAgent => ConnectionStrategy::PUSH_AGENT,
            Tagged::Unspecified => ConnectionStrategy::Unspecified,
        }
    }
}

struct StrategyVisitor;

impl<'de> Visitor<'de> for StrategyVisitor {
    type Value = ConnectionStrategy;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "a connection strategy table or one of the legacy tags \"{LEGACY_SSH}\", \"{LEGACY_JNLP}\""
        )
    }

    fn visit_str<E: de::Error>(self, value: &str) -> Result<Self::Value, E> {
        decode_legacy_tag(value).ok_or_else(|| E::invalid_value(de::Unexpected::Str(value), &self))
    }

    fn visit_map<A: MapAccess<'de>>(self, map: A) -> Result<Self::Value, A::Error> {
        Tagged::deserialize(MapAccessDeserializer::new(map)).map(Into::into)
    }
}

impl<'de> Deserialize<'de> for ConnectionStrategy {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(StrategyVisitor)
    }
}

/// Field decoder for a configuration level's strategy.
///
/// An explicit `unspecified` decodes to `None` so the level inherits.
/// Use with `#[serde(default, deserialize_with = "...")]`.
pub fn optional_strategy<'de, D>(deserializer: D) -> Result<Option<ConnectionStrategy>, D::Error>
where
    D: Deserializer<'de>,
{
    let strategy = Option::<ConnectionStrategy>::deserialize(deserializer)?;
    Ok(strategy.filter(|s| *s != ConnectionStrategy::Unspecified))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;

    #[derive(Debug, Serialize, Deserialize)]
    struct Level {
        #[serde(default, deserialize_with = "optional_strategy")]
        connection: Option<ConnectionStrategy>,
    }

    #[test]
    fn test_legacy_jnlp_is_canonical_push_agent() {
        let legacy: ConnectionStrategy = serde_json::from_str("\"JNLP\"").unwrap();
        let structured: ConnectionStrategy =
            serde_json::from_str(r#"{"type": "push_agent"}"#).unwrap();

        assert_eq!(legacy, ConnectionStrategy::PUSH_AGENT);
        assert_eq!(structured, ConnectionStrategy::PUSH_AGENT);
        assert_eq!(legacy, ConnectionStrategy::push_agent());
    }

    #[test]
    fn test_legacy_ssh_has_no_credentials() {
        let legacy: ConnectionStrategy = serde_json::from_str("\"SSH\"").unwrap();
        assert_eq!(legacy, ConnectionStrategy::Ssh(SshStrategy::default()));
        assert_eq!(legacy.credentials_id(), None);
        assert_ne!(legacy, ConnectionStrategy::ssh("abc"));
    }

    #[test]
    fn test_legacy_tags_are_case_sensitive() {
        assert!(serde_json::from_str::<ConnectionStrategy>("\"ssh\"").is_err());
        assert!(serde_json::from_str::<ConnectionStrategy>("\"Jnlp\"").is_err());
        assert!(decode_legacy_tag("WINRM").is_none());
    }

    #[test]
    fn test_unknown_tag_error_names_accepted_tags() {
        let err = serde_json::from_str::<ConnectionStrategy>("\"WINRM\"").unwrap_err();
        assert!(err.to_string().contains("\"SSH\""), "{err}");
    }

    #[test]
    fn test_json_round_trip() {
        for strategy in [ConnectionStrategy::ssh("abc"), ConnectionStrategy::PUSH_AGENT] {
            let json = serde_json::to_string(&strategy).unwrap();
            let decoded: ConnectionStrategy = serde_json::from_str(&json).unwrap();
            assert_eq!(decoded, strategy);
        }
    }

    #[test]
    fn test_toml_round_trip() {
        let level = Level {
            connection: Some(ConnectionStrategy::ssh("abc")),
        };
        let text = toml::to_string(&level).unwrap();
        assert!(text.contains("type = \"ssh\""), "{text}");

        let decoded: Level = toml::from_str(&text).unwrap();
        assert_eq!(decoded.connection, Some(ConnectionStrategy::ssh("abc")));
    }

    #[test]
    fn test_serialization_never_writes_legacy_tags() {
        let json = serde_json::to_string(&ConnectionStrategy::PUSH_AGENT).unwrap();
        assert_eq!(json, r#"{"type":"push_agent"}"#);

        let legacy: ConnectionStrategy = serde_json::from_str("\"SSH\"").unwrap();
        assert_eq!(serde_json::to_string(&legacy).unwrap(), r#"{"type":"ssh"}"#);
    }

    #[test]
    fn test_legacy_tag_in_toml_field() {
        let level: Level = toml::from_str("connection = \"JNLP\"").unwrap();
        assert_eq!(level.connection, Some(ConnectionStrategy::PUSH_AGENT));
    }

    #[test]
    fn test_unspecified_decodes_to_absent() {
        let level: Level = toml::from_str("connection = { type = \"unspecified\" }").unwrap();
        assert!(level.connection.is_none());

        let level: Level = toml::from_str("").unwrap();
        assert!(level.connection.is_none());
    }

    #[test]
    fn test_bare_unspecified_still_decodes() {
        let strategy: ConnectionStrategy =
            serde_json::from_str(r#"{"type": "unspecified"}"#).unwrap();
        assert_eq!(strategy, ConnectionStrategy::Unspecified);
    }
}
