use std::{
    fmt::Display,
    sync::LazyLock,
};

use anyhow::Error;
use regex::Regex;
use serde::{
    Deserialize,
    Serialize,
};
use thiserror::Error;

use crate::core::error::InteractionError;

#[derive(Debug, Error)]
#[error("invalid URI")]
pub struct InvalidUri;

/// Validates a concrete topic URI.
///
/// Strict URIs restrict components to lowercase letters, digits, and
/// underscores. Loose URIs allow any component free of whitespace, `.`, and
/// `#`. Empty components are invalid either way.
pub fn validate_uri<S>(uri: S, strict: bool) -> Result<(), InvalidUri>
where
    S: AsRef<str>,
{
    static STRICT_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"^([0-9a-z_]+\.)*([0-9a-z_]+)$").unwrap());
    static LOOSE_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"^([^\s.#]+\.)*([^\s.#]+)$").unwrap());
    let re: &Regex = if strict { &STRICT_RE } else { &LOOSE_RE };
    if !re.is_match(uri.as_ref()) {
        return Err(InvalidUri);
    }
    Ok(())
}

/// Validates a topic pattern URI, as used by prefix and wildcard
/// subscriptions.
///
/// Same component rules as [`validate_uri`], except that empty components are
/// allowed: a trailing empty component ends a prefix pattern, and interior
/// empty components are wildcard markers.
pub fn validate_pattern_uri<S>(uri: S, strict: bool) -> Result<(), InvalidUri>
where
    S: AsRef<str>,
{
    static STRICT_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"^(([0-9a-z_]+)?\.)*([0-9a-z_]+)?$").unwrap());
    static LOOSE_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"^(([^\s.#]+)?\.)*([^\s.#]+)?$").unwrap());
    let re: &Regex = if strict { &STRICT_RE } else { &LOOSE_RE };
    if !re.is_match(uri.as_ref()) {
        return Err(InvalidUri);
    }
    Ok(())
}

/// A dot-separated identifier for a resource, such as a topic.
///
/// URIs are not validated at construction: whether a URI is acceptable
/// depends on broker policy (strictness) and on how it will be matched, so
/// validation is applied per message with [`validate_uri`] and
/// [`validate_pattern_uri`].
#[derive(Debug, Default, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
#[serde(transparent)]
pub struct Uri(String);

impl Uri {
    /// Maps an error to the URI that identifies it on the wire.
    pub fn for_error(error: &Error) -> Self {
        if error.is::<InvalidUri>() {
            Self::from("wamp.error.invalid_uri")
        } else if let Some(error) = error.downcast_ref::<InteractionError>() {
            Self::from(format!("wamp.error.{}", error.uri_component()))
        } else {
            Self::from("wamp.error.unknown_error")
        }
    }

    /// Whether this URI, read as a prefix pattern, matches the topic.
    ///
    /// The match is a plain string prefix with no component-boundary check:
    /// `nexus.tes` matches `nexus.test.topic`.
    pub fn prefix_match(&self, topic: &Uri) -> bool {
        topic.0.starts_with(&self.0)
    }

    /// Whether this URI, read as a wildcard pattern, matches the topic.
    ///
    /// Component counts must be equal, and every non-empty pattern component
    /// must equal the corresponding topic component.
    pub fn wildcard_match(&self, topic: &Uri) -> bool {
        let mut pattern_components = self.0.split('.');
        let mut topic_components = topic.0.split('.');
        loop {
            match (pattern_components.next(), topic_components.next()) {
                (None, None) => return true,
                (Some(pattern), Some(topic)) => {
                    if !pattern.is_empty() && pattern != topic {
                        return false;
                    }
                }
                _ => return false,
            }
        }
    }
}

impl Display for Uri {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl AsRef<str> for Uri {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<String> for Uri {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for Uri {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl From<Uri> for String {
    fn from(value: Uri) -> Self {
        value.0
    }
}
