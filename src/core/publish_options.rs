use crate::{
    core::{
        id::Id,
        types::{
            Dictionary,
            HashSet,
            Value,
        },
    },
    message::message::PublishMessage,
};

/// Options for publishing an event, read from a PUBLISH message.
///
/// Parsing is lenient: missing or malformed options fall back to their
/// defaults, and list entries of the wrong type are skipped, the same way
/// unrecognized option values are tolerated elsewhere.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishOptions {
    /// Should the publisher receive a PUBLISHED acknowledgement?
    pub acknowledge: bool,
    /// Should the publisher be excluded from receiving the event?
    pub exclude_me: bool,
    /// Does the publisher ask for identity disclosure?
    pub disclose_me: bool,
    /// Blocked session IDs.
    pub exclude: Option<HashSet<Id>>,
    /// Blocked authenticated IDs.
    pub exclude_authid: Option<HashSet<String>>,
    /// Blocked authenticated roles.
    pub exclude_authrole: Option<HashSet<String>>,
    /// Allowed session IDs.
    pub eligible: Option<HashSet<Id>>,
    /// Allowed authenticated IDs.
    pub eligible_authid: Option<HashSet<String>>,
    /// Allowed authenticated roles.
    pub eligible_authrole: Option<HashSet<String>>,
}

impl Default for PublishOptions {
    fn default() -> Self {
        Self {
            acknowledge: false,
            // The publisher does not receive its own event unless it opts in.
            exclude_me: true,
            disclose_me: false,
            exclude: None,
            exclude_authid: None,
            exclude_authrole: None,
            eligible: None,
            eligible_authid: None,
            eligible_authrole: None,
        }
    }
}

fn bool_option(options: &Dictionary, key: &str, default: bool) -> bool {
    options.get(key).and_then(Value::as_bool).unwrap_or(default)
}

fn id_set_option(options: &Dictionary, key: &str) -> Option<HashSet<Id>> {
    options.get(key).and_then(Value::as_list).map(|list| {
        list.iter()
            .filter_map(|value| value.as_integer().and_then(|value| Id::try_from(value).ok()))
            .collect()
    })
}

fn string_set_option(options: &Dictionary, key: &str) -> Option<HashSet<String>> {
    options.get(key).and_then(Value::as_list).map(|list| {
        list.iter()
            .filter_map(|value| value.as_str().map(str::to_owned))
            .collect()
    })
}

impl From<&Dictionary> for PublishOptions {
    fn from(options: &Dictionary) -> Self {
        Self {
            acknowledge: bool_option(options, "acknowledge", false),
            exclude_me: bool_option(options, "exclude_me", true),
            disclose_me: bool_option(options, "disclose_me", false),
            exclude: id_set_option(options, "exclude"),
            exclude_authid: string_set_option(options, "exclude_authid"),
            exclude_authrole: string_set_option(options, "exclude_authrole"),
            eligible: id_set_option(options, "eligible"),
            eligible_authid: string_set_option(options, "eligible_authid"),
            eligible_authrole: string_set_option(options, "eligible_authrole"),
        }
    }
}

impl From<&PublishMessage> for PublishOptions {
    fn from(message: &PublishMessage) -> Self {
        Self::from(&message.options)
    }
}
