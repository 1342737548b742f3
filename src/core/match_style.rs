use crate::core::types::{
    Dictionary,
    Value,
};

/// How a topic subscription should be matched against published topics.
///
/// Each style corresponds to one of the broker's subscription indexes.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatchStyle {
    #[default]
    Exact,
    Prefix,
    Wildcard,
}

impl MatchStyle {
    /// Reads the `match` option of a SUBSCRIBE message.
    ///
    /// An absent or unrecognized value falls back to exact matching.
    pub fn from_options(options: &Dictionary) -> Self {
        match options.get("match").and_then(Value::as_str) {
            Some("prefix") => Self::Prefix,
            Some("wildcard") => Self::Wildcard,
            _ => Self::Exact,
        }
    }
}

impl From<MatchStyle> for &'static str {
    fn from(value: MatchStyle) -> Self {
        match value {
            MatchStyle::Exact => "exact",
            MatchStyle::Prefix => "prefix",
            MatchStyle::Wildcard => "wildcard",
        }
    }
}

impl From<MatchStyle> for String {
    fn from(value: MatchStyle) -> Self {
        Into::<&'static str>::into(value).to_owned()
    }
}

#[cfg(test)]
mod match_style_test {
    use crate::core::{
        match_style::MatchStyle,
        types::{
            Dictionary,
            Value,
        },
    };

    fn options_with_match(value: Value) -> Dictionary {
        Dictionary::from_iter([("match".to_owned(), value)])
    }

    #[test]
    fn reads_match_option() {
        assert_eq!(
            MatchStyle::from_options(&options_with_match(Value::from("prefix"))),
            MatchStyle::Prefix,
        );
        assert_eq!(
            MatchStyle::from_options(&options_with_match(Value::from("wildcard"))),
            MatchStyle::Wildcard,
        );
        assert_eq!(
            MatchStyle::from_options(&options_with_match(Value::from("exact"))),
            MatchStyle::Exact,
        );
    }

    #[test]
    fn falls_back_to_exact() {
        assert_eq!(MatchStyle::from_options(&Dictionary::default()), MatchStyle::Exact);
        assert_eq!(
            MatchStyle::from_options(&options_with_match(Value::from("nearest"))),
            MatchStyle::Exact,
        );
        assert_eq!(
            MatchStyle::from_options(&options_with_match(Value::from(true))),
            MatchStyle::Exact,
        );
    }
}
