//! Flag and segment definitions as served by the change-fetch API.
mod condition;
mod matchers;
mod rule_based_segment;
mod split;

pub use condition::{Combiner, Condition, ConditionType, MatcherGroup, Partition};
pub use matchers::{DataType, Matcher, MatcherKind};
pub use rule_based_segment::{Excluded, ExcludedSegment, RuleBasedSegment, SegmentType};
pub use split::{Prerequisite, Split, SplitView, Status};

use serde::{Deserialize, Serialize};

/// Monotonic version marker. `-1` means "never synchronized".
pub type ChangeNumber = i64;

/// `TryParse` allows the subfield to fail parsing without failing the parsing of the whole
/// structure.
///
/// This can be helpful to isolate errors in a subtree. e.g., if one flag in a change page fails to
/// parse, the rest of the page is still usable.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(untagged)]
pub enum TryParse<T> {
    /// Successfully parsed.
    Parsed(T),
    /// Parsing failed.
    ParseFailed(serde_json::Value),
}

impl<T> TryParse<T> {
    /// Best-effort `name` of an entity, looked up in the raw payload when parsing failed.
    pub(crate) fn raw_name(&self) -> Option<&str> {
        match self {
            TryParse::Parsed(_) => None,
            TryParse::ParseFailed(value) => value.get("name").and_then(|name| name.as_str()),
        }
    }
}

impl<T> From<TryParse<T>> for Result<T, serde_json::Value> {
    fn from(value: TryParse<T>) -> Self {
        match value {
            TryParse::Parsed(v) => Ok(v),
            TryParse::ParseFailed(v) => Err(v),
        }
    }
}
impl<T> From<TryParse<T>> for Option<T> {
    fn from(value: TryParse<T>) -> Self {
        match value {
            TryParse::Parsed(v) => Some(v),
            TryParse::ParseFailed(_) => None,
        }
    }
}
impl<'a, T> From<&'a TryParse<T>> for Option<&'a T> {
    fn from(value: &TryParse<T>) -> Option<&T> {
        match value {
            TryParse::Parsed(v) => Some(v),
            TryParse::ParseFailed(_) => None,
        }
    }
}

/// Split a list of conditions into parsed ones, or `None` if any of them failed.
pub(crate) fn all_parsed(conditions: Vec<TryParse<Condition>>) -> Option<Vec<Condition>> {
    conditions.into_iter().map(Option::from).collect()
}
