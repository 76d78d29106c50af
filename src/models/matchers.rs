use std::collections::HashSet;

use regex::Regex;
use semver::Version;
use serde::{Deserialize, Serialize};

use crate::error::ParseError;

/// A single predicate inside a condition's matcher group.
///
/// On the wire a matcher is a flat object with a `matcherType` and one populated
/// `*MatcherData` field. Here it is decoded into the closed [`MatcherKind`] set, so an unknown
/// matcher type fails to parse instead of silently never matching.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "MatcherWire", into = "MatcherWire")]
pub struct Matcher {
    /// Attribute to read the input from. `None` means the matching key is the input.
    pub attribute: Option<String>,
    pub traffic_type: Option<String>,
    /// Invert the result before combining with sibling matchers.
    pub negate: bool,
    pub kind: MatcherKind,
}

impl Matcher {
    /// A non-negated matcher over the matching key.
    pub fn new(kind: MatcherKind) -> Matcher {
        Matcher {
            attribute: None,
            traffic_type: None,
            negate: false,
            kind,
        }
    }

    /// Read the input from `attribute` instead of the matching key.
    pub fn on_attribute(mut self, attribute: impl Into<String>) -> Matcher {
        self.attribute = Some(attribute.into());
        self
    }

    pub fn negated(mut self) -> Matcher {
        self.negate = !self.negate;
        self
    }
}

#[derive(Debug, Clone)]
pub enum MatcherKind {
    AllKeys,
    /// Membership in a standard (enumerated) segment.
    InSegment(String),
    /// Membership in a rule-based segment.
    InRuleBasedSegment(String),
    Whitelist(HashSet<String>),
    EqualTo {
        data_type: DataType,
        value: i64,
    },
    GreaterThanOrEqualTo {
        data_type: DataType,
        value: i64,
    },
    LessThanOrEqualTo {
        data_type: DataType,
        value: i64,
    },
    Between {
        data_type: DataType,
        start: i64,
        end: i64,
    },
    EqualToSet(HashSet<String>),
    ContainsAnyOfSet(HashSet<String>),
    ContainsAllOfSet(HashSet<String>),
    PartOfSet(HashSet<String>),
    StartsWith(Vec<String>),
    EndsWith(Vec<String>),
    ContainsString(Vec<String>),
    MatchesString(Regex),
    EqualToBoolean(bool),
    /// Dependency on the treatment another flag yields for the same key.
    InSplitTreatment {
        split: String,
        treatments: Vec<String>,
    },
    EqualToSemver(Version),
    GreaterThanOrEqualToSemver(Version),
    LessThanOrEqualToSemver(Version),
    BetweenSemver {
        start: Version,
        end: Version,
    },
    InListSemver(Vec<Version>),
}

/// Interpretation of numeric matcher values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataType {
    #[default]
    Number,
    /// Epoch milliseconds.
    Datetime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
enum MatcherType {
    AllKeys,
    InSegment,
    InRuleBasedSegment,
    Whitelist,
    EqualTo,
    GreaterThanOrEqualTo,
    LessThanOrEqualTo,
    Between,
    EqualToSet,
    ContainsAnyOfSet,
    ContainsAllOfSet,
    PartOfSet,
    StartsWith,
    EndsWith,
    ContainsString,
    MatchesString,
    EqualToBoolean,
    InSplitTreatment,
    EqualToSemver,
    GreaterThanOrEqualToSemver,
    LessThanOrEqualToSemver,
    BetweenSemver,
    InListSemver,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MatcherWire {
    #[serde(default)]
    key_selector: Option<KeySelector>,
    matcher_type: MatcherType,
    #[serde(default)]
    negate: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    user_defined_segment_matcher_data: Option<SegmentMatcherData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    whitelist_matcher_data: Option<WhitelistMatcherData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    unary_numeric_matcher_data: Option<UnaryNumericMatcherData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    between_matcher_data: Option<BetweenMatcherData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    boolean_matcher_data: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    dependency_matcher_data: Option<DependencyMatcherData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    string_matcher_data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    between_string_matcher_data: Option<BetweenStringMatcherData>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KeySelector {
    #[serde(default)]
    traffic_type: Option<String>,
    #[serde(default)]
    attribute: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SegmentMatcherData {
    segment_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WhitelistMatcherData {
    #[serde(default)]
    whitelist: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UnaryNumericMatcherData {
    #[serde(default)]
    data_type: DataType,
    value: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BetweenMatcherData {
    #[serde(default)]
    data_type: DataType,
    start: i64,
    end: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DependencyMatcherData {
    split: String,
    #[serde(default)]
    treatments: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BetweenStringMatcherData {
    start: String,
    end: String,
}

fn required<T>(data: Option<T>, field: &'static str) -> Result<T, ParseError> {
    data.ok_or(ParseError::MissingMatcherData { field })
}

fn whitelist(data: Option<WhitelistMatcherData>) -> Result<Vec<String>, ParseError> {
    Ok(required(data, "whitelistMatcherData")?.whitelist)
}

fn string_set(data: Option<WhitelistMatcherData>) -> Result<HashSet<String>, ParseError> {
    Ok(whitelist(data)?.into_iter().collect())
}

fn parse_semver(s: &str) -> Result<Version, ParseError> {
    Version::parse(s.trim()).map_err(|_| ParseError::InvalidSemver(s.to_owned()))
}

impl TryFrom<MatcherWire> for Matcher {
    type Error = ParseError;

    fn try_from(wire: MatcherWire) -> Result<Matcher, ParseError> {
        let kind = match wire.matcher_type {
            MatcherType::AllKeys => MatcherKind::AllKeys,
            MatcherType::InSegment => MatcherKind::InSegment(
                required(
                    wire.user_defined_segment_matcher_data,
                    "userDefinedSegmentMatcherData",
                )?
                .segment_name,
            ),
            MatcherType::InRuleBasedSegment => MatcherKind::InRuleBasedSegment(
                required(
                    wire.user_defined_segment_matcher_data,
                    "userDefinedSegmentMatcherData",
                )?
                .segment_name,
            ),
            MatcherType::Whitelist => MatcherKind::Whitelist(string_set(wire.whitelist_matcher_data)?),
            MatcherType::EqualTo | MatcherType::GreaterThanOrEqualTo | MatcherType::LessThanOrEqualTo => {
                let data = required(wire.unary_numeric_matcher_data, "unaryNumericMatcherData")?;
                let (data_type, value) = (data.data_type, data.value);
                match wire.matcher_type {
                    MatcherType::EqualTo => MatcherKind::EqualTo { data_type, value },
                    MatcherType::GreaterThanOrEqualTo => {
                        MatcherKind::GreaterThanOrEqualTo { data_type, value }
                    }
                    _ => MatcherKind::LessThanOrEqualTo { data_type, value },
                }
            }
            MatcherType::Between => {
                let data = required(wire.between_matcher_data, "betweenMatcherData")?;
                MatcherKind::Between {
                    data_type: data.data_type,
                    start: data.start,
                    end: data.end,
                }
            }
            MatcherType::EqualToSet => MatcherKind::EqualToSet(string_set(wire.whitelist_matcher_data)?),
            MatcherType::ContainsAnyOfSet => {
                MatcherKind::ContainsAnyOfSet(string_set(wire.whitelist_matcher_data)?)
            }
            MatcherType::ContainsAllOfSet => {
                MatcherKind::ContainsAllOfSet(string_set(wire.whitelist_matcher_data)?)
            }
            MatcherType::PartOfSet => MatcherKind::PartOfSet(string_set(wire.whitelist_matcher_data)?),
            MatcherType::StartsWith => MatcherKind::StartsWith(whitelist(wire.whitelist_matcher_data)?),
            MatcherType::EndsWith => MatcherKind::EndsWith(whitelist(wire.whitelist_matcher_data)?),
            MatcherType::ContainsString => {
                MatcherKind::ContainsString(whitelist(wire.whitelist_matcher_data)?)
            }
            MatcherType::MatchesString => {
                let pattern = required(wire.string_matcher_data, "stringMatcherData")?;
                let regex =
                    Regex::new(&pattern).map_err(|err| ParseError::InvalidRegex(err.to_string()))?;
                MatcherKind::MatchesString(regex)
            }
            MatcherType::EqualToBoolean => {
                MatcherKind::EqualToBoolean(required(wire.boolean_matcher_data, "booleanMatcherData")?)
            }
            MatcherType::InSplitTreatment => {
                let data = required(wire.dependency_matcher_data, "dependencyMatcherData")?;
                MatcherKind::InSplitTreatment {
                    split: data.split,
                    treatments: data.treatments,
                }
            }
            MatcherType::EqualToSemver => MatcherKind::EqualToSemver(parse_semver(&required(
                wire.string_matcher_data,
                "stringMatcherData",
            )?)?),
            MatcherType::GreaterThanOrEqualToSemver => MatcherKind::GreaterThanOrEqualToSemver(
                parse_semver(&required(wire.string_matcher_data, "stringMatcherData")?)?,
            ),
            MatcherType::LessThanOrEqualToSemver => MatcherKind::LessThanOrEqualToSemver(
                parse_semver(&required(wire.string_matcher_data, "stringMatcherData")?)?,
            ),
            MatcherType::BetweenSemver => {
                let data = required(wire.between_string_matcher_data, "betweenStringMatcherData")?;
                MatcherKind::BetweenSemver {
                    start: parse_semver(&data.start)?,
                    end: parse_semver(&data.end)?,
                }
            }
            MatcherType::InListSemver => MatcherKind::InListSemver(
                whitelist(wire.whitelist_matcher_data)?
                    .iter()
                    .map(|s| parse_semver(s))
                    .collect::<Result<_, _>>()?,
            ),
        };

        let key_selector = wire.key_selector.unwrap_or_default();
        Ok(Matcher {
            attribute: key_selector.attribute,
            traffic_type: key_selector.traffic_type,
            negate: wire.negate,
            kind,
        })
    }
}

fn sorted(set: HashSet<String>) -> Vec<String> {
    let mut v: Vec<String> = set.into_iter().collect();
    v.sort();
    v
}

impl From<Matcher> for MatcherWire {
    fn from(matcher: Matcher) -> MatcherWire {
        let mut wire = MatcherWire {
            key_selector: Some(KeySelector {
                traffic_type: matcher.traffic_type,
                attribute: matcher.attribute,
            }),
            matcher_type: MatcherType::AllKeys,
            negate: matcher.negate,
            user_defined_segment_matcher_data: None,
            whitelist_matcher_data: None,
            unary_numeric_matcher_data: None,
            between_matcher_data: None,
            boolean_matcher_data: None,
            dependency_matcher_data: None,
            string_matcher_data: None,
            between_string_matcher_data: None,
        };

        let set = |s: HashSet<String>| Some(WhitelistMatcherData { whitelist: sorted(s) });
        let list = |l: Vec<String>| Some(WhitelistMatcherData { whitelist: l });
        let segment = |name: String| Some(SegmentMatcherData { segment_name: name });
        let unary = |data_type, value| Some(UnaryNumericMatcherData { data_type, value });

        match matcher.kind {
            MatcherKind::AllKeys => {}
            MatcherKind::InSegment(name) => {
                wire.matcher_type = MatcherType::InSegment;
                wire.user_defined_segment_matcher_data = segment(name);
            }
            MatcherKind::InRuleBasedSegment(name) => {
                wire.matcher_type = MatcherType::InRuleBasedSegment;
                wire.user_defined_segment_matcher_data = segment(name);
            }
            MatcherKind::Whitelist(s) => {
                wire.matcher_type = MatcherType::Whitelist;
                wire.whitelist_matcher_data = set(s);
            }
            MatcherKind::EqualTo { data_type, value } => {
                wire.matcher_type = MatcherType::EqualTo;
                wire.unary_numeric_matcher_data = unary(data_type, value);
            }
            MatcherKind::GreaterThanOrEqualTo { data_type, value } => {
                wire.matcher_type = MatcherType::GreaterThanOrEqualTo;
                wire.unary_numeric_matcher_data = unary(data_type, value);
            }
            MatcherKind::LessThanOrEqualTo { data_type, value } => {
                wire.matcher_type = MatcherType::LessThanOrEqualTo;
                wire.unary_numeric_matcher_data = unary(data_type, value);
            }
            MatcherKind::Between {
                data_type,
                start,
                end,
            } => {
                wire.matcher_type = MatcherType::Between;
                wire.between_matcher_data = Some(BetweenMatcherData {
                    data_type,
                    start,
                    end,
                });
            }
            MatcherKind::EqualToSet(s) => {
                wire.matcher_type = MatcherType::EqualToSet;
                wire.whitelist_matcher_data = set(s);
            }
            MatcherKind::ContainsAnyOfSet(s) => {
                wire.matcher_type = MatcherType::ContainsAnyOfSet;
                wire.whitelist_matcher_data = set(s);
            }
            MatcherKind::ContainsAllOfSet(s) => {
                wire.matcher_type = MatcherType::ContainsAllOfSet;
                wire.whitelist_matcher_data = set(s);
            }
            MatcherKind::PartOfSet(s) => {
                wire.matcher_type = MatcherType::PartOfSet;
                wire.whitelist_matcher_data = set(s);
            }
            MatcherKind::StartsWith(l) => {
                wire.matcher_type = MatcherType::StartsWith;
                wire.whitelist_matcher_data = list(l);
            }
            MatcherKind::EndsWith(l) => {
                wire.matcher_type = MatcherType::EndsWith;
                wire.whitelist_matcher_data = list(l);
            }
            MatcherKind::ContainsString(l) => {
                wire.matcher_type = MatcherType::ContainsString;
                wire.whitelist_matcher_data = list(l);
            }
            MatcherKind::MatchesString(regex) => {
                wire.matcher_type = MatcherType::MatchesString;
                wire.string_matcher_data = Some(regex.as_str().to_owned());
            }
            MatcherKind::EqualToBoolean(b) => {
                wire.matcher_type = MatcherType::EqualToBoolean;
                wire.boolean_matcher_data = Some(b);
            }
            MatcherKind::InSplitTreatment { split, treatments } => {
                wire.matcher_type = MatcherType::InSplitTreatment;
                wire.dependency_matcher_data = Some(DependencyMatcherData { split, treatments });
            }
            MatcherKind::EqualToSemver(v) => {
                wire.matcher_type = MatcherType::EqualToSemver;
                wire.string_matcher_data = Some(v.to_string());
            }
            MatcherKind::GreaterThanOrEqualToSemver(v) => {
                wire.matcher_type = MatcherType::GreaterThanOrEqualToSemver;
                wire.string_matcher_data = Some(v.to_string());
            }
            MatcherKind::LessThanOrEqualToSemver(v) => {
                wire.matcher_type = MatcherType::LessThanOrEqualToSemver;
                wire.string_matcher_data = Some(v.to_string());
            }
            MatcherKind::BetweenSemver { start, end } => {
                wire.matcher_type = MatcherType::BetweenSemver;
                wire.between_string_matcher_data = Some(BetweenStringMatcherData {
                    start: start.to_string(),
                    end: end.to_string(),
                });
            }
            MatcherKind::InListSemver(versions) => {
                wire.matcher_type = MatcherType::InListSemver;
                wire.whitelist_matcher_data =
                    list(versions.iter().map(Version::to_string).collect());
            }
        }

        wire
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{DataType, Matcher, MatcherKind};

    fn parse(value: serde_json::Value) -> Result<Matcher, serde_json::Error> {
        serde_json::from_value(value)
    }

    #[test]
    fn reads_attribute_from_key_selector() {
        let matcher = parse(json!({
            "keySelector": {"trafficType": "user", "attribute": "age"},
            "matcherType": "BETWEEN",
            "negate": true,
            "betweenMatcherData": {"dataType": "NUMBER", "start": 18, "end": 65}
        }))
        .unwrap();
        assert_eq!(matcher.attribute.as_deref(), Some("age"));
        assert!(matcher.negate);
        assert!(matches!(
            matcher.kind,
            MatcherKind::Between {
                data_type: DataType::Number,
                start: 18,
                end: 65
            }
        ));
    }

    #[test]
    fn missing_data_is_an_error() {
        let err = parse(json!({"matcherType": "IN_SEGMENT"})).unwrap_err();
        assert!(err.to_string().contains("userDefinedSegmentMatcherData"), "{err}");
    }

    #[test]
    fn invalid_regex_is_an_error() {
        assert!(parse(json!({"matcherType": "MATCHES_STRING", "stringMatcherData": "(["})).is_err());
    }

    #[test]
    fn invalid_semver_is_an_error() {
        assert!(parse(json!({"matcherType": "EQUAL_TO_SEMVER", "stringMatcherData": "1.x"})).is_err());
    }

    #[test]
    fn serializes_back_to_wire_shape() {
        let matcher = Matcher::new(MatcherKind::InSplitTreatment {
            split: "other".into(),
            treatments: vec!["on".into()],
        })
        .on_attribute("ignored");
        let value = serde_json::to_value(&matcher).unwrap();
        assert_eq!(value["matcherType"], "IN_SPLIT_TREATMENT");
        assert_eq!(value["dependencyMatcherData"]["split"], "other");
        assert_eq!(value["keySelector"]["attribute"], "ignored");
        assert!(value.get("whitelistMatcherData").is_none());

        let reparsed = parse(value).unwrap();
        assert!(matches!(reparsed.kind, MatcherKind::InSplitTreatment { .. }));
    }
}
