use std::collections::{BTreeSet, HashSet};

use serde::{Deserialize, Serialize};

use super::{all_parsed, ChangeNumber, Condition, MatcherKind, Status, TryParse};

/// A named group of keys defined by conditions rather than by enumeration.
///
/// Exclusions always win: a key listed in `excluded.keys`, or member of any excluded segment, is
/// never a member regardless of the conditions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "RuleBasedSegmentWire")]
pub struct RuleBasedSegment {
    pub change_number: ChangeNumber,
    pub traffic_type_name: String,
    pub name: String,
    pub status: Status,
    pub conditions: Vec<Condition>,
    pub excluded: Excluded,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Excluded {
    #[serde(default)]
    pub keys: BTreeSet<String>,
    #[serde(default)]
    pub segments: Vec<ExcludedSegment>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExcludedSegment {
    pub name: String,
    #[serde(rename = "type")]
    pub segment_type: SegmentType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SegmentType {
    #[serde(rename = "standard")]
    Standard,
    #[serde(rename = "rule-based")]
    RuleBased,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RuleBasedSegmentWire {
    name: String,
    #[serde(default)]
    traffic_type_name: Option<String>,
    #[serde(default = "default_change_number")]
    change_number: ChangeNumber,
    #[serde(default)]
    status: Status,
    #[serde(default)]
    conditions: Vec<TryParse<Condition>>,
    #[serde(default)]
    excluded: Option<Excluded>,
}

fn default_change_number() -> ChangeNumber {
    -1
}

impl From<RuleBasedSegmentWire> for RuleBasedSegment {
    fn from(wire: RuleBasedSegmentWire) -> RuleBasedSegment {
        // Unlike flags there is no safe treatment to route to, so a segment we cannot fully
        // understand matches nobody.
        let conditions = all_parsed(wire.conditions).unwrap_or_else(|| {
            log::warn!(target: "splitio",
                       segment_name:display = wire.name;
                       "rule-based segment has unsupported conditions, it will match no keys");
            Vec::new()
        });

        RuleBasedSegment {
            change_number: wire.change_number,
            traffic_type_name: wire.traffic_type_name.unwrap_or_default(),
            name: wire.name,
            status: wire.status,
            conditions,
            excluded: wire.excluded.unwrap_or_default(),
        }
    }
}

impl RuleBasedSegment {
    pub fn is_active(&self) -> bool {
        self.status == Status::Active
    }

    pub fn is_excluded_key(&self, key: &str) -> bool {
        self.excluded.keys.contains(key)
    }

    /// Standard segments referenced by the conditions and by the exclusion list.
    pub fn segment_names(&self) -> HashSet<String> {
        let in_conditions = self
            .conditions
            .iter()
            .flat_map(Condition::matchers)
            .filter_map(|matcher| match &matcher.kind {
                MatcherKind::InSegment(name) => Some(name.clone()),
                _ => None,
            });
        let excluded = self
            .excluded
            .segments
            .iter()
            .filter(|segment| segment.segment_type == SegmentType::Standard)
            .map(|segment| segment.name.clone());
        in_conditions.chain(excluded).collect()
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{RuleBasedSegment, SegmentType};
    use crate::models::{Status, TryParse};

    #[test]
    fn parses_exclusions() {
        let segment: RuleBasedSegment = serde_json::from_value(json!({
            "changeNumber": 5,
            "name": "sample_rule_based_segment",
            "status": "ACTIVE",
            "trafficTypeName": "user",
            "excluded": {
                "keys": ["mauro@split.io", "gaston@split.io"],
                "segments": [
                    {"name": "segment_test", "type": "standard"},
                    {"name": "other_rbs", "type": "rule-based"}
                ]
            },
            "conditions": [{
                "matcherGroup": {"combiner": "AND", "matchers": [{
                    "keySelector": {"trafficType": "user", "attribute": "email"},
                    "matcherType": "ENDS_WITH",
                    "negate": false,
                    "whitelistMatcherData": {"whitelist": ["@split.io"]}
                }]}
            }]
        }))
        .unwrap();
        assert_eq!(segment.status, Status::Active);
        assert!(segment.is_excluded_key("mauro@split.io"));
        assert!(!segment.is_excluded_key("other@split.io"));
        assert_eq!(segment.excluded.segments[1].segment_type, SegmentType::RuleBased);
        assert_eq!(segment.segment_names(), ["segment_test".to_owned()].into());
        assert_eq!(segment.conditions.len(), 1);
    }

    #[test]
    fn unsupported_conditions_match_nobody() {
        let segment: RuleBasedSegment = serde_json::from_value(json!({
            "name": "rbs",
            "status": "ACTIVE",
            "conditions": [{"matcherGroup": {"combiner": "AND", "matchers": [{"matcherType": "NOPE"}]}}]
        }))
        .unwrap();
        assert!(segment.conditions.is_empty());
    }

    #[test]
    fn unknown_excluded_segment_type_fails_the_segment() {
        let segment: TryParse<RuleBasedSegment> = serde_json::from_value(json!({
            "name": "rbs",
            "excluded": {"keys": [], "segments": [{"name": "x", "type": "galactic"}]}
        }))
        .unwrap();
        assert_eq!(segment.raw_name(), Some("rbs"));
    }

    #[test]
    fn to_json_shape() {
        let segment: RuleBasedSegment = serde_json::from_value(json!({
            "name": "rbs",
            "status": "ACTIVE",
            "changeNumber": 3,
            "trafficTypeName": "user",
            "excluded": {"keys": ["a"], "segments": []},
            "conditions": []
        }))
        .unwrap();
        let value = segment.to_json();
        for field in ["changeNumber", "trafficTypeName", "name", "status", "conditions", "excluded"] {
            assert!(value.get(field).is_some(), "missing {field}");
        }
        assert_eq!(value["excluded"]["keys"], json!(["a"]));
    }
}
