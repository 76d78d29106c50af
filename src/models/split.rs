use std::collections::{BTreeSet, HashMap, HashSet};

use serde::{Deserialize, Deserializer, Serialize};

use crate::splitter::{self, HashAlgorithm};

use super::{all_parsed, ChangeNumber, Condition, MatcherKind, TryParse};

/// A feature flag definition.
///
/// A `Split` is immutable once parsed. Updates (including kills) produce a new value that replaces
/// the old one in storage.
///
/// Serializes to the same JSON shape it is parsed from, so a `Split` can be persisted and reloaded.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "SplitWire")]
pub struct Split {
    pub change_number: ChangeNumber,
    pub traffic_type_name: String,
    pub name: String,
    /// Percentage of traffic that goes through the ROLLOUT conditions, `0..=100`.
    pub traffic_allocation: u8,
    pub traffic_allocation_seed: Option<i32>,
    pub seed: i32,
    pub status: Status,
    pub killed: bool,
    pub default_treatment: String,
    pub algo: HashAlgorithm,
    pub conditions: Vec<Condition>,
    pub configurations: HashMap<String, String>,
    pub sets: BTreeSet<String>,
    pub impressions_disabled: bool,
    pub prerequisites: Vec<Prerequisite>,
}

/// `ACTIVE` or `ARCHIVED`. Anything unrecognized is read as `ARCHIVED`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Active,
    #[default]
    Archived,
}

impl<'de> Deserialize<'de> for Status {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Status, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        Ok(match value.as_str() {
            Some("ACTIVE") => Status::Active,
            _ => Status::Archived,
        })
    }
}

/// Another flag that must evaluate to one of `treatments` for this flag's rules to apply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prerequisite {
    #[serde(rename = "n")]
    pub flag_name: String,
    #[serde(rename = "ts", default)]
    pub treatments: Vec<String>,
}

/// Read-only projection of a [`Split`] for management APIs.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SplitView {
    pub name: String,
    pub traffic_type: String,
    pub killed: bool,
    pub treatments: Vec<String>,
    pub change_number: ChangeNumber,
    pub configs: HashMap<String, String>,
    pub default_treatment: String,
    pub sets: Vec<String>,
    pub impressions_disabled: bool,
    pub prerequisites: Vec<Prerequisite>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SplitWire {
    name: String,
    #[serde(default)]
    traffic_type_name: Option<String>,
    #[serde(default)]
    seed: i32,
    #[serde(default)]
    status: Status,
    #[serde(default)]
    killed: bool,
    #[serde(default)]
    default_treatment: Option<String>,
    #[serde(default = "default_change_number")]
    change_number: ChangeNumber,
    #[serde(default)]
    conditions: Vec<TryParse<Condition>>,
    #[serde(default)]
    traffic_allocation: Option<i64>,
    #[serde(default)]
    traffic_allocation_seed: Option<i32>,
    #[serde(default)]
    algo: Option<HashAlgorithm>,
    #[serde(default)]
    configurations: Option<HashMap<String, String>>,
    #[serde(default)]
    sets: Option<BTreeSet<String>>,
    #[serde(default)]
    impressions_disabled: Option<bool>,
    #[serde(default)]
    prerequisites: Option<Vec<Prerequisite>>,
}

fn default_change_number() -> ChangeNumber {
    -1
}

impl From<SplitWire> for Split {
    fn from(wire: SplitWire) -> Split {
        let default_treatment = wire
            .default_treatment
            .unwrap_or_else(|| crate::CONTROL.to_owned());

        let conditions = all_parsed(wire.conditions).unwrap_or_else(|| {
            log::warn!(target: "splitio",
                       flag_name:display = wire.name;
                       "flag has unsupported targeting rules, routing all traffic to the default treatment");
            vec![Condition::route_all_to(&default_treatment)]
        });

        let traffic_allocation = match wire.traffic_allocation {
            Some(t @ 0..=100) => t as u8,
            _ => 100,
        };

        Split {
            change_number: wire.change_number,
            traffic_type_name: wire.traffic_type_name.unwrap_or_default(),
            name: wire.name,
            traffic_allocation,
            traffic_allocation_seed: wire.traffic_allocation_seed,
            seed: wire.seed,
            status: wire.status,
            killed: wire.killed,
            default_treatment,
            algo: wire.algo.unwrap_or_default(),
            conditions,
            configurations: wire.configurations.unwrap_or_default(),
            sets: wire.sets.unwrap_or_default(),
            impressions_disabled: wire.impressions_disabled.unwrap_or(false),
            prerequisites: wire.prerequisites.unwrap_or_default(),
        }
    }
}

impl Split {
    pub fn is_active(&self) -> bool {
        self.status == Status::Active
    }

    /// Seed for the traffic allocation bucket. When the definition carries none, it is derived by
    /// hashing the flag name with the flag seed, so it is the same for every key.
    pub fn traffic_allocation_seed(&self) -> i32 {
        self.traffic_allocation_seed
            .unwrap_or_else(|| splitter::hash(&self.name, self.seed, self.algo))
    }

    /// Configuration payload attached to `treatment`, if any.
    pub fn config_for(&self, treatment: &str) -> Option<&str> {
        self.configurations.get(treatment).map(String::as_str)
    }

    /// Names of the standard segments referenced by `IN_SEGMENT` matchers.
    pub fn segment_names(&self) -> HashSet<String> {
        self.matcher_kinds()
            .filter_map(|kind| match kind {
                MatcherKind::InSegment(name) => Some(name.clone()),
                _ => None,
            })
            .collect()
    }

    /// Names of the rule-based segments referenced by `IN_RULE_BASED_SEGMENT` matchers.
    pub fn rule_based_segment_names(&self) -> HashSet<String> {
        self.matcher_kinds()
            .filter_map(|kind| match kind {
                MatcherKind::InRuleBasedSegment(name) => Some(name.clone()),
                _ => None,
            })
            .collect()
    }

    fn matcher_kinds(&self) -> impl Iterator<Item = &MatcherKind> {
        self.conditions
            .iter()
            .flat_map(Condition::matchers)
            .map(|matcher| &matcher.kind)
    }

    /// Treatments reachable through this flag's partitions, in order of first appearance.
    pub fn treatments(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.conditions
            .iter()
            .flat_map(|condition| condition.partitions.iter())
            .filter(|partition| seen.insert(partition.treatment.as_str()))
            .map(|partition| partition.treatment.clone())
            .collect()
    }

    /// Copy of this flag killed at `change_number`, serving `default_treatment` to everyone.
    /// Conditions are preserved.
    pub fn killed_with(&self, default_treatment: &str, change_number: ChangeNumber) -> Split {
        Split {
            killed: true,
            default_treatment: default_treatment.to_owned(),
            change_number,
            ..self.clone()
        }
    }

    pub fn to_split_view(&self) -> SplitView {
        SplitView {
            name: self.name.clone(),
            traffic_type: self.traffic_type_name.clone(),
            killed: self.killed,
            treatments: self.treatments(),
            change_number: self.change_number,
            configs: self.configurations.clone(),
            default_treatment: self.default_treatment.clone(),
            sets: self.sets.iter().cloned().collect(),
            impressions_disabled: self.impressions_disabled,
            prerequisites: self.prerequisites.clone(),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        // Split only contains string-keyed maps and plain values, serialization cannot fail.
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}
