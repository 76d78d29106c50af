use serde::{Deserialize, Serialize};

use super::{Matcher, MatcherKind};

/// A targeting rule: a matcher group plus the partitions used to pick a treatment when the group
/// matches.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(default)]
    pub condition_type: ConditionType,
    pub matcher_group: MatcherGroup,
    #[serde(default)]
    pub partitions: Vec<Partition>,
    #[serde(default)]
    pub label: String,
}

impl Condition {
    /// Label of the condition that replaces a flag's conditions when any of them failed to parse.
    pub const UNSUPPORTED_LABEL: &'static str = "targeting rule type unsupported by sdk";

    /// Match-everyone condition that routes the whole population to `treatment`.
    pub(crate) fn route_all_to(treatment: &str) -> Condition {
        Condition {
            condition_type: ConditionType::Rollout,
            matcher_group: MatcherGroup {
                combiner: Combiner::And,
                matchers: vec![Matcher::new(MatcherKind::AllKeys)],
            },
            partitions: vec![Partition::new(treatment, 100)],
            label: Condition::UNSUPPORTED_LABEL.to_owned(),
        }
    }

    pub(crate) fn matchers(&self) -> impl Iterator<Item = &Matcher> {
        self.matcher_group.matchers.iter()
    }
}

/// `WHITELIST` conditions are evaluated before the traffic allocation gate, `ROLLOUT` after.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConditionType {
    Whitelist,
    #[default]
    Rollout,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatcherGroup {
    #[serde(default)]
    pub combiner: Combiner,
    pub matchers: Vec<Matcher>,
}

/// How matcher results are combined. Only `AND` is known; any other value fails the condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Combiner {
    #[default]
    And,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Partition {
    pub treatment: String,
    /// Percentage of the population, `0..=100`.
    pub size: u8,
}

impl Partition {
    pub fn new(treatment: impl Into<String>, size: u8) -> Partition {
        Partition {
            treatment: treatment.into(),
            size,
        }
    }
}
