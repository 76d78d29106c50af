use std::{cmp::Ordering, collections::HashSet};

use chrono::{DateTime, DurationRound, TimeDelta};
use semver::Version;

use crate::{
    models::{Condition, DataType, Matcher, MatcherKind, SegmentType},
    storage::SegmentMembership,
    AttributeValue,
};

use super::{
    context::{EvaluationContext, Reference},
    engine::evaluate_flag,
};

impl Condition {
    /// A condition matches when every matcher in its group matches.
    pub(crate) fn matches(&self, ctx: &EvaluationContext) -> bool {
        self.matchers().all(|matcher| matcher.matches(ctx))
    }
}

/// Value a matcher is applied to.
#[derive(Clone, Copy)]
enum Input<'a> {
    Key(&'a str),
    Attribute(&'a AttributeValue),
}

impl<'a> Input<'a> {
    fn as_str(self) -> Option<&'a str> {
        match self {
            Input::Key(key) => Some(key),
            Input::Attribute(value) => value.as_str(),
        }
    }

    fn as_integer(self) -> Option<i64> {
        match self {
            Input::Key(key) => key.trim().parse().ok(),
            Input::Attribute(value) => value.as_integer(),
        }
    }

    fn as_boolean(self) -> Option<bool> {
        match self {
            Input::Key(key) => key.to_lowercase().parse().ok(),
            Input::Attribute(value) => value.as_boolean(),
        }
    }

    fn as_set(self) -> Option<HashSet<&'a str>> {
        match self {
            Input::Key(_) => None,
            Input::Attribute(value) => {
                Some(value.as_list()?.iter().map(String::as_str).collect())
            }
        }
    }

    fn as_semver(self) -> Option<Version> {
        Version::parse(self.as_str()?.trim()).ok()
    }
}

impl Matcher {
    /// Return `true` if the matcher applies to the context, after negation.
    ///
    /// A matcher that cannot be applied (missing attribute, wrong type, dangling reference) is a
    /// non-match before negation.
    pub(crate) fn matches(&self, ctx: &EvaluationContext) -> bool {
        let input = self.input(ctx);
        let matched = self.try_matches(ctx, input).unwrap_or_else(|| {
            // A missing attribute is an ordinary non-match.
            if input.is_some() {
                log::debug!(target: "splitio",
                            key = ctx.key,
                            attribute:? = self.attribute,
                            matcher:? = self.kind;
                            "matcher could not be applied, treating it as a non-match");
            }
            false
        });
        matched != self.negate
    }

    fn input<'a>(&self, ctx: &EvaluationContext<'a>) -> Option<Input<'a>> {
        match &self.attribute {
            None => Some(Input::Key(ctx.key)),
            Some(attribute) => match ctx.attributes.get(attribute)? {
                AttributeValue::Null => None,
                value => Some(Input::Attribute(value)),
            },
        }
    }

    fn try_matches(&self, ctx: &EvaluationContext, input: Option<Input>) -> Option<bool> {
        if let MatcherKind::AllKeys = self.kind {
            return Some(true);
        }

        let input = input?;
        let result = match &self.kind {
            MatcherKind::AllKeys => true,

            MatcherKind::InSegment(segment) => {
                ctx.snapshot.segments.is_member(segment, input.as_str()?)
            }
            MatcherKind::InRuleBasedSegment(segment) => {
                in_rule_based_segment(ctx, segment, input.as_str()?)?
            }

            MatcherKind::Whitelist(keys) => keys.contains(input.as_str()?),

            MatcherKind::EqualTo { data_type, value } => {
                let precision = TimeDelta::days(1);
                normalize(*data_type, input.as_integer()?, precision)?
                    == normalize(*data_type, *value, precision)?
            }
            MatcherKind::GreaterThanOrEqualTo { data_type, value } => {
                let precision = TimeDelta::minutes(1);
                normalize(*data_type, input.as_integer()?, precision)?
                    >= normalize(*data_type, *value, precision)?
            }
            MatcherKind::LessThanOrEqualTo { data_type, value } => {
                let precision = TimeDelta::minutes(1);
                normalize(*data_type, input.as_integer()?, precision)?
                    <= normalize(*data_type, *value, precision)?
            }
            MatcherKind::Between {
                data_type,
                start,
                end,
            } => {
                let precision = TimeDelta::minutes(1);
                let value = normalize(*data_type, input.as_integer()?, precision)?;
                let start = normalize(*data_type, *start, precision)?;
                let end = normalize(*data_type, *end, precision)?;
                (start..=end).contains(&value)
            }

            MatcherKind::EqualToSet(set) => {
                let input = input.as_set()?;
                input.len() == set.len() && set.iter().all(|s| input.contains(s.as_str()))
            }
            MatcherKind::ContainsAnyOfSet(set) => {
                let input = input.as_set()?;
                set.iter().any(|s| input.contains(s.as_str()))
            }
            MatcherKind::ContainsAllOfSet(set) => {
                let input = input.as_set()?;
                !set.is_empty() && set.iter().all(|s| input.contains(s.as_str()))
            }
            MatcherKind::PartOfSet(set) => {
                let input = input.as_set()?;
                !input.is_empty() && input.iter().all(|s| set.contains(*s))
            }

            MatcherKind::StartsWith(prefixes) => {
                let s = input.as_str()?;
                prefixes.iter().any(|prefix| s.starts_with(prefix.as_str()))
            }
            MatcherKind::EndsWith(suffixes) => {
                let s = input.as_str()?;
                suffixes.iter().any(|suffix| s.ends_with(suffix.as_str()))
            }
            MatcherKind::ContainsString(needles) => {
                let s = input.as_str()?;
                needles.iter().any(|needle| s.contains(needle.as_str()))
            }
            MatcherKind::MatchesString(regex) => regex.is_match(input.as_str()?),

            MatcherKind::EqualToBoolean(expected) => input.as_boolean()? == *expected,

            MatcherKind::InSplitTreatment { split, treatments } => {
                let evaluation =
                    ctx.enter(Reference::Flag(split), |nested| evaluate_flag(nested, split))?;
                treatments.contains(&evaluation.treatment)
            }

            MatcherKind::EqualToSemver(target) => {
                input.as_semver()?.cmp_precedence(target) == Ordering::Equal
            }
            MatcherKind::GreaterThanOrEqualToSemver(target) => {
                input.as_semver()?.cmp_precedence(target) != Ordering::Less
            }
            MatcherKind::LessThanOrEqualToSemver(target) => {
                input.as_semver()?.cmp_precedence(target) != Ordering::Greater
            }
            MatcherKind::BetweenSemver { start, end } => {
                let version = input.as_semver()?;
                version.cmp_precedence(start) != Ordering::Less
                    && version.cmp_precedence(end) != Ordering::Greater
            }
            MatcherKind::InListSemver(versions) => {
                let version = input.as_semver()?;
                versions
                    .iter()
                    .any(|v| version.cmp_precedence(v) == Ordering::Equal)
            }
        };
        Some(result)
    }
}

/// Bring numeric matcher operands to a common precision. Datetimes (epoch milliseconds) are
/// truncated to `precision`, plain numbers are left as is.
fn normalize(data_type: DataType, value: i64, precision: TimeDelta) -> Option<i64> {
    match data_type {
        DataType::Number => Some(value),
        DataType::Datetime => {
            let datetime = DateTime::from_timestamp_millis(value)?;
            Some(datetime.duration_trunc(precision).ok()?.timestamp_millis())
        }
    }
}

/// Membership of `key` in the rule-based segment `name`.
///
/// Exclusions are checked first and always win. Returns `None` if the segment is unknown, already
/// being evaluated, or the reference chain is too deep.
pub(crate) fn in_rule_based_segment(
    ctx: &EvaluationContext,
    name: &str,
    key: &str,
) -> Option<bool> {
    let segment = ctx.snapshot.rule_based_segments.get(name)?;
    if segment.is_excluded_key(key) {
        return Some(false);
    }

    ctx.enter(Reference::RuleBasedSegment(name), |nested| {
        let excluded = segment.excluded.segments.iter().any(|excluded| {
            match excluded.segment_type {
                SegmentType::Standard => ctx.snapshot.segments.is_member(&excluded.name, key),
                SegmentType::RuleBased => {
                    in_rule_based_segment(nested, &excluded.name, key).unwrap_or(false)
                }
            }
        });
        !excluded
            && segment
                .conditions
                .iter()
                .any(|condition| condition.matches(nested))
    })
}

#[cfg(test)]
mod tests {
    use std::{
        collections::{HashMap, HashSet},
        time::{Duration, Instant},
    };

    use serde_json::json;

    use super::in_rule_based_segment;
    use crate::{
        eval::context::EvaluationContext,
        models::{DataType, Matcher, MatcherKind, RuleBasedSegment},
        storage::{Snapshot, Storage},
        AttributeValue, Attributes,
    };

    fn snapshot() -> Snapshot {
        Storage::default().snapshot().unwrap()
    }

    fn matches(matcher: &Matcher, key: &str, attributes: &Attributes) -> bool {
        let snapshot = snapshot();
        let ctx = EvaluationContext::new(&snapshot, key, None, attributes);
        matcher.matches(&ctx)
    }

    fn attrs(pairs: &[(&str, AttributeValue)]) -> Attributes {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn parse(value: serde_json::Value) -> Matcher {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn missing_attribute_is_a_non_match() {
        let matcher = Matcher::new(MatcherKind::EqualToBoolean(true)).on_attribute("beta");
        assert!(!matches(&matcher, "k", &HashMap::new()));
        assert!(!matches(&matcher, "k", &attrs(&[("beta", AttributeValue::Null)])));
        assert!(matches(&matcher, "k", &attrs(&[("beta", true.into())])));
        assert!(matches(&matcher, "k", &attrs(&[("beta", "True".into())])));

        // Negation applies after the non-match.
        let negated = matcher.negated();
        assert!(negated.matches(&EvaluationContext::new(
            &snapshot(),
            "k",
            None,
            &HashMap::new()
        )));
    }

    #[test]
    fn whitelist_uses_key_without_attribute() {
        let matcher = Matcher::new(MatcherKind::Whitelist(
            ["a".to_owned(), "b".to_owned()].into(),
        ));
        assert!(matches(&matcher, "a", &HashMap::new()));
        assert!(!matches(&matcher, "c", &HashMap::new()));
    }

    #[test]
    fn numeric_comparisons() {
        let gte = Matcher::new(MatcherKind::GreaterThanOrEqualTo {
            data_type: DataType::Number,
            value: 18,
        })
        .on_attribute("age");
        assert!(matches(&gte, "k", &attrs(&[("age", 18.0.into())])));
        assert!(matches(&gte, "k", &attrs(&[("age", "30".into())])));
        assert!(!matches(&gte, "k", &attrs(&[("age", 17.0.into())])));
        // Fractional numbers are not integers.
        assert!(!matches(&gte, "k", &attrs(&[("age", 18.5.into())])));

        let between = Matcher::new(MatcherKind::Between {
            data_type: DataType::Number,
            start: 10,
            end: 20,
        })
        .on_attribute("n");
        assert!(matches(&between, "k", &attrs(&[("n", 10.0.into())])));
        assert!(matches(&between, "k", &attrs(&[("n", 20.0.into())])));
        assert!(!matches(&between, "k", &attrs(&[("n", 21.0.into())])));
    }

    #[test]
    fn datetime_comparisons() {
        // 2024-01-01T10:00:00Z and a later time on the same day.
        let morning: i64 = 1_704_103_200_000;
        let evening: i64 = morning + 8 * 3600 * 1000;

        let equal = Matcher::new(MatcherKind::EqualTo {
            data_type: DataType::Datetime,
            value: morning,
        })
        .on_attribute("t");
        assert!(matches(&equal, "k", &attrs(&[("t", evening.into())])));
        assert!(!matches(
            &equal,
            "k",
            &attrs(&[("t", (morning + 24 * 3600 * 1000).into())])
        ));

        // Seconds are ignored.
        let lte = Matcher::new(MatcherKind::LessThanOrEqualTo {
            data_type: DataType::Datetime,
            value: morning,
        })
        .on_attribute("t");
        assert!(matches(&lte, "k", &attrs(&[("t", (morning + 59_000).into())])));
        assert!(!matches(&lte, "k", &attrs(&[("t", (morning + 60_000).into())])));
    }

    #[test]
    fn set_matchers() {
        let set = |items: &[&str]| -> HashSet<String> { items.iter().map(|s| s.to_string()).collect() };
        let list = |items: &[&str]| {
            AttributeValue::List(items.iter().map(|s| s.to_string()).collect())
        };

        let cases = [
            (MatcherKind::EqualToSet(set(&["a", "b"])), list(&["b", "a"]), true),
            (MatcherKind::EqualToSet(set(&["a", "b"])), list(&["a"]), false),
            (MatcherKind::ContainsAnyOfSet(set(&["a", "z"])), list(&["a", "b"]), true),
            (MatcherKind::ContainsAnyOfSet(set(&["z"])), list(&["a", "b"]), false),
            (MatcherKind::ContainsAllOfSet(set(&["a", "b"])), list(&["a", "b", "c"]), true),
            (MatcherKind::ContainsAllOfSet(set(&["a", "d"])), list(&["a", "b", "c"]), false),
            (MatcherKind::PartOfSet(set(&["a", "b", "c"])), list(&["a", "b"]), true),
            (MatcherKind::PartOfSet(set(&["a"])), list(&["a", "b"]), false),
            (MatcherKind::PartOfSet(set(&["a"])), list(&[]), false),
        ];
        for (kind, value, expected) in cases {
            let matcher = Matcher::new(kind).on_attribute("items");
            assert_eq!(
                matches(&matcher, "k", &attrs(&[("items", value.clone())])),
                expected,
                "{matcher:?} on {value:?}"
            );
        }

        // Sets never apply to the bare key.
        assert!(!matches(
            &Matcher::new(MatcherKind::ContainsAnyOfSet(set(&["k"]))),
            "k",
            &HashMap::new()
        ));
    }

    #[test]
    fn string_matchers() {
        let email = attrs(&[("email", "someone@split.io".into())]);
        let on_email = |value: serde_json::Value| {
            let mut value = value;
            value["keySelector"] = json!({"attribute": "email"});
            parse(value)
        };

        let ends_with = on_email(json!({
            "matcherType": "ENDS_WITH",
            "whitelistMatcherData": {"whitelist": ["@example.com", "@split.io"]}
        }));
        assert!(matches(&ends_with, "k", &email));

        let starts_with = on_email(json!({
            "matcherType": "STARTS_WITH",
            "whitelistMatcherData": {"whitelist": ["nobody"]}
        }));
        assert!(!matches(&starts_with, "k", &email));

        let contains = on_email(json!({
            "matcherType": "CONTAINS_STRING",
            "whitelistMatcherData": {"whitelist": ["one@"]}
        }));
        assert!(matches(&contains, "k", &email));

        let regex = on_email(json!({
            "matcherType": "MATCHES_STRING",
            "stringMatcherData": "^[a-z]+@split\\.io$"
        }));
        assert!(matches(&regex, "k", &email));
        assert!(!matches(&regex, "k", &attrs(&[("email", "a1@split.io".into())])));
    }

    #[test]
    fn semver_matchers() {
        let version = |s: &str| attrs(&[("version", s.into())]);
        let gte = parse(json!({
            "keySelector": {"attribute": "version"},
            "matcherType": "GREATER_THAN_OR_EQUAL_TO_SEMVER",
            "stringMatcherData": "1.2.3"
        }));
        assert!(matches(&gte, "k", &version("1.2.3")));
        assert!(matches(&gte, "k", &version("1.10.0")));
        assert!(!matches(&gte, "k", &version("1.2.3-rc.1")));
        assert!(!matches(&gte, "k", &version("not a version")));

        let equal = parse(json!({
            "keySelector": {"attribute": "version"},
            "matcherType": "EQUAL_TO_SEMVER",
            "stringMatcherData": "1.2.3+build.1"
        }));
        // Build metadata does not take part in precedence.
        assert!(matches(&equal, "k", &version("1.2.3+build.2")));

        let between = parse(json!({
            "keySelector": {"attribute": "version"},
            "matcherType": "BETWEEN_SEMVER",
            "betweenStringMatcherData": {"start": "1.0.0", "end": "2.0.0"}
        }));
        assert!(matches(&between, "k", &version("1.5.0")));
        assert!(!matches(&between, "k", &version("2.0.1")));

        let in_list = parse(json!({
            "keySelector": {"attribute": "version"},
            "matcherType": "IN_LIST_SEMVER",
            "whitelistMatcherData": {"whitelist": ["1.0.0", "3.0.0"]}
        }));
        assert!(matches(&in_list, "k", &version("3.0.0")));
        assert!(!matches(&in_list, "k", &version("2.0.0")));
    }

    fn storage_with_segments(segments: Vec<serde_json::Value>) -> Storage {
        let storage = Storage::default();
        let segments: Vec<RuleBasedSegment> = segments
            .into_iter()
            .map(|s| serde_json::from_value(s).unwrap())
            .collect();
        storage.rule_based_segments.update(segments, vec![], 1).unwrap();
        storage
    }

    #[test]
    fn rule_based_segment_exclusions_win() {
        let storage = storage_with_segments(vec![json!({
            "name": "split_people",
            "status": "ACTIVE",
            "excluded": {"keys": ["mauro@split.io"], "segments": [{"name": "banned", "type": "standard"}]},
            "conditions": [{
                "matcherGroup": {"combiner": "AND", "matchers": [{
                    "matcherType": "ENDS_WITH",
                    "whitelistMatcherData": {"whitelist": ["@split.io"]}
                }]}
            }]
        })]);
        storage
            .segments
            .update("banned", vec!["banned@split.io".into()], vec![], 1)
            .unwrap();
        let snapshot = storage.snapshot().unwrap();
        let attributes = HashMap::new();
        let member = |key: &str| {
            let ctx = EvaluationContext::new(&snapshot, key, None, &attributes);
            in_rule_based_segment(&ctx, "split_people", key)
        };

        assert_eq!(member("mauro@split.io"), Some(false));
        assert_eq!(member("banned@split.io"), Some(false));
        assert_eq!(member("other@split.io"), Some(true));
        assert_eq!(member("other@example.com"), Some(false));

        let ctx = EvaluationContext::new(&snapshot, "k", None, &attributes);
        assert_eq!(in_rule_based_segment(&ctx, "unknown", "k"), None);
    }

    #[test]
    fn cyclic_rule_based_exclusions_terminate() {
        let segment = |name: &str, other: &str| {
            json!({
                "name": name,
                "status": "ACTIVE",
                "excluded": {"keys": [], "segments": [{"name": other, "type": "rule-based"}]},
                "conditions": [{
                    "matcherGroup": {"combiner": "AND", "matchers": [{"matcherType": "ALL_KEYS"}]}
                }]
            })
        };
        let storage = storage_with_segments(vec![segment("a", "b"), segment("b", "a")]);
        let snapshot = storage.snapshot().unwrap();
        let attributes = HashMap::new();
        let ctx = EvaluationContext::new(&snapshot, "k", None, &attributes);
        // Inside "a", "b" cannot re-enter "a", so "b" holds the key and excludes it from "a".
        assert_eq!(in_rule_based_segment(&ctx, "a", "k"), Some(false));
        assert_eq!(in_rule_based_segment(&ctx, "b", "k"), Some(false));
    }

    #[test]
    fn self_referencing_rule_based_segment_fanning_out_is_fast() {
        let reference = json!({
            "matcherGroup": {"combiner": "AND", "matchers": [{
                "matcherType": "IN_RULE_BASED_SEGMENT",
                "userDefinedSegmentMatcherData": {"segmentName": "loop"}
            }]}
        });
        let mut conditions = vec![reference; 6];
        conditions.push(json!({
            "matcherGroup": {"combiner": "AND", "matchers": [{"matcherType": "ALL_KEYS"}]}
        }));
        let excluded = vec![json!({"name": "loop", "type": "rule-based"}); 6];
        let storage = storage_with_segments(vec![json!({
            "name": "loop",
            "status": "ACTIVE",
            "excluded": {"keys": [], "segments": excluded},
            "conditions": conditions
        })]);
        let snapshot = storage.snapshot().unwrap();
        let attributes = HashMap::new();
        let ctx = EvaluationContext::new(&snapshot, "k", None, &attributes);

        let start = Instant::now();
        assert_eq!(in_rule_based_segment(&ctx, "loop", "k"), Some(true));
        assert!(start.elapsed() < Duration::from_secs(1), "{:?}", start.elapsed());
    }

    #[test]
    fn inapplicable_matchers_do_not_match() {
        let _ = env_logger::builder().is_test(true).try_init();

        let dangling = Matcher::new(MatcherKind::InRuleBasedSegment("nowhere".to_owned()));
        assert!(!matches(&dangling, "k", &HashMap::new()));
        assert!(matches(&dangling.negated(), "k", &HashMap::new()));

        let mismatched = Matcher::new(MatcherKind::EqualTo {
            data_type: DataType::Number,
            value: 10,
        })
        .on_attribute("age");
        assert!(matches(&mismatched, "k", &attrs(&[("age", 10.0.into())])));
        let attributes = attrs(&[("age", "ten".into())]);
        assert!(!matches(&mismatched, "k", &attributes));
        assert!(matches(&mismatched.negated(), "k", &attributes));
    }
}
