//! Flag evaluation.
//!
//! Evaluation is a pure function of a storage [`Snapshot`], the keys and the attributes. It never
//! fails: problems in a definition or in the input surface through [`Evaluation::label`].
mod context;
mod engine;
mod evaluator;
mod matchers;

pub use evaluator::Evaluator;

use serde::Serialize;

use crate::{
    models::{ChangeNumber, Split},
    storage::Snapshot,
    Attributes, CONTROL,
};

/// Labels describing why a treatment was chosen.
pub mod labels {
    pub const KILLED: &str = "killed";
    pub const DEFINITION_NOT_FOUND: &str = "definition not found";
    pub const NOT_IN_SPLIT: &str = "not in split";
    pub const DEFAULT_RULE: &str = "default rule";
    pub const EXCEPTION: &str = "exception";
    pub const NOT_READY: &str = "not ready";
    pub const PREREQUISITES_NOT_MET: &str = "prerequisites not met";
    /// Matching condition has no partitions, or partitions that do not add up to the bucket.
    pub const INVALID_PARTITIONS: &str = "invalid partitions";
}

/// Result of evaluating a flag for a key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Evaluation {
    pub treatment: String,
    pub label: String,
    /// Change number of the flag definition used. `None` when no definition was used.
    pub change_number: Option<ChangeNumber>,
    /// Configuration attached to the treatment.
    pub config: Option<String>,
    pub impressions_disabled: bool,
}

impl Evaluation {
    /// `"control"` with the given label.
    pub fn control(label: &str) -> Evaluation {
        Evaluation {
            treatment: CONTROL.to_owned(),
            label: label.to_owned(),
            change_number: None,
            config: None,
            impressions_disabled: false,
        }
    }

    fn for_treatment(split: &Split, treatment: &str, label: &str) -> Evaluation {
        Evaluation {
            treatment: treatment.to_owned(),
            label: label.to_owned(),
            change_number: Some(split.change_number),
            config: split.config_for(treatment).map(str::to_owned),
            impressions_disabled: split.impressions_disabled,
        }
    }

    fn for_default(split: &Split, label: &str) -> Evaluation {
        Evaluation::for_treatment(split, &split.default_treatment, label)
    }
}

/// Evaluate `flag_name` for `key` against `snapshot`.
///
/// `bucketing_key` is used for bucketing instead of `key` when provided. Matchers always see
/// `key`.
pub fn evaluate(
    snapshot: &Snapshot,
    key: &str,
    bucketing_key: Option<&str>,
    flag_name: &str,
    attributes: &Attributes,
) -> Evaluation {
    let ctx = context::EvaluationContext::new(snapshot, key, bucketing_key, attributes);
    ctx.enter(context::Reference::Flag(flag_name), |ctx| {
        engine::evaluate_flag(ctx, flag_name)
    })
    .unwrap_or_else(|| Evaluation::control(labels::EXCEPTION))
}

/// Membership of `key` in the rule-based segment `segment_name`.
///
/// Unknown segments, cyclic references and reference chains that are too deep are a non-member.
pub fn is_in_segment(
    snapshot: &Snapshot,
    key: &str,
    attributes: &Attributes,
    segment_name: &str,
) -> bool {
    let ctx = context::EvaluationContext::new(snapshot, key, None, attributes);
    matchers::in_rule_based_segment(&ctx, segment_name, key).unwrap_or(false)
}
