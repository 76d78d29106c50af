use crate::{
    models::{ConditionType, Split},
    splitter,
};

use super::{
    context::{EvaluationContext, Reference},
    labels, Evaluation,
};

/// Evaluate `flag_name` against `ctx`.
///
/// Total: every outcome, including a missing definition, is described by the returned
/// [`Evaluation`].
pub(crate) fn evaluate_flag(ctx: &EvaluationContext, flag_name: &str) -> Evaluation {
    let Some(split) = ctx.snapshot.splits.get(flag_name) else {
        return Evaluation::control(labels::DEFINITION_NOT_FOUND);
    };

    if split.killed {
        return Evaluation::for_default(split, labels::KILLED);
    }

    if !prerequisites_met(ctx, split) {
        return Evaluation::for_default(split, labels::PREREQUISITES_NOT_MET);
    }

    let mut in_rollout = false;
    for condition in &split.conditions {
        if !in_rollout && condition.condition_type == ConditionType::Rollout {
            if split.traffic_allocation < 100 {
                let bucket = splitter::bucket(
                    ctx.bucketing_key,
                    split.traffic_allocation_seed(),
                    split.algo,
                );
                if bucket > split.traffic_allocation {
                    return Evaluation::for_default(split, labels::NOT_IN_SPLIT);
                }
            }
            in_rollout = true;
        }

        if !condition.matches(ctx) {
            continue;
        }

        let bucket = splitter::bucket(ctx.bucketing_key, split.seed, split.algo);
        return match splitter::treatment_for_bucket(bucket, &condition.partitions) {
            Some(treatment) => Evaluation::for_treatment(split, treatment, &condition.label),
            None => {
                log::warn!(target: "splitio",
                           flag_name,
                           bucket;
                           "matching condition has partitions that do not cover the bucket");
                Evaluation::for_default(split, labels::INVALID_PARTITIONS)
            }
        };
    }

    Evaluation::for_default(split, labels::DEFAULT_RULE)
}

/// Every prerequisite flag must yield one of its listed treatments for the same key.
fn prerequisites_met(ctx: &EvaluationContext, split: &Split) -> bool {
    split.prerequisites.iter().all(|prerequisite| {
        let name = &prerequisite.flag_name;
        ctx.enter(Reference::Flag(name), |nested| evaluate_flag(nested, name))
            .is_some_and(|evaluation| prerequisite.treatments.contains(&evaluation.treatment))
    })
}
