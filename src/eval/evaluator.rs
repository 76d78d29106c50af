use std::{
    collections::HashMap,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::Arc,
};

use crate::{error::EvaluationError, storage::Storage, Attributes};

use super::{evaluate, labels, Evaluation};

/// Evaluator reads a consistent snapshot of storage for each call and shields callers from
/// structural failures.
pub struct Evaluator {
    storage: Arc<Storage>,
}

impl Evaluator {
    pub fn new(storage: Arc<Storage>) -> Evaluator {
        Evaluator { storage }
    }

    /// Evaluate a flag. Structural failures are reported as `"control"` with label
    /// `"exception"`.
    pub fn evaluate(
        &self,
        key: &str,
        bucketing_key: Option<&str>,
        flag_name: &str,
        attributes: &Attributes,
    ) -> Evaluation {
        self.try_evaluate(key, bucketing_key, flag_name, attributes)
            .unwrap_or_else(|err| exception(flag_name, key, err))
    }

    /// Evaluate several flags against the same snapshot.
    pub fn evaluate_many(
        &self,
        key: &str,
        bucketing_key: Option<&str>,
        flag_names: &[&str],
        attributes: &Attributes,
    ) -> HashMap<String, Evaluation> {
        let snapshot = match self.storage.snapshot() {
            Ok(snapshot) => snapshot,
            Err(_) => {
                return flag_names
                    .iter()
                    .map(|flag_name| {
                        let evaluation =
                            exception(flag_name, key, EvaluationError::StorageUnavailable);
                        (flag_name.to_string(), evaluation)
                    })
                    .collect()
            }
        };

        flag_names
            .iter()
            .map(|flag_name| {
                let evaluation = catch_unwind(AssertUnwindSafe(|| {
                    evaluate(&snapshot, key, bucketing_key, flag_name, attributes)
                }))
                .unwrap_or_else(|_| exception(flag_name, key, EvaluationError::Panicked));
                trace(key, flag_name, &evaluation);
                (flag_name.to_string(), evaluation)
            })
            .collect()
    }

    /// Evaluate a flag, surfacing structural failures to the caller.
    pub fn try_evaluate(
        &self,
        key: &str,
        bucketing_key: Option<&str>,
        flag_name: &str,
        attributes: &Attributes,
    ) -> Result<Evaluation, EvaluationError> {
        let snapshot = self
            .storage
            .snapshot()
            .map_err(|_| EvaluationError::StorageUnavailable)?;

        let evaluation = catch_unwind(AssertUnwindSafe(|| {
            evaluate(&snapshot, key, bucketing_key, flag_name, attributes)
        }))
        .map_err(|_| EvaluationError::Panicked)?;

        trace(key, flag_name, &evaluation);
        Ok(evaluation)
    }
}

fn trace(key: &str, flag_name: &str, evaluation: &Evaluation) {
    log::trace!(target: "splitio",
                key,
                flag_name,
                treatment:display = evaluation.treatment,
                label:display = evaluation.label;
                "evaluated a flag");
}

fn exception(flag_name: &str, key: &str, err: EvaluationError) -> Evaluation {
    log::error!(target: "splitio",
                flag_name,
                key;
                "error occurred while evaluating a flag: {err}");
    Evaluation::control(labels::EXCEPTION)
}
