use crate::{storage::Snapshot, Attributes};

/// Maximum number of flags and rule-based segments under evaluation at once, the evaluated flag
/// included.
pub(crate) const MAX_DEPTH: usize = 10;

/// A definition that can be referenced from matchers or prerequisites.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Reference<'a> {
    Flag(&'a str),
    RuleBasedSegment(&'a str),
}

/// One entry of the chain of definitions currently being evaluated.
struct Visit<'a> {
    reference: Reference<'a>,
    parent: Option<&'a Visit<'a>>,
}

/// Everything a matcher needs to decide whether it applies to the current evaluation.
#[derive(Clone, Copy)]
pub(crate) struct EvaluationContext<'a> {
    pub snapshot: &'a Snapshot,
    /// Matching key.
    pub key: &'a str,
    /// Key used to compute buckets. Equal to `key` unless the caller provided one.
    pub bucketing_key: &'a str,
    pub attributes: &'a Attributes,
    depth: usize,
    path: Option<&'a Visit<'a>>,
}

impl<'a> EvaluationContext<'a> {
    pub fn new(
        snapshot: &'a Snapshot,
        key: &'a str,
        bucketing_key: Option<&'a str>,
        attributes: &'a Attributes,
    ) -> EvaluationContext<'a> {
        EvaluationContext {
            snapshot,
            key,
            bucketing_key: bucketing_key.unwrap_or(key),
            attributes,
            depth: 0,
            path: None,
        }
    }

    /// Run `f` with a context that has `reference` on its evaluation path.
    ///
    /// Returns `None` without calling `f` if `reference` is already being evaluated further up
    /// the path, or once [`MAX_DEPTH`] is reached. Callers treat that as a non-match.
    pub fn enter<R>(
        &self,
        reference: Reference<'_>,
        f: impl FnOnce(&EvaluationContext<'_>) -> R,
    ) -> Option<R> {
        if self.is_visiting(reference) {
            log::debug!(target: "splitio",
                        key = self.key,
                        reference:? = reference;
                        "cyclic reference, treating it as a non-match");
            return None;
        }
        if self.depth >= MAX_DEPTH {
            log::warn!(target: "splitio",
                       key = self.key,
                       reference:? = reference,
                       depth = self.depth;
                       "reference nesting is too deep, treating it as a non-match");
            return None;
        }

        let visit = Visit {
            reference,
            parent: self.path,
        };
        let nested = EvaluationContext {
            snapshot: self.snapshot,
            key: self.key,
            bucketing_key: self.bucketing_key,
            attributes: self.attributes,
            depth: self.depth + 1,
            path: Some(&visit),
        };
        Some(f(&nested))
    }

    fn is_visiting(&self, reference: Reference<'_>) -> bool {
        let mut visit = self.path;
        while let Some(current) = visit {
            if current.reference == reference {
                return true;
            }
            visit = current.parent;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::{EvaluationContext, Reference, MAX_DEPTH};
    use crate::storage::Storage;

    #[test]
    fn reentering_a_reference_is_refused() {
        let snapshot = Storage::default().snapshot().unwrap();
        let attributes = HashMap::new();
        let ctx = EvaluationContext::new(&snapshot, "k", None, &attributes);

        let result = ctx.enter(Reference::Flag("a"), |a| {
            let sibling = a.enter(Reference::RuleBasedSegment("a"), |_| "segment");
            let cycle = a.enter(Reference::Flag("b"), |b| b.enter(Reference::Flag("a"), |_| ()));
            (sibling, cycle)
        });
        assert_eq!(result, Some((Some("segment"), Some(None))));

        // The path only holds ancestors, so evaluating the same flag twice in a row is fine.
        assert_eq!(ctx.enter(Reference::Flag("a"), |_| 1), Some(1));
    }

    #[test]
    fn depth_is_bounded() {
        fn descend(ctx: &EvaluationContext<'_>, level: usize) -> usize {
            let name = level.to_string();
            ctx.enter(Reference::Flag(&name), |nested| descend(nested, level + 1))
                .unwrap_or(level)
        }

        let snapshot = Storage::default().snapshot().unwrap();
        let attributes = HashMap::new();
        let ctx = EvaluationContext::new(&snapshot, "k", None, &attributes);
        assert_eq!(descend(&ctx, 0), MAX_DEPTH);
    }
}
