use std::{collections::BTreeSet, sync::OnceLock};

use regex::Regex;

fn flag_set_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        // Static pattern.
        Regex::new(r"^[a-z0-9][_a-z0-9]{0,49}$").unwrap_or_else(|err| panic!("{err}"))
    })
}

/// Restricts which flags are kept in storage.
///
/// An empty filter accepts every flag. Otherwise, a flag is retained only if it belongs to at
/// least one of the configured sets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlagSetsFilter {
    sets: BTreeSet<String>,
}

impl FlagSetsFilter {
    /// Build a filter from user-provided set names.
    ///
    /// Names are trimmed and lower-cased. Names that are still invalid afterwards are dropped.
    pub fn new<I, S>(sets: I) -> FlagSetsFilter
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let sets = sets
            .into_iter()
            .filter_map(|set| {
                let sanitized = set.as_ref().trim().to_lowercase();
                if flag_set_regex().is_match(&sanitized) {
                    Some(sanitized)
                } else {
                    log::warn!(target: "splitio",
                               flag_set = set.as_ref();
                               "dropping invalid flag set name");
                    None
                }
            })
            .collect();
        FlagSetsFilter { sets }
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    pub fn sets(&self) -> impl Iterator<Item = &str> {
        self.sets.iter().map(String::as_str)
    }

    /// Return `true` if a flag tagged with `flag_sets` should be kept.
    pub fn intersects(&self, flag_sets: &BTreeSet<String>) -> bool {
        self.sets.is_empty() || !self.sets.is_disjoint(flag_sets)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::FlagSetsFilter;

    fn sets(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn empty_filter_accepts_everything() {
        let filter = FlagSetsFilter::default();
        assert!(filter.intersects(&sets(&[])));
        assert!(filter.intersects(&sets(&["backend"])));
    }

    #[test]
    fn requires_overlap() {
        let filter = FlagSetsFilter::new(["backend", "mobile"]);
        assert!(filter.intersects(&sets(&["mobile", "web"])));
        assert!(!filter.intersects(&sets(&["web"])));
        assert!(!filter.intersects(&sets(&[])));
    }

    #[test]
    fn sanitizes_names() {
        let filter = FlagSetsFilter::new([" Backend ", "_invalid", "with space", "ok_1"]);
        assert_eq!(filter.sets().collect::<Vec<_>>(), vec!["backend", "ok_1"]);
    }
}
