use std::{collections::HashSet, sync::Arc, time::Duration};

use crate::{
    fetcher::{AsyncChangeFetcher, ChangeFetcher, SplitChanges},
    models::ChangeNumber,
    storage::Storage,
    Error, Result,
};

use super::{update_feature_flag_storage, update_rule_based_segment_storage};

/// Attempts made by an on-demand synchronization before giving up.
const ON_DEMAND_FETCH_RETRIES: u32 = 10;

/// Exponential backoff between on-demand synchronization attempts.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    pub base: Duration,
    pub max: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff {
            base: Duration::from_millis(500),
            max: Duration::from_secs(10),
        }
    }
}

impl Backoff {
    fn delay(&self, attempt: u32) -> Duration {
        self.base
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.max)
    }
}

/// Table an on-demand synchronization waits on.
#[derive(Clone, Copy)]
enum Target {
    Splits,
    RuleBasedSegments,
}

/// Synchronizes flags and rule-based segments.
pub struct SplitSynchronizer {
    storage: Arc<Storage>,
    backoff: Backoff,
}

impl SplitSynchronizer {
    pub fn new(storage: Arc<Storage>) -> SplitSynchronizer {
        SplitSynchronizer {
            storage,
            backoff: Backoff::default(),
        }
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> SplitSynchronizer {
        self.backoff = backoff;
        self
    }

    /// Empty flags and rule-based segments. Change numbers go back to `-1` so the next
    /// synchronization starts from scratch.
    pub fn clear_storage(&self) -> Result<()> {
        self.storage.splits.clear()?;
        self.storage.rule_based_segments.clear()
    }

    /// Fetch and apply changes until the server reports no more of them.
    ///
    /// With `till`, keep retrying until flags reach that change number, failing with
    /// [`Error::SynchronizationFailed`] after a bounded number of attempts.
    ///
    /// Returns the standard segments referenced by the flags and rule-based segments that were
    /// added.
    pub fn synchronize_splits(
        &self,
        fetcher: &mut impl ChangeFetcher,
        till: Option<ChangeNumber>,
    ) -> Result<HashSet<String>> {
        self.synchronize_to(fetcher, till, Target::Splits)
    }

    /// Like [`SplitSynchronizer::synchronize_splits`], with `till` targeting the rule-based
    /// segments change number. Both tables are always fetched together.
    pub fn synchronize_rule_based_segments(
        &self,
        fetcher: &mut impl ChangeFetcher,
        till: Option<ChangeNumber>,
    ) -> Result<HashSet<String>> {
        self.synchronize_to(fetcher, till, Target::RuleBasedSegments)
    }

    /// Async flavor of [`SplitSynchronizer::synchronize_splits`].
    pub async fn synchronize_splits_async(
        &self,
        fetcher: &mut impl AsyncChangeFetcher,
        till: Option<ChangeNumber>,
    ) -> Result<HashSet<String>> {
        self.synchronize_to_async(fetcher, till, Target::Splits).await
    }

    /// Async flavor of [`SplitSynchronizer::synchronize_rule_based_segments`].
    pub async fn synchronize_rule_based_segments_async(
        &self,
        fetcher: &mut impl AsyncChangeFetcher,
        till: Option<ChangeNumber>,
    ) -> Result<HashSet<String>> {
        self.synchronize_to_async(fetcher, till, Target::RuleBasedSegments)
            .await
    }

    fn synchronize_to(
        &self,
        fetcher: &mut impl ChangeFetcher,
        till: Option<ChangeNumber>,
        target: Target,
    ) -> Result<HashSet<String>> {
        let Some(till) = till else {
            return self.fetch_until_up_to_date(fetcher, None);
        };

        let mut segments = HashSet::new();
        for attempt in 0..ON_DEMAND_FETCH_RETRIES {
            segments.extend(self.fetch_until_up_to_date(fetcher, Some(till))?);
            if self.reached(target, till)? {
                return Ok(segments);
            }
            std::thread::sleep(self.backoff.delay(attempt));
        }
        Err(self.gave_up(till))
    }

    async fn synchronize_to_async(
        &self,
        fetcher: &mut impl AsyncChangeFetcher,
        till: Option<ChangeNumber>,
        target: Target,
    ) -> Result<HashSet<String>> {
        let Some(till) = till else {
            return self.fetch_until_up_to_date_async(fetcher, None).await;
        };

        let mut segments = HashSet::new();
        for attempt in 0..ON_DEMAND_FETCH_RETRIES {
            segments.extend(self.fetch_until_up_to_date_async(fetcher, Some(till)).await?);
            if self.reached(target, till)? {
                return Ok(segments);
            }
            tokio::time::sleep(self.backoff.delay(attempt)).await;
        }
        Err(self.gave_up(till))
    }

    /// Empty storage, then synchronize from scratch.
    pub fn resynchronize(&self, fetcher: &mut impl ChangeFetcher) -> Result<HashSet<String>> {
        self.clear_storage()?;
        self.synchronize_splits(fetcher, None)
    }

    fn fetch_until_up_to_date(
        &self,
        fetcher: &mut impl ChangeFetcher,
        till: Option<ChangeNumber>,
    ) -> Result<HashSet<String>> {
        let mut segments = HashSet::new();
        loop {
            let (since, rb_since) = self.change_numbers()?;
            let changes = fetcher.fetch_flag_changes(since, rb_since, till)?;
            if self.apply(changes, &mut segments)? || self.change_numbers()? == (since, rb_since) {
                return Ok(segments);
            }
        }
    }

    async fn fetch_until_up_to_date_async(
        &self,
        fetcher: &mut impl AsyncChangeFetcher,
        till: Option<ChangeNumber>,
    ) -> Result<HashSet<String>> {
        let mut segments = HashSet::new();
        loop {
            let (since, rb_since) = self.change_numbers()?;
            let changes = fetcher.fetch_flag_changes(since, rb_since, till).await?;
            if self.apply(changes, &mut segments)? || self.change_numbers()? == (since, rb_since) {
                return Ok(segments);
            }
        }
    }

    /// Merge both pages. Returns `true` if storage is up to date.
    fn apply(&self, changes: SplitChanges, segments: &mut HashSet<String>) -> Result<bool> {
        let done = changes.feature_flags.is_last() && changes.rule_based_segments.is_last();

        segments.extend(update_rule_based_segment_storage(
            &self.storage.rule_based_segments,
            changes.rule_based_segments,
        )?);
        segments.extend(update_feature_flag_storage(
            &self.storage.splits,
            changes.feature_flags,
        )?);
        Ok(done)
    }

    fn change_numbers(&self) -> Result<(ChangeNumber, ChangeNumber)> {
        Ok((
            self.storage.splits.get_change_number()?,
            self.storage.rule_based_segments.get_change_number()?,
        ))
    }

    fn reached(&self, target: Target, till: ChangeNumber) -> Result<bool> {
        let current = match target {
            Target::Splits => self.storage.splits.get_change_number()?,
            Target::RuleBasedSegments => self.storage.rule_based_segments.get_change_number()?,
        };
        Ok(current >= till)
    }

    fn gave_up(&self, till: ChangeNumber) -> Error {
        log::warn!(target: "splitio",
                   change_number = till;
                   "no changes fetched after {ON_DEMAND_FETCH_RETRIES} attempts");
        Error::SynchronizationFailed { till }
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use super::{Backoff, SplitSynchronizer};
    use crate::{
        storage::Storage,
        sync::tests::{flag, FakeFetcher},
        Error,
    };

    fn synchronizer() -> (Arc<Storage>, SplitSynchronizer) {
        let _ = env_logger::builder().is_test(true).try_init();
        let storage = Arc::new(Storage::default());
        let synchronizer = SplitSynchronizer::new(Arc::clone(&storage)).with_backoff(Backoff {
            base: Duration::ZERO,
            max: Duration::ZERO,
        });
        (storage, synchronizer)
    }

    #[test]
    fn follows_pages_until_since_equals_till() {
        let (storage, synchronizer) = synchronizer();
        let mut fetcher = FakeFetcher::default();
        fetcher.flags.insert(-1, (vec![flag("a", "ACTIVE", 10)], 10));
        fetcher.flags.insert(10, (vec![flag("b", "ACTIVE", 20)], 20));

        let segments = synchronizer.synchronize_splits(&mut fetcher, None).unwrap();
        assert_eq!(
            segments,
            ["a_segment".to_owned(), "b_segment".to_owned()].into()
        );
        assert_eq!(storage.splits.get_change_number().unwrap(), 20);
        assert_eq!(fetcher.split_requests.len(), 3);
    }

    #[test]
    fn fetch_error_keeps_storage_intact() {
        let (storage, synchronizer) = synchronizer();
        let mut fetcher = FakeFetcher::default();
        fetcher.flags.insert(-1, (vec![flag("a", "ACTIVE", 10)], 10));
        synchronizer.synchronize_splits(&mut fetcher, None).unwrap();

        fetcher.errors.push_back(Error::UnexpectedResponse("boom".to_owned()));
        assert!(synchronizer.synchronize_splits(&mut fetcher, None).is_err());
        assert!(storage.splits.get_split("a").unwrap().is_some());
        assert_eq!(storage.splits.get_change_number().unwrap(), 10);
    }

    #[test]
    fn on_demand_sync_gives_up() {
        let (_storage, synchronizer) = synchronizer();
        let mut fetcher = FakeFetcher::default();
        fetcher.flags.insert(-1, (vec![flag("a", "ACTIVE", 10)], 10));

        let result = synchronizer.synchronize_splits(&mut fetcher, Some(50));
        assert!(matches!(result, Err(Error::SynchronizationFailed { till: 50 })));
        assert!(fetcher.split_requests.iter().all(|(_, _, till)| *till == Some(50)));
    }

    #[test]
    fn on_demand_sync_succeeds_once_reached() {
        let (storage, synchronizer) = synchronizer();
        let mut fetcher = FakeFetcher::default();
        fetcher.flags.insert(-1, (vec![flag("a", "ACTIVE", 50)], 50));

        synchronizer.synchronize_splits(&mut fetcher, Some(50)).unwrap();
        assert_eq!(storage.splits.get_change_number().unwrap(), 50);
    }

    #[test]
    fn resynchronize_starts_from_scratch() {
        let (storage, synchronizer) = synchronizer();
        let mut fetcher = FakeFetcher::default();
        fetcher.flags.insert(-1, (vec![flag("a", "ACTIVE", 10)], 10));
        synchronizer.synchronize_splits(&mut fetcher, None).unwrap();

        fetcher.flags.insert(-1, (vec![flag("b", "ACTIVE", 10)], 10));
        synchronizer.resynchronize(&mut fetcher).unwrap();
        assert_eq!(storage.splits.get_all_names().unwrap(), vec!["b"]);
    }

    #[test]
    fn on_demand_rule_based_segments_sync_waits_on_their_change_number() {
        let (storage, synchronizer) = synchronizer();
        let mut fetcher = FakeFetcher::default();
        fetcher.flags.insert(-1, (vec![flag("a", "ACTIVE", 50)], 50));

        // Flags reach 50 but rule-based segments stay at -1.
        let result = synchronizer.synchronize_rule_based_segments(&mut fetcher, Some(50));
        assert!(matches!(result, Err(Error::SynchronizationFailed { till: 50 })));
        assert_eq!(storage.splits.get_change_number().unwrap(), 50);
        assert_eq!(storage.rule_based_segments.get_change_number().unwrap(), -1);
    }

    #[tokio::test]
    async fn async_on_demand_sync_gives_up() {
        let (_storage, synchronizer) = synchronizer();
        let mut fetcher = FakeFetcher::default();
        let result = synchronizer
            .synchronize_splits_async(&mut fetcher, Some(5))
            .await;
        assert!(matches!(result, Err(Error::SynchronizationFailed { till: 5 })));
    }
}
