//! Guild-keyed operations over a store: configuration changes, evaluation and dry runs.
//!
//! Every configuration change is a [`GuildStore::update`] of the guild's whole document,
//! queued behind that guild's lock so concurrent changes to one guild can't lose updates.
//! Changes edit the stored records, so records this version can't use are left in place.

use crate::engine::{
    self, add_exemption_record, remove_exemption_record, Evaluation, Exemption, ExemptionSet,
    FilterCollection, FilterSet, GuildSnapshot, MessageMeta, Verdict,
};
use crate::error::Result;
use crate::normalize::Normalizer;
use crate::pattern::{CompileOptions, FilterKind, FilterMatcher};
use crate::store::{GuildLocks, GuildStore};
use crate::Snowflake;
use tracing::{debug, info};

pub struct FilterService<S> {
    store: S,
    normalizer: Box<dyn Normalizer>,
    options: CompileOptions,
    locks: GuildLocks,
}

impl<S: GuildStore> FilterService<S> {
    pub fn new(store: S, normalizer: impl Normalizer + 'static, options: CompileOptions) -> Self {
        Self {
            store,
            normalizer: Box::new(normalizer),
            options,
            locks: GuildLocks::new(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn filter_collection(&self, guild_id: Snowflake) -> Result<FilterCollection> {
        Ok(FilterCollection::from_stored(
            &self.store.filters(guild_id)?,
            &self.options,
        ))
    }

    pub fn exemption_set(&self, guild_id: Snowflake) -> Result<ExemptionSet> {
        Ok(ExemptionSet::from_stored(&self.store.exemptions(guild_id)?))
    }

    /// Everything evaluation needs, from a single read of the guild's document.
    pub fn snapshot(&self, guild_id: Snowflake) -> Result<GuildSnapshot> {
        let config = self.store.load(guild_id)?;
        Ok(GuildSnapshot {
            enabled: config
                .enabled
                .unwrap_or_else(|| self.store.default_enabled()),
            filters: FilterCollection::from_stored(&config.filters, &self.options),
            exemptions: ExemptionSet::from_stored(&config.exemptions),
        })
    }

    pub fn is_enabled(&self, guild_id: Snowflake) -> Result<bool> {
        Ok(self.store.enabled(guild_id)?)
    }

    /// Flip the guild-wide switch. Returns the new state.
    pub async fn toggle(&self, guild_id: Snowflake) -> Result<bool> {
        let _guard = self.locks.lock(guild_id).await;
        let default_enabled = self.store.default_enabled();
        let enabled = self.store.update(guild_id, |config| {
            let enabled = !config.enabled.unwrap_or(default_enabled);
            config.enabled = Some(enabled);
            Ok::<_, anyhow::Error>(enabled)
        })?;
        info!(
            "Message filtering {state} for guild {guild_id}",
            state = if enabled { "enabled" } else { "disabled" }
        );
        Ok(enabled)
    }

    pub async fn add_filter(
        &self,
        guild_id: Snowflake,
        set: FilterSet,
        kind: FilterKind,
        pattern: &str,
    ) -> Result<FilterMatcher> {
        let _guard = self.locks.lock(guild_id).await;
        let added = rejected(
            guild_id,
            self.store.update(guild_id, |config| {
                config.filters.add(set, kind, pattern, &self.options)
            }),
        )?;
        info!("Filter added to {set} collection for guild {guild_id}: {kind} - {pattern}");
        Ok(added)
    }

    pub async fn remove_filter(
        &self,
        guild_id: Snowflake,
        set: FilterSet,
        kind: FilterKind,
        pattern: &str,
    ) -> Result<usize> {
        let _guard = self.locks.lock(guild_id).await;
        let removed = rejected(
            guild_id,
            self.store.update(guild_id, |config| config.filters.remove(set, kind, pattern)),
        )?;
        info!("Filter deleted from {set} collection for guild {guild_id}: {kind} - {pattern}");
        Ok(removed)
    }

    pub fn list_filters(&self, guild_id: Snowflake, set: FilterSet) -> Result<Vec<FilterMatcher>> {
        Ok(self.filter_collection(guild_id)?.list(set).to_vec())
    }

    pub async fn add_exemption(&self, guild_id: Snowflake, exemption: Exemption) -> Result<()> {
        let _guard = self.locks.lock(guild_id).await;
        rejected(
            guild_id,
            self.store.update(guild_id, |config| {
                add_exemption_record(&mut config.exemptions, exemption)
            }),
        )?;
        info!(
            "Exemption added for {kind} with ID {target} for guild {guild_id}",
            kind = exemption.kind,
            target = exemption.target
        );
        Ok(())
    }

    pub async fn remove_exemption(&self, guild_id: Snowflake, exemption: Exemption) -> Result<usize> {
        let _guard = self.locks.lock(guild_id).await;
        let removed = rejected(
            guild_id,
            self.store.update(guild_id, |config| {
                remove_exemption_record(&mut config.exemptions, exemption)
            }),
        )?;
        info!(
            "Exemption deleted for {kind} with ID {target} for guild {guild_id}",
            kind = exemption.kind,
            target = exemption.target
        );
        Ok(removed)
    }

    pub fn list_exemptions(&self, guild_id: Snowflake) -> Result<Vec<Exemption>> {
        Ok(self.exemption_set(guild_id)?.list().to_vec())
    }

    pub async fn set_logging_channel(&self, guild_id: Snowflake, channel_id: Snowflake) -> Result<()> {
        let _guard = self.locks.lock(guild_id).await;
        self.store.set_logging_channel(guild_id, channel_id)?;
        info!("Logs for message filters in {guild_id} will be sent to {channel_id}");
        Ok(())
    }

    pub fn logging_channel(&self, guild_id: Snowflake) -> Result<Option<Snowflake>> {
        Ok(self.store.logging_channel(guild_id)?)
    }

    pub fn evaluate(&self, guild_id: Snowflake, raw: &str, message: &MessageMeta) -> Result<Evaluation> {
        let snapshot = self.snapshot(guild_id)?;
        engine::evaluate(&snapshot, raw, message, self.normalizer.as_ref())
    }

    /// Preview the guild's filters on some text, whatever its enabled state and exemptions.
    pub fn dry_run(&self, guild_id: Snowflake, raw: &str) -> Result<Verdict> {
        let filters = self.filter_collection(guild_id)?;
        engine::dry_run(&filters, raw, self.normalizer.as_ref())
    }
}

/// Note expected rejections at debug level; they're the caller's business, not ours.
fn rejected<T>(guild_id: Snowflake, result: Result<T>) -> Result<T> {
    if let Err(e) = &result {
        if e.is_rejection() {
            debug!("{guild_id}: Request rejected: {e}");
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Settings, StoredExemption, StoredFilter};
    use crate::error::FilterError;
    use crate::normalize::{MarkdownNormalizer, PlainText};
    use crate::store::{FileStore, MemoryStore};
    use std::collections::HashSet;
    use std::sync::Arc;

    const GUILD: Snowflake = 1000;

    fn service() -> FilterService<MemoryStore> {
        FilterService::new(MemoryStore::new(), PlainText, CompileOptions::default())
    }

    fn message() -> MessageMeta {
        MessageMeta {
            author_id: 1,
            role_ids: HashSet::from([2]),
            channel_id: 3,
        }
    }

    #[tokio::test]
    async fn test_duplicate_add_keeps_one_filter() {
        let service = service();
        service
            .add_filter(GUILD, FilterSet::Forbidden, FilterKind::Literal, "spam")
            .await
            .expect("First add should work");
        let second = service
            .add_filter(GUILD, FilterSet::Forbidden, FilterKind::Literal, "spam")
            .await;
        assert!(matches!(second, Err(FilterError::DuplicateFilter { .. })));
        assert_eq!(
            1,
            service
                .list_filters(GUILD, FilterSet::Forbidden)
                .expect("Couldn't list")
                .len()
        );
    }

    #[tokio::test]
    async fn test_invalid_pattern_is_not_persisted() {
        let service = service();
        let result = service
            .add_filter(GUILD, FilterSet::Forbidden, FilterKind::Regex, "(?P<")
            .await;
        assert!(matches!(result, Err(FilterError::InvalidPattern { .. })));
        assert!(service
            .store()
            .filters(GUILD)
            .expect("Couldn't read")
            .forbidden
            .is_empty());
    }

    #[tokio::test]
    async fn test_remove_missing_filter() {
        let service = service();
        let result = service
            .remove_filter(GUILD, FilterSet::Allowed, FilterKind::Word, "class")
            .await;
        assert!(matches!(result, Err(FilterError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_toggle_and_state() {
        let service = service();
        assert!(service.is_enabled(GUILD).expect("Couldn't read"));
        assert!(!service.toggle(GUILD).await.expect("Couldn't toggle"));
        assert!(!service.is_enabled(GUILD).expect("Couldn't read"));
        assert!(service.toggle(GUILD).await.expect("Couldn't toggle"));
    }

    #[tokio::test]
    async fn test_evaluate_follows_guild_state() {
        let service = service();
        assert_eq!(
            Evaluation::Skipped(engine::SkipReason::NoFilters),
            service.evaluate(GUILD, "spam", &message()).expect("Couldn't evaluate")
        );

        service
            .add_filter(GUILD, FilterSet::Forbidden, FilterKind::Word, "spam")
            .await
            .expect("Couldn't add");
        assert_eq!(
            1,
            service
                .evaluate(GUILD, "spam", &message())
                .expect("Couldn't evaluate")
                .violations()
                .len()
        );

        service
            .add_exemption(GUILD, Exemption::channel(3))
            .await
            .expect("Couldn't add");
        assert_eq!(
            Evaluation::Skipped(engine::SkipReason::Exempt),
            service.evaluate(GUILD, "spam", &message()).expect("Couldn't evaluate")
        );

        service.toggle(GUILD).await.expect("Couldn't toggle");
        assert_eq!(
            Evaluation::Skipped(engine::SkipReason::Disabled),
            service.evaluate(GUILD, "spam", &message()).expect("Couldn't evaluate")
        );

        // Preview still runs everything.
        assert!(service.dry_run(GUILD, "spam").expect("Couldn't run").is_violation());
    }

    #[tokio::test]
    async fn test_exemption_crud() {
        let service = service();
        service
            .add_exemption(GUILD, Exemption::user(9))
            .await
            .expect("Couldn't add");
        assert!(matches!(
            service.add_exemption(GUILD, Exemption::user(9)).await,
            Err(FilterError::DuplicateExemption { .. })
        ));
        assert_eq!(
            vec![Exemption::user(9)],
            service.list_exemptions(GUILD).expect("Couldn't list")
        );
        assert_eq!(
            1,
            service
                .remove_exemption(GUILD, Exemption::user(9))
                .await
                .expect("Couldn't remove")
        );
        assert!(matches!(
            service.remove_exemption(GUILD, Exemption::user(9)).await,
            Err(FilterError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_logging_channel() {
        let service = service();
        assert_eq!(None, service.logging_channel(GUILD).expect("Couldn't read"));
        service
            .set_logging_channel(GUILD, 55)
            .await
            .expect("Couldn't write");
        assert_eq!(Some(55), service.logging_channel(GUILD).expect("Couldn't read"));
    }

    #[tokio::test]
    async fn test_dry_run_uses_the_normalizer() {
        let service = FilterService::new(
            MemoryStore::new(),
            MarkdownNormalizer,
            CompileOptions::default(),
        );
        service
            .add_filter(GUILD, FilterSet::Forbidden, FilterKind::Word, "bad")
            .await
            .expect("Couldn't add");
        let verdict = service.dry_run(GUILD, "||b||ad <@1>").expect("Couldn't run");
        assert_eq!("bad  ", verdict.text().as_str());
        assert_eq!(1, verdict.violations().len());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_adds_are_not_lost() {
        let service = Arc::new(service());
        let mut tasks = vec![];
        for i in 0..32 {
            let service = service.clone();
            tasks.push(tokio::spawn(async move {
                service
                    .add_filter(GUILD, FilterSet::Forbidden, FilterKind::Literal, &format!("w{i}"))
                    .await
                    .map(|_| ())
            }));
        }
        for task in tasks {
            task.await.expect("Task panicked").expect("Couldn't add");
        }
        assert_eq!(
            32,
            service
                .list_filters(GUILD, FilterSet::Forbidden)
                .expect("Couldn't list")
                .len()
        );
    }

    #[tokio::test]
    async fn test_changes_keep_records_this_version_cannot_use() {
        let service = service();
        let phonetic = StoredFilter {
            kind: "phonetic".to_string(),
            pattern: "bad".to_string(),
        };
        let lookahead = StoredFilter {
            kind: "regex".to_string(),
            pattern: "b(?=ad)".to_string(),
        };
        let whole_guild = StoredExemption {
            kind: "guild".to_string(),
            target: GUILD,
        };
        service
            .store()
            .update(GUILD, |config| {
                config.filters.forbidden = vec![phonetic.clone(), lookahead.clone()];
                config.exemptions = vec![whole_guild.clone()];
                Ok::<_, anyhow::Error>(())
            })
            .expect("Couldn't seed");

        service
            .add_filter(GUILD, FilterSet::Allowed, FilterKind::Word, "class")
            .await
            .expect("Couldn't add");
        service
            .add_exemption(GUILD, Exemption::user(9))
            .await
            .expect("Couldn't add");
        service
            .remove_exemption(GUILD, Exemption::user(9))
            .await
            .expect("Couldn't remove");

        let config = service.store().load(GUILD).expect("Couldn't read");
        assert_eq!(vec![phonetic, lookahead], config.filters.forbidden);
        assert_eq!(vec![whole_guild], config.exemptions);
        assert!(service
            .list_filters(GUILD, FilterSet::Forbidden)
            .expect("Couldn't list")
            .is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_file_stores_sharing_a_directory_dont_lose_updates() {
        let dir = tempfile::tempdir().expect("Couldn't create temp dir");
        let settings = Settings::default();
        let services = [
            Arc::new(FilterService::new(
                FileStore::new(dir.path(), &settings),
                PlainText,
                CompileOptions::default(),
            )),
            Arc::new(FilterService::new(
                FileStore::new(dir.path(), &settings),
                PlainText,
                CompileOptions::default(),
            )),
        ];
        let mut tasks = vec![];
        for i in 0..40 {
            let service = services[i % 2].clone();
            tasks.push(tokio::spawn(async move {
                service
                    .add_filter(GUILD, FilterSet::Forbidden, FilterKind::Literal, &format!("w{i}"))
                    .await
                    .map(|_| ())
            }));
        }
        for task in tasks {
            task.await.expect("Task panicked").expect("Couldn't add");
        }

        let reopened = FileStore::new(dir.path(), &settings);
        assert_eq!(40, reopened.filters(GUILD).expect("Couldn't read").forbidden.len());
    }
}
