//! Persistence of per-guild filter configuration.
//!
//! Stores read and write a guild's [`GuildConfig`] as a whole document. Mutations go
//! through [`GuildStore::update`], which each store makes atomic for its own kind of
//! storage. [`GuildLocks`] additionally queues writers within one process.

use crate::config::{GuildConfig, Settings, StoredExemption, StoredFilters, StoredPerGuild};
use crate::setup::ensure_guild_config;
use crate::Snowflake;
use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

pub trait GuildStore: Send + Sync {
    /// The guild's document, or an empty one if it has never been written.
    fn load(&self, guild_id: Snowflake) -> Result<GuildConfig>;

    fn save(&self, config: &GuildConfig) -> Result<()>;

    /// Read-modify-write of the guild's document. Nothing is saved if `edit` fails.
    fn update<T, E>(
        &self,
        guild_id: Snowflake,
        edit: impl FnOnce(&mut GuildConfig) -> std::result::Result<T, E>,
    ) -> std::result::Result<T, E>
    where
        E: From<anyhow::Error>,
    {
        read_modify_write(self, guild_id, edit)
    }

    /// Enabled state for guilds that have never toggled filtering.
    fn default_enabled(&self) -> bool {
        true
    }

    fn filters(&self, guild_id: Snowflake) -> Result<StoredFilters> {
        Ok(self.load(guild_id)?.filters)
    }

    fn exemptions(&self, guild_id: Snowflake) -> Result<Vec<StoredExemption>> {
        Ok(self.load(guild_id)?.exemptions)
    }

    fn enabled(&self, guild_id: Snowflake) -> Result<bool> {
        Ok(self
            .load(guild_id)?
            .enabled
            .unwrap_or_else(|| self.default_enabled()))
    }

    fn logging_channel(&self, guild_id: Snowflake) -> Result<Option<Snowflake>> {
        Ok(self.load(guild_id)?.logging_channel)
    }

    fn set_logging_channel(&self, guild_id: Snowflake, channel_id: Snowflake) -> Result<()> {
        self.update(guild_id, |config| {
            config.logging_channel = Some(channel_id);
            Ok(())
        })
    }
}

fn read_modify_write<S, T, E>(
    store: &S,
    guild_id: Snowflake,
    edit: impl FnOnce(&mut GuildConfig) -> std::result::Result<T, E>,
) -> std::result::Result<T, E>
where
    S: GuildStore + ?Sized,
    E: From<anyhow::Error>,
{
    let mut config = store.load(guild_id)?;
    let value = edit(&mut config)?;
    store.save(&config)?;
    Ok(value)
}

/// One YAML document per guild under a data directory. Saves replace the document
/// atomically, and updates hold an advisory lock on the guild so that several processes
/// can share one data directory.
#[derive(Clone, Debug)]
pub struct FileStore {
    data_dir: PathBuf,
    default_enabled: bool,
}

impl FileStore {
    pub fn new(data_dir: &Path, settings: &Settings) -> Self {
        Self {
            data_dir: data_dir.to_path_buf(),
            default_enabled: settings.default_enabled,
        }
    }
}

impl GuildStore for FileStore {
    fn load(&self, guild_id: Snowflake) -> Result<GuildConfig> {
        ensure_guild_config(&self.data_dir, guild_id)
    }

    fn save(&self, config: &GuildConfig) -> Result<()> {
        config.save(&self.data_dir)
    }

    fn update<T, E>(
        &self,
        guild_id: Snowflake,
        edit: impl FnOnce(&mut GuildConfig) -> std::result::Result<T, E>,
    ) -> std::result::Result<T, E>
    where
        E: From<anyhow::Error>,
    {
        let _lock = GuildConfig::lock(&self.data_dir, guild_id)?;
        read_modify_write(self, guild_id, edit)
    }

    fn default_enabled(&self) -> bool {
        self.default_enabled
    }
}

/// Keeps documents in memory. For tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryStore {
    guilds: Mutex<HashMap<Snowflake, GuildConfig>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Default::default()
    }

    fn guilds(&self) -> Result<MutexGuard<'_, HashMap<Snowflake, GuildConfig>>> {
        self.guilds
            .lock()
            .map_err(|_| anyhow!("Memory store lock poisoned"))
    }
}

impl GuildStore for MemoryStore {
    fn load(&self, guild_id: Snowflake) -> Result<GuildConfig> {
        Ok(self
            .guilds()?
            .get(&guild_id)
            .cloned()
            .unwrap_or_else(|| GuildConfig::new(guild_id)))
    }

    fn save(&self, config: &GuildConfig) -> Result<()> {
        self.guilds()?.insert(config.guild_id, config.clone());
        Ok(())
    }

    fn update<T, E>(
        &self,
        guild_id: Snowflake,
        edit: impl FnOnce(&mut GuildConfig) -> std::result::Result<T, E>,
    ) -> std::result::Result<T, E>
    where
        E: From<anyhow::Error>,
    {
        let mut guilds = self.guilds()?;
        let mut config = guilds
            .get(&guild_id)
            .cloned()
            .unwrap_or_else(|| GuildConfig::new(guild_id));
        let value = edit(&mut config)?;
        guilds.insert(guild_id, config);
        Ok(value)
    }
}

/// One async lock per guild, created on first use and dropped once nobody holds or
/// waits for it.
#[derive(Debug, Default)]
pub struct GuildLocks {
    locks: Mutex<HashMap<Snowflake, Arc<AsyncMutex<()>>>>,
}

impl GuildLocks {
    pub fn new() -> Self {
        Default::default()
    }

    /// Never held across an await, so poisoning can't leave the map inconsistent.
    fn map(&self) -> MutexGuard<'_, HashMap<Snowflake, Arc<AsyncMutex<()>>>> {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait for exclusive access to a guild's configuration.
    pub async fn lock(&self, guild_id: Snowflake) -> GuildLock<'_> {
        let lock = self.map().entry(guild_id).or_default().clone();
        GuildLock {
            locks: self,
            guild_id,
            guard: Some(lock.lock_owned().await),
        }
    }
}

/// Held access to one guild. Releasing it removes the guild's lock from the map when
/// nothing else refers to it.
pub struct GuildLock<'a> {
    locks: &'a GuildLocks,
    guild_id: Snowflake,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for GuildLock<'_> {
    fn drop(&mut self) {
        let mut locks = self.locks.map();
        // Waiters clone the Arc under the map lock, so the count can't grow while we hold it.
        drop(self.guard.take());
        if locks
            .get(&self.guild_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.guild_id);
        }
    }
}
