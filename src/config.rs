use crate::pattern::DEFAULT_REGEX_SIZE_LIMIT;
use crate::Snowflake;
use anyhow::{anyhow, bail, Result};
use fs2::FileExt;
use glob::glob;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs::{create_dir_all, File, OpenOptions};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Environment variable that can stand in for `--data-dir`.
pub const DATA_DIR_ENV: &str = "GUILD_FILTER_DATA_DIR";

/// Global settings for this program.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Settings {
    /// Upper bound, in bytes, on the compiled size of any one filter's regex.
    #[serde(default = "default_regex_size_limit")]
    pub regex_size_limit: usize,
    /// Whether filtering is on for guilds that have never toggled it.
    #[serde(default = "default_true")]
    pub default_enabled: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            regex_size_limit: default_regex_size_limit(),
            default_enabled: true,
        }
    }
}

impl StoredOnce for Settings {}

fn default_regex_size_limit() -> usize {
    DEFAULT_REGEX_SIZE_LIMIT
}

fn default_true() -> bool {
    true
}

/// Message filter configuration for one guild.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct GuildConfig {
    pub guild_id: Snowflake,
    /// Absent means "never toggled"; see [`Settings::default_enabled`].
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    /// Channel that receives reports about filtered messages.
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging_channel: Option<Snowflake>,
    #[serde(default)]
    pub filters: StoredFilters,
    #[serde(default)]
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub exemptions: Vec<StoredExemption>,
}

impl GuildConfig {
    pub fn new(guild_id: Snowflake) -> Self {
        Self {
            guild_id,
            enabled: None,
            logging_channel: None,
            filters: Default::default(),
            exemptions: Default::default(),
        }
    }
}

impl StoredPerGuild for GuildConfig {}

/// Both filter sets as persisted, in insertion order.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct StoredFilters {
    #[serde(default)]
    pub allowed: Vec<StoredFilter>,
    #[serde(default)]
    pub forbidden: Vec<StoredFilter>,
}

/// A filter as persisted. `kind` stays a string so that unknown kinds survive a load.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct StoredFilter {
    #[serde(alias = "type")]
    pub kind: String,
    #[serde(alias = "filter")]
    pub pattern: String,
}

/// An exemption as persisted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct StoredExemption {
    #[serde(alias = "type")]
    pub kind: String,
    #[serde(with = "snowflake")]
    #[schemars(with = "String")]
    pub target: Snowflake,
}

/// Discord IDs are written as strings, but we read either form.
pub(crate) mod snowflake {
    use crate::Snowflake;
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(Snowflake),
        String(String),
    }

    impl Raw {
        fn parse<E: Error>(self) -> Result<Snowflake, E> {
            match self {
                Raw::Number(id) => Ok(id),
                Raw::String(s) => s.parse().map_err(E::custom),
            }
        }
    }

    pub fn serialize<S: Serializer>(id: &Snowflake, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&id.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Snowflake, D::Error> {
        Raw::deserialize(deserializer)?.parse()
    }

    pub fn deserialize_list<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<Snowflake>, D::Error> {
        Vec::<Raw>::deserialize(deserializer)?
            .into_iter()
            .map(Raw::parse)
            .collect()
    }
}

pub trait StoredOnce: private::StoredOnce {
    fn load(data_dir: &Path) -> Result<Self> {
        load_from(<Self as private::StoredOnce>::path(data_dir))
    }

    fn path(&self, data_dir: &Path) -> PathBuf {
        <Self as private::StoredOnce>::path(data_dir)
    }

    fn save(&self, data_dir: &Path) -> Result<()> {
        save_to(self, self.path(data_dir))
    }

    fn exists(data_dir: &Path) -> bool {
        <Self as private::StoredOnce>::path(data_dir).is_file()
    }
}

pub trait StoredPerGuild: private::StoredPerGuild {
    fn load(data_dir: &Path, guild_id: Snowflake) -> Result<Self> {
        let data: Self = load_from(<Self as private::StoredPerGuild>::path(data_dir, guild_id))?;
        if data.guild_id() != guild_id {
            bail!(
                "Expected guild {guild_id}, got {data_guild_id}",
                data_guild_id = data.guild_id()
            );
        }
        Ok(data)
    }

    fn path(&self, data_dir: &Path) -> PathBuf {
        <Self as private::StoredPerGuild>::path(data_dir, self.guild_id())
    }

    fn save(&self, data_dir: &Path) -> Result<()> {
        save_to(self, self.path(data_dir))
    }

    fn exists(data_dir: &Path, guild_id: Snowflake) -> bool {
        <Self as private::StoredPerGuild>::path(data_dir, guild_id).is_file()
    }

    /// Take an exclusive advisory lock on the guild's document, waiting for other holders,
    /// including other processes. Released when the returned file is dropped.
    fn lock(data_dir: &Path, guild_id: Snowflake) -> Result<File> {
        let path =
            <Self as private::StoredPerGuild>::path(data_dir, guild_id).with_extension("lock");
        if let Some(dir) = path.parent() {
            create_dir_all(dir)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path)?;
        file.lock_exclusive()?;
        Ok(file)
    }
}

/// There's no easy way to have private trait methods in Rust, so we split these traits.
pub(crate) mod private {
    use super::{GuildConfig, Settings};
    use crate::Snowflake;
    use serde::de::DeserializeOwned;
    use serde::Serialize;
    use std::path::{Path, PathBuf};

    pub trait StoredOnce: DeserializeOwned + Serialize {
        fn basename() -> &'static str;

        fn path(data_dir: &Path) -> PathBuf {
            data_dir
                .to_path_buf()
                .join(format!("{basename}.yaml", basename = Self::basename()))
        }
    }

    impl StoredOnce for Settings {
        fn basename() -> &'static str {
            "global"
        }
    }

    pub trait StoredPerGuild: DeserializeOwned + Serialize {
        fn basename() -> &'static str;
        fn guild_id(&self) -> Snowflake;

        fn path(data_dir: &Path, guild_id: Snowflake) -> PathBuf {
            data_dir
                .to_path_buf()
                .join(guild_id.to_string())
                .join(format!("{basename}.yaml", basename = Self::basename()))
        }
    }

    impl StoredPerGuild for GuildConfig {
        fn basename() -> &'static str {
            "message_filter"
        }
        fn guild_id(&self) -> Snowflake {
            self.guild_id
        }
    }
}

fn load_from<T: DeserializeOwned>(path: PathBuf) -> Result<T> {
    let file = File::open(path)?;
    let data = serde_yaml::from_reader(file)?;
    Ok(data)
}

/// Write to a temporary file next to the destination and rename it into place, so readers
/// see either the old document or the new one, never a partial write.
fn save_to<T>(data: &T, path: PathBuf) -> Result<()>
where
    T: Serialize,
{
    let dir = path
        .parent()
        .ok_or_else(|| anyhow!("{path} has no parent directory", path = path.display()))?;
    create_dir_all(dir)?;
    let mut file = NamedTempFile::new_in(dir)?;
    serde_yaml::to_writer(&mut file, data)?;
    file.as_file().sync_all()?;
    file.persist(&path)?;
    Ok(())
}

/// IDs of guilds that have a message filter document, in ascending order.
pub fn configured_guilds(data_dir: &Path) -> Result<Vec<Snowflake>> {
    let mut glob_buf = data_dir.to_path_buf();
    glob_buf.push("*");
    glob_buf.push(format!(
        "{basename}.yaml",
        basename = <GuildConfig as private::StoredPerGuild>::basename()
    ));
    let Some(config_glob) = glob_buf.to_str() else {
        bail!(
            "{glob} couldn't be converted to a string for globbing",
            glob = glob_buf.to_string_lossy()
        );
    };

    let mut guild_ids = vec![];
    for entry in glob(config_glob)? {
        let config = load_from::<GuildConfig>(entry?)?;
        guild_ids.push(config.guild_id);
    }
    guild_ids.sort_unstable();

    Ok(guild_ids)
}
