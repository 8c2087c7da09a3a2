use crate::config::*;
use crate::Snowflake;
use anyhow::Result;
use std::path::Path;
use tracing::info;

/// Load settings, or save and use defaults if there aren't any yet.
/// A settings file that exists but can't be read is an error.
pub fn ensure_settings(data_dir: &Path) -> Result<Settings> {
    if Settings::exists(data_dir) {
        return Settings::load(data_dir);
    }

    let settings = Settings::default();
    settings.save(data_dir)?;
    info!(
        "Global settings saved: {path}",
        path = settings.path(data_dir).to_string_lossy(),
    );

    Ok(settings)
}

/// Load a guild's filter config, or an empty one if the guild hasn't configured anything.
/// A document that exists but can't be read is an error, not an empty config.
pub fn ensure_guild_config(data_dir: &Path, guild_id: Snowflake) -> Result<GuildConfig> {
    if !GuildConfig::exists(data_dir, guild_id) {
        return Ok(GuildConfig::new(guild_id));
    }
    GuildConfig::load(data_dir, guild_id)
}
