use anyhow::{bail, Result};
use clap::{Args, Parser, Subcommand};
use guild_filter::config::{configured_guilds, GuildConfig, Settings, DATA_DIR_ENV};
use guild_filter::normalize::MarkdownNormalizer;
use guild_filter::pattern::CompileOptions;
use guild_filter::setup::ensure_settings;
use guild_filter::store::FileStore;
use guild_filter::{
    report, scan, Exemption, FilterError, FilterKind, FilterService, FilterSet, Snowflake,
};
use schemars::schema::RootSchema;
use schemars::schema_for;
use serde::Serialize;
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Logs go to stderr: stdout carries command output, including scan records.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    match run(&cli.data_dir, cli.command).await {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(e) => match e.downcast_ref::<FilterError>() {
            Some(rejection) if rejection.is_rejection() => {
                eprintln!("{rejection}");
                Ok(ExitCode::FAILURE)
            }
            _ => Err(e),
        },
    }
}

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Directory holding global settings and per-guild filter documents.
    #[arg(short, long, env = DATA_DIR_ENV)]
    data_dir: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show whether message filtering is enabled for a guild.
    State {
        #[arg(short, long)]
        guild: Snowflake,
    },
    /// Turn message filtering on or off for a guild.
    Toggle {
        #[arg(short, long)]
        guild: Snowflake,
    },
    /// Manage words and phrases that are forbidden.
    Forbidden {
        #[command(subcommand)]
        action: FilterAction,
    },
    /// Manage words and phrases that are explicitly allowed, and take priority over forbidden ones.
    Allowed {
        #[command(subcommand)]
        action: FilterAction,
    },
    /// Manage users, roles and channels that bypass message filters.
    Exemptions {
        #[command(subcommand)]
        action: ExemptionAction,
    },
    /// Show what a guild's filters would do to some text.
    Test {
        #[arg(short, long)]
        guild: Snowflake,
        #[arg(short, long)]
        text: String,
    },
    /// Set the channel that receives reports about filtered messages.
    SetLoggingChannel {
        #[arg(short, long)]
        guild: Snowflake,
        #[arg(short, long)]
        channel: Snowflake,
    },
    /// List guilds that have message filter configuration.
    Guilds,
    /// Evaluate newline-delimited JSON messages from stdin, writing one JSON outcome per message to stdout.
    Scan,
    /// Print JSON schemas for the stored configuration documents.
    Schema,
}

#[derive(Subcommand)]
enum FilterAction {
    Add {
        #[arg(short, long)]
        guild: Snowflake,
        #[arg(short, long, value_enum)]
        kind: FilterKind,
        #[arg(short, long)]
        pattern: String,
    },
    Delete {
        #[arg(short, long)]
        guild: Snowflake,
        #[arg(short, long, value_enum)]
        kind: FilterKind,
        #[arg(short, long)]
        pattern: String,
    },
    List {
        #[arg(short, long)]
        guild: Snowflake,
    },
}

#[derive(Subcommand)]
enum ExemptionAction {
    Add {
        #[arg(short, long)]
        guild: Snowflake,
        #[command(flatten)]
        target: ExemptionTarget,
    },
    Delete {
        #[arg(short, long)]
        guild: Snowflake,
        #[command(flatten)]
        target: ExemptionTarget,
    },
    List {
        #[arg(short, long)]
        guild: Snowflake,
    },
}

/// Exactly one of these.
#[derive(Args)]
#[group(required = true, multiple = false)]
struct ExemptionTarget {
    #[arg(long)]
    user: Option<Snowflake>,
    #[arg(long)]
    role: Option<Snowflake>,
    #[arg(long)]
    channel: Option<Snowflake>,
}

impl ExemptionTarget {
    fn exemption(&self) -> Result<Exemption> {
        Ok(match (self.user, self.role, self.channel) {
            (Some(id), None, None) => Exemption::user(id),
            (None, Some(id), None) => Exemption::role(id),
            (None, None, Some(id)) => Exemption::channel(id),
            _ => bail!("Exactly one of --user, --role or --channel is required"),
        })
    }
}

#[derive(Serialize)]
struct Schemas {
    settings: RootSchema,
    guild_config: RootSchema,
}

fn open(data_dir: &Path) -> Result<FilterService<FileStore>> {
    let settings = ensure_settings(data_dir)?;
    Ok(FilterService::new(
        FileStore::new(data_dir, &settings),
        MarkdownNormalizer,
        CompileOptions::from(&settings),
    ))
}

async fn run(data_dir: &Path, command: Command) -> Result<()> {
    match command {
        Command::State { guild } => {
            let enabled = open(data_dir)?.is_enabled(guild)?;
            println!(
                "Message filtering is currently {state}.",
                state = if enabled { "enabled" } else { "disabled" }
            );
        }
        Command::Toggle { guild } => {
            let enabled = open(data_dir)?.toggle(guild).await?;
            println!(
                "Message filtering is now {state}.",
                state = if enabled { "enabled" } else { "disabled" }
            );
        }
        Command::Forbidden { action } => filters(data_dir, FilterSet::Forbidden, action).await?,
        Command::Allowed { action } => filters(data_dir, FilterSet::Allowed, action).await?,
        Command::Exemptions { action } => exemptions(data_dir, action).await?,
        Command::Test { guild, text } => {
            let service = open(data_dir)?;
            if service.filter_collection(guild)?.forbidden().is_empty() {
                println!("There are no filters configured for this server.");
            } else {
                println!("{}", report::test_report(&service.dry_run(guild, &text)?));
            }
        }
        Command::SetLoggingChannel { guild, channel } => {
            open(data_dir)?.set_logging_channel(guild, channel).await?;
            println!("Logs for message filters will now be sent to channel {channel}.");
        }
        Command::Guilds => {
            for guild_id in configured_guilds(data_dir)? {
                println!("{guild_id}");
            }
        }
        Command::Scan => {
            let service = open(data_dir)?;
            scan::scan(&service, io::stdin().lock(), io::stdout().lock())?;
        }
        Command::Schema => {
            let schemas = Schemas {
                settings: schema_for!(Settings),
                guild_config: schema_for!(GuildConfig),
            };
            println!("{}", serde_json::to_string_pretty(&schemas)?);
        }
    }
    Ok(())
}

async fn filters(data_dir: &Path, set: FilterSet, action: FilterAction) -> Result<()> {
    let service = open(data_dir)?;
    match action {
        FilterAction::Add {
            guild,
            kind,
            pattern,
        } => {
            service.add_filter(guild, set, kind, &pattern).await?;
            println!("Messages matching the following '{kind}' filter will now be {set}:\n{pattern}");
        }
        FilterAction::Delete {
            guild,
            kind,
            pattern,
        } => {
            service.remove_filter(guild, set, kind, &pattern).await?;
            println!(
                "Messages matching the following '{kind}' filter will now no longer be {set}:\n{pattern}"
            );
        }
        FilterAction::List { guild } => {
            println!("{}", report::filter_list(set, &service.list_filters(guild, set)?));
        }
    }
    Ok(())
}

async fn exemptions(data_dir: &Path, action: ExemptionAction) -> Result<()> {
    let service = open(data_dir)?;
    match action {
        ExemptionAction::Add { guild, target } => {
            let exemption = target.exemption()?;
            service.add_exemption(guild, exemption).await?;
            println!(
                "{target} is now exempt from message filters.",
                target = exemption.describe()
            );
        }
        ExemptionAction::Delete { guild, target } => {
            let exemption = target.exemption()?;
            service.remove_exemption(guild, exemption).await?;
            println!(
                "{target} is no longer exempt from message filters.",
                target = exemption.describe()
            );
        }
        ExemptionAction::List { guild } => {
            println!("{}", report::exemption_list(&service.list_exemptions(guild)?));
        }
    }
    Ok(())
}
