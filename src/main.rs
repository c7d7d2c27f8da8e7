use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use postbook::cli::{
    handle_account_command, handle_extract_command, handle_inspect_command, handle_lock_command,
    handle_post_command, AccountCommands, ExtractCommands, InspectCommands, LockCommands,
    PostCommands,
};
use postbook::config::paths::PostbookPaths;
use postbook::storage::Storage;

#[derive(Parser)]
#[command(
    name = "postbook",
    version,
    about = "Turn scraped bank evidence into a double-entry ledger",
    long_about = "postbook extracts staged entries from scraped bank documents, \
                  suggests counterparts and transfer matches, and posts balanced \
                  transactions to a general ledger under login and ledger locks."
)]
struct Cli {
    /// Lock owner name for this invocation (default: postbook-<pid>)
    #[arg(long, global = true, env = "POSTBOOK_OWNER")]
    owner: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    #[command(flatten)]
    Extract(ExtractCommands),

    #[command(flatten)]
    Post(PostCommands),

    #[command(flatten)]
    Inspect(InspectCommands),

    /// Lock management commands
    #[command(subcommand)]
    Lock(LockCommands),

    /// Account registry commands
    #[command(subcommand)]
    Account(AccountCommands),

    /// Show current configuration and paths
    Config,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("POSTBOOK_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let owner = cli
        .owner
        .unwrap_or_else(|| format!("postbook-{}", std::process::id()));

    let paths = PostbookPaths::new()?;
    let storage = Storage::open(paths)?;

    match cli.command {
        Some(Commands::Extract(cmd)) => handle_extract_command(&storage, &owner, cmd)?,
        Some(Commands::Post(cmd)) => handle_post_command(&storage, &owner, cmd)?,
        Some(Commands::Inspect(cmd)) => handle_inspect_command(&storage, &owner, cmd)?,
        Some(Commands::Lock(cmd)) => handle_lock_command(&storage, &owner, cmd)?,
        Some(Commands::Account(cmd)) => handle_account_command(&storage, cmd)?,
        Some(Commands::Config) => {
            let paths = storage.paths();
            let settings = storage.settings();
            println!("postbook Configuration");
            println!("======================");
            println!("Base directory:      {}", paths.base_dir().display());
            println!("Data directory:      {}", paths.data_dir().display());
            println!("Documents directory: {}", paths.documents_dir().display());
            println!("Rulesets file:       {}", paths.rulesets_file().display());
            println!();
            println!("Settings:");
            println!("  Default commodity:    {}", settings.default_commodity);
            println!("  Default counterpart:  {}", settings.default_counterpart);
            println!("  Transfer window:      {} days", settings.transfer_window_days);
            println!("  Transfer tolerance:   {}", settings.transfer_amount_tolerance);
            println!("  Settle window:        {} days", settings.settle_window_days);
            println!("  Lock TTL:             {}s", settings.lock_ttl_secs);
            println!("  Owner:                {}", owner);
        }
        None => {
            println!("postbook - scraped evidence to double-entry ledger");
            println!();
            println!("Run 'postbook --help' for usage information.");
        }
    }

    Ok(())
}
