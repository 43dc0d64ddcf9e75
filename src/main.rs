use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use secrecy::SecretString;

use chainpass::broker::CredentialBroker;
use chainpass::config::{default_config_path, ResolvedConfig};
use chainpass::crypto::KeySource;
use chainpass::help::security_help;
use chainpass::prompt::TerminalPrompt;

#[derive(Parser)]
#[command(name = "chainpass")]
#[command(about = "Local credential broker for the chain CLI")]
struct Cli {
    /// Path to config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Store a secret in the encrypted credential store
    Store {
        /// Name to store the secret under (e.g. a wallet-key name)
        identifier: String,
    },
    /// Remove a stored secret
    Delete { identifier: String },
    /// Resolve a secret without printing it, to check a credential is reachable
    Verify { identifier: String },
    /// Drop all cached secrets (use when switching endpoints)
    ClearCache,
    /// Print the security usage and troubleshooting guide
    SecurityHelp,
    /// Show current configuration
    Config,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.unwrap_or_else(default_config_path);
    let config = ResolvedConfig::load_or_default(&config_path)?;

    if let Command::SecurityHelp = cli.command {
        print!("{}", security_help());
        return Ok(());
    }
    if let Command::Config = cli.command {
        println!("Config file: {}", config_path.display());
        println!("Data directory: {}", config.data_dir.display());
        println!("Lockout threshold: {}", config.lockout_threshold);
        return Ok(());
    }

    let broker = CredentialBroker::open(&config, master_keys()?, Arc::new(TerminalPrompt))?;

    match cli.command {
        Command::Store { identifier } => {
            let secret = read_secret_for(&identifier)?;
            broker.store_secret(&identifier, &secret)?;
            println!("Stored secret for '{identifier}'.");
        }
        Command::Delete { identifier } => {
            broker.delete_secret(&identifier)?;
            println!("Deleted secret for '{identifier}'.");
        }
        Command::Verify { identifier } => match broker.resolve_secret(&identifier, None) {
            Ok(_) => println!("Credential for '{identifier}' is resolvable."),
            Err(err) => {
                // The error text is operator-safe; internals went to tracing.
                eprintln!("{err}");
                std::process::exit(1);
            }
        },
        Command::ClearCache => {
            broker.clear_cache()?;
            println!("Cache cleared.");
        }
        Command::SecurityHelp | Command::Config => unreachable!(),
    }

    Ok(())
}

/// Environment override first, otherwise derive from an operator passphrase.
fn master_keys() -> Result<KeySource> {
    if let Some(keys) = KeySource::from_environment() {
        return Ok(keys);
    }
    let passphrase = dialoguer::Password::new()
        .with_prompt("Master passphrase")
        .allow_empty_password(false)
        .interact()
        .context("Failed to read master passphrase")?;
    Ok(KeySource::Passphrase(SecretString::from(passphrase)))
}

fn read_secret_for(identifier: &str) -> Result<SecretString> {
    let value = dialoguer::Password::new()
        .with_prompt(format!("Secret for '{identifier}'"))
        .with_confirmation("Confirm secret", "Secrets do not match")
        .allow_empty_password(false)
        .interact()
        .context("Failed to read secret")?;
    Ok(SecretString::from(value))
}
