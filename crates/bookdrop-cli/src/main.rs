mod books;
mod cli;
mod config;
mod credentials;
mod vault;

use bookdrop_core::credentials::{CredentialRecord, CredentialStore};
use clap::Parser;
use color_eyre::{eyre::WrapErr, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::cli::{Command, ConfigCommand};

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = cli::Cli::parse();
    let config = config::load(cli.config.as_deref())?;
    init_tracing(&config);

    match cli.command.unwrap_or(Command::Health) {
        Command::Credentials(cmd) => credentials::handle(cmd, &config)?,
        Command::Ingest {
            file,
            id,
            title,
            format,
            upload,
        } => {
            let args = books::IngestArgs {
                file,
                id,
                title,
                format,
                upload,
            };
            books::ingest(args, &config).await?
        }
        Command::Upload { file } => books::upload(&file, &config).await?,
        Command::Health => run_health_check(&config)?,
        Command::Version => print_version(),
        Command::Config(ConfigCommand::Init) => init_config(cli.config.as_deref(), &config)?,
        Command::Config(ConfigCommand::Show) => show_config(&config)?,
    }

    Ok(())
}

fn init_tracing(config: &config::Config) {
    // RUST_LOG wins; otherwise the configured level, default info.
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_filter()));
    let fmt_layer = tracing_subscriber::fmt::layer().with_target(false);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

fn print_version() {
    println!("bookdrop {}", env!("CARGO_PKG_VERSION"));
}

/// Round-trips a probe record through a vault next to the real one, then
/// reports on the stored credentials.
fn run_health_check(config: &config::Config) -> Result<()> {
    if !config.tolino.enabled {
        println!("Vault: disabled (ENABLE_TOLINO=false)");
        return Ok(());
    }

    let vault = vault::vault_from_config(config)?;
    let mut probe_config = config.clone();
    probe_config.tolino.credentials_file = Some(vault.path().with_extension("health-probe"));
    run_vault_health(&vault::vault_from_config(&probe_config)?)?;
    println!("Vault: ok ({})", vault.path().display());

    if config.uses_documented_default_key() {
        println!(
            "Warning: using the documented default encryption key; set TOLINO_ENCRYPTION_KEY."
        );
    }
    println!("{}", credentials::status_line(&vault.status()));
    Ok(())
}

fn run_vault_health<S: CredentialStore>(store: &S) -> Result<()> {
    let probe = CredentialRecord::new("health@probe.invalid", "ok")?;
    store.save(&probe).wrap_err("vault write failed")?;
    let round_trip = store.load().wrap_err("vault read failed");
    store.clear().wrap_err("vault cleanup failed")?;

    if round_trip? != probe {
        color_eyre::eyre::bail!("vault round-trip returned different credentials");
    }
    Ok(())
}

fn init_config(path: Option<&std::path::Path>, config: &config::Config) -> Result<()> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => config::default_path()?,
    };
    let path = config::write_if_missing(config, &path)?;
    println!("Config initialized at {}", path.display());
    Ok(())
}

fn show_config(config: &config::Config) -> Result<()> {
    print!("{}", toml::to_string_pretty(&config.redacted())?);
    Ok(())
}
