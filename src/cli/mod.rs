mod cron;
mod serve;
mod tokens;

use anyhow::Result;
use console::style;
use std::sync::Arc;

use crate::core::config::PortalConfig;
use crate::core::store::SqliteStore;
use crate::core::terminal::{GuideSection, print_error};
use crate::core::vault::TokenCipher;
use crate::platform::{NativePlatform, Platform};

fn print_help() {
    println!(
        "\n {} {}",
        style("agent-portal").bold().cyan(),
        style(env!("CARGO_PKG_VERSION")).dim()
    );

    GuideSection::new("Server")
        .command("serve", "Start the HTTP API (--api-host, --api-port)")
        .print();

    GuideSection::new("API tokens")
        .command("token create", "Create a token (--user <id> --name <label>)")
        .command("token list", "List tokens (--user <id>)")
        .command("token revoke", "Revoke a token (--user <id> --id <token-id>)")
        .print();

    GuideSection::new("Maintenance")
        .command(
            "cron <job>",
            "Run a cron job once (--retention-days <n> for cleanup)",
        )
        .command("help", "Show this help")
        .print();

    println!(
        "\n {} {} <command> [subcommand]\n",
        style("Usage:").bold(),
        style("agent-portal").green()
    );
}

/// Value following any of `names` at or after `start`, e.g. `--user alice`.
pub(crate) fn flag_value(args: &[String], start: usize, names: &[&str]) -> Option<String> {
    let mut i = start;
    while i < args.len() {
        if names.contains(&args[i].as_str()) {
            return args.get(i + 1).cloned();
        }
        i += 1;
    }
    None
}

/// Configuration and store from the data directory (`PORTAL_DATA_DIR` or
/// the platform default).
pub(crate) async fn open_portal() -> Result<(PortalConfig, Arc<SqliteStore>)> {
    let data_dir = NativePlatform::data_dir();
    let config = PortalConfig::load(&data_dir)?;
    let cipher = TokenCipher::new(config.encryption_key.as_deref())?;
    let store = SqliteStore::open(&data_dir, cipher).await?;
    Ok((config, Arc::new(store)))
}

pub async fn run_main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let cmd = args.get(1).map(String::as_str).unwrap_or("help");

    match cmd {
        "serve" => {
            let host = flag_value(&args, 2, &["--api-host"]);
            let port = match flag_value(&args, 2, &["--api-port"]) {
                Some(raw) => Some(
                    raw.parse::<u16>()
                        .map_err(|_| anyhow::anyhow!("Invalid --api-port '{}'", raw))?,
                ),
                None => None,
            };
            serve::run_server(host, port).await
        }
        "token" => tokens::run_token_command(&args).await,
        "cron" => cron::run_cron_command(&args).await,
        "help" | "--help" | "-h" => {
            print_help();
            Ok(())
        }
        other => {
            print_error(&format!("Unknown command '{}'", other));
            print_help();
            std::process::exit(2);
        }
    }
}
