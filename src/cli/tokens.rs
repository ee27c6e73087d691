use anyhow::Result;
use console::style;

use super::{flag_value, open_portal};
use crate::core::store::ApiTokenRepository;
use crate::core::terminal::{print_error, print_info, print_success};

fn usage() {
    println!(
        "{}",
        style("Usage: agent-portal token <create|list|revoke> --user <id> [--name <label>] [--id <token-id>]")
            .bold()
    );
}

/// Local token management. Talks to the database directly, so it works
/// while the server is stopped.
pub async fn run_token_command(args: &[String]) -> Result<()> {
    let sub_cmd = args.get(2).map(String::as_str).unwrap_or("");
    let user = flag_value(args, 3, &["--user", "-u"]).filter(|u| !u.trim().is_empty());
    let Some(user) = user else {
        print_error("--user is required");
        usage();
        return Ok(());
    };

    match sub_cmd {
        "create" => {
            let name = flag_value(args, 3, &["--name", "-n"]).unwrap_or_else(|| "cli".to_string());
            let (_, store) = open_portal().await?;
            let (raw_token, record) = store.create_api_token(&user, name.trim()).await?;
            print_success(&format!(
                "API token '{}' created for user '{}' (id {}).",
                record.name, user, record.id
            ));
            println!("\n  {} {}\n", style("Token:").bold(), style(&raw_token).green().bold());
            println!("  Save this token now. It will not be shown again.");
            println!("  Use it with: Authorization: Bearer {}\n", raw_token);
        }
        "list" | "ls" => {
            let (_, store) = open_portal().await?;
            let tokens = store.list_api_tokens(&user).await?;
            if tokens.is_empty() {
                print_info(&format!("No API tokens for user '{}'.", user));
                return Ok(());
            }
            for token in tokens {
                println!(
                    "  {}  {}  {}",
                    style(&token.id).cyan(),
                    style(&token.name).bold(),
                    style(&token.created_at).dim()
                );
            }
        }
        "revoke" | "delete" | "rm" => {
            let Some(id) = flag_value(args, 3, &["--id"]) else {
                print_error("--id is required");
                usage();
                return Ok(());
            };
            let (_, store) = open_portal().await?;
            if store.delete_api_token(&user, &id).await? {
                print_success(&format!("Token {} revoked.", id));
            } else {
                print_error(&format!("Token {} not found for user '{}'.", id, user));
            }
        }
        _ => usage(),
    }
    Ok(())
}
