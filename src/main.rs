use anyhow::{Context, Result};
use ledgerlink::{config::Config, server, server::AppState, store};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let command = args.get(1).map(String::as_str).unwrap_or("serve");

    let config = Config::load()?;

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.server.log_level)),
        )
        .init();

    config.validate();

    match command {
        "serve" => {
            info!("🚀 ledgerlink v{}", ledgerlink::VERSION);
            info!("  HTTP: {}", config.server.bind);
            info!("  Credential store: {}", config.database.url);
            info!(
                "  Rate limit policy: {} attempts, {}s delay",
                config.retry.max_attempts, config.retry.delay_secs
            );

            server::run(config).await?;
        }

        "status" => {
            let store = store::open(&config.database).context("Failed to open credential store")?;

            println!("\n🔐 QuickBooks Credential Status");
            println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n");

            match store.current().await? {
                Some(credential) => {
                    println!("   Credential id: {}", credential.id);
                    println!("   Realm: {}", credential.realm_id);
                    println!("   Last updated: {}", credential.updated_at);

                    if credential.is_expired() {
                        println!("⚠️  Access token expired at {} (refreshed on next call)", credential.expires_at);
                    } else {
                        let remaining = credential.remaining();
                        println!(
                            "✅ Access token valid until {} ({} minutes remaining)",
                            credential.expires_at,
                            remaining.num_minutes()
                        );
                    }
                }
                None => {
                    println!("❌ Not authenticated - visit /login to connect QuickBooks");
                }
            }
            println!();
        }

        "refresh" => {
            let state = AppState::from_config(config)?;
            let credential = state.auth.refresh_current().await?;

            println!("\n✅ Access token refreshed");
            println!("   Credential id: {}", credential.id);
            println!("   Expires: {}\n", credential.expires_at);
        }

        _ => {
            eprintln!("Unknown command: {}", command);
            eprintln!("Usage: ledgerlink [serve|status|refresh]");
            std::process::exit(1);
        }
    }

    Ok(())
}
