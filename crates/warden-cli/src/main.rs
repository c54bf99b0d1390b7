use std::path::PathBuf;

use clap::{Parser, Subcommand};

use warden_core::config::{self, Config};
use warden_core::keys::{self, KeyRegistry};

#[derive(Parser)]
#[command(name = "warden", about = "OpenID Connect authorization server")]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the HTTP server
    Serve,
    /// Check the config file and load the keystore
    Validate,
    /// Write a new keystore (RS256, PS256, ES256, ES384, ES512, RSA-OAEP)
    GenerateKeys {
        /// Output path for the keystore file
        #[arg(short, long, default_value = "keystore.json")]
        out: PathBuf,
        /// Keystore secret; accepts env:VAR
        #[arg(long, env = "WARDEN_KEYSTORE_SECRET")]
        secret: String,
        /// Distinguished name recorded in the keystore
        #[arg(long)]
        dn: Option<String>,
    },
    /// Print the public JWKS
    Jwks,
}

fn load(config: &Config) -> anyhow::Result<KeyRegistry> {
    let registry = KeyRegistry::from_config(&config.keystore)?;
    tracing::info!(
        keys = registry.store().len(),
        algorithms = ?registry.signing_algorithms(),
        "key registry ready"
    );
    Ok(registry)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warden=info,tower_http=info")),
        )
        .init();

    let cli = Cli::parse();

    // generate-keys doesn't need config
    if let Command::GenerateKeys { out, secret, dn } = &cli.command {
        let secret = config::ConfigValue::Literal(secret.clone()).resolve()?;
        let store = keys::generate_keystore(out, &secret, dn.as_deref())?;
        println!("Keystore written to {}", out.display());
        for entry in store.entries() {
            println!("  {:<24} {}", entry.kid, entry.alg);
        }
        return Ok(());
    }

    let config = config::resolve_config(cli.config.as_deref())?;

    match cli.command {
        Command::Serve => {
            let registry = load(&config)?;
            warden_api::serve(config, registry).await?;
        }
        Command::Validate => {
            tracing::info!(clients = config.clients.len(), "config loaded successfully");
            load(&config)?;
        }
        Command::Jwks => {
            let registry = load(&config)?;
            println!("{}", serde_json::to_string_pretty(&registry.jwks())?);
        }
        Command::GenerateKeys { .. } => unreachable!(),
    }

    Ok(())
}
