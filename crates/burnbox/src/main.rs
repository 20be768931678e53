use std::io::Read;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use burnbox_server::{
    store::crypto::{self, HashAlgorithm, HashParams},
    ServerConfig, VaultConfig,
};
use clap::{Parser, Subcommand};
use reqwest::Client;
use serde_json::Value;
use tracing_subscriber::EnvFilter;

// ── CLI definition ─────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "burnbox", about = "burnbox: one-shot passphrase-protected secrets", version)]
struct Cli {
    /// burnbox server URL
    #[arg(long, env = "BURNBOX_SERVER", default_value = "http://localhost:8080")]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the burnbox HTTP server
    Serve(ServeArgs),
    /// Store a secret and print its one-time token
    Create {
        /// Passphrase required to open the secret
        #[arg(long, short, env = "BURNBOX_PASSPHRASE", hide_env_values = true)]
        passphrase: String,
        /// Secret value; read from stdin when omitted
        secret: Option<String>,
    },
    /// Exchange a token and passphrase for the secret (burns the token)
    Open {
        /// Token printed by `create`
        token: String,
        /// Passphrase the secret was stored with
        #[arg(long, short, env = "BURNBOX_PASSPHRASE", hide_env_values = true)]
        passphrase: String,
    },
    /// Print a fresh base64 master key for BURNBOX_MASTER_KEY
    Keygen,
}

#[derive(clap::Args)]
struct ServeArgs {
    /// Port to listen on
    #[arg(long, env = "BURNBOX_PORT", default_value = "8080")]
    port: u16,
    /// Host to bind
    #[arg(long, env = "BURNBOX_HOST", default_value = "0.0.0.0")]
    host: String,
    /// Directory holding burnbox.db (default: platform data dir)
    #[arg(long, env = "BURNBOX_DATA_DIR")]
    data_dir: Option<PathBuf>,
    /// Lifetime of a secret, e.g. 5m, 1h, 7d
    #[arg(long, env = "BURNBOX_TTL", default_value = "7d")]
    ttl: String,
    /// Passphrase hash algorithm: pbkdf2-sha256, pbkdf2-sha512 or argon2id
    #[arg(long, env = "BURNBOX_HASH_ALGORITHM", default_value = "pbkdf2-sha256")]
    hash_algorithm: String,
    /// PBKDF2 rounds, or Argon2 time cost
    #[arg(long, env = "BURNBOX_HASH_ITERATIONS")]
    hash_iterations: Option<u32>,
    /// Argon2 memory cost in KiB
    #[arg(long, env = "BURNBOX_HASH_MEMORY_KIB", default_value = "19456")]
    hash_memory_kib: u32,
    /// Passphrase hash length in bytes
    #[arg(long, env = "BURNBOX_HASH_LEN", default_value = "32")]
    hash_len: usize,
    /// Per-secret salt length in bytes
    #[arg(long, env = "BURNBOX_SALT_SIZE", default_value = "32")]
    salt_size: usize,
    /// Largest accepted secret in bytes
    #[arg(long, env = "BURNBOX_MAX_SECRET_BYTES", default_value = "65536")]
    max_secret_bytes: usize,
    /// How often expired secrets are swept, e.g. 30s, 5m
    #[arg(long, env = "BURNBOX_SWEEP_INTERVAL", default_value = "60s")]
    sweep_interval: String,
    /// Comma-separated allowed CORS origins (default: any)
    #[arg(long, env = "BURNBOX_CORS_ORIGINS")]
    cors_origins: Option<String>,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let default_level = match cli.command {
        Commands::Serve(_) => "info",
        _ => "warn",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("BURNBOX_LOG_LEVEL")
                .unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    match cli.command {
        Commands::Serve(args) => cmd_serve(args).await,

        Commands::Create { passphrase, secret } => {
            let secret = match secret {
                Some(s) => s,
                None => read_stdin()?,
            };
            cmd_create(&cli.server, &passphrase, &secret).await
        }

        Commands::Open { token, passphrase } => cmd_open(&cli.server, &token, &passphrase).await,

        Commands::Keygen => {
            println!("{}", crypto::encode_key(&crypto::generate_key()));
            Ok(())
        }
    }
}

// ── Command implementations ───────────────────────────────────────────────────

async fn cmd_serve(args: ServeArgs) -> Result<()> {
    let master_key = burnbox_server::resolve_master_key()?;
    let vault = vault_config(&args)?;

    let cfg = ServerConfig {
        host: args.host,
        port: args.port,
        master_key,
        data_dir: args.data_dir,
        vault,
        sweep_interval: parse_duration(&args.sweep_interval)?,
        cors_origins: args.cors_origins,
        // JSON framing and escaping on top of the two string fields.
        max_body_bytes: args.max_secret_bytes.saturating_mul(2).saturating_add(16 * 1024),
    };

    burnbox_server::run(cfg).await
}

fn vault_config(args: &ServeArgs) -> Result<VaultConfig> {
    let algorithm: HashAlgorithm = args.hash_algorithm.parse()?;
    let defaults = HashParams::default();
    let iterations = args.hash_iterations.unwrap_or(match algorithm {
        HashAlgorithm::Argon2id => 2,
        _ => defaults.iterations,
    });

    let cfg = VaultConfig {
        hash: HashParams {
            algorithm,
            iterations,
            memory_kib: args.hash_memory_kib,
            hash_len: args.hash_len,
        },
        salt_len: args.salt_size,
        ttl: parse_duration(&args.ttl)?,
        max_secret_bytes: args.max_secret_bytes,
    };
    cfg.validate()?;
    Ok(cfg)
}

async fn cmd_create(server: &str, passphrase: &str, secret: &str) -> Result<()> {
    let client = Client::new();
    let resp = client
        .post(format!("{}/secrets", server.trim_end_matches('/')))
        .json(&serde_json::json!({ "passphrase": passphrase, "secret": secret }))
        .send()
        .await
        .context("HTTP request failed")?;

    let status = resp.status();
    let json: Value = resp.json().await.unwrap_or_default();
    if !status.is_success() {
        anyhow::bail!("server returned {status}: {}", error_message(&json));
    }

    let token = json["token"].as_str().context("response has no token")?;
    println!("{token}");
    if let Some(exp) = json["expires_at"].as_i64() {
        let secs_left = exp - now();
        if secs_left > 0 {
            eprintln!("expires in {}", format_duration(secs_left as u64));
        }
    }
    Ok(())
}

async fn cmd_open(server: &str, token: &str, passphrase: &str) -> Result<()> {
    let client = Client::new();
    let resp = client
        .post(format!("{}/secrets/{}", server.trim_end_matches('/'), token))
        .json(&serde_json::json!({ "passphrase": passphrase }))
        .send()
        .await
        .context("HTTP request failed")?;

    let status = resp.status();
    let json: Value = resp.json().await.unwrap_or_default();
    if status.is_success() {
        let secret = json["secret"].as_str().context("response has no secret")?;
        println!("{secret}");
        Ok(())
    } else {
        anyhow::bail!("{}", error_message(&json))
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn read_stdin() -> Result<String> {
    let mut buf = String::new();
    std::io::stdin()
        .read_to_string(&mut buf)
        .context("read secret from stdin")?;
    let trimmed = buf.strip_suffix('\n').unwrap_or(&buf);
    let trimmed = trimmed.strip_suffix('\r').unwrap_or(trimmed);
    Ok(trimmed.to_owned())
}

fn error_message(json: &Value) -> &str {
    json["error"].as_str().unwrap_or("unknown error")
}

/// Parse human duration strings like "1h", "30m", "7d", "5s".
fn parse_duration(s: &str) -> Result<Duration> {
    let d: humantime::Duration = s
        .parse()
        .with_context(|| format!("invalid duration: {s}"))?;
    Ok(d.into())
}

fn format_duration(secs: u64) -> String {
    if secs >= 86400 {
        format!("{}d", secs / 86400)
    } else if secs >= 3600 {
        format!("{}h", secs / 3600)
    } else if secs >= 60 {
        format!("{}m", secs / 60)
    } else {
        format!("{}s", secs)
    }
}

fn now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}
