mod envelope;

use std::io::Read;

use anyhow::{Context, Result};
use burnbox_server::handlers::{CreateResponse, SharedSecretBody, SharedSecretItem};
use clap::{Parser, Subcommand};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use tracing::debug;
use tracing_subscriber::EnvFilter;
use zeroize::Zeroizing;

use crate::envelope::EnvelopeError;

/// Password prompts offered by `open` before giving up.
const OPEN_ATTEMPTS: usize = 3;

// ── CLI definition ─────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "burnbox",
    about = "burnbox — expiring, password-sealed secret sharing",
    version
)]
struct Cli {
    /// burnbox server URL
    #[arg(long, env = "BURNBOX_SERVER", default_value = "http://localhost:8080")]
    server: String,

    /// Owner token for create/list/expire ($BURNBOX_TOKEN)
    #[arg(long, env = "BURNBOX_TOKEN", hide_env_values = true)]
    token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the burnbox HTTP server
    Serve {
        /// Port to listen on
        #[arg(long, env = "BURNBOX_PORT", default_value = "8080")]
        port: u16,
        /// Host to bind
        #[arg(long, env = "BURNBOX_HOST", default_value = "0.0.0.0")]
        host: String,
    },
    /// Seal a secret locally and upload the envelope
    Share {
        /// Secret text, or `-` to read it from stdin
        text: String,
        /// Lifetime, e.g. 30m, 1h, 7d
        #[arg(long, default_value = "1h")]
        ttl: String,
        /// Destroy the secret after its first read
        #[arg(long)]
        single_use: bool,
        /// Password (prompted when omitted)
        #[arg(long, env = "BURNBOX_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
    /// Fetch a shared secret and decrypt it locally
    Open {
        /// Secret id or share URL
        target: String,
        /// Password (prompted when omitted)
        #[arg(long, env = "BURNBOX_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
    /// List the secrets you have shared
    List,
    /// Expire one of your secrets immediately
    Expire {
        /// Secret id or share URL
        target: String,
    },
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = match cli.command {
        Commands::Serve { .. } => "info",
        _ => "warn",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("BURNBOX_LOG_LEVEL")
                .unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Serve { port, host } => cmd_serve(host, port).await,

        Commands::Share {
            text,
            ttl,
            single_use,
            password,
        } => {
            let token = require_token(cli.token.as_deref())?;
            cmd_share(&cli.server, token, &text, &ttl, single_use, password).await
        }

        Commands::Open { target, password } => cmd_open(&cli.server, &target, password).await,

        Commands::List => {
            let token = require_token(cli.token.as_deref())?;
            cmd_list(&cli.server, token).await
        }

        Commands::Expire { target } => {
            let token = require_token(cli.token.as_deref())?;
            cmd_expire(&cli.server, token, &target).await
        }
    }
}

// ── Command implementations ───────────────────────────────────────────────────

async fn cmd_serve(host: String, port: u16) -> Result<()> {
    let cfg = burnbox_server::ServerConfig {
        host,
        port,
        ..Default::default()
    };
    burnbox_server::run(cfg).await
}

async fn cmd_share(
    server: &str,
    token: &str,
    text: &str,
    ttl: &str,
    single_use: bool,
    password: Option<String>,
) -> Result<()> {
    let ttl_seconds = parse_duration(ttl)?;
    if ttl_seconds == 0 {
        anyhow::bail!("--ttl must be at least one second");
    }

    let plaintext = if text == "-" {
        let mut buf = Zeroizing::new(String::new());
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("read secret from stdin")?;
        Zeroizing::new(buf.trim_end_matches(['\r', '\n']).to_owned())
    } else {
        Zeroizing::new(text.to_owned())
    };
    if plaintext.is_empty() {
        anyhow::bail!("refusing to share an empty secret");
    }

    let password = match password {
        Some(p) => Zeroizing::new(p),
        None => prompt_new_password()?,
    };

    let blob = envelope::seal(&plaintext, &password)?;

    let body = serde_json::json!({
        "data": blob,
        "expires_at": unix_now() + ttl_seconds as i64,
        "single_use": single_use,
    });

    let resp = Client::new()
        .post(endpoint(server, "secret-sharing"))
        .bearer_auth(token)
        .json(&body)
        .send()
        .await
        .context("HTTP request failed")?;

    if !resp.status().is_success() {
        return Err(server_error(resp).await);
    }
    let created: CreateResponse = resp.json().await.context("parse create response")?;

    debug!(id = %created.id, "shared secret created");
    println!("{}", endpoint(server, &format!("secret-sharing/{}", created.id)));
    let burn = if single_use { ", single use" } else { "" };
    eprintln!("expires in {}{burn}", format_duration(ttl_seconds));
    Ok(())
}

async fn cmd_open(server: &str, target: &str, password: Option<String>) -> Result<()> {
    let id = secret_id(target)?;

    // A single GET: a single-use secret is gone once this returns, so the
    // request is never retried.
    let resp = Client::new()
        .get(endpoint(server, &format!("secret-sharing/{id}")))
        .send()
        .await
        .context("HTTP request failed")?;

    match resp.status() {
        StatusCode::NOT_FOUND => anyhow::bail!("secret not found or expired"),
        s if !s.is_success() => return Err(server_error(resp).await),
        _ => {}
    }
    let secret: SharedSecretBody = resp.json().await.context("parse secret")?;
    if secret.single_use {
        eprintln!("note: this secret was single use and has now been destroyed on the server");
    }

    let plaintext = match password {
        Some(p) => envelope::open(&secret.data, &p).map_err(decrypt_failure)?,
        None => open_interactively(&secret.data)?,
    };
    println!("{}", plaintext.as_str());
    Ok(())
}

async fn cmd_list(server: &str, token: &str) -> Result<()> {
    let resp = Client::new()
        .get(endpoint(server, "secret-sharing"))
        .bearer_auth(token)
        .send()
        .await
        .context("HTTP request failed")?;

    if !resp.status().is_success() {
        return Err(server_error(resp).await);
    }
    let items: Vec<SharedSecretItem> = resp.json().await.context("parse secrets list")?;

    if items.is_empty() {
        println!("(no shared secrets)");
        return Ok(());
    }
    let now = unix_now();
    for item in &items {
        println!("  {}", describe(item, now));
    }
    Ok(())
}

async fn cmd_expire(server: &str, token: &str, target: &str) -> Result<()> {
    let id = secret_id(target)?;
    let resp = Client::new()
        .patch(endpoint(server, &format!("secret-sharing/expire/{id}")))
        .bearer_auth(token)
        .send()
        .await
        .context("HTTP request failed")?;

    if !resp.status().is_success() {
        return Err(server_error(resp).await);
    }
    println!("✓ expired {id}");
    Ok(())
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn require_token(token: Option<&str>) -> Result<&str> {
    token.context("--token / BURNBOX_TOKEN is required for this command")
}

fn unix_now() -> i64 {
    burnbox_server::store::unix_now()
}

fn endpoint(server: &str, path: &str) -> String {
    format!("{}/{}", server.trim_end_matches('/'), path)
}

/// Accept either a bare id or a share URL ending in the id.
fn secret_id(target: &str) -> Result<uuid::Uuid> {
    let last = target
        .trim()
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default();
    uuid::Uuid::parse_str(last).with_context(|| format!("not a secret id or share URL: {target}"))
}

fn prompt_new_password() -> Result<Zeroizing<String>> {
    let first = Zeroizing::new(rpassword::prompt_password("Password: ").context("read password")?);
    if first.is_empty() {
        anyhow::bail!("password must not be empty");
    }
    let second =
        Zeroizing::new(rpassword::prompt_password("Confirm password: ").context("read password")?);
    if *first != *second {
        anyhow::bail!("passwords do not match");
    }
    Ok(first)
}

/// The envelope is already in hand, so a mistyped password costs nothing.
fn open_interactively(blob: &str) -> Result<Zeroizing<String>> {
    for attempt in 1..=OPEN_ATTEMPTS {
        let password =
            Zeroizing::new(rpassword::prompt_password("Password: ").context("read password")?);
        match envelope::open(blob, &password) {
            Ok(plaintext) => return Ok(plaintext),
            Err(EnvelopeError::Decryption) if attempt < OPEN_ATTEMPTS => {
                eprintln!("could not decrypt secret, try again");
            }
            Err(e) => return Err(decrypt_failure(e)),
        }
    }
    Err(decrypt_failure(EnvelopeError::Decryption))
}

fn decrypt_failure(e: EnvelopeError) -> anyhow::Error {
    anyhow::anyhow!("{e}: wrong password or corrupted data")
}

async fn server_error(resp: reqwest::Response) -> anyhow::Error {
    let status = resp.status();
    let json: Value = resp.json().await.unwrap_or_default();
    anyhow::anyhow!(
        "server returned {status}: {}",
        json["error"].as_str().unwrap_or("")
    )
}

fn describe(item: &SharedSecretItem, now: i64) -> String {
    let status = if item.expired {
        "expired".to_string()
    } else {
        let secs_left = (item.expires_at - now).max(0) as u64;
        format!("live, expires in {}", format_duration(secs_left))
    };
    let single_use = if item.single_use { " — single use" } else { "" };
    format!("{} — {status}{single_use}", item.id)
}

/// Parse human duration strings like "1h", "30m", "7d", "5s" into seconds.
fn parse_duration(s: &str) -> Result<u64> {
    let d: humantime::Duration = s
        .parse()
        .with_context(|| format!("invalid duration: {s}"))?;
    Ok(d.as_secs())
}

fn format_duration(secs: u64) -> String {
    if secs >= 86400 {
        format!("{}d", secs / 86400)
    } else if secs >= 3600 {
        format!("{}h", secs / 3600)
    } else if secs >= 60 {
        format!("{}m", secs / 60)
    } else {
        format!("{secs}s")
    }
}
