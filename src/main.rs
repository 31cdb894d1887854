//! pairsign - OpenID Connect provider with QR-paired cross-device login
//!
//! Runs the identity provider by default; `add-user` and `add-client`
//! write records into the credential store without starting a server.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use pairsign_core::Config;
use pairsign_oidc::{ClientRecord, Credentials, UserRecord};
use pairsign_server::sweep::spawn_maintenance;
use pairsign_server::{create_router, tls, AppState};
use pairsign_store::FileStore;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn, Level};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "pairsign")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    serve: ServeArgs,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(clap::Args, Debug)]
struct ServeArgs {
    /// Server port
    #[arg(short, long, global = true, default_value = "8443")]
    port: u16,

    /// Directory for credentials, signing keys, and TLS material
    /// (defaults to the platform config directory)
    #[arg(short, long, global = true)]
    data_dir: Option<PathBuf>,

    /// Issuer URL advertised in discovery documents and tokens
    /// (derived from request headers when unset)
    #[arg(long, global = true)]
    issuer: Option<String>,

    /// Disable HTTPS (not recommended - browsers restrict camera access
    /// for QR scanning to secure contexts)
    #[arg(long, global = true)]
    no_tls: bool,

    /// Path to TLS certificate file (PEM format)
    #[arg(long, global = true)]
    cert: Option<PathBuf>,

    /// Path to TLS private key file (PEM format)
    #[arg(long, global = true)]
    key: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the identity provider (the default when no subcommand is given)
    Serve,

    /// Create or replace a user record in the credential store
    AddUser {
        #[arg(long)]
        email: String,

        #[arg(long)]
        password: String,

        /// Stable subject identifier (random UUID when omitted)
        #[arg(long)]
        sub: Option<String>,
    },

    /// Create or replace an OAuth client record in the credential store
    AddClient {
        #[arg(long)]
        client_id: String,

        /// Allowed redirect URI (repeatable)
        #[arg(long, required = true)]
        redirect_uri: Vec<String>,

        /// Client secret (random UUID when omitted)
        #[arg(long)]
        secret: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.serve.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .compact()
        .with_env_filter(EnvFilter::from_default_env().add_directive(log_level.into()))
        .finish();
    tracing::subscriber::set_global_default(subscriber).ok();

    match cli.command {
        Some(Command::AddUser { email, password, sub }) => {
            add_user(&cli.serve, &email, &password, sub).await
        }
        Some(Command::AddClient { client_id, redirect_uri, secret }) => {
            add_client(&cli.serve, &client_id, redirect_uri, secret).await
        }
        Some(Command::Serve) | None => serve(cli.serve).await,
    }
}

fn build_config(args: &ServeArgs) -> Config {
    let mut config = Config::new().with_port(args.port);
    if let Some(dir) = &args.data_dir {
        config = config.with_data_dir(dir.clone());
    }
    if let Some(issuer) = &args.issuer {
        config = config.with_issuer(issuer.clone());
    }
    config
}

fn open_store(config: &Config) -> Result<(PathBuf, Arc<FileStore>)> {
    let data_dir = config
        .resolve_data_dir()
        .context("could not determine a data directory; pass --data-dir")?;
    let store = FileStore::new(data_dir.join("store"))
        .with_context(|| format!("failed to open credential store under {}", data_dir.display()))?;
    Ok((data_dir, Arc::new(store)))
}

async fn serve(args: ServeArgs) -> Result<()> {
    info!("pairsign v{}", env!("CARGO_PKG_VERSION"));

    let config = build_config(&args);
    let (data_dir, store) = open_store(&config)?;
    info!("Data directory: {}", data_dir.display());

    let state = Arc::new(AppState::new(config.clone(), store));

    // Generate or load the signing key up front so the first token
    // exchange does not pay the RSA generation cost.
    let signing_key = state.keys.signing_key().await?;
    info!("Signing key ready (kid {})", signing_key.kid);

    let router = create_router(state.clone());
    spawn_maintenance(state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.port));
    let scheme = if args.no_tls { "http" } else { "https" };

    info!("");
    info!("  Listening on {}://0.0.0.0:{}", scheme, config.port);
    match &config.issuer {
        Some(issuer) => info!("  Issuer: {}", issuer),
        None => info!("  Issuer: derived from request headers (set --issuer behind a proxy)"),
    }
    info!("");
    info!("Press Ctrl+C to stop.");

    if args.no_tls {
        warn!("TLS disabled; codes and credentials travel in cleartext");

        let shutdown = async {
            tokio::signal::ctrl_c().await.ok();
            info!("Shutting down...");
        };

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await?;
    } else {
        let (cert, key) = match (args.cert, args.key) {
            (Some(cert), Some(key)) => (cert, key),
            (None, None) => tls::load_or_generate_cert(&data_dir.join("tls"))?,
            _ => bail!("--cert and --key must be given together"),
        };
        let tls_config = tls::rustls_config(&cert, &key).await?;

        let handle = axum_server::Handle::new();
        let shutdown_handle = handle.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            info!("Shutting down...");
            shutdown_handle.graceful_shutdown(Some(Duration::from_secs(5)));
        });

        axum_server::bind_rustls(addr, tls_config)
            .handle(handle)
            .serve(router.into_make_service())
            .await?;
    }

    Ok(())
}

async fn add_user(args: &ServeArgs, email: &str, password: &str, sub: Option<String>) -> Result<()> {
    let config = build_config(args);
    let (_, store) = open_store(&config)?;
    let credentials = Credentials::new(store);

    let user = UserRecord::new(email, password, sub);
    credentials.save_user(&user).await?;

    println!("User {} saved (sub {})", user.email, user.sub);
    Ok(())
}

async fn add_client(
    args: &ServeArgs,
    client_id: &str,
    redirect_uris: Vec<String>,
    secret: Option<String>,
) -> Result<()> {
    let config = build_config(args);
    let (_, store) = open_store(&config)?;
    let credentials = Credentials::new(store);

    let secret = secret.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let client = ClientRecord::new(client_id, Some(secret.clone()), redirect_uris);
    credentials.save_client(&client).await?;

    println!("Client {} saved", client.client_id);
    println!("  client_secret: {}", secret);
    for uri in &client.redirect_uris {
        println!("  redirect_uri:  {}", uri);
    }
    Ok(())
}
