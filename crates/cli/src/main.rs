//! The courant service binary: webhook intake, normalizer worker, tool
//! gateway, and the credential-expiry notifier, all on one port.

use std::{sync::Arc, time::Duration};

use {
    anyhow::{Context, Result},
    clap::{Parser, Subcommand},
    tracing::info,
    tracing_subscriber::EnvFilter,
};

use {
    courant_gateway::{
        ApiKeyStore, Gateway, RateLimitConfig, Scope,
        routes::{AppState, build_app},
    },
    courant_ingest::{InMemoryMediaSink, Ingestor, MediaSink, Normalizer, queue},
    courant_notifier::{LogAlertSink, Notifier},
    courant_provider::{HttpProviderClient, ProviderClient, http::DEFAULT_BASE_URL},
    courant_store::{AccountStatus, NewAccount, Store},
};

#[derive(Parser)]
#[command(name = "courant", about = "Courant — messaging provider bridge")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Address to bind to.
    #[arg(long, global = true, env = "COURANT_BIND", default_value = "127.0.0.1")]
    bind: String,

    /// Port to listen on.
    #[arg(long, global = true, env = "COURANT_PORT", default_value_t = 8787)]
    port: u16,

    /// SQLite database path.
    #[arg(long, global = true, env = "COURANT_DB", default_value = "courant.db")]
    database: String,

    /// Shared secret for webhook signature verification.
    #[arg(long, global = true, env = "COURANT_APP_SECRET")]
    app_secret: Option<String>,

    /// Base URL of the provider REST API.
    #[arg(long, global = true, env = "COURANT_PROVIDER_URL")]
    provider_url: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the bridge server (default when no subcommand is given).
    Serve,
    /// Register a provisioned account so it can ingest and send.
    AddAccount {
        #[arg(long)]
        user_id: String,
        #[arg(long)]
        business_id: String,
        #[arg(long)]
        phone_id: String,
        #[arg(long)]
        phone: String,
        #[arg(long)]
        display_name: String,
        #[arg(long)]
        access_token: String,
        #[arg(long)]
        verify_token: String,
    },
    /// Create an API key for an account. Prints the plaintext once.
    CreateKey {
        #[arg(long)]
        account_id: String,
        /// Comma-separated subset of read,write,send.
        #[arg(long, default_value = "read")]
        scopes: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let mut cli = Cli::parse();
    let db_url = format!("sqlite:{}?mode=rwc", cli.database);
    let store = Store::connect(&db_url).await.context("failed to open database")?;
    ApiKeyStore::init(store.pool()).await?;
    let keys = ApiKeyStore::new(store.pool().clone());

    match cli.command.take() {
        None | Some(Commands::Serve) => serve(cli, store, keys).await,
        Some(Commands::AddAccount {
            user_id,
            business_id,
            phone_id,
            phone,
            display_name,
            access_token,
            verify_token,
        }) => {
            let account = store
                .insert_account(NewAccount {
                    user_id,
                    business_id,
                    phone_id: Some(phone_id),
                    phone,
                    display_name,
                    access_token,
                    verify_token,
                    status: AccountStatus::Active,
                })
                .await?;
            println!("account created: {}", account.id);
            Ok(())
        },
        Some(Commands::CreateKey { account_id, scopes }) => {
            let scopes = scopes
                .split(',')
                .map(|s| Scope::parse(s.trim()).with_context(|| format!("unknown scope: {s}")))
                .collect::<Result<Vec<_>>>()?;
            let (meta, plaintext) = keys.create(&account_id, &scopes, None).await?;
            println!("api key created: {} (prefix {})", meta.id, meta.prefix);
            println!("plaintext (shown once): {plaintext}");
            Ok(())
        },
    }
}

async fn serve(cli: Cli, store: Store, keys: ApiKeyStore) -> Result<()> {
    let app_secret = cli
        .app_secret
        .context("COURANT_APP_SECRET is required to verify webhooks")?;

    let provider: Arc<dyn ProviderClient> = Arc::new(HttpProviderClient::new(
        cli.provider_url.as_deref().unwrap_or(DEFAULT_BASE_URL),
    ));
    // Blob storage is an external collaborator; the in-memory sink stands
    // in until one is wired.
    let media: Arc<dyn MediaSink> = Arc::new(InMemoryMediaSink::new());

    let (tx, rx) = queue();
    let ingestor = Arc::new(Ingestor::new(store.clone(), app_secret, tx.clone()));
    let normalizer = Normalizer::new(
        store.clone(),
        Arc::clone(&provider),
        Arc::clone(&media),
        tx,
    );
    normalizer.recover().await?;
    tokio::spawn(normalizer.run(rx));

    let notifier = Notifier::new(
        store.clone(),
        Arc::new(LogAlertSink),
        Duration::from_secs(300),
    );
    tokio::spawn(notifier.run());

    let gateway = Arc::new(Gateway::new(
        store.clone(),
        keys,
        provider,
        media,
        RateLimitConfig::default(),
    ));

    let app = build_app(AppState {
        gateway,
        ingestor,
        store,
    });

    let addr = format!("{}:{}", cli.bind, cli.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    info!("courant v{} listening on http://{addr}", env!("CARGO_PKG_VERSION"));
    info!("database: {}", cli.database);

    axum::serve(listener, app).await?;
    Ok(())
}
