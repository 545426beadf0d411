//! # copydesk
//!
//! Command-line shell over the session client: account login bookkeeping,
//! one-shot API calls, copy trading, and a long-running watch session.

#![deny(unsafe_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use copydesk_client::{ConnectionRegistry, CopyTrader, RequestSender, SessionContext, SubscriptionEntry, WsTransport};
use copydesk_core::auth::login_url;
use copydesk_core::storage::keys;
use copydesk_core::{AuthState, FileStore, KeyValueStore, RequestName};
use copydesk_settings::CopydeskSettings;
use serde_json::{Value, json};

/// Copy-trading desk for the trading API.
#[derive(Parser, Debug)]
#[command(name = "copydesk", about = "Copy-trading desk for the trading API")]
struct Cli {
    /// Settings file (default `~/.copydesk/settings.json`).
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Key-value store file (overrides `storage.path`).
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Make an account active, storing its token when given.
    Login {
        /// Login id to activate.
        #[arg(long)]
        loginid: String,
        /// API token for the account. Without it the OAuth URL is printed.
        #[arg(long)]
        token: Option<String>,
    },
    /// Forget the active account and its mirrored token.
    Logout,
    /// Show the environment and socket URL for the active account.
    Env,
    /// Refresh and print the cached account snapshot.
    Account,
    /// Round-trip a ping.
    Ping,
    /// Start or stop copying a trader.
    Copy {
        #[command(subcommand)]
        action: CopyAction,
    },
    /// Run a session with its watchers until Ctrl-C.
    Watch {
        /// Symbols to stream ticks for.
        #[arg(long = "ticks")]
        ticks: Vec<String>,
    },
}

#[derive(Subcommand, Debug)]
enum CopyAction {
    /// Start copying.
    Start {
        /// Trader's read token.
        #[arg(long)]
        trader_token: String,
    },
    /// Stop copying.
    Stop {
        /// Trader's read token.
        #[arg(long)]
        trader_token: String,
    },
}

fn load_settings(path: Option<&Path>, store: Option<&Path>) -> Result<CopydeskSettings> {
    let path = path.map_or_else(copydesk_settings::settings_path, Path::to_path_buf);
    let mut settings = copydesk_settings::load_settings_from_path(&path)
        .with_context(|| format!("Failed to load settings from {}", path.display()))?;
    if let Some(store) = store {
        settings.storage.path = Some(store.to_string_lossy().into_owned());
    }
    Ok(settings)
}

fn open_store(path: &Path) -> Result<Arc<FileStore>> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    let store = FileStore::open(path)
        .with_context(|| format!("Failed to open store: {}", path.display()))?;
    Ok(Arc::new(store))
}

fn login(auth: &AuthState, settings: &CopydeskSettings, loginid: &str, token: Option<&str>) -> Result<String> {
    auth.set_active_loginid(loginid)
        .context("Failed to set active login id")?;
    match token {
        Some(token) => {
            auth.store_auth_token(token, Some(loginid))
                .context("Failed to store token")?;
            Ok(format!("{loginid} is active"))
        }
        None => {
            let store = auth.store().as_ref();
            let language = store
                .get_non_empty(keys::LANGUAGE)
                .unwrap_or_else(|| settings.api.default_language.clone());
            let url = login_url(store, settings.api.app_id, &language, &settings.api.brand);
            Ok(format!("{loginid} is active, sign in at {url}"))
        }
    }
}

fn logout(auth: &AuthState) -> Result<String> {
    auth.remove_auth_token().context("Failed to remove token")?;
    auth.clear_active_loginid()
        .context("Failed to clear active login id")?;
    Ok("logged out".to_string())
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn watch(ctx: &Arc<SessionContext>, symbols: &[String]) -> Result<()> {
    ctx.start();
    let result = follow_ticks(ctx, symbols).await;
    ctx.shutdown();
    result
}

async fn follow_ticks(ctx: &Arc<SessionContext>, symbols: &[String]) -> Result<()> {
    let mut streams = Vec::new();
    for symbol in symbols {
        let entry = ctx
            .subscribe(RequestName::Ticks, Some(&tick_payload(symbol)))
            .await
            .with_context(|| format!("Failed to subscribe to {symbol}"))?;
        streams.push(tokio::spawn(follow_symbol(
            Arc::clone(ctx),
            symbol.clone(),
            entry,
            |tick: &Value| println!("{}", tick["tick"]),
        )));
    }

    let signal = tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c");
    tracing::info!("Shutting down...");
    for stream in streams {
        stream.abort();
    }
    signal
}

fn tick_payload(symbol: &str) -> Value {
    json!({ "ticks": symbol })
}

/// Emit every tick for `symbol`, subscribing again whenever the stream ends.
///
/// Streams end when their connection drops. The session reconnects on its
/// own, so this only has to retry until a subscribe lands on the new socket.
async fn follow_symbol<F>(ctx: Arc<SessionContext>, symbol: String, mut entry: SubscriptionEntry, emit: F)
where
    F: Fn(&Value) + Send + 'static,
{
    let retry = ctx.settings().session.reconnect_delay();
    loop {
        while let Some(message) = entry.handle.next().await {
            match message {
                Ok(tick) => emit(&tick),
                Err(e) => tracing::warn!(%symbol, error = %e, "tick stream error"),
            }
        }
        tracing::debug!(%symbol, "tick stream ended, resubscribing");
        loop {
            tokio::time::sleep(retry).await;
            match ctx.subscribe(RequestName::Ticks, Some(&tick_payload(&symbol))).await {
                Ok(fresh) => {
                    entry = fresh;
                    break;
                }
                Err(e) => tracing::warn!(%symbol, error = %e, "resubscribe failed"),
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let settings = load_settings(args.settings.as_deref(), args.store.as_deref())?;
    let _ = copydesk_core::logging::init_logging(&settings.logging.level, settings.logging.json);
    copydesk_settings::init_settings(settings);
    let settings = copydesk_settings::get_settings();

    let store = open_store(&copydesk_settings::store_path(&settings))?;
    let auth = Arc::new(AuthState::new(store as Arc<dyn KeyValueStore>));

    let registry = Arc::new(ConnectionRegistry::new(Arc::new(WsTransport)));
    let ctx = SessionContext::new(Arc::clone(&settings), Arc::clone(&auth), registry);

    match args.command {
        Command::Login { loginid, token } => {
            println!("{}", login(&auth, &settings, &loginid, token.as_deref())?);
        }
        Command::Logout => println!("{}", logout(&auth)?),
        Command::Env => {
            println!("environment: {}", ctx.environment());
            println!("url: {}", ctx.socket_url());
        }
        Command::Account => {
            let _ = ctx.initialize();
            let info = ctx.refresh_account_snapshot().await;
            print_json(&info)?;
            ctx.shutdown();
        }
        Command::Ping => {
            let _ = ctx.initialize();
            let reply = ctx
                .send(RequestName::Ping, None)
                .await
                .context("Ping failed")?;
            print_json(&reply["ping"])?;
            ctx.shutdown();
        }
        Command::Copy { action } => {
            let _ = ctx.initialize();
            let trader = CopyTrader::new(Arc::clone(&ctx) as Arc<dyn RequestSender>, Arc::clone(&auth));
            let result = match action {
                CopyAction::Start { trader_token } => trader.start(&trader_token).await,
                CopyAction::Stop { trader_token } => trader.stop(&trader_token).await,
            };
            ctx.shutdown();
            let response = result.context("Copy trading request failed")?;
            print_json(&response)?;
        }
        Command::Watch { ticks } => watch(&ctx, &ticks).await?,
    }
    Ok(())
}
