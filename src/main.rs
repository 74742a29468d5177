//! roamterm - remote terminal client for the RoamingProxy control panel
//!
//! Opens an interactive shell on a provisioned server through the panel's
//! terminal websocket, using the local terminal for display and input.
//!
//! # Quick Start
//!
//! ```text
//! roamterm save-token <TOKEN>        # store the panel access token
//! roamterm connect <SERVER_ID>       # open a terminal on a server
//! ```
//!
//! # Keybindings (Ctrl+B prefix)
//!
//! | Key | Action |
//! |-----|--------|
//! | d | Detach and quit |
//! | r | Reconnect |
//! | ] | Paste clipboard |
//! | Ctrl+B | Send a literal Ctrl+B |

mod api;
mod app;
mod auth;
mod bridge;
mod config;
mod ui;

use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::api::{short_label, ApiError, PanelClient};
use crate::app::{PageOptions, PageState, TerminalPage};
use crate::auth::{resolve_token, TokenStore};
use crate::bridge::{BridgeOptions, WsConnector};
use crate::config::{config_dir, Config};
use crate::ui::{ModeTracker, TerminalFactory, TerminalGuard};

/// Remote terminal for RoamingProxy servers
#[derive(Parser)]
#[command(name = "roamterm")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Configuration file (default: ~/.roamterm/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// API base URL, overrides the config file
    #[arg(long, global = true, env = "ROAMTERM_API_URL")]
    api_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Open an interactive terminal on a server
    Connect {
        /// Server id
        server_id: String,

        /// Access token, overrides the stored one
        #[arg(long, env = "ROAMTERM_TOKEN", hide_env_values = true)]
        token: Option<String>,

        /// Skip the server lookup and connect straight away
        #[arg(long)]
        no_lookup: bool,
    },

    /// Store the access token used by `connect`
    SaveToken {
        token: String,
    },
}

fn init_logging() {
    let log_path = config_dir()
        .map(|dir| dir.join("roamterm.log"))
        .unwrap_or_else(|| PathBuf::from("roamterm.log"));

    // Open log file (append mode); stdout belongs to the remote shell
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .ok();

    if let Some(file) = log_file {
        let filter = EnvFilter::try_from_env("ROAMTERM_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::sync::Mutex::new(file))
            .with_ansi(false)
            .try_init();
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load(),
    };
    if let Some(url) = &cli.api_url {
        config.api_url = url.clone();
    }
    Ok(config)
}

async fn connect(config: Config, server_id: String, token: Option<String>, no_lookup: bool) -> anyhow::Result<()> {
    let store = TokenStore::default_location()?;
    let token = resolve_token(token, &store)?;
    let api_url = config.api_url()?;
    let panel_url = config.panel_url()?;

    let label = if no_lookup {
        short_label(&server_id)
    } else {
        if config.terminal.set_title {
            ui::terminal::set_title(&PageState::Loading.title(&short_label(&server_id)));
        }
        eprintln!("Loading server info...");
        let client = PanelClient::new(api_url.clone(), &config.servers_path, &token);
        match client.server(&server_id).await {
            Ok(info) => {
                info!("Server {} is {}", info.id, info.status);
                info.label()
            }
            Err(ApiError::NotFound) => anyhow::bail!("Server not found: {}", server_id),
            Err(e) => return Err(e).context("server lookup failed"),
        }
    };

    let bridge_options = BridgeOptions {
        api_url,
        terminal_path: config.terminal_path.clone(),
        sync_size_on_open: config.terminal.sync_size_on_open,
    };
    let options = PageOptions {
        server_id,
        token,
        label,
        panel_url,
        prefix: config.prefix(),
        set_title: config.terminal.set_title,
    };

    let modes = Rc::new(RefCell::new(ModeTracker::default()));
    let mut guard = TerminalGuard::enter().context("failed to enter raw mode")?;

    let (input_tx, input_rx) = mpsc::unbounded_channel();
    ui::terminal::spawn_input_reader(input_tx).context("failed to start input reader")?;

    let mut page = TerminalPage::new(
        WsConnector,
        TerminalFactory::new(modes.clone()),
        bridge_options,
        options,
        modes,
    );
    let result = page.run(input_rx).await;
    drop(page);
    guard.leave();
    result
}

fn save_token(token: &str) -> anyhow::Result<()> {
    let store = TokenStore::default_location()?;
    store.save(token)?;
    eprintln!("Token saved to {}", store.path().display());
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();
    init_logging();
    info!("roamterm {} starting", env!("CARGO_PKG_VERSION"));

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Connect {
            server_id,
            token,
            no_lookup,
        } => connect(config, server_id, token, no_lookup).await,
        Commands::SaveToken { token } => save_token(&token),
    };

    if let Err(e) = result {
        error!("{:#}", e);
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
    info!("roamterm exiting");
}
