//! FAF ICE Session - headless game session driver.
//!
//! Connects to the lobby server, starts the ICE adapter when the server sends
//! `game_launch`, optionally launches the game and relays GPGNet traffic until
//! the game exits or Ctrl-C is pressed.

mod driver;

use anyhow::Result;
use clap::Parser;
use faf_ice_core::{HostedGame, Settings};
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "faf-ice-session")]
#[command(about = "Headless FAF game session with ICE adapter relay")]
struct Args {
    /// Settings file (JSON); defaults are used if omitted or missing
    #[arg(short, long)]
    settings: Option<PathBuf>,

    /// Local player id
    #[arg(long)]
    player_id: u32,

    /// Local player login
    #[arg(long)]
    login: String,

    /// Lobby server host (overrides settings)
    #[arg(long)]
    lobby_host: Option<String>,

    /// Lobby server port (overrides settings)
    #[arg(long)]
    lobby_port: Option<u16>,

    /// ICE adapter executable (overrides settings)
    #[arg(long)]
    ice_adapter: Option<PathBuf>,

    /// Argument placed before the adapter flags, e.g. `-jar` `faf-ice-adapter.jar` (repeatable)
    #[arg(long = "adapter-arg", allow_hyphen_values = true)]
    adapter_args: Vec<String>,

    /// Game executable; without it the game is expected to be started externally
    #[arg(long)]
    game_exe: Option<PathBuf>,

    /// Extra game argument (repeatable)
    #[arg(long = "game-arg", allow_hyphen_values = true)]
    game_args: Vec<String>,

    /// Host a game with this title once connected
    #[arg(long)]
    host_title: Option<String>,

    /// Map for the hosted game
    #[arg(long, default_value = "scmp_009")]
    map: String,

    /// Featured mod for the hosted game
    #[arg(long, default_value = "faf")]
    game_mod: String,

    /// Visibility of the hosted game
    #[arg(long, default_value = "public")]
    visibility: String,

    /// Password for the hosted game
    #[arg(long)]
    password: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging
    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    info!("Starting FAF ICE session for {} ({})", args.login, args.player_id);

    let mut settings = match &args.settings {
        Some(path) => Settings::load(path)?,
        None => Settings::default(),
    };
    if let Some(host) = args.lobby_host {
        settings.lobby_host = host;
    }
    if let Some(port) = args.lobby_port {
        settings.lobby_port = port;
    }
    if let Some(path) = args.ice_adapter {
        settings.ice_adapter_path = path;
    }

    let hosted_game = args.host_title.map(|title| HostedGame {
        title,
        game_mod: args.game_mod,
        visibility: args.visibility,
        mapname: args.map,
        password: args.password,
    });

    let options = driver::DriverOptions {
        player_id: args.player_id,
        login: args.login,
        adapter_base_args: args.adapter_args,
        game_exe: args.game_exe,
        game_args: args.game_args,
        hosted_game,
    };

    info!("Lobby: {}", settings.lobby_endpoint());
    driver::run(settings, options).await?;

    info!("Session ended, exiting");
    Ok(())
}
