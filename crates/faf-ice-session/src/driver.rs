//! The session event loop.
//!
//! Every source of work (lobby messages, adapter events, the game process,
//! lobby reconnects, Ctrl-C) is polled from one `select!` so the
//! [`GameSession`] is only ever touched from this task.

use faf_ice_core::session::GAME_TARGET;
use faf_ice_core::{
    ApiConfig, Dispatcher, GameLaunch, GameProcess, GameSession, HostedGame, IceConfig, IceError,
    LobbyConnection, LobbyLink, LobbyState, ProcessAdapterLauncher, ReplayCapture, ReplayTarget,
    SessionEvent, Settings,
};
use serde_json::Value;
use std::path::PathBuf;
use std::process::ExitStatus;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Who is playing and how to start the game.
#[derive(Debug, Clone)]
pub struct DriverOptions {
    pub player_id: u32,
    pub login: String,
    pub adapter_base_args: Vec<String>,
    pub game_exe: Option<PathBuf>,
    pub game_args: Vec<String>,
    pub hosted_game: Option<HostedGame>,
}

/// Run until Ctrl-C, SIGTERM or the lobby connection task ends.
pub async fn run(settings: Settings, options: DriverOptions) -> anyhow::Result<()> {
    let (lobby, mut inbound, lobby_task) =
        LobbyConnection::start(settings.lobby_endpoint(), settings.keepalive_interval());

    let mut dispatcher = Dispatcher::new();
    let mut relay_rx = dispatcher.register_target(GAME_TARGET);
    let mut launch_rx = dispatcher.register_command("game_launch");

    let api = match ApiConfig::from_settings(&settings) {
        Ok(api) => Some(api),
        Err(e) => {
            warn!("ICE servers disabled: {}", e);
            None
        }
    };
    let launcher = Arc::new(
        ProcessAdapterLauncher::new(settings.clone())
            .with_base_args(options.adapter_base_args.clone()),
    );

    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let (mut session, mut adapter_rx) = GameSession::new(
        options.player_id,
        options.login.clone(),
        Arc::new(lobby.clone()),
        launcher,
        api,
        events_tx,
    );

    let replay_target = settings.replay_capture.then(|| ReplayTarget {
        dir: settings.replay_dir.clone(),
        relay_endpoint: settings.replay_relay_endpoint.clone(),
    });

    let mut lobby_state = lobby.state_watch();
    let mut game: Option<GameProcess> = None;
    let mut replay: Option<ReplayCapture> = None;
    let mut host_sent = false;
    let mut shutdown = std::pin::pin!(shutdown_signal());

    loop {
        tokio::select! {
            Some(message) = inbound.recv() => {
                dispatcher.dispatch(message);
            }
            Some(message) = relay_rx.recv() => {
                if let Err(e) = session.handle_message(&message) {
                    warn!("Relay message not handled: {}", e);
                }
            }
            Some(message) = launch_rx.recv() => {
                let launch = launch_game(
                    &mut session,
                    &mut game,
                    &mut replay,
                    &message,
                    &options,
                    replay_target.as_ref(),
                );
                if let Err(e) = launch.await {
                    error!("Game launch failed: {}", e);
                }
            }
            Some(event) = adapter_rx.recv() => {
                session.handle_adapter_event(event);
            }
            Some(event) = events_rx.recv() => log_session_event(&event),
            changed = lobby_state.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *lobby_state.borrow_and_update();
                debug!("Lobby connection: {:?}", state);
                if state == LobbyState::Connected {
                    session.on_lobby_connected();
                    if !host_sent {
                        if let Some(hosted) = &options.hosted_game {
                            host_sent = true;
                            match lobby.send(hosted.host_request(false)) {
                                Ok(()) => session.set_hosted_game(hosted.clone()),
                                Err(e) => error!("Host request not sent: {}", e),
                            }
                        }
                    }
                }
            }
            status = wait_for_game(&mut game) => {
                game = None;
                match status {
                    Ok(status) if !status.success() => warn!("Game exited with {}", status),
                    Ok(_) => {}
                    Err(e) => error!("Lost track of the game process: {}", e),
                }
                finish_replay(&mut replay);
                session.on_game_exited().await;
            }
            _ = &mut shutdown => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    if let Some(mut game) = game.take() {
        game.close(IceConfig::SHUTDOWN_GRACE).await;
    }
    finish_replay(&mut replay);
    session.shutdown().await;
    lobby.shutdown();
    let _ = lobby_task.await;
    Ok(())
}

async fn launch_game(
    session: &mut GameSession,
    game: &mut Option<GameProcess>,
    replay: &mut Option<ReplayCapture>,
    message: &Value,
    options: &DriverOptions,
    replay_target: Option<&ReplayTarget>,
) -> faf_ice_core::Result<()> {
    let game_id = message
        .get("uid")
        .and_then(Value::as_u64)
        .and_then(|uid| u32::try_from(uid).ok())
        .ok_or_else(|| IceError::InvalidRelayMessage {
            message: format!("game_launch without uid: {}", message),
        })?;

    if session.state().is_active() || game.is_some() {
        warn!(
            "game_launch for {} while game {:?} is still active, replacing it",
            game_id,
            session.game_id()
        );
        if let Some(mut previous) = game.take() {
            previous.close(IceConfig::SHUTDOWN_GRACE).await;
        }
        finish_replay(replay);
    }

    let relay_port = session.start_ice_adapter(game_id).await?;
    // Machine-readable line for wrappers that start the game themselves.
    println!("GPGNET_PORT={}", relay_port);

    if let Some(exe) = &options.game_exe {
        let mut args = options.game_args.clone();
        if let Some(Value::Array(extra)) = message.get("args") {
            args.extend(extra.iter().filter_map(Value::as_str).map(String::from));
        }
        if let Some(target) = replay_target {
            match ReplayCapture::start(game_id, target.clone()).await {
                Ok(capture) => {
                    args.extend(capture.game_args(session.login()));
                    *replay = Some(capture);
                }
                Err(e) => warn!("Replay will not be captured: {}", e),
            }
        }

        let mut launch = GameLaunch::new(exe, relay_port).with_args(args);
        if let Some(dir) = exe.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            launch = launch.with_working_dir(dir);
        }
        match GameProcess::spawn(&launch) {
            Ok(process) => *game = Some(process),
            Err(e) => {
                finish_replay(replay);
                session.shutdown().await;
                return Err(e);
            }
        }
    }

    session.on_game_launched();
    Ok(())
}

/// Ctrl-C, or SIGTERM on unix.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
                return;
            }
            Err(e) => warn!("SIGTERM handler not installed: {}", e),
        }
    }
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Ctrl-C handler not installed: {}", e);
        std::future::pending::<()>().await;
    }
}

/// Let the replay capture wind down in the background.
fn finish_replay(replay: &mut Option<ReplayCapture>) {
    if let Some(capture) = replay.take() {
        tokio::spawn(capture.finish());
    }
}

async fn wait_for_game(game: &mut Option<GameProcess>) -> faf_ice_core::Result<ExitStatus> {
    match game {
        Some(process) => process.wait().await,
        None => std::future::pending().await,
    }
}

fn log_session_event(event: &SessionEvent) {
    match event {
        SessionEvent::StateChanged(state) => info!("Game session state: {}", state),
        SessionEvent::Ready => info!("Game connected to the ICE adapter"),
        SessionEvent::Notice(notice) => error!("{}", notice),
        SessionEvent::AdapterExited(exit) => info!("ICE adapter {}", exit),
        SessionEvent::PeerConnectionChanged { remote_id, state } => {
            info!("Peer {}: {}", remote_id, state)
        }
    }
}
