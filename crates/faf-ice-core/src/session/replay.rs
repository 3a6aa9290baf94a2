//! Replay capture.
//!
//! The game streams its replay to a `gpgnet://` URL given with `/savereplay`.
//! [`ReplayCapture`] listens on a local port for that stream and stores the
//! bytes unmodified. When a live replay server is configured, the same bytes
//! are relayed there as they arrive. The stream is never parsed.
//!
//! The file is written as `<game id>.SCFAreplay.part` and renamed once the
//! game closes the stream, so a partial file is never mistaken for a replay.

use crate::config::ReplayConfig;
use crate::error::{IceError, Result};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// A replay that was captured to disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedReplay {
    pub path: PathBuf,
    pub bytes: u64,
    /// Whether the live replay server received the whole stream.
    pub relayed: bool,
}

/// Where captured replays go.
#[derive(Debug, Clone)]
pub struct ReplayTarget {
    pub dir: PathBuf,
    /// `host:port` of the live replay server, if any.
    pub relay_endpoint: Option<String>,
}

/// Receives the game's replay stream for one game.
#[derive(Debug)]
pub struct ReplayCapture {
    game_id: u32,
    port: u16,
    task: JoinHandle<Result<CapturedReplay>>,
}

impl ReplayCapture {
    /// Bind a local port and wait for the game in the background.
    pub async fn start(game_id: u32, target: ReplayTarget) -> Result<Self> {
        tokio::fs::create_dir_all(&target.dir)
            .await
            .map_err(|e| IceError::io_with_path(e, &target.dir))?;

        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await?;
        let port = listener.local_addr()?.port();
        info!("Replay capture for game {} listening on port {}", game_id, port);

        let task = tokio::spawn(capture(listener, game_id, target));
        Ok(Self {
            game_id,
            port,
            task,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Game arguments that point the replay stream here.
    pub fn game_args(&self, login: &str) -> Vec<String> {
        vec![
            "/savereplay".to_string(),
            format!(
                "gpgnet://127.0.0.1:{}/{}/{}.SCFAreplay",
                self.port, self.game_id, login
            ),
        ]
    }

    /// Wait for the capture to end after the game exited.
    ///
    /// Returns `None` if the game never connected, or if the stream did not
    /// end within [`ReplayConfig::FINISH_TIMEOUT`].
    pub async fn finish(self) -> Option<CapturedReplay> {
        let mut task = self.task;
        match tokio::time::timeout(ReplayConfig::FINISH_TIMEOUT, &mut task).await {
            Ok(Ok(Ok(replay))) => {
                info!(
                    "Replay for game {} saved to {} ({} bytes)",
                    self.game_id,
                    replay.path.display(),
                    replay.bytes
                );
                Some(replay)
            }
            Ok(Ok(Err(e))) => {
                error!("Replay capture for game {} failed: {}", self.game_id, e);
                None
            }
            Ok(Err(e)) => {
                error!("Replay capture task for game {} ended: {}", self.game_id, e);
                None
            }
            Err(_) => {
                task.abort();
                warn!("No replay stream received for game {}", self.game_id);
                None
            }
        }
    }
}

async fn capture(
    listener: TcpListener,
    game_id: u32,
    target: ReplayTarget,
) -> Result<CapturedReplay> {
    let (mut stream, peer) = listener.accept().await?;
    drop(listener);
    debug!("Game connected replay stream from {}", peer);

    let path = replay_path(&target.dir, game_id);
    let part_path = path.with_extension("SCFAreplay.part");
    let mut file = File::create(&part_path)
        .await
        .map_err(|e| IceError::io_with_path(e, &part_path))?;

    let mut relay = match &target.relay_endpoint {
        Some(endpoint) => match TcpStream::connect(endpoint).await {
            Ok(upstream) => Some(upstream),
            Err(e) => {
                warn!("Live replay server {} unavailable: {}", endpoint, e);
                None
            }
        },
        None => None,
    };
    let mut relayed = relay.is_some();

    let mut chunk = vec![0u8; ReplayConfig::CHUNK_SIZE];
    let mut bytes = 0u64;
    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        file.write_all(&chunk[..n])
            .await
            .map_err(|e| IceError::io_with_path(e, &part_path))?;
        if let Some(upstream) = relay.as_mut() {
            if let Err(e) = upstream.write_all(&chunk[..n]).await {
                warn!("Live replay relay stopped: {}", e);
                relay = None;
                relayed = false;
            }
        }
        bytes += n as u64;
    }

    file.flush().await?;
    drop(file);
    if let Some(mut upstream) = relay.take() {
        let _ = upstream.shutdown().await;
    }
    tokio::fs::rename(&part_path, &path)
        .await
        .map_err(|e| IceError::io_with_path(e, &path))?;

    Ok(CapturedReplay {
        path,
        bytes,
        relayed,
    })
}

fn replay_path(dir: &Path, game_id: u32) -> PathBuf {
    dir.join(format!("{}.SCFAreplay", game_id))
}
