//! The game executable, pointed at the adapter's GPGNet relay port.

use crate::config::IceConfig;
use crate::error::{IceError, Result};
use crate::ice_adapter::process::{shutdown_child, ShutdownOutcome};
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::process::{Child, Command};
use tracing::{error, info};

/// Command line for the game.
#[derive(Debug, Clone)]
pub struct GameLaunch {
    pub executable: PathBuf,
    pub relay_port: u16,
    pub extra_args: Vec<String>,
    pub working_dir: Option<PathBuf>,
}

impl GameLaunch {
    pub fn new(executable: impl AsRef<Path>, relay_port: u16) -> Self {
        Self {
            executable: executable.as_ref().to_path_buf(),
            relay_port,
            extra_args: Vec::new(),
            working_dir: None,
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.extra_args = args;
        self
    }

    pub fn with_working_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.working_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn args(&self) -> Vec<String> {
        let mut args = vec![
            "/gpgnet".to_string(),
            format!("{}:{}", IceConfig::GPGNET_HOST, self.relay_port),
        ];
        args.extend(self.extra_args.iter().cloned());
        args
    }
}

/// A running game process.
#[derive(Debug)]
pub struct GameProcess {
    child: Child,
    pid: Option<u32>,
}

impl GameProcess {
    pub fn spawn(launch: &GameLaunch) -> Result<Self> {
        let args = launch.args();
        let mut cmd = Command::new(&launch.executable);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        if let Some(dir) = &launch.working_dir {
            cmd.current_dir(dir);
        }

        info!("Launching game: {} {}", launch.executable.display(), args.join(" "));
        let child = cmd.spawn().map_err(|e| {
            error!("Failed to launch game: {}", e);
            IceError::LaunchFailed {
                program: launch.executable.display().to_string(),
                message: e.to_string(),
            }
        })?;

        let pid = child.id();
        Ok(Self { child, pid })
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Wait until the game exits.
    pub async fn wait(&mut self) -> Result<ExitStatus> {
        let status = self.child.wait().await?;
        info!("Game exited: {}", status);
        Ok(status)
    }

    /// Stop the game.
    pub async fn close(&mut self, grace: Duration) -> ShutdownOutcome {
        shutdown_child(&mut self.child, grace).await
    }
}
