//! ICE adapter process lifecycle.
//!
//! The adapter is spawned with its RPC port on the command line, its output
//! is drained into the log, and a monitor task owns the child until it either
//! exits on its own or [`IceAdapterProcess::close`] shuts it down.
//!
//! # Shutdown
//!
//! Closing escalates in three tiers, each bounded by the grace period:
//! wait for a voluntary exit, request termination and wait again, then kill
//! and reap. See [`shutdown_child`].

use crate::config::{IceConfig, Settings};
use crate::error::{IceError, Result};
use crate::platform;
use async_trait::async_trait;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Configuration for launching the ICE adapter.
#[derive(Debug, Clone)]
pub struct IceAdapterLaunch {
    pub program: PathBuf,
    /// Arguments placed before the adapter's own flags (e.g. `-jar adapter.jar`).
    pub base_args: Vec<String>,
    pub player_id: u32,
    pub login: String,
    pub game_id: u32,
    pub rpc_port: u16,
    pub info_window: bool,
    pub ui_delay: Duration,
    /// Free-form arguments appended after the adapter's own flags.
    pub extra_args: Vec<String>,
    /// Exported to the adapter as `LOG_DIR`.
    pub log_dir: PathBuf,
    pub shutdown_grace: Duration,
}

impl IceAdapterLaunch {
    pub fn new(
        program: impl AsRef<Path>,
        player_id: u32,
        login: impl Into<String>,
        game_id: u32,
        rpc_port: u16,
    ) -> Self {
        Self {
            program: program.as_ref().to_path_buf(),
            base_args: Vec::new(),
            player_id,
            login: login.into(),
            game_id,
            rpc_port,
            info_window: false,
            ui_delay: Duration::ZERO,
            extra_args: Vec::new(),
            log_dir: std::env::temp_dir(),
            shutdown_grace: IceConfig::SHUTDOWN_GRACE,
        }
    }

    /// Build the launch from user settings.
    pub fn from_settings(
        settings: &Settings,
        player_id: u32,
        login: impl Into<String>,
        game_id: u32,
        rpc_port: u16,
    ) -> Self {
        let mut launch = Self::new(&settings.ice_adapter_path, player_id, login, game_id, rpc_port)
            .with_extra_args(settings.ice_adapter_args.clone())
            .with_log_dir(&settings.log_dir);
        if settings.ice_info_window {
            launch = launch.with_info_window(Duration::from_secs(settings.ice_ui_delay_secs));
        }
        launch
    }

    pub fn with_base_args(mut self, args: Vec<String>) -> Self {
        self.base_args = args;
        self
    }

    pub fn with_extra_args(mut self, args: Vec<String>) -> Self {
        self.extra_args = args;
        self
    }

    /// Show the adapter's debug window after `delay`.
    pub fn with_info_window(mut self, delay: Duration) -> Self {
        self.info_window = true;
        self.ui_delay = delay;
        self
    }

    pub fn with_log_dir(mut self, path: impl AsRef<Path>) -> Self {
        self.log_dir = path.as_ref().to_path_buf();
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Full argument list passed to the program.
    pub fn args(&self) -> Vec<String> {
        let mut args = self.base_args.clone();
        args.extend([
            "--id".to_string(),
            self.player_id.to_string(),
            "--login".to_string(),
            self.login.clone(),
            "--game-id".to_string(),
            self.game_id.to_string(),
            "--rpc-port".to_string(),
            self.rpc_port.to_string(),
        ]);
        if self.info_window {
            args.push("--info-window".to_string());
            args.push("--delay-ui".to_string());
            args.push(self.ui_delay.as_millis().to_string());
        }
        args.extend(self.extra_args.iter().cloned());
        args
    }
}

/// How the adapter process ended on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterExit {
    Clean,
    Failed { code: i32 },
    /// Killed by a signal or otherwise ended without an exit code.
    Crashed { signal: Option<i32> },
}

impl AdapterExit {
    pub fn from_status(status: ExitStatus) -> Self {
        match status.code() {
            Some(0) => AdapterExit::Clean,
            Some(code) => AdapterExit::Failed { code },
            None => AdapterExit::Crashed {
                signal: exit_signal(&status),
            },
        }
    }

    pub fn is_error(&self) -> bool {
        !matches!(self, AdapterExit::Clean)
    }
}

impl fmt::Display for AdapterExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdapterExit::Clean => write!(f, "exited normally"),
            AdapterExit::Failed { code } => write!(f, "exited with code {}", code),
            AdapterExit::Crashed { signal: Some(sig) } => write!(f, "crashed (signal {})", sig),
            AdapterExit::Crashed { signal: None } => write!(f, "crashed"),
        }
    }
}

#[cfg(unix)]
fn exit_signal(status: &ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: &ExitStatus) -> Option<i32> {
    None
}

/// Which tier of the shutdown escalation ended the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// Exited within the first wait (or had already exited).
    Exited,
    Terminated,
    Killed,
    /// Still not reaped after the kill; should not happen in practice.
    Unreaped,
}

/// The operations shutdown escalation needs from a child process.
#[async_trait]
pub trait ChildControl: Send {
    /// Wait up to `timeout` for the process to exit. `None` on timeout.
    async fn wait_for(&mut self, timeout: Duration) -> Option<ExitStatus>;

    /// Ask the process to exit.
    fn terminate(&mut self) -> std::io::Result<()>;

    /// Force the process to exit.
    fn kill(&mut self) -> std::io::Result<()>;
}

#[async_trait]
impl ChildControl for Child {
    async fn wait_for(&mut self, timeout: Duration) -> Option<ExitStatus> {
        match tokio::time::timeout(timeout, self.wait()).await {
            Ok(Ok(status)) => Some(status),
            Ok(Err(e)) => {
                warn!("Waiting for process failed: {}", e);
                None
            }
            Err(_) => None,
        }
    }

    fn terminate(&mut self) -> std::io::Result<()> {
        match self.id() {
            Some(pid) => platform::request_terminate(pid),
            // Already reaped.
            None => Ok(()),
        }
    }

    fn kill(&mut self) -> std::io::Result<()> {
        self.start_kill()
    }
}

/// Stop a child: wait, then terminate and wait, then kill and reap.
///
/// Each step only runs after the previous wait timed out, and every wait is
/// bounded by `grace`.
pub async fn shutdown_child<C>(child: &mut C, grace: Duration) -> ShutdownOutcome
where
    C: ChildControl + ?Sized,
{
    if child.wait_for(grace).await.is_some() {
        return ShutdownOutcome::Exited;
    }

    debug!("Process still running after {:?}, terminating", grace);
    if let Err(e) = child.terminate() {
        warn!("Terminate request failed: {}", e);
    }
    if child.wait_for(grace).await.is_some() {
        return ShutdownOutcome::Terminated;
    }

    warn!("Process ignored termination request, killing");
    if let Err(e) = child.kill() {
        error!("Kill failed: {}", e);
    }
    match child.wait_for(grace).await {
        Some(_) => ShutdownOutcome::Killed,
        None => ShutdownOutcome::Unreaped,
    }
}

type CloseRequest = oneshot::Sender<ShutdownOutcome>;

enum MonitorEvent {
    Exited(std::io::Result<ExitStatus>),
    CloseRequested(std::result::Result<CloseRequest, oneshot::error::RecvError>),
}

/// A running ICE adapter process.
pub struct IceAdapterProcess {
    pid: Option<u32>,
    rpc_port: u16,
    close_tx: Option<oneshot::Sender<CloseRequest>>,
    exit_rx: watch::Receiver<Option<AdapterExit>>,
    monitor: Option<JoinHandle<()>>,
}

impl IceAdapterProcess {
    /// Spawn the adapter. Must be called from within a Tokio runtime.
    pub fn spawn(launch: &IceAdapterLaunch) -> Result<Self> {
        std::fs::create_dir_all(&launch.log_dir)
            .map_err(|e| IceError::io_with_path(e, &launch.log_dir))?;

        let args = launch.args();
        let mut cmd = Command::new(&launch.program);
        cmd.args(&args)
            .env(IceConfig::LOG_DIR_ENV, &launch.log_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        info!(
            "Launching ICE adapter: {} {}",
            launch.program.display(),
            args.join(" ")
        );

        let mut child = cmd.spawn().map_err(|e| {
            error!("Failed to spawn ICE adapter: {}", e);
            IceError::LaunchFailed {
                program: launch.program.display().to_string(),
                message: e.to_string(),
            }
        })?;

        let pid = child.id();
        info!("ICE adapter started with PID {:?}, RPC port {}", pid, launch.rpc_port);

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(drain_output(stdout, false));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(drain_output(stderr, true));
        }

        let (exit_tx, exit_rx) = watch::channel(None);
        let (close_tx, close_rx) = oneshot::channel();
        let monitor = tokio::spawn(monitor_child(child, close_rx, exit_tx, launch.shutdown_grace));

        Ok(Self {
            pid,
            rpc_port: launch.rpc_port,
            close_tx: Some(close_tx),
            exit_rx,
            monitor: Some(monitor),
        })
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn rpc_port(&self) -> u16 {
        self.rpc_port
    }

    /// Set once if the process exits without being closed.
    pub fn exit_watch(&self) -> watch::Receiver<Option<AdapterExit>> {
        self.exit_rx.clone()
    }

    pub fn exit_status(&self) -> Option<AdapterExit> {
        *self.exit_rx.borrow()
    }

    /// Shut the process down. Calling it again is a no-op.
    pub async fn close(&mut self) -> ShutdownOutcome {
        let Some(close_tx) = self.close_tx.take() else {
            return ShutdownOutcome::Exited;
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        let outcome = if close_tx.send(reply_tx).is_ok() {
            reply_rx.await.unwrap_or(ShutdownOutcome::Exited)
        } else {
            ShutdownOutcome::Exited
        };

        if let Some(monitor) = self.monitor.take() {
            let _ = monitor.await;
        }
        outcome
    }
}

impl fmt::Debug for IceAdapterProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IceAdapterProcess")
            .field("pid", &self.pid)
            .field("rpc_port", &self.rpc_port)
            .field("exit", &self.exit_status())
            .finish()
    }
}

async fn monitor_child(
    mut child: Child,
    mut close_rx: oneshot::Receiver<CloseRequest>,
    exit_tx: watch::Sender<Option<AdapterExit>>,
    grace: Duration,
) {
    let event = tokio::select! {
        status = child.wait() => MonitorEvent::Exited(status),
        request = &mut close_rx => MonitorEvent::CloseRequested(request),
    };

    match event {
        MonitorEvent::Exited(status) => {
            let exit = match status {
                Ok(status) => AdapterExit::from_status(status),
                Err(e) => {
                    error!("Lost track of ICE adapter process: {}", e);
                    AdapterExit::Crashed { signal: None }
                }
            };
            if exit.is_error() {
                error!("ICE adapter {}", exit);
            } else {
                info!("ICE adapter {}", exit);
            }
            exit_tx.send_replace(Some(exit));

            // Still answer a close() that comes later.
            if let Ok(reply) = close_rx.await {
                let _ = reply.send(ShutdownOutcome::Exited);
            }
        }
        MonitorEvent::CloseRequested(request) => {
            // A dropped handle (Err) also shuts the process down.
            let outcome = shutdown_child(&mut child, grace).await;
            info!("ICE adapter shut down: {:?}", outcome);
            if let Ok(reply) = request {
                let _ = reply.send(outcome);
            }
        }
    }
}

async fn drain_output<R>(stream: R, is_stderr: bool)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stream).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) if is_stderr => warn!(target: "ice_adapter", "{}", line),
            Ok(Some(line)) => info!(target: "ice_adapter", "{}", line),
            Ok(None) => break,
            Err(e) => {
                debug!("Stopped reading ICE adapter output: {}", e);
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn exit_status(code: i32) -> ExitStatus {
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            ExitStatus::from_raw(code << 8)
        }
        #[cfg(windows)]
        {
            use std::os::windows::process::ExitStatusExt;
            ExitStatus::from_raw(code as u32)
        }
    }

    #[derive(Clone, Copy, PartialEq)]
    enum ExitsAfter {
        Start,
        Terminate,
        Kill,
        Never,
    }

    /// Records every escalation step.
    struct ScriptedChild {
        calls: Arc<Mutex<Vec<&'static str>>>,
        exits_after: ExitsAfter,
        exited: bool,
    }

    impl ScriptedChild {
        fn new(exits_after: ExitsAfter) -> (Self, Arc<Mutex<Vec<&'static str>>>) {
            let calls = Arc::new(Mutex::new(Vec::new()));
            let child = Self {
                calls: calls.clone(),
                exits_after,
                exited: exits_after == ExitsAfter::Start,
            };
            (child, calls)
        }
    }

    #[async_trait]
    impl ChildControl for ScriptedChild {
        async fn wait_for(&mut self, _timeout: Duration) -> Option<ExitStatus> {
            self.calls.lock().unwrap().push("wait");
            self.exited.then(|| exit_status(0))
        }

        fn terminate(&mut self) -> std::io::Result<()> {
            self.calls.lock().unwrap().push("terminate");
            if self.exits_after == ExitsAfter::Terminate {
                self.exited = true;
            }
            Ok(())
        }

        fn kill(&mut self) -> std::io::Result<()> {
            self.calls.lock().unwrap().push("kill");
            if self.exits_after == ExitsAfter::Kill {
                self.exited = true;
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_graceful_exit_never_escalates() {
        let (mut child, calls) = ScriptedChild::new(ExitsAfter::Start);
        let outcome = shutdown_child(&mut child, Duration::from_millis(10)).await;
        assert_eq!(outcome, ShutdownOutcome::Exited);
        assert_eq!(*calls.lock().unwrap(), vec!["wait"]);
    }

    #[tokio::test]
    async fn test_terminate_tier() {
        let (mut child, calls) = ScriptedChild::new(ExitsAfter::Terminate);
        let outcome = shutdown_child(&mut child, Duration::from_millis(10)).await;
        assert_eq!(outcome, ShutdownOutcome::Terminated);
        assert_eq!(*calls.lock().unwrap(), vec!["wait", "terminate", "wait"]);
    }

    #[tokio::test]
    async fn test_unresponsive_process_escalates_in_order() {
        let (mut child, calls) = ScriptedChild::new(ExitsAfter::Kill);
        let outcome = shutdown_child(&mut child, Duration::from_millis(10)).await;
        assert_eq!(outcome, ShutdownOutcome::Killed);
        assert_eq!(
            *calls.lock().unwrap(),
            vec!["wait", "terminate", "wait", "kill", "wait"]
        );
    }

    #[tokio::test]
    async fn test_unkillable_process_is_reported() {
        let (mut child, calls) = ScriptedChild::new(ExitsAfter::Never);
        let outcome = shutdown_child(&mut child, Duration::from_millis(10)).await;
        assert_eq!(outcome, ShutdownOutcome::Unreaped);
        assert_eq!(calls.lock().unwrap().len(), 5);
    }

    #[test]
    fn test_launch_args() {
        let launch = IceAdapterLaunch::new("faf-ice-adapter", 42, "Zoe", 1337, 7236)
            .with_base_args(vec!["-jar".into(), "adapter.jar".into()])
            .with_extra_args(vec!["--force-relay".into()]);

        assert_eq!(
            launch.args(),
            vec![
                "-jar", "adapter.jar", "--id", "42", "--login", "Zoe", "--game-id", "1337",
                "--rpc-port", "7236", "--force-relay"
            ]
        );
    }

    #[test]
    fn test_launch_args_with_info_window() {
        let launch = IceAdapterLaunch::new("faf-ice-adapter", 1, "a", 2, 3)
            .with_info_window(Duration::from_secs(10));
        let args = launch.args();
        let pos = args.iter().position(|a| a == "--info-window").unwrap();
        assert_eq!(&args[pos..], ["--info-window", "--delay-ui", "10000"]);
    }

    #[test]
    fn test_launch_from_settings() {
        let settings = Settings {
            ice_adapter_path: PathBuf::from("/opt/faf/ice-adapter"),
            ice_adapter_args: vec!["--debug".into()],
            ice_info_window: true,
            ice_ui_delay_secs: 2,
            log_dir: PathBuf::from("/tmp/faf-logs"),
            ..Settings::default()
        };
        let launch = IceAdapterLaunch::from_settings(&settings, 5, "p", 6, 7000);
        assert_eq!(launch.program, PathBuf::from("/opt/faf/ice-adapter"));
        assert_eq!(launch.log_dir, PathBuf::from("/tmp/faf-logs"));
        assert!(launch.args().ends_with(&[
            "--info-window".to_string(),
            "--delay-ui".to_string(),
            "2000".to_string(),
            "--debug".to_string()
        ]));
    }

    #[test]
    fn test_exit_classification() {
        assert_eq!(AdapterExit::from_status(exit_status(0)), AdapterExit::Clean);
        assert_eq!(
            AdapterExit::from_status(exit_status(3)),
            AdapterExit::Failed { code: 3 }
        );
        assert!(!AdapterExit::Clean.is_error());
        assert_eq!(AdapterExit::Failed { code: 3 }.to_string(), "exited with code 3");
    }

    #[tokio::test]
    async fn test_spawn_missing_program_fails() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let launch = IceAdapterLaunch::new(temp_dir.path().join("no-such-adapter"), 1, "a", 2, 3)
            .with_log_dir(temp_dir.path());
        match IceAdapterProcess::spawn(&launch) {
            Err(IceError::LaunchFailed { program, .. }) => {
                assert!(program.contains("no-such-adapter"))
            }
            other => panic!("Expected LaunchFailed, got: {:?}", other),
        }
    }
}
