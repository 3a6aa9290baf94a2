//! Platform-specific process signalling.

use tracing::debug;

/// Ask a process to exit gracefully.
///
/// # Platform Behavior
/// - **Linux/macOS**: Sends `SIGTERM`
/// - **Windows**: Runs `taskkill /PID {pid}` without `/F`, which posts a close request
///
/// A process that already exited is not an error.
pub fn request_terminate(pid: u32) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use nix::errno::Errno;
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        debug!("Sending SIGTERM to process {}", pid);
        match kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(e) => Err(std::io::Error::from(e)),
        }
    }

    #[cfg(windows)]
    {
        use std::process::Command;

        debug!("Requesting close of process {} with taskkill", pid);
        let output = Command::new("taskkill")
            .args(["/PID", &pid.to_string()])
            .output()?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        // "not found" errors are OK - process already dead
        if stderr.contains("not found") || stderr.contains("not running") {
            Ok(())
        } else {
            Err(std::io::Error::other(stderr.trim().to_string()))
        }
    }

    #[cfg(not(any(unix, windows)))]
    {
        debug!("Graceful termination not supported here, process {} left to kill", pid);
        Ok(())
    }
}
