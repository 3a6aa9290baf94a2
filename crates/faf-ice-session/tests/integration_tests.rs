//! End-to-end tests for the faf-ice-session binary.
//!
//! The test plays both the lobby server and the ICE adapter. The configured
//! adapter "executable" is a shell script that records its command line and
//! sleeps; the test then binds the RPC port from that command line and
//! answers the session's JSON-RPC calls itself.

#![cfg(unix)]

use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;

const ADAPTER_SCRIPT: &str =
    r#"echo $$ > "$LOG_DIR/adapter.pid"; printf '%s\n' "$@" > "$LOG_DIR/adapter-args.txt"; exec sleep 30"#;

fn binary_path() -> PathBuf {
    if let Ok(path) = std::env::var("CARGO_BIN_EXE_faf-ice-session") {
        return PathBuf::from(path);
    }
    let current_exe = std::env::current_exe().unwrap();
    current_exe
        .parent()
        .and_then(|p| p.parent())
        .unwrap()
        .join("faf-ice-session")
}

fn write_settings(dir: &Path, lobby_port: u16) -> PathBuf {
    let path = dir.join("settings.json");
    let settings = json!({
        "lobby_host": "127.0.0.1",
        "lobby_port": lobby_port,
        // Nothing listens here; the ICE servers fetch fails and is logged.
        "api_base_url": "http://127.0.0.1:1",
        "log_dir": dir.join("logs"),
        "rpc_connect_attempts": 100
    });
    std::fs::write(&path, settings.to_string()).unwrap();
    path
}

fn spawn_session(settings: &Path) -> Child {
    Command::new(binary_path())
        .arg("--settings")
        .arg(settings)
        .args(["--player-id", "1", "--login", "tester", "--ice-adapter", "sh"])
        .arg("--adapter-arg=-c")
        .arg(format!("--adapter-arg={}", ADAPTER_SCRIPT))
        .arg("--adapter-arg=sh")
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .expect("failed to spawn faf-ice-session")
}

/// Reads concatenated JSON objects, the way the adapter sees them.
struct JsonStream {
    reader: OwnedReadHalf,
    buf: Vec<u8>,
}

impl JsonStream {
    async fn next(&mut self) -> Value {
        loop {
            let parsed = {
                let mut iter = serde_json::Deserializer::from_slice(&self.buf).into_iter::<Value>();
                match iter.next() {
                    Some(Ok(value)) => Some((value, iter.byte_offset())),
                    _ => None,
                }
            };
            if let Some((value, consumed)) = parsed {
                self.buf.drain(..consumed);
                return value;
            }
            let mut chunk = [0u8; 4096];
            let n = self.reader.read(&mut chunk).await.unwrap();
            assert!(n > 0, "adapter connection closed");
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }
}

/// Wait for the adapter script to record its arguments.
async fn adapter_args(log_dir: &Path) -> Vec<String> {
    let path = log_dir.join("adapter-args.txt");
    for _ in 0..100 {
        if let Ok(raw) = std::fs::read_to_string(&path) {
            if raw.contains("--rpc-port") {
                return raw.lines().map(String::from).collect();
            }
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("ICE adapter was not started");
}

/// Stop the session the way a service manager would and wait for it.
async fn terminate(session: &mut Child) -> std::process::ExitStatus {
    let pid = session.id().expect("session already reaped");
    kill(Pid::from_raw(pid as i32), Signal::SIGTERM).unwrap();
    tokio::time::timeout(Duration::from_secs(15), session.wait())
        .await
        .expect("session did not exit after SIGTERM")
        .unwrap()
}

fn flag_value<'a>(args: &'a [String], flag: &str) -> &'a str {
    let pos = args.iter().position(|a| a == flag).unwrap();
    &args[pos + 1]
}

/// Play the adapter on `stream`: answer `status` calls, hand every other
/// request to the test and write whatever the test sends.
fn spawn_fake_adapter(
    stream: TcpStream,
) -> (mpsc::UnboundedReceiver<Value>, mpsc::UnboundedSender<Value>) {
    let (request_tx, request_rx) = mpsc::unbounded_channel();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Value>();
    let (reader, mut writer) = stream.into_split();
    let mut requests = JsonStream {
        reader,
        buf: Vec::new(),
    };

    tokio::spawn(async move {
        loop {
            tokio::select! {
                request = requests.next() => {
                    if request["method"] == "status" {
                        let reply = json!({
                            "jsonrpc": "2.0",
                            "id": request["id"],
                            "result": {"gpgnet": {"local_port": 6112, "connected": false}}
                        });
                        writer.write_all(reply.to_string().as_bytes()).await.unwrap();
                    } else if request_tx.send(request).is_err() {
                        break;
                    }
                }
                Some(message) = outbound_rx.recv() => {
                    writer.write_all(message.to_string().as_bytes()).await.unwrap();
                }
            }
        }
    });

    (request_rx, outbound_tx)
}

async fn read_lobby_message(lines: &mut tokio::io::Lines<BufReader<OwnedReadHalf>>) -> Value {
    let line = tokio::time::timeout(Duration::from_secs(10), lines.next_line())
        .await
        .expect("lobby message timed out")
        .unwrap()
        .expect("lobby connection closed");
    serde_json::from_str(&line).unwrap()
}

#[tokio::test]
async fn test_game_launch_relays_between_lobby_and_adapter() {
    let temp_dir = TempDir::new().unwrap();
    let lobby_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let settings = write_settings(temp_dir.path(), lobby_listener.local_addr().unwrap().port());

    let mut session = spawn_session(&settings);
    let stdout = session.stdout.take().unwrap();
    let mut stdout_lines = BufReader::new(stdout).lines();

    // Lobby side
    let (lobby, _) = tokio::time::timeout(Duration::from_secs(10), lobby_listener.accept())
        .await
        .expect("session never connected to the lobby")
        .unwrap();
    let (lobby_reader, mut lobby_writer) = lobby.into_split();
    let mut lobby_lines = BufReader::new(lobby_reader).lines();
    lobby_writer
        .write_all(b"{\"command\":\"game_launch\",\"uid\":4711,\"args\":[]}\n")
        .await
        .unwrap();

    // Adapter side
    let args = adapter_args(&temp_dir.path().join("logs")).await;
    assert_eq!(flag_value(&args, "--id"), "1");
    assert_eq!(flag_value(&args, "--login"), "tester");
    assert_eq!(flag_value(&args, "--game-id"), "4711");
    let rpc_port: u16 = flag_value(&args, "--rpc-port").parse().unwrap();

    let adapter_listener = TcpListener::bind(("127.0.0.1", rpc_port)).await.unwrap();
    let (adapter, _) = tokio::time::timeout(Duration::from_secs(10), adapter_listener.accept())
        .await
        .expect("session never connected to the adapter")
        .unwrap();
    let (mut adapter_requests, adapter_out) = spawn_fake_adapter(adapter);

    // The session announces the relay port once status reported it.
    let announced = tokio::time::timeout(Duration::from_secs(15), async {
        loop {
            let line = stdout_lines.next_line().await.unwrap().expect("session exited");
            if let Some(port) = line.strip_prefix("GPGNET_PORT=") {
                return port.trim().to_string();
            }
        }
    })
    .await
    .expect("relay port never announced");
    assert_eq!(announced, "6112");

    // Game -> lobby
    adapter_out
        .send(json!({
            "jsonrpc": "2.0",
            "method": "onGpgNetMessageReceived",
            "params": ["GameState", ["Idle"]]
        }))
        .unwrap();
    assert_eq!(
        read_lobby_message(&mut lobby_lines).await,
        json!({"command": "GameState", "target": "game", "args": ["Idle"]})
    );

    // Lobby -> adapter
    lobby_writer
        .write_all(b"{\"command\":\"JoinGame\",\"target\":\"game\",\"args\":[\"peer\",2]}\n")
        .await
        .unwrap();
    let join = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let request = adapter_requests.recv().await.expect("adapter connection closed");
            if request["method"] == "joinGame" {
                return request;
            }
        }
    })
    .await
    .expect("joinGame never reached the adapter");
    assert_eq!(join["params"], json!(["peer", 2]));
    assert!(join.get("id").is_none());

    // A clean shutdown also stops the adapter.
    let status = terminate(&mut session).await;
    assert!(status.success(), "session exited with {}", status);
    let pid_file = temp_dir.path().join("logs").join("adapter.pid");
    let adapter_pid: i32 = std::fs::read_to_string(pid_file).unwrap().trim().parse().unwrap();
    assert_eq!(kill(Pid::from_raw(adapter_pid), None), Err(Errno::ESRCH));
}

#[tokio::test]
async fn test_requires_player_identity() {
    let output = Command::new(binary_path())
        .arg("--login")
        .arg("tester")
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .output()
        .await
        .unwrap();
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("--player-id"));
}
