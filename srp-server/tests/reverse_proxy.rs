//! End-to-end tests that drive the real `srp-server` and `srp-agent`
//! binaries as separate processes, talking to each other over real TCP
//! sockets exactly as they would in production: an intranet echo service,
//! a public exposure, and ordinary clients connecting to the exposed port.

use std::io::Read as _;
use std::net::{Ipv4Addr, SocketAddrV4, TcpListener};
use std::process::{Child, Command, Stdio};
use std::time::Duration;

use rand::RngCore;
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::Instant;

/// Kills its wrapped process on drop, so a failed assertion never leaves a
/// server or agent running in the background.
struct ChildGuard(Child);

impl Drop for ChildGuard {
    fn drop(&mut self) {
        let _ = self.0.kill();
        let _ = self.0.wait();
    }
}

fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

fn spawn_server(http_port: u16, data_port: u16, db_path: &std::path::Path) -> ChildGuard {
    let child = Command::new(env!("CARGO_BIN_EXE_srp-server"))
        .args([
            "--http",
            &http_port.to_string(),
            "--data",
            &data_port.to_string(),
            "--db",
            db_path.to_str().unwrap(),
        ])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("failed to start srp-server");
    ChildGuard(child)
}

fn spawn_agent(http_port: u16, name: &str) -> ChildGuard {
    let child = Command::new(env!("CARGO_BIN_EXE_srp-agent"))
        .args([
            "--server",
            &format!("127.0.0.1:{http_port}"),
            "--name",
            name,
        ])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("failed to start srp-agent");
    ChildGuard(child)
}

/// Polls `check` until it returns `true` or `timeout` elapses.
async fn wait_until<F, Fut>(mut check: F, timeout: Duration)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let start = Instant::now();
    loop {
        if check().await {
            return;
        }
        if start.elapsed() > timeout {
            panic!("condition did not become true within {timeout:?}");
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

async fn control_api_is_up(base: &str) -> bool {
    reqwest::get(format!("{base}/api/v1/dataport"))
        .await
        .map(|r| r.status().is_success())
        .unwrap_or(false)
}

async fn agent_is_connected(base: &str, name: &str) -> bool {
    let Ok(resp) = reqwest::get(format!("{base}/api/v1/agents")).await else {
        return false;
    };
    let Ok(agents): Result<Vec<Value>, _> = resp.json().await else {
        return false;
    };
    agents.iter().any(|a| a["id"] == name)
}

async fn register_service(base: &str, id: &str, addr: SocketAddrV4) {
    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{base}/api/v1/services"))
        .json(&serde_json::json!({ "id": id, "addr": addr.to_string(), "description": "" }))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success(), "service create failed: {resp:?}");
}

async fn create_exposure(base: &str, service_id: &str, agent_id: &str, port: u16) {
    let client = reqwest::Client::new();
    let resp = client
        .put(format!(
            "{base}/api/v1/services/{service_id}/exposure?agent={agent_id}&port={port}"
        ))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success(), "exposure create failed: {resp:?}");
}

/// Accepts connections forever and echoes back whatever it reads, standing
/// in for the intranet service an agent dials out to.
async fn spawn_echo_service() -> SocketAddrV4 {
    let listener = tokio::net::TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
        .await
        .unwrap();
    let addr = match listener.local_addr().unwrap() {
        std::net::SocketAddr::V4(v4) => v4,
        _ => unreachable!(),
    };

    tokio::spawn(async move {
        loop {
            let (mut socket, _) = match listener.accept().await {
                Ok(pair) => pair,
                Err(_) => break,
            };
            tokio::spawn(async move {
                let mut buf = vec![0u8; 4096];
                loop {
                    let n = match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => n,
                    };
                    if socket.write_all(&buf[..n]).await.is_err() {
                        break;
                    }
                }
            });
        }
    });

    addr
}

fn random_payload(len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut buf);
    buf
}

/// A fully wired server + agent + exposed echo service, ready for clients
/// to connect to `public_port`.
struct Fixture {
    _server: ChildGuard,
    _agent: ChildGuard,
    _db_dir: tempfile::TempDir,
    base: String,
    public_port: u16,
}

async fn setup() -> Fixture {
    let http_port = free_port();
    let data_port = free_port();
    let db_dir = tempfile::tempdir().unwrap();
    let base = format!("http://127.0.0.1:{http_port}");

    let server = spawn_server(http_port, data_port, &db_dir.path().join("service.db"));
    wait_until(|| control_api_is_up(&base), Duration::from_secs(10)).await;

    let echo_addr = spawn_echo_service().await;
    register_service(&base, "svc", echo_addr).await;

    let agent = spawn_agent(http_port, "a1");
    wait_until(
        || agent_is_connected(&base, "a1"),
        Duration::from_secs(10),
    )
    .await;

    let public_port = free_port();
    create_exposure(&base, "svc", "a1", public_port).await;

    Fixture {
        _server: server,
        _agent: agent,
        _db_dir: db_dir,
        base,
        public_port,
    }
}

#[tokio::test]
async fn byte_stream_round_trips_through_live_server_and_agent() {
    let fixture = setup().await;

    let mut client = TcpStream::connect(("127.0.0.1", fixture.public_port))
        .await
        .unwrap();

    client.write_all(b"ping").await.unwrap();
    let mut buf = [0u8; 4];
    client.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"ping");

    let payload = random_payload(64 * 1024);
    client.write_all(&payload).await.unwrap();
    let mut echoed = vec![0u8; payload.len()];
    client.read_exact(&mut echoed).await.unwrap();
    assert_eq!(echoed, payload);
}

#[tokio::test]
async fn concurrent_user_flows_do_not_crosstalk() {
    let fixture = setup().await;

    let run_client = |port: u16, payload: Vec<u8>| async move {
        let mut client = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        client.write_all(&payload).await.unwrap();
        let mut echoed = vec![0u8; payload.len()];
        client.read_exact(&mut echoed).await.unwrap();
        echoed
    };

    let payload_a = random_payload(10 * 1024);
    let payload_b = random_payload(10 * 1024);
    assert_ne!(payload_a, payload_b, "test payloads must differ to detect crosstalk");

    let (echoed_a, echoed_b) = tokio::join!(
        run_client(fixture.public_port, payload_a.clone()),
        run_client(fixture.public_port, payload_b.clone()),
    );

    assert_eq!(echoed_a, payload_a, "client A received bytes that were not its own");
    assert_eq!(echoed_b, payload_b, "client B received bytes that were not its own");
}

#[tokio::test]
async fn deleted_exposure_refuses_new_connections() {
    let fixture = setup().await;

    assert!(TcpStream::connect(("127.0.0.1", fixture.public_port))
        .await
        .is_ok());

    let client = reqwest::Client::new();
    let resp = client
        .delete(format!("{}/api/v1/services/svc/exposure", fixture.base))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());

    wait_until(
        || {
            let port = fixture.public_port;
            async move { std::net::TcpStream::connect(("127.0.0.1", port)).is_err() }
        },
        Duration::from_secs(5),
    )
    .await;
}

#[tokio::test]
async fn agent_reconnect_after_restart_restores_the_tunnel() {
    let http_port = free_port();
    let data_port = free_port();
    let db_dir = tempfile::tempdir().unwrap();
    let base = format!("http://127.0.0.1:{http_port}");

    let _server = spawn_server(http_port, data_port, &db_dir.path().join("service.db"));
    wait_until(|| control_api_is_up(&base), Duration::from_secs(10)).await;

    let echo_addr = spawn_echo_service().await;
    register_service(&base, "svc", echo_addr).await;

    let mut agent = spawn_agent(http_port, "a1");
    wait_until(
        || agent_is_connected(&base, "a1"),
        Duration::from_secs(10),
    )
    .await;

    let public_port = free_port();
    create_exposure(&base, "svc", "a1", public_port).await;

    let mut client = TcpStream::connect(("127.0.0.1", public_port))
        .await
        .unwrap();
    client.write_all(b"x1").await.unwrap();
    let mut buf = [0u8; 2];
    client.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"x1");
    drop(client);

    // Kill the agent process and wait for the server to notice the tunnel
    // dropped before starting a replacement under the same id.
    agent.0.kill().unwrap();
    agent.0.wait().unwrap();
    wait_until(
        || async { !agent_is_connected(&base, "a1").await },
        Duration::from_secs(5),
    )
    .await;

    let _agent2 = spawn_agent(http_port, "a1");
    wait_until(
        || agent_is_connected(&base, "a1"),
        Duration::from_secs(10),
    )
    .await;

    let mut client = TcpStream::connect(("127.0.0.1", public_port))
        .await
        .unwrap();
    client.write_all(b"y").await.unwrap();
    let mut buf = [0u8; 1];
    client.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"y");
}
